/*!
 * Vigil Capture Library
 *
 * Capture-stream brokering and change detection for autonomous observation
 * agents. The broker shares a handful of exclusive capture devices across
 * independently scheduled agents; the change detector decides whether a new
 * capture differs enough from the last one to be worth processing.
 */

pub mod agent;
pub mod detect;
pub mod error;
pub mod sensors;
pub mod stream;

// Re-export commonly used types
pub use agent::{AgentLoop, AgentLoopConfig};
pub use detect::{Capture, ChangeDetector, DetectorMode, SimilarityThresholds};
pub use error::{AcquireError, ThresholdError};
pub use sensors::SensorTag;
pub use stream::{
    DeviceAcquirer, GlobalStreamState, ListenerId, StreamKind, StreamManager, SyntheticAcquirer,
};
