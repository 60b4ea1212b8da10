/*!
 * Capture Stream Module
 *
 * Catalog of capturable stream kinds, raw frame types, the capture-source
 * abstraction, and the global stream snapshot published by the broker.
 */

pub mod acquirer;
pub mod manager;
pub mod mixer;

pub use acquirer::{DeviceAcquirer, SyntheticAcquirer, SyntheticConfig};
pub use manager::{ListenerId, StreamManager};

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Logical category of capturable input.
///
/// Each kind maps to at most one underlying device-level capture at any time,
/// no matter how many consumers reference it. `AllAudio` is a derived kind:
/// it is produced by mixing the microphone and system-audio tracks and is
/// never opened as a device of its own.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum StreamKind {
    Camera,
    ScreenVideo,
    ScreenAudio,
    Microphone,
    AllAudio,
}

impl StreamKind {
    /// Every kind in the catalog, in declaration order.
    pub const ALL: [StreamKind; 5] = [
        StreamKind::Camera,
        StreamKind::ScreenVideo,
        StreamKind::ScreenAudio,
        StreamKind::Microphone,
        StreamKind::AllAudio,
    ];

    /// Stable identifier matching the serialized form.
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Camera => "camera",
            StreamKind::ScreenVideo => "screenVideo",
            StreamKind::ScreenAudio => "screenAudio",
            StreamKind::Microphone => "microphone",
            StreamKind::AllAudio => "allAudio",
        }
    }

    /// True for kinds that carry audio samples.
    pub fn is_audio(&self) -> bool {
        matches!(
            self,
            StreamKind::ScreenAudio | StreamKind::Microphone | StreamKind::AllAudio
        )
    }

    /// True for kinds that carry video frames.
    pub fn is_video(&self) -> bool {
        matches!(self, StreamKind::Camera | StreamKind::ScreenVideo)
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw video frame (RGBA8 pixels).
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub timestamp_ms: i64,
    pub width: u32,
    pub height: u32,
    /// Tightly packed RGBA8, row-major, `width * height * 4` bytes.
    pub data: Vec<u8>,
}

impl VideoFrame {
    /// Decode into an owned image buffer. Returns `None` when the byte count
    /// does not match the declared dimensions.
    pub fn to_image(&self) -> Option<image::RgbaImage> {
        image::RgbaImage::from_raw(self.width, self.height, self.data.clone())
    }
}

/// Raw audio frame (interleaved f32 PCM).
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub timestamp_ms: i64,
    pub data: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u32,
}

impl AudioFrame {
    /// Number of sample frames (samples per channel).
    pub fn frame_count(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.data.len() / self.channels as usize
    }
}

/// A live capture stream handed out by the broker.
///
/// Consumers never hold raw device handles; they read frames through this
/// trait and leave open/close decisions to the broker's reference counting.
/// `stop` tears down the underlying capture and is called by the broker
/// exactly when the last consumer releases the kind.
pub trait CaptureSource: Send + Sync {
    fn id(&self) -> Uuid;
    fn kind(&self) -> StreamKind;
    fn is_active(&self) -> bool;
    fn stop(&self);

    /// Latest video frame, for video kinds. Default: none.
    fn video_frame(&self) -> Option<VideoFrame> {
        None
    }

    /// Next audio frame, for audio kinds. Default: none.
    fn audio_frame(&self) -> Option<AudioFrame> {
        None
    }
}

/// Shared handle to a live capture stream.
pub type StreamHandle = Arc<dyn CaptureSource>;

/// Snapshot of every stream slot, published to listeners after each
/// successful acquisition or release.
///
/// While `all_audio` is live it is the sole audio representation surfaced
/// here; the underlying microphone and system-audio tracks stay open inside
/// the broker but their slots read as empty.
#[derive(Clone, Default)]
pub struct GlobalStreamState {
    pub camera: Option<StreamHandle>,
    pub screen_video: Option<StreamHandle>,
    pub screen_audio: Option<StreamHandle>,
    pub microphone: Option<StreamHandle>,
    pub all_audio: Option<StreamHandle>,
}

impl GlobalStreamState {
    /// Slot for the given kind.
    pub fn get(&self, kind: StreamKind) -> Option<&StreamHandle> {
        match kind {
            StreamKind::Camera => self.camera.as_ref(),
            StreamKind::ScreenVideo => self.screen_video.as_ref(),
            StreamKind::ScreenAudio => self.screen_audio.as_ref(),
            StreamKind::Microphone => self.microphone.as_ref(),
            StreamKind::AllAudio => self.all_audio.as_ref(),
        }
    }

    pub(crate) fn set(&mut self, kind: StreamKind, handle: Option<StreamHandle>) {
        match kind {
            StreamKind::Camera => self.camera = handle,
            StreamKind::ScreenVideo => self.screen_video = handle,
            StreamKind::ScreenAudio => self.screen_audio = handle,
            StreamKind::Microphone => self.microphone = handle,
            StreamKind::AllAudio => self.all_audio = handle,
        }
    }

    /// True when a stream is surfaced for the kind.
    pub fn is_open(&self, kind: StreamKind) -> bool {
        self.get(kind).is_some()
    }

    /// Kinds with a surfaced stream, in catalog order.
    pub fn open_kinds(&self) -> Vec<StreamKind> {
        StreamKind::ALL
            .iter()
            .copied()
            .filter(|kind| self.is_open(*kind))
            .collect()
    }
}

impl fmt::Debug for GlobalStreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalStreamState")
            .field("open", &self.open_kinds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_kind_roundtrips_through_serde() {
        let json = serde_json::to_string(&StreamKind::ScreenVideo).unwrap();
        assert_eq!(json, "\"screenVideo\"");
        let back: StreamKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, StreamKind::ScreenVideo);
    }

    #[test]
    fn stream_kind_classification() {
        assert!(StreamKind::Camera.is_video());
        assert!(!StreamKind::Camera.is_audio());
        assert!(StreamKind::AllAudio.is_audio());
        assert!(StreamKind::Microphone.is_audio());
        assert!(!StreamKind::ScreenAudio.is_video());
    }

    #[test]
    fn video_frame_rejects_mismatched_dimensions() {
        let frame = VideoFrame {
            timestamp_ms: 0,
            width: 2,
            height: 2,
            data: vec![0; 3],
        };
        assert!(frame.to_image().is_none());

        let frame = VideoFrame {
            timestamp_ms: 0,
            width: 2,
            height: 2,
            data: vec![0; 16],
        };
        assert!(frame.to_image().is_some());
    }

    #[test]
    fn audio_frame_counts_per_channel() {
        let frame = AudioFrame {
            timestamp_ms: 0,
            data: vec![0.0; 960],
            sample_rate: 48_000,
            channels: 2,
        };
        assert_eq!(frame.frame_count(), 480);
    }

    #[test]
    fn empty_state_has_no_open_kinds() {
        let state = GlobalStreamState::default();
        assert!(state.open_kinds().is_empty());
        assert!(!state.is_open(StreamKind::Camera));
    }
}
