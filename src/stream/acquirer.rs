/*!
 * Device Acquirer
 *
 * Leaf seam around the platform's capture primitives. The broker opens at
 * most one underlying stream per kind through this trait; platform backends
 * plug in behind it. A synthetic backend ships with the crate for tests and
 * headless previews.
 */

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::AcquireError;
use crate::stream::{AudioFrame, CaptureSource, StreamHandle, StreamKind, VideoFrame};

/// Opens underlying device captures on demand.
///
/// `open` is a single-shot asynchronous operation: it may suspend arbitrarily
/// long on a user permission prompt or device negotiation, then either yields
/// a live stream or fails. There is no cancellation; callers that stop caring
/// release the stream after the call settles.
#[async_trait]
pub trait DeviceAcquirer: Send + Sync {
    async fn open(&self, kind: StreamKind) -> Result<StreamHandle, AcquireError>;
}

/// Configuration for the synthetic backend's fabricated streams.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticConfig {
    pub width: u32,
    pub height: u32,
    /// RGBA fill color for fabricated video frames.
    pub fill: [u8; 4],
    pub sample_rate: u32,
    pub channels: u32,
    /// Samples per channel in each fabricated audio frame.
    pub samples_per_frame: usize,
    /// Sine tone frequency; `None` fabricates silence.
    pub tone_hz: Option<f32>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fill: [16, 16, 16, 255],
            sample_rate: 48_000,
            channels: 1,
            samples_per_frame: 960, // 20ms at 48kHz
            tone_hz: None,
        }
    }
}

/// In-process capture backend that fabricates deterministic frames.
///
/// Doubles as the failure-injection harness for the broker's transactional
/// semantics: individual kinds can be marked permission-denied or
/// unavailable, and every acquisition attempt is counted per kind.
pub struct SyntheticAcquirer {
    config: SyntheticConfig,
    denied: Mutex<HashSet<StreamKind>>,
    unavailable: Mutex<HashSet<StreamKind>>,
    open_attempts: Mutex<HashMap<StreamKind, u64>>,
}

impl SyntheticAcquirer {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            denied: Mutex::new(HashSet::new()),
            unavailable: Mutex::new(HashSet::new()),
            open_attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Future `open` calls for `kind` fail with `PermissionDenied`.
    pub fn deny(&self, kind: StreamKind) {
        self.denied.lock().insert(kind);
    }

    /// Future `open` calls for `kind` fail with `DeviceUnavailable`.
    pub fn mark_unavailable(&self, kind: StreamKind) {
        self.unavailable.lock().insert(kind);
    }

    /// Clears any injected failure for `kind`.
    pub fn allow(&self, kind: StreamKind) {
        self.denied.lock().remove(&kind);
        self.unavailable.lock().remove(&kind);
    }

    /// Number of acquisition attempts seen for `kind`, including failures.
    pub fn open_count(&self, kind: StreamKind) -> u64 {
        self.open_attempts.lock().get(&kind).copied().unwrap_or(0)
    }
}

impl Default for SyntheticAcquirer {
    fn default() -> Self {
        Self::new(SyntheticConfig::default())
    }
}

#[async_trait]
impl DeviceAcquirer for SyntheticAcquirer {
    async fn open(&self, kind: StreamKind) -> Result<StreamHandle, AcquireError> {
        *self.open_attempts.lock().entry(kind).or_insert(0) += 1;

        // The mixed track is derived by the broker, never opened as a device.
        if kind == StreamKind::AllAudio {
            warn!(%kind, "refusing direct open of derived kind");
            return Err(AcquireError::DeviceUnavailable { kind });
        }
        if self.denied.lock().contains(&kind) {
            debug!(%kind, "synthetic backend denying acquisition");
            return Err(AcquireError::PermissionDenied { kind });
        }
        if self.unavailable.lock().contains(&kind) {
            debug!(%kind, "synthetic backend reporting device unavailable");
            return Err(AcquireError::DeviceUnavailable { kind });
        }

        // Model the permission-prompt suspension point.
        tokio::task::yield_now().await;

        let source = SyntheticSource::new(kind, self.config.clone());
        info!(%kind, id = %source.id, "opened synthetic capture");
        Ok(Arc::new(source))
    }
}

/// A fabricated capture stream: solid video frames, silence or a sine tone.
struct SyntheticSource {
    id: Uuid,
    kind: StreamKind,
    config: SyntheticConfig,
    active: AtomicBool,
    frame_counter: AtomicU64,
}

impl SyntheticSource {
    fn new(kind: StreamKind, config: SyntheticConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            config,
            active: AtomicBool::new(true),
            frame_counter: AtomicU64::new(0),
        }
    }
}

impl CaptureSource for SyntheticSource {
    fn id(&self) -> Uuid {
        self.id
    }

    fn kind(&self) -> StreamKind {
        self.kind
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    fn stop(&self) {
        if self.active.swap(false, Ordering::Relaxed) {
            info!(kind = %self.kind, id = %self.id, "stopped synthetic capture");
        }
    }

    fn video_frame(&self) -> Option<VideoFrame> {
        if !self.kind.is_video() || !self.is_active() {
            return None;
        }
        self.frame_counter.fetch_add(1, Ordering::Relaxed);
        let pixels = (self.config.width * self.config.height) as usize;
        let mut data = Vec::with_capacity(pixels * 4);
        for _ in 0..pixels {
            data.extend_from_slice(&self.config.fill);
        }
        Some(VideoFrame {
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            width: self.config.width,
            height: self.config.height,
            data,
        })
    }

    fn audio_frame(&self) -> Option<AudioFrame> {
        if !self.kind.is_audio() || !self.is_active() {
            return None;
        }
        let sequence = self.frame_counter.fetch_add(1, Ordering::Relaxed);
        let frames = self.config.samples_per_frame;
        let channels = self.config.channels.max(1) as usize;
        let data = match self.config.tone_hz {
            None => vec![0.0; frames * channels],
            Some(hz) => {
                let phase_offset = sequence as usize * frames;
                let mut data = Vec::with_capacity(frames * channels);
                for i in 0..frames {
                    let t = (phase_offset + i) as f32 / self.config.sample_rate as f32;
                    let sample = (t * hz * std::f32::consts::TAU).sin() * 0.5;
                    for _ in 0..channels {
                        data.push(sample);
                    }
                }
                data
            }
        };
        Some(AudioFrame {
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            data,
            sample_rate: self.config.sample_rate,
            channels: channels as u32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_streams_for_device_kinds() {
        let acquirer = SyntheticAcquirer::default();
        let stream = acquirer.open(StreamKind::Camera).await.unwrap();
        assert_eq!(stream.kind(), StreamKind::Camera);
        assert!(stream.is_active());
        assert_eq!(acquirer.open_count(StreamKind::Camera), 1);
    }

    #[tokio::test]
    async fn refuses_derived_all_audio_kind() {
        let acquirer = SyntheticAcquirer::default();
        let result = acquirer.open(StreamKind::AllAudio).await;
        assert_eq!(
            result.err(),
            Some(AcquireError::DeviceUnavailable {
                kind: StreamKind::AllAudio
            })
        );
    }

    #[tokio::test]
    async fn injected_denial_counts_the_attempt() {
        let acquirer = SyntheticAcquirer::default();
        acquirer.deny(StreamKind::Microphone);

        let result = acquirer.open(StreamKind::Microphone).await;
        assert_eq!(
            result.err(),
            Some(AcquireError::PermissionDenied {
                kind: StreamKind::Microphone
            })
        );
        assert_eq!(acquirer.open_count(StreamKind::Microphone), 1);

        acquirer.allow(StreamKind::Microphone);
        assert!(acquirer.open(StreamKind::Microphone).await.is_ok());
        assert_eq!(acquirer.open_count(StreamKind::Microphone), 2);
    }

    #[tokio::test]
    async fn video_source_fabricates_solid_frames() {
        let acquirer = SyntheticAcquirer::new(SyntheticConfig {
            width: 4,
            height: 2,
            fill: [10, 20, 30, 255],
            ..SyntheticConfig::default()
        });
        let stream = acquirer.open(StreamKind::ScreenVideo).await.unwrap();

        let frame = stream.video_frame().unwrap();
        assert_eq!(frame.width, 4);
        assert_eq!(frame.height, 2);
        assert_eq!(frame.data.len(), 4 * 2 * 4);
        assert_eq!(&frame.data[..4], &[10, 20, 30, 255]);
        assert!(stream.audio_frame().is_none());
    }

    #[tokio::test]
    async fn audio_source_fabricates_silence_and_stops() {
        let acquirer = SyntheticAcquirer::default();
        let stream = acquirer.open(StreamKind::Microphone).await.unwrap();

        let frame = stream.audio_frame().unwrap();
        assert_eq!(frame.frame_count(), 960);
        assert!(frame.data.iter().all(|s| *s == 0.0));

        stream.stop();
        assert!(!stream.is_active());
        assert!(stream.audio_frame().is_none());
    }

    #[tokio::test]
    async fn tone_source_produces_nonzero_samples() {
        let acquirer = SyntheticAcquirer::new(SyntheticConfig {
            tone_hz: Some(440.0),
            ..SyntheticConfig::default()
        });
        let stream = acquirer.open(StreamKind::ScreenAudio).await.unwrap();
        let frame = stream.audio_frame().unwrap();
        assert!(frame.data.iter().any(|s| s.abs() > 0.01));
    }
}
