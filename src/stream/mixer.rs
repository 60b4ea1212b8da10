/*!
 * Audio Mixer
 *
 * Derives the `allAudio` track by summing the microphone and system-audio
 * tracks. The mixer never opens devices itself: it taps the two underlying
 * streams the broker already holds and exposes the mixed result as a capture
 * source of its own. Tearing down the mixed stream leaves the underlying
 * tracks untouched; their lifetime stays with the broker's reference counts.
 */

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info};
use uuid::Uuid;

use crate::stream::{AudioFrame, CaptureSource, StreamHandle, StreamKind, VideoFrame};

/// Sum two sample buffers, clamping to [-1.0, 1.0].
///
/// The shorter buffer is treated as padded with silence.
pub fn mix_buffers(a: &[f32], b: &[f32]) -> Vec<f32> {
    let len = a.len().max(b.len());
    let mut mixed = Vec::with_capacity(len);
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0.0);
        let y = b.get(i).copied().unwrap_or(0.0);
        mixed.push((x + y).clamp(-1.0, 1.0));
    }
    mixed
}

/// Duplicate mono samples into interleaved stereo `[s0, s0, s1, s1, ...]`.
pub fn upmix_mono_to_stereo(samples: &[f32]) -> Vec<f32> {
    let mut stereo = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        stereo.push(sample);
        stereo.push(sample);
    }
    stereo
}

/// Linear-interpolation resampling of interleaved multi-channel audio.
///
/// Returns the input unchanged when the rates already match.
pub fn resample(samples: &[f32], channels: u32, from_rate: u32, to_rate: u32) -> Vec<f32> {
    let channels = channels.max(1) as usize;
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let frame_count = samples.len() / channels;
    let ratio = to_rate as f64 / from_rate as f64;
    let output_frames = (frame_count as f64 * ratio) as usize;
    if output_frames == 0 {
        return Vec::new();
    }

    let mut output = vec![0.0f32; output_frames * channels];
    for i in 0..output_frames {
        let source_index = i as f64 / ratio;
        let index = source_index as usize;
        let fraction = (source_index - index as f64) as f32;

        for ch in 0..channels {
            if index + 1 < frame_count {
                output[i * channels + ch] = samples[index * channels + ch] * (1.0 - fraction)
                    + samples[(index + 1) * channels + ch] * fraction;
            } else if index < frame_count {
                output[i * channels + ch] = samples[index * channels + ch];
            }
        }
    }
    output
}

/// Combine one microphone frame and one system-audio frame into a mixed
/// frame at the microphone's sample rate.
///
/// Channel layouts are aligned first (mono is upmixed when the other side is
/// stereo), then the system track is resampled to the microphone's rate and
/// the two are summed with clamping.
pub fn mix_frames(microphone: &AudioFrame, system: &AudioFrame) -> AudioFrame {
    let target_rate = microphone.sample_rate;
    let target_channels = microphone.channels.max(system.channels).max(1);

    let mic_data = align_channels(&microphone.data, microphone.channels, target_channels);
    let mut sys_data = align_channels(&system.data, system.channels, target_channels);
    if system.sample_rate != target_rate {
        sys_data = resample(&sys_data, target_channels, system.sample_rate, target_rate);
    }

    AudioFrame {
        timestamp_ms: microphone.timestamp_ms.max(system.timestamp_ms),
        data: mix_buffers(&mic_data, &sys_data),
        sample_rate: target_rate,
        channels: target_channels,
    }
}

fn align_channels(samples: &[f32], from: u32, to: u32) -> Vec<f32> {
    match (from.max(1), to) {
        (1, 2) => upmix_mono_to_stereo(samples),
        _ => samples.to_vec(),
    }
}

/// The derived `allAudio` stream.
///
/// Holds shared handles to the microphone and system-audio tracks and mixes
/// their frames on demand. `stop` deactivates only the mixed track; the
/// underlying tracks are released through the broker's ledger.
pub struct MixedAudioSource {
    id: Uuid,
    microphone: StreamHandle,
    system: StreamHandle,
    active: AtomicBool,
}

impl MixedAudioSource {
    pub fn new(microphone: StreamHandle, system: StreamHandle) -> Self {
        info!(
            microphone = %microphone.id(),
            system = %system.id(),
            "mixing graph created for allAudio"
        );
        Self {
            id: Uuid::new_v4(),
            microphone,
            system,
            active: AtomicBool::new(true),
        }
    }
}

impl CaptureSource for MixedAudioSource {
    fn id(&self) -> Uuid {
        self.id
    }

    fn kind(&self) -> StreamKind {
        StreamKind::AllAudio
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
            && (self.microphone.is_active() || self.system.is_active())
    }

    fn stop(&self) {
        if self.active.swap(false, Ordering::Relaxed) {
            info!(id = %self.id, "mixing graph torn down");
        }
    }

    fn video_frame(&self) -> Option<VideoFrame> {
        None
    }

    fn audio_frame(&self) -> Option<AudioFrame> {
        if !self.active.load(Ordering::Relaxed) {
            return None;
        }
        let mic = self.microphone.audio_frame();
        let system = self.system.audio_frame();
        match (mic, system) {
            (Some(m), Some(s)) => Some(mix_frames(&m, &s)),
            (Some(single), None) | (None, Some(single)) => {
                debug!(id = %self.id, "one mixer input idle, passing through");
                Some(single)
            }
            (None, None) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::acquirer::{SyntheticAcquirer, SyntheticConfig};
    use crate::stream::DeviceAcquirer;

    #[test]
    fn mix_sums_per_sample() {
        let mixed = mix_buffers(&[0.1, 0.2], &[0.3, 0.4]);
        assert!((mixed[0] - 0.4).abs() < 1e-6);
        assert!((mixed[1] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn mix_clamps_and_zero_pads() {
        let mixed = mix_buffers(&[0.9, -0.9, 0.5], &[0.9, -0.9]);
        assert_eq!(mixed.len(), 3);
        assert_eq!(mixed[0], 1.0);
        assert_eq!(mixed[1], -1.0);
        assert!((mixed[2] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn mix_empty_inputs() {
        assert!(mix_buffers(&[], &[]).is_empty());
    }

    #[test]
    fn upmix_duplicates_samples() {
        assert_eq!(upmix_mono_to_stereo(&[0.1, 0.2]), vec![0.1, 0.1, 0.2, 0.2]);
    }

    #[test]
    fn resample_same_rate_is_passthrough() {
        let samples = vec![1.0, 2.0, 3.0];
        assert_eq!(resample(&samples, 1, 48_000, 48_000), samples);
    }

    #[test]
    fn resample_upsample_doubles_frame_count() {
        let result = resample(&[0.0, 1.0], 1, 24_000, 48_000);
        assert_eq!(result.len(), 4);
        // Midpoint is linearly interpolated.
        assert!((result[1] - 0.5).abs() < 0.1);
    }

    #[test]
    fn mix_frames_aligns_mono_against_stereo() {
        let mic = AudioFrame {
            timestamp_ms: 10,
            data: vec![0.5, 0.3],
            sample_rate: 48_000,
            channels: 1,
        };
        let system = AudioFrame {
            timestamp_ms: 12,
            data: vec![0.1, 0.2, 0.3, 0.4],
            sample_rate: 48_000,
            channels: 2,
        };

        let mixed = mix_frames(&mic, &system);

        assert_eq!(mixed.channels, 2);
        assert_eq!(mixed.timestamp_ms, 12);
        assert_eq!(mixed.data.len(), 4);
        assert!((mixed.data[0] - 0.6).abs() < 1e-6); // L: 0.5 + 0.1
        assert!((mixed.data[1] - 0.7).abs() < 1e-6); // R: 0.5 + 0.2
        assert!((mixed.data[2] - 0.6).abs() < 1e-6); // L: 0.3 + 0.3
        assert!((mixed.data[3] - 0.7).abs() < 1e-6); // R: 0.3 + 0.4
    }

    #[tokio::test]
    async fn mixed_source_combines_both_tracks() {
        let acquirer = SyntheticAcquirer::new(SyntheticConfig {
            tone_hz: Some(220.0),
            ..SyntheticConfig::default()
        });
        let mic = acquirer.open(StreamKind::Microphone).await.unwrap();
        let system = acquirer.open(StreamKind::ScreenAudio).await.unwrap();

        let mixed = MixedAudioSource::new(mic.clone(), system.clone());
        assert_eq!(mixed.kind(), StreamKind::AllAudio);
        assert!(mixed.is_active());

        let frame = mixed.audio_frame().unwrap();
        assert!(!frame.data.is_empty());

        mixed.stop();
        assert!(!mixed.is_active());
        assert!(mixed.audio_frame().is_none());
        // The underlying tracks outlive the mixed stream.
        assert!(mic.is_active());
        assert!(system.is_active());
    }
}
