/*!
 * Sensor Placeholder Mapping
 *
 * Agent prompts reference sensory inputs through `$TOKEN` placeholders.
 * This module scans prompts for those tokens and translates them into the
 * minimal set of stream kinds the broker must acquire. The broker trusts
 * the translated set verbatim and performs no prompt parsing itself.
 */

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use crate::stream::StreamKind;

/// A sensor placeholder found in an agent prompt.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SensorTag {
    /// `$SCREEN_64`: screen capture delivered as an image.
    Screen64,
    /// `$SCREEN_OCR`: screen capture delivered as extracted text.
    ScreenOcr,
    /// `$CAMERA`
    Camera,
    /// `$MICROPHONE`
    Microphone,
    /// `$SCREEN_AUDIO`
    ScreenAudio,
    /// `$ALL_AUDIO`: mixed microphone + system audio.
    AllAudio,
    /// `$CLIPBOARD`: no capture device involved.
    Clipboard,
    /// `$MEMORY@id`: stored agent memory, no capture device involved.
    Memory(String),
}

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"\$(SCREEN_OCR|SCREEN_64|SCREEN_AUDIO|CAMERA|MICROPHONE|ALL_AUDIO|CLIPBOARD|MEMORY@[A-Za-z0-9_-]+)",
        )
        .expect("placeholder pattern is valid")
    })
}

/// Scan a prompt for sensor placeholders, in order of first appearance,
/// without duplicates.
pub fn scan_placeholders(prompt: &str) -> Vec<SensorTag> {
    let mut tags = Vec::new();
    for capture in placeholder_pattern().captures_iter(prompt) {
        let token = &capture[1];
        let tag = match token {
            "SCREEN_64" => SensorTag::Screen64,
            "SCREEN_OCR" => SensorTag::ScreenOcr,
            "CAMERA" => SensorTag::Camera,
            "MICROPHONE" => SensorTag::Microphone,
            "SCREEN_AUDIO" => SensorTag::ScreenAudio,
            "ALL_AUDIO" => SensorTag::AllAudio,
            "CLIPBOARD" => SensorTag::Clipboard,
            memory => SensorTag::Memory(memory["MEMORY@".len()..].to_string()),
        };
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    debug!(count = tags.len(), "scanned prompt for sensor placeholders");
    tags
}

/// Minimal set of stream kinds required to satisfy the given placeholders.
///
/// When `$ALL_AUDIO` is present it is the sole audio requirement: it absorbs
/// `$MICROPHONE` and `$SCREEN_AUDIO`, whose content the mixed track already
/// carries. Non-device sensors (`$CLIPBOARD`, `$MEMORY@...`) map to nothing.
pub fn required_streams(tags: &[SensorTag]) -> BTreeSet<StreamKind> {
    let wants_all_audio = tags.iter().any(|tag| *tag == SensorTag::AllAudio);

    let mut kinds = BTreeSet::new();
    for tag in tags {
        match tag {
            SensorTag::Screen64 | SensorTag::ScreenOcr => {
                kinds.insert(StreamKind::ScreenVideo);
            }
            SensorTag::Camera => {
                kinds.insert(StreamKind::Camera);
            }
            SensorTag::Microphone if !wants_all_audio => {
                kinds.insert(StreamKind::Microphone);
            }
            SensorTag::ScreenAudio if !wants_all_audio => {
                kinds.insert(StreamKind::ScreenAudio);
            }
            SensorTag::AllAudio => {
                kinds.insert(StreamKind::AllAudio);
            }
            SensorTag::Microphone
            | SensorTag::ScreenAudio
            | SensorTag::Clipboard
            | SensorTag::Memory(_) => {}
        }
    }
    kinds
}

/// Convenience composition of `scan_placeholders` and `required_streams`.
pub fn streams_for_prompt(prompt: &str) -> BTreeSet<StreamKind> {
    required_streams(&scan_placeholders(prompt))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(list: &[StreamKind]) -> BTreeSet<StreamKind> {
        list.iter().copied().collect()
    }

    #[test]
    fn scans_placeholders_embedded_in_prose() {
        let prompt = "Watch $SCREEN_64 and listen to $MICROPHONE. Recall $MEMORY@meeting-notes.";
        let tags = scan_placeholders(prompt);
        assert_eq!(
            tags,
            vec![
                SensorTag::Screen64,
                SensorTag::Microphone,
                SensorTag::Memory("meeting-notes".to_string()),
            ]
        );
    }

    #[test]
    fn repeated_placeholders_are_deduplicated() {
        let tags = scan_placeholders("$CAMERA then $CAMERA again");
        assert_eq!(tags, vec![SensorTag::Camera]);
    }

    #[test]
    fn screen_audio_is_not_confused_with_screen_video() {
        let tags = scan_placeholders("$SCREEN_AUDIO $SCREEN_OCR");
        assert_eq!(tags, vec![SensorTag::ScreenAudio, SensorTag::ScreenOcr]);
    }

    #[test]
    fn all_audio_absorbs_single_source_audio() {
        let streams = streams_for_prompt("$MICROPHONE $SCREEN_AUDIO $ALL_AUDIO");
        assert_eq!(streams, kinds(&[StreamKind::AllAudio]));
    }

    #[test]
    fn independent_audio_kinds_without_all_audio() {
        let streams = streams_for_prompt("$MICROPHONE plus $SCREEN_AUDIO");
        assert_eq!(
            streams,
            kinds(&[StreamKind::Microphone, StreamKind::ScreenAudio])
        );
    }

    #[test]
    fn ocr_and_image_share_one_screen_capture() {
        let streams = streams_for_prompt("$SCREEN_OCR and $SCREEN_64");
        assert_eq!(streams, kinds(&[StreamKind::ScreenVideo]));
    }

    #[test]
    fn non_device_sensors_need_no_streams() {
        assert!(streams_for_prompt("$CLIPBOARD and $MEMORY@journal").is_empty());
        assert!(streams_for_prompt("no placeholders here").is_empty());
    }
}
