/*!
 * Agent Observation Loop
 *
 * Periodic capture-compare-act loop for one agent. Acquires the streams its
 * prompt needs through the broker, samples them every cycle, and gates the
 * caller-supplied handler through the change detector so downstream work
 * only runs when the capture actually changed. Inference, command parsing,
 * and notification dispatch stay outside this crate.
 */

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::detect::{Capture, ChangeDetector, DetectorMode};
use crate::sensors;
use crate::stream::StreamManager;

/// Configuration for one observation loop.
#[derive(Debug, Clone)]
pub struct AgentLoopConfig {
    pub agent_id: String,
    /// Prompt text; its sensor placeholders determine the streams to acquire.
    pub prompt: String,
    /// Capture cycle period.
    pub interval: Duration,
    pub mode: DetectorMode,
    /// When false, every capture reaches the handler unfiltered.
    pub gate_enabled: bool,
}

impl Default for AgentLoopConfig {
    fn default() -> Self {
        Self {
            agent_id: format!("agent-{}", uuid::Uuid::new_v4()),
            prompt: String::new(),
            interval: Duration::from_secs(1),
            mode: DetectorMode::default(),
            gate_enabled: true,
        }
    }
}

/// Externally supplied text extraction (OCR, transcription) for the current
/// cycle's capture.
pub type TextSource = Arc<dyn Fn() -> Option<String> + Send + Sync>;

/// Drives one agent's observation cycle.
///
/// Owns the per-agent "previous sample" between cycles; the change detector
/// itself stays stateless. Streams are held for the lifetime of the loop and
/// released on `stop`.
pub struct AgentLoop {
    config: AgentLoopConfig,
    manager: Arc<StreamManager>,
    detector: Arc<ChangeDetector>,
    text_source: Option<TextSource>,
    running: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl AgentLoop {
    pub fn new(
        config: AgentLoopConfig,
        manager: Arc<StreamManager>,
        detector: Arc<ChangeDetector>,
    ) -> Self {
        Self {
            config,
            manager,
            detector,
            text_source: None,
            running: Arc::new(AtomicBool::new(false)),
            task: None,
        }
    }

    /// Inject a text extractor consulted once per cycle.
    pub fn with_text_source<F>(mut self, source: F) -> Self
    where
        F: Fn() -> Option<String> + Send + Sync + 'static,
    {
        self.text_source = Some(Arc::new(source));
        self
    }

    pub fn agent_id(&self) -> &str {
        &self.config.agent_id
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Acquire the prompt's streams and start the cycle.
    ///
    /// The handler fires on the first capture (there is nothing to compare
    /// against) and afterwards only when the change gate reports a
    /// significant difference, unless gating is disabled.
    pub async fn start<F>(&mut self, on_change: F) -> Result<()>
    where
        F: Fn(&Capture) + Send + Sync + 'static,
    {
        if self.task.is_some() {
            warn!(agent = %self.config.agent_id, "observation loop already running");
            return Ok(());
        }

        let kinds = sensors::streams_for_prompt(&self.config.prompt);
        if !kinds.is_empty() {
            self.manager
                .request_streams(&self.config.agent_id, &kinds)
                .await
                .with_context(|| {
                    format!(
                        "failed to acquire streams for agent {}",
                        self.config.agent_id
                    )
                })?;
        }

        self.running.store(true, Ordering::Relaxed);
        info!(agent = %self.config.agent_id, streams = ?kinds, "observation loop started");

        let manager = self.manager.clone();
        let detector = self.detector.clone();
        let config = self.config.clone();
        let text_source = self.text_source.clone();
        let running = self.running.clone();

        self.task = Some(tokio::spawn(async move {
            Self::observation_loop(manager, detector, config, text_source, running, on_change)
                .await;
        }));
        Ok(())
    }

    async fn observation_loop<F>(
        manager: Arc<StreamManager>,
        detector: Arc<ChangeDetector>,
        config: AgentLoopConfig,
        text_source: Option<TextSource>,
        running: Arc<AtomicBool>,
        on_change: F,
    ) where
        F: Fn(&Capture) + Send + Sync + 'static,
    {
        let mut previous: Option<Capture> = None;
        let mut ticker = tokio::time::interval(config.interval);

        while running.load(Ordering::Relaxed) {
            ticker.tick().await;
            if !running.load(Ordering::Relaxed) {
                break;
            }

            let current = Self::capture_sample(&manager, text_source.as_ref());
            let changed = match &previous {
                // Nothing to compare against yet: never suppress the first capture.
                None => true,
                Some(prev) => detector.is_significant_change(prev, &current, config.mode),
            };

            if changed || !config.gate_enabled {
                on_change(&current);
            } else {
                debug!(agent = %config.agent_id, "capture unchanged, skipping cycle");
            }
            previous = Some(current);
        }
        info!(agent = %config.agent_id, "observation loop finished");
    }

    /// Assemble this cycle's sample from the surfaced streams: the screen
    /// feed when present, the camera otherwise, plus any extracted text.
    fn capture_sample(manager: &StreamManager, text_source: Option<&TextSource>) -> Capture {
        let state = manager.current_state();
        let frame = state
            .screen_video
            .as_ref()
            .and_then(|stream| stream.video_frame())
            .or_else(|| state.camera.as_ref().and_then(|stream| stream.video_frame()));

        let text = text_source.and_then(|source| {
            let extract: &(dyn Fn() -> Option<String> + Send + Sync) = source.as_ref();
            extract()
        });
        Capture {
            text,
            image: frame.and_then(|frame| frame.to_image()),
        }
    }

    /// Stop the cycle and release the agent's streams.
    pub async fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!(agent = %self.config.agent_id, error = %err, "observation task join failed");
            }
        }
        self.manager.release_streams(&self.config.agent_id);
        info!(agent = %self.config.agent_id, "observation loop stopped");
    }
}
