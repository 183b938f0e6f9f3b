//! Daemon-side coordinator behind the D-Bus interface.
//!
//! Owns the engine handle once setup succeeds, the training session log,
//! and at most one running inference loop.

use crate::collector::{self, CollectError};
use crate::config::Config;
use crate::engine::{self, EngineError, EngineHandle, ExampleSummary};
use crate::feedback::Feedback;
use crate::inference::{self, InferenceError, InferenceSettings};
use crate::state::{RunState, SharedState};
use chrono::{DateTime, Utc};
use facetouch_core::Label;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "error", rename_all = "snake_case")]
pub enum SessionOutcome {
    Running,
    Completed,
    Failed(String),
}

/// One `Train` request and how far it got.
#[derive(Debug, Clone, Serialize)]
pub struct TrainingSession {
    pub id: Uuid,
    pub label: Label,
    pub requested: usize,
    pub collected: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub outcome: SessionOutcome,
}

/// Everything `Status()` reports.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub version: &'static str,
    #[serde(flatten)]
    pub state: RunState,
    pub running: bool,
    pub last_inference_error: Option<String>,
    pub examples: Option<ExampleSummary>,
    pub sessions: Vec<TrainingSession>,
}

/// Training sessions kept for `Status()`; the oldest are dropped first.
pub const MAX_SESSIONS: usize = 32;

struct RunningLoop {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct Monitor {
    config: Config,
    state: SharedState,
    feedback: Feedback,
    engine: OnceLock<EngineHandle>,
    inference: Mutex<Option<RunningLoop>>,
    last_inference_error: Mutex<Option<String>>,
    sessions: Mutex<Vec<TrainingSession>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

impl Monitor {
    pub fn new(config: Config, feedback: Feedback) -> Arc<Self> {
        Arc::new(Self {
            config,
            state: SharedState::new(),
            feedback,
            engine: OnceLock::new(),
            inference: Mutex::new(None),
            last_inference_error: Mutex::new(None),
            sessions: Mutex::new(Vec::new()),
        })
    }

    #[cfg(test)]
    pub fn state(&self) -> &SharedState {
        &self.state
    }

    /// Acquire the camera and load the model on a blocking thread.
    ///
    /// On failure the setup phase becomes `Failed` and stays there; there
    /// is no retry.
    pub async fn setup(self: &Arc<Self>) -> Result<(), EngineError> {
        let cfg = self.config.clone();
        let spawned = tokio::task::spawn_blocking(move || {
            engine::spawn_engine(
                &cfg.camera_device,
                &cfg.model_path_str(),
                cfg.warmup_frames,
                cfg.knn_k,
            )
        })
        .await
        .unwrap_or_else(|join_err| {
            Err(EngineError::Spawn(std::io::Error::other(join_err.to_string())))
        });

        match spawned {
            Ok(handle) => {
                self.attach_engine(handle);
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "setup failed");
                self.state.mark_failed(e.to_string());
                Err(e)
            }
        }
    }

    /// Install a running engine and mark setup complete.
    pub fn attach_engine(&self, handle: EngineHandle) {
        if self.engine.set(handle).is_err() {
            tracing::warn!("engine already attached; ignoring");
            return;
        }
        self.state.mark_ready();
        tracing::info!("setup complete");
    }

    fn ready_engine(&self) -> Result<EngineHandle, CollectError> {
        collector::require_ready(&self.state)?;
        self.engine.get().cloned().ok_or(CollectError::NotReady)
    }

    /// Start collecting `samples_per_label` examples for `label` in the background.
    pub fn train(self: &Arc<Self>, label: Label) -> Result<Uuid, CollectError> {
        let engine = self.ready_engine()?;
        let id = Uuid::new_v4();
        let requested = self.config.samples_per_label;

        {
            let mut sessions = lock(&self.sessions);
            if sessions.len() >= MAX_SESSIONS {
                let excess = sessions.len() + 1 - MAX_SESSIONS;
                sessions.drain(..excess);
            }
            sessions.push(TrainingSession {
                id,
                label,
                requested,
                collected: 0,
                started_at: Utc::now(),
                finished_at: None,
                outcome: SessionOutcome::Running,
            });
        }

        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let progress_monitor = Arc::clone(&monitor);
            let result = collector::collect_samples(
                &engine,
                &monitor.state,
                label,
                requested,
                monitor.config.sample_interval,
                |n| progress_monitor.update_session(id, |s| s.collected = n),
            )
            .await;

            let outcome = match result {
                Ok(_) => SessionOutcome::Completed,
                Err(e) => {
                    tracing::error!(%id, %label, error = %e, "training failed");
                    SessionOutcome::Failed(e.to_string())
                }
            };
            monitor.update_session(id, |s| {
                s.finished_at = Some(Utc::now());
                s.outcome = outcome;
            });
        });

        tracing::info!(%id, %label, requested, "training session started");
        Ok(id)
    }

    fn update_session(&self, id: Uuid, f: impl FnOnce(&mut TrainingSession)) {
        if let Some(session) = lock(&self.sessions).iter_mut().find(|s| s.id == id) {
            f(session);
        }
    }

    /// Start the inference loop. Returns false if one is already running.
    pub fn run(self: &Arc<Self>) -> Result<bool, InferenceError> {
        let engine = self.ready_engine()?;

        let mut slot = lock(&self.inference);
        if slot.as_ref().is_some_and(|running| !running.task.is_finished()) {
            tracing::info!("inference loop already running");
            return Ok(false);
        }

        *lock(&self.last_inference_error) = None;
        let cancel = CancellationToken::new();
        let settings = InferenceSettings {
            threshold: self.config.confidence_threshold,
            interval: self.config.inference_interval,
        };

        let monitor = Arc::clone(self);
        let loop_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            let result = inference::run_inference_loop(
                engine,
                monitor.state.clone(),
                monitor.feedback.clone(),
                settings,
                loop_cancel,
            )
            .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "inference loop failed");
                *lock(&monitor.last_inference_error) = Some(e.to_string());
            }
        });

        *slot = Some(RunningLoop { cancel, task });
        Ok(true)
    }

    /// Cancel the inference loop and wait for it to exit. Returns false if none was running.
    pub async fn stop(&self) -> bool {
        let Some(running) = lock(&self.inference).take() else {
            return false;
        };
        let was_running = !running.task.is_finished();
        running.cancel.cancel();
        if let Err(e) = running.task.await {
            tracing::warn!(error = %e, "inference task did not exit cleanly");
        }
        self.state.set_touched(false);
        was_running
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inference)
            .as_ref()
            .is_some_and(|running| !running.task.is_finished())
    }

    pub async fn status(&self) -> StatusReport {
        let engine = self.engine.get().cloned();
        let examples = match engine {
            Some(engine) => engine.summary().await.ok(),
            None => None,
        };

        StatusReport {
            version: env!("CARGO_PKG_VERSION"),
            state: self.state.snapshot(),
            running: self.is_running(),
            last_inference_error: lock(&self.last_inference_error).clone(),
            examples,
            sessions: lock(&self.sessions).clone(),
        }
    }

    pub async fn shutdown(&self) {
        if self.stop().await {
            tracing::info!("inference loop stopped for shutdown");
        }
    }
}
