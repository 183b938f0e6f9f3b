//! Shared run state for the collector, the inference loop and feedback callbacks.

use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};

/// Progress of camera + model initialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", content = "reason", rename_all = "snake_case")]
pub enum SetupPhase {
    Pending,
    Ready,
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct RunState {
    pub setup: SetupPhase,
    /// Whether the latest inference tick saw a confident touch.
    pub touched: bool,
    /// Debounce gate for the alert sound.
    pub can_play_sound: bool,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            setup: SetupPhase::Pending,
            touched: false,
            can_play_sound: true,
        }
    }
}

/// Cloneable handle to the process-wide `RunState`.
///
/// All transitions go through the methods below; none of them hold the
/// lock across an await point.
#[derive(Clone, Default)]
pub struct SharedState {
    inner: Arc<Mutex<RunState>>,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RunState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> RunState {
        self.lock().clone()
    }

    pub fn setup_phase(&self) -> SetupPhase {
        self.lock().setup.clone()
    }

    pub fn mark_ready(&self) {
        self.lock().setup = SetupPhase::Ready;
    }

    pub fn mark_failed(&self, reason: impl Into<String>) {
        self.lock().setup = SetupPhase::Failed(reason.into());
    }

    #[cfg(test)]
    pub fn touched(&self) -> bool {
        self.lock().touched
    }

    pub fn set_touched(&self, touched: bool) {
        self.lock().touched = touched;
    }

    #[cfg(test)]
    pub fn can_play_sound(&self) -> bool {
        self.lock().can_play_sound
    }

    /// Close the sound gate. Returns true if it was open, i.e. the caller may play.
    pub fn try_claim_sound(&self) -> bool {
        let mut state = self.lock();
        if state.can_play_sound {
            state.can_play_sound = false;
            true
        } else {
            false
        }
    }

    /// Re-open the sound gate. Only the playback-finished callback calls this.
    pub fn release_sound(&self) {
        self.lock().can_play_sound = true;
    }
}
