//! The touch-detection loop.
//!
//! Each tick asks the engine for a prediction on the current frame and
//! drives `touched`, the sound gate and notifications from it. The loop
//! runs until its cancellation token fires or the engine fails.

use crate::collector::{require_ready, CollectError};
use crate::engine::{EngineError, EngineHandle};
use crate::feedback::Feedback;
use crate::state::SharedState;
use facetouch_core::{Label, Prediction};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub const ALERT_SUMMARY: &str = "Warning";
pub const ALERT_BODY: &str = "You are touched!!!";

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("camera and model are still being set up")]
    NotReady,
    #[error("setup failed: {0}")]
    SetupFailed(String),
    #[error("inference failed after {iterations} ticks: {source}")]
    Engine {
        iterations: u64,
        source: EngineError,
    },
}

impl From<CollectError> for InferenceError {
    fn from(e: CollectError) -> Self {
        match e {
            CollectError::SetupFailed(reason) => InferenceError::SetupFailed(reason),
            _ => InferenceError::NotReady,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct InferenceSettings {
    pub threshold: f32,
    pub interval: Duration,
}

/// Side effects taken for one prediction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickOutcome {
    pub touched: bool,
    pub played: bool,
    pub notified: bool,
}

/// Apply the decision rule for a single prediction.
///
/// A touch needs the predicted label to be `touched` *and* its confidence
/// to be strictly above `threshold`.
pub fn apply_prediction(
    prediction: &Prediction,
    threshold: f32,
    state: &SharedState,
    feedback: &Feedback,
) -> TickOutcome {
    if !prediction.exceeds(Label::Touched, threshold) {
        state.set_touched(false);
        return TickOutcome::default();
    }

    state.set_touched(true);

    let played = state.try_claim_sound();
    if played {
        let gate = state.clone();
        feedback.sound.play(Box::new(move || gate.release_sound()));
    }

    tracing::info!(
        confidence = prediction.confidence(Label::Touched),
        "face touch detected"
    );
    let notified = feedback.notifier.notify(ALERT_SUMMARY, ALERT_BODY);

    TickOutcome {
        touched: true,
        played,
        notified,
    }
}

/// Run the loop until `cancel` fires.
///
/// Returns the number of completed ticks on cancellation. An engine
/// failure stops the loop and is returned to the caller; nothing is retried.
pub async fn run_inference_loop(
    engine: EngineHandle,
    state: SharedState,
    feedback: Feedback,
    settings: InferenceSettings,
    cancel: CancellationToken,
) -> Result<u64, InferenceError> {
    require_ready(&state)?;

    tracing::info!(
        threshold = settings.threshold,
        interval_ms = settings.interval.as_millis() as u64,
        "inference loop started"
    );

    let mut iterations = 0u64;
    loop {
        if cancel.is_cancelled() {
            break;
        }

        let prediction = tokio::select! {
            _ = cancel.cancelled() => break,
            p = engine.predict() => p.map_err(|source| InferenceError::Engine { iterations, source })?,
        };

        apply_prediction(&prediction, settings.threshold, &state, &feedback);
        iterations += 1;

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(settings.interval) => {}
        }
    }

    tracing::info!(iterations, "inference loop stopped");
    Ok(iterations)
}
