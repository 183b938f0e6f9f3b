//! Training sample collection.

use crate::engine::{EngineError, EngineHandle};
use crate::state::{SetupPhase, SharedState};
use facetouch_core::Label;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CollectError {
    #[error("camera and model are still being set up")]
    NotReady,
    #[error("setup failed: {0}")]
    SetupFailed(String),
    #[error("sample {collected} of {requested} failed: {source}")]
    Engine {
        collected: usize,
        requested: usize,
        source: EngineError,
    },
}

/// Map the setup phase onto the collector's precondition.
pub fn require_ready(state: &SharedState) -> Result<(), CollectError> {
    match state.setup_phase() {
        SetupPhase::Ready => Ok(()),
        SetupPhase::Pending => Err(CollectError::NotReady),
        SetupPhase::Failed(reason) => Err(CollectError::SetupFailed(reason)),
    }
}

/// Append `count` examples for `label`, pausing `interval` between samples.
///
/// Rejected before setup completes, without touching the classifier. A
/// failed capture stops the run; samples already added are kept.
/// `on_progress` receives the number of samples collected so far.
pub async fn collect_samples(
    engine: &EngineHandle,
    state: &SharedState,
    label: Label,
    count: usize,
    interval: Duration,
    mut on_progress: impl FnMut(usize),
) -> Result<usize, CollectError> {
    require_ready(state)?;

    tracing::info!(%label, count, "training started");
    let mut last_pct = 0;

    for i in 0..count {
        engine
            .add_sample(label)
            .await
            .map_err(|source| CollectError::Engine {
                collected: i,
                requested: count,
                source,
            })?;

        let done = i + 1;
        on_progress(done);

        let pct = done * 100 / count;
        if pct / 10 > last_pct / 10 {
            tracing::info!(%label, "training {pct} %");
        }
        last_pct = pct;

        tokio::time::sleep(interval).await;
    }

    tracing::info!(%label, count, "training finished");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::knn_engine;

    const FAST: Duration = Duration::from_millis(1);

    fn ready_state() -> SharedState {
        let state = SharedState::new();
        state.mark_ready();
        state
    }

    #[tokio::test]
    async fn test_collect_adds_exactly_n_with_label() {
        let engine = knn_engine(None);
        let state = ready_state();

        for n in [0usize, 1, 7] {
            let before = engine.summary().await.unwrap();
            let added = collect_samples(&engine, &state, Label::Touched, n, FAST, |_| {})
                .await
                .unwrap();
            let after = engine.summary().await.unwrap();

            assert_eq!(added, n);
            assert_eq!(after.total, before.total + n);
            assert_eq!(
                after.per_label.get(&Label::Touched).copied().unwrap_or(0),
                before.per_label.get(&Label::Touched).copied().unwrap_or(0) + n
            );
            assert!(!after.per_label.contains_key(&Label::NotTouched));
        }
    }

    #[tokio::test]
    async fn test_collect_before_setup_is_rejected_without_side_effects() {
        let engine = knn_engine(None);
        let state = SharedState::new();

        let started = std::time::Instant::now();
        let err = collect_samples(
            &engine,
            &state,
            Label::NotTouched,
            50,
            Duration::from_secs(10),
            |_| panic!("no progress expected"),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, CollectError::NotReady));
        // No suspension happened.
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(engine.summary().await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_collect_after_failed_setup() {
        let engine = knn_engine(None);
        let state = SharedState::new();
        state.mark_failed("permission denied");

        let err = collect_samples(&engine, &state, Label::Touched, 3, FAST, |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, CollectError::SetupFailed(ref r) if r == "permission denied"));
        assert_eq!(engine.summary().await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_capture_failure_keeps_partial_samples() {
        let engine = knn_engine(Some(4));
        let state = ready_state();
        let mut progress = Vec::new();

        let err = collect_samples(&engine, &state, Label::Touched, 10, FAST, |n| progress.push(n))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            CollectError::Engine { collected: 4, requested: 10, .. }
        ));
        assert_eq!(progress, vec![1, 2, 3, 4]);
        assert_eq!(engine.summary().await.unwrap().total, 4);
    }

    #[tokio::test]
    async fn test_overlapping_collections_both_land() {
        let engine = knn_engine(None);
        let state = ready_state();

        let (a, b) = tokio::join!(
            collect_samples(&engine, &state, Label::Touched, 5, FAST, |_| {}),
            collect_samples(&engine, &state, Label::NotTouched, 5, FAST, |_| {}),
        );
        assert_eq!(a.unwrap(), 5);
        assert_eq!(b.unwrap(), 5);

        let summary = engine.summary().await.unwrap();
        assert_eq!(summary.total, 10);
        assert_eq!(summary.per_label[&Label::Touched], 5);
        assert_eq!(summary.per_label[&Label::NotTouched], 5);
    }
}
