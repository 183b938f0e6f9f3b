use facetouch_core::{
    Classifier, ClassifierError, EmbedderError, EmbeddingProvider, KnnClassifier, Label,
    MobileNetEmbedder, Prediction,
};
use facetouch_hw::{Camera, CameraError, CaptureSource};
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("embedder error: {0}")]
    Embedder(#[from] EmbedderError),
    #[error("classifier error: {0}")]
    Classifier(#[from] ClassifierError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Snapshot of the classifier's example set.
#[derive(Debug, Clone, Serialize)]
pub struct ExampleSummary {
    pub source: String,
    pub total: usize,
    pub per_label: BTreeMap<Label, usize>,
}

/// Everything the engine thread owns. Boxed so tests can swap in fakes.
pub struct EngineParts {
    pub source: Box<dyn CaptureSource + Send>,
    pub embedder: Box<dyn EmbeddingProvider + Send>,
    pub classifier: Box<dyn Classifier + Send>,
}

/// Messages sent from the collector, the inference loop and D-Bus handlers.
enum EngineRequest {
    AddSample {
        label: Label,
        reply: oneshot::Sender<Result<usize, EngineError>>,
    },
    Predict {
        reply: oneshot::Sender<Result<Prediction, EngineError>>,
    },
    Summary {
        reply: oneshot::Sender<ExampleSummary>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Capture the current frame, embed it and store it as an example for `label`.
    ///
    /// Returns the number of examples now held for `label`.
    pub async fn add_sample(&self, label: Label) -> Result<usize, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::AddSample {
                label,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Capture the current frame, embed it and classify it.
    pub async fn predict(&self) -> Result<Prediction, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Predict { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    pub async fn summary(&self) -> Result<ExampleSummary, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Summary { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }
}

/// Acquire the camera, load the model and start the engine thread.
///
/// Fails fast if the camera or the model is unavailable; the caller
/// decides what to do with the setup failure.
pub fn spawn_engine(
    camera_device: &str,
    model_path: &str,
    warmup_frames: usize,
    knn_k: usize,
) -> Result<EngineHandle, EngineError> {
    let camera = Camera::acquire(camera_device, warmup_frames)?;
    tracing::info!(
        device = camera_device,
        width = camera.width,
        height = camera.height,
        fourcc = ?camera.fourcc,
        "camera opened"
    );

    let embedder = MobileNetEmbedder::load(model_path)?;
    tracing::info!(path = model_path, "MobileNet embedder loaded");

    start_engine(EngineParts {
        source: Box::new(camera),
        embedder: Box::new(embedder),
        classifier: Box::new(KnnClassifier::new(knn_k)),
    })
}

/// Move `parts` onto a dedicated OS thread and return a handle to it.
///
/// The thread is the only owner of the classifier, so concurrent training
/// and inference requests are applied one at a time in arrival order.
pub fn start_engine(parts: EngineParts) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(8);

    let EngineParts {
        mut source,
        mut embedder,
        mut classifier,
    } = parts;

    std::thread::Builder::new()
        .name("facetouch-engine".into())
        .spawn(move || {
            tracing::info!(source = %source.describe(), "engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::AddSample { label, reply } => {
                        let result = run_add_sample(
                            source.as_mut(),
                            embedder.as_mut(),
                            classifier.as_mut(),
                            label,
                        );
                        let _ = reply.send(result);
                    }
                    EngineRequest::Predict { reply } => {
                        let result =
                            run_predict(source.as_mut(), embedder.as_mut(), classifier.as_ref());
                        let _ = reply.send(result);
                    }
                    EngineRequest::Summary { reply } => {
                        let _ = reply.send(ExampleSummary {
                            source: source.describe(),
                            total: classifier.example_count(),
                            per_label: classifier.label_counts(),
                        });
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

fn run_add_sample(
    source: &mut (dyn CaptureSource + Send),
    embedder: &mut (dyn EmbeddingProvider + Send),
    classifier: &mut (dyn Classifier + Send),
    label: Label,
) -> Result<usize, EngineError> {
    let frame = source.capture()?;
    if frame.is_dark {
        tracing::debug!(seq = frame.sequence, "training on a dark frame");
    }
    let embedding = embedder.embed(&frame.data, frame.width, frame.height)?;
    classifier.add_example(embedding, label)?;
    Ok(classifier.label_counts().get(&label).copied().unwrap_or(0))
}

fn run_predict(
    source: &mut (dyn CaptureSource + Send),
    embedder: &mut (dyn EmbeddingProvider + Send),
    classifier: &(dyn Classifier + Send),
) -> Result<Prediction, EngineError> {
    let frame = source.capture()?;
    let embedding = embedder.embed(&frame.data, frame.width, frame.height)?;
    let prediction = classifier.predict(&embedding)?;
    tracing::debug!(
        seq = frame.sequence,
        label = %prediction.label,
        touched = prediction.confidence(Label::Touched),
        "prediction"
    );
    Ok(prediction)
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scriptable stand-ins for the camera, the model and the classifier.

    use super::*;
    use facetouch_core::{Embedding, KnnClassifier};
    use facetouch_hw::Frame;
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};

    /// Yields small uniform frames whose brightness encodes a counter.
    /// Fails every capture once `fail_after` frames have been produced.
    pub struct FakeCamera {
        pub produced: u32,
        pub fail_after: Option<u32>,
    }

    impl CaptureSource for FakeCamera {
        fn capture(&mut self) -> Result<Frame, CameraError> {
            if self.fail_after.is_some_and(|n| self.produced >= n) {
                return Err(CameraError::CaptureFailed("fake camera unplugged".into()));
            }
            self.produced += 1;
            let level = (self.produced % 200) as u8 + 40;
            Ok(Frame::from_gray(vec![level; 16], 4, 4, self.produced))
        }

        fn describe(&self) -> String {
            "fake camera".to_string()
        }
    }

    /// Embeds a frame as [mean, 1.0].
    pub struct FakeEmbedder;

    impl EmbeddingProvider for FakeEmbedder {
        fn embed(&mut self, pixels: &[u8], _: u32, _: u32) -> Result<Embedding, EmbedderError> {
            let mean = pixels.iter().map(|&p| p as f32).sum::<f32>() / pixels.len().max(1) as f32;
            Ok(Embedding { values: vec![mean / 255.0, 1.0], model_version: None })
        }
    }

    /// Records examples like a real classifier but returns scripted predictions.
    /// Once the script is exhausted the last prediction repeats.
    pub struct ScriptedClassifier {
        pub inner: KnnClassifier,
        pub script: Arc<Mutex<VecDeque<Result<Prediction, ClassifierError>>>>,
        pub last: Option<Prediction>,
    }

    impl Classifier for ScriptedClassifier {
        fn add_example(&mut self, e: Embedding, l: Label) -> Result<(), ClassifierError> {
            self.inner.add_example(e, l)
        }

        fn predict(&self, _: &Embedding) -> Result<Prediction, ClassifierError> {
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(p) => p,
                None => self.last.clone().ok_or(ClassifierError::Empty),
            }
        }

        fn example_count(&self) -> usize {
            self.inner.example_count()
        }

        fn label_counts(&self) -> BTreeMap<Label, usize> {
            self.inner.label_counts()
        }
    }

    pub fn prediction(label: Label, touched: f32) -> Prediction {
        let mut confidences = HashMap::new();
        confidences.insert(Label::Touched, touched);
        confidences.insert(Label::NotTouched, 1.0 - touched);
        Prediction { label, confidences }
    }

    /// Engine backed by a real k-NN classifier and a fake camera.
    pub fn knn_engine(fail_after: Option<u32>) -> EngineHandle {
        start_engine(EngineParts {
            source: Box::new(FakeCamera { produced: 0, fail_after }),
            embedder: Box::new(FakeEmbedder),
            classifier: Box::new(KnnClassifier::new(3)),
        })
        .unwrap()
    }

    /// Engine whose predictions follow `script`, then repeat `steady`.
    pub fn scripted_engine(
        script: Vec<Result<Prediction, ClassifierError>>,
        steady: Option<Prediction>,
    ) -> EngineHandle {
        start_engine(EngineParts {
            source: Box::new(FakeCamera { produced: 0, fail_after: None }),
            embedder: Box::new(FakeEmbedder),
            classifier: Box::new(ScriptedClassifier {
                inner: KnnClassifier::new(3),
                script: Arc::new(Mutex::new(script.into())),
                last: steady,
            }),
        })
        .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[tokio::test]
    async fn test_add_sample_counts_per_label() {
        let engine = knn_engine(None);
        assert_eq!(engine.add_sample(Label::Touched).await.unwrap(), 1);
        assert_eq!(engine.add_sample(Label::Touched).await.unwrap(), 2);
        assert_eq!(engine.add_sample(Label::NotTouched).await.unwrap(), 1);

        let summary = engine.summary().await.unwrap();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.per_label[&Label::Touched], 2);
        assert_eq!(summary.source, "fake camera");
    }

    #[tokio::test]
    async fn test_predict_without_examples_fails() {
        let engine = knn_engine(None);
        let err = engine.predict().await.unwrap_err();
        assert!(matches!(err, EngineError::Classifier(ClassifierError::Empty)));
    }

    #[tokio::test]
    async fn test_capture_failure_propagates() {
        let engine = knn_engine(Some(1));
        engine.add_sample(Label::NotTouched).await.unwrap();
        let err = engine.add_sample(Label::NotTouched).await.unwrap_err();
        assert!(matches!(err, EngineError::Camera(CameraError::CaptureFailed(_))));
        assert_eq!(engine.summary().await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn test_predict_after_training() {
        let engine = knn_engine(None);
        for _ in 0..3 {
            engine.add_sample(Label::NotTouched).await.unwrap();
        }
        let p = engine.predict().await.unwrap();
        assert_eq!(p.label, Label::NotTouched);
    }

    #[test]
    fn test_spawn_engine_missing_camera() {
        let result = spawn_engine("/dev/video-does-not-exist", "/nonexistent.onnx", 0, 3);
        assert!(matches!(result, Err(EngineError::Camera(CameraError::DeviceNotFound(_)))));
    }
}
