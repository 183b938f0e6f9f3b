use crate::monitor::Monitor;
use facetouch_core::Label;
use std::sync::Arc;
use zbus::interface;

pub const BUS_NAME: &str = "org.facetouch.Monitor1";
pub const OBJECT_PATH: &str = "/org/facetouch/Monitor1";

/// D-Bus interface for the face-touch monitor.
///
/// Bus name: org.facetouch.Monitor1 (session bus)
/// Object path: /org/facetouch/Monitor1
pub struct MonitorService {
    monitor: Arc<Monitor>,
}

impl MonitorService {
    pub fn new(monitor: Arc<Monitor>) -> Self {
        Self { monitor }
    }
}

fn failed(e: impl std::fmt::Display) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(e.to_string())
}

#[interface(name = "org.facetouch.Monitor1")]
impl MonitorService {
    /// Collect training examples for `label` ("touched" or "not_touch").
    /// Returns the training session id; progress shows up in Status.
    async fn train(&self, label: &str) -> zbus::fdo::Result<String> {
        tracing::info!(label, "train requested");
        let label: Label = label
            .parse()
            .map_err(|e: facetouch_core::ParseLabelError| zbus::fdo::Error::InvalidArgs(e.to_string()))?;
        self.monitor
            .train(label)
            .map(|id| id.to_string())
            .map_err(failed)
    }

    /// Start the inference loop. Returns false if it was already running.
    async fn run(&self) -> zbus::fdo::Result<bool> {
        tracing::info!("run requested");
        self.monitor.run().map_err(failed)
    }

    /// Stop the inference loop. Returns false if it was not running.
    async fn stop(&self) -> bool {
        tracing::info!("stop requested");
        self.monitor.stop().await
    }

    /// Return daemon status as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let report = self.monitor.status().await;
        serde_json::to_string(&report).map_err(failed)
    }
}
