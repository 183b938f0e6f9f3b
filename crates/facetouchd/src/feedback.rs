//! Alert feedback: a sound with an end-of-playback signal, and rate-limited
//! desktop notifications.

use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;

const NOTIFICATIONS_DEST: &str = "org.freedesktop.Notifications";
const NOTIFICATIONS_PATH: &str = "/org/freedesktop/Notifications";
const NOTIFICATIONS_IFACE: &str = "org.freedesktop.Notifications";
const APP_NAME: &str = "facetouch";
const NOTIFICATION_EXPIRE_MS: i32 = 3000;

const BEEP_HZ: f32 = 880.0;
const BEEP_DURATION: Duration = Duration::from_millis(300);
const BEEP_VOLUME: f32 = 0.2;

/// Called exactly once when a started playback has finished.
pub type PlaybackDone = Box<dyn FnOnce() + Send + 'static>;

#[derive(Error, Debug)]
pub enum FeedbackError {
    #[error("failed to read sound {path}: {source}")]
    SoundAsset {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to decode sound {path}: {reason}")]
    Decode { path: PathBuf, reason: String },
    #[error("failed to spawn audio thread: {0}")]
    Spawn(std::io::Error),
}

/// Plays the alert sound.
pub trait SoundSink: Send + Sync {
    /// Start playback. `on_end` must run once playback ends, even if the
    /// audio device turned out to be unusable.
    fn play(&self, on_end: PlaybackDone);
}

/// Shows a desktop notification.
pub trait Notifier: Send + Sync {
    /// Returns false when the call was swallowed by the cooldown.
    fn notify(&self, summary: &str, body: &str) -> bool;
}

/// Sound feedback and notification feedback, shared by every inference loop.
#[derive(Clone)]
pub struct Feedback {
    pub sound: Arc<dyn SoundSink>,
    pub notifier: Arc<dyn Notifier>,
}

/// Minimum interval between accepted events.
#[derive(Debug)]
pub struct Cooldown {
    period: Duration,
    last: Option<Instant>,
}

impl Cooldown {
    pub fn new(period: Duration) -> Self {
        Self { period, last: None }
    }

    /// Accept the event at `now` if the previous accepted event is at least `period` old.
    pub fn try_fire_at(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.period => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

/// Audio playback on a dedicated thread via rodio.
///
/// The output stream is opened on that thread and lives there; requests
/// are queued and played one after another.
pub struct RodioSound {
    tx: Mutex<mpsc::Sender<PlaybackDone>>,
}

impl RodioSound {
    /// Load the alert sound (or fall back to a generated beep) and start the audio thread.
    pub fn new(sound_path: Option<&Path>) -> Result<Self, FeedbackError> {
        let clip: Option<Arc<[u8]>> = match sound_path {
            Some(path) => {
                let bytes = std::fs::read(path).map_err(|source| FeedbackError::SoundAsset {
                    path: path.to_path_buf(),
                    source,
                })?;
                rodio::Decoder::new(Cursor::new(bytes.clone())).map_err(|e| {
                    FeedbackError::Decode {
                        path: path.to_path_buf(),
                        reason: e.to_string(),
                    }
                })?;
                tracing::info!(path = %path.display(), bytes = bytes.len(), "alert sound loaded");
                Some(bytes.into())
            }
            None => {
                tracing::info!("no alert sound configured; using generated beep");
                None
            }
        };

        let (tx, rx) = mpsc::channel::<PlaybackDone>();

        std::thread::Builder::new()
            .name("facetouch-audio".into())
            .spawn(move || audio_thread(clip, rx))
            .map_err(FeedbackError::Spawn)?;

        Ok(Self { tx: Mutex::new(tx) })
    }
}

impl SoundSink for RodioSound {
    fn play(&self, on_end: PlaybackDone) {
        let tx = self.tx.lock().unwrap_or_else(|p| p.into_inner());
        if let Err(mpsc::SendError(on_end)) = tx.send(on_end) {
            tracing::warn!("audio thread gone; reporting playback as finished");
            on_end();
        }
    }
}

fn audio_thread(clip: Option<Arc<[u8]>>, rx: mpsc::Receiver<PlaybackDone>) {
    use rodio::Source;

    let stream = match rodio::OutputStreamBuilder::open_default_stream() {
        Ok(stream) => Some(stream),
        Err(e) => {
            tracing::warn!(error = %e, "no audio output; alerts will be silent");
            None
        }
    };

    while let Ok(on_end) = rx.recv() {
        if let Some(stream) = &stream {
            let sink = rodio::Sink::connect_new(stream.mixer());
            match &clip {
                Some(bytes) => match rodio::Decoder::new(Cursor::new(bytes.to_vec())) {
                    Ok(source) => sink.append(source),
                    Err(e) => tracing::warn!(error = %e, "failed to decode alert sound"),
                },
                None => sink.append(
                    rodio::source::SineWave::new(BEEP_HZ)
                        .take_duration(BEEP_DURATION)
                        .amplify(BEEP_VOLUME),
                ),
            }
            sink.sleep_until_end();
        }
        on_end();
    }
    tracing::debug!("audio thread exiting");
}

/// Desktop notifications over the freedesktop `Notify` D-Bus method.
pub struct DesktopNotifier {
    conn: zbus::Connection,
    runtime: tokio::runtime::Handle,
    cooldown: Mutex<Cooldown>,
}

impl DesktopNotifier {
    /// Must be called from within the tokio runtime that will send notifications.
    pub fn new(conn: zbus::Connection, cooldown: Duration) -> Self {
        Self {
            conn,
            runtime: tokio::runtime::Handle::current(),
            cooldown: Mutex::new(Cooldown::new(cooldown)),
        }
    }
}

impl Notifier for DesktopNotifier {
    fn notify(&self, summary: &str, body: &str) -> bool {
        let accepted = self
            .cooldown
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .try_fire_at(Instant::now());
        if !accepted {
            return false;
        }

        let conn = self.conn.clone();
        let summary = summary.to_string();
        let body = body.to_string();
        self.runtime.spawn(async move {
            let hints: HashMap<&str, zbus::zvariant::Value<'_>> = HashMap::new();
            let result = conn
                .call_method(
                    Some(NOTIFICATIONS_DEST),
                    NOTIFICATIONS_PATH,
                    Some(NOTIFICATIONS_IFACE),
                    "Notify",
                    &(
                        APP_NAME,
                        0u32,
                        "",
                        summary.as_str(),
                        body.as_str(),
                        Vec::<&str>::new(),
                        hints,
                        NOTIFICATION_EXPIRE_MS,
                    ),
                )
                .await;
            if let Err(e) = result {
                tracing::warn!(error = %e, "desktop notification failed");
            }
        });
        true
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cooldown_blocks_within_period() {
        let mut cd = Cooldown::new(Duration::from_millis(3000));
        let t0 = Instant::now();
        assert!(cd.try_fire_at(t0));
        assert!(!cd.try_fire_at(t0 + Duration::from_millis(1)));
        assert!(!cd.try_fire_at(t0 + Duration::from_millis(2999)));
        assert!(cd.try_fire_at(t0 + Duration::from_millis(3000)));
        // Window restarts from the last accepted event.
        assert!(!cd.try_fire_at(t0 + Duration::from_millis(5000)));
        assert!(cd.try_fire_at(t0 + Duration::from_millis(6000)));
    }

    #[test]
    fn test_zero_cooldown_always_fires() {
        let mut cd = Cooldown::new(Duration::ZERO);
        let t0 = Instant::now();
        assert!(cd.try_fire_at(t0));
        assert!(cd.try_fire_at(t0));
    }

    #[test]
    fn test_missing_sound_file() {
        let result = RodioSound::new(Some(Path::new("/nonexistent/bruh.mp3")));
        assert!(matches!(result, Err(FeedbackError::SoundAsset { .. })));
    }

    #[test]
    fn test_rodio_sound_always_reports_end() {
        // Works with or without an audio device: the end callback fires either way.
        let sound = RodioSound::new(None).unwrap();
        let (tx, rx) = mpsc::channel();
        sound.play(Box::new(move || tx.send(()).unwrap()));
        rx.recv_timeout(Duration::from_secs(10)).unwrap();
    }

    #[test]
    fn test_fake_sound_defers_end() {
        let sound = testing::FakeSound::default();
        let flag = Arc::new(Mutex::new(false));
        let f = flag.clone();
        sound.play(Box::new(move || *f.lock().unwrap() = true));
        assert!(!*flag.lock().unwrap());
        sound.finish_all();
        assert!(*flag.lock().unwrap());
        assert_eq!(sound.plays(), 1);
    }
}
