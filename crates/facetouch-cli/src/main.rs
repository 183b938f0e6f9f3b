use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facetouch_hw::Camera;

const DEFAULT_WARMUP_FRAMES: usize = 4;

#[derive(Parser)]
#[command(name = "facetouch", about = "Face-touch monitor CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect training examples from the camera
    Train {
        /// Which label the upcoming frames show
        #[arg(value_parser = ["touched", "not_touch"])]
        label: String,
    },
    /// Start watching for face touches
    Run,
    /// Stop watching
    Stop,
    /// Show daemon status
    Status,
    /// Run camera diagnostics (bypasses the daemon)
    Test {
        /// V4L2 device to probe
        #[arg(short, long, default_value = "/dev/video0")]
        device: String,
        /// Frames to discard before the diagnostic capture (matches facetouchd's warmup_frames)
        #[arg(short, long, default_value_t = DEFAULT_WARMUP_FRAMES)]
        warmup: usize,
    },
}

#[zbus::proxy(
    interface = "org.facetouch.Monitor1",
    default_service = "org.facetouch.Monitor1",
    default_path = "/org/facetouch/Monitor1"
)]
trait Monitor {
    fn train(&self, label: &str) -> zbus::Result<String>;
    fn run(&self) -> zbus::Result<bool>;
    fn stop(&self) -> zbus::Result<bool>;
    fn status(&self) -> zbus::Result<String>;
}

async fn connect() -> Result<MonitorProxy<'static>> {
    let conn = zbus::Connection::session()
        .await
        .context("failed to connect to the session bus")?;
    MonitorProxy::new(&conn)
        .await
        .context("facetouchd is not reachable; is it running?")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Train { label } => {
            let session = connect().await?.train(&label).await?;
            println!("Training {label} (session {session})");
            println!("Hold still; progress is shown by `facetouch status`.");
        }
        Commands::Run => {
            if connect().await?.run().await? {
                println!("Watching for face touches");
            } else {
                println!("Already running");
            }
        }
        Commands::Stop => {
            if connect().await?.stop().await? {
                println!("Stopped");
            } else {
                println!("Not running");
            }
        }
        Commands::Status => {
            let raw = connect().await?.status().await?;
            let value: serde_json::Value = serde_json::from_str(&raw)?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Commands::Test { device, warmup } => run_diagnostics(&device, warmup)?,
    }

    Ok(())
}

fn run_diagnostics(device: &str, warmup: usize) -> Result<()> {
    println!("Running camera diagnostics...");

    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
    }
    for d in &devices {
        println!("  {}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
    }

    let mut camera = Camera::acquire(device, warmup)
        .with_context(|| format!("failed to acquire {device}"))?;
    let frame = facetouch_hw::CaptureSource::capture(&mut camera)?;
    tracing::debug!(?frame, "diagnostic frame");

    println!("Device:     {}", camera.device_path);
    println!("Format:     {:?} {}x{}", camera.fourcc, frame.width, frame.height);
    println!("Brightness: {:.1}", frame.avg_brightness());
    println!("Dark frame: {}", if frame.is_dark { "yes (check lighting)" } else { "no" });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostics_warmup_flag() {
        let cli = Cli::try_parse_from(["facetouch", "test"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Test { warmup: DEFAULT_WARMUP_FRAMES, .. }
        ));

        let cli = Cli::try_parse_from(["facetouch", "test", "--warmup", "10", "-d", "/dev/video2"])
            .unwrap();
        match cli.command {
            Commands::Test { device, warmup } => {
                assert_eq!(device, "/dev/video2");
                assert_eq!(warmup, 10);
            }
            _ => panic!("expected test subcommand"),
        }
    }

    #[test]
    fn test_train_label_is_validated() {
        assert!(Cli::try_parse_from(["facetouch", "train", "not_touch"]).is_ok());
        assert!(Cli::try_parse_from(["facetouch", "train", "maybe"]).is_err());
    }
}
