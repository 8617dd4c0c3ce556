use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use std::path::PathBuf;

#[zbus::proxy(
    interface = "org.lookout.Guard1",
    default_service = "org.lookout.Guard1",
    default_path = "/org/lookout/Guard1"
)]
trait Guard {
    async fn status(&self) -> zbus::Result<String>;
    async fn start_monitoring(&self) -> zbus::Result<String>;
    async fn stop_monitoring(&self) -> zbus::Result<String>;
    async fn start_registering(&self) -> zbus::Result<String>;
    async fn stop_registering(&self) -> zbus::Result<String>;
    async fn capture(&self, name: &str) -> zbus::Result<String>;
    async fn list_faces(&self) -> zbus::Result<String>;
    async fn remove_face(&self, id: &str) -> zbus::Result<bool>;
    async fn thumbnail(&self, id: &str) -> zbus::Result<Vec<u8>>;
    async fn toggle_panic(&self) -> zbus::Result<String>;
    async fn report_detection(&self) -> zbus::Result<String>;
    async fn exit_alarm(&self) -> zbus::Result<String>;
    async fn cancel(&self) -> zbus::Result<String>;
    async fn clear_alarm(&self) -> zbus::Result<String>;
    async fn set_visible(&self, visible: bool) -> zbus::Result<()>;

    #[zbus(signal)]
    fn mode_changed(&self, from: &str, to: &str, label: &str) -> zbus::Result<()>;

    #[zbus(signal)]
    fn alarm_entered(&self, source: &str, disguise: &str) -> zbus::Result<()>;

    #[zbus(signal)]
    fn alarm_exited(&self, reason: &str) -> zbus::Result<()>;
}

#[derive(Parser)]
#[command(name = "lookout", about = "Lookout presence guard CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show daemon status
    Status,
    /// Start or stop monitoring for enrolled faces
    Monitor {
        #[arg(long)]
        stop: bool,
    },
    /// Enter or leave registration mode
    Register {
        #[arg(long)]
        stop: bool,
    },
    /// Enroll the face currently in view (registration mode only)
    Capture {
        /// Display name for the face
        #[arg(short, long, default_value = "")]
        name: String,
    },
    /// List enrolled faces
    List,
    /// Remove an enrolled face
    Remove {
        /// Face ID to remove
        id: String,
    },
    /// Save the registration thumbnail of a face as PNG
    Thumbnail {
        id: String,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Toggle the disguise (panic hotkey)
    Panic,
    /// Report a detection from an external watcher
    Detected,
    /// Leave the disguise through its exit action
    Exit,
    /// Cancellation key: leave the disguise if it is showing
    Cancel,
    /// Drop the alarm and resume monitoring
    Clear,
    /// Tell the daemon whether the host window is visible
    Visible {
        #[arg(action = clap::ArgAction::Set)]
        visible: bool,
    },
    /// Print mode changes as they happen
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = zbus::Connection::session()
        .await
        .context("cannot connect to the session bus")?;
    tracing::debug!(unique_name = ?conn.unique_name(), "connected to session bus");
    let guard = GuardProxy::new(&conn).await?;

    match cli.command {
        Commands::Status => {
            let status: serde_json::Value = serde_json::from_str(&guard.status().await?)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Monitor { stop } => {
            let mode = if stop {
                guard.stop_monitoring().await?
            } else {
                guard.start_monitoring().await?
            };
            println!("mode: {mode}");
        }
        Commands::Register { stop } => {
            let mode = if stop {
                guard.stop_registering().await?
            } else {
                guard.start_registering().await?
            };
            println!("mode: {mode}");
        }
        Commands::Capture { name } => {
            let id = guard.capture(&name).await?;
            println!("Enrolled face {id}");
        }
        Commands::List => {
            let faces: Vec<serde_json::Value> = serde_json::from_str(&guard.list_faces().await?)?;
            if faces.is_empty() {
                println!("No faces enrolled");
            }
            for face in faces {
                println!(
                    "{}  {}  {}",
                    face["id"].as_str().unwrap_or("?"),
                    face["name"].as_str().unwrap_or("?"),
                    face["enrolled_at"].as_str().unwrap_or("?"),
                );
            }
        }
        Commands::Remove { id } => {
            if guard.remove_face(&id).await? {
                println!("Removed face {id}");
            } else {
                println!("No face with id {id}");
            }
        }
        Commands::Thumbnail { id, output } => {
            let png = guard.thumbnail(&id).await?;
            std::fs::write(&output, png)
                .with_context(|| format!("failed to write {}", output.display()))?;
            println!("Wrote {}", output.display());
        }
        Commands::Panic => println!("mode: {}", guard.toggle_panic().await?),
        Commands::Detected => println!("mode: {}", guard.report_detection().await?),
        Commands::Exit => println!("mode: {}", guard.exit_alarm().await?),
        Commands::Cancel => println!("mode: {}", guard.cancel().await?),
        Commands::Clear => println!("mode: {}", guard.clear_alarm().await?),
        Commands::Visible { visible } => guard.set_visible(visible).await?,
        Commands::Watch => watch(&guard).await?,
    }

    Ok(())
}

async fn watch(guard: &GuardProxy<'_>) -> Result<()> {
    let mut changes = guard.receive_mode_changed().await?;
    let mut alarms = guard.receive_alarm_entered().await?;
    let mut exits = guard.receive_alarm_exited().await?;

    loop {
        tokio::select! {
            Some(signal) = changes.next() => {
                let args = signal.args()?;
                println!("{} -> {}  ({})", args.from(), args.to(), args.label());
            }
            Some(signal) = alarms.next() => {
                let args = signal.args()?;
                println!("alarm: {} [{}]", args.source(), args.disguise());
            }
            Some(signal) = exits.next() => {
                println!("alarm cleared: {}", signal.args()?.reason());
            }
            else => break,
        }
    }
    Ok(())
}
