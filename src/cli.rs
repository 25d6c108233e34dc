use crate::backend::NokhwaBackend;
use crate::config::{load_config, save_config};
use crate::daemon::{run_daemon, RunOptions};
use crate::device::list_cameras;
use crate::ipc::{send_command, ControlMessage};
use crate::model::Architecture;
use crate::render::RenderStrategy;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "segcam",
    version,
    about = "Live person segmentation over a webcam or still image"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the render loop
    Run {
        /// Camera label to capture from
        #[arg(short, long)]
        camera: Option<String>,
        /// Render over a still image instead of a camera
        #[arg(short, long, conflicts_with = "camera")]
        image: Option<PathBuf>,
        /// What to estimate each frame
        #[arg(short, long, value_enum)]
        strategy: Option<RenderStrategy>,
        /// Where to write the rendered frame
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// User agent used for mobile detection
        #[arg(long)]
        user_agent: Option<String>,
    },
    /// List available cameras
    Cameras,
    /// Switch the running session to another camera
    Camera { label: Option<String> },
    /// Reload the model with another architecture
    Architecture {
        #[arg(value_enum)]
        architecture: Architecture,
    },
    /// Change what the running session estimates
    Strategy {
        #[arg(value_enum)]
        strategy: RenderStrategy,
    },
    /// Pause rendering
    Pause,
    /// Resume rendering
    Resume,
    /// Stop the running session
    Stop,
    /// Print the running session's status
    Status,
}

pub fn run_cli() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let cli = Cli::parse();
    execute(cli);
}

pub fn execute(cli: Cli) {
    match cli.command {
        Commands::Run {
            camera,
            image,
            strategy,
            output,
            user_agent,
        } => {
            let mut cfg = load_config();
            if camera.is_some() {
                cfg.camera = camera;
            }
            if let Some(s) = strategy {
                cfg.estimate = s;
            }
            if output.is_some() {
                cfg.output = output;
            }
            run_daemon(cfg, RunOptions { image, user_agent })
        }
        Commands::Cameras => {
            for line in list_cameras(&mut NokhwaBackend::default()) {
                println!("{line}");
            }
        }
        Commands::Camera { label } => switch_camera(label),
        Commands::Architecture { architecture } => set_architecture(architecture),
        Commands::Strategy { strategy } => set_strategy(strategy),
        Commands::Pause => notify(ControlMessage::Pause),
        Commands::Resume => notify(ControlMessage::Resume),
        Commands::Stop => notify(ControlMessage::Stop),
        Commands::Status => match session_status() {
            Some(status) => println!("{status}"),
            None => error!("daemon did not return a status"),
        },
    }
}

pub fn session_status() -> Option<String> {
    match send_command(ControlMessage::Status) {
        Ok(Some(s)) if !s.is_empty() => Some(s),
        _ => None,
    }
}

fn notify(msg: ControlMessage) {
    if let Err(e) = send_command(msg) {
        error!("failed to reach daemon: {e}");
    }
}

fn switch_camera(label: Option<String>) {
    let mut cfg = load_config();
    cfg.camera = label.clone();
    save_config(&cfg);
    notify(ControlMessage::SwitchCamera(label));
    info!(camera = ?cfg.camera, "camera switch requested");
}

fn set_architecture(architecture: Architecture) {
    let mut cfg = load_config();
    cfg.input.architecture = architecture;
    save_config(&cfg);
    notify(ControlMessage::SetArchitecture(architecture));
    info!(?architecture, "architecture change requested");
}

fn set_strategy(strategy: RenderStrategy) {
    let mut cfg = load_config();
    cfg.estimate = strategy;
    save_config(&cfg);
    notify(ControlMessage::SetStrategy(strategy));
    info!(?strategy, "strategy change requested");
}
