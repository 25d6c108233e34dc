pub mod backend;
pub mod canvas;
pub mod capture;
pub mod cli;
pub mod config;
pub mod daemon;
pub mod device;
pub mod error;
pub mod ipc;
pub mod mask;
pub mod model;
pub mod render;
pub mod session;

pub use cli::{execute, run_cli, session_status, Cli, Commands};
pub use device::{resolve_constraints, CaptureConfig, FacingMode, Platform, VideoInput};
pub use render::{LoopControl, LoopState, RenderStrategy, Tick, PAUSE_DELAY};
pub use session::Session;
