use crate::backend::MediaBackend;
use crate::canvas::Canvas;
use crate::capture::{load_video, CaptureSession, FrameSource, StillImage};
use crate::config::RenderConfig;
use crate::device::Platform;
use crate::error::{CaptureError, ModelError};
use crate::ipc::ControlMessage;
use crate::model::{ModelOptions, SegmentationModel};
use crate::render::{LoopControl, LoopState, Reconfiguration, RenderLoop, RenderStats, RenderStrategy, Tick};
use serde::Serialize;
use std::path::Path;
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub type ModelLoader =
    Box<dyn FnMut(&ModelOptions) -> Result<Box<dyn SegmentationModel>, ModelError>>;

/// A control message plus where to send its reply, if any.
pub struct Request {
    pub message: ControlMessage,
    pub reply: Option<Sender<String>>,
}

enum Source {
    Camera,
    Image(StillImage),
}

#[derive(Debug, Serialize)]
pub struct Status {
    pub state: LoopState,
    pub strategy: RenderStrategy,
    pub source: String,
    pub model_loaded: bool,
    pub stats: RenderStats,
}

/// Owns everything a running page used to keep in globals.
pub struct Session {
    config: RenderConfig,
    backend: Box<dyn MediaBackend>,
    capture: CaptureSession,
    source: Source,
    loader: ModelLoader,
    model: Option<Box<dyn SegmentationModel>>,
    canvas: Box<dyn Canvas>,
    platform: Platform,
    renderer: RenderLoop,
}

impl Session {
    pub fn new(
        config: RenderConfig,
        backend: Box<dyn MediaBackend>,
        loader: ModelLoader,
        canvas: Box<dyn Canvas>,
        platform: Platform,
    ) -> Self {
        let renderer = RenderLoop::new(config.estimate, LoopControl::new());
        Self {
            config,
            backend,
            capture: CaptureSession::new(),
            source: Source::Camera,
            loader,
            model: None,
            canvas,
            platform,
            renderer,
        }
    }

    pub fn control(&self) -> LoopControl {
        self.renderer.control().clone()
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn capture(&self) -> &CaptureSession {
        &self.capture
    }

    /// Loads the model and attaches the frame source.
    ///
    /// Only a missing capture capability is fatal; other failures leave the
    /// loop paused until a later reconfiguration succeeds.
    pub fn bind(&mut self, image: Option<&Path>) -> Result<(), CaptureError> {
        self.reload_model();
        match image {
            Some(path) => {
                let still = StillImage::open(path)?;
                self.capture.stop();
                self.source = Source::Image(still);
            }
            None => {
                let label = self.config.camera.clone();
                self.switch_camera(label)?;
            }
        }
        info!(strategy = ?self.renderer.strategy(), "session bound");
        Ok(())
    }

    fn reload_model(&mut self) {
        let control = self.renderer.control().clone();
        control.begin(Reconfiguration::Architecture);
        self.model = None;
        match (self.loader)(&self.config.model_options()) {
            Ok(model) => {
                self.model = Some(model);
                control.finish(Reconfiguration::Architecture);
            }
            Err(e) => error!("failed to load model: {e}"),
        }
    }

    fn switch_camera(&mut self, label: Option<String>) -> Result<(), CaptureError> {
        let control = self.renderer.control().clone();
        control.begin(Reconfiguration::Camera);
        self.source = Source::Camera;
        match load_video(
            &mut self.capture,
            self.backend.as_mut(),
            label.as_deref(),
            &self.platform,
        ) {
            Ok(_) => {
                self.config.camera = label;
                control.finish(Reconfiguration::Camera);
                Ok(())
            }
            Err(CaptureError::Unsupported) => Err(CaptureError::Unsupported),
            Err(e) => {
                warn!("camera left paused: {e}");
                Ok(())
            }
        }
    }

    pub fn status(&self) -> Status {
        Status {
            state: self.renderer.control().state(),
            strategy: self.renderer.strategy(),
            source: match &self.source {
                Source::Camera => match self.capture.source() {
                    Some(v) => format!("camera {}x{}", v.width, v.height),
                    None => "camera (inactive)".to_string(),
                },
                Source::Image(still) => format!("image {}", still.path().display()),
            },
            model_loaded: self.model.is_some(),
            stats: self.renderer.stats(),
        }
    }

    /// Applies a control message, returning the reply for messages that
    /// expect one.
    pub fn handle(&mut self, message: ControlMessage) -> Option<String> {
        debug!(?message, "handling control message");
        match message {
            ControlMessage::SwitchCamera(label) => {
                if let Err(e) = self.switch_camera(label) {
                    error!("camera switch failed: {e}");
                }
            }
            ControlMessage::SetArchitecture(architecture) => {
                self.config.input.architecture = architecture;
                self.reload_model();
            }
            ControlMessage::SetStrategy(strategy) => {
                self.config.estimate = strategy;
                self.renderer.set_strategy(strategy);
            }
            ControlMessage::Pause => self.renderer.control().pause(),
            ControlMessage::Resume => self.renderer.control().resume(),
            ControlMessage::Stop => self.renderer.control().stop(),
            ControlMessage::Status => {
                return Some(serde_json::to_string(&self.status()).unwrap_or_else(|e| {
                    error!("failed to encode status: {e}");
                    String::new()
                }));
            }
        }
        None
    }

    pub fn tick(&mut self) -> Tick {
        let source: &mut dyn FrameSource = match &mut self.source {
            Source::Camera => &mut self.capture,
            Source::Image(still) => still,
        };
        self.renderer.tick(
            source,
            self.model.as_deref_mut(),
            self.canvas.as_mut(),
            &self.config,
        )
    }

    fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.config.fps.max(1.0) as f64)
    }

    fn dispatch(&mut self, request: Request) {
        let reply = self.handle(request.message);
        if let (Some(tx), Some(reply)) = (request.reply, reply) {
            let _ = tx.send(reply);
        }
    }

    /// Ticks until stopped, applying requests between ticks.
    pub fn run(&mut self, requests: Receiver<Request>) {
        let mut connected = true;
        loop {
            while let Ok(request) = requests.try_recv() {
                self.dispatch(request);
            }
            let wait = match self.tick() {
                Tick::Rendered => self.frame_interval(),
                Tick::Deferred(delay) => delay,
                Tick::Stopped => break,
            };
            if connected {
                match requests.recv_timeout(wait) {
                    Ok(request) => self.dispatch(request),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => connected = false,
                }
            } else {
                std::thread::sleep(wait);
            }
        }
        self.capture.stop();
        info!(stats = ?self.renderer.stats(), "session stopped");
    }
}
