use image::{RgbImage, RgbaImage};
use segcam::backend::{MediaBackend, MediaStream, StreamRequest};
use segcam::canvas::Canvas;
use segcam::config::RenderConfig;
use segcam::error::{CaptureError, ModelError, RenderError};
use segcam::ipc::ControlMessage;
use segcam::model::{
    Architecture, InferenceParams, ModelOptions, PartSegmentation, PersonSegmentation, Pose,
    SegmentationModel,
};
use segcam::session::{ModelLoader, Request, Session};
use segcam::{LoopState, Platform, RenderStrategy, Tick, VideoInput, PAUSE_DELAY};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use tempfile::tempdir;

#[derive(Clone, Default)]
struct Shared {
    events: Arc<Mutex<Vec<String>>>,
    inferences: Arc<AtomicUsize>,
    draws: Arc<AtomicUsize>,
    loads: Arc<AtomicUsize>,
}

impl Shared {
    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

struct Stream {
    label: String,
    shared: Shared,
}

impl MediaStream for Stream {
    fn wait_for_metadata(&mut self) -> Result<(u32, u32), CaptureError> {
        Ok((8, 6))
    }

    fn play(&mut self) -> Result<(), CaptureError> {
        Ok(())
    }

    fn frame(&mut self) -> Result<RgbImage, CaptureError> {
        Ok(RgbImage::new(8, 6))
    }

    fn stop_tracks(&mut self) -> Result<(), CaptureError> {
        self.shared.push(format!("stop {}", self.label));
        Ok(())
    }
}

struct Backend {
    shared: Shared,
}

impl MediaBackend for Backend {
    fn enumerate_devices(&mut self) -> Result<Vec<VideoInput>, CaptureError> {
        Ok(vec![
            VideoInput {
                device_id: "7".into(),
                label: "Back Camera".into(),
            },
            VideoInput {
                device_id: "broken".into(),
                label: "Busy Camera".into(),
            },
        ])
    }

    fn open(&mut self, request: &StreamRequest) -> Result<Box<dyn MediaStream>, CaptureError> {
        let label = request
            .video
            .device_id
            .clone()
            .unwrap_or_else(|| "default".into());
        if label == "broken" {
            return Err(CaptureError::Stream("device busy".into()));
        }
        self.shared.push(format!("open {label}"));
        Ok(Box::new(Stream {
            label,
            shared: self.shared.clone(),
        }))
    }
}

struct Model {
    shared: Shared,
}

impl Model {
    fn count(&self) {
        self.shared.inferences.fetch_add(1, Ordering::SeqCst);
    }
}

impl SegmentationModel for Model {
    fn segment_person(
        &mut self,
        frame: &RgbImage,
        _: &InferenceParams,
    ) -> Result<PersonSegmentation, ModelError> {
        self.count();
        Ok(PersonSegmentation {
            width: frame.width(),
            height: frame.height(),
            data: vec![0; (frame.width() * frame.height()) as usize],
        })
    }

    fn segment_parts(
        &mut self,
        frame: &RgbImage,
        _: &InferenceParams,
    ) -> Result<PartSegmentation, ModelError> {
        self.count();
        Ok(PartSegmentation {
            width: frame.width(),
            height: frame.height(),
            data: vec![-1; (frame.width() * frame.height()) as usize],
        })
    }

    fn estimate_pose(&mut self, _: &RgbImage, _: &InferenceParams) -> Result<Pose, ModelError> {
        self.count();
        Ok(Pose {
            score: 0.0,
            keypoints: Vec::new(),
        })
    }
}

struct CountingCanvas {
    shared: Shared,
}

impl Canvas for CountingCanvas {
    fn draw(&mut self, _: &RgbaImage) -> Result<(), RenderError> {
        self.shared.draws.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn loader(shared: &Shared) -> ModelLoader {
    let shared = shared.clone();
    Box::new(move |options: &ModelOptions| {
        shared.loads.fetch_add(1, Ordering::SeqCst);
        if options.architecture == Architecture::MobileNetV1 {
            return Err(ModelError::NotLoaded);
        }
        Ok(Box::new(Model {
            shared: shared.clone(),
        }) as Box<dyn SegmentationModel>)
    })
}

fn session(shared: &Shared) -> Session {
    Session::new(
        RenderConfig::default(),
        Box::new(Backend {
            shared: shared.clone(),
        }),
        loader(shared),
        Box::new(CountingCanvas {
            shared: shared.clone(),
        }),
        Platform::from_user_agent("Mozilla/5.0 (X11; Linux x86_64)"),
    )
}

#[test]
fn bind_loads_model_and_starts_default_camera() {
    let shared = Shared::default();
    let mut session = session(&shared);
    session.bind(None).unwrap();

    assert_eq!(shared.loads.load(Ordering::SeqCst), 1);
    assert_eq!(shared.events(), vec!["open default"]);
    assert_eq!(session.control().state(), LoopState::Running);
    assert_eq!(session.tick(), Tick::Rendered);
    assert_eq!(shared.inferences.load(Ordering::SeqCst), 1);
    assert_eq!(shared.draws.load(Ordering::SeqCst), 1);
}

#[test]
fn switching_camera_tears_down_previous_stream() {
    let shared = Shared::default();
    let mut session = session(&shared);
    session.bind(None).unwrap();
    session.handle(ControlMessage::SwitchCamera(Some("Back Camera".into())));

    assert_eq!(
        shared.events(),
        vec!["open default", "stop default", "open 7"]
    );
    assert_eq!(session.config().camera.as_deref(), Some("Back Camera"));
    assert_eq!(session.control().state(), LoopState::Running);
}

#[test]
fn failed_camera_switch_pauses_instead_of_crashing() {
    let shared = Shared::default();
    let mut session = session(&shared);
    session.bind(None).unwrap();
    session.handle(ControlMessage::SwitchCamera(Some("Busy Camera".into())));

    assert_eq!(shared.events(), vec!["open default", "stop default"]);
    assert!(!session.capture().is_active());
    assert!(matches!(
        session.control().state(),
        LoopState::Paused(r) if r.camera
    ));
    assert_eq!(session.tick(), Tick::Deferred(PAUSE_DELAY));
    assert_eq!(shared.inferences.load(Ordering::SeqCst), 0);

    session.handle(ControlMessage::SwitchCamera(Some("Back Camera".into())));
    assert_eq!(session.control().state(), LoopState::Running);
    assert_eq!(session.tick(), Tick::Rendered);
}

#[test]
fn failed_model_load_keeps_loop_paused() {
    let shared = Shared::default();
    let mut session = session(&shared);
    session.bind(None).unwrap();
    session.handle(ControlMessage::SetArchitecture(Architecture::MobileNetV1));

    assert!(matches!(
        session.control().state(),
        LoopState::Paused(r) if r.architecture
    ));
    assert_eq!(session.tick(), Tick::Deferred(PAUSE_DELAY));

    session.handle(ControlMessage::SetArchitecture(Architecture::ResNet50));
    assert_eq!(session.control().state(), LoopState::Running);
    assert_eq!(session.tick(), Tick::Rendered);
    assert_eq!(shared.loads.load(Ordering::SeqCst), 3);
}

#[test]
fn manual_pause_and_resume() {
    let shared = Shared::default();
    let mut session = session(&shared);
    session.bind(None).unwrap();

    session.handle(ControlMessage::Pause);
    assert_eq!(session.tick(), Tick::Deferred(PAUSE_DELAY));
    session.handle(ControlMessage::Resume);
    assert_eq!(session.tick(), Tick::Rendered);
    assert_eq!(shared.inferences.load(Ordering::SeqCst), 1);
}

#[test]
fn status_reports_strategy_and_source() {
    let shared = Shared::default();
    let mut session = session(&shared);
    session.bind(None).unwrap();
    session.handle(ControlMessage::SetStrategy(RenderStrategy::Pose));
    session.tick();

    let reply = session.handle(ControlMessage::Status).unwrap();
    let status: serde_json::Value = serde_json::from_str(&reply).unwrap();
    assert_eq!(status["strategy"], "pose");
    assert_eq!(status["state"], "running");
    assert_eq!(status["source"], "camera 8x6");
    assert_eq!(status["stats"]["rendered"], 1);
}

#[test]
fn still_image_source_needs_no_camera() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("person.png");
    RgbImage::new(5, 5).save(&path).unwrap();

    let shared = Shared::default();
    let mut session = session(&shared);
    session.bind(Some(&path)).unwrap();

    assert!(shared.events().is_empty());
    assert!(!session.capture().is_active());
    assert_eq!(session.tick(), Tick::Rendered);
}

#[test]
fn run_exits_on_stop_and_releases_camera() {
    let shared = Shared::default();
    let mut session = session(&shared);
    session.bind(None).unwrap();

    let (tx, rx) = mpsc::channel();
    let (reply_tx, reply_rx) = mpsc::channel();
    tx.send(Request {
        message: ControlMessage::Status,
        reply: Some(reply_tx),
    })
    .unwrap();
    tx.send(Request {
        message: ControlMessage::Stop,
        reply: None,
    })
    .unwrap();

    session.run(rx);

    assert!(reply_rx.recv().unwrap().contains("\"strategy\""));
    assert!(session.control().is_stopped());
    assert_eq!(shared.events(), vec!["open default", "stop default"]);
}
