use crate::canvas::Canvas;
use crate::capture::FrameSource;
use crate::config::{Effect, RenderConfig};
use crate::error::RenderError;
use crate::mask::{
    draw_bokeh_effect, draw_keypoints, draw_mask, pixelate, to_colored_part_mask, to_mask_image,
    PIXEL_CELL_WIDTH,
};
use crate::model::{InferenceParams, SegmentationModel};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, error, trace};

/// Fixed delay before a paused or failed tick is retried.
pub const PAUSE_DELAY: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum RenderStrategy {
    /// Person mask over the frame
    Segmentation,
    /// Colored body parts over the frame
    PartMap,
    /// Keypoints of a single pose
    Pose,
}

/// Reasons the loop may be held.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reconfiguration {
    Camera,
    Architecture,
    Manual,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PauseReasons {
    pub camera: bool,
    pub architecture: bool,
    pub manual: bool,
}

impl PauseReasons {
    fn set(&mut self, reason: Reconfiguration, value: bool) {
        match reason {
            Reconfiguration::Camera => self.camera = value,
            Reconfiguration::Architecture => self.architecture = value,
            Reconfiguration::Manual => self.manual = value,
        }
    }

    fn any(&self) -> bool {
        self.camera || self.architecture || self.manual
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopState {
    Running,
    Paused(PauseReasons),
    Stopped,
}

/// Shared handle driving the render loop state machine.
#[derive(Clone, Debug)]
pub struct LoopControl {
    state: Arc<Mutex<LoopState>>,
}

impl Default for LoopControl {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(LoopState::Running)),
        }
    }
}

impl LoopControl {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LoopState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> LoopState {
        *self.lock()
    }

    /// Holds the loop until the matching [`finish`](Self::finish).
    pub fn begin(&self, reason: Reconfiguration) {
        let mut state = self.lock();
        let mut reasons = match *state {
            LoopState::Stopped => return,
            LoopState::Running => PauseReasons::default(),
            LoopState::Paused(r) => r,
        };
        reasons.set(reason, true);
        *state = LoopState::Paused(reasons);
        debug!(?reason, "render loop paused");
    }

    pub fn finish(&self, reason: Reconfiguration) {
        let mut state = self.lock();
        if let LoopState::Paused(mut reasons) = *state {
            reasons.set(reason, false);
            *state = if reasons.any() {
                LoopState::Paused(reasons)
            } else {
                debug!("render loop resumed");
                LoopState::Running
            };
        }
    }

    pub fn pause(&self) {
        self.begin(Reconfiguration::Manual);
    }

    pub fn resume(&self) {
        self.finish(Reconfiguration::Manual);
    }

    /// Terminal; later begin/finish calls are ignored.
    pub fn stop(&self) {
        *self.lock() = LoopState::Stopped;
        debug!("render loop stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == LoopState::Stopped
    }
}

/// Outcome of one tick and when the next one should run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tick {
    /// A frame was drawn; reschedule on the next display frame.
    Rendered,
    Deferred(Duration),
    Stopped,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RenderStats {
    pub rendered: u64,
    pub deferred: u64,
    pub failed: u64,
}

pub struct RenderLoop {
    strategy: RenderStrategy,
    control: LoopControl,
    stats: RenderStats,
}

impl RenderLoop {
    pub fn new(strategy: RenderStrategy, control: LoopControl) -> Self {
        Self {
            strategy,
            control,
            stats: RenderStats::default(),
        }
    }

    pub fn strategy(&self) -> RenderStrategy {
        self.strategy
    }

    pub fn set_strategy(&mut self, strategy: RenderStrategy) {
        debug!(?strategy, "render strategy changed");
        self.strategy = strategy;
    }

    pub fn control(&self) -> &LoopControl {
        &self.control
    }

    pub fn stats(&self) -> RenderStats {
        self.stats
    }

    pub fn tick<S, M, C>(
        &mut self,
        source: &mut S,
        model: Option<&mut M>,
        canvas: &mut C,
        config: &RenderConfig,
    ) -> Tick
    where
        S: FrameSource + ?Sized,
        M: SegmentationModel + ?Sized,
        C: Canvas + ?Sized,
    {
        match self.control.state() {
            LoopState::Stopped => return Tick::Stopped,
            LoopState::Paused(reasons) => {
                trace!(?reasons, "tick deferred");
                self.stats.deferred += 1;
                return Tick::Deferred(PAUSE_DELAY);
            }
            LoopState::Running => {}
        }
        let Some(model) = model else {
            error!("no model loaded, deferring");
            self.stats.failed += 1;
            return Tick::Deferred(PAUSE_DELAY);
        };
        match render_frame(self.strategy, source, model, canvas, config) {
            Ok(()) => {
                self.stats.rendered += 1;
                Tick::Rendered
            }
            Err(e) => {
                error!(strategy = ?self.strategy, "render failed: {e}");
                self.stats.failed += 1;
                Tick::Deferred(PAUSE_DELAY)
            }
        }
    }
}

/// Runs inference for `strategy` on one frame and draws the result.
pub fn render_frame<S, M, C>(
    strategy: RenderStrategy,
    source: &mut S,
    model: &mut M,
    canvas: &mut C,
    config: &RenderConfig,
) -> Result<(), RenderError>
where
    S: FrameSource + ?Sized,
    M: SegmentationModel + ?Sized,
    C: Canvas + ?Sized,
{
    let frame = source.frame()?;
    let flip = config.flip_horizontal;
    let internal_resolution = config.input.internal_resolution;
    let composed = match strategy {
        RenderStrategy::Segmentation => {
            let seg = &config.segmentation;
            let params = InferenceParams {
                internal_resolution,
                segmentation_threshold: seg.segmentation_threshold,
            };
            let person = model.segment_person(&frame, &params)?;
            match seg.effect {
                Effect::Mask => {
                    let mask = to_mask_image(&person, seg.mask_background);
                    draw_mask(&frame, &mask, seg.opacity, seg.mask_blur_amount, flip)
                }
                Effect::Bokeh => draw_bokeh_effect(
                    &frame,
                    &person,
                    seg.background_blur_amount,
                    seg.edge_blur_amount,
                    flip,
                ),
            }
        }
        RenderStrategy::PartMap => {
            let parts_cfg = &config.part_map;
            let params = InferenceParams {
                internal_resolution,
                segmentation_threshold: parts_cfg.segmentation_threshold,
            };
            let parts = model.segment_parts(&frame, &params)?;
            let mut mask = to_colored_part_mask(&parts, parts_cfg.color_scale.colors());
            if parts_cfg.apply_pixelation {
                mask = pixelate(&mask, PIXEL_CELL_WIDTH);
            }
            draw_mask(&frame, &mask, parts_cfg.opacity, 0.0, parts_cfg.flip_horizontal)
        }
        RenderStrategy::Pose => {
            let params = InferenceParams {
                internal_resolution,
                segmentation_threshold: config.segmentation.segmentation_threshold,
            };
            let pose = model.estimate_pose(&frame, &params)?;
            draw_keypoints(&frame, &pose, config.pose.min_keypoint_score, flip)
        }
    };
    canvas.draw(&composed)
}
