use crate::mask::ColorScale;
use crate::model::{Architecture, InternalResolution, ModelOptions};
use crate::render::RenderStrategy;
use serde::{Deserialize, Serialize};
use std::{env, fs, path::PathBuf};
use tracing::error;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    #[default]
    Mask,
    Bokeh,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub architecture: Architecture,
    pub output_stride: u32,
    pub quant_bytes: u32,
    pub internal_resolution: InternalResolution,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            architecture: Architecture::ResNet50,
            output_stride: 32,
            quant_bytes: 2,
            internal_resolution: InternalResolution::Medium,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    pub segmentation_threshold: f32,
    pub effect: Effect,
    pub mask_background: bool,
    pub opacity: f32,
    pub background_blur_amount: f32,
    pub mask_blur_amount: f32,
    pub edge_blur_amount: f32,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            segmentation_threshold: 0.5,
            effect: Effect::Mask,
            mask_background: true,
            opacity: 0.7,
            background_blur_amount: 3.0,
            mask_blur_amount: 0.0,
            edge_blur_amount: 3.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartMapConfig {
    pub color_scale: ColorScale,
    pub segmentation_threshold: f32,
    pub apply_pixelation: bool,
    pub opacity: f32,
    /// Part maps are drawn unmirrored unless asked for.
    pub flip_horizontal: bool,
}

impl Default for PartMapConfig {
    fn default() -> Self {
        Self {
            color_scale: ColorScale::Rainbow,
            segmentation_threshold: 0.7,
            apply_pixelation: false,
            opacity: 0.7,
            flip_horizontal: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoseConfig {
    pub min_keypoint_score: f32,
}

impl Default for PoseConfig {
    fn default() -> Self {
        Self {
            min_keypoint_score: 0.3,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSource {
    pub repo: String,
    pub file: Option<String>,
}

impl Default for ModelSource {
    fn default() -> Self {
        Self {
            repo: "segcam/bodypix-onnx".to_string(),
            file: None,
        }
    }
}

/// Tunable display parameters read by the render loop.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub estimate: RenderStrategy,
    pub camera: Option<String>,
    pub flip_horizontal: bool,
    pub fps: f32,
    pub output: Option<PathBuf>,
    pub input: InputConfig,
    pub segmentation: SegmentationConfig,
    pub part_map: PartMapConfig,
    pub pose: PoseConfig,
    pub model: ModelSource,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            estimate: RenderStrategy::PartMap,
            camera: None,
            flip_horizontal: true,
            fps: 30.0,
            output: None,
            input: InputConfig::default(),
            segmentation: SegmentationConfig::default(),
            part_map: PartMapConfig::default(),
            pose: PoseConfig::default(),
            model: ModelSource::default(),
        }
    }
}

impl RenderConfig {
    pub fn model_options(&self) -> ModelOptions {
        ModelOptions {
            architecture: self.input.architecture,
            output_stride: self.input.output_stride,
            quant_bytes: self.input.quant_bytes,
            repo: self.model.repo.clone(),
            file: self.model.file.clone(),
        }
    }
}

fn config_path() -> PathBuf {
    env::var_os("SEGCAM_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("segcam.json"))
}

pub fn load_config() -> RenderConfig {
    let path = config_path();
    if let Ok(data) = fs::read(&path) {
        match serde_json::from_slice(&data) {
            Ok(cfg) => return cfg,
            Err(e) => error!(path = %path.display(), "ignoring invalid config: {e}"),
        }
    }
    RenderConfig::default()
}

pub fn save_config(cfg: &RenderConfig) {
    let path = config_path();
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    match serde_json::to_vec_pretty(cfg) {
        Ok(data) => {
            if let Err(e) = fs::write(&path, data) {
                error!("failed to write config: {e}");
            }
        }
        Err(e) => error!("failed to encode config: {e}"),
    }
}
