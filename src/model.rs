use crate::error::ModelError;
use candle_core::{DType, Device, Tensor};
use candle_onnx::{onnx, read_file, simple_eval};
use hf_hub::api::sync::Api;
use image::{imageops::FilterType, GrayImage, Luma, RgbImage};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, trace};

const SEGMENTS_OUTPUT: &str = "float_segments";
const PART_HEATMAPS_OUTPUT: &str = "float_part_heatmaps";
const HEATMAPS_OUTPUT: &str = "float_heatmaps";
const SHORT_OFFSETS_OUTPUT: &str = "float_short_offsets";

const IMAGENET_MEAN: [f32; 3] = [123.15, 115.90, 103.06];

pub const NUM_PARTS: usize = 24;

pub const KEYPOINT_NAMES: [&str; 17] = [
    "nose",
    "leftEye",
    "rightEye",
    "leftEar",
    "rightEar",
    "leftShoulder",
    "rightShoulder",
    "leftElbow",
    "rightElbow",
    "leftWrist",
    "rightWrist",
    "leftHip",
    "rightHip",
    "leftKnee",
    "rightKnee",
    "leftAnkle",
    "rightAnkle",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum Architecture {
    #[value(name = "mobilenet")]
    MobileNetV1,
    #[value(name = "resnet50")]
    ResNet50,
}

impl Architecture {
    fn default_file(self, output_stride: u32, quant_bytes: u32) -> String {
        let name = match self {
            Architecture::MobileNetV1 => "mobilenet",
            Architecture::ResNet50 => "resnet50",
        };
        format!("bodypix-{name}-stride{output_stride}-q{quant_bytes}.onnx")
    }
}

/// Fraction of the frame size fed to the network.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InternalResolution {
    Low,
    Medium,
    High,
    Full,
}

impl InternalResolution {
    pub fn scale(self) -> f32 {
        match self {
            InternalResolution::Low => 0.25,
            InternalResolution::Medium => 0.5,
            InternalResolution::High => 0.75,
            InternalResolution::Full => 1.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ModelOptions {
    pub architecture: Architecture,
    pub output_stride: u32,
    pub quant_bytes: u32,
    pub repo: String,
    pub file: Option<String>,
}

impl ModelOptions {
    /// Name of the ONNX file to load, honouring `SEGCAM_MODEL`.
    pub fn filename(&self) -> String {
        std::env::var("SEGCAM_MODEL")
            .ok()
            .or_else(|| self.file.clone())
            .unwrap_or_else(|| {
                self.architecture
                    .default_file(self.output_stride, self.quant_bytes)
            })
    }

    pub fn repo(&self) -> String {
        std::env::var("SEGCAM_MODEL_REPO").unwrap_or_else(|_| self.repo.clone())
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InferenceParams {
    pub internal_resolution: InternalResolution,
    pub segmentation_threshold: f32,
}

/// Binary person mask at frame resolution, 1 for foreground.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PersonSegmentation {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// Body part id per pixel at frame resolution, -1 for background.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartSegmentation {
    pub width: u32,
    pub height: u32,
    pub data: Vec<i32>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Keypoint {
    pub part: &'static str,
    pub x: f32,
    pub y: f32,
    pub score: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Pose {
    pub score: f32,
    pub keypoints: Vec<Keypoint>,
}

pub trait SegmentationModel {
    fn segment_person(
        &mut self,
        frame: &RgbImage,
        params: &InferenceParams,
    ) -> Result<PersonSegmentation, ModelError>;

    fn segment_parts(
        &mut self,
        frame: &RgbImage,
        params: &InferenceParams,
    ) -> Result<PartSegmentation, ModelError>;

    fn estimate_pose(
        &mut self,
        frame: &RgbImage,
        params: &InferenceParams,
    ) -> Result<Pose, ModelError>;
}

/// Snaps `size` to a resolution the network accepts: a stride multiple plus one.
pub fn valid_input_resolution(size: u32, output_stride: u32) -> u32 {
    if output_stride == 0 {
        return size.max(1);
    }
    let size = size.max(output_stride + 1);
    if (size - 1) % output_stride == 0 {
        size
    } else {
        (size / output_stride) * output_stride + 1
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Thresholds single-channel logits laid out as `[row][col][channel]`.
pub fn decode_segments(segments: &[Vec<Vec<f32>>], threshold: f32) -> GrayImage {
    let height = segments.len() as u32;
    let width = segments.first().map_or(0, |r| r.len()) as u32;
    GrayImage::from_fn(width, height, |x, y| {
        let logit = segments[y as usize][x as usize].first().copied().unwrap_or(f32::MIN);
        Luma([u8::from(sigmoid(logit) > threshold)])
    })
}

/// Per pixel argmax over part logits; `None` when there are no channels.
pub fn decode_part_ids(part_logits: &[Vec<Vec<f32>>]) -> Vec<Vec<Option<usize>>> {
    part_logits
        .iter()
        .map(|row| {
            row.iter()
                .map(|channels| {
                    channels
                        .iter()
                        .enumerate()
                        .max_by(|a, b| a.1.total_cmp(b.1))
                        .map(|(i, _)| i)
                })
                .collect()
        })
        .collect()
}

/// Highest scoring heatmap cell per keypoint, refined by short offsets.
///
/// `offsets` holds the y offsets in the first half of the channels and the x
/// offsets in the second half. Positions are in network input pixels.
pub fn decode_keypoints(
    heatmaps: &[Vec<Vec<f32>>],
    offsets: &[Vec<Vec<f32>>],
    output_stride: u32,
) -> Pose {
    let count = heatmaps
        .first()
        .and_then(|r| r.first())
        .map_or(0, |c| c.len())
        .min(KEYPOINT_NAMES.len());
    let mut keypoints = Vec::with_capacity(count);
    for k in 0..count {
        let mut best = (0usize, 0usize, f32::MIN);
        for (y, row) in heatmaps.iter().enumerate() {
            for (x, cell) in row.iter().enumerate() {
                if cell[k] > best.2 {
                    best = (y, x, cell[k]);
                }
            }
        }
        let (y, x, logit) = best;
        let cell = offsets.get(y).and_then(|r| r.get(x));
        let dy = cell.and_then(|c| c.get(k)).copied().unwrap_or(0.0);
        let dx = cell.and_then(|c| c.get(k + count)).copied().unwrap_or(0.0);
        keypoints.push(Keypoint {
            part: KEYPOINT_NAMES[k],
            x: (x as u32 * output_stride) as f32 + dx,
            y: (y as u32 * output_stride) as f32 + dy,
            score: sigmoid(logit),
        });
    }
    let score = if keypoints.is_empty() {
        0.0
    } else {
        keypoints.iter().map(|k| k.score).sum::<f32>() / keypoints.len() as f32
    };
    Pose { score, keypoints }
}

/// BodyPix-style network run through candle-onnx.
pub struct OnnxModel {
    model: onnx::ModelProto,
    input_name: String,
    options: ModelOptions,
    device: Device,
}

/// Resolves the model file locally or from the hub and reads it.
pub fn load(options: &ModelOptions) -> Result<OnnxModel, ModelError> {
    let filename = options.filename();
    let model_path = if Path::new(&filename).exists() {
        filename
    } else {
        let repo = options.repo();
        debug!(%repo, %filename, "fetching model from hub");
        Api::new()
            .and_then(|api| api.model(repo).get(&filename))?
            .to_string_lossy()
            .into()
    };
    let model = read_file(&model_path)?;
    let input_name = model
        .graph
        .as_ref()
        .and_then(|g| g.input.first())
        .map(|i| i.name.clone())
        .ok_or(ModelError::MissingGraph)?;
    info!(path = %model_path, architecture = ?options.architecture, "model loaded");
    Ok(OnnxModel {
        model,
        input_name,
        options: options.clone(),
        device: Device::Cpu,
    })
}

impl OnnxModel {
    fn input_size(&self, frame: &RgbImage, params: &InferenceParams) -> (u32, u32) {
        let scale = params.internal_resolution.scale();
        let stride = self.options.output_stride;
        (
            valid_input_resolution((frame.width() as f32 * scale) as u32, stride),
            valid_input_resolution((frame.height() as f32 * scale) as u32, stride),
        )
    }

    fn run(&self, frame: &RgbImage, width: u32, height: u32) -> Result<HashMap<String, Tensor>, ModelError> {
        let resized = image::imageops::resize(frame, width, height, FilterType::Triangle);
        let tensor = Tensor::from_vec(
            resized.into_raw(),
            (height as usize, width as usize, 3),
            &self.device,
        )?
        .to_dtype(DType::F32)?;
        let tensor = match self.options.architecture {
            Architecture::MobileNetV1 => tensor.affine(2.0 / 255.0, -1.0)?,
            Architecture::ResNet50 => {
                let mean = Tensor::new(&IMAGENET_MEAN, &self.device)?;
                tensor.broadcast_sub(&mean)?
            }
        };
        let mut inputs = HashMap::new();
        inputs.insert(self.input_name.clone(), tensor.unsqueeze(0)?);
        trace!(width, height, "running inference");
        Ok(simple_eval(&self.model, inputs)?)
    }

    fn output(
        outputs: &mut HashMap<String, Tensor>,
        name: &'static str,
    ) -> Result<Vec<Vec<Vec<f32>>>, ModelError> {
        let tensor = outputs.remove(name).ok_or(ModelError::MissingOutput(name))?;
        if tensor.rank() != 4 {
            return Err(ModelError::Shape {
                name,
                dims: tensor.dims().to_vec(),
            });
        }
        Ok(tensor.squeeze(0)?.to_dtype(DType::F32)?.to_vec3::<f32>()?)
    }

    fn person_mask(
        &self,
        outputs: &mut HashMap<String, Tensor>,
        frame: &RgbImage,
        threshold: f32,
    ) -> Result<GrayImage, ModelError> {
        let segments = Self::output(outputs, SEGMENTS_OUTPUT)?;
        let mask = decode_segments(&segments, threshold);
        Ok(image::imageops::resize(
            &mask,
            frame.width(),
            frame.height(),
            FilterType::Nearest,
        ))
    }
}

impl SegmentationModel for OnnxModel {
    fn segment_person(
        &mut self,
        frame: &RgbImage,
        params: &InferenceParams,
    ) -> Result<PersonSegmentation, ModelError> {
        let (w, h) = self.input_size(frame, params);
        let mut outputs = self.run(frame, w, h)?;
        let mask = self.person_mask(&mut outputs, frame, params.segmentation_threshold)?;
        Ok(PersonSegmentation {
            width: mask.width(),
            height: mask.height(),
            data: mask.into_raw(),
        })
    }

    fn segment_parts(
        &mut self,
        frame: &RgbImage,
        params: &InferenceParams,
    ) -> Result<PartSegmentation, ModelError> {
        let (w, h) = self.input_size(frame, params);
        let mut outputs = self.run(frame, w, h)?;
        let mask = self.person_mask(&mut outputs, frame, params.segmentation_threshold)?;
        let parts = decode_part_ids(&Self::output(&mut outputs, PART_HEATMAPS_OUTPUT)?);
        let rows = parts.len() as u32;
        let cols = parts.first().map_or(0, |r| r.len()) as u32;
        let mut data = Vec::with_capacity(mask.len());
        for (x, y, pixel) in mask.enumerate_pixels() {
            let id = if pixel[0] == 0 || rows == 0 || cols == 0 {
                -1
            } else {
                let py = (y * rows / mask.height()).min(rows - 1) as usize;
                let px = (x * cols / mask.width()).min(cols - 1) as usize;
                parts[py][px].map_or(-1, |p| p as i32)
            };
            data.push(id);
        }
        // enumerate_pixels walks rows, so data is row-major already
        Ok(PartSegmentation {
            width: mask.width(),
            height: mask.height(),
            data,
        })
    }

    fn estimate_pose(
        &mut self,
        frame: &RgbImage,
        params: &InferenceParams,
    ) -> Result<Pose, ModelError> {
        let (w, h) = self.input_size(frame, params);
        let mut outputs = self.run(frame, w, h)?;
        let heatmaps = Self::output(&mut outputs, HEATMAPS_OUTPUT)?;
        let offsets = Self::output(&mut outputs, SHORT_OFFSETS_OUTPUT)?;
        let mut pose = decode_keypoints(&heatmaps, &offsets, self.options.output_stride);
        let sx = frame.width() as f32 / w as f32;
        let sy = frame.height() as f32 / h as f32;
        for kp in &mut pose.keypoints {
            kp.x *= sx;
            kp.y *= sy;
        }
        Ok(pose)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(rows: usize, cols: usize, f: impl Fn(usize, usize) -> Vec<f32>) -> Vec<Vec<Vec<f32>>> {
        (0..rows)
            .map(|y| (0..cols).map(|x| f(y, x)).collect())
            .collect()
    }

    #[test]
    fn input_resolution_snaps_to_stride() {
        assert_eq!(valid_input_resolution(257, 16), 257);
        assert_eq!(valid_input_resolution(320, 16), 321);
        assert_eq!(valid_input_resolution(640, 32), 641);
    }

    #[test]
    fn input_resolution_never_drops_below_one_stride() {
        assert_eq!(valid_input_resolution(0, 16), 17);
        assert_eq!(valid_input_resolution(1, 16), 17);
        assert_eq!(valid_input_resolution(5, 16), 17);
        assert_eq!(valid_input_resolution(16, 16), 17);
        assert_eq!(valid_input_resolution(5, 0), 5);
    }

    #[test]
    fn internal_resolution_scales() {
        assert_eq!(InternalResolution::Medium.scale(), 0.5);
        assert_eq!(InternalResolution::Full.scale(), 1.0);
    }

    #[test]
    fn segments_threshold_after_sigmoid() {
        let segments = grid(2, 2, |y, x| vec![if x == y { 4.0 } else { -4.0 }]);
        let mask = decode_segments(&segments, 0.5);
        assert_eq!(mask.dimensions(), (2, 2));
        assert_eq!(mask.into_raw(), vec![1, 0, 0, 1]);
    }

    #[test]
    fn part_ids_take_argmax() {
        let logits = grid(1, 2, |_, x| {
            let mut c = vec![0.0; NUM_PARTS];
            c[if x == 0 { 3 } else { 17 }] = 5.0;
            c
        });
        let ids = decode_part_ids(&logits);
        assert_eq!(ids, vec![vec![Some(3), Some(17)]]);
    }

    #[test]
    fn keypoints_apply_stride_and_offsets() {
        let heatmaps = grid(3, 3, |y, x| {
            let mut c = vec![-5.0; 17];
            if (y, x) == (2, 1) {
                c[0] = 5.0;
            }
            c
        });
        let offsets = grid(3, 3, |_, _| {
            let mut c = vec![0.0; 34];
            c[0] = 1.5;
            c[17] = -2.0;
            c
        });
        let pose = decode_keypoints(&heatmaps, &offsets, 16);
        assert_eq!(pose.keypoints.len(), 17);
        let nose = &pose.keypoints[0];
        assert_eq!(nose.part, "nose");
        assert_eq!(nose.x, 14.0);
        assert_eq!(nose.y, 33.5);
        assert!(nose.score > 0.99);
        assert!(pose.score > 0.0 && pose.score < 1.0);
    }

    #[test]
    fn default_file_names_architecture() {
        let opts = ModelOptions {
            architecture: Architecture::ResNet50,
            output_stride: 32,
            quant_bytes: 2,
            repo: "example/repo".into(),
            file: None,
        };
        assert_eq!(
            Architecture::ResNet50.default_file(opts.output_stride, opts.quant_bytes),
            "bodypix-resnet50-stride32-q2.onnx"
        );
    }
}
