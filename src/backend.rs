use crate::device::{facing_mode, CaptureConfig, FacingMode, VideoInput};
use crate::error::CaptureError;
use image::RgbImage;
use nokhwa::{
    pixel_format::RgbFormat,
    utils::{ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType},
    Camera, NokhwaError,
};
use tracing::{debug, warn};

/// Constraints handed to [`MediaBackend::open`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamRequest {
    pub audio: bool,
    pub video: CaptureConfig,
}

/// A live media stream owned by a capture session.
pub trait MediaStream {
    /// Blocks until the intrinsic frame size is known.
    fn wait_for_metadata(&mut self) -> Result<(u32, u32), CaptureError>;
    fn play(&mut self) -> Result<(), CaptureError>;
    fn frame(&mut self) -> Result<RgbImage, CaptureError>;
    /// Stops every track of the stream, releasing the device.
    fn stop_tracks(&mut self) -> Result<(), CaptureError>;
}

pub trait MediaBackend {
    /// Whether streams can be acquired at all.
    fn supports_capture(&self) -> bool {
        true
    }
    fn enumerate_devices(&mut self) -> Result<Vec<VideoInput>, CaptureError>;
    fn open(&mut self, request: &StreamRequest) -> Result<Box<dyn MediaStream>, CaptureError>;
}

pub struct NokhwaBackend {
    api: ApiBackend,
}

impl Default for NokhwaBackend {
    fn default() -> Self {
        Self {
            api: ApiBackend::Auto,
        }
    }
}

impl NokhwaBackend {
    fn camera_index(&mut self, video: &CaptureConfig) -> CameraIndex {
        if let Some(id) = &video.device_id {
            return match id.parse::<u32>() {
                Ok(i) => CameraIndex::Index(i),
                Err(_) => CameraIndex::String(id.clone()),
            };
        }
        // Native backends have no facing hint; pick a rear camera by label.
        if video.facing_mode == Some(FacingMode::Environment) {
            let found = self
                .enumerate_devices()
                .unwrap_or_default()
                .into_iter()
                .find(|input| facing_mode(&input.label) == FacingMode::Environment);
            if let Some(input) = found {
                debug!(label = %input.label, "selected camera by facing mode");
                return match input.device_id.parse::<u32>() {
                    Ok(i) => CameraIndex::Index(i),
                    Err(_) => CameraIndex::String(input.device_id),
                };
            }
        }
        CameraIndex::Index(0)
    }
}

impl MediaBackend for NokhwaBackend {
    fn enumerate_devices(&mut self) -> Result<Vec<VideoInput>, CaptureError> {
        let cameras = nokhwa::query(self.api).map_err(|e| match e {
            NokhwaError::UnsupportedOperationError(_) => CaptureError::EnumerationUnsupported,
            other => CaptureError::Camera(other),
        })?;
        Ok(cameras
            .into_iter()
            .map(|info| VideoInput {
                device_id: info.index().as_string(),
                label: info.human_name(),
            })
            .collect())
    }

    fn open(&mut self, request: &StreamRequest) -> Result<Box<dyn MediaStream>, CaptureError> {
        if request.audio {
            warn!("audio capture requested but not supported, ignoring");
        }
        let index = self.camera_index(&request.video);
        let mut camera = None;
        for (w, h) in [(1280, 720), (640, 480)] {
            for fmt in [FrameFormat::RAWRGB, FrameFormat::MJPEG, FrameFormat::YUYV] {
                let req = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(
                    CameraFormat::new_from(w, h, fmt, 30),
                ));
                if let Ok(c) = Camera::new(index.clone(), req) {
                    camera = Some(c);
                    break;
                }
            }
            if camera.is_some() {
                break;
            }
        }
        let camera = match camera {
            Some(c) => c,
            None => Camera::new(
                index,
                RequestedFormat::new::<RgbFormat>(RequestedFormatType::None),
            )?,
        };
        debug!(format = ?camera.camera_format(), "camera acquired");
        Ok(Box::new(NokhwaStream { camera }))
    }
}

struct NokhwaStream {
    camera: Camera,
}

impl MediaStream for NokhwaStream {
    fn wait_for_metadata(&mut self) -> Result<(u32, u32), CaptureError> {
        let resolution = self.camera.resolution();
        Ok((resolution.width(), resolution.height()))
    }

    fn play(&mut self) -> Result<(), CaptureError> {
        if !self.camera.is_stream_open() {
            self.camera.open_stream()?;
        }
        Ok(())
    }

    fn frame(&mut self) -> Result<RgbImage, CaptureError> {
        let buffer = self.camera.frame()?;
        Ok(buffer.decode_image::<RgbFormat>()?)
    }

    fn stop_tracks(&mut self) -> Result<(), CaptureError> {
        if self.camera.is_stream_open() {
            self.camera.stop_stream()?;
        }
        Ok(())
    }
}

impl Drop for NokhwaStream {
    fn drop(&mut self) {
        if let Err(e) = self.stop_tracks() {
            warn!("failed to stop camera during drop: {e}");
        }
    }
}
