use crate::backend::{MediaBackend, MediaStream, StreamRequest};
use crate::device::{resolve_constraints, CaptureConfig, Platform};
use crate::error::CaptureError;
use image::RgbImage;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

pub const UNSUPPORTED_MESSAGE: &str =
    "this system does not support video capture, or this device does not have a camera";

/// Anything the render loop can pull frames from.
pub trait FrameSource {
    fn frame(&mut self) -> Result<RgbImage, CaptureError>;
}

/// Display dimensions of a started capture.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VideoSource {
    pub width: u32,
    pub height: u32,
}

/// Owns at most one live stream at a time.
#[derive(Default)]
pub struct CaptureSession {
    stream: Option<Box<dyn MediaStream>>,
    source: Option<VideoSource>,
    constraints: Option<CaptureConfig>,
}

impl CaptureSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tears down any existing stream, then acquires a new one for `label`.
    ///
    /// Completes once the stream reports its intrinsic dimensions and playback
    /// has started.
    pub fn start<B: MediaBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        label: Option<&str>,
        platform: &Platform,
    ) -> Result<VideoSource, CaptureError> {
        if !backend.supports_capture() {
            return Err(CaptureError::Unsupported);
        }
        self.stop();

        let video = resolve_constraints(backend, label, platform);
        let request = StreamRequest {
            audio: false,
            video: video.clone(),
        };
        let mut stream = backend.open(&request)?;
        let (width, height) = match stream.wait_for_metadata().and_then(|dims| {
            stream.play()?;
            Ok(dims)
        }) {
            Ok(dims) => dims,
            Err(e) => {
                if let Err(stop) = stream.stop_tracks() {
                    warn!("failed to release stream after error: {stop}");
                }
                return Err(e);
            }
        };
        let source = VideoSource { width, height };
        info!(width, height, ?video, "capture started");
        self.stream = Some(stream);
        self.source = Some(source);
        self.constraints = Some(video);
        Ok(source)
    }

    pub fn stop(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.stop_tracks() {
                warn!("failed to stop capture tracks: {e}");
            }
            debug!("stopped existing capture");
        }
        self.source = None;
        self.constraints = None;
    }

    pub fn is_active(&self) -> bool {
        self.stream.is_some()
    }

    pub fn source(&self) -> Option<VideoSource> {
        self.source
    }

    pub fn constraints(&self) -> Option<&CaptureConfig> {
        self.constraints.as_ref()
    }
}

impl FrameSource for CaptureSession {
    fn frame(&mut self) -> Result<RgbImage, CaptureError> {
        self.stream.as_mut().ok_or(CaptureError::NoStream)?.frame()
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Starts capture and reports failures with a user-facing message.
pub fn load_video<B: MediaBackend + ?Sized>(
    session: &mut CaptureSession,
    backend: &mut B,
    label: Option<&str>,
    platform: &Platform,
) -> Result<VideoSource, CaptureError> {
    session.start(backend, label, platform).map_err(|e| {
        error!(error = %e, "{UNSUPPORTED_MESSAGE}");
        e
    })
}

/// A decoded image served as every frame.
pub struct StillImage {
    path: PathBuf,
    image: RgbImage,
}

impl StillImage {
    pub fn open(path: &Path) -> Result<Self, CaptureError> {
        let image = image::open(path)
            .map_err(|source| CaptureError::Image {
                path: path.to_path_buf(),
                source,
            })?
            .into_rgb8();
        debug!(path = %path.display(), width = image.width(), height = image.height(), "loaded still image");
        Ok(Self {
            path: path.to_path_buf(),
            image,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FrameSource for StillImage {
    fn frame(&mut self) -> Result<RgbImage, CaptureError> {
        Ok(self.image.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn still_image_serves_same_frame() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("frame.png");
        RgbImage::from_pixel(4, 3, image::Rgb([10, 20, 30]))
            .save(&path)
            .unwrap();

        let mut still = StillImage::open(&path).unwrap();
        let a = still.frame().unwrap();
        let b = still.frame().unwrap();
        assert_eq!(a.dimensions(), (4, 3));
        assert_eq!(a, b);
        assert_eq!(still.path(), path.as_path());
    }

    #[test]
    fn still_image_missing_file_errors() {
        let dir = tempdir().unwrap();
        let result = StillImage::open(&dir.path().join("missing.png"));
        assert!(matches!(result, Err(CaptureError::Image { .. })));
    }

    #[test]
    fn idle_session_has_no_frames() {
        let mut session = CaptureSession::new();
        assert!(!session.is_active());
        assert!(matches!(session.frame(), Err(CaptureError::NoStream)));
    }
}
