use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    /// The platform exposes no way to acquire a video stream at all.
    #[error("video capture is not available on this platform")]
    Unsupported,
    #[error("device enumeration is not supported")]
    EnumerationUnsupported,
    #[error("no active capture stream")]
    NoStream,
    #[error("camera error: {0}")]
    Camera(#[from] nokhwa::NokhwaError),
    #[error("stream error: {0}")]
    Stream(String),
    #[error("failed to load image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("failed to download model: {0}")]
    Download(#[from] hf_hub::api::sync::ApiError),
    #[error(transparent)]
    Candle(#[from] candle_core::Error),
    #[error("model graph missing")]
    MissingGraph,
    #[error("model output {0} missing")]
    MissingOutput(&'static str),
    #[error("unexpected output shape {dims:?} for {name}")]
    Shape { name: &'static str, dims: Vec<usize> },
    #[error("no model loaded")]
    NotLoaded,
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("failed to write frame to {path}: {source}")]
    Canvas {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Image(#[from] image::ImageError),
}
