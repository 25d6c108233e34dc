use crate::error::RenderError;
use image::{ImageFormat, RgbaImage};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::trace;

pub trait Canvas {
    fn draw(&mut self, image: &RgbaImage) -> Result<(), RenderError>;
}

/// Default location of the rendered frame, overridable with `SEGCAM_OUTPUT`.
pub fn output_path() -> PathBuf {
    std::env::var_os("SEGCAM_OUTPUT")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("segcam.png"))
}

/// Writes every frame to a PNG, replacing the previous one atomically so
/// readers never observe a partial file.
pub struct FileCanvas {
    path: PathBuf,
    staging: PathBuf,
}

impl FileCanvas {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut staging = path.clone().into_os_string();
        staging.push(".tmp");
        Self {
            path,
            staging: PathBuf::from(staging),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Canvas for FileCanvas {
    fn draw(&mut self, image: &RgbaImage) -> Result<(), RenderError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| RenderError::Canvas {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        image.save_with_format(&self.staging, ImageFormat::Png)?;
        fs::rename(&self.staging, &self.path).map_err(|source| RenderError::Canvas {
            path: self.path.clone(),
            source,
        })?;
        trace!(path = %self.path.display(), "frame written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use tempfile::tempdir;

    #[test]
    fn draw_replaces_output() {
        let dir = tempdir().unwrap();
        let mut canvas = FileCanvas::new(dir.path().join("out/frame.png"));
        canvas
            .draw(&RgbaImage::from_pixel(2, 2, Rgba([1, 2, 3, 255])))
            .unwrap();
        canvas
            .draw(&RgbaImage::from_pixel(3, 1, Rgba([9, 9, 9, 255])))
            .unwrap();

        let written = image::open(canvas.path()).unwrap().into_rgba8();
        assert_eq!(written.dimensions(), (3, 1));
        assert!(!dir.path().join("out/frame.png.tmp").exists());
    }
}
