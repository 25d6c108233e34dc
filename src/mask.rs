//! Turns model output into drawable masks and composites them over frames.

use crate::model::{PartSegmentation, PersonSegmentation, Pose};
use image::{imageops, imageops::FilterType, GrayImage, Luma, Rgba, RgbaImage, RgbImage};
use serde::{Deserialize, Serialize};

/// Cell width used when pixelating part masks.
pub const PIXEL_CELL_WIDTH: u32 = 10;

const KEYPOINT_COLOR: Rgba<u8> = Rgba([0, 255, 255, 255]);
const KEYPOINT_RADIUS: i64 = 3;

pub const RAINBOW: [[u8; 3]; 24] = [
    [110, 64, 170],
    [106, 72, 183],
    [100, 81, 196],
    [92, 91, 206],
    [84, 101, 214],
    [75, 113, 221],
    [66, 125, 224],
    [56, 138, 226],
    [48, 150, 224],
    [40, 163, 220],
    [33, 176, 214],
    [29, 188, 205],
    [26, 199, 194],
    [26, 210, 182],
    [28, 219, 169],
    [33, 227, 155],
    [41, 234, 141],
    [51, 240, 128],
    [64, 243, 116],
    [79, 246, 105],
    [96, 247, 97],
    [115, 246, 91],
    [134, 245, 88],
    [155, 243, 88],
];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorScale {
    #[default]
    Rainbow,
}

impl ColorScale {
    pub fn colors(self) -> &'static [[u8; 3]] {
        match self {
            ColorScale::Rainbow => &RAINBOW,
        }
    }
}

/// Opaque black over the background (or the person when
/// `mask_background` is false), transparent elsewhere.
pub fn to_mask_image(segmentation: &PersonSegmentation, mask_background: bool) -> RgbaImage {
    RgbaImage::from_fn(segmentation.width, segmentation.height, |x, y| {
        let idx = (y * segmentation.width + x) as usize;
        let foreground = segmentation.data.get(idx).copied().unwrap_or(0) != 0;
        if foreground != mask_background {
            Rgba([0, 0, 0, 255])
        } else {
            Rgba([0, 0, 0, 0])
        }
    })
}

/// Colors each body part from `colors`; background pixels are opaque white.
pub fn to_colored_part_mask(parts: &PartSegmentation, colors: &[[u8; 3]]) -> RgbaImage {
    RgbaImage::from_fn(parts.width, parts.height, |x, y| {
        let idx = (y * parts.width + x) as usize;
        match parts.data.get(idx).copied().unwrap_or(-1) {
            id if id >= 0 && (id as usize) < colors.len() => {
                let [r, g, b] = colors[id as usize];
                Rgba([r, g, b, 255])
            }
            _ => Rgba([255, 255, 255, 255]),
        }
    })
}

pub fn pixelate(mask: &RgbaImage, cell: u32) -> RgbaImage {
    let (w, h) = mask.dimensions();
    if cell <= 1 || w == 0 || h == 0 {
        return mask.clone();
    }
    let small = imageops::resize(mask, w.div_ceil(cell), h.div_ceil(cell), FilterType::Nearest);
    imageops::resize(&small, w, h, FilterType::Nearest)
}

fn fit(mask: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    if mask.dimensions() == (width, height) {
        mask.clone()
    } else {
        imageops::resize(mask, width, height, FilterType::Nearest)
    }
}

/// Draws `mask` over `frame` at `opacity`, optionally blurring the mask and
/// mirroring the result.
pub fn draw_mask(
    frame: &RgbImage,
    mask: &RgbaImage,
    opacity: f32,
    mask_blur_amount: f32,
    flip_horizontal: bool,
) -> RgbaImage {
    let (width, height) = frame.dimensions();
    let mut canvas = image::DynamicImage::ImageRgb8(frame.clone()).into_rgba8();
    let mut mask = fit(mask, width, height);
    if mask_blur_amount > 0.0 {
        mask = imageops::blur(&mask, mask_blur_amount);
    }
    let opacity = opacity.clamp(0.0, 1.0);
    for pixel in mask.pixels_mut() {
        pixel[3] = (pixel[3] as f32 * opacity).round() as u8;
    }
    imageops::overlay(&mut canvas, &mask, 0, 0);
    if flip_horizontal {
        imageops::flip_horizontal_in_place(&mut canvas);
    }
    canvas
}

/// Blurs the background while keeping the person sharp.
pub fn draw_bokeh_effect(
    frame: &RgbImage,
    segmentation: &PersonSegmentation,
    background_blur_amount: f32,
    edge_blur_amount: f32,
    flip_horizontal: bool,
) -> RgbaImage {
    let (width, height) = frame.dimensions();
    let rgba = image::DynamicImage::ImageRgb8(frame.clone()).into_rgba8();
    let mut canvas = if background_blur_amount > 0.0 {
        imageops::blur(&rgba, background_blur_amount)
    } else {
        rgba.clone()
    };

    let mut alpha = GrayImage::from_fn(segmentation.width, segmentation.height, |x, y| {
        let idx = (y * segmentation.width + x) as usize;
        Luma([if segmentation.data.get(idx).copied().unwrap_or(0) != 0 { 255 } else { 0 }])
    });
    if alpha.dimensions() != (width, height) {
        alpha = imageops::resize(&alpha, width, height, FilterType::Nearest);
    }
    if edge_blur_amount > 0.0 {
        alpha = imageops::blur(&alpha, edge_blur_amount);
    }

    let mut person = rgba;
    for (pixel, a) in person.pixels_mut().zip(alpha.pixels()) {
        pixel[3] = a[0];
    }
    imageops::overlay(&mut canvas, &person, 0, 0);
    if flip_horizontal {
        imageops::flip_horizontal_in_place(&mut canvas);
    }
    canvas
}

/// Marks keypoints scoring at least `min_score` on top of the frame.
pub fn draw_keypoints(frame: &RgbImage, pose: &Pose, min_score: f32, flip_horizontal: bool) -> RgbaImage {
    let mut canvas = image::DynamicImage::ImageRgb8(frame.clone()).into_rgba8();
    let (w, h) = (canvas.width() as i64, canvas.height() as i64);
    for kp in pose.keypoints.iter().filter(|k| k.score >= min_score) {
        let (cx, cy) = (kp.x.round() as i64, kp.y.round() as i64);
        for dy in -KEYPOINT_RADIUS..=KEYPOINT_RADIUS {
            for dx in -KEYPOINT_RADIUS..=KEYPOINT_RADIUS {
                let (x, y) = (cx + dx, cy + dy);
                if dx * dx + dy * dy <= KEYPOINT_RADIUS * KEYPOINT_RADIUS
                    && (0..w).contains(&x)
                    && (0..h).contains(&y)
                {
                    canvas.put_pixel(x as u32, y as u32, KEYPOINT_COLOR);
                }
            }
        }
    }
    if flip_horizontal {
        imageops::flip_horizontal_in_place(&mut canvas);
    }
    canvas
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Keypoint;
    use image::Rgb;

    fn person(width: u32, height: u32, fg: &[(u32, u32)]) -> PersonSegmentation {
        let mut data = vec![0u8; (width * height) as usize];
        for &(x, y) in fg {
            data[(y * width + x) as usize] = 1;
        }
        PersonSegmentation { width, height, data }
    }

    #[test]
    fn mask_image_hides_background() {
        let seg = person(2, 1, &[(0, 0)]);
        let mask = to_mask_image(&seg, true);
        assert_eq!(mask.get_pixel(0, 0)[3], 0);
        assert_eq!(mask.get_pixel(1, 0)[3], 255);

        let inverted = to_mask_image(&seg, false);
        assert_eq!(inverted.get_pixel(0, 0)[3], 255);
        assert_eq!(inverted.get_pixel(1, 0)[3], 0);
    }

    #[test]
    fn part_mask_uses_color_table() {
        let parts = PartSegmentation {
            width: 3,
            height: 1,
            data: vec![-1, 0, 23],
        };
        let mask = to_colored_part_mask(&parts, ColorScale::Rainbow.colors());
        assert_eq!(*mask.get_pixel(0, 0), Rgba([255, 255, 255, 255]));
        assert_eq!(*mask.get_pixel(1, 0), Rgba([110, 64, 170, 255]));
        assert_eq!(*mask.get_pixel(2, 0), Rgba([155, 243, 88, 255]));
    }

    #[test]
    fn zero_opacity_keeps_frame() {
        let frame = RgbImage::from_pixel(3, 2, Rgb([40, 80, 120]));
        let mask = RgbaImage::from_pixel(3, 2, Rgba([255, 0, 0, 255]));
        let out = draw_mask(&frame, &mask, 0.0, 0.0, false);
        assert!(out.pixels().all(|p| *p == Rgba([40, 80, 120, 255])));
    }

    #[test]
    fn full_opacity_replaces_frame() {
        let frame = RgbImage::from_pixel(2, 2, Rgb([40, 80, 120]));
        let mask = RgbaImage::from_pixel(2, 2, Rgba([255, 0, 0, 255]));
        let out = draw_mask(&frame, &mask, 1.0, 0.0, false);
        assert!(out.pixels().all(|p| *p == Rgba([255, 0, 0, 255])));
    }

    #[test]
    fn draw_mask_mirrors_when_flipped() {
        let mut frame = RgbImage::new(2, 1);
        frame.put_pixel(0, 0, Rgb([255, 255, 255]));
        let mask = RgbaImage::new(2, 1);
        let out = draw_mask(&frame, &mask, 0.7, 0.0, true);
        assert_eq!(*out.get_pixel(1, 0), Rgba([255, 255, 255, 255]));
        assert_eq!(*out.get_pixel(0, 0), Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn draw_mask_resizes_smaller_masks() {
        let frame = RgbImage::new(8, 8);
        let mask = RgbaImage::from_pixel(2, 2, Rgba([0, 255, 0, 255]));
        let out = draw_mask(&frame, &mask, 1.0, 0.0, false);
        assert_eq!(out.dimensions(), (8, 8));
        assert_eq!(*out.get_pixel(7, 7), Rgba([0, 255, 0, 255]));
    }

    #[test]
    fn pixelate_keeps_dimensions() {
        let mut mask = RgbaImage::new(25, 12);
        mask.put_pixel(3, 3, Rgba([1, 2, 3, 255]));
        let out = pixelate(&mask, PIXEL_CELL_WIDTH);
        assert_eq!(out.dimensions(), (25, 12));
        assert_eq!(pixelate(&mask, 1), mask);
    }

    #[test]
    fn bokeh_keeps_person_sharp() {
        let mut frame = RgbImage::from_pixel(9, 9, Rgb([0, 0, 0]));
        frame.put_pixel(4, 4, Rgb([255, 255, 255]));
        let seg = person(9, 9, &[(4, 4)]);
        let out = draw_bokeh_effect(&frame, &seg, 3.0, 0.0, false);
        assert_eq!(*out.get_pixel(4, 4), Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn keypoints_below_threshold_are_skipped() {
        let frame = RgbImage::new(20, 20);
        let pose = Pose {
            score: 0.5,
            keypoints: vec![
                Keypoint { part: "nose", x: 5.0, y: 5.0, score: 0.9 },
                Keypoint { part: "leftEye", x: 15.0, y: 15.0, score: 0.1 },
            ],
        };
        let out = draw_keypoints(&frame, &pose, 0.3, false);
        assert_eq!(*out.get_pixel(5, 5), KEYPOINT_COLOR);
        assert_eq!(*out.get_pixel(15, 15), Rgba([0, 0, 0, 255]));
    }
}
