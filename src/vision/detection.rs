//! Text detection with a DBNet model
//!
//! Runs the detection model on the intensity image and turns its
//! per-pixel text probability map into oriented quadrilaterals.

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType};
use imageproc::geometry::min_area_rect;
use imageproc::point::Point;
use std::time::Instant;
use tracing::debug;

use super::models::OnnxSession;
use super::tensor::{gray_to_nchw, round_to_32, DET_MEAN, DET_STD};
use crate::config::{DetectionConfig, LimitType};
use crate::error::{OcrError, OcrResult};

/// Four corners, clockwise from top-left
pub type Quad = [(f32, f32); 4];

/// Boxes whose short side is below this many pixels are noise
const MIN_BOX_SIDE: f32 = 3.0;

/// Boxes whose top edges differ by less than this are on the same line
const SAME_LINE_TOLERANCE: f32 = 10.0;

/// Text probability map produced by the detection model
#[derive(Debug, Clone)]
pub struct ProbabilityMap {
    pub width: u32,
    pub height: u32,
    data: Vec<f32>,
}

impl ProbabilityMap {
    pub fn new(width: u32, height: u32, data: Vec<f32>) -> Option<Self> {
        (data.len() == (width as usize) * (height as usize)).then_some(Self { width, height, data })
    }

    fn get(&self, x: u32, y: u32) -> f32 {
        self.data[(y * self.width + x) as usize]
    }

    fn binarize(&self, threshold: f32) -> GrayImage {
        GrayImage::from_fn(self.width, self.height, |x, y| {
            Luma([if self.get(x, y) > threshold { 255 } else { 0 }])
        })
    }
}

/// Model input size: the side-length rule, then the hard cap, then each
/// side rounded to a multiple of 32
fn detection_input_size(width: u32, height: u32, config: &DetectionConfig) -> (u32, u32) {
    let (w, h) = (width as f32, height as f32);
    let limit = config.limit_side_len as f32;

    let mut ratio = match config.limit_type {
        LimitType::Min if w.min(h) < limit => limit / w.min(h),
        LimitType::Max if w.max(h) > limit => limit / w.max(h),
        _ => 1.0,
    };

    let cap = config.max_side_limit as f32;
    if w.max(h) * ratio > cap {
        ratio = cap / w.max(h);
    }

    (round_to_32(w * ratio), round_to_32(h * ratio))
}

/// DBNet text detector
pub struct TextDetector {
    session: OnnxSession,
    config: DetectionConfig,
}

impl TextDetector {
    pub fn new(session: OnnxSession, config: DetectionConfig) -> Self {
        Self { session, config }
    }

    /// Detect text boxes, in `image` coordinates, sorted in reading order
    pub fn detect(&mut self, image: &GrayImage) -> OcrResult<Vec<Quad>> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Ok(vec![]);
        }

        let start = Instant::now();

        let (resize_w, resize_h) = detection_input_size(width, height, &self.config);

        let resized = imageops::resize(image, resize_w, resize_h, FilterType::Triangle);
        let input = gray_to_nchw(&resized, resize_w, &DET_MEAN, &DET_STD);
        let output = self.session.run(input)?;

        let shape = output.shape().to_vec();
        if shape.len() != 4 || shape[0] != 1 || shape[1] != 1 {
            return Err(OcrError::InvalidOutput {
                model: self.session.name(),
                reason: format!("expected [1, 1, H, W], got {:?}", shape),
            });
        }

        let map = ProbabilityMap::new(
            shape[3] as u32,
            shape[2] as u32,
            output.iter().copied().collect(),
        )
        .ok_or_else(|| OcrError::InvalidOutput {
            model: self.session.name(),
            reason: "probability map size mismatch".to_string(),
        })?;

        let mut boxes = boxes_from_map(&map, &self.config, width, height);
        sort_boxes(&mut boxes);

        debug!(
            "Detection on {}x{} (model input {}x{}) found {} boxes in {:?}",
            width,
            height,
            resize_w,
            resize_h,
            boxes.len(),
            start.elapsed()
        );

        Ok(boxes)
    }
}

/// Extract boxes from a probability map and scale them to `dest_w` x `dest_h`
pub fn boxes_from_map(
    map: &ProbabilityMap,
    config: &DetectionConfig,
    dest_w: u32,
    dest_h: u32,
) -> Vec<Quad> {
    let mask = map.binarize(config.threshold);
    let scale_x = dest_w as f32 / map.width as f32;
    let scale_y = dest_h as f32 / map.height as f32;

    find_contours::<i32>(&mask)
        .into_iter()
        .filter(|contour| contour.border_type == BorderType::Outer)
        .take(config.max_candidates)
        .filter_map(|contour| {
            if contour.points.len() < 4 || is_axis_degenerate(&contour.points) {
                return None;
            }

            let rect = to_quad(min_area_rect(&contour.points));
            if short_side(&rect) < MIN_BOX_SIDE {
                return None;
            }

            if box_score(map, &rect) < config.box_threshold {
                return None;
            }

            let expanded = unclip(&rect, config.unclip_ratio);
            if short_side(&expanded) < MIN_BOX_SIDE + 2.0 {
                return None;
            }

            let scaled = expanded.map(|(x, y)| {
                (
                    (x * scale_x).clamp(0.0, dest_w as f32),
                    (y * scale_y).clamp(0.0, dest_h as f32),
                )
            });
            Some(order_clockwise(scaled))
        })
        .collect()
}

/// All points on one row or one column
fn is_axis_degenerate(points: &[Point<i32>]) -> bool {
    let first = points[0];
    points.iter().all(|p| p.x == first.x) || points.iter().all(|p| p.y == first.y)
}

fn to_quad(points: [Point<i32>; 4]) -> Quad {
    points.map(|p| (p.x as f32, p.y as f32))
}

fn distance(a: (f32, f32), b: (f32, f32)) -> f32 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

fn short_side(quad: &Quad) -> f32 {
    distance(quad[0], quad[1]).min(distance(quad[1], quad[2]))
}

/// Mean probability of the map pixels inside the quad
fn box_score(map: &ProbabilityMap, quad: &Quad) -> f32 {
    let min_x = quad.iter().map(|p| p.0).fold(f32::INFINITY, f32::min).floor().max(0.0) as u32;
    let min_y = quad.iter().map(|p| p.1).fold(f32::INFINITY, f32::min).floor().max(0.0) as u32;
    let max_x = (quad.iter().map(|p| p.0).fold(f32::NEG_INFINITY, f32::max).ceil() as u32)
        .min(map.width.saturating_sub(1));
    let max_y = (quad.iter().map(|p| p.1).fold(f32::NEG_INFINITY, f32::max).ceil() as u32)
        .min(map.height.saturating_sub(1));

    let mut sum = 0.0f64;
    let mut count = 0u64;
    for y in min_y..=max_y {
        for x in min_x..=max_x {
            if contains(quad, (x as f32, y as f32)) {
                sum += map.get(x, y) as f64;
                count += 1;
            }
        }
    }

    if count == 0 {
        0.0
    } else {
        (sum / count as f64) as f32
    }
}

/// Point-in-convex-quad test, boundary inclusive, either winding
fn contains(quad: &Quad, p: (f32, f32)) -> bool {
    let mut sign = 0.0f32;
    for i in 0..4 {
        let a = quad[i];
        let b = quad[(i + 1) % 4];
        let cross = (b.0 - a.0) * (p.1 - a.1) - (b.1 - a.1) * (p.0 - a.0);
        if cross.abs() < 1e-6 {
            continue;
        }
        if sign == 0.0 {
            sign = cross.signum();
        } else if cross.signum() != sign {
            return false;
        }
    }
    true
}

/// Grow a rectangle on every side by `area * ratio / perimeter`
fn unclip(rect: &Quad, ratio: f32) -> Quad {
    let width = distance(rect[0], rect[1]);
    let height = distance(rect[0], rect[3]);
    if width == 0.0 || height == 0.0 {
        return *rect;
    }

    let offset = width * height * ratio / (2.0 * (width + height));
    let center = (
        rect.iter().map(|p| p.0).sum::<f32>() / 4.0,
        rect.iter().map(|p| p.1).sum::<f32>() / 4.0,
    );
    let u = ((rect[1].0 - rect[0].0) / width, (rect[1].1 - rect[0].1) / width);
    let v = ((rect[3].0 - rect[0].0) / height, (rect[3].1 - rect[0].1) / height);
    let hw = width / 2.0 + offset;
    let hh = height / 2.0 + offset;

    let corner = |su: f32, sv: f32| {
        (
            center.0 + su * hw * u.0 + sv * hh * v.0,
            center.1 + su * hw * u.1 + sv * hh * v.1,
        )
    };
    [corner(-1.0, -1.0), corner(1.0, -1.0), corner(1.0, 1.0), corner(-1.0, 1.0)]
}

/// Order corners as top-left, top-right, bottom-right, bottom-left
fn order_clockwise(mut quad: Quad) -> Quad {
    quad.sort_by(|a, b| a.0.total_cmp(&b.0));
    let (left, right) = quad.split_at_mut(2);
    left.sort_by(|a, b| a.1.total_cmp(&b.1));
    right.sort_by(|a, b| a.1.total_cmp(&b.1));
    [left[0], right[0], right[1], left[1]]
}

/// Sort top-to-bottom, then left-to-right within a line
pub fn sort_boxes(boxes: &mut [Quad]) {
    boxes.sort_by(|a, b| a[0].1.total_cmp(&b[0].1).then(a[0].0.total_cmp(&b[0].0)));

    for i in 0..boxes.len().saturating_sub(1) {
        for j in (0..=i).rev() {
            let (upper, lower) = (boxes[j][0], boxes[j + 1][0]);
            if (lower.1 - upper.1).abs() < SAME_LINE_TOLERANCE && lower.0 < upper.0 {
                boxes.swap(j, j + 1);
            } else {
                break;
            }
        }
    }
}
