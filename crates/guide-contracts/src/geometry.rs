//! Conversions between the model's normalized `[0, 1000]` coordinate space
//! and absolute pixel coordinates.

use serde::{Deserialize, Serialize};

pub const NORMALIZED_MAX: i32 = 1000;

/// `[ymin, xmin, ymax, xmax]`, each a fraction of image height/width x1000.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedBox(pub [i32; 4]);

impl NormalizedBox {
    pub fn new(ymin: i32, xmin: i32, ymax: i32, xmax: i32) -> Self {
        Self([ymin, xmin, ymax, xmax])
    }

    pub fn ymin(&self) -> i32 {
        self.0[0]
    }

    pub fn xmin(&self) -> i32 {
        self.0[1]
    }

    pub fn ymax(&self) -> i32 {
        self.0[2]
    }

    pub fn xmax(&self) -> i32 {
        self.0[3]
    }
}

/// `[y, x]` in the same normalized space as [`NormalizedBox`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedPoint(pub [i32; 2]);

impl NormalizedPoint {
    pub fn new(y: i32, x: i32) -> Self {
        Self([y, x])
    }

    pub fn y(&self) -> i32 {
        self.0[0]
    }

    pub fn x(&self) -> i32 {
        self.0[1]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelBox {
    pub x_min: u32,
    pub y_min: u32,
    pub x_max: u32,
    pub y_max: u32,
}

impl PixelBox {
    pub fn width(&self) -> u32 {
        self.x_max.saturating_sub(self.x_min)
    }

    pub fn height(&self) -> u32 {
        self.y_max.saturating_sub(self.y_min)
    }

    /// Same ordering the model uses for normalized boxes.
    pub fn to_yxyx(&self) -> [u32; 4] {
        [self.y_min, self.x_min, self.y_max, self.x_max]
    }
}

/// Clamps `value` to `[0, 1000]` and scales it onto `size` pixels.
///
/// Rounds half to even so that values landing exactly between two pixels
/// resolve the same way on every axis.
pub fn to_pixels(value: i32, size: u32) -> u32 {
    let normalized = f64::from(value.clamp(0, NORMALIZED_MAX));
    let scaled = (normalized / f64::from(NORMALIZED_MAX)) * f64::from(size);
    scaled.round_ties_even() as u32
}

/// Clamps into `[low, high]`; an inverted range collapses to `low`.
pub fn clamp_range(value: i64, low: i64, high: i64) -> i64 {
    if low > high {
        return low;
    }
    value.clamp(low, high)
}

/// Converts a normalized box into a pixel box that is at least 1x1 and lies
/// within a `width` x `height` image.
pub fn box_to_pixels(bbox: NormalizedBox, width: u32, height: u32) -> PixelBox {
    let w = i64::from(width);
    let h = i64::from(height);

    let y_min = clamp_range(i64::from(to_pixels(bbox.ymin(), height)), 0, (h - 1).max(0));
    let mut y_max = clamp_range(i64::from(to_pixels(bbox.ymax(), height)), 0, h);
    let x_min = clamp_range(i64::from(to_pixels(bbox.xmin(), width)), 0, (w - 1).max(0));
    let mut x_max = clamp_range(i64::from(to_pixels(bbox.xmax(), width)), 0, w);

    if y_max <= y_min {
        y_max = clamp_range(y_min + 1, 0, h);
    }
    if x_max <= x_min {
        x_max = clamp_range(x_min + 1, 0, w);
    }

    PixelBox {
        x_min: x_min as u32,
        y_min: y_min as u32,
        x_max: x_max as u32,
        y_max: y_max as u32,
    }
}

/// Returns `(x, y)` pixel coordinates for a normalized `[y, x]` point.
pub fn point_to_pixels(point: NormalizedPoint, width: u32, height: u32) -> (u32, u32) {
    let y = clamp_range(i64::from(to_pixels(point.y(), height)), 0, i64::from(height));
    let x = clamp_range(i64::from(to_pixels(point.x(), width)), 0, i64::from(width));
    (x as u32, y as u32)
}
