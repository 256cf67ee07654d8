//! Screen geometry and window-relative anchors.
//!
//! Every coordinate handed to the desktop backend is a screen coordinate in
//! logical points. UI landmarks of the target app are stored in config as
//! anchors relative to the window so they survive window moves and resizes.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn offset(self, dx: i32, dy: i32) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }
}

/// Represents the bounds (position and size) of a window or screen region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Bounds {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Bounds {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// A `width` x `height` box centered on `center`.
    pub fn centered(center: Point, width: u32, height: u32) -> Self {
        Self::new(
            center.x - (width / 2) as i32,
            center.y - (height / 2) as i32,
            width,
            height,
        )
    }

    pub fn right(&self) -> i32 {
        self.x + self.width as i32
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height as i32
    }

    pub fn center(&self) -> Point {
        Point::new(
            self.x + (self.width / 2) as i32,
            self.y + (self.height / 2) as i32,
        )
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.x && point.x < self.right() && point.y >= self.y && point.y < self.bottom()
    }

    pub fn intersect(&self, other: &Bounds) -> Option<Bounds> {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right <= left || bottom <= top {
            return None;
        }
        Some(Bounds::new(
            left,
            top,
            (right - left) as u32,
            (bottom - top) as u32,
        ))
    }

    /// Translate a box expressed relative to this region's origin into screen space.
    pub fn to_screen(&self, local: Bounds) -> Bounds {
        Bounds::new(self.x + local.x, self.y + local.y, local.width, local.height)
    }

    /// Horizontal band of `height` centered vertically on `y`, clipped to self.
    pub fn band_around(&self, y: i32, height: u32) -> Option<Bounds> {
        let band = Bounds::new(self.x, y - (height / 2) as i32, self.width, height);
        self.intersect(&band)
    }
}

/// A point relative to a window: `origin + fraction * size + offset`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Anchor {
    #[serde(default)]
    pub x_fraction: f64,
    #[serde(default)]
    pub y_fraction: f64,
    #[serde(default)]
    pub x_offset: i32,
    #[serde(default)]
    pub y_offset: i32,
}

impl Anchor {
    /// Fixed pixel offset from the window's top-left corner.
    pub const fn pixels(x: i32, y: i32) -> Self {
        Self {
            x_fraction: 0.0,
            y_fraction: 0.0,
            x_offset: x,
            y_offset: y,
        }
    }

    /// Fraction of the window's width and height.
    pub const fn fraction(x: f64, y: f64) -> Self {
        Self {
            x_fraction: x,
            y_fraction: y,
            x_offset: 0,
            y_offset: 0,
        }
    }

    pub fn resolve(&self, window: &Bounds) -> Point {
        Point::new(
            window.x + (window.width as f64 * self.x_fraction) as i32 + self.x_offset,
            window.y + (window.height as f64 * self.y_fraction) as i32 + self.y_offset,
        )
    }
}

/// A fixed-size sampling box around an anchor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Probe {
    pub center: Anchor,
    pub width: u32,
    pub height: u32,
}

impl Probe {
    pub fn resolve(&self, window: &Bounds) -> Bounds {
        Bounds::centered(self.center.resolve(window), self.width, self.height)
    }
}

/// A window sub-region given as fractions of the window, with pixel insets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionSpec {
    pub left: f64,
    pub right: f64,
    pub top: f64,
    pub bottom: f64,
    #[serde(default)]
    pub top_inset: u32,
    #[serde(default)]
    pub bottom_inset: u32,
}

impl RegionSpec {
    pub fn resolve(&self, window: &Bounds) -> Bounds {
        let w = window.width as f64;
        let h = window.height as f64;
        let left = window.x + (w * self.left) as i32;
        let right = window.x + (w * self.right) as i32;
        let top = window.y + (h * self.top) as i32 + self.top_inset as i32;
        let bottom = window.y + (h * self.bottom) as i32 - self.bottom_inset as i32;
        Bounds::new(
            left,
            top,
            (right - left).max(0) as u32,
            (bottom - top).max(0) as u32,
        )
    }
}
