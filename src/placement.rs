//! Watermark placement.
//!
//! Positions are computed in a top-left-origin frame. Each renderer maps
//! them into its own device space; the vector renderer flips the y axis.
//! Both back-ends call [`plan_placements`], so a page of the same size and
//! text extent yields the same instance grid on either path.

use crate::types::{PageGeometry, TextExtent};
use crate::watermark::{MAX_DENSITY, PositionMode};

/// One watermark copy: top-left corner of the unrotated text box and the
/// rotation (degrees, counter-clockwise) to apply about the box center.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlacementInstance {
    pub x: f32,
    pub y: f32,
    pub rotation_degrees: f32,
}

impl PlacementInstance {
    pub fn box_center(&self, extent: TextExtent) -> (f32, f32) {
        (self.x + extent.width / 2.0, self.y + extent.height / 2.0)
    }
}

/// Grid dimensions chosen for tiled placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGrid {
    pub cols: u32,
    pub rows: u32,
}

/// Density is a minimum grid dimension. The spacing floor keeps large text
/// from overlapping while `max(d, ..)` still guarantees a `d x d` grid.
/// Density is clamped to [`MAX_DENSITY`].
pub fn tile_grid(page: PageGeometry, extent: TextExtent, density: u32) -> TileGrid {
    let d = density.clamp(1, MAX_DENSITY);
    let df = d as f32;
    let tw = sanitize(extent.width);
    let th = sanitize(extent.height);
    let x_spacing = (tw * 1.5).max(page.width / df);
    let y_spacing = (th * 1.5).max(page.height / df);
    let cols = fit_count(page.width, x_spacing).max(d);
    let rows = fit_count(page.height, y_spacing).max(d);
    TileGrid { cols, rows }
}

pub fn plan_placements(
    page: PageGeometry,
    extent: TextExtent,
    mode: PositionMode,
    density: u32,
    angle_degrees: f32,
) -> Vec<PlacementInstance> {
    if !(page.width > 0.0 && page.height > 0.0) {
        return Vec::new();
    }
    match mode {
        PositionMode::Center => vec![PlacementInstance {
            x: (page.width - sanitize(extent.width)) / 2.0,
            y: (page.height - sanitize(extent.height)) / 2.0,
            rotation_degrees: angle_degrees,
        }],
        PositionMode::Tile => {
            let grid = tile_grid(page, extent, density);
            let capacity = (grid.cols as usize)
                .checked_mul(grid.rows as usize)
                .unwrap_or(0);
            let mut out = Vec::with_capacity(capacity);
            for i in 0..grid.cols {
                for j in 0..grid.rows {
                    out.push(PlacementInstance {
                        x: i as f32 * page.width / grid.cols as f32,
                        y: j as f32 * page.height / grid.rows as f32,
                        rotation_degrees: angle_degrees,
                    });
                }
            }
            out
        }
    }
}

fn fit_count(length: f32, spacing: f32) -> u32 {
    if spacing <= 0.0 || !spacing.is_finite() {
        return 1;
    }
    ((length / spacing).floor() as u32).saturating_add(1)
}

fn sanitize(value: f32) -> f32 {
    if value.is_finite() { value.max(0.0) } else { 0.0 }
}
