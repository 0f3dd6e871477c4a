//! Text effects.
//!
//! An effect is planned once into a list of [`PaintOp`]s and then replayed on
//! a back-end through [`EffectSurface`]. Offsets are in a y-up visual frame
//! relative to the base text position; dots are relative to the text box
//! center. Surfaces with a y-down device space negate `dy` themselves.

use crate::error::BatchmarkError;
use crate::types::Rgb8;
use crate::watermark::{Effect, EffectParams};
use rand::Rng;

const OUTLINE_DARKEN: i16 = -50;
const EMBOSS_SHIFT: i16 = 100;
const EMBOSS_OFFSET: f32 = 2.0;

/// Which alpha domain and texture layout a plan targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Integer alpha in 0..=255, derived values truncated.
    Raster,
    /// Fractional alpha in 0..=1.
    Vector,
}

impl Backend {
    pub fn base_alpha(self, opacity: f32) -> f32 {
        let opacity = opacity.clamp(0.0, 1.0);
        match self {
            Backend::Raster => (opacity * 255.0).floor(),
            Backend::Vector => opacity,
        }
    }

    fn derive(self, alpha: f32, factor: f32) -> f32 {
        match self {
            Backend::Raster => (alpha * factor).floor(),
            Backend::Vector => alpha * factor,
        }
    }

    /// `(dot count, spread, dot radius)` for the texture effect.
    pub fn texture_layout(self, pattern_density: u32) -> (u32, f32, f32) {
        match self {
            Backend::Raster => {
                let size = (pattern_density / 3).max(1) as f32;
                (pattern_density.saturating_mul(10), 80.0, size / 2.0)
            }
            Backend::Vector => (pattern_density, 20.0, 1.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PaintOp {
    Text {
        dx: f32,
        dy: f32,
        color: Rgb8,
        alpha: f32,
    },
    Dot {
        dx: f32,
        dy: f32,
        radius: f32,
        color: Rgb8,
        alpha: f32,
    },
}

impl PaintOp {
    pub fn alpha(&self) -> f32 {
        match self {
            PaintOp::Text { alpha, .. } | PaintOp::Dot { alpha, .. } => *alpha,
        }
    }
}

pub trait EffectSurface {
    fn draw_text(&mut self, dx: f32, dy: f32, color: Rgb8, alpha: f32) -> Result<(), BatchmarkError>;

    fn fill_dot(
        &mut self,
        dx: f32,
        dy: f32,
        radius: f32,
        color: Rgb8,
        alpha: f32,
    ) -> Result<(), BatchmarkError>;
}

pub fn plan_effect<R: Rng + ?Sized>(
    effect: Effect,
    params: &EffectParams,
    color: Rgb8,
    opacity: f32,
    backend: Backend,
    rng: &mut R,
) -> Vec<PaintOp> {
    let alpha = backend.base_alpha(opacity);
    let intensity = params.intensity.min(100) as f32 / 100.0;
    let base = PaintOp::Text {
        dx: 0.0,
        dy: 0.0,
        color,
        alpha,
    };
    let mut ops = Vec::new();

    match effect {
        Effect::None => ops.push(base),
        Effect::Outline => {
            let ring_color = color.shifted(OUTLINE_DARKEN);
            let ring_alpha = backend.derive(alpha, intensity);
            for k in (1..=params.outline_width).rev() {
                let k = k as f32;
                let ring = [
                    (k, k),
                    (k, -k),
                    (-k, k),
                    (-k, -k),
                    (k, 0.0),
                    (-k, 0.0),
                    (0.0, k),
                    (0.0, -k),
                ];
                ops.extend(ring.iter().map(|&(dx, dy)| PaintOp::Text {
                    dx,
                    dy,
                    color: ring_color,
                    alpha: ring_alpha,
                }));
            }
            ops.push(base);
        }
        Effect::Shadow => {
            let off = params.shadow_offset as f32;
            ops.push(PaintOp::Text {
                dx: off,
                dy: -off,
                color: Rgb8::BLACK,
                alpha: backend.derive(alpha, 0.5 * intensity),
            });
            ops.push(base);
        }
        Effect::Emboss => {
            let effect_alpha = backend.derive(alpha, intensity);
            ops.push(PaintOp::Text {
                dx: -EMBOSS_OFFSET,
                dy: EMBOSS_OFFSET,
                color: color.shifted(EMBOSS_SHIFT),
                alpha: effect_alpha,
            });
            ops.push(PaintOp::Text {
                dx: EMBOSS_OFFSET,
                dy: -EMBOSS_OFFSET,
                color: color.shifted(-EMBOSS_SHIFT),
                alpha: effect_alpha,
            });
            ops.push(base);
        }
        Effect::Texture => {
            ops.push(base);
            let (count, spread, radius) = backend.texture_layout(params.pattern_density);
            let dot_alpha = backend.derive(alpha, 0.7 * intensity);
            for _ in 0..count {
                ops.push(PaintOp::Dot {
                    dx: rng.gen_range(-spread..=spread),
                    dy: rng.gen_range(-spread..=spread),
                    radius,
                    color,
                    alpha: dot_alpha,
                });
            }
        }
    }
    ops
}

/// Replays `ops` in order on `surface`.
pub fn paint(ops: &[PaintOp], surface: &mut dyn EffectSurface) -> Result<(), BatchmarkError> {
    for op in ops {
        match *op {
            PaintOp::Text {
                dx,
                dy,
                color,
                alpha,
            } => surface.draw_text(dx, dy, color, alpha)?,
            PaintOp::Dot {
                dx,
                dy,
                radius,
                color,
                alpha,
            } => surface.fill_dot(dx, dy, radius, color, alpha)?,
        }
    }
    Ok(())
}
