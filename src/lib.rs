mod batch;
mod color;
mod compose;
mod effect;
mod error;
mod font;
mod logging;
mod mail;
mod metrics;
mod placement;
mod raster;
mod recipients;
mod render;
mod settings;
mod types;
mod vector;
mod watermark;

pub use batch::{
    BatchConfig, BatchEvent, BatchHandle, BatchPlan, BatchReport, BatchRunner, BatchState,
    EmailOutcome, LogLevel, RecipientJob, RenderOutcome, output_filename, output_stem,
    sanitize_filename,
};
pub use color::{FALLBACK_COLOR, ResolvedColor, resolve_color};
pub use effect::{Backend, EffectSurface, PaintOp, paint, plan_effect};
pub use error::BatchmarkError;
pub use font::{
    BUILTIN_FONT_NAME, FontLocator, LoadedFont, SystemFontLocator, WatermarkFont,
    resolve_watermark_font,
};
pub use logging::{LogFormat, init_tracing};
pub use mail::{DEFAULT_BODY, DEFAULT_SUBJECT, Delivery, LogTransport, MailTemplate, MailTransport};
pub use metrics::RenderStats;
pub use placement::{PlacementInstance, TileGrid, plan_placements, tile_grid};
pub use raster::{PageRasterizer, PdftoppmRasterizer, RasterRequest, render_preview, render_rasterized};
pub use recipients::{ParsedEmails, RecipientDirectory, is_valid_email, parse_email_cell};
pub use render::{DocumentRenderer, RenderRequest, Watermarker};
pub use settings::Settings;
pub use types::{Color, PageGeometry, Rgb8, TextExtent};
pub use vector::render_vector;
pub use watermark::{
    CompressionLevel, Effect, EffectParams, MAX_DENSITY, MAX_EFFECT_PARAM, PositionMode,
    RenderOptions, TextTemplate, WatermarkSpec, WatermarkSpecBuilder,
};
