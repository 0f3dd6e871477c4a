//! Rasterized output: every page is flattened to a bitmap, watermarked, and
//! re-encoded as a JPEG page. Text in the result is no longer selectable.

use crate::compose;
use crate::effect::{Backend, EffectSurface, paint, plan_effect};
use crate::error::BatchmarkError;
use crate::font::WatermarkFont;
use crate::metrics::RenderStats;
use crate::placement::plan_placements;
use crate::types::{PageGeometry, Rgb8, TextExtent};
use crate::watermark::{RenderOptions, WatermarkSpec};
use image::{ColorType, ImageEncoder};
use rand::Rng;
use std::path::{Path, PathBuf};
use std::process::Command;
use tiny_skia::{FillRule, FilterQuality, Paint, Path as SkPath, PathBuilder, Pixmap, PixmapPaint, Rect, Transform};
use tracing::{debug, info, warn};
use ttf_parser::{GlyphId, OutlineBuilder};

/// Padding around the text inside each per-instance buffer.
const INSTANCE_PAD: f32 = 30.0;

#[derive(Debug, Clone, Copy)]
pub struct RasterRequest<'a> {
    pub source: &'a Path,
    pub dpi: u32,
    pub work_dir: &'a Path,
    pub first_page_only: bool,
}

/// Turns PDF pages into bitmap files. Returned paths are in page order and
/// live inside `work_dir`.
pub trait PageRasterizer: Send + Sync {
    fn rasterize(&self, request: &RasterRequest<'_>) -> Result<Vec<PathBuf>, BatchmarkError>;
}

/// Shells out to poppler's `pdftoppm`.
#[derive(Debug, Clone)]
pub struct PdftoppmRasterizer {
    binary: PathBuf,
}

impl Default for PdftoppmRasterizer {
    fn default() -> Self {
        let binary = std::env::var_os("BATCHMARK_PDFTOPPM")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("pdftoppm"));
        Self { binary }
    }
}

impl PdftoppmRasterizer {
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl PageRasterizer for PdftoppmRasterizer {
    fn rasterize(&self, request: &RasterRequest<'_>) -> Result<Vec<PathBuf>, BatchmarkError> {
        let prefix = request.work_dir.join("page");
        let mut cmd = Command::new(&self.binary);
        cmd.arg("-r").arg(request.dpi.to_string()).arg("-png");
        if request.first_page_only {
            cmd.args(["-f", "1", "-l", "1"]);
        }
        cmd.arg(request.source).arg(&prefix);
        debug!(binary = %self.binary.display(), dpi = request.dpi, "rasterizing pages");

        let output = cmd.output().map_err(|e| {
            BatchmarkError::Raster(format!("failed to run {}: {e}", self.binary.display()))
        })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BatchmarkError::Raster(format!(
                "{} exited with {}: {}",
                self.binary.display(),
                output.status,
                stderr.trim()
            )));
        }
        let pages = collect_page_images(request.work_dir, "page")?;
        if pages.is_empty() {
            return Err(BatchmarkError::Raster(
                "rasterizer produced no pages".to_string(),
            ));
        }
        Ok(pages)
    }
}

/// Finds `{prefix}-N.png` files and orders them by `N`. pdftoppm zero-pads
/// `N` to the width of the page count, so a lexical sort is not enough.
fn collect_page_images(dir: &Path, prefix: &str) -> Result<Vec<PathBuf>, BatchmarkError> {
    let mut numbered: Vec<(u32, PathBuf)> = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(rest) = name.strip_prefix(prefix).and_then(|r| r.strip_prefix('-')) else {
            continue;
        };
        let Some(number) = rest.strip_suffix(".png").and_then(|n| n.parse::<u32>().ok()) else {
            continue;
        };
        numbered.push((number, path));
    }
    numbered.sort_by_key(|(n, _)| *n);
    Ok(numbered.into_iter().map(|(_, p)| p).collect())
}

struct GlyphPathBuilder<'a> {
    builder: &'a mut PathBuilder,
    origin_x: f32,
    origin_y: f32,
    scale: f32,
}

// Font units are y-up; the pixmap is y-down.
impl OutlineBuilder for GlyphPathBuilder<'_> {
    fn move_to(&mut self, x: f32, y: f32) {
        self.builder
            .move_to(self.origin_x + x * self.scale, self.origin_y - y * self.scale);
    }

    fn line_to(&mut self, x: f32, y: f32) {
        self.builder
            .line_to(self.origin_x + x * self.scale, self.origin_y - y * self.scale);
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        self.builder.quad_to(
            self.origin_x + x1 * self.scale,
            self.origin_y - y1 * self.scale,
            self.origin_x + x * self.scale,
            self.origin_y - y * self.scale,
        );
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        self.builder.cubic_to(
            self.origin_x + x1 * self.scale,
            self.origin_y - y1 * self.scale,
            self.origin_x + x2 * self.scale,
            self.origin_y - y2 * self.scale,
            self.origin_x + x * self.scale,
            self.origin_y - y * self.scale,
        );
    }

    fn close(&mut self) {
        self.builder.close();
    }
}

/// Watermark text as a single fill path with its baseline at y = 0.
pub struct TextRun {
    path: Option<SkPath>,
    extent: TextExtent,
    ascent: f32,
}

impl TextRun {
    pub fn build(font: &WatermarkFont, text: &str, font_size: f32) -> Self {
        let shaped = font.shape(text, font_size);
        let mut builder = PathBuilder::new();

        let outlined = match font {
            WatermarkFont::TrueType(loaded) => match ttf_parser::Face::parse(&loaded.data, 0) {
                Ok(face) => {
                    let scale = loaded.scale(font_size);
                    for glyph in &shaped.glyphs {
                        let mut glyph_builder = GlyphPathBuilder {
                            builder: &mut builder,
                            origin_x: glyph.x,
                            origin_y: -glyph.y,
                            scale,
                        };
                        let _ = face.outline_glyph(GlyphId(glyph.glyph_id), &mut glyph_builder);
                    }
                    true
                }
                Err(err) => {
                    warn!(font = %loaded.name, error = %err, "font outlines unavailable");
                    false
                }
            },
            WatermarkFont::Builtin => false,
        };
        if !outlined {
            // One box per character.
            let em = font_size;
            for glyph in &shaped.glyphs {
                if let Some(rect) = Rect::from_xywh(glyph.x + 0.05 * em, -0.7 * em, 0.5 * em, 0.7 * em) {
                    builder.push_rect(rect);
                }
            }
        }

        Self {
            path: builder.finish(),
            extent: TextExtent::new(shaped.width.ceil(), font.line_height(font_size).ceil()),
            ascent: font.ascent(font_size),
        }
    }

    pub fn extent(&self) -> TextExtent {
        self.extent
    }
}

struct InstanceSurface<'a> {
    pixmap: &'a mut Pixmap,
    run: &'a TextRun,
}

fn paint_for(color: Rgb8, alpha: f32) -> Paint<'static> {
    let mut paint = Paint::default();
    let a = alpha.clamp(0.0, 255.0) as u8;
    paint.set_color_rgba8(color.r, color.g, color.b, a);
    paint.anti_alias = true;
    paint
}

impl EffectSurface for InstanceSurface<'_> {
    fn draw_text(&mut self, dx: f32, dy: f32, color: Rgb8, alpha: f32) -> Result<(), BatchmarkError> {
        let Some(path) = self.run.path.as_ref() else {
            return Ok(());
        };
        let transform = Transform::from_translate(
            INSTANCE_PAD + dx,
            INSTANCE_PAD + self.run.ascent - dy,
        );
        self.pixmap
            .fill_path(path, &paint_for(color, alpha), FillRule::Winding, transform, None);
        Ok(())
    }

    fn fill_dot(
        &mut self,
        dx: f32,
        dy: f32,
        radius: f32,
        color: Rgb8,
        alpha: f32,
    ) -> Result<(), BatchmarkError> {
        let cx = INSTANCE_PAD + self.run.extent.width / 2.0 + dx;
        let cy = INSTANCE_PAD + self.run.extent.height / 2.0 - dy;
        if let Some(circle) = PathBuilder::from_circle(cx, cy, radius.max(0.5)) {
            self.pixmap.fill_path(
                &circle,
                &paint_for(color, alpha),
                FillRule::Winding,
                Transform::identity(),
                None,
            );
        }
        Ok(())
    }
}

/// Composites every planned watermark instance onto `page`. Returns the
/// number of instances drawn.
pub fn watermark_pixmap<R: Rng + ?Sized>(
    page: &mut Pixmap,
    spec: &WatermarkSpec,
    run: &TextRun,
    rng: &mut R,
) -> Result<usize, BatchmarkError> {
    let geometry = PageGeometry::new(page.width() as f32, page.height() as f32);
    let extent = run.extent();
    let placements = plan_placements(
        geometry,
        extent,
        spec.position,
        spec.density,
        spec.angle_degrees as f32,
    );

    let mut overlay = Pixmap::new(page.width(), page.height())
        .ok_or_else(|| BatchmarkError::Raster("page has zero area".to_string()))?;
    let buffer_w = extent.width as u32 + 2 * INSTANCE_PAD as u32;
    let buffer_h = extent.height as u32 + 2 * INSTANCE_PAD as u32;
    let instance_paint = PixmapPaint {
        quality: FilterQuality::Bilinear,
        ..PixmapPaint::default()
    };

    for instance in &placements {
        let ops = plan_effect(
            spec.effect,
            &spec.effect_params,
            spec.color.rgb8,
            spec.opacity,
            Backend::Raster,
            rng,
        );
        let mut buffer = Pixmap::new(buffer_w, buffer_h).ok_or_else(|| {
            BatchmarkError::Raster(format!("invalid instance buffer {buffer_w}x{buffer_h}"))
        })?;
        paint(
            &ops,
            &mut InstanceSurface {
                pixmap: &mut buffer,
                run,
            },
        )?;

        // Counter-clockwise on screen is a negative angle in y-down space.
        let (cx, cy) = instance.box_center(extent);
        let transform = Transform::from_translate(cx, cy)
            .pre_concat(Transform::from_rotate(-instance.rotation_degrees))
            .pre_concat(Transform::from_translate(
                -(buffer_w as f32) / 2.0,
                -(buffer_h as f32) / 2.0,
            ));
        overlay.draw_pixmap(0, 0, buffer.as_ref(), &instance_paint, transform, None);
    }

    page.draw_pixmap(
        0,
        0,
        overlay.as_ref(),
        &PixmapPaint::default(),
        Transform::identity(),
        None,
    );
    Ok(placements.len())
}

fn load_page_pixmap(path: &Path) -> Result<Pixmap, BatchmarkError> {
    let rgba = image::open(path)?.to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut pixmap = Pixmap::new(width, height).ok_or_else(|| {
        BatchmarkError::Raster(format!("{} has zero area", path.display()))
    })?;
    for (src_px, dst_px) in rgba.as_raw().chunks_exact(4).zip(pixmap.data_mut().chunks_exact_mut(4)) {
        let a = src_px[3];
        dst_px[0] = premul_u8(src_px[0], a);
        dst_px[1] = premul_u8(src_px[1], a);
        dst_px[2] = premul_u8(src_px[2], a);
        dst_px[3] = a;
    }
    Ok(pixmap)
}

fn premul_u8(channel: u8, alpha: u8) -> u8 {
    let prod = (channel as u16) * (alpha as u16) + 127;
    ((prod + (prod >> 8)) >> 8) as u8
}

fn encode_jpeg(pixmap: &Pixmap, quality: u8) -> Result<Vec<u8>, BatchmarkError> {
    let mut rgb = Vec::with_capacity(pixmap.width() as usize * pixmap.height() as usize * 3);
    for px in pixmap.pixels() {
        let c = px.demultiply();
        rgb.extend_from_slice(&[c.red(), c.green(), c.blue()]);
    }
    let mut out = Vec::new();
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality).write_image(
        &rgb,
        pixmap.width(),
        pixmap.height(),
        ColorType::Rgb8.into(),
    )?;
    Ok(out)
}

/// Output page size in points for a bitmap rendered at `dpi`.
pub fn page_points(pixel_width: u32, pixel_height: u32, dpi: u32) -> PageGeometry {
    let dpi = dpi.max(1) as f32;
    PageGeometry::new(
        pixel_width as f32 * 72.0 / dpi,
        pixel_height as f32 * 72.0 / dpi,
    )
}

pub fn render_rasterized(
    source: &Path,
    output: &Path,
    spec: &WatermarkSpec,
    text: &str,
    options: &RenderOptions,
    rasterizer: &dyn PageRasterizer,
    font: &WatermarkFont,
) -> Result<RenderStats, BatchmarkError> {
    let work = tempfile::Builder::new().prefix("batchmark-").tempdir()?;
    let result = render_in(work.path(), source, output, spec, text, options, rasterizer, font);
    let work_path = work.path().to_path_buf();
    if let Err(err) = work.close() {
        warn!(path = %work_path.display(), error = %err, "failed to remove temporary directory");
    }
    result
}

#[allow(clippy::too_many_arguments)]
fn render_in(
    work_dir: &Path,
    source: &Path,
    output: &Path,
    spec: &WatermarkSpec,
    text: &str,
    options: &RenderOptions,
    rasterizer: &dyn PageRasterizer,
    font: &WatermarkFont,
) -> Result<RenderStats, BatchmarkError> {
    let pages = rasterizer.rasterize(&RasterRequest {
        source,
        dpi: options.dpi,
        work_dir,
        first_page_only: false,
    })?;
    if pages.is_empty() {
        return Err(BatchmarkError::Raster("no pages rasterized".to_string()));
    }

    let run = TextRun::build(font, text, spec.font_size as f32);
    let quality = options.compression.jpeg_quality();
    let mut rng = rand::thread_rng();
    let mut stats = RenderStats::default();
    let mut parts = Vec::with_capacity(pages.len());

    for (index, page_path) in pages.iter().enumerate() {
        let page_no = index + 1;
        let mut pixmap = load_page_pixmap(page_path)?;
        let instances = watermark_pixmap(&mut pixmap, spec, &run, &mut rng)?;
        let jpeg = encode_jpeg(&pixmap, quality)?;
        let geometry = page_points(pixmap.width(), pixmap.height(), options.dpi);
        let mut single = compose::single_image_page_pdf(jpeg, pixmap.width(), pixmap.height(), geometry);
        let part_path = work_dir.join(format!("part-{page_no:05}.pdf"));
        single.save(&part_path)?;
        parts.push(part_path);
        stats.record_page(instances);
        debug!(page = page_no, instances, "page watermarked");
    }

    let mut documents = Vec::with_capacity(parts.len());
    for part in &parts {
        documents.push(lopdf::Document::load(part)?);
    }
    let mut merged = compose::concatenate(documents)?;
    compose::save(&mut merged, output)?;
    info!(
        output = %output.display(),
        pages = stats.pages,
        instances = stats.instances,
        "rasterized document written"
    );
    Ok(stats)
}

/// Renders the first page with the watermark applied and returns it as PNG.
pub fn render_preview(
    source: &Path,
    spec: &WatermarkSpec,
    text: &str,
    dpi: u32,
    rasterizer: &dyn PageRasterizer,
    font: &WatermarkFont,
) -> Result<Vec<u8>, BatchmarkError> {
    let work = tempfile::Builder::new().prefix("batchmark-preview-").tempdir()?;
    let result = (|| -> Result<Vec<u8>, BatchmarkError> {
        let pages = rasterizer.rasterize(&RasterRequest {
            source,
            dpi,
            work_dir: work.path(),
            first_page_only: true,
        })?;
        let first = pages
            .first()
            .ok_or_else(|| BatchmarkError::Raster("no pages rasterized".to_string()))?;
        let mut pixmap = load_page_pixmap(first)?;
        let run = TextRun::build(font, text, spec.font_size as f32);
        watermark_pixmap(&mut pixmap, spec, &run, &mut rand::thread_rng())?;
        pixmap
            .encode_png()
            .map_err(|e| BatchmarkError::Raster(format!("png encode failed: {e}")))
    })();
    if let Err(err) = work.close() {
        warn!(error = %err, "failed to remove preview directory");
    }
    result
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Writes `pages` white PNGs of a fixed size instead of running pdftoppm.
    pub struct WhitePageRasterizer {
        pub pages: usize,
        pub width: u32,
        pub height: u32,
        pub seen_dirs: Mutex<Vec<PathBuf>>,
    }

    impl WhitePageRasterizer {
        pub fn new(pages: usize, width: u32, height: u32) -> Self {
            Self {
                pages,
                width,
                height,
                seen_dirs: Mutex::new(Vec::new()),
            }
        }
    }

    impl PageRasterizer for WhitePageRasterizer {
        fn rasterize(&self, request: &RasterRequest<'_>) -> Result<Vec<PathBuf>, BatchmarkError> {
            self.seen_dirs.lock().unwrap().push(request.work_dir.to_path_buf());
            let count = if request.first_page_only { 1 } else { self.pages };
            let img = image::RgbImage::from_pixel(self.width, self.height, image::Rgb([255, 255, 255]));
            let mut out = Vec::new();
            for n in 1..=count {
                let path = request.work_dir.join(format!("page-{n}.png"));
                img.save(&path)?;
                out.push(path);
            }
            Ok(out)
        }
    }

    pub struct FailingRasterizer;

    impl PageRasterizer for FailingRasterizer {
        fn rasterize(&self, _request: &RasterRequest<'_>) -> Result<Vec<PathBuf>, BatchmarkError> {
            Err(BatchmarkError::Raster("rasterizer unavailable".to_string()))
        }
    }

    /// Emits a good first page followed by a page that is not a PNG.
    #[derive(Default)]
    pub struct CorruptPageRasterizer {
        pub seen_dirs: Mutex<Vec<PathBuf>>,
    }

    impl PageRasterizer for CorruptPageRasterizer {
        fn rasterize(&self, request: &RasterRequest<'_>) -> Result<Vec<PathBuf>, BatchmarkError> {
            self.seen_dirs.lock().unwrap().push(request.work_dir.to_path_buf());
            let good = request.work_dir.join("page-1.png");
            image::RgbImage::from_pixel(40, 20, image::Rgb([255, 255, 255])).save(&good)?;
            let bad = request.work_dir.join("page-2.png");
            std::fs::write(&bad, b"not a png")?;
            Ok(vec![good, bad])
        }
    }
}
