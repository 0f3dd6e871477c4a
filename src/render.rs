use crate::error::BatchmarkError;
use crate::font::{FontLocator, SystemFontLocator, resolve_watermark_font};
use crate::metrics::RenderStats;
use crate::raster::{PageRasterizer, PdftoppmRasterizer, render_preview, render_rasterized};
use crate::vector::render_vector;
use crate::watermark::{RenderOptions, WatermarkSpec};
use std::path::Path;
use tracing::debug;

/// Everything one render needs. `spec` and `options` are shared, read-only
/// batch configuration.
#[derive(Debug, Clone, Copy)]
pub struct RenderRequest<'a> {
    pub source: &'a Path,
    pub output: &'a Path,
    pub spec: &'a WatermarkSpec,
    pub text: &'a str,
    pub options: &'a RenderOptions,
}

pub trait DocumentRenderer: Send + Sync {
    fn render(&self, request: &RenderRequest<'_>) -> Result<RenderStats, BatchmarkError>;
}

/// Picks the raster or vector path from `RenderOptions::rasterize`.
pub struct Watermarker {
    rasterizer: Box<dyn PageRasterizer>,
    fonts: Box<dyn FontLocator>,
}

impl Default for Watermarker {
    fn default() -> Self {
        Self::new(
            Box::new(PdftoppmRasterizer::default()),
            Box::new(SystemFontLocator::new()),
        )
    }
}

impl Watermarker {
    pub fn new(rasterizer: Box<dyn PageRasterizer>, fonts: Box<dyn FontLocator>) -> Self {
        Self { rasterizer, fonts }
    }

    /// First page, watermarked, as PNG bytes.
    pub fn preview(
        &self,
        source: &Path,
        spec: &WatermarkSpec,
        text: &str,
        dpi: u32,
    ) -> Result<Vec<u8>, BatchmarkError> {
        let font = resolve_watermark_font(self.fonts.as_ref(), &spec.font_family);
        render_preview(source, spec, text, dpi, self.rasterizer.as_ref(), &font)
    }
}

impl DocumentRenderer for Watermarker {
    fn render(&self, request: &RenderRequest<'_>) -> Result<RenderStats, BatchmarkError> {
        let font = resolve_watermark_font(self.fonts.as_ref(), &request.spec.font_family);
        debug!(
            font = font.name(),
            rasterize = request.options.rasterize,
            output = %request.output.display(),
            "rendering document"
        );
        if request.options.rasterize {
            render_rasterized(
                request.source,
                request.output,
                request.spec,
                request.text,
                request.options,
                self.rasterizer.as_ref(),
                &font,
            )
        } else {
            render_vector(
                request.source,
                request.output,
                request.spec,
                request.text,
                &font,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::fixtures;
    use crate::raster::testing::WhitePageRasterizer;
    use std::path::PathBuf;

    struct NoFonts;

    impl FontLocator for NoFonts {
        fn locate(&self, _family: &str) -> Option<PathBuf> {
            None
        }
    }

    fn watermarker() -> Watermarker {
        Watermarker::new(Box::new(WhitePageRasterizer::new(2, 170, 220)), Box::new(NoFonts))
    }

    fn render_with(rasterize: bool) -> lopdf::Document {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.pdf");
        let output = dir.path().join("out.pdf");
        fixtures::write_text_pdf(&source, &["one", "two"]);
        let spec = WatermarkSpec::builder().build().unwrap();
        let options = RenderOptions {
            rasterize,
            dpi: 100,
            ..RenderOptions::default()
        };
        let stats = watermarker()
            .render(&RenderRequest {
                source: &source,
                output: &output,
                spec: &spec,
                text: "Acme",
                options: &options,
            })
            .unwrap();
        assert_eq!(stats.pages, 2);
        lopdf::Document::load(&output).unwrap()
    }

    #[test]
    fn vector_path_keeps_page_text() {
        let doc = render_with(false);
        let page_id = *doc.get_pages().get(&1).unwrap();
        let content = doc.get_page_content(page_id).unwrap();
        assert!(String::from_utf8_lossy(&content).contains("(one) Tj"));
    }

    #[test]
    fn raster_path_replaces_pages_with_images() {
        let doc = render_with(true);
        let page_id = *doc.get_pages().get(&1).unwrap();
        let content = doc.get_page_content(page_id).unwrap();
        let text = String::from_utf8_lossy(&content);
        assert!(text.contains("/Im1 Do"));
        assert!(!text.contains("(one) Tj"));
    }

    #[test]
    fn preview_goes_through_rasterizer() {
        let png = watermarker()
            .preview(
                Path::new("unused.pdf"),
                &WatermarkSpec::builder().build().unwrap(),
                "Acme",
                72,
            )
            .unwrap();
        assert!(png.starts_with(b"\x89PNG"));
    }
}
