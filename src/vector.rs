//! Vector output: watermark ink is drawn as a Form XObject on top of each
//! page. The original content streams are kept untouched between `q`/`Q`, so
//! page text stays selectable.

use crate::compose;
use crate::effect::{Backend, EffectSurface, paint, plan_effect};
use crate::error::BatchmarkError;
use crate::font::{BUILTIN_FONT_NAME, LoadedFont, WatermarkFont};
use crate::metrics::RenderStats;
use crate::placement::plan_placements;
use crate::types::{Rgb8, TextExtent};
use crate::watermark::WatermarkSpec;
use lopdf::{Document as LoDocument, Object as LoObject, ObjectId as LoObjectId, Stream as LoStream, dictionary};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

const FONT_RESOURCE: &str = "WMF";
const LINE_HEIGHT_FACTOR: f32 = 1.2;
// Control-point distance for a quarter circle drawn with one cubic.
const KAPPA: f32 = 0.552_284_8;

/// Helvetica-Bold advance widths for 0x20..=0x7E, in 1/1000 em.
const HELVETICA_BOLD_WIDTHS: [u16; 95] = [
    278, 333, 474, 556, 556, 889, 722, 238, 333, 333, 389, 584, 278, 333, 278, 278, //
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 333, 333, 584, 584, 584, 611, //
    975, 722, 722, 722, 722, 667, 611, 778, 722, 278, 556, 722, 611, 833, 722, 778, //
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 333, 278, 333, 584, 556, //
    333, 556, 611, 556, 611, 556, 333, 611, 611, 278, 278, 556, 278, 889, 611, 611, //
    611, 611, 389, 556, 333, 611, 556, 778, 556, 556, 500, 389, 280, 389, 584,
];
const HELVETICA_BOLD_DEFAULT_WIDTH: u16 = 556;

/// Encodes `text` for a WinAnsi simple font. Unencodable characters become
/// `?`; the second value counts them.
pub fn encode_win_ansi(text: &str) -> (Vec<u8>, usize) {
    let mut out = Vec::with_capacity(text.len());
    let mut replaced = 0;
    for ch in text.chars() {
        let code = ch as u32;
        if (0x20..=0x7E).contains(&code) || (0xA0..=0xFF).contains(&code) {
            out.push(code as u8);
        } else {
            out.push(b'?');
            replaced += 1;
        }
    }
    (out, replaced)
}

fn helvetica_bold_width(code: u8) -> u16 {
    if (0x20..=0x7E).contains(&code) {
        HELVETICA_BOLD_WIDTHS[(code - 0x20) as usize]
    } else {
        HELVETICA_BOLD_DEFAULT_WIDTH
    }
}

/// Text ready to be shown with `Tj`: the encoded string plus its metrics.
struct PreparedText {
    hex: String,
    width: f32,
    ascent: f32,
    descent: f32,
}

enum PdfFont {
    Cid {
        font: Arc<LoadedFont>,
        glyph_text: BTreeMap<u16, String>,
    },
    Base14,
}

fn hex_string(bytes: impl IntoIterator<Item = u8>) -> String {
    let mut out = String::from("<");
    for b in bytes {
        let _ = write!(out, "{b:02X}");
    }
    out.push('>');
    out
}

fn prepare_text(font: &WatermarkFont, text: &str, font_size: f32) -> (PdfFont, PreparedText) {
    if let WatermarkFont::TrueType(loaded) = font {
        if loaded.is_collection {
            warn!(font = %loaded.name, fallback = BUILTIN_FONT_NAME, "font collections cannot be embedded");
        } else {
            let run = font.shape(text, font_size);
            let mut hex = String::from("<");
            for glyph in &run.glyphs {
                let _ = write!(hex, "{:04X}", glyph.glyph_id);
            }
            hex.push('>');
            // The string is shown with /W widths, not shaped advances.
            let width: f32 = run
                .glyphs
                .iter()
                .map(|g| loaded.glyph_advance_1000(g.glyph_id) as f32 * font_size / 1000.0)
                .sum();
            let clusters: Vec<(u16, u32)> = run.glyphs.iter().map(|g| (g.glyph_id, g.cluster)).collect();
            let prepared = PreparedText {
                hex,
                width,
                ascent: font.ascent(font_size),
                descent: font.descent(font_size),
            };
            return (
                PdfFont::Cid {
                    font: loaded.clone(),
                    glyph_text: glyph_text_map(text, &clusters),
                },
                prepared,
            );
        }
    }

    let (bytes, replaced) = encode_win_ansi(text);
    if replaced > 0 {
        warn!(replaced, font = BUILTIN_FONT_NAME, "characters not encodable, replaced with '?'");
    }
    let width: f32 = bytes
        .iter()
        .map(|b| helvetica_bold_width(*b) as f32 * font_size / 1000.0)
        .sum();
    let prepared = PreparedText {
        hex: hex_string(bytes.iter().copied()),
        width,
        ascent: WatermarkFont::Builtin.ascent(font_size),
        descent: WatermarkFont::Builtin.descent(font_size),
    };
    (PdfFont::Base14, prepared)
}

/// Maps each glyph to the source text of its cluster.
fn glyph_text_map(text: &str, clusters: &[(u16, u32)]) -> BTreeMap<u16, String> {
    let starts: BTreeSet<usize> = clusters.iter().map(|(_, c)| *c as usize).collect();
    let mut out = BTreeMap::new();
    for (gid, cluster) in clusters {
        let start = *cluster as usize;
        let end = starts
            .range(start + 1..)
            .next()
            .copied()
            .unwrap_or(text.len());
        if let Some(slice) = text.get(start..end) {
            if !slice.is_empty() {
                out.entry(*gid).or_insert_with(|| slice.to_string());
            }
        }
    }
    out
}

fn to_unicode_cmap(glyph_text: &BTreeMap<u16, String>) -> String {
    let entries: Vec<(&u16, &String)> = glyph_text.iter().collect();
    let mut out = String::new();
    out.push_str("/CIDInit /ProcSet findresource begin\n");
    out.push_str("12 dict begin\n");
    out.push_str("begincmap\n");
    out.push_str("/CIDSystemInfo << /Registry (Adobe) /Ordering (UCS) /Supplement 0 >> def\n");
    out.push_str("/CMapName /Adobe-Identity-UCS def\n");
    out.push_str("/CMapType 2 def\n");
    out.push_str("1 begincodespacerange\n<0000> <FFFF>\nendcodespacerange\n");
    for chunk in entries.chunks(100) {
        let _ = writeln!(out, "{} beginbfchar", chunk.len());
        for (gid, s) in chunk {
            let mut units = String::new();
            let mut buf = [0u16; 2];
            for ch in s.chars() {
                for unit in ch.encode_utf16(&mut buf) {
                    let _ = write!(units, "{unit:04X}");
                }
            }
            let _ = writeln!(out, "<{gid:04X}> <{units}>");
        }
        out.push_str("endbfchar\n");
    }
    out.push_str("endcmap\n");
    out.push_str("CMapName currentdict /CMap defineresource pop\n");
    out.push_str("end\nend\n");
    out
}

fn sanitize_font_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
        .collect();
    if cleaned.is_empty() {
        "EmbeddedFont".to_string()
    } else {
        cleaned
    }
}

fn width_array(widths: &BTreeMap<u16, u16>) -> Vec<LoObject> {
    let mut out = Vec::with_capacity(widths.len() * 2);
    for (gid, width) in widths {
        out.push(LoObject::Integer(*gid as i64));
        out.push(LoObject::Array(vec![LoObject::Integer(*width as i64)]));
    }
    out
}

fn add_cid_font(
    doc: &mut LoDocument,
    font: &LoadedFont,
    glyph_text: &BTreeMap<u16, String>,
) -> Result<LoObjectId, BatchmarkError> {
    let face = ttf_parser::Face::parse(&font.data, 0)
        .map_err(|e| BatchmarkError::Font(format!("{}: {e}", font.name)))?;
    let to_1000 = |v: i16| (v as i64 * 1000) / font.units_per_em.max(1) as i64;
    let bbox = face.global_bounding_box();
    let base_font = sanitize_font_name(&font.name);

    let file_id = doc.add_object(LoStream::new(
        dictionary! { "Length1" => font.data.len() as i64 },
        font.data.to_vec(),
    ));
    let descriptor_id = doc.add_object(dictionary! {
        "Type" => "FontDescriptor",
        "FontName" => LoObject::Name(base_font.clone().into_bytes()),
        "Flags" => 32,
        "FontBBox" => vec![
            to_1000(bbox.x_min).into(),
            to_1000(bbox.y_min).into(),
            to_1000(bbox.x_max).into(),
            to_1000(bbox.y_max).into(),
        ],
        "ItalicAngle" => 0,
        "Ascent" => to_1000(font.ascender),
        "Descent" => to_1000(font.descender),
        "CapHeight" => to_1000(face.capital_height().unwrap_or(font.ascender)),
        "StemV" => 80,
        "FontFile2" => file_id,
    });

    let widths: BTreeMap<u16, u16> = glyph_text
        .keys()
        .map(|gid| (*gid, font.glyph_advance_1000(*gid)))
        .collect();
    let cid_font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "CIDFontType2",
        "BaseFont" => LoObject::Name(base_font.clone().into_bytes()),
        "CIDSystemInfo" => dictionary! {
            "Registry" => LoObject::string_literal("Adobe"),
            "Ordering" => LoObject::string_literal("Identity"),
            "Supplement" => 0,
        },
        "FontDescriptor" => descriptor_id,
        "W" => width_array(&widths),
        "CIDToGIDMap" => "Identity",
    });
    let to_unicode_id = doc.add_object(LoStream::new(
        dictionary! {},
        to_unicode_cmap(glyph_text).into_bytes(),
    ));
    Ok(doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type0",
        "BaseFont" => LoObject::Name(base_font.into_bytes()),
        "Encoding" => "Identity-H",
        "DescendantFonts" => vec![cid_font_id.into()],
        "ToUnicode" => to_unicode_id,
    }))
}

fn add_base14_font(doc: &mut LoDocument) -> LoObjectId {
    doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => BUILTIN_FONT_NAME,
        "Encoding" => "WinAnsiEncoding",
    })
}

/// Collects drawing operators for one page's overlay. Coordinates are
/// relative to the current instance's box center, y-up.
struct OverlaySurface<'a> {
    content: String,
    text: &'a PreparedText,
    font_size: f32,
    alphas: &'a mut BTreeMap<u32, String>,
}

impl OverlaySurface<'_> {
    fn graphics_state(&mut self, alpha: f32) -> String {
        let alpha = alpha.clamp(0.0, 1.0);
        let next = self.alphas.len() + 1;
        self.alphas
            .entry(alpha.to_bits())
            .or_insert_with(|| format!("WMGS{next}"))
            .clone()
    }
}

fn rgb_operands(color: Rgb8) -> String {
    let c = color.to_unit();
    format!("{:.4} {:.4} {:.4}", c.r, c.g, c.b)
}

impl EffectSurface for OverlaySurface<'_> {
    fn draw_text(&mut self, dx: f32, dy: f32, color: Rgb8, alpha: f32) -> Result<(), BatchmarkError> {
        let gs = self.graphics_state(alpha);
        let x = -self.text.width / 2.0 + dx;
        let y = -(self.text.ascent + self.text.descent) / 2.0 + dy;
        let _ = writeln!(
            self.content,
            "/{gs} gs {} rg BT /{FONT_RESOURCE} {:.2} Tf {x:.3} {y:.3} Td {} Tj ET",
            rgb_operands(color),
            self.font_size,
            self.text.hex
        );
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
        let gs = self.graphics_state(alpha);
        let r = radius;
        let k = r * KAPPA;
        let _ = writeln!(
            self.content,
            "/{gs} gs {} rg {:.3} {:.3} m {:.3} {:.3} {:.3} {:.3} {:.3} {:.3} c {:.3} {:.3} {:.3} {:.3} {:.3} {:.3} c {:.3} {:.3} {:.3} {:.3} {:.3} {:.3} c {:.3} {:.3} {:.3} {:.3} {:.3} {:.3} c f",
            rgb_operands(color),
            dx + r, dy,
            dx + r, dy + k, dx + k, dy + r, dx, dy + r,
            dx - k, dy + r, dx - r, dy + k, dx - r, dy,
            dx - r, dy - k, dx - k, dy - r, dx, dy - r,
            dx + k, dy - r, dx + r, dy - k, dx + r, dy,
        );
        Ok(())
    }
}

fn unused_xobject_name(xobjects: &lopdf::Dictionary) -> String {
    let mut n = 1usize;
    loop {
        let name = format!("WM{n}");
        if !xobjects.has(name.as_bytes()) {
            return name;
        }
        n += 1;
    }
}

pub fn render_vector(
    source: &Path,
    output: &Path,
    spec: &WatermarkSpec,
    text: &str,
    font: &WatermarkFont,
) -> Result<RenderStats, BatchmarkError> {
    let mut doc = compose::load_source(source)?;
    let font_size = spec.font_size as f32;
    let (pdf_font, prepared) = prepare_text(font, text, font_size);
    let font_id = match &pdf_font {
        PdfFont::Cid { font, glyph_text } => add_cid_font(&mut doc, font, glyph_text)?,
        PdfFont::Base14 => add_base14_font(&mut doc),
    };
    let extent = TextExtent::new(prepared.width, font_size * LINE_HEIGHT_FACTOR);
    let mut rng = rand::thread_rng();
    let mut stats = RenderStats::default();

    let page_ids: Vec<LoObjectId> = doc.get_pages().values().copied().collect();
    for (index, page_id) in page_ids.into_iter().enumerate() {
        let [x0, y0, x1, y1] = compose::page_box(&doc, page_id)?;
        let geometry = compose::page_geometry(&doc, page_id)?;
        let placements = plan_placements(
            geometry,
            extent,
            spec.position,
            spec.density,
            spec.angle_degrees as f32,
        );

        let mut alphas: BTreeMap<u32, String> = BTreeMap::new();
        let mut surface = OverlaySurface {
            content: format!("q 1 0 0 1 {x0:.3} {y0:.3} cm\n"),
            text: &prepared,
            font_size,
            alphas: &mut alphas,
        };
        for instance in &placements {
            let (cx, cy) = instance.box_center(extent);
            let theta = instance.rotation_degrees.to_radians();
            let (sin, cos) = theta.sin_cos();
            let _ = writeln!(
                surface.content,
                "q 1 0 0 1 {cx:.3} {:.3} cm {cos:.5} {sin:.5} {:.5} {cos:.5} 0 0 cm",
                geometry.height - cy,
                -sin
            );
            let ops = plan_effect(
                spec.effect,
                &spec.effect_params,
                spec.color.rgb8,
                spec.opacity,
                Backend::Vector,
                &mut rng,
            );
            paint(&ops, &mut surface)?;
            surface.content.push_str("Q\n");
        }
        surface.content.push_str("Q\n");
        let content = surface.content;

        let mut ext_gstates = lopdf::Dictionary::new();
        for (bits, name) in &alphas {
            let alpha = f32::from_bits(*bits);
            ext_gstates.set(
                name.as_bytes().to_vec(),
                dictionary! { "Type" => "ExtGState", "ca" => alpha, "CA" => alpha },
            );
        }
        let form_id = doc.add_object(LoStream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Form",
                "FormType" => 1,
                "BBox" => vec![x0.into(), y0.into(), x1.into(), y1.into()],
                "Resources" => dictionary! {
                    "Font" => dictionary! { FONT_RESOURCE => font_id },
                    "ExtGState" => ext_gstates,
                },
            },
            content.into_bytes(),
        ));

        let mut resources = compose::page_resources_dict(&doc, page_id)?;
        let mut xobjects = compose::resource_subdict(&doc, &resources, b"XObject");
        let form_name = unused_xobject_name(&xobjects);
        xobjects.set(form_name.as_bytes().to_vec(), LoObject::Reference(form_id));
        resources.set("XObject", LoObject::Dictionary(xobjects));
        {
            let page = doc.get_object_mut(page_id).and_then(LoObject::as_dict_mut)?;
            page.set("Resources", LoObject::Dictionary(resources));
        }
        compose::wrap_page_contents(
            &mut doc,
            page_id,
            b"q\n".to_vec(),
            format!("Q\nq /{form_name} Do Q\n").into_bytes(),
        )?;

        stats.record_page(placements.len());
        debug!(page = index + 1, instances = placements.len(), "overlay stamped");
    }

    compose::save(&mut doc, output)?;
    info!(
        output = %output.display(),
        pages = stats.pages,
        instances = stats.instances,
        "vector document written"
    );
    Ok(stats)
}
