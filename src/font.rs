use crate::error::BatchmarkError;
use rustybuzz::{Direction as HbDirection, Face as HbFace, UnicodeBuffer};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use tracing::{debug, warn};

/// Base-14 font used when no TrueType face can be resolved.
pub const BUILTIN_FONT_NAME: &str = "Helvetica-Bold";

// Average advance of the builtin face, in em. Matches the width estimate used
// for unresolved fonts elsewhere.
const BUILTIN_ADVANCE_EM: f32 = 0.6;
const BUILTIN_ASCENT_EM: f32 = 0.718;
const BUILTIN_DESCENT_EM: f32 = -0.207;

#[derive(Debug)]
pub struct LoadedFont {
    pub name: String,
    pub data: Arc<Vec<u8>>,
    pub is_collection: bool,
    pub units_per_em: u16,
    pub ascender: i16,
    pub descender: i16,
}

/// The face a watermark is drawn with. `Builtin` stands in when the
/// configured family cannot be resolved to a font file.
#[derive(Debug, Clone)]
pub enum WatermarkFont {
    TrueType(Arc<LoadedFont>),
    Builtin,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShapedGlyph {
    pub glyph_id: u16,
    /// Pen position of the glyph origin relative to the run start, in the
    /// requested font size units.
    pub x: f32,
    pub y: f32,
    pub advance: f32,
    pub cluster: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShapedRun {
    pub glyphs: Vec<ShapedGlyph>,
    pub width: f32,
}

impl LoadedFont {
    pub fn from_path(path: &Path) -> Result<Self, BatchmarkError> {
        let data = fs::read(path)?;
        let stem = path
            .file_stem()
            .and_then(|v| v.to_str())
            .unwrap_or("EmbeddedFont")
            .to_string();
        Self::from_bytes(data, &stem)
    }

    pub fn from_bytes(data: Vec<u8>, fallback_name: &str) -> Result<Self, BatchmarkError> {
        let face = ttf_parser::Face::parse(&data, 0)
            .map_err(|e| BatchmarkError::Font(format!("{fallback_name}: {e}")))?;
        let name = postscript_name(&face).unwrap_or_else(|| fallback_name.to_string());
        let units_per_em = face.units_per_em().max(1);
        let ascender = face.ascender();
        let descender = face.descender();
        let is_collection = data.starts_with(b"ttcf");
        Ok(Self {
            name,
            is_collection,
            units_per_em,
            ascender,
            descender,
            data: Arc::new(data),
        })
    }

    pub fn scale(&self, font_size: f32) -> f32 {
        font_size / self.units_per_em as f32
    }

    /// Advance width in thousandths of an em, as PDF `/W` arrays expect.
    pub fn glyph_advance_1000(&self, glyph_id: u16) -> u16 {
        let Ok(face) = ttf_parser::Face::parse(&self.data, 0) else {
            return 0;
        };
        let advance = face
            .glyph_hor_advance(ttf_parser::GlyphId(glyph_id))
            .unwrap_or(0) as i64;
        let units = self.units_per_em as i64;
        ((advance * 1000 + units / 2) / units).clamp(0, u16::MAX as i64) as u16
    }
}

impl WatermarkFont {
    pub fn name(&self) -> &str {
        match self {
            WatermarkFont::TrueType(font) => &font.name,
            WatermarkFont::Builtin => BUILTIN_FONT_NAME,
        }
    }

    pub fn shape(&self, text: &str, font_size: f32) -> ShapedRun {
        match self {
            WatermarkFont::TrueType(font) => {
                shape_with_face(font, text, font_size).unwrap_or_else(|| shape_builtin(text, font_size))
            }
            WatermarkFont::Builtin => shape_builtin(text, font_size),
        }
    }

    pub fn ascent(&self, font_size: f32) -> f32 {
        match self {
            WatermarkFont::TrueType(font) => font.ascender as f32 * font.scale(font_size),
            WatermarkFont::Builtin => BUILTIN_ASCENT_EM * font_size,
        }
    }

    pub fn descent(&self, font_size: f32) -> f32 {
        match self {
            WatermarkFont::TrueType(font) => font.descender as f32 * font.scale(font_size),
            WatermarkFont::Builtin => BUILTIN_DESCENT_EM * font_size,
        }
    }

    /// Ascent-to-descent height of a line.
    pub fn line_height(&self, font_size: f32) -> f32 {
        (self.ascent(font_size) - self.descent(font_size)).max(font_size * 0.5)
    }
}

fn shape_with_face(font: &LoadedFont, text: &str, font_size: f32) -> Option<ShapedRun> {
    let face = HbFace::from_slice(&font.data, 0)?;
    let scale = font_size / face.units_per_em().max(1) as f32;
    let mut buffer = UnicodeBuffer::new();
    buffer.set_direction(detect_direction(text));
    buffer.push_str(text);
    let output = rustybuzz::shape(&face, &[], buffer);
    let infos = output.glyph_infos();
    let positions = output.glyph_positions();
    if infos.len() != positions.len() {
        return None;
    }

    let mut glyphs = Vec::with_capacity(infos.len());
    let mut pen_x = 0.0f32;
    let mut pen_y = 0.0f32;
    for (info, pos) in infos.iter().zip(positions.iter()) {
        let advance = pos.x_advance as f32 * scale;
        glyphs.push(ShapedGlyph {
            glyph_id: info.glyph_id as u16,
            x: pen_x + pos.x_offset as f32 * scale,
            y: pen_y + pos.y_offset as f32 * scale,
            advance,
            cluster: info.cluster,
        });
        pen_x += advance;
        pen_y += pos.y_advance as f32 * scale;
    }
    Some(ShapedRun {
        glyphs,
        width: pen_x.max(0.0),
    })
}

fn shape_builtin(text: &str, font_size: f32) -> ShapedRun {
    let advance = font_size * BUILTIN_ADVANCE_EM;
    let glyphs: Vec<ShapedGlyph> = text
        .char_indices()
        .enumerate()
        .map(|(idx, (byte, _))| ShapedGlyph {
            glyph_id: 0,
            x: idx as f32 * advance,
            y: 0.0,
            advance,
            cluster: byte as u32,
        })
        .collect();
    let width = glyphs.len() as f32 * advance;
    ShapedRun { glyphs, width }
}

fn detect_direction(text: &str) -> HbDirection {
    for ch in text.chars() {
        let code = ch as u32;
        let rtl = matches!(
            code,
            0x0590..=0x08FF | 0xFB1D..=0xFDFF | 0xFE70..=0xFEFF | 0x1EE00..=0x1EEFF
        );
        if rtl {
            return HbDirection::RightToLeft;
        }
    }
    HbDirection::LeftToRight
}

fn postscript_name(face: &ttf_parser::Face<'_>) -> Option<String> {
    use ttf_parser::name::name_id;

    let mut family = None;
    for entry in face.names() {
        let Some(name) = entry.to_string() else {
            continue;
        };
        match entry.name_id {
            name_id::POST_SCRIPT_NAME => return Some(name),
            name_id::FAMILY if family.is_none() => family = Some(name),
            _ => {}
        }
    }
    family
}

/// Maps a logical font family to a font file on the host.
pub trait FontLocator: Send + Sync {
    fn locate(&self, family: &str) -> Option<PathBuf>;
}

/// Searches the platform font directories for well-known file names of a
/// family. A family that is itself a path to an existing file is used as-is.
#[derive(Debug, Clone, Default)]
pub struct SystemFontLocator {
    extra_dirs: Vec<PathBuf>,
}

impl SystemFontLocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.extra_dirs.push(dir.into());
        self
    }

    fn search_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = self.extra_dirs.clone();
        dirs.extend(system_font_dirs());
        dirs
    }
}

impl FontLocator for SystemFontLocator {
    fn locate(&self, family: &str) -> Option<PathBuf> {
        let direct = Path::new(family);
        if direct.is_file() {
            return Some(direct.to_path_buf());
        }
        let patterns = family_file_patterns(family);
        for dir in self.search_dirs() {
            let mut files = Vec::new();
            collect_font_files(&dir, 4, &mut files);
            for pattern in &patterns {
                let needle = pattern.to_lowercase();
                let hit = files.iter().find(|path| {
                    path.file_name()
                        .and_then(|n| n.to_str())
                        .map(|n| n.to_lowercase().contains(&needle))
                        .unwrap_or(false)
                });
                if let Some(hit) = hit {
                    debug!(family, path = %hit.display(), "resolved font family");
                    return Some(hit.clone());
                }
            }
        }
        None
    }
}

fn system_font_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();

    #[cfg(target_os = "windows")]
    {
        dirs.push(PathBuf::from(r"C:\Windows\Fonts"));
        if let Ok(windir) = std::env::var("WINDIR") {
            dirs.push(PathBuf::from(windir).join("Fonts"));
        }
    }

    #[cfg(target_os = "linux")]
    {
        dirs.push(PathBuf::from("/usr/share/fonts"));
        dirs.push(PathBuf::from("/usr/local/share/fonts"));
        if let Ok(home) = std::env::var("HOME") {
            dirs.push(PathBuf::from(home).join(".fonts"));
        }
    }

    #[cfg(target_os = "macos")]
    {
        dirs.push(PathBuf::from("/System/Library/Fonts"));
        dirs.push(PathBuf::from("/System/Library/Fonts/Supplemental"));
        dirs.push(PathBuf::from("/Library/Fonts"));
        if let Ok(home) = std::env::var("HOME") {
            dirs.push(PathBuf::from(home).join("Library/Fonts"));
        }
    }

    if let Ok(extra) = std::env::var("BATCHMARK_FONT_DIR") {
        for path in std::env::split_paths(&extra) {
            if !path.as_os_str().is_empty() {
                dirs.push(path);
            }
        }
    }

    dirs
}

fn family_file_patterns(family: &str) -> Vec<String> {
    let known: &[&str] = match family.trim() {
        "宋体" => &["simsun", "STSong", "Songti", "song"],
        "黑体" => &["simhei", "STHeiti", "Heiti"],
        "微软雅黑" => &["msyh.", "Microsoft YaHei", "MicrosoftYaHei", "PingFang"],
        "微软雅黑粗体" => &["msyhbd", "Microsoft YaHei Bold", "PingFang SC Bold"],
        "Arial" => &["arial.", "Arial.ttf", "ArialMT"],
        "Times New Roman" => &["times.", "Times New Roman", "TimesNewRoman"],
        "Arial Black" => &["ariblk", "Arial Black", "Arial-Black"],
        "Impact" => &["impact"],
        _ => &[],
    };
    let mut out: Vec<String> = known.iter().map(|v| v.to_string()).collect();
    let compact = family.trim().replace(' ', "");
    if !compact.is_empty() && !out.iter().any(|v| v.eq_ignore_ascii_case(&compact)) {
        out.push(compact);
    }
    out
}

fn collect_font_files(dir: &Path, depth: usize, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if depth > 0 {
                collect_font_files(&path, depth - 1, out);
            }
            continue;
        }
        let is_font = path
            .extension()
            .and_then(|v| v.to_str())
            .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "ttf" | "otf" | "ttc"))
            .unwrap_or(false);
        if is_font {
            out.push(path);
        }
    }
}

static FONT_CACHE: OnceLock<Mutex<HashMap<PathBuf, Option<Arc<LoadedFont>>>>> = OnceLock::new();

/// Resolves `family` through `locator`, loading each font file at most once
/// per process. Unresolvable families fall back to the builtin face.
pub fn resolve_watermark_font(locator: &dyn FontLocator, family: &str) -> WatermarkFont {
    let Some(path) = locator.locate(family) else {
        warn!(family, fallback = BUILTIN_FONT_NAME, "font family not found");
        return WatermarkFont::Builtin;
    };
    let cache = FONT_CACHE.get_or_init(|| Mutex::new(HashMap::new()));
    if let Ok(guard) = cache.lock() {
        if let Some(entry) = guard.get(&path) {
            return match entry {
                Some(font) => WatermarkFont::TrueType(font.clone()),
                None => WatermarkFont::Builtin,
            };
        }
    }
    let loaded = match LoadedFont::from_path(&path) {
        Ok(font) => Some(Arc::new(font)),
        Err(err) => {
            warn!(family, path = %path.display(), error = %err, "font file unusable");
            None
        }
    };
    if let Ok(mut guard) = cache.lock() {
        guard.insert(path, loaded.clone());
    }
    match loaded {
        Some(font) => WatermarkFont::TrueType(font),
        None => WatermarkFont::Builtin,
    }
}
