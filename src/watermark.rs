use crate::color::{ResolvedColor, resolve_color};
use crate::error::BatchmarkError;

/// Upper bound on the tiled grid dimension accepted by the builder.
pub const MAX_DENSITY: u32 = 100;
/// Upper bound on `outline_width`, `shadow_offset` and `pattern_density`.
pub const MAX_EFFECT_PARAM: u32 = 100;

/// `prefix + recipient + suffix`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TextTemplate {
    pub prefix: String,
    pub suffix: String,
}

impl TextTemplate {
    pub fn new(prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            suffix: suffix.into(),
        }
    }

    pub fn render(&self, recipient: &str) -> String {
        let mut out = String::with_capacity(self.prefix.len() + recipient.len() + self.suffix.len());
        out.push_str(&self.prefix);
        out.push_str(recipient);
        out.push_str(&self.suffix);
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionMode {
    Center,
    Tile,
}

impl PositionMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "center" => Some(PositionMode::Center),
            "tile" => Some(PositionMode::Tile),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    None,
    Outline,
    Shadow,
    Emboss,
    Texture,
}

impl Effect {
    /// Unknown names render plain text.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "outline" => Effect::Outline,
            "shadow" => Effect::Shadow,
            "emboss" => Effect::Emboss,
            "texture" => Effect::Texture,
            _ => Effect::None,
        }
    }

    /// Texture scatters unseeded random dots, so two renders of the same
    /// input are visually similar but not byte-identical.
    pub fn is_deterministic(self) -> bool {
        !matches!(self, Effect::Texture)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectParams {
    pub outline_width: u32,
    pub shadow_offset: u32,
    /// Percentage, 0..=100.
    pub intensity: u32,
    pub pattern_density: u32,
}

impl Default for EffectParams {
    fn default() -> Self {
        Self {
            outline_width: 2,
            shadow_offset: 3,
            intensity: 70,
            pattern_density: 5,
        }
    }
}

/// Immutable watermark configuration shared by every render in a batch.
#[derive(Debug, Clone)]
pub struct WatermarkSpec {
    pub template: TextTemplate,
    pub opacity: f32,
    pub angle_degrees: i32,
    pub font_family: String,
    pub font_size: u32,
    pub color: ResolvedColor,
    pub color_spec: String,
    pub density: u32,
    pub position: PositionMode,
    pub effect: Effect,
    pub effect_params: EffectParams,
}

impl WatermarkSpec {
    pub fn builder() -> WatermarkSpecBuilder {
        WatermarkSpecBuilder::default()
    }

    pub fn text_for(&self, recipient: &str) -> String {
        self.template.render(recipient)
    }
}

#[derive(Debug, Clone)]
pub struct WatermarkSpecBuilder {
    template: TextTemplate,
    opacity: f32,
    angle_degrees: i32,
    font_family: String,
    font_size: u32,
    color: String,
    density: u32,
    position: PositionMode,
    effect: Effect,
    effect_params: EffectParams,
}

impl Default for WatermarkSpecBuilder {
    fn default() -> Self {
        Self {
            template: TextTemplate::default(),
            opacity: 0.24,
            angle_degrees: 45,
            font_family: "Helvetica".to_string(),
            font_size: 48,
            color: "#FF0000".to_string(),
            density: 7,
            position: PositionMode::Tile,
            effect: Effect::Outline,
            effect_params: EffectParams::default(),
        }
    }
}

impl WatermarkSpecBuilder {
    pub fn template(mut self, prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        self.template = TextTemplate::new(prefix, suffix);
        self
    }

    pub fn opacity(mut self, opacity: f32) -> Self {
        self.opacity = opacity;
        self
    }

    pub fn angle(mut self, degrees: i32) -> Self {
        self.angle_degrees = degrees;
        self
    }

    pub fn font_family(mut self, family: impl Into<String>) -> Self {
        self.font_family = family.into();
        self
    }

    pub fn font_size(mut self, size: u32) -> Self {
        self.font_size = size;
        self
    }

    pub fn color(mut self, color: impl Into<String>) -> Self {
        self.color = color.into();
        self
    }

    pub fn density(mut self, density: u32) -> Self {
        self.density = density;
        self
    }

    pub fn position(mut self, position: PositionMode) -> Self {
        self.position = position;
        self
    }

    pub fn effect(mut self, effect: Effect) -> Self {
        self.effect = effect;
        self
    }

    pub fn effect_params(mut self, params: EffectParams) -> Self {
        self.effect_params = params;
        self
    }

    pub fn build(self) -> Result<WatermarkSpec, BatchmarkError> {
        if !(0.0..=1.0).contains(&self.opacity) || !self.opacity.is_finite() {
            return Err(BatchmarkError::InvalidConfiguration(format!(
                "opacity must be within 0..=1, got {}",
                self.opacity
            )));
        }
        if !(1..=MAX_DENSITY).contains(&self.density) {
            return Err(BatchmarkError::InvalidConfiguration(format!(
                "density must be within 1..={MAX_DENSITY}, got {}",
                self.density
            )));
        }
        if self.font_size == 0 {
            return Err(BatchmarkError::InvalidConfiguration(
                "font size must be positive".to_string(),
            ));
        }
        let p = self.effect_params;
        let in_range = |v: u32| (1..=MAX_EFFECT_PARAM).contains(&v);
        if !(in_range(p.outline_width) && in_range(p.shadow_offset) && in_range(p.pattern_density)) {
            return Err(BatchmarkError::InvalidConfiguration(format!(
                "effect parameters must be within 1..={MAX_EFFECT_PARAM}: outline_width={} shadow_offset={} pattern_density={}",
                p.outline_width, p.shadow_offset, p.pattern_density
            )));
        }
        if p.intensity > 100 {
            return Err(BatchmarkError::InvalidConfiguration(format!(
                "effect intensity must be within 0..=100, got {}",
                p.intensity
            )));
        }
        Ok(WatermarkSpec {
            template: self.template,
            opacity: self.opacity,
            angle_degrees: self.angle_degrees,
            font_family: self.font_family,
            font_size: self.font_size,
            color: resolve_color(&self.color),
            color_spec: self.color,
            density: self.density,
            position: self.position,
            effect: self.effect,
            effect_params: self.effect_params,
        })
    }
}

/// JPEG compression tier for the rasterized path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionLevel {
    None,
    Light,
    Medium,
    High,
}

impl CompressionLevel {
    /// Out-of-range tiers map to the highest quality.
    pub fn from_tier(tier: u8) -> Self {
        match tier {
            1 => CompressionLevel::Light,
            2 => CompressionLevel::Medium,
            3 => CompressionLevel::High,
            _ => CompressionLevel::None,
        }
    }

    pub fn jpeg_quality(self) -> u8 {
        match self {
            CompressionLevel::None => 95,
            CompressionLevel::Light => 85,
            CompressionLevel::Medium => 70,
            CompressionLevel::High => 50,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOptions {
    /// Flatten pages to images. Destroys text selectability.
    pub rasterize: bool,
    pub dpi: u32,
    pub compression: CompressionLevel,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            rasterize: true,
            dpi: 200,
            compression: CompressionLevel::Medium,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_wraps_recipient() {
        let template = TextTemplate::new("CONF:", ":END");
        assert_eq!(template.render("Acme"), "CONF:Acme:END");
    }

    #[test]
    fn builder_rejects_out_of_range_opacity() {
        let err = WatermarkSpec::builder().opacity(1.5).build().unwrap_err();
        assert!(matches!(err, BatchmarkError::InvalidConfiguration(_)));
    }

    #[test]
    fn builder_rejects_zero_density_and_zero_effect_params() {
        assert!(WatermarkSpec::builder().density(0).build().is_err());
        let params = EffectParams {
            outline_width: 0,
            ..EffectParams::default()
        };
        assert!(WatermarkSpec::builder().effect_params(params).build().is_err());
    }

    #[test]
    fn builder_caps_density() {
        assert!(WatermarkSpec::builder().density(MAX_DENSITY).build().is_ok());
        for density in [MAX_DENSITY + 1, 70_000, u32::MAX] {
            let err = WatermarkSpec::builder().density(density).build().unwrap_err();
            assert!(matches!(err, BatchmarkError::InvalidConfiguration(_)), "density={density}");
        }
        let params = EffectParams {
            outline_width: u32::MAX,
            ..EffectParams::default()
        };
        assert!(WatermarkSpec::builder().effect_params(params).build().is_err());
    }

    #[test]
    fn builder_resolves_color_once() {
        let spec = WatermarkSpec::builder().color("not-a-color").build().unwrap();
        assert_eq!(spec.color.rgb8, crate::types::Rgb8::new(255, 0, 0));
        assert_eq!(spec.color_spec, "not-a-color");
    }

    #[test]
    fn compression_tiers_map_to_quality() {
        let q: Vec<u8> = (0..=4)
            .map(|t| CompressionLevel::from_tier(t).jpeg_quality())
            .collect();
        assert_eq!(q, vec![95, 85, 70, 50, 95]);
    }

    #[test]
    fn only_texture_is_non_deterministic() {
        assert!(!Effect::Texture.is_deterministic());
        for effect in [Effect::None, Effect::Outline, Effect::Shadow, Effect::Emboss] {
            assert!(effect.is_deterministic());
        }
        assert_eq!(Effect::parse("Shadow"), Effect::Shadow);
        assert_eq!(Effect::parse("sparkle"), Effect::None);
    }
}
