//! JSON settings file. Every key is optional; missing keys take the
//! defaults below. Settings are read-only.

use crate::error::BatchmarkError;
use crate::mail::{DEFAULT_BODY, DEFAULT_SUBJECT, MailTemplate};
use crate::watermark::{
    CompressionLevel, Effect, EffectParams, PositionMode, RenderOptions, WatermarkSpec,
};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Percent, 0..=100.
    pub opacity: u32,
    pub angle: i32,
    pub font_size: u32,
    pub font_family: String,
    pub text_color: String,
    pub effect_type: String,
    pub effect_intensity: u32,
    pub outline_width: u32,
    pub shadow_offset: u32,
    pub pattern_density: u32,
    pub watermark_density: u32,
    pub watermark_position: String,
    /// Rasterization DPI.
    pub conversion_quality: u32,
    pub compression_level: u8,
    pub filename_pattern: String,
    pub enable_rasterize: bool,
    pub prefix: String,
    pub suffix: String,
    pub email_subject: String,
    pub email_body: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            opacity: 24,
            angle: 45,
            font_size: 48,
            font_family: "黑体".to_string(),
            text_color: "#FF0000".to_string(),
            effect_type: "outline".to_string(),
            effect_intensity: 70,
            outline_width: 2,
            shadow_offset: 3,
            pattern_density: 5,
            watermark_density: 7,
            watermark_position: "tile".to_string(),
            conversion_quality: 200,
            compression_level: 2,
            filename_pattern: "文件名{company}".to_string(),
            enable_rasterize: true,
            prefix: "IDC圈：仅限".to_string(),
            suffix: "内部使用，转发侵权".to_string(),
            email_subject: DEFAULT_SUBJECT.to_string(),
            email_body: DEFAULT_BODY.to_string(),
        }
    }
}

impl Settings {
    pub fn from_json(text: &str) -> Result<Self, BatchmarkError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, BatchmarkError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn watermark_spec(&self) -> Result<WatermarkSpec, BatchmarkError> {
        let position = PositionMode::parse(&self.watermark_position).ok_or_else(|| {
            BatchmarkError::InvalidConfiguration(format!(
                "unknown watermark position {:?}",
                self.watermark_position
            ))
        })?;
        WatermarkSpec::builder()
            .template(self.prefix.clone(), self.suffix.clone())
            .opacity(self.opacity as f32 / 100.0)
            .angle(self.angle)
            .font_family(self.font_family.clone())
            .font_size(self.font_size)
            .color(self.text_color.clone())
            .density(self.watermark_density)
            .position(position)
            .effect(Effect::parse(&self.effect_type))
            .effect_params(EffectParams {
                outline_width: self.outline_width,
                shadow_offset: self.shadow_offset,
                intensity: self.effect_intensity,
                pattern_density: self.pattern_density,
            })
            .build()
    }

    pub fn render_options(&self) -> Result<RenderOptions, BatchmarkError> {
        if self.conversion_quality == 0 {
            return Err(BatchmarkError::InvalidConfiguration(
                "conversion_quality (DPI) must be positive".to_string(),
            ));
        }
        Ok(RenderOptions {
            rasterize: self.enable_rasterize,
            dpi: self.conversion_quality,
            compression: CompressionLevel::from_tier(self.compression_level),
        })
    }

    pub fn mail_template(&self) -> MailTemplate {
        MailTemplate::new(self.email_subject.clone(), self.email_body.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Rgb8;

    #[test]
    fn empty_object_yields_defaults() {
        let settings = Settings::from_json("{}").unwrap();
        assert_eq!(settings, Settings::default());

        let spec = settings.watermark_spec().unwrap();
        assert!((spec.opacity - 0.24).abs() < 1e-6);
        assert_eq!(spec.angle_degrees, 45);
        assert_eq!(spec.position, PositionMode::Tile);
        assert_eq!(spec.effect, Effect::Outline);
        assert_eq!(spec.density, 7);
        assert_eq!(spec.color.rgb8, Rgb8::new(255, 0, 0));
        assert_eq!(spec.text_for("Acme"), "IDC圈：仅限Acme内部使用，转发侵权");

        let options = settings.render_options().unwrap();
        assert!(options.rasterize);
        assert_eq!(options.dpi, 200);
        assert_eq!(options.compression, CompressionLevel::Medium);
    }

    #[test]
    fn partial_json_overrides_selected_keys() {
        let settings = Settings::from_json(
            r#"{"opacity": 50, "watermark_position": "center", "effect_type": "emboss", "enable_rasterize": false}"#,
        )
        .unwrap();
        let spec = settings.watermark_spec().unwrap();
        assert_eq!(spec.position, PositionMode::Center);
        assert_eq!(spec.effect, Effect::Emboss);
        assert!((spec.opacity - 0.5).abs() < 1e-6);
        assert!(!settings.render_options().unwrap().rasterize);
        assert_eq!(settings.font_size, 48);
    }

    #[test]
    fn invalid_values_are_configuration_errors() {
        let bad_position = Settings {
            watermark_position: "diagonal".to_string(),
            ..Settings::default()
        };
        assert!(matches!(
            bad_position.watermark_spec(),
            Err(BatchmarkError::InvalidConfiguration(_))
        ));
        let too_opaque = Settings {
            opacity: 150,
            ..Settings::default()
        };
        assert!(too_opaque.watermark_spec().is_err());
        let zero_dpi = Settings {
            conversion_quality: 0,
            ..Settings::default()
        };
        assert!(zero_dpi.render_options().is_err());
    }

    #[test]
    fn malformed_json_is_a_settings_error() {
        assert!(matches!(
            Settings::from_json("{\"opacity\": \"high\"}"),
            Err(BatchmarkError::Settings(_))
        ));
    }
}
