use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Cross-platform sans-serif stack with CJK coverage. Rasterizers that lack the fonts a diagram
/// was laid out with drop glyphs silently, so every export copy forces this list.
pub const DEFAULT_FONT_FAMILY: &str = "\"Noto Sans SC\", \"Noto Sans CJK SC\", \"Source Han Sans SC\", \"Microsoft YaHei\", \"PingFang SC\", \"Hiragino Sans GB\", \"WenQuanYi Micro Hei\", Arial, Helvetica, sans-serif";

pub const RASTER_EXTENSION: &str = "png";
pub const RASTER_MIME: &str = "image/png";
pub const VECTOR_EXTENSION: &str = "svg";
pub const VECTOR_MIME: &str = "image/svg+xml";

/// Tunable export parameters.
///
/// Scale, margin and the fallback size are deliberately configuration: hosts disagree on whether
/// device-pixel scaling applies and on the margin width.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct ExportConfig {
    /// Device pixel ratio applied to the output. Clamped to `[1, 3]` at use.
    pub scale: f64,
    /// Logical (unscaled) margin around the diagram on every side.
    pub margin: f64,
    pub default_width: f64,
    pub default_height: f64,
    /// Opaque CSS color used for the canvas and the injected background shape.
    pub background: String,
    pub font_family: String,
    pub max_inline_payload_bytes: usize,
    pub max_surface_side: u32,
    pub release_delay_ms: u64,
    pub fallback_file_stem: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            scale: 2.0,
            margin: 16.0,
            default_width: 1024.0,
            default_height: 768.0,
            background: "#ffffff".to_string(),
            font_family: DEFAULT_FONT_FAMILY.to_string(),
            max_inline_payload_bytes: 2 * 1024 * 1024,
            max_surface_side: 16384,
            release_delay_ms: 1000,
            fallback_file_stem: "diagram".to_string(),
        }
    }
}

impl ExportConfig {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: &str| {
            Err(ConfigError::Invalid {
                message: message.to_string(),
            })
        };
        if !(self.margin.is_finite() && self.margin >= 0.0) {
            return invalid("margin must be a non-negative number");
        }
        if !(self.default_width.is_finite() && self.default_width > 0.0)
            || !(self.default_height.is_finite() && self.default_height > 0.0)
        {
            return invalid("default size must be positive");
        }
        if crate::raster::parse_color(&self.background).is_none_or(|c| c.alpha() < 1.0) {
            return invalid("background must be an opaque color");
        }
        if self.max_surface_side == 0 {
            return invalid("maxSurfaceSide must be positive");
        }
        Ok(())
    }

    /// Scale actually used for rasterization.
    pub fn effective_scale(&self) -> f64 {
        clamp_scale(self.scale)
    }

    pub fn release_delay(&self) -> Duration {
        Duration::from_millis(self.release_delay_ms)
    }
}

/// Bounds memory use regardless of display density.
pub fn clamp_scale(scale: f64) -> f64 {
    if scale.is_finite() {
        scale.clamp(1.0, 3.0)
    } else {
        1.0
    }
}
