//! Engine configuration.
//!
//! Every field has a default, so a partial (or empty) JSON object is a valid
//! configuration.

use crate::geometry::SampleDensity;
use crate::model::{Color, DisplayUnit, LabelMode, TagBackground, TagShape};
use kurbo::Vec2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MIN_TAG_FONT_SIZE: f64 = 10.0;
pub const MAX_TAG_FONT_SIZE: f64 = 40.0;
/// Increment used by tag size up/down controls.
pub const TAG_FONT_STEP: f64 = 2.0;
/// Largest accepted undo depth.
pub const MAX_HISTORY_DEPTH: usize = 10_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid engine config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("history_depth {0} is outside 1..={MAX_HISTORY_DEPTH}")]
    HistoryDepth(usize),
}

// ─── Config ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Scheme for newly assigned labels. Default: **letters+numbers**.
    pub label_mode: LabelMode,

    /// Unit for bare-number input and tag text. Default: **inch**.
    pub display_unit: DisplayUnit,

    /// Append the formatted measurement to tag text. Default: **false**.
    pub show_measurements: bool,

    /// Undo stack bound; the oldest snapshot is dropped past this. Default: **50**.
    pub history_depth: usize,

    /// Samples per standalone quadratic/cubic curve. Default: **30**.
    pub curve_samples: usize,

    /// Subdivisions per line command inside a path. Default: **5**.
    pub line_samples: usize,

    /// Subdivisions per curve command inside a path. Default: **10**.
    pub path_curve_samples: usize,

    /// Tag placement relative to the stroke center when none is stored.
    pub default_tag_offset: Vec2,

    /// Tag text size, clamped to 10..=40. Default: **20**.
    pub tag_font_size: f64,

    /// Padding between tag text and its background. Default: **4**.
    pub tag_padding: f64,

    /// Estimated glyph advance as a fraction of font size. Default: **0.6**.
    pub char_width_factor: f64,

    pub tag_shape: TagShape,

    pub tag_background: TagBackground,

    /// Color of new strokes, as `#rrggbb`. Tags whose background follows
    /// the stroke color use it too. Default: **#3b82f6**.
    pub stroke_color: Color,

    /// How long to wait for the drawing layer to finish a restore before
    /// releasing the history lock anyway. Default: **2000**.
    pub restore_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            label_mode: LabelMode::default(),
            display_unit: DisplayUnit::default(),
            show_measurements: false,
            history_depth: 50,
            curve_samples: 30,
            line_samples: 5,
            path_curve_samples: 10,
            default_tag_offset: Vec2::new(20.0, -10.0),
            tag_font_size: 20.0,
            tag_padding: 4.0,
            char_width_factor: 0.6,
            tag_shape: TagShape::default(),
            tag_background: TagBackground::default(),
            stroke_color: Color::DEFAULT_STROKE,
            restore_timeout_ms: 2000,
        }
    }
}

impl EngineConfig {
    /// Load from JSON. Missing fields take their defaults; the font size is
    /// clamped into range.
    ///
    /// # Errors
    /// Returns `ConfigError::Json` on malformed input or a mistyped field,
    /// and `ConfigError::HistoryDepth` when the undo depth is zero or above
    /// `MAX_HISTORY_DEPTH`.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let mut config: EngineConfig = serde_json::from_str(text)?;
        if !(1..=MAX_HISTORY_DEPTH).contains(&config.history_depth) {
            return Err(ConfigError::HistoryDepth(config.history_depth));
        }
        config.tag_font_size = clamp_font_size(config.tag_font_size);
        log::debug!("loaded engine config: {config:?}");
        Ok(config)
    }

    pub fn density(&self) -> SampleDensity {
        SampleDensity {
            curve: self.curve_samples,
            path_line: self.line_samples,
            path_curve: self.path_curve_samples,
        }
    }
}

pub fn clamp_font_size(size: f64) -> f64 {
    if size.is_nan() {
        return MIN_TAG_FONT_SIZE;
    }
    size.clamp(MIN_TAG_FONT_SIZE, MAX_TAG_FONT_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_object_is_default() {
        let config = EngineConfig::from_json("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn partial_override() {
        let config = EngineConfig::from_json(
            r#"{ "label_mode": "letters", "display_unit": "centimeter", "history_depth": 10 }"#,
        )
        .unwrap();
        assert_eq!(config.label_mode, LabelMode::Letters);
        assert_eq!(config.display_unit, DisplayUnit::Centimeter);
        assert_eq!(config.history_depth, 10);
        assert_eq!(config.curve_samples, 30);
    }

    #[test]
    fn font_size_is_clamped() {
        let config = EngineConfig::from_json(r#"{ "tag_font_size": 96 }"#).unwrap();
        assert_eq!(config.tag_font_size, MAX_TAG_FONT_SIZE);
        assert_eq!(clamp_font_size(2.0), MIN_TAG_FONT_SIZE);
    }

    #[test]
    fn mistyped_field_is_an_error() {
        assert!(EngineConfig::from_json(r#"{ "history_depth": "lots" }"#).is_err());
    }

    #[test]
    fn absurd_history_depth_is_rejected() {
        let huge = EngineConfig::from_json(r#"{ "history_depth": 18446744073709551615 }"#);
        assert!(matches!(huge, Err(ConfigError::HistoryDepth(usize::MAX))));
        assert!(matches!(
            EngineConfig::from_json(r#"{ "history_depth": 0 }"#),
            Err(ConfigError::HistoryDepth(0))
        ));
        let max = EngineConfig::from_json(r#"{ "history_depth": 10000 }"#).unwrap();
        assert_eq!(max.history_depth, MAX_HISTORY_DEPTH);
    }

    #[test]
    fn tag_paint_from_json() {
        let config = EngineConfig::from_json(
            r##"{ "tag_background": "clear-color", "stroke_color": "#ff0000" }"##,
        )
        .unwrap();
        assert_eq!(config.tag_background, TagBackground::ClearColor);
        assert_eq!(config.stroke_color, Color::rgb(255, 0, 0));
        assert!(EngineConfig::from_json(r#"{ "stroke_color": "blue" }"#).is_err());
        assert!(EngineConfig::from_json(r#"{ "tag_background": "dotted" }"#).is_err());
    }

    #[test]
    fn density_follows_config() {
        let config = EngineConfig {
            curve_samples: 12,
            ..EngineConfig::default()
        };
        let density = config.density();
        assert_eq!(density.curve, 12);
        assert_eq!(density.path_line, 5);
        assert_eq!(density.path_curve, 10);
    }
}
