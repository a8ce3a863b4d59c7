//! Core annotation data model.
//!
//! Strokes are drawn by an external layer; this crate only keeps what it
//! needs to reason about them: the native geometry used for closest-point
//! queries, the typed role of each external entity, and the measurement
//! attached to a stroke.

use crate::id::StrokeKey;
use kurbo::{Affine, BezPath, CubicBez, Line, Point, QuadBez};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;
use thiserror::Error;

// ─── Geometry ────────────────────────────────────────────────────────────

/// Native representation of a drawn stroke, in the entity's local frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Geometry {
    /// Straight measuring line.
    Segment(Line),

    /// Raw freehand point list, used as-is for sampling.
    Polyline(SmallVec<[Point; 16]>),

    /// Single quadratic curve.
    Quad(QuadBez),

    /// Single cubic curve.
    Cubic(CubicBez),

    /// Multi-command path (smoothed freehand, curve tool output).
    Path(BezPath),

    /// Grouped shape, e.g. an arrow: a shaft segment plus heads.
    Compound(Vec<Part>),
}

/// One member of a `Geometry::Compound`, placed inside the group frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Part {
    pub transform: Affine,
    pub geometry: Geometry,
}

impl Part {
    pub fn new(geometry: Geometry) -> Self {
        Self {
            transform: Affine::IDENTITY,
            geometry,
        }
    }
}

impl Geometry {
    /// Which closest-point strategy applies to this shape.
    pub fn kind(&self) -> StrokeKind {
        match self {
            Geometry::Segment(_) => StrokeKind::Segment,
            Geometry::Polyline(_) | Geometry::Path(_) => StrokeKind::Path,
            Geometry::Quad(_) | Geometry::Cubic(_) => StrokeKind::Curve,
            Geometry::Compound(_) => StrokeKind::Compound,
        }
    }
}

/// Stroke classification used to pick a closest-point strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrokeKind {
    Segment,
    Path,
    Curve,
    Compound,
}

// ─── Entity roles ────────────────────────────────────────────────────────

/// What an external drawing entity means to the engine.
///
/// The mapping runs one way: external `EntityId` → role. Nothing is ever
/// written back onto the external entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityRole {
    /// A measured stroke.
    Stroke { key: StrokeKey, kind: StrokeKind },
    /// The draggable label bound to a stroke.
    Tag { key: StrokeKey },
    /// The line between a tag and its stroke.
    Connector { key: StrokeKey },
}

impl EntityRole {
    pub fn key(&self) -> StrokeKey {
        match self {
            EntityRole::Stroke { key, .. }
            | EntityRole::Tag { key }
            | EntityRole::Connector { key } => *key,
        }
    }
}

// ─── Measurement ─────────────────────────────────────────────────────────

pub const CM_PER_INCH: f64 = 2.54;

/// A stroke's real-world length.
///
/// `centimeters ≈ (whole_inches + fractional_inches) * 2.54`. Build it with
/// `Measurement::from_inches` or the text parser to keep that true.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub whole_inches: u32,
    /// In `[0, 1)`, rounded to two decimals.
    pub fractional_inches: f64,
    /// Rounded to four decimals.
    pub centimeters: f64,
}

impl Measurement {
    /// Canonicalize a total length in inches. Returns `None` for negative or
    /// non-finite input.
    pub fn from_inches(total: f64) -> Option<Self> {
        if !total.is_finite() || total < 0.0 || total > u32::MAX as f64 {
            return None;
        }
        let mut whole = total.floor();
        let mut fraction = round_to(total - whole, 2);
        if fraction >= 1.0 {
            whole += 1.0;
            fraction = 0.0;
        }
        Some(Self {
            whole_inches: whole as u32,
            fractional_inches: fraction,
            centimeters: round_to(total * CM_PER_INCH, 4),
        })
    }

    pub fn total_inches(&self) -> f64 {
        self.whole_inches as f64 + self.fractional_inches
    }

    pub fn is_zero(&self) -> bool {
        self.whole_inches == 0 && self.fractional_inches == 0.0
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Unit the user currently reads and types lengths in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayUnit {
    #[default]
    Inch,
    Centimeter,
}

// ─── Labels & tags ───────────────────────────────────────────────────────

/// How new stroke labels are generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LabelMode {
    /// `A`, `B`, `C`, ...
    Letters,
    /// `A1`, `A2`, ..., `A99`, `B1`, ...
    #[default]
    LettersAndNumbers,
}

impl fmt::Display for LabelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LabelMode::Letters => f.write_str("letters"),
            LabelMode::LettersAndNumbers => f.write_str("letters+numbers"),
        }
    }
}

/// Outline of a tag's background.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagShape {
    /// Minimal corner rounding.
    #[default]
    Square,
    /// Capsule: corner radius is half the height.
    Circle,
}

impl TagShape {
    pub fn corner_radius(self, height: f64) -> f64 {
        match self {
            TagShape::Square => 2.0,
            TagShape::Circle => height / 2.0,
        }
    }
}

// ─── Colors ──────────────────────────────────────────────────────────────

/// 8-bit RGBA color. Serialized as `#rrggbb`, or `#rrggbbaa` when not
/// opaque.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid color {0:?}")]
pub struct InvalidColor(pub String);

impl Color {
    pub const BLACK: Color = Color::rgb(0, 0, 0);
    pub const WHITE: Color = Color::rgb(255, 255, 255);
    pub const TRANSPARENT: Color = Color {
        r: 0,
        g: 0,
        b: 0,
        a: 0,
    };
    /// Stroke color used until the host sets one.
    pub const DEFAULT_STROKE: Color = Color::rgb(0x3b, 0x82, 0xf6);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    /// Parse `#rgb`, `#rrggbb` or `#rrggbbaa`. The `#` is optional.
    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.strip_prefix('#').unwrap_or(hex);
        let digits: Vec<u8> = hex
            .chars()
            .map(|c| c.to_digit(16).map(|d| d as u8))
            .collect::<Option<_>>()?;
        let byte = |i: usize| digits[i] << 4 | digits[i + 1];
        match digits.len() {
            3 => Some(Self::rgb(digits[0] * 17, digits[1] * 17, digits[2] * 17)),
            6 => Some(Self::rgb(byte(0), byte(2), byte(4))),
            8 => Some(Self {
                r: byte(0),
                g: byte(2),
                b: byte(4),
                a: byte(6),
            }),
            _ => None,
        }
    }

    pub fn is_transparent(self) -> bool {
        self.a == 0
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)?;
        if self.a != 255 {
            write!(f, "{:02x}", self.a)?;
        }
        Ok(())
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        color.to_string()
    }
}

impl TryFrom<String> for Color {
    type Error = InvalidColor;

    fn try_from(text: String) -> Result<Self, Self::Error> {
        Color::from_hex(&text).ok_or(InvalidColor(text))
    }
}

/// Fill and outline treatment of tag backgrounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TagBackground {
    /// White fill, black outline and text.
    #[default]
    Solid,
    /// Text only, in the stroke color.
    NoFill,
    ClearBlack,
    /// Outline and text in the stroke color.
    ClearColor,
    ClearWhite,
}

/// Resolved paint for one tag.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TagColors {
    pub fill: Color,
    pub border: Color,
    pub border_width: f64,
    pub text: Color,
}

impl Default for TagColors {
    fn default() -> Self {
        TagBackground::Solid.colors(Color::DEFAULT_STROKE)
    }
}

impl TagBackground {
    pub fn colors(self, stroke: Color) -> TagColors {
        let clear = |outline: Color| TagColors {
            fill: Color::TRANSPARENT,
            border: outline,
            border_width: 1.0,
            text: outline,
        };
        match self {
            TagBackground::Solid => TagColors {
                fill: Color::WHITE,
                border: Color::BLACK,
                border_width: 1.0,
                text: Color::BLACK,
            },
            TagBackground::NoFill => TagColors {
                fill: Color::TRANSPARENT,
                border: Color::TRANSPARENT,
                border_width: 0.0,
                text: stroke,
            },
            TagBackground::ClearBlack => clear(Color::BLACK),
            TagBackground::ClearColor => clear(stroke),
            TagBackground::ClearWhite => clear(Color::WHITE),
        }
    }

    /// Whether `colors` depends on the stroke color.
    pub fn follows_stroke_color(self) -> bool {
        matches!(self, TagBackground::NoFill | TagBackground::ClearColor)
    }
}
