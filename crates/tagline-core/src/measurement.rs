//! Free-text length parsing and display formatting.
//!
//! Built on `winnow` 0.7. Each unit rule is anchored at both ends and tried
//! in a fixed order; the first rule that consumes the whole input wins:
//!
//! | Input            | Meaning                          |
//! |------------------|----------------------------------|
//! | `14 cm`          | centimeters                      |
//! | `1.2 m`          | meters                           |
//! | `350mm`          | millimeters                      |
//! | `3 ft`, `3'`     | feet                             |
//! | `2 yd`           | yards                            |
//! | `5 1/2"`, `.5in` | inches, whole and/or fraction    |
//! | `12`             | bare number in the display unit  |
//!
//! Empty input, or any input that amounts to zero, clears the measurement.

use crate::model::{CM_PER_INCH, DisplayUnit, Measurement};
use thiserror::Error;
use winnow::ascii::{Caseless, digit1, space0};
use winnow::combinator::{alt, eof, terminated};
use winnow::error::{ContextError, ErrMode};
use winnow::prelude::*;
use winnow::token::take_while;

const INCHES_PER_METER: f64 = 39.3701;
const MM_PER_INCH: f64 = 25.4;

/// Why a measurement string was rejected. The stored value stays as it was.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MeasurementError {
    #[error("unrecognized measurement {0:?}")]
    Unrecognized(String),
    #[error("zero denominator in fraction {0:?}")]
    ZeroDenominator(String),
    #[error("measurement {0:?} is negative or not finite")]
    OutOfRange(String),
}

/// Parse user input into a canonical measurement.
///
/// `Ok(None)` means "clear the measurement": empty input, or a length that
/// is zero once rounded (`0`, `0 cm`, `0.0"`).
///
/// # Errors
/// Returns `MeasurementError` when no rule matches or the value is invalid.
pub fn parse_measurement(
    text: &str,
    unit: DisplayUnit,
) -> Result<Option<Measurement>, MeasurementError> {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed == "0" {
        return Ok(None);
    }

    let total = match total_inches(trimmed, unit) {
        Some(Length::Inches(total)) => total,
        Some(Length::ZeroDenominator) => {
            return Err(MeasurementError::ZeroDenominator(trimmed.to_string()));
        }
        None => return Err(MeasurementError::Unrecognized(trimmed.to_string())),
    };

    let measurement = Measurement::from_inches(total)
        .ok_or_else(|| MeasurementError::OutOfRange(trimmed.to_string()))?;
    // An absent measurement is never stored as zero.
    if measurement.is_zero() && measurement.centimeters == 0.0 {
        return Ok(None);
    }
    Ok(Some(measurement))
}

/// Render a measurement in `unit`. `None` when there is nothing to show
/// (a zero length).
pub fn format_measurement(measurement: &Measurement, unit: DisplayUnit) -> Option<String> {
    match unit {
        DisplayUnit::Inch => {
            if measurement.is_zero() {
                return None;
            }
            let mut whole = measurement.whole_inches;
            let mut eighths = (measurement.fractional_inches * 8.0).round() as u32;
            if eighths >= 8 {
                whole += 1;
                eighths = 0;
            }
            match eighth_fraction(eighths) {
                Some(fraction) => Some(format!("{whole} {fraction}\"")),
                None => Some(format!("{whole}\"")),
            }
        }
        DisplayUnit::Centimeter => {
            if measurement.centimeters == 0.0 {
                return None;
            }
            Some(format!("{:.1} cm", measurement.centimeters))
        }
    }
}

/// Lookup table for eighth-inch fractions.
fn eighth_fraction(eighths: u32) -> Option<&'static str> {
    match eighths {
        1 => Some("1/8"),
        2 => Some("1/4"),
        3 => Some("3/8"),
        4 => Some("1/2"),
        5 => Some("5/8"),
        6 => Some("3/4"),
        7 => Some("7/8"),
        _ => None,
    }
}

// ─── Grammar ────────────────────────────────────────────────────────────

enum Length {
    Inches(f64),
    ZeroDenominator,
}

fn total_inches(text: &str, unit: DisplayUnit) -> Option<Length> {
    let scaled = |rule: fn(&mut &str) -> ModalResult<f64>, factor: f64| {
        run(rule, text).map(|v| Length::Inches(v * factor))
    };

    scaled(centimeters, 1.0 / CM_PER_INCH)
        .or_else(|| scaled(meters, INCHES_PER_METER))
        .or_else(|| scaled(millimeters, 1.0 / MM_PER_INCH))
        .or_else(|| scaled(feet, 12.0))
        .or_else(|| scaled(yards, 36.0))
        .or_else(|| inches(text))
        .or_else(|| {
            let factor = match unit {
                DisplayUnit::Inch => 1.0,
                DisplayUnit::Centimeter => 1.0 / CM_PER_INCH,
            };
            scaled(bare_number, factor)
        })
}

/// Run an anchored rule over the full input.
fn run<O>(mut rule: impl FnMut(&mut &str) -> ModalResult<O>, text: &str) -> Option<O> {
    let mut input = text;
    let value = rule(&mut input).ok()?;
    eof::<_, ContextError>.parse_next(&mut input).ok()?;
    Some(value)
}

/// `[.0-9]+` interpreted as a decimal.
fn decimal(input: &mut &str) -> ModalResult<f64> {
    let digits: &str = take_while(1.., |c: char| c.is_ascii_digit() || c == '.').parse_next(input)?;
    digits
        .parse::<f64>()
        .map_err(|_| ErrMode::Backtrack(ContextError::new()))
}

fn whole(input: &mut &str) -> ModalResult<u64> {
    digit1
        .try_map(|digits: &str| digits.parse::<u64>())
        .parse_next(input)
}

/// `<number> <unit>` followed by optional trailing space.
fn number_with_unit<'a>(
    input: &mut &'a str,
    units: &mut impl Parser<&'a str, &'a str, ErrMode<ContextError>>,
) -> ModalResult<f64> {
    let value = decimal.parse_next(input)?;
    space0.parse_next(input)?;
    units.parse_next(input)?;
    space0.parse_next(input)?;
    Ok(value)
}

fn centimeters(input: &mut &str) -> ModalResult<f64> {
    number_with_unit(
        input,
        &mut alt((Caseless("centimeters"), Caseless("centimeter"), Caseless("cm"))),
    )
}

fn meters(input: &mut &str) -> ModalResult<f64> {
    number_with_unit(
        input,
        &mut alt((Caseless("meters"), Caseless("meter"), Caseless("m"))),
    )
}

fn millimeters(input: &mut &str) -> ModalResult<f64> {
    number_with_unit(
        input,
        &mut alt((Caseless("millimeters"), Caseless("millimeter"), Caseless("mm"))),
    )
}

fn feet(input: &mut &str) -> ModalResult<f64> {
    number_with_unit(
        input,
        &mut alt((Caseless("feet"), Caseless("foot"), Caseless("ft"), "'")),
    )
}

fn yards(input: &mut &str) -> ModalResult<f64> {
    number_with_unit(
        input,
        &mut alt((Caseless("yards"), Caseless("yard"), Caseless("yd"))),
    )
}

fn bare_number(input: &mut &str) -> ModalResult<f64> {
    terminated(decimal, space0).parse_next(input)
}

/// Fraction or decimal part of an inch value.
#[derive(Debug, Clone, Copy)]
enum InchPart {
    Ratio(u64, u64),
    Decimal(f64),
}

fn ratio(input: &mut &str) -> ModalResult<InchPart> {
    (whole, '/', whole)
        .map(|(num, _, den)| InchPart::Ratio(num, den))
        .parse_next(input)
}

fn inch_part(input: &mut &str) -> ModalResult<InchPart> {
    alt((ratio, decimal.map(InchPart::Decimal))).parse_next(input)
}

fn inch_unit<'a>(input: &mut &'a str) -> ModalResult<&'a str> {
    alt((Caseless("inches"), Caseless("inch"), Caseless("in"), "\"")).parse_next(input)
}

/// `<whole>? <fraction-or-decimal>? ("|in|inch|inches)`, at least one part.
fn inch_value(input: &mut &str) -> ModalResult<(Option<u64>, Option<InchPart>)> {
    let parts = alt((
        (whole, space0, inch_part).map(|(w, _, part)| (Some(w), Some(part))),
        ratio.map(|part| (None, Some(part))),
        decimal.map(|d| (None, Some(InchPart::Decimal(d)))),
    ))
    .parse_next(input)?;
    space0.parse_next(input)?;
    inch_unit.parse_next(input)?;
    space0.parse_next(input)?;
    Ok(parts)
}

fn inches(text: &str) -> Option<Length> {
    let (whole, part) = run(inch_value, text)?;
    let whole = whole.unwrap_or(0) as f64;
    let fraction = match part {
        Some(InchPart::Ratio(_, 0)) => return Some(Length::ZeroDenominator),
        Some(InchPart::Ratio(num, den)) => num as f64 / den as f64,
        Some(InchPart::Decimal(d)) => d,
        None => 0.0,
    };
    Some(Length::Inches(whole + fraction))
}
