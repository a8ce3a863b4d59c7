//! Stroke label sequencing.
//!
//! Labels are scoped to one `ImageContext`. Two schemes:
//! - `letters`: the first unused of `A`..`Z`, so gaps are filled.
//! - `letters+numbers`: continue after the highest `(letter, number)` pair,
//!   rolling from `X99` to `Y1`.
//!
//! Running past `Z` is a capacity error, not a silent wrap.

use crate::id::StrokeLabel;
use crate::model::LabelMode;
use thiserror::Error;

/// Highest number before the letter rolls over.
pub const MAX_LABEL_NUMBER: u32 = 99;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LabelError {
    #[error("no labels left in {mode} mode")]
    OutOfLabels { mode: LabelMode },
}

/// Pick the next label for a context.
///
/// `predicted` is an externally maintained guess. It is used as-is when it
/// matches `mode`'s pattern and is not already taken; otherwise the
/// existing labels are scanned.
///
/// # Errors
/// `LabelError::OutOfLabels` when the scheme is exhausted.
pub fn next_label<'a>(
    existing: impl IntoIterator<Item = &'a str>,
    mode: LabelMode,
    predicted: Option<&str>,
) -> Result<StrokeLabel, LabelError> {
    let existing: Vec<&str> = existing.into_iter().collect();

    if let Some(guess) = predicted.map(str::trim)
        && matches_mode(guess, mode)
        && !existing.contains(&guess)
    {
        return Ok(StrokeLabel::intern(guess));
    }

    let next = match mode {
        LabelMode::Letters => next_letter(&existing),
        LabelMode::LettersAndNumbers => next_numbered(&existing),
    };

    match next {
        Some(label) => Ok(StrokeLabel::intern(&label)),
        None => {
            log::warn!("label sequence exhausted in {mode} mode");
            Err(LabelError::OutOfLabels { mode })
        }
    }
}

/// Whether `label` is well-formed for `mode` (`^[A-Z]$` or `^[A-Z]\d+$`).
pub fn matches_mode(label: &str, mode: LabelMode) -> bool {
    match mode {
        LabelMode::Letters => single_letter(label).is_some(),
        LabelMode::LettersAndNumbers => numbered(label).is_some(),
    }
}

fn single_letter(label: &str) -> Option<u8> {
    match label.as_bytes() {
        [c] if c.is_ascii_uppercase() => Some(*c),
        _ => None,
    }
}

fn numbered(label: &str) -> Option<(u8, u32)> {
    let (&letter, digits) = label.as_bytes().split_first()?;
    if !letter.is_ascii_uppercase() || digits.is_empty() || !digits.iter().all(u8::is_ascii_digit)
    {
        return None;
    }
    let number = label[1..].parse::<u32>().ok()?;
    Some((letter, number))
}

fn next_letter(existing: &[&str]) -> Option<String> {
    let mut used = [false; 26];
    for letter in existing.iter().filter_map(|l| single_letter(l)) {
        used[(letter - b'A') as usize] = true;
    }
    used.iter()
        .position(|taken| !taken)
        .map(|i| char::from(b'A' + i as u8).to_string())
}

fn next_numbered(existing: &[&str]) -> Option<String> {
    let Some((letter, number)) = existing.iter().filter_map(|l| numbered(l)).max() else {
        return Some("A1".to_string());
    };

    if number < MAX_LABEL_NUMBER {
        return Some(format!("{}{}", char::from(letter), number + 1));
    }
    if letter == b'Z' {
        return None;
    }
    Some(format!("{}1", char::from(letter + 1)))
}
