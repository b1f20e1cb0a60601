// Card deck: the fixed estimate vocabulary and raw-input classification.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Point values
// ---------------------------------------------------------------------------

/// The numeric sequence, expressed in half points so every card value is an
/// exact integer: 0, 0.5, 1, 2, 3, 5, 8, 13, 21, 34, 55, 89.
const SEQUENCE_HALVES: [u32; 12] = [0, 1, 2, 4, 6, 10, 16, 26, 42, 68, 110, 178];

/// An exact, non-negative story point value stored as a count of half points.
///
/// Equality and ordering are exact; floating point only appears when a value
/// is handed to statistics or to the record store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(into = "f64", try_from = "f64")]
pub struct Points(u32);

impl Points {
    pub const ZERO: Points = Points(0);

    /// Build a value from a count of half points (`from_halves(1)` is 0.5).
    pub const fn from_halves(halves: u32) -> Self {
        Points(halves)
    }

    /// Build a whole-number value.
    pub const fn whole(points: u32) -> Self {
        Points(points * 2)
    }

    pub const fn halves(self) -> u32 {
        self.0
    }

    pub fn as_f64(self) -> f64 {
        f64::from(self.0) / 2.0
    }

    /// Convert a float back into an exact value. Returns `None` for negative,
    /// non-finite, or values that are not a multiple of one half.
    pub fn from_f64(value: f64) -> Option<Self> {
        if !value.is_finite() || value < 0.0 {
            return None;
        }
        let doubled = value * 2.0;
        if doubled.fract() != 0.0 || doubled > f64::from(u32::MAX) {
            return None;
        }
        Some(Points(doubled as u32))
    }

    /// Whether this value is one of the cards in the deck.
    pub fn is_card(self) -> bool {
        SEQUENCE_HALVES.contains(&self.0)
    }

    pub fn saturating_add(self, other: Points) -> Points {
        Points(self.0.saturating_add(other.0))
    }
}

impl fmt::Display for Points {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 % 2 == 0 {
            write!(f, "{}", self.0 / 2)
        } else {
            write!(f, "{}.5", self.0 / 2)
        }
    }
}

impl From<Points> for f64 {
    fn from(points: Points) -> f64 {
        points.as_f64()
    }
}

impl TryFrom<f64> for Points {
    type Error = String;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Points::from_f64(value).ok_or_else(|| format!("{value} is not a half-point value"))
    }
}

// ---------------------------------------------------------------------------
// Cards
// ---------------------------------------------------------------------------

/// The two non-numeric cards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpecialCard {
    /// `?`: the participant needs more information.
    Unknown,
    /// `∞`: the story is too big to size as written.
    TooComplex,
}

impl SpecialCard {
    pub fn label(self) -> &'static str {
        match self {
            SpecialCard::Unknown => "?",
            SpecialCard::TooComplex => "∞",
        }
    }

    /// Human-readable meaning shown next to a participant who played this card.
    pub fn meaning(self) -> &'static str {
        match self {
            SpecialCard::Unknown => "needs more information",
            SpecialCard::TooComplex => "too complex, consider splitting",
        }
    }

    fn from_label(s: &str) -> Option<Self> {
        match s {
            "?" => Some(SpecialCard::Unknown),
            "∞" => Some(SpecialCard::TooComplex),
            _ => None,
        }
    }
}

impl fmt::Display for SpecialCard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A classified card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Card {
    Numeric(Points),
    Special(SpecialCard),
}

impl Card {
    /// Canonical text stored for this card (`"0.5"`, `"13"`, `"?"`, `"∞"`).
    pub fn label(&self) -> String {
        match self {
            Card::Numeric(points) => points.to_string(),
            Card::Special(special) => special.label().to_string(),
        }
    }

    pub fn points(&self) -> Option<Points> {
        match self {
            Card::Numeric(points) => Some(*points),
            Card::Special(_) => None,
        }
    }
}

impl fmt::Display for Card {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Card::Numeric(points) => write!(f, "{points}"),
            Card::Special(special) => write!(f, "{special}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CardError {
    #[error("`{raw}` is not a card in the deck")]
    InvalidCard { raw: String },
}

/// The full deck in display order: the numeric sequence, then `?` and `∞`.
pub fn deck() -> Vec<Card> {
    SEQUENCE_HALVES
        .iter()
        .map(|&h| Card::Numeric(Points(h)))
        .chain([
            Card::Special(SpecialCard::Unknown),
            Card::Special(SpecialCard::TooComplex),
        ])
        .collect()
}

/// Classify a raw input against the deck.
///
/// Numeric input is plain decimal text (digits and at most one `.`, no sign
/// or exponent) and must equal one of the sequence values exactly; there is
/// no rounding to the nearest card. `"5.0"` is the card `5`.
pub fn classify(raw: &str) -> Result<Card, CardError> {
    let trimmed = raw.trim();
    if let Some(special) = SpecialCard::from_label(trimmed) {
        return Ok(Card::Special(special));
    }

    Some(trimmed)
        .filter(|text| is_plain_decimal(text))
        .and_then(|text| text.parse::<f64>().ok())
        .and_then(Points::from_f64)
        .filter(|points| points.is_card())
        .map(Card::Numeric)
        .ok_or_else(|| CardError::InvalidCard {
            raw: raw.to_string(),
        })
}

fn is_plain_decimal(text: &str) -> bool {
    text.chars().any(|c| c.is_ascii_digit())
        && text.chars().all(|c| c.is_ascii_digit() || c == '.')
        && text.matches('.').count() <= 1
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_every_deck_label() {
        for card in deck() {
            assert_eq!(classify(&card.label()).unwrap(), card);
        }
    }

    #[test]
    fn deck_order_and_size() {
        let labels: Vec<String> = deck().iter().map(Card::label).collect();
        assert_eq!(
            labels,
            vec!["0", "0.5", "1", "2", "3", "5", "8", "13", "21", "34", "55", "89", "?", "∞"]
        );
    }

    #[test]
    fn special_tokens() {
        assert_eq!(classify("?").unwrap(), Card::Special(SpecialCard::Unknown));
        assert_eq!(classify(" ∞ ").unwrap(), Card::Special(SpecialCard::TooComplex));
    }

    #[test]
    fn numeric_value_equality_not_text_equality() {
        assert_eq!(classify("5.0").unwrap(), Card::Numeric(Points::whole(5)));
        assert_eq!(classify(".5").unwrap(), Card::Numeric(Points::from_halves(1)));
        assert_eq!(classify("8.000").unwrap(), Card::Numeric(Points::whole(8)));
        assert_eq!(classify("8.000").unwrap().label(), "8");
    }

    #[test]
    fn rejects_signs_and_exponents() {
        for raw in ["-0", "+5", "5e0", "0.5E0", "+0.5", "1..", "."] {
            assert!(classify(raw).is_err(), "{raw} should be rejected");
        }
    }

    #[test]
    fn rejects_values_outside_the_deck() {
        for raw in ["4", "-1", "100", "1.5", "0.25", "abc", "", "inf", "NaN", "??"] {
            assert_eq!(
                classify(raw),
                Err(CardError::InvalidCard { raw: raw.to_string() }),
                "{raw} should be rejected"
            );
        }
    }

    #[test]
    fn points_display_and_float_round_trip() {
        assert_eq!(Points::from_halves(1).to_string(), "0.5");
        assert_eq!(Points::whole(89).to_string(), "89");
        assert_eq!(Points::from_f64(0.5), Some(Points::from_halves(1)));
        assert_eq!(Points::from_f64(0.3), None);
        assert_eq!(Points::from_f64(-2.0), None);
        assert!((Points::whole(13).as_f64() - 13.0).abs() < f64::EPSILON);
    }

    #[test]
    fn special_meanings() {
        assert_eq!(SpecialCard::Unknown.meaning(), "needs more information");
        assert_eq!(
            SpecialCard::TooComplex.meaning(),
            "too complex, consider splitting"
        );
    }
}
