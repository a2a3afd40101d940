//! Canonical alignment encoder
//!
//! Lays a numbered chain out on the fixed 200-slot catalog. Each slot holds
//! the ASCII code of the residue numbered at that position, or 0 for a gap
//! or an unnumbered position. The all-zero vector is the sentinel for a
//! chain that could not be encoded; such records are stored in the
//! "unusual" partition instead of being dropped.
//!
//! Two input shapes are accepted:
//!
//! - structured `(PositionLabel, residue)` pairs, as produced by a
//!   numbering service
//! - the textual dictionary form found in bulk repertoire dumps, flat or
//!   nested one level under region keys:
//!
//! ```text
//! {'fwh1': {'1 ': 'Q', '2 ': 'V'}, 'cdrh3': {'111A': 'G'}}
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::bits::PositionBits;
use crate::numbering::{PositionLabel, CANONICAL_WIDTH};
use crate::simd;

/// Residue character that denotes a gap.
pub const GAP_RESIDUE: char = '-';

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodingError {
    #[error("Invalid position label: {0:?}")]
    InvalidLabel(String),

    #[error("Position {0} is not part of the canonical numbering")]
    UnknownPosition(PositionLabel),

    #[error("Invalid residue {residue:?} at position {label}")]
    InvalidResidue { label: String, residue: String },

    #[error("Malformed numbering text: {0}")]
    MalformedText(String),

    #[error("Width mismatch: expected {expected} codes, got {actual}")]
    WidthMismatch { expected: usize, actual: usize },

    #[error("Numbering failed for sequence {0:?}")]
    NumberingFailed(String),
}

/// Fixed-width encoded chain.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EncodedSequence([i8; CANONICAL_WIDTH]);

impl EncodedSequence {
    /// The "could not be encoded" sentinel.
    pub const fn sentinel() -> Self {
        Self([0; CANONICAL_WIDTH])
    }

    pub fn from_codes(codes: &[i8]) -> Result<Self, EncodingError> {
        if codes.len() != CANONICAL_WIDTH {
            return Err(EncodingError::WidthMismatch {
                expected: CANONICAL_WIDTH,
                actual: codes.len(),
            });
        }
        let mut out = [0i8; CANONICAL_WIDTH];
        out.copy_from_slice(codes);
        Ok(Self(out))
    }

    #[inline(always)]
    pub fn codes(&self) -> &[i8; CANONICAL_WIDTH] {
        &self.0
    }

    pub fn is_sentinel(&self) -> bool {
        self.0.iter().all(|c| *c == 0)
    }

    /// Slots that hold a residue
    pub fn occupied(&self) -> PositionBits {
        simd::nonzero_bits(&self.0)
    }

    /// Residue at a canonical slot, `None` for a gap.
    pub fn residue_at(&self, slot: usize) -> Option<char> {
        match self.0.get(slot) {
            Some(code) if *code > 0 => Some(*code as u8 as char),
            _ => None,
        }
    }

    /// Ungapped residue string in catalog order.
    pub fn residues(&self) -> String {
        (0..CANONICAL_WIDTH).filter_map(|s| self.residue_at(s)).collect()
    }
}

impl Default for EncodedSequence {
    fn default() -> Self {
        Self::sentinel()
    }
}

impl fmt::Debug for EncodedSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_sentinel() {
            return f.write_str("EncodedSequence(<sentinel>)");
        }
        write!(f, "EncodedSequence({})", self.residues())
    }
}

/// Storage partition a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Partition {
    Normal,
    Unusual,
}

impl Partition {
    pub fn suffix(&self) -> &'static str {
        match self {
            Partition::Normal => "normal",
            Partition::Unusual => "unusual",
        }
    }

    pub fn of(sequence: &EncodedSequence) -> Self {
        if sequence.is_sentinel() {
            Partition::Unusual
        } else {
            Partition::Normal
        }
    }
}

/// How encoding failures are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodingMode {
    /// Propagate the error.
    #[default]
    Strict,
    /// Substitute the sentinel and route the record to the unusual partition.
    Lenient,
}

/// Encoder input in either supported shape.
#[derive(Debug, Clone, Copy)]
pub enum NumberingInput<'a> {
    Pairs(&'a [(PositionLabel, char)]),
    Text(&'a str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedRecord {
    pub sequence: EncodedSequence,
    pub partition: Partition,
}

fn residue_code(label: &PositionLabel, residue: char) -> Result<i8, EncodingError> {
    if residue == GAP_RESIDUE {
        return Ok(0);
    }
    if !residue.is_ascii_graphic() {
        return Err(EncodingError::InvalidResidue {
            label: label.to_string(),
            residue: residue.to_string(),
        });
    }
    Ok(residue as u8 as i8)
}

/// Encode structured `(label, residue)` pairs.
pub fn encode_pairs(pairs: &[(PositionLabel, char)]) -> Result<EncodedSequence, EncodingError> {
    let mut codes = [0i8; CANONICAL_WIDTH];
    for (label, residue) in pairs {
        let slot = label
            .canonical_index()
            .ok_or(EncodingError::UnknownPosition(*label))?;
        codes[slot] = residue_code(label, *residue)?;
    }
    Ok(EncodedSequence(codes))
}

/// Pull `(label, residue)` pairs out of the textual dictionary form.
///
/// Python-literal quoting is accepted; labels and residues never contain
/// quote characters, so single quotes are rewritten before parsing.
pub fn extract_numbering_text(text: &str) -> Result<Vec<(PositionLabel, char)>, EncodingError> {
    let normalised = text.replace('\'', "\"");
    let value: Value = serde_json::from_str(&normalised)
        .map_err(|e| EncodingError::MalformedText(e.to_string()))?;

    let Value::Object(top) = value else {
        return Err(EncodingError::MalformedText(
            "expected a dictionary of positions".to_string(),
        ));
    };

    let mut pairs = Vec::with_capacity(CANONICAL_WIDTH);
    for (key, entry) in top {
        match entry {
            Value::Object(region) => {
                for (label, residue) in region {
                    pairs.push(parse_pair(&label, &residue)?);
                }
            }
            other => pairs.push(parse_pair(&key, &other)?),
        }
    }
    Ok(pairs)
}

fn parse_pair(label: &str, residue: &Value) -> Result<(PositionLabel, char), EncodingError> {
    let label_parsed: PositionLabel = label
        .parse()
        .map_err(|_| EncodingError::InvalidLabel(label.to_string()))?;

    let Value::String(residue) = residue else {
        return Err(EncodingError::MalformedText(format!(
            "residue at {label:?} is not a string"
        )));
    };

    let mut chars = residue.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok((label_parsed, c)),
        _ => Err(EncodingError::InvalidResidue {
            label: label.to_string(),
            residue: residue.clone(),
        }),
    }
}

/// Encode the textual dictionary form.
pub fn encode_numbering_text(text: &str) -> Result<EncodedSequence, EncodingError> {
    encode_pairs(&extract_numbering_text(text)?)
}

/// Mode-aware encoder used by ingestion and query preparation.
#[derive(Debug, Clone, Copy, Default)]
pub struct Encoder {
    mode: EncodingMode,
}

impl Encoder {
    pub fn new(mode: EncodingMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> EncodingMode {
        self.mode
    }

    pub fn encode(&self, input: NumberingInput<'_>) -> Result<EncodedRecord, EncodingError> {
        let encoded = match input {
            NumberingInput::Pairs(pairs) => encode_pairs(pairs),
            NumberingInput::Text(text) => encode_numbering_text(text),
        };
        self.resolve(encoded)
    }

    /// Apply the failure policy to an encoding outcome.
    pub fn resolve(
        &self,
        encoded: Result<EncodedSequence, EncodingError>,
    ) -> Result<EncodedRecord, EncodingError> {
        match encoded {
            Ok(sequence) => Ok(EncodedRecord {
                sequence,
                partition: Partition::of(&sequence),
            }),
            Err(err) => match self.mode {
                EncodingMode::Strict => Err(err),
                EncodingMode::Lenient => {
                    tracing::warn!("encoding failed, storing as unusual: {}", err);
                    Ok(EncodedRecord {
                        sequence: EncodedSequence::sentinel(),
                        partition: Partition::Unusual,
                    })
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(raw: &str) -> PositionLabel {
        raw.parse().unwrap()
    }

    fn sample_pairs() -> Vec<(PositionLabel, char)> {
        vec![
            (label("1"), 'Q'),
            (label("2"), 'V'),
            (label("3"), '-'),
            (label("27"), 'G'),
            (label("111A"), 'Y'),
            (label("112A"), 'D'),
            (label("128"), 'S'),
        ]
    }

    #[test]
    fn test_encode_pairs_places_residues() {
        let encoded = encode_pairs(&sample_pairs()).unwrap();
        assert_eq!(encoded.residue_at(0), Some('Q'));
        assert_eq!(encoded.residue_at(1), Some('V'));
        assert_eq!(encoded.residue_at(2), None, "gap encodes to 0");
        assert_eq!(encoded.residue_at(199), Some('S'));
        assert_eq!(encoded.occupied().count(), 6);
        assert_eq!(encoded.residues(), "QVGYDS");
    }

    #[test]
    fn test_text_shapes_match_pairs() {
        let nested = "{'fwh1': {'1 ': 'Q', '2 ': 'V', '3 ': '-'}, 'cdrh1': {'27 ': 'G'}, \
                      'cdrh3': {'111A': 'Y', '112A': 'D'}, 'fwh4': {'128 ': 'S'}}";
        let flat = r#"{"1": "Q", "2": "V", "3": "-", "27": "G", "111A": "Y", "112A": "D", "128": "S"}"#;

        let from_pairs = encode_pairs(&sample_pairs()).unwrap();
        assert_eq!(encode_numbering_text(nested).unwrap(), from_pairs);
        assert_eq!(encode_numbering_text(flat).unwrap(), from_pairs);
    }

    #[test]
    fn test_unknown_position_is_rejected() {
        let pairs = vec![(label("1"), 'Q'), (label("129"), 'A')];
        assert_eq!(
            encode_pairs(&pairs),
            Err(EncodingError::UnknownPosition(label("129")))
        );
    }

    #[test]
    fn test_invalid_text_inputs() {
        assert!(matches!(
            encode_numbering_text("not a dict"),
            Err(EncodingError::MalformedText(_))
        ));
        assert!(matches!(
            encode_numbering_text("['1', 'Q']"),
            Err(EncodingError::MalformedText(_))
        ));
        assert!(matches!(
            encode_numbering_text("{'x1': 'Q'}"),
            Err(EncodingError::InvalidLabel(_))
        ));
        assert!(matches!(
            encode_numbering_text("{'1': 'QV'}"),
            Err(EncodingError::InvalidResidue { .. })
        ));
        assert!(matches!(
            encode_numbering_text("{'1': 5}"),
            Err(EncodingError::MalformedText(_))
        ));
    }

    #[test]
    fn test_non_ascii_residue_is_rejected() {
        let pairs = vec![(label("1"), 'é')];
        assert!(matches!(
            encode_pairs(&pairs),
            Err(EncodingError::InvalidResidue { .. })
        ));
    }

    #[test]
    fn test_strict_and_lenient_modes() {
        let bad = vec![(label("1"), 'Q'), (label("300"), 'A')];

        let strict = Encoder::new(EncodingMode::Strict);
        assert!(matches!(
            strict.encode(NumberingInput::Pairs(&bad)),
            Err(EncodingError::UnknownPosition(_))
        ));

        let lenient = Encoder::new(EncodingMode::Lenient);
        let record = lenient.encode(NumberingInput::Pairs(&bad)).unwrap();
        assert!(record.sequence.is_sentinel());
        assert_eq!(record.partition, Partition::Unusual);
    }

    #[test]
    fn test_empty_numbering_is_unusual_even_when_valid() {
        let encoder = Encoder::new(EncodingMode::Strict);
        let record = encoder.encode(NumberingInput::Text("{}")).unwrap();
        assert!(record.sequence.is_sentinel());
        assert_eq!(record.partition, Partition::Unusual);

        let good = encoder.encode(NumberingInput::Pairs(&sample_pairs())).unwrap();
        assert_eq!(good.partition, Partition::Normal);
    }

    #[test]
    fn test_from_codes_checks_width() {
        assert!(matches!(
            EncodedSequence::from_codes(&[1, 2, 3]),
            Err(EncodingError::WidthMismatch { expected: 200, actual: 3 })
        ));
        let codes = [b'A' as i8; CANONICAL_WIDTH];
        let seq = EncodedSequence::from_codes(&codes).unwrap();
        assert_eq!(seq.codes(), &codes);
    }
}
