//! Canonical position catalog
//!
//! Variable-domain chains are numbered by an external tool into labelled
//! positions (`27`, `111A`, ...). The catalog below fixes a single ordered
//! list of 200 labels wide enough to hold every chain we store; a label's
//! index in the list is its slot in an [`EncodedSequence`](crate::encoding::EncodedSequence).
//!
//! Insertion order follows the IMGT convention: insertions before a CDR apex
//! count upwards (`111A`, `111B`, ...), insertions after it count downwards
//! (`112L`, ..., `112A`, `112`).

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

/// Number of slots in an encoded sequence
pub const CANONICAL_WIDTH: usize = 200;

/// Ordered catalog labels. Index in this table == vector slot.
pub const CANONICAL_LABELS: [&str; CANONICAL_WIDTH] = [
    "1", "2", "3", "3A", "4", "5", "6", "7", "8", "9", "10", "11", "12", "13", "14", "15", "16",
    "17", "18", "19", "20", "21", "22", "23", "24", "25", "26", "27", "28", "29", "30", "31",
    "32", "32A", "32B", "33C", "33B", "33A", "33", "34", "35", "36", "37", "38", "39", "40",
    "40A", "41", "42", "43", "44", "44A", "45", "45A", "46", "46A", "47", "47A", "48", "48A",
    "48B", "49", "49A", "50", "51", "51A", "52", "53", "54", "55", "56", "57", "58", "59", "60",
    "60A", "60B", "60C", "60D", "61E", "61D", "61C", "61B", "61A", "61", "62", "63", "64", "65",
    "66", "67", "67A", "67B", "68", "68A", "68B", "69", "69A", "69B", "70", "71", "71A", "71B",
    "72", "73", "73A", "73B", "74", "75", "76", "77", "78", "79", "80", "80A", "81", "81A",
    "81B", "81C", "82", "82A", "83", "83A", "83B", "84", "85", "85A", "85B", "85C", "85D", "86",
    "86A", "87", "88", "89", "90", "91", "92", "93", "94", "95", "96", "96A", "97", "98", "99",
    "100", "101", "102", "103", "104", "105", "106", "107", "108", "109", "110", "111", "111A",
    "111B", "111C", "111D", "111E", "111F", "111G", "111H", "111I", "111J", "111K", "111L",
    "112L", "112K", "112J", "112I", "112H", "112G", "112F", "112E", "112D", "112C", "112B",
    "112A", "112", "113", "114", "115", "116", "117", "118", "119", "119A", "120", "121", "122",
    "123", "124", "125", "126", "127", "128",
];

/// A numbered position: residue number plus optional insertion code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PositionLabel {
    pub number: u16,
    pub insertion: Option<char>,
}

impl PositionLabel {
    pub const fn new(number: u16, insertion: Option<char>) -> Self {
        Self { number, insertion }
    }

    /// Slot of this label in the canonical vector, if the catalog has it.
    pub fn canonical_index(&self) -> Option<usize> {
        label_index().get(self).copied()
    }
}

impl fmt::Display for PositionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.insertion {
            Some(code) => write!(f, "{}{}", self.number, code),
            None => write!(f, "{}", self.number),
        }
    }
}

/// Error returned when a label string is not `<number>[<letter>]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelParseError(pub String);

impl fmt::Display for LabelParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid position label {:?}", self.0)
    }
}

impl std::error::Error for LabelParseError {}

impl FromStr for PositionLabel {
    type Err = LabelParseError;

    /// Accepts `"27"`, `"27 "`, `"111A"` and `"111a"`.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        let digits_end = trimmed
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(trimmed.len());
        if digits_end == 0 {
            return Err(LabelParseError(raw.to_string()));
        }

        let number: u16 = trimmed[..digits_end]
            .parse()
            .map_err(|_| LabelParseError(raw.to_string()))?;

        let mut rest = trimmed[digits_end..].chars();
        let insertion = match (rest.next(), rest.next()) {
            (None, _) => None,
            (Some(code), None) if code.is_ascii_alphabetic() => Some(code.to_ascii_uppercase()),
            _ => return Err(LabelParseError(raw.to_string())),
        };

        Ok(Self { number, insertion })
    }
}

/// Parsed catalog, in slot order.
pub fn canonical_positions() -> &'static [PositionLabel] {
    static POSITIONS: OnceLock<Vec<PositionLabel>> = OnceLock::new();
    POSITIONS.get_or_init(|| {
        CANONICAL_LABELS
            .iter()
            .map(|raw| {
                raw.parse()
                    .unwrap_or_else(|_| unreachable!("catalog label {raw:?} is well formed"))
            })
            .collect()
    })
}

fn label_index() -> &'static HashMap<PositionLabel, usize> {
    static INDEX: OnceLock<HashMap<PositionLabel, usize>> = OnceLock::new();
    INDEX.get_or_init(|| {
        canonical_positions()
            .iter()
            .enumerate()
            .map(|(slot, label)| (*label, slot))
            .collect()
    })
}

/// Chain class a shard partition belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChainClass {
    Heavy,
    Light,
}

impl ChainClass {
    /// Directory name used under the database root.
    pub fn dir_name(&self) -> &'static str {
        match self {
            ChainClass::Heavy => "Heavy",
            ChainClass::Light => "Light",
        }
    }

    /// Map a numbering-tool chain code (`H`, `K`, `L`).
    pub fn from_chain_code(code: char) -> Option<Self> {
        match code.to_ascii_uppercase() {
            'H' => Some(ChainClass::Heavy),
            'K' | 'L' => Some(ChainClass::Light),
            _ => None,
        }
    }
}

impl fmt::Display for ChainClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

impl FromStr for ChainClass {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "heavy" | "h" => Ok(ChainClass::Heavy),
            "light" | "l" | "k" | "kappa" | "lambda" => Ok(ChainClass::Light),
            other => Err(format!("unknown chain class '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_catalog_is_unique_and_full_width() {
        let positions = canonical_positions();
        assert_eq!(positions.len(), CANONICAL_WIDTH);

        let unique: HashSet<_> = positions.iter().collect();
        assert_eq!(unique.len(), CANONICAL_WIDTH, "catalog labels must be unique");
    }

    #[test]
    fn test_label_parsing() {
        assert_eq!("27".parse::<PositionLabel>().unwrap(), PositionLabel::new(27, None));
        assert_eq!("27 ".parse::<PositionLabel>().unwrap(), PositionLabel::new(27, None));
        assert_eq!(
            "111a".parse::<PositionLabel>().unwrap(),
            PositionLabel::new(111, Some('A'))
        );
        assert!("A111".parse::<PositionLabel>().is_err());
        assert!("111AB".parse::<PositionLabel>().is_err());
        assert!("".parse::<PositionLabel>().is_err());
        assert!("1-".parse::<PositionLabel>().is_err());
    }

    #[test]
    fn test_canonical_index_follows_catalog_order() {
        assert_eq!(PositionLabel::new(1, None).canonical_index(), Some(0));
        assert_eq!(PositionLabel::new(3, Some('A')).canonical_index(), Some(3));
        assert_eq!(PositionLabel::new(128, None).canonical_index(), Some(199));

        // Descending insertions after the apex: 112L comes before 112A.
        let l = PositionLabel::new(112, Some('L')).canonical_index().unwrap();
        let a = PositionLabel::new(112, Some('A')).canonical_index().unwrap();
        assert!(l < a);
    }

    #[test]
    fn test_unknown_label_has_no_slot() {
        assert_eq!(PositionLabel::new(129, None).canonical_index(), None);
        assert_eq!(PositionLabel::new(1, Some('Z')).canonical_index(), None);
    }

    #[test]
    fn test_display_roundtrip() {
        for raw in CANONICAL_LABELS {
            let label: PositionLabel = raw.parse().unwrap();
            assert_eq!(label.to_string(), raw);
        }
    }

    #[test]
    fn test_chain_codes() {
        assert_eq!(ChainClass::from_chain_code('H'), Some(ChainClass::Heavy));
        assert_eq!(ChainClass::from_chain_code('k'), Some(ChainClass::Light));
        assert_eq!(ChainClass::from_chain_code('X'), None);
        assert_eq!("Heavy".parse::<ChainClass>().unwrap(), ChainClass::Heavy);
        assert!("any".parse::<ChainClass>().is_err());
    }
}
