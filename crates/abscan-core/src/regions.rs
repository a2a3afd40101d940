//! Region mask registry
//!
//! A region selects the canonical slots that take part in one identity
//! metric. Named regions are defined by residue-number ranges of the IMGT
//! scheme, so every insertion at a CDR number belongs to that CDR:
//!
//! ```text
//! CDR1  27..=38     CDR2  56..=65     CDR3  105..=117
//! ```
//!
//! Masks are built once and shared process-wide. User-defined regions
//! (explicit label lists) are cached by their normalised label set.

use std::collections::HashMap;
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::bits::PositionBits;
use crate::config::ConfigError;
use crate::numbering::{canonical_positions, PositionLabel};

pub const CDR1_NUMBERS: RangeInclusive<u16> = 27..=38;
pub const CDR2_NUMBERS: RangeInclusive<u16> = 56..=65;
pub const CDR3_NUMBERS: RangeInclusive<u16> = 105..=117;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Region {
    Whole,
    Cdr1,
    Cdr2,
    Cdr3,
    #[serde(alias = "cdrs")]
    AllCdrs,
    /// Explicit list of catalog labels
    Custom(Vec<String>),
}

impl Region {
    pub fn name(&self) -> String {
        match self {
            Region::Whole => "whole".to_string(),
            Region::Cdr1 => "cdr1".to_string(),
            Region::Cdr2 => "cdr2".to_string(),
            Region::Cdr3 => "cdr3".to_string(),
            Region::AllCdrs => "cdrs".to_string(),
            Region::Custom(labels) => format!("custom[{}]", labels.join(",")),
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl FromStr for Region {
    type Err = ConfigError;

    /// Named regions, or `custom:<label>,<label>,...`
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        if let Some(labels) = trimmed.strip_prefix("custom:") {
            let labels: Vec<String> = labels
                .split(',')
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty())
                .collect();
            if labels.is_empty() {
                return Err(ConfigError::EmptyCustomRegion);
            }
            return Ok(Region::Custom(labels));
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "whole" => Ok(Region::Whole),
            "cdr1" => Ok(Region::Cdr1),
            "cdr2" => Ok(Region::Cdr2),
            "cdr3" => Ok(Region::Cdr3),
            "cdrs" | "all_cdrs" | "cdr_all" => Ok(Region::AllCdrs),
            _ => Err(ConfigError::UnknownRegionName(raw.to_string())),
        }
    }
}

/// Boolean selector over canonical slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionMask {
    name: String,
    bits: PositionBits,
}

impl RegionMask {
    fn from_numbers(name: &str, numbers: &[RangeInclusive<u16>]) -> Self {
        let bits = PositionBits::from_slots(
            canonical_positions()
                .iter()
                .enumerate()
                .filter(|(_, label)| numbers.iter().any(|r| r.contains(&label.number)))
                .map(|(slot, _)| slot),
        );
        Self {
            name: name.to_string(),
            bits,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline(always)]
    pub fn bits(&self) -> &PositionBits {
        &self.bits
    }

    pub fn contains(&self, slot: usize) -> bool {
        self.bits.contains(slot)
    }

    /// Number of selected slots
    pub fn len(&self) -> usize {
        self.bits.count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }
}

struct NamedMasks {
    whole: Arc<RegionMask>,
    cdr1: Arc<RegionMask>,
    cdr2: Arc<RegionMask>,
    cdr3: Arc<RegionMask>,
    all_cdrs: Arc<RegionMask>,
}

fn named_masks() -> &'static NamedMasks {
    static NAMED: OnceLock<NamedMasks> = OnceLock::new();
    NAMED.get_or_init(|| NamedMasks {
        whole: Arc::new(RegionMask {
            name: "whole".to_string(),
            bits: PositionBits::full(),
        }),
        cdr1: Arc::new(RegionMask::from_numbers("cdr1", &[CDR1_NUMBERS])),
        cdr2: Arc::new(RegionMask::from_numbers("cdr2", &[CDR2_NUMBERS])),
        cdr3: Arc::new(RegionMask::from_numbers("cdr3", &[CDR3_NUMBERS])),
        all_cdrs: Arc::new(RegionMask::from_numbers(
            "cdrs",
            &[CDR1_NUMBERS, CDR2_NUMBERS, CDR3_NUMBERS],
        )),
    })
}

type CustomCache = RwLock<HashMap<Vec<PositionLabel>, Arc<RegionMask>>>;

fn custom_cache() -> &'static CustomCache {
    static CUSTOM: OnceLock<CustomCache> = OnceLock::new();
    CUSTOM.get_or_init(|| RwLock::new(HashMap::new()))
}

fn custom_mask(labels: &[String]) -> Result<Arc<RegionMask>, ConfigError> {
    if labels.is_empty() {
        return Err(ConfigError::EmptyCustomRegion);
    }
    let mut parsed = Vec::with_capacity(labels.len());
    for raw in labels {
        let label: PositionLabel = raw
            .parse()
            .map_err(|_| ConfigError::UnknownRegionLabel(raw.clone()))?;
        if label.canonical_index().is_none() {
            return Err(ConfigError::UnknownRegionLabel(raw.clone()));
        }
        parsed.push(label);
    }
    parsed.sort();
    parsed.dedup();

    if let Some(mask) = custom_cache().read().get(&parsed) {
        return Ok(mask.clone());
    }

    let name = format!(
        "custom[{}]",
        parsed
            .iter()
            .map(|l| l.to_string())
            .collect::<Vec<_>>()
            .join(",")
    );
    let bits = PositionBits::from_slots(parsed.iter().filter_map(|l| l.canonical_index()));
    let mask = Arc::new(RegionMask { name, bits });

    let mut cache = custom_cache().write();
    Ok(cache.entry(parsed).or_insert(mask).clone())
}

/// Resolve a region to its shared mask.
pub fn region_mask(region: &Region) -> Result<Arc<RegionMask>, ConfigError> {
    let named = named_masks();
    Ok(match region {
        Region::Whole => named.whole.clone(),
        Region::Cdr1 => named.cdr1.clone(),
        Region::Cdr2 => named.cdr2.clone(),
        Region::Cdr3 => named.cdr3.clone(),
        Region::AllCdrs => named.all_cdrs.clone(),
        Region::Custom(labels) => custom_mask(labels)?,
    })
}

/// Ordered metrics evaluated by one search: masks plus length-match flags.
#[derive(Debug, Clone)]
pub struct RegionSet {
    masks: Vec<Arc<RegionMask>>,
    length_matched: Vec<bool>,
}

impl RegionSet {
    pub fn new(regions: &[Region], length_matched: &[bool]) -> Result<Self, ConfigError> {
        if regions.is_empty() {
            return Err(ConfigError::EmptyRegionSet);
        }
        if regions.len() != length_matched.len() {
            return Err(ConfigError::RegionFlagMismatch {
                regions: regions.len(),
                flags: length_matched.len(),
            });
        }
        let masks = regions
            .iter()
            .map(region_mask)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            masks,
            length_matched: length_matched.to_vec(),
        })
    }

    /// Whole chain, all CDRs (length-matched), CDR3 (length-matched).
    pub fn standard() -> Self {
        let named = named_masks();
        Self {
            masks: vec![
                named.whole.clone(),
                named.all_cdrs.clone(),
                named.cdr3.clone(),
            ],
            length_matched: vec![false, true, true],
        }
    }

    pub fn len(&self) -> usize {
        self.masks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.masks.is_empty()
    }

    #[inline(always)]
    pub fn mask(&self, region: usize) -> &RegionMask {
        &self.masks[region]
    }

    #[inline(always)]
    pub fn length_matched(&self, region: usize) -> bool {
        self.length_matched[region]
    }

    pub fn names(&self) -> Vec<String> {
        self.masks.iter().map(|m| m.name().to_string()).collect()
    }

    /// `(mask, length_matched)` in region order
    pub fn iter(&self) -> impl Iterator<Item = (&RegionMask, bool)> + '_ {
        self.masks
            .iter()
            .map(|m| m.as_ref())
            .zip(self.length_matched.iter().copied())
    }
}
