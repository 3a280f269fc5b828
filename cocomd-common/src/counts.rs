//! Maturity categories, per-category counts and the count aggregator
//!
//! Counts are only ever changed by additive merges of non-negative
//! increments. `u64` keeps them non-negative by construction; additions
//! saturate rather than wrap.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Maturity buckets reported by the maturity model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MaturityCategory {
    Premature,
    Potential,
    Mature,
}

impl MaturityCategory {
    /// All categories in display order
    pub const ALL: [MaturityCategory; 3] = [
        MaturityCategory::Premature,
        MaturityCategory::Potential,
        MaturityCategory::Mature,
    ];

    /// Match a detector label to a category (case-insensitive)
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(label))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MaturityCategory::Premature => "Premature",
            MaturityCategory::Potential => "Potential",
            MaturityCategory::Mature => "Mature",
        }
    }
}

impl fmt::Display for MaturityCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-category object counts
///
/// Used both for running totals and for increments carried by detection
/// messages. Categories missing from an incoming increment, or sent as
/// `null`, deserialize as 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaturityCounts {
    #[serde(rename = "Premature", default, deserialize_with = "null_as_zero")]
    pub premature: u64,
    #[serde(rename = "Potential", default, deserialize_with = "null_as_zero")]
    pub potential: u64,
    #[serde(rename = "Mature", default, deserialize_with = "null_as_zero")]
    pub mature: u64,
}

fn null_as_zero<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<u64>::deserialize(deserializer)?.unwrap_or_default())
}

impl MaturityCounts {
    pub fn new(premature: u64, potential: u64, mature: u64) -> Self {
        Self {
            premature,
            potential,
            mature,
        }
    }

    pub fn get(&self, category: MaturityCategory) -> u64 {
        match category {
            MaturityCategory::Premature => self.premature,
            MaturityCategory::Potential => self.potential,
            MaturityCategory::Mature => self.mature,
        }
    }

    fn slot(&mut self, category: MaturityCategory) -> &mut u64 {
        match category {
            MaturityCategory::Premature => &mut self.premature,
            MaturityCategory::Potential => &mut self.potential,
            MaturityCategory::Mature => &mut self.mature,
        }
    }

    pub fn total(&self) -> u64 {
        self.premature
            .saturating_add(self.potential)
            .saturating_add(self.mature)
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }

    /// Build an increment by tallying detector labels
    ///
    /// Labels that do not name a maturity category are ignored.
    pub fn from_labels<'a, I>(labels: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut counts = Self::default();
        for category in labels.into_iter().filter_map(MaturityCategory::from_label) {
            let slot = counts.slot(category);
            *slot = slot.saturating_add(1);
        }
        counts
    }
}

impl fmt::Display for MaturityCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Premature={} Potential={} Mature={}",
            self.premature, self.potential, self.mature
        )
    }
}

/// Pure accumulation over maturity counts
///
/// Holds no state; every call returns a fresh value.
#[derive(Debug, Clone, Copy, Default)]
pub struct CountAggregator;

impl CountAggregator {
    /// `updated[c] = current[c] + increment[c]` for every category
    pub fn merge(current: &MaturityCounts, increment: &MaturityCounts) -> MaturityCounts {
        let mut updated = *current;
        for category in MaturityCategory::ALL {
            let slot = updated.slot(category);
            *slot = slot.saturating_add(increment.get(category));
        }
        updated
    }

    /// All-zero counts
    pub fn reset() -> MaturityCounts {
        MaturityCounts::default()
    }
}
