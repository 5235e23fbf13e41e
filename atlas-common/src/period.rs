//! Historical period derivation
//!
//! Periods are a pure function of the event's start year. Boundaries follow the
//! conventional Western periodisation: invention of writing (-4000), fall of the
//! Western Roman Empire (476), fall of Constantinople (1453), French Revolution
//! (1789).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// First year of Antiquity
pub const ANTIQUITY_START: i32 = -4000;
/// First year of the Middle Ages
pub const MIDDLE_AGES_START: i32 = 476;
/// First year of the Early Modern period
pub const EARLY_MODERN_START: i32 = 1453;
/// First year of the Contemporary period
pub const CONTEMPORARY_START: i32 = 1789;

/// Historical period, ordered chronologically
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Period {
    Prehistory,
    Antiquity,
    MiddleAges,
    EarlyModern,
    Contemporary,
}

impl Period {
    /// All periods in chronological order
    pub const ALL: [Period; 5] = [
        Period::Prehistory,
        Period::Antiquity,
        Period::MiddleAges,
        Period::EarlyModern,
        Period::Contemporary,
    ];

    /// Derive the period from a signed year (negative = BCE)
    pub fn from_year(year: i32) -> Self {
        if year < ANTIQUITY_START {
            Period::Prehistory
        } else if year < MIDDLE_AGES_START {
            Period::Antiquity
        } else if year < EARLY_MODERN_START {
            Period::MiddleAges
        } else if year < CONTEMPORARY_START {
            Period::EarlyModern
        } else {
            Period::Contemporary
        }
    }

    /// Stable storage key
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Prehistory => "prehistory",
            Period::Antiquity => "antiquity",
            Period::MiddleAges => "middle_ages",
            Period::EarlyModern => "early_modern",
            Period::Contemporary => "contemporary",
        }
    }

    /// Human-readable label
    pub fn label(&self) -> &'static str {
        match self {
            Period::Prehistory => "Prehistory",
            Period::Antiquity => "Antiquity",
            Period::MiddleAges => "Middle Ages",
            Period::EarlyModern => "Early Modern",
            Period::Contemporary => "Contemporary",
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Period {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Period::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s || p.label().eq_ignore_ascii_case(s))
            .ok_or_else(|| crate::Error::InvalidInput(format!("Unknown period: {}", s)))
    }
}

/// Format a signed year for display ("44 BC", "1969")
pub fn format_year(year: i32) -> String {
    if year < 0 {
        format!("{} BC", year.unsigned_abs())
    } else {
        year.to_string()
    }
}
