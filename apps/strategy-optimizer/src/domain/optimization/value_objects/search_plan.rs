//! Search plan selecting how combinations are drawn from a parameter space.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How a run explores its parameter space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SearchPlan {
    /// Every combination of the cartesian product.
    #[default]
    #[serde(alias = "grid")]
    Grid,
    /// A seeded sample of the cartesian product without replacement.
    #[serde(alias = "random")]
    Random,
}

impl SearchPlan {
    /// Wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Grid => "GRID",
            Self::Random => "RANDOM",
        }
    }

    /// Parse a stored plan value.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "GRID" => Some(Self::Grid),
            "RANDOM" => Some(Self::Random),
            _ => None,
        }
    }
}

impl fmt::Display for SearchPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
