//! Optimisation direction.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Whether higher or lower scores are better.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OptimisationDirection {
    /// Higher scores win.
    #[default]
    #[serde(alias = "maximize", alias = "max")]
    Maximize,
    /// Lower scores win.
    #[serde(alias = "minimize", alias = "min")]
    Minimize,
}

impl OptimisationDirection {
    /// Returns true if `candidate` strictly beats `incumbent`.
    #[must_use]
    pub fn prefers(&self, candidate: f64, incumbent: f64) -> bool {
        self.rank(candidate, incumbent) == Ordering::Less
    }

    /// Ordering where better scores sort first.
    #[must_use]
    pub fn rank(&self, a: f64, b: f64) -> Ordering {
        match self {
            Self::Maximize => b.total_cmp(&a),
            Self::Minimize => a.total_cmp(&b),
        }
    }

    /// Wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Maximize => "MAXIMIZE",
            Self::Minimize => "MINIMIZE",
        }
    }

    /// Parse a stored direction value.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "MAXIMIZE" => Some(Self::Maximize),
            "MINIMIZE" => Some(Self::Minimize),
            _ => None,
        }
    }
}

impl fmt::Display for OptimisationDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
