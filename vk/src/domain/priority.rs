//! Priority levels for call scheduling

use serde::{Deserialize, Serialize};

/// Dispatch priority of a call; higher values are served sooner
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(pub i32);

impl Priority {
    /// Priority of a call when the caller does not pick one
    pub const DEFAULT: Self = Self(10);

    /// Priority of a synthetic `execute` batch; ahead of any ordinary call
    pub const BATCH: Self = Self(100);

    /// Bump applied to calls recovered from a failed batch
    const BATCH_RETRY_BOOST: i32 = 89;

    /// Priority for a call escalated from the service lane to the private lane
    pub fn escalated(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Priority for a call whose batch failed; outranks fresh default calls
    pub fn boosted(self) -> Self {
        Self(self.0.saturating_add(Self::BATCH_RETRY_BOOST))
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl From<i32> for Priority {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "default" | "normal" => Ok(Self::DEFAULT),
            "batch" | "top" => Ok(Self::BATCH),
            other => other
                .parse::<i32>()
                .map(Self)
                .map_err(|_| format!("Unknown priority: {}", s)),
        }
    }
}
