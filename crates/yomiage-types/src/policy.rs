//! Per-group limits derived from the subscription tier.

use serde::{Deserialize, Serialize};

/// Subscription tier of a group, as reported by the billing layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    #[default]
    Free,
    Pro,
    Premium,
}

impl Tier {
    /// Returns the speech limits granted by this tier.
    pub fn limits(self) -> GroupLimits {
        match self {
            Self::Free => GroupLimits {
                max_text_length: 200,
                synthesis_concurrency: 1,
            },
            Self::Pro => GroupLimits {
                max_text_length: 400,
                synthesis_concurrency: 2,
            },
            Self::Premium => GroupLimits {
                max_text_length: 800,
                synthesis_concurrency: 4,
            },
        }
    }
}

/// Limits applied to one utterance of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupLimits {
    /// Characters read before the text is truncated.
    pub max_text_length: usize,
    /// Chunk synthesis requests allowed in flight for one utterance.
    pub synthesis_concurrency: usize,
}

impl Default for GroupLimits {
    fn default() -> Self {
        Tier::Free.limits()
    }
}
