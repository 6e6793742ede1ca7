//! Per-atomic health classification.
//!
//! `classify` is a pure function of the ledger record; only strike issuance on the ledger
//! changes what it returns.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Scores below this band are CRITICAL.
pub const CRITICAL_BELOW_BPS: u32 = 7800;
/// Scores below this band (and at or above CRITICAL) are DEGRADED.
pub const DEGRADED_BELOW_BPS: u32 = 9500;
/// Upper bound of the integrity score.
pub const MAX_BPS: u32 = 10_000;
/// Accumulated strikes at which a record becomes obsolete.
pub const DEFAULT_STRIKE_THRESHOLD: u32 = 3;

/// One ledger entry per named logic unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AtomicRecord {
    pub id: String,
    pub spec_pointer: String,
    /// Empty (or the zero address) when the id was never registered.
    pub creator: String,
    pub score: u32,
    pub strike_count: u32,
    pub obsolete: bool,
}

impl AtomicRecord {
    pub fn unregistered(id: &str) -> Self {
        Self {
            id: id.to_string(),
            spec_pointer: String::new(),
            creator: String::new(),
            score: 0,
            strike_count: 0,
            obsolete: false,
        }
    }

    pub fn is_registered(&self) -> bool {
        let creator = self.creator.trim();
        !(creator.is_empty()
            || creator
                .strip_prefix("0x")
                .is_some_and(|hex| hex.chars().all(|c| c == '0')))
    }

    /// Score as a percentage string, e.g. `9,512 bps -> "95.12%"`.
    pub fn integrity_percent(&self) -> String {
        format!("{:.2}%", self.score as f64 / 100.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SiloHealth {
    Stable,
    Degraded,
    Critical,
    Obsolete,
}

impl SiloHealth {
    pub fn as_str(self) -> &'static str {
        match self {
            SiloHealth::Stable => "STABLE",
            SiloHealth::Degraded => "DEGRADED",
            SiloHealth::Critical => "CRITICAL",
            SiloHealth::Obsolete => "OBSOLETE",
        }
    }

    pub fn icon(self) -> &'static str {
        match self {
            SiloHealth::Stable => "🟢",
            SiloHealth::Degraded => "🟡",
            SiloHealth::Critical => "💀",
            SiloHealth::Obsolete => "🔴",
        }
    }

    /// OBSOLETE is a hard stop for every pipeline stage.
    pub fn permits_execution(self) -> bool {
        self != SiloHealth::Obsolete
    }
}

impl fmt::Display for SiloHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-down, first match wins.
pub fn classify(record: &AtomicRecord) -> SiloHealth {
    if record.obsolete {
        SiloHealth::Obsolete
    } else if record.score < CRITICAL_BELOW_BPS {
        SiloHealth::Critical
    } else if record.score < DEGRADED_BELOW_BPS {
        SiloHealth::Degraded
    } else {
        SiloHealth::Stable
    }
}

/// Classification plus a human-readable reason, in the shape `compute_health` reports.
pub fn classify_with_reason(record: &AtomicRecord) -> (SiloHealth, String) {
    let health = classify(record);
    let reason = match health {
        SiloHealth::Obsolete => format!(
            "Marked obsolete after {} strikes; execution refused",
            record.strike_count
        ),
        SiloHealth::Critical => format!(
            "Integrity {} is below the critical band ({} bps)",
            record.integrity_percent(),
            CRITICAL_BELOW_BPS
        ),
        SiloHealth::Degraded => format!(
            "Integrity {} is below the stable band ({} bps)",
            record.integrity_percent(),
            DEGRADED_BELOW_BPS
        ),
        SiloHealth::Stable => format!("Integrity verified at {}", record.integrity_percent()),
    };
    (health, reason)
}
