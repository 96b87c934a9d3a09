//! Activity, activity record and transfer summary model.
//!
//! # Invariants
//! - `TransferSummary` starts at zero and only grows during one run.
//! - `Activity::merge_extra` keeps unrelated `extra` keys intact.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Store-assigned activity identifier.
pub type ActivityId = i64;

/// Unit of import work whose records are transferred.
#[derive(Debug, Clone, PartialEq)]
pub struct Activity {
    pub id: ActivityId,
    pub label: String,
    /// Free-form metadata; transfer summaries land under `ok`/`ko`.
    pub extra: Map<String, Value>,
}

impl Activity {
    /// Merges summary counters into `extra`, overwriting previous counters.
    pub fn merge_extra(&mut self, summary: TransferSummary) {
        self.extra.insert("ok".to_string(), Value::from(summary.ok));
        self.extra.insert("ko".to_string(), Value::from(summary.ko));
    }

    /// Reads the last persisted summary, if any.
    pub fn summary(&self) -> Option<TransferSummary> {
        let ok = self.extra.get("ok")?.as_u64()?;
        let ko = self.extra.get("ko")?.as_u64()?;
        Some(TransferSummary {
            ok: u32::try_from(ok).ok()?,
            ko: u32::try_from(ko).ok()?,
        })
    }
}

/// One entity's nested field mapping inside an activity.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityRecord {
    pub entity_identifier: String,
    pub data: Value,
}

/// Success/failure counters of one transfer run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferSummary {
    pub ok: u32,
    pub ko: u32,
}

impl TransferSummary {
    /// Records that were processed (committed or rolled back).
    pub fn processed(&self) -> u32 {
        self.ok + self.ko
    }
}
