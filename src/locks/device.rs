//! Device capability interface for wireless door locks, as exposed by the
//! host's driver layer.

use std::collections::BTreeMap;

use anyhow::Result;
use serde::Deserialize;
use serde_json::Value;

/// A programmable door lock. Commands travel a slow, lossy wireless channel:
/// a returned `Ok` means the command was submitted, not that it applied.
/// `current_codes` re-reads the device's live code table and is the only
/// thing the engine trusts for verification.
pub trait DeviceLock: Send + Sync {
    fn id(&self) -> &str;
    fn set_code(&self, slot: u32, code: &str, label: &str) -> Result<()>;
    fn delete_code(&self, slot: u32) -> Result<()>;
    /// Live code table: a JSON object keyed by slot number, each entry
    /// carrying at least `label` and `code`.
    fn current_codes(&self) -> Result<Value>;
    /// Reported slot capacity, when the device reports one.
    fn current_max_slots(&self) -> Option<u32>;
}

/// One entry of a lock's code table. Devices report extra fields; only the
/// label and code matter here.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct CodeSlot {
    pub label: String,
    pub code: String,
}

/// Normalizes the device's JSON code table. Non-numeric slot keys are
/// skipped rather than treated as errors; some drivers mix metadata into the
/// same object.
pub fn parse_code_table(value: &Value) -> Result<BTreeMap<u32, CodeSlot>> {
    let object = value
        .as_object()
        .ok_or_else(|| anyhow::anyhow!("code table is not a JSON object"))?;

    let mut table = BTreeMap::new();
    for (key, entry) in object {
        let Ok(slot) = key.parse::<u32>() else {
            continue;
        };
        let parsed: CodeSlot = serde_json::from_value(entry.clone())
            .map_err(|e| anyhow::anyhow!("slot {slot} entry malformed: {e}"))?;
        table.insert(slot, parsed);
    }
    Ok(table)
}

/// A code-change notification from the device's event stream. `value` is
/// free text; only well-known substrings are interpreted.
#[derive(Debug, Clone)]
pub struct DeviceEvent {
    pub lock_id: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeChange {
    Set,
    Deleted,
    Failed,
    Other,
}

pub fn classify_event_value(value: &str) -> CodeChange {
    let lower = value.to_lowercase();
    if lower.contains("failed") {
        CodeChange::Failed
    } else if lower.contains("set") || lower.contains("added") {
        CodeChange::Set
    } else if lower.contains("deleted") || lower.contains("removed") {
        CodeChange::Deleted
    } else {
        CodeChange::Other
    }
}
