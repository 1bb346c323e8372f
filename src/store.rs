//! Two-tier persistence, modeled explicitly instead of leaning on
//! host-specific semantics:
//!
//! - [`SnapshotStore`] is the buffered tier: bulk documents read at
//!   invocation start and written back at invocation end (schedule state,
//!   retry statistics).
//! - [`FlagStore`] is the strongly-consistent tier: small flags that must be
//!   instantly visible across concurrent invocations (enabled, last test
//!   result, config validity).

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use serde_json::{json, Value};

use crate::error::{AppError, AppResult};
use crate::models::state::{RetryStatistics, ScheduleState, SCHEMA_VERSION};

/// Well-known flag keys.
pub mod flags {
    pub const ENABLED: &str = "enabled";
    pub const LAST_TEST_RESULT: &str = "last_test_result";
    pub const CONFIG_VALID: &str = "config_valid";
    /// Date stamp (`YYYYMMDD`) of the last prep run that provisioned codes.
    /// The main check-in reads it to decide whether prep already covered
    /// provisioning today.
    pub const PREP_PROVISIONED: &str = "prep_provisioned_on";
}

pub trait SnapshotStore: Send + Sync {
    fn load_schedule(&self) -> AppResult<ScheduleState>;
    fn save_schedule(&self, state: &ScheduleState) -> AppResult<()>;
    fn load_stats(&self) -> AppResult<RetryStatistics>;
    fn save_stats(&self, stats: &RetryStatistics) -> AppResult<()>;
}

pub trait FlagStore: Send + Sync {
    fn get_flag(&self, key: &str) -> Option<String>;
    fn set_flag(&self, key: &str, value: &str);

    fn flag_is_true(&self, key: &str) -> bool {
        self.get_flag(key).as_deref() == Some("true")
    }
}

/// Applies every outstanding schema migration step to a raw persisted
/// document. Steps are additive and idempotent: running against an
/// already-migrated document changes nothing. Returns whether the document
/// was modified.
pub fn migrate_document(doc: &mut Value) -> bool {
    let mut changed = false;

    if !doc.is_object() {
        *doc = json!({});
        changed = true;
    }
    if !doc.get("schedule").map_or(false, Value::is_object) {
        doc["schedule"] = serde_json::to_value(ScheduleState::default()).unwrap_or_default();
        changed = true;
    }

    let mut version = doc["schedule"]
        .get("schema_version")
        .and_then(Value::as_u64)
        .unwrap_or(1) as u32;

    // v1 -> v2: retry statistics document introduced.
    if version < 2 {
        if !doc.get("stats").map_or(false, Value::is_object) {
            doc["stats"] = serde_json::to_value(RetryStatistics::default()).unwrap_or_default();
        }
        version = 2;
        changed = true;
    }

    if changed {
        doc["schedule"]["schema_version"] = json!(version);
    }
    changed
}

/// In-memory store used by tests and by hosts that persist elsewhere.
#[derive(Default)]
pub struct MemoryStore {
    schedule: Mutex<ScheduleState>,
    stats: Mutex<RetryStatistics>,
    flags: Mutex<HashMap<String, String>>,
}

impl SnapshotStore for MemoryStore {
    fn load_schedule(&self) -> AppResult<ScheduleState> {
        Ok(self.schedule.lock().expect("store mutex").clone())
    }

    fn save_schedule(&self, state: &ScheduleState) -> AppResult<()> {
        *self.schedule.lock().expect("store mutex") = state.clone();
        Ok(())
    }

    fn load_stats(&self) -> AppResult<RetryStatistics> {
        Ok(self.stats.lock().expect("store mutex").clone())
    }

    fn save_stats(&self, stats: &RetryStatistics) -> AppResult<()> {
        *self.stats.lock().expect("store mutex") = stats.clone();
        Ok(())
    }
}

impl FlagStore for MemoryStore {
    fn get_flag(&self, key: &str) -> Option<String> {
        self.flags.lock().expect("store mutex").get(key).cloned()
    }

    fn set_flag(&self, key: &str, value: &str) {
        self.flags
            .lock()
            .expect("store mutex")
            .insert(key.to_string(), value.to_string());
    }
}

/// JSON-file-backed store. The snapshot document and the flag file are kept
/// separate so flag writes stay small and synchronous.
pub struct JsonFileStore {
    path: PathBuf,
    flags_path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let flags_path = path.with_extension("flags.json");
        Self { path, flags_path }
    }

    /// Store under the platform data directory.
    pub fn default_location() -> AppResult<Self> {
        let base = dirs::data_dir()
            .ok_or_else(|| AppError::store("no platform data directory available"))?;
        let dir = base.join("staylock");
        fs::create_dir_all(&dir)
            .map_err(|e| AppError::store(format!("creating {}: {e}", dir.display())))?;
        Ok(Self::new(dir.join("state.json")))
    }

    fn load_document(&self) -> AppResult<Value> {
        let mut doc = if self.path.exists() {
            let raw = fs::read_to_string(&self.path)
                .map_err(|e| AppError::store(format!("reading {}: {e}", self.path.display())))?;
            serde_json::from_str(&raw)
                .map_err(|e| AppError::store(format!("corrupt state document: {e}")))?
        } else {
            json!({})
        };

        if migrate_document(&mut doc) {
            log::info!(
                "[Store] Migrated state document to schema v{}",
                SCHEMA_VERSION
            );
            self.save_document(&doc)?;
        }
        Ok(doc)
    }

    fn save_document(&self, doc: &Value) -> AppResult<()> {
        let raw = serde_json::to_string_pretty(doc)
            .map_err(|e| AppError::store(format!("encoding state document: {e}")))?;
        fs::write(&self.path, raw)
            .map_err(|e| AppError::store(format!("writing {}: {e}", self.path.display())))
    }

    fn update_document(&self, key: &str, value: Value) -> AppResult<()> {
        let mut doc = self.load_document()?;
        doc[key] = value;
        self.save_document(&doc)
    }
}

impl SnapshotStore for JsonFileStore {
    fn load_schedule(&self) -> AppResult<ScheduleState> {
        let doc = self.load_document()?;
        serde_json::from_value(doc["schedule"].clone())
            .map_err(|e| AppError::store(format!("decoding schedule state: {e}")))
    }

    fn save_schedule(&self, state: &ScheduleState) -> AppResult<()> {
        let value = serde_json::to_value(state)
            .map_err(|e| AppError::store(format!("encoding schedule state: {e}")))?;
        self.update_document("schedule", value)
    }

    fn load_stats(&self) -> AppResult<RetryStatistics> {
        let doc = self.load_document()?;
        serde_json::from_value(doc["stats"].clone())
            .map_err(|e| AppError::store(format!("decoding retry statistics: {e}")))
    }

    fn save_stats(&self, stats: &RetryStatistics) -> AppResult<()> {
        let value = serde_json::to_value(stats)
            .map_err(|e| AppError::store(format!("encoding retry statistics: {e}")))?;
        self.update_document("stats", value)
    }
}

impl FlagStore for JsonFileStore {
    fn get_flag(&self, key: &str) -> Option<String> {
        let raw = fs::read_to_string(&self.flags_path).ok()?;
        let doc: Value = serde_json::from_str(&raw).ok()?;
        doc.get(key).and_then(Value::as_str).map(str::to_string)
    }

    fn set_flag(&self, key: &str, value: &str) {
        let mut doc = fs::read_to_string(&self.flags_path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_else(|| json!({}));
        doc[key] = json!(value);
        if let Err(e) = serde_json::to_string(&doc)
            .map_err(anyhow::Error::from)
            .and_then(|raw| fs::write(&self.flags_path, raw).map_err(anyhow::Error::from))
        {
            // Flags must never take an invocation down with them.
            log::error!("[Store] flag write failed for '{}': {}", key, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryStore::default();
        let mut state = store.load_schedule().unwrap();
        assert!(state.last_fetch.is_none());

        state.last_fetch = Some(Utc::now());
        store.save_schedule(&state).unwrap();
        assert!(store.load_schedule().unwrap().last_fetch.is_some());
    }

    #[test]
    fn test_json_store_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("state.json"));

        let mut stats = store.load_stats().unwrap();
        stats.program.record_success(2);
        store.save_stats(&stats).unwrap();

        let reread = store.load_stats().unwrap();
        assert_eq!(reread.program.successes, 1);
        assert_eq!(reread.program.attempts_on_success, 2);

        // Schedule document is independent of the stats document.
        let state = store.load_schedule().unwrap();
        assert_eq!(state.schema_version, SCHEMA_VERSION);
    }

    #[test]
    fn test_flag_store_consistency() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("state.json"));

        assert!(store.get_flag(flags::ENABLED).is_none());
        store.set_flag(flags::ENABLED, "true");
        assert!(store.flag_is_true(flags::ENABLED));
        store.set_flag(flags::ENABLED, "false");
        assert!(!store.flag_is_true(flags::ENABLED));
    }

    #[test]
    fn test_migration_v1_document() {
        // A v1 document predates the stats structure.
        let mut doc = json!({
            "schedule": {
                "last_fetch": null,
                "cached_events": null,
                "exact_checkin": null,
                "exact_checkout": null,
                "schema_version": 1
            }
        });

        assert!(migrate_document(&mut doc));
        assert_eq!(doc["schedule"]["schema_version"], json!(SCHEMA_VERSION));
        assert!(doc["stats"].is_object());

        // Idempotent: a second run is a no-op.
        assert!(!migrate_document(&mut doc));
    }

    #[test]
    fn test_migration_preserves_existing_data() {
        let mut doc = json!({
            "schedule": { "schema_version": 1 },
            "stats": { "program": { "successes": 7, "failures": 0,
                        "attempts_on_success": 9, "first_try_successes": 5 },
                       "delete": {} }
        });

        migrate_document(&mut doc);
        assert_eq!(doc["stats"]["program"]["successes"], json!(7));
    }
}
