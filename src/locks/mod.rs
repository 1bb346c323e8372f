//! Lock provisioning engine: retry-with-verification around code set/delete
//! commands, gap-aware slot allocation, own-code identification, and the
//! advisory pending-operation table.

pub mod device;

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use chrono::Utc;

use crate::analytics::{AnalyticsEvent, AnalyticsSink};
use crate::models::{OperationKind, PendingLockOperation, RetryStatistics};
use crate::utils::logging;
use crate::utils::retry::{retry_with_verification, Attempt, RetryOutcome, VerifyRetryConfig};
use crate::utils::{is_valid_door_code, mask_code, sanitize_label};

use device::{classify_event_value, parse_code_table, CodeChange, CodeSlot, DeviceEvent, DeviceLock};

/// Label prefix that marks a slot as belonging to this engine.
pub const OWN_CODE_PREFIX: &str = "Staylock";

/// Slot capacity assumed when the device does not report one.
pub const DEFAULT_MAX_SLOTS: u32 = 30;

/// Builds the label written next to a provisioned code: the ownership prefix
/// plus the sanitized guest name for human inspection, blank-suffixed when no
/// name is available.
pub fn own_code_label(guest_name: Option<&str>) -> String {
    match guest_name {
        None => format!("{OWN_CODE_PREFIX} "),
        Some(name) => format!("{OWN_CODE_PREFIX} {}", sanitize_label(name)),
    }
}

fn is_own(slot: &CodeSlot) -> bool {
    slot.label.contains(OWN_CODE_PREFIX)
}

fn own_slots_in(table: &BTreeMap<u32, CodeSlot>) -> Vec<u32> {
    table
        .iter()
        .filter(|(_, entry)| is_own(entry))
        .map(|(slot, _)| *slot)
        .collect()
}

/// First unused slot in 1..=max: gap-aware, not append-at-end.
fn next_free_slot_in(table: &BTreeMap<u32, CodeSlot>, max_slots: Option<u32>) -> Option<u32> {
    let max = max_slots.unwrap_or(DEFAULT_MAX_SLOTS);
    (1..=max).find(|slot| !table.contains_key(slot))
}

pub struct LockEngine {
    retry: VerifyRetryConfig,
    analytics: Arc<dyn AnalyticsSink>,
    pending: Mutex<HashMap<String, PendingLockOperation>>,
}

impl LockEngine {
    pub fn new(analytics: Arc<dyn AnalyticsSink>) -> Self {
        Self {
            retry: VerifyRetryConfig::default(),
            analytics,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Overrides the retry policy; tests use millisecond settle delays.
    pub fn with_retry(mut self, retry: VerifyRetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn settle_delay(&self) -> std::time::Duration {
        self.retry.settle_delay
    }

    fn code_table(&self, lock: &dyn DeviceLock) -> Result<BTreeMap<u32, CodeSlot>> {
        parse_code_table(&lock.current_codes()?)
    }

    /// Slots on this lock whose label carries the ownership prefix.
    pub fn find_own_code_slots(&self, lock: &dyn DeviceLock) -> Result<Vec<u32>> {
        Ok(own_slots_in(&self.code_table(lock)?))
    }

    pub fn find_next_free_slot(&self, lock: &dyn DeviceLock) -> Result<Option<u32>> {
        Ok(next_free_slot_in(
            &self.code_table(lock)?,
            lock.current_max_slots(),
        ))
    }

    /// Programs `code` into the first free slot of `lock`, retrying until the
    /// device's live code table confirms it. Returns whether the end state
    /// was verified.
    pub async fn program_code(
        &self,
        lock: &dyn DeviceLock,
        code: &str,
        guest_name: Option<&str>,
        stats: &mut RetryStatistics,
    ) -> bool {
        if !is_valid_door_code(code) {
            log::error!(
                "[Locks] Refusing to program invalid code {} on '{}'",
                mask_code(code),
                lock.id()
            );
            stats.class_mut(OperationKind::Program).record_failure();
            self.analytics.record(AnalyticsEvent::new(
                "program",
                false,
                0,
                format!("invalid code on lock {}", lock.id()),
            ));
            return false;
        }

        let label = own_code_label(guest_name);
        let outcome = retry_with_verification(
            &self.retry,
            |_attempt| {
                let label = label.clone();
                async move {
                    let table = self.code_table(lock)?;
                    if table.values().any(|s| is_own(s) && s.code == code) {
                        return Ok(Attempt::Satisfied);
                    }
                    let Some(slot) = next_free_slot_in(&table, lock.current_max_slots()) else {
                        return Ok(Attempt::Abort("no free code slot".to_string()));
                    };
                    self.record_pending(lock.id(), OperationKind::Program);
                    lock.set_code(slot, code, &label)?;
                    Ok(Attempt::Issued)
                }
            },
            || async {
                let table = self.code_table(lock)?;
                Ok(table.values().any(|s| is_own(s) && s.code == code))
            },
        )
        .await;

        self.finish(lock, OperationKind::Program, &outcome, stats, || {
            format!("code {} on lock {}", mask_code(code), lock.id())
        })
    }

    /// Deletes one of the engine's own codes from `lock` (never arbitrary
    /// codes), verified against the live code table. Deleting when none
    /// remain is a success.
    pub async fn delete_code(&self, lock: &dyn DeviceLock, stats: &mut RetryStatistics) -> bool {
        let target = AtomicU32::new(0);

        let outcome = retry_with_verification(
            &self.retry,
            |_attempt| {
                let target = &target;
                async move {
                    let table = self.code_table(lock)?;
                    let own = own_slots_in(&table);
                    let Some(slot) = own.first().copied() else {
                        return Ok(Attempt::Satisfied);
                    };
                    target.store(slot, Ordering::SeqCst);
                    self.record_pending(lock.id(), OperationKind::Delete);
                    lock.delete_code(slot)?;
                    Ok(Attempt::Issued)
                }
            },
            || {
                let target = &target;
                async move {
                    let table = self.code_table(lock)?;
                    match target.load(Ordering::SeqCst) {
                        0 => Ok(own_slots_in(&table).is_empty()),
                        slot => Ok(!table.get(&slot).map_or(false, is_own)),
                    }
                }
            },
        )
        .await;

        self.finish(lock, OperationKind::Delete, &outcome, stats, || {
            format!("own code on lock {}", lock.id())
        })
    }

    /// Best-effort sweep that removes every own-code without the retry loop.
    /// Used by the post-checkout duplicate sweep and the safety cleanup.
    pub fn force_delete_own_codes(&self, lock: &dyn DeviceLock) -> usize {
        let slots = match self.find_own_code_slots(lock) {
            Ok(slots) => slots,
            Err(e) => {
                log::warn!("[Locks] Sweep could not read '{}': {}", lock.id(), e);
                return 0;
            }
        };

        let mut removed = 0;
        for slot in slots {
            self.record_pending(lock.id(), OperationKind::Delete);
            match lock.delete_code(slot) {
                Ok(()) => removed += 1,
                Err(e) => log::warn!(
                    "[Locks] Sweep delete of slot {} on '{}' failed: {}",
                    slot,
                    lock.id(),
                    e
                ),
            }
        }
        removed
    }

    /// Correlates an inbound device event against the pending-operation
    /// table. Advisory only: the entry is removed on every observed event
    /// for the lock, matched or not, and the outcome never gates the
    /// synchronous retry loop.
    pub fn handle_device_event(&self, event: &DeviceEvent) {
        let pending = self
            .pending
            .lock()
            .expect("pending mutex")
            .remove(&event.lock_id);

        let Some(op) = pending else {
            log::debug!(
                "[Locks] Event for '{}' with no pending operation: {}",
                event.lock_id,
                event.value
            );
            return;
        };

        match (classify_event_value(&event.value), op.kind) {
            (CodeChange::Set, OperationKind::Program)
            | (CodeChange::Deleted, OperationKind::Delete) => {
                self.analytics.record(AnalyticsEvent::outcome(
                    &format!("{}_confirmed", op.kind.name()),
                    true,
                    format!("lock {}", event.lock_id),
                ));
            }
            (CodeChange::Failed, kind) => {
                self.analytics.record(AnalyticsEvent::outcome(
                    &format!("{}_reported_failed", kind.name()),
                    false,
                    format!("lock {}: {}", event.lock_id, event.value),
                ));
            }
            (change, kind) => {
                log::debug!(
                    "[Locks] Event '{}' ({:?}) did not match pending {:?} for '{}'",
                    event.value,
                    change,
                    kind,
                    event.lock_id
                );
            }
        }
    }

    /// Pending entry for a lock, if any. Exposed for host observability.
    pub fn pending_operation(&self, lock_id: &str) -> Option<PendingLockOperation> {
        self.pending
            .lock()
            .expect("pending mutex")
            .get(lock_id)
            .cloned()
    }

    fn record_pending(&self, lock_id: &str, kind: OperationKind) {
        self.pending.lock().expect("pending mutex").insert(
            lock_id.to_string(),
            PendingLockOperation {
                lock_id: lock_id.to_string(),
                kind,
                submitted_at: Utc::now(),
            },
        );
    }

    fn finish(
        &self,
        lock: &dyn DeviceLock,
        kind: OperationKind,
        outcome: &RetryOutcome,
        stats: &mut RetryStatistics,
        detail: impl Fn() -> String,
    ) -> bool {
        let success = outcome.is_success();
        match outcome {
            RetryOutcome::Success { attempts } => {
                stats.class_mut(kind).record_success(*attempts);
            }
            RetryOutcome::Exhausted { .. } | RetryOutcome::Aborted { .. } => {
                stats.class_mut(kind).record_failure();
            }
        }

        let detail = match outcome {
            RetryOutcome::Aborted { reason, .. } => format!("{} ({})", detail(), reason),
            _ => detail(),
        };
        logging::log_lock_operation(lock.id(), kind.name(), outcome.attempts(), success);
        self.analytics.record(AnalyticsEvent::new(
            kind.name(),
            success,
            outcome.attempts(),
            detail,
        ));
        success
    }
}
