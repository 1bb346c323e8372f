//! The scheduled procedures: check-in (prep and main phases), check-out,
//! the post-checkout safety cleanup, and the user-triggered manual test.
//!
//! Every public entry point is wrapped in a catch-all: an unexpected error
//! is logged with its cause chain, surfaced to the user as a notification,
//! and recorded as a failed analytics event. A scheduled action never
//! panics the host or dies silently.

use chrono::{Duration, Local, Utc};

use crate::analytics::AnalyticsEvent;
use crate::calendar::{fetch, matcher};
use crate::models::{BookingMatch, CalendarEvent, ScheduleState, Settings};
use crate::scheduler::{Scheduler, TimerKind};
use crate::store::flags;
use crate::utils::{logging, mask_code};
use crate::Services;

/// Caps the delete-until-clean loop per lock during check-out.
const MAX_DELETE_ROUNDS: u32 = 10;

/// How long after a check-out the safety cleanup fires.
const SAFETY_CLEANUP_DELAY_HOURS: i64 = 1;

/// Switches the property's operating mode (climate, access, lighting
/// presets) on the host. Activation failures are logged and reported but
/// never block code provisioning; the lock work matters more than the
/// thermostat.
pub trait ModeActivator: Send + Sync {
    fn activate(&self, mode: &str) -> anyhow::Result<()>;
}

/// No-op activator for hosts without mode support.
pub struct NullModeActivator;

impl ModeActivator for NullModeActivator {
    fn activate(&self, mode: &str) -> anyhow::Result<()> {
        log::debug!("[Modes] No mode backend, ignoring '{}'", mode);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckinPhase {
    /// Early phase, `prep_lead_minutes` before check-in: warms the property
    /// up and optionally provisions codes ahead of the guest.
    Prep,
    /// The check-in time itself.
    Main,
}

impl CheckinPhase {
    fn kind(&self) -> &'static str {
        match self {
            CheckinPhase::Prep => "checkin_prep",
            CheckinPhase::Main => "checkin",
        }
    }
}

pub async fn run_checkin(services: &Services, phase: CheckinPhase, force: bool) {
    if let Err(e) = checkin_inner(services, phase, force).await {
        report_failure(services, phase.kind(), &e);
    }
}

async fn checkin_inner(
    services: &Services,
    phase: CheckinPhase,
    force: bool,
) -> anyhow::Result<()> {
    let settings = &services.settings;
    let kind = phase.kind();

    let Some(events) = fetch_with_state(services, force).await else {
        services
            .notifier
            .notify("Calendar unavailable and no cached data; check-in skipped");
        services
            .analytics
            .record(AnalyticsEvent::outcome(kind, false, "no calendar data"));
        return Ok(());
    };

    let today = matcher::today_stamp(Local::now());
    let bookings = matcher::find_checkins(&events, settings.format, &today, force);
    if bookings.is_empty() {
        log::info!("[Checkin] No qualifying booking today, nothing to do");
        return Ok(());
    }
    if bookings.len() > 1 {
        services.notifier.notify(&format!(
            "{} bookings found for today; programming all door codes",
            bookings.len()
        ));
        services.analytics.record(AnalyticsEvent::outcome(
            "multi_booking",
            true,
            format!("{} same-day bookings", bookings.len()),
        ));
    }

    let Some(mode) = settings.checkin_mode.as_deref() else {
        services
            .notifier
            .notify("Check-in mode is not configured; check-in cannot run");
        services
            .analytics
            .record(AnalyticsEvent::outcome(kind, false, "check-in mode unconfigured"));
        return Ok(());
    };
    activate_mode(services, mode);

    let prep_done_today =
        services.flags.get_flag(flags::PREP_PROVISIONED).as_deref() == Some(today.as_str());
    let mut all_ok = true;
    if should_provision(settings, phase, force, prep_done_today) {
        all_ok = provision_bookings(services, &bookings).await?;
        if phase == CheckinPhase::Prep && all_ok {
            services.flags.set_flag(flags::PREP_PROVISIONED, &today);
        }
    } else {
        log::info!("[Checkin] {} phase: prep already provisioned today", kind);
    }

    if !all_ok {
        services
            .notifier
            .notify("Check-in finished with door code failures; see log for details");
    }
    services.analytics.record(AnalyticsEvent::outcome(
        kind,
        all_ok,
        format!("{} booking(s)", bookings.len()),
    ));
    Ok(())
}

/// Exactly one phase owns provisioning: prep when configured to, otherwise
/// the main run. The main phase only stands back when prep actually
/// provisioned *today* (tracked in the consistent flag tier); a prep trigger
/// that never fired, say after a mid-day enable, must not leave the guest
/// without a code. A forced (manual) run always provisions.
fn should_provision(
    settings: &Settings,
    phase: CheckinPhase,
    force: bool,
    prep_done_today: bool,
) -> bool {
    if force {
        return true;
    }
    match phase {
        CheckinPhase::Prep => settings.prep_provisions_locks,
        CheckinPhase::Main => {
            !(settings.prep_lead_minutes.is_some()
                && settings.prep_provisions_locks
                && prep_done_today)
        }
    }
}

async fn provision_bookings(services: &Services, bookings: &[BookingMatch]) -> anyhow::Result<bool> {
    let mut stats = services.snapshots.load_stats()?;
    let mut all_ok = true;

    for booking in bookings {
        for lock in &services.locks {
            let ok = services
                .engine
                .program_code(
                    lock.as_ref(),
                    &booking.door_code,
                    booking.guest_name.as_deref(),
                    &mut stats,
                )
                .await;
            if !ok {
                services.notifier.notify(&format!(
                    "Could not confirm code {} on lock '{}'",
                    mask_code(&booking.door_code),
                    lock.id()
                ));
                all_ok = false;
            }
        }
    }

    services.snapshots.save_stats(&stats)?;
    Ok(all_ok)
}

pub async fn run_checkout(scheduler: &Scheduler) {
    let services = scheduler.services();
    let result = checkout_inner(services).await;

    // The cleanup is armed whenever deletion work was attempted, and
    // unconditionally on error: an unknown failure state is exactly when a
    // later sweep is most needed.
    let arm_cleanup = match &result {
        Ok(did_work) => *did_work,
        Err(_) => true,
    };
    if arm_cleanup {
        let at = Local::now() + Duration::hours(SAFETY_CLEANUP_DELAY_HOURS);
        scheduler.schedule_at(TimerKind::SafetyCleanup, at);
    }

    if let Err(e) = result {
        report_failure(services, "checkout", &e);
    }
}

/// Returns whether any deletion work was attempted.
async fn checkout_inner(services: &Services) -> anyhow::Result<bool> {
    let settings = &services.settings;

    let Some(events) = fetch_with_state(services, false).await else {
        services
            .notifier
            .notify("Calendar unavailable and no cached data; check-out skipped");
        services
            .analytics
            .record(AnalyticsEvent::outcome("checkout", false, "no calendar data"));
        return Ok(false);
    };

    let today = matcher::today_stamp(Local::now());
    let departures: Vec<CalendarEvent> =
        matcher::find_checkouts(&events, settings.format, &today, false);
    if departures.is_empty() {
        log::info!("[Checkout] No departure today, nothing to do");
        return Ok(false);
    }

    match settings.checkout_mode.as_deref() {
        Some(mode) => activate_mode(services, mode),
        None => {
            services
                .notifier
                .notify("Check-out mode is not configured; removing codes only");
        }
    }

    let mut stats = services.snapshots.load_stats()?;
    let mut all_ok = true;
    for lock in &services.locks {
        let mut rounds = 0;
        loop {
            rounds += 1;
            if rounds > MAX_DELETE_ROUNDS {
                log::warn!(
                    "[Checkout] Lock '{}' still has codes after {} delete rounds, deferring to cleanup",
                    lock.id(),
                    MAX_DELETE_ROUNDS
                );
                all_ok = false;
                break;
            }
            let remaining = match services.engine.find_own_code_slots(lock.as_ref()) {
                Ok(slots) => slots,
                Err(e) => {
                    log::error!("[Checkout] Cannot read lock '{}': {}", lock.id(), e);
                    all_ok = false;
                    break;
                }
            };
            if remaining.is_empty() {
                break;
            }
            if !services.engine.delete_code(lock.as_ref(), &mut stats).await {
                all_ok = false;
                break;
            }
        }
    }
    services.snapshots.save_stats(&stats)?;

    // Let the last command settle on the wireless side, then sweep whatever
    // verification may have missed.
    tokio::time::sleep(services.engine.settle_delay()).await;
    let mut swept = 0;
    for lock in &services.locks {
        swept += services.engine.force_delete_own_codes(lock.as_ref());
    }
    if swept > 0 {
        log::warn!("[Checkout] Final sweep removed {} lingering code(s)", swept);
    }

    if !all_ok {
        services
            .notifier
            .notify("Check-out finished with code removal failures; safety cleanup is scheduled");
    }
    services.analytics.record(AnalyticsEvent::outcome(
        "checkout",
        all_ok,
        format!("{} departure(s), {} swept", departures.len(), swept),
    ));
    Ok(true)
}

pub async fn run_safety_cleanup(services: &Services) {
    if let Err(e) = cleanup_inner(services).await {
        report_failure(services, "safety_cleanup", &e);
    }
}

async fn cleanup_inner(services: &Services) -> anyhow::Result<()> {
    let settings = &services.settings;

    // Abort when a new guest checks in today: their code was (or is about
    // to be) programmed and a sweep would lock them out.
    match fetch_with_state(services, false).await {
        Some(events) => {
            let today = matcher::today_stamp(Local::now());
            if !matcher::find_checkins(&events, settings.format, &today, false).is_empty() {
                log::info!("[Cleanup] Check-in scheduled today, skipping sweep");
                services.analytics.record(AnalyticsEvent::outcome(
                    "safety_cleanup",
                    true,
                    "skipped: same-day check-in",
                ));
                return Ok(());
            }
        }
        None => {
            // With no calendar data the safe direction is still to sweep:
            // a guest without a valid booking should not retain access.
            log::warn!("[Cleanup] No calendar data, sweeping anyway");
        }
    }

    let mut removed = 0;
    for lock in &services.locks {
        removed += services.engine.force_delete_own_codes(lock.as_ref());
    }

    if removed > 0 {
        services.notifier.notify(&format!(
            "Safety cleanup removed {} lingering door code(s)",
            removed
        ));
    } else {
        log::info!("[Cleanup] No lingering codes found");
    }
    services.analytics.record(AnalyticsEvent::outcome(
        "safety_cleanup",
        true,
        format!("{} code(s) removed", removed),
    ));
    Ok(())
}

/// User-triggered end-to-end test: forced fetch (rate limit bypassed, HTTPS
/// gate still enforced), forced matching against the full feed, result
/// written to the strongly-consistent flag tier so the UI can read it back
/// immediately.
pub async fn run_manual_test(services: &Services) -> bool {
    let ok = manual_test_inner(services).await;
    services
        .flags
        .set_flag(flags::LAST_TEST_RESULT, if ok { "pass" } else { "fail" });
    services
        .analytics
        .record(AnalyticsEvent::outcome("manual_test", ok, ""));
    ok
}

async fn manual_test_inner(services: &Services) -> bool {
    let settings = &services.settings;

    let Some(events) = fetch_with_state(services, true).await else {
        services.notifier.notify("Test failed: calendar feed unreachable");
        return false;
    };

    let today = matcher::today_stamp(Local::now());
    let checkins = matcher::find_checkins(&events, settings.format, &today, true);
    let checkouts = matcher::find_checkouts(&events, settings.format, &today, true);
    services.notifier.notify(&format!(
        "Test passed: {} event(s), {} with usable door codes, {} departures",
        events.len(),
        checkins.len(),
        checkouts.len()
    ));
    true
}

/// Loads the schedule snapshot, fetches (or falls back to cache), and
/// persists the updated snapshot. `None` means no data at all.
async fn fetch_with_state(services: &Services, force: bool) -> Option<Vec<CalendarEvent>> {
    let mut state = services.snapshots.load_schedule().unwrap_or_else(|e| {
        log::warn!("[Procedures] Could not load schedule state: {}", e);
        ScheduleState::default()
    });

    let events = fetch::fetch_events(
        services.feed.as_ref(),
        &services.settings,
        &mut state,
        Utc::now(),
        force,
    )
    .await;

    if let Err(e) = services.snapshots.save_schedule(&state) {
        log::error!("[Procedures] Failed to persist schedule state: {}", e);
    }
    events
}

fn activate_mode(services: &Services, mode: &str) {
    match services.modes.activate(mode) {
        Ok(()) => log::info!("[Modes] Activated '{}'", mode),
        Err(e) => {
            log::warn!("[Modes] Could not activate '{}': {}", mode, e);
            services
                .notifier
                .notify(&format!("Could not switch property to '{}' mode", mode));
        }
    }
}

fn report_failure(services: &Services, kind: &str, error: &anyhow::Error) {
    logging::log_error_with_context(error, kind);
    services
        .notifier
        .notify(&format!("Unexpected {} failure: {}", kind, error));
    services
        .analytics
        .record(AnalyticsEvent::outcome(kind, false, error.to_string()));
}
