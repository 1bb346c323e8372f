//! Time-based scheduling of check-in and check-out work.
//!
//! Two modes. Fixed-time scheduling fires every day at configured HH:MM
//! times (shifted by the per-side offsets). Exact-time scheduling reads
//! today's event timestamps from the feed and arms one-shot timers at the
//! booking's own times, falling back per side to the fixed daily time when
//! no event carries one. While exact timers are armed, a recurring poll
//! watches the feed for same-day changes and re-arms everything when the
//! resolved times move.
//!
//! All timers hang off a single `CancellationToken`; clearing timers swaps
//! the token rather than aborting tasks, so a timer task can itself trigger
//! a full reschedule without being killed mid-flight.

use std::sync::{Arc, Mutex, Weak};

use chrono::{DateTime, Duration, Local, NaiveDateTime, TimeZone, Utc};
use tokio_util::sync::CancellationToken;

use crate::calendar::{fetch, matcher};
use crate::models::{ScheduleState, TimeOffset};
use crate::procedures::{self, CheckinPhase};
use crate::store::flags;
use crate::Services;

/// How often the exact-time repoll wakes up.
pub const REPOLL_INTERVAL_MINUTES: i64 = 15;

/// The repoll only acts from this long before the stored check-out time
/// until the stored check-in time.
pub const REPOLL_WINDOW_LEAD_MINUTES: i64 = 30;

/// Parses a `HH:MM` wall-clock string.
pub fn parse_hhmm(s: &str) -> Option<(u32, u32)> {
    let (h, m) = s.split_once(':')?;
    let hour: u32 = h.trim().parse().ok()?;
    let minute: u32 = m.trim().parse().ok()?;
    if hour < 24 && minute < 60 {
        Some((hour, minute))
    } else {
        None
    }
}

/// Parses a 15-character feed timestamp (`YYYYMMDDTHHMMSS`) as
/// property-local wall-clock time. Date-only values have no time portion
/// and return `None`.
pub fn parse_feed_datetime(raw: &str) -> Option<DateTime<Local>> {
    let naive = NaiveDateTime::parse_from_str(raw, "%Y%m%dT%H%M%S").ok()?;
    Local.from_local_datetime(&naive).single()
}

/// Today's trigger instant for a fixed `HH:MM` time shifted by
/// `offset_minutes`. May already be in the past.
pub fn todays_trigger(
    now: DateTime<Local>,
    hhmm: &str,
    offset_minutes: i64,
) -> Option<DateTime<Local>> {
    let (hour, minute) = parse_hhmm(hhmm)?;
    let base = now.date_naive().and_hms_opt(hour, minute, 0)?;
    let trigger = Local.from_local_datetime(&base).single()?;
    Some(trigger + Duration::minutes(offset_minutes))
}

/// An event's trigger instant: its embedded timestamp shifted by the
/// configured offset.
pub fn event_trigger(raw: &str, offset: TimeOffset) -> Option<DateTime<Local>> {
    parse_feed_datetime(raw).map(|at| at + Duration::minutes(offset.signed_minutes()))
}

/// Whether the repoll is inside its active window:
/// `[checkout - lead, checkin)`. A missing side is an open bound, so on a
/// departure-only or arrival-only day the one stored instant still keeps
/// the window live for that side.
pub fn repoll_window_active(
    now: DateTime<Utc>,
    checkout: Option<DateTime<Utc>>,
    checkin: Option<DateTime<Utc>>,
) -> bool {
    if checkout.is_none() && checkin.is_none() {
        return false;
    }
    let opened = checkout
        .map_or(true, |at| now >= at - Duration::minutes(REPOLL_WINDOW_LEAD_MINUTES));
    let not_closed = checkin.map_or(true, |at| now < at);
    opened && not_closed
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    CheckInPrep,
    CheckIn,
    CheckOut,
    SafetyCleanup,
}

impl TimerKind {
    pub fn name(&self) -> &'static str {
        match self {
            TimerKind::CheckInPrep => "check-in prep",
            TimerKind::CheckIn => "check-in",
            TimerKind::CheckOut => "check-out",
            TimerKind::SafetyCleanup => "safety cleanup",
        }
    }
}

pub struct Scheduler {
    services: Arc<Services>,
    // Swapped wholesale on every clear; tasks hold a clone of the token
    // that was current when they were spawned.
    cancel: Mutex<CancellationToken>,
    // Self-handle for the timer tasks this scheduler spawns.
    handle: Weak<Scheduler>,
}

impl Scheduler {
    pub fn new(services: Arc<Services>) -> Arc<Self> {
        Arc::new_cyclic(|handle| Self {
            services,
            cancel: Mutex::new(CancellationToken::new()),
            handle: handle.clone(),
        })
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    fn arc(&self) -> Option<Arc<Self>> {
        self.handle.upgrade()
    }

    fn token(&self) -> CancellationToken {
        match self.cancel.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Cancels every armed timer. Running tasks observe the cancelled token
    /// at their next await point and exit.
    pub fn clear_timers(&self) {
        let mut guard = match self.cancel.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.cancel();
        *guard = CancellationToken::new();
        log::info!("[Scheduler] All timers cleared");
    }

    /// Arms the full timer set from current settings, replacing whatever was
    /// armed before.
    pub async fn enable(&self) {
        self.services.flags.set_flag(flags::ENABLED, "true");
        self.clear_timers();

        let settings = &self.services.settings;
        if settings.exact_time_mode && settings.format.has_exact_times() {
            log::info!("[Scheduler] Enabling with exact-time scheduling");
            self.arm_exact().await;
        } else {
            log::info!("[Scheduler] Enabling with fixed daily times");
            self.arm_fixed_checkout();
            self.arm_fixed_checkin();
        }
    }

    pub fn disable(&self) {
        self.services.flags.set_flag(flags::ENABLED, "false");
        self.clear_timers();
        log::info!("[Scheduler] Disabled");
    }

    fn arm_fixed_checkout(&self) {
        let settings = &self.services.settings;
        self.spawn_daily(
            TimerKind::CheckOut,
            settings.checkout_time.clone(),
            settings.checkout_offset.signed_minutes(),
        );
    }

    fn arm_fixed_checkin(&self) {
        let settings = &self.services.settings;
        let offset = settings.checkin_offset.signed_minutes();
        self.spawn_daily(TimerKind::CheckIn, settings.checkin_time.clone(), offset);
        if let Some(lead) = settings.prep_lead_minutes {
            self.spawn_daily(
                TimerKind::CheckInPrep,
                settings.checkin_time.clone(),
                offset - lead as i64,
            );
        }
    }

    /// Resolves today's check-out and check-in instants from the feed and
    /// arms one-shot timers. Each side independently falls back to the fixed
    /// daily time when today has no event with a usable timestamp. Past-due
    /// instants run immediately, check-out before check-in, so a late enable
    /// never programs a code only to have the stale check-out never fire.
    async fn arm_exact(&self) {
        let services = &self.services;
        let settings = &services.settings;

        let mut state = services.snapshots.load_schedule().unwrap_or_else(|e| {
            log::warn!("[Scheduler] Could not load schedule state: {}", e);
            ScheduleState::default()
        });

        let events =
            fetch::fetch_events(services.feed.as_ref(), settings, &mut state, Utc::now(), false)
                .await;

        let Some(events) = events else {
            log::warn!("[Scheduler] No calendar data; falling back to fixed times");
            services
                .notifier
                .notify("Calendar unavailable; scheduled with default times");
            state.exact_checkout = None;
            state.exact_checkin = None;
            self.save_state(&state);
            self.arm_fixed_checkout();
            self.arm_fixed_checkin();
            return;
        };

        let now = Local::now();
        let today = matcher::today_stamp(now);
        let mut run_now: Vec<TimerKind> = Vec::new();

        // Check-out side first; past-due execution order depends on it.
        let checkout_at = matcher::find_checkouts(&events, settings.format, &today, false)
            .first()
            .and_then(|event| event_trigger(&event.end_date, settings.checkout_offset));
        match checkout_at {
            Some(at) => {
                state.exact_checkout = Some(at.with_timezone(&Utc));
                if at <= now {
                    log::info!("[Scheduler] Check-out time {} already passed, running now", at);
                    run_now.push(TimerKind::CheckOut);
                } else {
                    self.spawn_one_shot(TimerKind::CheckOut, at);
                }
            }
            None => {
                state.exact_checkout = None;
                self.arm_fixed_checkout();
            }
        }

        let checkin_at = matcher::find_checkin_events(&events, settings.format, &today, false)
            .first()
            .and_then(|event| event_trigger(&event.start_date, settings.checkin_offset));
        match checkin_at {
            Some(at) => {
                state.exact_checkin = Some(at.with_timezone(&Utc));
                if let Some(lead) = settings.prep_lead_minutes {
                    let prep_at = at - Duration::minutes(lead as i64);
                    if prep_at > now {
                        self.spawn_one_shot(TimerKind::CheckInPrep, prep_at);
                    }
                    // A past-due prep is skipped; the main check-in
                    // provisions whenever prep did not run today.
                }
                if at <= now {
                    log::info!("[Scheduler] Check-in time {} already passed, running now", at);
                    run_now.push(TimerKind::CheckIn);
                } else {
                    self.spawn_one_shot(TimerKind::CheckIn, at);
                }
            }
            None => {
                state.exact_checkin = None;
                self.arm_fixed_checkin();
            }
        }

        self.save_state(&state);
        self.spawn_repoll();

        for kind in run_now {
            self.run_timer(kind).await;
        }
    }

    /// Re-resolves today's exact times from a fresh fetch and re-arms
    /// everything when they moved. Outside the active window this is a
    /// no-op, so a guest-requested time change in the dead zone before the
    /// window opens is only picked up once the window does.
    pub async fn repoll(&self) {
        let services = &self.services;
        let settings = &services.settings;

        let mut state = match services.snapshots.load_schedule() {
            Ok(state) => state,
            Err(e) => {
                log::warn!("[Scheduler] Repoll skipped, state unreadable: {}", e);
                return;
            }
        };
        let stored_checkout = state.exact_checkout;
        let stored_checkin = state.exact_checkin;
        if !repoll_window_active(Utc::now(), stored_checkout, stored_checkin) {
            log::debug!("[Scheduler] Repoll outside active window, skipping");
            return;
        }

        let events =
            fetch::fetch_events(services.feed.as_ref(), settings, &mut state, Utc::now(), false)
                .await;
        self.save_state(&state);
        let Some(events) = events else {
            log::warn!("[Scheduler] Repoll fetch failed, keeping current timers");
            return;
        };

        let today = matcher::today_stamp(Local::now());
        let new_checkout = matcher::find_checkouts(&events, settings.format, &today, false)
            .first()
            .and_then(|event| event_trigger(&event.end_date, settings.checkout_offset))
            .map(|at| at.with_timezone(&Utc));
        let new_checkin = matcher::find_checkin_events(&events, settings.format, &today, false)
            .first()
            .and_then(|event| event_trigger(&event.start_date, settings.checkin_offset))
            .map(|at| at.with_timezone(&Utc));

        if new_checkout != stored_checkout || new_checkin != stored_checkin {
            log::info!(
                "[Scheduler] Booking times changed (checkout {:?} -> {:?}, checkin {:?} -> {:?}), rescheduling",
                stored_checkout,
                new_checkout,
                stored_checkin,
                new_checkin
            );
            self.enable().await;
        }
    }

    /// Arms a one-shot timer at an absolute instant. Used for exact-time
    /// booking triggers and for the post-checkout safety cleanup.
    pub fn schedule_at(&self, kind: TimerKind, at: DateTime<Local>) {
        self.spawn_one_shot(kind, at);
    }

    fn spawn_one_shot(&self, kind: TimerKind, at: DateTime<Local>) {
        let Some(this) = self.arc() else {
            return;
        };
        let token = self.token();
        log::info!("[Scheduler] {} timer armed for {}", kind.name(), at);
        tokio::spawn(async move {
            let wait = duration_until(at);
            tokio::select! {
                _ = token.cancelled() => {
                    log::debug!("[Scheduler] {} timer cancelled", kind.name());
                }
                _ = tokio::time::sleep(wait) => {
                    this.run_timer(kind).await;
                }
            }
        });
    }

    fn spawn_daily(&self, kind: TimerKind, hhmm: String, offset_minutes: i64) {
        let Some(this) = self.arc() else {
            return;
        };
        let token = self.token();
        tokio::spawn(async move {
            loop {
                let now = Local::now();
                let Some(mut at) = todays_trigger(now, &hhmm, offset_minutes) else {
                    log::error!(
                        "[Scheduler] Invalid time '{}' for {} timer, not arming",
                        hhmm,
                        kind.name()
                    );
                    return;
                };
                if at <= now {
                    at = at + Duration::days(1);
                }
                log::info!("[Scheduler] {} timer armed for {}", kind.name(), at);
                tokio::select! {
                    _ = token.cancelled() => {
                        log::debug!("[Scheduler] {} timer cancelled", kind.name());
                        return;
                    }
                    _ = tokio::time::sleep(duration_until(at)) => {
                        this.run_timer(kind).await;
                    }
                }
            }
        });
    }

    fn spawn_repoll(&self) {
        let Some(this) = self.arc() else {
            return;
        };
        let token = self.token();
        tokio::spawn(async move {
            let interval = std::time::Duration::from_secs(REPOLL_INTERVAL_MINUTES as u64 * 60);
            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(interval) => {
                        this.repoll().await;
                    }
                }
            }
        });
    }

    async fn run_timer(&self, kind: TimerKind) {
        log::info!("[Scheduler] {} timer fired", kind.name());
        match kind {
            TimerKind::CheckInPrep => {
                procedures::run_checkin(&self.services, CheckinPhase::Prep, false).await
            }
            TimerKind::CheckIn => {
                procedures::run_checkin(&self.services, CheckinPhase::Main, false).await
            }
            TimerKind::CheckOut => procedures::run_checkout(self).await,
            TimerKind::SafetyCleanup => procedures::run_safety_cleanup(&self.services).await,
        }
    }

    fn save_state(&self, state: &ScheduleState) {
        if let Err(e) = self.services.snapshots.save_schedule(state) {
            log::error!("[Scheduler] Failed to persist schedule state: {}", e);
        }
    }
}

fn duration_until(at: DateTime<Local>) -> std::time::Duration {
    let millis = (at - Local::now()).num_milliseconds().max(0);
    std::time::Duration::from_millis(millis as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hhmm() {
        assert_eq!(parse_hhmm("16:00"), Some((16, 0)));
        assert_eq!(parse_hhmm("09:30"), Some((9, 30)));
        assert_eq!(parse_hhmm("24:00"), None);
        assert_eq!(parse_hhmm("12:60"), None);
        assert_eq!(parse_hhmm("noonish"), None);
        assert_eq!(parse_hhmm(""), None);
    }

    #[test]
    fn test_parse_feed_datetime() {
        let parsed = parse_feed_datetime("20240115T150000").unwrap();
        assert_eq!(
            parsed.format("%Y-%m-%d %H:%M:%S").to_string(),
            "2024-01-15 15:00:00"
        );
        assert!(parse_feed_datetime("20240115").is_none(), "date-only has no time");
        assert!(parse_feed_datetime("garbage").is_none());
    }

    #[test]
    fn test_todays_trigger_applies_offset() {
        let now = Local.with_ymd_and_hms(2024, 1, 15, 8, 0, 0).unwrap();

        let plain = todays_trigger(now, "16:00", 0).unwrap();
        assert_eq!(plain.format("%H:%M").to_string(), "16:00");

        let early = todays_trigger(now, "16:00", -90).unwrap();
        assert_eq!(early.format("%H:%M").to_string(), "14:30");

        let late = todays_trigger(now, "23:30", 60).unwrap();
        assert_eq!(late.format("%Y-%m-%d %H:%M").to_string(), "2024-01-16 00:30");
    }

    #[test]
    fn test_event_trigger_with_offsets() {
        let at = event_trigger("20240115T150000", TimeOffset::early(120)).unwrap();
        assert_eq!(at.format("%H:%M").to_string(), "13:00");

        let at = event_trigger("20240115T110000", TimeOffset::late(60)).unwrap();
        assert_eq!(at.format("%H:%M").to_string(), "12:00");

        assert!(event_trigger("20240115", TimeOffset::none()).is_none());
    }

    #[test]
    fn test_repoll_window_boundaries() {
        let checkout = Utc.with_ymd_and_hms(2024, 1, 15, 19, 0, 0).unwrap();
        let checkin = Utc.with_ymd_and_hms(2024, 1, 16, 0, 0, 0).unwrap();

        let before = checkout - Duration::minutes(31);
        let opening = checkout - Duration::minutes(30);
        let between = checkout + Duration::hours(2);
        let closing = checkin;

        assert!(!repoll_window_active(before, Some(checkout), Some(checkin)));
        assert!(repoll_window_active(opening, Some(checkout), Some(checkin)));
        assert!(repoll_window_active(between, Some(checkout), Some(checkin)));
        assert!(
            !repoll_window_active(closing, Some(checkout), Some(checkin)),
            "window is half-open"
        );
    }

    #[test]
    fn test_repoll_window_with_one_side_missing() {
        let checkout = Utc.with_ymd_and_hms(2024, 1, 15, 11, 0, 0).unwrap();
        let checkin = Utc.with_ymd_and_hms(2024, 1, 15, 16, 0, 0).unwrap();

        // Departure-only day: open-ended after the lead.
        assert!(!repoll_window_active(
            checkout - Duration::minutes(31),
            Some(checkout),
            None
        ));
        assert!(repoll_window_active(
            checkout + Duration::hours(6),
            Some(checkout),
            None
        ));

        // Arrival-only day: active all the way up to check-in.
        assert!(repoll_window_active(
            checkin - Duration::hours(8),
            None,
            Some(checkin)
        ));
        assert!(!repoll_window_active(checkin, None, Some(checkin)));

        // Nothing stored at all: nothing to watch.
        assert!(!repoll_window_active(checkin, None, None));
    }
}
