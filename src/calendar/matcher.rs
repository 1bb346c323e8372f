//! Selects today's check-in and check-out events from a normalized event
//! list.
//!
//! Both matchers return *all* qualifying events: same-day overlapping
//! bookings are a first-class case. Callers treat more than one match as a
//! warning condition (notify + count), not an error.

use chrono::{DateTime, Local};

use crate::calendar::CalendarFormat;
use crate::models::{BookingMatch, CalendarEvent};
use crate::utils::{extract_date_from_ical, is_valid_door_code};

/// Local-date stamp in the feed's 8-character encoding.
pub fn today_stamp(now: DateTime<Local>) -> String {
    now.format("%Y%m%d").to_string()
}

/// A check-in qualifies when it starts today (or the override is forced),
/// carries the format's confirmation token, and has a valid 4-8 digit door
/// code. Returns the full events; exact-time scheduling needs their embedded
/// timestamps.
pub fn find_checkin_events(
    events: &[CalendarEvent],
    format: CalendarFormat,
    today: &str,
    force_override: bool,
) -> Vec<CalendarEvent> {
    events
        .iter()
        .filter(|event| force_override || extract_date_from_ical(&event.start_date) == today)
        .filter(|event| event.status == format.status_token())
        .filter(|event| {
            event
                .door_code
                .as_deref()
                .map_or(false, is_valid_door_code)
        })
        .cloned()
        .collect()
}

/// Check-in events reduced to what the provisioning engine consumes.
pub fn find_checkins(
    events: &[CalendarEvent],
    format: CalendarFormat,
    today: &str,
    force_override: bool,
) -> Vec<BookingMatch> {
    find_checkin_events(events, format, today, force_override)
        .iter()
        .filter_map(BookingMatch::from_event)
        .collect()
}

/// A check-out qualifies on end-date and status token only: deletion does
/// not need the original code, it removes by ownership label.
pub fn find_checkouts(
    events: &[CalendarEvent],
    format: CalendarFormat,
    today: &str,
    force_override: bool,
) -> Vec<CalendarEvent> {
    events
        .iter()
        .filter(|event| force_override || extract_date_from_ical(&event.end_date) == today)
        .filter(|event| event.status == format.status_token())
        .cloned()
        .collect()
}
