use serde::{Deserialize, Serialize};

/// One reservation block pulled out of the calendar feed.
///
/// Dates are kept as the raw ical strings (`20240115` or `20240115T150000`);
/// downstream code compares only the leading date portion or parses the full
/// timestamp when exact-time scheduling is on. Events are produced fresh on
/// every fetch and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub status: String,
    pub start_date: String,
    pub end_date: String,
    pub door_code: Option<String>,
    pub guest_name: Option<String>,
}

/// A check-in event reduced to what the provisioning engine needs.
///
/// List-valued per day: overlapping same-day bookings are expected, so
/// callers always work with all matches, never just the first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingMatch {
    pub door_code: String,
    pub guest_name: Option<String>,
}

impl BookingMatch {
    pub fn from_event(event: &CalendarEvent) -> Option<Self> {
        event.door_code.as_ref().map(|code| Self {
            door_code: code.clone(),
            guest_name: event.guest_name.clone(),
        })
    }
}
