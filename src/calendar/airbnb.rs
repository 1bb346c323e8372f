// AirBNB ICS feed parsing.
//
// AirBNB exports date-only stays: DTSTART/DTEND are 8-character date stamps,
// the booking status rides in SUMMARY, and the last four digits of the
// guest's phone number double as the door code. Guest names are not exposed
// by the feed.

use crate::calendar::common::{event_blocks, extract_field};
use crate::calendar::FormatParser;
use crate::models::CalendarEvent;

const CODE_FIELD: &str = "Last 4 Digits.";

pub struct AirBnbParser;

impl FormatParser for AirBnbParser {
    fn parse(&self, text: &str) -> Vec<CalendarEvent> {
        let events: Vec<CalendarEvent> = event_blocks(text)
            .into_iter()
            .map(|block| CalendarEvent {
                status: extract_field(block, "SUMMARY").unwrap_or_default(),
                start_date: extract_field(block, "DTSTART").unwrap_or_default(),
                end_date: extract_field(block, "DTEND").unwrap_or_default(),
                door_code: extract_field(block, CODE_FIELD),
                // The feed carries no guest name; labels get a blank suffix.
                guest_name: Some(" ".to_string()),
            })
            .collect();

        log::debug!("[Calendar] AirBNB parser produced {} events", events.len());
        events
    }
}
