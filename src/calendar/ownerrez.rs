// OwnerRez ICS feed parsing.
//
// OwnerRez exports full timestamps (date+time with a `T` separator), a
// STATUS line, a dedicated DoorCode field and the guest's first name, which
// makes this the format that supports exact-time scheduling.

use crate::calendar::common::{event_blocks, extract_field};
use crate::calendar::FormatParser;
use crate::models::CalendarEvent;

pub struct OwnerRezParser;

impl FormatParser for OwnerRezParser {
    fn parse(&self, text: &str) -> Vec<CalendarEvent> {
        let events: Vec<CalendarEvent> = event_blocks(text)
            .into_iter()
            .map(|block| CalendarEvent {
                status: extract_field(block, "STATUS").unwrap_or_default(),
                start_date: extract_field(block, "DTSTART").unwrap_or_default(),
                end_date: extract_field(block, "DTEND").unwrap_or_default(),
                door_code: extract_field(block, "DoorCode"),
                guest_name: extract_field(block, "FirstName"),
            })
            .collect();

        log::debug!("[Calendar] OwnerRez parser produced {} events", events.len());
        events
    }
}
