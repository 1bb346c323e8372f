// Calendar layer: feed retrieval, format parsing, event matching.
// One parser implementation per named feed format, selected through a
// registry keyed by the format identifier.

pub mod airbnb;
pub mod common;
pub mod fetch;
pub mod matcher;
pub mod ownerrez;

use serde::{Deserialize, Serialize};

use crate::models::CalendarEvent;

/// The fixed set of supported feed formats. Arbitrary calendar formats are a
/// non-goal; each variant maps to exactly one parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CalendarFormat {
    AirBnb,
    OwnerRez,
}

impl CalendarFormat {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "AirBNB" => Some(Self::AirBnb),
            "OwnerRez" => Some(Self::OwnerRez),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::AirBnb => "AirBNB",
            Self::OwnerRez => "OwnerRez",
        }
    }

    /// Status token that marks a confirmed booking in this format.
    pub fn status_token(&self) -> &'static str {
        match self {
            Self::AirBnb => "Reserved",
            Self::OwnerRez => "CONFIRMED",
        }
    }

    /// Whether the format embeds per-booking check-in/out times (date+time
    /// encoding) rather than date-only stamps.
    pub fn has_exact_times(&self) -> bool {
        match self {
            Self::AirBnb => false,
            Self::OwnerRez => true,
        }
    }
}

/// Single contract every format parser conforms to.
pub trait FormatParser: Send + Sync {
    fn parse(&self, text: &str) -> Vec<CalendarEvent>;
}

/// Registry lookup for a format's parser.
pub fn parser_for(format: CalendarFormat) -> &'static dyn FormatParser {
    match format {
        CalendarFormat::AirBnb => &airbnb::AirBnbParser,
        CalendarFormat::OwnerRez => &ownerrez::OwnerRezParser,
    }
}

pub fn parse(format: CalendarFormat, text: &str) -> Vec<CalendarEvent> {
    parser_for(format).parse(text)
}

/// String-keyed entry point for hosts that store the format as text. An
/// unknown name yields an empty event list and a logged error; callers treat
/// an empty result as "no data".
pub fn parse_named(name: &str, text: &str) -> Vec<CalendarEvent> {
    match CalendarFormat::from_name(name) {
        Some(format) => parse(format, text),
        None => {
            log::error!("[Calendar] Unknown feed format '{}'", name);
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_names_roundtrip() {
        for format in [CalendarFormat::AirBnb, CalendarFormat::OwnerRez] {
            assert_eq!(CalendarFormat::from_name(format.name()), Some(format));
        }
        assert_eq!(CalendarFormat::from_name("Google"), None);
    }

    #[test]
    fn test_unknown_format_yields_empty() {
        let events = parse_named("Google", "BEGIN:VCALENDAR\nEND:VCALENDAR");
        assert!(events.is_empty());
    }
}
