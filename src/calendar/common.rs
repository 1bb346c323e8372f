use regex::Regex;
use url::Url;

use crate::error::{AppError, AppResult};

/// Container marker a real feed body must carry; anything without it is
/// treated as a fetch failure, not a parse failure.
pub const CONTAINER_MARKER: &str = "BEGIN:VCALENDAR";

pub fn has_container(body: &str) -> bool {
    body.contains(CONTAINER_MARKER)
}

/// Splits the feed into independent event blocks: non-overlapping,
/// greedy-shortest match from each BEGIN marker to the next END marker.
pub fn event_blocks(text: &str) -> Vec<&str> {
    let re = Regex::new(r"(?s)BEGIN:VEVENT(.*?)END:VEVENT").expect("static regex");
    re.captures_iter(text)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect()
}

/// Tolerant field extraction: find a line containing the field name followed
/// eventually by a colon, then capture the run of word characters right after
/// it (optional horizontal whitespace allowed). A missing field is absent,
/// not an error.
pub fn extract_field(block: &str, field: &str) -> Option<String> {
    let pattern = format!(r"{}.*?:[ \t]*(\w+)", regex::escape(field));
    let re = Regex::new(&pattern).ok()?;
    re.captures(block)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Validates a calendar feed URL. HTTPS is a hard security gate: plain HTTP
/// is rejected unconditionally, even when a fetch is forced.
pub fn validate_feed_url(feed_url: &str) -> AppResult<()> {
    if feed_url.trim().is_empty() {
        return Err(AppError::config("feed URL cannot be empty"));
    }

    let parsed =
        Url::parse(feed_url).map_err(|e| AppError::config(format!("invalid feed URL format: {e}")))?;

    if parsed.scheme() != "https" {
        return Err(AppError::config(format!(
            "feed URL must use HTTPS; got scheme '{}://'",
            parsed.scheme()
        )));
    }

    let domain = parsed
        .host_str()
        .ok_or_else(|| AppError::config("feed URL has no host"))?;

    // Reject localhost and local network addresses for security
    if domain == "localhost"
        || domain.starts_with("127.")
        || domain.starts_with("192.168.")
        || domain.starts_with("10.")
        || domain.starts_with("172.16.")
    {
        return Err(AppError::config(
            "feed URL cannot point to localhost or local network addresses",
        ));
    }

    Ok(())
}
