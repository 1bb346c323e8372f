use regex::Regex;

pub mod logging;
pub mod retry;

/// Placeholder returned by `mask_code` when the code is too short to mask.
const MASK_PLACEHOLDER: &str = "****";

/// Substituted when a guest name sanitizes down to nothing.
const LABEL_PLACEHOLDER: &str = "Guest";

/// Door codes are 4-8 decimal digits; everything else is rejected before it
/// gets anywhere near a lock.
pub fn is_valid_door_code(code: &str) -> bool {
    (4..=8).contains(&code.len()) && code.chars().all(|c| c.is_ascii_digit())
}

/// Masks a door code for logs and notifications: all but the last two
/// characters become `*`. Codes shorter than two characters collapse to a
/// fixed placeholder.
pub fn mask_code(code: &str) -> String {
    if code.chars().count() < 2 {
        return MASK_PLACEHOLDER.to_string();
    }
    let total = code.chars().count();
    code.chars()
        .enumerate()
        .map(|(i, c)| if i < total - 2 { '*' } else { c })
        .collect()
}

/// Sanitizes a guest name for embedding in a lock code label: keep only
/// letters, digits and spaces, trim, cap at 20 characters. An empty result
/// substitutes a fixed placeholder.
pub fn sanitize_label(name: &str) -> String {
    let re = Regex::new(r"[^A-Za-z0-9 ]").expect("static regex");
    let cleaned = re.replace_all(name, "");
    let trimmed: String = cleaned.trim().chars().take(20).collect();
    if trimmed.is_empty() {
        LABEL_PLACEHOLDER.to_string()
    } else {
        trimmed
    }
}

/// Uniform date portion of an ical date string: the leading 8 characters,
/// covering both the date-only and date-time encodings.
pub fn extract_date_from_ical(date: &str) -> &str {
    date.get(..8).unwrap_or(date)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_door_codes() {
        for code in ["1234", "00000000", "567890"] {
            assert!(is_valid_door_code(code), "should accept {code}");
        }
    }

    #[test]
    fn test_invalid_door_codes() {
        for code in ["123", "123456789", "12a4", "", "12 34", "-1234"] {
            assert!(!is_valid_door_code(code), "should reject {code:?}");
        }
    }

    #[test]
    fn test_mask_code_keeps_last_two() {
        assert_eq!(mask_code("123456"), "****56");
        assert_eq!(mask_code("12"), "12");
        assert_eq!(mask_code("9876"), "**76");
    }

    #[test]
    fn test_mask_code_short_input() {
        assert_eq!(mask_code(""), "****");
        assert_eq!(mask_code("7"), "****");
    }

    #[test]
    fn test_sanitize_label() {
        assert_eq!(sanitize_label("Jordan"), "Jordan");
        assert_eq!(sanitize_label("  O'Brien-Smith!  "), "OBrienSmith");
        assert_eq!(
            sanitize_label("A very long guest name indeed"),
            "A very long guest na"
        );
        assert_eq!(sanitize_label("!!!"), "Guest");
        assert_eq!(sanitize_label(" "), "Guest");
    }

    #[test]
    fn test_extract_date_from_ical() {
        assert_eq!(extract_date_from_ical("20240115"), "20240115");
        assert_eq!(extract_date_from_ical("20240115T150000"), "20240115");
        assert_eq!(extract_date_from_ical("2024"), "2024");
    }
}
