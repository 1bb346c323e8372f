use serde::{Deserialize, Serialize};

use crate::calendar::{common, CalendarFormat};
use crate::scheduler::parse_hhmm;
use crate::store::{flags, FlagStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OffsetDirection {
    Early,
    Late,
}

/// An early/late shift applied to a trigger time, clamped to 0-60 minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeOffset {
    pub direction: OffsetDirection,
    pub minutes: u32,
}

impl TimeOffset {
    pub fn none() -> Self {
        Self {
            direction: OffsetDirection::Late,
            minutes: 0,
        }
    }

    pub fn early(minutes: u32) -> Self {
        Self {
            direction: OffsetDirection::Early,
            minutes,
        }
    }

    pub fn late(minutes: u32) -> Self {
        Self {
            direction: OffsetDirection::Late,
            minutes,
        }
    }

    pub fn clamped_minutes(&self) -> u32 {
        self.minutes.min(60)
    }

    pub fn signed_minutes(&self) -> i64 {
        let m = i64::from(self.clamped_minutes());
        match self.direction {
            OffsetDirection::Early => -m,
            OffsetDirection::Late => m,
        }
    }
}

/// Immutable configuration snapshot, passed into each component at invocation
/// start instead of being looked up ambiently mid-run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub calendar_url: String,
    pub format: CalendarFormat,
    pub checkin_mode: Option<String>,
    pub checkout_mode: Option<String>,
    /// Default daily trigger times, "HH:MM".
    pub checkin_time: String,
    pub checkout_time: String,
    pub checkin_offset: TimeOffset,
    pub checkout_offset: TimeOffset,
    /// Minutes before the (shifted) check-in trigger to run preparation.
    /// `None` disables the prep trigger.
    pub prep_lead_minutes: Option<u32>,
    /// When set, the prep invocation provisions lock codes and the main
    /// check-in invocation does not re-provision.
    pub prep_provisions_locks: bool,
    /// Schedule against per-booking timestamps embedded in the feed rather
    /// than the fixed daily times. Only meaningful for formats that carry
    /// embedded times.
    pub exact_time_mode: bool,
    /// Debug override for the 5-minute fetch rate limit.
    pub rate_limit_override: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            calendar_url: String::new(),
            format: CalendarFormat::AirBnb,
            checkin_mode: None,
            checkout_mode: None,
            checkin_time: "16:00".to_string(),
            checkout_time: "11:00".to_string(),
            checkin_offset: TimeOffset::none(),
            checkout_offset: TimeOffset::none(),
            prep_lead_minutes: None,
            prep_provisions_locks: false,
            exact_time_mode: false,
            rate_limit_override: false,
        }
    }
}

impl Settings {
    /// Collects configuration problems without blocking a save.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if let Err(e) = common::validate_feed_url(&self.calendar_url) {
            errors.push(format!("calendar URL: {e}"));
        }
        if self.checkin_mode.is_none() {
            errors.push("check-in mode is not configured".to_string());
        }
        if self.checkout_mode.is_none() {
            errors.push("check-out mode is not configured".to_string());
        }
        if parse_hhmm(&self.checkin_time).is_none() {
            errors.push(format!("invalid check-in time '{}'", self.checkin_time));
        }
        if parse_hhmm(&self.checkout_time).is_none() {
            errors.push(format!("invalid check-out time '{}'", self.checkout_time));
        }
        if self.checkin_offset.minutes > 60 {
            errors.push("check-in offset exceeds 60 minutes and will be clamped".to_string());
        }
        if self.checkout_offset.minutes > 60 {
            errors.push("check-out offset exceeds 60 minutes and will be clamped".to_string());
        }
        if self.exact_time_mode && !self.format.has_exact_times() {
            errors.push(format!(
                "exact-time mode is on but the {} format has no embedded times",
                self.format.name()
            ));
        }
        if self.prep_lead_minutes == Some(0) {
            errors.push("prep lead of 0 minutes coincides with the check-in trigger".to_string());
        }

        errors
    }

    /// Runs validation at save time: logs every problem and records overall
    /// validity in the strongly-consistent flag store. Problems never block
    /// the save itself.
    pub fn validate_and_flag(&self, flag_store: &dyn FlagStore) -> Vec<String> {
        let errors = self.validate();
        for error in &errors {
            log::warn!("[Config] {}", error);
        }
        flag_store.set_flag(
            flags::CONFIG_VALID,
            if errors.is_empty() { "true" } else { "false" },
        );
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn valid_settings() -> Settings {
        Settings {
            calendar_url: "https://feeds.example.com/rental.ics".to_string(),
            checkin_mode: Some("Guest".to_string()),
            checkout_mode: Some("Vacant".to_string()),
            ..Settings::default()
        }
    }

    #[test]
    fn test_valid_settings_pass() {
        assert!(valid_settings().validate().is_empty());
    }

    #[test]
    fn test_missing_modes_collected() {
        let settings = Settings {
            checkin_mode: None,
            checkout_mode: None,
            ..valid_settings()
        };
        let errors = settings.validate();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("check-in mode"));
    }

    #[test]
    fn test_http_url_rejected() {
        let settings = Settings {
            calendar_url: "http://feeds.example.com/rental.ics".to_string(),
            ..valid_settings()
        };
        let errors = settings.validate();
        assert!(errors.iter().any(|e| e.contains("HTTPS")));
    }

    #[test]
    fn test_offset_clamping() {
        assert_eq!(TimeOffset::early(90).signed_minutes(), -60);
        assert_eq!(TimeOffset::late(45).signed_minutes(), 45);
        assert_eq!(TimeOffset::none().signed_minutes(), 0);
    }

    #[test]
    fn test_exact_time_requires_timed_format() {
        let settings = Settings {
            exact_time_mode: true,
            format: CalendarFormat::AirBnb,
            ..valid_settings()
        };
        assert!(settings
            .validate()
            .iter()
            .any(|e| e.contains("exact-time")));

        let timed = Settings {
            format: CalendarFormat::OwnerRez,
            ..settings
        };
        assert!(timed.validate().is_empty());
    }

    #[test]
    fn test_validate_and_flag_records_validity() {
        let store = MemoryStore::default();
        valid_settings().validate_and_flag(&store);
        assert_eq!(store.get_flag(flags::CONFIG_VALID).as_deref(), Some("true"));

        Settings::default().validate_and_flag(&store);
        assert_eq!(store.get_flag(flags::CONFIG_VALID).as_deref(), Some("false"));
    }
}
