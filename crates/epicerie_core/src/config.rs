//! Cooperative rules configuration.
//!
//! # Responsibility
//! - Hold every tunable rule of the booking and cycle engine.
//! - Load rules from a JSON file with per-field defaults.
//!
//! # Invariants
//! - Missing fields take the defaults below; unknown fields are rejected.
//! - `validate()` must pass before a config reaches any service.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, source: std::io::Error },
    Parse(serde_json::Error),
    Invalid(&'static str),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read config `{}`: {source}", path.display())
            }
            Self::Parse(err) => write!(f, "invalid config json: {err}"),
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

/// Upper bound for every day-based window (ten years).
const MAX_DAYS: i64 = 3650;
const MAX_MONTHS: u32 = 1200;
const MAX_TOLERANCE_MINUTES: i64 = 24 * 60;

/// Where a membership's cycles are anchored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleKind {
    /// Each membership cycles from its own `first_shift_date`.
    Membership,
    /// Every membership shares the global `abcd_anchor`.
    Abcd,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CycleConfig {
    pub kind: CycleKind,
    /// First day of a week `A`; also the global anchor for `abcd` cycles.
    pub abcd_anchor: NaiveDate,
    pub duration_days: u32,
    /// Volunteer minutes due per cycle.
    pub due_minutes: i64,
    /// Drop (or save) positive balance at cycle end.
    pub regulate_extra_time: bool,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            kind: CycleKind::Membership,
            abcd_anchor: NaiveDate::from_ymd_opt(2024, 1, 1).expect("valid anchor date"),
            duration_days: 28,
            due_minutes: 180,
            regulate_extra_time: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistrationConfig {
    pub duration_months: u32,
    /// Days before expiry from which a renewal is accepted.
    pub renewal_window_days: i64,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            duration_months: 12,
            renewal_window_days: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BookingConfig {
    /// Shifts starting this close to now may be booked over quota.
    pub extra_shift_window_days: i64,
    /// Minimum notice for a member freeing their own shift.
    pub free_min_notice_hours: i64,
    /// Lifetime of a reservation, from the shift's creation.
    pub reservation_hold_days: i64,
    pub max_cycle_overflow_minutes: i64,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            extra_shift_window_days: 3,
            free_min_notice_hours: 48,
            reservation_hold_days: 14,
            max_cycle_overflow_minutes: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct SavingsConfig {
    pub enabled: bool,
    pub max_minutes: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CheckinConfig {
    /// Validate in-progress shifts when the shifter swipes their card.
    pub validate_shifts: bool,
    /// How early before start a swipe counts as in-progress.
    pub tolerance_minutes: i64,
}

impl Default for CheckinConfig {
    fn default() -> Self {
        Self {
            validate_shifts: false,
            tolerance_minutes: 15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProxyConfig {
    pub max_per_beneficiary: u32,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            max_per_beneficiary: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub level: Option<String>,
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct CoopConfig {
    pub cycle: CycleConfig,
    pub registration: RegistrationConfig,
    pub booking: BookingConfig,
    pub savings: SavingsConfig,
    pub checkin: CheckinConfig,
    pub proxy: ProxyConfig,
    pub logging: LoggingConfig,
}

impl CoopConfig {
    /// Parses and validates a JSON config document.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: CoopConfig = serde_json::from_str(text).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cycle.duration_days == 0 {
            return Err(ConfigError::Invalid("cycle.duration_days must be positive"));
        }
        if i64::from(self.cycle.duration_days) > MAX_DAYS {
            return Err(ConfigError::Invalid("cycle.duration_days is out of range"));
        }
        if self.cycle.due_minutes < 0 {
            return Err(ConfigError::Invalid("cycle.due_minutes must not be negative"));
        }
        if self.registration.duration_months == 0 {
            return Err(ConfigError::Invalid(
                "registration.duration_months must be positive",
            ));
        }
        if self.registration.duration_months > MAX_MONTHS {
            return Err(ConfigError::Invalid(
                "registration.duration_months is out of range",
            ));
        }
        if self.registration.renewal_window_days < 0 {
            return Err(ConfigError::Invalid(
                "registration.renewal_window_days must not be negative",
            ));
        }
        if self.registration.renewal_window_days > MAX_DAYS {
            return Err(ConfigError::Invalid(
                "registration.renewal_window_days is out of range",
            ));
        }
        if self.booking.extra_shift_window_days < 0
            || self.booking.free_min_notice_hours < 0
            || self.booking.reservation_hold_days < 0
            || self.booking.max_cycle_overflow_minutes < 0
        {
            return Err(ConfigError::Invalid("booking windows must not be negative"));
        }
        if self.booking.extra_shift_window_days > MAX_DAYS
            || self.booking.reservation_hold_days > MAX_DAYS
            || self.booking.free_min_notice_hours > MAX_DAYS * 24
        {
            return Err(ConfigError::Invalid("booking windows are out of range"));
        }
        if self.savings.max_minutes < 0 {
            return Err(ConfigError::Invalid("savings.max_minutes must not be negative"));
        }
        if !(0..=MAX_TOLERANCE_MINUTES).contains(&self.checkin.tolerance_minutes) {
            return Err(ConfigError::Invalid(
                "checkin.tolerance_minutes must be between 0 and 1440",
            ));
        }
        if self.proxy.max_per_beneficiary == 0 {
            return Err(ConfigError::Invalid("proxy.max_per_beneficiary must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, CoopConfig, CycleKind};

    #[test]
    fn empty_document_yields_defaults() {
        let config = CoopConfig::from_json_str("{}").expect("empty config should parse");
        assert_eq!(config, CoopConfig::default());
        assert_eq!(config.cycle.duration_days, 28);
        assert_eq!(config.cycle.due_minutes, 180);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = CoopConfig::from_json_str(
            r#"{"cycle": {"kind": "abcd", "abcd_anchor": "2026-01-05"}, "savings": {"enabled": true, "max_minutes": 360}}"#,
        )
        .expect("partial config should parse");
        assert_eq!(config.cycle.kind, CycleKind::Abcd);
        assert_eq!(config.cycle.duration_days, 28);
        assert!(config.savings.enabled);
        assert_eq!(config.booking.free_min_notice_hours, 48);
    }

    #[test]
    fn unknown_fields_and_bad_values_are_rejected() {
        let unknown = CoopConfig::from_json_str(r#"{"cycle": {"length": 3}}"#).unwrap_err();
        assert!(matches!(unknown, ConfigError::Parse(_)));

        let zero = CoopConfig::from_json_str(r#"{"cycle": {"duration_days": 0}}"#).unwrap_err();
        assert!(matches!(zero, ConfigError::Invalid(_)));
    }

    #[test]
    fn oversized_windows_are_rejected() {
        for text in [
            r#"{"booking": {"extra_shift_window_days": 9223372036854775807}}"#,
            r#"{"booking": {"free_min_notice_hours": 9223372036854775807}}"#,
            r#"{"booking": {"reservation_hold_days": 3651}}"#,
            r#"{"checkin": {"tolerance_minutes": 1441}}"#,
            r#"{"cycle": {"duration_days": 4000000000}}"#,
            r#"{"registration": {"renewal_window_days": 100000}}"#,
            r#"{"registration": {"duration_months": 4000000000}}"#,
        ] {
            let err = CoopConfig::from_json_str(text).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)), "accepted `{text}`");
        }

        let roomy = CoopConfig::from_json_str(
            r#"{"booking": {"extra_shift_window_days": 3650, "free_min_notice_hours": 87600}, "checkin": {"tolerance_minutes": 1440}}"#,
        )
        .expect("upper bounds are accepted");
        assert_eq!(roomy.booking.extra_shift_window_days, 3650);
    }
}
