//! Domain model for memberships, shifts and the volunteer-time ledger.
//!
//! # Responsibility
//! - Define canonical records used by repositories and services.
//! - Own pure state transitions that do not need storage (`Shift`
//!   lifecycle, bucket ordering, exemption ranges, card codes).
//!
//! # Invariants
//! - Every persisted record is identified by a stable UUID.
//! - Records are validated before any write reaches storage.

use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub mod bucket;
pub mod event;
pub mod exemption;
pub mod membership;
pub mod period;
pub mod shift;
pub mod swipe_card;
pub mod time_log;

/// Field-level validation failure raised before persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Required text field is blank after trim.
    BlankField(&'static str),
    /// Email does not look like `local@domain.tld`.
    InvalidEmail(String),
    /// Amount must not be negative.
    NegativeAmount(i64),
    /// Time range end is not after start.
    InvalidTimeRange { record: &'static str, id: Uuid },
    /// Date range start is not before end.
    InvalidDateRange { record: &'static str, id: Uuid },
    /// Swipe card code is not a valid EAN-13.
    InvalidCardCode(String),
    /// Required counter value is out of range.
    OutOfRange { field: &'static str, value: i64 },
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BlankField(field) => write!(f, "field `{field}` must not be blank"),
            Self::InvalidEmail(value) => write!(f, "invalid email address `{value}`"),
            Self::NegativeAmount(value) => write!(f, "amount must not be negative, got {value}"),
            Self::InvalidTimeRange { record, id } => {
                write!(f, "{record} {id} must end after it starts")
            }
            Self::InvalidDateRange { record, id } => {
                write!(f, "{record} {id} must start before it ends")
            }
            Self::InvalidCardCode(code) => write!(f, "invalid EAN-13 card code `{code}`"),
            Self::OutOfRange { field, value } => {
                write!(f, "value {value} is out of range for `{field}`")
            }
        }
    }
}

impl Error for ValidationError {}
