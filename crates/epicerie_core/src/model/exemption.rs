//! Date-ranged shift exemptions.
//!
//! # Invariants
//! - `start < end`, enforced by `validate()` before persistence.
//! - Both bounds are inclusive calendar days.

use super::membership::MembershipId;
use super::ValidationError;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type ExemptionId = Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipShiftExemption {
    pub id: ExemptionId,
    pub membership_id: MembershipId,
    pub reason: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub created_at: NaiveDateTime,
}

impl MembershipShiftExemption {
    pub fn new(
        membership_id: MembershipId,
        reason: impl Into<String>,
        start: NaiveDate,
        end: NaiveDate,
        created_at: NaiveDateTime,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            membership_id,
            reason: reason.into().trim().to_string(),
            start,
            end,
            created_at,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.reason.is_empty() {
            return Err(ValidationError::BlankField("exemption.reason"));
        }
        if self.start >= self.end {
            return Err(ValidationError::InvalidDateRange {
                record: "exemption",
                id: self.id,
            });
        }
        Ok(())
    }

    pub fn is_current(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn is_past(&self, date: NaiveDate) -> bool {
        self.end < date
    }

    pub fn is_upcoming(&self, date: NaiveDate) -> bool {
        date < self.start
    }

    /// Whether the inclusive range `[from, to]` shares a day with this one.
    pub fn overlaps_range(&self, from: NaiveDate, to: NaiveDate) -> bool {
        self.start <= to && from <= self.end
    }

    pub fn overlaps(&self, other: &MembershipShiftExemption) -> bool {
        self.overlaps_range(other.start, other.end)
    }
}

#[cfg(test)]
mod tests {
    use super::MembershipShiftExemption;
    use crate::model::ValidationError;
    use chrono::NaiveDate;
    use uuid::Uuid;

    fn day(month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, month, day).unwrap()
    }

    fn exemption(start: NaiveDate, end: NaiveDate) -> MembershipShiftExemption {
        MembershipShiftExemption::new(
            Uuid::new_v4(),
            "parental leave",
            start,
            end,
            day(1, 1).and_hms_opt(0, 0, 0).unwrap(),
        )
    }

    #[test]
    fn validate_requires_start_before_end() {
        let same_day = exemption(day(4, 1), day(4, 1));
        assert!(matches!(
            same_day.validate(),
            Err(ValidationError::InvalidDateRange { .. })
        ));
        assert!(exemption(day(4, 1), day(4, 2)).validate().is_ok());
    }

    #[test]
    fn is_current_includes_both_bounds() {
        let range = exemption(day(4, 1), day(4, 30));
        assert!(!range.is_current(day(3, 31)));
        assert!(range.is_current(day(4, 1)));
        assert!(range.is_current(day(4, 30)));
        assert!(!range.is_current(day(5, 1)));
        assert!(range.is_past(day(5, 1)));
        assert!(range.is_upcoming(day(3, 31)));
    }

    #[test]
    fn overlap_detects_shared_boundary_day() {
        let april = exemption(day(4, 1), day(4, 30));
        assert!(april.overlaps(&exemption(day(4, 30), day(5, 10))));
        assert!(!april.overlaps(&exemption(day(5, 1), day(5, 10))));
        assert!(april.overlaps(&exemption(day(3, 1), day(6, 1))));
    }
}
