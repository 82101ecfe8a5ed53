//! Weekly shift templates used to generate concrete shifts.
//!
//! # Invariants
//! - A period's `end` is after its `start` on the same day.
//! - Week letters rotate every 7 days from the configured anchor:
//!   anchor week is `A`, then `B`, `C`, `D`, `A`...

use super::membership::{BeneficiaryId, FormationId};
use super::shift::JobId;
use super::ValidationError;
use chrono::{NaiveDate, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type PeriodId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum WeekCycle {
    A,
    B,
    C,
    D,
}

impl WeekCycle {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "A" => Some(Self::A),
            "B" => Some(Self::B),
            "C" => Some(Self::C),
            "D" => Some(Self::D),
            _ => None,
        }
    }

    /// Week letter of `date` counted from `anchor` (which is in week `A`).
    pub fn of_date(date: NaiveDate, anchor: NaiveDate) -> Self {
        let weeks = (date - anchor).num_days().div_euclid(7);
        match weeks.rem_euclid(4) {
            0 => Self::A,
            1 => Self::B,
            2 => Self::C,
            _ => Self::D,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub id: PeriodId,
    pub job_id: JobId,
    pub day_of_week: Weekday,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl Period {
    pub fn new(job_id: JobId, day_of_week: Weekday, start: NaiveTime, end: NaiveTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            day_of_week,
            start,
            end,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.end <= self.start {
            return Err(ValidationError::InvalidTimeRange {
                record: "period",
                id: self.id,
            });
        }
        Ok(())
    }
}

/// One slot of a period in a given week letter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodPosition {
    pub id: Uuid,
    pub period_id: PeriodId,
    pub week_cycle: WeekCycle,
    pub formation_id: Option<FormationId>,
    /// Fixed shifter booked on every generated shift of this position.
    pub shifter_id: Option<BeneficiaryId>,
}

impl PeriodPosition {
    pub fn new(period_id: PeriodId, week_cycle: WeekCycle) -> Self {
        Self {
            id: Uuid::new_v4(),
            period_id,
            week_cycle,
            formation_id: None,
            shifter_id: None,
        }
    }
}
