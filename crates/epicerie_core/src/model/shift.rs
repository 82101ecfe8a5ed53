//! Shift and job records with the shift lifecycle state machine.
//!
//! # Responsibility
//! - Define a bookable volunteer slot and the job it belongs to.
//! - Own the pure book/free/dismiss/validate/invalidate transitions.
//!
//! # Invariants
//! - `end > start`.
//! - A shift has at most one active shifter; booking an actively booked
//!   shift is refused.
//! - `free`, `validate` and `invalidate` are idempotent and report whether
//!   they changed anything.
//! - Freeing resets shifter, booker, booked time, dismissal and `fixe`.
//! - A carried-out shift cannot be freed, dismissed or re-booked.

use super::membership::{BeneficiaryId, FormationId};
use super::ValidationError;
use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub type ShiftId = Uuid;
pub type JobId = Uuid;

/// Role a shift is staffed for (cashier, reception, stock...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub name: String,
    pub color: String,
    pub enabled: bool,
    /// Below this many shifters a bucket is flagged as understaffed.
    pub min_shifter_alert: u32,
}

impl Job {
    pub fn new(name: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into().trim().to_string(),
            color: color.into(),
            enabled: true,
            min_shifter_alert: 0,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.is_empty() {
            return Err(ValidationError::BlankField("job.name"));
        }
        Ok(())
    }
}

/// Lifecycle state of a shift observed at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShiftState {
    /// No shifter, no reservation.
    Free,
    /// No shifter, held for `last_shifter_id` pending confirmation.
    Reserved,
    /// Active shifter assigned.
    Booked,
    /// Shifter released the slot; open to other beneficiaries.
    Dismissed,
    /// Validated as done.
    CarriedOut,
    /// Booked, ended, not carried out.
    Invalidated,
}

/// Refused shift transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShiftTransitionError {
    AlreadyBooked(ShiftId),
    NotBooked(ShiftId),
    AlreadyCarriedOut(ShiftId),
    AlreadyDismissed(ShiftId),
}

impl Display for ShiftTransitionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyBooked(id) => write!(f, "shift {id} already has a shifter"),
            Self::NotBooked(id) => write!(f, "shift {id} has no shifter"),
            Self::AlreadyCarriedOut(id) => write!(f, "shift {id} was already carried out"),
            Self::AlreadyDismissed(id) => write!(f, "shift {id} was already dismissed"),
        }
    }
}

impl Error for ShiftTransitionError {}

/// Bookable volunteer time slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shift {
    pub id: ShiftId,
    pub job_id: JobId,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub formation_id: Option<FormationId>,
    pub shifter_id: Option<BeneficiaryId>,
    pub booker_id: Option<BeneficiaryId>,
    pub booked_time: Option<NaiveDateTime>,
    pub is_dismissed: bool,
    pub dismissed_time: Option<NaiveDateTime>,
    pub dismissed_reason: Option<String>,
    /// Reservation holder; meaningful only while `shifter_id` is `None`.
    pub last_shifter_id: Option<BeneficiaryId>,
    pub was_carried_out: bool,
    pub locked: bool,
    /// Booked from a fixed weekly position.
    pub fixe: bool,
    pub created_at: NaiveDateTime,
}

impl Shift {
    pub fn new(
        job_id: JobId,
        start: NaiveDateTime,
        end: NaiveDateTime,
        created_at: NaiveDateTime,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            start,
            end,
            formation_id: None,
            shifter_id: None,
            booker_id: None,
            booked_time: None,
            is_dismissed: false,
            dismissed_time: None,
            dismissed_reason: None,
            last_shifter_id: None,
            was_carried_out: false,
            locked: false,
            fixe: false,
            created_at,
        }
    }

    pub fn with_formation(mut self, formation_id: Option<FormationId>) -> Self {
        self.formation_id = formation_id;
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.end <= self.start {
            return Err(ValidationError::InvalidTimeRange {
                record: "shift",
                id: self.id,
            });
        }
        Ok(())
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn duration_minutes(&self) -> i64 {
        self.duration().num_minutes()
    }

    /// Shifter who currently holds the slot (dismissed shifters excluded).
    pub fn active_shifter(&self) -> Option<BeneficiaryId> {
        if self.is_dismissed {
            None
        } else {
            self.shifter_id
        }
    }

    pub fn is_booked(&self) -> bool {
        self.active_shifter().is_some()
    }

    /// Whether another beneficiary could take this slot, ignoring rules
    /// that depend on who is asking.
    pub fn is_available(&self) -> bool {
        !self.was_carried_out && self.active_shifter().is_none()
    }

    pub fn is_reserved(&self) -> bool {
        self.shifter_id.is_none() && self.last_shifter_id.is_some()
    }

    pub fn has_started(&self, now: NaiveDateTime) -> bool {
        self.start <= now
    }

    pub fn is_past(&self, now: NaiveDateTime) -> bool {
        self.end <= now
    }

    pub fn overlaps(&self, other: &Shift) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn state(&self, now: NaiveDateTime) -> ShiftState {
        if self.was_carried_out {
            return ShiftState::CarriedOut;
        }
        match (self.shifter_id, self.is_dismissed) {
            (Some(_), false) if self.is_past(now) => ShiftState::Invalidated,
            (Some(_), false) => ShiftState::Booked,
            (Some(_), true) => ShiftState::Dismissed,
            (None, _) if self.last_shifter_id.is_some() => ShiftState::Reserved,
            (None, _) => ShiftState::Free,
        }
    }

    pub fn book(
        &mut self,
        shifter_id: BeneficiaryId,
        booker_id: Option<BeneficiaryId>,
        at: NaiveDateTime,
    ) -> Result<(), ShiftTransitionError> {
        if self.was_carried_out {
            return Err(ShiftTransitionError::AlreadyCarriedOut(self.id));
        }
        if self.is_booked() {
            return Err(ShiftTransitionError::AlreadyBooked(self.id));
        }
        self.shifter_id = Some(shifter_id);
        self.booker_id = booker_id;
        self.booked_time = Some(at);
        self.clear_dismissal();
        self.last_shifter_id = None;
        Ok(())
    }

    /// Returns `Ok(false)` when the shift was already free.
    pub fn free(&mut self) -> Result<bool, ShiftTransitionError> {
        if self.was_carried_out {
            return Err(ShiftTransitionError::AlreadyCarriedOut(self.id));
        }
        if self.shifter_id.is_none() && !self.fixe {
            return Ok(false);
        }
        self.shifter_id = None;
        self.booker_id = None;
        self.booked_time = None;
        self.fixe = false;
        self.clear_dismissal();
        Ok(true)
    }

    pub fn dismiss(
        &mut self,
        reason: Option<String>,
        at: NaiveDateTime,
    ) -> Result<(), ShiftTransitionError> {
        if self.was_carried_out {
            return Err(ShiftTransitionError::AlreadyCarriedOut(self.id));
        }
        if self.shifter_id.is_none() {
            return Err(ShiftTransitionError::NotBooked(self.id));
        }
        if self.is_dismissed {
            return Err(ShiftTransitionError::AlreadyDismissed(self.id));
        }
        self.is_dismissed = true;
        self.dismissed_time = Some(at);
        self.dismissed_reason = reason
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        Ok(())
    }

    /// Returns `Ok(false)` when the shift was already carried out.
    pub fn validate_done(&mut self) -> Result<bool, ShiftTransitionError> {
        if self.active_shifter().is_none() {
            return Err(ShiftTransitionError::NotBooked(self.id));
        }
        if self.was_carried_out {
            return Ok(false);
        }
        self.was_carried_out = true;
        Ok(true)
    }

    /// Returns `Ok(false)` when the shift was not carried out.
    pub fn invalidate(&mut self) -> Result<bool, ShiftTransitionError> {
        if self.active_shifter().is_none() {
            return Err(ShiftTransitionError::NotBooked(self.id));
        }
        if !self.was_carried_out {
            return Ok(false);
        }
        self.was_carried_out = false;
        Ok(true)
    }

    pub fn reserve_for(&mut self, beneficiary_id: BeneficiaryId) -> Result<(), ShiftTransitionError> {
        if self.shifter_id.is_some() {
            return Err(ShiftTransitionError::AlreadyBooked(self.id));
        }
        self.last_shifter_id = Some(beneficiary_id);
        Ok(())
    }

    /// Returns `false` when no reservation was held.
    pub fn release_reservation(&mut self) -> bool {
        self.last_shifter_id.take().is_some()
    }

    fn clear_dismissal(&mut self) {
        self.is_dismissed = false;
        self.dismissed_time = None;
        self.dismissed_reason = None;
    }
}
