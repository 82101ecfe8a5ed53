//! Shift exemption use-cases.
//!
//! # Invariants
//! - Exemptions of one membership never share a day.
//! - An exemption is refused while a beneficiary of the membership holds a
//!   booked, not carried-out shift inside its range.

use crate::model::exemption::{ExemptionId, MembershipShiftExemption};
use crate::model::membership::MembershipId;
use crate::model::shift::ShiftId;
use crate::model::ValidationError;
use crate::repo::ledger_repo::LedgerRepository;
use crate::repo::member_repo::MemberRepository;
use crate::repo::shift_repo::ShiftRepository;
use crate::repo::RepoError;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use log::info;
use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug)]
pub enum ExemptionError {
    MembershipNotFound(MembershipId),
    ExemptionNotFound(ExemptionId),
    Overlap(ExemptionId),
    /// Booked shifts fall inside the requested range.
    ConflictingShifts(Vec<ShiftId>),
    Validation(ValidationError),
    Repo(RepoError),
}

impl Display for ExemptionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MembershipNotFound(id) => write!(f, "membership not found: {id}"),
            Self::ExemptionNotFound(id) => write!(f, "exemption not found: {id}"),
            Self::Overlap(id) => write!(f, "range overlaps exemption {id}"),
            Self::ConflictingShifts(ids) => {
                write!(f, "{} booked shift(s) fall inside the range", ids.len())
            }
            Self::Validation(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ExemptionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for ExemptionError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound {
                record: "exemption",
                id,
            } => Self::ExemptionNotFound(id),
            RepoError::Validation(err) => Self::Validation(err),
            other => Self::Repo(other),
        }
    }
}

impl From<ValidationError> for ExemptionError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

pub struct ExemptionService<L, M, S> {
    ledger: L,
    members: M,
    shifts: S,
}

impl<L, M, S> ExemptionService<L, M, S>
where
    L: LedgerRepository,
    M: MemberRepository,
    S: ShiftRepository,
{
    pub fn new(ledger: L, members: M, shifts: S) -> Self {
        Self {
            ledger,
            members,
            shifts,
        }
    }

    pub fn create(
        &self,
        membership_id: MembershipId,
        reason: impl Into<String>,
        start: NaiveDate,
        end: NaiveDate,
        now: NaiveDateTime,
    ) -> Result<MembershipShiftExemption, ExemptionError> {
        if self.members.get_membership(membership_id)?.is_none() {
            return Err(ExemptionError::MembershipNotFound(membership_id));
        }
        let exemption = MembershipShiftExemption::new(membership_id, reason, start, end, now);
        exemption.validate()?;

        if let Some(existing) = self
            .ledger
            .list_exemptions(membership_id)?
            .into_iter()
            .find(|existing| existing.overlaps(&exemption))
        {
            return Err(ExemptionError::Overlap(existing.id));
        }

        let conflicts = self.conflicting_shifts(&exemption)?;
        if !conflicts.is_empty() {
            return Err(ExemptionError::ConflictingShifts(conflicts));
        }

        self.ledger.create_exemption(&exemption)?;
        info!(
            "event=exemption_create module=exemption status=ok membership_id={} start={} end={}",
            membership_id, start, end
        );
        Ok(exemption)
    }

    pub fn delete(&self, id: ExemptionId) -> Result<(), ExemptionError> {
        self.ledger.delete_exemption(id)?;
        Ok(())
    }

    pub fn get(&self, id: ExemptionId) -> Result<MembershipShiftExemption, ExemptionError> {
        self.ledger
            .get_exemption(id)?
            .ok_or(ExemptionError::ExemptionNotFound(id))
    }

    pub fn list(
        &self,
        membership_id: MembershipId,
    ) -> Result<Vec<MembershipShiftExemption>, ExemptionError> {
        Ok(self.ledger.list_exemptions(membership_id)?)
    }

    pub fn is_exempted(
        &self,
        membership_id: MembershipId,
        date: NaiveDate,
    ) -> Result<bool, ExemptionError> {
        Ok(self
            .ledger
            .list_exemptions(membership_id)?
            .iter()
            .any(|exemption| exemption.is_current(date)))
    }

    /// Booked, not carried-out shifts of the membership starting inside the
    /// exemption range.
    fn conflicting_shifts(
        &self,
        exemption: &MembershipShiftExemption,
    ) -> Result<Vec<ShiftId>, ExemptionError> {
        let shifters: Vec<_> = self
            .members
            .list_beneficiaries(exemption.membership_id)?
            .into_iter()
            .map(|beneficiary| beneficiary.id)
            .collect();
        let from = exemption.start.and_time(NaiveTime::MIN);
        // The range must leave a following day to bound the shift search.
        let to = exemption
            .end
            .succ_opt()
            .ok_or(ValidationError::InvalidDateRange {
                record: "exemption",
                id: exemption.id,
            })?
            .and_time(NaiveTime::MIN);
        Ok(self
            .shifts
            .list_shifts_of(&shifters, Some(from), Some(to))?
            .into_iter()
            .filter(|shift| !shift.was_carried_out)
            .map(|shift| shift.id)
            .collect())
    }
}
