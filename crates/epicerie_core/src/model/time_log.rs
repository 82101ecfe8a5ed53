//! Volunteer-time ledger entries.
//!
//! # Invariants
//! - `minutes` is signed: credits are positive, dues are negative.
//! - `Saving` entries feed the savings counter; every other kind feeds the
//!   shift-time balance.
//! - At most one cycle-end kind is written per membership and cycle start.

use super::membership::{BeneficiaryId, MembershipId};
use super::shift::{Shift, ShiftId};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type TimeLogId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeLogKind {
    /// Manual correction by an administrator.
    Custom,
    ShiftValidated,
    ShiftInvalidated,
    CycleEnd,
    CycleEndFrozen,
    CycleEndExempted,
    CycleEndExpiredRegistration,
    /// Extra time dropped (or moved to savings) at cycle end.
    CycleEndRegulateOptionalShifts,
    /// Savings drawn to cover a deficit at cycle end.
    CycleEndSaving,
    /// Movement on the savings counter.
    Saving,
}

impl TimeLogKind {
    pub const CYCLE_END_KINDS: [TimeLogKind; 4] = [
        TimeLogKind::CycleEnd,
        TimeLogKind::CycleEndFrozen,
        TimeLogKind::CycleEndExempted,
        TimeLogKind::CycleEndExpiredRegistration,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Custom => "custom",
            Self::ShiftValidated => "shift_validated",
            Self::ShiftInvalidated => "shift_invalidated",
            Self::CycleEnd => "cycle_end",
            Self::CycleEndFrozen => "cycle_end_frozen",
            Self::CycleEndExempted => "cycle_end_exempted",
            Self::CycleEndExpiredRegistration => "cycle_end_expired_registration",
            Self::CycleEndRegulateOptionalShifts => "cycle_end_regulate_optional_shifts",
            Self::CycleEndSaving => "cycle_end_saving",
            Self::Saving => "saving",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "custom" => Some(Self::Custom),
            "shift_validated" => Some(Self::ShiftValidated),
            "shift_invalidated" => Some(Self::ShiftInvalidated),
            "cycle_end" => Some(Self::CycleEnd),
            "cycle_end_frozen" => Some(Self::CycleEndFrozen),
            "cycle_end_exempted" => Some(Self::CycleEndExempted),
            "cycle_end_expired_registration" => Some(Self::CycleEndExpiredRegistration),
            "cycle_end_regulate_optional_shifts" => Some(Self::CycleEndRegulateOptionalShifts),
            "cycle_end_saving" => Some(Self::CycleEndSaving),
            "saving" => Some(Self::Saving),
            _ => None,
        }
    }

    pub fn is_cycle_end(self) -> bool {
        Self::CYCLE_END_KINDS.contains(&self)
    }

    pub fn is_saving(self) -> bool {
        self == Self::Saving
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeLog {
    pub id: TimeLogId,
    pub membership_id: MembershipId,
    pub beneficiary_id: Option<BeneficiaryId>,
    pub shift_id: Option<ShiftId>,
    pub kind: TimeLogKind,
    pub minutes: i64,
    pub description: Option<String>,
    pub created_at: NaiveDateTime,
}

impl TimeLog {
    pub fn new(
        membership_id: MembershipId,
        kind: TimeLogKind,
        minutes: i64,
        created_at: NaiveDateTime,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            membership_id,
            beneficiary_id: None,
            shift_id: None,
            kind,
            minutes,
            description: None,
            created_at,
        }
    }

    /// Credit for a carried-out shift.
    pub fn shift_validated(
        membership_id: MembershipId,
        shift: &Shift,
        at: NaiveDateTime,
    ) -> Self {
        Self::for_shift(
            membership_id,
            shift,
            TimeLogKind::ShiftValidated,
            shift.duration_minutes(),
            at,
        )
    }

    /// Reversal of a previous [`TimeLog::shift_validated`].
    pub fn shift_invalidated(
        membership_id: MembershipId,
        shift: &Shift,
        at: NaiveDateTime,
    ) -> Self {
        Self::for_shift(
            membership_id,
            shift,
            TimeLogKind::ShiftInvalidated,
            -shift.duration_minutes(),
            at,
        )
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    fn for_shift(
        membership_id: MembershipId,
        shift: &Shift,
        kind: TimeLogKind,
        minutes: i64,
        at: NaiveDateTime,
    ) -> Self {
        Self {
            beneficiary_id: shift.shifter_id,
            shift_id: Some(shift.id),
            ..Self::new(membership_id, kind, minutes, at)
        }
    }
}
