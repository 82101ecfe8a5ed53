//! Shift booking engine.
//!
//! # Responsibility
//! - Create jobs and shifts, expose buckets for a date range.
//! - Decide whether a beneficiary may book a shift and apply bookings.
//! - Free, dismiss, validate and invalidate shifts; manage reservations.
//!
//! # Invariants
//! - A shift never gets a second active shifter.
//! - Validation and invalidation write the shift row and the matching
//!   ledger entry in one transaction.
//! - `free`, `validate` and `invalidate` return `Ok(false)` when the shift
//!   is already in the target state.

use super::membership_service::{committed_shift_minutes, cycle_window, is_uptodate_on};
use crate::config::CoopConfig;
use crate::model::bucket::{BucketKey, ShiftBucket};
use crate::model::membership::{Beneficiary, BeneficiaryId, FormationId, Membership, MembershipId};
use crate::model::shift::{Job, JobId, Shift, ShiftId, ShiftTransitionError};
use crate::model::time_log::TimeLog;
use crate::model::ValidationError;
use crate::repo::ledger_repo::{Counter, LedgerRepository};
use crate::repo::member_repo::MemberRepository;
use crate::repo::shift_repo::ShiftRepository;
use crate::repo::RepoError;
use chrono::{Duration, NaiveDateTime};
use log::info;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Who asks for a shift to be freed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Member(BeneficiaryId),
    Admin,
}

/// Reason a booking is refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingRefusal {
    Started,
    Locked,
    CarriedOut,
    AlreadyBooked,
    ReservedForOther,
    MissingFormation(FormationId),
    Withdrawn,
    Frozen,
    RegistrationExpired,
    Exempted,
    OverlappingShift(ShiftId),
    QuotaExceeded {
        committed_minutes: i64,
        shift_minutes: i64,
        allowed_minutes: i64,
    },
}

impl Display for BookingRefusal {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Started => write!(f, "shift has already started"),
            Self::Locked => write!(f, "shift is locked"),
            Self::CarriedOut => write!(f, "shift was already carried out"),
            Self::AlreadyBooked => write!(f, "shift already has a shifter"),
            Self::ReservedForOther => write!(f, "shift is reserved for another beneficiary"),
            Self::MissingFormation(id) => write!(f, "shift requires formation {id}"),
            Self::Withdrawn => write!(f, "membership is withdrawn"),
            Self::Frozen => write!(f, "membership is frozen"),
            Self::RegistrationExpired => {
                write!(f, "registration is not up to date at the shift date")
            }
            Self::Exempted => write!(f, "membership is exempted at the shift date"),
            Self::OverlappingShift(id) => write!(f, "beneficiary already holds shift {id}"),
            Self::QuotaExceeded {
                committed_minutes,
                shift_minutes,
                allowed_minutes,
            } => write!(
                f,
                "cycle quota exceeded: {committed_minutes} + {shift_minutes} > {allowed_minutes} minutes"
            ),
        }
    }
}

#[derive(Debug)]
pub enum ShiftServiceError {
    ShiftNotFound(ShiftId),
    JobNotFound(JobId),
    BeneficiaryNotFound(BeneficiaryId),
    MembershipNotFound(MembershipId),
    Refused {
        shift_id: ShiftId,
        reason: BookingRefusal,
    },
    /// No slot of the bucket is open to the beneficiary.
    BucketFull(ShiftId),
    NotShifter {
        shift_id: ShiftId,
        beneficiary_id: BeneficiaryId,
    },
    NoticeTooShort {
        shift_id: ShiftId,
        min_notice_hours: i64,
    },
    Started(ShiftId),
    NotStarted(ShiftId),
    /// Booked or carried-out shifts cannot be deleted.
    ShiftInUse(ShiftId),
    NoReservation {
        shift_id: ShiftId,
        beneficiary_id: BeneficiaryId,
    },
    Transition(ShiftTransitionError),
    Validation(ValidationError),
    Repo(RepoError),
}

impl Display for ShiftServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ShiftNotFound(id) => write!(f, "shift not found: {id}"),
            Self::JobNotFound(id) => write!(f, "job not found: {id}"),
            Self::BeneficiaryNotFound(id) => write!(f, "beneficiary not found: {id}"),
            Self::MembershipNotFound(id) => write!(f, "membership not found: {id}"),
            Self::Refused { shift_id, reason } => {
                write!(f, "booking of shift {shift_id} refused: {reason}")
            }
            Self::BucketFull(id) => write!(f, "no open slot in the bucket of shift {id}"),
            Self::NotShifter {
                shift_id,
                beneficiary_id,
            } => write!(f, "beneficiary {beneficiary_id} does not hold shift {shift_id}"),
            Self::NoticeTooShort {
                shift_id,
                min_notice_hours,
            } => write!(
                f,
                "shift {shift_id} can only be freed {min_notice_hours} hours before it starts"
            ),
            Self::Started(id) => write!(f, "shift {id} has already started"),
            Self::NotStarted(id) => write!(f, "shift {id} has not started yet"),
            Self::ShiftInUse(id) => write!(f, "shift {id} is booked or carried out"),
            Self::NoReservation {
                shift_id,
                beneficiary_id,
            } => write!(
                f,
                "shift {shift_id} is not reserved for beneficiary {beneficiary_id}"
            ),
            Self::Transition(err) => write!(f, "{err}"),
            Self::Validation(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ShiftServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Transition(err) => Some(err),
            Self::Validation(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for ShiftServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound {
                record: "shift",
                id,
            } => Self::ShiftNotFound(id),
            RepoError::Validation(err) => Self::Validation(err),
            other => Self::Repo(other),
        }
    }
}

impl From<ShiftTransitionError> for ShiftServiceError {
    fn from(value: ShiftTransitionError) -> Self {
        Self::Transition(value)
    }
}

impl From<ValidationError> for ShiftServiceError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

/// Shift service facade.
pub struct ShiftService<S, M, L> {
    shifts: S,
    members: M,
    ledger: L,
    config: CoopConfig,
}

impl<S, M, L> ShiftService<S, M, L>
where
    S: ShiftRepository,
    M: MemberRepository,
    L: LedgerRepository,
{
    pub fn new(shifts: S, members: M, ledger: L, config: CoopConfig) -> Self {
        Self {
            shifts,
            members,
            ledger,
            config,
        }
    }

    pub fn create_job(
        &self,
        name: impl Into<String>,
        color: impl Into<String>,
    ) -> Result<Job, ShiftServiceError> {
        let job = Job::new(name, color);
        self.shifts.create_job(&job)?;
        Ok(job)
    }

    pub fn list_jobs(&self) -> Result<Vec<Job>, ShiftServiceError> {
        Ok(self.shifts.list_jobs()?)
    }

    pub fn create_shift(
        &self,
        job_id: JobId,
        start: NaiveDateTime,
        end: NaiveDateTime,
        formation_id: Option<FormationId>,
        now: NaiveDateTime,
    ) -> Result<Shift, ShiftServiceError> {
        if self.shifts.get_job(job_id)?.is_none() {
            return Err(ShiftServiceError::JobNotFound(job_id));
        }
        let shift = Shift::new(job_id, start, end, now).with_formation(formation_id);
        shift.validate()?;
        self.shifts.create_shift(&shift)?;
        Ok(shift)
    }

    pub fn get_shift(&self, shift_id: ShiftId) -> Result<Shift, ShiftServiceError> {
        self.shifts
            .get_shift(shift_id)?
            .ok_or(ShiftServiceError::ShiftNotFound(shift_id))
    }

    pub fn delete_shift(&self, shift_id: ShiftId) -> Result<(), ShiftServiceError> {
        let shift = self.get_shift(shift_id)?;
        if shift.is_booked() || shift.was_carried_out {
            return Err(ShiftServiceError::ShiftInUse(shift_id));
        }
        self.shifts.delete_shift(shift_id)?;
        Ok(())
    }

    pub fn set_locked(&self, shift_id: ShiftId, locked: bool) -> Result<Shift, ShiftServiceError> {
        let mut shift = self.get_shift(shift_id)?;
        shift.locked = locked;
        self.shifts.update_shift(&shift)?;
        Ok(shift)
    }

    /// Buckets of shifts starting in `[from, to)`, ordered by start.
    pub fn buckets_between(
        &self,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<Vec<ShiftBucket>, ShiftServiceError> {
        Ok(ShiftBucket::group(self.shifts.list_shifts_between(from, to)?))
    }

    /// Shifts held by any beneficiary of a membership, starting in `[from, to)`.
    pub fn shifts_of_membership(
        &self,
        membership_id: MembershipId,
        from: Option<NaiveDateTime>,
        to: Option<NaiveDateTime>,
    ) -> Result<Vec<Shift>, ShiftServiceError> {
        let shifters = self.shifter_ids(membership_id)?;
        Ok(self.shifts.list_shifts_of(&shifters, from, to)?)
    }

    /// Fails with [`ShiftServiceError::Refused`] when booking is not allowed.
    pub fn check_bookable(
        &self,
        shift_id: ShiftId,
        beneficiary_id: BeneficiaryId,
        now: NaiveDateTime,
    ) -> Result<(), ShiftServiceError> {
        let shift = self.get_shift(shift_id)?;
        let beneficiary = self.beneficiary(beneficiary_id)?;
        let membership = self.membership(beneficiary.membership_id)?;
        match self.booking_refusal(&shift, &beneficiary, &membership, now)? {
            Some(reason) => Err(ShiftServiceError::Refused { shift_id, reason }),
            None => Ok(()),
        }
    }

    /// First rule the booking breaks, in the order they are checked.
    pub fn booking_refusal(
        &self,
        shift: &Shift,
        beneficiary: &Beneficiary,
        membership: &Membership,
        now: NaiveDateTime,
    ) -> Result<Option<BookingRefusal>, ShiftServiceError> {
        if shift.has_started(now) {
            return Ok(Some(BookingRefusal::Started));
        }
        if shift.locked {
            return Ok(Some(BookingRefusal::Locked));
        }
        if shift.was_carried_out {
            return Ok(Some(BookingRefusal::CarriedOut));
        }
        if shift.is_booked() {
            return Ok(Some(BookingRefusal::AlreadyBooked));
        }
        if shift.is_reserved() && shift.last_shifter_id != Some(beneficiary.id) {
            return Ok(Some(BookingRefusal::ReservedForOther));
        }
        if let Some(formation_id) = shift.formation_id {
            if !beneficiary.has_formation(formation_id) {
                return Ok(Some(BookingRefusal::MissingFormation(formation_id)));
            }
        }
        if membership.withdrawn {
            return Ok(Some(BookingRefusal::Withdrawn));
        }
        if membership.frozen {
            return Ok(Some(BookingRefusal::Frozen));
        }

        let shift_date = shift.start.date();
        let last_registration = self.members.last_registration(membership.id)?;
        if !is_uptodate_on(
            &self.config.registration,
            last_registration.as_ref(),
            shift_date,
        ) {
            return Ok(Some(BookingRefusal::RegistrationExpired));
        }
        if self
            .ledger
            .list_exemptions(membership.id)?
            .iter()
            .any(|exemption| exemption.is_current(shift_date))
        {
            return Ok(Some(BookingRefusal::Exempted));
        }

        let overlapping = self
            .shifts
            .list_shifts_of(&[beneficiary.id], None, Some(shift.end))?
            .into_iter()
            .find(|other| other.id != shift.id && other.overlaps(shift));
        if let Some(other) = overlapping {
            return Ok(Some(BookingRefusal::OverlappingShift(other.id)));
        }

        self.quota_refusal(shift, membership, now)
    }

    fn quota_refusal(
        &self,
        shift: &Shift,
        membership: &Membership,
        now: NaiveDateTime,
    ) -> Result<Option<BookingRefusal>, ShiftServiceError> {
        let booking = &self.config.booking;
        if shift.start < now + Duration::days(booking.extra_shift_window_days) {
            return Ok(None);
        }
        let Some(window) = cycle_window(&self.config.cycle, membership, shift.start.date(), 0)
        else {
            return Ok(None);
        };

        let balance = self.ledger.sum_minutes(
            membership.id,
            Counter::Balance,
            Some(window.start_at()),
        )?;
        let shifters = self.shifter_ids(membership.id)?;
        let booked = committed_shift_minutes(&self.shifts, &shifters, &window, now)?;
        let committed_minutes = balance + booked;
        let shift_minutes = shift.duration_minutes();
        let allowed_minutes = self.config.cycle.due_minutes + booking.max_cycle_overflow_minutes;

        if committed_minutes + shift_minutes > allowed_minutes {
            return Ok(Some(BookingRefusal::QuotaExceeded {
                committed_minutes,
                shift_minutes,
                allowed_minutes,
            }));
        }
        Ok(None)
    }

    /// Books `shift_id` for `beneficiary_id` once every booking rule passes.
    pub fn book(
        &self,
        shift_id: ShiftId,
        beneficiary_id: BeneficiaryId,
        booker_id: Option<BeneficiaryId>,
        now: NaiveDateTime,
    ) -> Result<Shift, ShiftServiceError> {
        let mut shift = self.get_shift(shift_id)?;
        let beneficiary = self.beneficiary(beneficiary_id)?;
        let membership = self.membership(beneficiary.membership_id)?;
        if let Some(reason) = self.booking_refusal(&shift, &beneficiary, &membership, now)? {
            info!(
                "event=shift_book module=shift status=refused shift_id={} reason={:?}",
                shift_id, reason
            );
            return Err(ShiftServiceError::Refused { shift_id, reason });
        }

        shift.book(beneficiary_id, booker_id, now)?;
        self.shifts
            .record_booking(&shift, membership.id, shift.start.date())
            .map_err(|err| match err {
                RepoError::Conflict { .. } => ShiftServiceError::Refused {
                    shift_id,
                    reason: BookingRefusal::AlreadyBooked,
                },
                other => other.into(),
            })?;

        info!(
            "event=shift_book module=shift status=ok shift_id={} member_number={}",
            shift_id, membership.member_number
        );
        Ok(shift)
    }

    /// Books the first slot of the shift's bucket open to the beneficiary.
    pub fn book_in_bucket(
        &self,
        shift_id: ShiftId,
        beneficiary_id: BeneficiaryId,
        booker_id: Option<BeneficiaryId>,
        now: NaiveDateTime,
    ) -> Result<Shift, ShiftServiceError> {
        let anchor = self.get_shift(shift_id)?;
        let beneficiary = self.beneficiary(beneficiary_id)?;
        let bucket = ShiftBucket::group(self.shifts.list_bucket(&BucketKey::of(&anchor))?)
            .into_iter()
            .next()
            .ok_or(ShiftServiceError::ShiftNotFound(shift_id))?;
        let target = bucket
            .first_bookable_for(&beneficiary)
            .map(|shift| shift.id)
            .ok_or(ShiftServiceError::BucketFull(shift_id))?;
        self.book(target, beneficiary_id, booker_id, now)
    }

    /// Frees a booked shift. Returns `Ok(false)` when it was already free.
    pub fn free(
        &self,
        shift_id: ShiftId,
        actor: Actor,
        now: NaiveDateTime,
    ) -> Result<bool, ShiftServiceError> {
        let mut shift = self.get_shift(shift_id)?;
        if shift.shifter_id.is_none() && !shift.fixe {
            return Ok(false);
        }

        if let Actor::Member(beneficiary_id) = actor {
            if shift.shifter_id != Some(beneficiary_id) {
                return Err(ShiftServiceError::NotShifter {
                    shift_id,
                    beneficiary_id,
                });
            }
            let min_notice_hours = self.config.booking.free_min_notice_hours;
            if shift.start - now < Duration::hours(min_notice_hours) {
                return Err(ShiftServiceError::NoticeTooShort {
                    shift_id,
                    min_notice_hours,
                });
            }
        }

        let changed = shift.free()?;
        if changed {
            self.shifts.update_shift(&shift)?;
            info!(
                "event=shift_free module=shift status=ok shift_id={} by_admin={}",
                shift_id,
                actor == Actor::Admin
            );
        }
        Ok(changed)
    }

    /// The shifter releases the slot; it stays theirs until rebooked.
    pub fn dismiss(
        &self,
        shift_id: ShiftId,
        beneficiary_id: BeneficiaryId,
        reason: Option<String>,
        now: NaiveDateTime,
    ) -> Result<Shift, ShiftServiceError> {
        let mut shift = self.get_shift(shift_id)?;
        if shift.shifter_id != Some(beneficiary_id) {
            return Err(ShiftServiceError::NotShifter {
                shift_id,
                beneficiary_id,
            });
        }
        if shift.has_started(now) {
            return Err(ShiftServiceError::Started(shift_id));
        }
        shift.dismiss(reason, now)?;
        self.shifts.update_shift(&shift)?;
        Ok(shift)
    }

    /// Marks a started shift as carried out and credits its duration.
    pub fn validate(
        &self,
        shift_id: ShiftId,
        now: NaiveDateTime,
    ) -> Result<bool, ShiftServiceError> {
        let mut shift = self.get_shift(shift_id)?;
        if !shift.has_started(now) {
            return Err(ShiftServiceError::NotStarted(shift_id));
        }
        if !shift.validate_done()? {
            return Ok(false);
        }
        let membership_id = self.shifter_membership(&shift)?;
        let log = TimeLog::shift_validated(membership_id, &shift, now);
        self.shifts.record_transition(&shift, Some(&log))?;
        info!(
            "event=shift_validate module=shift status=ok shift_id={} minutes={}",
            shift_id, log.minutes
        );
        Ok(true)
    }

    /// Reverts a validation and debits the credited duration.
    pub fn invalidate(
        &self,
        shift_id: ShiftId,
        now: NaiveDateTime,
    ) -> Result<bool, ShiftServiceError> {
        let mut shift = self.get_shift(shift_id)?;
        if !shift.invalidate()? {
            return Ok(false);
        }
        let membership_id = self.shifter_membership(&shift)?;
        let log = TimeLog::shift_invalidated(membership_id, &shift, now);
        self.shifts.record_transition(&shift, Some(&log))?;
        info!(
            "event=shift_invalidate module=shift status=ok shift_id={} minutes={}",
            shift_id, log.minutes
        );
        Ok(true)
    }

    /// Confirms a reservation by booking it for its holder.
    pub fn accept_reservation(
        &self,
        shift_id: ShiftId,
        beneficiary_id: BeneficiaryId,
        now: NaiveDateTime,
    ) -> Result<Shift, ShiftServiceError> {
        let shift = self.get_shift(shift_id)?;
        if !shift.is_reserved() || shift.last_shifter_id != Some(beneficiary_id) {
            return Err(ShiftServiceError::NoReservation {
                shift_id,
                beneficiary_id,
            });
        }
        self.book(shift_id, beneficiary_id, Some(beneficiary_id), now)
    }

    pub fn reject_reservation(
        &self,
        shift_id: ShiftId,
        beneficiary_id: BeneficiaryId,
    ) -> Result<Shift, ShiftServiceError> {
        let mut shift = self.get_shift(shift_id)?;
        if !shift.is_reserved() || shift.last_shifter_id != Some(beneficiary_id) {
            return Err(ShiftServiceError::NoReservation {
                shift_id,
                beneficiary_id,
            });
        }
        shift.release_reservation();
        self.shifts.update_shift(&shift)?;
        Ok(shift)
    }

    /// Drops reservations past their hold time or whose shift has started.
    ///
    /// Returns the ids of the released shifts.
    pub fn release_expired_reservations(
        &self,
        now: NaiveDateTime,
    ) -> Result<Vec<ShiftId>, ShiftServiceError> {
        let hold = Duration::days(self.config.booking.reservation_hold_days);
        let mut released = Vec::new();
        for mut shift in self.shifts.list_reserved_shifts()? {
            if shift.created_at + hold > now && !shift.has_started(now) {
                continue;
            }
            if shift.release_reservation() {
                self.shifts.update_shift(&shift)?;
                released.push(shift.id);
            }
        }
        info!(
            "event=reservation_release module=shift status=ok released={}",
            released.len()
        );
        Ok(released)
    }

    fn shifter_membership(&self, shift: &Shift) -> Result<MembershipId, ShiftServiceError> {
        let shifter_id = shift
            .active_shifter()
            .ok_or(ShiftTransitionError::NotBooked(shift.id))?;
        Ok(self.beneficiary(shifter_id)?.membership_id)
    }

    fn shifter_ids(
        &self,
        membership_id: MembershipId,
    ) -> Result<Vec<BeneficiaryId>, ShiftServiceError> {
        Ok(self
            .members
            .list_beneficiaries(membership_id)?
            .into_iter()
            .map(|beneficiary| beneficiary.id)
            .collect())
    }

    fn beneficiary(&self, id: BeneficiaryId) -> Result<Beneficiary, ShiftServiceError> {
        self.members
            .get_beneficiary(id)?
            .ok_or(ShiftServiceError::BeneficiaryNotFound(id))
    }

    fn membership(&self, id: MembershipId) -> Result<Membership, ShiftServiceError> {
        self.members
            .get_membership(id)?
            .ok_or(ShiftServiceError::MembershipNotFound(id))
    }
}
