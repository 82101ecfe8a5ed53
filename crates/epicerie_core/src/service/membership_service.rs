//! Membership use-case service and cycle engine.
//!
//! # Responsibility
//! - Create memberships and beneficiaries, record registrations.
//! - Track freeze requests and withdrawal.
//! - Compute cycle windows and run cycle starts against the time ledger.
//!
//! # Invariants
//! - Cycle windows are exact calendar-day ranges of `cycle.duration_days`
//!   days, anchored per member or globally (`cycle.kind`).
//! - A cycle start writes exactly one cycle-end entry per membership and
//!   day; re-running the same day is a no-op.
//! - Freeze requests are applied only at cycle start.

use crate::config::{CoopConfig, CycleConfig, CycleKind, RegistrationConfig};
use crate::model::membership::{
    Beneficiary, BeneficiaryDraft, BeneficiaryId, Formation, FormationId, Membership,
    MembershipId, PaymentMode, Registration,
};
use crate::model::shift::ShiftState;
use crate::model::time_log::{TimeLog, TimeLogKind};
use crate::model::ValidationError;
use crate::repo::ledger_repo::{Counter, LedgerRepository};
use crate::repo::member_repo::MemberRepository;
use crate::repo::shift_repo::ShiftRepository;
use crate::repo::{RepoError, RepoResult};
use chrono::{Duration, Months, NaiveDate, NaiveDateTime, NaiveTime};
use log::{info, warn};
use serde::Serialize;
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Inclusive calendar-day range of one membership cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CycleWindow {
    pub start: NaiveDate,
    /// Last day of the cycle, inclusive.
    pub end: NaiveDate,
}

impl CycleWindow {
    pub fn start_at(&self) -> NaiveDateTime {
        self.start.and_time(NaiveTime::MIN)
    }

    /// First instant after the window.
    pub fn end_at(&self) -> NaiveDateTime {
        (self.end + Duration::days(1)).and_time(NaiveTime::MIN)
    }

    pub fn contains(&self, at: NaiveDateTime) -> bool {
        self.start_at() <= at && at < self.end_at()
    }

    pub fn contains_date(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

/// Day the membership's cycles count from, if it has cycles yet.
pub fn cycle_anchor(config: &CycleConfig, membership: &Membership) -> Option<NaiveDate> {
    match config.kind {
        CycleKind::Membership => membership.first_shift_date,
        CycleKind::Abcd => Some(config.abcd_anchor),
    }
}

/// Cycle containing `date`, shifted by `offset` cycles.
///
/// `offset = 0` is the current cycle, `-1` the previous one. Dates before
/// the anchor fall in negative cycles (floor division).
pub fn cycle_window(
    config: &CycleConfig,
    membership: &Membership,
    date: NaiveDate,
    offset: i64,
) -> Option<CycleWindow> {
    let anchor = cycle_anchor(config, membership)?;
    let duration = i64::from(config.duration_days);
    let index = (date - anchor).num_days().div_euclid(duration) + offset;
    let start = anchor + Duration::days(index * duration);
    Some(CycleWindow {
        start,
        end: start + Duration::days(duration - 1),
    })
}

pub fn cycle_starts_on(config: &CycleConfig, membership: &Membership, date: NaiveDate) -> bool {
    cycle_window(config, membership, date, 0).is_some_and(|window| window.start == date)
}

/// Registration expiry: last registration date plus the membership duration.
pub fn expire_date(
    config: &RegistrationConfig,
    last_registration: Option<&Registration>,
) -> Option<NaiveDate> {
    let registration = last_registration?;
    registration
        .date
        .checked_add_months(Months::new(config.duration_months))
}

pub fn is_uptodate_on(
    config: &RegistrationConfig,
    last_registration: Option<&Registration>,
    date: NaiveDate,
) -> bool {
    expire_date(config, last_registration).is_some_and(|expiry| date < expiry)
}

pub fn can_register_on(
    config: &RegistrationConfig,
    last_registration: Option<&Registration>,
    date: NaiveDate,
) -> bool {
    match expire_date(config, last_registration) {
        None => true,
        Some(expiry) => date >= expiry - Duration::days(config.renewal_window_days),
    }
}

/// Minutes of shifts held by `shifters` starting inside `window`.
///
/// Shifts that ended without being carried out are not counted.
pub(crate) fn committed_shift_minutes<S: ShiftRepository>(
    shifts: &S,
    shifters: &[BeneficiaryId],
    window: &CycleWindow,
    now: NaiveDateTime,
) -> RepoResult<i64> {
    let total = shifts
        .list_shifts_of(shifters, Some(window.start_at()), Some(window.end_at()))?
        .iter()
        .filter(|shift| shift.state(now) != ShiftState::Invalidated)
        .map(|shift| shift.duration_minutes())
        .sum();
    Ok(total)
}

/// Time balance of a membership over its current cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub window: CycleWindow,
    /// Balance before the cycle's own cycle-end entry.
    pub balance_at_start: i64,
    pub balance: i64,
    /// Net shift validation minutes logged inside the window.
    pub validated_minutes: i64,
    /// Booked, not yet started shifts inside the window.
    pub upcoming_minutes: i64,
    pub due_minutes: i64,
    /// `due - (balance_at_start + validated + upcoming)`, floored at 0.
    pub remaining_due: i64,
}

/// Outcome of one membership's cycle start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleStartOutcome {
    pub membership_id: MembershipId,
    pub cycle_end_kind: TimeLogKind,
    /// Every entry written, cycle-end first.
    pub logs: Vec<TimeLog>,
    pub frozen: bool,
}

#[derive(Debug)]
pub enum MemberServiceError {
    MembershipNotFound(MembershipId),
    BeneficiaryNotFound(BeneficiaryId),
    FormationNotFound(FormationId),
    DuplicateMemberNumber(i64),
    DuplicateEmail(String),
    DuplicateFormation(String),
    Withdrawn(MembershipId),
    NotWithdrawn(MembershipId),
    /// Renewal attempted before the renewal window opens.
    RegistrationTooEarly {
        membership_id: MembershipId,
        allowed_from: NaiveDate,
    },
    AlreadyFrozen(MembershipId),
    NotFrozen(MembershipId),
    FreezeChangePending(MembershipId),
    NoFreezeChangePending(MembershipId),
    EmptyCorrection,
    Validation(ValidationError),
    Repo(RepoError),
    InconsistentState(&'static str),
}

impl Display for MemberServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MembershipNotFound(id) => write!(f, "membership not found: {id}"),
            Self::BeneficiaryNotFound(id) => write!(f, "beneficiary not found: {id}"),
            Self::FormationNotFound(id) => write!(f, "formation not found: {id}"),
            Self::DuplicateMemberNumber(number) => {
                write!(f, "member number {number} is already taken")
            }
            Self::DuplicateEmail(email) => write!(f, "email `{email}` is already used"),
            Self::DuplicateFormation(name) => write!(f, "formation `{name}` already exists"),
            Self::Withdrawn(id) => write!(f, "membership {id} is withdrawn"),
            Self::NotWithdrawn(id) => write!(f, "membership {id} is not withdrawn"),
            Self::RegistrationTooEarly {
                membership_id,
                allowed_from,
            } => write!(
                f,
                "membership {membership_id} cannot renew before {allowed_from}"
            ),
            Self::AlreadyFrozen(id) => write!(f, "membership {id} is already frozen"),
            Self::NotFrozen(id) => write!(f, "membership {id} is not frozen"),
            Self::FreezeChangePending(id) => {
                write!(f, "membership {id} already has a pending freeze change")
            }
            Self::NoFreezeChangePending(id) => {
                write!(f, "membership {id} has no pending freeze change")
            }
            Self::EmptyCorrection => write!(f, "time correction must not be zero"),
            Self::Validation(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
            Self::InconsistentState(details) => write!(f, "inconsistent membership state: {details}"),
        }
    }
}

impl Error for MemberServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for MemberServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound {
                record: "membership",
                id,
            } => Self::MembershipNotFound(id),
            RepoError::NotFound {
                record: "beneficiary",
                id,
            } => Self::BeneficiaryNotFound(id),
            RepoError::Validation(err) => Self::Validation(err),
            other => Self::Repo(other),
        }
    }
}

impl From<ValidationError> for MemberServiceError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

/// Membership service facade over member, ledger and shift repositories.
pub struct MembershipService<M, L, S> {
    members: M,
    ledger: L,
    shifts: S,
    config: CoopConfig,
}

impl<M, L, S> MembershipService<M, L, S>
where
    M: MemberRepository,
    L: LedgerRepository,
    S: ShiftRepository,
{
    pub fn new(members: M, ledger: L, shifts: S, config: CoopConfig) -> Self {
        Self {
            members,
            ledger,
            shifts,
            config,
        }
    }

    pub fn config(&self) -> &CoopConfig {
        &self.config
    }

    /// Creates a membership with its main beneficiary.
    pub fn create_membership(
        &self,
        member_number: i64,
        main: BeneficiaryDraft,
        now: NaiveDateTime,
    ) -> Result<(Membership, Beneficiary), MemberServiceError> {
        if self
            .members
            .get_membership_by_number(member_number)?
            .is_some()
        {
            return Err(MemberServiceError::DuplicateMemberNumber(member_number));
        }

        let mut membership = Membership::new(member_number, now);
        let beneficiary = Beneficiary::new(membership.id, main);
        membership.validate()?;
        beneficiary.validate()?;
        membership.main_beneficiary_id = Some(beneficiary.id);

        self.members
            .create_membership(&membership, &beneficiary)
            .map_err(|err| match err {
                RepoError::Duplicate("membership number") => {
                    MemberServiceError::DuplicateMemberNumber(member_number)
                }
                RepoError::Duplicate(_) => {
                    MemberServiceError::DuplicateEmail(beneficiary.email.clone())
                }
                other => other.into(),
            })?;

        info!(
            "event=membership_create module=membership status=ok member_number={}",
            member_number
        );
        Ok((membership, beneficiary))
    }

    pub fn get_membership(&self, id: MembershipId) -> Result<Membership, MemberServiceError> {
        self.members
            .get_membership(id)?
            .ok_or(MemberServiceError::MembershipNotFound(id))
    }

    pub fn find_by_number(
        &self,
        member_number: i64,
    ) -> Result<Option<Membership>, MemberServiceError> {
        Ok(self.members.get_membership_by_number(member_number)?)
    }

    pub fn get_beneficiary(&self, id: BeneficiaryId) -> Result<Beneficiary, MemberServiceError> {
        self.members
            .get_beneficiary(id)?
            .ok_or(MemberServiceError::BeneficiaryNotFound(id))
    }

    pub fn list_beneficiaries(
        &self,
        membership_id: MembershipId,
    ) -> Result<Vec<Beneficiary>, MemberServiceError> {
        self.get_membership(membership_id)?;
        Ok(self.members.list_beneficiaries(membership_id)?)
    }

    pub fn add_beneficiary(
        &self,
        membership_id: MembershipId,
        draft: BeneficiaryDraft,
    ) -> Result<Beneficiary, MemberServiceError> {
        let membership = self.get_membership(membership_id)?;
        if membership.withdrawn {
            return Err(MemberServiceError::Withdrawn(membership_id));
        }

        let beneficiary = Beneficiary::new(membership_id, draft);
        beneficiary.validate()?;
        self.members
            .create_beneficiary(&beneficiary)
            .map_err(|err| duplicate_email(err, &beneficiary.email))?;
        Ok(beneficiary)
    }

    /// Replaces identity fields; formations are kept.
    pub fn update_beneficiary(
        &self,
        beneficiary_id: BeneficiaryId,
        draft: BeneficiaryDraft,
    ) -> Result<Beneficiary, MemberServiceError> {
        let current = self.get_beneficiary(beneficiary_id)?;
        let mut updated = Beneficiary::new(current.membership_id, draft);
        updated.id = current.id;
        updated.formations = current.formations;
        updated.validate()?;

        self.members
            .update_beneficiary(&updated)
            .map_err(|err| duplicate_email(err, &updated.email))?;
        Ok(updated)
    }

    pub fn create_formation(
        &self,
        name: impl Into<String>,
    ) -> Result<Formation, MemberServiceError> {
        let formation = Formation::new(name);
        self.members
            .create_formation(&formation)
            .map_err(|err| match err {
                RepoError::Duplicate(_) => {
                    MemberServiceError::DuplicateFormation(formation.name.clone())
                }
                other => other.into(),
            })?;
        Ok(formation)
    }

    pub fn list_formations(&self) -> Result<Vec<Formation>, MemberServiceError> {
        Ok(self.members.list_formations()?)
    }

    /// Replaces the beneficiary's whole formation set.
    pub fn set_formations(
        &self,
        beneficiary_id: BeneficiaryId,
        formations: BTreeSet<FormationId>,
    ) -> Result<Beneficiary, MemberServiceError> {
        for formation_id in &formations {
            if self.members.get_formation(*formation_id)?.is_none() {
                return Err(MemberServiceError::FormationNotFound(*formation_id));
            }
        }
        self.members.set_formations(beneficiary_id, &formations)?;
        self.get_beneficiary(beneficiary_id)
    }

    /// Records a registration or renewal dated `date`.
    pub fn record_registration(
        &self,
        membership_id: MembershipId,
        date: NaiveDate,
        amount_cents: i64,
        mode: PaymentMode,
        now: NaiveDateTime,
    ) -> Result<Registration, MemberServiceError> {
        let membership = self.get_membership(membership_id)?;
        if membership.withdrawn {
            return Err(MemberServiceError::Withdrawn(membership_id));
        }

        let last = self.members.last_registration(membership_id)?;
        if !can_register_on(&self.config.registration, last.as_ref(), date) {
            let allowed_from = expire_date(&self.config.registration, last.as_ref())
                .map(|expiry| expiry - Duration::days(self.config.registration.renewal_window_days))
                .ok_or(MemberServiceError::InconsistentState(
                    "renewal refused without a previous registration",
                ))?;
            return Err(MemberServiceError::RegistrationTooEarly {
                membership_id,
                allowed_from,
            });
        }

        let registration = Registration::new(membership_id, date, amount_cents, mode, now);
        registration.validate()?;
        self.members.create_registration(&registration)?;
        info!(
            "event=registration_record module=membership status=ok member_number={} mode={}",
            membership.member_number,
            mode.as_str()
        );
        Ok(registration)
    }

    pub fn list_registrations(
        &self,
        membership_id: MembershipId,
    ) -> Result<Vec<Registration>, MemberServiceError> {
        self.get_membership(membership_id)?;
        Ok(self.members.list_registrations(membership_id)?)
    }

    pub fn expire_date(
        &self,
        membership_id: MembershipId,
    ) -> Result<Option<NaiveDate>, MemberServiceError> {
        let last = self.members.last_registration(membership_id)?;
        Ok(expire_date(&self.config.registration, last.as_ref()))
    }

    pub fn is_uptodate(
        &self,
        membership_id: MembershipId,
        date: NaiveDate,
    ) -> Result<bool, MemberServiceError> {
        let last = self.members.last_registration(membership_id)?;
        Ok(is_uptodate_on(&self.config.registration, last.as_ref(), date))
    }

    pub fn can_register(
        &self,
        membership_id: MembershipId,
        date: NaiveDate,
    ) -> Result<bool, MemberServiceError> {
        let last = self.members.last_registration(membership_id)?;
        Ok(can_register_on(&self.config.registration, last.as_ref(), date))
    }

    /// Asks for a freeze starting at the next cycle.
    pub fn request_freeze(
        &self,
        membership_id: MembershipId,
    ) -> Result<Membership, MemberServiceError> {
        let mut membership = self.active_membership(membership_id)?;
        if membership.frozen {
            return Err(MemberServiceError::AlreadyFrozen(membership_id));
        }
        if membership.frozen_change {
            return Err(MemberServiceError::FreezeChangePending(membership_id));
        }
        membership.frozen_change = true;
        self.members.update_membership(&membership)?;
        Ok(membership)
    }

    /// Asks for an unfreeze starting at the next cycle.
    pub fn request_unfreeze(
        &self,
        membership_id: MembershipId,
    ) -> Result<Membership, MemberServiceError> {
        let mut membership = self.active_membership(membership_id)?;
        if !membership.frozen {
            return Err(MemberServiceError::NotFrozen(membership_id));
        }
        if membership.frozen_change {
            return Err(MemberServiceError::FreezeChangePending(membership_id));
        }
        membership.frozen_change = true;
        self.members.update_membership(&membership)?;
        Ok(membership)
    }

    pub fn cancel_freeze_change(
        &self,
        membership_id: MembershipId,
    ) -> Result<Membership, MemberServiceError> {
        let mut membership = self.get_membership(membership_id)?;
        if !membership.frozen_change {
            return Err(MemberServiceError::NoFreezeChangePending(membership_id));
        }
        membership.frozen_change = false;
        self.members.update_membership(&membership)?;
        Ok(membership)
    }

    pub fn withdraw(&self, membership_id: MembershipId) -> Result<Membership, MemberServiceError> {
        let mut membership = self.active_membership(membership_id)?;
        membership.withdrawn = true;
        self.members.update_membership(&membership)?;
        info!(
            "event=membership_withdraw module=membership status=ok member_number={}",
            membership.member_number
        );
        Ok(membership)
    }

    pub fn reactivate(
        &self,
        membership_id: MembershipId,
    ) -> Result<Membership, MemberServiceError> {
        let mut membership = self.get_membership(membership_id)?;
        if !membership.withdrawn {
            return Err(MemberServiceError::NotWithdrawn(membership_id));
        }
        membership.withdrawn = false;
        self.members.update_membership(&membership)?;
        Ok(membership)
    }

    /// Shift-time balance from logs strictly before `before` (all if `None`).
    pub fn time_count(
        &self,
        membership_id: MembershipId,
        before: Option<NaiveDateTime>,
    ) -> Result<i64, MemberServiceError> {
        Ok(self
            .ledger
            .sum_minutes(membership_id, Counter::Balance, before)?)
    }

    pub fn savings_count(
        &self,
        membership_id: MembershipId,
        before: Option<NaiveDateTime>,
    ) -> Result<i64, MemberServiceError> {
        Ok(self
            .ledger
            .sum_minutes(membership_id, Counter::Savings, before)?)
    }

    pub fn list_time_logs(
        &self,
        membership_id: MembershipId,
    ) -> Result<Vec<TimeLog>, MemberServiceError> {
        self.get_membership(membership_id)?;
        Ok(self.ledger.list_logs(membership_id)?)
    }

    /// Appends a manual `custom` correction.
    pub fn add_correction(
        &self,
        membership_id: MembershipId,
        minutes: i64,
        description: impl Into<String>,
        at: NaiveDateTime,
    ) -> Result<TimeLog, MemberServiceError> {
        if minutes == 0 {
            return Err(MemberServiceError::EmptyCorrection);
        }
        let description = description.into().trim().to_string();
        if description.is_empty() {
            return Err(ValidationError::BlankField("time_log.description").into());
        }
        self.get_membership(membership_id)?;

        let log = TimeLog::new(membership_id, TimeLogKind::Custom, minutes, at)
            .with_description(description);
        self.ledger.append_log(&log)?;
        Ok(log)
    }

    /// Current cycle summary, `None` while the member has no cycle.
    pub fn cycle_report(
        &self,
        membership_id: MembershipId,
        now: NaiveDateTime,
    ) -> Result<Option<CycleReport>, MemberServiceError> {
        let membership = self.get_membership(membership_id)?;
        let Some(window) = cycle_window(&self.config.cycle, &membership, now.date(), 0) else {
            return Ok(None);
        };

        let balance_at_start = self.time_count(membership_id, Some(window.start_at()))?;
        let balance = self.time_count(membership_id, None)?;
        let validated_minutes = self
            .ledger
            .list_logs(membership_id)?
            .iter()
            .filter(|log| {
                matches!(
                    log.kind,
                    TimeLogKind::ShiftValidated | TimeLogKind::ShiftInvalidated
                ) && window.contains(log.created_at)
            })
            .map(|log| log.minutes)
            .sum::<i64>();

        let shifter_ids = self.beneficiary_ids(membership_id)?;
        let upcoming_minutes = self
            .shifts
            .list_shifts_of(&shifter_ids, Some(now), Some(window.end_at()))?
            .iter()
            .filter(|shift| !shift.was_carried_out && shift.start > now)
            .map(|shift| shift.duration_minutes())
            .sum::<i64>();

        let due_minutes = self.config.cycle.due_minutes;
        let remaining_due =
            (due_minutes - (balance_at_start + validated_minutes + upcoming_minutes)).max(0);

        Ok(Some(CycleReport {
            window,
            balance_at_start,
            balance,
            validated_minutes,
            upcoming_minutes,
            due_minutes,
            remaining_due,
        }))
    }

    /// Runs the cycle start for every active membership whose cycle begins
    /// on `today`.
    ///
    /// Memberships already processed for `today` are skipped, so the job
    /// can be re-run safely.
    pub fn start_cycles(
        &self,
        today: NaiveDate,
    ) -> Result<Vec<CycleStartOutcome>, MemberServiceError> {
        let at = today.and_time(NaiveTime::MIN);
        let mut outcomes = Vec::new();
        let mut skipped = 0usize;

        for membership in self.members.list_memberships(false)? {
            if !cycle_starts_on(&self.config.cycle, &membership, today) {
                continue;
            }
            if self.ledger.has_cycle_end_log(membership.id, at)? {
                skipped += 1;
                continue;
            }
            outcomes.push(self.start_cycle(membership, today)?);
        }

        info!(
            "event=cycle_start module=membership status=ok date={} started={} skipped={}",
            today,
            outcomes.len(),
            skipped
        );
        Ok(outcomes)
    }

    fn start_cycle(
        &self,
        mut membership: Membership,
        today: NaiveDate,
    ) -> Result<CycleStartOutcome, MemberServiceError> {
        let at = today.and_time(NaiveTime::MIN);
        let yesterday = today.pred_opt().ok_or(MemberServiceError::InconsistentState(
            "cycle start on the first representable day",
        ))?;

        if membership.frozen_change {
            membership.frozen = !membership.frozen;
            membership.frozen_change = false;
        }

        let cycle_end_kind = if membership.frozen {
            TimeLogKind::CycleEndFrozen
        } else if self.is_exempted_on(membership.id, yesterday)? {
            TimeLogKind::CycleEndExempted
        } else if !self.is_uptodate(membership.id, yesterday)? {
            TimeLogKind::CycleEndExpiredRegistration
        } else {
            TimeLogKind::CycleEnd
        };
        let due = match cycle_end_kind {
            TimeLogKind::CycleEnd => -self.config.cycle.due_minutes,
            _ => 0,
        };

        let mut logs = vec![TimeLog::new(membership.id, cycle_end_kind, due, at)];
        // Only the closed cycle is settled; logs from `today` onwards stay.
        let mut balance = self.time_count(membership.id, Some(at))? + due;
        let mut savings = self.savings_count(membership.id, Some(at))?;
        let savings_config = &self.config.savings;

        if self.config.cycle.regulate_extra_time && balance > 0 {
            if savings_config.enabled {
                let room = (savings_config.max_minutes - savings).max(0);
                let saved = balance.min(room);
                if saved > 0 {
                    logs.push(TimeLog::new(membership.id, TimeLogKind::Saving, saved, at));
                    savings += saved;
                }
            }
            logs.push(TimeLog::new(
                membership.id,
                TimeLogKind::CycleEndRegulateOptionalShifts,
                -balance,
                at,
            ));
            balance = 0;
        }

        if savings_config.enabled && balance < 0 && savings > 0 {
            let drawn = (-balance).min(savings);
            logs.push(TimeLog::new(
                membership.id,
                TimeLogKind::CycleEndSaving,
                drawn,
                at,
            ));
            logs.push(TimeLog::new(membership.id, TimeLogKind::Saving, -drawn, at));
        }

        if let Err(err) = self.ledger.apply_cycle_start(&membership, &logs) {
            warn!(
                "event=cycle_start module=membership status=error member_number={} error={}",
                membership.member_number, err
            );
            return Err(err.into());
        }

        Ok(CycleStartOutcome {
            membership_id: membership.id,
            cycle_end_kind,
            logs,
            frozen: membership.frozen,
        })
    }

    pub(crate) fn is_exempted_on(
        &self,
        membership_id: MembershipId,
        date: NaiveDate,
    ) -> Result<bool, MemberServiceError> {
        Ok(self
            .ledger
            .list_exemptions(membership_id)?
            .iter()
            .any(|exemption| exemption.is_current(date)))
    }

    fn beneficiary_ids(
        &self,
        membership_id: MembershipId,
    ) -> Result<Vec<BeneficiaryId>, MemberServiceError> {
        Ok(self
            .members
            .list_beneficiaries(membership_id)?
            .into_iter()
            .map(|beneficiary| beneficiary.id)
            .collect())
    }

    fn active_membership(
        &self,
        membership_id: MembershipId,
    ) -> Result<Membership, MemberServiceError> {
        let membership = self.get_membership(membership_id)?;
        if membership.withdrawn {
            return Err(MemberServiceError::Withdrawn(membership_id));
        }
        Ok(membership)
    }
}

fn duplicate_email(err: RepoError, email: &str) -> MemberServiceError {
    match err {
        RepoError::Duplicate(_) => MemberServiceError::DuplicateEmail(email.to_string()),
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::{can_register_on, cycle_starts_on, cycle_window, expire_date, is_uptodate_on};
    use crate::config::{CycleConfig, CycleKind, RegistrationConfig};
    use crate::model::membership::{Membership, PaymentMode, Registration};
    use chrono::NaiveDate;
    use uuid::Uuid;

    fn day(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    fn member_with_anchor(anchor: Option<NaiveDate>) -> Membership {
        let mut membership = Membership::new(7, day(2025, 1, 1).and_hms_opt(0, 0, 0).unwrap());
        membership.first_shift_date = anchor;
        membership
    }

    fn registration(date: NaiveDate) -> Registration {
        Registration::new(
            Uuid::new_v4(),
            date,
            1500,
            PaymentMode::Cash,
            date.and_hms_opt(10, 0, 0).unwrap(),
        )
    }

    #[test]
    fn window_is_exact_and_inclusive() {
        let config = CycleConfig::default();
        let member = member_with_anchor(Some(day(2026, 1, 5)));

        let window = cycle_window(&config, &member, day(2026, 2, 1), 0).unwrap();
        assert_eq!(window.start, day(2026, 1, 5));
        assert_eq!(window.end, day(2026, 2, 1));

        let next = cycle_window(&config, &member, day(2026, 2, 2), 0).unwrap();
        assert_eq!(next.start, day(2026, 2, 2));
        assert!(next.contains(day(2026, 3, 1).and_hms_opt(23, 59, 0).unwrap()));
        assert!(!next.contains(day(2026, 3, 2).and_hms_opt(0, 0, 0).unwrap()));

        let previous = cycle_window(&config, &member, day(2026, 2, 2), -1).unwrap();
        assert_eq!(previous, window);
    }

    #[test]
    fn window_before_anchor_uses_floor_division() {
        let config = CycleConfig::default();
        let member = member_with_anchor(Some(day(2026, 1, 5)));
        let window = cycle_window(&config, &member, day(2026, 1, 4), 0).unwrap();
        assert_eq!(window.start, day(2025, 12, 8));
        assert_eq!(window.end, day(2026, 1, 4));
    }

    #[test]
    fn member_without_first_shift_has_no_cycle_unless_abcd() {
        let member = member_with_anchor(None);
        let per_member = CycleConfig::default();
        assert!(cycle_window(&per_member, &member, day(2026, 1, 5), 0).is_none());
        assert!(!cycle_starts_on(&per_member, &member, day(2026, 1, 5)));

        let abcd = CycleConfig {
            kind: CycleKind::Abcd,
            abcd_anchor: day(2026, 1, 5),
            ..CycleConfig::default()
        };
        assert!(cycle_starts_on(&abcd, &member, day(2026, 2, 2)));
        assert!(!cycle_starts_on(&abcd, &member, day(2026, 2, 3)));
    }

    #[test]
    fn registration_expiry_and_renewal_window() {
        let config = RegistrationConfig::default();
        let last = registration(day(2025, 3, 31));

        assert_eq!(expire_date(&config, Some(&last)), Some(day(2026, 3, 31)));
        assert!(is_uptodate_on(&config, Some(&last), day(2026, 3, 30)));
        assert!(!is_uptodate_on(&config, Some(&last), day(2026, 3, 31)));
        assert!(!is_uptodate_on(&config, None, day(2026, 3, 30)));

        assert!(can_register_on(&config, None, day(2026, 1, 1)));
        assert!(!can_register_on(&config, Some(&last), day(2026, 2, 28)));
        assert!(can_register_on(&config, Some(&last), day(2026, 3, 1)));
    }
}
