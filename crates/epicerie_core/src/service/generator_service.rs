//! Shift generation from weekly periods.
//!
//! # Responsibility
//! - Manage periods and their per-week positions.
//! - Turn periods into concrete shifts for a date range.
//!
//! # Invariants
//! - A bucket that already holds shifts is never generated twice.
//! - The shifts of one bucket are inserted in one transaction.
//! - Week letters are counted from `cycle.abcd_anchor`.

use crate::config::CoopConfig;
use crate::model::bucket::{compare_shifts, BucketKey, ShiftBucket};
use crate::model::membership::{BeneficiaryId, FormationId};
use crate::model::period::{Period, PeriodId, PeriodPosition, WeekCycle};
use crate::model::shift::{JobId, Shift, ShiftId, ShiftTransitionError};
use crate::model::ValidationError;
use crate::repo::member_repo::MemberRepository;
use crate::repo::shift_repo::ShiftRepository;
use crate::repo::RepoError;
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use log::info;
use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug)]
pub enum GeneratorError {
    JobNotFound(JobId),
    PeriodNotFound(PeriodId),
    BeneficiaryNotFound(BeneficiaryId),
    InvalidRange { from: NaiveDate, to: NaiveDate },
    Transition(ShiftTransitionError),
    Validation(ValidationError),
    Repo(RepoError),
}

impl Display for GeneratorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::JobNotFound(id) => write!(f, "job not found: {id}"),
            Self::PeriodNotFound(id) => write!(f, "period not found: {id}"),
            Self::BeneficiaryNotFound(id) => write!(f, "beneficiary not found: {id}"),
            Self::InvalidRange { from, to } => {
                write!(f, "generation range {from}..{to} is empty")
            }
            Self::Transition(err) => write!(f, "{err}"),
            Self::Validation(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for GeneratorError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Transition(err) => Some(err),
            Self::Validation(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for GeneratorError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::Validation(err) => Self::Validation(err),
            other => Self::Repo(other),
        }
    }
}

impl From<ShiftTransitionError> for GeneratorError {
    fn from(value: ShiftTransitionError) -> Self {
        Self::Transition(value)
    }
}

/// Summary of one generation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationReport {
    pub created: Vec<ShiftId>,
    /// Buckets left untouched because they already existed.
    pub skipped_buckets: usize,
    /// Free shifts reserved for their previous shifter.
    pub reserved: usize,
    /// Shifts booked for a fixed position.
    pub fixed: usize,
}

pub struct GeneratorService<S, M> {
    shifts: S,
    members: M,
    config: CoopConfig,
}

impl<S, M> GeneratorService<S, M>
where
    S: ShiftRepository,
    M: MemberRepository,
{
    pub fn new(shifts: S, members: M, config: CoopConfig) -> Self {
        Self {
            shifts,
            members,
            config,
        }
    }

    pub fn create_period(
        &self,
        job_id: JobId,
        day_of_week: Weekday,
        start: NaiveTime,
        end: NaiveTime,
    ) -> Result<Period, GeneratorError> {
        if self.shifts.get_job(job_id)?.is_none() {
            return Err(GeneratorError::JobNotFound(job_id));
        }
        let period = Period::new(job_id, day_of_week, start, end);
        self.shifts.create_period(&period)?;
        Ok(period)
    }

    pub fn list_periods(&self) -> Result<Vec<Period>, GeneratorError> {
        Ok(self.shifts.list_periods()?)
    }

    pub fn add_position(
        &self,
        period_id: PeriodId,
        week_cycle: WeekCycle,
        formation_id: Option<FormationId>,
        shifter_id: Option<BeneficiaryId>,
    ) -> Result<PeriodPosition, GeneratorError> {
        let known = self
            .shifts
            .list_periods()?
            .iter()
            .any(|period| period.id == period_id);
        if !known {
            return Err(GeneratorError::PeriodNotFound(period_id));
        }
        if let Some(shifter_id) = shifter_id {
            if self.members.get_beneficiary(shifter_id)?.is_none() {
                return Err(GeneratorError::BeneficiaryNotFound(shifter_id));
            }
        }

        let mut position = PeriodPosition::new(period_id, week_cycle);
        position.formation_id = formation_id;
        position.shifter_id = shifter_id;
        self.shifts.create_position(&position)?;
        Ok(position)
    }

    /// Generates shifts for every day of `[from, to]`.
    ///
    /// With `reserve`, each new free shift may be held for a beneficiary
    /// who worked the same bucket one cycle earlier.
    pub fn generate(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        reserve: bool,
        now: NaiveDateTime,
    ) -> Result<GenerationReport, GeneratorError> {
        if to < from {
            return Err(GeneratorError::InvalidRange { from, to });
        }

        let periods = self.shifts.list_periods()?;
        let mut positions = Vec::with_capacity(periods.len());
        for period in &periods {
            positions.push(self.shifts.list_positions(period.id)?);
        }

        let mut report = GenerationReport::default();
        for day in from.iter_days().take_while(|day| *day <= to) {
            let week = WeekCycle::of_date(day, self.config.cycle.abcd_anchor);
            for (period, period_positions) in periods.iter().zip(&positions) {
                if period.day_of_week != day.weekday() {
                    continue;
                }
                let active: Vec<&PeriodPosition> = period_positions
                    .iter()
                    .filter(|position| position.week_cycle == week)
                    .collect();
                if active.is_empty() {
                    continue;
                }
                self.generate_bucket(period, day, &active, reserve, now, &mut report)?;
            }
        }

        info!(
            "event=shift_generate module=generator status=ok from={} to={} created={} skipped={} reserved={}",
            from,
            to,
            report.created.len(),
            report.skipped_buckets,
            report.reserved
        );
        Ok(report)
    }

    fn generate_bucket(
        &self,
        period: &Period,
        day: NaiveDate,
        positions: &[&PeriodPosition],
        reserve: bool,
        now: NaiveDateTime,
        report: &mut GenerationReport,
    ) -> Result<(), GeneratorError> {
        let key = BucketKey {
            start: day.and_time(period.start),
            end: day.and_time(period.end),
            job_id: period.job_id,
        };
        if !self.shifts.list_bucket(&key)?.is_empty() {
            report.skipped_buckets += 1;
            return Ok(());
        }

        let mut shifts = Vec::with_capacity(positions.len());
        for position in positions {
            let mut shift = Shift::new(key.job_id, key.start, key.end, now)
                .with_formation(position.formation_id);
            if let Some(shifter_id) = position.shifter_id {
                shift.book(shifter_id, None, now)?;
                shift.fixe = true;
                report.fixed += 1;
            }
            shifts.push(shift);
        }

        if reserve {
            report.reserved += self.reserve_for_previous_shifters(&key, &mut shifts)?;
        }

        self.shifts.create_shifts(&shifts)?;
        report.created.extend(shifts.iter().map(|shift| shift.id));
        Ok(())
    }

    /// Holds new free slots for the shifters of the bucket one cycle back.
    fn reserve_for_previous_shifters(
        &self,
        key: &BucketKey,
        shifts: &mut [Shift],
    ) -> Result<usize, GeneratorError> {
        let back = Duration::days(i64::from(self.config.cycle.duration_days));
        let previous_key = BucketKey {
            start: key.start - back,
            end: key.end - back,
            job_id: key.job_id,
        };
        let Some(previous) = ShiftBucket::group(self.shifts.list_bucket(&previous_key)?)
            .into_iter()
            .next()
        else {
            return Ok(0);
        };

        let mut order: Vec<usize> = (0..shifts.len()).collect();
        order.sort_by(|left, right| compare_shifts(&shifts[*left], &shifts[*right]));

        let already_fixed: Vec<BeneficiaryId> =
            shifts.iter().filter_map(Shift::active_shifter).collect();
        let mut reserved = 0;
        for holder_id in previous.shifts().iter().filter_map(Shift::active_shifter) {
            if already_fixed.contains(&holder_id) {
                continue;
            }
            let Some(holder) = self.members.get_beneficiary(holder_id)? else {
                continue;
            };
            let withdrawn = self
                .members
                .get_membership(holder.membership_id)?
                .map_or(true, |membership| membership.withdrawn);
            if withdrawn {
                continue;
            }

            let target = order.iter().copied().find(|index| {
                let shift = &shifts[*index];
                shift.shifter_id.is_none()
                    && shift.last_shifter_id.is_none()
                    && shift
                        .formation_id
                        .map_or(true, |formation| holder.has_formation(formation))
            });
            if let Some(index) = target {
                shifts[index].reserve_for(holder_id)?;
                reserved += 1;
            }
        }
        Ok(reserved)
    }
}

#[cfg(test)]
mod tests {
    use super::GeneratorService;
    use crate::config::CoopConfig;
    use crate::db::open_db_in_memory;
    use crate::model::period::WeekCycle;
    use crate::model::shift::Job;
    use crate::repo::member_repo::SqliteMemberRepository;
    use crate::repo::shift_repo::{ShiftRepository, SqliteShiftRepository};
    use chrono::{NaiveDate, NaiveTime, Weekday};

    #[test]
    fn generating_twice_skips_existing_buckets() {
        let conn = open_db_in_memory().unwrap();
        let shifts = SqliteShiftRepository::try_new(&conn).unwrap();
        let job = Job::new("Caisse", "#ff8800");
        shifts.create_job(&job).unwrap();

        let service = GeneratorService::new(
            shifts,
            SqliteMemberRepository::try_new(&conn).unwrap(),
            CoopConfig::default(),
        );
        let period = service
            .create_period(
                job.id,
                Weekday::Mon,
                NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
            )
            .unwrap();
        for week in [WeekCycle::A, WeekCycle::B, WeekCycle::C, WeekCycle::D] {
            service.add_position(period.id, week, None, None).unwrap();
        }

        let from = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let to = NaiveDate::from_ymd_opt(2026, 3, 15).unwrap();
        let now = from.and_hms_opt(0, 0, 0).unwrap();

        let first = service.generate(from, to, false, now).unwrap();
        assert_eq!(first.created.len(), 2);
        assert_eq!(first.skipped_buckets, 0);

        let second = service.generate(from, to, false, now).unwrap();
        assert!(second.created.is_empty());
        assert_eq!(second.skipped_buckets, 2);
    }
}
