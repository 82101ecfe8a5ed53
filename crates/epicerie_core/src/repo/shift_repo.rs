//! Job, shift and weekly period persistence.
//!
//! # Responsibility
//! - Store shifts and expose the range and bucket queries used for booking.
//! - Persist a shift transition together with its ledger entry.
//!
//! # Invariants
//! - Shift lists are ordered by `start_at, end_at, job_id, id`.
//! - `record_transition` writes the shift row and its time log in one
//!   transaction, or neither.
//! - `record_booking` only lands on a row that still has no active shifter,
//!   together with the membership's cycle anchor.

use super::ledger_repo::insert_time_log;
use super::{
    bool_to_int, datetime_value, ensure_connection_ready, map_write_error, parse_bool,
    parse_optional_uuid, parse_uuid, RepoError, RepoResult,
};
use crate::model::bucket::BucketKey;
use crate::model::membership::{BeneficiaryId, MembershipId};
use crate::model::period::{Period, PeriodId, PeriodPosition, WeekCycle};
use crate::model::shift::{Job, JobId, Shift, ShiftId};
use crate::model::time_log::TimeLog;
use chrono::{NaiveDate, NaiveDateTime, Weekday};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row, Transaction, TransactionBehavior};

const SHIFT_SELECT_SQL: &str = "SELECT
    id,
    job_id,
    start_at,
    end_at,
    formation_id,
    shifter_id,
    booker_id,
    booked_time,
    is_dismissed,
    dismissed_time,
    dismissed_reason,
    last_shifter_id,
    was_carried_out,
    locked,
    fixe,
    created_at
FROM shifts";

const SHIFT_ORDER_SQL: &str = " ORDER BY start_at ASC, end_at ASC, job_id ASC, id ASC";

/// Repository interface for shifts and their templates.
pub trait ShiftRepository {
    fn create_job(&self, job: &Job) -> RepoResult<()>;
    fn get_job(&self, id: JobId) -> RepoResult<Option<Job>>;
    fn list_jobs(&self) -> RepoResult<Vec<Job>>;

    fn create_shift(&self, shift: &Shift) -> RepoResult<()>;
    /// Inserts a batch of shifts atomically.
    fn create_shifts(&self, shifts: &[Shift]) -> RepoResult<()>;
    fn update_shift(&self, shift: &Shift) -> RepoResult<()>;
    fn delete_shift(&self, id: ShiftId) -> RepoResult<()>;
    fn get_shift(&self, id: ShiftId) -> RepoResult<Option<Shift>>;
    /// Shifts starting in `[from, to)`.
    fn list_shifts_between(&self, from: NaiveDateTime, to: NaiveDateTime)
        -> RepoResult<Vec<Shift>>;
    fn list_bucket(&self, key: &BucketKey) -> RepoResult<Vec<Shift>>;
    /// Shifts actively held by any of `shifters`, optionally limited to
    /// shifts starting in `[from, to)`.
    fn list_shifts_of(
        &self,
        shifters: &[BeneficiaryId],
        from: Option<NaiveDateTime>,
        to: Option<NaiveDateTime>,
    ) -> RepoResult<Vec<Shift>>;
    /// Free shifts held for a previous shifter.
    fn list_reserved_shifts(&self) -> RepoResult<Vec<Shift>>;
    /// Updates the shift and appends `log` in one transaction.
    fn record_transition(&self, shift: &Shift, log: Option<&TimeLog>) -> RepoResult<()>;
    /// Writes a freshly booked shift, failing with `Conflict` when the
    /// stored row gained an active shifter meanwhile. `first_shift_date`
    /// is set on the membership unless it already has one.
    fn record_booking(
        &self,
        shift: &Shift,
        membership_id: MembershipId,
        first_shift_date: NaiveDate,
    ) -> RepoResult<()>;

    fn create_period(&self, period: &Period) -> RepoResult<()>;
    /// Periods ordered by weekday then start time.
    fn list_periods(&self) -> RepoResult<Vec<Period>>;
    fn create_position(&self, position: &PeriodPosition) -> RepoResult<()>;
    fn list_positions(&self, period_id: PeriodId) -> RepoResult<Vec<PeriodPosition>>;
}

/// SQLite-backed shift repository.
pub struct SqliteShiftRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteShiftRepository<'conn> {
    /// Creates repository from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(
            conn,
            &[
                "jobs",
                "shifts",
                "periods",
                "period_positions",
                "time_logs",
                "memberships",
            ],
        )?;
        Ok(Self { conn })
    }

    fn query_shifts(&self, sql: &str, bind_values: Vec<Value>) -> RepoResult<Vec<Shift>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut shifts = Vec::new();
        while let Some(row) = rows.next()? {
            shifts.push(parse_shift_row(row)?);
        }
        Ok(shifts)
    }
}

impl ShiftRepository for SqliteShiftRepository<'_> {
    fn create_job(&self, job: &Job) -> RepoResult<()> {
        job.validate()?;
        self.conn
            .execute(
                "INSERT INTO jobs (id, name, color, enabled, min_shifter_alert)
                 VALUES (?1, ?2, ?3, ?4, ?5);",
                params![
                    job.id.to_string(),
                    job.name.as_str(),
                    job.color.as_str(),
                    bool_to_int(job.enabled),
                    job.min_shifter_alert,
                ],
            )
            .map_err(|err| map_write_error(err, "job name"))?;
        Ok(())
    }

    fn get_job(&self, id: JobId) -> RepoResult<Option<Job>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, color, enabled, min_shifter_alert FROM jobs WHERE id = ?1;",
        )?;
        let mut rows = stmt.query([id.to_string()])?;
        match rows.next()? {
            Some(row) => Ok(Some(parse_job_row(row)?)),
            None => Ok(None),
        }
    }

    fn list_jobs(&self) -> RepoResult<Vec<Job>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, color, enabled, min_shifter_alert
             FROM jobs
             ORDER BY name COLLATE NOCASE ASC;",
        )?;
        let mut rows = stmt.query([])?;
        let mut jobs = Vec::new();
        while let Some(row) = rows.next()? {
            jobs.push(parse_job_row(row)?);
        }
        Ok(jobs)
    }

    fn create_shift(&self, shift: &Shift) -> RepoResult<()> {
        shift.validate()?;
        insert_shift(self.conn, shift)
    }

    fn create_shifts(&self, shifts: &[Shift]) -> RepoResult<()> {
        for shift in shifts {
            shift.validate()?;
        }
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        for shift in shifts {
            insert_shift(&tx, shift)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn update_shift(&self, shift: &Shift) -> RepoResult<()> {
        shift.validate()?;
        update_shift_row(self.conn, shift)
    }

    fn delete_shift(&self, id: ShiftId) -> RepoResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM shifts WHERE id = ?1;", [id.to_string()])?;
        if changed == 0 {
            return Err(RepoError::NotFound { record: "shift", id });
        }
        Ok(())
    }

    fn get_shift(&self, id: ShiftId) -> RepoResult<Option<Shift>> {
        let mut shifts = self.query_shifts(
            &format!("{SHIFT_SELECT_SQL} WHERE id = ?;"),
            vec![Value::Text(id.to_string())],
        )?;
        Ok(shifts.pop())
    }

    fn list_shifts_between(
        &self,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> RepoResult<Vec<Shift>> {
        let mut stmt = self.conn.prepare(&format!(
            "{SHIFT_SELECT_SQL} WHERE start_at >= ?1 AND start_at < ?2{SHIFT_ORDER_SQL};"
        ))?;
        let mut rows = stmt.query(params![from, to])?;
        let mut shifts = Vec::new();
        while let Some(row) = rows.next()? {
            shifts.push(parse_shift_row(row)?);
        }
        Ok(shifts)
    }

    fn list_bucket(&self, key: &BucketKey) -> RepoResult<Vec<Shift>> {
        let mut stmt = self.conn.prepare(&format!(
            "{SHIFT_SELECT_SQL}
             WHERE job_id = ?1 AND start_at = ?2 AND end_at = ?3{SHIFT_ORDER_SQL};"
        ))?;
        let mut rows = stmt.query(params![key.job_id.to_string(), key.start, key.end])?;
        let mut shifts = Vec::new();
        while let Some(row) = rows.next()? {
            shifts.push(parse_shift_row(row)?);
        }
        Ok(shifts)
    }

    fn list_shifts_of(
        &self,
        shifters: &[BeneficiaryId],
        from: Option<NaiveDateTime>,
        to: Option<NaiveDateTime>,
    ) -> RepoResult<Vec<Shift>> {
        if shifters.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; shifters.len()].join(", ");
        let mut sql = format!(
            "{SHIFT_SELECT_SQL} WHERE is_dismissed = 0 AND shifter_id IN ({placeholders})"
        );
        let mut bind_values: Vec<Value> = shifters
            .iter()
            .map(|id| Value::Text(id.to_string()))
            .collect();

        if let Some(from) = from {
            sql.push_str(" AND start_at >= ?");
            bind_values.push(datetime_value(from));
        }
        if let Some(to) = to {
            sql.push_str(" AND start_at < ?");
            bind_values.push(datetime_value(to));
        }
        sql.push_str(SHIFT_ORDER_SQL);

        self.query_shifts(&sql, bind_values)
    }

    fn list_reserved_shifts(&self) -> RepoResult<Vec<Shift>> {
        self.query_shifts(
            &format!(
                "{SHIFT_SELECT_SQL}
                 WHERE shifter_id IS NULL AND last_shifter_id IS NOT NULL{SHIFT_ORDER_SQL};"
            ),
            Vec::new(),
        )
    }

    fn record_transition(&self, shift: &Shift, log: Option<&TimeLog>) -> RepoResult<()> {
        shift.validate()?;
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        update_shift_row(&tx, shift)?;
        if let Some(log) = log {
            insert_time_log(&tx, log)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn record_booking(
        &self,
        shift: &Shift,
        membership_id: MembershipId,
        first_shift_date: NaiveDate,
    ) -> RepoResult<()> {
        shift.validate()?;
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let changed = write_shift_row(
            &tx,
            shift,
            " AND (shifter_id IS NULL OR is_dismissed = 1)",
        )?;
        if changed == 0 {
            return Err(RepoError::Conflict {
                record: "shift",
                id: shift.id,
            });
        }
        let anchored = tx.execute(
            "UPDATE memberships
             SET first_shift_date = COALESCE(first_shift_date, ?2)
             WHERE id = ?1;",
            params![membership_id.to_string(), first_shift_date],
        )?;
        if anchored == 0 {
            return Err(RepoError::NotFound {
                record: "membership",
                id: membership_id,
            });
        }
        tx.commit()?;
        Ok(())
    }

    fn create_period(&self, period: &Period) -> RepoResult<()> {
        period.validate()?;
        self.conn.execute(
            "INSERT INTO periods (id, job_id, day_of_week, start_time, end_time)
             VALUES (?1, ?2, ?3, ?4, ?5);",
            params![
                period.id.to_string(),
                period.job_id.to_string(),
                period.day_of_week.num_days_from_monday(),
                period.start,
                period.end,
            ],
        )?;
        Ok(())
    }

    fn list_periods(&self) -> RepoResult<Vec<Period>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, job_id, day_of_week, start_time, end_time
             FROM periods
             ORDER BY day_of_week ASC, start_time ASC, id ASC;",
        )?;
        let mut rows = stmt.query([])?;
        let mut periods = Vec::new();
        while let Some(row) = rows.next()? {
            let id_text: String = row.get("id")?;
            let job_text: String = row.get("job_id")?;
            let day: u32 = row.get("day_of_week")?;
            periods.push(Period {
                id: parse_uuid(&id_text, "periods.id")?,
                job_id: parse_uuid(&job_text, "periods.job_id")?,
                day_of_week: weekday_from_db(day)?,
                start: row.get("start_time")?,
                end: row.get("end_time")?,
            });
        }
        Ok(periods)
    }

    fn create_position(&self, position: &PeriodPosition) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO period_positions (id, period_id, week_cycle, formation_id, shifter_id)
             VALUES (?1, ?2, ?3, ?4, ?5);",
            params![
                position.id.to_string(),
                position.period_id.to_string(),
                position.week_cycle.as_str(),
                position.formation_id.map(|id| id.to_string()),
                position.shifter_id.map(|id| id.to_string()),
            ],
        )?;
        Ok(())
    }

    fn list_positions(&self, period_id: PeriodId) -> RepoResult<Vec<PeriodPosition>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, period_id, week_cycle, formation_id, shifter_id
             FROM period_positions
             WHERE period_id = ?1
             ORDER BY week_cycle ASC, id ASC;",
        )?;
        let mut rows = stmt.query([period_id.to_string()])?;
        let mut positions = Vec::new();
        while let Some(row) = rows.next()? {
            let id_text: String = row.get("id")?;
            let period_text: String = row.get("period_id")?;
            let cycle_text: String = row.get("week_cycle")?;
            let week_cycle = WeekCycle::parse(&cycle_text).ok_or_else(|| {
                RepoError::InvalidData(format!(
                    "invalid week cycle `{cycle_text}` in period_positions.week_cycle"
                ))
            })?;
            positions.push(PeriodPosition {
                id: parse_uuid(&id_text, "period_positions.id")?,
                period_id: parse_uuid(&period_text, "period_positions.period_id")?,
                week_cycle,
                formation_id: parse_optional_uuid(
                    row.get("formation_id")?,
                    "period_positions.formation_id",
                )?,
                shifter_id: parse_optional_uuid(
                    row.get("shifter_id")?,
                    "period_positions.shifter_id",
                )?,
            });
        }
        Ok(positions)
    }
}

fn insert_shift(conn: &Connection, shift: &Shift) -> RepoResult<()> {
    conn.execute(
        "INSERT INTO shifts (
            id,
            job_id,
            start_at,
            end_at,
            formation_id,
            shifter_id,
            booker_id,
            booked_time,
            is_dismissed,
            dismissed_time,
            dismissed_reason,
            last_shifter_id,
            was_carried_out,
            locked,
            fixe,
            created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16);",
        params![
            shift.id.to_string(),
            shift.job_id.to_string(),
            shift.start,
            shift.end,
            shift.formation_id.map(|id| id.to_string()),
            shift.shifter_id.map(|id| id.to_string()),
            shift.booker_id.map(|id| id.to_string()),
            shift.booked_time,
            bool_to_int(shift.is_dismissed),
            shift.dismissed_time,
            shift.dismissed_reason.as_deref(),
            shift.last_shifter_id.map(|id| id.to_string()),
            bool_to_int(shift.was_carried_out),
            bool_to_int(shift.locked),
            bool_to_int(shift.fixe),
            shift.created_at,
        ],
    )
    .map_err(|err| map_write_error(err, "shift"))?;
    Ok(())
}

fn update_shift_row(conn: &Connection, shift: &Shift) -> RepoResult<()> {
    if write_shift_row(conn, shift, "")? == 0 {
        return Err(RepoError::NotFound {
            record: "shift",
            id: shift.id,
        });
    }
    Ok(())
}

/// Updates every mutable column of `shift`; `guard` extends the `WHERE`.
fn write_shift_row(conn: &Connection, shift: &Shift, guard: &str) -> RepoResult<usize> {
    let sql = format!(
        "UPDATE shifts
         SET
            job_id = ?2,
            start_at = ?3,
            end_at = ?4,
            formation_id = ?5,
            shifter_id = ?6,
            booker_id = ?7,
            booked_time = ?8,
            is_dismissed = ?9,
            dismissed_time = ?10,
            dismissed_reason = ?11,
            last_shifter_id = ?12,
            was_carried_out = ?13,
            locked = ?14,
            fixe = ?15
         WHERE id = ?1{guard};"
    );
    let changed = conn.execute(
        &sql,
        params![
            shift.id.to_string(),
            shift.job_id.to_string(),
            shift.start,
            shift.end,
            shift.formation_id.map(|id| id.to_string()),
            shift.shifter_id.map(|id| id.to_string()),
            shift.booker_id.map(|id| id.to_string()),
            shift.booked_time,
            bool_to_int(shift.is_dismissed),
            shift.dismissed_time,
            shift.dismissed_reason.as_deref(),
            shift.last_shifter_id.map(|id| id.to_string()),
            bool_to_int(shift.was_carried_out),
            bool_to_int(shift.locked),
            bool_to_int(shift.fixe),
        ],
    )?;
    Ok(changed)
}

fn weekday_from_db(value: u32) -> RepoResult<Weekday> {
    match value {
        0 => Ok(Weekday::Mon),
        1 => Ok(Weekday::Tue),
        2 => Ok(Weekday::Wed),
        3 => Ok(Weekday::Thu),
        4 => Ok(Weekday::Fri),
        5 => Ok(Weekday::Sat),
        6 => Ok(Weekday::Sun),
        other => Err(RepoError::InvalidData(format!(
            "invalid weekday `{other}` in periods.day_of_week"
        ))),
    }
}

fn parse_job_row(row: &Row<'_>) -> RepoResult<Job> {
    let id_text: String = row.get("id")?;
    Ok(Job {
        id: parse_uuid(&id_text, "jobs.id")?,
        name: row.get("name")?,
        color: row.get("color")?,
        enabled: parse_bool(row.get("enabled")?, "jobs.enabled")?,
        min_shifter_alert: row.get("min_shifter_alert")?,
    })
}

fn parse_shift_row(row: &Row<'_>) -> RepoResult<Shift> {
    let id_text: String = row.get("id")?;
    let job_text: String = row.get("job_id")?;
    let shift = Shift {
        id: parse_uuid(&id_text, "shifts.id")?,
        job_id: parse_uuid(&job_text, "shifts.job_id")?,
        start: row.get("start_at")?,
        end: row.get("end_at")?,
        formation_id: parse_optional_uuid(row.get("formation_id")?, "shifts.formation_id")?,
        shifter_id: parse_optional_uuid(row.get("shifter_id")?, "shifts.shifter_id")?,
        booker_id: parse_optional_uuid(row.get("booker_id")?, "shifts.booker_id")?,
        booked_time: row.get("booked_time")?,
        is_dismissed: parse_bool(row.get("is_dismissed")?, "shifts.is_dismissed")?,
        dismissed_time: row.get("dismissed_time")?,
        dismissed_reason: row.get("dismissed_reason")?,
        last_shifter_id: parse_optional_uuid(
            row.get("last_shifter_id")?,
            "shifts.last_shifter_id",
        )?,
        was_carried_out: parse_bool(row.get("was_carried_out")?, "shifts.was_carried_out")?,
        locked: parse_bool(row.get("locked")?, "shifts.locked")?,
        fixe: parse_bool(row.get("fixe")?, "shifts.fixe")?,
        created_at: row.get("created_at")?,
    };
    shift.validate()?;
    Ok(shift)
}
