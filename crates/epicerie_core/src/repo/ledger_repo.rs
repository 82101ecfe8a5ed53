//! Volunteer-time ledger and shift exemption persistence.
//!
//! # Responsibility
//! - Append time logs and aggregate balances per membership.
//! - Store exemptions.
//! - Apply a membership's cycle start (freeze toggle + logs) atomically.
//!
//! # Invariants
//! - Time logs are append-only.
//! - Balances exclude `saving` entries; savings include only them.

use super::{
    bool_to_int, datetime_value, ensure_connection_ready, parse_optional_uuid, parse_uuid,
    RepoError, RepoResult,
};
use crate::model::exemption::{ExemptionId, MembershipShiftExemption};
use crate::model::membership::{Membership, MembershipId};
use crate::model::time_log::{TimeLog, TimeLogKind};
use chrono::NaiveDateTime;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row, Transaction, TransactionBehavior};

const TIME_LOG_SELECT_SQL: &str = "SELECT
    id,
    membership_id,
    beneficiary_id,
    shift_id,
    kind,
    minutes,
    description,
    created_at
FROM time_logs";

const EXEMPTION_SELECT_SQL: &str = "SELECT
    id,
    membership_id,
    reason,
    start_date,
    end_date,
    created_at
FROM shift_exemptions";

/// Which counter a sum is computed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    /// Shift-time balance: every kind except `saving`.
    Balance,
    /// Savings: `saving` entries only.
    Savings,
}

/// Repository interface for the time ledger and exemptions.
pub trait LedgerRepository {
    fn append_log(&self, log: &TimeLog) -> RepoResult<()>;
    /// Logs of one membership ordered by `created_at ASC, id ASC`.
    fn list_logs(&self, membership_id: MembershipId) -> RepoResult<Vec<TimeLog>>;
    /// Sum of minutes logged strictly before `before` (all when `None`).
    fn sum_minutes(
        &self,
        membership_id: MembershipId,
        counter: Counter,
        before: Option<NaiveDateTime>,
    ) -> RepoResult<i64>;
    /// Whether a cycle-end entry is dated exactly `at`.
    fn has_cycle_end_log(
        &self,
        membership_id: MembershipId,
        at: NaiveDateTime,
    ) -> RepoResult<bool>;
    /// Persists the membership's freeze state and appends `logs` atomically.
    fn apply_cycle_start(&self, membership: &Membership, logs: &[TimeLog]) -> RepoResult<()>;

    fn create_exemption(&self, exemption: &MembershipShiftExemption) -> RepoResult<()>;
    fn delete_exemption(&self, id: ExemptionId) -> RepoResult<()>;
    fn get_exemption(&self, id: ExemptionId) -> RepoResult<Option<MembershipShiftExemption>>;
    /// Exemptions of one membership ordered by start date.
    fn list_exemptions(
        &self,
        membership_id: MembershipId,
    ) -> RepoResult<Vec<MembershipShiftExemption>>;
}

/// SQLite-backed ledger repository.
pub struct SqliteLedgerRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteLedgerRepository<'conn> {
    /// Creates repository from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn, &["time_logs", "shift_exemptions", "memberships"])?;
        Ok(Self { conn })
    }
}

impl LedgerRepository for SqliteLedgerRepository<'_> {
    fn append_log(&self, log: &TimeLog) -> RepoResult<()> {
        insert_time_log(self.conn, log)
    }

    fn list_logs(&self, membership_id: MembershipId) -> RepoResult<Vec<TimeLog>> {
        let mut stmt = self.conn.prepare(&format!(
            "{TIME_LOG_SELECT_SQL}
             WHERE membership_id = ?1
             ORDER BY created_at ASC, id ASC;"
        ))?;
        let mut rows = stmt.query([membership_id.to_string()])?;
        let mut logs = Vec::new();
        while let Some(row) = rows.next()? {
            logs.push(parse_time_log_row(row)?);
        }
        Ok(logs)
    }

    fn sum_minutes(
        &self,
        membership_id: MembershipId,
        counter: Counter,
        before: Option<NaiveDateTime>,
    ) -> RepoResult<i64> {
        let mut sql = String::from(
            "SELECT COALESCE(SUM(minutes), 0) FROM time_logs WHERE membership_id = ?",
        );
        let mut bind_values = vec![
            Value::Text(membership_id.to_string()),
            Value::Text(TimeLogKind::Saving.as_str().to_string()),
        ];
        match counter {
            Counter::Balance => sql.push_str(" AND kind <> ?"),
            Counter::Savings => sql.push_str(" AND kind = ?"),
        }
        if let Some(before) = before {
            sql.push_str(" AND created_at < ?");
            bind_values.push(datetime_value(before));
        }

        let total: i64 =
            self.conn
                .query_row(&sql, params_from_iter(bind_values), |row| row.get(0))?;
        Ok(total)
    }

    fn has_cycle_end_log(
        &self,
        membership_id: MembershipId,
        at: NaiveDateTime,
    ) -> RepoResult<bool> {
        let kinds = TimeLogKind::CYCLE_END_KINDS;
        let exists: i64 = self.conn.query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM time_logs
                WHERE membership_id = ?1
                  AND created_at = ?2
                  AND kind IN (?3, ?4, ?5, ?6)
            );",
            params![
                membership_id.to_string(),
                at,
                kinds[0].as_str(),
                kinds[1].as_str(),
                kinds[2].as_str(),
                kinds[3].as_str(),
            ],
            |row| row.get(0),
        )?;
        Ok(exists == 1)
    }

    fn apply_cycle_start(&self, membership: &Membership, logs: &[TimeLog]) -> RepoResult<()> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let changed = tx.execute(
            "UPDATE memberships SET frozen = ?2, frozen_change = ?3 WHERE id = ?1;",
            params![
                membership.id.to_string(),
                bool_to_int(membership.frozen),
                bool_to_int(membership.frozen_change),
            ],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound {
                record: "membership",
                id: membership.id,
            });
        }
        for log in logs {
            insert_time_log(&tx, log)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn create_exemption(&self, exemption: &MembershipShiftExemption) -> RepoResult<()> {
        exemption.validate()?;
        self.conn.execute(
            "INSERT INTO shift_exemptions (
                id,
                membership_id,
                reason,
                start_date,
                end_date,
                created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
            params![
                exemption.id.to_string(),
                exemption.membership_id.to_string(),
                exemption.reason.as_str(),
                exemption.start,
                exemption.end,
                exemption.created_at,
            ],
        )?;
        Ok(())
    }

    fn delete_exemption(&self, id: ExemptionId) -> RepoResult<()> {
        let changed = self.conn.execute(
            "DELETE FROM shift_exemptions WHERE id = ?1;",
            [id.to_string()],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound {
                record: "exemption",
                id,
            });
        }
        Ok(())
    }

    fn get_exemption(&self, id: ExemptionId) -> RepoResult<Option<MembershipShiftExemption>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{EXEMPTION_SELECT_SQL} WHERE id = ?1;"))?;
        let mut rows = stmt.query([id.to_string()])?;
        match rows.next()? {
            Some(row) => Ok(Some(parse_exemption_row(row)?)),
            None => Ok(None),
        }
    }

    fn list_exemptions(
        &self,
        membership_id: MembershipId,
    ) -> RepoResult<Vec<MembershipShiftExemption>> {
        let mut stmt = self.conn.prepare(&format!(
            "{EXEMPTION_SELECT_SQL}
             WHERE membership_id = ?1
             ORDER BY start_date ASC, id ASC;"
        ))?;
        let mut rows = stmt.query([membership_id.to_string()])?;
        let mut exemptions = Vec::new();
        while let Some(row) = rows.next()? {
            exemptions.push(parse_exemption_row(row)?);
        }
        Ok(exemptions)
    }
}

pub(crate) fn insert_time_log(conn: &Connection, log: &TimeLog) -> RepoResult<()> {
    conn.execute(
        "INSERT INTO time_logs (
            id,
            membership_id,
            beneficiary_id,
            shift_id,
            kind,
            minutes,
            description,
            created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
        params![
            log.id.to_string(),
            log.membership_id.to_string(),
            log.beneficiary_id.map(|id| id.to_string()),
            log.shift_id.map(|id| id.to_string()),
            log.kind.as_str(),
            log.minutes,
            log.description.as_deref(),
            log.created_at,
        ],
    )?;
    Ok(())
}

fn parse_time_log_row(row: &Row<'_>) -> RepoResult<TimeLog> {
    let id_text: String = row.get("id")?;
    let membership_text: String = row.get("membership_id")?;
    let kind_text: String = row.get("kind")?;
    let kind = TimeLogKind::parse(&kind_text).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid time log kind `{kind_text}` in time_logs.kind"))
    })?;
    Ok(TimeLog {
        id: parse_uuid(&id_text, "time_logs.id")?,
        membership_id: parse_uuid(&membership_text, "time_logs.membership_id")?,
        beneficiary_id: parse_optional_uuid(row.get("beneficiary_id")?, "time_logs.beneficiary_id")?,
        shift_id: parse_optional_uuid(row.get("shift_id")?, "time_logs.shift_id")?,
        kind,
        minutes: row.get("minutes")?,
        description: row.get("description")?,
        created_at: row.get("created_at")?,
    })
}

fn parse_exemption_row(row: &Row<'_>) -> RepoResult<MembershipShiftExemption> {
    let id_text: String = row.get("id")?;
    let membership_text: String = row.get("membership_id")?;
    let exemption = MembershipShiftExemption {
        id: parse_uuid(&id_text, "shift_exemptions.id")?,
        membership_id: parse_uuid(&membership_text, "shift_exemptions.membership_id")?,
        reason: row.get("reason")?,
        start: row.get("start_date")?,
        end: row.get("end_date")?,
        created_at: row.get("created_at")?,
    };
    exemption.validate()?;
    Ok(exemption)
}
