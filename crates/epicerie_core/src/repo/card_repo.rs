//! Swipe card and door swipe persistence.
//!
//! # Invariants
//! - Card codes are unique.
//! - `issue_card` disables the beneficiary's enabled cards and inserts the
//!   new one in a single transaction.

use super::{
    bool_to_int, ensure_connection_ready, map_write_error, parse_bool, parse_uuid, RepoError,
    RepoResult,
};
use crate::model::membership::BeneficiaryId;
use crate::model::swipe_card::{SwipeCard, SwipeCardId, SwipeCardLog};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, Row, Transaction, TransactionBehavior};

const CARD_SELECT_SQL: &str = "SELECT
    id,
    beneficiary_id,
    code,
    enabled,
    created_at,
    disabled_at
FROM swipe_cards";

pub trait CardRepository {
    /// Inserts `card`, disabling every other enabled card of its
    /// beneficiary at `card.created_at`.
    fn issue_card(&self, card: &SwipeCard) -> RepoResult<()>;
    fn update_card(&self, card: &SwipeCard) -> RepoResult<()>;
    fn get_card(&self, id: SwipeCardId) -> RepoResult<Option<SwipeCard>>;
    fn get_card_by_code(&self, code: &str) -> RepoResult<Option<SwipeCard>>;
    /// Cards of one beneficiary, newest first.
    fn list_cards(&self, beneficiary_id: BeneficiaryId) -> RepoResult<Vec<SwipeCard>>;
    fn log_swipe(&self, log: &SwipeCardLog) -> RepoResult<()>;
    fn list_swipes(
        &self,
        card_id: SwipeCardId,
        since: Option<NaiveDateTime>,
    ) -> RepoResult<Vec<SwipeCardLog>>;
}

/// SQLite-backed card repository.
pub struct SqliteCardRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteCardRepository<'conn> {
    /// Creates repository from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn, &["swipe_cards", "swipe_card_logs"])?;
        Ok(Self { conn })
    }

    fn query_one(&self, sql: &str, value: &str) -> RepoResult<Option<SwipeCard>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query([value])?;
        match rows.next()? {
            Some(row) => Ok(Some(parse_card_row(row)?)),
            None => Ok(None),
        }
    }
}

impl CardRepository for SqliteCardRepository<'_> {
    fn issue_card(&self, card: &SwipeCard) -> RepoResult<()> {
        card.validate()?;

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        tx.execute(
            "UPDATE swipe_cards
             SET enabled = 0, disabled_at = ?2
             WHERE beneficiary_id = ?1 AND enabled = 1;",
            params![card.beneficiary_id.to_string(), card.created_at],
        )?;
        tx.execute(
            "INSERT INTO swipe_cards (id, beneficiary_id, code, enabled, created_at, disabled_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
            params![
                card.id.to_string(),
                card.beneficiary_id.to_string(),
                card.code.as_str(),
                bool_to_int(card.enabled),
                card.created_at,
                card.disabled_at,
            ],
        )
        .map_err(|err| map_write_error(err, "card code"))?;
        tx.commit()?;
        Ok(())
    }

    fn update_card(&self, card: &SwipeCard) -> RepoResult<()> {
        card.validate()?;
        let changed = self.conn.execute(
            "UPDATE swipe_cards SET enabled = ?2, disabled_at = ?3 WHERE id = ?1;",
            params![
                card.id.to_string(),
                bool_to_int(card.enabled),
                card.disabled_at,
            ],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound {
                record: "swipe card",
                id: card.id,
            });
        }
        Ok(())
    }

    fn get_card(&self, id: SwipeCardId) -> RepoResult<Option<SwipeCard>> {
        self.query_one(
            &format!("{CARD_SELECT_SQL} WHERE id = ?1;"),
            &id.to_string(),
        )
    }

    fn get_card_by_code(&self, code: &str) -> RepoResult<Option<SwipeCard>> {
        self.query_one(&format!("{CARD_SELECT_SQL} WHERE code = ?1;"), code.trim())
    }

    fn list_cards(&self, beneficiary_id: BeneficiaryId) -> RepoResult<Vec<SwipeCard>> {
        let mut stmt = self.conn.prepare(&format!(
            "{CARD_SELECT_SQL}
             WHERE beneficiary_id = ?1
             ORDER BY created_at DESC, id ASC;"
        ))?;
        let mut rows = stmt.query([beneficiary_id.to_string()])?;
        let mut cards = Vec::new();
        while let Some(row) = rows.next()? {
            cards.push(parse_card_row(row)?);
        }
        Ok(cards)
    }

    fn log_swipe(&self, log: &SwipeCardLog) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO swipe_card_logs (id, card_id, swiped_at) VALUES (?1, ?2, ?3);",
            params![log.id.to_string(), log.card_id.to_string(), log.swiped_at],
        )?;
        Ok(())
    }

    fn list_swipes(
        &self,
        card_id: SwipeCardId,
        since: Option<NaiveDateTime>,
    ) -> RepoResult<Vec<SwipeCardLog>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, card_id, swiped_at
             FROM swipe_card_logs
             WHERE card_id = ?1
               AND (?2 IS NULL OR swiped_at >= ?2)
             ORDER BY swiped_at ASC, id ASC;",
        )?;
        let mut rows = stmt.query(params![card_id.to_string(), since])?;
        let mut logs = Vec::new();
        while let Some(row) = rows.next()? {
            let id_text: String = row.get("id")?;
            let card_text: String = row.get("card_id")?;
            logs.push(SwipeCardLog {
                id: parse_uuid(&id_text, "swipe_card_logs.id")?,
                card_id: parse_uuid(&card_text, "swipe_card_logs.card_id")?,
                swiped_at: row.get("swiped_at")?,
            });
        }
        Ok(logs)
    }
}

fn parse_card_row(row: &Row<'_>) -> RepoResult<SwipeCard> {
    let id_text: String = row.get("id")?;
    let beneficiary_text: String = row.get("beneficiary_id")?;
    let card = SwipeCard {
        id: parse_uuid(&id_text, "swipe_cards.id")?,
        beneficiary_id: parse_uuid(&beneficiary_text, "swipe_cards.beneficiary_id")?,
        code: row.get("code")?,
        enabled: parse_bool(row.get("enabled")?, "swipe_cards.enabled")?,
        created_at: row.get("created_at")?,
        disabled_at: row.get("disabled_at")?,
    };
    card.validate()?;
    Ok(card)
}
