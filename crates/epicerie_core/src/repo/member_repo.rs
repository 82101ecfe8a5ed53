//! Membership, beneficiary, formation and registration persistence.
//!
//! # Responsibility
//! - Store household accounts with their beneficiaries and renewals.
//! - Own the beneficiary formation set with replace semantics.
//!
//! # Invariants
//! - A membership is created together with its main beneficiary.
//! - Beneficiary formation sets are replaced in a single transaction.
//! - Registrations are listed by `date ASC, created_at ASC, id ASC`.

use super::{
    bool_to_int, ensure_connection_ready, map_write_error, parse_bool, parse_optional_uuid,
    parse_uuid, RepoError, RepoResult,
};
use crate::model::membership::{
    Beneficiary, BeneficiaryId, Formation, FormationId, Membership, MembershipId, PaymentMode,
    Registration,
};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::collections::BTreeSet;

const MEMBERSHIP_SELECT_SQL: &str = "SELECT
    id,
    member_number,
    withdrawn,
    frozen,
    frozen_change,
    first_shift_date,
    main_beneficiary_id,
    created_at
FROM memberships";

const BENEFICIARY_SELECT_SQL: &str = "SELECT
    id,
    membership_id,
    first_name,
    last_name,
    email,
    phone
FROM beneficiaries";

const REGISTRATION_SELECT_SQL: &str = "SELECT
    id,
    membership_id,
    date,
    amount_cents,
    mode,
    created_at
FROM registrations";

/// Repository interface for memberships and their beneficiaries.
pub trait MemberRepository {
    /// Inserts a membership and its main beneficiary atomically.
    fn create_membership(&self, membership: &Membership, main: &Beneficiary) -> RepoResult<()>;
    fn update_membership(&self, membership: &Membership) -> RepoResult<()>;
    fn get_membership(&self, id: MembershipId) -> RepoResult<Option<Membership>>;
    fn get_membership_by_number(&self, member_number: i64) -> RepoResult<Option<Membership>>;
    /// Lists memberships ordered by member number.
    fn list_memberships(&self, include_withdrawn: bool) -> RepoResult<Vec<Membership>>;

    fn create_beneficiary(&self, beneficiary: &Beneficiary) -> RepoResult<()>;
    /// Updates identity fields; the formation set is left untouched.
    fn update_beneficiary(&self, beneficiary: &Beneficiary) -> RepoResult<()>;
    fn get_beneficiary(&self, id: BeneficiaryId) -> RepoResult<Option<Beneficiary>>;
    fn list_beneficiaries(&self, membership_id: MembershipId) -> RepoResult<Vec<Beneficiary>>;
    /// Replaces the whole formation set of one beneficiary.
    fn set_formations(
        &self,
        beneficiary_id: BeneficiaryId,
        formations: &BTreeSet<FormationId>,
    ) -> RepoResult<()>;

    fn create_formation(&self, formation: &Formation) -> RepoResult<()>;
    fn get_formation(&self, id: FormationId) -> RepoResult<Option<Formation>>;
    fn list_formations(&self) -> RepoResult<Vec<Formation>>;

    fn create_registration(&self, registration: &Registration) -> RepoResult<()>;
    fn list_registrations(&self, membership_id: MembershipId) -> RepoResult<Vec<Registration>>;
    fn last_registration(&self, membership_id: MembershipId) -> RepoResult<Option<Registration>>;
}

/// SQLite-backed member repository.
pub struct SqliteMemberRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteMemberRepository<'conn> {
    /// Creates repository from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(
            conn,
            &[
                "memberships",
                "beneficiaries",
                "formations",
                "beneficiary_formations",
                "registrations",
            ],
        )?;
        Ok(Self { conn })
    }
}

impl MemberRepository for SqliteMemberRepository<'_> {
    fn create_membership(&self, membership: &Membership, main: &Beneficiary) -> RepoResult<()> {
        membership.validate()?;
        main.validate()?;
        if main.membership_id != membership.id {
            return Err(RepoError::InvalidData(format!(
                "main beneficiary {} belongs to another membership",
                main.id
            )));
        }

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO memberships (
                id,
                member_number,
                withdrawn,
                frozen,
                frozen_change,
                first_shift_date,
                main_beneficiary_id,
                created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
            params![
                membership.id.to_string(),
                membership.member_number,
                bool_to_int(membership.withdrawn),
                bool_to_int(membership.frozen),
                bool_to_int(membership.frozen_change),
                membership.first_shift_date,
                main.id.to_string(),
                membership.created_at,
            ],
        )
        .map_err(|err| map_write_error(err, "membership number"))?;
        insert_beneficiary(&tx, main)?;
        tx.commit()?;
        Ok(())
    }

    fn update_membership(&self, membership: &Membership) -> RepoResult<()> {
        membership.validate()?;

        let changed = self
            .conn
            .execute(
                "UPDATE memberships
                 SET
                    member_number = ?2,
                    withdrawn = ?3,
                    frozen = ?4,
                    frozen_change = ?5,
                    first_shift_date = ?6,
                    main_beneficiary_id = ?7
                 WHERE id = ?1;",
                params![
                    membership.id.to_string(),
                    membership.member_number,
                    bool_to_int(membership.withdrawn),
                    bool_to_int(membership.frozen),
                    bool_to_int(membership.frozen_change),
                    membership.first_shift_date,
                    membership.main_beneficiary_id.map(|id| id.to_string()),
                ],
            )
            .map_err(|err| map_write_error(err, "membership number"))?;

        if changed == 0 {
            return Err(RepoError::NotFound {
                record: "membership",
                id: membership.id,
            });
        }
        Ok(())
    }

    fn get_membership(&self, id: MembershipId) -> RepoResult<Option<Membership>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{MEMBERSHIP_SELECT_SQL} WHERE id = ?1;"))?;
        let mut rows = stmt.query([id.to_string()])?;
        match rows.next()? {
            Some(row) => Ok(Some(parse_membership_row(row)?)),
            None => Ok(None),
        }
    }

    fn get_membership_by_number(&self, member_number: i64) -> RepoResult<Option<Membership>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{MEMBERSHIP_SELECT_SQL} WHERE member_number = ?1;"))?;
        let mut rows = stmt.query([member_number])?;
        match rows.next()? {
            Some(row) => Ok(Some(parse_membership_row(row)?)),
            None => Ok(None),
        }
    }

    fn list_memberships(&self, include_withdrawn: bool) -> RepoResult<Vec<Membership>> {
        let mut stmt = self.conn.prepare(&format!(
            "{MEMBERSHIP_SELECT_SQL}
             WHERE (?1 = 1 OR withdrawn = 0)
             ORDER BY member_number ASC;"
        ))?;
        let mut rows = stmt.query([bool_to_int(include_withdrawn)])?;
        let mut memberships = Vec::new();
        while let Some(row) = rows.next()? {
            memberships.push(parse_membership_row(row)?);
        }
        Ok(memberships)
    }

    fn create_beneficiary(&self, beneficiary: &Beneficiary) -> RepoResult<()> {
        beneficiary.validate()?;
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        insert_beneficiary(&tx, beneficiary)?;
        tx.commit()?;
        Ok(())
    }

    fn update_beneficiary(&self, beneficiary: &Beneficiary) -> RepoResult<()> {
        beneficiary.validate()?;

        let changed = self
            .conn
            .execute(
                "UPDATE beneficiaries
                 SET
                    first_name = ?2,
                    last_name = ?3,
                    email = ?4,
                    phone = ?5
                 WHERE id = ?1;",
                params![
                    beneficiary.id.to_string(),
                    beneficiary.first_name.as_str(),
                    beneficiary.last_name.as_str(),
                    beneficiary.email.as_str(),
                    beneficiary.phone.as_deref(),
                ],
            )
            .map_err(|err| map_write_error(err, "beneficiary email"))?;

        if changed == 0 {
            return Err(RepoError::NotFound {
                record: "beneficiary",
                id: beneficiary.id,
            });
        }
        Ok(())
    }

    fn get_beneficiary(&self, id: BeneficiaryId) -> RepoResult<Option<Beneficiary>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{BENEFICIARY_SELECT_SQL} WHERE id = ?1;"))?;
        let mut rows = stmt.query([id.to_string()])?;
        match rows.next()? {
            Some(row) => {
                let mut beneficiary = parse_beneficiary_row(row)?;
                beneficiary.formations = load_formations(self.conn, beneficiary.id)?;
                Ok(Some(beneficiary))
            }
            None => Ok(None),
        }
    }

    fn list_beneficiaries(&self, membership_id: MembershipId) -> RepoResult<Vec<Beneficiary>> {
        let mut stmt = self.conn.prepare(&format!(
            "{BENEFICIARY_SELECT_SQL}
             WHERE membership_id = ?1
             ORDER BY last_name COLLATE NOCASE ASC, first_name COLLATE NOCASE ASC, id ASC;"
        ))?;
        let mut rows = stmt.query([membership_id.to_string()])?;
        let mut beneficiaries = Vec::new();
        while let Some(row) = rows.next()? {
            let mut beneficiary = parse_beneficiary_row(row)?;
            beneficiary.formations = load_formations(self.conn, beneficiary.id)?;
            beneficiaries.push(beneficiary);
        }
        Ok(beneficiaries)
    }

    fn set_formations(
        &self,
        beneficiary_id: BeneficiaryId,
        formations: &BTreeSet<FormationId>,
    ) -> RepoResult<()> {
        let id_text = beneficiary_id.to_string();
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let exists: i64 = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM beneficiaries WHERE id = ?1);",
            [id_text.as_str()],
            |row| row.get(0),
        )?;
        if exists == 0 {
            return Err(RepoError::NotFound {
                record: "beneficiary",
                id: beneficiary_id,
            });
        }

        tx.execute(
            "DELETE FROM beneficiary_formations WHERE beneficiary_id = ?1;",
            [id_text.as_str()],
        )?;
        for formation_id in formations {
            tx.execute(
                "INSERT INTO beneficiary_formations (beneficiary_id, formation_id)
                 VALUES (?1, ?2);",
                params![id_text.as_str(), formation_id.to_string()],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn create_formation(&self, formation: &Formation) -> RepoResult<()> {
        if formation.name.is_empty() {
            return Err(RepoError::Validation(
                crate::model::ValidationError::BlankField("formation.name"),
            ));
        }
        self.conn
            .execute(
                "INSERT INTO formations (id, name) VALUES (?1, ?2);",
                params![formation.id.to_string(), formation.name.as_str()],
            )
            .map_err(|err| map_write_error(err, "formation name"))?;
        Ok(())
    }

    fn get_formation(&self, id: FormationId) -> RepoResult<Option<Formation>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, name FROM formations WHERE id = ?1;",
                [id.to_string()],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;
        match row {
            Some((id_text, name)) => Ok(Some(Formation {
                id: parse_uuid(&id_text, "formations.id")?,
                name,
            })),
            None => Ok(None),
        }
    }

    fn list_formations(&self) -> RepoResult<Vec<Formation>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name FROM formations ORDER BY name COLLATE NOCASE ASC;")?;
        let mut rows = stmt.query([])?;
        let mut formations = Vec::new();
        while let Some(row) = rows.next()? {
            let id_text: String = row.get("id")?;
            formations.push(Formation {
                id: parse_uuid(&id_text, "formations.id")?,
                name: row.get("name")?,
            });
        }
        Ok(formations)
    }

    fn create_registration(&self, registration: &Registration) -> RepoResult<()> {
        registration.validate()?;
        self.conn.execute(
            "INSERT INTO registrations (
                id,
                membership_id,
                date,
                amount_cents,
                mode,
                created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
            params![
                registration.id.to_string(),
                registration.membership_id.to_string(),
                registration.date,
                registration.amount_cents,
                registration.mode.as_str(),
                registration.created_at,
            ],
        )?;
        Ok(())
    }

    fn list_registrations(&self, membership_id: MembershipId) -> RepoResult<Vec<Registration>> {
        let mut stmt = self.conn.prepare(&format!(
            "{REGISTRATION_SELECT_SQL}
             WHERE membership_id = ?1
             ORDER BY date ASC, created_at ASC, id ASC;"
        ))?;
        let mut rows = stmt.query([membership_id.to_string()])?;
        let mut registrations = Vec::new();
        while let Some(row) = rows.next()? {
            registrations.push(parse_registration_row(row)?);
        }
        Ok(registrations)
    }

    fn last_registration(&self, membership_id: MembershipId) -> RepoResult<Option<Registration>> {
        let mut stmt = self.conn.prepare(&format!(
            "{REGISTRATION_SELECT_SQL}
             WHERE membership_id = ?1
             ORDER BY date DESC, created_at DESC, id DESC
             LIMIT 1;"
        ))?;
        let mut rows = stmt.query([membership_id.to_string()])?;
        match rows.next()? {
            Some(row) => Ok(Some(parse_registration_row(row)?)),
            None => Ok(None),
        }
    }
}

fn insert_beneficiary(tx: &Transaction<'_>, beneficiary: &Beneficiary) -> RepoResult<()> {
    tx.execute(
        "INSERT INTO beneficiaries (
            id,
            membership_id,
            first_name,
            last_name,
            email,
            phone
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
        params![
            beneficiary.id.to_string(),
            beneficiary.membership_id.to_string(),
            beneficiary.first_name.as_str(),
            beneficiary.last_name.as_str(),
            beneficiary.email.as_str(),
            beneficiary.phone.as_deref(),
        ],
    )
    .map_err(|err| map_write_error(err, "beneficiary email"))?;

    for formation_id in &beneficiary.formations {
        tx.execute(
            "INSERT INTO beneficiary_formations (beneficiary_id, formation_id)
             VALUES (?1, ?2);",
            params![beneficiary.id.to_string(), formation_id.to_string()],
        )?;
    }
    Ok(())
}

fn load_formations(
    conn: &Connection,
    beneficiary_id: BeneficiaryId,
) -> RepoResult<BTreeSet<FormationId>> {
    let mut stmt = conn.prepare(
        "SELECT formation_id
         FROM beneficiary_formations
         WHERE beneficiary_id = ?1;",
    )?;
    let mut rows = stmt.query([beneficiary_id.to_string()])?;
    let mut formations = BTreeSet::new();
    while let Some(row) = rows.next()? {
        let value: String = row.get(0)?;
        formations.insert(parse_uuid(&value, "beneficiary_formations.formation_id")?);
    }
    Ok(formations)
}

fn parse_membership_row(row: &Row<'_>) -> RepoResult<Membership> {
    let id_text: String = row.get("id")?;
    let membership = Membership {
        id: parse_uuid(&id_text, "memberships.id")?,
        member_number: row.get("member_number")?,
        withdrawn: parse_bool(row.get("withdrawn")?, "memberships.withdrawn")?,
        frozen: parse_bool(row.get("frozen")?, "memberships.frozen")?,
        frozen_change: parse_bool(row.get("frozen_change")?, "memberships.frozen_change")?,
        first_shift_date: row.get("first_shift_date")?,
        main_beneficiary_id: parse_optional_uuid(
            row.get("main_beneficiary_id")?,
            "memberships.main_beneficiary_id",
        )?,
        created_at: row.get("created_at")?,
    };
    membership.validate()?;
    Ok(membership)
}

fn parse_beneficiary_row(row: &Row<'_>) -> RepoResult<Beneficiary> {
    let id_text: String = row.get("id")?;
    let membership_text: String = row.get("membership_id")?;
    Ok(Beneficiary {
        id: parse_uuid(&id_text, "beneficiaries.id")?,
        membership_id: parse_uuid(&membership_text, "beneficiaries.membership_id")?,
        first_name: row.get("first_name")?,
        last_name: row.get("last_name")?,
        email: row.get("email")?,
        phone: row.get("phone")?,
        formations: BTreeSet::new(),
    })
}

fn parse_registration_row(row: &Row<'_>) -> RepoResult<Registration> {
    let id_text: String = row.get("id")?;
    let membership_text: String = row.get("membership_id")?;
    let mode_text: String = row.get("mode")?;
    let mode = PaymentMode::parse(&mode_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid payment mode `{mode_text}` in registrations.mode"
        ))
    })?;
    Ok(Registration {
        id: parse_uuid(&id_text, "registrations.id")?,
        membership_id: parse_uuid(&membership_text, "registrations.membership_id")?,
        date: row.get("date")?,
        amount_cents: row.get("amount_cents")?,
        mode,
        created_at: row.get("created_at")?,
    })
}
