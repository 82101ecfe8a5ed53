//! SQLite FTS5-based beneficiary search.
//!
//! # Responsibility
//! - Find beneficiaries by first name, last name or email prefix.
//! - Return typed hits with the owning membership number.
//!
//! # Invariants
//! - Every query term must match (terms are AND-joined prefixes).
//! - Result ordering is deterministic: rank, last name, beneficiary id.

use crate::db::DbError;
use crate::model::membership::{BeneficiaryId, MembershipId};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, Row};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub type SearchResult<T> = Result<T, SearchError>;

#[derive(Debug)]
pub enum SearchError {
    /// Query cannot be parsed by FTS5 syntax.
    InvalidQuery {
        query: String,
        message: String,
    },
    Db(DbError),
    InvalidData(String),
}

impl Display for SearchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidQuery { query, message } => {
                write!(f, "invalid full-text query `{query}`: {message}")
            }
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid search row: {message}"),
        }
    }
}

impl Error for SearchError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for SearchError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for SearchError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

#[derive(Debug, Clone)]
pub struct BeneficiaryQuery {
    pub text: String,
    /// Include beneficiaries of withdrawn memberships.
    pub include_withdrawn: bool,
    pub limit: u32,
}

impl BeneficiaryQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            include_withdrawn: false,
            limit: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeneficiaryHit {
    pub beneficiary_id: BeneficiaryId,
    pub membership_id: MembershipId,
    pub member_number: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

impl BeneficiaryHit {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Searches beneficiaries via FTS5. Blank queries return no hits.
pub fn search_beneficiaries(
    conn: &Connection,
    query: &BeneficiaryQuery,
) -> SearchResult<Vec<BeneficiaryHit>> {
    let Some(match_expr) = build_match_expression(&query.text) else {
        return Ok(Vec::new());
    };
    if query.limit == 0 {
        return Ok(Vec::new());
    }

    let mut sql = String::from(
        "SELECT
            beneficiaries.id AS id,
            beneficiaries.membership_id AS membership_id,
            memberships.member_number AS member_number,
            beneficiaries.first_name AS first_name,
            beneficiaries.last_name AS last_name,
            beneficiaries.email AS email
         FROM beneficiaries_fts
         JOIN beneficiaries ON beneficiaries.rowid = beneficiaries_fts.rowid
         JOIN memberships ON memberships.id = beneficiaries.membership_id
         WHERE beneficiaries_fts MATCH ?",
    );
    let mut bind_values = vec![Value::Text(match_expr.clone())];

    if !query.include_withdrawn {
        sql.push_str(" AND memberships.withdrawn = 0");
    }
    sql.push_str(
        " ORDER BY bm25(beneficiaries_fts), beneficiaries.last_name COLLATE NOCASE ASC, beneficiaries.id ASC LIMIT ?",
    );
    bind_values.push(Value::Integer(i64::from(query.limit)));

    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt
        .query(params_from_iter(bind_values))
        .map_err(|err| map_query_error(err, &match_expr))?;
    let mut hits = Vec::new();
    while let Some(row) = rows
        .next()
        .map_err(|err| map_query_error(err, &match_expr))?
    {
        hits.push(parse_hit(row)?);
    }
    Ok(hits)
}

fn parse_hit(row: &Row<'_>) -> SearchResult<BeneficiaryHit> {
    let id_text: String = row.get("id")?;
    let membership_text: String = row.get("membership_id")?;
    Ok(BeneficiaryHit {
        beneficiary_id: parse_uuid(&id_text)?,
        membership_id: parse_uuid(&membership_text)?,
        member_number: row.get("member_number")?,
        first_name: row.get("first_name")?,
        last_name: row.get("last_name")?,
        email: row.get("email")?,
    })
}

fn parse_uuid(value: &str) -> SearchResult<Uuid> {
    Uuid::parse_str(value).map_err(|_| SearchError::InvalidData(format!("invalid uuid `{value}`")))
}

fn build_match_expression(text: &str) -> Option<String> {
    let terms = text
        .split_whitespace()
        .map(prefix_term)
        .collect::<Vec<_>>();
    if terms.is_empty() {
        return None;
    }
    Some(terms.join(" AND "))
}

fn prefix_term(raw: &str) -> String {
    let escaped = raw.replace('"', "\"\"");
    format!("\"{escaped}\"*")
}

fn map_query_error(err: rusqlite::Error, query: &str) -> SearchError {
    if is_match_syntax_error(&err) {
        return SearchError::InvalidQuery {
            query: query.to_string(),
            message: err.to_string(),
        };
    }
    SearchError::Db(DbError::Sqlite(err))
}

fn is_match_syntax_error(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(_, Some(message)) => {
            let msg = message.to_lowercase();
            (msg.contains("fts5") && msg.contains("syntax"))
                || msg.contains("malformed match expression")
                || msg.contains("unterminated")
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::build_match_expression;

    #[test]
    fn terms_are_quoted_prefixes_joined_with_and() {
        assert_eq!(
            build_match_expression("  dur  cam "),
            Some("\"dur\"* AND \"cam\"*".to_string())
        );
        assert_eq!(
            build_match_expression("o\"neil"),
            Some("\"o\"\"neil\"*".to_string())
        );
        assert_eq!(build_match_expression("   "), None);
    }
}
