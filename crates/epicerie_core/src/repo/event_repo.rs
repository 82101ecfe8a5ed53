//! General-assembly event and vote proxy persistence.
//!
//! # Invariants
//! - Events are listed by `date ASC, id ASC`.
//! - Proxies are listed by `created_at ASC, id ASC`, so the oldest pending
//!   entry of a side comes first.

use super::{ensure_connection_ready, parse_optional_uuid, parse_uuid, RepoError, RepoResult};
use crate::model::event::{Event, EventId, Proxy, ProxyId};
use rusqlite::{params, Connection, Row};

const EVENT_SELECT_SQL: &str = "SELECT
    id,
    title,
    date,
    min_registration_date,
    created_at
FROM events";

const PROXY_SELECT_SQL: &str = "SELECT
    id,
    event_id,
    giver_id,
    owner_id,
    created_at
FROM proxies";

pub trait EventRepository {
    fn create_event(&self, event: &Event) -> RepoResult<()>;
    fn get_event(&self, id: EventId) -> RepoResult<Option<Event>>;
    fn list_events(&self) -> RepoResult<Vec<Event>>;

    fn create_proxy(&self, proxy: &Proxy) -> RepoResult<()>;
    /// Writes both sides of an existing proxy.
    fn update_proxy(&self, proxy: &Proxy) -> RepoResult<()>;
    fn delete_proxy(&self, id: ProxyId) -> RepoResult<()>;
    fn get_proxy(&self, id: ProxyId) -> RepoResult<Option<Proxy>>;
    fn list_proxies(&self, event_id: EventId) -> RepoResult<Vec<Proxy>>;
}

/// SQLite-backed event repository.
pub struct SqliteEventRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteEventRepository<'conn> {
    /// Creates repository from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn, &["events", "proxies"])?;
        Ok(Self { conn })
    }
}

impl EventRepository for SqliteEventRepository<'_> {
    fn create_event(&self, event: &Event) -> RepoResult<()> {
        event.validate()?;
        self.conn.execute(
            "INSERT INTO events (id, title, date, min_registration_date, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5);",
            params![
                event.id.to_string(),
                event.title.as_str(),
                event.date,
                event.min_registration_date,
                event.created_at,
            ],
        )?;
        Ok(())
    }

    fn get_event(&self, id: EventId) -> RepoResult<Option<Event>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{EVENT_SELECT_SQL} WHERE id = ?1;"))?;
        let mut rows = stmt.query([id.to_string()])?;
        match rows.next()? {
            Some(row) => Ok(Some(parse_event_row(row)?)),
            None => Ok(None),
        }
    }

    fn list_events(&self) -> RepoResult<Vec<Event>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{EVENT_SELECT_SQL} ORDER BY date ASC, id ASC;"))?;
        let mut rows = stmt.query([])?;
        let mut events = Vec::new();
        while let Some(row) = rows.next()? {
            events.push(parse_event_row(row)?);
        }
        Ok(events)
    }

    fn create_proxy(&self, proxy: &Proxy) -> RepoResult<()> {
        ensure_proxy_has_side(proxy)?;
        self.conn.execute(
            "INSERT INTO proxies (id, event_id, giver_id, owner_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5);",
            params![
                proxy.id.to_string(),
                proxy.event_id.to_string(),
                proxy.giver_id.map(|id| id.to_string()),
                proxy.owner_id.map(|id| id.to_string()),
                proxy.created_at,
            ],
        )?;
        Ok(())
    }

    fn update_proxy(&self, proxy: &Proxy) -> RepoResult<()> {
        ensure_proxy_has_side(proxy)?;
        let changed = self.conn.execute(
            "UPDATE proxies SET giver_id = ?2, owner_id = ?3 WHERE id = ?1;",
            params![
                proxy.id.to_string(),
                proxy.giver_id.map(|id| id.to_string()),
                proxy.owner_id.map(|id| id.to_string()),
            ],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound {
                record: "proxy",
                id: proxy.id,
            });
        }
        Ok(())
    }

    fn delete_proxy(&self, id: ProxyId) -> RepoResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM proxies WHERE id = ?1;", [id.to_string()])?;
        if changed == 0 {
            return Err(RepoError::NotFound { record: "proxy", id });
        }
        Ok(())
    }

    fn get_proxy(&self, id: ProxyId) -> RepoResult<Option<Proxy>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{PROXY_SELECT_SQL} WHERE id = ?1;"))?;
        let mut rows = stmt.query([id.to_string()])?;
        match rows.next()? {
            Some(row) => Ok(Some(parse_proxy_row(row)?)),
            None => Ok(None),
        }
    }

    fn list_proxies(&self, event_id: EventId) -> RepoResult<Vec<Proxy>> {
        let mut stmt = self.conn.prepare(&format!(
            "{PROXY_SELECT_SQL}
             WHERE event_id = ?1
             ORDER BY created_at ASC, id ASC;"
        ))?;
        let mut rows = stmt.query([event_id.to_string()])?;
        let mut proxies = Vec::new();
        while let Some(row) = rows.next()? {
            proxies.push(parse_proxy_row(row)?);
        }
        Ok(proxies)
    }
}

fn ensure_proxy_has_side(proxy: &Proxy) -> RepoResult<()> {
    if proxy.giver_id.is_none() && proxy.owner_id.is_none() {
        return Err(RepoError::InvalidData(format!(
            "proxy {} has neither giver nor owner",
            proxy.id
        )));
    }
    Ok(())
}

fn parse_event_row(row: &Row<'_>) -> RepoResult<Event> {
    let id_text: String = row.get("id")?;
    Ok(Event {
        id: parse_uuid(&id_text, "events.id")?,
        title: row.get("title")?,
        date: row.get("date")?,
        min_registration_date: row.get("min_registration_date")?,
        created_at: row.get("created_at")?,
    })
}

fn parse_proxy_row(row: &Row<'_>) -> RepoResult<Proxy> {
    let id_text: String = row.get("id")?;
    let event_text: String = row.get("event_id")?;
    Ok(Proxy {
        id: parse_uuid(&id_text, "proxies.id")?,
        event_id: parse_uuid(&event_text, "proxies.event_id")?,
        giver_id: parse_optional_uuid(row.get("giver_id")?, "proxies.giver_id")?,
        owner_id: parse_optional_uuid(row.get("owner_id")?, "proxies.owner_id")?,
        created_at: row.get("created_at")?,
    })
}
