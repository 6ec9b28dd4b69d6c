//! SQLite-backed event store.
//!
//! Append-only tables for raw events and registrations behind a single
//! shared connection. WAL mode keeps concurrent reads cheap while a batch
//! write is in flight; batch inserts run in one transaction so a failure
//! mid-batch persists nothing.

use crate::models::{EventRow, NewEvent, NewRegistration, Registration, RegistrationRow};
use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags};
use std::sync::Arc;
use tracing::{info, warn};

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    received_at TEXT NOT NULL,
    client_ts TEXT,
    campaign_id TEXT,
    game_id TEXT,
    session_id TEXT,
    anonymous_user_id TEXT,
    event_name TEXT NOT NULL,
    props TEXT
);
CREATE INDEX IF NOT EXISTS idx_events_event_ts ON events(event_name, client_ts);
CREATE INDEX IF NOT EXISTS idx_events_campaign ON events(campaign_id);
CREATE INDEX IF NOT EXISTS idx_events_game ON events(game_id);
CREATE INDEX IF NOT EXISTS idx_events_session ON events(session_id);

CREATE TABLE IF NOT EXISTS registrations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    created_at TEXT NOT NULL,
    session_id TEXT,
    campaign_id TEXT,
    game_id TEXT,
    name TEXT NOT NULL,
    email TEXT NOT NULL,
    phone TEXT NOT NULL,
    score INTEGER,
    duration_ms INTEGER
);
CREATE INDEX IF NOT EXISTS idx_regs_created ON registrations(created_at);
CREATE INDEX IF NOT EXISTS idx_regs_campaign ON registrations(campaign_id);
CREATE INDEX IF NOT EXISTS idx_regs_game ON registrations(game_id);
"#;

/// Shared store handle. Opened once at process start, passed explicitly to
/// every service that needs it.
pub struct EventStore {
    conn: Arc<Mutex<Connection>>,
}

impl EventStore {
    pub fn new(db_path: &str) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX; // serialized behind our own mutex

        let conn = Connection::open_with_flags(db_path, flags)
            .with_context(|| format!("Failed to open database at {}", db_path))?;

        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize database schema")?;

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap_or_default();
        if journal_mode.to_lowercase() != "wal" {
            warn!("WAL mode not active, journal_mode = {}", journal_mode);
        }

        let events: i64 = conn
            .query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))
            .unwrap_or(0);
        let regs: i64 = conn
            .query_row("SELECT COUNT(*) FROM registrations", [], |row| row.get(0))
            .unwrap_or(0);
        info!(
            "Database ready at {} ({} events, {} registrations)",
            db_path, events, regs
        );

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Insert a batch of events in a single transaction. All rows share the
    /// same server-side `received_at` timestamp. All-or-nothing: if any
    /// insert fails the transaction rolls back on drop.
    pub fn insert_events(&self, received_at: &str, events: &[NewEvent]) -> Result<usize> {
        if events.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO events
                 (received_at, client_ts, campaign_id, game_id, session_id, anonymous_user_id, event_name, props)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for e in events {
                stmt.execute(params![
                    received_at,
                    e.client_ts,
                    e.campaign_id,
                    e.game_id,
                    e.session_id,
                    e.anonymous_user_id,
                    e.event_name,
                    e.props,
                ])?;
            }
        }
        tx.commit().context("Failed to commit event batch")?;

        Ok(events.len())
    }

    pub fn insert_registration(&self, created_at: &str, reg: &NewRegistration) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO registrations
             (created_at, session_id, campaign_id, game_id, name, email, phone, score, duration_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                created_at,
                reg.session_id,
                reg.campaign_id,
                reg.game_id,
                reg.name,
                reg.email,
                reg.phone,
                reg.score,
                reg.duration_ms,
            ],
        )
        .context("Failed to insert registration")?;

        Ok(())
    }

    /// Most recent registrations, newest first.
    pub fn recent_registrations(&self, limit: usize) -> Result<Vec<Registration>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, created_at, session_id, campaign_id, game_id, name, email, phone, score, duration_ms
             FROM registrations
             ORDER BY datetime(created_at) DESC
             LIMIT ?1",
        )?;

        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok(Registration {
                    id: row.get(0)?,
                    created_at: row.get(1)?,
                    session_id: row.get(2)?,
                    campaign_id: row.get(3)?,
                    game_id: row.get(4)?,
                    name: row.get(5)?,
                    email: row.get(6)?,
                    phone: row.get(7)?,
                    score: row.get(8)?,
                    duration_ms: row.get(9)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    /// Events with a client timestamp at or after `since` (RFC3339).
    /// Rows without a client timestamp never participate in stats.
    pub fn events_since(&self, since: &str) -> Result<Vec<EventRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT event_name, client_ts, campaign_id, game_id
             FROM events
             WHERE client_ts IS NOT NULL AND client_ts >= ?1",
        )?;

        let rows = stmt
            .query_map(params![since], |row| {
                Ok(EventRow {
                    event_name: row.get(0)?,
                    client_ts: row.get(1)?,
                    campaign_id: row.get(2)?,
                    game_id: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    /// Registrations created at or after `since` (RFC3339, server clock).
    pub fn registrations_since(&self, since: &str) -> Result<Vec<RegistrationRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT created_at, campaign_id, game_id
             FROM registrations
             WHERE created_at >= ?1",
        )?;

        let rows = stmt
            .query_map(params![since], |row| {
                Ok(RegistrationRow {
                    created_at: row.get(0)?,
                    campaign_id: row.get(1)?,
                    game_id: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    /// Distinct non-empty campaign ids ever seen in events, sorted.
    pub fn distinct_campaigns(&self) -> Result<Vec<String>> {
        self.distinct_event_column("campaign_id")
    }

    /// Distinct non-empty game ids ever seen in events, sorted.
    pub fn distinct_games(&self) -> Result<Vec<String>> {
        self.distinct_event_column("game_id")
    }

    fn distinct_event_column(&self, column: &str) -> Result<Vec<String>> {
        // `column` is one of two compile-time constants, never user input.
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT DISTINCT {col} FROM events
             WHERE {col} IS NOT NULL AND {col} != ''
             ORDER BY {col}",
            col = column
        );
        let mut stmt = conn.prepare(&sql)?;
        let values = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(values)
    }

    #[cfg(test)]
    pub fn event_count(&self) -> Result<i64> {
        let conn = self.conn.lock();
        let count = conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
        Ok(count)
    }
}
