//! SQLite record backend.
//!
//! Stores encrypted credential rows in a single `oauth_tokens` table.

use super::backend::{RecordBackend, RecordFilter, RecordTx};
use super::CredentialRecord;
use crate::error::StoreError;
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, ErrorCode, TransactionBehavior};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

const COLUMNS: &str = "id, user_id, email, access_token, refresh_token, token_type, expiry";

/// Durable record backend backed by SQLite.
///
/// # Schema
/// ```sql
/// CREATE TABLE oauth_tokens (
///     id TEXT PRIMARY KEY,          -- ULID, 26 chars
///     user_id TEXT NOT NULL,
///     email TEXT NOT NULL,
///     access_token TEXT NOT NULL,   -- Encrypted
///     refresh_token TEXT,           -- Encrypted (optional)
///     token_type TEXT NOT NULL,
///     expiry TEXT,                  -- RFC 3339 timestamp (optional)
///     UNIQUE(user_id, email)
/// );
/// ```
///
/// # Thread Safety
/// - Connection is wrapped in Mutex for safe concurrent access
/// - Write transactions start `IMMEDIATE`, so two processes sharing the
///   file cannot interleave a lookup and an insert for the same key
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Creates or opens a database file. `":memory:"` gives a private
    /// in-memory database.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path)?;
        Self::from_connection(conn)
    }

    /// Wraps an existing connection, creating the schema if needed.
    pub fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        // Writers from other connections wait instead of failing with SQLITE_BUSY
        conn.busy_timeout(Duration::from_secs(5))?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS oauth_tokens (
                id TEXT PRIMARY KEY NOT NULL,
                user_id TEXT NOT NULL,
                email TEXT NOT NULL,
                access_token TEXT NOT NULL,
                refresh_token TEXT,
                token_type TEXT NOT NULL,
                expiry TEXT,
                UNIQUE(user_id, email)
            )
            "#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_oauth_tokens_user ON oauth_tokens(user_id)",
            [],
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn run<T, E, F>(&self, behavior: TransactionBehavior, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn RecordTx) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        let tx = conn
            .transaction_with_behavior(behavior)
            .map_err(StoreError::from)?;

        // Dropping `tx` without commit rolls back
        let result = f(&mut SqliteTx { conn: &*tx })?;

        tx.commit().map_err(StoreError::from)?;
        Ok(result)
    }
}

impl RecordBackend for SqliteBackend {
    fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn RecordTx) -> Result<T, E>,
        E: From<StoreError>,
    {
        self.run(TransactionBehavior::Immediate, f)
    }

    fn read<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn RecordTx) -> Result<T, E>,
        E: From<StoreError>,
    {
        self.run(TransactionBehavior::Deferred, f)
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}

struct SqliteTx<'a> {
    conn: &'a Connection,
}

/// Builds the WHERE clause and its bound values for a filter.
fn where_clause<'a>(filter: &RecordFilter<'a>) -> (&'static str, Vec<&'a str>) {
    match filter.email {
        Some(email) => ("user_id = ?1 AND email = ?2", vec![filter.user_id, email]),
        None => ("user_id = ?1", vec![filter.user_id]),
    }
}

/// Raw column values, before timestamp parsing.
type RawRow = (String, String, String, String, Option<String>, String, Option<String>);

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn into_record(raw: RawRow) -> Result<CredentialRecord, StoreError> {
    let (id, user_id, email, access_token, refresh_token, token_type, expiry) = raw;

    let expiry = expiry
        .map(|s| DateTime::parse_from_rfc3339(&s).map(|dt| dt.with_timezone(&Utc)))
        .transpose()
        .map_err(|e| StoreError::InvalidRow(format!("record {}: bad expiry: {}", id, e)))?;

    Ok(CredentialRecord {
        id,
        user_id,
        email,
        access_token,
        refresh_token,
        token_type,
        expiry,
    })
}

impl RecordTx for SqliteTx<'_> {
    fn find_one(&mut self, filter: &RecordFilter<'_>) -> Result<Option<CredentialRecord>, StoreError> {
        let (clause, args) = where_clause(filter);
        let sql = format!(
            "SELECT {} FROM oauth_tokens WHERE {} ORDER BY rowid LIMIT 1",
            COLUMNS, clause
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(args.iter()))?;

        match rows.next()? {
            Some(row) => Ok(Some(into_record(read_row(row)?)?)),
            None => Ok(None),
        }
    }

    fn find_all(&mut self, filter: &RecordFilter<'_>) -> Result<Vec<CredentialRecord>, StoreError> {
        let (clause, args) = where_clause(filter);
        let sql = format!(
            "SELECT {} FROM oauth_tokens WHERE {} ORDER BY rowid",
            COLUMNS, clause
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let raw = stmt
            .query_map(params_from_iter(args.iter()), read_row)?
            .collect::<Result<Vec<RawRow>, _>>()?;

        raw.into_iter().map(into_record).collect()
    }

    fn count(&mut self, filter: &RecordFilter<'_>) -> Result<u64, StoreError> {
        let (clause, args) = where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM oauth_tokens WHERE {}", clause);

        let count: i64 = self
            .conn
            .query_row(&sql, params_from_iter(args.iter()), |row| row.get(0))?;

        Ok(count as u64)
    }

    fn insert(&mut self, record: &CredentialRecord) -> Result<(), StoreError> {
        let result = self.conn.execute(
            &format!(
                "INSERT INTO oauth_tokens ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                COLUMNS
            ),
            params![
                record.id,
                record.user_id,
                record.email,
                record.access_token,
                record.refresh_token,
                record.token_type,
                record.expiry.map(|dt| dt.to_rfc3339()),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Err(StoreError::Duplicate {
                    user_id: record.user_id.clone(),
                    email: record.email.clone(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn update(&mut self, record: &CredentialRecord) -> Result<(), StoreError> {
        let rows = self.conn.execute(
            r#"
            UPDATE oauth_tokens SET
                access_token = ?2,
                refresh_token = ?3,
                token_type = ?4,
                expiry = ?5
            WHERE id = ?1
            "#,
            params![
                record.id,
                record.access_token,
                record.refresh_token,
                record.token_type,
                record.expiry.map(|dt| dt.to_rfc3339()),
            ],
        )?;

        if rows == 0 {
            return Err(StoreError::MissingRecord(record.id.clone()));
        }
        Ok(())
    }

    fn delete_where(&mut self, filter: &RecordFilter<'_>) -> Result<u64, StoreError> {
        let (clause, args) = where_clause(filter);
        let sql = format!("DELETE FROM oauth_tokens WHERE {}", clause);

        let rows = self.conn.execute(&sql, params_from_iter(args.iter()))?;
        Ok(rows as u64)
    }
}
