//! SQLite database implementation for persistent storage

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, warn};

use crate::core::{ProcessStatus, Settings, StatusRecord, StatusStore, StoreError};

/// Database wrapper for SQLite operations
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the database file at `path`
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path)?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        info!("Database opened at {:?}", path);
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open a private in-memory database
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }

    /// Initialize database schema
    pub fn initialize(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            -- Settings table
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            -- Tracked process names
            CREATE TABLE IF NOT EXISTS processes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE
            );

            -- Last known status per user and process
            CREATE TABLE IF NOT EXISTS process_status (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL,
                process_name TEXT NOT NULL,
                status TEXT NOT NULL,
                last_checked TEXT NOT NULL,
                last_active TEXT,
                UNIQUE(username, process_name)
            );
            "#,
        )?;

        info!("Database schema initialized");
        Ok(())
    }

    // === Settings ===

    /// Load settings from database
    pub fn load_settings(&self) -> Result<Option<Settings>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT value FROM settings WHERE key = 'tracker_settings'")?;
        let result: Option<String> = stmt.query_row([], |row| row.get(0)).optional()?;

        match result {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Save settings to database
    pub fn save_settings(&self, settings: &Settings) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let json = serde_json::to_string(settings)?;
        conn.execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES ('tracker_settings', ?1)",
            params![json],
        )?;
        debug!("Settings saved");
        Ok(())
    }

    // === Processes ===

    /// Add a process name; returns false if it was already present
    pub fn add_process(&self, name: &str) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO processes (name) VALUES (?1)",
            params![name],
        )?;
        debug!("Process {:?} registered (new: {})", name, inserted > 0);
        Ok(inserted > 0)
    }

    /// Load all tracked process names
    pub fn load_processes(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT name FROM processes ORDER BY id")?;
        let names = stmt.query_map([], |row| row.get(0))?;

        let mut result = Vec::new();
        for name in names {
            result.push(name?);
        }

        Ok(result)
    }
}

// === Process status ===

impl StatusStore for Database {
    fn upsert_status(
        &self,
        username: &str,
        process_name: &str,
        status: ProcessStatus,
        checked_at: DateTime<Utc>,
        active_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let conn = self.lock()?;
        // Fixed-width timestamps compare lexically in chronological order
        conn.execute(
            r#"
            INSERT INTO process_status
            (username, process_name, status, last_checked, last_active)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(username, process_name) DO UPDATE SET
                status = excluded.status,
                last_checked = excluded.last_checked,
                last_active = CASE
                    WHEN excluded.last_active IS NULL THEN process_status.last_active
                    WHEN process_status.last_active IS NULL THEN excluded.last_active
                    WHEN process_status.last_active NOT GLOB '[0-9][0-9][0-9][0-9]-[0-9][0-9]-[0-9][0-9]T*'
                        THEN excluded.last_active
                    ELSE MAX(process_status.last_active, excluded.last_active)
                END
            "#,
            params![
                username,
                process_name,
                status.as_str(),
                format_timestamp(checked_at),
                active_at.map(format_timestamp),
            ],
        )?;
        Ok(())
    }

    fn get_last_active(
        &self,
        username: &str,
        process_name: &str,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let conn = self.lock()?;
        let raw: Option<Option<String>> = conn
            .query_row(
                "SELECT last_active FROM process_status WHERE username = ?1 AND process_name = ?2",
                params![username, process_name],
                |row| row.get(0),
            )
            .optional()?;

        raw.flatten()
            .map(|value| parse_timestamp("last_active", value))
            .transpose()
    }

    fn list_statuses(&self) -> Result<Vec<StatusRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT username, process_name, status, last_checked, last_active FROM process_status ORDER BY username, process_name",
        )?;

        let rows = stmt.query_map([], |row| {
            let username: String = row.get(0)?;
            let process_name: String = row.get(1)?;
            let status: String = row.get(2)?;
            let last_checked: String = row.get(3)?;
            let last_active: Option<String> = row.get(4)?;
            Ok((username, process_name, status, last_checked, last_active))
        })?;

        let mut result = Vec::new();
        for row in rows {
            let (username, process_name, status, last_checked, last_active) = row?;

            match decode_record(username, process_name, status, last_checked, last_active) {
                Ok(record) => result.push(record),
                Err(e) => warn!("Skipping unreadable status row: {}", e),
            }
        }

        Ok(result)
    }
}

fn decode_record(
    username: String,
    process_name: String,
    status: String,
    last_checked: String,
    last_active: Option<String>,
) -> Result<StatusRecord, StoreError> {
    let status = ProcessStatus::from_db_str(&status).ok_or(StoreError::UnknownStatus(status))?;

    Ok(StatusRecord {
        username,
        process_name,
        status,
        last_checked: parse_timestamp("last_checked", last_checked)?,
        last_active: last_active
            .map(|value| parse_timestamp("last_active", value))
            .transpose()?,
    })
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Accepts RFC 3339 and offset-less ISO 8601 (read as UTC), which older
/// databases contain.
fn parse_timestamp(column: &'static str, value: String) -> Result<DateTime<Utc>, StoreError> {
    if let Ok(t) = DateTime::parse_from_rfc3339(&value) {
        return Ok(t.with_timezone(&Utc));
    }
    match NaiveDateTime::parse_from_str(&value, "%Y-%m-%dT%H:%M:%S%.f") {
        Ok(t) => Ok(t.and_utc()),
        Err(_) => Err(StoreError::Timestamp { column, value }),
    }
}
