//! Local Event Store (spec §4.A): durable per-repo cursor, dedup log, and
//! dispatch-result log, backed by `rusqlite` exactly as `Journal` is in the
//! teacher — WAL mode, `synchronous=FULL`, integrity check at open, 0600
//! file permissions.
//!
//! All writes are durable before acknowledgement to the caller (spec §4.A):
//! SQLite's WAL + `synchronous=FULL` gives that without an explicit fsync call
//! here. `try_claim` and `set_cursor` are serialized per repo by a single
//! `tokio::sync::Mutex` guarding the connection — every repo worker shares one
//! store (spec §5), and SQLite itself is not safe for concurrent writers from
//! multiple connections, so one connection behind one mutex is the simplest
//! correct design.

use crate::error::StoreError;
use crate::model::{DispatchRecord, Event, Outcome};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use tokio::sync::Mutex;

pub struct EventStore {
    conn: Mutex<Connection>,
}

impl EventStore {
    /// Open (or create) the store at `path`. Runs `PRAGMA integrity_check`
    /// and fails open if it doesn't report `ok`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(rusqlite::Error::from)?;
            }
        }
        let conn = Connection::open(path)?;
        apply_pragmas(&conn)?;
        run_integrity_check(&conn)?;
        apply_schema(&conn)?;
        set_owner_only_permissions(path);
        Ok(EventStore { conn: Mutex::new(conn) })
    }

    /// In-memory store, for tests — same schema and semantics, no file on disk.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        apply_pragmas(&conn)?;
        apply_schema(&conn)?;
        Ok(EventStore { conn: Mutex::new(conn) })
    }

    /// The high-water mark for `repo`, or `None` if never seen.
    pub async fn get_cursor(&self, repo: &str) -> Result<Option<i64>, StoreError> {
        let conn = self.conn.lock().await;
        let last_id: Option<i64> = conn
            .query_row(
                "SELECT last_id FROM cursors WHERE repo = ?1",
                params![repo],
                |row| row.get(0),
            )
            .optional()?;
        Ok(last_id)
    }

    /// Advance the cursor for `repo` to `remote_id`. Idempotent on equal
    /// values; fails with `StaleCursor` if `remote_id` regresses.
    pub async fn set_cursor(&self, repo: &str, remote_id: i64) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        let current: Option<i64> = conn
            .query_row(
                "SELECT last_id FROM cursors WHERE repo = ?1",
                params![repo],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(stored) = current {
            if remote_id < stored {
                return Err(StoreError::StaleCursor {
                    repo: repo.to_owned(),
                    stored,
                    attempted: remote_id,
                });
            }
        }
        conn.execute(
            "INSERT INTO cursors (repo, last_id) VALUES (?1, ?2)
             ON CONFLICT(repo) DO UPDATE SET last_id = excluded.last_id",
            params![repo, remote_id],
        )?;
        Ok(())
    }

    /// Insert a dedup row for `event`. Returns `true` if this call inserted
    /// it (first sighting), `false` if a row already existed (dedup hit).
    /// Atomic against concurrent callers via the connection-wide mutex.
    pub async fn try_claim(&self, event: &Event) -> Result<bool, StoreError> {
        let conn = self.conn.lock().await;
        let claimed_at = Utc::now().to_rfc3339();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO event_log
                 (remote_id, delivery_id, repo, event_type, action, claimed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                event.remote_id,
                event.delivery_id,
                event.repo,
                event.event_type,
                event.action,
                claimed_at,
            ],
        )?;
        Ok(inserted == 1)
    }

    /// Record one dispatch outcome. Idempotent on `(remote_id, handler_name)`.
    pub async fn record_dispatch(&self, record: &DispatchRecord) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO dispatch_log
                 (remote_id, handler_name, outcome, exit_status, stdout, stderr, started_at, ended_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(remote_id, handler_name) DO UPDATE SET
                 outcome = excluded.outcome,
                 exit_status = excluded.exit_status,
                 stdout = excluded.stdout,
                 stderr = excluded.stderr,
                 started_at = excluded.started_at,
                 ended_at = excluded.ended_at",
            params![
                record.remote_id,
                record.handler_name,
                record.outcome.as_str(),
                record.exit_status,
                record.stdout,
                record.stderr,
                record.started_at.to_rfc3339(),
                record.ended_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Look up a previously recorded dispatch outcome, if any — used by tests
    /// to assert restart idempotence (spec §8).
    pub async fn get_dispatch_outcome(
        &self,
        remote_id: i64,
        handler_name: &str,
    ) -> Result<Option<Outcome>, StoreError> {
        let conn = self.conn.lock().await;
        let outcome: Option<String> = conn
            .query_row(
                "SELECT outcome FROM dispatch_log WHERE remote_id = ?1 AND handler_name = ?2",
                params![remote_id, handler_name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(outcome.map(|s| match s.as_str() {
            "success" => Outcome::Success,
            "failure" => Outcome::Failure,
            "timeout" => Outcome::Timeout,
            _ => Outcome::Skipped,
        }))
    }

    /// Whether every `remote_id` in `(lower, upper)` (both exclusive) for
    /// `repo` has already been claimed — used by the daemon loop to tell a
    /// genuine gap apart from remote_ids that were legitimately never
    /// assigned to this repo (spec §4.H).
    pub async fn all_claimed_in_range(
        &self,
        repo: &str,
        lower_exclusive: i64,
        upper_exclusive: i64,
    ) -> Result<bool, StoreError> {
        if upper_exclusive - lower_exclusive <= 1 {
            return Ok(true);
        }
        let conn = self.conn.lock().await;
        let claimed: i64 = conn.query_row(
            "SELECT COUNT(*) FROM event_log
             WHERE repo = ?1 AND remote_id > ?2 AND remote_id < ?3",
            params![repo, lower_exclusive, upper_exclusive],
            |row| row.get(0),
        )?;
        let expected = upper_exclusive - lower_exclusive - 1;
        Ok(claimed >= expected)
    }

    /// All `(repo, last_id)` cursors, for status reporting.
    pub async fn list_cursors(&self) -> Result<Vec<(String, i64)>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT repo, last_id FROM cursors ORDER BY repo ASC")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }
}

fn apply_pragmas(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=FULL;
         PRAGMA foreign_keys=ON;",
    )?;
    Ok(())
}

fn run_integrity_check(conn: &Connection) -> Result<(), StoreError> {
    let result: String = conn.pragma_query_value(None, "integrity_check", |row| row.get(0))?;
    if result != "ok" {
        return Err(StoreError::IntegrityCheckFailed(result));
    }
    Ok(())
}

fn apply_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(include_str!("schema.sql"))?;
    Ok(())
}

#[cfg(unix)]
fn set_owner_only_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(metadata) = std::fs::metadata(path) {
        let mut perms = metadata.permissions();
        perms.set_mode(0o600);
        let _ = std::fs::set_permissions(path, perms);
    }
}

#[cfg(not(unix))]
fn set_owner_only_permissions(_path: &Path) {}
