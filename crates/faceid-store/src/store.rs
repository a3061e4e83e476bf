//! SQLite-backed gallery store.
//!
//! Owns the `identities` and `logs` tables. Every write is a single
//! transaction; the connection sits behind a mutex so one store can be shared
//! between threads, and WAL mode plus a busy timeout let separate processes
//! share the database file.

use crate::schema::SCHEMA;
use faceid_core::{Fingerprint, FingerprintError, GalleryEntry};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
/// Keeps the success rate defined when nothing has been recognized yet.
const SUCCESS_RATE_EPSILON: f64 = 1e-6;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("an identity named '{0}' already exists")]
    DuplicateName(String),
    #[error("no identity named '{0}'")]
    NotFound(String),
    #[error("stored fingerprint for '{name}' is unreadable: {source}")]
    CorruptFingerprint {
        name: String,
        source: FingerprintError,
    },
    #[error("unknown action kind in log: {0}")]
    UnknownAction(String),
    #[error("store connection poisoned by a panicked writer")]
    Poisoned,
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Kind of event recorded in the action log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    Register,
    Recognize,
    Unknown,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Register => "REGISTER",
            ActionKind::Recognize => "RECOGNIZE",
            ActionKind::Unknown => "UNKNOWN",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "REGISTER" => Some(ActionKind::Register),
            "RECOGNIZE" => Some(ActionKind::Recognize),
            "UNKNOWN" => Some(ActionKind::Unknown),
            _ => None,
        }
    }
}

/// A registered identity with its fingerprint.
#[derive(Debug, Clone)]
pub struct Identity {
    pub id: i64,
    pub name: String,
    pub fingerprint: Fingerprint,
    pub image_path: String,
    pub created_at: String,
}

/// Listing row: identity metadata plus how often it has been recognized.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentitySummary {
    pub id: i64,
    pub name: String,
    pub image_path: String,
    pub created_at: String,
    pub recognition_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionLogEntry {
    pub id: i64,
    pub action: ActionKind,
    pub name: Option<String>,
    pub confidence: f64,
    pub timestamp: String,
}

/// Aggregate counters over the gallery and the action log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stats {
    pub identities: u64,
    pub recognitions: u64,
    pub unknown_faces: u64,
    /// recognitions / (recognitions + unknown_faces), 0.0 when both are zero.
    pub success_rate: f64,
}

pub struct GalleryStore {
    conn: Mutex<Connection>,
}

impl GalleryStore {
    /// Open (creating if needed) the database file and its schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let store = Self::with_connection(conn)?;
        tracing::info!(path = %path.display(), "gallery store opened");
        Ok(store)
    }

    /// Private in-memory database, mostly for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Insert a new identity. Fails with `DuplicateName` if the name is taken.
    pub fn register(
        &self,
        name: &str,
        fingerprint: &Fingerprint,
        image_path: &str,
    ) -> Result<i64, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM identities WHERE name = ?1)",
            params![name],
            |row| row.get(0),
        )?;
        if exists {
            return Err(StoreError::DuplicateName(name.to_string()));
        }

        tx.execute(
            "INSERT INTO identities (name, fingerprint, image_path, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![name, fingerprint.to_json(), image_path, now()],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(ref err, _) if err.code == ErrorCode::ConstraintViolation => {
                StoreError::DuplicateName(name.to_string())
            }
            other => StoreError::Sqlite(other),
        })?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        tracing::debug!(id, name, "identity inserted");
        Ok(id)
    }

    /// Remove an identity. Log rows mentioning it are kept.
    pub fn delete(&self, name: &str) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let removed = conn.execute("DELETE FROM identities WHERE name = ?1", params![name])?;
        if removed == 0 {
            return Err(StoreError::NotFound(name.to_string()));
        }
        tracing::debug!(name, "identity deleted");
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Option<Identity>, StoreError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT id, name, fingerprint, image_path, created_at FROM identities WHERE name = ?1",
                params![name],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, name, encoded, image_path, created_at)) = row else {
            return Ok(None);
        };
        let fingerprint = Fingerprint::from_json(&encoded).map_err(|source| {
            StoreError::CorruptFingerprint {
                name: name.clone(),
                source,
            }
        })?;

        Ok(Some(Identity {
            id,
            name,
            fingerprint,
            image_path,
            created_at,
        }))
    }

    /// All stored fingerprints, still encoded, in insertion order.
    pub fn gallery(&self) -> Result<Vec<GalleryEntry>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT name, fingerprint FROM identities ORDER BY id")?;
        let entries = stmt
            .query_map([], |row| {
                Ok(GalleryEntry {
                    name: row.get(0)?,
                    encoded: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Identities ordered by name, each with its RECOGNIZE count.
    pub fn list(&self) -> Result<Vec<IdentitySummary>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT i.id, i.name, i.image_path, i.created_at, COUNT(l.id)
            FROM identities i
            LEFT JOIN logs l ON l.person_name = i.name AND l.action = 'RECOGNIZE'
            GROUP BY i.id
            ORDER BY i.name
            "#,
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(IdentitySummary {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    image_path: row.get(2)?,
                    created_at: row.get(3)?,
                    recognition_count: row.get::<_, i64>(4)?.max(0) as u64,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Append one entry to the action log.
    pub fn log(&self, action: ActionKind, name: Option<&str>, confidence: f64) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO logs (action, person_name, confidence, timestamp) VALUES (?1, ?2, ?3, ?4)",
            params![action.as_str(), name, confidence, now()],
        )?;
        Ok(())
    }

    /// Most recent log entries, newest first.
    pub fn recent_logs(&self, limit: usize) -> Result<Vec<ActionLogEntry>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, action, person_name, confidence, timestamp FROM logs ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, action, name, confidence, timestamp)| {
                let action = ActionKind::parse(&action).ok_or(StoreError::UnknownAction(action))?;
                Ok(ActionLogEntry {
                    id,
                    action,
                    name,
                    confidence,
                    timestamp,
                })
            })
            .collect()
    }

    pub fn stats(&self) -> Result<Stats, StoreError> {
        let conn = self.conn()?;
        let (identities, recognitions, unknown_faces): (i64, i64, i64) = conn.query_row(
            r#"
            SELECT
                (SELECT COUNT(*) FROM identities),
                (SELECT COUNT(*) FROM logs WHERE action = 'RECOGNIZE'),
                (SELECT COUNT(*) FROM logs WHERE action = 'UNKNOWN')
            "#,
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        let success_rate =
            recognitions as f64 / (recognitions as f64 + unknown_faces as f64 + SUCCESS_RATE_EPSILON);

        Ok(Stats {
            identities: identities.max(0) as u64,
            recognitions: recognitions.max(0) as u64,
            unknown_faces: unknown_faces.max(0) as u64,
            success_rate,
        })
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use faceid_core::FINGERPRINT_LEN;

    fn fp(seed: usize) -> Fingerprint {
        let raw = (0..FINGERPRINT_LEN).map(|i| ((i * 7 + seed) % 11) as f64).collect();
        Fingerprint::normalized(raw).unwrap()
    }

    fn store() -> GalleryStore {
        GalleryStore::open_in_memory().unwrap()
    }

    #[test]
    fn test_register_and_get() {
        let s = store();
        let id = s.register("alice", &fp(1), "/tmp/alice.jpg").unwrap();
        let alice = s.get("alice").unwrap().unwrap();
        assert_eq!(alice.id, id);
        assert_eq!(alice.fingerprint, fp(1));
        assert_eq!(alice.image_path, "/tmp/alice.jpg");
        assert!(!alice.created_at.is_empty());
        assert!(s.get("bob").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_name_rejected_and_gallery_unchanged() {
        let s = store();
        s.register("alice", &fp(1), "a.jpg").unwrap();
        let err = s.register("alice", &fp(2), "b.jpg").unwrap_err();
        assert!(matches!(err, StoreError::DuplicateName(ref n) if n == "alice"));
        assert_eq!(s.list().unwrap().len(), 1);
        assert_eq!(s.get("alice").unwrap().unwrap().image_path, "a.jpg");
    }

    #[test]
    fn test_delete_missing_is_not_found() {
        let s = store();
        assert!(matches!(s.delete("ghost"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_delete_keeps_log_entries() {
        let s = store();
        s.register("alice", &fp(1), "a.jpg").unwrap();
        s.log(ActionKind::Register, Some("alice"), 100.0).unwrap();
        s.log(ActionKind::Recognize, Some("alice"), 97.5).unwrap();

        s.delete("alice").unwrap();
        assert!(s.list().unwrap().is_empty());
        assert!(s.gallery().unwrap().is_empty());

        let logs = s.recent_logs(10).unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].action, ActionKind::Recognize);
        assert_eq!(logs[0].name.as_deref(), Some("alice"));
        assert_eq!(logs[1].action, ActionKind::Register);
    }

    #[test]
    fn test_list_ordered_by_name_with_counts() {
        let s = store();
        s.register("charlie", &fp(3), "c.jpg").unwrap();
        s.register("alice", &fp(1), "a.jpg").unwrap();
        s.register("bob", &fp(2), "b.jpg").unwrap();
        s.log(ActionKind::Recognize, Some("bob"), 80.0).unwrap();
        s.log(ActionKind::Recognize, Some("bob"), 81.0).unwrap();
        s.log(ActionKind::Register, Some("bob"), 100.0).unwrap();
        s.log(ActionKind::Recognize, Some("alice"), 90.0).unwrap();
        s.log(ActionKind::Unknown, None, 20.0).unwrap();

        let list = s.list().unwrap();
        let names: Vec<&str> = list.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["alice", "bob", "charlie"]);
        let counts: Vec<u64> = list.iter().map(|p| p.recognition_count).collect();
        assert_eq!(counts, [1, 2, 0]);
    }

    #[test]
    fn test_gallery_in_insertion_order() {
        let s = store();
        s.register("zed", &fp(1), "z.jpg").unwrap();
        s.register("amy", &fp(2), "a.jpg").unwrap();
        let gallery = s.gallery().unwrap();
        assert_eq!(gallery[0].name, "zed");
        assert_eq!(gallery[1].name, "amy");
        assert_eq!(gallery[1].fingerprint().unwrap(), fp(2));
    }

    #[test]
    fn test_stats_empty_is_well_defined() {
        let stats = store().stats().unwrap();
        assert_eq!(stats.identities, 0);
        assert_eq!(stats.recognitions, 0);
        assert_eq!(stats.unknown_faces, 0);
        assert_eq!(stats.success_rate, 0.0);
    }

    #[test]
    fn test_stats_success_rate() {
        let s = store();
        s.register("alice", &fp(1), "a.jpg").unwrap();
        for _ in 0..3 {
            s.log(ActionKind::Recognize, Some("alice"), 90.0).unwrap();
        }
        s.log(ActionKind::Unknown, None, 30.0).unwrap();
        s.log(ActionKind::Register, Some("alice"), 100.0).unwrap();

        let stats = s.stats().unwrap();
        assert_eq!(stats.identities, 1);
        assert_eq!(stats.recognitions, 3);
        assert_eq!(stats.unknown_faces, 1);
        assert!((stats.success_rate - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_recent_logs_limit() {
        let s = store();
        for i in 0..5 {
            s.log(ActionKind::Unknown, None, i as f64).unwrap();
        }
        let logs = s.recent_logs(2).unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].confidence, 4.0);
        assert_eq!(logs[1].confidence, 3.0);
    }

    #[test]
    fn test_corrupt_fingerprint_reported_by_get() {
        let s = store();
        s.conn()
            .unwrap()
            .execute(
                "INSERT INTO identities (name, fingerprint, image_path, created_at) VALUES ('bad', '[1,2]', 'x', 'now')",
                [],
            )
            .unwrap();
        assert!(matches!(s.get("bad"), Err(StoreError::CorruptFingerprint { .. })));
        // The raw gallery read still succeeds; decoding is left to the matcher.
        assert_eq!(s.gallery().unwrap().len(), 1);
    }

    #[test]
    fn test_action_kind_roundtrip() {
        for kind in [ActionKind::Register, ActionKind::Recognize, ActionKind::Unknown] {
            assert_eq!(ActionKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ActionKind::parse("DELETE"), None);
    }
}
