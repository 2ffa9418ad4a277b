//! SQLite-backed registry of topics, upload history and operational logs.
//!
//! Every operation opens its own short-lived connection; there is no pooled or
//! long-held handle. Single statements rely on SQLite's atomicity, multi-statement
//! sequences across calls are not atomic.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};

pub mod models;

pub use models::{LogEntry, LogLevel, Topic, TopicCandidate, TopicStats, TopicStatus, UploadRecord};

/// Errors raised by the persistence layer. The store never retries.
#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("could not prepare database location {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS topics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    category TEXT NOT NULL,
    main_topic TEXT NOT NULL,
    subtopic TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'unused',
    created_at TEXT NOT NULL,
    used_at TEXT NULL,
    UNIQUE(category, main_topic, subtopic)
);
CREATE TABLE IF NOT EXISTS upload_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    topic_id INTEGER NOT NULL,
    video_title TEXT NOT NULL,
    published_id TEXT NOT NULL,
    uploaded_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    level TEXT NOT NULL,
    message TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_topics_status ON topics(status, id);
CREATE INDEX IF NOT EXISTS idx_logs_created ON logs(created_at);
";

const TOPIC_COLUMNS: &str = "id, category, main_topic, subtopic, status, created_at, used_at";

/// Durable CRUD over topics, uploads and logs. Carries no business policy.
#[derive(Debug, Clone)]
pub struct TopicStore {
    db_path: PathBuf,
}

impl TopicStore {
    /// Open (creating if needed) the database at `db_path` and ensure the schema exists
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let db_path = db_path.into();

        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StorageError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let store = Self { db_path };
        store.connect()?.execute_batch(SCHEMA)?;
        tracing::debug!("Topic store ready at {}", store.db_path.display());
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn connect(&self) -> Result<Connection, StorageError> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(conn)
    }

    /// Insert candidates whose key is new. Duplicates are skipped, not errors.
    ///
    /// Returns the number of rows actually inserted.
    pub fn add_topics(&self, candidates: &[TopicCandidate]) -> Result<usize, StorageError> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let now = Utc::now();
        let mut added = 0;

        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO topics (category, main_topic, subtopic, status, created_at)
                 VALUES (?1, ?2, ?3, 'unused', ?4)",
            )?;
            for candidate in candidates {
                added += stmt.execute(params![
                    candidate.category,
                    candidate.main_topic,
                    candidate.subtopic,
                    now,
                ])?;
            }
        }

        tx.commit()?;

        let skipped = candidates.len() - added;
        if skipped > 0 {
            tracing::debug!("Skipped {} duplicate topic(s)", skipped);
        }
        Ok(added)
    }

    /// Lowest-id unused topic, if any
    pub fn next_unused_topic(&self) -> Result<Option<Topic>, StorageError> {
        let conn = self.connect()?;
        let sql = format!(
            "SELECT {} FROM topics WHERE status = 'unused' ORDER BY id LIMIT 1",
            TOPIC_COLUMNS
        );
        let row = conn.query_row(&sql, [], raw_topic).optional()?;
        row.map(RawTopic::into_topic).transpose()
    }

    pub fn get_topic(&self, id: i64) -> Result<Option<Topic>, StorageError> {
        let conn = self.connect()?;
        let sql = format!("SELECT {} FROM topics WHERE id = ?1", TOPIC_COLUMNS);
        let row = conn.query_row(&sql, params![id], raw_topic).optional()?;
        row.map(RawTopic::into_topic).transpose()
    }

    /// Mark a topic used. Returns `false` when no topic has that id.
    pub fn mark_used(&self, topic_id: i64) -> Result<bool, StorageError> {
        let conn = self.connect()?;
        let changed = conn.execute(
            "UPDATE topics SET status = 'used', used_at = ?1 WHERE id = ?2",
            params![Utc::now(), topic_id],
        )?;
        Ok(changed > 0)
    }

    pub fn unused_count(&self) -> Result<u64, StorageError> {
        self.count("SELECT COUNT(*) FROM topics WHERE status = 'unused'")
    }

    pub fn total_count(&self) -> Result<u64, StorageError> {
        self.count("SELECT COUNT(*) FROM topics")
    }

    fn count(&self, sql: &str) -> Result<u64, StorageError> {
        let conn = self.connect()?;
        let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
        Ok(n as u64)
    }

    pub fn stats(&self) -> Result<TopicStats, StorageError> {
        let conn = self.connect()?;
        let (total, unused): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(CASE WHEN status = 'unused' THEN 1 ELSE 0 END), 0) FROM topics",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let uploads: i64 = conn.query_row("SELECT COUNT(*) FROM upload_history", [], |row| row.get(0))?;

        Ok(TopicStats {
            total: total as u64,
            unused: unused as u64,
            used: (total - unused) as u64,
            uploads: uploads as u64,
        })
    }

    /// Put every topic back to `unused` and clear used timestamps. Returns rows touched.
    pub fn reset_all(&self) -> Result<usize, StorageError> {
        let conn = self.connect()?;
        Ok(conn.execute("UPDATE topics SET status = 'unused', used_at = NULL", [])?)
    }

    /// Remove every topic. Upload history is kept.
    pub fn delete_all_topics(&self) -> Result<usize, StorageError> {
        let conn = self.connect()?;
        Ok(conn.execute("DELETE FROM topics", [])?)
    }

    pub fn record_upload(&self, topic_id: i64, title: &str, published_id: &str) -> Result<(), StorageError> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO upload_history (topic_id, video_title, published_id, uploaded_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![topic_id, title, published_id, Utc::now()],
        )?;
        Ok(())
    }

    /// Mark the topic used and append its upload record in one transaction.
    ///
    /// Either both writes land or neither does. Returns `false` when no topic has
    /// that id; the upload record is still written.
    pub fn record_published(&self, topic_id: i64, title: &str, published_id: &str) -> Result<bool, StorageError> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let now = Utc::now();

        let changed = tx.execute(
            "UPDATE topics SET status = 'used', used_at = ?1 WHERE id = ?2",
            params![now, topic_id],
        )?;
        tx.execute(
            "INSERT INTO upload_history (topic_id, video_title, published_id, uploaded_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![topic_id, title, published_id, now],
        )?;

        tx.commit()?;
        Ok(changed > 0)
    }

    /// Newest first
    pub fn recent_uploads(&self, limit: usize) -> Result<Vec<UploadRecord>, StorageError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, topic_id, video_title, published_id, uploaded_at
             FROM upload_history ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(UploadRecord {
                id: row.get(0)?,
                topic_id: row.get(1)?,
                title: row.get(2)?,
                published_id: row.get(3)?,
                uploaded_at: row.get(4)?,
            })
        })?;

        let mut uploads = Vec::new();
        for row in rows {
            uploads.push(row?);
        }
        Ok(uploads)
    }

    pub fn append_log(&self, level: LogLevel, message: &str) -> Result<(), StorageError> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO logs (level, message, created_at) VALUES (?1, ?2, ?3)",
            params![level.as_str(), message, Utc::now()],
        )?;
        Ok(())
    }

    /// Newest first
    pub fn recent_logs(&self, limit: usize) -> Result<Vec<LogEntry>, StorageError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, level, message, created_at FROM logs ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            let level: String = row.get(1)?;
            Ok(LogEntry {
                id: row.get(0)?,
                level: LogLevel::parse(&level),
                message: row.get(2)?,
                created_at: row.get(3)?,
            })
        })?;

        let mut logs = Vec::new();
        for row in rows {
            logs.push(row?);
        }
        Ok(logs)
    }

    /// Delete log rows older than `days` days. Returns rows deleted.
    ///
    /// A window reaching past the earliest representable date deletes nothing.
    pub fn prune_logs(&self, days: u32) -> Result<usize, StorageError> {
        let cutoff = Duration::try_days(i64::from(days)).and_then(|age| Utc::now().checked_sub_signed(age));
        match cutoff {
            Some(cutoff) => self.prune_logs_before(cutoff),
            None => Ok(0),
        }
    }

    fn prune_logs_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StorageError> {
        let conn = self.connect()?;
        Ok(conn.execute("DELETE FROM logs WHERE created_at < ?1", params![cutoff])?)
    }
}

struct RawTopic {
    id: i64,
    category: String,
    main_topic: String,
    subtopic: String,
    status: String,
    created_at: DateTime<Utc>,
    used_at: Option<DateTime<Utc>>,
}

impl RawTopic {
    fn into_topic(self) -> Result<Topic, StorageError> {
        Ok(Topic {
            id: self.id,
            category: self.category,
            main_topic: self.main_topic,
            subtopic: self.subtopic,
            status: TopicStatus::parse(&self.status)?,
            created_at: self.created_at,
            used_at: self.used_at,
        })
    }
}

fn raw_topic(row: &Row<'_>) -> rusqlite::Result<RawTopic> {
    Ok(RawTopic {
        id: row.get(0)?,
        category: row.get(1)?,
        main_topic: row.get(2)?,
        subtopic: row.get(3)?,
        status: row.get(4)?,
        created_at: row.get(5)?,
        used_at: row.get(6)?,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    pub(crate) fn temp_store() -> (TempDir, TopicStore) {
        let dir = TempDir::new().unwrap();
        let store = TopicStore::open(dir.path().join("app_data.db")).unwrap();
        (dir, store)
    }

    pub(crate) fn candidates(n: usize) -> Vec<TopicCandidate> {
        (1..=n)
            .map(|i| TopicCandidate::new("Math Basics", "Counting", &format!("Numbers to {}", i)).unwrap())
            .collect()
    }

    #[test]
    fn test_add_topics_is_idempotent() {
        let (_dir, store) = temp_store();
        let batch = candidates(3);

        assert_eq!(store.add_topics(&batch).unwrap(), 3);
        assert_eq!(store.add_topics(&batch).unwrap(), 0);
        assert_eq!(store.total_count().unwrap(), 3);
    }

    #[test]
    fn test_duplicate_within_one_batch_is_dropped() {
        let (_dir, store) = temp_store();
        let mut batch = candidates(2);
        batch.push(batch[0].clone());

        assert_eq!(store.add_topics(&batch).unwrap(), 2);
    }

    #[test]
    fn test_next_unused_topic_is_fifo() {
        let (_dir, store) = temp_store();
        store.add_topics(&candidates(5)).unwrap();

        let first = store.next_unused_topic().unwrap().unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(store.next_unused_topic().unwrap().unwrap().id, 1);

        assert!(store.mark_used(1).unwrap());
        assert_eq!(store.next_unused_topic().unwrap().unwrap().id, 2);
    }

    #[test]
    fn test_next_unused_topic_on_empty_store() {
        let (_dir, store) = temp_store();
        assert!(store.next_unused_topic().unwrap().is_none());
    }

    #[test]
    fn test_mark_used_sets_timestamp_and_missing_id_is_noop() {
        let (_dir, store) = temp_store();
        store.add_topics(&candidates(1)).unwrap();

        assert!(store.mark_used(1).unwrap());
        let topic = store.get_topic(1).unwrap().unwrap();
        assert_eq!(topic.status, TopicStatus::Used);
        assert!(topic.used_at.is_some());

        assert!(!store.mark_used(42).unwrap());
    }

    #[test]
    fn test_reset_all_clears_usage() {
        let (_dir, store) = temp_store();
        store.add_topics(&candidates(5)).unwrap();
        for id in 1..=5 {
            store.mark_used(id).unwrap();
        }
        assert_eq!(store.unused_count().unwrap(), 0);

        assert_eq!(store.reset_all().unwrap(), 5);
        assert_eq!(store.unused_count().unwrap(), 5);
        for id in 1..=5 {
            assert!(store.get_topic(id).unwrap().unwrap().used_at.is_none());
        }
    }

    #[test]
    fn test_stats_and_uploads() {
        let (_dir, store) = temp_store();
        store.add_topics(&candidates(4)).unwrap();
        store.mark_used(2).unwrap();
        store.record_upload(2, "Counting: Numbers to 2", "abc123").unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats, TopicStats { total: 4, unused: 3, used: 1, uploads: 1 });

        let uploads = store.recent_uploads(10).unwrap();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].topic_id, 2);
        assert_eq!(uploads[0].published_id, "abc123");
    }

    #[test]
    fn test_delete_all_topics_keeps_history() {
        let (_dir, store) = temp_store();
        store.add_topics(&candidates(2)).unwrap();
        store.record_upload(1, "title", "vid").unwrap();

        assert_eq!(store.delete_all_topics().unwrap(), 2);
        assert_eq!(store.total_count().unwrap(), 0);
        assert_eq!(store.stats().unwrap().uploads, 1);
    }

    #[test]
    fn test_logs_newest_first_and_prune() {
        let (_dir, store) = temp_store();
        store.append_log(LogLevel::Info, "first").unwrap();
        store.append_log(LogLevel::Error, "second").unwrap();

        let logs = store.recent_logs(10).unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].message, "second");
        assert_eq!(logs[0].level, LogLevel::Error);

        assert_eq!(store.recent_logs(1).unwrap().len(), 1);
        assert_eq!(store.prune_logs(30).unwrap(), 0);
        assert_eq!(store.prune_logs_before(Utc::now() + Duration::seconds(1)).unwrap(), 2);
        assert!(store.recent_logs(10).unwrap().is_empty());
    }

    #[test]
    fn test_prune_with_huge_window_deletes_nothing() {
        let (_dir, store) = temp_store();
        store.append_log(LogLevel::Info, "kept").unwrap();

        assert_eq!(store.prune_logs(100_000_000).unwrap(), 0);
        assert_eq!(store.prune_logs(u32::MAX).unwrap(), 0);
        assert_eq!(store.recent_logs(10).unwrap().len(), 1);
    }

    #[test]
    fn test_record_published_writes_both_rows() {
        let (_dir, store) = temp_store();
        store.add_topics(&candidates(2)).unwrap();

        assert!(store.record_published(1, "Counting: Numbers to 1", "vid1").unwrap());
        assert_eq!(store.get_topic(1).unwrap().unwrap().status, TopicStatus::Used);
        assert_eq!(store.recent_uploads(10).unwrap()[0].published_id, "vid1");

        assert!(!store.record_published(42, "gone", "vid2").unwrap());
        assert_eq!(store.stats().unwrap().uploads, 2);
    }

    #[test]
    fn test_record_published_is_all_or_nothing() {
        let (_dir, store) = temp_store();
        store.add_topics(&candidates(1)).unwrap();
        let conn = Connection::open(store.path()).unwrap();
        conn.execute_batch(
            "CREATE TRIGGER block_usage BEFORE UPDATE ON topics
             BEGIN SELECT RAISE(ABORT, 'topics are read-only'); END;",
        )
        .unwrap();

        assert!(store.record_published(1, "title", "vid").is_err());
        assert_eq!(store.get_topic(1).unwrap().unwrap().status, TopicStatus::Unused);
        assert_eq!(store.stats().unwrap().uploads, 0);
    }

    #[test]
    fn test_reopen_keeps_data() {
        let (dir, store) = temp_store();
        store.add_topics(&candidates(2)).unwrap();

        let reopened = TopicStore::open(dir.path().join("app_data.db")).unwrap();
        assert_eq!(reopened.total_count().unwrap(), 2);
    }

    #[test]
    fn test_candidate_validation() {
        assert!(TopicCandidate::new("A", " ", "C").is_none());
        let c = TopicCandidate::new(" A ", "B", "C ").unwrap();
        assert_eq!(c.category, "A");
        assert_eq!(c.subtopic, "C");
    }
}
