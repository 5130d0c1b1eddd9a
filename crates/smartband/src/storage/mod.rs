//! Event journal for smartband.
//!
//! A small `SQLite` database that records every confirmed fall episode, the
//! outcome of its alert and when it cleared. Vitals are not stored.

pub mod migrations;
pub mod schema;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, info};

use crate::alert::AlertOutcome;
use crate::config::FallPolicy;
use crate::error::{Error, Result};
use crate::sample::LocationFix;

const IN_MEMORY: &str = ":memory:";

/// One journaled fall episode.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpisodeRecord {
    /// Row id.
    pub id: i64,
    /// Wall-clock time of confirmation.
    pub confirmed_at: DateTime<Utc>,
    /// Classifier policy that confirmed the fall.
    pub policy: String,
    /// Position at confirmation.
    pub location: LocationFix,
    /// When the episode cleared, if it has.
    pub cleared_at: Option<DateTime<Utc>>,
    /// Alert outcome label, if an alert was attempted.
    pub alert_outcome: Option<String>,
}

/// Persistent record of fall episodes.
#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
    conn: Connection,
}

impl Journal {
    /// Open or create a journal at `path`.
    ///
    /// Parent directories are created as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or its schema cannot
    /// be initialized.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening journal at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        migrations::initialize_schema(&conn)?;

        info!("Journal opened at {}", path.display());
        Ok(Self { path, conn })
    }

    /// Create a journal that lives only in memory.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(IN_MEMORY),
            source,
        })?;
        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(IN_MEMORY),
            conn,
        })
    }

    /// Database file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record a newly confirmed episode and return its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn record_episode(
        &self,
        confirmed_at: DateTime<Utc>,
        policy: FallPolicy,
        location: LocationFix,
    ) -> Result<i64> {
        self.conn.execute(
            r"
            INSERT INTO episodes (confirmed_at, policy, latitude, longitude)
            VALUES (?1, ?2, ?3, ?4)
            ",
            params![
                format_timestamp(confirmed_at),
                policy.to_string(),
                location.latitude,
                location.longitude,
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        debug!(id, "Journaled fall episode");
        Ok(id)
    }

    /// Record the latest alert outcome for an episode.
    ///
    /// Returns `false` if no such episode exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn record_alert(&self, id: i64, outcome: &AlertOutcome) -> Result<bool> {
        let affected = self.conn.execute(
            "UPDATE episodes SET alert_outcome = ?1 WHERE id = ?2",
            params![outcome.label(), id],
        )?;
        Ok(affected > 0)
    }

    /// Record when an episode cleared.
    ///
    /// Returns `false` if no such episode exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn record_cleared(&self, id: i64, at: DateTime<Utc>) -> Result<bool> {
        let affected = self.conn.execute(
            "UPDATE episodes SET cleared_at = ?1 WHERE id = ?2",
            params![format_timestamp(at), id],
        )?;
        Ok(affected > 0)
    }

    /// Fetch one episode.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get(&self, id: i64) -> Result<Option<EpisodeRecord>> {
        let record = self
            .conn
            .query_row(
                r"
                SELECT id, confirmed_at, policy, latitude, longitude, cleared_at, alert_outcome
                FROM episodes WHERE id = ?1
                ",
                [id],
                Self::row_to_episode,
            )
            .optional()?;
        Ok(record)
    }

    /// Most recent episodes, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn recent(&self, limit: usize) -> Result<Vec<EpisodeRecord>> {
        let mut stmt = self.conn.prepare(
            r"
            SELECT id, confirmed_at, policy, latitude, longitude, cleared_at, alert_outcome
            FROM episodes ORDER BY confirmed_at DESC, id DESC LIMIT ?1
            ",
        )?;

        let limit_i64 = i64::try_from(limit).unwrap_or(i64::MAX);
        let records = stmt
            .query_map([limit_i64], Self::row_to_episode)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Number of journaled episodes.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn count(&self) -> Result<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM episodes", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Delete episodes confirmed longer than `max_age` ago.
    ///
    /// Returns the number of rows deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn prune_older_than(&self, max_age: Duration) -> Result<usize> {
        let cutoff = format_timestamp(Utc::now() - max_age);
        let affected = self
            .conn
            .execute("DELETE FROM episodes WHERE confirmed_at < ?1", [cutoff])?;

        if affected > 0 {
            info!("Pruned {} old episodes", affected);
        }
        Ok(affected)
    }

    /// Summary statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if a query fails.
    pub fn stats(&self) -> Result<JournalStats> {
        let total_episodes = self.count()?;
        let open_episodes: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM episodes WHERE cleared_at IS NULL",
            [],
            |row| row.get(0),
        )?;
        let unalerted_episodes: i64 = self.conn.query_row(
            r"
            SELECT COUNT(*) FROM episodes
            WHERE alert_outcome IS NULL
               OR alert_outcome LIKE 'connect_failed%'
               OR alert_outcome = 'rate_limited'
            ",
            [],
            |row| row.get(0),
        )?;

        let oldest: Option<String> = self
            .conn
            .query_row("SELECT MIN(confirmed_at) FROM episodes", [], |row| {
                row.get::<_, Option<String>>(0)
            })?;
        let newest: Option<String> = self
            .conn
            .query_row("SELECT MAX(confirmed_at) FROM episodes", [], |row| {
                row.get::<_, Option<String>>(0)
            })?;

        let db_size_bytes = if self.path.as_os_str() == IN_MEMORY {
            0
        } else {
            std::fs::metadata(&self.path).map_or(0, |m| m.len())
        };

        Ok(JournalStats {
            total_episodes,
            open_episodes,
            unalerted_episodes,
            oldest_episode: oldest.as_deref().and_then(parse_timestamp),
            newest_episode: newest.as_deref().and_then(parse_timestamp),
            db_size_bytes,
        })
    }

    fn row_to_episode(row: &rusqlite::Row) -> rusqlite::Result<EpisodeRecord> {
        let confirmed_at: String = row.get(1)?;
        let cleared_at: Option<String> = row.get(5)?;
        Ok(EpisodeRecord {
            id: row.get(0)?,
            confirmed_at: parse_timestamp(&confirmed_at).unwrap_or_default(),
            policy: row.get(2)?,
            location: LocationFix::new(row.get(3)?, row.get(4)?),
            cleared_at: cleared_at.as_deref().and_then(parse_timestamp),
            alert_outcome: row.get(6)?,
        })
    }
}

/// Fixed-width RFC 3339 so that text order matches time order.
fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Journal statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JournalStats {
    /// Total episodes recorded.
    pub total_episodes: i64,
    /// Episodes that have not cleared.
    pub open_episodes: i64,
    /// Episodes without a delivered or sent alert.
    pub unalerted_episodes: i64,
    /// Confirmation time of the oldest episode.
    pub oldest_episode: Option<DateTime<Utc>>,
    /// Confirmation time of the newest episode.
    pub newest_episode: Option<DateTime<Utc>>,
    /// Database file size in bytes.
    pub db_size_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn journal() -> Journal {
        Journal::open_in_memory().expect("failed to create journal")
    }

    fn here() -> LocationFix {
        LocationFix::new(11.02, 77.0)
    }

    #[test]
    fn test_record_and_get_episode() {
        let journal = journal();
        let now = Utc::now();
        let id = journal
            .record_episode(now, FallPolicy::Envelope, here())
            .unwrap();

        let record = journal.get(id).unwrap().unwrap();
        assert_eq!(record.policy, "envelope");
        assert_eq!(record.location, here());
        assert_eq!(record.confirmed_at.timestamp(), now.timestamp());
        assert!(record.cleared_at.is_none());
        assert!(record.alert_outcome.is_none());
    }

    #[test]
    fn test_get_missing_episode() {
        assert!(journal().get(42).unwrap().is_none());
    }

    #[test]
    fn test_record_alert_and_clear() {
        let journal = journal();
        let id = journal
            .record_episode(Utc::now(), FallPolicy::Orientation, here())
            .unwrap();

        assert!(journal
            .record_alert(id, &AlertOutcome::Delivered { status: 200 })
            .unwrap());
        assert!(journal.record_cleared(id, Utc::now()).unwrap());

        let record = journal.get(id).unwrap().unwrap();
        assert_eq!(record.alert_outcome.as_deref(), Some("delivered (200)"));
        assert!(record.cleared_at.is_some());
    }

    #[test]
    fn test_updates_on_missing_episode() {
        let journal = journal();
        assert!(!journal
            .record_alert(7, &AlertOutcome::RateLimited)
            .unwrap());
        assert!(!journal.record_cleared(7, Utc::now()).unwrap());
    }

    #[test]
    fn test_recent_newest_first() {
        let journal = journal();
        let base = Utc::now();
        for minutes in [30, 10, 20] {
            journal
                .record_episode(
                    base - Duration::minutes(minutes),
                    FallPolicy::Envelope,
                    here(),
                )
                .unwrap();
        }

        let recent = journal.recent(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert!(recent[0].confirmed_at > recent[1].confirmed_at);
        assert_eq!(journal.count().unwrap(), 3);
    }

    #[test]
    fn test_prune_older_than() {
        let journal = journal();
        journal
            .record_episode(
                Utc::now() - Duration::days(100),
                FallPolicy::Envelope,
                here(),
            )
            .unwrap();
        journal
            .record_episode(Utc::now(), FallPolicy::Envelope, here())
            .unwrap();

        assert_eq!(journal.prune_older_than(Duration::days(90)).unwrap(), 1);
        assert_eq!(journal.count().unwrap(), 1);
    }

    #[test]
    fn test_stats() {
        let journal = journal();
        let empty = journal.stats().unwrap();
        assert_eq!(empty.total_episodes, 0);
        assert!(empty.oldest_episode.is_none());

        let first = journal
            .record_episode(Utc::now(), FallPolicy::Envelope, here())
            .unwrap();
        journal
            .record_episode(Utc::now(), FallPolicy::Envelope, here())
            .unwrap();
        journal
            .record_alert(first, &AlertOutcome::Unacknowledged)
            .unwrap();
        journal.record_cleared(first, Utc::now()).unwrap();

        let stats = journal.stats().unwrap();
        assert_eq!(stats.total_episodes, 2);
        assert_eq!(stats.open_episodes, 1);
        assert_eq!(stats.unalerted_episodes, 1);
        assert!(stats.newest_episode.is_some());
        assert_eq!(stats.db_size_bytes, 0);
    }

    #[test]
    fn test_open_on_disk_creates_parent() {
        let dir = std::env::temp_dir().join(format!("smartband_journal_{}", std::process::id()));
        let path = dir.join("nested").join("journal.db");
        let _ = std::fs::remove_dir_all(&dir);

        {
            let journal = Journal::open(&path).unwrap();
            journal
                .record_episode(Utc::now(), FallPolicy::Envelope, here())
                .unwrap();
            assert_eq!(journal.path(), path.as_path());
        }

        let reopened = Journal::open(&path).unwrap();
        assert_eq!(reopened.count().unwrap(), 1);
        assert!(reopened.stats().unwrap().db_size_bytes > 0);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
