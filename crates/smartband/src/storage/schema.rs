//! `SQLite` schema for the event journal.

/// Confirmed fall episodes, one row each.
pub const CREATE_EPISODES_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS episodes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    confirmed_at TEXT NOT NULL,
    policy TEXT NOT NULL,
    latitude REAL NOT NULL,
    longitude REAL NOT NULL,
    cleared_at TEXT,
    alert_outcome TEXT
)
";

/// Index for newest-first listing and age pruning.
pub const CREATE_CONFIRMED_AT_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_episodes_confirmed_at ON episodes(confirmed_at DESC)
";

/// Key-value metadata, including the schema version.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    CREATE_EPISODES_TABLE,
    CREATE_CONFIRMED_AT_INDEX,
    CREATE_METADATA_TABLE,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_episodes_table_columns() {
        for column in [
            "confirmed_at TEXT NOT NULL",
            "policy TEXT NOT NULL",
            "latitude REAL",
            "longitude REAL",
            "cleared_at TEXT",
            "alert_outcome TEXT",
        ] {
            assert!(CREATE_EPISODES_TABLE.contains(column), "missing {column}");
        }
    }

    #[test]
    fn test_metadata_table_is_created_last() {
        assert_eq!(SCHEMA_STATEMENTS.last(), Some(&CREATE_METADATA_TABLE));
    }
}
