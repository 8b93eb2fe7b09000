//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS log_records (
            id INTEGER PRIMARY KEY,
            batch_id TEXT NOT NULL,
            ip TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            request TEXT NOT NULL,
            status INTEGER NOT NULL,
            size INTEGER NOT NULL,
            is_anomaly INTEGER NOT NULL,
            threat_level TEXT NOT NULL,
            origin_country TEXT NOT NULL,
            ai_analysis TEXT NOT NULL,
            mitre_id TEXT NOT NULL,
            action_command TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_log_records_batch ON log_records(batch_id);
        CREATE INDEX IF NOT EXISTS idx_log_records_ip ON log_records(ip);

        INSERT OR IGNORE INTO schema_version (version) VALUES (1);",
    )?;
    Ok(())
}
