//! SQLite storage layer -- append-only store for flagged records.

pub mod schema;

use std::path::Path;

use anyhow::{Context, Result};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use uuid::Uuid;

use crate::detect::AnalyzedRecord;

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &Path) -> Result<Pool> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// Append one analyzed record.
pub fn insert_record(pool: &Pool, batch_id: Uuid, rec: &AnalyzedRecord) -> Result<()> {
    let conn = pool.get()?;
    let threat_level = serde_json::to_value(rec.threat_level)?
        .as_str()
        .unwrap_or("Low")
        .to_string();

    conn.execute(
        "INSERT INTO log_records (
            batch_id, ip, timestamp, request, status, size, is_anomaly,
            threat_level, origin_country, ai_analysis, mitre_id, action_command
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            batch_id.to_string(),
            rec.source_address,
            rec.timestamp,
            rec.request_line,
            rec.status_code,
            rec.response_size as i64,
            rec.anomaly_flag,
            threat_level,
            rec.origin_location,
            rec.narrative,
            rec.mitre_technique_id,
            rec.suggested_action,
        ],
    )
    .context("failed to insert log record")?;

    Ok(())
}

/// Number of stored records for a batch.
pub fn count_batch(pool: &Pool, batch_id: Uuid) -> Result<usize> {
    let conn = pool.get()?;
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM log_records WHERE batch_id = ?1",
        params![batch_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(n as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::ThreatLevel;
    use crate::ingest::LogRecord;

    #[test]
    fn test_insert_and_count() {
        let dir = tempfile::tempdir().unwrap();
        let pool = open_pool(&dir.path().join("nested/store.db")).unwrap();

        let mut rec = AnalyzedRecord::new(
            LogRecord {
                source_address: "192.0.2.1".into(),
                timestamp: "t".into(),
                request_line: "GET /.env HTTP/1.1".into(),
                status_code: 404,
                response_size: 0,
            },
            true,
        );
        rec.threat_level = ThreatLevel::Critical;

        let batch = Uuid::new_v4();
        insert_record(&pool, batch, &rec).unwrap();
        insert_record(&pool, batch, &rec).unwrap();
        assert_eq!(count_batch(&pool, batch).unwrap(), 2);
        assert_eq!(count_batch(&pool, Uuid::new_v4()).unwrap(), 0);

        let conn = pool.get().unwrap();
        let level: String = conn
            .query_row("SELECT threat_level FROM log_records LIMIT 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(level, "CRITICAL");
    }
}
