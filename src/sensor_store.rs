//! C3 — Sensor Store: the append-only `sensor_data` table. Single-writer
//! inserts (driven by C2's batch worker), many concurrent readers (C6/C7,
//! the alert evaluator). One `Mutex<Connection>` in WAL mode.

use crate::models::reading::Reading;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, params};
use std::sync::Mutex;

pub struct SensorStore {
    conn: Mutex<Connection>,
}

/// A single named-column row returned by an arbitrary C7-executed SELECT.
/// Keys are the query's output column names; this is deliberately generic
/// because the Query Builder's shapes vary (current/aggregate/grouped/
/// UNION comparison).
pub type ResultRow = std::collections::BTreeMap<String, rusqlite::types::Value>;

impl SensorStore {
    pub fn open(path: &str) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        let store = Self { conn: Mutex::new(conn) };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn: Mutex::new(conn) };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS sensor_data (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                ts          TEXT NOT NULL,
                sensor_type TEXT NOT NULL,
                value       REAL NOT NULL,
                unit        TEXT NOT NULL,
                source      TEXT NOT NULL DEFAULT 'pipeline',
                raw         TEXT NOT NULL DEFAULT '{}'
            );
            CREATE INDEX IF NOT EXISTS idx_sensor_data_type_ts ON sensor_data(sensor_type, ts);
            CREATE INDEX IF NOT EXISTS idx_sensor_data_ts ON sensor_data(ts);

            CREATE TABLE IF NOT EXISTS ingest_rejections (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                reason_kind TEXT NOT NULL,
                detail     TEXT NOT NULL DEFAULT '',
                raw        TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now'))
            );
            ",
        )?;
        Ok(())
    }

    /// Commits one batch of already-validated readings as a single
    /// transaction. Called only from C2's single writer task.
    pub fn insert_batch(&self, readings: &[Reading]) -> anyhow::Result<()> {
        if readings.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO sensor_data (ts, sensor_type, value, unit, source, raw) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for r in readings {
                stmt.execute(params![
                    r.timestamp.to_rfc3339(),
                    r.sensor_type,
                    r.value,
                    r.unit,
                    r.source,
                    r.raw,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn record_rejection(&self, kind: &str, detail: &str, raw: &str) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO ingest_rejections (reason_kind, detail, raw) VALUES (?1, ?2, ?3)",
            params![kind, detail, raw],
        )?;
        Ok(())
    }

    /// Executes a C7-validated, fully parameter-bound SELECT and returns
    /// ordered rows keyed by column name. `params` are positional `?1..`
    /// bind values; callers (C7) never interpolate user text into `sql`.
    pub fn query(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> rusqlite::Result<Vec<ResultRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(sql)?;
        let column_names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let rows = stmt.query_map(params, |row| row_to_map(row, &column_names))?;
        rows.collect()
    }

    /// Convenience accessor for the alert evaluator: last reading for a
    /// sensor type, or `None` if no rows exist yet.
    pub fn latest_reading(&self, sensor_type: &str) -> rusqlite::Result<Option<(f64, DateTime<Utc>)>> {
        let conn = self.conn.lock().unwrap();
        let row: Option<(f64, String)> = conn
            .query_row(
                "SELECT value, ts FROM sensor_data WHERE sensor_type = ?1 ORDER BY ts DESC LIMIT 1",
                params![sensor_type],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(row.and_then(|(value, ts)| {
            DateTime::parse_from_rfc3339(&ts)
                .ok()
                .map(|d| (value, d.with_timezone(&Utc)))
        }))
    }

    /// Windowed average for the alert evaluator (`time_window_minutes > 0`).
    pub fn windowed_average(&self, sensor_type: &str, since: DateTime<Utc>) -> rusqlite::Result<Option<f64>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT AVG(value) FROM sensor_data WHERE sensor_type = ?1 AND ts >= ?2",
            params![sensor_type, since.to_rfc3339()],
            |row| row.get::<_, Option<f64>>(0),
        )
    }
}

use rusqlite::OptionalExtension;

fn row_to_map(row: &Row, columns: &[String]) -> rusqlite::Result<ResultRow> {
    let mut map = ResultRow::new();
    for (i, name) in columns.iter().enumerate() {
        let value: rusqlite::types::Value = row.get(i)?;
        map.insert(name.clone(), value);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::reading::Reading;

    fn reading(sensor_type: &str, value: f64, ts: DateTime<Utc>) -> Reading {
        Reading {
            id: 0,
            timestamp: ts,
            sensor_type: sensor_type.to_string(),
            value,
            unit: "°C".to_string(),
            source: "pipeline".to_string(),
            raw: "{}".to_string(),
        }
    }

    #[test]
    fn insert_then_query_round_trips() {
        let store = SensorStore::open_in_memory().unwrap();
        let now = Utc::now();
        store.insert_batch(&[reading("temperature", 21.7, now)]).unwrap();
        let rows = store
            .query("SELECT * FROM sensor_data WHERE sensor_type = ?1", &[&"temperature"])
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn empty_batch_is_noop() {
        let store = SensorStore::open_in_memory().unwrap();
        store.insert_batch(&[]).unwrap();
        let rows = store.query("SELECT * FROM sensor_data", &[]).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn latest_reading_returns_most_recent() {
        let store = SensorStore::open_in_memory().unwrap();
        let t1 = Utc::now() - chrono::Duration::hours(1);
        let t2 = Utc::now();
        store.insert_batch(&[reading("humidity", 50.0, t1), reading("humidity", 60.0, t2)]).unwrap();
        let (value, _) = store.latest_reading("humidity").unwrap().unwrap();
        assert_eq!(value, 60.0);
    }
}
