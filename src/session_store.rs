//! C4 — Session Store: rolling per-session conversation turns, plus
//! session metadata and the TTL sweep. Same connection-pool shape as
//! `SensorStore`; kept as a separate struct because its tables and access
//! pattern (many small single-row writes, keyed reads) differ.

use crate::models::alert::{Action, ActionLogEntry, AlertSpec, Operator, Severity};
use crate::models::session::{ConversationTurn, SessionMetadata};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::sync::Mutex;
use uuid::Uuid;

pub struct SessionStore {
    conn: Mutex<Connection>,
}

impl SessionStore {
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
            CREATE TABLE IF NOT EXISTS session_storage (
                id            TEXT PRIMARY KEY,
                session_id    TEXT NOT NULL,
                query         TEXT NOT NULL,
                response      TEXT NOT NULL,
                sql           TEXT,
                semantic_json TEXT,
                metrics       TEXT,
                chart         TEXT,
                created_at    TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now'))
            );
            CREATE INDEX IF NOT EXISTS idx_session_storage_session ON session_storage(session_id);
            CREATE INDEX IF NOT EXISTS idx_session_storage_created ON session_storage(created_at);

            CREATE TABLE IF NOT EXISTS session_metadata (
                session_id    TEXT PRIMARY KEY,
                created_at    TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
                last_activity TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
                is_active     INTEGER NOT NULL DEFAULT 1,
                total_queries INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS user_alerts (
                id            TEXT PRIMARY KEY,
                session_id    TEXT NOT NULL,
                name          TEXT NOT NULL DEFAULT '',
                sensor_type   TEXT NOT NULL,
                operator      TEXT NOT NULL,
                condition     TEXT NOT NULL DEFAULT '',
                threshold     REAL NOT NULL,
                severity      TEXT NOT NULL,
                time_window   INTEGER NOT NULL DEFAULT 0,
                action        TEXT,
                active        INTEGER NOT NULL DEFAULT 1,
                created_at    TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now'))
            );
            CREATE INDEX IF NOT EXISTS idx_user_alerts_session ON user_alerts(session_id);

            CREATE TABLE IF NOT EXISTS action_logs (
                id           TEXT PRIMARY KEY,
                alert_id     TEXT NOT NULL,
                action_type  TEXT NOT NULL,
                status       TEXT NOT NULL,
                message      TEXT NOT NULL DEFAULT '',
                timestamp    TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
                completed_at TEXT,
                session_id   TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_action_logs_alert ON action_logs(alert_id);
            ",
        )?;
        Ok(())
    }

    /// Inserts one turn and bumps session metadata (creating it if absent).
    /// Ordering guarantee (§5): within a session, turns are appended in
    /// call order since both statements run under the same lock.
    pub fn append_turn(&self, turn: &ConversationTurn) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO session_storage (id, session_id, query, response, sql, semantic_json, metrics, chart, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                Uuid::new_v4().to_string(),
                turn.session_id,
                turn.query,
                turn.response,
                turn.sql,
                turn.semantic_ir,
                turn.metrics,
                turn.chart,
                turn.created_at.to_rfc3339(),
            ],
        )?;
        conn.execute(
            "INSERT INTO session_metadata (session_id, last_activity, is_active, total_queries)
             VALUES (?1, ?2, 1, 1)
             ON CONFLICT(session_id) DO UPDATE SET
                last_activity = excluded.last_activity,
                is_active = 1,
                total_queries = total_queries + 1",
            params![turn.session_id, turn.created_at.to_rfc3339()],
        )?;
        Ok(())
    }

    /// Most recent `k` turns for a session, oldest first (ready to feed
    /// directly into an LLM prompt as ordered context).
    pub fn recent_turns(&self, session_id: &str, k: i64) -> anyhow::Result<Vec<ConversationTurn>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT session_id, query, response, sql, semantic_json, metrics, chart, created_at
             FROM session_storage WHERE session_id = ?1 ORDER BY created_at DESC LIMIT ?2",
        )?;
        let mut rows: Vec<ConversationTurn> = stmt
            .query_map(params![session_id, k], |row| {
                let created_at: String = row.get(7)?;
                Ok(ConversationTurn {
                    session_id: row.get(0)?,
                    query: row.get(1)?,
                    response: row.get(2)?,
                    sql: row.get(3)?,
                    semantic_ir: row.get(4)?,
                    metrics: row.get(5)?,
                    chart: row.get(6)?,
                    created_at: DateTime::parse_from_rfc3339(&created_at)
                        .map(|d| d.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.reverse();
        Ok(rows)
    }

    pub fn metadata(&self, session_id: &str) -> anyhow::Result<Option<SessionMetadata>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT session_id, created_at, last_activity, is_active, total_queries
                 FROM session_metadata WHERE session_id = ?1",
                params![session_id],
                |row| {
                    let created_at: String = row.get(1)?;
                    let last_activity: String = row.get(2)?;
                    Ok((
                        row.get::<_, String>(0)?,
                        created_at,
                        last_activity,
                        row.get::<_, i64>(3)? != 0,
                        row.get::<_, i64>(4)?,
                    ))
                },
            )
            .optional()?;
        Ok(row.map(|(session_id, created_at, last_activity, is_active, total_queries)| SessionMetadata {
            session_id,
            created_at: DateTime::parse_from_rfc3339(&created_at).map(|d| d.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now()),
            last_activity: DateTime::parse_from_rfc3339(&last_activity).map(|d| d.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now()),
            is_active,
            total_queries,
        }))
    }

    /// Periodic sweep (§5 "Session lifecycle task"): mark sessions idle
    /// longer than `ttl_min` inactive, then delete turns older than
    /// `retain_days`. Best-effort — losing a tick is tolerable, so errors
    /// are returned but callers may choose to just log and continue.
    pub fn sweep(&self, ttl_min: i64, retain_days: i64) -> anyhow::Result<SweepOutcome> {
        let conn = self.conn.lock().unwrap();
        let idle_cutoff = (Utc::now() - Duration::minutes(ttl_min)).to_rfc3339();
        let marked_inactive = conn.execute(
            "UPDATE session_metadata SET is_active = 0 WHERE is_active = 1 AND last_activity < ?1",
            params![idle_cutoff],
        )?;

        let retain_cutoff = (Utc::now() - Duration::days(retain_days)).to_rfc3339();
        let deleted_turns = conn.execute(
            "DELETE FROM session_storage WHERE created_at < ?1",
            params![retain_cutoff],
        )?;

        Ok(SweepOutcome { marked_inactive, deleted_turns })
    }

    /// §4.8 alert persistence. `condition` stores the human-readable NL
    /// fragment the threshold was parsed from, for display/debugging only.
    pub fn insert_alert(&self, alert: &AlertSpec, condition: &str) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO user_alerts (id, session_id, name, sensor_type, operator, condition, threshold, severity, time_window, action, active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                alert.id,
                alert.session_id,
                format!("{} {} {}", alert.sensor_type, alert.operator.as_str(), alert.threshold),
                alert.sensor_type,
                alert.operator.as_str(),
                condition,
                alert.threshold,
                alert.severity.as_str(),
                alert.time_window_minutes,
                alert.action.map(|a| a.as_str().to_string()),
                alert.active as i64,
                alert.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn list_alerts(&self, session_id: &str) -> anyhow::Result<Vec<AlertSpec>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, session_id, sensor_type, operator, threshold, severity, time_window, action, active, created_at
             FROM user_alerts WHERE session_id = ?1 ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map(params![session_id], row_to_alert_spec)?.collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Snapshot of every active alert across all sessions, for the
    /// background evaluation tick (§5 "single-sweep").
    pub fn list_active_alerts(&self) -> anyhow::Result<Vec<AlertSpec>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, session_id, sensor_type, operator, threshold, severity, time_window, action, active, created_at
             FROM user_alerts WHERE active = 1 ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map([], row_to_alert_spec)?.collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Soft-deletes (marks inactive) rather than removing the row, so past
    /// `action_logs` entries keep a valid foreign key. Returns `false` if no
    /// matching, still-active alert existed for this session.
    pub fn delete_alert(&self, id: &str, session_id: &str) -> anyhow::Result<bool> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE user_alerts SET active = 0 WHERE id = ?1 AND session_id = ?2 AND active = 1",
            params![id, session_id],
        )?;
        Ok(updated > 0)
    }

    pub fn record_action(&self, entry: &ActionLogEntry) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO action_logs (id, alert_id, action_type, status, message, timestamp, completed_at, session_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entry.id,
                entry.alert_id,
                entry.action_type,
                entry.status,
                entry.message,
                entry.timestamp.to_rfc3339(),
                entry.completed_at.map(|t| t.to_rfc3339()),
                entry.session_id,
            ],
        )?;
        Ok(())
    }

    pub fn list_actions(&self, session_id: &str) -> anyhow::Result<Vec<ActionLogEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, alert_id, action_type, status, message, timestamp, completed_at, session_id
             FROM action_logs WHERE session_id = ?1 ORDER BY timestamp DESC",
        )?;
        let rows = stmt
            .query_map(params![session_id], row_to_action_log_entry)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Dispatch history for one alert, keyed directly off the alert id
    /// rather than a session, since one alert's actions may span sessions.
    pub fn list_actions_for_alert(&self, alert_id: &str) -> anyhow::Result<Vec<ActionLogEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, alert_id, action_type, status, message, timestamp, completed_at, session_id
             FROM action_logs WHERE alert_id = ?1 ORDER BY timestamp DESC",
        )?;
        let rows = stmt
            .query_map(params![alert_id], row_to_action_log_entry)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn row_to_action_log_entry(row: &rusqlite::Row) -> rusqlite::Result<ActionLogEntry> {
    let timestamp: String = row.get(5)?;
    let completed_at: Option<String> = row.get(6)?;
    Ok(ActionLogEntry {
        id: row.get(0)?,
        alert_id: row.get(1)?,
        action_type: row.get(2)?,
        status: row.get(3)?,
        message: row.get(4)?,
        timestamp: DateTime::parse_from_rfc3339(&timestamp).map(|d| d.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now()),
        completed_at: completed_at.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|d| d.with_timezone(&Utc)),
        session_id: row.get(7)?,
    })
}

fn row_to_alert_spec(row: &rusqlite::Row) -> rusqlite::Result<AlertSpec> {
    let operator: String = row.get(3)?;
    let severity: String = row.get(5)?;
    let action: Option<String> = row.get(7)?;
    let created_at: String = row.get(9)?;
    Ok(AlertSpec {
        id: row.get(0)?,
        session_id: row.get(1)?,
        sensor_type: row.get(2)?,
        operator: Operator::from_str(&operator).unwrap_or(Operator::Gt),
        threshold: row.get(4)?,
        severity: Severity::from_str(&severity).unwrap_or(Severity::Warning),
        time_window_minutes: row.get(6)?,
        action: action.and_then(|a| Action::from_str(&a)),
        active: row.get::<_, i64>(8)? != 0,
        created_at: DateTime::parse_from_rfc3339(&created_at).map(|d| d.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now()),
    })
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SweepOutcome {
    pub marked_inactive: usize,
    pub deleted_turns: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(session_id: &str, query: &str) -> ConversationTurn {
        ConversationTurn {
            session_id: session_id.to_string(),
            query: query.to_string(),
            response: "ok".to_string(),
            sql: None,
            semantic_ir: None,
            metrics: None,
            chart: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn append_then_recent_turns_preserves_order() {
        let store = SessionStore::open_in_memory().unwrap();
        store.append_turn(&turn("s1", "first")).unwrap();
        store.append_turn(&turn("s1", "second")).unwrap();
        let turns = store.recent_turns("s1", 10).unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].query, "first");
        assert_eq!(turns[1].query, "second");
    }

    #[test]
    fn metadata_tracks_query_count() {
        let store = SessionStore::open_in_memory().unwrap();
        store.append_turn(&turn("s1", "a")).unwrap();
        store.append_turn(&turn("s1", "b")).unwrap();
        let meta = store.metadata("s1").unwrap().unwrap();
        assert_eq!(meta.total_queries, 2);
        assert!(meta.is_active);
    }

    fn alert(session_id: &str, sensor_type: &str, threshold: f64) -> AlertSpec {
        AlertSpec {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            sensor_type: sensor_type.to_string(),
            operator: Operator::Gt,
            threshold,
            severity: Severity::Warning,
            time_window_minutes: 0,
            action: None,
            active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn insert_then_list_alerts_round_trips() {
        let store = SessionStore::open_in_memory().unwrap();
        let a = alert("s1", "humidity", 80.0);
        store.insert_alert(&a, "humidity > 80").unwrap();
        let alerts = store.list_alerts("s1").unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].sensor_type, "humidity");
        assert_eq!(alerts[0].threshold, 80.0);
    }

    #[test]
    fn delete_alert_excludes_it_from_active_snapshot() {
        let store = SessionStore::open_in_memory().unwrap();
        let a = alert("s1", "humidity", 80.0);
        store.insert_alert(&a, "humidity > 80").unwrap();
        assert!(store.delete_alert(&a.id, "s1").unwrap());
        assert!(store.list_alerts("s1").unwrap().is_empty());
        assert!(store.list_active_alerts().unwrap().is_empty());
    }

    #[test]
    fn record_action_then_list_actions_round_trips() {
        let store = SessionStore::open_in_memory().unwrap();
        let a = alert("s1", "humidity", 80.0);
        store.insert_alert(&a, "humidity > 80").unwrap();
        store
            .record_action(&ActionLogEntry {
                id: Uuid::new_v4().to_string(),
                alert_id: a.id.clone(),
                action_type: "log".to_string(),
                status: "success".to_string(),
                message: "humidity 82 > 80".to_string(),
                timestamp: Utc::now(),
                completed_at: Some(Utc::now()),
                session_id: "s1".to_string(),
            })
            .unwrap();
        let actions = store.list_actions("s1").unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].status, "success");
    }

    #[test]
    fn list_actions_for_alert_ignores_other_alerts() {
        let store = SessionStore::open_in_memory().unwrap();
        let a = alert("s1", "humidity", 80.0);
        let b = alert("s1", "temperature", 30.0);
        store.insert_alert(&a, "humidity > 80").unwrap();
        store.insert_alert(&b, "temperature > 30").unwrap();
        store
            .record_action(&ActionLogEntry {
                id: Uuid::new_v4().to_string(),
                alert_id: a.id.clone(),
                action_type: "log".to_string(),
                status: "success".to_string(),
                message: "humidity 82 > 80".to_string(),
                timestamp: Utc::now(),
                completed_at: Some(Utc::now()),
                session_id: "s1".to_string(),
            })
            .unwrap();
        store
            .record_action(&ActionLogEntry {
                id: Uuid::new_v4().to_string(),
                alert_id: b.id.clone(),
                action_type: "log".to_string(),
                status: "success".to_string(),
                message: "temperature 31 > 30".to_string(),
                timestamp: Utc::now(),
                completed_at: Some(Utc::now()),
                session_id: "s1".to_string(),
            })
            .unwrap();

        let actions = store.list_actions_for_alert(&a.id).unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].alert_id, a.id);
    }

    #[test]
    fn sweep_marks_idle_sessions_inactive() {
        let store = SessionStore::open_in_memory().unwrap();
        store.append_turn(&turn("s1", "a")).unwrap();
        {
            let conn = store.conn.lock().unwrap();
            let old = (Utc::now() - Duration::minutes(60)).to_rfc3339();
            conn.execute(
                "UPDATE session_metadata SET last_activity = ?1 WHERE session_id = 's1'",
                params![old],
            )
            .unwrap();
        }
        let outcome = store.sweep(30, 7).unwrap();
        assert_eq!(outcome.marked_inactive, 1);
        let meta = store.metadata("s1").unwrap().unwrap();
        assert!(!meta.is_active);
    }
}
