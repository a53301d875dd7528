use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use serde_json::Value as JsonValue;

/// Partial view of a task; `None` fields keep whatever was stored before.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressRow<'a> {
    pub progress: Option<f64>,
    pub stage: Option<&'a str>,
    pub status: Option<&'a str>,
    pub message: Option<&'a str>,
}

#[derive(Clone)]
pub struct SqliteStore {
    path: String,
}

impl SqliteStore {
    pub fn new(path: &str) -> Result<Self> {
        if path.trim().is_empty() {
            anyhow::bail!("SQLITE_PATH is empty");
        }
        if path != ":memory:" && !path.starts_with("file:") {
            if let Some(parent) = Path::new(path).parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create sqlite parent dir for {path}"))?;
            }
        }

        // rusqlite::Connection is not Send/Sync; short-lived connections per operation.
        Ok(Self { path: path.to_string() })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn open_conn(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path).with_context(|| format!("open sqlite {}", self.path))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Ok(conn)
    }

    pub fn init_db(&self) -> Result<()> {
        let conn = self.open_conn()?;
        conn.execute_batch(
            r#"
CREATE TABLE IF NOT EXISTS runtime_status (
  component TEXT PRIMARY KEY,
  ts REAL,
  level TEXT,
  message TEXT,
  detail TEXT
);

CREATE TABLE IF NOT EXISTS task_events (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  ts REAL,
  task_id TEXT,
  kind TEXT,
  payload_json TEXT
);

CREATE INDEX IF NOT EXISTS idx_task_events_ts ON task_events(ts);
CREATE INDEX IF NOT EXISTS idx_task_events_task ON task_events(task_id, ts);

CREATE TABLE IF NOT EXISTS task_progress (
  task_id TEXT PRIMARY KEY,
  ts REAL,
  progress REAL,
  stage TEXT,
  status TEXT,
  message TEXT
);
"#,
        )?;
        Ok(())
    }

    pub fn upsert_runtime_status(
        &self,
        component: &str,
        level: &str,
        message: &str,
        detail: Option<&str>,
        ts: f64,
    ) -> Result<()> {
        let conn = self.open_conn()?;
        conn.execute(
            r#"
INSERT INTO runtime_status(component, ts, level, message, detail)
VALUES(?,?,?,?,?)
ON CONFLICT(component) DO UPDATE SET
  ts=excluded.ts,
  level=excluded.level,
  message=excluded.message,
  detail=excluded.detail
"#,
            params![component, ts, level, message, detail],
        )?;
        Ok(())
    }

    pub fn insert_task_event(&self, ts: f64, task_id: &str, kind: &str, payload: &JsonValue) -> Result<()> {
        let conn = self.open_conn()?;
        conn.execute(
            "INSERT INTO task_events(ts, task_id, kind, payload_json) VALUES(?,?,?,?)",
            params![ts, task_id, kind, payload.to_string()],
        )?;
        Ok(())
    }

    pub fn upsert_task_progress(&self, task_id: &str, ts: f64, row: &ProgressRow<'_>) -> Result<()> {
        let conn = self.open_conn()?;
        conn.execute(
            r#"
INSERT INTO task_progress(task_id, ts, progress, stage, status, message)
VALUES(?,?,?,?,?,?)
ON CONFLICT(task_id) DO UPDATE SET
  ts=excluded.ts,
  progress=COALESCE(excluded.progress, task_progress.progress),
  stage=COALESCE(excluded.stage, task_progress.stage),
  status=COALESCE(excluded.status, task_progress.status),
  message=COALESCE(excluded.message, task_progress.message)
"#,
            params![task_id, ts, row.progress, row.stage, row.status, row.message],
        )?;
        Ok(())
    }

    pub fn fetch_runtime_statuses(&self) -> Result<JsonValue> {
        let conn = self.open_conn()?;
        let mut stmt = conn.prepare("SELECT component, ts, level, message, detail FROM runtime_status ORDER BY ts DESC")?;
        let mut rows = stmt.query([])?;
        let mut out = serde_json::Map::new();
        while let Some(r) = rows.next()? {
            let component: String = r.get(0)?;
            let ts: f64 = r.get(1)?;
            let level: String = r.get(2)?;
            let message: String = r.get(3)?;
            let detail: Option<String> = r.get(4)?;
            out.insert(
                component.clone(),
                serde_json::json!({
                    "component": component,
                    "ts": ts,
                    "level": level,
                    "message": message,
                    "detail": detail.unwrap_or_default(),
                }),
            );
        }
        Ok(JsonValue::Object(out))
    }

    pub fn fetch_recent_events(&self, limit: usize, task_id: Option<&str>) -> Result<Vec<JsonValue>> {
        let conn = self.open_conn()?;
        let (sql, params_vec): (&str, Vec<rusqlite::types::Value>) = match task_id {
            None => (
                r#"
SELECT id, ts, task_id, kind, payload_json
FROM task_events
ORDER BY id DESC
LIMIT ?
"#,
                vec![rusqlite::types::Value::Integer(limit as i64)],
            ),
            Some(id) => (
                r#"
SELECT id, ts, task_id, kind, payload_json
FROM task_events
WHERE task_id = ?
ORDER BY id DESC
LIMIT ?
"#,
                vec![
                    rusqlite::types::Value::Text(id.to_string()),
                    rusqlite::types::Value::Integer(limit as i64),
                ],
            ),
        };

        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(params_vec))?;
        let mut out = vec![];
        while let Some(r) = rows.next()? {
            let payload_json: String = r.get(4)?;
            let payload: JsonValue = serde_json::from_str(&payload_json).unwrap_or(JsonValue::Null);
            out.push(serde_json::json!({
                "id": r.get::<_, i64>(0)?,
                "ts": r.get::<_, f64>(1)?,
                "task_id": r.get::<_, String>(2)?,
                "kind": r.get::<_, String>(3)?,
                "payload": payload,
            }));
        }
        Ok(out)
    }

    pub fn fetch_task_progress(&self) -> Result<Vec<JsonValue>> {
        let conn = self.open_conn()?;
        let mut stmt = conn.prepare(
            r#"
SELECT task_id, ts, progress, stage, status, message
FROM task_progress
ORDER BY ts DESC
"#,
        )?;
        let mut rows = stmt.query([])?;
        let mut out = vec![];
        while let Some(r) = rows.next()? {
            out.push(serde_json::json!({
                "task_id": r.get::<_, String>(0)?,
                "ts": r.get::<_, f64>(1)?,
                "progress": r.get::<_, Option<f64>>(2)?,
                "stage": r.get::<_, Option<String>>(3)?,
                "status": r.get::<_, Option<String>>(4)?,
                "message": r.get::<_, Option<String>>(5)?,
            }));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("journal.sqlite");
        let store = SqliteStore::new(path.to_str().unwrap()).unwrap();
        store.init_db().unwrap();
        (dir, store)
    }

    #[test]
    fn rejects_empty_path() {
        assert!(SqliteStore::new("  ").is_err());
    }

    #[test]
    fn runtime_status_is_upserted_per_component() {
        let (_dir, store) = temp_store();
        store
            .upsert_runtime_status("realtime", "info", "connecting", None, 1.0)
            .unwrap();
        store
            .upsert_runtime_status("realtime", "info", "connected", Some("{}"), 2.0)
            .unwrap();

        let statuses = store.fetch_runtime_statuses().unwrap();
        let obj = statuses.as_object().unwrap();
        assert_eq!(obj.len(), 1);
        assert_eq!(obj["realtime"]["message"], "connected");
        assert_eq!(obj["realtime"]["detail"], "{}");
    }

    #[test]
    fn events_are_newest_first_and_filterable() {
        let (_dir, store) = temp_store();
        store.insert_task_event(1.0, "a", "log", &json!({"message": "one"})).unwrap();
        store.insert_task_event(2.0, "b", "progress", &json!({"progress": 10})).unwrap();
        store.insert_task_event(3.0, "a", "status", &json!({"status": "done"})).unwrap();

        let all = store.fetch_recent_events(10, None).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0]["kind"], "status");

        let only_a = store.fetch_recent_events(10, Some("a")).unwrap();
        assert_eq!(only_a.len(), 2);
        assert!(only_a.iter().all(|e| e["task_id"] == "a"));

        let limited = store.fetch_recent_events(1, None).unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0]["payload"]["status"], "done");
    }

    #[test]
    fn progress_merges_partial_updates() {
        let (_dir, store) = temp_store();
        store
            .upsert_task_progress(
                "job",
                1.0,
                &ProgressRow {
                    progress: Some(40.0),
                    stage: Some("download"),
                    ..Default::default()
                },
            )
            .unwrap();
        store
            .upsert_task_progress(
                "job",
                2.0,
                &ProgressRow {
                    status: Some("running"),
                    ..Default::default()
                },
            )
            .unwrap();

        let rows = store.fetch_task_progress().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["progress"], 40.0);
        assert_eq!(rows[0]["stage"], "download");
        assert_eq!(rows[0]["status"], "running");
        assert_eq!(rows[0]["ts"], 2.0);
    }
}
