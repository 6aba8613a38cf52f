//! SQLite storage implementation

use crate::routes::RouteSnapshot;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{PendingRequest, ResumeState, RunRecord, RunStatus};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Opens or creates the database at `path`
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    fn load_seen(&self) -> StorageResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT fingerprint FROM seen_fingerprints")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StorageError::from)
    }

    fn load_pending(&self) -> StorageResult<Vec<PendingRequest>> {
        let mut stmt = self.conn.prepare(
            "SELECT method, url, body, depth, priority FROM pending_requests ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(PendingRequest {
                method: row.get(0)?,
                url: row.get(1)?,
                body: row.get(2)?,
                depth: row.get::<_, i64>(3)? as u32,
                priority: row.get::<_, i64>(4)? as i32,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StorageError::from)
    }

    fn load_routes(&self) -> StorageResult<Vec<RouteSnapshot>> {
        let mut stmt = self.conn.prepare(
            "SELECT route_id, url, tag, success_count, failure_count, policy_blocks,
                    avg_latency_ms, score, blacklisted
             FROM route_health ORDER BY route_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(RouteSnapshot {
                id: row.get(0)?,
                url: row.get(1)?,
                tag: row.get(2)?,
                success_count: row.get::<_, i64>(3)? as u64,
                failure_count: row.get::<_, i64>(4)? as u64,
                policy_blocks: row.get::<_, i64>(5)? as u64,
                avg_latency_ms: row.get(6)?,
                score: row.get(7)?,
                blacklisted: row.get::<_, i64>(8)? != 0,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StorageError::from)
    }
}

impl Storage for SqliteStorage {
    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO runs (started_at, config_hash, status) VALUES (?1, ?2, ?3)",
            params![now, config_hash, RunStatus::Running.to_db_string()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn finish_run(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let updated = self.conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![status.to_db_string(), now, run_id],
        )?;
        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, started_at, finished_at, config_hash, status
                 FROM runs ORDER BY id DESC LIMIT 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(id, started_at, finished_at, config_hash, status)| {
            let status = RunStatus::from_db_string(&status)
                .ok_or_else(|| StorageError::Database(format!("unknown run status '{}'", status)))?;
            Ok(RunRecord {
                id,
                started_at,
                finished_at,
                config_hash,
                status,
            })
        })
        .transpose()
    }

    fn load_resume_state(&self) -> StorageResult<ResumeState> {
        Ok(ResumeState {
            seen: self.load_seen()?,
            pending: self.load_pending()?,
            routes: self.load_routes()?,
        })
    }

    fn save_resume_state(&mut self, run_id: i64, state: &ResumeState) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;
        {
            let mut insert_seen = tx.prepare(
                "INSERT OR IGNORE INTO seen_fingerprints (fingerprint, first_run) VALUES (?1, ?2)",
            )?;
            for fingerprint in &state.seen {
                insert_seen.execute(params![fingerprint, run_id])?;
            }

            // The pending set is a snapshot of the frontier, not a log
            tx.execute("DELETE FROM pending_requests", [])?;
            let mut insert_pending = tx.prepare(
                "INSERT INTO pending_requests (method, url, body, depth, priority)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for request in &state.pending {
                insert_pending.execute(params![
                    request.method,
                    request.url,
                    request.body,
                    request.depth as i64,
                    request.priority as i64,
                ])?;
            }

            let mut upsert_route = tx.prepare(
                "INSERT INTO route_health
                    (route_id, url, tag, success_count, failure_count, policy_blocks,
                     avg_latency_ms, score, blacklisted, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(route_id) DO UPDATE SET
                    url = excluded.url,
                    tag = excluded.tag,
                    success_count = excluded.success_count,
                    failure_count = excluded.failure_count,
                    policy_blocks = excluded.policy_blocks,
                    avg_latency_ms = excluded.avg_latency_ms,
                    score = excluded.score,
                    blacklisted = excluded.blacklisted,
                    updated_at = excluded.updated_at",
            )?;
            for route in &state.routes {
                upsert_route.execute(params![
                    route.id,
                    route.url,
                    route.tag,
                    route.success_count as i64,
                    route.failure_count as i64,
                    route.policy_blocks as i64,
                    route.avg_latency_ms,
                    route.score,
                    route.blacklisted as i64,
                    now,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn clear_resume_state(&mut self) -> StorageResult<()> {
        self.conn.execute_batch(
            "DELETE FROM seen_fingerprints;
             DELETE FROM pending_requests;
             DELETE FROM route_health;",
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(id: &str, success: u64, failure: u64, blacklisted: bool) -> RouteSnapshot {
        RouteSnapshot {
            id: id.to_string(),
            url: format!("http://{}.proxy.test:3128", id),
            tag: Some("eu".to_string()),
            success_count: success,
            failure_count: failure,
            policy_blocks: 1,
            avg_latency_ms: 120.5,
            score: 75.0,
            blacklisted,
        }
    }

    fn pending(url: &str) -> PendingRequest {
        PendingRequest {
            method: "GET".to_string(),
            url: url.to_string(),
            body: None,
            depth: 1,
            priority: 0,
        }
    }

    #[test]
    fn test_run_lifecycle() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        assert!(storage.get_latest_run().unwrap().is_none());

        let run = storage.create_run("abc123").unwrap();
        storage.finish_run(run, RunStatus::Interrupted).unwrap();

        let latest = storage.get_latest_run().unwrap().unwrap();
        assert_eq!(latest.id, run);
        assert_eq!(latest.config_hash, "abc123");
        assert_eq!(latest.status, RunStatus::Interrupted);
        assert!(latest.finished_at.is_some());

        assert!(matches!(
            storage.finish_run(run + 100, RunStatus::Completed),
            Err(StorageError::RunNotFound(_))
        ));
    }

    #[test]
    fn test_resume_state_merges() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let run = storage.create_run("h").unwrap();

        storage
            .save_resume_state(
                run,
                &ResumeState {
                    seen: vec!["f1".to_string(), "f2".to_string()],
                    pending: vec![pending("https://a.com/1")],
                    routes: vec![snapshot("r1", 3, 1, false)],
                },
            )
            .unwrap();
        storage
            .save_resume_state(
                run,
                &ResumeState {
                    seen: vec!["f2".to_string(), "f3".to_string()],
                    pending: vec![pending("https://a.com/2"), pending("https://b.com/")],
                    routes: vec![snapshot("r1", 4, 9, true)],
                },
            )
            .unwrap();

        let state = storage.load_resume_state().unwrap();
        let mut seen = state.seen.clone();
        seen.sort();
        assert_eq!(seen, ["f1", "f2", "f3"]);
        // pending is replaced, not merged
        let urls: Vec<_> = state.pending.iter().map(|p| p.url.as_str()).collect();
        assert_eq!(urls, ["https://a.com/2", "https://b.com/"]);
        assert_eq!(state.routes.len(), 1);
        assert_eq!(state.routes[0], snapshot("r1", 4, 9, true));
    }

    #[test]
    fn test_clear_resume_state() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let run = storage.create_run("h").unwrap();
        storage
            .save_resume_state(
                run,
                &ResumeState {
                    seen: vec!["f1".to_string()],
                    pending: vec![pending("https://a.com/1")],
                    routes: vec![snapshot("r1", 1, 0, false)],
                },
            )
            .unwrap();

        storage.clear_resume_state().unwrap();
        assert!(storage.load_resume_state().unwrap().is_empty());
        assert!(storage.get_latest_run().unwrap().is_some());
    }
}
