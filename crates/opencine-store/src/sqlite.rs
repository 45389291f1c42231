//! SQLite-backed job store.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{info, warn};

use crate::schema::SCHEMA_SQL;
use crate::types::{JobStore, RenderJob};
use opencine_core::{Error, JobStatus, Result};

/// Job store persisted in a single SQLite file.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl SqliteJobStore {
    /// Open or create the store.
    ///
    /// `db_dir` is the directory (e.g., `data/db/`). The file will be `db_dir/opencine.db`.
    pub fn open(db_dir: impl AsRef<Path>) -> Result<Self> {
        let db_dir = db_dir.as_ref();
        std::fs::create_dir_all(db_dir)?;
        let db_path = db_dir.join("opencine.db");

        let conn = Self::create_connection(&db_path)?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| Error::Database(format!("Schema init failed: {}", e)))?;

        let store = Self {
            conn: Mutex::new(conn),
            db_path,
        };

        info!(
            "SqliteJobStore initialized: {} jobs, path={}",
            store.count_jobs()?,
            store.db_path.display()
        );

        Ok(store)
    }

    fn create_connection(db_path: &Path) -> Result<Connection> {
        let conn = Connection::open(db_path).map_err(|e| Error::Database(e.to_string()))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(conn)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn count_jobs(&self) -> Result<i64> {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM render_jobs", [], |row| row.get(0))
            .map_err(|e| Error::Database(e.to_string()))
    }

    fn row_to_job(row: &rusqlite::Row<'_>) -> RenderJob {
        let status: String = row.get("status").unwrap_or_default();
        RenderJob {
            id: row.get("id").unwrap_or(0),
            task_id: row.get("task_id").unwrap_or_default(),
            prompt: row.get("prompt").unwrap_or_default(),
            face_reference_image: row.get("face_reference_image").ok().flatten(),
            status: JobStatus::parse(&status).unwrap_or_else(|| {
                warn!("Unknown job status '{}' in store, reporting as failed", status);
                JobStatus::Failed
            }),
            output_url: row.get("output_url").ok().flatten(),
            error: row.get("error").ok().flatten(),
            created_at: row.get("created_at").unwrap_or(0),
            updated_at: row.get("updated_at").unwrap_or(0),
        }
    }
}

impl JobStore for SqliteJobStore {
    fn create(
        &self,
        task_id: &str,
        prompt: &str,
        face_reference_image: Option<&str>,
    ) -> Result<RenderJob> {
        let now = now_millis();
        let conn = self.conn.lock();
        let id = conn
            .prepare_cached(
                "INSERT INTO render_jobs (task_id, prompt, face_reference_image, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            )
            .map_err(|e| Error::Database(e.to_string()))?
            .insert(params![
                task_id,
                prompt,
                face_reference_image,
                JobStatus::Queued.as_str(),
                now
            ])
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(RenderJob {
            id,
            task_id: task_id.to_string(),
            prompt: prompt.to_string(),
            face_reference_image: face_reference_image.map(str::to_string),
            status: JobStatus::Queued,
            output_url: None,
            error: None,
            created_at: now,
            updated_at: now,
        })
    }

    fn find_by_task_id(&self, task_id: &str) -> Result<Option<RenderJob>> {
        let conn = self.conn.lock();
        let result = conn.prepare_cached("SELECT * FROM render_jobs WHERE task_id = ?1")
            .map_err(|e| Error::Database(e.to_string()))?
            .query_row(params![task_id], |row| Ok(Self::row_to_job(row)))
            .optional()
            .map_err(|e| Error::Database(e.to_string()));
        result
    }

    fn update_status(
        &self,
        task_id: &str,
        status: JobStatus,
        output_url: Option<&str>,
    ) -> Result<bool> {
        let conn = self.conn.lock();
        let count = conn
            .execute(
                "UPDATE render_jobs
                 SET status = ?1, output_url = COALESCE(?2, output_url), updated_at = ?3
                 WHERE task_id = ?4",
                params![status.as_str(), output_url, now_millis(), task_id],
            )
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(count > 0)
    }

    fn claim_queued(&self, task_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let count = conn
            .execute(
                "UPDATE render_jobs SET status = ?1, updated_at = ?2
                 WHERE task_id = ?3 AND status = ?4",
                params![
                    JobStatus::Processing.as_str(),
                    now_millis(),
                    task_id,
                    JobStatus::Queued.as_str()
                ],
            )
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(count > 0)
    }

    fn mark_failed(&self, task_id: &str, reason: &str) -> Result<bool> {
        // A published job keeps its Completed status.
        let conn = self.conn.lock();
        let count = conn
            .execute(
                "UPDATE render_jobs SET status = ?1, error = ?2, updated_at = ?3
                 WHERE task_id = ?4 AND status != ?5",
                params![
                    JobStatus::Failed.as_str(),
                    reason,
                    now_millis(),
                    task_id,
                    JobStatus::Completed.as_str()
                ],
            )
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(count > 0)
    }

    fn list_recent(&self, limit: usize) -> Result<Vec<RenderJob>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached("SELECT * FROM render_jobs ORDER BY created_at DESC, id DESC LIMIT ?1")
            .map_err(|e| Error::Database(e.to_string()))?;
        let rows = stmt
            .query_map(params![limit as i64], |row| Ok(Self::row_to_job(row)))
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    fn list_queued(&self) -> Result<Vec<RenderJob>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached("SELECT * FROM render_jobs WHERE status = ?1 ORDER BY created_at ASC, id ASC")
            .map_err(|e| Error::Database(e.to_string()))?;
        let rows = stmt
            .query_map(params![JobStatus::Queued.as_str()], |row| Ok(Self::row_to_job(row)))
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    fn fail_interrupted(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count = conn
            .execute(
                "UPDATE render_jobs SET status = ?1, error = ?2, updated_at = ?3 WHERE status = ?4",
                params![
                    JobStatus::Failed.as_str(),
                    "interrupted by service restart",
                    now_millis(),
                    JobStatus::Processing.as_str()
                ],
            )
            .map_err(|e| Error::Database(e.to_string()))?;
        if count > 0 {
            warn!("Marked {} interrupted jobs as failed", count);
        }
        Ok(count)
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store() -> (SqliteJobStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = SqliteJobStore::open(dir.path()).unwrap();
        (store, dir)
    }

    #[test]
    fn test_create_and_find() {
        let (store, _dir) = test_store();

        let job = store
            .create("task-1", "A lighthouse keeper finds a bottle", Some("faces/keeper.png"))
            .unwrap();
        assert_eq!(job.status, JobStatus::Queued);

        let found = store.find_by_task_id("task-1").unwrap().unwrap();
        assert_eq!(found.id, job.id);
        assert_eq!(found.prompt, "A lighthouse keeper finds a bottle");
        assert_eq!(found.face_reference_image.as_deref(), Some("faces/keeper.png"));
        assert_eq!(found.status, JobStatus::Queued);
        assert!(found.output_url.is_none());
    }

    #[test]
    fn test_find_unknown_task() {
        let (store, _dir) = test_store();
        assert!(store.find_by_task_id("missing").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_task_id_rejected() {
        let (store, _dir) = test_store();
        store.create("dup", "first prompt text", None).unwrap();
        let result = store.create("dup", "second prompt text", None);
        assert!(matches!(result, Err(Error::Database(_))));
    }

    #[test]
    fn test_status_transitions() {
        let (store, _dir) = test_store();
        store.create("task-2", "prompt for status", None).unwrap();

        assert!(store
            .update_status("task-2", JobStatus::Processing, None)
            .unwrap());
        let job = store.find_by_task_id("task-2").unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Processing);

        assert!(store
            .update_status("task-2", JobStatus::Completed, Some("file://b/renders/x/final.mp4"))
            .unwrap());
        let job = store.find_by_task_id("task-2").unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.output_url.as_deref(), Some("file://b/renders/x/final.mp4"));
        assert!(job.updated_at >= job.created_at);
    }

    #[test]
    fn test_update_unknown_task() {
        let (store, _dir) = test_store();
        assert!(!store
            .update_status("nope", JobStatus::Processing, None)
            .unwrap());
    }

    #[test]
    fn test_mark_failed_records_reason() {
        let (store, _dir) = test_store();
        store.create("task-3", "prompt for failure", None).unwrap();
        store
            .update_status("task-3", JobStatus::Processing, None)
            .unwrap();

        assert!(store.mark_failed("task-3", "clip stage failed: oom").unwrap());
        let job = store.find_by_task_id("task-3").unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("clip stage failed: oom"));
    }

    #[test]
    fn test_mark_failed_keeps_completed() {
        let (store, _dir) = test_store();
        store.create("task-4", "prompt already done", None).unwrap();
        store
            .update_status("task-4", JobStatus::Completed, Some("s3://b/k"))
            .unwrap();

        assert!(!store.mark_failed("task-4", "late failure").unwrap());
        let job = store.find_by_task_id("task-4").unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[test]
    fn test_claim_queued_only_once() {
        let (store, _dir) = test_store();
        store.create("task-5", "prompt claimed twice", None).unwrap();

        assert!(store.claim_queued("task-5").unwrap());
        assert!(!store.claim_queued("task-5").unwrap());
        assert_eq!(
            store.find_by_task_id("task-5").unwrap().unwrap().status,
            JobStatus::Processing
        );
        assert!(!store.claim_queued("missing").unwrap());
    }

    #[test]
    fn test_fail_interrupted() {
        let (store, _dir) = test_store();
        store.create("queued", "prompt still queued", None).unwrap();
        store.create("running", "prompt in progress", None).unwrap();
        store
            .update_status("running", JobStatus::Processing, None)
            .unwrap();

        assert_eq!(store.fail_interrupted().unwrap(), 1);
        assert_eq!(
            store.find_by_task_id("running").unwrap().unwrap().status,
            JobStatus::Failed
        );
        assert_eq!(
            store.find_by_task_id("queued").unwrap().unwrap().status,
            JobStatus::Queued
        );
    }

    #[test]
    fn test_list_recent_newest_first() {
        let (store, _dir) = test_store();
        for i in 0..5 {
            store
                .create(&format!("task-{}", i), "a prompt for listing", None)
                .unwrap();
        }
        let jobs = store.list_recent(3).unwrap();
        assert_eq!(jobs.len(), 3);
        assert_eq!(jobs[0].task_id, "task-4");
        assert_eq!(store.count_jobs().unwrap(), 5);
    }

    #[test]
    fn test_list_queued_oldest_first() {
        let (store, _dir) = test_store();
        store.create("a", "first queued prompt", None).unwrap();
        store.create("b", "second queued prompt", None).unwrap();
        store.create("c", "third prompt, running", None).unwrap();
        store
            .update_status("c", JobStatus::Processing, None)
            .unwrap();

        let queued: Vec<String> = store
            .list_queued()
            .unwrap()
            .into_iter()
            .map(|j| j.task_id)
            .collect();
        assert_eq!(queued, vec!["a", "b"]);
    }

    #[test]
    fn test_reopen_persists() {
        let dir = TempDir::new().unwrap();
        {
            let store = SqliteJobStore::open(dir.path()).unwrap();
            store.create("persist", "prompt that persists", None).unwrap();
        }
        let store = SqliteJobStore::open(dir.path()).unwrap();
        assert!(store.find_by_task_id("persist").unwrap().is_some());
    }
}
