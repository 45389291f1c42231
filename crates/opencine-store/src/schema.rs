//! Database schema SQL for the job store.

pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS render_jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id TEXT NOT NULL UNIQUE,
    prompt TEXT NOT NULL,
    face_reference_image TEXT,
    status TEXT NOT NULL DEFAULT 'queued',
    output_url TEXT,
    error TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_render_jobs_status ON render_jobs(status);
CREATE INDEX IF NOT EXISTS idx_render_jobs_created ON render_jobs(created_at);
"#;
