//! Database schema constants.
//!
//! Each constant is a single SQL statement so it can run as one prepared
//! query inside a migration transaction.

/// SQL schema for creating the jobs table.
pub const CREATE_JOBS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id UUID PRIMARY KEY,
    payload JSONB NOT NULL,
    status VARCHAR(16) NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'processing', 'completed', 'failed')),
    attempts INTEGER NOT NULL DEFAULT 0 CHECK (attempts >= 0),
    priority INTEGER NOT NULL DEFAULT 0,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    started_at TIMESTAMPTZ,
    completed_at TIMESTAMPTZ,
    failed_at TIMESTAMPTZ,
    worker_id VARCHAR(255),
    processing_time_ms BIGINT,
    last_error TEXT,
    retry_at TIMESTAMPTZ
)
"#;

/// SQL schema for creating the dead_letters table.
pub const CREATE_DEAD_LETTERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS dead_letters (
    id UUID PRIMARY KEY,
    original_job_id UUID NOT NULL UNIQUE REFERENCES jobs(id),
    payload JSONB NOT NULL,
    attempts INTEGER NOT NULL,
    error TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    failed_at TIMESTAMPTZ NOT NULL
)
"#;

/// Claim lookup: pending jobs in claim order.
pub const CREATE_PENDING_CLAIM_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_jobs_pending_claim
    ON jobs(priority, created_at)
    WHERE status = 'pending'
"#;

/// Reaper lookup: processing jobs by claim time.
pub const CREATE_PROCESSING_STARTED_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_jobs_processing_started
    ON jobs(started_at)
    WHERE status = 'processing'
"#;

/// Throughput lookup: completed jobs by completion time.
pub const CREATE_COMPLETED_AT_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_jobs_completed_at
    ON jobs(completed_at)
    WHERE status = 'completed'
"#;

/// Dead letters listing, newest first.
pub const CREATE_DEAD_LETTERS_FAILED_AT_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_dead_letters_failed_at ON dead_letters(failed_at)
"#;

/// Returns all schema creation statements in the correct order.
pub fn all_schema_statements() -> Vec<&'static str> {
    vec![
        CREATE_JOBS_TABLE,
        CREATE_DEAD_LETTERS_TABLE,
        CREATE_PENDING_CLAIM_INDEX,
        CREATE_PROCESSING_STARTED_INDEX,
        CREATE_COMPLETED_AT_INDEX,
        CREATE_DEAD_LETTERS_FAILED_AT_INDEX,
    ]
}
