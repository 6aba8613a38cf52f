//! Database schema for resume state

pub const SCHEMA_SQL: &str = r#"
-- Track dispatch runs
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL
);

-- Fingerprints of requests already accepted by the scheduler
CREATE TABLE IF NOT EXISTS seen_fingerprints (
    fingerprint TEXT PRIMARY KEY,
    first_run INTEGER NOT NULL REFERENCES runs(id)
);

-- Requests left queued or in flight by the last stopped run
CREATE TABLE IF NOT EXISTS pending_requests (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    body TEXT,
    depth INTEGER NOT NULL,
    priority INTEGER NOT NULL DEFAULT 0
);

-- Last known health of each egress route
CREATE TABLE IF NOT EXISTS route_health (
    route_id TEXT PRIMARY KEY,
    url TEXT NOT NULL,
    tag TEXT,
    success_count INTEGER NOT NULL DEFAULT 0,
    failure_count INTEGER NOT NULL DEFAULT 0,
    policy_blocks INTEGER NOT NULL DEFAULT 0,
    avg_latency_ms REAL NOT NULL DEFAULT 0,
    score REAL NOT NULL DEFAULT 100,
    blacklisted INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL
);
"#;

pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)
}
