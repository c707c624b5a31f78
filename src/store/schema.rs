/// Schema for the structured data tables.
pub const SCHEMA: &str = r#"
-- Entity records, one opaque JSON document per (table, id)
CREATE TABLE IF NOT EXISTS entities (
    table_name TEXT NOT NULL,
    id TEXT NOT NULL,
    doc BLOB NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (table_name, id)
);

-- Parent-keyed collections, the whole ordered sequence as one JSON array
CREATE TABLE IF NOT EXISTS collections (
    table_name TEXT NOT NULL,
    parent_id TEXT NOT NULL,
    doc BLOB NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (table_name, parent_id)
);

-- Writes issued while offline, awaiting replay
CREATE TABLE IF NOT EXISTS pending_mutations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    payload BLOB NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_pending_created
    ON pending_mutations(created_at, id);
"#;
