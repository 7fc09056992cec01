//! Database Migrations
//!
//! Schema migration definitions for the storage layer.

/// Migration definitions
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Initial memory tiers: L0 raw log, L2 insights with FTS5, working memory, stale archive, episodes",
        up: MIGRATION_V1_UP,
    },
    Migration {
        version: 2,
        description: "Knowledge graph: typed nodes and directed edges with property maps",
        up: MIGRATION_V2_UP,
    },
    Migration {
        version: 3,
        description: "Evaluation: ground truth with dual-judge scores, API cost log; FTS5 porter tokenizer",
        up: MIGRATION_V3_UP,
    },
];

/// A database migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Version number
    pub version: u32,
    /// Description
    pub description: &'static str,
    /// SQL to apply
    pub up: &'static str,
}

/// V1: Memory tiers
const MIGRATION_V1_UP: &str = r#"
-- L0: append-only raw dialogue log. Rows are never mutated or deleted.
CREATE TABLE IF NOT EXISTS l0_raw (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    speaker TEXT NOT NULL,
    content TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}'
);

CREATE INDEX IF NOT EXISTS idx_l0_session_time ON l0_raw(session_id, timestamp);

-- L2: compressed semantic insights with embeddings and L0 provenance
CREATE TABLE IF NOT EXISTS l2_insights (
    id TEXT PRIMARY KEY,
    content TEXT NOT NULL,
    embedding BLOB NOT NULL,
    dimensions INTEGER NOT NULL,
    source_ids TEXT NOT NULL DEFAULT '[]',
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_l2_created ON l2_insights(created_at);

-- FTS5 virtual table for lexical search over insight content
CREATE VIRTUAL TABLE IF NOT EXISTS l2_fts USING fts5(
    id,
    content,
    content='l2_insights',
    content_rowid='rowid'
);

-- Triggers to keep FTS in sync
CREATE TRIGGER IF NOT EXISTS l2_ai AFTER INSERT ON l2_insights BEGIN
    INSERT INTO l2_fts(rowid, id, content)
    VALUES (NEW.rowid, NEW.id, NEW.content);
END;

CREATE TRIGGER IF NOT EXISTS l2_ad AFTER DELETE ON l2_insights BEGIN
    INSERT INTO l2_fts(l2_fts, rowid, id, content)
    VALUES ('delete', OLD.rowid, OLD.id, OLD.content);
END;

CREATE TRIGGER IF NOT EXISTS l2_au AFTER UPDATE ON l2_insights BEGIN
    INSERT INTO l2_fts(l2_fts, rowid, id, content)
    VALUES ('delete', OLD.rowid, OLD.id, OLD.content);
    INSERT INTO l2_fts(rowid, id, content)
    VALUES (NEW.rowid, NEW.id, NEW.content);
END;

-- Working memory: bounded mutable context window
CREATE TABLE IF NOT EXISTS working_memory (
    id TEXT PRIMARY KEY,
    content TEXT NOT NULL,
    importance REAL NOT NULL CHECK (importance >= 0.0 AND importance <= 1.0),
    last_accessed TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_working_last_accessed ON working_memory(last_accessed);
CREATE INDEX IF NOT EXISTS idx_working_importance ON working_memory(importance);

-- Stale archive: graveyard for evicted working items
CREATE TABLE IF NOT EXISTS stale_memory (
    id TEXT PRIMARY KEY,
    original_content TEXT NOT NULL,
    importance REAL NOT NULL,
    archived_at TEXT NOT NULL,
    reason TEXT NOT NULL CHECK (reason IN ('LRU_EVICTION', 'MANUAL_ARCHIVE'))
);

CREATE INDEX IF NOT EXISTS idx_stale_archived_at ON stale_memory(archived_at);
CREATE INDEX IF NOT EXISTS idx_stale_importance ON stale_memory(importance);

-- Episode memory: reflection records for verbal reinforcement
CREATE TABLE IF NOT EXISTS episode_memory (
    id TEXT PRIMARY KEY,
    query TEXT NOT NULL,
    reward REAL NOT NULL CHECK (reward >= -1.0 AND reward <= 1.0),
    reflection TEXT NOT NULL,
    embedding BLOB NOT NULL,
    dimensions INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_episode_created ON episode_memory(created_at);

-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);

INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, datetime('now'));
"#;

/// V2: Knowledge graph
const MIGRATION_V2_UP: &str = r#"
CREATE TABLE IF NOT EXISTS graph_nodes (
    id TEXT PRIMARY KEY,
    label TEXT NOT NULL,
    name TEXT NOT NULL,
    properties TEXT NOT NULL DEFAULT '{}',
    vector_id TEXT REFERENCES l2_insights(id),
    created_at TEXT NOT NULL,
    UNIQUE(label, name)
);

CREATE INDEX IF NOT EXISTS idx_graph_nodes_name ON graph_nodes(name);

CREATE TABLE IF NOT EXISTS graph_edges (
    id TEXT PRIMARY KEY,
    source_id TEXT NOT NULL REFERENCES graph_nodes(id) ON DELETE CASCADE,
    target_id TEXT NOT NULL REFERENCES graph_nodes(id) ON DELETE CASCADE,
    relation TEXT NOT NULL,
    weight REAL NOT NULL DEFAULT 1.0 CHECK (weight >= 0.0),
    properties TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    modified_at TEXT NOT NULL,
    last_accessed TEXT NOT NULL,
    UNIQUE(source_id, target_id, relation)
);

CREATE INDEX IF NOT EXISTS idx_graph_edges_source ON graph_edges(source_id);
CREATE INDEX IF NOT EXISTS idx_graph_edges_target ON graph_edges(target_id);
CREATE INDEX IF NOT EXISTS idx_graph_edges_relation ON graph_edges(relation);

UPDATE schema_version SET version = 2, applied_at = datetime('now');
"#;

/// V3: Evaluation tables + FTS5 porter tokenizer (better keyword recall via stemming)
const MIGRATION_V3_UP: &str = r#"
CREATE TABLE IF NOT EXISTS ground_truth (
    id TEXT PRIMARY KEY,
    query TEXT NOT NULL,
    expected_docs TEXT NOT NULL DEFAULT '[]',
    judge1_score TEXT NOT NULL,
    judge2_score TEXT NOT NULL,
    judge1_model TEXT NOT NULL,
    judge2_model TEXT NOT NULL,
    kappa REAL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_ground_truth_created ON ground_truth(created_at);

CREATE TABLE IF NOT EXISTS api_cost_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    provider TEXT NOT NULL,
    operation TEXT NOT NULL,
    tokens INTEGER NOT NULL DEFAULT 0,
    estimated_cost REAL NOT NULL DEFAULT 0.0,
    query_id TEXT
);

CREATE INDEX IF NOT EXISTS idx_api_cost_timestamp ON api_cost_log(timestamp);
CREATE INDEX IF NOT EXISTS idx_api_cost_query ON api_cost_log(query_id);

-- FTS5 porter tokenizer upgrade (stemming improves keyword recall)
DROP TRIGGER IF EXISTS l2_ai;
DROP TRIGGER IF EXISTS l2_ad;
DROP TRIGGER IF EXISTS l2_au;
DROP TABLE IF EXISTS l2_fts;

CREATE VIRTUAL TABLE l2_fts USING fts5(
    id, content,
    content='l2_insights',
    content_rowid='rowid',
    tokenize='porter ascii'
);

INSERT INTO l2_fts(l2_fts) VALUES('rebuild');

CREATE TRIGGER l2_ai AFTER INSERT ON l2_insights BEGIN
    INSERT INTO l2_fts(rowid, id, content)
    VALUES (NEW.rowid, NEW.id, NEW.content);
END;

CREATE TRIGGER l2_ad AFTER DELETE ON l2_insights BEGIN
    INSERT INTO l2_fts(l2_fts, rowid, id, content)
    VALUES ('delete', OLD.rowid, OLD.id, OLD.content);
END;

CREATE TRIGGER l2_au AFTER UPDATE ON l2_insights BEGIN
    INSERT INTO l2_fts(l2_fts, rowid, id, content)
    VALUES ('delete', OLD.rowid, OLD.id, OLD.content);
    INSERT INTO l2_fts(rowid, id, content)
    VALUES (NEW.rowid, NEW.id, NEW.content);
END;

UPDATE schema_version SET version = 3, applied_at = datetime('now');
"#;

/// Get current schema version from database
pub fn get_current_version(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .or(Ok(0))
}

/// Apply pending migrations
pub fn apply_migrations(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    let current_version = get_current_version(conn)?;
    let mut applied = 0;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                "Applying migration v{}: {}",
                migration.version,
                migration.description
            );

            // execute_batch handles multi-statement SQL including triggers
            conn.execute_batch(migration.up)?;
            applied += 1;
        }
    }

    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_apply_on_fresh_database() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let applied = apply_migrations(&conn).unwrap();
        assert_eq!(applied as usize, MIGRATIONS.len());
        assert_eq!(get_current_version(&conn).unwrap(), 3);
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        apply_migrations(&conn).unwrap();
        let second_run = apply_migrations(&conn).unwrap();
        assert_eq!(second_run, 0);
    }

    #[test]
    fn test_schema_constraints_enforced() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        apply_migrations(&conn).unwrap();

        // importance range check
        let result = conn.execute(
            "INSERT INTO working_memory (id, content, importance, last_accessed, created_at)
             VALUES ('w1', 'x', 1.5, datetime('now'), datetime('now'))",
            [],
        );
        assert!(result.is_err());

        // reward range check
        let result = conn.execute(
            "INSERT INTO episode_memory (id, query, reward, reflection, embedding, dimensions, created_at)
             VALUES ('e1', 'q', -2.0, 'r', x'00000000', 1, datetime('now'))",
            [],
        );
        assert!(result.is_err());

        // archive reason enum check
        let result = conn.execute(
            "INSERT INTO stale_memory (id, original_content, importance, archived_at, reason)
             VALUES ('s1', 'x', 0.5, datetime('now'), 'OTHER')",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_unique_label_name_on_nodes() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        apply_migrations(&conn).unwrap();

        conn.execute(
            "INSERT INTO graph_nodes (id, label, name, created_at)
             VALUES ('n1', 'technology', 'tokio', datetime('now'))",
            [],
        )
        .unwrap();

        let duplicate = conn.execute(
            "INSERT INTO graph_nodes (id, label, name, created_at)
             VALUES ('n2', 'technology', 'tokio', datetime('now'))",
            [],
        );
        assert!(duplicate.is_err());
    }
}
