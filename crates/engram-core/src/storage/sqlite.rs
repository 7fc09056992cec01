//! SQLite Storage Implementation
//!
//! Separate reader/writer connections behind mutexes give interior
//! mutability: all methods take `&self`, so the protocol layer shares one
//! `Arc<Storage>`. Every mutation runs as one explicit transaction on the
//! writer; conflicting working-memory updates serialise on the writer
//! lock, which is what keeps the capacity invariant under concurrency.

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;
use std::sync::Mutex;
use uuid::Uuid;

use crate::config::EngramConfig;
use crate::embeddings::Embedding;
use crate::error::{EngramError, Result};
use crate::judges::DualJudgeOutcome;
use crate::memory::{
    ApiCostRecord, ArchiveReason, DialogueInput, Episode, EpisodeInput, GroundTruthRecord, Insight,
    InsightInput, Metadata, RawEntry, StaleItem, WorkingItem, WorkingUpdate,
};
use crate::providers::CostRecorder;
use crate::search::sanitize_fts5_query;

#[cfg(feature = "vector-search")]
use crate::search::{VectorIndex, VectorIndexConfig};

// ============================================================================
// STORAGE
// ============================================================================

/// Main storage struct.
pub struct Storage {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
    config: EngramConfig,
    #[cfg(feature = "vector-search")]
    vector_index: Mutex<VectorIndex>,
}

impl Storage {
    /// Apply performance PRAGMAs to a connection.
    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    /// Open (or create) the database under the configured data directory.
    pub fn new(config: &EngramConfig) -> Result<Self> {
        let dir = match &config.data_dir {
            Some(dir) => dir.clone(),
            None => {
                let proj_dirs = ProjectDirs::from("dev", "engram", "core").ok_or_else(|| {
                    EngramError::Internal("could not determine project directories".to_string())
                })?;
                proj_dirs.data_dir().to_path_buf()
            }
        };
        std::fs::create_dir_all(&dir)?;
        Self::open(dir.join("engram.db"), config)
    }

    /// Open a database at an explicit path.
    pub fn open(path: PathBuf, config: &EngramConfig) -> Result<Self> {
        let writer_conn = Connection::open(&path)?;
        Self::configure_connection(&writer_conn)?;

        // Migrations run on the writer only
        super::migrations::apply_migrations(&writer_conn)?;

        let reader_conn = Connection::open(&path)?;
        Self::configure_connection(&reader_conn)?;

        #[cfg(feature = "vector-search")]
        let vector_index = VectorIndex::new(VectorIndexConfig::with_dimensions(
            config.embedding.dimensions,
        ))
        .map_err(|e| EngramError::Internal(format!("failed to create vector index: {}", e)))?;

        let storage = Self {
            writer: Mutex::new(writer_conn),
            reader: Mutex::new(reader_conn),
            config: config.clone(),
            #[cfg(feature = "vector-search")]
            vector_index: Mutex::new(vector_index),
        };

        #[cfg(feature = "vector-search")]
        storage.load_embeddings_into_index()?;

        Ok(storage)
    }

    pub fn config(&self) -> &EngramConfig {
        &self.config
    }

    fn writer(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.writer
            .lock()
            .map_err(|_| EngramError::Internal("writer lock poisoned".into()))
    }

    fn reader(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.reader
            .lock()
            .map_err(|_| EngramError::Internal("reader lock poisoned".into()))
    }

    pub(super) fn writer_guard(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.writer()
    }

    pub(super) fn reader_guard(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.reader()
    }

    /// Rebuild the HNSW index from persisted embeddings at startup.
    #[cfg(feature = "vector-search")]
    fn load_embeddings_into_index(&self) -> Result<()> {
        let rows: Vec<(String, Vec<u8>)> = {
            let reader = self.reader()?;
            let mut stmt = reader.prepare("SELECT id, embedding FROM l2_insights")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .filter_map(|r| r.ok())
                .collect();
            rows
        };

        let mut index = self
            .vector_index
            .lock()
            .map_err(|_| EngramError::Internal("vector index lock poisoned".into()))?;

        for (id, bytes) in rows {
            if let Some(embedding) = Embedding::from_bytes(&bytes) {
                if let Err(e) = index.add(&id, &embedding.vector) {
                    tracing::warn!("Failed to index embedding for {}: {}", id, e);
                }
            }
        }
        Ok(())
    }

    fn check_dimensions(&self, embedding: &Embedding, field: &str) -> Result<()> {
        let expected = self.config.embedding.dimensions;
        if embedding.dimensions != expected {
            return Err(EngramError::Embedding(format!(
                "{}: expected {} dimensions, got {}",
                field, expected, embedding.dimensions
            )));
        }
        Ok(())
    }

    // ========================================================================
    // L0 - RAW DIALOGUE LOG
    // ========================================================================

    /// Append one conversational turn. Rows are never mutated or deleted.
    pub fn append_raw(&self, input: &DialogueInput) -> Result<RawEntry> {
        input.validate()?;
        let now = Utc::now();
        let metadata_json = serde_json::to_string(&input.metadata)
            .map_err(|e| EngramError::Internal(format!("metadata serialization: {}", e)))?;

        let writer = self.writer()?;
        writer.execute(
            "INSERT INTO l0_raw (session_id, speaker, content, timestamp, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                input.session_id,
                input.speaker,
                input.content,
                now.to_rfc3339(),
                metadata_json,
            ],
        )?;
        let id = writer.last_insert_rowid();

        Ok(RawEntry {
            id,
            session_id: input.session_id.clone(),
            speaker: input.speaker.clone(),
            content: input.content.clone(),
            timestamp: now,
            metadata: input.metadata.clone(),
        })
    }

    /// Read raw entries, optionally filtered by session and date range.
    pub fn list_raw(
        &self,
        session_id: Option<&str>,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<RawEntry>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT id, session_id, speaker, content, timestamp, metadata
             FROM l0_raw
             WHERE (?1 IS NULL OR session_id = ?1)
               AND (?2 IS NULL OR timestamp >= ?2)
               AND (?3 IS NULL OR timestamp <= ?3)
             ORDER BY id DESC
             LIMIT ?4",
        )?;

        let rows = stmt.query_map(
            params![
                session_id,
                from.map(|t| t.to_rfc3339()),
                to.map(|t| t.to_rfc3339()),
                limit as i64,
            ],
            Self::row_to_raw,
        )?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    fn row_to_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawEntry> {
        let metadata_json: String = row.get(5)?;
        Ok(RawEntry {
            id: row.get(0)?,
            session_id: row.get(1)?,
            speaker: row.get(2)?,
            content: row.get(3)?,
            timestamp: row.get(4)?,
            metadata: serde_json::from_str(&metadata_json).unwrap_or_default(),
        })
    }

    // ========================================================================
    // L2 - INSIGHTS
    // ========================================================================

    /// Insert one insight row atomically with its embedding.
    ///
    /// An empty `source_ids` marks a synthesised insight and is annotated
    /// as `metadata.source = "synthesised"`.
    pub fn insert_insight(&self, input: &InsightInput, embedding: &Embedding) -> Result<Insight> {
        input.validate()?;
        self.check_dimensions(embedding, "insight embedding")?;

        let now = Utc::now();
        let id = Uuid::new_v4().to_string();

        let mut metadata = input.metadata.clone();
        if input.source_ids.is_empty() && !metadata.contains_key("source") {
            metadata.insert("source".to_string(), serde_json::json!("synthesised"));
        }

        let source_ids_json = serde_json::to_string(&input.source_ids)
            .map_err(|e| EngramError::Internal(format!("source_ids serialization: {}", e)))?;
        let metadata_json = serde_json::to_string(&metadata)
            .map_err(|e| EngramError::Internal(format!("metadata serialization: {}", e)))?;

        {
            let writer = self.writer()?;
            writer.execute(
                "INSERT INTO l2_insights (id, content, embedding, dimensions, source_ids, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    id,
                    input.content,
                    embedding.to_bytes(),
                    embedding.dimensions as i64,
                    source_ids_json,
                    metadata_json,
                    now.to_rfc3339(),
                ],
            )?;
        }

        #[cfg(feature = "vector-search")]
        {
            if let Ok(mut index) = self.vector_index.lock() {
                if let Err(e) = index.add(&id, &embedding.vector) {
                    tracing::warn!("Failed to index new insight {}: {}", id, e);
                }
            }
        }

        Ok(Insight {
            id,
            content: input.content.clone(),
            source_ids: input.source_ids.clone(),
            metadata,
            created_at: now,
        })
    }

    /// Graceful-null lookup: None instead of an error for a missing id.
    pub fn get_insight(&self, id: &str) -> Result<Option<Insight>> {
        let reader = self.reader()?;
        let insight = reader
            .query_row(
                "SELECT id, content, source_ids, metadata, created_at
                 FROM l2_insights WHERE id = ?1",
                params![id],
                Self::row_to_insight,
            )
            .optional()?;
        Ok(insight)
    }

    fn row_to_insight(row: &rusqlite::Row<'_>) -> rusqlite::Result<Insight> {
        let source_ids_json: String = row.get(2)?;
        let metadata_json: String = row.get(3)?;
        Ok(Insight {
            id: row.get(0)?,
            content: row.get(1)?,
            source_ids: serde_json::from_str(&source_ids_json).unwrap_or_default(),
            metadata: serde_json::from_str(&metadata_json).unwrap_or_default(),
            created_at: row.get(4)?,
        })
    }

    /// Most recent insights, newest first.
    pub fn list_recent_insights(&self, limit: usize) -> Result<Vec<Insight>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT id, content, source_ids, metadata, created_at
             FROM l2_insights
             ORDER BY created_at DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], Self::row_to_insight)?;
        let mut insights = Vec::new();
        for row in rows {
            insights.push(row?);
        }
        Ok(insights)
    }

    /// Fetch several insights preserving the given id order.
    pub fn get_insights_by_ids(&self, ids: &[String]) -> Result<Vec<Insight>> {
        let mut insights = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(insight) = self.get_insight(id)? {
                insights.push(insight);
            }
        }
        Ok(insights)
    }

    /// Stored embedding for one insight.
    pub fn get_insight_embedding(&self, id: &str) -> Result<Option<Embedding>> {
        let reader = self.reader()?;
        let bytes: Option<Vec<u8>> = reader
            .query_row(
                "SELECT embedding FROM l2_insights WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(bytes.and_then(|b| Embedding::from_bytes(&b)))
    }

    /// Lexical search over insight content via FTS5/BM25.
    ///
    /// Scores are negated BM25 ranks, so higher is better.
    pub fn lexical_search(&self, query: &str, limit: usize) -> Result<Vec<(String, f64)>> {
        let sanitized = sanitize_fts5_query(query);

        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT i.id, bm25(l2_fts) AS rank
             FROM l2_insights i
             JOIN l2_fts ON i.id = l2_fts.id
             WHERE l2_fts MATCH ?1
             ORDER BY rank
             LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![sanitized, limit as i64], |row| {
            let id: String = row.get(0)?;
            let rank: f64 = row.get(1)?;
            Ok((id, -rank))
        })?;

        let mut hits = Vec::new();
        for row in rows {
            hits.push(row?);
        }
        Ok(hits)
    }

    /// Dense search over insight embeddings, best first.
    pub fn dense_search(
        &self,
        query: &[f32],
        limit: usize,
        min_similarity: f32,
    ) -> Result<Vec<(String, f64)>> {
        #[cfg(feature = "vector-search")]
        {
            let index = self
                .vector_index
                .lock()
                .map_err(|_| EngramError::Internal("vector index lock poisoned".into()))?;
            let hits = index
                .search_with_threshold(query, limit, min_similarity)
                .map_err(|e| EngramError::Storage(format!("dense search failed: {}", e)))?;
            Ok(hits.into_iter().map(|(id, s)| (id, s as f64)).collect())
        }

        #[cfg(not(feature = "vector-search"))]
        {
            // Brute-force scan; adequate for builds without the HNSW index
            let reader = self.reader()?;
            let mut stmt = reader.prepare("SELECT id, embedding FROM l2_insights")?;
            let rows = stmt.query_map([], |row| {
                let id: String = row.get(0)?;
                let bytes: Vec<u8> = row.get(1)?;
                Ok((id, bytes))
            })?;

            let mut scored: Vec<(String, f64)> = Vec::new();
            for row in rows {
                let (id, bytes) = row?;
                if let Some(embedding) = Embedding::from_bytes(&bytes) {
                    let similarity =
                        crate::embeddings::cosine_similarity(query, &embedding.vector);
                    if similarity >= min_similarity {
                        scored.push((id, similarity as f64));
                    }
                }
            }
            scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            scored.truncate(limit);
            Ok(scored)
        }
    }

    // ========================================================================
    // WORKING MEMORY
    // ========================================================================

    /// Insert a working item and enforce the capacity bound, all in one
    /// transaction: insert → count → evict candidate → archive → delete.
    ///
    /// Standard LRU eviction considers only items at or below the critical
    /// threshold; when every item is critical the oldest is evicted
    /// regardless (forced fallback). The archive copy keeps the item's id.
    pub fn update_working_memory(&self, content: &str, importance: f64) -> Result<WorkingUpdate> {
        if content.trim().is_empty() {
            return Err(EngramError::field("content", "must not be empty"));
        }
        if !importance.is_finite() || !(0.0..=1.0).contains(&importance) {
            return Err(EngramError::field("importance", "must be in [0, 1]"));
        }

        let capacity = self.config.working_memory.capacity;
        let critical_threshold = self.config.working_memory.critical_threshold;
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();

        let mut writer = self.writer()?;
        let tx = writer.transaction()?;

        tx.execute(
            "INSERT INTO working_memory (id, content, importance, last_accessed, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, content, importance, now.to_rfc3339(), now.to_rfc3339()],
        )?;

        let count: i64 =
            tx.query_row("SELECT COUNT(*) FROM working_memory", [], |row| row.get(0))?;

        if count as usize <= capacity {
            tx.commit()?;
            return Ok(WorkingUpdate {
                added_id: id,
                evicted_id: None,
                archived_id: None,
            });
        }

        // Standard LRU: oldest among non-critical items
        let victim: Option<(String, String, f64)> = tx
            .query_row(
                "SELECT id, content, importance FROM working_memory
                 WHERE importance <= ?1
                 ORDER BY last_accessed ASC, created_at ASC
                 LIMIT 1",
                params![critical_threshold],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        // Forced fallback: every item is critical, evict the oldest anyway
        let (victim_id, victim_content, victim_importance) = match victim {
            Some(v) => v,
            None => tx.query_row(
                "SELECT id, content, importance FROM working_memory
                 ORDER BY last_accessed ASC, created_at ASC
                 LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?,
        };

        tx.execute(
            "INSERT INTO stale_memory (id, original_content, importance, archived_at, reason)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                victim_id,
                victim_content,
                victim_importance,
                now.to_rfc3339(),
                ArchiveReason::LruEviction.as_str(),
            ],
        )?;

        tx.execute(
            "DELETE FROM working_memory WHERE id = ?1",
            params![victim_id],
        )?;

        tx.commit()?;

        Ok(WorkingUpdate {
            added_id: id,
            evicted_id: Some(victim_id.clone()),
            archived_id: Some(victim_id),
        })
    }

    /// Manually archive a working item: load, copy to the archive with
    /// `MANUAL_ARCHIVE`, delete — atomically.
    pub fn archive_working_item(&self, id: &str) -> Result<StaleItem> {
        let now = Utc::now();

        let mut writer = self.writer()?;
        let tx = writer.transaction()?;

        let item: Option<(String, f64)> = tx
            .query_row(
                "SELECT content, importance FROM working_memory WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let (content, importance) = item.ok_or_else(|| {
            EngramError::NotFound(format!("working item {} does not exist", id))
        })?;

        tx.execute(
            "INSERT INTO stale_memory (id, original_content, importance, archived_at, reason)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id,
                content,
                importance,
                now.to_rfc3339(),
                ArchiveReason::ManualArchive.as_str(),
            ],
        )?;
        tx.execute("DELETE FROM working_memory WHERE id = ?1", params![id])?;
        tx.commit()?;

        Ok(StaleItem {
            id: id.to_string(),
            original_content: content,
            importance,
            archived_at: now,
            reason: ArchiveReason::ManualArchive,
        })
    }

    /// All working items, most recently accessed first.
    pub fn list_working(&self) -> Result<Vec<WorkingItem>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT id, content, importance, last_accessed, created_at
             FROM working_memory
             ORDER BY last_accessed DESC",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(WorkingItem {
                id: row.get(0)?,
                content: row.get(1)?,
                importance: row.get(2)?,
                last_accessed: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?;

        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(items)
    }

    pub fn count_working(&self) -> Result<usize> {
        let reader = self.reader()?;
        let count: i64 =
            reader.query_row("SELECT COUNT(*) FROM working_memory", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Archived items at or above an importance floor, newest first.
    pub fn list_stale(&self, importance_min: f64, limit: usize) -> Result<Vec<StaleItem>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT id, original_content, importance, archived_at, reason
             FROM stale_memory
             WHERE importance >= ?1
             ORDER BY archived_at DESC
             LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![importance_min, limit as i64], |row| {
            let reason: String = row.get(4)?;
            Ok(StaleItem {
                id: row.get(0)?,
                original_content: row.get(1)?,
                importance: row.get(2)?,
                archived_at: row.get(3)?,
                reason: ArchiveReason::parse_name(&reason).unwrap_or(ArchiveReason::LruEviction),
            })
        })?;

        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(items)
    }

    // ========================================================================
    // EPISODE MEMORY
    // ========================================================================

    /// Persist a reflection episode with its query embedding.
    pub fn insert_episode(&self, input: &EpisodeInput, embedding: &Embedding) -> Result<Episode> {
        input.validate()?;
        self.check_dimensions(embedding, "episode embedding")?;

        let now = Utc::now();
        let id = Uuid::new_v4().to_string();

        let writer = self.writer()?;
        writer.execute(
            "INSERT INTO episode_memory (id, query, reward, reflection, embedding, dimensions, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id,
                input.query,
                input.reward,
                input.reflection,
                embedding.to_bytes(),
                embedding.dimensions as i64,
                now.to_rfc3339(),
            ],
        )?;

        Ok(Episode {
            id,
            query: input.query.clone(),
            reward: input.reward,
            reflection: input.reflection.clone(),
            created_at: now,
        })
    }

    /// Most recent episodes.
    pub fn list_episodes(&self, limit: usize) -> Result<Vec<Episode>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT id, query, reward, reflection, created_at
             FROM episode_memory
             ORDER BY created_at DESC
             LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![limit as i64], Self::row_to_episode)?;
        let mut episodes = Vec::new();
        for row in rows {
            episodes.push(row?);
        }
        Ok(episodes)
    }

    fn row_to_episode(row: &rusqlite::Row<'_>) -> rusqlite::Result<Episode> {
        Ok(Episode {
            id: row.get(0)?,
            query: row.get(1)?,
            reward: row.get(2)?,
            reflection: row.get(3)?,
            created_at: row.get(4)?,
        })
    }

    /// Episodes whose stored query embedding is similar to the given
    /// vector, best first. Brute-force cosine over the episode tier, which
    /// stays small relative to L2.
    pub fn episode_search(
        &self,
        query: &[f32],
        min_similarity: f32,
        limit: usize,
    ) -> Result<Vec<(Episode, f64)>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT id, query, reward, reflection, created_at, embedding
             FROM episode_memory",
        )?;

        let rows = stmt.query_map([], |row| {
            let episode = Self::row_to_episode(row)?;
            let bytes: Vec<u8> = row.get(5)?;
            Ok((episode, bytes))
        })?;

        let mut scored: Vec<(Episode, f64)> = Vec::new();
        for row in rows {
            let (episode, bytes) = row?;
            if let Some(embedding) = Embedding::from_bytes(&bytes) {
                let similarity = crate::embeddings::cosine_similarity(query, &embedding.vector);
                if similarity >= min_similarity {
                    scored.push((episode, similarity as f64));
                }
            }
        }

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    // ========================================================================
    // EVALUATION RECORDS
    // ========================================================================

    /// Persist a dual-judge run against a ground-truth query.
    ///
    /// An undefined κ (both judges unanimous) is stored as NULL.
    pub fn insert_ground_truth(
        &self,
        query_id: &str,
        query: &str,
        expected_docs: &[String],
        outcome: &DualJudgeOutcome,
    ) -> Result<GroundTruthRecord> {
        if query.trim().is_empty() {
            return Err(EngramError::field("query", "must not be empty"));
        }

        let now = Utc::now();
        let expected_json = serde_json::to_string(expected_docs)
            .map_err(|e| EngramError::Internal(format!("expected_docs serialization: {}", e)))?;
        let judge1_json = serde_json::to_string(&outcome.judge1_scores)
            .map_err(|e| EngramError::Internal(format!("judge1 serialization: {}", e)))?;
        let judge2_json = serde_json::to_string(&outcome.judge2_scores)
            .map_err(|e| EngramError::Internal(format!("judge2 serialization: {}", e)))?;

        let writer = self.writer()?;
        writer.execute(
            "INSERT INTO ground_truth
                 (id, query, expected_docs, judge1_score, judge2_score,
                  judge1_model, judge2_model, kappa, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
                 query = excluded.query,
                 expected_docs = excluded.expected_docs,
                 judge1_score = excluded.judge1_score,
                 judge2_score = excluded.judge2_score,
                 judge1_model = excluded.judge1_model,
                 judge2_model = excluded.judge2_model,
                 kappa = excluded.kappa,
                 created_at = excluded.created_at",
            params![
                query_id,
                query,
                expected_json,
                judge1_json,
                judge2_json,
                outcome.judge1_model,
                outcome.judge2_model,
                outcome.kappa,
                now.to_rfc3339(),
            ],
        )?;

        Ok(GroundTruthRecord {
            id: query_id.to_string(),
            query: query.to_string(),
            expected_docs: expected_docs.to_vec(),
            judge1_score: outcome.judge1_scores.clone(),
            judge2_score: outcome.judge2_scores.clone(),
            judge1_model: outcome.judge1_model.clone(),
            judge2_model: outcome.judge2_model.clone(),
            kappa: outcome.kappa,
            created_at: now,
        })
    }

    pub fn get_ground_truth(&self, id: &str) -> Result<Option<GroundTruthRecord>> {
        let reader = self.reader()?;
        let record = reader
            .query_row(
                "SELECT id, query, expected_docs, judge1_score, judge2_score,
                        judge1_model, judge2_model, kappa, created_at
                 FROM ground_truth WHERE id = ?1",
                params![id],
                |row| {
                    let expected_json: String = row.get(2)?;
                    let judge1_json: String = row.get(3)?;
                    let judge2_json: String = row.get(4)?;
                    Ok(GroundTruthRecord {
                        id: row.get(0)?,
                        query: row.get(1)?,
                        expected_docs: serde_json::from_str(&expected_json).unwrap_or_default(),
                        judge1_score: serde_json::from_str(&judge1_json).unwrap_or_default(),
                        judge2_score: serde_json::from_str(&judge2_json).unwrap_or_default(),
                        judge1_model: row.get(5)?,
                        judge2_model: row.get(6)?,
                        kappa: row.get(7)?,
                        created_at: row.get(8)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    /// Append one provider accounting record.
    pub fn log_api_cost(&self, record: &ApiCostRecord) -> Result<()> {
        let writer = self.writer()?;
        writer.execute(
            "INSERT INTO api_cost_log (timestamp, provider, operation, tokens, estimated_cost, query_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.timestamp.to_rfc3339(),
                record.provider,
                record.operation,
                record.tokens,
                record.estimated_cost,
                record.query_id,
            ],
        )?;
        Ok(())
    }

    /// Total recorded cost and call count, optionally for one query.
    pub fn cost_totals(&self, query_id: Option<&str>) -> Result<(i64, f64)> {
        let reader = self.reader()?;
        let totals = reader.query_row(
            "SELECT COUNT(*), COALESCE(SUM(estimated_cost), 0.0)
             FROM api_cost_log
             WHERE (?1 IS NULL OR query_id = ?1)",
            params![query_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(totals)
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    /// Parse a JSON metadata column, tolerating legacy empty strings.
    pub(crate) fn parse_metadata(json: &str) -> Metadata {
        serde_json::from_str(json).unwrap_or_default()
    }
}

impl CostRecorder for Storage {
    fn record_cost(&self, record: ApiCostRecord) {
        if let Err(e) = self.log_api_cost(&record) {
            tracing::warn!("Failed to record API cost: {}", e);
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
