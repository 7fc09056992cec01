//! Tier entity records and tool input types.
//!
//! Input types use `deny_unknown_fields` to prevent field injection through
//! the protocol boundary.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngramError, Result};

/// Free-form metadata map. BTreeMap keeps serialization order stable.
pub type Metadata = BTreeMap<String, serde_json::Value>;

// ============================================================================
// L0 - RAW DIALOGUE LOG
// ============================================================================

/// One immutable conversational turn in the append-only L0 log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEntry {
    /// Monotonic rowid assigned by the log.
    pub id: i64,
    /// Opaque session identifier (string or UUID, caller-defined).
    pub session_id: String,
    pub speaker: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Input for appending a raw dialogue turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct DialogueInput {
    pub session_id: String,
    pub speaker: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl DialogueInput {
    /// Check the required fields are present and non-empty.
    pub fn validate(&self) -> Result<()> {
        if self.session_id.trim().is_empty() {
            return Err(EngramError::field("session_id", "must not be empty"));
        }
        if self.speaker.trim().is_empty() {
            return Err(EngramError::field("speaker", "must not be empty"));
        }
        if self.content.is_empty() {
            return Err(EngramError::field("content", "must not be empty"));
        }
        Ok(())
    }
}

// ============================================================================
// L2 - SEMANTIC INSIGHTS
// ============================================================================

/// A compressed semantic statement derived from zero or more raw entries.
///
/// The embedding is stored alongside but never serialized out: clients get
/// content and provenance, not vectors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Insight {
    pub id: String,
    pub content: String,
    /// Ordered L0 provenance. May be empty (a synthesised insight).
    pub source_ids: Vec<i64>,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

/// Input for compressing content into an L2 insight.
///
/// `source_ids` must be a sequence, not absent — an empty sequence marks a
/// synthesised insight and is annotated as such on insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct InsightInput {
    pub content: String,
    pub source_ids: Vec<i64>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl InsightInput {
    pub fn validate(&self) -> Result<()> {
        if self.content.trim().is_empty() {
            return Err(EngramError::field("content", "must not be empty"));
        }
        Ok(())
    }
}

// ============================================================================
// WORKING MEMORY
// ============================================================================

/// A bounded, mutable context-window element.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkingItem {
    pub id: String,
    pub content: String,
    /// In [0, 1]. Items above the critical threshold resist eviction.
    pub importance: f64,
    pub last_accessed: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl WorkingItem {
    /// Whether this item is exempt from standard LRU eviction.
    pub fn is_critical(&self, threshold: f64) -> bool {
        self.importance > threshold
    }
}

/// Outcome of one working-memory update.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkingUpdate {
    pub added_id: String,
    /// Set when the capacity check forced an eviction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evicted_id: Option<String>,
    /// Id of the archive copy; equals `evicted_id` (the archive keeps the
    /// original id).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_id: Option<String>,
}

// ============================================================================
// STALE ARCHIVE
// ============================================================================

/// Why a working item landed in the stale archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArchiveReason {
    LruEviction,
    ManualArchive,
}

impl ArchiveReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveReason::LruEviction => "LRU_EVICTION",
            ArchiveReason::ManualArchive => "MANUAL_ARCHIVE",
        }
    }

    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "LRU_EVICTION" => Some(ArchiveReason::LruEviction),
            "MANUAL_ARCHIVE" => Some(ArchiveReason::ManualArchive),
            _ => None,
        }
    }
}

/// Archival copy of an evicted working item. Retained indefinitely.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaleItem {
    /// Same id the working item carried before eviction.
    pub id: String,
    pub original_content: String,
    pub importance: f64,
    pub archived_at: DateTime<Utc>,
    pub reason: ArchiveReason,
}

// ============================================================================
// EPISODE MEMORY
// ============================================================================

/// A reflection record for verbal reinforcement.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Episode {
    pub id: String,
    pub query: String,
    /// In [-1, 1].
    pub reward: f64,
    pub reflection: String,
    pub created_at: DateTime<Utc>,
}

/// Input for storing an episode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct EpisodeInput {
    pub query: String,
    pub reward: f64,
    pub reflection: String,
}

impl EpisodeInput {
    pub fn validate(&self) -> Result<()> {
        if self.query.trim().is_empty() {
            return Err(EngramError::field("query", "must not be empty"));
        }
        if self.reflection.trim().is_empty() {
            return Err(EngramError::field("reflection", "must not be empty"));
        }
        if !self.reward.is_finite() || !(-1.0..=1.0).contains(&self.reward) {
            return Err(EngramError::field("reward", "must be a finite number in [-1, 1]"));
        }
        Ok(())
    }
}

// ============================================================================
// EVALUATION RECORDS
// ============================================================================

/// A labelled query with relevance annotations and dual-judge scores.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroundTruthRecord {
    pub id: String,
    pub query: String,
    /// Ordered expected insight ids.
    pub expected_docs: Vec<String>,
    /// One score per candidate doc, per judge.
    pub judge1_score: Vec<f64>,
    pub judge2_score: Vec<f64>,
    pub judge1_model: String,
    pub judge2_model: String,
    /// Cohen's κ; None when both judges were unanimous on one class.
    pub kappa: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// Per-call provider accounting record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiCostRecord {
    pub timestamp: DateTime<Utc>,
    pub provider: String,
    pub operation: String,
    pub tokens: i64,
    pub estimated_cost: f64,
    /// Owning ground-truth query, when the call belongs to one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_id: Option<String>,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialogue_input_validation() {
        let input = DialogueInput {
            session_id: "s-1".into(),
            speaker: "user".into(),
            content: "hello".into(),
            metadata: Metadata::new(),
        };
        assert!(input.validate().is_ok());

        let missing = DialogueInput {
            session_id: "".into(),
            speaker: "user".into(),
            content: "hello".into(),
            metadata: Metadata::new(),
        };
        let err = missing.validate().unwrap_err();
        assert_eq!(err.kind(), "VALIDATION");
        assert!(err.to_string().contains("session_id"));
    }

    #[test]
    fn test_insight_input_accepts_empty_source_ids() {
        let input = InsightInput {
            content: "compressed statement".into(),
            source_ids: vec![],
            metadata: Metadata::new(),
        };
        assert!(input.validate().is_ok());
    }

    #[test]
    fn test_insight_input_rejects_missing_source_ids_field() {
        // source_ids must be a sequence, not absent
        let json = r#"{"content": "x"}"#;
        let result: std::result::Result<InsightInput, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn test_episode_reward_range() {
        let mut input = EpisodeInput {
            query: "q".into(),
            reward: 0.5,
            reflection: "r".into(),
        };
        assert!(input.validate().is_ok());

        input.reward = 1.5;
        assert!(input.validate().is_err());

        input.reward = f64::NAN;
        assert!(input.validate().is_err());

        input.reward = -1.0;
        assert!(input.validate().is_ok());
    }

    #[test]
    fn test_archive_reason_roundtrip() {
        for reason in [ArchiveReason::LruEviction, ArchiveReason::ManualArchive] {
            assert_eq!(ArchiveReason::parse_name(reason.as_str()), Some(reason));
        }
        assert_eq!(ArchiveReason::parse_name("OTHER"), None);
    }

    #[test]
    fn test_critical_item_threshold_is_strict() {
        let item = WorkingItem {
            id: "w-1".into(),
            content: "x".into(),
            importance: 0.8,
            last_accessed: Utc::now(),
            created_at: Utc::now(),
        };
        // Exactly at the threshold is NOT critical
        assert!(!item.is_critical(0.8));

        let critical = WorkingItem {
            importance: 0.81,
            ..item
        };
        assert!(critical.is_critical(0.8));
    }

    #[test]
    fn test_input_deny_unknown_fields() {
        let json = r#"{"session_id": "s", "speaker": "u", "content": "c", "extra": 1}"#;
        let result: std::result::Result<DialogueInput, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }
}
