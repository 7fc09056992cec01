//! Memory Tier Records
//!
//! Entity types for every persistence tier:
//! - L0 raw dialogue log (append-only)
//! - L2 semantic insights (compressed, embedded, with provenance)
//! - Working memory (bounded, mutable)
//! - Stale archive (eviction graveyard)
//! - Episode memory (reflection records for verbal reinforcement)
//! - Evaluation records (ground truth, API cost accounting)

pub(crate) mod records;

pub use records::{
    ApiCostRecord, ArchiveReason, DialogueInput, Episode, EpisodeInput, GroundTruthRecord, Insight,
    InsightInput, Metadata, RawEntry, StaleItem, WorkingItem, WorkingUpdate,
};
