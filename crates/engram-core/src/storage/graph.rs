//! Knowledge Graph Storage Operations
//!
//! Upserts, bounded traversal, and shortest-path discovery over the
//! `graph_nodes` / `graph_edges` tables. Node identity is `(label, name)`;
//! edge identity is `(source, target, relation)`, so re-adding an edge
//! updates it in place instead of duplicating it.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Instant;

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use super::sqlite::Storage;
use crate::error::{EngramError, Result};
use crate::graph::{
    calculate_relevance_score, Direction, GraphEdge, GraphNode, Neighbor, PathResult, PathStep,
    PROP_ACCESS_COUNT, PROP_MEMORY_STRENGTH,
};
use crate::ief::IefEdgeData;
use crate::memory::Metadata;

/// Maximum traversal depth accepted from callers.
pub const MAX_TRAVERSAL_DEPTH: u32 = 5;

/// Shortest-path result cap when multiple paths tie.
const MAX_PATHS: usize = 10;

impl Storage {
    // ========================================================================
    // NODES
    // ========================================================================

    /// Insert or update a node, keyed on `(label, name)`.
    ///
    /// Provided property keys overwrite existing ones; a provided
    /// `vector_id` replaces the stored anchor, while `None` leaves it.
    pub fn upsert_node(
        &self,
        label: &str,
        name: &str,
        properties: &Metadata,
        vector_id: Option<&str>,
    ) -> Result<GraphNode> {
        if label.trim().is_empty() {
            return Err(EngramError::field("label", "must not be empty"));
        }
        if name.trim().is_empty() {
            return Err(EngramError::field("name", "must not be empty"));
        }

        let now = Utc::now();

        let mut writer = self.writer_guard()?;
        let tx = writer.transaction()?;

        let existing: Option<(String, String)> = tx
            .query_row(
                "SELECT id, properties FROM graph_nodes WHERE label = ?1 AND name = ?2",
                params![label, name],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let id = match existing {
            Some((id, existing_props)) => {
                let mut merged = Self::parse_metadata(&existing_props);
                for (key, value) in properties {
                    merged.insert(key.clone(), value.clone());
                }
                let merged_json = serde_json::to_string(&merged)
                    .map_err(|e| EngramError::Internal(format!("properties serialization: {}", e)))?;
                tx.execute(
                    "UPDATE graph_nodes
                     SET properties = ?1,
                         vector_id = COALESCE(?2, vector_id)
                     WHERE id = ?3",
                    params![merged_json, vector_id, id],
                )?;
                id
            }
            None => {
                let id = Uuid::new_v4().to_string();
                let props_json = serde_json::to_string(properties)
                    .map_err(|e| EngramError::Internal(format!("properties serialization: {}", e)))?;
                tx.execute(
                    "INSERT INTO graph_nodes (id, label, name, properties, vector_id, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![id, label, name, props_json, vector_id, now.to_rfc3339()],
                )?;
                id
            }
        };

        tx.commit()?;

        self.get_node_by_id(&id)?
            .ok_or_else(|| EngramError::Internal("node vanished after upsert".into()))
    }

    pub fn get_node_by_id(&self, id: &str) -> Result<Option<GraphNode>> {
        let reader = self.reader_guard()?;
        let node = reader
            .query_row(
                "SELECT id, label, name, properties, vector_id, created_at
                 FROM graph_nodes WHERE id = ?1",
                params![id],
                Self::row_to_node,
            )
            .optional()?;
        Ok(node)
    }

    /// Find a node by name, optionally constrained to a label. Without a
    /// label the lexicographically first matching label wins, so lookups
    /// stay deterministic.
    pub fn get_node_by_name(&self, name: &str, label: Option<&str>) -> Result<Option<GraphNode>> {
        let reader = self.reader_guard()?;
        let node = reader
            .query_row(
                "SELECT id, label, name, properties, vector_id, created_at
                 FROM graph_nodes
                 WHERE name = ?1 AND (?2 IS NULL OR label = ?2)
                 ORDER BY label ASC
                 LIMIT 1",
                params![name, label],
                Self::row_to_node,
            )
            .optional()?;
        Ok(node)
    }

    /// All node names, for entity matching in query classification.
    pub fn list_node_names(&self) -> Result<Vec<String>> {
        let reader = self.reader_guard()?;
        let mut stmt = reader.prepare("SELECT name FROM graph_nodes")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        let mut names = Vec::new();
        for row in rows {
            names.push(row?);
        }
        Ok(names)
    }

    fn row_to_node(row: &rusqlite::Row<'_>) -> rusqlite::Result<GraphNode> {
        let props_json: String = row.get(3)?;
        Ok(GraphNode {
            id: row.get(0)?,
            label: row.get(1)?,
            name: row.get(2)?,
            properties: Self::parse_metadata(&props_json),
            vector_id: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    // ========================================================================
    // EDGES
    // ========================================================================

    /// Insert or update a directed edge, auto-creating missing endpoints.
    ///
    /// Idempotent on `(source, target, relation)`: a repeat call updates
    /// weight/properties and returns the existing edge id.
    #[allow(clippy::too_many_arguments)]
    pub fn add_edge(
        &self,
        source_name: &str,
        target_name: &str,
        relation: &str,
        source_label: Option<&str>,
        target_label: Option<&str>,
        weight: f64,
        properties: &Metadata,
    ) -> Result<String> {
        if relation.trim().is_empty() {
            return Err(EngramError::field("relation", "must not be empty"));
        }
        if !weight.is_finite() || weight < 0.0 {
            return Err(EngramError::field("weight", "must be a non-negative number"));
        }

        // Reuse an existing node with the name before auto-creating one;
        // an unlabelled endpoint must not shadow a labelled node.
        let source = match self.get_node_by_name(source_name, source_label)? {
            Some(node) => node,
            None => self.upsert_node(
                source_label.unwrap_or("entity"),
                source_name,
                &Metadata::new(),
                None,
            )?,
        };
        let target = match self.get_node_by_name(target_name, target_label)? {
            Some(node) => node,
            None => self.upsert_node(
                target_label.unwrap_or("entity"),
                target_name,
                &Metadata::new(),
                None,
            )?,
        };

        let now = Utc::now();

        let mut writer = self.writer_guard()?;
        let tx = writer.transaction()?;

        let existing: Option<(String, String)> = tx
            .query_row(
                "SELECT id, properties FROM graph_edges
                 WHERE source_id = ?1 AND target_id = ?2 AND relation = ?3",
                params![source.id, target.id, relation],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let edge_id = match existing {
            Some((id, existing_props)) => {
                let mut merged = Self::parse_metadata(&existing_props);
                for (key, value) in properties {
                    merged.insert(key.clone(), value.clone());
                }
                let merged_json = serde_json::to_string(&merged)
                    .map_err(|e| EngramError::Internal(format!("properties serialization: {}", e)))?;
                tx.execute(
                    "UPDATE graph_edges
                     SET weight = ?1, properties = ?2, modified_at = ?3
                     WHERE id = ?4",
                    params![weight, merged_json, now.to_rfc3339(), id],
                )?;
                id
            }
            None => {
                let id = Uuid::new_v4().to_string();
                let props_json = serde_json::to_string(properties)
                    .map_err(|e| EngramError::Internal(format!("properties serialization: {}", e)))?;
                tx.execute(
                    "INSERT INTO graph_edges
                         (id, source_id, target_id, relation, weight, properties,
                          created_at, modified_at, last_accessed)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, ?7)",
                    params![
                        id,
                        source.id,
                        target.id,
                        relation,
                        weight,
                        props_json,
                        now.to_rfc3339(),
                    ],
                )?;
                id
            }
        };

        tx.commit()?;
        Ok(edge_id)
    }

    pub fn get_edge(&self, id: &str) -> Result<Option<GraphEdge>> {
        let reader = self.reader_guard()?;
        let edge = reader
            .query_row(
                "SELECT id, source_id, target_id, relation, weight, properties,
                        created_at, modified_at, last_accessed
                 FROM graph_edges WHERE id = ?1",
                params![id],
                Self::row_to_edge,
            )
            .optional()?;
        Ok(edge)
    }

    /// Every edge in the graph; the dissonance scan reads this.
    pub fn list_edges(&self) -> Result<Vec<GraphEdge>> {
        let reader = self.reader_guard()?;
        let mut stmt = reader.prepare(
            "SELECT id, source_id, target_id, relation, weight, properties,
                    created_at, modified_at, last_accessed
             FROM graph_edges",
        )?;
        let rows = stmt.query_map([], Self::row_to_edge)?;
        let mut edges = Vec::new();
        for row in rows {
            edges.push(row?);
        }
        Ok(edges)
    }

    /// Set one property key on an edge (used for `superseded_by`).
    pub fn set_edge_property(
        &self,
        edge_id: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<()> {
        let now = Utc::now();

        let mut writer = self.writer_guard()?;
        let tx = writer.transaction()?;

        let props_json: Option<String> = tx
            .query_row(
                "SELECT properties FROM graph_edges WHERE id = ?1",
                params![edge_id],
                |row| row.get(0),
            )
            .optional()?;

        let props_json = props_json
            .ok_or_else(|| EngramError::NotFound(format!("edge {} does not exist", edge_id)))?;

        let mut properties = Self::parse_metadata(&props_json);
        properties.insert(key.to_string(), value);
        let updated = serde_json::to_string(&properties)
            .map_err(|e| EngramError::Internal(format!("properties serialization: {}", e)))?;

        tx.execute(
            "UPDATE graph_edges SET properties = ?1, modified_at = ?2 WHERE id = ?3",
            params![updated, now.to_rfc3339(), edge_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn row_to_edge(row: &rusqlite::Row<'_>) -> rusqlite::Result<GraphEdge> {
        let props_json: String = row.get(5)?;
        Ok(GraphEdge {
            id: row.get(0)?,
            source_id: row.get(1)?,
            target_id: row.get(2)?,
            relation: row.get(3)?,
            weight: row.get(4)?,
            properties: Self::parse_metadata(&props_json),
            created_at: row.get(6)?,
            modified_at: row.get(7)?,
            last_accessed: row.get(8)?,
        })
    }

    // ========================================================================
    // TRAVERSAL
    // ========================================================================

    /// Edges incident to a set of nodes, honouring a direction filter.
    fn edges_for_frontier(
        &self,
        frontier: &[String],
        relation: Option<&str>,
        direction: Direction,
    ) -> Result<Vec<GraphEdge>> {
        let reader = self.reader_guard()?;
        let mut edges = Vec::new();

        for node_id in frontier {
            let sql = match direction {
                Direction::Outgoing => {
                    "SELECT id, source_id, target_id, relation, weight, properties,
                            created_at, modified_at, last_accessed
                     FROM graph_edges
                     WHERE source_id = ?1 AND (?2 IS NULL OR relation = ?2)"
                }
                Direction::Incoming => {
                    "SELECT id, source_id, target_id, relation, weight, properties,
                            created_at, modified_at, last_accessed
                     FROM graph_edges
                     WHERE target_id = ?1 AND (?2 IS NULL OR relation = ?2)"
                }
                Direction::Both => {
                    "SELECT id, source_id, target_id, relation, weight, properties,
                            created_at, modified_at, last_accessed
                     FROM graph_edges
                     WHERE (source_id = ?1 OR target_id = ?1)
                       AND (?2 IS NULL OR relation = ?2)"
                }
            };

            let mut stmt = reader.prepare(sql)?;
            let rows = stmt.query_map(params![node_id, relation], Self::row_to_edge)?;
            for row in rows {
                edges.push(row?);
            }
        }
        Ok(edges)
    }

    /// Bounded breadth-first neighbour traversal.
    ///
    /// Returns each reachable node once, at its minimal distance, ranked by
    /// edge relevance. Superseded edges are skipped unless requested.
    pub fn query_neighbors(
        &self,
        node_name: &str,
        relation: Option<&str>,
        depth: u32,
        direction: Direction,
        include_superseded: bool,
    ) -> Result<Vec<Neighbor>> {
        let depth = depth.clamp(1, MAX_TRAVERSAL_DEPTH);

        let start = self
            .get_node_by_name(node_name, None)?
            .ok_or_else(|| EngramError::NotFound(format!("node '{}' does not exist", node_name)))?;

        let now = Utc::now();
        let tau_days = self.config().ief.relevance_tau_days;

        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(start.id.clone());

        let mut frontier = vec![start.id.clone()];
        let mut neighbors: Vec<Neighbor> = Vec::new();
        let mut touched_edges: Vec<String> = Vec::new();

        for distance in 1..=depth {
            if frontier.is_empty() {
                break;
            }

            let edges = self.edges_for_frontier(&frontier, relation, direction)?;
            let mut next_frontier = Vec::new();

            for edge in edges {
                if !include_superseded && edge.is_superseded() {
                    continue;
                }

                let other_id = if frontier.contains(&edge.source_id) {
                    &edge.target_id
                } else {
                    &edge.source_id
                };
                if visited.contains(other_id) {
                    continue;
                }
                visited.insert(other_id.clone());

                let Some(node) = self.get_node_by_id(other_id)? else {
                    continue;
                };

                let relevance = calculate_relevance_score(
                    edge.access_count(),
                    edge.last_accessed,
                    now,
                    tau_days,
                );

                touched_edges.push(edge.id.clone());
                neighbors.push(Neighbor {
                    node_id: node.id.clone(),
                    label: node.label,
                    name: node.name,
                    properties: node.properties,
                    edge_id: edge.id.clone(),
                    relation: edge.relation.clone(),
                    distance,
                    weight: edge.weight,
                    relevance_score: relevance,
                    ief_score: None,
                    ief_components: None,
                });
                next_frontier.push(node.id);
            }

            frontier = next_frontier;
        }

        // Reinforce traversed edges; failures must not fail the read
        if let Err(e) = self.touch_edges(&touched_edges) {
            tracing::warn!("Failed to reinforce traversed edges: {}", e);
        }

        neighbors.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.node_id.cmp(&b.node_id))
        });
        Ok(neighbors)
    }

    /// Bump access counters and `last_accessed` on traversed edges.
    fn touch_edges(&self, edge_ids: &[String]) -> Result<()> {
        if edge_ids.is_empty() {
            return Ok(());
        }
        let now = Utc::now();
        let tau_days = self.config().ief.relevance_tau_days;

        let mut writer = self.writer_guard()?;
        let tx = writer.transaction()?;
        for edge_id in edge_ids {
            let props_json: Option<String> = tx
                .query_row(
                    "SELECT properties FROM graph_edges WHERE id = ?1",
                    params![edge_id],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(props_json) = props_json else { continue };

            let mut properties = Self::parse_metadata(&props_json);
            let count = properties
                .get(PROP_ACCESS_COUNT)
                .and_then(|v| v.as_i64())
                .unwrap_or(0)
                + 1;
            properties.insert(PROP_ACCESS_COUNT.to_string(), serde_json::json!(count));
            let strength = calculate_relevance_score(count, now, now, tau_days);
            properties.insert(PROP_MEMORY_STRENGTH.to_string(), serde_json::json!(strength));

            let updated = serde_json::to_string(&properties)
                .map_err(|e| EngramError::Internal(format!("properties serialization: {}", e)))?;
            tx.execute(
                "UPDATE graph_edges SET properties = ?1, last_accessed = ?2 WHERE id = ?3",
                params![updated, now.to_rfc3339(), edge_id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    // ========================================================================
    // SHORTEST PATH
    // ========================================================================

    /// BFS shortest-path discovery between two named nodes, undirected.
    ///
    /// Returns up to 10 paths of the minimal length. The search checks the
    /// deadline once per expansion ring and surfaces `TIMEOUT` on overrun.
    pub fn find_path(
        &self,
        start_name: &str,
        end_name: &str,
        max_depth: u32,
        deadline: Instant,
    ) -> Result<PathResult> {
        let max_depth = max_depth.clamp(1, MAX_TRAVERSAL_DEPTH);

        let start = self
            .get_node_by_name(start_name, None)?
            .ok_or_else(|| EngramError::NotFound(format!("node '{}' does not exist", start_name)))?;
        let end = self
            .get_node_by_name(end_name, None)?
            .ok_or_else(|| EngramError::NotFound(format!("node '{}' does not exist", end_name)))?;

        if start.id == end.id {
            return Ok(PathResult {
                path_found: true,
                path_length: 0,
                paths: vec![vec![PathStep {
                    node_id: start.id,
                    name: start.name,
                    label: start.label,
                    relation: None,
                    edge_id: None,
                }]],
                path_ief_score: None,
            });
        }

        // parents[n] = every (predecessor, edge) that first reached n
        let mut parents: HashMap<String, Vec<(String, GraphEdge)>> = HashMap::new();
        let mut depth_of: HashMap<String, u32> = HashMap::new();
        depth_of.insert(start.id.clone(), 0);

        let mut frontier = vec![start.id.clone()];
        let mut found_at: Option<u32> = None;

        for depth in 1..=max_depth {
            if frontier.is_empty() || found_at.is_some() {
                break;
            }
            if Instant::now() > deadline {
                return Err(EngramError::Timeout(format!(
                    "path search exceeded its deadline at depth {}",
                    depth
                )));
            }

            let edges = self.edges_for_frontier(&frontier, None, Direction::Both)?;
            let mut next_frontier: Vec<String> = Vec::new();

            for edge in edges {
                if edge.is_superseded() {
                    continue;
                }
                for (from, to) in [
                    (&edge.source_id, &edge.target_id),
                    (&edge.target_id, &edge.source_id),
                ] {
                    if depth_of.get(from) != Some(&(depth - 1)) {
                        continue;
                    }
                    match depth_of.get(to) {
                        // First discovery at this depth
                        None => {
                            depth_of.insert(to.clone(), depth);
                            parents
                                .entry(to.clone())
                                .or_default()
                                .push((from.clone(), edge.clone()));
                            next_frontier.push(to.clone());
                        }
                        // Another shortest predecessor at the same depth
                        Some(d) if *d == depth => {
                            parents
                                .entry(to.clone())
                                .or_default()
                                .push((from.clone(), edge.clone()));
                        }
                        _ => {}
                    }
                }
            }

            if depth_of.get(&end.id) == Some(&depth) {
                found_at = Some(depth);
            }
            frontier = next_frontier;
        }

        let Some(path_length) = found_at else {
            return Ok(PathResult {
                path_found: false,
                path_length: 0,
                paths: vec![],
                path_ief_score: None,
            });
        };

        let paths = self.reconstruct_paths(&start.id, &end.id, &parents)?;

        Ok(PathResult {
            path_found: true,
            path_length,
            paths,
            path_ief_score: None,
        })
    }

    /// Walk the predecessor map backwards from `end`, emitting up to
    /// [`MAX_PATHS`] step sequences.
    fn reconstruct_paths(
        &self,
        start_id: &str,
        end_id: &str,
        parents: &HashMap<String, Vec<(String, GraphEdge)>>,
    ) -> Result<Vec<Vec<PathStep>>> {
        // Reverse chains: (node, relation into node, edge into node)
        type ChainStep = (String, Option<String>, Option<String>);
        let mut complete: Vec<Vec<ChainStep>> = Vec::new();
        let mut queue: VecDeque<(String, Vec<ChainStep>)> = VecDeque::new();
        queue.push_back((end_id.to_string(), vec![(end_id.to_string(), None, None)]));

        while let Some((current, chain)) = queue.pop_front() {
            if complete.len() >= MAX_PATHS {
                break;
            }
            if current == start_id {
                complete.push(chain);
                continue;
            }
            if let Some(preds) = parents.get(&current) {
                for (pred, edge) in preds {
                    let mut extended = chain.clone();
                    // The relation annotates the node the edge led to
                    if let Some(last) = extended.last_mut() {
                        last.1 = Some(edge.relation.clone());
                        last.2 = Some(edge.id.clone());
                    }
                    extended.push((pred.clone(), None, None));
                    queue.push_back((pred.clone(), extended));
                }
            }
        }

        let mut paths = Vec::with_capacity(complete.len());
        for chain in complete {
            let mut steps = Vec::with_capacity(chain.len());
            for (node_id, relation, edge_id) in chain.into_iter().rev() {
                let Some(node) = self.get_node_by_id(&node_id)? else {
                    continue;
                };
                steps.push(PathStep {
                    node_id: node.id,
                    name: node.name,
                    label: node.label,
                    relation,
                    edge_id,
                });
            }
            paths.push(steps);
        }
        Ok(paths)
    }

    // ========================================================================
    // IEF SUPPORT
    // ========================================================================

    /// Assemble the IEF input view for one edge.
    ///
    /// The semantic anchor resolves through the source node's `vector_id`
    /// first, then the target's.
    pub fn ief_edge_data(&self, edge: &GraphEdge) -> Result<IefEdgeData> {
        let now = Utc::now();
        let relevance = calculate_relevance_score(
            edge.access_count(),
            edge.last_accessed,
            now,
            self.config().ief.relevance_tau_days,
        );

        let mut anchor = None;
        for node_id in [&edge.source_id, &edge.target_id] {
            if let Some(node) = self.get_node_by_id(node_id)? {
                if let Some(vector_id) = node.vector_id {
                    if let Some(embedding) = self.get_insight_embedding(&vector_id)? {
                        anchor = Some(embedding.vector);
                        break;
                    }
                }
            }
        }

        Ok(IefEdgeData {
            edge_id: edge.id.clone(),
            relevance_score: relevance,
            modified_at: Some(edge.modified_at),
            edge_type: edge.edge_type().map(|s| s.to_string()),
            anchor_embedding: anchor,
        })
    }

    /// Insight ids anchored to nodes within `depth` hops of any named
    /// entity, ranked by the reaching edge's relevance. Feeds graph
    /// injection in hybrid retrieval.
    pub fn graph_anchored_insights(
        &self,
        entity_names: &[String],
        depth: u32,
        limit: usize,
    ) -> Result<Vec<(String, f64)>> {
        let mut scored: HashMap<String, f64> = HashMap::new();

        for name in entity_names {
            // The entity's own anchor participates at full relevance
            if let Some(node) = self.get_node_by_name(name, None)? {
                if let Some(vector_id) = &node.vector_id {
                    scored.entry(vector_id.clone()).or_insert(1.0);
                }
            }

            let neighbors =
                match self.query_neighbors(name, None, depth, Direction::Both, false) {
                    Ok(n) => n,
                    Err(e) if e.kind() == "NOT_FOUND" => continue,
                    Err(e) => return Err(e),
                };

            for neighbor in neighbors {
                let Some(node) = self.get_node_by_id(&neighbor.node_id)? else {
                    continue;
                };
                if let Some(vector_id) = node.vector_id {
                    let entry = scored.entry(vector_id).or_insert(0.0);
                    if neighbor.relevance_score > *entry {
                        *entry = neighbor.relevance_score;
                    }
                }
            }
        }

        let mut hits: Vec<(String, f64)> = scored.into_iter().collect();
        hits.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        hits.truncate(limit);
        Ok(hits)
    }
}

// ============================================================================
// TESTS
// ============================================================================
