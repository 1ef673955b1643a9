//! Edge scheduling and record bookkeeping.
//!
//! Edges move `Pending → Executing → Executed`, or end `Dead`. An edge is
//! eligible once either endpoint is bound; among eligible edges the one with
//! the fewest bound entities runs first, ties broken by graph order.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use biofed_ontology::Ontology;

use crate::collaborators::{CapabilityCatalog, CatalogEntry, EdgeQuery};
use crate::constraints::meets_all;
use crate::error::QueryError;
use crate::graph::{QueryEdge, QueryGraph};
use crate::log::Diagnostics;
use crate::options::{DirectionTieBreak, SchedulerConfig};
use crate::record::{Record, Side};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeState {
    Pending,
    Executing,
    Executed,
    Dead,
}

/// Records an already-executed neighbor lost to pruning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NeighborPrune {
    pub edge_id: String,
    pub node_id: String,
    pub before: usize,
    pub after: usize,
}

/// What happened to a batch handed to [`EdgeScheduler::store_records`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreOutcome {
    pub received: usize,
    pub after_constraints: usize,
    /// Survivors after constraint filtering and pruning against neighbors.
    pub kept: usize,
    pub neighbors: Vec<NeighborPrune>,
    /// Endpoints still without identifiers after propagation: no kept
    /// record side matched their categories.
    pub unbound: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedEdge {
    pub edge_id: String,
    pub reverse: bool,
    pub input_node: String,
    pub output_node: String,
    pub predicates: Option<Vec<String>>,
    pub entries: Vec<CatalogEntry>,
    pub estimated_inputs: usize,
    pub estimated_outputs: usize,
}

/// Result of the dry scheduling pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SupportReport {
    pub planned: Vec<PlannedEdge>,
    /// Edges with no catalog entry, in scheduling order.
    pub unsupported: Vec<String>,
}

impl SupportReport {
    pub fn is_supported(&self) -> bool {
        self.unsupported.is_empty()
    }
}

pub struct EdgeScheduler {
    graph: QueryGraph,
    ontology: Arc<Ontology>,
    config: SchedulerConfig,
    states: BTreeMap<String, EdgeState>,
    logs: Diagnostics,
}

impl EdgeScheduler {
    pub fn new(graph: QueryGraph, ontology: Arc<Ontology>, config: SchedulerConfig) -> Self {
        let states = graph
            .edges()
            .map(|e| {
                let state = if e.executed {
                    EdgeState::Executed
                } else {
                    EdgeState::Pending
                };
                (e.id.clone(), state)
            })
            .collect();
        Self {
            graph,
            ontology,
            config,
            states,
            logs: Diagnostics::new(),
        }
    }

    pub fn graph(&self) -> &QueryGraph {
        &self.graph
    }

    pub fn into_graph(self) -> QueryGraph {
        self.graph
    }

    pub fn logs(&self) -> &Diagnostics {
        &self.logs
    }

    pub fn take_logs(&mut self) -> Diagnostics {
        std::mem::take(&mut self.logs)
    }

    pub fn state(&self, edge_id: &str) -> Option<EdgeState> {
        self.states.get(edge_id).copied()
    }

    pub fn pending_count(&self) -> usize {
        self.states
            .values()
            .filter(|s| **s == EdgeState::Pending)
            .count()
    }

    pub fn has_pending(&self) -> bool {
        self.pending_count() > 0
    }

    fn entity_counts(&self, edge: &QueryEdge) -> (Option<usize>, Option<usize>) {
        let count = |id: &str| self.graph.node(id).and_then(|n| n.entity_count);
        (count(&edge.subject), count(&edge.object))
    }

    /// Fewest bound entities on either end; `None` when nothing is bound.
    fn cost(&self, edge: &QueryEdge) -> Option<usize> {
        match self.entity_counts(edge) {
            (Some(s), Some(o)) => Some(s.min(o)),
            (Some(n), None) | (None, Some(n)) => Some(n),
            (None, None) => None,
        }
    }

    /// Pick the next edge, orient it and mark it executing.
    pub fn next(&mut self) -> Option<String> {
        let (_, edge_id) = self
            .graph
            .edges()
            .filter(|e| self.states.get(&e.id) == Some(&EdgeState::Pending))
            .filter_map(|e| self.cost(e).map(|cost| (cost, e.id.clone())))
            .min_by_key(|(cost, _)| *cost)?;
        self.orient(&edge_id);
        self.states.insert(edge_id.clone(), EdgeState::Executing);
        Some(edge_id)
    }

    /// The lower-count side becomes the input.
    fn orient(&mut self, edge_id: &str) {
        let Some(edge) = self.graph.edge(edge_id) else {
            return;
        };
        let (subject, object) = self.entity_counts(edge);
        let reverse = match (subject, object) {
            (Some(s), Some(o)) if s == o => self.config.tie_break == DirectionTieBreak::Object,
            (Some(s), Some(o)) => o < s,
            (Some(_), None) => false,
            (None, Some(_)) => true,
            (None, None) => edge.reverse,
        };
        let ontology = Arc::clone(&self.ontology);
        if let Some(edge) = self.graph.edge_mut(edge_id) {
            edge.reverse = reverse;
            edge.refresh_predicates(&ontology);
            tracing::debug!(
                edge_id = %edge_id,
                input = %edge.input_node(),
                output = %edge.output_node(),
                ?subject,
                ?object,
                "edge oriented"
            );
            self.logs.debug(format!(
                "Edge {edge_id} will execute {} -> {} with predicates [{}]",
                edge.input_node(),
                edge.output_node(),
                edge.expanded_predicates.join(", ")
            ));
        }
    }

    pub fn edge_query(&self, edge_id: &str) -> Result<EdgeQuery, QueryError> {
        self.graph
            .edge_query(edge_id, &self.ontology)
            .ok_or_else(|| QueryError::UnknownEdge(edge_id.to_string()))
    }

    /// Filter, store and propagate a batch for an executing edge.
    pub fn store_records(
        &mut self,
        edge_id: &str,
        records: Vec<Record>,
    ) -> Result<StoreOutcome, QueryError> {
        let edge = self
            .graph
            .edge(edge_id)
            .ok_or_else(|| QueryError::UnknownEdge(edge_id.to_string()))?;
        let constraints_at = |node: &str| {
            self.graph
                .node(node)
                .map(|n| n.constraints.clone())
                .unwrap_or_default()
        };
        let input_constraints = constraints_at(edge.input_node());
        let output_constraints = constraints_at(edge.output_node());

        let received = records.len();
        let filtered: Vec<Record> = records
            .into_iter()
            .filter(|r| {
                meets_all(&input_constraints, &r.subject)
                    && meets_all(&output_constraints, &r.object)
            })
            .collect();
        let after_constraints = filtered.len();
        if let Some(edge) = self.graph.edge_mut(edge_id) {
            edge.records = filtered;
        }

        let executed_neighbors: Vec<(String, String)> = if self.config.prune_neighbors {
            self.graph
                .neighbor_edges(edge_id)
                .into_iter()
                .filter(|(id, _)| self.states.get(id) == Some(&EdgeState::Executed))
                .collect()
        } else {
            Vec::new()
        };

        for (neighbor, node) in &executed_neighbors {
            self.prune(edge_id, neighbor, node);
        }
        let kept = self.graph.edge(edge_id).map_or(0, |e| e.records.len());

        let mut neighbors = Vec::new();
        let mut unbound = Vec::new();
        if kept > 0 {
            unbound = self.propagate(edge_id);
            for (neighbor, node) in executed_neighbors {
                let (before, after) = self.prune(&neighbor, edge_id, &node);
                neighbors.push(NeighborPrune {
                    edge_id: neighbor,
                    node_id: node,
                    before,
                    after,
                });
            }
        }

        tracing::info!(
            edge_id = %edge_id,
            received,
            after_constraints,
            kept,
            "records stored"
        );
        if after_constraints < received {
            self.logs.debug(format!(
                "Edge {edge_id}: {} of {received} records rejected by attribute constraints",
                received - after_constraints
            ));
        }
        Ok(StoreOutcome {
            received,
            after_constraints,
            kept,
            neighbors,
            unbound,
        })
    }

    /// Drop records of `target` whose identifier at `node` is not bound by
    /// any record of `source`. Returns the record counts before and after.
    fn prune(&mut self, target: &str, source: &str, node: &str) -> (usize, usize) {
        let allowed: BTreeSet<String> = match self.graph.edge(source) {
            Some(edge) => match edge.side_at(node) {
                Some(side) => edge
                    .records
                    .iter()
                    .flat_map(|r| r.side(side).identifiers())
                    .collect(),
                None => return (0, 0),
            },
            None => return (0, 0),
        };
        let Some(edge) = self.graph.edge_mut(target) else {
            return (0, 0);
        };
        let before = edge.records.len();
        if let Some(side) = edge.side_at(node) {
            edge.records.retain(|r| {
                r.side(side)
                    .identifiers()
                    .iter()
                    .any(|id| allowed.contains(id))
            });
        }
        let after = edge.records.len();
        if after < before {
            tracing::debug!(edge_id = %target, node_id = %node, before, after, "pruned records");
        }
        (before, after)
    }

    /// Push record identifiers (with aliases) onto both endpoint nodes.
    ///
    /// A record side only contributes when its semantic types fall under
    /// the node's categories. Returns the endpoints left with no identifiers.
    fn propagate(&mut self, edge_id: &str) -> Vec<String> {
        let Some(edge) = self.graph.edge(edge_id) else {
            return Vec::new();
        };
        let mut updates = Vec::with_capacity(2);
        for (node_id, side) in [
            (edge.input_node(), Side::Subject),
            (edge.output_node(), Side::Object),
        ] {
            let Some(node) = self.graph.node(node_id) else {
                continue;
            };
            let types = node.expanded_categories(&self.ontology);
            let mut found: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
            for record in &edge.records {
                let endpoint = record.side(side);
                if endpoint.matches_types(&types) {
                    found
                        .entry(endpoint.primary_id().to_string())
                        .or_default()
                        .extend(endpoint.aliases());
                }
            }
            updates.push((node_id.to_string(), found));
        }
        let mut unbound = Vec::new();
        for (node_id, found) in updates {
            if let Some(node) = self.graph.node_mut(&node_id) {
                node.update_curies(found);
                tracing::debug!(
                    node_id = %node_id,
                    entity_count = ?node.entity_count,
                    "node identifiers updated"
                );
                if node.curies.is_empty() {
                    unbound.push(node_id);
                }
            }
        }
        if !unbound.is_empty() {
            self.logs.warning(format!(
                "Edge {edge_id}: no record matched the categories of node(s) {}",
                unbound.join(", ")
            ));
        }
        unbound
    }

    pub fn mark_executed(&mut self, edge_id: &str) {
        self.states.insert(edge_id.to_string(), EdgeState::Executed);
        if let Some(edge) = self.graph.edge_mut(edge_id) {
            edge.executed = true;
        }
    }

    pub fn mark_dead(&mut self, edge_id: &str) {
        self.states.insert(edge_id.to_string(), EdgeState::Dead);
    }

    /// Dry scheduling pass over a copy of the graph.
    ///
    /// Each edge is looked up in the catalog in the order it would run, with
    /// entity counts estimated as `inputs × entries`. An edge with no entries
    /// is reported and treated as yielding a single entity on each side so
    /// the pass can continue.
    pub fn check_support(&self, catalog: &dyn CapabilityCatalog) -> SupportReport {
        let mut dry = EdgeScheduler::new(
            self.graph.clone(),
            Arc::clone(&self.ontology),
            self.config.clone(),
        );
        let mut report = SupportReport::default();

        while let Some(edge_id) = dry.next() {
            let Some(query) = dry.graph.edge_query(&edge_id, &dry.ontology) else {
                dry.mark_dead(&edge_id);
                continue;
            };
            let entries = catalog.lookup(&query);
            let inputs = dry
                .graph
                .node(&query.input_node)
                .and_then(|n| n.entity_count)
                .unwrap_or(1);
            let outputs = if entries.is_empty() {
                report.unsupported.push(edge_id.clone());
                1
            } else {
                inputs.saturating_mul(entries.len())
            };
            if entries.is_empty() {
                if let Some(node) = dry.graph.node_mut(&query.input_node) {
                    node.entity_count = Some(1);
                }
            }
            if let Some(node) = dry.graph.node_mut(&query.output_node) {
                if entries.is_empty() || node.entity_count.is_none() {
                    node.entity_count = Some(outputs);
                }
            }
            report.planned.push(PlannedEdge {
                edge_id: edge_id.clone(),
                reverse: query.reverse,
                input_node: query.input_node.clone(),
                output_node: query.output_node.clone(),
                predicates: query.predicates.clone(),
                entries,
                estimated_inputs: inputs,
                estimated_outputs: outputs,
            });
            dry.mark_executed(&edge_id);
        }
        report
    }
}
