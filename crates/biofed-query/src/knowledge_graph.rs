//! Knowledge graph assembled from the records of executed edges.
//!
//! Nodes are keyed by primary identifier, edges by record id, so the
//! bindings of a [`QueryResult`] point straight into it. Edges are stored in
//! the direction the query edge was declared, whatever direction it ran in.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use biofed_ontology::{strip_prefix, Ontology, BIOLINK_PREFIX};

use crate::graph::{QueryEdge, QueryGraph};
use crate::qualifiers::{is_predicate_valued, swap_side};
use crate::record::{Record, RecordNode};
use crate::results::QueryResult;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KgNode {
    #[serde(default)]
    pub categories: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub equivalent_identifiers: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KgEdge {
    pub subject: String,
    pub object: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicate: Option<String>,
    /// APIs that reported this association.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub sources: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub qualifiers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub publications: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeGraph {
    pub nodes: BTreeMap<String, KgNode>,
    pub edges: BTreeMap<String, KgEdge>,
}

impl KnowledgeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record stored on an executed edge.
    pub fn from_query_graph(graph: &QueryGraph, ontology: &Ontology) -> Self {
        let mut kg = Self::new();
        for edge in graph.edges().filter(|e| e.executed) {
            for record in &edge.records {
                kg.add_record(edge, record, ontology);
            }
        }
        tracing::debug!(
            nodes = kg.nodes.len(),
            edges = kg.edges.len(),
            "knowledge graph assembled"
        );
        kg
    }

    pub fn add_record(&mut self, edge: &QueryEdge, record: &Record, ontology: &Ontology) {
        let (subject, object) = if edge.reverse {
            (&record.object, &record.subject)
        } else {
            (&record.subject, &record.object)
        };
        self.add_node(subject);
        self.add_node(object);

        let predicate = if record.predicate.is_empty() {
            edge.predicates.first().map(|p| strip_prefix(p).to_string())
        } else if edge.reverse {
            Some(
                ontology
                    .reverse(&record.predicate)
                    .unwrap_or_else(|| strip_prefix(&record.predicate).to_string()),
            )
        } else {
            Some(strip_prefix(&record.predicate).to_string())
        };

        let kg_edge = self.edges.entry(record.id.clone()).or_insert_with(|| KgEdge {
            subject: subject.primary_id().to_string(),
            object: object.primary_id().to_string(),
            predicate: predicate.map(|p| format!("{BIOLINK_PREFIX}{p}")),
            sources: BTreeSet::new(),
            qualifiers: BTreeMap::new(),
            publications: BTreeSet::new(),
        });
        if !record.api_name.is_empty() {
            kg_edge.sources.insert(record.api_name.clone());
        }
        kg_edge.publications.extend(record.publications.iter().cloned());
        for (qualifier_type, value) in &record.qualifiers {
            let (qualifier_type, value) = if edge.reverse {
                let value = if is_predicate_valued(qualifier_type) {
                    ontology
                        .reverse(value)
                        .map(|v| format!("{BIOLINK_PREFIX}{v}"))
                        .unwrap_or_else(|| value.clone())
                } else {
                    value.clone()
                };
                (swap_side(qualifier_type), value)
            } else {
                (qualifier_type.clone(), value.clone())
            };
            kg_edge.qualifiers.insert(qualifier_type, value);
        }
    }

    fn add_node(&mut self, side: &RecordNode) {
        let node = self.nodes.entry(side.primary_id().to_string()).or_default();
        node.categories.extend(side.semantic_types.iter().cloned());
        node.equivalent_identifiers.extend(side.aliases());
        for (key, value) in &side.attributes {
            node.attributes
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }

    /// Keep only what some result binds.
    pub fn prune(&mut self, results: &[QueryResult]) {
        let nodes: BTreeSet<&str> = results
            .iter()
            .flat_map(|r| r.node_bindings.values().flatten())
            .map(|b| b.id.as_str())
            .collect();
        let edges: BTreeSet<&str> = results
            .iter()
            .flat_map(|r| r.edge_bindings.values().flatten())
            .map(|b| b.id.as_str())
            .collect();
        let before = (self.nodes.len(), self.edges.len());
        self.nodes.retain(|id, _| nodes.contains(id.as_str()));
        self.edges.retain(|id, _| edges.contains(id.as_str()));
        tracing::debug!(
            nodes_before = before.0,
            edges_before = before.1,
            nodes = self.nodes.len(),
            edges = self.edges.len(),
            "knowledge graph pruned"
        );
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }
}
