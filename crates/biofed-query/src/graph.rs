//! Query graph arena.
//!
//! Nodes and edges live in id-keyed maps; edges name their endpoints by node
//! id and nodes list their adjacent edge ids. Iteration order (id order) is
//! the "graph order" the scheduler uses to break ties.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use biofed_ontology::{strip_prefix, Ontology};

use crate::collaborators::EdgeQuery;
use crate::error::InvalidQueryGraph;
use crate::qualifiers;
use crate::record::{Record, Side};
use crate::spec::{AttributeConstraint, QEdgeSpec, QNodeSpec, QualifierConstraint};

pub const GRAPH_SNAPSHOT_V1_VERSION: u32 = 1;

/// Categories that stand for "anything": a node declaring one of them places
/// no type restriction on its identifiers.
const ROOT_CATEGORY: &str = "NamedThing";

/// Strip prefixes, drop duplicates and apply the legacy category rules.
///
/// `Disease` and `PhenotypicFeature` are folded into
/// `DiseaseOrPhenotypicFeature`; `Protein` also admits `Gene`.
pub fn normalize_categories<S: AsRef<str>>(categories: &[S]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(categories.len());
    for c in categories {
        let c = strip_prefix(c.as_ref());
        if !out.iter().any(|o| o == c) {
            out.push(c.to_string());
        }
    }
    if out.iter().any(|c| c == "Disease" || c == "PhenotypicFeature") {
        out.retain(|c| c != "Disease" && c != "PhenotypicFeature");
        if !out.iter().any(|c| c == "DiseaseOrPhenotypicFeature") {
            out.push("DiseaseOrPhenotypicFeature".to_string());
        }
    }
    if out.iter().any(|c| c == "Protein") && !out.iter().any(|c| c == "Gene") {
        out.push("Gene".to_string());
    }
    out
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryNode {
    pub id: String,
    #[serde(default)]
    pub categories: Vec<String>,
    /// Bound identifier → alias set. Only ever grows.
    #[serde(default)]
    pub curies: BTreeMap<String, BTreeSet<String>>,
    #[serde(default)]
    pub is_set: bool,
    #[serde(default)]
    pub entity_count: Option<usize>,
    #[serde(default)]
    pub constraints: Vec<AttributeConstraint>,
    #[serde(default)]
    pub edges: Vec<String>,
}

impl QueryNode {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            categories: Vec::new(),
            curies: BTreeMap::new(),
            is_set: false,
            entity_count: None,
            constraints: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub(crate) fn from_spec(id: &str, spec: &QNodeSpec, categories: &[String]) -> Self {
        let mut node = Self::new(id);
        node.categories = normalize_categories(categories);
        node.is_set = spec.is_set;
        node.constraints = spec.constraints.clone();
        for seed in spec.ids.iter().flatten() {
            node.curies
                .entry(seed.clone())
                .or_default()
                .insert(seed.clone());
        }
        if !node.curies.is_empty() {
            node.entity_count = Some(node.curies.len());
        }
        node
    }

    /// Bound identifiers (without aliases).
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.curies.keys().map(String::as_str)
    }

    /// A node is bound once it has an entity count, seeded or discovered.
    pub fn is_bound(&self) -> bool {
        self.entity_count.is_some()
    }

    /// Bound identifiers and all their aliases.
    pub fn identifiers(&self) -> BTreeSet<&str> {
        self.curies
            .iter()
            .flat_map(|(id, aliases)| std::iter::once(id).chain(aliases))
            .map(String::as_str)
            .collect()
    }

    /// Declared categories with all descendants. Empty means unrestricted.
    pub fn expanded_categories(&self, ontology: &Ontology) -> BTreeSet<String> {
        if self.categories.iter().any(|c| c == ROOT_CATEGORY) {
            return BTreeSet::new();
        }
        self.categories
            .iter()
            .flat_map(|c| ontology.descendant_classes(c))
            .collect()
    }

    /// Merge discovered identifiers. An incoming entry joins an existing one
    /// when they share any identifier; otherwise it is added.
    pub fn update_curies(&mut self, found: BTreeMap<String, BTreeSet<String>>) {
        for (primary, mut aliases) in found {
            aliases.insert(primary.clone());
            let existing = self.curies.iter().find_map(|(id, known)| {
                (aliases.contains(id) || !known.is_disjoint(&aliases)).then(|| id.clone())
            });
            match existing {
                Some(id) => self.curies.entry(id).or_default().extend(aliases),
                None => {
                    self.curies.insert(primary, aliases);
                }
            }
        }
        if !self.curies.is_empty() {
            self.entity_count = Some(self.curies.len());
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryEdge {
    pub id: String,
    pub subject: String,
    pub object: String,
    #[serde(default)]
    pub predicates: Vec<String>,
    #[serde(default)]
    pub expanded_predicates: Vec<String>,
    #[serde(default)]
    pub qualifier_constraints: Vec<QualifierConstraint>,
    /// Execute object → subject.
    #[serde(default)]
    pub reverse: bool,
    #[serde(default)]
    pub executed: bool,
    /// Records in execution direction.
    #[serde(default)]
    pub records: Vec<Record>,
}

impl QueryEdge {
    pub fn new(id: impl Into<String>, subject: impl Into<String>, object: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            subject: subject.into(),
            object: object.into(),
            predicates: Vec::new(),
            expanded_predicates: Vec::new(),
            qualifier_constraints: Vec::new(),
            reverse: false,
            executed: false,
            records: Vec::new(),
        }
    }

    pub(crate) fn from_spec(id: &str, spec: &QEdgeSpec) -> Self {
        let mut edge = Self::new(id, spec.subject.clone(), spec.object.clone());
        for p in spec.predicates.iter().flatten() {
            let p = strip_prefix(p);
            if !edge.predicates.iter().any(|q| q == p) {
                edge.predicates.push(p.to_string());
            }
        }
        edge.qualifier_constraints = spec.qualifier_constraints.clone();
        edge
    }

    pub fn input_node(&self) -> &str {
        if self.reverse {
            &self.object
        } else {
            &self.subject
        }
    }

    pub fn output_node(&self) -> &str {
        if self.reverse {
            &self.subject
        } else {
            &self.object
        }
    }

    pub fn touches(&self, node: &str) -> bool {
        self.subject == node || self.object == node
    }

    pub fn other_node(&self, node: &str) -> Option<&str> {
        if self.subject == node {
            Some(&self.object)
        } else if self.object == node {
            Some(&self.subject)
        } else {
            None
        }
    }

    /// Which record side is bound to `node`.
    pub fn side_at(&self, node: &str) -> Option<Side> {
        if self.input_node() == node {
            Some(Side::Subject)
        } else if self.output_node() == node {
            Some(Side::Object)
        } else {
            None
        }
    }

    /// The identifier a record binds to `node`.
    pub fn record_id_at<'r>(&self, record: &'r Record, node: &str) -> Option<&'r str> {
        self.side_at(node).map(|side| record.side(side).primary_id())
    }

    /// Declared predicates expanded to descendants, then mapped through
    /// `reverse` when executing backwards. Irreversible predicates are
    /// dropped.
    pub fn resolve_predicates(&self, ontology: &Ontology) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for p in &self.predicates {
            for d in ontology.descendant_predicates(p) {
                let resolved = if self.reverse {
                    match ontology.reverse(&d) {
                        Some(r) => r,
                        None => continue,
                    }
                } else {
                    d
                };
                if !out.contains(&resolved) {
                    out.push(resolved);
                }
            }
        }
        out
    }

    pub(crate) fn refresh_predicates(&mut self, ontology: &Ontology) {
        self.expanded_predicates = self.resolve_predicates(ontology);
    }
}

/// Versioned, self-contained form of a [`QueryGraph`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshotV1 {
    pub version: u32,
    pub nodes: Vec<QueryNode>,
    pub edges: Vec<QueryEdge>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryGraph {
    nodes: BTreeMap<String, QueryNode>,
    edges: BTreeMap<String, QueryEdge>,
}

impl QueryGraph {
    /// Build the arena, rewiring node adjacency from the edges.
    pub(crate) fn assemble(
        nodes: Vec<QueryNode>,
        edges: Vec<QueryEdge>,
    ) -> Result<Self, InvalidQueryGraph> {
        let mut node_map = BTreeMap::new();
        for mut node in nodes {
            node.edges.clear();
            let id = node.id.clone();
            if node_map.insert(id.clone(), node).is_some() {
                return Err(InvalidQueryGraph::Snapshot(format!("duplicate node `{id}`")));
            }
        }
        let mut edge_map = BTreeMap::new();
        for edge in edges {
            for (role, node_id) in [("subject", &edge.subject), ("object", &edge.object)] {
                if !node_map.contains_key(node_id) {
                    return Err(InvalidQueryGraph::UndeclaredNode {
                        edge_id: edge.id.clone(),
                        role,
                        node_id: node_id.clone(),
                    });
                }
            }
            let id = edge.id.clone();
            if edge_map.insert(id.clone(), edge).is_some() {
                return Err(InvalidQueryGraph::Snapshot(format!("duplicate edge `{id}`")));
            }
        }

        check_tree(
            node_map.keys().map(String::as_str),
            edge_map
                .values()
                .map(|e| (e.id.as_str(), e.subject.as_str(), e.object.as_str())),
        )?;

        for edge in edge_map.values() {
            for node_id in [&edge.subject, &edge.object] {
                if let Some(node) = node_map.get_mut(node_id) {
                    node.edges.push(edge.id.clone());
                }
            }
        }
        Ok(Self {
            nodes: node_map,
            edges: edge_map,
        })
    }

    pub fn from_snapshot(snapshot: GraphSnapshotV1) -> Result<Self, InvalidQueryGraph> {
        if snapshot.version != GRAPH_SNAPSHOT_V1_VERSION {
            return Err(InvalidQueryGraph::Snapshot(format!(
                "unsupported version {} (expected {})",
                snapshot.version, GRAPH_SNAPSHOT_V1_VERSION
            )));
        }
        Self::assemble(snapshot.nodes, snapshot.edges)
    }

    pub fn snapshot(&self) -> GraphSnapshotV1 {
        GraphSnapshotV1 {
            version: GRAPH_SNAPSHOT_V1_VERSION,
            nodes: self.nodes.values().cloned().collect(),
            edges: self.edges.values().cloned().collect(),
        }
    }

    pub fn node(&self, id: &str) -> Option<&QueryNode> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut QueryNode> {
        self.nodes.get_mut(id)
    }

    pub fn edge(&self, id: &str) -> Option<&QueryEdge> {
        self.edges.get(id)
    }

    pub fn edge_mut(&mut self, id: &str) -> Option<&mut QueryEdge> {
        self.edges.get_mut(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &QueryNode> {
        self.nodes.values()
    }

    pub fn edges(&self) -> impl Iterator<Item = &QueryEdge> {
        self.edges.values()
    }

    pub(crate) fn edges_mut(&mut self) -> impl Iterator<Item = &mut QueryEdge> {
        self.edges.values_mut()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Edges sharing a node with `edge_id`, paired with the shared node.
    pub fn neighbor_edges(&self, edge_id: &str) -> Vec<(String, String)> {
        let Some(edge) = self.edges.get(edge_id) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for node_id in [&edge.subject, &edge.object] {
            let Some(node) = self.nodes.get(node_id) else {
                continue;
            };
            for other in &node.edges {
                if other != edge_id {
                    out.push((other.clone(), node_id.clone()));
                }
            }
        }
        out
    }

    /// The execution-oriented view of `edge_id` handed to collaborators.
    pub fn edge_query(&self, edge_id: &str, ontology: &Ontology) -> Option<EdgeQuery> {
        let edge = self.edges.get(edge_id)?;
        let input = self.nodes.get(edge.input_node())?;
        let output = self.nodes.get(edge.output_node())?;
        let oriented = qualifiers::oriented(&edge.qualifier_constraints, edge.reverse, ontology);
        let mut query = EdgeQuery {
            edge_id: edge.id.clone(),
            reverse: edge.reverse,
            input_node: input.id.clone(),
            output_node: output.id.clone(),
            input_categories: input.expanded_categories(ontology),
            output_categories: output.expanded_categories(ontology),
            predicates: (!edge.predicates.is_empty()).then(|| edge.resolve_predicates(ontology)),
            qualifier_constraints: qualifiers::expand(&oriented, ontology),
            input_curies: input.curies.clone(),
            hash: String::new(),
        };
        query.hash = query.compute_hash();
        Some(query)
    }
}

/// Reject self-loops, parallel edges, cycles and disconnected nodes.
///
/// Every edge endpoint must already be one of `node_ids`.
pub(crate) fn check_tree<'a>(
    node_ids: impl IntoIterator<Item = &'a str>,
    edges: impl IntoIterator<Item = (&'a str, &'a str, &'a str)>,
) -> Result<(), InvalidQueryGraph> {
    let mut adjacency: BTreeMap<&str, Vec<(&str, &str)>> =
        node_ids.into_iter().map(|n| (n, Vec::new())).collect();
    let mut pairs: BTreeMap<(&str, &str), &str> = BTreeMap::new();

    for (edge, subject, object) in edges {
        if subject == object {
            return Err(InvalidQueryGraph::Cycle {
                node_id: subject.to_string(),
            });
        }
        let key = if subject <= object {
            (subject, object)
        } else {
            (object, subject)
        };
        if let Some(first) = pairs.insert(key, edge) {
            return Err(InvalidQueryGraph::DuplicateEdge {
                first: first.to_string(),
                second: edge.to_string(),
                a: key.0.to_string(),
                b: key.1.to_string(),
            });
        }
        adjacency.entry(subject).or_default().push((edge, object));
        adjacency.entry(object).or_default().push((edge, subject));
    }

    let mut visited: BTreeSet<&str> = BTreeSet::new();
    let mut stray: Option<&str> = None;
    for &start in adjacency.keys() {
        if visited.contains(start) {
            continue;
        }
        if !visited.is_empty() && stray.is_none() {
            stray = Some(start);
        }
        visited.insert(start);
        let mut stack: Vec<(&str, Option<&str>)> = vec![(start, None)];
        while let Some((node, via)) = stack.pop() {
            for &(edge, next) in adjacency.get(node).into_iter().flatten() {
                if via == Some(edge) {
                    continue;
                }
                if !visited.insert(next) {
                    return Err(InvalidQueryGraph::Cycle {
                        node_id: next.to_string(),
                    });
                }
                stack.push((next, Some(edge)));
            }
        }
    }

    match stray {
        Some(node) => Err(InvalidQueryGraph::Disconnected {
            node_id: node.to_string(),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordNode;

    #[test]
    fn legacy_categories_are_normalized() {
        assert_eq!(
            normalize_categories(&["biolink:Disease", "PhenotypicFeature"]),
            vec!["DiseaseOrPhenotypicFeature"]
        );
        assert_eq!(
            normalize_categories(&["biolink:Protein"]),
            vec!["Protein", "Gene"]
        );
        assert_eq!(
            normalize_categories(&["Gene", "biolink:Gene"]),
            vec!["Gene"]
        );
    }

    #[test]
    fn tree_checks() {
        let nodes = ["n0", "n1", "n2"];
        assert!(check_tree(nodes, [("e0", "n0", "n1"), ("e1", "n1", "n2")]).is_ok());

        let err = check_tree(
            nodes,
            [("e0", "n0", "n1"), ("e1", "n1", "n2"), ("e2", "n2", "n0")],
        )
        .unwrap_err();
        assert!(matches!(err, InvalidQueryGraph::Cycle { .. }));

        let err = check_tree(nodes, [("e0", "n0", "n1"), ("e1", "n1", "n0")]).unwrap_err();
        assert!(matches!(err, InvalidQueryGraph::DuplicateEdge { .. }));

        let err = check_tree(nodes, [("e0", "n0", "n0")]).unwrap_err();
        assert!(matches!(err, InvalidQueryGraph::Cycle { .. }));

        let err = check_tree(nodes, [("e0", "n0", "n1")]).unwrap_err();
        assert_eq!(
            err,
            InvalidQueryGraph::Disconnected {
                node_id: "n2".into()
            }
        );
    }

    #[test]
    fn update_curies_merges_aliases_and_only_grows() {
        let mut node = QueryNode::new("n0");
        node.curies.insert(
            "HGNC:6081".into(),
            ["HGNC:6081".to_string()].into_iter().collect(),
        );
        let mut found = BTreeMap::new();
        found.insert(
            "NCBIGene:3630".to_string(),
            ["HGNC:6081".to_string(), "NCBIGene:3630".to_string()]
                .into_iter()
                .collect(),
        );
        found.insert(
            "NCBIGene:1".to_string(),
            ["NCBIGene:1".to_string()].into_iter().collect(),
        );
        node.update_curies(found);

        assert_eq!(node.entity_count, Some(2));
        assert!(node.curies["HGNC:6081"].contains("NCBIGene:3630"));
        assert!(node.identifiers().contains("NCBIGene:1"));
    }

    #[test]
    fn direction_helpers_follow_reverse() {
        let mut edge = QueryEdge::new("e0", "n0", "n1");
        let record = Record::new("r", RecordNode::new("A:1"), RecordNode::new("B:1"));
        assert_eq!(edge.record_id_at(&record, "n0"), Some("A:1"));
        edge.reverse = true;
        assert_eq!(edge.input_node(), "n1");
        assert_eq!(edge.record_id_at(&record, "n1"), Some("A:1"));
        assert_eq!(edge.record_id_at(&record, "n0"), Some("B:1"));
        assert_eq!(edge.other_node("n1"), Some("n0"));
        assert_eq!(edge.record_id_at(&record, "n9"), None);
    }

    #[test]
    fn snapshot_restores_adjacency_and_checks_version() {
        let graph = QueryGraph::assemble(
            vec![QueryNode::new("n0"), QueryNode::new("n1")],
            vec![QueryEdge::new("e0", "n0", "n1")],
        )
        .unwrap();
        let mut snapshot = graph.snapshot();
        snapshot.nodes[0].edges.clear();
        let restored = QueryGraph::from_snapshot(snapshot.clone()).unwrap();
        assert_eq!(restored, graph);

        snapshot.version = 99;
        assert!(matches!(
            QueryGraph::from_snapshot(snapshot),
            Err(InvalidQueryGraph::Snapshot(_))
        ));

        let dangling = GraphSnapshotV1 {
            version: GRAPH_SNAPSHOT_V1_VERSION,
            nodes: vec![QueryNode::new("n0")],
            edges: vec![QueryEdge::new("e0", "n0", "n9")],
        };
        assert!(matches!(
            QueryGraph::from_snapshot(dangling),
            Err(InvalidQueryGraph::UndeclaredNode { .. })
        ));
    }
}
