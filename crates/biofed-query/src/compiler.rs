//! Query graph compilation.
//!
//! `QueryGraphSpec` → validated [`QueryGraph`]:
//!
//! 1. structural validation (non-empty, declared endpoints, a tree, seeded),
//! 2. qualifier validation,
//! 3. seed expansion to descendant identifiers,
//! 4. category inference for seeded nodes that declare none,
//! 5. materialization (legacy category rules, adjacency, initial direction).

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use biofed_ontology::{strip_prefix, Ontology};

use crate::collaborators::{IdResolver, ResolvedEntity};
use crate::error::{InvalidQueryGraph, QueryError, ResolverError};
use crate::graph::{check_tree, QueryEdge, QueryGraph, QueryNode};
use crate::log::{Diagnostics, LogEntry, LogLevel};
use crate::qualifiers;
use crate::spec::{QNodeSpec, QueryGraphSpec};

/// Everything that makes a spec structurally unusable, in reporting order.
pub fn validate_structure(spec: &QueryGraphSpec) -> Result<(), InvalidQueryGraph> {
    if spec.nodes.is_empty() {
        return Err(InvalidQueryGraph::NoNodes);
    }
    if spec.edges.is_empty() {
        return Err(InvalidQueryGraph::NoEdges);
    }
    for (edge_id, edge) in &spec.edges {
        for (role, node_id) in [("subject", &edge.subject), ("object", &edge.object)] {
            if !spec.nodes.contains_key(node_id) {
                return Err(InvalidQueryGraph::UndeclaredNode {
                    edge_id: edge_id.clone(),
                    role,
                    node_id: node_id.clone(),
                });
            }
        }
    }
    let tree = check_tree(
        spec.nodes.keys().map(String::as_str),
        spec.edges
            .iter()
            .map(|(id, e)| (id.as_str(), e.subject.as_str(), e.object.as_str())),
    );
    if let Err(err) = &tree {
        if !matches!(err, InvalidQueryGraph::Disconnected { .. }) {
            return tree;
        }
    }
    if !spec.nodes.values().any(|n| n.has_ids()) {
        return Err(InvalidQueryGraph::NoIdentifiers);
    }
    tree
}

pub struct QueryGraphCompiler {
    ontology: Arc<Ontology>,
    resolver: Arc<dyn IdResolver>,
    resolve_categories: bool,
    expand_ids: bool,
    logs: Diagnostics,
}

impl QueryGraphCompiler {
    pub fn new(ontology: Arc<Ontology>, resolver: Arc<dyn IdResolver>) -> Self {
        Self {
            ontology,
            resolver,
            resolve_categories: true,
            expand_ids: true,
            logs: Diagnostics::new(),
        }
    }

    pub fn resolve_categories(mut self, enabled: bool) -> Self {
        self.resolve_categories = enabled;
        self
    }

    pub fn expand_ids(mut self, enabled: bool) -> Self {
        self.expand_ids = enabled;
        self
    }

    pub fn logs(&self) -> &Diagnostics {
        &self.logs
    }

    pub fn take_logs(&mut self) -> Diagnostics {
        std::mem::take(&mut self.logs)
    }

    pub async fn compile(&mut self, spec: &QueryGraphSpec) -> Result<QueryGraph, QueryError> {
        self.warn_unrecognized(spec);
        validate_structure(spec)?;
        for (edge_id, edge) in &spec.edges {
            qualifiers::validate(edge_id, &edge.qualifier_constraints)?;
        }

        let mut nodes = Vec::with_capacity(spec.nodes.len());
        for (node_id, node) in &spec.nodes {
            let mut node = node.clone();
            if self.expand_ids {
                self.expand_seed_ids(node_id, &mut node).await;
            }
            let declared: Vec<String> = node.categories.clone().unwrap_or_default();
            let categories = match &node.ids {
                Some(ids) if !ids.is_empty() && declared.is_empty() && self.resolve_categories => {
                    self.infer_categories(node_id, ids).await?
                }
                _ => declared,
            };
            nodes.push(QueryNode::from_spec(node_id, &node, &categories));
        }
        self.logs
            .debug(format!("Identified {} QNodes from the query graph", nodes.len()));

        let edges: Vec<QueryEdge> = spec
            .edges
            .iter()
            .map(|(id, e)| QueryEdge::from_spec(id, e))
            .collect();
        self.logs
            .debug(format!("Identified {} QEdges from the query graph", edges.len()));

        let mut graph = QueryGraph::assemble(nodes, edges)?;
        let bound: BTreeSet<String> = graph
            .nodes()
            .filter(|n| n.is_bound())
            .map(|n| n.id.clone())
            .collect();
        for edge in graph.edges_mut() {
            edge.reverse = !bound.contains(&edge.subject) && bound.contains(&edge.object);
            edge.refresh_predicates(&self.ontology);
        }
        Ok(graph)
    }

    fn warn_unrecognized(&mut self, spec: &QueryGraphSpec) {
        let nodes = spec.nodes.iter().map(|(id, n)| ("node", id, &n.extra));
        let edges = spec.edges.iter().map(|(id, e)| ("edge", id, &e.extra));
        for (kind, id, extra) in nodes.chain(edges) {
            for key in extra.keys() {
                self.logs.push(
                    LogEntry::new(
                        LogLevel::Warning,
                        format!("Ignoring unrecognized property `{key}` on {kind} `{id}`"),
                    )
                    .with_code("UnrecognizedProperty"),
                );
            }
        }
    }

    /// Append descendant identifiers to a seeded node. A node that grows is
    /// answered as a set. Resolver failures leave the seeds as given.
    async fn expand_seed_ids(&mut self, node_id: &str, node: &mut QNodeSpec) {
        let Some(ids) = node.ids.as_mut().filter(|ids| !ids.is_empty()) else {
            return;
        };
        let found = match self.resolver.descendants(ids).await {
            Ok(found) => found,
            Err(err) => {
                self.logs
                    .warning(format!("Failed to expand ids for node `{node_id}`: {err}"));
                return;
            }
        };

        let before = ids.len();
        let mut seen: BTreeSet<String> = ids.iter().cloned().collect();
        let additions: Vec<String> = ids
            .iter()
            .filter_map(|id| found.get(id))
            .flatten()
            .filter(|d| seen.insert((*d).clone()))
            .cloned()
            .collect();
        ids.extend(additions);
        let after = ids.len();
        self.logs.info(format!(
            "Expanded ids for node `{node_id}`: ({before} ids -> {after} ids)"
        ));

        if after > before && !node.is_set {
            node.is_set = true;
            self.logs.info(format!("Added is_set:true to node `{node_id}`"));
        }
    }

    /// Categories for a seeded node that declares none.
    ///
    /// Only a hard resolver outage is an error; every other failure yields no
    /// categories and a logged diagnostic.
    async fn infer_categories(
        &mut self,
        node_id: &str,
        ids: &[String],
    ) -> Result<Vec<String>, QueryError> {
        let resolved = match self.resolver.resolve(ids).await {
            Ok(resolved) => resolved,
            Err(err @ ResolverError::Unavailable(_)) => return Err(err.into()),
            Err(err) => {
                self.logs.warning(format!(
                    "Failed to assign categories to node `{node_id}`: {err}"
                ));
                return Ok(Vec::new());
            }
        };

        let inferred = if ids.len() == 1 {
            resolved.get(&ids[0]).and_then(|entity| {
                match &entity.primary_type {
                    Some(primary) => Some(vec![strip_prefix(primary).to_string()]),
                    None if !entity.semantic_types.is_empty() => {
                        Some(self.ontology.most_specific(entity.semantic_types.as_slice()))
                    }
                    None => None,
                }
            })
        } else {
            self.infer_shared_categories(ids, &resolved)
        };

        match inferred {
            Some(categories) if !categories.is_empty() => {
                self.logs.debug(format!(
                    "Assigned missing categories [{}] to node `{node_id}`",
                    categories.join(", ")
                ));
                Ok(categories)
            }
            _ => {
                self.logs.warning(format!(
                    "Unable to infer categories for node `{node_id}`; leaving it unrestricted"
                ));
                Ok(Vec::new())
            }
        }
    }

    fn infer_shared_categories(
        &self,
        ids: &[String],
        resolved: &HashMap<String, ResolvedEntity>,
    ) -> Option<Vec<String>> {
        let type_lists: Vec<Vec<&str>> = ids
            .iter()
            .filter_map(|id| resolved.get(id))
            .map(|e| e.semantic_types.iter().map(|t| strip_prefix(t)).collect::<Vec<_>>())
            .filter(|types| !types.is_empty())
            .collect();
        let (first, rest) = type_lists.split_first()?;
        let common: Vec<&str> = first
            .iter()
            .copied()
            .filter(|t| rest.iter().all(|types| types.contains(t)))
            .collect();
        if !common.is_empty() {
            return Some(self.ontology.most_specific(common.as_slice()));
        }

        let primaries: Vec<&str> = ids
            .iter()
            .filter_map(|id| resolved.get(id))
            .filter_map(|e| e.primary_type.as_deref())
            .collect();
        self.ontology
            .most_specific_common_ancestor(primaries.as_slice())
            .map(|c| vec![c])
    }
}

impl QueryGraph {
    /// Compile `spec` with the given collaborators, discarding diagnostics.
    pub async fn from_spec(
        spec: &QueryGraphSpec,
        ontology: Arc<Ontology>,
        resolver: Arc<dyn IdResolver>,
    ) -> Result<QueryGraph, QueryError> {
        QueryGraphCompiler::new(ontology, resolver).compile(spec).await
    }
}
