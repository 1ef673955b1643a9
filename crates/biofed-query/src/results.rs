//! Result consolidation.
//!
//! Every combination of records that agrees on the identifier at each shared
//! node is a *preresult* (one binding per edge). Preresults that bind the
//! same identifiers to every non-set node are merged into one result; an
//! `is_set` node contributes its node id only, so all of its identifiers
//! collapse into the same result.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::graph::{QueryEdge, QueryGraph};

const KEY_SEPARATOR: &str = "_&_";

/// One record's contribution to a preresult.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreresultBinding {
    pub edge_id: String,
    pub input_node: String,
    pub output_node: String,
    pub input_id: String,
    pub output_id: String,
    pub record_id: String,
}

pub type Preresult = Vec<PreresultBinding>;

/// All bindings for one edge within a consolidated result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsolidatedBinding {
    pub edge_id: String,
    pub input_node: String,
    pub output_node: String,
    pub input_ids: BTreeSet<String>,
    pub output_ids: BTreeSet<String>,
    pub record_ids: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeBinding {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeBinding {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub node_bindings: BTreeMap<String, Vec<NodeBinding>>,
    pub edge_bindings: BTreeMap<String, Vec<EdgeBinding>>,
    pub score: f64,
}

#[derive(Clone, Copy)]
struct Task<'g> {
    edge: &'g QueryEdge,
    /// Node we arrived from.
    node: &'g str,
    /// Identifier the record must bind at `node`, if constrained.
    identifier: Option<&'g str>,
}

pub struct ResultAssembler<'g> {
    graph: &'g QueryGraph,
}

impl<'g> ResultAssembler<'g> {
    pub fn new(graph: &'g QueryGraph) -> Self {
        Self { graph }
    }

    /// The first node (graph order) with exactly one edge, and that edge.
    pub fn root(&self) -> Option<(&'g str, &'g QueryEdge)> {
        let graph: &'g QueryGraph = self.graph;
        graph
            .nodes()
            .filter(|n| n.edges.len() == 1)
            .find_map(|n| {
                let edge = graph.edge(&n.edges[0])?;
                Some((n.id.as_str(), edge))
            })
    }

    pub fn preresults(&self) -> Vec<Preresult> {
        let mut out = Vec::new();
        let Some((node, edge)) = self.root() else {
            return out;
        };
        let start = Task {
            edge,
            node,
            identifier: None,
        };
        let mut acc = Vec::with_capacity(self.graph.edge_count());
        self.walk(&[start], &mut acc, &mut out);
        out
    }

    /// Depth-first: take the first pending edge, try each of its records,
    /// and queue the edges hanging off the far node.
    fn walk(&self, pending: &[Task<'g>], acc: &mut Preresult, out: &mut Vec<Preresult>) {
        let Some((task, rest)) = pending.split_first() else {
            if acc.len() == self.graph.edge_count() {
                out.push(acc.clone());
            }
            return;
        };
        let graph: &'g QueryGraph = self.graph;
        let edge = task.edge;
        let Some(far) = edge.other_node(task.node) else {
            return;
        };
        let far_edges: Vec<&'g QueryEdge> = graph
            .node(far)
            .into_iter()
            .flat_map(|n| n.edges.iter())
            .filter(|id| **id != edge.id)
            .filter_map(|id| graph.edge(id))
            .collect();

        for record in &edge.records {
            let (Some(here), Some(there)) =
                (edge.record_id_at(record, task.node), edge.record_id_at(record, far))
            else {
                continue;
            };
            if task.identifier.is_some_and(|expected| expected != here) {
                continue;
            }
            acc.push(PreresultBinding {
                edge_id: edge.id.clone(),
                input_node: edge.input_node().to_string(),
                output_node: edge.output_node().to_string(),
                input_id: record.subject.primary_id().to_string(),
                output_id: record.object.primary_id().to_string(),
                record_id: record.id.clone(),
            });
            let mut next: Vec<Task<'g>> = rest.to_vec();
            next.extend(far_edges.iter().map(|&e| Task {
                edge: e,
                node: far,
                identifier: Some(there),
            }));
            self.walk(&next, acc, out);
            acc.pop();
        }
    }

    /// Grouping key: sorted `node` (set) or `node-identifier` tokens.
    pub fn result_key(&self, preresult: &Preresult) -> String {
        let mut tokens = BTreeSet::new();
        for binding in preresult {
            for (node, id) in [
                (&binding.input_node, &binding.input_id),
                (&binding.output_node, &binding.output_id),
            ] {
                let is_set = self.graph.node(node).is_some_and(|n| n.is_set);
                tokens.insert(if is_set {
                    node.clone()
                } else {
                    format!("{node}-{id}")
                });
            }
        }
        tokens.into_iter().collect::<Vec<_>>().join(KEY_SEPARATOR)
    }

    pub fn consolidate(&self, preresults: Vec<Preresult>) -> Vec<Vec<ConsolidatedBinding>> {
        let mut groups: BTreeMap<String, Vec<ConsolidatedBinding>> = BTreeMap::new();
        for preresult in preresults {
            let key = self.result_key(&preresult);
            let group = groups.entry(key).or_default();
            for binding in preresult {
                match group.iter_mut().find(|c| c.edge_id == binding.edge_id) {
                    Some(c) => {
                        c.input_ids.insert(binding.input_id);
                        c.output_ids.insert(binding.output_id);
                        c.record_ids.insert(binding.record_id);
                    }
                    None => group.push(ConsolidatedBinding {
                        edge_id: binding.edge_id,
                        input_node: binding.input_node,
                        output_node: binding.output_node,
                        input_ids: BTreeSet::from([binding.input_id]),
                        output_ids: BTreeSet::from([binding.output_id]),
                        record_ids: BTreeSet::from([binding.record_id]),
                    }),
                }
            }
        }
        groups.into_values().collect()
    }

    pub fn results(&self) -> Vec<QueryResult> {
        let preresults = self.preresults();
        let count = preresults.len();
        let results: Vec<QueryResult> = self
            .consolidate(preresults)
            .into_iter()
            .map(build_result)
            .collect();
        tracing::debug!(preresults = count, results = results.len(), "results consolidated");
        results
    }
}

fn build_result(bindings: Vec<ConsolidatedBinding>) -> QueryResult {
    let mut nodes: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut edges = BTreeMap::new();
    for b in bindings {
        nodes.entry(b.input_node).or_default().extend(b.input_ids);
        nodes.entry(b.output_node).or_default().extend(b.output_ids);
        edges.insert(
            b.edge_id,
            b.record_ids
                .into_iter()
                .map(|id| EdgeBinding { id })
                .collect(),
        );
    }
    QueryResult {
        node_bindings: nodes
            .into_iter()
            .map(|(node, ids)| (node, ids.into_iter().map(|id| NodeBinding { id }).collect()))
            .collect(),
        edge_bindings: edges,
        score: 1.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{QueryEdge, QueryNode};
    use crate::record::{Record, RecordNode};

    fn rec(id: &str, s: &str, o: &str) -> Record {
        Record::new(id, RecordNode::new(s), RecordNode::new(o))
    }

    fn graph(set_node: Option<&str>, e0: Vec<Record>, e1: Vec<Record>) -> QueryGraph {
        let mut nodes = vec![
            QueryNode::new("n0"),
            QueryNode::new("n1"),
            QueryNode::new("n2"),
        ];
        for n in &mut nodes {
            n.is_set = Some(n.id.as_str()) == set_node;
        }
        let mut a = QueryEdge::new("e0", "n0", "n1");
        a.records = e0;
        let mut b = QueryEdge::new("e1", "n1", "n2");
        b.records = e1;
        QueryGraph::assemble(nodes, vec![a, b]).unwrap()
    }

    #[test]
    fn chain_joins_on_shared_identifier() {
        let g = graph(
            None,
            vec![rec("r1", "A:1", "B:1"), rec("r2", "A:1", "B:2")],
            vec![rec("r3", "B:1", "C:1"), rec("r4", "B:9", "C:2")],
        );
        let assembler = ResultAssembler::new(&g);
        let pre = assembler.preresults();
        assert_eq!(pre.len(), 1);
        assert_eq!(
            assembler.result_key(&pre[0]),
            "n0-A:1_&_n1-B:1_&_n2-C:1"
        );
        let results = assembler.results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].edge_bindings["e1"], vec![EdgeBinding { id: "r3".into() }]);
    }

    #[test]
    fn reversed_edges_bind_by_node() {
        let mut g = graph(
            None,
            vec![rec("r1", "A:1", "B:1")],
            // e1 executed n2 -> n1
            vec![rec("r2", "C:1", "B:1")],
        );
        g.edge_mut("e1").unwrap().reverse = true;
        let results = ResultAssembler::new(&g).results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].node_bindings["n2"], vec![NodeBinding { id: "C:1".into() }]);
        assert_eq!(results[0].node_bindings["n1"], vec![NodeBinding { id: "B:1".into() }]);
    }

    #[test]
    fn set_nodes_collapse_results() {
        let e0 = vec![rec("r1", "A:1", "B:1"), rec("r2", "A:1", "B:2")];
        let e1 = vec![rec("r3", "B:1", "C:1"), rec("r4", "B:2", "C:1")];

        let g = graph(None, e0.clone(), e1.clone());
        assert_eq!(ResultAssembler::new(&g).results().len(), 2);

        let g = graph(Some("n1"), e0, e1);
        let results = ResultAssembler::new(&g).results();
        assert_eq!(results.len(), 1);
        let n1: Vec<&str> = results[0].node_bindings["n1"]
            .iter()
            .map(|b| b.id.as_str())
            .collect();
        assert_eq!(n1, vec!["B:1", "B:2"]);
        assert_eq!(results[0].edge_bindings["e0"].len(), 2);
        assert_eq!(results[0].score, 1.0);
    }

    #[test]
    fn branching_tree_needs_every_edge() {
        // n1 is the hub: e0 n0-n1, e1 n1-n2, e2 n1-n3.
        let nodes = ["n0", "n1", "n2", "n3"].map(QueryNode::new).to_vec();
        let mut e0 = QueryEdge::new("e0", "n0", "n1");
        e0.records = vec![rec("r1", "A:1", "B:1")];
        let mut e1 = QueryEdge::new("e1", "n1", "n2");
        e1.records = vec![rec("r2", "B:1", "C:1")];
        let mut e2 = QueryEdge::new("e2", "n1", "n3");
        e2.records = vec![rec("r3", "B:1", "D:1"), rec("r4", "B:2", "D:2")];
        let g = QueryGraph::assemble(nodes, vec![e0, e1, e2]).unwrap();

        let pre = ResultAssembler::new(&g).preresults();
        assert_eq!(pre.len(), 1);
        assert_eq!(pre[0].len(), 3);

        let mut empty = g.clone();
        empty.edge_mut("e2").unwrap().records.clear();
        assert!(ResultAssembler::new(&empty).results().is_empty());
    }
}
