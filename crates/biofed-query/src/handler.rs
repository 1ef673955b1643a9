//! End-to-end query control loop.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;

use biofed_ontology::Ontology;

use crate::collaborators::{BatchExecutor, CapabilityCatalog, IdResolver};
use crate::compiler::QueryGraphCompiler;
use crate::error::{QueryError, QueryFailure};
use crate::graph::QueryGraph;
use crate::knowledge_graph::KnowledgeGraph;
use crate::log::{Diagnostics, LogEntry, LogLevel};
use crate::options::QueryOptions;
use crate::results::{QueryResult, ResultAssembler};
use crate::scheduler::{EdgeScheduler, SupportReport};
use crate::spec::QueryGraphSpec;

/// Why a query stopped early with no results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeadEnd {
    /// No capability entry for these edges.
    NoCatalogMatches { edges: Vec<String> },
    /// The executor returned nothing.
    NoRecords,
    /// Every record was removed by constraints or by pruning against
    /// already-executed neighbors.
    NoRecordsAfterFiltering { received: usize },
    /// Pruning emptied an already-executed neighbor edge.
    NeighborPruned { neighbor: String },
    /// Records survived but none matched this endpoint's categories.
    NoIdentifiersPropagated { node: String },
}

impl fmt::Display for DeadEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeadEnd::NoCatalogMatches { edges } => {
                write!(f, "no catalog entries for edges [{}]", edges.join(", "))
            }
            DeadEnd::NoRecords => write!(f, "no records returned"),
            DeadEnd::NoRecordsAfterFiltering { received } => {
                write!(f, "all {received} records were filtered out")
            }
            DeadEnd::NeighborPruned { neighbor } => {
                write!(f, "neighbor edge {neighbor} lost all of its records")
            }
            DeadEnd::NoIdentifiersPropagated { node } => {
                write!(f, "no record matched the categories of node {node}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum QueryStatus {
    Completed,
    DryRun,
    Terminated { edge_id: String, reason: DeadEnd },
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub status: QueryStatus,
    pub results: Vec<QueryResult>,
    /// Records referenced by `results`; empty unless the query completed.
    pub knowledge_graph: KnowledgeGraph,
    pub logs: Vec<LogEntry>,
    pub plan: SupportReport,
    pub query_graph: QueryGraph,
}

#[derive(Debug, Default)]
struct ExecutionStats {
    queries: usize,
    hits: usize,
    apis: BTreeSet<String>,
}

pub struct QueryHandler {
    ontology: Arc<Ontology>,
    resolver: Arc<dyn IdResolver>,
    catalog: Arc<dyn CapabilityCatalog>,
    executor: Arc<dyn BatchExecutor>,
    options: QueryOptions,
}

impl QueryHandler {
    pub fn new(
        ontology: Arc<Ontology>,
        resolver: Arc<dyn IdResolver>,
        catalog: Arc<dyn CapabilityCatalog>,
        executor: Arc<dyn BatchExecutor>,
    ) -> Self {
        Self {
            ontology,
            resolver,
            catalog,
            executor,
            options: QueryOptions::default(),
        }
    }

    pub fn with_options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &QueryOptions {
        &self.options
    }

    /// Compile, plan, execute edge by edge, then consolidate.
    ///
    /// Dead ends come back as `Ok` with [`QueryStatus::Terminated`] and no
    /// results; `Err` is reserved for invalid graphs, resolver outages,
    /// executor failures and a stalled scheduler, and carries the logs
    /// gathered before the failure.
    pub async fn query(&self, spec: &QueryGraphSpec) -> Result<QueryResponse, QueryFailure> {
        let mut logs = Diagnostics::new();
        match self.run(spec, &mut logs).await {
            Ok(response) => Ok(response),
            Err(error) => {
                logs.push(
                    LogEntry::new(LogLevel::Error, format!("Query failed: {error}"))
                        .with_code("QueryFailed"),
                );
                Err(QueryFailure {
                    error,
                    logs: logs.into_entries(),
                })
            }
        }
    }

    async fn run(
        &self,
        spec: &QueryGraphSpec,
        logs: &mut Diagnostics,
    ) -> Result<QueryResponse, QueryError> {
        logs.info(format!(
            "Received query graph with {} nodes and {} edges",
            spec.nodes.len(),
            spec.edges.len()
        ));

        let mut compiler = QueryGraphCompiler::new(
            Arc::clone(&self.ontology),
            Arc::clone(&self.resolver),
        )
        .resolve_categories(self.options.resolve_categories)
        .expand_ids(self.options.expand_ids);
        let compiled = compiler.compile(spec).await;
        logs.append(&mut compiler.take_logs());
        let graph = compiled?;

        let mut scheduler = EdgeScheduler::new(
            graph,
            Arc::clone(&self.ontology),
            self.options.scheduler.clone(),
        );
        let plan = scheduler.check_support(self.catalog.as_ref());
        for planned in &plan.planned {
            let level = if self.options.dryrun {
                LogLevel::Info
            } else {
                LogLevel::Debug
            };
            logs.push(
                LogEntry::new(
                    level,
                    format!(
                        "Planned edge {} ({} -> {}): {} catalog entries, ~{} inputs, ~{} outputs",
                        planned.edge_id,
                        planned.input_node,
                        planned.output_node,
                        planned.entries.len(),
                        planned.estimated_inputs,
                        planned.estimated_outputs
                    ),
                )
                .with_data(json!({
                    "apis": planned.entries.iter().map(|e| e.api_name.as_str()).collect::<Vec<_>>()
                })),
            );
        }

        if let Some(first) = plan.unsupported.first() {
            let reason = DeadEnd::NoCatalogMatches {
                edges: plan.unsupported.clone(),
            };
            let edge_id = first.clone();
            return Ok(Self::terminate(logs, scheduler, plan, edge_id, reason));
        }

        if self.options.dryrun {
            logs.info(format!(
                "Dry run: {} edges planned, nothing executed",
                plan.planned.len()
            ));
            return Ok(Self::respond(
                logs,
                scheduler,
                plan,
                QueryStatus::DryRun,
                Vec::new(),
                KnowledgeGraph::new(),
            ));
        }

        let mut stats = ExecutionStats::default();
        let dead_end = self.execute_edges(&mut scheduler, logs, &mut stats).await;
        logs.append(&mut scheduler.take_logs());
        if let Some((edge_id, reason)) = dead_end? {
            return Ok(Self::terminate(logs, scheduler, plan, edge_id, reason));
        }

        let results = ResultAssembler::new(scheduler.graph()).results();
        let mut knowledge_graph = KnowledgeGraph::from_query_graph(scheduler.graph(), &self.ontology);
        knowledge_graph.prune(&results);
        logs.info(format!("Query completed with {} results", results.len()));
        Self::summarize(logs, &stats, &knowledge_graph, results.len());
        Ok(Self::respond(
            logs,
            scheduler,
            plan,
            QueryStatus::Completed,
            results,
            knowledge_graph,
        ))
    }

    /// Run every edge in scheduling order. Stops at the first dead end.
    async fn execute_edges(
        &self,
        scheduler: &mut EdgeScheduler,
        logs: &mut Diagnostics,
        stats: &mut ExecutionStats,
    ) -> Result<Option<(String, DeadEnd)>, QueryError> {
        while scheduler.has_pending() {
            let Some(edge_id) = scheduler.next() else {
                let pending = scheduler.pending_count();
                logs.error(format!("Scheduler stalled with {pending} pending edges"));
                return Err(QueryError::SchedulerStalled { pending });
            };
            logs.append(&mut scheduler.take_logs());

            let query = scheduler.edge_query(&edge_id)?;
            let entries = self.catalog.lookup(&query);
            if entries.is_empty() {
                let reason = DeadEnd::NoCatalogMatches {
                    edges: vec![edge_id.clone()],
                };
                return Ok(Some((edge_id, reason)));
            }

            logs.info(format!(
                "Executing edge {edge_id} ({} -> {}) against {} catalog entries",
                query.input_node,
                query.output_node,
                entries.len()
            ));
            stats.queries += 1;
            let records = match self.executor.execute(&query, &entries).await {
                Ok(records) => records,
                Err(source) => {
                    tracing::error!(edge_id = %edge_id, error = %source, "executor failed");
                    return Err(QueryError::Executor { edge_id, source });
                }
            };
            if records.is_empty() {
                return Ok(Some((edge_id, DeadEnd::NoRecords)));
            }
            stats.hits += 1;
            stats.apis.extend(
                records
                    .iter()
                    .filter(|r| !r.api_name.is_empty())
                    .map(|r| r.api_name.clone()),
            );
            logs.push(
                LogEntry::new(
                    LogLevel::Info,
                    format!("Edge {edge_id} returned {} records", records.len()),
                )
                .with_data(json!({ "edge_id": edge_id, "hits": records.len() })),
            );

            let outcome = scheduler.store_records(&edge_id, records)?;
            logs.append(&mut scheduler.take_logs());
            if outcome.kept == 0 {
                let reason = DeadEnd::NoRecordsAfterFiltering {
                    received: outcome.received,
                };
                return Ok(Some((edge_id, reason)));
            }
            if let Some(pruned) = outcome.neighbors.iter().find(|p| p.after == 0) {
                let reason = DeadEnd::NeighborPruned {
                    neighbor: pruned.edge_id.clone(),
                };
                return Ok(Some((edge_id, reason)));
            }
            if let Some(node) = outcome.unbound.first() {
                let reason = DeadEnd::NoIdentifiersPropagated { node: node.clone() };
                return Ok(Some((edge_id, reason)));
            }
            scheduler.mark_executed(&edge_id);
            logs.info(format!(
                "Edge {edge_id} kept {} of {} records",
                outcome.kept, outcome.received
            ));
        }
        Ok(None)
    }

    fn summarize(
        logs: &mut Diagnostics,
        stats: &ExecutionStats,
        knowledge_graph: &KnowledgeGraph,
        results: usize,
    ) {
        let apis: Vec<&str> = stats.apis.iter().map(String::as_str).collect();
        logs.push(
            LogEntry::new(
                LogLevel::Info,
                format!(
                    "Execution Summary: ({}) nodes / ({}) edges / ({}) results; ({}/{}) queries returned results from ({}) unique APIs",
                    knowledge_graph.node_count(),
                    knowledge_graph.edge_count(),
                    results,
                    stats.hits,
                    stats.queries,
                    apis.len()
                ),
            )
            .with_code("ExecutionSummary")
            .with_data(json!({
                "nodes": knowledge_graph.node_count(),
                "edges": knowledge_graph.edge_count(),
                "results": results,
                "queries": stats.queries,
                "hits": stats.hits,
                "apis": apis,
            })),
        );
        logs.info(format!("APIs: {}", apis.join(", ")));
    }

    fn terminate(
        logs: &mut Diagnostics,
        mut scheduler: EdgeScheduler,
        plan: SupportReport,
        edge_id: String,
        reason: DeadEnd,
    ) -> QueryResponse {
        scheduler.mark_dead(&edge_id);
        let surviving = scheduler
            .graph()
            .edge(&edge_id)
            .map_or(0, |e| e.records.len());
        logs.push(
            LogEntry::new(
                LogLevel::Warning,
                format!("Edge {edge_id} is a dead end: {reason}; query terminated with no results"),
            )
            .with_code("QueryTerminated")
            .with_data(json!({
                "edge_id": edge_id,
                "reason": reason,
                "records": surviving,
            })),
        );
        let status = QueryStatus::Terminated { edge_id, reason };
        Self::respond(logs, scheduler, plan, status, Vec::new(), KnowledgeGraph::new())
    }

    fn respond(
        logs: &mut Diagnostics,
        mut scheduler: EdgeScheduler,
        plan: SupportReport,
        status: QueryStatus,
        results: Vec<QueryResult>,
        knowledge_graph: KnowledgeGraph,
    ) -> QueryResponse {
        logs.append(&mut scheduler.take_logs());
        QueryResponse {
            status,
            results,
            knowledge_graph,
            logs: std::mem::take(logs).into_entries(),
            plan,
            query_graph: scheduler.into_graph(),
        }
    }
}
