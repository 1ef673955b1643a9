//! Error taxonomy.
//!
//! Dead ends (an edge with no catalog entries or no surviving records) are
//! *not* errors; they are reported through
//! [`QueryStatus::Terminated`](crate::handler::QueryStatus).

use thiserror::Error;

use crate::log::LogEntry;

/// Structural or semantic problems with a submitted query graph.
///
/// These are reported before anything executes, so callers can fix the graph
/// and resubmit rather than retry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvalidQueryGraph {
    #[error("query graph has no nodes defined")]
    NoNodes,
    #[error("query graph has no edges defined")]
    NoEdges,
    #[error("the {role} of edge `{edge_id}` (`{node_id}`) is not defined in the query graph")]
    UndeclaredNode {
        edge_id: String,
        role: &'static str,
        node_id: String,
    },
    #[error("edges `{first}` and `{second}` both connect `{a}` and `{b}`")]
    DuplicateEdge {
        first: String,
        second: String,
        a: String,
        b: String,
    },
    #[error("query graph contains a cycle through node `{node_id}`")]
    Cycle { node_id: String },
    #[error("node `{node_id}` is not connected to the rest of the query graph")]
    Disconnected { node_id: String },
    #[error("no node in the query graph has identifiers")]
    NoIdentifiers,
    #[error("edge `{edge_id}` repeats qualifier type `{qualifier_type}` within one qualifier set")]
    DuplicateQualifierType {
        edge_id: String,
        qualifier_type: String,
    },
    #[error("invalid graph snapshot: {0}")]
    Snapshot(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolverError {
    /// Hard outage; fatal wherever it happens.
    #[error("identifier resolver unavailable: {0}")]
    Unavailable(String),
    /// Unusable answer; callers that can degrade do so.
    #[error("identifier resolver returned malformed data: {0}")]
    Malformed(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ExecutorError {
    pub message: String,
}

impl ExecutorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid query graph: {0}")]
    InvalidQueryGraph(#[from] InvalidQueryGraph),
    #[error(transparent)]
    Resolver(#[from] ResolverError),
    #[error("executor failed on edge `{edge_id}`: {source}")]
    Executor {
        edge_id: String,
        source: ExecutorError,
    },
    #[error("no executable edge among {pending} pending edges")]
    SchedulerStalled { pending: usize },
    #[error("unknown edge `{0}`")]
    UnknownEdge(String),
}

impl QueryError {
    pub fn is_invalid_query_graph(&self) -> bool {
        matches!(self, QueryError::InvalidQueryGraph(_))
    }
}

/// A failed query with the diagnostics gathered up to the failure.
#[derive(Debug, Error)]
#[error("query failed after {} log entries", logs.len())]
pub struct QueryFailure {
    #[source]
    pub error: QueryError,
    pub logs: Vec<LogEntry>,
}

impl QueryFailure {
    pub fn is_invalid_query_graph(&self) -> bool {
        self.error.is_invalid_query_graph()
    }
}

/// Failure to load [`QueryOptions`](crate::options::QueryOptions).
#[derive(Debug, Error)]
pub enum OptionsError {
    #[error("IO error reading options: {0}")]
    Io(#[from] std::io::Error),
    #[error("options parse error: {0}")]
    Parse(#[from] serde_json::Error),
}
