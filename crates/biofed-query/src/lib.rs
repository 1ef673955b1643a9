//! Biofed query engine.
//!
//! Answers a small graph-shaped question ("which chemicals treat a disease
//! associated with gene X?") by breaking it into single-hop edge queries,
//! running them against external sources one at a time, and stitching the
//! returned records back into answers.
//!
//! Pipeline:
//!
//! 1. [`compiler`]: validate a [`QueryGraphSpec`] and build a [`QueryGraph`]
//!    (category inference through an [`IdResolver`]).
//! 2. [`scheduler`]: pick the next edge, orient it toward the bound side,
//!    filter and store its records, propagate identifiers.
//! 3. [`results`]: enumerate record combinations over the tree and merge them
//!    into [`QueryResult`]s, then keep the [`KnowledgeGraph`] slice they bind.
//!
//! [`QueryHandler`] drives all three. External services stay behind the
//! traits in [`collaborators`].

pub mod collaborators;
pub mod compiler;
pub mod constraints;
pub mod error;
pub mod graph;
pub mod handler;
pub mod knowledge_graph;
pub mod log;
pub mod options;
pub mod qualifiers;
pub mod record;
pub mod results;
pub mod scheduler;
pub mod spec;

pub use collaborators::{
    BatchExecutor, CapabilityCatalog, CatalogEntry, EdgeQuery, IdResolver, RecordedExecutor,
    ResolvedEntity, StaticCatalog, StaticResolver,
};
pub use compiler::QueryGraphCompiler;
pub use error::{
    ExecutorError, InvalidQueryGraph, OptionsError, QueryError, QueryFailure, ResolverError,
};
pub use graph::{GraphSnapshotV1, QueryEdge, QueryGraph, QueryNode, GRAPH_SNAPSHOT_V1_VERSION};
pub use handler::{DeadEnd, QueryHandler, QueryResponse, QueryStatus};
pub use knowledge_graph::{KgEdge, KgNode, KnowledgeGraph};
pub use log::{LogEntry, LogLevel};
pub use options::{DirectionTieBreak, QueryOptions, SchedulerConfig};
pub use record::{Record, RecordNode, Side};
pub use results::{EdgeBinding, NodeBinding, QueryResult, ResultAssembler};
pub use scheduler::{EdgeScheduler, EdgeState, StoreOutcome, SupportReport};
pub use spec::{
    AttributeConstraint, ConstraintOperator, QEdgeSpec, QNodeSpec, Qualifier,
    QualifierConstraint, QueryGraphSpec,
};
