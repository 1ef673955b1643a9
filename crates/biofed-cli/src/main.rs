//! Biofed CLI
//!
//! Runs query graphs against fixture-backed collaborators:
//! - `check`: validate and compile a query graph
//! - `plan`: dry run, report which catalog entries would serve each edge
//! - `run`: execute the full pipeline and print the response as JSON

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use biofed_ontology::Ontology;
use biofed_query::{
    compiler::validate_structure, DirectionTieBreak, LogLevel, QueryGraphCompiler,
    QueryGraphSpec, QueryHandler, QueryOptions, QueryResponse, QueryStatus, RecordedExecutor,
    StaticCatalog, StaticResolver,
};

const BUILTIN_ONTOLOGY: &str = include_str!("../../biofed-ontology/data/biolink-mini.json");

#[derive(Parser)]
#[command(name = "biofed")]
#[command(author, version, about = "Biofed: federated biomedical query graphs")]
struct Cli {
    /// Log scheduling decisions (overridden by BIOFED_LOG / RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate and compile a query graph
    Check {
        /// Query graph JSON
        graph: PathBuf,
        #[command(flatten)]
        common: CommonArgs,
    },

    /// Dry run: compile and plan every edge without executing
    Plan {
        /// Query graph JSON
        graph: PathBuf,
        /// Capability catalog JSON (list of entries)
        #[arg(long)]
        catalog: PathBuf,
        #[command(flatten)]
        common: CommonArgs,
    },

    /// Execute a query graph against recorded association rows
    Run {
        /// Query graph JSON
        graph: PathBuf,
        /// Capability catalog JSON (list of entries)
        #[arg(long)]
        catalog: PathBuf,
        /// Recorded executor JSON (`records` keyed by edge id)
        #[arg(long)]
        records: PathBuf,
        /// Write the response here instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
        #[command(flatten)]
        common: CommonArgs,
    },
}

#[derive(Args)]
struct CommonArgs {
    /// Identifier resolver table JSON
    #[arg(long)]
    resolver: Option<PathBuf>,
    /// Ontology (.json or .nt); defaults to the built-in Biolink subset
    #[arg(long)]
    ontology: Option<PathBuf>,
    /// Query options JSON
    #[arg(long)]
    options: Option<PathBuf>,
    /// Direction tie-break when both ends are equally bound
    #[arg(long, value_enum)]
    tie_break: Option<TieBreakArg>,
    /// Keep declared categories as given (skip resolver inference)
    #[arg(long)]
    no_resolve_categories: bool,
    /// Query seeded identifiers only, without their descendants
    #[arg(long)]
    no_expand_ids: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum TieBreakArg {
    Subject,
    Object,
}

impl From<TieBreakArg> for DirectionTieBreak {
    fn from(arg: TieBreakArg) -> Self {
        match arg {
            TieBreakArg::Subject => DirectionTieBreak::Subject,
            TieBreakArg::Object => DirectionTieBreak::Object,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    match cli.command {
        Commands::Check { graph, common } => rt.block_on(cmd_check(&graph, &common)),
        Commands::Plan {
            graph,
            catalog,
            common,
        } => rt.block_on(cmd_plan(&graph, &catalog, &common)),
        Commands::Run {
            graph,
            catalog,
            records,
            out,
            common,
        } => rt.block_on(cmd_run(&graph, &catalog, &records, out.as_deref(), &common)),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "biofed_query=debug,info" } else { "warn" };
    let filter = EnvFilter::try_from_env("BIOFED_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

// ============================================================================
// Loading
// ============================================================================

fn load_graph(path: &Path) -> Result<QueryGraphSpec> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read query graph {}", path.display()))?;
    QueryGraphSpec::from_json_str(&text)
        .with_context(|| format!("failed to parse query graph {}", path.display()))
}

fn load_ontology(path: Option<&Path>) -> Result<Arc<Ontology>> {
    let ontology = match path {
        Some(path) => Ontology::from_path(path)
            .with_context(|| format!("failed to load ontology {}", path.display()))?,
        None => Ontology::from_json_str(BUILTIN_ONTOLOGY)
            .context("built-in ontology is malformed")?,
    };
    Ok(Arc::new(ontology))
}

fn load_resolver(path: Option<&Path>) -> Result<Arc<StaticResolver>> {
    let resolver = match path {
        Some(path) => StaticResolver::from_path(path)
            .with_context(|| format!("failed to load resolver table {}", path.display()))?,
        None => StaticResolver::new(),
    };
    Ok(Arc::new(resolver))
}

fn load_catalog(path: &Path) -> Result<Arc<StaticCatalog>> {
    let catalog = StaticCatalog::from_path(path)
        .with_context(|| format!("failed to load catalog {}", path.display()))?;
    Ok(Arc::new(catalog))
}

/// File options first, then flags on top.
fn load_options(common: &CommonArgs) -> Result<QueryOptions> {
    let mut options = match &common.options {
        Some(path) => QueryOptions::from_path(path)
            .with_context(|| format!("failed to load options {}", path.display()))?,
        None => QueryOptions::default(),
    };
    if let Some(tie_break) = common.tie_break {
        options.scheduler.tie_break = tie_break.into();
    }
    if common.no_resolve_categories {
        options.resolve_categories = false;
    }
    if common.no_expand_ids {
        options.expand_ids = false;
    }
    Ok(options)
}

// ============================================================================
// Commands
// ============================================================================

async fn cmd_check(graph: &Path, common: &CommonArgs) -> Result<()> {
    println!("{} {}", "Checking".green().bold(), graph.display());
    let spec = load_graph(graph)?;
    validate_structure(&spec).map_err(|e| anyhow!("invalid query graph: {e}"))?;

    let options = load_options(common)?;
    let mut compiler = QueryGraphCompiler::new(
        load_ontology(common.ontology.as_deref())?,
        load_resolver(common.resolver.as_deref())?,
    )
    .resolve_categories(options.resolve_categories)
    .expand_ids(options.expand_ids);
    let compiled = compiler
        .compile(&spec)
        .await
        .with_context(|| format!("failed to compile {}", graph.display()))?;

    println!("  Nodes: {}", compiled.node_count());
    for node in compiled.nodes() {
        let ids: Vec<&str> = node.ids().collect();
        println!(
            "    {} [{}]{}{}",
            node.id.yellow(),
            node.categories.join(", ").cyan(),
            if ids.is_empty() {
                String::new()
            } else {
                format!(" ids: {}", ids.join(", "))
            },
            if node.is_set { " (set)" } else { "" }
        );
    }
    println!("  Edges: {}", compiled.edge_count());
    for edge in compiled.edges() {
        println!(
            "    {} {} -> {}{}: {}",
            edge.id.yellow(),
            edge.subject,
            edge.object,
            if edge.reverse { " (reverse)" } else { "" },
            edge.expanded_predicates.join(", ").cyan()
        );
    }
    for entry in compiler.logs().entries() {
        if entry.level == LogLevel::Info {
            println!("  {} {}", "note:".cyan().bold(), entry.message);
        } else {
            println!("  {} {}", "warning:".yellow().bold(), entry.message);
        }
    }
    println!("{}", "Valid.".green());
    Ok(())
}

async fn cmd_plan(graph: &Path, catalog: &Path, common: &CommonArgs) -> Result<()> {
    println!("{} {}", "Planning".green().bold(), graph.display());
    let spec = load_graph(graph)?;
    let mut options = load_options(common)?;
    options.dryrun = true;

    let handler = QueryHandler::new(
        load_ontology(common.ontology.as_deref())?,
        load_resolver(common.resolver.as_deref())?,
        load_catalog(catalog)?,
        Arc::new(RecordedExecutor::new()),
    )
    .with_options(options);
    let response = execute(&handler, &spec).await?;

    for planned in &response.plan.planned {
        println!(
            "  {} {} -> {}: {} entries (~{} in, ~{} out)",
            planned.edge_id.yellow(),
            planned.input_node,
            planned.output_node,
            planned.entries.len(),
            planned.estimated_inputs,
            planned.estimated_outputs
        );
        for entry in &planned.entries {
            println!(
                "      {} {} -{}-> {}",
                entry.api_name.cyan(),
                entry.input_type,
                entry.predicate,
                entry.output_type
            );
        }
    }
    report_status(&response);
    Ok(())
}

async fn cmd_run(
    graph: &Path,
    catalog: &Path,
    records: &Path,
    out: Option<&Path>,
    common: &CommonArgs,
) -> Result<()> {
    eprintln!("{} {}", "Running".green().bold(), graph.display());
    let spec = load_graph(graph)?;
    let executor = RecordedExecutor::from_path(records)
        .with_context(|| format!("failed to load records {}", records.display()))?;

    let handler = QueryHandler::new(
        load_ontology(common.ontology.as_deref())?,
        load_resolver(common.resolver.as_deref())?,
        load_catalog(catalog)?,
        Arc::new(executor),
    )
    .with_options(load_options(common)?);
    let response = execute(&handler, &spec).await?;

    let json = serde_json::to_string_pretty(&response).context("failed to encode response")?;
    match out {
        Some(path) => {
            fs::write(path, json)
                .with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!("{} {}", "wrote".green().bold(), path.display().to_string().bold());
        }
        None => println!("{json}"),
    }
    report_status(&response);
    Ok(())
}

/// Run the query; on failure, replay its diagnostics before the error.
async fn execute(handler: &QueryHandler, spec: &QueryGraphSpec) -> Result<QueryResponse> {
    handler.query(spec).await.map_err(|failure| {
        for entry in &failure.logs {
            let tag = match entry.level {
                LogLevel::Error => "error:".red().bold(),
                LogLevel::Warning => "warning:".yellow().bold(),
                LogLevel::Info | LogLevel::Debug => "log:".dimmed(),
            };
            eprintln!("  {tag} {}", entry.message);
        }
        anyhow::Error::new(failure.error)
    })
}

fn report_status(response: &QueryResponse) {
    match &response.status {
        QueryStatus::Completed => eprintln!(
            "{} {} results ({} nodes, {} edges in the knowledge graph)",
            "ok".green().bold(),
            response.results.len(),
            response.knowledge_graph.node_count(),
            response.knowledge_graph.edge_count()
        ),
        QueryStatus::DryRun => eprintln!(
            "{} {} edges planned",
            "ok".green().bold(),
            response.plan.planned.len()
        ),
        QueryStatus::Terminated { edge_id, reason } => eprintln!(
            "{} edge {} is a dead end: {}",
            "terminated:".yellow().bold(),
            edge_id,
            reason
        ),
    }
}
