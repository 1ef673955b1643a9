//! Integration tests for the complete Biofed pipeline
//!
//! These tests drive `QueryHandler` end to end across crates:
//! - ontology fixture → compiler (category inference through a resolver)
//! - scheduler → catalog → recorded executor
//! - consolidation → response (results plus the knowledge graph they bind)
//!
//! Run with: cargo test --test integration_tests

use std::sync::Arc;

use biofed_ontology::Ontology;
use biofed_query::{
    CatalogEntry, DeadEnd, GraphSnapshotV1, InvalidQueryGraph, LogLevel, QueryError, QueryGraph,
    QueryGraphSpec, QueryHandler, QueryOptions, QueryResponse, QueryStatus, Record, RecordNode,
    RecordedExecutor, ResolvedEntity, SchedulerConfig, StaticCatalog, StaticResolver,
};
use serde_json::json;

const ONTOLOGY: &str = include_str!("../crates/biofed-ontology/data/biolink-mini.json");

fn ontology() -> Arc<Ontology> {
    Arc::new(Ontology::from_json_str(ONTOLOGY).expect("fixture ontology loads"))
}

fn resolver() -> Arc<StaticResolver> {
    Arc::new(StaticResolver::new().with_entity(
        "NCBIGene:3630",
        ResolvedEntity {
            primary_id: "NCBIGene:3630".into(),
            primary_type: Some("biolink:Gene".into()),
            semantic_types: vec!["biolink:Gene".into(), "biolink:NamedThing".into()],
            equivalent_ids: vec!["NCBIGene:3630".into(), "HGNC:6081".into()],
        },
    ))
}

fn entry(api: &str, input: &str, predicate: &str, output: &str) -> CatalogEntry {
    CatalogEntry {
        api_name: api.into(),
        input_type: input.into(),
        output_type: output.into(),
        predicate: predicate.into(),
    }
}

fn catalog() -> Arc<StaticCatalog> {
    Arc::new(StaticCatalog::new(vec![
        entry("mychem", "Gene", "treats", "SmallMolecule"),
        entry("semmed", "Gene", "gene_associated_with_condition", "Disease"),
        entry("mychem", "Disease", "treated_by", "SmallMolecule"),
    ]))
}

fn gene() -> RecordNode {
    RecordNode::new("NCBIGene:3630")
        .curie("NCBIGene:3630")
        .semantic_type("biolink:Gene")
        .equivalent("HGNC:6081")
}

fn typed(id: &str, ty: &str) -> RecordNode {
    RecordNode::new(id).curie(id).semantic_type(ty)
}

fn spec(value: serde_json::Value) -> QueryGraphSpec {
    serde_json::from_value(value).expect("query graph deserializes")
}

fn handler(executor: Arc<RecordedExecutor>) -> QueryHandler {
    QueryHandler::new(ontology(), resolver(), catalog(), executor)
}

fn single_edge() -> QueryGraphSpec {
    spec(json!({
        "nodes": {
            "n0": {"ids": ["NCBIGene:3630"]},
            "n1": {"categories": ["biolink:ChemicalEntity"]}
        },
        "edges": {
            "e01": {"subject": "n0", "object": "n1", "predicates": ["biolink:treats"]}
        }
    }))
}

fn chain(is_set: bool) -> QueryGraphSpec {
    spec(json!({
        "nodes": {
            "n0": {"ids": ["NCBIGene:3630"]},
            "n1": {"categories": ["biolink:Disease"], "is_set": is_set},
            "n2": {"categories": ["biolink:ChemicalEntity"]}
        },
        "edges": {
            "e0": {"subject": "n0", "object": "n1", "predicates": ["biolink:gene_associated_with_condition"]},
            "e1": {"subject": "n1", "object": "n2", "predicates": ["biolink:treated_by"]}
        }
    }))
}

fn chain_executor() -> Arc<RecordedExecutor> {
    Arc::new(
        RecordedExecutor::new()
            .with_records(
                "e0",
                vec![
                    Record::new("r1", gene(), typed("MONDO:1", "biolink:Disease")),
                    Record::new("r2", gene(), typed("MONDO:2", "biolink:Disease")),
                ],
            )
            .with_records(
                "e1",
                vec![
                    Record::new("r3", typed("MONDO:1", "biolink:Disease"), typed("CHEBI:1", "biolink:SmallMolecule")),
                    Record::new("r4", typed("MONDO:2", "biolink:Disease"), typed("CHEBI:1", "biolink:SmallMolecule")),
                ],
            ),
    )
}

fn ids(result: &biofed_query::QueryResult, node: &str) -> Vec<String> {
    result.node_bindings[node].iter().map(|b| b.id.clone()).collect()
}

fn has_log(response: &QueryResponse, code: &str) -> bool {
    response.logs.iter().any(|l| l.code.as_deref() == Some(code))
}

// ============================================================================
// End-to-end answers
// ============================================================================

#[tokio::test]
async fn test_single_edge_gene_treats_chemical() {
    let executor = Arc::new(RecordedExecutor::new().with_records(
        "e01",
        vec![Record::new("rec-1", gene(), typed("CHEBI:45783", "biolink:SmallMolecule"))
            .predicate("biolink:treats")],
    ));
    let response = handler(executor.clone())
        .query(&single_edge())
        .await
        .expect("query succeeds");

    assert_eq!(response.status, QueryStatus::Completed);
    assert_eq!(response.results.len(), 1);
    let result = &response.results[0];
    assert_eq!(
        serde_json::to_value(&result.node_bindings["n0"]).unwrap(),
        json!([{"id": "NCBIGene:3630"}])
    );
    assert_eq!(ids(result, "n1"), vec!["CHEBI:45783"]);
    assert_eq!(result.edge_bindings["e01"][0].id, "rec-1");
    assert_eq!(executor.call_count(), 1);

    // Category inference picked the primary type for the seeded node.
    assert_eq!(
        response.query_graph.node("n0").unwrap().categories,
        vec!["Gene"]
    );
}

#[tokio::test]
async fn test_is_set_node_collapses_results() {
    let response = handler(chain_executor())
        .query(&chain(true))
        .await
        .expect("query succeeds");
    assert_eq!(response.status, QueryStatus::Completed);
    assert_eq!(response.results.len(), 1);
    let result = &response.results[0];
    assert_eq!(ids(result, "n0"), vec!["NCBIGene:3630"]);
    assert_eq!(ids(result, "n1"), vec!["MONDO:1", "MONDO:2"]);
    assert_eq!(ids(result, "n2"), vec!["CHEBI:1"]);
    assert_eq!(result.edge_bindings["e1"].len(), 2);
}

#[tokio::test]
async fn test_without_is_set_one_result_per_identifier() {
    let response = handler(chain_executor())
        .query(&chain(false))
        .await
        .expect("query succeeds");
    assert_eq!(response.results.len(), 2);
    let middles: Vec<Vec<String>> = response.results.iter().map(|r| ids(r, "n1")).collect();
    assert!(middles.contains(&vec!["MONDO:1".to_string()]));
    assert!(middles.contains(&vec!["MONDO:2".to_string()]));
}

#[tokio::test]
async fn test_backwards_edge_uses_inverse_predicate() {
    // Seeded on the object side; the edge runs n1 -> n0 as `treated_by`.
    let graph = spec(json!({
        "nodes": {
            "n0": {"categories": ["biolink:SmallMolecule"]},
            "n1": {"ids": ["MONDO:1"], "categories": ["biolink:Disease"]}
        },
        "edges": {
            "e0": {"subject": "n0", "object": "n1", "predicates": ["biolink:treats"]}
        }
    }));
    let executor = Arc::new(
        RecordedExecutor::new()
            .declared_direction(true)
            .with_records(
                "e0",
                vec![Record::new("r1", typed("CHEBI:1", "biolink:SmallMolecule"), typed("MONDO:1", "biolink:Disease"))],
            ),
    );
    let response = handler(executor).query(&graph).await.expect("query succeeds");

    assert_eq!(response.status, QueryStatus::Completed);
    let edge = response.query_graph.edge("e0").unwrap();
    assert!(edge.reverse);
    assert!(edge.expanded_predicates.contains(&"treated_by".to_string()));
    assert_eq!(response.results.len(), 1);
    assert_eq!(ids(&response.results[0], "n0"), vec!["CHEBI:1"]);
    assert_eq!(ids(&response.results[0], "n1"), vec!["MONDO:1"]);
}

// ============================================================================
// Rejections and dead ends
// ============================================================================

#[tokio::test]
async fn test_invalid_graphs_are_rejected() {
    let h = handler(Arc::new(RecordedExecutor::new()));

    let no_ids = spec(json!({
        "nodes": {"n0": {"categories": ["Gene"]}, "n1": {}},
        "edges": {"e0": {"subject": "n0", "object": "n1"}}
    }));
    let err = h.query(&no_ids).await.unwrap_err().error;
    assert!(matches!(
        err,
        QueryError::InvalidQueryGraph(InvalidQueryGraph::NoIdentifiers)
    ));

    let duplicate = spec(json!({
        "nodes": {"n0": {"ids": ["NCBIGene:3630"]}, "n1": {}},
        "edges": {
            "e0": {"subject": "n0", "object": "n1"},
            "e1": {"subject": "n1", "object": "n0"}
        }
    }));
    let err = h.query(&duplicate).await.unwrap_err().error;
    assert!(matches!(
        err,
        QueryError::InvalidQueryGraph(InvalidQueryGraph::DuplicateEdge { .. })
    ));

    let triangle = spec(json!({
        "nodes": {"n0": {"ids": ["NCBIGene:3630"]}, "n1": {}, "n2": {}},
        "edges": {
            "e0": {"subject": "n0", "object": "n1"},
            "e1": {"subject": "n1", "object": "n2"},
            "e2": {"subject": "n2", "object": "n0"}
        }
    }));
    let failure = h.query(&triangle).await.unwrap_err();
    assert!(failure.is_invalid_query_graph());
    assert!(matches!(
        failure.error,
        QueryError::InvalidQueryGraph(InvalidQueryGraph::Cycle { .. })
    ));
    assert!(failure
        .logs
        .iter()
        .any(|l| l.message.starts_with("Received query graph")));
}

#[tokio::test]
async fn test_dryrun_plans_without_executing() {
    let executor = chain_executor();
    let options = QueryOptions {
        dryrun: true,
        ..QueryOptions::default()
    };
    let response = handler(executor.clone())
        .with_options(options)
        .query(&chain(false))
        .await
        .expect("dry run succeeds");

    assert_eq!(response.status, QueryStatus::DryRun);
    assert!(response.results.is_empty());
    assert_eq!(response.plan.planned.len(), 2);
    assert_eq!(executor.call_count(), 0);
}

#[tokio::test]
async fn test_unsupported_edges_terminate_before_execution() {
    let graph = spec(json!({
        "nodes": {
            "n0": {"ids": ["NCBIGene:3630"]},
            "n1": {"categories": ["biolink:Cell"]}
        },
        "edges": {
            "e0": {"subject": "n0", "object": "n1", "predicates": ["biolink:participates_in"]}
        }
    }));
    let executor = Arc::new(RecordedExecutor::new());
    let response = handler(executor.clone()).query(&graph).await.unwrap();

    assert_eq!(
        response.status,
        QueryStatus::Terminated {
            edge_id: "e0".into(),
            reason: DeadEnd::NoCatalogMatches {
                edges: vec!["e0".into()]
            },
        }
    );
    assert!(response.results.is_empty());
    assert_eq!(executor.call_count(), 0);
    assert!(response
        .logs
        .iter()
        .any(|l| l.code.as_deref() == Some("QueryTerminated")));
}

#[tokio::test]
async fn test_empty_records_terminate() {
    let response = handler(Arc::new(RecordedExecutor::new()))
        .query(&single_edge())
        .await
        .unwrap();
    assert!(matches!(
        response.status,
        QueryStatus::Terminated {
            reason: DeadEnd::NoRecords,
            ..
        }
    ));
    assert!(response.results.is_empty());
}

#[tokio::test]
async fn test_constraints_can_empty_an_edge() {
    let graph = spec(json!({
        "nodes": {
            "n0": {"ids": ["NCBIGene:3630"]},
            "n1": {
                "categories": ["biolink:ChemicalEntity"],
                "constraints": [{"id": "max_research_phase", "name": "phase", "operator": ">=", "value": 4}]
            }
        },
        "edges": {
            "e01": {"subject": "n0", "object": "n1", "predicates": ["biolink:treats"]}
        }
    }));
    let executor = Arc::new(RecordedExecutor::new().with_records(
        "e01",
        vec![Record::new(
            "r1",
            gene(),
            typed("CHEBI:1", "biolink:SmallMolecule").attribute("max_research_phase", json!(2)),
        )],
    ));
    let response = handler(executor).query(&graph).await.unwrap();
    assert_eq!(
        response.status,
        QueryStatus::Terminated {
            edge_id: "e01".into(),
            reason: DeadEnd::NoRecordsAfterFiltering { received: 1 },
        }
    );
}

#[tokio::test]
async fn test_executor_failure_is_an_error() {
    let executor = Arc::new(RecordedExecutor::new().failing_on("e01"));
    let failure = handler(executor).query(&single_edge()).await.unwrap_err();
    assert!(matches!(failure.error, QueryError::Executor { ref edge_id, .. } if edge_id == "e01"));

    // Diagnostics gathered before the failure travel with the error.
    assert!(failure
        .logs
        .iter()
        .any(|l| l.message.starts_with("Executing edge e01")));
    let last = failure.logs.last().unwrap();
    assert_eq!(last.level, LogLevel::Error);
    assert_eq!(last.code.as_deref(), Some("QueryFailed"));
}

#[tokio::test]
async fn test_records_outside_node_categories_terminate() {
    // The only e0 record types its object as a ChemicalEntity, which is
    // broader than n1's SmallMolecule, so n1 never gets identifiers.
    let graph = spec(json!({
        "nodes": {
            "n0": {"ids": ["NCBIGene:3630"], "categories": ["biolink:Gene"]},
            "n1": {"categories": ["biolink:SmallMolecule"]},
            "n2": {"categories": ["biolink:Disease"]}
        },
        "edges": {
            "e0": {"subject": "n0", "object": "n1", "predicates": ["biolink:treats"]},
            "e1": {"subject": "n1", "object": "n2", "predicates": ["biolink:treats"]}
        }
    }));
    let catalog = Arc::new(StaticCatalog::new(vec![
        entry("mychem", "Gene", "treats", "SmallMolecule"),
        entry("mychem", "SmallMolecule", "treats", "Disease"),
    ]));
    let executor = Arc::new(RecordedExecutor::new().with_records(
        "e0",
        vec![Record::new("r1", gene(), typed("CHEBI:1", "biolink:ChemicalEntity"))],
    ));
    let response = QueryHandler::new(ontology(), resolver(), catalog, executor.clone())
        .query(&graph)
        .await
        .expect("a dead end is not an error");

    assert_eq!(
        response.status,
        QueryStatus::Terminated {
            edge_id: "e0".into(),
            reason: DeadEnd::NoIdentifiersPropagated { node: "n1".into() },
        }
    );
    assert!(response.results.is_empty());
    assert_eq!(response.knowledge_graph.edge_count(), 0);
    assert!(has_log(&response, "QueryTerminated"));
    assert!(!has_log(&response, "ExecutionSummary"));
    // e1 never ran.
    assert_eq!(executor.call_count(), 1);
}

// ============================================================================
// Knowledge graph, summary and seed expansion
// ============================================================================

#[tokio::test]
async fn test_knowledge_graph_keeps_only_bound_records() {
    // Without neighbor pruning the dangling e0 record survives on the edge,
    // but no result binds it.
    let executor = Arc::new(
        RecordedExecutor::new()
            .with_records(
                "e0",
                vec![
                    Record::new("r1", gene(), typed("MONDO:1", "biolink:Disease")),
                    Record::new("r5", gene(), typed("MONDO:9", "biolink:Disease")),
                ],
            )
            .with_records(
                "e1",
                vec![Record::new(
                    "r3",
                    typed("MONDO:1", "biolink:Disease"),
                    typed("CHEBI:1", "biolink:SmallMolecule"),
                )],
            ),
    );
    let options = QueryOptions {
        scheduler: SchedulerConfig {
            prune_neighbors: false,
            ..SchedulerConfig::default()
        },
        ..QueryOptions::default()
    };
    let response = handler(executor)
        .with_options(options)
        .query(&chain(false))
        .await
        .expect("query succeeds");

    assert_eq!(response.results.len(), 1);
    assert_eq!(response.query_graph.edge("e0").unwrap().records.len(), 2);

    let kg = &response.knowledge_graph;
    assert_eq!(kg.edges.keys().collect::<Vec<_>>(), vec!["r1", "r3"]);
    assert!(!kg.nodes.contains_key("MONDO:9"));
    assert_eq!(kg.node_count(), 3);
    assert!(kg.nodes["NCBIGene:3630"].equivalent_identifiers.contains("HGNC:6081"));
    let r3 = &kg.edges["r3"];
    assert_eq!((r3.subject.as_str(), r3.object.as_str()), ("MONDO:1", "CHEBI:1"));
    assert_eq!(r3.predicate.as_deref(), Some("biolink:treated_by"));

    let summary = response
        .logs
        .iter()
        .find(|l| l.code.as_deref() == Some("ExecutionSummary"))
        .expect("summary logged");
    assert!(summary
        .message
        .starts_with("Execution Summary: (3) nodes / (2) edges / (1) results"));
}

#[tokio::test]
async fn test_seed_descendants_join_the_query_as_a_set() {
    let graph = spec(json!({
        "nodes": {
            "n0": {"ids": ["MONDO:1"], "categories": ["biolink:Disease"]},
            "n1": {"categories": ["biolink:ChemicalEntity"]}
        },
        "edges": {
            "e0": {"subject": "n0", "object": "n1", "predicates": ["biolink:treated_by"]}
        }
    }));
    let resolver =
        Arc::new(StaticResolver::new().with_descendants("MONDO:1", vec!["MONDO:2".into()]));
    let executor = || {
        Arc::new(RecordedExecutor::new().with_records(
            "e0",
            vec![
                Record::new("r1", typed("MONDO:1", "biolink:Disease"), typed("CHEBI:1", "biolink:SmallMolecule")),
                Record::new("r2", typed("MONDO:2", "biolink:Disease"), typed("CHEBI:1", "biolink:SmallMolecule")),
            ],
        ))
    };

    let response = QueryHandler::new(ontology(), resolver.clone(), catalog(), executor())
        .query(&graph)
        .await
        .expect("query succeeds");
    assert!(response.query_graph.node("n0").unwrap().is_set);
    assert!(response
        .logs
        .iter()
        .any(|l| l.message == "Expanded ids for node `n0`: (1 ids -> 2 ids)"));
    assert!(response
        .logs
        .iter()
        .any(|l| l.message == "Added is_set:true to node `n0`"));
    assert_eq!(response.results.len(), 1);
    assert_eq!(ids(&response.results[0], "n0"), vec!["MONDO:1", "MONDO:2"]);

    let options = QueryOptions {
        expand_ids: false,
        ..QueryOptions::default()
    };
    let response = QueryHandler::new(ontology(), resolver, catalog(), executor())
        .with_options(options)
        .query(&graph)
        .await
        .expect("query succeeds");
    assert!(!response.query_graph.node("n0").unwrap().is_set);
    assert_eq!(response.results.len(), 1);
    assert_eq!(ids(&response.results[0], "n0"), vec!["MONDO:1"]);
}

// ============================================================================
// Snapshots
// ============================================================================

#[tokio::test]
async fn test_final_graph_snapshot_round_trips() {
    let response = handler(chain_executor())
        .query(&chain(true))
        .await
        .expect("query succeeds");
    let snapshot = response.query_graph.snapshot();
    let text = serde_json::to_string(&snapshot).unwrap();
    let decoded: GraphSnapshotV1 = serde_json::from_str(&text).unwrap();
    let restored = QueryGraph::from_snapshot(decoded).unwrap();
    assert_eq!(restored, response.query_graph);
    assert!(restored.edges().all(|e| e.executed));
}

// ============================================================================
// CLI fixtures
// ============================================================================

#[tokio::test]
async fn test_cli_fixtures_run_end_to_end() {
    let dir = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("crates/biofed-cli/fixtures");
    let text = std::fs::read_to_string(dir.join("graph.json")).unwrap();
    let graph = QueryGraphSpec::from_json_str(&text).unwrap();
    let options = QueryOptions::from_path(&dir.join("options.json")).unwrap();

    let handler = QueryHandler::new(
        ontology(),
        Arc::new(StaticResolver::from_path(&dir.join("resolver.json")).unwrap()),
        Arc::new(StaticCatalog::from_path(&dir.join("catalog.json")).unwrap()),
        Arc::new(RecordedExecutor::from_path(&dir.join("records.json")).unwrap()),
    )
    .with_options(options);
    let response = handler.query(&graph).await.expect("fixture query succeeds");

    assert_eq!(response.status, QueryStatus::Completed);
    assert_eq!(response.results.len(), 1);
    let result = &response.results[0];
    assert_eq!(ids(result, "gene"), vec!["NCBIGene:3630"]);
    assert_eq!(ids(result, "disease"), vec!["MONDO:0005015", "MONDO:0005148"]);
    // CHEBI:5441 fails the clinical phase constraint.
    assert_eq!(ids(result, "chemical"), vec!["CHEBI:6801"]);
    assert!(response.query_graph.edge("e1").unwrap().reverse);

    // e1 ran backwards but its knowledge graph edges read as declared.
    let kg = &response.knowledge_graph;
    assert_eq!((kg.node_count(), kg.edge_count()), (4, 4));
    assert!(!kg.edges.contains_key("mychem-3"));
    let treats = &kg.edges["mychem-1"];
    assert_eq!(treats.subject, "CHEBI:6801");
    assert_eq!(treats.object, "MONDO:0005148");
    assert_eq!(treats.predicate.as_deref(), Some("biolink:treats"));
    assert!(treats.sources.contains("mychem"));
    assert!(kg.edges["semmed-1"].publications.contains("PMID:12345"));

    let summary = response
        .logs
        .iter()
        .find(|l| l.code.as_deref() == Some("ExecutionSummary"))
        .expect("summary logged");
    let data = summary.data.as_ref().unwrap();
    assert_eq!(data["queries"], 2);
    assert_eq!(data["hits"], 2);
    assert_eq!(data["apis"], json!(["mychem", "semmed"]));
    assert!(response.logs.iter().any(|l| l.message == "APIs: mychem, semmed"));
}
