//! Seams to the outside world.
//!
//! The core never talks to a network. Identifier resolution, capability
//! lookup and batch execution are injected as trait objects
//! (`Arc<dyn …>`), and the two that suspend are `async`.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use biofed_ontology::strip_prefix;

use crate::error::{ExecutorError, ResolverError};
use crate::qualifiers::ExpandedQualifierSet;
use crate::record::Record;

// ============================================================================
// Edge view
// ============================================================================

/// Read-only view of an edge, oriented for execution, handed to the catalog
/// and the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeQuery {
    pub edge_id: String,
    pub reverse: bool,
    pub input_node: String,
    pub output_node: String,
    /// Expanded input categories; empty means "any".
    pub input_categories: BTreeSet<String>,
    /// Expanded output categories; empty means "any".
    pub output_categories: BTreeSet<String>,
    /// Resolved predicates. `None` when the edge names no predicate; an empty
    /// list when every named predicate was dropped on reversal.
    pub predicates: Option<Vec<String>>,
    pub qualifier_constraints: Vec<ExpandedQualifierSet>,
    /// Bound input identifiers with their aliases.
    pub input_curies: BTreeMap<String, BTreeSet<String>>,
    pub hash: String,
}

impl EdgeQuery {
    /// Stable digest of what this edge would ask for.
    pub fn compute_hash(&self) -> String {
        fn section<'a>(hasher: &mut Sha256, items: impl IntoIterator<Item = &'a str>) {
            for item in items {
                hasher.update(item.as_bytes());
                hasher.update(b",");
            }
            hasher.update(b"|");
        }

        let mut hasher = Sha256::new();
        section(&mut hasher, self.input_categories.iter().map(String::as_str));

        let mut predicates: Vec<&str> = self
            .predicates
            .iter()
            .flatten()
            .map(String::as_str)
            .collect();
        predicates.sort_unstable();
        section(&mut hasher, predicates);

        section(&mut hasher, self.output_categories.iter().map(String::as_str));
        section(&mut hasher, self.input_curies.keys().map(String::as_str));

        let mut qualifiers: Vec<String> = self
            .qualifier_constraints
            .iter()
            .map(|set| {
                set.iter()
                    .map(|(ty, values)| {
                        let values: Vec<&str> = values.iter().map(String::as_str).collect();
                        format!("{ty}={}", values.join("+"))
                    })
                    .collect::<Vec<_>>()
                    .join(";")
            })
            .collect();
        qualifiers.sort_unstable();
        section(&mut hasher, qualifiers.iter().map(String::as_str));

        let digest = hasher.finalize();
        let mut out = String::with_capacity(64);
        for b in digest.iter() {
            use std::fmt::Write as _;
            let _ = write!(&mut out, "{:02x}", b);
        }
        out
    }

    /// Every input identifier, including aliases.
    pub fn input_identifiers(&self) -> BTreeSet<&str> {
        self.input_curies
            .iter()
            .flat_map(|(id, aliases)| std::iter::once(id).chain(aliases))
            .map(String::as_str)
            .collect()
    }
}

// ============================================================================
// Collaborator traits
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedEntity {
    pub primary_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_type: Option<String>,
    #[serde(default)]
    pub semantic_types: Vec<String>,
    #[serde(default)]
    pub equivalent_ids: Vec<String>,
}

/// Maps identifiers to their canonical entity.
#[async_trait]
pub trait IdResolver: Send + Sync {
    /// Unknown identifiers are simply absent from the returned map.
    async fn resolve(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, ResolvedEntity>, ResolverError>;

    /// Narrower identifiers for each seed (e.g. subtypes of a disease).
    /// Seeds without descendants may be absent.
    async fn descendants(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, Vec<String>>, ResolverError> {
        let _ = ids;
        Ok(HashMap::new())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub api_name: String,
    pub input_type: String,
    pub output_type: String,
    pub predicate: String,
}

/// Knows which sources can answer which (input type, predicate, output type).
pub trait CapabilityCatalog: Send + Sync {
    fn lookup(&self, edge: &EdgeQuery) -> Vec<CatalogEntry>;
}

/// Runs one edge against the matched sources.
///
/// `Err` aborts the whole query; `Ok(vec![])` is an ordinary dead end.
#[async_trait]
pub trait BatchExecutor: Send + Sync {
    async fn execute(
        &self,
        edge: &EdgeQuery,
        entries: &[CatalogEntry],
    ) -> Result<Vec<Record>, ExecutorError>;
}

// ============================================================================
// Fixture-backed implementations
// ============================================================================

fn read_fixture<T: DeserializeOwned>(path: &Path) -> Result<T, std::io::Error> {
    let text = std::fs::read_to_string(path)?;
    serde_json::from_str(&text).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

/// Resolver answering from fixed tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticResolver {
    #[serde(default)]
    entities: HashMap<String, ResolvedEntity>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    descendants: HashMap<String, Vec<String>>,
    #[serde(skip)]
    fault: Option<ResolverError>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// A resolver that fails every call with `fault`.
    pub fn failing(fault: ResolverError) -> Self {
        Self {
            fault: Some(fault),
            ..Self::default()
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, std::io::Error> {
        read_fixture(path)
    }

    pub fn with_entity(mut self, id: impl Into<String>, entity: ResolvedEntity) -> Self {
        self.entities.insert(id.into(), entity);
        self
    }

    pub fn with_descendants(mut self, id: impl Into<String>, descendants: Vec<String>) -> Self {
        self.descendants.insert(id.into(), descendants);
        self
    }
}

#[async_trait]
impl IdResolver for StaticResolver {
    async fn resolve(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, ResolvedEntity>, ResolverError> {
        if let Some(fault) = &self.fault {
            return Err(fault.clone());
        }
        Ok(ids
            .iter()
            .filter_map(|id| self.entities.get(id).map(|e| (id.clone(), e.clone())))
            .collect())
    }

    async fn descendants(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, Vec<String>>, ResolverError> {
        if let Some(fault) = &self.fault {
            return Err(fault.clone());
        }
        Ok(ids
            .iter()
            .filter_map(|id| self.descendants.get(id).map(|d| (id.clone(), d.clone())))
            .collect())
    }
}

/// Catalog backed by a list of entries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StaticCatalog {
    entries: Vec<CatalogEntry>,
}

impl StaticCatalog {
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        Self { entries }
    }

    pub fn from_path(path: &Path) -> Result<Self, std::io::Error> {
        read_fixture(path)
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }
}

impl CapabilityCatalog for StaticCatalog {
    fn lookup(&self, edge: &EdgeQuery) -> Vec<CatalogEntry> {
        let accepts = |allowed: &BTreeSet<String>, ty: &str| {
            allowed.is_empty() || allowed.contains(strip_prefix(ty))
        };
        self.entries
            .iter()
            .filter(|e| accepts(&edge.input_categories, &e.input_type))
            .filter(|e| accepts(&edge.output_categories, &e.output_type))
            .filter(|e| match &edge.predicates {
                None => true,
                Some(predicates) => predicates.iter().any(|p| p == strip_prefix(&e.predicate)),
            })
            .cloned()
            .collect()
    }
}

/// Executor replaying recorded association rows per edge id.
///
/// Only rows whose input side matches one of the edge's bound identifiers are
/// returned. With `declared_direction` set, rows are stored subject → object
/// as the edge was declared and get flipped when the edge runs backwards.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RecordedExecutor {
    #[serde(default)]
    pub records: BTreeMap<String, Vec<Record>>,
    #[serde(default)]
    pub declared_direction: bool,
    #[serde(skip)]
    failing: BTreeSet<String>,
    #[serde(skip)]
    calls: AtomicUsize,
}

impl RecordedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_path(path: &Path) -> Result<Self, std::io::Error> {
        read_fixture(path)
    }

    pub fn declared_direction(mut self, declared: bool) -> Self {
        self.declared_direction = declared;
        self
    }

    pub fn with_records(mut self, edge_id: impl Into<String>, records: Vec<Record>) -> Self {
        self.records.entry(edge_id.into()).or_default().extend(records);
        self
    }

    /// Make every execution of `edge_id` fail.
    pub fn failing_on(mut self, edge_id: impl Into<String>) -> Self {
        self.failing.insert(edge_id.into());
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BatchExecutor for RecordedExecutor {
    async fn execute(
        &self,
        edge: &EdgeQuery,
        _entries: &[CatalogEntry],
    ) -> Result<Vec<Record>, ExecutorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(&edge.edge_id) {
            return Err(ExecutorError::new(format!(
                "recorded failure for edge `{}`",
                edge.edge_id
            )));
        }
        let inputs = edge.input_identifiers();
        let Some(stored) = self.records.get(&edge.edge_id) else {
            return Ok(Vec::new());
        };
        Ok(stored
            .iter()
            .map(|r| {
                if self.declared_direction && edge.reverse {
                    // The stored predicate reads subject to object as declared.
                    let mut flipped = r.flipped();
                    flipped.predicate.clear();
                    flipped
                } else {
                    r.clone()
                }
            })
            .filter(|r| {
                r.subject
                    .identifiers()
                    .iter()
                    .any(|id| inputs.contains(id.as_str()))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordNode;

    fn query(reverse: bool) -> EdgeQuery {
        let mut q = EdgeQuery {
            edge_id: "e0".into(),
            reverse,
            input_node: "n0".into(),
            output_node: "n1".into(),
            input_categories: ["Gene".to_string()].into_iter().collect(),
            output_categories: BTreeSet::new(),
            predicates: Some(vec!["treats".into()]),
            qualifier_constraints: Vec::new(),
            input_curies: [(
                "NCBIGene:3630".to_string(),
                ["NCBIGene:3630".to_string()].into_iter().collect(),
            )]
            .into_iter()
            .collect(),
            hash: String::new(),
        };
        q.hash = q.compute_hash();
        q
    }

    #[test]
    fn hash_is_stable_and_sensitive() {
        let a = query(false);
        let b = query(false);
        assert_eq!(a.hash, b.hash);
        assert_eq!(a.hash.len(), 64);

        let mut c = query(false);
        c.predicates = Some(vec!["treated_by".into()]);
        assert_ne!(c.compute_hash(), a.hash);
    }

    #[test]
    fn catalog_matches_types_and_predicates() {
        let catalog = StaticCatalog::new(vec![
            CatalogEntry {
                api_name: "mychem".into(),
                input_type: "biolink:Gene".into(),
                output_type: "biolink:SmallMolecule".into(),
                predicate: "biolink:treats".into(),
            },
            CatalogEntry {
                api_name: "other".into(),
                input_type: "Disease".into(),
                output_type: "Gene".into(),
                predicate: "treats".into(),
            },
        ]);
        let hits = catalog.lookup(&query(false));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].api_name, "mychem");

        let mut q = query(false);
        q.predicates = Some(Vec::new());
        assert!(catalog.lookup(&q).is_empty());
    }

    #[tokio::test]
    async fn recorded_executor_filters_on_inputs_and_flips() {
        let rows = vec![
            Record::new("r1", RecordNode::new("CHEBI:1"), RecordNode::new("NCBIGene:3630"))
                .predicate("biolink:treats"),
            Record::new("r2", RecordNode::new("CHEBI:2"), RecordNode::new("NCBIGene:1")),
        ];
        let executor = RecordedExecutor::new()
            .declared_direction(true)
            .with_records("e0", rows);
        let out = executor.execute(&query(true), &[]).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].subject.original, "NCBIGene:3630");
        assert_eq!(out[0].object.original, "CHEBI:1");
        assert!(out[0].predicate.is_empty());
        assert_eq!(executor.call_count(), 1);

        let failing = RecordedExecutor::new().failing_on("e0");
        assert!(failing.execute(&query(false), &[]).await.is_err());
    }

    #[tokio::test]
    async fn static_resolver_omits_unknown_ids() {
        let resolver = StaticResolver::new().with_entity(
            "NCBIGene:3630",
            ResolvedEntity {
                primary_id: "NCBIGene:3630".into(),
                primary_type: Some("biolink:Gene".into()),
                ..ResolvedEntity::default()
            },
        );
        let out = resolver
            .resolve(&["NCBIGene:3630".to_string(), "X:1".to_string()])
            .await
            .unwrap();
        assert_eq!(out.len(), 1);

        let down = StaticResolver::failing(ResolverError::Unavailable("503".into()));
        assert!(down.resolve(&[]).await.is_err());
        assert!(down.descendants(&[]).await.is_err());
    }

    #[tokio::test]
    async fn static_resolver_reads_descendant_table() {
        let resolver: StaticResolver = serde_json::from_str(
            r#"{
                "entities": {"MONDO:0005015": {"primary_id": "MONDO:0005015"}},
                "descendants": {"MONDO:0005015": ["MONDO:0005148", "MONDO:0005147"]}
            }"#,
        )
        .unwrap();
        let out = resolver
            .descendants(&["MONDO:0005015".to_string(), "X:1".to_string()])
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out["MONDO:0005015"], vec!["MONDO:0005148", "MONDO:0005147"]);
        assert_eq!(
            resolver.resolve(&["MONDO:0005015".to_string()]).await.unwrap().len(),
            1
        );
    }
}
