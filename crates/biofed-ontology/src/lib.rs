//! Biofed ontology reasoning.
//!
//! The ontology is a set of three single-parent hierarchies:
//!
//! - **classes** (semantic types such as `Gene`), with mixins,
//! - **predicates** (relationship types such as `treats`), with inverses and
//!   symmetry,
//! - **qualifier values** (permissible values used in qualifier constraints).
//!
//! An [`Ontology`] is loaded once (from JSON via [`Ontology::from_json_str`]
//! or from triples via [`ntriples::parse_ntriples`]) and then shared
//! read-only, typically behind an `Arc`. There is no process-wide instance:
//! callers inject the ontology they want, so tests can use small fixtures.
//!
//! Lookups are lenient about vocabulary: names may carry a `biolink:` prefix,
//! and unknown names expand to themselves.

pub mod hierarchy;
pub mod ntriples;

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

pub use hierarchy::{Hierarchy, HierarchyKind, OntologyError, OntologyNode, TermDecl};

pub const BIOLINK_PREFIX: &str = "biolink:";

/// Drop a leading `biolink:` prefix, if any.
pub fn strip_prefix(name: &str) -> &str {
    name.strip_prefix(BIOLINK_PREFIX).unwrap_or(name)
}

/// Serialized ontology, as read from disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OntologyDocument {
    #[serde(default)]
    pub classes: Vec<TermDecl>,
    #[serde(default)]
    pub predicates: Vec<TermDecl>,
    #[serde(default)]
    pub qualifier_values: Vec<TermDecl>,
}

#[derive(Debug, Clone)]
pub struct Ontology {
    classes: Hierarchy,
    predicates: Hierarchy,
    qualifier_values: Hierarchy,
}

impl Default for Ontology {
    fn default() -> Self {
        Self {
            classes: Hierarchy::empty(HierarchyKind::Class),
            predicates: Hierarchy::empty(HierarchyKind::Predicate),
            qualifier_values: Hierarchy::empty(HierarchyKind::QualifierValue),
        }
    }
}

impl Ontology {
    pub fn from_document(doc: OntologyDocument) -> Result<Self, OntologyError> {
        let ontology = Self {
            classes: Hierarchy::build(HierarchyKind::Class, doc.classes)?,
            predicates: Hierarchy::build(HierarchyKind::Predicate, doc.predicates)?,
            qualifier_values: Hierarchy::build(
                HierarchyKind::QualifierValue,
                doc.qualifier_values,
            )?,
        };
        tracing::debug!(
            classes = ontology.classes.len(),
            predicates = ontology.predicates.len(),
            qualifier_values = ontology.qualifier_values.len(),
            "ontology loaded"
        );
        Ok(ontology)
    }

    pub fn from_json_str(json: &str) -> Result<Self, OntologyError> {
        let doc: OntologyDocument =
            serde_json::from_str(json).map_err(|e| OntologyError::Parse(e.to_string()))?;
        Self::from_document(doc)
    }

    /// Load from a `.json` document or a `.nt`/`.ntriples` file.
    pub fn from_path(path: &Path) -> Result<Self, OntologyError> {
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("nt") | Some("ntriples") => {
                Self::from_document(ntriples::parse_ntriples(&text)?)
            }
            _ => Self::from_json_str(&text),
        }
    }

    pub fn classes(&self) -> &Hierarchy {
        &self.classes
    }

    pub fn predicates(&self) -> &Hierarchy {
        &self.predicates
    }

    pub fn qualifier_values(&self) -> &Hierarchy {
        &self.qualifier_values
    }

    pub fn descendant_classes(&self, name: &str) -> BTreeSet<String> {
        self.classes.descendants(name)
    }

    pub fn descendant_predicates(&self, name: &str) -> BTreeSet<String> {
        self.predicates.descendants(name)
    }

    pub fn descendant_qualifiers(&self, name: &str) -> BTreeSet<String> {
        self.qualifier_values.descendants(name)
    }

    /// The predicate to query when an edge is executed object → subject.
    ///
    /// `None` means the predicate cannot be traversed backwards and must be
    /// dropped by the caller. Unknown predicates are never reversible.
    pub fn reverse(&self, predicate: &str) -> Option<String> {
        let node = self.predicates.get(predicate)?;
        if let Some(inverse) = &node.inverse {
            return Some(inverse.clone());
        }
        if node.symmetric {
            return Some(node.name.clone());
        }
        None
    }

    /// True when `ancestor` is a strict ancestor of `of`, or a mixin used
    /// somewhere along `of`'s lineage.
    pub fn is_ancestor_or_mixin(&self, ancestor: &str, of: &str) -> bool {
        let ancestor = strip_prefix(ancestor);
        ancestor != strip_prefix(of) && self.classes.lineage_with_mixins(of).contains(ancestor)
    }

    /// Nearest class shared by every name's parent chain.
    ///
    /// Returns `None` for an empty input, an unknown class, disjoint lineages,
    /// or when the only shared ancestors are mixins.
    pub fn most_specific_common_ancestor<S: AsRef<str>>(&self, names: &[S]) -> Option<String> {
        let mut chains: Vec<Vec<String>> = Vec::with_capacity(names.len());
        for name in names {
            let name = strip_prefix(name.as_ref());
            if !self.classes.contains(name) {
                return None;
            }
            let mut chain = vec![name.to_string()];
            chain.extend(self.classes.ancestors(name));
            chains.push(chain);
        }
        let (first, rest) = chains.split_first()?;
        first
            .iter()
            .filter(|candidate| !self.classes.is_mixin(candidate))
            .find(|candidate| rest.iter().all(|chain| chain.contains(candidate)))
            .cloned()
    }

    /// Greedy most-specific-wins fold over a list of categories.
    ///
    /// A category is skipped when it is an ancestor (or mixin) of one already
    /// kept, and evicts kept categories that are its ancestors. Unrelated
    /// categories are all kept. Mixins only survive when nothing concrete does.
    pub fn most_specific<S: AsRef<str>>(&self, categories: &[S]) -> Vec<String> {
        let mut kept: Vec<String> = Vec::new();
        for category in categories {
            let category = strip_prefix(category.as_ref());
            if kept.iter().any(|k| k == category) {
                continue;
            }
            if kept
                .iter()
                .any(|k| self.is_ancestor_or_mixin(category, k))
            {
                continue;
            }
            kept.retain(|k| !self.is_ancestor_or_mixin(k, category));
            kept.push(category.to_string());
        }
        if kept.iter().any(|k| !self.classes.is_mixin(k)) {
            kept.retain(|k| !self.classes.is_mixin(k));
        }
        kept
    }
}
