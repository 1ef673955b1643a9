//! Association records returned by a [`BatchExecutor`](crate::collaborators::BatchExecutor).
//!
//! A record's sides are stored in *execution* direction: `subject` is the
//! side that was bound when the edge ran (the input), `object` is the side
//! that was discovered.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use biofed_ontology::strip_prefix;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Subject,
    Object,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordNode {
    /// The identifier as the source reported it.
    pub original: String,
    /// Resolved primary identifier; empty when unresolved.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub curie: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub semantic_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub equivalent_curies: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Value>,
}

impl RecordNode {
    pub fn new(original: impl Into<String>) -> Self {
        Self {
            original: original.into(),
            ..Self::default()
        }
    }

    pub fn curie(mut self, curie: impl Into<String>) -> Self {
        self.curie = curie.into();
        self
    }

    pub fn semantic_type(mut self, semantic_type: impl Into<String>) -> Self {
        self.semantic_types.push(semantic_type.into());
        self
    }

    pub fn equivalent(mut self, curie: impl Into<String>) -> Self {
        self.equivalent_curies.push(curie.into());
        self
    }

    pub fn attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn primary_id(&self) -> &str {
        if self.curie.is_empty() {
            &self.original
        } else {
            &self.curie
        }
    }

    /// Equivalent identifiers, falling back to the resolved curie, then the
    /// original. Always contains the primary id.
    pub fn aliases(&self) -> BTreeSet<String> {
        let mut aliases: BTreeSet<String> = self.equivalent_curies.iter().cloned().collect();
        aliases.insert(self.primary_id().to_string());
        aliases
    }

    /// Every identifier this side can be matched by.
    pub fn identifiers(&self) -> BTreeSet<String> {
        let mut ids = self.aliases();
        ids.insert(self.original.clone());
        ids
    }

    /// Untyped sides match anything; typed sides need one type in `types`.
    pub fn matches_types(&self, types: &BTreeSet<String>) -> bool {
        types.is_empty()
            || self.semantic_types.is_empty()
            || self
                .semantic_types
                .iter()
                .any(|t| types.contains(strip_prefix(t)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub predicate: String,
    pub subject: RecordNode,
    pub object: RecordNode,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub qualifiers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub publications: Vec<String>,
}

impl Record {
    pub fn new(id: impl Into<String>, subject: RecordNode, object: RecordNode) -> Self {
        Self {
            id: id.into(),
            api_name: String::new(),
            predicate: String::new(),
            subject,
            object,
            qualifiers: BTreeMap::new(),
            publications: Vec::new(),
        }
    }

    pub fn predicate(mut self, predicate: impl Into<String>) -> Self {
        self.predicate = predicate.into();
        self
    }

    pub fn side(&self, side: Side) -> &RecordNode {
        match side {
            Side::Subject => &self.subject,
            Side::Object => &self.object,
        }
    }

    /// The same association with its sides swapped.
    pub fn flipped(&self) -> Record {
        Record {
            subject: self.object.clone(),
            object: self.subject.clone(),
            ..self.clone()
        }
    }
}
