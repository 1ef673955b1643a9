//! Wire shapes for a submitted query graph.
//!
//! These mirror the TRAPI `query_graph` object closely enough to deserialize
//! one directly. Unknown properties are kept in `extra` so the compiler can
//! warn about them instead of failing.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryGraphSpec {
    #[serde(default)]
    pub nodes: BTreeMap<String, QNodeSpec>,
    #[serde(default)]
    pub edges: BTreeMap<String, QEdgeSpec>,
}

impl QueryGraphSpec {
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QNodeSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<String>>,
    #[serde(default)]
    pub is_set: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<AttributeConstraint>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl QNodeSpec {
    pub fn with_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: Some(ids.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub fn with_categories<I, S>(categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            categories: Some(categories.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub fn has_ids(&self) -> bool {
        self.ids.as_ref().is_some_and(|ids| !ids.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QEdgeSpec {
    pub subject: String,
    pub object: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicates: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub qualifier_constraints: Vec<QualifierConstraint>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl QEdgeSpec {
    pub fn new(subject: impl Into<String>, object: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            object: object.into(),
            ..Self::default()
        }
    }

    pub fn predicates<I, S>(mut self, predicates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.predicates = Some(predicates.into_iter().map(Into::into).collect());
        self
    }
}

/// One alternative: every qualifier in the set must hold.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualifierConstraint {
    #[serde(default)]
    pub qualifier_set: Vec<Qualifier>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Qualifier {
    pub qualifier_type_id: String,
    pub qualifier_value: String,
}

impl Qualifier {
    pub fn new(qualifier_type_id: impl Into<String>, qualifier_value: impl Into<String>) -> Self {
        Self {
            qualifier_type_id: qualifier_type_id.into(),
            qualifier_value: qualifier_value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstraintOperator {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    /// Any operator we do not evaluate; never satisfied.
    #[serde(other)]
    Unsupported,
}

/// Node-level attribute constraint, checked against each record side bound
/// to the node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeConstraint {
    /// Attribute key looked up on the record side.
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub operator: ConstraintOperator,
    pub value: Value,
}

impl AttributeConstraint {
    pub fn new(id: impl Into<String>, operator: ConstraintOperator, value: Value) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            operator,
            value,
        }
    }
}
