//! Single-parent term hierarchies (classes, predicates, qualifier values).
//!
//! A [`Hierarchy`] is built once from a list of [`TermDecl`]s and is read-only
//! afterwards. Construction is fail-closed: duplicate names, dangling parents,
//! parent cycles and inconsistent inverses are rejected with an
//! [`OntologyError`].

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::strip_prefix;

/// Which vocabulary a hierarchy holds. Only affects error messages and which
/// attributes are honoured (inverses and symmetry are predicate-only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HierarchyKind {
    Class,
    Predicate,
    QualifierValue,
}

impl std::fmt::Display for HierarchyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HierarchyKind::Class => write!(f, "class"),
            HierarchyKind::Predicate => write!(f, "predicate"),
            HierarchyKind::QualifierValue => write!(f, "qualifier value"),
        }
    }
}

/// A declared term, as it appears in an ontology document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermDecl {
    pub name: String,
    #[serde(default, alias = "parent", skip_serializing_if = "Option::is_none")]
    pub is_a: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub mixin: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mixins: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub symmetric: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inverse: Option<String>,
}

impl TermDecl {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn is_a(mut self, parent: impl Into<String>) -> Self {
        self.is_a = Some(parent.into());
        self
    }

    pub fn mixin(mut self) -> Self {
        self.mixin = true;
        self
    }

    pub fn with_mixin(mut self, mixin: impl Into<String>) -> Self {
        self.mixins.push(mixin.into());
        self
    }

    pub fn symmetric(mut self) -> Self {
        self.symmetric = true;
        self
    }

    pub fn inverse(mut self, inverse: impl Into<String>) -> Self {
        self.inverse = Some(inverse.into());
        self
    }
}

/// A resolved node of a hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OntologyNode {
    pub name: String,
    pub parent: Option<String>,
    /// Back-references only; ownership runs child → parent.
    pub children: BTreeSet<String>,
    pub is_mixin: bool,
    pub symmetric: bool,
    pub inverse: Option<String>,
    /// Mixins this term uses (classes only).
    pub mixins: BTreeSet<String>,
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum OntologyError {
    #[error("duplicate {kind} `{name}`")]
    Duplicate { kind: HierarchyKind, name: String },
    #[error("{kind} `{name}` has unknown parent `{parent}`")]
    UnknownParent {
        kind: HierarchyKind,
        name: String,
        parent: String,
    },
    #[error("{kind} `{name}` declares more than one parent (`{first}`, `{second}`)")]
    MultipleParents {
        kind: HierarchyKind,
        name: String,
        first: String,
        second: String,
    },
    #[error("{kind} hierarchy has a cycle through `{name}`")]
    Cycle { kind: HierarchyKind, name: String },
    #[error("class `{name}` uses `{mixin}`, which is not a declared mixin")]
    UnknownMixin { name: String, mixin: String },
    #[error("predicate `{name}` has unknown inverse `{inverse}`")]
    UnknownInverse { name: String, inverse: String },
    #[error("predicate `{name}` has inverse `{inverse}`, but `{inverse}` is the inverse of `{other}`")]
    InconsistentInverse {
        name: String,
        inverse: String,
        other: String,
    },
    #[error("IO error reading ontology: {0}")]
    Io(String),
    #[error("parse error: {0}")]
    Parse(String),
}

impl From<std::io::Error> for OntologyError {
    fn from(value: std::io::Error) -> Self {
        OntologyError::Io(value.to_string())
    }
}

/// An immutable forest of terms.
#[derive(Debug, Clone)]
pub struct Hierarchy {
    kind: HierarchyKind,
    nodes: BTreeMap<String, OntologyNode>,
    /// mixin name → terms that list it in `mixins`.
    mixin_users: BTreeMap<String, BTreeSet<String>>,
}

impl Hierarchy {
    pub fn empty(kind: HierarchyKind) -> Self {
        Self {
            kind,
            nodes: BTreeMap::new(),
            mixin_users: BTreeMap::new(),
        }
    }

    /// Build and validate a hierarchy.
    pub fn build(kind: HierarchyKind, decls: Vec<TermDecl>) -> Result<Self, OntologyError> {
        let mut nodes: BTreeMap<String, OntologyNode> = BTreeMap::new();
        for decl in decls {
            let name = strip_prefix(&decl.name).to_string();
            if nodes.contains_key(&name) {
                return Err(OntologyError::Duplicate { kind, name });
            }
            let node = OntologyNode {
                name: name.clone(),
                parent: decl.is_a.as_deref().map(|p| strip_prefix(p).to_string()),
                children: BTreeSet::new(),
                is_mixin: decl.mixin,
                symmetric: kind == HierarchyKind::Predicate && decl.symmetric,
                inverse: match kind {
                    HierarchyKind::Predicate => {
                        decl.inverse.as_deref().map(|i| strip_prefix(i).to_string())
                    }
                    _ => None,
                },
                mixins: decl
                    .mixins
                    .iter()
                    .map(|m| strip_prefix(m).to_string())
                    .collect(),
            };
            nodes.insert(name, node);
        }

        let mut children: Vec<(String, String)> = Vec::new();
        let mut mixin_users: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for node in nodes.values() {
            if let Some(parent) = &node.parent {
                if !nodes.contains_key(parent) {
                    return Err(OntologyError::UnknownParent {
                        kind,
                        name: node.name.clone(),
                        parent: parent.clone(),
                    });
                }
                children.push((parent.clone(), node.name.clone()));
            }
            for mixin in &node.mixins {
                match nodes.get(mixin) {
                    Some(m) if m.is_mixin => {
                        mixin_users
                            .entry(mixin.clone())
                            .or_default()
                            .insert(node.name.clone());
                    }
                    _ => {
                        return Err(OntologyError::UnknownMixin {
                            name: node.name.clone(),
                            mixin: mixin.clone(),
                        })
                    }
                }
            }
        }
        for (parent, child) in children {
            if let Some(p) = nodes.get_mut(&parent) {
                p.children.insert(child);
            }
        }

        detect_parent_cycles(kind, &nodes)?;
        if kind == HierarchyKind::Predicate {
            close_inverses(&mut nodes)?;
        }

        Ok(Self {
            kind,
            nodes,
            mixin_users,
        })
    }

    pub fn kind(&self) -> HierarchyKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(strip_prefix(name))
    }

    pub fn get(&self, name: &str) -> Option<&OntologyNode> {
        self.nodes.get(strip_prefix(name))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    pub fn is_mixin(&self, name: &str) -> bool {
        self.get(name).map(|n| n.is_mixin).unwrap_or(false)
    }

    /// Reflexive descendant set. Unknown names come back as `{name}`.
    ///
    /// Terms that use a mixin (and their subtrees) count as descendants of the
    /// mixin.
    pub fn descendants(&self, name: &str) -> BTreeSet<String> {
        let name = strip_prefix(name);
        let mut out = BTreeSet::new();
        out.insert(name.to_string());
        if !self.nodes.contains_key(name) {
            return out;
        }

        let mut stack = vec![name.to_string()];
        while let Some(current) = stack.pop() {
            let Some(node) = self.nodes.get(&current) else {
                continue;
            };
            let users = self.mixin_users.get(&current);
            for next in node.children.iter().chain(users.into_iter().flatten()) {
                if out.insert(next.clone()) {
                    stack.push(next.clone());
                }
            }
        }
        out
    }

    /// Parent chain, nearest first, excluding `name` itself.
    pub fn ancestors(&self, name: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut current = self.get(name).and_then(|n| n.parent.clone());
        while let Some(parent) = current {
            current = self.nodes.get(&parent).and_then(|n| n.parent.clone());
            out.push(parent);
        }
        out
    }

    /// `name`, its ancestors, the mixins used anywhere along that chain and
    /// those mixins' own ancestors.
    pub fn lineage_with_mixins(&self, name: &str) -> BTreeSet<String> {
        let name = strip_prefix(name);
        let mut out = BTreeSet::new();
        let mut stack = vec![name.to_string()];
        while let Some(current) = stack.pop() {
            if !out.insert(current.clone()) {
                continue;
            }
            if let Some(node) = self.nodes.get(&current) {
                if let Some(parent) = &node.parent {
                    stack.push(parent.clone());
                }
                stack.extend(node.mixins.iter().cloned());
            }
        }
        out
    }
}

fn detect_parent_cycles(
    kind: HierarchyKind,
    nodes: &BTreeMap<String, OntologyNode>,
) -> Result<(), OntologyError> {
    let mut acyclic: HashSet<&str> = HashSet::new();
    for start in nodes.keys() {
        let mut path: Vec<&str> = Vec::new();
        let mut on_path: HashSet<&str> = HashSet::new();
        let mut current = Some(start.as_str());
        while let Some(name) = current {
            if acyclic.contains(name) {
                break;
            }
            if !on_path.insert(name) {
                return Err(OntologyError::Cycle {
                    kind,
                    name: name.to_string(),
                });
            }
            path.push(name);
            current = nodes.get(name).and_then(|n| n.parent.as_deref());
        }
        acyclic.extend(path);
    }
    Ok(())
}

/// Make inverses two-way: `a.inverse = b` implies `b.inverse = a`.
fn close_inverses(nodes: &mut BTreeMap<String, OntologyNode>) -> Result<(), OntologyError> {
    let declared: Vec<(String, String)> = nodes
        .values()
        .filter_map(|n| n.inverse.clone().map(|inv| (n.name.clone(), inv)))
        .collect();

    for (name, inverse) in declared {
        let Some(target) = nodes.get_mut(&inverse) else {
            return Err(OntologyError::UnknownInverse { name, inverse });
        };
        match &target.inverse {
            None => target.inverse = Some(name),
            Some(back) if *back == name => {}
            Some(other) => {
                return Err(OntologyError::InconsistentInverse {
                    name,
                    inverse,
                    other: other.clone(),
                })
            }
        }
    }
    Ok(())
}
