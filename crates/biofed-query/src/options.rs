//! Query options.
//!
//! All fields default, so an empty JSON object (or no file at all) is a valid
//! configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::OptionsError;

/// Which endpoint becomes the input when both ends of an edge carry the same
/// entity count.
///
/// Two historical rules exist: the subject-side rule (`Subject`, default)
/// and the object-side rule (`Object`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectionTieBreak {
    #[default]
    Subject,
    Object,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub tie_break: DirectionTieBreak,
    /// Drop records of already-executed neighbor edges that no longer link
    /// to the current edge's identifiers.
    pub prune_neighbors: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tie_break: DirectionTieBreak::Subject,
            prune_neighbors: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryOptions {
    /// Plan and log the catalog lookups, but never call the executor.
    pub dryrun: bool,
    /// Infer missing node categories through the identifier resolver.
    pub resolve_categories: bool,
    /// Add descendant identifiers of seeded nodes before compiling.
    pub expand_ids: bool,
    pub scheduler: SchedulerConfig,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            dryrun: false,
            resolve_categories: true,
            expand_ids: true,
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl QueryOptions {
    pub fn from_json_str(json: &str) -> Result<Self, OptionsError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: &Path) -> Result<Self, OptionsError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}
