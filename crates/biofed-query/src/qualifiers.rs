//! Qualifier constraints: validation, orientation and expansion.
//!
//! Qualifier sets are stated relative to the edge's declared direction. When
//! an edge executes backwards the sets are *oriented* first (subject/object
//! swapped in the type ids, predicate values reversed), then *expanded* so
//! each qualifier accepts its value and every descendant of it.

use std::collections::{BTreeMap, BTreeSet};

use biofed_ontology::{strip_prefix, Ontology};

use crate::error::InvalidQueryGraph;
use crate::spec::{Qualifier, QualifierConstraint};

/// Qualifier type (prefix stripped) → accepted values.
pub type ExpandedQualifierSet = BTreeMap<String, BTreeSet<String>>;

pub fn validate(edge_id: &str, sets: &[QualifierConstraint]) -> Result<(), InvalidQueryGraph> {
    for set in sets {
        let mut seen = BTreeSet::new();
        for q in &set.qualifier_set {
            let ty = strip_prefix(&q.qualifier_type_id);
            if !seen.insert(ty) {
                return Err(InvalidQueryGraph::DuplicateQualifierType {
                    edge_id: edge_id.to_string(),
                    qualifier_type: ty.to_string(),
                });
            }
        }
    }
    Ok(())
}

pub(crate) fn is_predicate_valued(qualifier_type: &str) -> bool {
    strip_prefix(qualifier_type).contains("predicate")
}

pub(crate) fn swap_side(qualifier_type: &str) -> String {
    if qualifier_type.contains("subject") {
        qualifier_type.replace("subject", "object")
    } else if qualifier_type.contains("object") {
        qualifier_type.replace("object", "subject")
    } else {
        qualifier_type.to_string()
    }
}

/// The qualifier sets as seen from the execution direction.
///
/// A predicate value with no reverse is kept as-is: dropping it would widen
/// the constraint.
pub fn oriented(
    sets: &[QualifierConstraint],
    reverse: bool,
    ontology: &Ontology,
) -> Vec<QualifierConstraint> {
    if !reverse {
        return sets.to_vec();
    }
    sets.iter()
        .map(|set| QualifierConstraint {
            qualifier_set: set
                .qualifier_set
                .iter()
                .map(|q| {
                    let value = if is_predicate_valued(&q.qualifier_type_id) {
                        ontology
                            .reverse(&q.qualifier_value)
                            .unwrap_or_else(|| strip_prefix(&q.qualifier_value).to_string())
                    } else {
                        q.qualifier_value.clone()
                    };
                    Qualifier::new(swap_side(&q.qualifier_type_id), value)
                })
                .collect(),
        })
        .collect()
}

pub fn expand(sets: &[QualifierConstraint], ontology: &Ontology) -> Vec<ExpandedQualifierSet> {
    sets.iter()
        .map(|set| {
            set.qualifier_set
                .iter()
                .map(|q| {
                    let values = if is_predicate_valued(&q.qualifier_type_id) {
                        ontology.descendant_predicates(&q.qualifier_value)
                    } else {
                        ontology.descendant_qualifiers(&q.qualifier_value)
                    };
                    (strip_prefix(&q.qualifier_type_id).to_string(), values)
                })
                .collect()
        })
        .collect()
}
