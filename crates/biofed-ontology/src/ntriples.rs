//! Line-oriented triple loader.
//!
//! Accepts a simple N-Triples-like format, one statement per line:
//!
//! ```text
//! <https://w3id.org/biolink/vocab/Gene> rdfs:subClassOf <https://w3id.org/biolink/vocab/BiologicalEntity> .
//! biolink:treats owl:inverseOf biolink:treated_by .
//! biolink:correlated_with rdf:type owl:SymmetricProperty .
//! ```
//!
//! Recognised predicates:
//!
//! | statement                              | effect                         |
//! |----------------------------------------|--------------------------------|
//! | `rdf:type owl:Class`                   | declares a class               |
//! | `rdf:type biolink:Mixin`               | declares a mixin class         |
//! | `rdf:type owl:ObjectProperty`          | declares a predicate           |
//! | `rdf:type owl:SymmetricProperty`       | marks a predicate symmetric    |
//! | `rdf:type biolink:PermissibleValue`    | declares a qualifier value     |
//! | `rdfs:subClassOf`                      | class parent                   |
//! | `rdfs:subPropertyOf`                   | predicate parent               |
//! | `skos:broader`                         | qualifier value parent         |
//! | `owl:inverseOf`                        | predicate inverse              |
//! | `biolink:mixin`                        | class uses a mixin             |
//!
//! Other statements are ignored. Terms are reduced to their local names.

use std::collections::BTreeMap;

use crate::{HierarchyKind, OntologyDocument, OntologyError, TermDecl};

#[derive(Default)]
struct Terms {
    decls: BTreeMap<String, TermDecl>,
}

impl Terms {
    fn entry(&mut self, name: &str) -> &mut TermDecl {
        self.decls
            .entry(name.to_string())
            .or_insert_with(|| TermDecl::new(name))
    }

    fn set_parent(
        &mut self,
        kind: HierarchyKind,
        name: &str,
        parent: &str,
    ) -> Result<(), OntologyError> {
        let decl = self.entry(name);
        match &decl.is_a {
            Some(existing) if existing != parent => Err(OntologyError::MultipleParents {
                kind,
                name: name.to_string(),
                first: existing.clone(),
                second: parent.to_string(),
            }),
            _ => {
                decl.is_a = Some(parent.to_string());
                Ok(())
            }
        }
    }
}

/// Parse triples into an [`OntologyDocument`].
pub fn parse_ntriples(content: &str) -> Result<OntologyDocument, OntologyError> {
    let mut classes = Terms::default();
    let mut predicates = Terms::default();
    let mut qualifiers = Terms::default();

    for (idx, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 4 || parts[parts.len() - 1] != "." {
            return Err(OntologyError::Parse(format!(
                "line {}: expected `<subject> <predicate> <object> .`",
                idx + 1
            )));
        }

        let subject = local_name(parts[0]);
        let predicate = extract_iri(parts[1]);
        let object = local_name(&parts[2..parts.len() - 1].join(" "));

        match predicate.as_str() {
            "rdf:type" | "a" => match object.as_str() {
                "Class" => {
                    classes.entry(&subject);
                }
                "Mixin" => {
                    classes.entry(&subject).mixin = true;
                }
                "ObjectProperty" => {
                    predicates.entry(&subject);
                }
                "SymmetricProperty" => {
                    predicates.entry(&subject).symmetric = true;
                }
                "PermissibleValue" => {
                    qualifiers.entry(&subject);
                }
                _ => {}
            },
            "rdfs:subClassOf" => {
                classes.entry(&object);
                classes.set_parent(HierarchyKind::Class, &subject, &object)?;
            }
            "rdfs:subPropertyOf" => {
                predicates.entry(&object);
                predicates.set_parent(HierarchyKind::Predicate, &subject, &object)?;
            }
            "skos:broader" => {
                qualifiers.entry(&object);
                qualifiers.set_parent(HierarchyKind::QualifierValue, &subject, &object)?;
            }
            "owl:inverseOf" => {
                predicates.entry(&object);
                predicates.entry(&subject).inverse = Some(object);
            }
            "biolink:mixin" => {
                classes.entry(&object).mixin = true;
                let decl = classes.entry(&subject);
                if !decl.mixins.contains(&object) {
                    decl.mixins.push(object);
                }
            }
            _ => {}
        }
    }

    Ok(OntologyDocument {
        classes: classes.decls.into_values().collect(),
        predicates: predicates.decls.into_values().collect(),
        qualifier_values: qualifiers.decls.into_values().collect(),
    })
}

fn extract_iri(s: &str) -> String {
    s.trim_start_matches('<').trim_end_matches('>').to_string()
}

fn local_name(term: &str) -> String {
    let iri = extract_iri(term);
    let tail = iri.rsplit(&['/', '#'][..]).next().unwrap_or(&iri);
    tail.rsplit(':').next().unwrap_or(tail).to_string()
}
