//! Field dependency resolver.
//!
//! Visibility expressions reference sibling fields by api name, forming a
//! directed graph per module. This file answers what a field depends on,
//! the reverse lookup, evaluates visibility against record data, and
//! rejects expressions that would close a dependency cycle.

use std::collections::{BTreeMap, HashMap};

use crate::error::{CoreError, CoreResult};
use crate::record::FieldValue;
use crate::schema::registry::SchemaRegistry;
use crate::schema::types::{Field, VisibilityExpression};

impl SchemaRegistry {
    /// Distinct api names a field's visibility expression references, in
    /// order of first appearance.
    pub fn field_dependencies(&self, field_id: u64) -> CoreResult<Vec<String>> {
        let field = self.get_field(field_id)?;
        Ok(field
            .visibility
            .map(|expression| expression.referenced_fields())
            .unwrap_or_default())
    }

    /// Fields of the module whose visibility references `api_name`.
    /// Derived by scanning the module's fields; there is no edge table to
    /// fall out of date.
    pub fn dependent_fields(&self, module_id: u64, api_name: &str) -> CoreResult<Vec<Field>> {
        let fields = self.fields_for_module(module_id)?;
        Ok(fields
            .into_iter()
            .filter(|f| {
                f.visibility.as_ref().map_or(false, |expression| {
                    expression.referenced_fields().iter().any(|r| r == api_name)
                })
            })
            .collect())
    }

    /// Evaluates a field's visibility against a record's attribute map.
    /// A field without an expression is always visible.
    pub fn is_field_visible(&self, field: &Field, data: &BTreeMap<String, FieldValue>) -> bool {
        field
            .visibility
            .as_ref()
            .map_or(true, |expression| expression.evaluate(data))
    }

    /// Checks a candidate expression before it is saved under `api_name`:
    /// no self-reference, every referenced field exists in the module, and
    /// the module's dependency graph stays acyclic with the candidate
    /// substituted in.
    pub(crate) fn assert_visibility_valid(
        &self,
        siblings: &[Field],
        api_name: &str,
        expression: &VisibilityExpression,
    ) -> CoreResult<()> {
        let references = expression.referenced_fields();
        if references.iter().any(|r| r == api_name) {
            return Err(CoreError::validation(format!(
                "field '{}' cannot depend on itself",
                api_name
            )));
        }
        for reference in &references {
            if !siblings.iter().any(|f| &f.api_name == reference) {
                return Err(CoreError::validation(format!(
                    "visibility of '{}' references unknown field '{}'",
                    api_name, reference
                )));
            }
        }
        let mut graph: HashMap<&str, Vec<String>> = HashMap::new();
        for sibling in siblings {
            let refs = sibling
                .visibility
                .as_ref()
                .map(|e| e.referenced_fields())
                .unwrap_or_default();
            graph.insert(sibling.api_name.as_str(), refs);
        }
        graph.insert(api_name, references);
        if let Some(cycle) = find_cycle(&graph) {
            return Err(CoreError::validation(format!(
                "visibility dependencies form a cycle: {}",
                cycle.join(" -> ")
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Visiting,
    Done,
}

/// Depth-first search with a visiting set; returns the closed path when
/// the graph has a cycle.
fn find_cycle(graph: &HashMap<&str, Vec<String>>) -> Option<Vec<String>> {
    let mut marks: HashMap<String, Mark> = HashMap::new();
    let mut path: Vec<String> = Vec::new();
    for &start in graph.keys() {
        if !marks.contains_key(start) {
            if let Some(cycle) = visit(graph, start, &mut marks, &mut path) {
                return Some(cycle);
            }
        }
    }
    None
}

fn visit(
    graph: &HashMap<&str, Vec<String>>,
    node: &str,
    marks: &mut HashMap<String, Mark>,
    path: &mut Vec<String>,
) -> Option<Vec<String>> {
    marks.insert(node.to_string(), Mark::Visiting);
    path.push(node.to_string());
    if let Some(next_nodes) = graph.get(node) {
        for next in next_nodes {
            match marks.get(next.as_str()) {
                Some(Mark::Done) => {}
                Some(Mark::Visiting) => {
                    let start = path.iter().position(|n| n == next).unwrap_or(0);
                    let mut cycle = path[start..].to_vec();
                    cycle.push(next.clone());
                    return Some(cycle);
                }
                None => {
                    // Edges to fields without expressions dead-end here.
                    if graph.contains_key(next.as_str()) {
                        if let Some(cycle) = visit(graph, next, marks, path) {
                            return Some(cycle);
                        }
                    }
                }
            }
        }
    }
    path.pop();
    marks.insert(node.to_string(), Mark::Done);
    None
}
