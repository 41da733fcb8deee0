//! Field-dependency graph, built once at registry finalization.
//!
//! Nodes are `(model, field)` pairs. A computed or related field has an edge
//! to every field its dependency paths traverse. The graph must be acyclic;
//! the post-order of the depth-first walk is the evaluation order.

use crate::{
    model::{Dependent, FieldDescriptor, FieldKind, FieldType, InverseField},
    registry::RegistryError,
};
use indexmap::IndexMap;
use std::collections::{BTreeMap, HashMap};

type FieldTable = IndexMap<String, IndexMap<String, FieldDescriptor>>;
type Node<'a> = (&'a str, &'a str);

///
/// FieldGraph
///
/// Per-model products of the dependency analysis.
///

#[derive(Debug, Default)]
pub(crate) struct FieldGraph {
    pub(crate) dependents: BTreeMap<String, BTreeMap<String, Vec<Dependent>>>,
    pub(crate) compute_order: BTreeMap<String, Vec<String>>,
    pub(crate) inverses: BTreeMap<String, BTreeMap<String, Vec<InverseField>>>,
}

#[derive(Clone, Copy, Eq, PartialEq)]
enum Mark {
    Visiting,
    Done,
}

/// Analyze every model's computed fields.
pub(crate) fn build(models: &FieldTable) -> Result<FieldGraph, RegistryError> {
    let mut graph = FieldGraph::default();
    let mut edges: IndexMap<Node<'_>, Vec<Node<'_>>> = IndexMap::new();

    for (model_name, fields) in models {
        for field in fields.values() {
            if field.is_computed() {
                let targets = resolve_paths(models, model_name, field, &mut graph)?;
                edges.insert((model_name.as_str(), field.name.as_str()), targets);
            }
        }
    }

    let order = topological_order(&edges)?;
    let position: HashMap<(&str, &str), usize> = order
        .iter()
        .enumerate()
        .map(|(i, node)| (*node, i))
        .collect();

    for (model, field) in &order {
        graph
            .compute_order
            .entry((*model).to_string())
            .or_default()
            .push((*field).to_string());
    }

    // Refresh dependents in evaluation order.
    for per_field in graph.dependents.values_mut() {
        for list in per_field.values_mut() {
            list.sort_by_key(|d| {
                position
                    .get(&(d.model.as_str(), d.field.as_str()))
                    .copied()
                    .unwrap_or(usize::MAX)
            });
        }
    }

    collect_inverses(models, &mut graph)?;

    Ok(graph)
}

// Walk each dependency path of `field`, recording edges and reverse dependents.
fn resolve_paths<'a>(
    models: &'a FieldTable,
    model_name: &'a str,
    field: &'a FieldDescriptor,
    graph: &mut FieldGraph,
) -> Result<Vec<Node<'a>>, RegistryError> {
    let mut targets = Vec::new();

    for path in field.depends() {
        let segments: Vec<&str> = path.split('.').collect();
        let mut current: &str = model_name;
        let mut hops: Vec<String> = Vec::new();

        for (i, segment) in segments.iter().enumerate() {
            let (current_key, fields) = models
                .get_key_value(current)
                .ok_or_else(|| RegistryError::UnknownModel(current.to_string()))?;
            let (seg_key, step) =
                fields
                    .get_key_value(*segment)
                    .ok_or_else(|| RegistryError::UnknownField {
                        model: current.to_string(),
                        field: (*segment).to_string(),
                    })?;

            targets.push((current_key.as_str(), seg_key.as_str()));

            let dependent = Dependent {
                model: model_name.to_string(),
                field: field.name.clone(),
                path: hops.clone(),
            };
            let list = graph
                .dependents
                .entry(current.to_string())
                .or_default()
                .entry(seg_key.clone())
                .or_default();
            if !list.contains(&dependent) {
                list.push(dependent);
            }

            if i + 1 < segments.len() {
                let invalid = |reason: String| RegistryError::InvalidRelation {
                    model: model_name.to_string(),
                    field: field.name.clone(),
                    reason,
                };
                let Some(target) = step.relation.as_deref() else {
                    return Err(invalid(format!(
                        "'{segment}' in path '{path}' is not a relation"
                    )));
                };
                if field.kind() == FieldKind::Related && step.field_type != FieldType::Many2One {
                    return Err(invalid(format!(
                        "related path '{path}' may only traverse many2one fields"
                    )));
                }
                hops.push(seg_key.clone());
                current = target;
            }
        }
    }

    Ok(targets)
}

// Depth-first post-order over computed nodes; a back edge is a cycle.
fn topological_order<'a>(
    edges: &IndexMap<Node<'a>, Vec<Node<'a>>>,
) -> Result<Vec<Node<'a>>, RegistryError> {
    fn visit<'a>(
        node: Node<'a>,
        edges: &IndexMap<Node<'a>, Vec<Node<'a>>>,
        marks: &mut HashMap<Node<'a>, Mark>,
        stack: &mut Vec<Node<'a>>,
        order: &mut Vec<Node<'a>>,
    ) -> Result<(), RegistryError> {
        match marks.get(&node) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                let start = stack.iter().position(|n| *n == node).unwrap_or(0);
                let mut cycle: Vec<String> = stack[start..]
                    .iter()
                    .map(|(m, f)| format!("{m}.{f}"))
                    .collect();
                cycle.push(format!("{}.{}", node.0, node.1));

                return Err(RegistryError::CyclicFieldDependency {
                    model: node.0.to_string(),
                    field: node.1.to_string(),
                    cycle: cycle.join(" -> "),
                });
            }
            None => {}
        }

        marks.insert(node, Mark::Visiting);
        stack.push(node);

        if let Some(targets) = edges.get(&node) {
            for target in targets {
                // plain stored fields are leaves
                if edges.contains_key(target) {
                    visit(*target, edges, marks, stack, order)?;
                }
            }
        }

        stack.pop();
        marks.insert(node, Mark::Done);
        order.push(node);

        Ok(())
    }

    let mut marks = HashMap::new();
    let mut stack = Vec::new();
    let mut order = Vec::new();

    for node in edges.keys() {
        visit(*node, edges, &mut marks, &mut stack, &mut order)?;
    }

    Ok(order)
}

// Map each many2one backing a one2many to that one2many.
fn collect_inverses(models: &FieldTable, graph: &mut FieldGraph) -> Result<(), RegistryError> {
    for (model_name, fields) in models {
        for field in fields.values() {
            if field.field_type != FieldType::One2Many {
                continue;
            }

            let invalid = |reason: String| RegistryError::InvalidRelation {
                model: model_name.clone(),
                field: field.name.clone(),
                reason,
            };
            let target = field.relation.as_deref().unwrap_or_default();
            let reverse = field.reverse.as_deref().unwrap_or_default();
            let backing = models
                .get(target)
                .and_then(|t| t.get(reverse))
                .ok_or_else(|| invalid(format!("reverse field '{target}.{reverse}' not found")))?;
            if backing.field_type != FieldType::Many2One
                || backing.relation.as_deref() != Some(model_name.as_str())
            {
                return Err(invalid(format!(
                    "reverse field '{target}.{reverse}' must be a many2one to '{model_name}'"
                )));
            }

            graph
                .inverses
                .entry(target.to_string())
                .or_default()
                .entry(reverse.to_string())
                .or_default()
                .push(InverseField {
                    model: model_name.clone(),
                    field: field.name.clone(),
                });
        }
    }

    Ok(())
}
