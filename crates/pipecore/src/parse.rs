//! Turns a raw [`WorkflowDefinition`] into typed nodes and edges.

use crate::{DefinitionError, Value, WorkflowDefinition};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Output handle assumed when an edge does not name one.
pub const DEFAULT_SOURCE_HANDLE: &str = "output";
/// Input handle assumed when an edge does not name one.
pub const DEFAULT_TARGET_HANDLE: &str = "input";

/// Component id used when a node names neither a component id nor a type.
pub const SCRIPT_COMPONENT_ID: &str = "script";

/// Reference to a port on another node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortRef {
    pub node_id: String,
    pub handle: String,
}

impl PortRef {
    pub fn new(node_id: impl Into<String>, handle: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            handle: handle.into(),
        }
    }
}

impl std::fmt::Display for PortRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.node_id, self.handle)
    }
}

/// A validated node.
///
/// `inputs` maps each fed input handle to its single producer; `outputs`
/// maps each consumed output handle to every consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub component_id: String,
    pub component_type: String,
    pub parameters: HashMap<String, Value>,
    pub inputs: BTreeMap<String, PortRef>,
    pub outputs: BTreeMap<String, Vec<PortRef>>,
}

impl Node {
    pub fn new(
        id: impl Into<String>,
        component_id: impl Into<String>,
        component_type: impl Into<String>,
        parameters: HashMap<String, Value>,
    ) -> Self {
        Self {
            id: id.into(),
            component_id: component_id.into(),
            component_type: component_type.into(),
            parameters,
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub source_handle: String,
    pub target: String,
    pub target_handle: String,
}

/// Result of [`parse`]: the usable items plus one warning per skipped item.
#[derive(Debug, Clone)]
pub struct ParsedWorkflow {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub warnings: Vec<String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn skip(warnings: &mut Vec<String>, message: String) {
    tracing::warn!("{}", message);
    warnings.push(message);
}

/// Parse a definition into nodes and edges.
///
/// Malformed items are skipped with a warning. Only a definition that yields
/// no usable node at all is rejected.
pub fn parse(definition: &WorkflowDefinition) -> Result<ParsedWorkflow, DefinitionError> {
    if definition.nodes.is_empty() {
        return Err(DefinitionError::Empty);
    }

    let mut warnings = Vec::new();
    let mut nodes: Vec<Node> = Vec::with_capacity(definition.nodes.len());
    let mut positions: HashMap<String, usize> = HashMap::new();

    for (i, spec) in definition.nodes.iter().enumerate() {
        let Some(id) = non_empty(&spec.id) else {
            skip(&mut warnings, format!("node #{} has no id; skipped", i));
            continue;
        };
        if positions.contains_key(id) {
            skip(&mut warnings, format!("duplicate node id '{}'; later occurrence skipped", id));
            continue;
        }

        let component_type = non_empty(&spec.component_type).unwrap_or_default().to_string();
        let component_id = non_empty(&spec.component_id)
            .map(str::to_string)
            .unwrap_or_else(|| {
                if component_type.is_empty() {
                    SCRIPT_COMPONENT_ID.to_string()
                } else {
                    component_type.clone()
                }
            });

        positions.insert(id.to_string(), nodes.len());
        nodes.push(Node::new(id, component_id, component_type, spec.parameters.clone()));
    }

    if nodes.is_empty() {
        return Err(DefinitionError::NoValidNodes {
            skipped: definition.nodes.len(),
        });
    }

    let mut edges = Vec::with_capacity(definition.edges.len());
    for (i, spec) in definition.edges.iter().enumerate() {
        let edge_id = non_empty(&spec.id)
            .map(str::to_string)
            .unwrap_or_else(|| format!("edge-{}", i));

        let (Some(source), Some(target)) = (non_empty(&spec.source), non_empty(&spec.target)) else {
            skip(&mut warnings, format!("edge '{}' is missing an endpoint; skipped", edge_id));
            continue;
        };
        let Some(&source_pos) = positions.get(source) else {
            skip(&mut warnings, format!("edge '{}' references unknown source node '{}'; skipped", edge_id, source));
            continue;
        };
        let Some(&target_pos) = positions.get(target) else {
            skip(&mut warnings, format!("edge '{}' references unknown target node '{}'; skipped", edge_id, target));
            continue;
        };

        let source_handle = non_empty(&spec.source_handle).unwrap_or(DEFAULT_SOURCE_HANDLE).to_string();
        let target_handle = non_empty(&spec.target_handle).unwrap_or(DEFAULT_TARGET_HANDLE).to_string();

        if let Some(existing) = nodes[target_pos].inputs.get(&target_handle) {
            skip(
                &mut warnings,
                format!(
                    "edge '{}' feeds input '{}.{}' which is already fed by {}; skipped",
                    edge_id, target, target_handle, existing
                ),
            );
            continue;
        }

        nodes[target_pos]
            .inputs
            .insert(target_handle.clone(), PortRef::new(source, source_handle.clone()));
        nodes[source_pos]
            .outputs
            .entry(source_handle.clone())
            .or_default()
            .push(PortRef::new(target, target_handle.clone()));

        edges.push(Edge {
            id: edge_id,
            source: source.to_string(),
            source_handle,
            target: target.to_string(),
            target_handle,
        });
    }

    Ok(ParsedWorkflow { nodes, edges, warnings })
}
