//! Dependency graph over parsed nodes.

use crate::parse::{parse, Edge, Node, ParsedWorkflow};
use crate::{FlowError, GraphError, WorkflowDefinition};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

/// Validated, acyclic dependency graph of one workflow run.
#[derive(Debug, Clone)]
pub struct ExecutionGraph {
    graph: DiGraph<String, String>,
    indices: HashMap<String, NodeIndex>,
    nodes: HashMap<String, Node>,
    edges: Vec<Edge>,
}

/// Build the graph, one vertex per node and one arc per edge.
///
/// Rejects the graph when it contains a cycle; every detected cycle is
/// returned for diagnostics.
pub fn build_graph(nodes: Vec<Node>, edges: Vec<Edge>) -> Result<ExecutionGraph, GraphError> {
    let mut graph = DiGraph::new();
    let mut indices = HashMap::new();

    for node in &nodes {
        let idx = graph.add_node(node.id.clone());
        indices.insert(node.id.clone(), idx);
    }

    for edge in &edges {
        let from = *indices
            .get(&edge.source)
            .ok_or_else(|| GraphError::UnknownNode(edge.source.clone()))?;
        let to = *indices
            .get(&edge.target)
            .ok_or_else(|| GraphError::UnknownNode(edge.target.clone()))?;
        graph.add_edge(from, to, edge.id.clone());
    }

    let cycles = find_cycles(&graph);
    if !cycles.is_empty() {
        return Err(GraphError::Cycle { cycles });
    }

    Ok(ExecutionGraph {
        graph,
        indices,
        nodes: nodes.into_iter().map(|n| (n.id.clone(), n)).collect(),
        edges,
    })
}

/// Every strongly connected component that forms a cycle, each rendered as a
/// walkable path starting at its earliest-declared node.
fn find_cycles(graph: &DiGraph<String, String>) -> Vec<Vec<String>> {
    let mut cycles: Vec<Vec<String>> = tarjan_scc(graph)
        .into_iter()
        .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
        .map(|scc| {
            cycle_path(graph, &scc)
                .into_iter()
                .map(|idx| graph[idx].clone())
                .collect()
        })
        .collect();
    cycles.sort();
    cycles
}

fn cycle_path(graph: &DiGraph<String, String>, scc: &[NodeIndex]) -> Vec<NodeIndex> {
    let members: HashSet<NodeIndex> = scc.iter().copied().collect();
    let Some(&start) = scc.iter().min_by_key(|idx| idx.index()) else {
        return Vec::new();
    };

    // Depth-first walk inside the component until we step back onto `start`.
    let mut path = vec![start];
    let mut visited = HashSet::from([start]);
    let mut stack = vec![graph.neighbors_directed(start, Direction::Outgoing).collect::<Vec<_>>()];

    while let Some(frontier) = stack.last_mut() {
        let Some(next) = frontier.pop() else {
            stack.pop();
            path.pop();
            continue;
        };
        if next == start {
            return path;
        }
        if members.contains(&next) && visited.insert(next) {
            path.push(next);
            stack.push(graph.neighbors_directed(next, Direction::Outgoing).collect());
        }
    }

    // Unreachable for a genuine component; fall back to the raw member list.
    let mut fallback = scc.to_vec();
    fallback.sort_by_key(|idx| idx.index());
    fallback
}

impl ExecutionGraph {
    /// Deterministic topological order (Kahn's algorithm).
    ///
    /// Independent nodes come out in declaration order.
    pub fn topological_order(&self) -> Result<Vec<String>, GraphError> {
        let mut in_degree: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|idx| (idx, self.graph.neighbors_directed(idx, Direction::Incoming).count()))
            .collect();

        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(idx, _)| Reverse(idx.index()))
            .collect();

        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some(Reverse(raw)) = ready.pop() {
            let idx = NodeIndex::new(raw);
            order.push(self.graph[idx].clone());

            for next in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                if let Some(degree) = in_degree.get_mut(&next) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(Reverse(next.index()));
                    }
                }
            }
        }

        if order.len() != self.graph.node_count() {
            return Err(GraphError::Cycle {
                cycles: find_cycles(&self.graph),
            });
        }
        Ok(order)
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Nodes with an arc into `id`.
    pub fn upstream(&self, id: &str) -> Vec<&str> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Nodes with an arc out of `id`.
    pub fn downstream(&self, id: &str) -> Vec<&str> {
        self.neighbors(id, Direction::Outgoing)
    }

    fn neighbors(&self, id: &str, direction: Direction) -> Vec<&str> {
        let Some(&idx) = self.indices.get(id) else {
            return Vec::new();
        };
        let mut out: Vec<&str> = self
            .graph
            .neighbors_directed(idx, direction)
            .map(|n| self.graph[n].as_str())
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }
}

/// Outcome of a dry validation pass.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub warnings: Vec<String>,
    pub order: Vec<String>,
}

/// Parse, build and order a definition without running anything.
pub fn validate(definition: &WorkflowDefinition) -> Result<ValidationReport, FlowError> {
    let ParsedWorkflow {
        nodes,
        edges,
        warnings,
    } = parse(definition)?;
    let graph = build_graph(nodes, edges)?;
    let order = graph.topological_order()?;
    Ok(ValidationReport { warnings, order })
}
