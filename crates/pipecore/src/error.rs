use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Definition error: {0}")]
    Definition(#[from] DefinitionError),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    #[error("Sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Structural problems with a submitted workflow definition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DefinitionError {
    #[error("workflow definition contains no nodes")]
    Empty,

    #[error("none of the {skipped} node(s) in the definition are valid")]
    NoValidNodes { skipped: usize },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("cyclic dependency detected: {}", format_cycles(.cycles))]
    Cycle { cycles: Vec<Vec<String>> },

    #[error("node not found: {0}")]
    UnknownNode(String),
}

fn format_cycles(cycles: &[Vec<String>]) -> String {
    cycles
        .iter()
        .map(|cycle| {
            let mut path = cycle.join(" -> ");
            if let Some(first) = cycle.first() {
                path.push_str(" -> ");
                path.push_str(first);
            }
            path
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Failures local to a single node. None of these abort a run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    #[error("missing input '{port}': upstream node '{source_node}' has no output '{source_port}' ({reason})")]
    MissingInput {
        port: String,
        source_node: String,
        source_port: String,
        reason: String,
    },

    #[error("executor failed: {0}")]
    ExecutorFailure(String),

    #[error("sandbox '{sandbox}' unreachable: {reason}")]
    SandboxUnreachable { sandbox: String, reason: String },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("executor panicked: {0}")]
    Panicked(String),
}

/// Failures reported by the sandbox runtime boundary.
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("sandbox not found: {0}")]
    NotFound(String),

    #[error("command failed: {0}")]
    Command(String),

    #[error("copy of '{path}' failed: {reason}")]
    Copy { path: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    #[error("payload of {size} bytes exceeds store limit of {limit} bytes")]
    Oversize { size: usize, limit: usize },

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("store backend error: {0}")]
    Backend(String),
}
