//! Crate-level error type for the command layer.
//!
//! Library modules keep their own typed errors; this enum is what commands
//! return and what `main` maps to an exit code. Every variant exits 1.

use crate::forge::ForgeError;
use crate::git::GitError;
use crate::graph::GraphError;
use crate::state::StateError;

#[derive(Debug)]
pub enum PaiError {
    /// Bad flag value (e.g. `--parallel` without a positive integer)
    Flag(String),
    Config(config::ConfigError),
    Git(GitError),
    Forge(ForgeError),
    State(StateError),
    Graph(GraphError),
    /// A dependency cycle among stacked change requests
    MergeCycle(String),
    /// Sequential scheduler halt; the pipeline already reported details
    TaskFailed { id: u64 },
    Other(String),
}

impl PaiError {
    pub fn exit_code(&self) -> i32 {
        1
    }
}

impl std::fmt::Display for PaiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaiError::Flag(msg) => write!(f, "{msg}"),
            PaiError::Config(e) => write!(f, "configuration error: {e}"),
            PaiError::Git(e) => write!(f, "{e}"),
            PaiError::Forge(e) => write!(f, "{e}"),
            PaiError::State(e) => write!(f, "{e}"),
            PaiError::Graph(e) => write!(f, "{e}"),
            PaiError::MergeCycle(msg) => write!(f, "{msg}"),
            PaiError::TaskFailed { id } => write!(f, "halting: task #{id} failed"),
            PaiError::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for PaiError {}

impl From<config::ConfigError> for PaiError {
    fn from(e: config::ConfigError) -> Self {
        PaiError::Config(e)
    }
}

impl From<GitError> for PaiError {
    fn from(e: GitError) -> Self {
        PaiError::Git(e)
    }
}

impl From<ForgeError> for PaiError {
    fn from(e: ForgeError) -> Self {
        PaiError::Forge(e)
    }
}

impl From<StateError> for PaiError {
    fn from(e: StateError) -> Self {
        PaiError::State(e)
    }
}

impl From<GraphError> for PaiError {
    fn from(e: GraphError) -> Self {
        PaiError::Graph(e)
    }
}
