//! Error types shared across the analysis pipeline
//!
//! Every failure surfaces to the top-level engine call; there is no local
//! recovery inside the structural or inference stages. The driver prints
//! the error kind, the offending node (if any) and the phase it came from.

use crate::dag::NodeId;
use crate::prob::BeliefMap;
use thiserror::Error;

/// Failures produced by the analysis pipeline
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Malformed edge list or probability file, or a missing file
    #[error("input error: {message}")]
    Input { message: String },

    /// Probability outside [0,1] or an inverted interval
    #[error("domain error: {message}")]
    Domain { message: String },

    /// A back edge was found while building iteration sets
    #[error("graph contains a cycle ({unassigned} nodes could not be layered)")]
    CyclicGraph { unassigned: usize },

    /// Hierarchy expansion exceeded its depth limit without converging
    #[error("diamond expansion exceeded depth {depth} at join node {join_node}")]
    DiamondRecursion { join_node: NodeId, depth: usize },

    /// Arithmetic produced a value outside tolerance at a specific node
    #[error("numerical error at node {node} during {op}")]
    Numerical { node: NodeId, op: &'static str },

    /// The engine was cancelled; carries beliefs for fully-computed layers
    #[error("analysis cancelled")]
    Cancelled { partial: BeliefMap },
}

impl AnalysisError {
    /// Pipeline phase the error originated from, for driver reporting.
    /// Input and domain failures surface before structural analysis
    /// starts, so they report as preprocessing.
    pub fn phase(&self) -> &'static str {
        match self {
            AnalysisError::Input { .. } => "preprocessing",
            AnalysisError::Domain { .. } => "preprocessing",
            AnalysisError::CyclicGraph { .. } => "preprocessing",
            AnalysisError::DiamondRecursion { .. } => "hierarchy",
            AnalysisError::Numerical { .. } => "belief",
            AnalysisError::Cancelled { .. } => "belief",
        }
    }

    /// Node the error is attached to, when there is one
    pub fn node(&self) -> Option<NodeId> {
        match self {
            AnalysisError::DiamondRecursion { join_node, .. } => Some(*join_node),
            AnalysisError::Numerical { node, .. } => Some(*node),
            _ => None,
        }
    }

    pub(crate) fn input(message: impl Into<String>) -> Self {
        AnalysisError::Input { message: message.into() }
    }

    pub(crate) fn domain(message: impl Into<String>) -> Self {
        AnalysisError::Domain { message: message.into() }
    }
}

/// Convenience alias used throughout the library
pub type Result<T> = std::result::Result<T, AnalysisError>;
