// Ripple: exact reachability probabilities on probabilistic DAG networks
//
// Nodes and edges carry independent success probabilities; the engine
// returns, for every node, the exact probability that it is reached from
// the sources, resolving re-converging path dependence by conditioning.

#![allow(dead_code)]

pub mod cli;
pub mod dag;
pub mod error;
pub mod input;
pub mod output;
pub mod prob;

pub use dag::{compute_beliefs, BeliefEngine, CancelToken, DagIndex, EngineConfig, StructuralData};
pub use error::AnalysisError;
pub use prob::{BeliefMap, ProbKind, ProbValue};
