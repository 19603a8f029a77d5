// CLI command definitions for the ripple driver

use clap::{Parser, Subcommand, ValueEnum};

use crate::prob::ProbKind;

pub mod cmds;

/// Ripple - exact reachability probabilities on DAG networks
///
/// Computes, for every node of a directed acyclic network whose nodes and
/// edges carry independent success probabilities, the exact probability
/// that the node is reached from the sources. Joins fed by re-converging
/// paths are resolved by conditioning instead of an independence
/// assumption.
#[derive(Parser, Debug, Clone)]
#[command(name = "ripple")]
#[command(author, version, about)]
pub struct Cli {
    /// Directory holding named networks under the conventional layout
    /// (<dir>/<name>/<name>.edges plus the two probability files)
    #[arg(global = true, long, env = "RIPPLE_DATA_DIR", default_value = ".")]
    pub data_dir: String,

    /// Output format
    #[arg(global = true, long, value_enum, default_value_t = OutputFormat::Human)]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format options
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text output
    Human,
    /// Compact JSON for programmatic consumption
    Json,
    /// Formatted JSON with indentation
    Pretty,
}

/// Probability backend selector
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    /// Plain floating point probabilities
    Float,
    /// Interval bounds
    Interval,
    /// Probability boxes
    Pbox,
}

impl DataType {
    pub fn kind(&self) -> ProbKind {
        match self {
            DataType::Float => ProbKind::Scalar,
            DataType::Interval => ProbKind::Interval,
            DataType::Pbox => ProbKind::Pbox,
        }
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Compute reachability beliefs for every node
    Belief(BeliefArgs),

    /// Show iteration sets, sources and fork/join classification
    Structure(StructureArgs),

    /// Show identified diamonds and unique-store statistics
    Diamonds(DiamondsArgs),
}

/// Input selection shared by all commands: a named network under the data
/// directory, or explicit file paths
#[derive(Parser, Debug, Clone)]
pub struct NetworkArgs {
    /// Network name under the data directory
    #[arg(long)]
    pub network: Option<String>,

    /// Explicit edge-list path (overrides --network)
    #[arg(long)]
    pub edges: Option<String>,

    /// Explicit node-priors path (overrides --network)
    #[arg(long)]
    pub priors: Option<String>,

    /// Explicit link-probabilities path (overrides --network)
    #[arg(long)]
    pub links: Option<String>,
}

#[derive(Parser, Debug, Clone)]
pub struct BeliefArgs {
    #[command(flatten)]
    pub net: NetworkArgs,

    /// Probability backend the input files must use
    #[arg(long, value_enum, default_value_t = DataType::Float)]
    pub data_type: DataType,

    /// Allowed numerical excursion outside [0,1]
    #[arg(long, default_value_t = 1e-9)]
    pub tolerance: f64,

    /// Maximum diamond nesting depth
    #[arg(long, default_value_t = 256)]
    pub max_depth: usize,
}

#[derive(Parser, Debug, Clone)]
pub struct StructureArgs {
    #[command(flatten)]
    pub net: NetworkArgs,
}

#[derive(Parser, Debug, Clone)]
pub struct DiamondsArgs {
    #[command(flatten)]
    pub net: NetworkArgs,

    /// Probability backend the input files must use
    #[arg(long, value_enum, default_value_t = DataType::Float)]
    pub data_type: DataType,

    /// Maximum diamond nesting depth
    #[arg(long, default_value_t = 256)]
    pub max_depth: usize,
}
