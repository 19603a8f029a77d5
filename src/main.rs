// Ripple: exact reachability probabilities on probabilistic DAG networks
//
// The driver loads an edge list and the two probability files for a
// network, runs the structural and inference pipeline, and prints the
// belief of every node.

use anyhow::Result;
use clap::Parser;

use ripple_analyzer::cli::{self, Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    run_command(cli)
}

fn run_command(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Belief(ref args) => cli::cmds::belief(args, &cli),
        Commands::Structure(ref args) => cli::cmds::structure(args, &cli),
        Commands::Diamonds(ref args) => cli::cmds::diamonds(args, &cli),
    }
}
