//! Command implementations for the ripple CLI

use crate::cli::{BeliefArgs, Cli, DiamondsArgs, OutputFormat, StructureArgs};
use crate::dag::{
    build_hierarchy, compute_beliefs, identify_diamonds, DagIndex, EngineConfig, NodeId,
    StructuralData,
};
use crate::error::{AnalysisError, Result};
use crate::input::{self, belief_map_to_file, read_edge_list, read_link_values, read_node_values};
use crate::output::{
    self, JsonError, JsonResponse, EXIT_ERROR, EXIT_FILE_NOT_FOUND, EXIT_VALIDATION,
};
use crate::prob::{ProbKind, ProbValue};
use serde::Serialize;
use std::path::PathBuf;

/// Compute and print beliefs for every node
pub fn belief(args: &BeliefArgs, cli: &Cli) -> anyhow::Result<()> {
    let paths = resolve_paths(&args.net, cli);

    match run_belief(args, &paths) {
        Ok((beliefs, kind)) => {
            let file = belief_map_to_file(&beliefs, kind);
            match cli.output {
                OutputFormat::Human => {
                    output::header(&format!("Beliefs ({} nodes)", file.nodes.len()));
                    for (node, value) in beliefs.iter() {
                        println!("  node {node}: {}", format_value(value));
                    }
                }
                OutputFormat::Json => println!("{}", JsonResponse::new(file).to_json()),
                OutputFormat::Pretty => println!("{}", JsonResponse::new(file).to_pretty_json()),
            }
            Ok(())
        }
        Err(err) => report_and_exit(&err, cli.output),
    }
}

fn run_belief(
    args: &BeliefArgs,
    paths: &NetworkPaths,
) -> Result<(crate::prob::BeliefMap, ProbKind)> {
    let expected = args.data_type.kind();

    let edges = read_edge_list(&paths.edges)?;
    let (priors_kind, priors) = read_node_values(&paths.priors)?;
    let (links_kind, links) = read_link_values(&paths.links)?;
    check_kind("node priors", priors_kind, expected)?;
    check_kind("link probabilities", links_kind, expected)?;

    let config = EngineConfig::default()
        .with_tolerance(args.tolerance)
        .with_max_depth(args.max_depth);

    let beliefs = compute_beliefs(edges, &priors, &links, expected, config, None)?;
    Ok((beliefs, expected))
}

#[derive(Debug, Serialize)]
struct StructureReport {
    sources: Vec<NodeId>,
    iteration_sets: Vec<Vec<NodeId>>,
    fork_nodes: Vec<NodeId>,
    join_nodes: Vec<NodeId>,
}

/// Print the structural analysis of a network
pub fn structure(args: &StructureArgs, cli: &Cli) -> anyhow::Result<()> {
    let paths = resolve_paths(&args.net, cli);

    let result = (|| -> Result<StructureReport> {
        let edges = read_edge_list(&paths.edges)?;
        let index = DagIndex::build(edges);
        let structure = StructuralData::compute(&index)?;
        Ok(StructureReport {
            sources: index.sources.iter().copied().collect(),
            iteration_sets: structure
                .iteration_sets
                .iter()
                .map(|s| s.iter().copied().collect())
                .collect(),
            fork_nodes: structure.fork_nodes.iter().copied().collect(),
            join_nodes: structure.join_nodes.iter().copied().collect(),
        })
    })();

    match result {
        Ok(report) => {
            match cli.output {
                OutputFormat::Human => {
                    output::header("Network structure");
                    println!("  sources: {:?}", report.sources);
                    for (level, layer) in report.iteration_sets.iter().enumerate() {
                        println!("  layer {level}: {layer:?}");
                    }
                    println!("  fork nodes: {:?}", report.fork_nodes);
                    println!("  join nodes: {:?}", report.join_nodes);
                }
                OutputFormat::Json => println!("{}", JsonResponse::new(report).to_json()),
                OutputFormat::Pretty => {
                    println!("{}", JsonResponse::new(report).to_pretty_json())
                }
            }
            Ok(())
        }
        Err(err) => report_and_exit(&err, cli.output),
    }
}

#[derive(Debug, Serialize)]
struct DiamondReport {
    join_node: NodeId,
    relevant_nodes: Vec<NodeId>,
    conditioning_nodes: Vec<NodeId>,
    non_diamond_parents: Vec<NodeId>,
}

#[derive(Debug, Serialize)]
struct DiamondsReport {
    diamonds: Vec<DiamondReport>,
    unique_subproblems: usize,
    interned_keys: usize,
    structure_hits: usize,
    cycle_merges: usize,
}

/// Print identified diamonds and hierarchy statistics
pub fn diamonds(args: &DiamondsArgs, cli: &Cli) -> anyhow::Result<()> {
    let paths = resolve_paths(&args.net, cli);

    let result = (|| -> Result<DiamondsReport> {
        let expected = args.data_type.kind();
        let edges = read_edge_list(&paths.edges)?;
        let (priors_kind, priors) = read_node_values(&paths.priors)?;
        check_kind("node priors", priors_kind, expected)?;

        let index = DagIndex::build(edges);
        let structure = StructuralData::compute(&index)?;
        let roots = identify_diamonds(&index, &structure, &priors);
        let store = build_hierarchy(&roots, &structure, &priors, expected, args.max_depth)?;

        let stats = store.stats();
        Ok(DiamondsReport {
            diamonds: roots
                .values()
                .map(|dan| DiamondReport {
                    join_node: dan.join_node,
                    relevant_nodes: dan.diamond.relevant_nodes.iter().copied().collect(),
                    conditioning_nodes: dan.diamond.conditioning_nodes.iter().copied().collect(),
                    non_diamond_parents: dan.non_diamond_parents.iter().copied().collect(),
                })
                .collect(),
            unique_subproblems: stats.unique,
            interned_keys: store.len(),
            structure_hits: stats.structure_hits,
            cycle_merges: stats.merges,
        })
    })();

    match result {
        Ok(report) => {
            match cli.output {
                OutputFormat::Human => {
                    output::header(&format!("Diamonds ({})", report.diamonds.len()));
                    for d in &report.diamonds {
                        println!(
                            "  join {}: {} relevant, conditioning {:?}, {} free parents",
                            d.join_node,
                            d.relevant_nodes.len(),
                            d.conditioning_nodes,
                            d.non_diamond_parents.len()
                        );
                    }
                    println!(
                        "  store: {} unique subproblems, {} keys, {} cache hits, {} cycle merges",
                        report.unique_subproblems,
                        report.interned_keys,
                        report.structure_hits,
                        report.cycle_merges
                    );
                }
                OutputFormat::Json => println!("{}", JsonResponse::new(report).to_json()),
                OutputFormat::Pretty => {
                    println!("{}", JsonResponse::new(report).to_pretty_json())
                }
            }
            Ok(())
        }
        Err(err) => report_and_exit(&err, cli.output),
    }
}

struct NetworkPaths {
    edges: PathBuf,
    priors: PathBuf,
    links: PathBuf,
}

/// Resolve input files from a network name or explicit overrides
fn resolve_paths(net: &crate::cli::NetworkArgs, cli: &Cli) -> NetworkPaths {
    let conventional = net
        .network
        .as_ref()
        .map(|name| input::network_paths(std::path::Path::new(&cli.data_dir), name));

    let pick = |explicit: &Option<String>, slot: fn(&(PathBuf, PathBuf, PathBuf)) -> PathBuf| {
        explicit
            .as_ref()
            .map(PathBuf::from)
            .or_else(|| conventional.as_ref().map(slot))
    };

    let edges = pick(&net.edges, |p| p.0.clone());
    let priors = pick(&net.priors, |p| p.1.clone());
    let links = pick(&net.links, |p| p.2.clone());

    match (edges, priors, links) {
        (Some(edges), Some(priors), Some(links)) => NetworkPaths { edges, priors, links },
        _ => output::exit_usage(
            "specify --network, or the explicit --edges/--priors/--links paths",
        ),
    }
}

fn check_kind(what: &str, found: ProbKind, expected: ProbKind) -> Result<()> {
    if found == expected {
        Ok(())
    } else {
        Err(AnalysisError::input(format!(
            "{what} use data_type {:?}, --data-type expects {:?}",
            found.data_type(),
            expected.data_type()
        )))
    }
}

fn format_value(value: &ProbValue) -> String {
    match value {
        ProbValue::Scalar(x) => format!("{x:.6}"),
        ProbValue::Interval { lo, hi } => format!("[{lo:.6}, {hi:.6}]"),
        ProbValue::Pbox(p) => {
            let (ml, mh) = p.mean_bounds();
            format!("pbox mean [{ml:.6}, {mh:.6}]")
        }
    }
}

/// Print an analysis failure in the selected format and exit with the
/// matching code
fn report_and_exit(err: &AnalysisError, format: OutputFormat) -> ! {
    match format {
        OutputFormat::Human => {
            let node = err
                .node()
                .map(|n| format!(" (node {n})"))
                .unwrap_or_default();
            output::error(&format!("{err} [phase: {}]{node}", err.phase()));
        }
        OutputFormat::Json | OutputFormat::Pretty => {
            let json_err = JsonError::from_analysis(err);
            eprintln!("{}", serde_json::to_string(&json_err).unwrap_or_default());
        }
    }
    let code = match err {
        AnalysisError::Input { .. } => EXIT_FILE_NOT_FOUND,
        AnalysisError::Domain { .. } => EXIT_VALIDATION,
        _ => EXIT_ERROR,
    };
    std::process::exit(code);
}
