//! File formats the pipeline consumes and produces
//!
//! Three files describe a network: a text edge list, a node-priors JSON
//! document and an edge-probabilities JSON document. Belief output reuses
//! the node-priors schema so results can be fed back through the same
//! parser.

pub mod edges;
pub mod values;

pub use edges::{parse_edge_list, read_edge_list};
pub use values::{
    belief_map_to_file, parse_link_values, parse_node_values, read_link_values, read_node_values,
    NodeValuesFile,
};

use std::path::{Path, PathBuf};

/// Conventional on-disk layout for a named network:
/// `<dir>/<name>/<name>.edges` plus the two probability files
pub fn network_paths(data_dir: &Path, network: &str) -> (PathBuf, PathBuf, PathBuf) {
    let base = data_dir.join(network);
    (
        base.join(format!("{network}.edges")),
        base.join(format!("{network}-nodepriors.json")),
        base.join(format!("{network}-linkprobs.json")),
    )
}
