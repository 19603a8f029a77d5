//! Structural preprocessing of the network DAG
//!
//! Produces the layered iteration sets the belief sweep walks, the
//! ancestor/descendant closures the diamond identifier queries, and the
//! fork/join classification. This is also where cycles are rejected:
//! layering a cyclic graph leaves nodes unassigned.

use crate::dag::{DagIndex, NodeId};
use crate::error::{AnalysisError, Result};
use petgraph::visit::{Dfs, Reversed};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

static EMPTY_SET: BTreeSet<NodeId> = BTreeSet::new();

/// Topological layering and reachability closures for a DAG
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuralData {
    /// Disjoint layers S0, S1, ... with S0 = sources and level(u) < level(v)
    /// for every edge (u, v)
    pub iteration_sets: Vec<BTreeSet<NodeId>>,
    /// Nodes with a directed path to v, excluding v
    pub ancestors: BTreeMap<NodeId, BTreeSet<NodeId>>,
    /// Nodes reachable from v, excluding v
    pub descendants: BTreeMap<NodeId, BTreeSet<NodeId>>,
    /// Nodes with two or more successors
    pub fork_nodes: BTreeSet<NodeId>,
    /// Nodes with two or more predecessors
    pub join_nodes: BTreeSet<NodeId>,
}

impl StructuralData {
    /// Compute layering, closures and classification for `index`
    pub fn compute(index: &DagIndex) -> Result<Self> {
        let iteration_sets = compute_iteration_sets(index)?;
        let (ancestors, descendants) = compute_closures(index);

        let fork_nodes = index
            .nodes
            .iter()
            .copied()
            .filter(|&n| index.children(n).len() >= 2)
            .collect();
        let join_nodes = index
            .nodes
            .iter()
            .copied()
            .filter(|&n| index.parents(n).len() >= 2)
            .collect();

        debug!(
            layers = iteration_sets.len(),
            nodes = index.nodes.len(),
            "structural analysis complete"
        );

        Ok(StructuralData {
            iteration_sets,
            ancestors,
            descendants,
            fork_nodes,
            join_nodes,
        })
    }

    /// Ancestors of `v` (empty for sources and unknown nodes)
    pub fn ancestors_of(&self, v: NodeId) -> &BTreeSet<NodeId> {
        self.ancestors.get(&v).unwrap_or(&EMPTY_SET)
    }

    /// Descendants of `v`
    pub fn descendants_of(&self, v: NodeId) -> &BTreeSet<NodeId> {
        self.descendants.get(&v).unwrap_or(&EMPTY_SET)
    }

    /// Layer index of `v`, if assigned
    pub fn level_of(&self, v: NodeId) -> Option<usize> {
        self.iteration_sets.iter().position(|s| s.contains(&v))
    }
}

/// Kahn-style layered topological sort.
///
/// The first layer is the source set; each next layer is every unassigned
/// node whose predecessors are all in earlier layers. Nodes left over when
/// no layer can be produced sit on a cycle.
fn compute_iteration_sets(index: &DagIndex) -> Result<Vec<BTreeSet<NodeId>>> {
    if index.nodes.is_empty() {
        return Ok(vec![]);
    }
    if index.sources.is_empty() {
        // Every node has a predecessor: the whole graph is cyclic
        return Err(AnalysisError::CyclicGraph { unassigned: index.nodes.len() });
    }

    let mut assigned: BTreeSet<NodeId> = index.sources.clone();
    let mut sets = vec![index.sources.clone()];

    loop {
        let next: BTreeSet<NodeId> = index
            .nodes
            .iter()
            .copied()
            .filter(|n| !assigned.contains(n))
            .filter(|&n| index.parents(n).iter().all(|p| assigned.contains(p)))
            .collect();

        if next.is_empty() {
            break;
        }
        assigned.extend(next.iter().copied());
        sets.push(next);
    }

    let unassigned = index.nodes.len() - assigned.len();
    if unassigned > 0 {
        return Err(AnalysisError::CyclicGraph { unassigned });
    }
    Ok(sets)
}

/// Forward/backward reachability closures via DFS on the petgraph mirror
fn compute_closures(
    index: &DagIndex,
) -> (
    BTreeMap<NodeId, BTreeSet<NodeId>>,
    BTreeMap<NodeId, BTreeSet<NodeId>>,
) {
    let (graph, lookup) = index.to_petgraph();
    let mut ancestors: BTreeMap<NodeId, BTreeSet<NodeId>> = BTreeMap::new();
    let mut descendants: BTreeMap<NodeId, BTreeSet<NodeId>> = BTreeMap::new();

    for &n in &index.nodes {
        let start = lookup[&n];

        let mut down = BTreeSet::new();
        let mut dfs = Dfs::new(&graph, start);
        while let Some(node) = dfs.next(&graph) {
            if node != start {
                down.insert(graph[node]);
            }
        }

        let reversed = Reversed(&graph);
        let mut up = BTreeSet::new();
        let mut dfs = Dfs::new(reversed, start);
        while let Some(node) = dfs.next(reversed) {
            if node != start {
                up.insert(graph[node]);
            }
        }

        descendants.insert(n, down);
        ancestors.insert(n, up);
    }

    (ancestors, descendants)
}
