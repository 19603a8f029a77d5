// DAG data structures shared by the structural and inference pipelines

pub mod belief;
pub mod diamond;
pub mod hierarchy;
pub mod structure;

pub use belief::{compute_beliefs, BeliefEngine, CancelToken, EngineConfig};
pub use diamond::{identify_diamonds, Diamond, DiamondKey, DiamondsAtNode};
pub use hierarchy::{build_hierarchy, DiamondComputationData, UniqueDiamondStore};
pub use structure::StructuralData;

use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeMap, BTreeSet};

/// Node identifier as it appears in the edge list
pub type NodeId = usize;

/// Ordered pair of node ids
pub type Edge = (NodeId, NodeId);

static EMPTY_SET: BTreeSet<NodeId> = BTreeSet::new();

/// Adjacency index over an edge list
///
/// The edge list keeps duplicate edges with their multiplicity; the
/// adjacency maps collapse them. Iteration over any map or set here is in
/// ascending node id, which is what makes downstream output deterministic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DagIndex {
    /// Edges in input order, duplicates preserved
    pub edgelist: Vec<Edge>,
    /// Node -> successor set
    pub outgoing: BTreeMap<NodeId, BTreeSet<NodeId>>,
    /// Node -> predecessor set
    pub incoming: BTreeMap<NodeId, BTreeSet<NodeId>>,
    /// Nodes with no predecessors
    pub sources: BTreeSet<NodeId>,
    /// Every node mentioned by the edge list
    pub nodes: BTreeSet<NodeId>,
}

impl DagIndex {
    /// Build the index from an edge list
    pub fn build(edges: Vec<Edge>) -> Self {
        let mut outgoing: BTreeMap<NodeId, BTreeSet<NodeId>> = BTreeMap::new();
        let mut incoming: BTreeMap<NodeId, BTreeSet<NodeId>> = BTreeMap::new();
        let mut nodes = BTreeSet::new();

        for &(u, v) in &edges {
            nodes.insert(u);
            nodes.insert(v);
            outgoing.entry(u).or_default().insert(v);
            incoming.entry(v).or_default().insert(u);
        }

        let sources = nodes
            .iter()
            .copied()
            .filter(|n| !incoming.contains_key(n))
            .collect();

        DagIndex {
            edgelist: edges,
            outgoing,
            incoming,
            sources,
            nodes,
        }
    }

    /// Predecessors of `v` (empty set for sources and unknown nodes)
    pub fn parents(&self, v: NodeId) -> &BTreeSet<NodeId> {
        self.incoming.get(&v).unwrap_or(&EMPTY_SET)
    }

    /// Successors of `v`
    pub fn children(&self, v: NodeId) -> &BTreeSet<NodeId> {
        self.outgoing.get(&v).unwrap_or(&EMPTY_SET)
    }

    /// Mirror the index into a petgraph graph for traversal algorithms.
    ///
    /// Returns the graph together with the node id -> index mapping;
    /// duplicate edges collapse (the adjacency maps are the authority).
    pub fn to_petgraph(&self) -> (DiGraph<NodeId, ()>, BTreeMap<NodeId, NodeIndex>) {
        let mut graph = DiGraph::new();
        let mut lookup = BTreeMap::new();
        for &n in &self.nodes {
            lookup.insert(n, graph.add_node(n));
        }
        for (&u, succs) in &self.outgoing {
            for &v in succs {
                graph.add_edge(lookup[&u], lookup[&v], ());
            }
        }
        (graph, lookup)
    }
}
