//! Diamond discovery at join nodes
//!
//! A join node whose parents re-converge from a common probabilistic fork
//! cannot be resolved by multiplying parent contributions: the parents are
//! dependent. This module carves out, per join node, the minimal ancestral
//! subgraph carrying that dependence together with the conditioning nodes
//! whose joint assignment decouples it.
//!
//! Priors participate structurally. A fork that is a source of the graph
//! under identification with a prior of exactly zero or one is
//! deterministic: its children are independent and no diamond is needed.
//! That collapse rule is what the `non_fixed` sentinel protects against
//! during sub-diamond identification (see the hierarchy builder).

use crate::dag::{DagIndex, Edge, NodeId, StructuralData};
use crate::prob::ProbValue;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, trace};

/// A conditioned subproblem at a join node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diamond {
    /// Nodes of the induced subgraph
    pub relevant_nodes: BTreeSet<NodeId>,
    /// Non-empty subset of `relevant_nodes` whose joint assignment makes
    /// the remaining structure resolvable by independent combination
    pub conditioning_nodes: BTreeSet<NodeId>,
    /// Induced edges, in outer edge-list order, multiplicity preserved
    pub edgelist: Vec<Edge>,
}

impl Diamond {
    /// Identity of the subproblem: two diamonds with equal keys are the
    /// same computation
    pub fn key(&self) -> DiamondKey {
        DiamondKey {
            relevant_nodes: self.relevant_nodes.clone(),
            conditioning_nodes: self.conditioning_nodes.clone(),
        }
    }
}

/// Interning key for the unique-diamond store
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DiamondKey {
    pub relevant_nodes: BTreeSet<NodeId>,
    pub conditioning_nodes: BTreeSet<NodeId>,
}

/// Diamond bookkeeping for one join node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiamondsAtNode {
    pub join_node: NodeId,
    pub diamond: Diamond,
    /// Predecessors of the join outside the diamond; their contributions
    /// multiply independently
    pub non_diamond_parents: BTreeSet<NodeId>,
}

/// Discover diamonds for every join node of `index`.
///
/// Returns a map from join node to its diamond; joins whose parents share
/// no probabilistic fork are absent.
pub fn identify_diamonds(
    index: &DagIndex,
    structure: &StructuralData,
    priors: &BTreeMap<NodeId, ProbValue>,
) -> BTreeMap<NodeId, DiamondsAtNode> {
    let mut result = BTreeMap::new();

    for &join in &structure.join_nodes {
        if let Some(dan) = identify_at_join(index, structure, priors, join) {
            result.insert(join, dan);
        }
    }

    debug!(joins = structure.join_nodes.len(), diamonds = result.len(), "diamond identification complete");
    result
}

fn identify_at_join(
    index: &DagIndex,
    structure: &StructuralData,
    priors: &BTreeMap<NodeId, ProbValue>,
    join: NodeId,
) -> Option<DiamondsAtNode> {
    let parents = index.parents(join);

    // Shared-ancestor fork set: forks that sit above at least two distinct
    // parents. Deterministically fixed sources cannot carry dependence.
    let shared_forks: BTreeSet<NodeId> = structure
        .fork_nodes
        .iter()
        .copied()
        .filter(|&f| !is_fixed_source(index, priors, f))
        .filter(|&f| {
            parents
                .iter()
                .filter(|&&p| structure.ancestors_of(p).contains(&f))
                .take(2)
                .count()
                >= 2
        })
        .collect();

    if shared_forks.is_empty() {
        trace!(join, "no shared probabilistic fork");
        return None;
    }

    // Merged relevant slice: every node on a fork-to-join path, for every
    // qualifying fork. Overlapping slices collapse into one diamond.
    let join_ancestors = structure.ancestors_of(join);
    let mut relevant: BTreeSet<NodeId> = BTreeSet::new();
    relevant.insert(join);
    for &f in &shared_forks {
        relevant.insert(f);
        for &v in structure.descendants_of(f) {
            if join_ancestors.contains(&v) {
                relevant.insert(v);
            }
        }
    }

    // Parent closure: an interior node's arrival signal may not be
    // truncated, so any node with one predecessor inside the slice needs
    // all of them inside. Nodes with no predecessor inside stay
    // sub-sources and keep their outer belief; their own ancestry is not
    // pulled in.
    loop {
        let mut missing: BTreeSet<NodeId> = BTreeSet::new();
        for &v in &relevant {
            if v == join {
                continue;
            }
            let preds = index.parents(v);
            if preds.iter().any(|p| relevant.contains(p)) {
                missing.extend(preds.iter().filter(|p| !relevant.contains(p)));
            }
        }
        if missing.is_empty() {
            break;
        }
        relevant.extend(missing);
    }

    let edgelist: Vec<Edge> = index
        .edgelist
        .iter()
        .copied()
        .filter(|(u, v)| relevant.contains(u) && relevant.contains(v))
        .collect();

    // Sub-sources of the induced subgraph
    let sub_sources: BTreeSet<NodeId> = relevant
        .iter()
        .copied()
        .filter(|&v| !index.parents(v).iter().any(|p| relevant.contains(p)))
        .collect();

    // Conditioning set: the highest shared forks, i.e. those that survived
    // as sub-sources. Closure can demote a fork to an interior node; if no
    // shared fork survives, fall back to sub-sources that still fork
    // inside the slice.
    let mut conditioning: BTreeSet<NodeId> = sub_sources
        .iter()
        .copied()
        .filter(|v| shared_forks.contains(v))
        .collect();
    if conditioning.is_empty() {
        conditioning = sub_sources
            .iter()
            .copied()
            .filter(|&s| index.children(s).iter().filter(|c| relevant.contains(c)).count() >= 2)
            .collect();
    }
    if conditioning.is_empty() {
        // Spurious: nothing to condition on
        trace!(join, "spurious diamond, no conditioning candidates");
        return None;
    }

    let non_diamond_parents: BTreeSet<NodeId> = parents
        .iter()
        .copied()
        .filter(|p| !relevant.contains(p))
        .collect();

    trace!(
        join,
        relevant = relevant.len(),
        conditioning = conditioning.len(),
        free_parents = non_diamond_parents.len(),
        "diamond identified"
    );

    Some(DiamondsAtNode {
        join_node: join,
        diamond: Diamond {
            relevant_nodes: relevant,
            conditioning_nodes: conditioning,
            edgelist,
        },
        non_diamond_parents,
    })
}

/// A source whose prior is exactly zero or one is deterministically fixed
fn is_fixed_source(index: &DagIndex, priors: &BTreeMap<NodeId, ProbValue>, v: NodeId) -> bool {
    index.sources.contains(&v)
        && priors
            .get(&v)
            .map(|p| p.is_zero() || p.is_one())
            .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prob::ProbKind;

    fn priors_all(index: &DagIndex, value: f64) -> BTreeMap<NodeId, ProbValue> {
        index
            .nodes
            .iter()
            .map(|&n| (n, ProbValue::scalar(value).unwrap()))
            .collect()
    }

    fn identify_all(
        edges: Vec<Edge>,
        priors: &BTreeMap<NodeId, ProbValue>,
    ) -> BTreeMap<NodeId, DiamondsAtNode> {
        let index = DagIndex::build(edges);
        let structure = StructuralData::compute(&index).unwrap();
        identify_diamonds(&index, &structure, priors)
    }

    #[test]
    fn test_diamond_with_probabilistic_fork() {
        let index = DagIndex::build(vec![(1, 2), (1, 3), (2, 4), (3, 4)]);
        let mut priors = priors_all(&index, 1.0);
        priors.insert(1, ProbValue::scalar(0.9).unwrap());

        let diamonds = identify_all(index.edgelist.clone(), &priors);

        let dan = diamonds.get(&4).expect("join 4 has a diamond");
        assert_eq!(
            dan.diamond.relevant_nodes.iter().copied().collect::<Vec<_>>(),
            vec![1, 2, 3, 4]
        );
        assert_eq!(
            dan.diamond.conditioning_nodes.iter().copied().collect::<Vec<_>>(),
            vec![1]
        );
        assert!(dan.non_diamond_parents.is_empty());
        assert_eq!(dan.diamond.edgelist.len(), 4);
    }

    #[test]
    fn test_fixed_source_fork_collapses() {
        // Same shape, but the fork is a source pinned at 1.0: its children
        // are independent and no conditioning is needed.
        let index = DagIndex::build(vec![(1, 2), (1, 3), (2, 4), (3, 4)]);
        let priors = priors_all(&index, 1.0);

        let diamonds = identify_all(index.edgelist.clone(), &priors);
        assert!(diamonds.is_empty());
    }

    #[test]
    fn test_multi_source_join_is_not_a_diamond() {
        let index = DagIndex::build(vec![(1, 3), (2, 3)]);
        let priors = priors_all(&index, 0.9);

        let diamonds = identify_all(index.edgelist.clone(), &priors);
        assert!(diamonds.is_empty());
    }

    #[test]
    fn test_interior_forks_become_conditioning() {
        // 1 -> 2, 1 -> 3, 2 -> 4, 3 -> 4, 2 -> 5, 3 -> 5, 4 -> 6, 5 -> 6
        // with the top source fixed at 1.0: forks 2 and 3 carry the
        // dependence at join 6 and both condition.
        let edges = vec![(1, 2), (1, 3), (2, 4), (3, 4), (2, 5), (3, 5), (4, 6), (5, 6)];
        let index = DagIndex::build(edges.clone());
        let priors = priors_all(&index, 1.0);

        let diamonds = identify_all(edges, &priors);

        let dan = diamonds.get(&6).expect("join 6 has a diamond");
        assert_eq!(
            dan.diamond.relevant_nodes.iter().copied().collect::<Vec<_>>(),
            vec![2, 3, 4, 5, 6]
        );
        assert_eq!(
            dan.diamond.conditioning_nodes.iter().copied().collect::<Vec<_>>(),
            vec![2, 3]
        );
        // Joins 4 and 5 re-converge only through the fixed source 1, so
        // their parents are independent and no diamond is needed there
        assert!(!diamonds.contains_key(&4));
        assert!(!diamonds.contains_key(&5));
    }

    #[test]
    fn test_extra_independent_parent_stays_outside() {
        // Diamond 1 -> {2,3} -> 4 plus an unrelated parent 5 -> 4
        let edges = vec![(1, 2), (1, 3), (2, 4), (3, 4), (5, 4)];
        let index = DagIndex::build(edges.clone());
        let mut priors = priors_all(&index, 1.0);
        priors.insert(1, ProbValue::scalar(0.9).unwrap());
        priors.insert(5, ProbValue::scalar(0.9).unwrap());

        let diamonds = identify_all(edges, &priors);

        let dan = diamonds.get(&4).expect("join 4 has a diamond");
        assert!(!dan.diamond.relevant_nodes.contains(&5));
        assert_eq!(dan.non_diamond_parents.iter().copied().collect::<Vec<_>>(), vec![5]);
    }

    #[test]
    fn test_parent_closure_pulls_side_feed() {
        // Fork 2 re-converges at 5 through 3 and 4, but 3 also hears from
        // the outside node 6. Closure must pull 6 in as a free sub-source
        // so 3's arrival signal stays complete.
        let edges = vec![(1, 2), (2, 3), (2, 4), (3, 5), (4, 5), (6, 3)];
        let index = DagIndex::build(edges.clone());
        let priors = priors_all(&index, 0.9);

        let diamonds = identify_all(edges, &priors);

        let dan = diamonds.get(&5).expect("join 5 has a diamond");
        assert!(dan.diamond.relevant_nodes.contains(&6));
        assert_eq!(
            dan.diamond.conditioning_nodes.iter().copied().collect::<Vec<_>>(),
            vec![2]
        );
    }

    #[test]
    fn test_diamond_key_equality() {
        let d1 = Diamond {
            relevant_nodes: [1, 2, 3, 4].into_iter().collect(),
            conditioning_nodes: [1].into_iter().collect(),
            edgelist: vec![(1, 2), (1, 3), (2, 4), (3, 4)],
        };
        let d2 = Diamond {
            relevant_nodes: [1, 2, 3, 4].into_iter().collect(),
            conditioning_nodes: [1].into_iter().collect(),
            edgelist: vec![(1, 3), (1, 2), (2, 4), (3, 4)],
        };
        // Keys ignore edge order
        assert_eq!(d1.key(), d2.key());
    }

    #[test]
    fn test_sentinel_prior_keeps_diamond_alive() {
        let index = DagIndex::build(vec![(1, 2), (1, 3), (2, 4), (3, 4)]);
        let mut priors = priors_all(&index, 1.0);
        priors.insert(1, ProbValue::non_fixed(ProbKind::Scalar));

        let diamonds = identify_all(index.edgelist.clone(), &priors);
        assert!(diamonds.contains_key(&4));
    }
}
