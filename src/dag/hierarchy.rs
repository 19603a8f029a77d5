//! Recursive expansion of diamonds into a unique-diamond store
//!
//! Every diamond the engine can ever need, including diamonds nested
//! inside other diamonds, is expanded once, keyed by its structural
//! identity, and shared from then on. Expansion recurses depth-first;
//! two caches keep it terminating when subgraph patterns alternate or
//! repeat:
//!
//! - a structure cache keyed by a canonical signature of the diamond
//!   (hit: reuse, skip expansion);
//! - an alternating-cycle cache keyed by the relevant-node set (second
//!   encounter with a different conditioning set: union the conditioning
//!   sets into one over-conditioned entry with no inner structure).

use crate::dag::diamond::{identify_diamonds, Diamond, DiamondKey, DiamondsAtNode};
use crate::dag::{DagIndex, NodeId, StructuralData};
use crate::error::{AnalysisError, Result};
use crate::prob::{ProbKind, ProbValue};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use tracing::{debug, trace};

/// Everything the engine needs to run a diamond as a standalone problem
#[derive(Debug)]
pub struct DiamondComputationData {
    pub join_node: NodeId,
    pub diamond: Diamond,
    /// Adjacency of the induced subgraph
    pub sub_index: DagIndex,
    /// Outer structure restricted to the relevant nodes; fork/join
    /// reclassified from the induced fan-out/fan-in
    pub sub_structure: StructuralData,
    /// Synthesized priors used only while identifying inner diamonds.
    /// The engine substitutes real values at run time.
    pub sub_priors: BTreeMap<NodeId, ProbValue>,
    /// Inner diamonds of this subgraph
    pub sub_diamonds: BTreeMap<NodeId, DiamondsAtNode>,
}

/// Expansion statistics, surfaced by the CLI
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Distinct expanded entries
    pub unique: usize,
    /// Structure-cache hits during the build
    pub structure_hits: usize,
    /// Alternating-cycle merges during the build
    pub merges: usize,
}

/// Interned mapping from diamond key to computation data.
///
/// Alternating-cycle merges alias several keys to one merged entry, so a
/// lookup by any key that was ever identified always resolves.
#[derive(Debug)]
pub struct UniqueDiamondStore {
    entries: BTreeMap<DiamondKey, Arc<DiamondComputationData>>,
    stats: StoreStats,
}

impl UniqueDiamondStore {
    pub fn get(&self, key: &DiamondKey) -> Option<&Arc<DiamondComputationData>> {
        self.entries.get(key)
    }

    /// All interned keys, aliases included, in sorted order
    pub fn keys(&self) -> impl Iterator<Item = &DiamondKey> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> StoreStats {
        self.stats
    }
}

/// What the cache knows about a diamond before expansion
pub enum CacheDecision {
    /// Structurally identical diamond already expanded
    Hit(Arc<DiamondComputationData>),
    /// Same relevant nodes seen with a different conditioning set; expand
    /// once with the unioned conditioning and no inner structure
    Merge(BTreeSet<NodeId>),
    /// Never seen
    Expand,
}

/// Cache interface of the hierarchy builder.
///
/// Kept behind a trait so sibling expansion can move onto a worker pool
/// without touching the builder; implementations must be safe under
/// concurrent lookup/insert.
pub trait ExpansionCache: Send + Sync {
    fn lookup(&self, diamond: &Diamond) -> CacheDecision;
    fn insert_or_merge(&self, diamond: &Diamond, data: &Arc<DiamondComputationData>);
}

/// Mutex-protected in-memory cache (read-mostly, occasional insert)
#[derive(Default)]
pub struct InMemoryCache {
    by_signature: Mutex<HashMap<blake3::Hash, Arc<DiamondComputationData>>>,
    by_relevant: Mutex<HashMap<BTreeSet<NodeId>, BTreeSet<NodeId>>>,
}

impl ExpansionCache for InMemoryCache {
    fn lookup(&self, diamond: &Diamond) -> CacheDecision {
        let sig = structure_signature(diamond);
        if let Some(data) = self.by_signature.lock().unwrap().get(&sig) {
            return CacheDecision::Hit(Arc::clone(data));
        }
        if let Some(seen) = self.by_relevant.lock().unwrap().get(&diamond.relevant_nodes) {
            if *seen != diamond.conditioning_nodes {
                let merged: BTreeSet<NodeId> =
                    seen.union(&diamond.conditioning_nodes).copied().collect();
                return CacheDecision::Merge(merged);
            }
        }
        CacheDecision::Expand
    }

    fn insert_or_merge(&self, diamond: &Diamond, data: &Arc<DiamondComputationData>) {
        self.by_signature
            .lock()
            .unwrap()
            .insert(structure_signature(diamond), Arc::clone(data));
        self.by_relevant
            .lock()
            .unwrap()
            .entry(diamond.relevant_nodes.clone())
            .and_modify(|seen| seen.extend(diamond.conditioning_nodes.iter().copied()))
            .or_insert_with(|| diamond.conditioning_nodes.clone());
    }
}

/// Canonical signature over (sorted edge list, relevant nodes,
/// conditioning nodes). Length prefixes keep distinct shapes from
/// colliding.
fn structure_signature(diamond: &Diamond) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();

    let mut edges = diamond.edgelist.clone();
    edges.sort_unstable();
    hasher.update(&edges.len().to_le_bytes());
    for (u, v) in edges {
        hasher.update(&u.to_le_bytes());
        hasher.update(&v.to_le_bytes());
    }

    hasher.update(&diamond.relevant_nodes.len().to_le_bytes());
    for &n in &diamond.relevant_nodes {
        hasher.update(&n.to_le_bytes());
    }

    hasher.update(&diamond.conditioning_nodes.len().to_le_bytes());
    for &n in &diamond.conditioning_nodes {
        hasher.update(&n.to_le_bytes());
    }

    hasher.finalize()
}

/// Expand every diamond reachable from `root_diamonds` into a unique
/// store. `structure` and `priors` are the outer graph's; `max_depth`
/// bounds nesting (a breach means a cycle pattern the caches failed to
/// resolve).
pub fn build_hierarchy(
    root_diamonds: &BTreeMap<NodeId, DiamondsAtNode>,
    structure: &StructuralData,
    priors: &BTreeMap<NodeId, ProbValue>,
    kind: ProbKind,
    max_depth: usize,
) -> Result<UniqueDiamondStore> {
    let mut expansion = Expansion {
        outer_priors: priors,
        kind,
        max_depth,
        cache: InMemoryCache::default(),
        entries: BTreeMap::new(),
        stats: StoreStats::default(),
    };

    for dan in root_diamonds.values() {
        expansion.expand(dan, structure, 0)?;
    }

    let mut seen = Vec::new();
    for data in expansion.entries.values() {
        if !seen.iter().any(|s| Arc::ptr_eq(s, data)) {
            seen.push(Arc::clone(data));
        }
    }
    expansion.stats.unique = seen.len();

    debug!(
        unique = expansion.stats.unique,
        aliases = expansion.entries.len() - expansion.stats.unique,
        hits = expansion.stats.structure_hits,
        merges = expansion.stats.merges,
        "diamond hierarchy built"
    );

    Ok(UniqueDiamondStore {
        entries: expansion.entries,
        stats: expansion.stats,
    })
}

struct Expansion<'a> {
    outer_priors: &'a BTreeMap<NodeId, ProbValue>,
    kind: ProbKind,
    max_depth: usize,
    cache: InMemoryCache,
    entries: BTreeMap<DiamondKey, Arc<DiamondComputationData>>,
    stats: StoreStats,
}

impl Expansion<'_> {
    fn expand(
        &mut self,
        dan: &DiamondsAtNode,
        enclosing: &StructuralData,
        depth: usize,
    ) -> Result<()> {
        if depth > self.max_depth {
            return Err(AnalysisError::DiamondRecursion {
                join_node: dan.join_node,
                depth,
            });
        }

        let key = dan.diamond.key();
        if self.entries.contains_key(&key) {
            return Ok(());
        }

        match self.cache.lookup(&dan.diamond) {
            CacheDecision::Hit(data) => {
                trace!(join = dan.join_node, "structure cache hit");
                self.stats.structure_hits += 1;
                self.entries.insert(key, data);
                Ok(())
            }
            CacheDecision::Merge(merged_conditioning) => {
                trace!(join = dan.join_node, "alternating cycle, merging conditioning sets");
                self.stats.merges += 1;
                let merged = Diamond {
                    relevant_nodes: dan.diamond.relevant_nodes.clone(),
                    conditioning_nodes: merged_conditioning,
                    edgelist: dan.diamond.edgelist.clone(),
                };
                let data = Arc::new(self.materialize(dan.join_node, &merged, enclosing, true));
                self.cache.insert_or_merge(&merged, &data);
                self.entries.insert(merged.key(), Arc::clone(&data));
                self.entries.insert(key, data);
                Ok(())
            }
            CacheDecision::Expand => {
                let data =
                    Arc::new(self.materialize(dan.join_node, &dan.diamond, enclosing, false));
                self.cache.insert_or_merge(&dan.diamond, &data);
                self.entries.insert(key, Arc::clone(&data));

                for inner in data.sub_diamonds.values() {
                    self.expand(inner, &data.sub_structure, depth + 1)?;
                }
                Ok(())
            }
        }
    }

    /// Build the induced sub-structures for one diamond.
    ///
    /// `suppress_inner` is set for merged cycle entries: over-conditioning
    /// stands in for the inner structure there.
    fn materialize(
        &self,
        join: NodeId,
        diamond: &Diamond,
        enclosing: &StructuralData,
        suppress_inner: bool,
    ) -> DiamondComputationData {
        let sub_index = DagIndex::build(diamond.edgelist.clone());
        let sub_structure = restrict_structure(enclosing, &sub_index, &diamond.relevant_nodes);
        let sub_priors = self.synthesize_priors(join, diamond, &sub_index);

        let sub_diamonds = if suppress_inner {
            BTreeMap::new()
        } else {
            let mut inner = identify_diamonds(&sub_index, &sub_structure, &sub_priors);
            // Drop trivial self-references
            inner.retain(|_, d| {
                !(d.diamond.relevant_nodes == diamond.relevant_nodes
                    && d.diamond.edgelist == diamond.edgelist)
            });
            inner
        };

        DiamondComputationData {
            join_node: join,
            diamond: diamond.clone(),
            sub_index,
            sub_structure,
            sub_priors,
            sub_diamonds,
        }
    }

    /// Priors used during inner identification only.
    ///
    /// Conditioning sub-sources are fixed in every enumeration branch, so
    /// they get `one` and collapse diamonds rooted only at them. Free
    /// sub-sources get the `non_fixed` sentinel so a real outer prior of
    /// exactly 0 or 1 cannot collapse a diamond the engine still needs.
    fn synthesize_priors(
        &self,
        join: NodeId,
        diamond: &Diamond,
        sub_index: &DagIndex,
    ) -> BTreeMap<NodeId, ProbValue> {
        let mut priors = BTreeMap::new();
        for &v in &sub_index.nodes {
            let prior = if v == join {
                ProbValue::one(self.kind)
            } else if sub_index.sources.contains(&v) {
                if diamond.conditioning_nodes.contains(&v) {
                    ProbValue::one(self.kind)
                } else {
                    ProbValue::non_fixed(self.kind)
                }
            } else {
                self.outer_priors
                    .get(&v)
                    .cloned()
                    .unwrap_or_else(|| ProbValue::non_fixed(self.kind))
            };
            priors.insert(v, prior);
        }
        priors
    }
}

/// Restrict the enclosing structure to the induced subgraph
fn restrict_structure(
    enclosing: &StructuralData,
    sub_index: &DagIndex,
    relevant: &BTreeSet<NodeId>,
) -> StructuralData {
    let iteration_sets: Vec<BTreeSet<NodeId>> = enclosing
        .iteration_sets
        .iter()
        .map(|s| s.intersection(relevant).copied().collect::<BTreeSet<NodeId>>())
        .filter(|s| !s.is_empty())
        .collect();

    let mut ancestors = BTreeMap::new();
    let mut descendants = BTreeMap::new();
    for &v in &sub_index.nodes {
        ancestors.insert(
            v,
            enclosing
                .ancestors_of(v)
                .intersection(relevant)
                .copied()
                .collect::<BTreeSet<NodeId>>(),
        );
        descendants.insert(
            v,
            enclosing
                .descendants_of(v)
                .intersection(relevant)
                .copied()
                .collect::<BTreeSet<NodeId>>(),
        );
    }

    let fork_nodes = sub_index
        .nodes
        .iter()
        .copied()
        .filter(|&n| sub_index.children(n).len() >= 2)
        .collect();
    let join_nodes = sub_index
        .nodes
        .iter()
        .copied()
        .filter(|&n| sub_index.parents(n).len() >= 2)
        .collect();

    StructuralData {
        iteration_sets,
        ancestors,
        descendants,
        fork_nodes,
        join_nodes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::Edge;

    fn scalar_priors(pairs: &[(NodeId, f64)]) -> BTreeMap<NodeId, ProbValue> {
        pairs
            .iter()
            .map(|&(n, p)| (n, ProbValue::scalar(p).unwrap()))
            .collect()
    }

    fn hierarchy_for(
        edges: Vec<Edge>,
        priors: &BTreeMap<NodeId, ProbValue>,
    ) -> (BTreeMap<NodeId, DiamondsAtNode>, UniqueDiamondStore) {
        let index = DagIndex::build(edges);
        let structure = StructuralData::compute(&index).unwrap();
        let roots = identify_diamonds(&index, &structure, priors);
        let store = build_hierarchy(&roots, &structure, priors, ProbKind::Scalar, 256).unwrap();
        (roots, store)
    }

    #[test]
    fn test_single_diamond_has_no_inner_structure() {
        let priors = scalar_priors(&[(1, 0.9), (2, 1.0), (3, 1.0), (4, 1.0)]);
        let (roots, store) = hierarchy_for(vec![(1, 2), (1, 3), (2, 4), (3, 4)], &priors);

        let dan = &roots[&4];
        let data = store.get(&dan.diamond.key()).expect("interned");
        assert!(data.sub_diamonds.is_empty());
        assert_eq!(data.sub_index.sources.iter().copied().collect::<Vec<_>>(), vec![1]);
        // Conditioning source identified with prior one
        assert!(data.sub_priors[&1].is_one());
        // Join treated as certain inside the subproblem
        assert!(data.sub_priors[&4].is_one());
    }

    #[test]
    fn test_nested_diamond_expansion() {
        // 1 -> {2,3}, {2,3} -> 4, {2,3} -> 5, {4,5} -> 6 with every prior
        // probabilistic: the join-6 diamond conditions on 1 and contains
        // an inner diamond conditioning on {2,3}.
        let edges = vec![(1, 2), (1, 3), (2, 4), (3, 4), (2, 5), (3, 5), (4, 6), (5, 6)];
        let priors = scalar_priors(&[
            (1, 0.9),
            (2, 0.9),
            (3, 0.9),
            (4, 0.9),
            (5, 0.9),
            (6, 0.9),
        ]);
        let (roots, store) = hierarchy_for(edges, &priors);

        assert_eq!(roots.keys().copied().collect::<Vec<_>>(), vec![4, 5, 6]);

        let outer = store.get(&roots[&6].diamond.key()).expect("interned");
        assert_eq!(
            outer.diamond.conditioning_nodes.iter().copied().collect::<Vec<_>>(),
            vec![1]
        );

        // With the fork 1 pinned during identification, the dependence at
        // 6 re-surfaces through forks 2 and 3
        let inner = outer.sub_diamonds.get(&6).expect("inner diamond at 6");
        assert_eq!(
            inner.diamond.conditioning_nodes.iter().copied().collect::<Vec<_>>(),
            vec![2, 3]
        );
        assert!(store.get(&inner.diamond.key()).is_some());

        // Inner-most level is a leaf
        let inner_data = store.get(&inner.diamond.key()).unwrap();
        assert!(inner_data.sub_diamonds.is_empty());
    }

    #[test]
    fn test_store_idempotence() {
        let edges = vec![(1, 2), (1, 3), (2, 4), (3, 4), (2, 5), (3, 5), (4, 6), (5, 6)];
        let priors = scalar_priors(&[
            (1, 0.9),
            (2, 0.9),
            (3, 0.9),
            (4, 0.9),
            (5, 0.9),
            (6, 0.9),
        ]);
        let (_, store_a) = hierarchy_for(edges.clone(), &priors);
        let (_, store_b) = hierarchy_for(edges, &priors);

        let keys_a: Vec<_> = store_a.keys().cloned().collect();
        let keys_b: Vec<_> = store_b.keys().cloned().collect();
        assert_eq!(keys_a, keys_b);
    }

    #[test]
    fn test_iteration_sets_restricted_in_order() {
        let priors = scalar_priors(&[(1, 0.9), (2, 1.0), (3, 1.0), (4, 1.0)]);
        let (roots, store) = hierarchy_for(vec![(1, 2), (1, 3), (2, 4), (3, 4)], &priors);

        let data = store.get(&roots[&4].diamond.key()).unwrap();
        let layers: Vec<Vec<NodeId>> = data
            .sub_structure
            .iteration_sets
            .iter()
            .map(|s| s.iter().copied().collect())
            .collect();
        assert_eq!(layers, vec![vec![1], vec![2, 3], vec![4]]);
    }

    #[test]
    fn test_alternating_cache_merges_conditioning() {
        let cache = InMemoryCache::default();
        let relevant: BTreeSet<NodeId> = [1, 2, 3, 4].into_iter().collect();
        let first = Diamond {
            relevant_nodes: relevant.clone(),
            conditioning_nodes: [1].into_iter().collect(),
            edgelist: vec![(1, 2), (1, 3), (2, 4), (3, 4)],
        };

        // Prime the relevant-node cache without a matching signature
        let data = Arc::new(DiamondComputationData {
            join_node: 4,
            diamond: first.clone(),
            sub_index: DagIndex::build(first.edgelist.clone()),
            sub_structure: StructuralData {
                iteration_sets: vec![],
                ancestors: BTreeMap::new(),
                descendants: BTreeMap::new(),
                fork_nodes: BTreeSet::new(),
                join_nodes: BTreeSet::new(),
            },
            sub_priors: BTreeMap::new(),
            sub_diamonds: BTreeMap::new(),
        });
        cache.insert_or_merge(&first, &data);

        // Same shape again: plain hit
        match cache.lookup(&first) {
            CacheDecision::Hit(_) => {}
            _ => panic!("expected structure hit"),
        }

        // Same relevant nodes, different conditioning: merge with union
        let second = Diamond {
            relevant_nodes: relevant,
            conditioning_nodes: [2].into_iter().collect(),
            edgelist: first.edgelist.clone(),
        };
        match cache.lookup(&second) {
            CacheDecision::Merge(merged) => {
                assert_eq!(merged.iter().copied().collect::<Vec<_>>(), vec![1, 2]);
            }
            _ => panic!("expected merge"),
        }
    }

    #[test]
    fn test_depth_limit() {
        // The nested graph needs depth 1 for its inner diamond; a
        // zero-depth budget must fail with the recursion error.
        let edges = vec![(1, 2), (1, 3), (2, 4), (3, 4), (2, 5), (3, 5), (4, 6), (5, 6)];
        let index = DagIndex::build(edges);
        let structure = StructuralData::compute(&index).unwrap();
        let priors = scalar_priors(&[
            (1, 0.9),
            (2, 0.9),
            (3, 0.9),
            (4, 0.9),
            (5, 0.9),
            (6, 0.9),
        ]);
        let roots = identify_diamonds(&index, &structure, &priors);

        match build_hierarchy(&roots, &structure, &priors, ProbKind::Scalar, 0) {
            Err(AnalysisError::DiamondRecursion { depth, .. }) => assert_eq!(depth, 1),
            other => panic!("expected DiamondRecursion, got {other:?}"),
        }
    }
}
