//! Forward belief sweep with conditioning-based diamond resolution
//!
//! The engine walks the iteration sets in order. A source takes its prior.
//! A join with only independent parents combines them by the complement
//! product. A join with a diamond enumerates every assignment of the
//! diamond's conditioning nodes, re-runs the engine on the induced
//! subgraph for each, and takes the expectation weighted by the
//! conditioning nodes' already-computed beliefs. Every recursive
//! sub-invocation runs on a strictly smaller graph, so the recursion
//! terminates as long as the hierarchy builder broke every cycle.

use crate::dag::diamond::{identify_diamonds, DiamondsAtNode};
use crate::dag::hierarchy::build_hierarchy;
use crate::dag::{DagIndex, Edge, NodeId, StructuralData, UniqueDiamondStore};
use crate::error::{AnalysisError, Result};
use crate::prob::{check_unit, BeliefMap, ProbKind, ProbValue};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Engine tuning knobs
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Allowed numerical excursion outside [0,1] before failing
    pub tolerance: f64,
    /// Maximum diamond nesting depth
    pub max_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tolerance: 1e-9,
            max_depth: 256,
        }
    }
}

impl EngineConfig {
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }
}

/// Cooperative cancellation flag, checked at layer and conditioning-state
/// boundaries
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// One (sub)problem the sweep runs over: a layering, an adjacency, the
/// diamonds of this level, and per-invocation prior overrides
struct ProblemView<'a> {
    iteration_sets: &'a [BTreeSet<NodeId>],
    incoming: &'a BTreeMap<NodeId, BTreeSet<NodeId>>,
    diamonds: &'a BTreeMap<NodeId, DiamondsAtNode>,
    overrides: BTreeMap<NodeId, ProbValue>,
}

/// The belief propagation engine
pub struct BeliefEngine<'a> {
    index: &'a DagIndex,
    structure: &'a StructuralData,
    root_diamonds: &'a BTreeMap<NodeId, DiamondsAtNode>,
    store: &'a UniqueDiamondStore,
    priors: &'a BTreeMap<NodeId, ProbValue>,
    edge_probs: &'a BTreeMap<Edge, ProbValue>,
    kind: ProbKind,
    config: EngineConfig,
    cancel: Option<CancelToken>,
}

impl<'a> BeliefEngine<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        index: &'a DagIndex,
        structure: &'a StructuralData,
        root_diamonds: &'a BTreeMap<NodeId, DiamondsAtNode>,
        store: &'a UniqueDiamondStore,
        priors: &'a BTreeMap<NodeId, ProbValue>,
        edge_probs: &'a BTreeMap<Edge, ProbValue>,
        kind: ProbKind,
    ) -> Self {
        Self {
            index,
            structure,
            root_diamonds,
            store,
            priors,
            edge_probs,
            kind,
            config: EngineConfig::default(),
            cancel: None,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Run the sweep over the whole graph
    pub fn run(&self) -> Result<BeliefMap> {
        let mut beliefs = BeliefMap::new();
        let view = ProblemView {
            iteration_sets: &self.structure.iteration_sets,
            incoming: &self.index.incoming,
            diamonds: self.root_diamonds,
            overrides: BTreeMap::new(),
        };

        match self.sweep(&view, &mut beliefs, 0) {
            Ok(()) => {
                debug!(nodes = beliefs.len(), "belief sweep complete");
                Ok(beliefs)
            }
            // Re-wrap with the layers that did complete
            Err(AnalysisError::Cancelled { .. }) => Err(AnalysisError::Cancelled { partial: beliefs }),
            Err(e) => Err(e),
        }
    }

    /// Process one problem view layer by layer. Beliefs commit per layer,
    /// so a cancelled run leaves only fully-computed layers behind.
    fn sweep(&self, view: &ProblemView<'_>, beliefs: &mut BeliefMap, depth: usize) -> Result<()> {
        for layer in view.iteration_sets {
            if self.cancelled() {
                return Err(AnalysisError::Cancelled { partial: BeliefMap::new() });
            }
            let mut layer_out = Vec::with_capacity(layer.len());
            for &v in layer {
                let b = self.node_belief(v, view, beliefs, depth)?;
                check_unit(&b, v, "belief update", self.config.tolerance)?;
                layer_out.push((v, b));
            }
            beliefs.extend(layer_out);
        }
        Ok(())
    }

    fn node_belief(
        &self,
        v: NodeId,
        view: &ProblemView<'_>,
        beliefs: &BeliefMap,
        depth: usize,
    ) -> Result<ProbValue> {
        let prior = self.prior_of(v, view)?;

        let parents = match view.incoming.get(&v) {
            Some(p) if !p.is_empty() => p,
            _ => return Ok(prior),
        };

        let dan = view.diamonds.get(&v);
        let independent_parents: Vec<NodeId> = match dan {
            Some(dan) => dan.non_diamond_parents.iter().copied().collect(),
            None => parents.iter().copied().collect(),
        };

        // Independent contribution: 1 - prod(1 - belief[u] * edge(u, v))
        let p_independent = if independent_parents.is_empty() {
            ProbValue::zero(self.kind)
        } else {
            let mut all_miss = ProbValue::one(self.kind);
            for u in independent_parents.iter() {
                let parent_belief = self.belief_of(*u, beliefs)?;
                let arrival = parent_belief.mul(self.edge_prob(*u, v)?);
                all_miss = all_miss.mul(&arrival.complement());
            }
            all_miss.complement()
        };

        let belief = match dan {
            None => prior.mul(&p_independent),
            Some(dan) => {
                let p_diamond = self.diamond_expectation(v, dan, beliefs, depth)?;
                if independent_parents.is_empty() {
                    p_diamond
                } else if prior.is_zero() {
                    ProbValue::zero(self.kind)
                } else {
                    // The expectation already carries v's own prior; strip
                    // it to recover the pure arrival signal before
                    // combining with the independent parents.
                    let diamond_signal = p_diamond.div(&prior);
                    let signal = p_independent
                        .complement()
                        .mul(&diamond_signal.complement())
                        .complement();
                    prior.mul(&signal)
                }
            }
        };

        trace!(node = v, depth, "belief computed");
        Ok(belief)
    }

    /// Expectation over all 2^k assignments of the diamond's conditioning
    /// nodes, little-endian over the sorted conditioning list
    fn diamond_expectation(
        &self,
        v: NodeId,
        dan: &DiamondsAtNode,
        beliefs: &BeliefMap,
        depth: usize,
    ) -> Result<ProbValue> {
        if depth + 1 > self.config.max_depth {
            return Err(AnalysisError::DiamondRecursion {
                join_node: v,
                depth: depth + 1,
            });
        }

        let data = self.store.get(&dan.diamond.key()).ok_or_else(|| {
            AnalysisError::input(format!("diamond at join {v} missing from the unique store"))
        })?;

        // The store's conditioning set is authoritative: cycle merges may
        // have widened it past the identified one.
        let conditioning: Vec<NodeId> = data.diamond.conditioning_nodes.iter().copied().collect();
        if conditioning.len() >= 64 {
            return Err(AnalysisError::Numerical {
                node: v,
                op: "conditioning enumeration",
            });
        }

        let states = 1u64 << conditioning.len();
        let mut expectation = ProbValue::zero(self.kind);

        for state in 0..states {
            if self.cancelled() {
                return Err(AnalysisError::Cancelled { partial: BeliefMap::new() });
            }

            let mut weight = ProbValue::one(self.kind);
            let mut overrides: BTreeMap<NodeId, ProbValue> = BTreeMap::new();
            for (i, &c) in conditioning.iter().enumerate() {
                let c_belief = self.belief_of(c, beliefs)?;
                if (state >> i) & 1 == 1 {
                    overrides.insert(c, ProbValue::one(self.kind));
                    weight = weight.mul(c_belief);
                } else {
                    overrides.insert(c, ProbValue::zero(self.kind));
                    weight = weight.mul(&c_belief.complement());
                }
            }
            if weight.is_zero() {
                continue;
            }

            // Free sub-sources carry the belief the enclosing sweep
            // already assigned them
            for &s in &data.sub_index.sources {
                if !overrides.contains_key(&s) {
                    overrides.insert(s, self.belief_of(s, beliefs)?.clone());
                }
            }

            let sub_view = ProblemView {
                iteration_sets: &data.sub_structure.iteration_sets,
                incoming: &data.sub_index.incoming,
                diamonds: &data.sub_diamonds,
                overrides,
            };
            let mut sub_beliefs = BeliefMap::new();
            self.sweep(&sub_view, &mut sub_beliefs, depth + 1)?;

            let conditioned = sub_beliefs.get(&v).ok_or_else(|| {
                AnalysisError::input(format!("join {v} missing from its own diamond subproblem"))
            })?;
            expectation = expectation.add(&weight.mul(conditioned));
        }

        check_unit(&expectation, v, "conditioning expectation", self.config.tolerance)?;
        Ok(expectation)
    }

    fn prior_of(&self, v: NodeId, view: &ProblemView<'_>) -> Result<ProbValue> {
        if let Some(p) = view.overrides.get(&v) {
            return Ok(p.clone());
        }
        self.priors
            .get(&v)
            .cloned()
            .ok_or_else(|| AnalysisError::input(format!("no prior for node {v}")))
    }

    fn belief_of<'b>(&self, v: NodeId, beliefs: &'b BeliefMap) -> Result<&'b ProbValue> {
        beliefs
            .get(&v)
            .ok_or_else(|| AnalysisError::input(format!("belief for node {v} not yet computed")))
    }

    fn edge_prob(&self, u: NodeId, v: NodeId) -> Result<&ProbValue> {
        self.edge_probs
            .get(&(u, v))
            .ok_or_else(|| AnalysisError::input(format!("no probability for edge ({u},{v})")))
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().map(CancelToken::is_cancelled).unwrap_or(false)
    }
}

/// Run the whole pipeline: index, structure, diamonds, hierarchy, sweep.
pub fn compute_beliefs(
    edges: Vec<Edge>,
    priors: &BTreeMap<NodeId, ProbValue>,
    edge_probs: &BTreeMap<Edge, ProbValue>,
    kind: ProbKind,
    config: EngineConfig,
    cancel: Option<CancelToken>,
) -> Result<BeliefMap> {
    let index = DagIndex::build(edges);
    validate_inputs(&index, priors, edge_probs, kind)?;

    let structure = StructuralData::compute(&index)?;
    let root_diamonds = identify_diamonds(&index, &structure, priors);
    let store = build_hierarchy(&root_diamonds, &structure, priors, kind, config.max_depth)?;

    let mut engine = BeliefEngine::new(
        &index,
        &structure,
        &root_diamonds,
        &store,
        priors,
        edge_probs,
        kind,
    )
    .with_config(config);
    if let Some(token) = cancel {
        engine = engine.with_cancel(token);
    }
    engine.run()
}

/// Every node needs a prior and every distinct edge a probability, all in
/// the run's backend
fn validate_inputs(
    index: &DagIndex,
    priors: &BTreeMap<NodeId, ProbValue>,
    edge_probs: &BTreeMap<Edge, ProbValue>,
    kind: ProbKind,
) -> Result<()> {
    for &n in &index.nodes {
        match priors.get(&n) {
            None => return Err(AnalysisError::input(format!("no prior for node {n}"))),
            Some(p) if p.kind() != kind => {
                return Err(AnalysisError::input(format!(
                    "prior for node {n} is {:?}, run uses {:?}",
                    p.kind(),
                    kind
                )))
            }
            Some(_) => {}
        }
    }
    for &(u, v) in &index.edgelist {
        match edge_probs.get(&(u, v)) {
            None => {
                return Err(AnalysisError::input(format!(
                    "no probability for edge ({u},{v})"
                )))
            }
            Some(p) if p.kind() != kind => {
                return Err(AnalysisError::input(format!(
                    "probability for edge ({u},{v}) is {:?}, run uses {:?}",
                    p.kind(),
                    kind
                )))
            }
            Some(_) => {}
        }
    }
    Ok(())
}
