//! Probability algebra over scalar, interval and p-box values
//!
//! One backend is selected per run; every probability flowing through the
//! pipeline carries the same variant. Arithmetic dispatches at the call
//! site on the tagged union rather than through trait objects, so the
//! scalar path monomorphizes to plain IEEE operations.

pub mod pbox;

pub use pbox::{Pbox, PboxMoments};

use crate::dag::NodeId;
use crate::error::{AnalysisError, Result};
use std::collections::BTreeMap;

/// Final output of the belief engine: node id to reachability probability.
///
/// Ordered map so that two runs on the same input serialize byte-identically.
pub type BeliefMap = BTreeMap<NodeId, ProbValue>;

/// Probability backend selected for a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbKind {
    /// Plain IEEE f64 in [0,1]
    Scalar,
    /// Closed interval [lo, hi] within [0,1]
    Interval,
    /// Pair of monotone quantile envelopes bounding a CDF
    Pbox,
}

impl ProbKind {
    /// Parse the `data_type` field of the probability files
    pub fn from_data_type(s: &str) -> Result<Self> {
        match s {
            "Float64" => Ok(ProbKind::Scalar),
            "Interval" => Ok(ProbKind::Interval),
            "pbox" => Ok(ProbKind::Pbox),
            other => Err(AnalysisError::input(format!(
                "unknown data_type {other:?} (expected Float64, Interval or pbox)"
            ))),
        }
    }

    /// Field value written back out when serializing results
    pub fn data_type(&self) -> &'static str {
        match self {
            ProbKind::Scalar => "Float64",
            ProbKind::Interval => "Interval",
            ProbKind::Pbox => "pbox",
        }
    }
}

/// A probability value in one of the three backends
#[derive(Debug, Clone, PartialEq)]
pub enum ProbValue {
    Scalar(f64),
    Interval { lo: f64, hi: f64 },
    Pbox(Pbox),
}

impl ProbValue {
    /// Validated scalar constructor
    pub fn scalar(x: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&x) || x.is_nan() {
            return Err(AnalysisError::domain(format!("probability {x} outside [0,1]")));
        }
        Ok(ProbValue::Scalar(x))
    }

    /// Validated interval constructor
    pub fn interval(lo: f64, hi: f64) -> Result<Self> {
        if lo.is_nan() || hi.is_nan() || lo < 0.0 || hi > 1.0 {
            return Err(AnalysisError::domain(format!(
                "interval [{lo}, {hi}] outside [0,1]"
            )));
        }
        if lo > hi {
            return Err(AnalysisError::domain(format!("inverted interval [{lo}, {hi}]")));
        }
        Ok(ProbValue::Interval { lo, hi })
    }

    /// The multiplicative identity for `kind`
    pub fn one(kind: ProbKind) -> Self {
        match kind {
            ProbKind::Scalar => ProbValue::Scalar(1.0),
            ProbKind::Interval => ProbValue::Interval { lo: 1.0, hi: 1.0 },
            ProbKind::Pbox => ProbValue::Pbox(Pbox::scalar(1.0)),
        }
    }

    /// The additive identity for `kind`
    pub fn zero(kind: ProbKind) -> Self {
        match kind {
            ProbKind::Scalar => ProbValue::Scalar(0.0),
            ProbKind::Interval => ProbValue::Interval { lo: 0.0, hi: 0.0 },
            ProbKind::Pbox => ProbValue::Pbox(Pbox::scalar(0.0)),
        }
    }

    /// Structural sentinel used while identifying sub-diamonds.
    ///
    /// Stands in for "probabilistic but otherwise unknown" so that a node
    /// is never mistaken for a deterministically fixed source during
    /// identification. The engine never uses this value in arithmetic.
    pub fn non_fixed(kind: ProbKind) -> Self {
        match kind {
            ProbKind::Scalar => ProbValue::Scalar(0.9),
            ProbKind::Interval => ProbValue::Interval { lo: 0.9, hi: 0.9 },
            ProbKind::Pbox => ProbValue::Pbox(Pbox::scalar(0.9)),
        }
    }

    /// Backend of this value
    pub fn kind(&self) -> ProbKind {
        match self {
            ProbValue::Scalar(_) => ProbKind::Scalar,
            ProbValue::Interval { .. } => ProbKind::Interval,
            ProbValue::Pbox(_) => ProbKind::Pbox,
        }
    }

    /// Exactly the additive identity
    pub fn is_zero(&self) -> bool {
        match self {
            ProbValue::Scalar(x) => *x == 0.0,
            ProbValue::Interval { lo, hi } => *lo == 0.0 && *hi == 0.0,
            ProbValue::Pbox(p) => p.is_zero(),
        }
    }

    /// Exactly the multiplicative identity
    pub fn is_one(&self) -> bool {
        match self {
            ProbValue::Scalar(x) => *x == 1.0,
            ProbValue::Interval { lo, hi } => *lo == 1.0 && *hi == 1.0,
            ProbValue::Pbox(p) => p.is_one(),
        }
    }

    /// `self * other`, treating the operands as independent
    pub fn mul(&self, other: &ProbValue) -> ProbValue {
        match (self, other) {
            (ProbValue::Scalar(a), ProbValue::Scalar(b)) => ProbValue::Scalar(a * b),
            (ProbValue::Interval { lo: a, hi: b }, ProbValue::Interval { lo: c, hi: d }) => {
                ProbValue::Interval { lo: a * c, hi: b * d }
            }
            (ProbValue::Pbox(a), ProbValue::Pbox(b)) => ProbValue::Pbox(a.mul(b)),
            (a, b) => panic!("mixed probability kinds: {:?} * {:?}", a.kind(), b.kind()),
        }
    }

    /// `self + other`. Bounds are not clamped here; clamping happens only
    /// at the serialization boundary.
    pub fn add(&self, other: &ProbValue) -> ProbValue {
        match (self, other) {
            (ProbValue::Scalar(a), ProbValue::Scalar(b)) => ProbValue::Scalar(a + b),
            (ProbValue::Interval { lo: a, hi: b }, ProbValue::Interval { lo: c, hi: d }) => {
                ProbValue::Interval { lo: a + c, hi: b + d }
            }
            (ProbValue::Pbox(a), ProbValue::Pbox(b)) => ProbValue::Pbox(a.add(b)),
            (a, b) => panic!("mixed probability kinds: {:?} + {:?}", a.kind(), b.kind()),
        }
    }

    /// `1 - self`
    pub fn complement(&self) -> ProbValue {
        match self {
            ProbValue::Scalar(a) => ProbValue::Scalar(1.0 - a),
            ProbValue::Interval { lo, hi } => ProbValue::Interval { lo: 1.0 - hi, hi: 1.0 - lo },
            ProbValue::Pbox(p) => ProbValue::Pbox(p.complement()),
        }
    }

    /// Outward-rounded `self / other`, used to recover a pure arrival
    /// signal from a prior-weighted expectation. Callers guard the
    /// zero-denominator case; bounds widen to [0,1] where the division
    /// itself cannot decide.
    pub fn div(&self, other: &ProbValue) -> ProbValue {
        match (self, other) {
            (ProbValue::Scalar(a), ProbValue::Scalar(b)) => {
                if *b == 0.0 {
                    ProbValue::Scalar(0.0)
                } else {
                    ProbValue::Scalar((a / b).min(1.0))
                }
            }
            (ProbValue::Interval { lo: a, hi: b }, ProbValue::Interval { lo: c, hi: d }) => {
                let lo = if *d > 0.0 { a / d } else { 0.0 };
                let hi = if *c > 0.0 { (b / c).min(1.0) } else { 1.0 };
                ProbValue::Interval { lo, hi }
            }
            (ProbValue::Pbox(a), ProbValue::Pbox(b)) => ProbValue::Pbox(a.div(b)),
            (a, b) => panic!("mixed probability kinds: {:?} / {:?}", a.kind(), b.kind()),
        }
    }

    /// Midpoint collapse, used by the interval-soundness tests and the
    /// human output format
    pub fn midpoint(&self) -> f64 {
        match self {
            ProbValue::Scalar(x) => *x,
            ProbValue::Interval { lo, hi } => (lo + hi) / 2.0,
            ProbValue::Pbox(p) => {
                let (ml, mh) = p.mean_bounds();
                (ml + mh) / 2.0
            }
        }
    }

    /// Post-operation validation for the engine.
    ///
    /// Scalars must stay within [0,1] up to `tol`. Interval and p-box
    /// upper bounds may overshoot 1 through outward-rounded dependency
    /// slack (internal arithmetic never clamps), so enclosure backends
    /// only check ordering and the lower bound; the serialization layer
    /// clamps.
    pub fn within_unit(&self, tol: f64) -> bool {
        match self {
            ProbValue::Scalar(x) => (-tol..=1.0 + tol).contains(x),
            ProbValue::Interval { lo, hi } => *lo >= -tol && lo <= &(hi + tol),
            ProbValue::Pbox(p) => p.within_unit(tol),
        }
    }

    /// Clamp into [0,1]; only the serialization layer calls this
    pub fn clamped(&self) -> ProbValue {
        match self {
            ProbValue::Scalar(x) => ProbValue::Scalar(x.clamp(0.0, 1.0)),
            ProbValue::Interval { lo, hi } => ProbValue::Interval {
                lo: lo.clamp(0.0, 1.0),
                hi: hi.clamp(0.0, 1.0),
            },
            ProbValue::Pbox(p) => ProbValue::Pbox(p.clamped()),
        }
    }
}

/// Validate a post-operation value, attaching the node and operation name
pub(crate) fn check_unit(value: &ProbValue, node: NodeId, op: &'static str, tol: f64) -> Result<()> {
    if value.within_unit(tol) {
        Ok(())
    } else {
        Err(AnalysisError::Numerical { node, op })
    }
}
