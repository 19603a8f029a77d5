//! Discretized probability boxes
//!
//! A p-box is stored as a pair of monotone quantile envelopes sampled at
//! `STEPS` equal probability slices: `u[i]` is the smallest value slice i
//! can take, `d[i]` the largest. Binary operations combine slices pairwise
//! assuming independence and condense the result back to `STEPS` slices
//! with outward rounding, so the envelope never narrows past the truth.

/// Number of probability slices per envelope
pub const STEPS: usize = 200;

/// Mean and variance bounds of a p-box, as serialized in the `complex`
/// construction encoding
#[derive(Debug, Clone, PartialEq)]
pub struct PboxMoments {
    pub ml: f64,
    pub mh: f64,
    pub vl: f64,
    pub vh: f64,
    pub shape: String,
    pub name: String,
}

/// A probability box over [0,1]
#[derive(Debug, Clone)]
pub struct Pbox {
    /// Lower envelope quantiles, nondecreasing
    u: Vec<f64>,
    /// Upper envelope quantiles, nondecreasing, `u[i] <= d[i]`
    d: Vec<f64>,
    /// Moments declared by a parsed `complex` construction. Carried
    /// through untouched until arithmetic invalidates them, which keeps
    /// the serialization round-trip exact for parsed values.
    declared: Option<PboxMoments>,
}

impl PartialEq for Pbox {
    fn eq(&self, other: &Self) -> bool {
        // Structural equality is over the envelopes; declared moments are
        // serialization metadata.
        self.u == other.u && self.d == other.d
    }
}

impl Pbox {
    /// Degenerate p-box concentrated at a single value
    pub fn scalar(x: f64) -> Self {
        Pbox {
            u: vec![x; STEPS],
            d: vec![x; STEPS],
            declared: None,
        }
    }

    /// Distribution-free p-box on [0,1] from mean and variance bounds.
    ///
    /// Envelopes follow the one-sided Chebyshev (Cantelli) quantile
    /// bounds; the declared moments are retained for serialization. The
    /// `shape` and `name` fields are carried through without selecting a
    /// parametric family.
    pub fn from_moments(moments: PboxMoments) -> Self {
        let mut u = Vec::with_capacity(STEPS);
        let mut d = Vec::with_capacity(STEPS);
        for i in 0..STEPS {
            let p = (i as f64 + 0.5) / STEPS as f64;
            // P(X >= m + t) <= v / (v + t^2) inverted at tail mass 1 - p
            let upper = moments.mh + (moments.vh * p / (1.0 - p)).sqrt();
            let lower = moments.ml - (moments.vh * (1.0 - p) / p).sqrt();
            u.push(lower.clamp(0.0, 1.0));
            d.push(upper.clamp(0.0, 1.0));
        }
        Pbox { u, d, declared: Some(moments) }
    }

    /// Degenerate at a single point (scalar construction)?
    pub fn as_scalar(&self) -> Option<f64> {
        let x = self.u[0];
        if self.u.iter().chain(self.d.iter()).all(|&v| v == x) {
            Some(x)
        } else {
            None
        }
    }

    pub fn is_zero(&self) -> bool {
        self.as_scalar() == Some(0.0)
    }

    pub fn is_one(&self) -> bool {
        self.as_scalar() == Some(1.0)
    }

    /// Declared moments if still valid, otherwise computed from the
    /// envelopes
    pub fn moments(&self) -> PboxMoments {
        if let Some(declared) = &self.declared {
            return declared.clone();
        }
        let (ml, mh) = self.mean_bounds();
        let (vl, vh) = self.variance_bounds();
        PboxMoments {
            ml,
            mh,
            vl,
            vh,
            shape: String::new(),
            name: String::new(),
        }
    }

    /// Mean of each envelope: [mean(u), mean(d)]
    pub fn mean_bounds(&self) -> (f64, f64) {
        (mean(&self.u), mean(&self.d))
    }

    /// Variance range spanned by the two envelopes.
    ///
    /// The exact variance bounds of a p-box need an optimization over all
    /// enclosed distributions; the envelope variances are a practical
    /// stand-in for reporting.
    pub fn variance_bounds(&self) -> (f64, f64) {
        let vu = variance(&self.u);
        let vd = variance(&self.d);
        (vu.min(vd), vu.max(vd))
    }

    /// Independence product
    pub fn mul(&self, other: &Pbox) -> Pbox {
        self.combine(other, |a, b| a * b)
    }

    /// Independence sum
    pub fn add(&self, other: &Pbox) -> Pbox {
        self.combine(other, |a, b| a + b)
    }

    /// `1 - self`: reflect and swap the envelopes
    pub fn complement(&self) -> Pbox {
        let u: Vec<f64> = self.d.iter().rev().map(|x| 1.0 - x).collect();
        let d: Vec<f64> = self.u.iter().rev().map(|x| 1.0 - x).collect();
        Pbox { u, d, declared: None }
    }

    /// Outward quotient; bounds widen to [0,1] where a slice denominator
    /// reaches zero
    pub fn div(&self, other: &Pbox) -> Pbox {
        let mut los = Vec::with_capacity(STEPS * STEPS);
        let mut his = Vec::with_capacity(STEPS * STEPS);
        for i in 0..STEPS {
            for j in 0..STEPS {
                let lo = if other.d[j] > 0.0 {
                    (self.u[i] / other.d[j]).min(1.0)
                } else {
                    0.0
                };
                let hi = if other.u[j] > 0.0 {
                    (self.d[i] / other.u[j]).min(1.0)
                } else {
                    1.0
                };
                los.push(lo);
                his.push(hi);
            }
        }
        condense(los, his)
    }

    /// Ordering and lower-bound validation; the upper envelope may
    /// overshoot 1 through outward rounding and is clamped at output
    pub fn within_unit(&self, tol: f64) -> bool {
        self.u.iter().all(|&x| x >= -tol)
            && self.u.iter().zip(&self.d).all(|(a, b)| a <= &(b + tol))
    }

    /// Clamp both envelopes into [0,1]
    pub fn clamped(&self) -> Pbox {
        Pbox {
            u: self.u.iter().map(|x| x.clamp(0.0, 1.0)).collect(),
            d: self.d.iter().map(|x| x.clamp(0.0, 1.0)).collect(),
            declared: self.declared.clone(),
        }
    }

    fn combine(&self, other: &Pbox, op: impl Fn(f64, f64) -> f64) -> Pbox {
        let mut los = Vec::with_capacity(STEPS * STEPS);
        let mut his = Vec::with_capacity(STEPS * STEPS);
        for i in 0..STEPS {
            for j in 0..STEPS {
                los.push(op(self.u[i], other.u[j]));
                his.push(op(self.d[i], other.d[j]));
            }
        }
        condense(los, his)
    }
}

/// Condense `STEPS * STEPS` pairwise slice bounds back to `STEPS` slices.
///
/// Sorting and taking the outer end of each block of `STEPS` keeps the
/// result an enclosure of the true convolution.
fn condense(mut los: Vec<f64>, mut his: Vec<f64>) -> Pbox {
    los.sort_by(|a, b| a.partial_cmp(b).unwrap());
    his.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let block = los.len() / STEPS;
    let mut u = Vec::with_capacity(STEPS);
    let mut d = Vec::with_capacity(STEPS);
    for i in 0..STEPS {
        u.push(los[i * block]);
        d.push(his[(i + 1) * block - 1]);
    }
    Pbox { u, d, declared: None }
}

fn mean(xs: &[f64]) -> f64 {
    xs.iter().sum::<f64>() / xs.len() as f64
}

fn variance(xs: &[f64]) -> f64 {
    let m = mean(xs);
    xs.iter().map(|x| (x - m) * (x - m)).sum::<f64>() / xs.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_pbox_behaves_like_scalar() {
        let a = Pbox::scalar(0.8);
        let b = Pbox::scalar(0.5);
        let product = a.mul(&b);
        assert!((product.as_scalar().unwrap() - 0.4).abs() < 1e-12);
        let sum = a.add(&Pbox::scalar(0.1));
        assert!((sum.as_scalar().unwrap() - 0.9).abs() < 1e-12);
    }

    #[test]
    fn test_complement_involution() {
        let p = Pbox::from_moments(PboxMoments {
            ml: 0.4,
            mh: 0.6,
            vl: 0.01,
            vh: 0.05,
            shape: String::new(),
            name: String::new(),
        });
        let back = p.complement().complement();
        for i in 0..STEPS {
            assert!((p.u[i] - back.u[i]).abs() < 1e-12);
            assert!((p.d[i] - back.d[i]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_identity_elements() {
        let p = Pbox::from_moments(PboxMoments {
            ml: 0.3,
            mh: 0.5,
            vl: 0.0,
            vh: 0.02,
            shape: String::new(),
            name: String::new(),
        });
        let through = Pbox::scalar(1.0).mul(&p);
        for i in 0..STEPS {
            assert!((through.u[i] - p.u[i]).abs() < 1e-12);
            assert!((through.d[i] - p.d[i]).abs() < 1e-12);
        }
        assert!(Pbox::scalar(0.0).is_zero());
        assert!(Pbox::scalar(1.0).is_one());
    }

    #[test]
    fn test_envelopes_monotone_after_arithmetic() {
        let a = Pbox::from_moments(PboxMoments {
            ml: 0.2,
            mh: 0.4,
            vl: 0.0,
            vh: 0.03,
            shape: String::new(),
            name: String::new(),
        });
        let b = Pbox::scalar(0.7);
        let c = a.mul(&b);
        for i in 1..STEPS {
            assert!(c.u[i] >= c.u[i - 1]);
            assert!(c.d[i] >= c.d[i - 1]);
        }
        for i in 0..STEPS {
            assert!(c.u[i] <= c.d[i] + 1e-12);
        }
    }

    #[test]
    fn test_declared_moments_survive_until_arithmetic() {
        let moments = PboxMoments {
            ml: 0.4,
            mh: 0.5,
            vl: 0.01,
            vh: 0.02,
            shape: "unimodal".to_string(),
            name: "pump".to_string(),
        };
        let p = Pbox::from_moments(moments.clone());
        assert_eq!(p.moments(), moments);
        let touched = p.mul(&Pbox::scalar(1.0));
        assert!(touched.moments().shape.is_empty());
    }

    #[test]
    fn test_enclosure_of_scalar_product() {
        // The envelope product must enclose the scalar product of any
        // point selections from the operands.
        let a = Pbox::from_moments(PboxMoments {
            ml: 0.5,
            mh: 0.6,
            vl: 0.0,
            vh: 0.01,
            shape: String::new(),
            name: String::new(),
        });
        let b = Pbox::scalar(0.5);
        let c = a.mul(&b);
        let (a_ml, a_mh) = a.mean_bounds();
        let (c_ml, c_mh) = c.mean_bounds();
        assert!(c_ml <= a_mh * 0.5 + 1e-9);
        assert!(c_mh >= a_ml * 0.5 - 1e-9);
    }
}
