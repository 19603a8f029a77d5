//! Probability value files
//!
//! Node priors and link probabilities share one JSON envelope: a
//! `data_type` discriminator (`Float64`, `Interval`, `pbox`) and a map of
//! values. Scalars are plain numbers; intervals and p-boxes are tagged
//! objects. Link keys have the literal form `"(u,v)"`.

use crate::dag::{Edge, NodeId};
use crate::error::{AnalysisError, Result};
use crate::prob::{BeliefMap, Pbox, PboxMoments, ProbKind, ProbValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Envelope for node-keyed values; also the belief output schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeValuesFile {
    pub data_type: String,
    pub nodes: BTreeMap<String, ValueJson>,
}

/// Envelope for edge-keyed values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkValuesFile {
    pub data_type: String,
    pub links: BTreeMap<String, ValueJson>,
}

/// One probability value in its wire encoding
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValueJson {
    Number(f64),
    Interval(IntervalJson),
    Pbox(PboxJson),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntervalJson {
    #[serde(rename = "type")]
    pub kind: String,
    pub lower: f64,
    pub upper: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PboxJson {
    #[serde(rename = "type")]
    pub kind: String,
    pub construction_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ml: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mh: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vl: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vh: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shape: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ValueJson {
    /// Decode into the run's backend, validating the encoding matches
    pub fn to_prob(&self, kind: ProbKind) -> Result<ProbValue> {
        match (kind, self) {
            (ProbKind::Scalar, ValueJson::Number(x)) => ProbValue::scalar(*x),
            (ProbKind::Interval, ValueJson::Interval(iv)) => {
                if iv.kind != "interval" {
                    return Err(AnalysisError::input(format!(
                        "expected type \"interval\", found {:?}",
                        iv.kind
                    )));
                }
                ProbValue::interval(iv.lower, iv.upper)
            }
            (ProbKind::Pbox, ValueJson::Pbox(pb)) => pb.to_prob(),
            (kind, other) => Err(AnalysisError::input(format!(
                "value encoding {other:?} does not match data_type {:?}",
                kind.data_type()
            ))),
        }
    }

    /// Encode a computed value; enclosure bounds clamp into [0,1] here
    pub fn from_prob(value: &ProbValue) -> ValueJson {
        match value.clamped() {
            ProbValue::Scalar(x) => ValueJson::Number(x),
            ProbValue::Interval { lo, hi } => ValueJson::Interval(IntervalJson {
                kind: "interval".to_string(),
                lower: lo,
                upper: hi,
            }),
            ProbValue::Pbox(p) => ValueJson::Pbox(PboxJson::from_pbox(&p)),
        }
    }
}

impl PboxJson {
    fn to_prob(&self) -> Result<ProbValue> {
        if self.kind != "pbox" {
            return Err(AnalysisError::input(format!(
                "expected type \"pbox\", found {:?}",
                self.kind
            )));
        }
        match self.construction_type.as_str() {
            "scalar" => {
                let value = self.value.ok_or_else(|| {
                    AnalysisError::input("scalar pbox construction needs a \"value\" field")
                })?;
                if !(0.0..=1.0).contains(&value) || value.is_nan() {
                    return Err(AnalysisError::domain(format!(
                        "pbox value {value} outside [0,1]"
                    )));
                }
                Ok(ProbValue::Pbox(Pbox::scalar(value)))
            }
            "complex" => {
                let (ml, mh, vl, vh) = match (self.ml, self.mh, self.vl, self.vh) {
                    (Some(ml), Some(mh), Some(vl), Some(vh)) => (ml, mh, vl, vh),
                    _ => {
                        return Err(AnalysisError::input(
                            "complex pbox construction needs ml, mh, vl and vh",
                        ))
                    }
                };
                if !(0.0..=1.0).contains(&ml) || !(0.0..=1.0).contains(&mh) || ml > mh {
                    return Err(AnalysisError::domain(format!(
                        "pbox mean bounds [{ml}, {mh}] invalid"
                    )));
                }
                if vl < 0.0 || vh < vl {
                    return Err(AnalysisError::domain(format!(
                        "pbox variance bounds [{vl}, {vh}] invalid"
                    )));
                }
                Ok(ProbValue::Pbox(Pbox::from_moments(PboxMoments {
                    ml,
                    mh,
                    vl,
                    vh,
                    shape: self.shape.clone().unwrap_or_default(),
                    name: self.name.clone().unwrap_or_default(),
                })))
            }
            other => Err(AnalysisError::input(format!(
                "unknown pbox construction_type {other:?}"
            ))),
        }
    }

    fn from_pbox(p: &Pbox) -> PboxJson {
        if let Some(value) = p.as_scalar() {
            return PboxJson {
                kind: "pbox".to_string(),
                construction_type: "scalar".to_string(),
                value: Some(value),
                ml: None,
                mh: None,
                vl: None,
                vh: None,
                shape: None,
                name: None,
            };
        }
        let moments = p.moments();
        PboxJson {
            kind: "pbox".to_string(),
            construction_type: "complex".to_string(),
            value: None,
            ml: Some(moments.ml),
            mh: Some(moments.mh),
            vl: Some(moments.vl),
            vh: Some(moments.vh),
            shape: Some(moments.shape),
            name: Some(moments.name),
        }
    }
}

/// Parse a node-priors document
pub fn parse_node_values(json: &str) -> Result<(ProbKind, BTreeMap<NodeId, ProbValue>)> {
    let file: NodeValuesFile =
        serde_json::from_str(json).map_err(|e| AnalysisError::input(format!("node values: {e}")))?;
    let kind = ProbKind::from_data_type(&file.data_type)?;

    let mut values = BTreeMap::new();
    for (key, value) in &file.nodes {
        let node: NodeId = key
            .parse()
            .map_err(|_| AnalysisError::input(format!("node key {key:?} is not an integer")))?;
        values.insert(node, value.to_prob(kind)?);
    }
    Ok((kind, values))
}

/// Parse an edge-probabilities document
pub fn parse_link_values(json: &str) -> Result<(ProbKind, BTreeMap<Edge, ProbValue>)> {
    let file: LinkValuesFile =
        serde_json::from_str(json).map_err(|e| AnalysisError::input(format!("link values: {e}")))?;
    let kind = ProbKind::from_data_type(&file.data_type)?;

    let mut values = BTreeMap::new();
    for (key, value) in &file.links {
        values.insert(parse_link_key(key)?, value.to_prob(kind)?);
    }
    Ok((kind, values))
}

pub fn read_node_values(path: &Path) -> Result<(ProbKind, BTreeMap<NodeId, ProbValue>)> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        AnalysisError::input(format!("cannot read node values {}: {e}", path.display()))
    })?;
    parse_node_values(&text)
}

pub fn read_link_values(path: &Path) -> Result<(ProbKind, BTreeMap<Edge, ProbValue>)> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        AnalysisError::input(format!("cannot read link values {}: {e}", path.display()))
    })?;
    parse_link_values(&text)
}

/// Serialize a belief map using the node-priors schema
pub fn belief_map_to_file(beliefs: &BeliefMap, kind: ProbKind) -> NodeValuesFile {
    NodeValuesFile {
        data_type: kind.data_type().to_string(),
        nodes: beliefs
            .iter()
            .map(|(node, value)| (node.to_string(), ValueJson::from_prob(value)))
            .collect(),
    }
}

/// Keys have the literal form `(u,v)`
fn parse_link_key(key: &str) -> Result<Edge> {
    let inner = key
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(|| AnalysisError::input(format!("link key {key:?} is not \"(u,v)\"")))?;
    let (u, v) = inner
        .split_once(',')
        .ok_or_else(|| AnalysisError::input(format!("link key {key:?} is not \"(u,v)\"")))?;
    let u = u
        .trim()
        .parse::<usize>()
        .map_err(|_| AnalysisError::input(format!("link key {key:?} is not \"(u,v)\"")))?;
    let v = v
        .trim()
        .parse::<usize>()
        .map_err(|_| AnalysisError::input(format!("link key {key:?} is not \"(u,v)\"")))?;
    Ok((u, v))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scalar_nodes() {
        let json = r#"{"data_type":"Float64","nodes":{"1":0.9,"2":1.0}}"#;
        let (kind, values) = parse_node_values(json).unwrap();

        assert_eq!(kind, ProbKind::Scalar);
        assert_eq!(values[&1], ProbValue::Scalar(0.9));
        assert_eq!(values[&2], ProbValue::Scalar(1.0));
    }

    #[test]
    fn test_parse_interval_links() {
        let json = r#"{"data_type":"Interval","links":{"(1,2)":{"type":"interval","lower":0.7,"upper":0.9}}}"#;
        let (kind, values) = parse_link_values(json).unwrap();

        assert_eq!(kind, ProbKind::Interval);
        assert_eq!(values[&(1, 2)], ProbValue::Interval { lo: 0.7, hi: 0.9 });
    }

    #[test]
    fn test_parse_pbox_constructions() {
        let json = r#"{"data_type":"pbox","nodes":{
            "1":{"type":"pbox","construction_type":"scalar","value":0.8},
            "2":{"type":"pbox","construction_type":"complex","ml":0.4,"mh":0.6,"vl":0.01,"vh":0.05,"shape":"unimodal","name":"pump"}
        }}"#;
        let (kind, values) = parse_node_values(json).unwrap();

        assert_eq!(kind, ProbKind::Pbox);
        match &values[&1] {
            ProbValue::Pbox(p) => assert_eq!(p.as_scalar(), Some(0.8)),
            other => panic!("expected pbox, got {other:?}"),
        }
        match &values[&2] {
            ProbValue::Pbox(p) => {
                let m = p.moments();
                assert_eq!((m.ml, m.mh, m.vl, m.vh), (0.4, 0.6, 0.01, 0.05));
                assert_eq!(m.shape, "unimodal");
            }
            other => panic!("expected pbox, got {other:?}"),
        }
    }

    #[test]
    fn test_data_type_mismatch_rejected() {
        let json = r#"{"data_type":"Interval","nodes":{"1":0.9}}"#;
        assert!(parse_node_values(json).is_err());
    }

    #[test]
    fn test_domain_violations_rejected() {
        let json = r#"{"data_type":"Float64","nodes":{"1":1.5}}"#;
        assert!(matches!(parse_node_values(json), Err(AnalysisError::Domain { .. })));

        let json = r#"{"data_type":"Interval","nodes":{"1":{"type":"interval","lower":0.9,"upper":0.2}}}"#;
        assert!(matches!(parse_node_values(json), Err(AnalysisError::Domain { .. })));
    }

    #[test]
    fn test_bad_link_keys() {
        for key in ["1,2", "(1;2)", "(1,2", "(a,b)"] {
            let json = format!(
                r#"{{"data_type":"Float64","links":{{"{key}":0.5}}}}"#
            );
            assert!(parse_link_values(&json).is_err(), "key {key:?} should fail");
        }
    }

    #[test]
    fn test_scalar_round_trip() {
        let mut beliefs = BeliefMap::new();
        beliefs.insert(1, ProbValue::Scalar(0.78336));
        beliefs.insert(2, ProbValue::Scalar(1.0));

        let file = belief_map_to_file(&beliefs, ProbKind::Scalar);
        let json = serde_json::to_string(&file).unwrap();
        let (kind, parsed) = parse_node_values(&json).unwrap();

        assert_eq!(kind, ProbKind::Scalar);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[&1], beliefs[&1]);
        assert_eq!(parsed[&2], beliefs[&2]);
    }

    #[test]
    fn test_interval_round_trip() {
        let mut beliefs = BeliefMap::new();
        beliefs.insert(7, ProbValue::Interval { lo: 0.25, hi: 0.75 });

        let file = belief_map_to_file(&beliefs, ProbKind::Interval);
        let json = serde_json::to_string(&file).unwrap();
        let (_, parsed) = parse_node_values(&json).unwrap();
        assert_eq!(parsed[&7], beliefs[&7]);
    }

    #[test]
    fn test_pbox_round_trip_moments() {
        let json = r#"{"data_type":"pbox","nodes":{"3":{"type":"pbox","construction_type":"complex","ml":0.4,"mh":0.6,"vl":0.01,"vh":0.05,"shape":"","name":""}}}"#;
        let (kind, parsed) = parse_node_values(json).unwrap();

        let beliefs: BeliefMap = parsed.into_iter().collect();
        let file = belief_map_to_file(&beliefs, kind);
        let round = serde_json::to_string(&file).unwrap();
        let (_, reparsed) = parse_node_values(&round).unwrap();

        match (&beliefs[&3], &reparsed[&3]) {
            (ProbValue::Pbox(a), ProbValue::Pbox(b)) => {
                let (ma, mb) = (a.moments(), b.moments());
                assert!((ma.ml - mb.ml).abs() < 1e-12);
                assert!((ma.mh - mb.mh).abs() < 1e-12);
                assert!((ma.vl - mb.vl).abs() < 1e-12);
                assert!((ma.vh - mb.vh).abs() < 1e-12);
            }
            other => panic!("expected pboxes, got {other:?}"),
        }
    }
}
