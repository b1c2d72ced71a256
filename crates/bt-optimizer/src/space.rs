//! Parameter space definitions and feature-vector encoding.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use bt_types::{config_error, internal_error, BtResult};

/// A single tunable parameter in the search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// Human-readable parameter name (e.g. "fast_length").
    pub name: String,
    /// The kind of search range.
    pub kind: ParameterKind,
}

/// Describes how a parameter is sampled and encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterKind {
    /// Continuous uniform range [min, max].
    Continuous { min: f64, max: f64 },
    /// Integer range [min, max] inclusive.
    Integer { min: i64, max: i64 },
    /// On/off toggle.
    Boolean,
    /// Categorical choices (e.g. an indicator source: "close", "hl2").
    Categorical { options: Vec<String> },
}

impl ParameterKind {
    /// Number of feature-vector columns this parameter occupies:
    /// one for numeric/boolean kinds, one per option for categoricals.
    pub fn width(&self) -> usize {
        match self {
            Self::Categorical { options } => options.len(),
            _ => 1,
        }
    }
}

/// A concrete parameter value produced by sampling or decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    // Int before Float so integer JSON numbers deserialize losslessly.
    Int(i64),
    Float(f64),
    Bool(bool),
    Choice(String),
}

impl ParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_choice(&self) -> Option<&str> {
        match self {
            Self::Choice(v) => Some(v.as_str()),
            _ => None,
        }
    }
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Float(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Choice(v) => write!(f, "{v}"),
        }
    }
}

/// Mapping from parameter name to a concrete value.
pub type Assignment = HashMap<String, ParamValue>;

/// The full search space: an ordered list of parameter definitions.
///
/// Declaration order fixes the feature-vector layout, so `encode`, `decode`
/// and `sample_random` all agree on dimension order for the lifetime of the
/// space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpace {
    pub parameters: Vec<ParameterSpec>,
}

impl ParameterSpace {
    pub fn new() -> Self {
        Self {
            parameters: Vec::new(),
        }
    }

    pub fn add_continuous(mut self, name: impl Into<String>, min: f64, max: f64) -> Self {
        self.parameters.push(ParameterSpec {
            name: name.into(),
            kind: ParameterKind::Continuous { min, max },
        });
        self
    }

    pub fn add_integer(mut self, name: impl Into<String>, min: i64, max: i64) -> Self {
        self.parameters.push(ParameterSpec {
            name: name.into(),
            kind: ParameterKind::Integer { min, max },
        });
        self
    }

    pub fn add_boolean(mut self, name: impl Into<String>) -> Self {
        self.parameters.push(ParameterSpec {
            name: name.into(),
            kind: ParameterKind::Boolean,
        });
        self
    }

    pub fn add_categorical(
        mut self,
        name: impl Into<String>,
        options: Vec<impl Into<String>>,
    ) -> Self {
        self.parameters.push(ParameterSpec {
            name: name.into(),
            kind: ParameterKind::Categorical {
                options: options.into_iter().map(Into::into).collect(),
            },
        });
        self
    }

    /// Total feature-vector length. Constant for the lifetime of the space.
    pub fn width(&self) -> usize {
        self.parameters.iter().map(|p| p.kind.width()).sum()
    }

    /// Validate the space as configuration. Called before a session starts;
    /// a session never runs against an invalid space.
    pub fn validate(&self) -> BtResult<()> {
        if self.parameters.is_empty() {
            return Err(config_error!("parameter space has no parameters"));
        }
        let mut seen = std::collections::HashSet::new();
        for param in &self.parameters {
            if param.name.trim().is_empty() {
                return Err(config_error!("parameter with empty name"));
            }
            if !seen.insert(param.name.as_str()) {
                return Err(config_error!("duplicate parameter name '{}'", param.name));
            }
            match &param.kind {
                ParameterKind::Continuous { min, max } => {
                    if !min.is_finite() || !max.is_finite() {
                        return Err(config_error!(
                            "parameter '{}' has non-finite bounds",
                            param.name
                        ));
                    }
                    if min > max {
                        return Err(config_error!(
                            "parameter '{}' has min {} > max {}",
                            param.name,
                            min,
                            max
                        ));
                    }
                }
                ParameterKind::Integer { min, max } => {
                    if min > max {
                        return Err(config_error!(
                            "parameter '{}' has min {} > max {}",
                            param.name,
                            min,
                            max
                        ));
                    }
                }
                ParameterKind::Boolean => {}
                ParameterKind::Categorical { options } => {
                    if options.is_empty() {
                        return Err(config_error!(
                            "categorical parameter '{}' has no options",
                            param.name
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// Encode an assignment into a fixed-length feature vector in [0, 1]:
    /// numeric values are linearly normalized, booleans map to {0, 1},
    /// categoricals to a one-hot block.
    pub fn encode(&self, assignment: &Assignment) -> BtResult<Vec<f64>> {
        let mut features = Vec::with_capacity(self.width());
        for param in &self.parameters {
            let value = assignment
                .get(&param.name)
                .ok_or_else(|| internal_error!("assignment missing parameter '{}'", param.name))?;
            match (&param.kind, value) {
                (ParameterKind::Continuous { min, max }, ParamValue::Float(v)) => {
                    features.push(normalize(*v, *min, *max));
                }
                (ParameterKind::Integer { min, max }, ParamValue::Int(v)) => {
                    features.push(normalize(*v as f64, *min as f64, *max as f64));
                }
                (ParameterKind::Boolean, ParamValue::Bool(v)) => {
                    features.push(if *v { 1.0 } else { 0.0 });
                }
                (ParameterKind::Categorical { options }, ParamValue::Choice(choice)) => {
                    let idx = options.iter().position(|o| o == choice).ok_or_else(|| {
                        internal_error!(
                            "parameter '{}' has unknown option '{}'",
                            param.name,
                            choice
                        )
                    })?;
                    for i in 0..options.len() {
                        features.push(if i == idx { 1.0 } else { 0.0 });
                    }
                }
                (_, other) => {
                    return Err(internal_error!(
                        "parameter '{}' has mismatched value {:?}",
                        param.name,
                        other
                    ));
                }
            }
        }
        Ok(features)
    }

    /// Decode a feature vector back into an assignment: numeric dimensions
    /// are clamped to bounds (integers rounded), booleans threshold at 0.5,
    /// categoricals take the argmax over their one-hot block (ties broken
    /// by first index).
    pub fn decode(&self, vector: &[f64]) -> BtResult<Assignment> {
        if vector.len() != self.width() {
            return Err(internal_error!(
                "feature vector length {} does not match space width {}",
                vector.len(),
                self.width()
            ));
        }
        let mut assignment = Assignment::new();
        let mut offset = 0;
        for param in &self.parameters {
            let value = match &param.kind {
                ParameterKind::Continuous { min, max } => {
                    let t = vector[offset].clamp(0.0, 1.0);
                    ParamValue::Float(min + t * (max - min))
                }
                ParameterKind::Integer { min, max } => {
                    let t = vector[offset].clamp(0.0, 1.0);
                    let v = (*min as f64 + t * (*max - *min) as f64).round() as i64;
                    ParamValue::Int(v.clamp(*min, *max))
                }
                ParameterKind::Boolean => ParamValue::Bool(vector[offset] >= 0.5),
                ParameterKind::Categorical { options } => {
                    let block = &vector[offset..offset + options.len()];
                    let mut best = 0;
                    for (i, v) in block.iter().enumerate() {
                        if *v > block[best] {
                            best = i;
                        }
                    }
                    ParamValue::Choice(options[best].clone())
                }
            };
            assignment.insert(param.name.clone(), value);
            offset += param.kind.width();
        }
        Ok(assignment)
    }

    /// Draw an assignment uniformly at random within bounds.
    pub fn sample_random(&self, rng: &mut impl Rng) -> Assignment {
        let mut assignment = Assignment::new();
        for param in &self.parameters {
            let value = match &param.kind {
                ParameterKind::Continuous { min, max } => {
                    if min == max {
                        ParamValue::Float(*min)
                    } else {
                        ParamValue::Float(rng.random_range(*min..=*max))
                    }
                }
                ParameterKind::Integer { min, max } => {
                    ParamValue::Int(rng.random_range(*min..=*max))
                }
                ParameterKind::Boolean => ParamValue::Bool(rng.random_bool(0.5)),
                ParameterKind::Categorical { options } => {
                    let idx = rng.random_range(0..options.len());
                    ParamValue::Choice(options[idx].clone())
                }
            };
            assignment.insert(param.name.clone(), value);
        }
        assignment
    }
}

impl Default for ParameterSpace {
    fn default() -> Self {
        Self::new()
    }
}

/// Linear (value - min) / (max - min), with degenerate ranges pinned to 0.5.
fn normalize(value: f64, min: f64, max: f64) -> f64 {
    if (max - min).abs() < f64::EPSILON {
        0.5
    } else {
        ((value - min) / (max - min)).clamp(0.0, 1.0)
    }
}
