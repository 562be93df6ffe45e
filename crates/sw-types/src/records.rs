//! Parameter values and the per-member input/output records.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::errors::{LookupKind, SwError, SwResult};

/// A real-valued parameter or metric: either a scalar or an array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Real(f64),
    Array(Vec<f64>),
}

impl ParamValue {
    pub fn as_real(&self) -> Option<f64> {
        match self {
            Self::Real(v) => Some(*v),
            Self::Array(_) => None,
        }
    }

    pub fn as_array(&self) -> Option<&[f64]> {
        match self {
            Self::Real(_) => None,
            Self::Array(values) => Some(values),
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Self::Array(_))
    }

    /// Applies `f` to the scalar or to every array element.
    pub fn map(&self, f: impl Fn(f64) -> f64) -> Self {
        match self {
            Self::Real(v) => Self::Real(f(*v)),
            Self::Array(values) => Self::Array(values.iter().copied().map(f).collect()),
        }
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<Vec<f64>> for ParamValue {
    fn from(values: Vec<f64>) -> Self {
        Self::Array(values)
    }
}

impl From<&[f64]> for ParamValue {
    fn from(values: &[f64]) -> Self {
        Self::Array(values.to_vec())
    }
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Real(v) => write!(f, "{v}"),
            Self::Array(values) => write!(f, "{values:?}"),
        }
    }
}

/// A named set of parameter values, as declared in an enumeration or produced
/// by a user-defined generator.
pub type Member = BTreeMap<String, ParamValue>;

/// Returns true if `name` is usable as a parameter or metric name: an ASCII
/// letter or underscore followed by letters, digits or underscores.
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// The sorted parameter names shared by every input record of an ensemble.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParamSchema {
    names: Vec<String>,
}

impl ParamSchema {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: Vec<String> = names.into_iter().map(Into::into).collect();
        names.sort();
        names.dedup();
        Self { names }
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.binary_search_by(|n| n.as_str().cmp(name)).ok()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// The input parameters of one ensemble member. Immutable once generated.
#[derive(Debug, Clone, PartialEq)]
pub struct InputRecord {
    schema: Arc<ParamSchema>,
    values: Vec<ParamValue>,
}

impl InputRecord {
    /// Pairs `values` with `schema`; `values[i]` belongs to `schema.names()[i]`.
    pub fn new(schema: Arc<ParamSchema>, values: Vec<ParamValue>) -> SwResult<Self> {
        if schema.len() != values.len() {
            return Err(SwError::InvalidValue {
                message: format!(
                    "Input record has {} values for {} parameters",
                    values.len(),
                    schema.len()
                ),
            });
        }
        Ok(Self { schema, values })
    }

    pub fn value(&self, name: &str) -> Option<&ParamValue> {
        self.schema.index_of(name).map(|i| &self.values[i])
    }

    /// True if a scalar parameter with this name exists.
    pub fn has(&self, name: &str) -> bool {
        matches!(self.value(name), Some(ParamValue::Real(_)))
    }

    /// True if an array parameter with this name exists.
    pub fn has_array(&self, name: &str) -> bool {
        matches!(self.value(name), Some(ParamValue::Array(_)))
    }

    pub fn get(&self, name: &str) -> SwResult<f64> {
        match self.value(name) {
            Some(ParamValue::Real(v)) => Ok(*v),
            Some(ParamValue::Array(_)) => Err(SwError::InvalidValue {
                message: format!("The input parameter '{name}' is array-valued."),
            }),
            None => Err(SwError::not_found(LookupKind::InputParameter, name)),
        }
    }

    pub fn get_array(&self, name: &str) -> SwResult<&[f64]> {
        match self.value(name) {
            Some(ParamValue::Array(values)) => Ok(values),
            Some(ParamValue::Real(_)) => Err(SwError::InvalidValue {
                message: format!("The input parameter '{name}' is scalar-valued."),
            }),
            None => Err(SwError::not_found(LookupKind::InputArrayParameter, name)),
        }
    }

    pub fn schema(&self) -> &Arc<ParamSchema> {
        &self.schema
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterates over `(name, value)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.schema
            .names()
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }
}

/// The metrics computed for one ensemble member. Starts empty; the last value
/// written under a name wins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputRecord {
    metrics: BTreeMap<String, ParamValue>,
}

impl OutputRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: f64) {
        self.metrics.insert(name.into(), ParamValue::Real(value));
    }

    pub fn set_array(&mut self, name: impl Into<String>, values: impl Into<Vec<f64>>) {
        self.metrics
            .insert(name.into(), ParamValue::Array(values.into()));
    }

    pub fn value(&self, name: &str) -> Option<&ParamValue> {
        self.metrics.get(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.metrics.contains_key(name)
    }

    pub fn get(&self, name: &str) -> SwResult<f64> {
        match self.metrics.get(name) {
            Some(ParamValue::Real(v)) => Ok(*v),
            Some(ParamValue::Array(_)) => Err(SwError::InvalidValue {
                message: format!("The metric '{name}' is array-valued."),
            }),
            None => Err(SwError::not_found(LookupKind::Metric, name)),
        }
    }

    pub fn get_array(&self, name: &str) -> SwResult<&[f64]> {
        match self.metrics.get(name) {
            Some(ParamValue::Array(values)) => Ok(values),
            Some(ParamValue::Real(_)) => Err(SwError::InvalidValue {
                message: format!("The metric '{name}' is scalar-valued."),
            }),
            None => Err(SwError::not_found(LookupKind::Metric, name)),
        }
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.metrics.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.metrics.iter().map(|(k, v)| (k.as_str(), v))
    }
}
