//! Ensemble specifications: lattice axes, enumerated members, and
//! user-defined generators.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::generator;
use sw_types::{
    inconsistent_members, invalid_axis, is_valid_name, Member, ParamValue, Settings, SwError,
    SwResult,
};

/// Which kind of specification an ensemble was generated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(i32)]
pub enum EnsembleKind {
    Lattice = 0,
    Enumeration = 1,
    Mixed = 2,
    User = 3,
}

impl std::fmt::Display for EnsembleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Lattice => "lattice",
            Self::Enumeration => "enumeration",
            Self::Mixed => "mixed",
            Self::User => "user",
        };
        f.write_str(name)
    }
}

/// How declared axis numbers map to generated values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AxisScale {
    #[default]
    Linear,
    /// Declared numbers are base-10 exponents; generated values are `10^x`.
    Log10,
}

/// The values an axis contributes to the lattice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AxisValues {
    /// The same value for every member.
    Fixed { value: ParamValue },
    /// `count` evenly spaced samples over `[min, max]`, endpoints included.
    Range { min: f64, max: f64, count: usize },
    /// `min, min + step, ...` for as long as the sample does not pass `max`.
    Stepped { min: f64, max: f64, step: f64 },
    /// An explicit list of values, used in order.
    List { values: Vec<ParamValue> },
}

/// One named dimension of a lattice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterAxis {
    pub name: String,
    pub values: AxisValues,
    #[serde(default)]
    pub scale: AxisScale,
}

// Stepped ranges within this fraction of a step of `max` still include it.
const STEP_TOLERANCE: f64 = 1e-9;

impl ParameterAxis {
    pub fn fixed(name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        Self::with_values(
            name,
            AxisValues::Fixed {
                value: value.into(),
            },
        )
    }

    pub fn range(name: impl Into<String>, min: f64, max: f64, count: usize) -> Self {
        Self::with_values(name, AxisValues::Range { min, max, count })
    }

    pub fn stepped(name: impl Into<String>, min: f64, max: f64, step: f64) -> Self {
        Self::with_values(name, AxisValues::Stepped { min, max, step })
    }

    pub fn list<I, V>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<ParamValue>,
    {
        Self::with_values(
            name,
            AxisValues::List {
                values: values.into_iter().map(Into::into).collect(),
            },
        )
    }

    fn with_values(name: impl Into<String>, values: AxisValues) -> Self {
        Self {
            name: name.into(),
            values,
            scale: AxisScale::Linear,
        }
    }

    /// Interprets the declared numbers as base-10 exponents.
    pub fn log10(mut self) -> Self {
        self.scale = AxisScale::Log10;
        self
    }

    /// Checks the axis on its own (name, bounds, counts).
    pub fn validate(&self) -> SwResult<()> {
        if !is_valid_name(&self.name) {
            return Err(SwError::InvalidParamName {
                name: self.name.clone(),
                reason: "names must start with a letter or underscore and contain only \
                         letters, digits and underscores"
                    .to_string(),
            });
        }
        match &self.values {
            AxisValues::Fixed { .. } => {}
            AxisValues::Range { min, max, count } => {
                check_bounds(&self.name, *min, *max)?;
                if *count < 1 {
                    return Err(invalid_axis!(self.name, "count must be at least 1 (got 0)"));
                }
            }
            AxisValues::Stepped { min, max, step } => {
                check_bounds(&self.name, *min, *max)?;
                if !step.is_finite() || *step <= 0.0 {
                    return Err(invalid_axis!(self.name, "step must be positive (got {step})"));
                }
                let steps = (max - min) / step;
                if steps >= (usize::MAX / 2) as f64 {
                    return Err(SwError::EnsembleTooLarge {
                        description: format!("axis {} with {steps} steps", self.name),
                    });
                }
            }
            AxisValues::List { values } => {
                if values.is_empty() {
                    return Err(invalid_axis!(self.name, "the list of values is empty"));
                }
            }
        }
        Ok(())
    }

    /// Number of samples this axis contributes. Assumes a validated axis.
    pub fn count(&self) -> usize {
        match &self.values {
            AxisValues::Fixed { .. } => 1,
            AxisValues::Range { count, .. } => *count,
            AxisValues::Stepped { min, max, step } => {
                ((max - min) / step + STEP_TOLERANCE).floor() as usize + 1
            }
            AxisValues::List { values } => values.len(),
        }
    }

    /// The generated values of this axis, in order, with the scale applied.
    pub fn samples(&self) -> SwResult<Vec<ParamValue>> {
        let count = self.count();
        let mut samples = generator::allocate(count, || {
            format!("axis {} with {count} samples", self.name)
        })?;
        match &self.values {
            AxisValues::Fixed { value } => samples.push(value.clone()),
            AxisValues::Range { min, max, count } => {
                samples.extend(linear_samples(*min, *max, *count).map(ParamValue::Real))
            }
            AxisValues::Stepped { min, max, step } => samples.extend(
                (0..count).map(|i| ParamValue::Real((min + i as f64 * step).min(*max))),
            ),
            AxisValues::List { values } => samples.extend(values.iter().cloned()),
        }
        if self.scale == AxisScale::Log10 {
            for sample in &mut samples {
                *sample = sample.map(|x| 10f64.powf(x));
            }
        }
        Ok(samples)
    }
}

fn check_bounds(axis: &str, min: f64, max: f64) -> SwResult<()> {
    if !min.is_finite() || !max.is_finite() {
        return Err(invalid_axis!(axis, "bounds must be finite (min = {min}, max = {max})"));
    }
    if min > max {
        return Err(invalid_axis!(axis, "min ({min}) is greater than max ({max})"));
    }
    Ok(())
}

/// `count` evenly spaced samples over `[min, max]`; both endpoints are exact.
fn linear_samples(min: f64, max: f64, count: usize) -> impl Iterator<Item = f64> {
    let last = count.saturating_sub(1);
    (0..count).map(move |i| match i {
        0 => min,
        i if i == last => max,
        i => min + (max - min) * (i as f64) / (last as f64),
    })
}

/// A caller-supplied hook that produces ensemble members.
///
/// The engine hands the hook the opaque `user` block of the configuration
/// (as JSON) together with the loaded settings, and only checks that the
/// returned members are non-empty and share one set of parameter names.
pub trait UserGenerator: Send + Sync {
    /// Human-readable generator name.
    fn name(&self) -> &str;

    fn generate(&self, block: &serde_json::Value, settings: &Settings) -> SwResult<Vec<Member>>;
}

/// Adapts a closure into a [`UserGenerator`].
pub struct FnGenerator<F> {
    name: String,
    f: F,
}

impl<F> FnGenerator<F>
where
    F: Fn(&serde_json::Value, &Settings) -> SwResult<Vec<Member>> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> UserGenerator for FnGenerator<F>
where
    F: Fn(&serde_json::Value, &Settings) -> SwResult<Vec<Member>> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn generate(&self, block: &serde_json::Value, settings: &Settings) -> SwResult<Vec<Member>> {
        (self.f)(block, settings)
    }
}

/// A validated-on-demand description of how to produce an ensemble.
#[derive(Clone)]
pub enum EnsembleSpec {
    /// Cartesian product of the axes; the first axis varies slowest.
    Lattice { axes: Vec<ParameterAxis> },
    /// One member per entry, used verbatim.
    Enumeration { members: Vec<Member> },
    /// Every lattice point combined with every member; members vary fastest.
    Mixed {
        axes: Vec<ParameterAxis>,
        members: Vec<Member>,
    },
    /// Members produced by a caller-supplied generator.
    User {
        generator: Arc<dyn UserGenerator>,
        block: serde_json::Value,
    },
}

impl std::fmt::Debug for EnsembleSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lattice { axes } => f.debug_struct("Lattice").field("axes", axes).finish(),
            Self::Enumeration { members } => f
                .debug_struct("Enumeration")
                .field("members", members)
                .finish(),
            Self::Mixed { axes, members } => f
                .debug_struct("Mixed")
                .field("axes", axes)
                .field("members", members)
                .finish(),
            Self::User { generator, block } => f
                .debug_struct("User")
                .field("generator", &generator.name())
                .field("block", block)
                .finish(),
        }
    }
}

impl EnsembleSpec {
    pub fn lattice(axes: Vec<ParameterAxis>) -> Self {
        Self::Lattice { axes }
    }

    pub fn enumeration(members: Vec<Member>) -> Self {
        Self::Enumeration { members }
    }

    pub fn mixed(axes: Vec<ParameterAxis>, members: Vec<Member>) -> Self {
        Self::Mixed { axes, members }
    }

    pub fn user(generator: Arc<dyn UserGenerator>, block: serde_json::Value) -> Self {
        Self::User { generator, block }
    }

    pub fn kind(&self) -> EnsembleKind {
        match self {
            Self::Lattice { .. } => EnsembleKind::Lattice,
            Self::Enumeration { .. } => EnsembleKind::Enumeration,
            Self::Mixed { .. } => EnsembleKind::Mixed,
            Self::User { .. } => EnsembleKind::User,
        }
    }

    /// Structural validation: axes first, then members. User-defined specs
    /// are only checked after their generator runs.
    pub fn validate(&self) -> SwResult<()> {
        match self {
            Self::Lattice { axes } => {
                if axes.is_empty() {
                    return Err(SwError::EmptyEnsemble {
                        message: "Ensemble has no members!".to_string(),
                    });
                }
                validate_axes(axes)
            }
            Self::Enumeration { members } => validate_members(members),
            Self::Mixed { axes, members } => {
                validate_axes(axes)?;
                validate_members(members)?;
                if let Some(first) = members.first() {
                    if let Some(axis) = axes.iter().find(|a| first.contains_key(&a.name)) {
                        return Err(SwError::InvalidParamName {
                            name: axis.name.clone(),
                            reason: "appears both as a lattice axis and as an enumerated \
                                     parameter"
                                .to_string(),
                        });
                    }
                }
                Ok(())
            }
            Self::User { .. } => Ok(()),
        }
    }
}

fn validate_axes(axes: &[ParameterAxis]) -> SwResult<()> {
    let mut seen = BTreeSet::new();
    for axis in axes {
        axis.validate()?;
        if !seen.insert(axis.name.as_str()) {
            return Err(invalid_axis!(axis.name, "the axis is declared more than once"));
        }
    }
    Ok(())
}

/// Checks that members exist, use valid names, and share one key set.
pub(crate) fn validate_members(members: &[Member]) -> SwResult<()> {
    let Some(first) = members.first() else {
        return Err(SwError::EmptyEnsemble {
            message: "The enumeration has no members. Generated ensemble is empty!".to_string(),
        });
    };
    if let Some(name) = first.keys().find(|name| !is_valid_name(name)) {
        return Err(SwError::InvalidParamName {
            name: name.clone(),
            reason: "names must start with a letter or underscore and contain only \
                     letters, digits and underscores"
                .to_string(),
        });
    }
    for (index, member) in members.iter().enumerate().skip(1) {
        if !member.keys().eq(first.keys()) {
            let expected: Vec<&str> = first.keys().map(String::as_str).collect();
            let found: Vec<&str> = member.keys().map(String::as_str).collect();
            return Err(inconsistent_members!(
                "member {index} has parameters {found:?} but member 0 has {expected:?}"
            ));
        }
    }
    Ok(())
}
