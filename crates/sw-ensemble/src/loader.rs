//! Loading settings and ensembles from YAML configuration files.
//!
//! A configuration document holds an optional settings block of flat scalars
//! and an ensemble block whose sections (`fixed`, `lattice`, `enumerated`,
//! `user`) decide which kind of ensemble is generated.

use serde::de::{DeserializeSeed, Deserializer, IgnoredAny, MapAccess, Visitor};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use sw_types::{
    invalid_axis, invalid_value, is_valid_name, Member, ParamValue, Settings, SwError, SwResult,
};

use crate::config::LoaderConfig;
use crate::ensemble::Ensemble;
use crate::spec::{AxisScale, EnsembleKind, EnsembleSpec, ParameterAxis, UserGenerator};

const FIXED: &str = "fixed";
const LATTICE: &str = "lattice";
const ENUMERATED: &str = "enumerated";
const USER: &str = "user";

/// Everything produced by a successful load.
#[derive(Debug)]
pub struct EnsembleLoad {
    pub kind: EnsembleKind,
    pub settings: Arc<Settings>,
    pub ensemble: Ensemble,
}

/// Loads `path`, reading settings from `settings_block` when given and the
/// ensemble from the `input` block.
pub fn load_ensemble(path: impl AsRef<Path>, settings_block: Option<&str>) -> SwResult<EnsembleLoad> {
    let config = match settings_block {
        Some(block) => LoaderConfig::new().with_settings_block(block),
        None => LoaderConfig::new(),
    };
    EnsembleLoader::new(config).load(path)
}

/// Reads configuration documents into ensembles.
#[derive(Clone, Default)]
pub struct EnsembleLoader {
    config: LoaderConfig,
    generator: Option<Arc<dyn UserGenerator>>,
}

impl std::fmt::Debug for EnsembleLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnsembleLoader")
            .field("config", &self.config)
            .field("generator", &self.generator.as_ref().map(|g| g.name()))
            .finish()
    }
}

impl EnsembleLoader {
    pub fn new(config: LoaderConfig) -> Self {
        Self {
            config,
            generator: None,
        }
    }

    /// Registers the generator used for `user` ensemble sections.
    pub fn with_generator(mut self, generator: Arc<dyn UserGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn load(&self, path: impl AsRef<Path>) -> SwResult<EnsembleLoad> {
        let path = path.as_ref();
        info!("Loading ensemble from {}", path.display());
        let text = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => SwError::FileNotFound {
                path: path.display().to_string(),
            },
            _ => SwError::io("read", path.display().to_string(), e),
        })?;
        self.load_str(&text)
    }

    pub fn load_str(&self, text: &str) -> SwResult<EnsembleLoad> {
        let document: Value = serde_yaml::from_str(text).map_err(|e| SwError::InvalidYaml {
            message: e.to_string(),
        })?;
        let Value::Mapping(root) = document else {
            return Err(SwError::InvalidYaml {
                message: "the document must be a mapping of named blocks".to_string(),
            });
        };

        let settings = Arc::new(self.read_settings(&root, text)?);
        let spec = self.read_spec(&root)?;
        let ensemble = Ensemble::from_spec(&spec, settings.clone())?;
        Ok(EnsembleLoad {
            kind: ensemble.kind(),
            settings,
            ensemble,
        })
    }

    /// Reads the settings block. `root` is used to check its shape; the values
    /// themselves come from `text` so scalars keep their source spelling.
    fn read_settings(&self, root: &Mapping, text: &str) -> SwResult<Settings> {
        let Some(block) = self.config.settings_block.as_deref() else {
            return Ok(Settings::new());
        };
        if block == self.config.ensemble_block {
            return Err(SwError::InvalidSettingsBlock {
                message: format!("Settings cannot be read from the ensemble block '{block}'."),
            });
        }
        let value = root.get(block).ok_or_else(|| SwError::SettingsNotFound {
            block: block.to_string(),
        })?;
        let Value::Mapping(entries) = value else {
            return Err(SwError::InvalidSettingsBlock {
                message: format!("The block '{block}' is not a mapping of settings."),
            });
        };
        for (key, value) in entries {
            let name = key_name(key).ok_or_else(|| SwError::InvalidSettingsBlock {
                message: format!("The block '{block}' has a non-scalar setting name."),
            })?;
            if matches!(value, Value::Sequence(_) | Value::Mapping(_) | Value::Tagged(_)) {
                return Err(SwError::InvalidSettingsBlock {
                    message: format!("Setting {name} must be a scalar value."),
                });
            }
        }

        let raw = RawBlock { block }
            .deserialize(serde_yaml::Deserializer::from_str(text))
            .map_err(|e| SwError::InvalidSettingsBlock {
                message: format!("The block '{block}' could not be read: {e}"),
            })?
            .unwrap_or_default();
        debug!("Read {} settings from block '{}'", raw.len(), block);
        Settings::from_pairs(raw)
    }

    fn read_spec(&self, root: &Mapping) -> SwResult<EnsembleSpec> {
        let block = self.config.ensemble_block.as_str();
        let value = root.get(block).ok_or_else(|| SwError::InvalidEnsembleType {
            message: format!("No ensemble block named '{block}' was found."),
        })?;
        let Value::Mapping(sections) = value else {
            return Err(SwError::InvalidEnsembleType {
                message: format!("The ensemble block '{block}' is not a mapping."),
            });
        };
        if sections.is_empty() {
            return Err(SwError::EmptyEnsemble {
                message: format!("The ensemble block '{block}' is empty."),
            });
        }

        let mut fixed = None;
        let mut lattice = None;
        let mut enumerated = None;
        let mut user = None;
        for (key, value) in sections {
            match key.as_str() {
                Some(FIXED) => fixed = Some(value),
                Some(LATTICE) => lattice = Some(value),
                Some(ENUMERATED) => enumerated = Some(value),
                Some(USER) => user = Some(value),
                _ => {
                    return Err(SwError::InvalidEnsembleType {
                        message: format!(
                            "Unknown section {} in '{block}' (expected fixed, lattice, \
                             enumerated or user).",
                            key_name(key).unwrap_or_else(|| "<non-scalar>".to_string())
                        ),
                    })
                }
            }
        }

        if let Some(block_value) = user {
            if fixed.is_some() || lattice.is_some() || enumerated.is_some() {
                return Err(SwError::InvalidEnsembleType {
                    message: "A user-defined ensemble cannot be combined with other sections."
                        .to_string(),
                });
            }
            let generator = self.generator.clone().ok_or_else(|| SwError::InvalidEnsembleType {
                message: "The ensemble is user-defined but no generator was registered."
                    .to_string(),
            })?;
            let block = serde_json::to_value(block_value).map_err(|e| SwError::InvalidYaml {
                message: format!("The user block cannot be represented as JSON: {e}"),
            })?;
            return Ok(EnsembleSpec::user(generator, block));
        }

        let mut names = NameRegistry::default();
        let fixed_axes = match fixed {
            Some(value) => read_fixed(value, &mut names)?,
            None => Vec::new(),
        };
        let lattice_axes = match lattice {
            Some(value) => read_lattice(value, &mut names)?,
            None => Vec::new(),
        };
        let members = match enumerated {
            Some(value) => Some(read_enumerated(value, &mut names)?),
            None => None,
        };
        debug!(
            "Ensemble block '{}': {} fixed, {} lattice, {} enumerated",
            block,
            fixed_axes.len(),
            lattice_axes.len(),
            members.as_ref().map_or(0, Vec::len)
        );

        let spec = match (lattice.is_some(), members) {
            (true, Some(members)) => {
                let mut axes = fixed_axes;
                axes.extend(lattice_axes);
                EnsembleSpec::mixed(axes, members)
            }
            (false, Some(mut members)) => {
                for axis in &fixed_axes {
                    // Fixed axes hold exactly one sample.
                    if let Some(value) = axis.samples()?.pop() {
                        for member in &mut members {
                            member.insert(axis.name.clone(), value.clone());
                        }
                    }
                }
                EnsembleSpec::enumeration(members)
            }
            (_, None) => {
                let mut axes = fixed_axes;
                axes.extend(lattice_axes);
                EnsembleSpec::lattice(axes)
            }
        };
        Ok(spec)
    }
}

/// Tracks which section declared each parameter name.
#[derive(Default)]
struct NameRegistry {
    sections: BTreeMap<String, &'static str>,
}

impl NameRegistry {
    /// Parses a declared name (`x` or `log10(x)`) and records it.
    ///
    /// Repeats within the lattice are left to axis validation.
    fn claim(&mut self, raw: &Value, section: &'static str) -> SwResult<(String, AxisScale)> {
        let text = key_name(raw).ok_or_else(|| SwError::InvalidParamName {
            name: format!("{raw:?}"),
            reason: format!("parameter names in '{section}' must be scalars"),
        })?;
        let (name, scale) = match text
            .strip_prefix("log10(")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            Some(inner) => (inner.trim().to_string(), AxisScale::Log10),
            None => (text.clone(), AxisScale::Linear),
        };
        if !is_valid_name(&name) {
            return Err(SwError::InvalidParamName {
                name: text,
                reason: "names must be identifiers, optionally wrapped as log10(name)"
                    .to_string(),
            });
        }
        if let Some(previous) = self.sections.get(&name) {
            if !(section == LATTICE && *previous == LATTICE) {
                return Err(SwError::InvalidParamName {
                    name,
                    reason: format!("declared in both '{previous}' and '{section}'"),
                });
            }
        }
        self.sections.insert(name.clone(), section);
        Ok((name, scale))
    }
}

fn read_fixed(value: &Value, names: &mut NameRegistry) -> SwResult<Vec<ParameterAxis>> {
    let entries = section_mapping(value, FIXED)?;
    let mut axes = Vec::with_capacity(entries.len());
    for (key, value) in entries {
        let (name, scale) = names.claim(key, FIXED)?;
        let axis = ParameterAxis::fixed(name.clone(), param_value(&name, value)?);
        axes.push(with_scale(axis, scale)?);
    }
    Ok(axes)
}

fn read_lattice(value: &Value, names: &mut NameRegistry) -> SwResult<Vec<ParameterAxis>> {
    let entries = section_mapping(value, LATTICE)?;
    let mut axes = Vec::with_capacity(entries.len());
    for (key, value) in entries {
        let (name, scale) = names.claim(key, LATTICE)?;
        let axis = match value {
            Value::Mapping(bounds) => read_bounds(&name, bounds)?,
            // Lists are always explicit values; stepped ranges use {min, max, step}.
            Value::Sequence(items) if items.len() == 1 => {
                return Err(invalid_axis!(
                    name,
                    "a lattice list needs at least two values; declare single values under fixed"
                ))
            }
            Value::Sequence(items) => {
                let values = items
                    .iter()
                    .map(|item| param_value(&name, item))
                    .collect::<SwResult<Vec<_>>>()?;
                ParameterAxis::list(name.clone(), values)
            }
            _ => {
                return Err(invalid_axis!(
                    name,
                    "expected {{min, max, count}}, {{min, max, step}} or a list of values"
                ))
            }
        };
        axes.push(with_scale(axis, scale)?);
    }
    Ok(axes)
}

fn read_bounds(name: &str, bounds: &Mapping) -> SwResult<ParameterAxis> {
    let mut min = None;
    let mut max = None;
    let mut count = None;
    let mut step = None;
    for (key, value) in bounds {
        match key.as_str() {
            Some("min") => min = Some(axis_real(name, "min", value)?),
            Some("max") => max = Some(axis_real(name, "max", value)?),
            Some("step") => step = Some(axis_real(name, "step", value)?),
            Some("count") => {
                let n = value.as_u64().ok_or_else(|| {
                    invalid_axis!(name, "count must be a non-negative integer")
                })?;
                count = Some(usize::try_from(n).map_err(|_| SwError::EnsembleTooLarge {
                    description: format!("axis {name} with {n} samples"),
                })?);
            }
            _ => {
                return Err(invalid_axis!(
                    name,
                    "unexpected key {}",
                    key_name(key).unwrap_or_else(|| "<non-scalar>".to_string())
                ))
            }
        }
    }
    let (Some(min), Some(max)) = (min, max) else {
        return Err(invalid_axis!(name, "both min and max are required"));
    };
    match (count, step) {
        (Some(count), None) => Ok(ParameterAxis::range(name, min, max, count)),
        (None, Some(step)) => Ok(ParameterAxis::stepped(name, min, max, step)),
        (Some(_), Some(_)) => Err(invalid_axis!(name, "count and step are mutually exclusive")),
        (None, None) => Err(invalid_axis!(name, "either count or step is required")),
    }
}

fn read_enumerated(value: &Value, names: &mut NameRegistry) -> SwResult<Vec<Member>> {
    match value {
        // Columns: every name maps to one value per member.
        Value::Mapping(columns) => {
            let mut members: Vec<Member> = Vec::new();
            let mut length = None;
            for (key, column) in columns {
                let (name, scale) = names.claim(key, ENUMERATED)?;
                let Value::Sequence(items) = column else {
                    return Err(invalid_value!(
                        "The enumerated parameter '{}' must be a list of values.",
                        name
                    ));
                };
                match length {
                    None => {
                        length = Some(items.len());
                        members.resize_with(items.len(), Member::new);
                    }
                    Some(n) if n != items.len() => {
                        return Err(sw_types::inconsistent_members!(
                            "the enumerated parameter '{}' has {} values but others have {}",
                            name,
                            items.len(),
                            n
                        ));
                    }
                    Some(_) => {}
                }
                for (member, item) in members.iter_mut().zip(items) {
                    member.insert(name.clone(), scaled(&name, scale, param_value(&name, item)?)?);
                }
            }
            Ok(members)
        }
        // Rows: a list of member mappings.
        Value::Sequence(rows) => {
            let mut members = Vec::with_capacity(rows.len());
            for (index, row) in rows.iter().enumerate() {
                let Value::Mapping(entries) = row else {
                    return Err(invalid_value!("Enumerated member {} is not a mapping.", index));
                };
                let mut row_names = NameRegistry::default();
                let mut member = Member::new();
                for (key, value) in entries {
                    let (name, scale) = row_names.claim(key, ENUMERATED)?;
                    if index == 0 {
                        names.claim(key, ENUMERATED)?;
                    }
                    member.insert(name.clone(), scaled(&name, scale, param_value(&name, value)?)?);
                }
                members.push(member);
            }
            Ok(members)
        }
        _ => Err(invalid_value!(
            "The enumerated section must map names to lists of values or list member mappings."
        )),
    }
}

fn section_mapping<'a>(value: &'a Value, section: &str) -> SwResult<&'a Mapping> {
    match value {
        Value::Mapping(entries) => Ok(entries),
        _ => Err(SwError::InvalidEnsembleType {
            message: format!("The '{section}' section must be a mapping of parameters."),
        }),
    }
}

fn with_scale(axis: ParameterAxis, scale: AxisScale) -> SwResult<ParameterAxis> {
    match scale {
        AxisScale::Linear => Ok(axis),
        AxisScale::Log10 if !contains_array(&axis) => Ok(axis.log10()),
        AxisScale::Log10 => Err(SwError::InvalidParamName {
            name: format!("log10({})", axis.name),
            reason: "log10 applies only to scalar parameters".to_string(),
        }),
    }
}

fn contains_array(axis: &ParameterAxis) -> bool {
    use crate::spec::AxisValues;
    match &axis.values {
        AxisValues::Fixed { value } => value.is_array(),
        AxisValues::List { values } => values.iter().any(ParamValue::is_array),
        AxisValues::Range { .. } | AxisValues::Stepped { .. } => false,
    }
}

fn scaled(name: &str, scale: AxisScale, value: ParamValue) -> SwResult<ParamValue> {
    match (scale, value) {
        (AxisScale::Linear, value) => Ok(value),
        (AxisScale::Log10, ParamValue::Real(x)) => Ok(ParamValue::Real(10f64.powf(x))),
        (AxisScale::Log10, ParamValue::Array(_)) => Err(SwError::InvalidParamName {
            name: format!("log10({name})"),
            reason: "log10 applies only to scalar parameters".to_string(),
        }),
    }
}

/// A scalar, or a list of scalars for an array-valued parameter.
fn param_value(name: &str, value: &Value) -> SwResult<ParamValue> {
    match value {
        Value::Sequence(items) => items
            .iter()
            .map(|item| real(name, item))
            .collect::<SwResult<Vec<_>>>()
            .map(ParamValue::Array),
        _ => real(name, value).map(ParamValue::Real),
    }
}

fn real(name: &str, value: &Value) -> SwResult<f64> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| invalid_value!("The parameter '{}' has a non-real value {}", name, n)),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| invalid_value!("The parameter '{}' has a non-numeric value '{}'", name, s)),
        other => Err(invalid_value!(
            "The parameter '{}' has a non-numeric value {:?}",
            name,
            other
        )),
    }
}

fn axis_real(axis: &str, field: &str, value: &Value) -> SwResult<f64> {
    real(axis, value).map_err(|_| invalid_axis!(axis, "{} must be a real number", field))
}

fn key_name(key: &Value) -> Option<String> {
    match key {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Pulls one top-level block out of a document as raw scalar text, so that
/// `1.10` stays `1.10` rather than round-tripping through a float.
struct RawBlock<'a> {
    block: &'a str,
}

impl<'de> DeserializeSeed<'de> for RawBlock<'_> {
    type Value = Option<BTreeMap<String, String>>;

    fn deserialize<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for RawBlock<'_> {
    type Value = Option<BTreeMap<String, String>>;

    fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("a mapping of named blocks")
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut found = None;
        while let Some(key) = map.next_key::<String>()? {
            if key == self.block {
                found = Some(map.next_value::<BTreeMap<String, String>>()?);
            } else {
                map.next_value::<IgnoredAny>()?;
            }
        }
        Ok(found)
    }
}
