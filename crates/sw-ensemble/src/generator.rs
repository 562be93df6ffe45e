//! Expansion of an [`EnsembleSpec`] into ordered input records.

use std::sync::Arc;
use tracing::debug;

use sw_types::{InputRecord, Member, OutputRecord, ParamSchema, ParamValue, Settings, SwError, SwResult};

use crate::spec::{validate_members, EnsembleSpec, ParameterAxis};

/// Produces the input records described by `spec`, in generation order.
///
/// Lattice axes vary in declaration order with the last axis fastest; when a
/// lattice is combined with enumerated members, the members vary fastest of
/// all. The result is a pure function of `spec` (and, for user-defined specs,
/// of what the generator returns for `settings`).
pub fn generate(spec: &EnsembleSpec, settings: &Settings) -> SwResult<Vec<InputRecord>> {
    spec.validate()?;
    match spec {
        EnsembleSpec::Lattice { axes } => expand(axes, &[]),
        EnsembleSpec::Enumeration { members } => expand(&[], members),
        EnsembleSpec::Mixed { axes, members } => expand(axes, members),
        EnsembleSpec::User { generator, block } => {
            debug!("Running user-defined generator '{}'", generator.name());
            let members = generator.generate(block, settings)?;
            validate_members(&members)?;
            expand(&[], &members)
        }
    }
}

/// Number of records a lattice of `axes` times `member_count` members holds.
pub fn ensemble_size(axes: &[ParameterAxis], member_count: usize) -> SwResult<usize> {
    let too_large = || {
        let mut factors: Vec<String> = axes.iter().map(|a| a.count().to_string()).collect();
        if member_count > 1 {
            factors.push(member_count.to_string());
        }
        SwError::EnsembleTooLarge {
            description: format!("{} members", factors.join(" x ")),
        }
    };

    let size = axes
        .iter()
        .try_fold(member_count.max(1), |acc, axis| acc.checked_mul(axis.count()))
        .ok_or_else(too_large)?;

    // Refuse sizes whose records could never be allocated.
    let per_member = std::mem::size_of::<InputRecord>() + std::mem::size_of::<OutputRecord>();
    match size.checked_mul(per_member) {
        Some(bytes) if bytes <= isize::MAX as usize => Ok(size),
        _ => Err(too_large()),
    }
}

/// An empty vector with room for `len` items. Allocation failure surfaces as
/// `EnsembleTooLarge` instead of aborting the process.
pub(crate) fn allocate<T>(len: usize, description: impl FnOnce() -> String) -> SwResult<Vec<T>> {
    let mut items = Vec::new();
    items
        .try_reserve_exact(len)
        .map_err(|_| SwError::EnsembleTooLarge {
            description: description(),
        })?;
    Ok(items)
}

fn expand(axes: &[ParameterAxis], members: &[Member]) -> SwResult<Vec<InputRecord>> {
    let size = ensemble_size(axes, members.len())?;
    let samples = axes
        .iter()
        .map(ParameterAxis::samples)
        .collect::<SwResult<Vec<Vec<ParamValue>>>>()?;

    let mut names: Vec<&str> = axes.iter().map(|a| a.name.as_str()).collect();
    if let Some(first) = members.first() {
        names.extend(first.keys().map(String::as_str));
    }
    let schema = Arc::new(ParamSchema::new(names));

    debug!(
        "Expanding {} axes and {} enumerated members into {} records",
        axes.len(),
        members.len(),
        size
    );

    let member_count = members.len().max(1);
    let mut records = allocate(size, || format!("{size} members"))?;
    for index in 0..size {
        let mut values = Member::new();

        let mut lattice_index = index / member_count;
        for (axis, axis_samples) in axes.iter().zip(&samples).rev() {
            let n = axis_samples.len();
            values.insert(axis.name.clone(), axis_samples[lattice_index % n].clone());
            lattice_index /= n;
        }

        if let Some(member) = members.get(index % member_count) {
            values.extend(member.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        // BTreeMap iteration order matches the sorted schema.
        records.push(InputRecord::new(schema.clone(), values.into_values().collect())?);
    }
    Ok(records)
}
