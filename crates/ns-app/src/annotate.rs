//! Attaching sweep metadata to derived results.

use std::collections::BTreeMap;

use ns_results::{DerivedResult, ParamValue, SimRecord};

use crate::naming::modification_field_name;

/// The sweep point a record represents, as `(varied names, values)`.
///
/// Ad-hoc modifications take precedence over the formal sweep: each one is
/// named by its sanitized target/parameter pair.
pub fn sweep_point(record: &SimRecord) -> (Vec<String>, BTreeMap<String, ParamValue>) {
    let modifications = record.modifications();
    if !modifications.is_empty() {
        let names: Vec<String> = modifications.iter().map(modification_field_name).collect();
        let params = names
            .iter()
            .cloned()
            .zip(modifications.iter().map(|m| m.value.clone()))
            .collect();
        return (names, params);
    }

    let params = record
        .varied
        .iter()
        .filter_map(|name| record.param(name).map(|v| (name.clone(), v.clone())))
        .collect();
    (record.varied.clone(), params)
}

/// Annotate `results` with the sweep point of `sources`.
///
/// Modifications on the first source are always attached. Without them,
/// only a single swept source has its `varied` names and values copied.
pub fn annotate(results: &mut [DerivedResult], sources: &[SimRecord]) {
    let Some(first) = sources.first() else {
        return;
    };

    let modified = !first.modifications().is_empty();
    if !modified && !(sources.len() == 1 && first.is_swept()) {
        return;
    }

    let (varied, params) = sweep_point(first);
    for result in results.iter_mut() {
        result.varied = varied.clone();
        result
            .params
            .extend(params.iter().map(|(k, v)| (k.clone(), v.clone())));
        if modified {
            result.modifications = first.modifications().to_vec();
        }
    }
}
