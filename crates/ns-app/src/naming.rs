//! Output file naming.

use std::collections::BTreeMap;

use ns_results::{Modification, ParamValue, SimId};

use crate::functions::CallKind;

/// Turn a modification target/parameter string into a field identifier.
///
/// `->`, `<-`, `-`, `.`, commas and whitespace become `_`; brackets, braces
/// and parentheses are dropped.
pub fn sanitize_field_name(raw: &str) -> String {
    let stripped: String = raw
        .chars()
        .filter(|c| !matches!(c, '(' | ')' | '[' | ']' | '{' | '}'))
        .collect();
    stripped
        .replace("->", "_")
        .replace("<-", "_")
        .replace(['-', '.', ','], "_")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

/// Field name a modification is recorded under.
pub fn modification_field_name(modification: &Modification) -> String {
    sanitize_field_name(&format!("{}_{}", modification.target, modification.parameter))
}

fn value_token(value: &ParamValue) -> String {
    match value {
        ParamValue::Number(v) => v.to_string().replace('.', "p"),
        ParamValue::Text(s) => sanitize_field_name(s),
    }
}

/// Build a name embedding a sweep point: `base_prefix_name1value1_name2value2`.
///
/// Empty `base`/`prefix` are left out. Numbers use their shortest exact
/// decimal form with `.` written as `p`, so distinct points give distinct
/// names.
pub fn name_from_varied(
    base: &str,
    prefix: &str,
    varied: &[String],
    params: &BTreeMap<String, ParamValue>,
) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(varied.len() + 2);
    if !base.is_empty() {
        parts.push(base.to_string());
    }
    if !prefix.is_empty() {
        parts.push(prefix.to_string());
    }
    for name in varied {
        match params.get(name) {
            Some(value) => parts.push(format!("{}{}", name, value_token(value))),
            None => parts.push(name.clone()),
        }
    }
    parts.join("_")
}

/// `save_prefix` overrides the inferred prefix when given.
pub fn effective_prefix<'a>(inferred: &'a str, save_prefix: Option<&'a str>) -> &'a str {
    save_prefix.unwrap_or(inferred)
}

/// Name of a per-simulation output: `{stem}_sim{id}_{plot|analysis}{k}_{function}.{ext}`.
pub fn post_sim_file_name(
    stem: &str,
    sim_id: SimId,
    kind: CallKind,
    function_index: usize,
    function: &str,
    extension: &str,
) -> String {
    let tag = match kind {
        CallKind::Plot => "plot",
        CallKind::Analysis => "analysis",
    };
    format!(
        "{}_sim{}_{}{}_{}.{}",
        stem,
        sim_id,
        tag,
        function_index,
        sanitize_field_name(function),
        extension
    )
}
