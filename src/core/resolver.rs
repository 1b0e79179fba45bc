//! Name templating and dependency DAG construction.
//!
//! Resolves `{{prefix}}`, `{{account}}`, `{{region}}`, and `{{params.key}}`
//! in name patterns. Extracts reference edges from resource properties
//! (`Ref`, `Fn::GetAtt`, `Fn::Sub` variables, `DependsOn`) and computes a
//! topological order using Kahn's algorithm with deterministic
//! (alphabetical) tie-breaking.

use super::error::{InfraError, Result};
use super::template::{CfnResource, Template};
use super::types::StackConfig;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};

/// Resolve all template variables in a name pattern.
pub fn resolve_template(template: &str, config: &StackConfig) -> Result<String> {
    let mut result = template.to_string();
    let mut start = 0;

    while let Some(open) = result[start..].find("{{") {
        let open = start + open;
        let close = result[open..]
            .find("}}")
            .ok_or(InfraError::UnclosedTemplate(open))?;
        let close = open + close + 2;
        let key = result[open + 2..close - 2].trim();

        let value = match key {
            "prefix" => config.prefix.clone(),
            "account" => config.account_id().to_string(),
            "region" => config.region_name().to_string(),
            "stack" => config.name.clone(),
            other => match other.strip_prefix("params.") {
                Some(param_key) => config
                    .params
                    .get(param_key)
                    .cloned()
                    .ok_or_else(|| InfraError::UnknownTemplateVariable(other.to_string()))?,
                None => return Err(InfraError::UnknownTemplateVariable(other.to_string())),
            },
        };

        result.replace_range(open..close, &value);
        start = open + value.len();
    }

    Ok(result)
}

/// Logical ids a resource refers to, in order of first appearance.
/// Pseudo parameters (`AWS::*`) are not edges.
pub fn references_of(resource: &CfnResource) -> Vec<String> {
    let mut refs = Vec::new();
    for value in resource.properties.values() {
        collect_refs(value, &mut refs);
    }
    for dep in &resource.depends_on {
        push_unique(&mut refs, dep);
    }
    refs
}

fn push_unique(refs: &mut Vec<String>, id: &str) {
    if id.starts_with("AWS::") || id.is_empty() {
        return;
    }
    if !refs.iter().any(|r| r == id) {
        refs.push(id.to_string());
    }
}

fn collect_refs(value: &Value, refs: &mut Vec<String>) {
    match value {
        Value::Object(map) if map.len() == 1 => {
            let (key, inner) = map.iter().next().map(|(k, v)| (k.as_str(), v)).unwrap_or(("", value));
            match (key, inner) {
                ("Ref", Value::String(id)) => push_unique(refs, id),
                ("Fn::GetAtt", Value::Array(parts)) => {
                    if let Some(Value::String(id)) = parts.first() {
                        push_unique(refs, id);
                    }
                }
                ("Fn::GetAtt", Value::String(dotted)) => {
                    if let Some(id) = dotted.split('.').next() {
                        push_unique(refs, id);
                    }
                }
                ("Fn::Sub", Value::String(s)) => {
                    for id in sub_variables(s, &HashSet::new()) {
                        push_unique(refs, &id);
                    }
                }
                ("Fn::Sub", Value::Array(parts)) => {
                    let vars = match parts.get(1) {
                        Some(Value::Object(vars)) => vars.clone(),
                        _ => serde_json::Map::new(),
                    };
                    let local: HashSet<&str> = vars.keys().map(|k| k.as_str()).collect();
                    if let Some(Value::String(s)) = parts.first() {
                        for id in sub_variables(s, &local) {
                            push_unique(refs, &id);
                        }
                    }
                    for v in vars.values() {
                        collect_refs(v, refs);
                    }
                }
                _ => collect_refs(inner, refs),
            }
        }
        Value::Object(map) => {
            for v in map.values() {
                collect_refs(v, refs);
            }
        }
        Value::Array(items) => {
            for v in items {
                collect_refs(v, refs);
            }
        }
        _ => {}
    }
}

/// Logical ids named by `${Id}` / `${Id.Attr}` in an `Fn::Sub` string,
/// excluding `${!Literal}` escapes and locally bound variables.
fn sub_variables(s: &str, local: &HashSet<&str>) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = s;
    while let Some(open) = rest.find("${") {
        let after = &rest[open + 2..];
        let Some(close) = after.find('}') else {
            break;
        };
        let var = &after[..close];
        rest = &after[close + 1..];
        if var.starts_with('!') {
            continue;
        }
        let id = var.split('.').next().unwrap_or(var);
        if local.contains(var) || local.contains(id) || id.starts_with("AWS::") {
            continue;
        }
        if !out.iter().any(|o| o == id) {
            out.push(id.to_string());
        }
    }
    out
}

/// Build a topological order from resource references.
/// Uses Kahn's algorithm with alphabetical tie-breaking for determinism.
pub fn build_execution_order(template: &Template) -> Result<Vec<String>> {
    let resource_ids: Vec<String> = template.resources.keys().cloned().collect();
    let mut in_degree: HashMap<String, usize> = HashMap::new();
    let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();

    for id in &resource_ids {
        in_degree.insert(id.clone(), 0);
        adjacency.insert(id.clone(), Vec::new());
    }

    for (id, resource) in &template.resources {
        for dep in references_of(resource) {
            let Some(neighbors) = adjacency.get_mut(&dep) else {
                return Err(InfraError::UnknownReference {
                    resource: id.clone(),
                    target: dep,
                });
            };
            neighbors.push(id.clone());
            *in_degree.entry(id.clone()).or_default() += 1;
        }
    }

    let mut queue: VecDeque<String> = VecDeque::new();
    let mut zero_degree: Vec<String> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(id, _)| id.clone())
        .collect();
    zero_degree.sort();
    queue.extend(zero_degree);

    let mut order = Vec::new();
    while let Some(current) = queue.pop_front() {
        order.push(current.clone());

        let mut next_ready: Vec<String> = Vec::new();
        if let Some(neighbors) = adjacency.get(&current) {
            for neighbor in neighbors {
                if let Some(degree) = in_degree.get_mut(neighbor) {
                    *degree -= 1;
                    if *degree == 0 {
                        next_ready.push(neighbor.clone());
                    }
                }
            }
        }
        next_ready.sort();
        queue.extend(next_ready);
    }

    if order.len() != resource_ids.len() {
        let ordered: HashSet<_> = order.iter().collect();
        let mut cycle_members: Vec<&str> = resource_ids
            .iter()
            .filter(|id| !ordered.contains(id))
            .map(|s| s.as_str())
            .collect();
        cycle_members.sort();
        return Err(InfraError::Cycle(cycle_members.join(", ")));
    }

    Ok(order)
}

/// Teardown order: dependents before their dependencies.
pub fn build_destroy_order(template: &Template) -> Result<Vec<String>> {
    let mut order = build_execution_order(template)?;
    order.reverse();
    Ok(order)
}

/// Every `(resource, target)` pair where the target is not declared strictly
/// earlier in the template. Empty for a graph built through `Stack::declare`.
pub fn declaration_order_violations(template: &Template) -> Vec<(String, String)> {
    let position: HashMap<&str, usize> = template
        .resources
        .keys()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();

    let mut violations = Vec::new();
    for (i, (id, resource)) in template.resources.iter().enumerate() {
        for target in references_of(resource) {
            match position.get(target.as_str()) {
                Some(&p) if p < i => {}
                _ => violations.push((id.clone(), target)),
            }
        }
    }
    violations
}
