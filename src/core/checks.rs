//! Structural contract checks run against the synthesized graph.
//!
//! Each check returns the findings it produced; an empty list is a pass.
//! `refactor-infra test` runs all of them and fails on any finding.

use super::error::Result;
use super::resolver::{build_execution_order, declaration_order_violations, references_of};
use super::template::{CfnResource, Template};
use super::types::StackConfig;
use crate::resources::app::build_app_stack;
use crate::resources::compute::environment_drift;
use crate::resources::routes::{DenyAll, Guard, Outcome, RoutingTable, PUBLIC_ROUTES};
use crate::tripwire::hasher;
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};
use std::fmt;

/// Paths that no public route covers; each must be refused without a token.
const GUARDED_SAMPLES: [(&str, &str); 5] = [
    ("GET", "/"),
    ("GET", "/projects"),
    ("POST", "/refactor"),
    ("DELETE", "/projects/42"),
    ("GET", "/health/details"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub check: &'static str,
    pub message: String,
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.check, self.message)
    }
}

fn finding(check: &'static str, message: String) -> Finding {
    Finding { check, message }
}

/// Outcome of one named check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: &'static str,
    pub findings: Vec<Finding>,
}

impl CheckResult {
    pub fn passed(&self) -> bool {
        self.findings.is_empty()
    }
}

/// Every cross-reference, including outputs, points strictly backwards.
pub fn check_reference_order(template: &Template) -> Vec<Finding> {
    const NAME: &str = "reference-order";
    let mut out: Vec<Finding> = declaration_order_violations(template)
        .into_iter()
        .map(|(resource, target)| {
            finding(
                NAME,
                format!("'{}' references '{}', which is not declared before it", resource, target),
            )
        })
        .collect();

    if let Err(e) = build_execution_order(template) {
        out.push(finding(NAME, e.to_string()));
    }

    for (name, output) in &template.outputs {
        let carrier = CfnResource::new("Output").prop("Value", output.value.clone());
        for target in references_of(&carrier) {
            if !template.resources.contains_key(&target) {
                out.push(finding(
                    NAME,
                    format!("output '{}' references unknown '{}'", name, target),
                ));
            }
        }
    }
    out
}

/// Exactly the public routes forward without a token; everything else is guarded.
pub fn check_route_guard(template: &Template) -> Vec<Finding> {
    const NAME: &str = "route-guard";
    let table = match RoutingTable::from_template(template) {
        Ok(t) => t,
        Err(e) => return vec![finding(NAME, e.to_string())],
    };
    let mut out = Vec::new();

    let expected: BTreeSet<(String, String)> = PUBLIC_ROUTES
        .iter()
        .map(|r| (r.method.to_string(), r.path.to_string()))
        .collect();
    let actual = table.unauthenticated();
    for (method, path) in actual.difference(&expected) {
        out.push(finding(NAME, format!("{} {} is open but not public", method, path)));
    }
    for (method, path) in expected.difference(&actual) {
        out.push(finding(NAME, format!("{} {} is public but not declared open", method, path)));
    }
    for route in table.unguarded_non_public() {
        out.push(finding(
            NAME,
            format!("{} {} has guard '{}'", route.method, route.path, route.guard),
        ));
    }

    // every fixed resource outside the public list still needs a bearer method
    let paths: BTreeSet<&str> = table.routes().iter().map(|r| r.path.as_str()).collect();
    let public_paths: HashSet<&str> = PUBLIC_ROUTES.iter().map(|r| r.path).collect();
    for path in paths {
        if public_paths.contains(path) {
            continue;
        }
        let guarded = table
            .routes()
            .iter()
            .any(|r| r.path == path && r.guard == Guard::Bearer);
        if !guarded {
            out.push(finding(NAME, format!("{} has no bearer-guarded method", path)));
        }
    }

    for public in PUBLIC_ROUTES.iter() {
        let outcome = table.evaluate(public.method, public.path, None, &DenyAll);
        if outcome != Outcome::Forward {
            out.push(finding(
                NAME,
                format!(
                    "{} {} without a token answers {}, expected 200",
                    public.method,
                    public.path,
                    outcome.status()
                ),
            ));
        }
    }
    for (method, path) in GUARDED_SAMPLES {
        let outcome = table.evaluate(method, path, None, &DenyAll);
        if outcome != Outcome::Unauthorized {
            out.push(finding(
                NAME,
                format!(
                    "{} {} without a token answers {}, expected 401",
                    method,
                    path,
                    outcome.status()
                ),
            ));
        }
    }
    out
}

/// Values bound into a secret's `SecretString`.
fn secret_values(secret: &CfnResource) -> Vec<&Value> {
    match secret.properties.get("SecretString") {
        Some(Value::Object(sub)) => match sub.get("Fn::Sub") {
            Some(Value::Array(parts)) => match parts.get(1) {
                Some(Value::Object(vars)) => vars.values().collect(),
                _ => Vec::new(),
            },
            _ => Vec::new(),
        },
        Some(other) => vec![other],
        None => Vec::new(),
    }
}

/// No value is published to both stores, and each store stays under its prefix.
pub fn check_store_separation(config: &StackConfig, template: &Template) -> Vec<Finding> {
    const NAME: &str = "store-separation";
    let root = format!("/{}/", config.prefix);
    let mut out = Vec::new();

    let mut plain: Vec<(&str, &Value)> = Vec::new();
    for (id, r) in &template.resources {
        if r.resource_type != "AWS::SSM::Parameter" {
            continue;
        }
        let name = r.properties.get("Name").and_then(Value::as_str).unwrap_or("");
        if !name.starts_with(&root) {
            out.push(finding(NAME, format!("parameter '{}' is outside {}", id, root)));
        }
        if name.ends_with("/secrets") {
            out.push(finding(NAME, format!("parameter '{}' uses a secret path", id)));
        }
        if let Some(value) = r.properties.get("Value") {
            plain.push((id.as_str(), value));
        }
    }

    for (id, r) in &template.resources {
        if r.resource_type != "AWS::SecretsManager::Secret" {
            continue;
        }
        let Some(name) = r.properties.get("Name").and_then(Value::as_str) else {
            continue;
        };
        if !name.starts_with(&root) {
            continue;
        }
        if !name.ends_with("/secrets") {
            out.push(finding(NAME, format!("secret '{}' is not a /secrets object", id)));
        }
        for value in secret_values(r) {
            for (param_id, param_value) in &plain {
                if *param_value == value {
                    out.push(finding(
                        NAME,
                        format!("secret '{}' value is also published by '{}'", id, param_id),
                    ));
                }
            }
        }
    }
    out
}

/// The container reads exactly the contracted environment names.
pub fn check_environment_contract(template: &Template) -> Vec<Finding> {
    const NAME: &str = "environment-contract";
    let mut out = Vec::new();
    for id in template.ids_of_type("AWS::ECS::TaskDefinition") {
        let names: Vec<String> = template.resources[id]
            .properties
            .get("ContainerDefinitions")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("Environment"))
            .and_then(Value::as_array)
            .map(|env| {
                env.iter()
                    .filter_map(|e| e.get("Name").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let (missing, unexpected) = environment_drift(&names);
        for key in missing {
            out.push(finding(NAME, format!("{}: missing {}", id, key)));
        }
        for key in unexpected {
            out.push(finding(NAME, format!("{}: unexpected {}", id, key)));
        }
    }
    out
}

/// Two clean builds agree on resource count, logical ids, and template hash.
pub fn check_determinism(config: &StackConfig, first: &Template) -> Result<Vec<Finding>> {
    const NAME: &str = "determinism";
    let second = build_app_stack(config)?.template;
    let mut out = Vec::new();
    if first.resources.len() != second.resources.len() {
        out.push(finding(
            NAME,
            format!(
                "resource count differs: {} vs {}",
                first.resources.len(),
                second.resources.len()
            ),
        ));
    }
    let a: Vec<&String> = first.resources.keys().collect();
    let b: Vec<&String> = second.resources.keys().collect();
    if a != b {
        out.push(finding(NAME, "logical ids differ between builds".to_string()));
    }
    if hasher::hash_template(first)? != hasher::hash_template(&second)? {
        out.push(finding(NAME, "template hash differs between builds".to_string()));
    }
    Ok(out)
}

/// Build the stack and run every check against it.
pub fn run_all(config: &StackConfig) -> Result<Vec<CheckResult>> {
    let app = build_app_stack(config)?;
    let t = &app.template;
    let results = vec![
        CheckResult {
            name: "reference-order",
            findings: check_reference_order(t),
        },
        CheckResult {
            name: "route-guard",
            findings: check_route_guard(t),
        },
        CheckResult {
            name: "store-separation",
            findings: check_store_separation(config, t),
        },
        CheckResult {
            name: "environment-contract",
            findings: check_environment_contract(t),
        },
        CheckResult {
            name: "determinism",
            findings: check_determinism(config, t)?,
        },
    ];
    let failed = results.iter().filter(|r| !r.passed()).count();
    tracing::info!(checks = results.len(), failed, "contract checks finished");
    Ok(results)
}
