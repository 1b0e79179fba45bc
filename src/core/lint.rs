//! Naming lint over the config and the synthesized template.
//!
//! These catch names the engine or the managed services would reject at
//! deploy time, before anything is submitted.

use super::parser::validate_config;
use super::stack::MAX_LOGICAL_ID_LEN;
use super::template::Template;
use super::types::StackConfig;
use regex::Regex;
use serde_json::Value;
use std::fmt;
use std::sync::LazyLock;

static LOGICAL_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9]+$").expect("valid regex"));
static BUCKET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9.-]{1,61}[a-z0-9]$").expect("valid regex"));
static IPV4: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}$").expect("valid regex"));
static DOMAIN_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?$").expect("valid regex"));
static EXPORT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9:-]{1,255}$").expect("valid regex"));
static ROLE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\w+=,.@-]{1,64}$").expect("valid regex"));

/// Words the identity service refuses inside a hosted domain prefix.
const RESERVED_DOMAIN_WORDS: [&str; 3] = ["aws", "amazon", "cognito"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LintIssue {
    pub rule: &'static str,
    pub subject: String,
    pub message: String,
}

impl fmt::Display for LintIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]: {}", self.subject, self.rule, self.message)
    }
}

fn issue(rule: &'static str, subject: &str, message: impl Into<String>) -> LintIssue {
    LintIssue {
        rule,
        subject: subject.to_string(),
        message: message.into(),
    }
}

pub fn lint_bucket_name(subject: &str, name: &str) -> Option<LintIssue> {
    if !BUCKET.is_match(name) {
        return Some(issue(
            "bucket-name",
            subject,
            format!("'{}' must be 3-63 lowercase letters, digits, dots, or hyphens", name),
        ));
    }
    if name.contains("..") || IPV4.is_match(name) {
        return Some(issue(
            "bucket-name",
            subject,
            format!("'{}' has adjacent dots or looks like an IP address", name),
        ));
    }
    None
}

pub fn lint_domain_prefix(subject: &str, prefix: &str) -> Option<LintIssue> {
    if !DOMAIN_PREFIX.is_match(prefix) {
        return Some(issue(
            "domain-prefix",
            subject,
            format!("'{}' must be lowercase letters, digits, and inner hyphens", prefix),
        ));
    }
    RESERVED_DOMAIN_WORDS
        .iter()
        .find(|w| prefix.contains(*w))
        .map(|w| issue("domain-prefix", subject, format!("'{}' contains reserved word '{}'", prefix, w)))
}

/// Plain keys live under `/{prefix}/{backend,frontend,deployment}/`; secrets
/// are `/{prefix}/{backend,frontend}/secrets`.
fn store_key_patterns(prefix: &str) -> Result<(Regex, Regex), regex::Error> {
    let p = regex::escape(prefix);
    let plain = Regex::new(&format!(r"^/{}/(backend|frontend|deployment)/[a-z0-9-]+$", p))?;
    let secret = Regex::new(&format!(r"^/{}/(backend|frontend)/secrets$", p))?;
    Ok((plain, secret))
}

fn str_prop<'a>(value: Option<&'a Value>) -> Option<&'a str> {
    value.and_then(Value::as_str)
}

/// Lint a synthesized template.
pub fn lint_template(config: &StackConfig, template: &Template) -> Vec<LintIssue> {
    let mut issues = Vec::new();
    let (plain_key, secret_key) = match store_key_patterns(&config.prefix) {
        Ok(patterns) => patterns,
        Err(e) => return vec![issue("store-key", &config.prefix, e.to_string())],
    };

    for (id, r) in &template.resources {
        if id.len() > MAX_LOGICAL_ID_LEN || !LOGICAL_ID.is_match(id) {
            issues.push(issue("logical-id", id, "must be 1-255 alphanumeric characters"));
        }
        let props = &r.properties;
        match r.resource_type.as_str() {
            "AWS::S3::Bucket" => {
                if let Some(name) = str_prop(props.get("BucketName")) {
                    issues.extend(lint_bucket_name(id, name));
                }
            }
            "AWS::Cognito::UserPoolDomain" => {
                if let Some(domain) = str_prop(props.get("Domain")) {
                    issues.extend(lint_domain_prefix(id, domain));
                }
            }
            "AWS::SSM::Parameter" => {
                if let Some(name) = str_prop(props.get("Name")) {
                    if !plain_key.is_match(name) {
                        issues.push(issue("store-key", id, format!("'{}' is not a plain store key", name)));
                    }
                }
            }
            "AWS::SecretsManager::Secret" => {
                if let Some(name) = str_prop(props.get("Name")) {
                    if name.starts_with('/') && !secret_key.is_match(name) {
                        issues.push(issue("store-key", id, format!("'{}' is not a secret store key", name)));
                    }
                }
            }
            "AWS::IAM::Role" => {
                if let Some(name) = str_prop(props.get("RoleName")) {
                    if !ROLE_NAME.is_match(name) {
                        issues.push(issue("role-name", id, format!("'{}' is not a valid role name", name)));
                    }
                }
            }
            _ => {}
        }
    }

    for (name, output) in &template.outputs {
        if let Some(export) = &output.export {
            if !EXPORT.is_match(&export.name) {
                issues.push(issue(
                    "export-name",
                    name,
                    format!("'{}' may only hold letters, digits, colons, and hyphens", export.name),
                ));
            }
        }
    }
    issues
}

/// Config validation errors plus template lint.
pub fn lint(config: &StackConfig, template: &Template) -> Vec<LintIssue> {
    let mut issues: Vec<LintIssue> = validate_config(config)
        .into_iter()
        .map(|e| issue("config", "infra.yaml", e.message))
        .collect();
    issues.extend(lint_template(config, template));
    tracing::debug!(issues = issues.len(), "lint finished");
    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::template::CfnResource;
    use crate::resources::app::build_app_stack;

    fn config() -> StackConfig {
        serde_yaml_ng::from_str(
            "version: \"1.0\"\nname: CodeRefactorInfra\naccount: \"123456789012\"\nregion: us-east-1\n",
        )
        .unwrap()
    }

    #[test]
    fn test_built_stack_is_clean() {
        let c = config();
        let app = build_app_stack(&c).unwrap();
        let issues = lint(&c, &app.template);
        assert!(issues.is_empty(), "{:?}", issues);
    }

    #[test]
    fn test_bucket_rules() {
        assert!(lint_bucket_name("B", "code-refactor-bucket-123456789012-us-east-1").is_none());
        assert!(lint_bucket_name("B", "Code_Refactor").is_some());
        assert!(lint_bucket_name("B", "ab").is_some());
        assert!(lint_bucket_name("B", "a..b").is_some());
        assert!(lint_bucket_name("B", "192.168.1.10").is_some());
        assert!(lint_bucket_name("B", &"a".repeat(64)).is_some());
    }

    #[test]
    fn test_domain_prefix_rules() {
        assert!(lint_domain_prefix("D", "code-refactor-123456789012").is_none());
        assert!(lint_domain_prefix("D", "-leading").is_some());
        assert!(lint_domain_prefix("D", "Upper").is_some());
        let reserved = lint_domain_prefix("D", "my-cognito-login").unwrap();
        assert!(reserved.message.contains("cognito"));
    }

    #[test]
    fn test_store_key_rules() {
        let c = config();
        let mut t = Template::new(None);
        t.resources.insert(
            "Paramok".to_string(),
            CfnResource::new("AWS::SSM::Parameter").prop("Name", "/code-refactor/backend/aws-region"),
        );
        t.resources.insert(
            "Parambad".to_string(),
            CfnResource::new("AWS::SSM::Parameter").prop("Name", "/other/backend/aws-region"),
        );
        t.resources.insert(
            "DeploySecrets".to_string(),
            CfnResource::new("AWS::SecretsManager::Secret").prop("Name", "/code-refactor/deployment/secrets"),
        );
        let issues = lint_template(&c, &t);
        let subjects: Vec<_> = issues.iter().map(|i| i.subject.as_str()).collect();
        assert_eq!(subjects, vec!["Parambad", "DeploySecrets"]);
        assert!(issues.iter().all(|i| i.rule == "store-key"));
    }

    #[test]
    fn test_config_errors_surface() {
        let mut c = config();
        c.network.max_azs = 1;
        let t = Template::new(None);
        let issues = lint(&c, &t);
        assert!(issues.iter().any(|i| i.rule == "config"));
    }
}
