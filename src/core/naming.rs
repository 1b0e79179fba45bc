//! Physical names and ARN patterns derived from the stack context.

use super::error::Result;
use super::resolver::resolve_template;
use super::types::StackConfig;

pub const GITHUB_OIDC_HOST: &str = "token.actions.githubusercontent.com";

/// Knowledge-base bucket, e.g. `code-refactor-bucket-123456789012-us-east-1`.
pub fn bucket_name(config: &StackConfig) -> Result<String> {
    resolve_template(&config.naming.bucket, config)
}

pub fn frontend_bucket_name(config: &StackConfig) -> Result<String> {
    resolve_template(&config.naming.frontend_bucket, config)
}

/// Hosted-login domain prefix, e.g. `code-refactor-123456789012`.
pub fn domain_prefix(config: &StackConfig) -> Result<String> {
    resolve_template(&config.naming.domain_prefix, config)
}

pub fn migration_code_bucket(config: &StackConfig) -> Result<String> {
    resolve_template(&config.database.migration.code_bucket, config)
}

/// Full hosted-login URL for a domain prefix.
pub fn hosted_ui_url(domain_prefix: &str, region: &str) -> String {
    format!("https://{}.auth.{}.amazoncognito.com", domain_prefix, region)
}

/// Root of every store key, e.g. `/code-refactor`.
pub fn store_root(prefix: &str) -> String {
    format!("/{}", prefix)
}

/// Logical id of a parameter: `Param` followed by the key without the
/// store root, slashes, or dashes.
pub fn param_logical_id(prefix: &str, key: &str) -> String {
    let root = format!("{}/", store_root(prefix));
    let tail = key.strip_prefix(&root).unwrap_or(key);
    let cleaned: String = tail.chars().filter(|c| *c != '/' && *c != '-').collect();
    format!("Param{}", cleaned)
}

pub fn parameter_path_arn(config: &StackConfig) -> String {
    format!(
        "arn:aws:ssm:{}:{}:parameter/{}/*",
        config.region_name(),
        config.account_id(),
        config.prefix
    )
}

pub fn secret_path_arn(config: &StackConfig) -> String {
    format!(
        "arn:aws:secretsmanager:{}:{}:secret:/{}/*",
        config.region_name(),
        config.account_id(),
        config.prefix
    )
}

pub fn stack_arn(config: &StackConfig) -> String {
    format!(
        "arn:aws:cloudformation:{}:{}:stack/{}/*",
        config.region_name(),
        config.account_id(),
        config.name
    )
}

pub fn foundation_model_arn(region: &str, model: &str) -> String {
    format!("arn:aws:bedrock:{}::foundation-model/{}", region, model)
}

pub fn knowledge_base_arn(config: &StackConfig) -> String {
    format!(
        "arn:aws:bedrock:{}:{}:knowledge-base/*",
        config.region_name(),
        config.account_id()
    )
}

pub fn prompt_arn(config: &StackConfig) -> String {
    format!(
        "arn:aws:bedrock:{}:{}:prompt/*",
        config.region_name(),
        config.account_id()
    )
}

pub fn oidc_provider_arn(account: &str) -> String {
    format!("arn:aws:iam::{}:oidc-provider/{}", account, GITHUB_OIDC_HOST)
}
