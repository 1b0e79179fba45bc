//! infra.yaml parsing and validation.
//!
//! Parses the stack file and validates structural constraints:
//! - Version must be "1.0"
//! - Account must be 12 digits, region must look like `us-east-1`
//! - At least two availability zones, no NAT gateways, a /16 VPC
//! - Database capacity and credential policy within engine limits

use super::error::{InfraError, Result};
use super::resolver::resolve_template;
use super::types::*;
use std::path::Path;

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl ValidationError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Parse an infra.yaml file from disk.
pub fn parse_config_file(path: &Path) -> Result<StackConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| InfraError::Read {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    parse_config(&content)
}

/// Parse an infra.yaml from a string.
pub fn parse_config(yaml: &str) -> Result<StackConfig> {
    Ok(serde_yaml_ng::from_str(yaml)?)
}

/// CLI/environment overrides win over the file.
pub fn apply_overrides(config: &mut StackConfig, account: Option<&str>, region: Option<&str>) {
    if let Some(account) = account {
        config.account = Some(account.to_string());
    }
    if let Some(region) = region {
        config.region = Some(region.to_string());
    }
}

/// Parse, override, and validate in one step. Validation errors are joined.
pub fn load_config(path: &Path, account: Option<&str>, region: Option<&str>) -> Result<StackConfig> {
    let mut config = parse_config_file(path)?;
    apply_overrides(&mut config, account, region);
    let errors = validate_config(&config);
    if !errors.is_empty() {
        let joined: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        return Err(InfraError::Validation(joined.join("; ")));
    }
    Ok(config)
}

fn is_account_id(s: &str) -> bool {
    s.len() == 12 && s.chars().all(|c| c.is_ascii_digit())
}

/// `xx-name-N` style region codes, e.g. `us-east-1`, `ap-southeast-2`.
fn is_region(s: &str) -> bool {
    let parts: Vec<&str> = s.split('-').collect();
    parts.len() >= 3
        && parts[0].len() == 2
        && parts[0].chars().all(|c| c.is_ascii_lowercase())
        && parts[1..parts.len() - 1]
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_lowercase()))
        && parts
            .last()
            .is_some_and(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}

fn is_slash16(cidr: &str) -> bool {
    let Some((addr, mask)) = cidr.split_once('/') else {
        return false;
    };
    let octets: Vec<&str> = addr.split('.').collect();
    mask == "16"
        && octets.len() == 4
        && octets.iter().all(|o| o.parse::<u8>().is_ok())
        && octets[2] == "0"
        && octets[3] == "0"
}

/// Validate a parsed config. Returns a list of errors (empty = valid).
pub fn validate_config(config: &StackConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(ValidationError::new(format!(
            "version must be \"1.0\", got \"{}\"",
            config.version
        )));
    }

    if config.name.is_empty() {
        errors.push(ValidationError::new("name must not be empty"));
    } else if !config
        .name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-')
        || !config.name.starts_with(|c: char| c.is_ascii_alphabetic())
    {
        errors.push(ValidationError::new(format!(
            "stack name '{}' must start with a letter and contain only letters, digits, and '-'",
            config.name
        )));
    }

    if config.prefix.is_empty()
        || !config
            .prefix
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        errors.push(ValidationError::new(format!(
            "prefix '{}' must be non-empty lowercase letters, digits, or '-'",
            config.prefix
        )));
    }

    match config.account.as_deref() {
        None | Some("") => errors.push(ValidationError::new(
            "account is not set (infra.yaml, --account, or CDK_DEFAULT_ACCOUNT)",
        )),
        Some(a) if !is_account_id(a) => errors.push(ValidationError::new(format!(
            "account '{}' must be 12 digits",
            a
        ))),
        _ => {}
    }

    match config.region.as_deref() {
        None | Some("") => errors.push(ValidationError::new(
            "region is not set (infra.yaml, --region, or CDK_DEFAULT_REGION)",
        )),
        Some(r) if !is_region(r) => {
            errors.push(ValidationError::new(format!("region '{}' is not valid", r)))
        }
        _ => {}
    }

    // Network
    if config.network.max_azs < 2 {
        errors.push(ValidationError::new(format!(
            "network.max_azs must be at least 2 (the database subnet group needs two zones), got {}",
            config.network.max_azs
        )));
    }
    if config.network.nat_gateways != 0 {
        errors.push(ValidationError::new(format!(
            "network.nat_gateways must be 0, got {}",
            config.network.nat_gateways
        )));
    }
    if !is_slash16(&config.network.cidr) {
        errors.push(ValidationError::new(format!(
            "network.cidr must be a /16 block like 10.0.0.0/16, got '{}'",
            config.network.cidr
        )));
    }

    // Database
    let db = &config.database;
    if db.min_capacity < 0.5 || db.max_capacity > 256.0 || db.min_capacity > db.max_capacity {
        errors.push(ValidationError::new(format!(
            "database capacity must satisfy 0.5 <= min <= max <= 256, got {}..{}",
            db.min_capacity, db.max_capacity
        )));
    }
    if !(8..=128).contains(&db.password_length) {
        errors.push(ValidationError::new(format!(
            "database.password_length must be 8..=128, got {}",
            db.password_length
        )));
    }
    if db.name.is_empty()
        || !db.name.starts_with(|c: char| c.is_ascii_alphabetic())
        || !db.name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        errors.push(ValidationError::new(format!(
            "database.name '{}' must start with a letter and contain only letters, digits, or '_'",
            db.name
        )));
    }
    if db.username.is_empty() {
        errors.push(ValidationError::new("database.username must not be empty"));
    }

    // Identity
    if config.identity.password_min_length < 6 {
        errors.push(ValidationError::new(format!(
            "identity.password_min_length must be at least 6, got {}",
            config.identity.password_min_length
        )));
    }

    // Compute
    if config.compute.container_port == 0 {
        errors.push(ValidationError::new("compute.container_port must not be 0"));
    }
    if config.compute.cpu == 0 || config.compute.memory_mib == 0 {
        errors.push(ValidationError::new(
            "compute.cpu and compute.memory_mib must be positive",
        ));
    }

    // CI
    if config.ci.oidc_subjects.is_empty() {
        errors.push(ValidationError::new(
            "ci.oidc_subjects must name at least one repository",
        ));
    }

    // Name templates must render
    for (field, pattern) in [
        ("naming.bucket", &config.naming.bucket),
        ("naming.frontend_bucket", &config.naming.frontend_bucket),
        ("naming.domain_prefix", &config.naming.domain_prefix),
        ("database.migration.code_bucket", &config.database.migration.code_bucket),
    ] {
        if let Err(e) = resolve_template(pattern, config) {
            errors.push(ValidationError::new(format!("{}: {}", field, e)));
        }
    }

    errors
}
