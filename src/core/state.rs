//! Lock file management: load, save (atomic), build from a template.

use super::error::{InfraError, Result};
use super::template::Template;
use super::types::{ResourceLock, ResourceStatus, StackConfig, StateLock};
use crate::tripwire::eventlog::now_iso8601;
use crate::tripwire::hasher;
use std::path::{Path, PathBuf};

pub const LOCK_SCHEMA: &str = "1.0";

pub fn lock_file_path(state_dir: &Path, stack: &str) -> PathBuf {
    state_dir.join(stack).join("state.lock.yaml")
}

/// Load the stack's lock. `None` when nothing has been deployed.
pub fn load_lock(state_dir: &Path, stack: &str) -> Result<Option<StateLock>> {
    let path = lock_file_path(state_dir, stack);
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path)?;
    let lock: StateLock = serde_yaml_ng::from_str(&content)
        .map_err(|e| InfraError::State(format!("invalid lock file {}: {}", path.display(), e)))?;
    Ok(Some(lock))
}

/// Save a lock atomically (write to temp, then rename).
pub fn save_lock(state_dir: &Path, lock: &StateLock) -> Result<()> {
    let path = lock_file_path(state_dir, &lock.stack);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let yaml = serde_yaml_ng::to_string(lock)?;
    let tmp_path = path.with_extension("lock.yaml.tmp");
    std::fs::write(&tmp_path, &yaml)?;
    std::fs::rename(&tmp_path, &path)?;
    tracing::debug!(path = %path.display(), resources = lock.resources.len(), "lock saved");
    Ok(())
}

/// Remove the stack's lock. Missing is fine.
pub fn remove_lock(state_dir: &Path, stack: &str) -> Result<bool> {
    let path = lock_file_path(state_dir, stack);
    if !path.exists() {
        return Ok(false);
    }
    std::fs::remove_file(&path)?;
    Ok(true)
}

/// Lock describing `template` as deployed for `config`.
pub fn lock_from_template(config: &StackConfig, template: &Template) -> Result<StateLock> {
    let now = now_iso8601();
    let mut resources = indexmap::IndexMap::new();
    for (id, resource) in &template.resources {
        resources.insert(
            id.clone(),
            ResourceLock {
                resource_type: resource.resource_type.clone(),
                status: ResourceStatus::Deployed,
                applied_at: Some(now.clone()),
                hash: hasher::hash_resource(resource)?,
            },
        );
    }
    Ok(StateLock {
        schema: LOCK_SCHEMA.to_string(),
        stack: config.name.clone(),
        account: config.account_id().to_string(),
        region: config.region_name().to_string(),
        generated_at: now,
        generator: format!("refactor-infra {}", env!("CARGO_PKG_VERSION")),
        template_hash: hasher::hash_template(template)?,
        resources,
    })
}
