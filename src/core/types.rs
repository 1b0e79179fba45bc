//! Configuration, plan, state-lock, and provenance types.
//!
//! `infra.yaml` deserializes into [`StackConfig`]. Every section carries the
//! defaults the deployed stack has always used, so a minimal file only needs
//! `version`, `name`, and the target account/region.

use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ============================================================================
// Top-level infra.yaml
// ============================================================================

/// Root configuration: the desired stack.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StackConfig {
    /// Schema version (must be "1.0")
    pub version: String,

    /// Stack name as known to the orchestration engine
    pub name: String,

    /// Optional description, emitted into the template
    #[serde(default)]
    pub description: Option<String>,

    /// Naming prefix shared by buckets, domains, and store keys
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Target account id (12 digits); CLI/env may override
    #[serde(default)]
    pub account: Option<String>,

    /// Target region; CLI/env may override
    #[serde(default)]
    pub region: Option<String>,

    /// Free-form template parameters (`{{params.key}}`)
    #[serde(default)]
    pub params: HashMap<String, String>,

    /// Tags applied to every taggable resource
    #[serde(default = "default_tags")]
    pub tags: IndexMap<String, String>,

    #[serde(default)]
    pub naming: NamingConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub identity: IdentityConfig,

    #[serde(default)]
    pub compute: ComputeConfig,

    #[serde(default)]
    pub ai: AiConfig,

    #[serde(default)]
    pub ci: CiConfig,

    #[serde(default)]
    pub policy: Policy,
}

impl StackConfig {
    /// Account id, or an empty string when unresolved (validation rejects that).
    pub fn account_id(&self) -> &str {
        self.account.as_deref().unwrap_or_default()
    }

    /// Region, or an empty string when unresolved.
    pub fn region_name(&self) -> &str {
        self.region.as_deref().unwrap_or_default()
    }
}

fn default_prefix() -> String {
    "code-refactor".to_string()
}

fn default_tags() -> IndexMap<String, String> {
    IndexMap::from([("Project".to_string(), "code-refactor".to_string())])
}

// ============================================================================
// Sections
// ============================================================================

/// Name templates. Placeholders: `{{prefix}}`, `{{account}}`, `{{region}}`,
/// `{{params.key}}`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NamingConfig {
    #[serde(default = "default_bucket_pattern")]
    pub bucket: String,

    #[serde(default = "default_frontend_bucket_pattern")]
    pub frontend_bucket: String,

    #[serde(default = "default_domain_prefix_pattern")]
    pub domain_prefix: String,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            bucket: default_bucket_pattern(),
            frontend_bucket: default_frontend_bucket_pattern(),
            domain_prefix: default_domain_prefix_pattern(),
        }
    }
}

fn default_bucket_pattern() -> String {
    "{{prefix}}-bucket-{{account}}-{{region}}".to_string()
}

fn default_frontend_bucket_pattern() -> String {
    "{{prefix}}-frontend-{{account}}-{{region}}".to_string()
}

fn default_domain_prefix_pattern() -> String {
    "{{prefix}}-{{account}}".to_string()
}

/// Network topology.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NetworkConfig {
    /// Availability zones to span (at least 2)
    #[serde(default = "default_max_azs")]
    pub max_azs: u8,

    /// NAT gateways; only 0 is supported (public subnets, no egress NAT)
    #[serde(default)]
    pub nat_gateways: u8,

    /// VPC CIDR block (must be a /16)
    #[serde(default = "default_cidr")]
    pub cidr: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            max_azs: default_max_azs(),
            nat_gateways: 0,
            cidr: default_cidr(),
        }
    }
}

fn default_max_azs() -> u8 {
    2
}

fn default_cidr() -> String {
    "10.0.0.0/16".to_string()
}

/// Database cluster and its credential policy.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_name")]
    pub name: String,

    #[serde(default = "default_cluster_identifier")]
    pub cluster_identifier: String,

    #[serde(default = "default_engine_version")]
    pub engine_version: String,

    #[serde(default = "default_db_port")]
    pub port: u16,

    #[serde(default = "default_min_capacity")]
    pub min_capacity: f64,

    #[serde(default = "default_max_capacity")]
    pub max_capacity: f64,

    #[serde(default = "default_username")]
    pub username: String,

    #[serde(default = "default_password_length")]
    pub password_length: u8,

    #[serde(default = "default_exclude_characters")]
    pub exclude_characters: String,

    #[serde(default)]
    pub migration: MigrationConfig,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            name: default_db_name(),
            cluster_identifier: default_cluster_identifier(),
            engine_version: default_engine_version(),
            port: default_db_port(),
            min_capacity: default_min_capacity(),
            max_capacity: default_max_capacity(),
            username: default_username(),
            password_length: default_password_length(),
            exclude_characters: default_exclude_characters(),
            migration: MigrationConfig::default(),
        }
    }
}

fn default_db_name() -> String {
    "code_refactor_db".to_string()
}

fn default_cluster_identifier() -> String {
    "code-refactor-cluster".to_string()
}

fn default_engine_version() -> String {
    "15.12".to_string()
}

fn default_db_port() -> u16 {
    5432
}

fn default_min_capacity() -> f64 {
    0.5
}

fn default_max_capacity() -> f64 {
    4.0
}

fn default_username() -> String {
    "postgres".to_string()
}

fn default_password_length() -> u8 {
    30
}

fn default_exclude_characters() -> String {
    "\"@/\\".to_string()
}

/// Packaged schema-migration function artifact.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MigrationConfig {
    /// Bucket holding the packaged handler (templated)
    #[serde(default = "default_code_bucket")]
    pub code_bucket: String,

    #[serde(default = "default_code_key")]
    pub code_key: String,

    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: u32,

    #[serde(default = "default_true")]
    pub auto_migrate: bool,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            code_bucket: default_code_bucket(),
            code_key: default_code_key(),
            embedding_dimensions: default_embedding_dimensions(),
            auto_migrate: true,
        }
    }
}

fn default_code_bucket() -> String {
    "{{prefix}}-assets-{{account}}-{{region}}".to_string()
}

fn default_code_key() -> String {
    "rds_schema_lambda.zip".to_string()
}

fn default_embedding_dimensions() -> u32 {
    1536
}

/// User directory and hosted login.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct IdentityConfig {
    #[serde(default = "default_password_min_length")]
    pub password_min_length: u8,

    #[serde(default = "default_callback_urls")]
    pub callback_urls: Vec<String>,

    #[serde(default = "default_logout_urls")]
    pub logout_urls: Vec<String>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            password_min_length: default_password_min_length(),
            callback_urls: default_callback_urls(),
            logout_urls: default_logout_urls(),
        }
    }
}

fn default_password_min_length() -> u8 {
    8
}

fn default_callback_urls() -> Vec<String> {
    vec![
        "https://localhost:3000/callback".to_string(),
        "https://example.com/callback".to_string(),
    ]
}

fn default_logout_urls() -> Vec<String> {
    vec![
        "https://localhost:3000/logout".to_string(),
        "https://example.com/logout".to_string(),
    ]
}

/// Container compute.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ComputeConfig {
    #[serde(default = "default_cpu")]
    pub cpu: u32,

    #[serde(default = "default_memory")]
    pub memory_mib: u32,

    #[serde(default = "default_container_port")]
    pub container_port: u16,

    #[serde(default = "default_desired_count")]
    pub desired_count: u32,

    #[serde(default = "default_repository_name")]
    pub repository_name: String,

    #[serde(default = "default_image_tag")]
    pub image_tag: String,

    #[serde(default = "default_log_group")]
    pub log_group: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u32,

    #[serde(default = "default_metrics_namespace")]
    pub metrics_namespace: String,

    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            cpu: default_cpu(),
            memory_mib: default_memory(),
            container_port: default_container_port(),
            desired_count: default_desired_count(),
            repository_name: default_repository_name(),
            image_tag: default_image_tag(),
            log_group: default_log_group(),
            log_level: default_log_level(),
            timeout_seconds: default_timeout_seconds(),
            metrics_namespace: default_metrics_namespace(),
            service_name: default_service_name(),
        }
    }
}

fn default_cpu() -> u32 {
    512
}

fn default_memory() -> u32 {
    1024
}

fn default_container_port() -> u16 {
    8080
}

fn default_desired_count() -> u32 {
    1
}

fn default_repository_name() -> String {
    "refactor-ecr-repo".to_string()
}

fn default_image_tag() -> String {
    "latest".to_string()
}

fn default_log_group() -> String {
    "/ecs/code-refactor".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_timeout_seconds() -> u32 {
    180
}

fn default_metrics_namespace() -> String {
    "CodeRefactorTool/API".to_string()
}

fn default_service_name() -> String {
    "code-refactor-api".to_string()
}

/// Foundation models the agent role may invoke.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AiConfig {
    #[serde(default = "default_foundation_models")]
    pub foundation_models: Vec<String>,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            foundation_models: default_foundation_models(),
        }
    }
}

fn default_foundation_models() -> Vec<String> {
    vec![
        "anthropic.claude-3-5-sonnet-20240620-v1:0".to_string(),
        "anthropic.claude-3-haiku-20240307-v1:0".to_string(),
        "amazon.titan-embed-text-v1".to_string(),
    ]
}

/// CI runner trust.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CiConfig {
    #[serde(default = "default_ci_role_name")]
    pub role_name: String,

    /// OIDC `sub` patterns allowed to assume the CI role
    #[serde(default = "default_oidc_subjects")]
    pub oidc_subjects: Vec<String>,
}

impl Default for CiConfig {
    fn default() -> Self {
        Self {
            role_name: default_ci_role_name(),
            oidc_subjects: default_oidc_subjects(),
        }
    }
}

fn default_ci_role_name() -> String {
    "CodeRefactor-GitHubActions-Role".to_string()
}

fn default_oidc_subjects() -> Vec<String> {
    vec![
        "repo:kazemisoroush/code-refactoring-tool:*".to_string(),
        "repo:kazemisoroush/code-refactoring-ui:*".to_string(),
    ]
}

// ============================================================================
// Policy
// ============================================================================

/// Execution policy.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Policy {
    /// Append provenance events on every deploy/destroy
    #[serde(default = "default_true")]
    pub tripwire: bool,

    /// Persist the deployed lock after a successful deploy
    #[serde(default = "default_true")]
    pub lock_file: bool,

    /// Run the contract checks before every deploy
    #[serde(default = "default_true")]
    pub check_before_deploy: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            tripwire: true,
            lock_file: true,
            check_before_deploy: true,
        }
    }
}

fn default_true() -> bool {
    true
}

// ============================================================================
// State / Lock file
// ============================================================================

/// Per-stack lock written after a successful deploy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateLock {
    pub schema: String,
    pub stack: String,
    pub account: String,
    pub region: String,
    pub generated_at: String,
    pub generator: String,

    /// BLAKE3 over the whole synthesized template
    pub template_hash: String,

    /// Per-resource state, in declaration order
    pub resources: IndexMap<String, ResourceLock>,
}

/// Per-resource lock entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLock {
    #[serde(rename = "type")]
    pub resource_type: String,

    pub status: ResourceStatus,

    #[serde(default)]
    pub applied_at: Option<String>,

    /// BLAKE3 of the resource's canonical JSON
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    Deployed,
    Failed,
    Unknown,
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deployed => write!(f, "DEPLOYED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

// ============================================================================
// Plan
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanAction {
    Create,
    Update,
    Destroy,
    NoOp,
}

impl fmt::Display for PlanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "CREATE"),
            Self::Update => write!(f, "UPDATE"),
            Self::Destroy => write!(f, "DESTROY"),
            Self::NoOp => write!(f, "NO-OP"),
        }
    }
}

/// A single planned change.
#[derive(Debug, Clone)]
pub struct PlannedChange {
    pub logical_id: String,
    pub resource_type: String,
    pub action: PlanAction,
    pub description: String,
}

/// Full change plan for one stack.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub name: String,
    pub changes: Vec<PlannedChange>,

    /// Dependency order of the desired template (logical ids)
    pub execution_order: Vec<String>,

    pub to_create: u32,
    pub to_update: u32,
    pub to_destroy: u32,
    pub unchanged: u32,
}

impl ExecutionPlan {
    pub fn has_changes(&self) -> bool {
        self.to_create + self.to_update + self.to_destroy > 0
    }
}

// ============================================================================
// Provenance events
// ============================================================================

/// Provenance event for the JSONL event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProvenanceEvent {
    DeployStarted {
        stack: String,
        run_id: String,
        version: String,
        template_hash: String,
    },
    DeployCompleted {
        stack: String,
        run_id: String,
        created: u32,
        updated: u32,
        destroyed: u32,
        unchanged: u32,
        total_seconds: f64,
    },
    DeployFailed {
        stack: String,
        run_id: String,
        error: String,
    },
    DestroyStarted {
        stack: String,
        run_id: String,
    },
    DestroyCompleted {
        stack: String,
        run_id: String,
        total_seconds: f64,
    },
    DestroyFailed {
        stack: String,
        run_id: String,
        error: String,
    },
    CleanupAttempted {
        stack: String,
        step: String,
        success: bool,
    },
}

/// Timestamped event wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: String,
    #[serde(flatten)]
    pub event: ProvenanceEvent,
}

// ============================================================================
// Deploy result
// ============================================================================

#[derive(Debug, Clone)]
pub struct DeployResult {
    pub stack: String,
    pub created: u32,
    pub updated: u32,
    pub destroyed: u32,
    pub unchanged: u32,
    pub total_duration: std::time::Duration,
}
