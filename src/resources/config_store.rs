//! Runtime configuration published for the backend, the frontend, and deployments.
//!
//! Plain records land in the parameter store, one parameter per key. Secret
//! records are grouped per consumer into one JSON secret under
//! `/{prefix}/{consumer}/secrets`. A value is published to exactly one store.

use super::compute::Compute;
use super::database::Database;
use super::edge::Edge;
use super::frontend::Frontend;
use super::identity::Identity;
use super::roles::TrustRoles;
use super::storage::Storage;
use crate::core::error::{InfraError, Result};
use crate::core::naming;
use crate::core::stack::Stack;
use crate::core::template::{sub_with, CfnResource, Handle};
use serde_json::{json, Map, Value};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sensitivity {
    Plain,
    Secret,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Consumer {
    Backend,
    Frontend,
    Deployment,
}

impl Consumer {
    pub fn segment(self) -> &'static str {
        match self {
            Self::Backend => "backend",
            Self::Frontend => "frontend",
            Self::Deployment => "deployment",
        }
    }
}

impl fmt::Display for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.segment())
    }
}

/// One published configuration value.
///
/// For plain records `key` is the full parameter name. For secret records it
/// is the field name inside the consumer's secret object.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigRecord {
    pub key: String,
    pub value: Value,
    pub sensitivity: Sensitivity,
    pub consumer: Consumer,
}

impl ConfigRecord {
    fn plain(prefix: &str, consumer: Consumer, name: &str, value: Value) -> Self {
        Self {
            key: format!("{}/{}/{}", naming::store_root(prefix), consumer, name),
            value,
            sensitivity: Sensitivity::Plain,
            consumer,
        }
    }

    fn secret(consumer: Consumer, field: &str, value: Value) -> Self {
        Self {
            key: field.to_string(),
            value,
            sensitivity: Sensitivity::Secret,
            consumer,
        }
    }
}

/// Handles the publisher reads from.
#[derive(Debug, Clone, Copy)]
pub struct Sources<'a> {
    pub storage: &'a Storage,
    pub database: &'a Database,
    pub identity: &'a Identity,
    pub roles: &'a TrustRoles,
    pub compute: &'a Compute,
    pub edge: &'a Edge,
    pub frontend: &'a Frontend,
}

/// Every record, in publication order.
pub fn records(stack: &Stack, src: &Sources<'_>) -> Vec<ConfigRecord> {
    use Consumer::{Backend, Deployment, Frontend as Web};

    let prefix = stack.prefix();
    let region = json!(stack.region());
    let api_url = src.edge.api_url();
    let repository_uri = src.compute.repository_uri();

    vec![
        ConfigRecord::plain(prefix, Backend, "api-gateway-url", api_url.clone()),
        ConfigRecord::plain(prefix, Backend, "cognito-user-pool-id", src.identity.user_pool.reference()),
        ConfigRecord::plain(prefix, Backend, "cognito-region", region.clone()),
        ConfigRecord::plain(prefix, Backend, "s3-bucket-name", json!(src.storage.name)),
        ConfigRecord::plain(prefix, Backend, "rds-cluster-arn", src.database.cluster_arn()),
        ConfigRecord::plain(prefix, Backend, "aws-region", region.clone()),
        ConfigRecord::plain(prefix, Backend, "aws-account-id", json!(stack.account())),
        ConfigRecord::plain(prefix, Backend, "ecr-repository-uri", repository_uri.clone()),
        ConfigRecord::plain(prefix, Backend, "ecs-cluster-name", src.compute.cluster.reference()),
        ConfigRecord::plain(
            prefix,
            Backend,
            "rds-postgres-schema-ensure-lambda-arn",
            src.database.migration_function.arn(),
        ),
        ConfigRecord::plain(prefix, Web, "api-base-url", api_url),
        ConfigRecord::plain(prefix, Web, "cognito-user-pool-id", src.identity.user_pool.reference()),
        ConfigRecord::plain(prefix, Web, "cognito-hosted-ui-url", json!(src.identity.hosted_ui_url)),
        ConfigRecord::plain(prefix, Web, "aws-region", region.clone()),
        ConfigRecord::plain(prefix, Web, "cloudfront-domain", src.frontend.url()),
        ConfigRecord::plain(prefix, Deployment, "frontend-bucket", json!(src.frontend.name)),
        ConfigRecord::plain(
            prefix,
            Deployment,
            "cloudfront-distribution-id",
            src.frontend.distribution_id(),
        ),
        ConfigRecord::plain(prefix, Deployment, "ecr-repository-uri", repository_uri),
        ConfigRecord::plain(prefix, Deployment, "aws-region", region),
        ConfigRecord::secret(Backend, "rds_credentials_secret_arn", src.database.secret_arn()),
        ConfigRecord::secret(Backend, "bedrock_knowledge_base_role_arn", src.roles.knowledge_base.arn()),
        ConfigRecord::secret(Backend, "bedrock_agent_role_arn", src.roles.agent.arn()),
        ConfigRecord::secret(Backend, "cognito_client_id", src.identity.client.reference()),
        ConfigRecord::secret(Web, "cognito_client_id", src.identity.client.reference()),
    ]
}

/// `{"field":"${field}",...}` rendered by the engine from the record values.
pub fn secret_string(fields: &[&ConfigRecord]) -> Value {
    let body: Vec<String> = fields
        .iter()
        .map(|r| format!("\"{}\":\"${{{}}}\"", r.key, r.key))
        .collect();
    let vars: Map<String, Value> = fields
        .iter()
        .map(|r| (r.key.clone(), r.value.clone()))
        .collect();
    sub_with(format!("{{{}}}", body.join(",")), vars)
}

fn secret_logical_id(consumer: Consumer) -> &'static str {
    match consumer {
        Consumer::Backend => "BackendSecrets",
        Consumer::Frontend => "FrontendSecrets",
        Consumer::Deployment => "DeploymentSecrets",
    }
}

fn secret_description(consumer: Consumer) -> String {
    let mut label = consumer.segment().to_string();
    if let Some(first) = label.get_mut(0..1) {
        first.make_ascii_uppercase();
    }
    format!("{} application secrets", label)
}

#[derive(Debug, Clone)]
pub struct ConfigStores {
    pub parameters: Vec<Handle>,
    pub secrets: Vec<Handle>,
    pub records: Vec<ConfigRecord>,
}

pub fn declare_config_stores(stack: &mut Stack, src: &Sources<'_>) -> Result<ConfigStores> {
    let records = records(stack, src);
    let prefix = stack.prefix().to_string();
    let root = format!("{}/", naming::store_root(&prefix));

    let mut parameters = Vec::new();
    for record in records.iter().filter(|r| r.sensitivity == Sensitivity::Plain) {
        if !record.key.starts_with(&root) {
            return Err(InfraError::Validation(format!(
                "parameter '{}' is outside {}",
                record.key, root
            )));
        }
        parameters.push(stack.declare(
            &naming::param_logical_id(&prefix, &record.key),
            CfnResource::new("AWS::SSM::Parameter")
                .prop("Name", record.key.as_str())
                .prop("Type", "String")
                .prop("Value", record.value.clone())
                .prop("Tier", "Standard")
                .prop(
                    "Description",
                    format!("Configuration parameter for {}", record.key),
                ),
        )?);
    }

    let mut secrets = Vec::new();
    for consumer in [Consumer::Backend, Consumer::Frontend, Consumer::Deployment] {
        let fields: Vec<&ConfigRecord> = records
            .iter()
            .filter(|r| r.sensitivity == Sensitivity::Secret && r.consumer == consumer)
            .collect();
        if fields.is_empty() {
            continue;
        }
        secrets.push(stack.declare(
            secret_logical_id(consumer),
            CfnResource::new("AWS::SecretsManager::Secret")
                .prop("Name", format!("{}{}/secrets", root, consumer))
                .prop("Description", secret_description(consumer))
                .prop("SecretString", secret_string(&fields))
                .destroy_on_removal(),
        )?);
    }

    tracing::info!(
        parameters = parameters.len(),
        secrets = secrets.len(),
        "configuration stores declared"
    );
    Ok(ConfigStores {
        parameters,
        secrets,
        records,
    })
}
