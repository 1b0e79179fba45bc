//! Container cluster, image repository, roles, and the Fargate task definition.
//!
//! The container's environment is a fixed contract: the workload reads
//! exactly the names in [`CONTAINER_ENV_KEYS`], no more and no fewer.

use super::database::Database;
use super::identity::Identity;
use super::policy::{self, PARAMETER_READ_ACTIONS, SECRET_READ_ACTIONS};
use super::roles::TrustRoles;
use super::storage::Storage;
use crate::core::error::{InfraError, Result};
use crate::core::naming;
use crate::core::stack::Stack;
use crate::core::template::{sub, CfnResource, Handle};
use indexmap::IndexMap;
use serde_json::{json, Value};

pub const CONTAINER_NAME: &str = "RefactorContainer";
pub const LOG_STREAM_PREFIX: &str = "refactor";

/// Environment variable names injected into the application container.
pub const CONTAINER_ENV_KEYS: [&str; 22] = [
    "GIT_TOKEN",
    "GIT_AUTHOR",
    "GIT_EMAIL",
    "AI_DEFAULT_PROVIDER",
    "AI_LOCAL_ENABLED",
    "AI_BEDROCK_RDS_POSTGRES_CREDENTIALS_SECRET_ARN",
    "AI_BEDROCK_RDS_POSTGRES_INSTANCE_ARN",
    "AI_BEDROCK_RDS_POSTGRES_DATABASE_NAME",
    "AI_BEDROCK_RDS_POSTGRES_SCHEMA_ENSURE_LAMBDA_ARN",
    "AI_BEDROCK_REGION",
    "AI_BEDROCK_KNOWLEDGE_BASE_SERVICE_ROLE_ARN",
    "AI_BEDROCK_AGENT_SERVICE_ROLE_ARN",
    "AI_BEDROCK_S3_BUCKET_NAME",
    "COGNITO_USER_POOL_ID",
    "COGNITO_CLIENT_ID",
    "COGNITO_REGION",
    "METRICS_NAMESPACE",
    "METRICS_REGION",
    "METRICS_SERVICE_NAME",
    "METRICS_ENABLED",
    "TIMEOUT_SECONDS",
    "LOG_LEVEL",
];

#[derive(Debug, Clone)]
pub struct Compute {
    pub cluster: Handle,
    pub log_group: Handle,
    pub task_role: Handle,
    pub execution_role: Handle,
    pub repository: Handle,
    pub task_definition: Handle,
    pub container_port: u16,
}

impl Compute {
    pub fn repository_uri(&self) -> Value {
        self.repository.att("RepositoryUri")
    }
}

/// Values for every key in [`CONTAINER_ENV_KEYS`], in that order.
pub fn container_environment(
    stack: &Stack,
    database: &Database,
    storage: &Storage,
    identity: &Identity,
    roles: &TrustRoles,
) -> IndexMap<&'static str, Value> {
    let c = &stack.config().compute;
    let region = Value::from(stack.region());
    IndexMap::from([
        // placeholder until the deployment injects a real token
        ("GIT_TOKEN", json!("placeholder-token")),
        ("GIT_AUTHOR", json!("CodeRefactorBot")),
        ("GIT_EMAIL", json!("bot@code-refactor.example.com")),
        ("AI_DEFAULT_PROVIDER", json!("bedrock")),
        ("AI_LOCAL_ENABLED", json!("false")),
        ("AI_BEDROCK_RDS_POSTGRES_CREDENTIALS_SECRET_ARN", database.secret_arn()),
        ("AI_BEDROCK_RDS_POSTGRES_INSTANCE_ARN", database.cluster_arn()),
        ("AI_BEDROCK_RDS_POSTGRES_DATABASE_NAME", json!(database.name)),
        (
            "AI_BEDROCK_RDS_POSTGRES_SCHEMA_ENSURE_LAMBDA_ARN",
            database.migration_function.arn(),
        ),
        ("AI_BEDROCK_REGION", region.clone()),
        ("AI_BEDROCK_KNOWLEDGE_BASE_SERVICE_ROLE_ARN", roles.knowledge_base.arn()),
        ("AI_BEDROCK_AGENT_SERVICE_ROLE_ARN", roles.agent.arn()),
        ("AI_BEDROCK_S3_BUCKET_NAME", json!(storage.name)),
        ("COGNITO_USER_POOL_ID", identity.user_pool.reference()),
        ("COGNITO_CLIENT_ID", identity.client.reference()),
        ("COGNITO_REGION", region.clone()),
        ("METRICS_NAMESPACE", json!(c.metrics_namespace)),
        ("METRICS_REGION", region),
        ("METRICS_SERVICE_NAME", json!(c.service_name)),
        ("METRICS_ENABLED", json!("true")),
        ("TIMEOUT_SECONDS", json!(c.timeout_seconds.to_string())),
        ("LOG_LEVEL", json!(c.log_level)),
    ])
}

/// Keys missing from or unexpected in an environment, relative to the contract.
pub fn environment_drift(env: &[String]) -> (Vec<String>, Vec<String>) {
    let missing = CONTAINER_ENV_KEYS
        .iter()
        .filter(|k| !env.iter().any(|e| e == *k))
        .map(|k| k.to_string())
        .collect();
    let unexpected = env
        .iter()
        .filter(|e| !CONTAINER_ENV_KEYS.contains(&e.as_str()))
        .cloned()
        .collect();
    (missing, unexpected)
}

pub fn declare_compute(
    stack: &mut Stack,
    database: &Database,
    storage: &Storage,
    identity: &Identity,
    roles: &TrustRoles,
) -> Result<Compute> {
    let config = stack.config().clone();
    let c = &config.compute;

    let cluster = stack.declare(
        "RefactorCluster",
        CfnResource::new("AWS::ECS::Cluster").destroy_on_removal(),
    )?;

    let log_group = stack.declare(
        "FargateLogGroup",
        CfnResource::new("AWS::Logs::LogGroup")
            .prop("LogGroupName", c.log_group.as_str())
            .destroy_on_removal(),
    )?;

    let task_role = stack.declare(
        "RefactorTaskRole",
        policy::role(
            policy::service_trust("ecs-tasks.amazonaws.com"),
            vec![policy::inline(
                "RefactorTaskPolicy",
                vec![
                    policy::allow(
                        &[
                            "cloudformation:DescribeStacks",
                            "cloudformation:DescribeStackResources",
                            "cloudformation:DescribeStackEvents",
                        ],
                        vec![json!(naming::stack_arn(&config))],
                    ),
                    policy::allow(
                        &SECRET_READ_ACTIONS,
                        vec![database.secret_arn(), json!(naming::secret_path_arn(&config))],
                    ),
                    policy::allow(
                        &PARAMETER_READ_ACTIONS,
                        vec![json!(naming::parameter_path_arn(&config))],
                    ),
                ],
            )],
        ),
    )?;

    let execution_role = stack.declare(
        "RefactorTaskExecutionRole",
        policy::role(policy::service_trust("ecs-tasks.amazonaws.com"), vec![]).prop(
            "ManagedPolicyArns",
            json!([policy::managed_policy(
                "service-role/AmazonECSTaskExecutionRolePolicy"
            )]),
        ),
    )?;

    let repository = stack.declare(
        "RefactorEcrRepo",
        CfnResource::new("AWS::ECR::Repository")
            .prop("RepositoryName", c.repository_name.as_str())
            .prop("EmptyOnDelete", true)
            .destroy_on_removal(),
    )?;

    let env = container_environment(stack, database, storage, identity, roles);
    let env_list: Vec<Value> = env
        .iter()
        .map(|(name, value)| json!({"Name": name, "Value": value}))
        .collect();
    let names: Vec<String> = env.keys().map(|k| k.to_string()).collect();
    let (missing, unexpected) = environment_drift(&names);
    if !missing.is_empty() || !unexpected.is_empty() {
        return Err(InfraError::Validation(format!(
            "container environment drifted: missing {:?}, unexpected {:?}",
            missing, unexpected
        )));
    }

    let image = sub(format!(
        "{}:{}",
        repository.sub_ref(Some("RepositoryUri")),
        c.image_tag
    ));

    let task_definition = stack.declare(
        "RefactorTaskDef",
        CfnResource::new("AWS::ECS::TaskDefinition")
            .prop("Family", c.service_name.as_str())
            .prop("Cpu", c.cpu.to_string())
            .prop("Memory", c.memory_mib.to_string())
            .prop("NetworkMode", "awsvpc")
            .prop("RequiresCompatibilities", json!(["FARGATE"]))
            .prop("TaskRoleArn", task_role.arn())
            .prop("ExecutionRoleArn", execution_role.arn())
            .prop(
                "ContainerDefinitions",
                json!([{
                    "Name": CONTAINER_NAME,
                    "Image": image,
                    "Essential": true,
                    "PortMappings": [{"ContainerPort": c.container_port, "Protocol": "tcp"}],
                    "Environment": env_list,
                    "LogConfiguration": {
                        "LogDriver": "awslogs",
                        "Options": {
                            "awslogs-group": log_group.reference(),
                            "awslogs-stream-prefix": LOG_STREAM_PREFIX,
                            "awslogs-region": config.region_name(),
                        }
                    }
                }]),
            )
            .destroy_on_removal(),
    )?;

    tracing::info!(
        cpu = c.cpu,
        memory_mib = c.memory_mib,
        env_keys = env.len(),
        "compute declared"
    );

    Ok(Compute {
        cluster,
        log_group,
        task_role,
        execution_role,
        repository,
        task_definition,
        container_port: c.container_port,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_keys_unique() {
        let mut keys = CONTAINER_ENV_KEYS.to_vec();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), CONTAINER_ENV_KEYS.len());
    }

    #[test]
    fn test_environment_drift() {
        let mut env: Vec<String> = CONTAINER_ENV_KEYS.iter().map(|k| k.to_string()).collect();
        assert_eq!(environment_drift(&env), (vec![], vec![]));
        env.retain(|k| k != "LOG_LEVEL");
        env.push("EXTRA".to_string());
        let (missing, unexpected) = environment_drift(&env);
        assert_eq!(missing, vec!["LOG_LEVEL"]);
        assert_eq!(unexpected, vec!["EXTRA"]);
    }
}
