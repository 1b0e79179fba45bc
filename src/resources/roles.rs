//! Trust roles: knowledge-base service role, agent service role, and CI runner role.

use super::database::Database;
use super::frontend::Frontend;
use super::policy::{self, PARAMETER_READ_ACTIONS, RDS_DATA_ACTIONS, SECRET_READ_ACTIONS};
use super::storage::Storage;
use crate::core::error::Result;
use crate::core::naming;
use crate::core::stack::Stack;
use crate::core::template::{sub, Handle};
use serde_json::json;

pub const BEDROCK_SERVICE: &str = "bedrock.amazonaws.com";

pub const ECR_PUSH_ACTIONS: [&str; 8] = [
    "ecr:GetAuthorizationToken",
    "ecr:BatchCheckLayerAvailability",
    "ecr:GetDownloadUrlForLayer",
    "ecr:BatchGetImage",
    "ecr:PutImage",
    "ecr:InitiateLayerUpload",
    "ecr:UploadLayerPart",
    "ecr:CompleteLayerUpload",
];

pub const FRONTEND_DEPLOY_ACTIONS: [&str; 5] = [
    "s3:GetObject",
    "s3:PutObject",
    "s3:DeleteObject",
    "s3:ListBucket",
    "s3:GetBucketLocation",
];

pub const INVALIDATION_ACTIONS: [&str; 3] = [
    "cloudfront:CreateInvalidation",
    "cloudfront:GetInvalidation",
    "cloudfront:ListInvalidations",
];

#[derive(Debug, Clone)]
pub struct TrustRoles {
    pub knowledge_base: Handle,
    pub agent: Handle,
}

/// Knowledge-base and agent roles, both assumed by the AI service.
pub fn declare_trust_roles(
    stack: &mut Stack,
    storage: &Storage,
    database: &Database,
) -> Result<TrustRoles> {
    let bucket_arn = storage.bucket.sub_ref(Some("Arn"));
    let knowledge_base = stack.declare(
        "BedrockKnowledgeBaseRole",
        policy::role(
            policy::service_trust(BEDROCK_SERVICE),
            vec![policy::inline(
                "BedrockKbPolicy",
                vec![
                    policy::allow(
                        &["s3:GetObject", "s3:ListBucket"],
                        vec![storage.bucket.arn(), policy::objects_of(&bucket_arn)],
                    ),
                    policy::allow(
                        &["secretsmanager:GetSecretValue"],
                        vec![database.secret_arn()],
                    ),
                    policy::allow(&RDS_DATA_ACTIONS, vec![database.cluster_arn()]),
                    policy::allow(
                        &["rds:DescribeDBClusters", "rds:DescribeDBInstances"],
                        vec![json!("*")],
                    ),
                ],
            )],
        ),
    )?;

    let config = stack.config().clone();
    let models = config
        .ai
        .foundation_models
        .iter()
        .map(|m| json!(naming::foundation_model_arn(config.region_name(), m)))
        .collect();

    let agent = stack.declare(
        "BedrockAgentRole",
        policy::role(
            policy::service_trust(BEDROCK_SERVICE),
            vec![policy::inline(
                "BedrockAgentPolicy",
                vec![
                    policy::allow_sid(
                        "AgentModelInvocationPermissions",
                        &["bedrock:InvokeModel"],
                        models,
                    ),
                    policy::allow_sid(
                        "AgentKnowledgeBaseQuery",
                        &["bedrock:Retrieve", "bedrock:RetrieveAndGenerate"],
                        vec![json!(naming::knowledge_base_arn(&config))],
                    ),
                    policy::allow_sid(
                        "AgentPromptManagementConsole",
                        &["bedrock:GetPrompt"],
                        vec![json!(naming::prompt_arn(&config))],
                    ),
                ],
            )],
        ),
    )?;

    tracing::info!(models = config.ai.foundation_models.len(), "trust roles declared");
    Ok(TrustRoles {
        knowledge_base,
        agent,
    })
}

/// CI role assumed through the GitHub OIDC provider, which lives outside this stack.
pub fn declare_ci_role(stack: &mut Stack, frontend: &Frontend) -> Result<Handle> {
    let config = stack.config().clone();
    let aud_key = format!("{}:aud", naming::GITHUB_OIDC_HOST);
    let sub_key = format!("{}:sub", naming::GITHUB_OIDC_HOST);
    let conditions = json!({
        "StringEquals": { aud_key: "sts.amazonaws.com" },
        "StringLike": { sub_key: config.ci.oidc_subjects },
    });

    let bucket_arn = frontend.bucket.sub_ref(Some("Arn"));
    let distribution_arn = sub(format!(
        "arn:aws:cloudfront::{}:distribution/{}",
        config.account_id(),
        frontend.distribution.sub_ref(None)
    ));

    let role = stack.declare(
        "GitHubActionsRole",
        policy::role(
            policy::web_identity_trust(&naming::oidc_provider_arn(config.account_id()), conditions),
            vec![
                policy::inline(
                    "ECRAccessPolicy",
                    vec![policy::allow(&ECR_PUSH_ACTIONS, vec![json!("*")])],
                ),
                policy::inline(
                    "S3FrontendDeployPolicy",
                    vec![policy::allow(
                        &FRONTEND_DEPLOY_ACTIONS,
                        vec![frontend.bucket.arn(), policy::objects_of(&bucket_arn)],
                    )],
                ),
                policy::inline(
                    "CloudFrontInvalidationPolicy",
                    vec![policy::allow(&INVALIDATION_ACTIONS, vec![distribution_arn])],
                ),
                policy::inline(
                    "ParameterStoreAccessPolicy",
                    vec![policy::allow(
                        &PARAMETER_READ_ACTIONS,
                        vec![json!(naming::parameter_path_arn(&config))],
                    )],
                ),
                policy::inline(
                    "SecretsManagerAccessPolicy",
                    vec![policy::allow(
                        &SECRET_READ_ACTIONS,
                        vec![json!(naming::secret_path_arn(&config))],
                    )],
                ),
            ],
        )
        .prop("RoleName", config.ci.role_name.as_str()),
    )?;

    tracing::info!(role = %config.ci.role_name, subjects = config.ci.oidc_subjects.len(), "CI role declared");
    Ok(role)
}
