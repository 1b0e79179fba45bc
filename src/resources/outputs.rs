//! Exported stack outputs read by CI workflows and sibling stacks.

use super::config_store::Sources;
use crate::core::error::Result;
use crate::core::stack::Stack;
use serde_json::{json, Value};

/// Prefix shared by every export name.
pub const EXPORT_PREFIX: &str = "CodeRefactor";

/// `(output name, export suffix, description, value)` for every output.
fn catalogue(src: &Sources<'_>) -> Vec<(&'static str, &'static str, &'static str, Value)> {
    vec![
        (
            "ECRRepositoryURI",
            "ECR-Repository-URI",
            "ECR Repository URI for the application container image",
            src.compute.repository_uri(),
        ),
        (
            "CognitoUserPoolID",
            "Cognito-UserPool-ID",
            "Cognito User Pool ID",
            src.identity.user_pool.reference(),
        ),
        (
            "CognitoUserPoolClientID",
            "Cognito-Client-ID",
            "Cognito User Pool Client ID",
            src.identity.client.reference(),
        ),
        (
            "APIGatewayURL",
            "API-Gateway-URL",
            "API Gateway URL",
            src.edge.api_url(),
        ),
        (
            "CognitoHostedUIURL",
            "Cognito-HostedUI-URL",
            "Cognito Hosted UI URL",
            json!(src.identity.hosted_ui_url),
        ),
        (
            "RDSPostgresCredentialsSecretARN",
            "RDS-Credentials-Secret-ARN",
            "RDS Postgres Credentials Secret ARN",
            src.database.secret_arn(),
        ),
        (
            "RDSPostgresInstanceARN",
            "RDS-Cluster-ARN",
            "RDS Postgres Cluster ARN",
            src.database.cluster_arn(),
        ),
        (
            "BucketName",
            "S3-Bucket-Name",
            "S3 Bucket Name for Bedrock Knowledge Base",
            json!(src.storage.name),
        ),
        (
            "BedrockKnowledgeBaseRoleArn",
            "Bedrock-KnowledgeBase-Role-ARN",
            "Bedrock Knowledge Base Service Role ARN",
            src.roles.knowledge_base.arn(),
        ),
        (
            "BedrockAgentRoleArn",
            "Bedrock-Agent-Role-ARN",
            "Bedrock Agent Service Role ARN",
            src.roles.agent.arn(),
        ),
        (
            "FrontendBucketName",
            "Frontend-Bucket-Name",
            "S3 Bucket Name for Frontend Hosting",
            json!(src.frontend.name),
        ),
        (
            "CloudFrontDistributionID",
            "CloudFront-Distribution-ID",
            "CloudFront Distribution ID for Frontend",
            src.frontend.distribution_id(),
        ),
        (
            "CloudFrontDistributionDomainName",
            "CloudFront-Domain-Name",
            "CloudFront Distribution Domain Name for Frontend",
            src.frontend.domain_name(),
        ),
    ]
}

pub fn declare_outputs(stack: &mut Stack, src: &Sources<'_>) -> Result<usize> {
    let entries = catalogue(src);
    let count = entries.len();
    for (name, suffix, description, value) in entries {
        let export = format!("{}-{}", EXPORT_PREFIX, suffix);
        stack.add_output(name, description, value, Some(&export))?;
    }
    tracing::info!(outputs = count, "outputs declared");
    Ok(count)
}
