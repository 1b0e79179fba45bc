//! Static-hosting bucket behind a CDN distribution with single-page-app fallback.

use super::storage::block_all_public_access;
use crate::core::error::Result;
use crate::core::naming;
use crate::core::stack::Stack;
use crate::core::template::{sub, CfnResource, Handle};
use serde_json::{json, Value};

pub const ORIGIN_ID: &str = "FrontendS3Origin";
pub const ERROR_CACHING_TTL_SECONDS: u32 = 300;
/// Managed `CachingOptimized` cache policy.
pub const CACHING_OPTIMIZED_POLICY_ID: &str = "658327ea-f89d-4fab-a63d-7e88639e58f6";

#[derive(Debug, Clone)]
pub struct Frontend {
    pub bucket: Handle,
    pub name: String,
    pub origin_access_identity: Handle,
    pub bucket_policy: Handle,
    pub distribution: Handle,
}

impl Frontend {
    pub fn distribution_id(&self) -> Value {
        self.distribution.reference()
    }

    pub fn domain_name(&self) -> Value {
        self.distribution.att("DomainName")
    }

    /// `https://<distribution domain>`
    pub fn url(&self) -> Value {
        sub(format!("https://{}", self.distribution.sub_ref(Some("DomainName"))))
    }
}

/// 403/404 from the origin become 200 `/index.html` so client routing works.
fn spa_error_responses() -> Value {
    Value::Array(
        [404, 403]
            .iter()
            .map(|code| {
                json!({
                    "ErrorCode": code,
                    "ResponseCode": 200,
                    "ResponsePagePath": "/index.html",
                    "ErrorCachingMinTTL": ERROR_CACHING_TTL_SECONDS,
                })
            })
            .collect(),
    )
}

pub fn declare_frontend(stack: &mut Stack) -> Result<Frontend> {
    let name = naming::frontend_bucket_name(stack.config())?;

    let bucket = stack.declare(
        "FrontendBucket",
        CfnResource::new("AWS::S3::Bucket")
            .prop("BucketName", name.as_str())
            .prop("PublicAccessBlockConfiguration", block_all_public_access())
            .destroy_on_removal(),
    )?;

    let origin_access_identity = stack.declare(
        "FrontendOAI",
        CfnResource::new("AWS::CloudFront::CloudFrontOriginAccessIdentity")
            .prop(
                "CloudFrontOriginAccessIdentityConfig",
                json!({"Comment": "OAI for Code Refactor Frontend"}),
            )
            .destroy_on_removal(),
    )?;

    let bucket_arn = bucket.sub_ref(Some("Arn"));
    let bucket_policy = stack.declare(
        "FrontendBucketPolicy",
        CfnResource::new("AWS::S3::BucketPolicy")
            .prop("Bucket", bucket.reference())
            .prop(
                "PolicyDocument",
                json!({
                    "Version": super::policy::POLICY_VERSION,
                    "Statement": [{
                        "Effect": "Allow",
                        "Principal": {
                            "CanonicalUser": origin_access_identity.att("S3CanonicalUserId")
                        },
                        "Action": ["s3:GetObject*", "s3:GetBucket*", "s3:List*"],
                        "Resource": [bucket.arn(), sub(format!("{}/*", bucket_arn))],
                    }],
                }),
            ),
    )?;

    let distribution = stack.declare(
        "FrontendDistribution",
        CfnResource::new("AWS::CloudFront::Distribution")
            .prop(
                "DistributionConfig",
                json!({
                    "Comment": "Code Refactor Frontend Distribution",
                    "Enabled": true,
                    "DefaultRootObject": "index.html",
                    "HttpVersion": "http2",
                    "IPV6Enabled": true,
                    "PriceClass": "PriceClass_100",
                    "Origins": [{
                        "Id": ORIGIN_ID,
                        "DomainName": bucket.att("RegionalDomainName"),
                        "S3OriginConfig": {
                            "OriginAccessIdentity": sub(format!(
                                "origin-access-identity/cloudfront/{}",
                                origin_access_identity.sub_ref(None)
                            ))
                        }
                    }],
                    "DefaultCacheBehavior": {
                        "TargetOriginId": ORIGIN_ID,
                        "ViewerProtocolPolicy": "redirect-to-https",
                        "AllowedMethods": ["GET", "HEAD"],
                        "CachedMethods": ["GET", "HEAD"],
                        "Compress": true,
                        "CachePolicyId": CACHING_OPTIMIZED_POLICY_ID,
                    },
                    "CustomErrorResponses": spa_error_responses(),
                }),
            )
            .depends_on(&bucket_policy)
            .destroy_on_removal(),
    )?;

    tracing::info!(bucket = %name, "frontend declared");
    Ok(Frontend {
        bucket,
        name,
        origin_access_identity,
        bucket_policy,
        distribution,
    })
}
