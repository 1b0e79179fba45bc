//! Knowledge-base object bucket.

use crate::core::error::Result;
use crate::core::naming;
use crate::core::stack::Stack;
use crate::core::template::{CfnResource, Handle};
use serde_json::{json, Value};

#[derive(Debug, Clone)]
pub struct Storage {
    pub bucket: Handle,
    /// Physical bucket name, known at synthesis time.
    pub name: String,
}

/// All four public-access switches on.
pub fn block_all_public_access() -> Value {
    json!({
        "BlockPublicAcls": true,
        "BlockPublicPolicy": true,
        "IgnorePublicAcls": true,
        "RestrictPublicBuckets": true,
    })
}

pub fn declare_storage(stack: &mut Stack) -> Result<Storage> {
    let name = naming::bucket_name(stack.config())?;
    let bucket = stack.declare(
        "CodeRefactorBucket",
        CfnResource::new("AWS::S3::Bucket")
            .prop("BucketName", name.as_str())
            .prop("VersioningConfiguration", json!({"Status": "Enabled"}))
            .prop("PublicAccessBlockConfiguration", block_all_public_access())
            .prop(
                "BucketEncryption",
                json!({
                    "ServerSideEncryptionConfiguration": [
                        {"ServerSideEncryptionByDefault": {"SSEAlgorithm": "AES256"}}
                    ]
                }),
            )
            .destroy_on_removal(),
    )?;
    tracing::info!(bucket = %name, "storage declared");
    Ok(Storage { bucket, name })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::template::RemovalPolicy;
    use crate::core::types::StackConfig;

    #[test]
    fn test_bucket_name_and_settings() {
        let config: StackConfig = serde_yaml_ng::from_str(
            "version: \"1.0\"\nname: CodeRefactorInfra\naccount: \"123456789012\"\nregion: us-east-1\n",
        )
        .unwrap();
        let mut stack = Stack::new(&config);
        let storage = declare_storage(&mut stack).unwrap();
        assert_eq!(storage.name, "code-refactor-bucket-123456789012-us-east-1");

        let r = &stack.template().resources["CodeRefactorBucket"];
        assert_eq!(r.properties["VersioningConfiguration"]["Status"], "Enabled");
        assert_eq!(
            r.properties["PublicAccessBlockConfiguration"]["RestrictPublicBuckets"],
            true
        );
        assert_eq!(r.deletion_policy, Some(RemovalPolicy::Delete));
    }
}
