//! Rendering: the template document and the engine CLI scripts around it.
//!
//! Every script starts with `set -euo pipefail`; best-effort steps opt out
//! explicitly with `|| true`.

use super::error::Result;
use super::template::Template;
use std::fmt;
use std::str::FromStr;

/// Largest template the engine accepts inline via `--template-file`
/// without an upload bucket.
pub const MAX_INLINE_TEMPLATE_BYTES: u64 = 51_200;

/// Template output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    #[default]
    Json,
    Yaml,
}

impl FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "yaml" | "yml" => Ok(Self::Yaml),
            other => Err(format!("unknown format '{}' (json, yaml)", other)),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => write!(f, "json"),
            Self::Yaml => write!(f, "yaml"),
        }
    }
}

pub fn render_template(template: &Template, format: Format) -> Result<String> {
    Ok(match format {
        Format::Json => serde_json::to_string_pretty(template)?,
        Format::Yaml => serde_yaml_ng::to_string(template)?,
    })
}

/// Single-quote for the shell.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Parameters shared by every engine script.
#[derive(Debug, Clone)]
pub struct EngineTarget {
    pub aws_cli: String,
    pub stack: String,
    pub region: String,
}

impl EngineTarget {
    fn cli(&self) -> String {
        shell_quote(&self.aws_cli)
    }

    fn region_flag(&self) -> String {
        format!("--region {}", shell_quote(&self.region))
    }
}

/// `cloudformation deploy` of a synthesized template file.
///
/// Templates over the inline size limit need `artifact_bucket` for upload.
pub fn deploy_script(
    target: &EngineTarget,
    template_path: &str,
    artifact_bucket: Option<&str>,
    tags: &[(String, String)],
) -> String {
    let mut cmd = format!(
        "{} cloudformation deploy \\\n  --stack-name {} \\\n  --template-file {} \\\n  --capabilities CAPABILITY_IAM CAPABILITY_NAMED_IAM \\\n  --no-fail-on-empty-changeset \\\n  {}",
        target.cli(),
        shell_quote(&target.stack),
        shell_quote(template_path),
        target.region_flag()
    );
    if let Some(bucket) = artifact_bucket {
        cmd.push_str(&format!(" \\\n  --s3-bucket {}", shell_quote(bucket)));
    }
    if !tags.is_empty() {
        let pairs: Vec<String> = tags
            .iter()
            .map(|(k, v)| shell_quote(&format!("{}={}", k, v)))
            .collect();
        cmd.push_str(&format!(" \\\n  --tags {}", pairs.join(" ")));
    }
    format!("set -euo pipefail\n{}\n", cmd)
}

/// Best-effort removal of every object version so the bucket can be deleted.
fn empty_bucket_lines(target: &EngineTarget, bucket: &str) -> String {
    let cli = target.cli();
    let b = shell_quote(bucket);
    format!(
        "{cli} s3 rm s3://{bucket} --recursive {region} >/dev/null 2>&1 || true\n\
         versions=$({cli} s3api list-object-versions --bucket {b} {region} \
         --query '{{Objects: [Versions, DeleteMarkers][][].{{Key: Key, VersionId: VersionId}}}}' \
         --output json 2>/dev/null || echo '{{}}')\n\
         if echo \"$versions\" | grep -q '\"Key\"'; then\n  \
         {cli} s3api delete-objects --bucket {b} --delete \"$versions\" {region} >/dev/null 2>&1 || true\n\
         fi\n",
        cli = cli,
        bucket = bucket,
        b = b,
        region = target.region_flag()
    )
}

/// Empty both buckets, delete the stack, and wait for completion.
pub fn destroy_script(target: &EngineTarget, buckets: &[String]) -> String {
    let mut script = String::from("set -euo pipefail\n");
    for bucket in buckets {
        script.push_str(&format!("# empty {}\n", bucket));
        script.push_str(&empty_bucket_lines(target, bucket));
    }
    script.push_str(&format!(
        "{cli} cloudformation delete-stack --stack-name {stack} {region}\n\
         {cli} cloudformation wait stack-delete-complete --stack-name {stack} {region}\n",
        cli = target.cli(),
        stack = shell_quote(&target.stack),
        region = target.region_flag()
    ));
    script
}

/// Delete detached network interfaces left in the stack's VPC.
///
/// Lambda functions attached to a VPC leave interfaces behind that can block
/// subnet and security-group deletion.
pub fn eni_cleanup_script(target: &EngineTarget, vpc_logical_id: &str) -> String {
    format!(
        "set -uo pipefail\n\
         vpc=$({cli} ec2 describe-vpcs {region} \
         --filters Name=tag:aws:cloudformation:stack-name,Values={stack} \
         Name=tag:aws:cloudformation:logical-id,Values={vpc_id} \
         --query 'Vpcs[0].VpcId' --output text 2>/dev/null || true)\n\
         if [ -z \"$vpc\" ] || [ \"$vpc\" = \"None\" ]; then\n  echo 'no vpc found'\n  exit 0\nfi\n\
         for eni in $({cli} ec2 describe-network-interfaces {region} \
         --filters Name=vpc-id,Values=\"$vpc\" Name=status,Values=available \
         --query 'NetworkInterfaces[].NetworkInterfaceId' --output text 2>/dev/null || true); do\n  \
         echo \"deleting $eni\"\n  \
         {cli} ec2 delete-network-interface --network-interface-id \"$eni\" {region} || true\n\
         done\n",
        cli = target.cli(),
        region = target.region_flag(),
        stack = shell_quote(&target.stack),
        vpc_id = shell_quote(vpc_logical_id)
    )
}

/// Read back the deployed stack's outputs.
pub fn describe_outputs_script(target: &EngineTarget) -> String {
    format!(
        "set -euo pipefail\n{} cloudformation describe-stacks --stack-name {} {} \
         --query 'Stacks[0].Outputs' --output json\n",
        target.cli(),
        shell_quote(&target.stack),
        target.region_flag()
    )
}
