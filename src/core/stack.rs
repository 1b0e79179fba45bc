//! The stack under construction: an explicit context passed to every builder.
//!
//! `declare` is the only way a resource enters the template. It validates the
//! logical id, rejects duplicates, and rejects any reference to a logical id
//! that has not been declared yet, so every edge in the finished graph points
//! strictly backwards in declaration order.

use super::error::{InfraError, Result};
use super::resolver::{references_of, resolve_template};
use super::template::{tag_list, tag_map, CfnResource, Export, Handle, Output, Template};
use super::types::StackConfig;
use indexmap::IndexMap;
use serde_json::Value;

/// Maximum length of a logical id accepted by the engine.
pub const MAX_LOGICAL_ID_LEN: usize = 255;

/// How a resource type carries tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagStyle {
    /// `[{Key, Value}]` under the named property
    List(&'static str),
    /// `{Key: Value}` under the named property
    Map(&'static str),
    Unsupported,
}

/// Tag shape for a resource type.
pub fn tag_style(resource_type: &str) -> TagStyle {
    match resource_type {
        "AWS::Cognito::UserPool" => TagStyle::Map("UserPoolTags"),
        "AWS::SSM::Parameter" => TagStyle::Map("Tags"),
        "AWS::EC2::VPC"
        | "AWS::EC2::Subnet"
        | "AWS::EC2::RouteTable"
        | "AWS::EC2::InternetGateway"
        | "AWS::EC2::SecurityGroup"
        | "AWS::S3::Bucket"
        | "AWS::SecretsManager::Secret"
        | "AWS::RDS::DBCluster"
        | "AWS::RDS::DBInstance"
        | "AWS::RDS::DBSubnetGroup"
        | "AWS::IAM::Role"
        | "AWS::Lambda::Function"
        | "AWS::Logs::LogGroup"
        | "AWS::ECS::Cluster"
        | "AWS::ECS::TaskDefinition"
        | "AWS::ECS::Service"
        | "AWS::ECR::Repository"
        | "AWS::ElasticLoadBalancingV2::LoadBalancer"
        | "AWS::ElasticLoadBalancingV2::TargetGroup"
        | "AWS::ApiGateway::RestApi"
        | "AWS::ApiGateway::Stage"
        | "AWS::CloudFront::Distribution" => TagStyle::List("Tags"),
        _ => TagStyle::Unsupported,
    }
}

/// Logical ids are alphanumeric, 1 to 255 characters.
pub fn is_valid_logical_id(id: &str) -> bool {
    !id.is_empty() && id.len() <= MAX_LOGICAL_ID_LEN && id.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Stack context: target account/region, naming, and the template built so far.
#[derive(Debug, Clone)]
pub struct Stack {
    config: StackConfig,
    template: Template,
}

impl Stack {
    pub fn new(config: &StackConfig) -> Self {
        Self {
            config: config.clone(),
            template: Template::new(config.description.clone()),
        }
    }

    pub fn config(&self) -> &StackConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn account(&self) -> &str {
        self.config.account_id()
    }

    pub fn region(&self) -> &str {
        self.config.region_name()
    }

    pub fn prefix(&self) -> &str {
        &self.config.prefix
    }

    /// Render a name pattern against this stack's context.
    pub fn resolve(&self, pattern: &str) -> Result<String> {
        resolve_template(pattern, &self.config)
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    pub fn into_template(self) -> Template {
        self.template
    }

    pub fn len(&self) -> usize {
        self.template.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.template.resources.is_empty()
    }

    /// Handle for an already-declared logical id.
    pub fn handle(&self, logical_id: &str) -> Option<Handle> {
        self.template
            .resources
            .get(logical_id)
            .map(|r| Handle::new(logical_id, &r.resource_type))
    }

    /// Append a resource. Fails on a bad or duplicate id, or on a reference
    /// to anything not already declared.
    pub fn declare(&mut self, logical_id: &str, resource: CfnResource) -> Result<Handle> {
        if !is_valid_logical_id(logical_id) {
            return Err(InfraError::InvalidLogicalId(logical_id.to_string()));
        }
        if self.template.resources.contains_key(logical_id) {
            return Err(InfraError::DuplicateResource(logical_id.to_string()));
        }
        for target in references_of(&resource) {
            if !self.template.resources.contains_key(&target) {
                return Err(InfraError::ForwardReference {
                    resource: logical_id.to_string(),
                    target,
                });
            }
        }

        let resource = apply_tags(resource, &self.config.tags);
        let handle = Handle::new(logical_id, &resource.resource_type);
        tracing::debug!(
            logical_id,
            resource_type = %resource.resource_type,
            position = self.template.resources.len(),
            "declared"
        );
        self.template
            .resources
            .insert(logical_id.to_string(), resource);
        Ok(handle)
    }

    /// Add a stack output. References follow the same ordering rule as resources.
    pub fn add_output(
        &mut self,
        name: &str,
        description: &str,
        value: Value,
        export_name: Option<&str>,
    ) -> Result<()> {
        if !is_valid_logical_id(name) {
            return Err(InfraError::InvalidLogicalId(name.to_string()));
        }
        if self.template.outputs.contains_key(name) {
            return Err(InfraError::DuplicateResource(name.to_string()));
        }
        let carrier = CfnResource::new("Output").prop("Value", value.clone());
        for target in references_of(&carrier) {
            if !self.template.resources.contains_key(&target) {
                return Err(InfraError::ForwardReference {
                    resource: name.to_string(),
                    target,
                });
            }
        }
        self.template.outputs.insert(
            name.to_string(),
            Output {
                description: Some(description.to_string()),
                value,
                export: export_name.map(|n| Export {
                    name: n.to_string(),
                }),
            },
        );
        Ok(())
    }
}

/// Merge stack tags into a resource. Tags the builder set explicitly win.
fn apply_tags(mut resource: CfnResource, tags: &IndexMap<String, String>) -> CfnResource {
    if tags.is_empty() {
        return resource;
    }
    match tag_style(&resource.resource_type) {
        TagStyle::List(key) => {
            let mut list = match resource.properties.remove(key) {
                Some(Value::Array(existing)) => existing,
                _ => Vec::new(),
            };
            let Value::Array(defaults) = tag_list(tags) else {
                return resource;
            };
            for tag in defaults {
                let present = list.iter().any(|t| t.get("Key") == tag.get("Key"));
                if !present {
                    list.push(tag);
                }
            }
            resource.properties.insert(key.to_string(), Value::Array(list));
        }
        TagStyle::Map(key) => {
            let mut map = match resource.properties.remove(key) {
                Some(Value::Object(existing)) => existing,
                _ => serde_json::Map::new(),
            };
            if let Value::Object(defaults) = tag_map(tags) {
                for (k, v) in defaults {
                    map.entry(k).or_insert(v);
                }
            }
            resource.properties.insert(key.to_string(), Value::Object(map));
        }
        TagStyle::Unsupported => {}
    }
    resource
}
