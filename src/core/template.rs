//! CloudFormation template model, resource handles, and intrinsic helpers.
//!
//! A [`Handle`] is what a declaration returns: the logical id plus the
//! resource type. Its computed attributes (`Ref`, `Fn::GetAtt`) are only
//! resolved by the orchestration engine, so the handle hands out intrinsic
//! values rather than strings.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

pub const FORMAT_VERSION: &str = "2010-09-09";

/// A full template, resources kept in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub format_version: String,

    #[serde(rename = "Description", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(rename = "Resources")]
    pub resources: IndexMap<String, CfnResource>,

    #[serde(rename = "Outputs", default, skip_serializing_if = "IndexMap::is_empty")]
    pub outputs: IndexMap<String, Output>,
}

impl Template {
    pub fn new(description: Option<String>) -> Self {
        Self {
            format_version: FORMAT_VERSION.to_string(),
            description,
            resources: IndexMap::new(),
            outputs: IndexMap::new(),
        }
    }

    /// Logical ids of every resource of the given type, in declaration order.
    pub fn ids_of_type<'a>(&'a self, resource_type: &'a str) -> impl Iterator<Item = &'a str> {
        self.resources
            .iter()
            .filter(move |(_, r)| r.resource_type == resource_type)
            .map(|(id, _)| id.as_str())
    }

    pub fn count_of_type(&self, resource_type: &str) -> usize {
        self.ids_of_type(resource_type).count()
    }
}

/// `DeletionPolicy` / `UpdateReplacePolicy` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemovalPolicy {
    Delete,
    Retain,
    Snapshot,
}

/// One resource declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CfnResource {
    #[serde(rename = "Type")]
    pub resource_type: String,

    #[serde(rename = "Properties", default, skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,

    #[serde(rename = "DependsOn", default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    #[serde(rename = "DeletionPolicy", default, skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<RemovalPolicy>,

    #[serde(
        rename = "UpdateReplacePolicy",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub update_replace_policy: Option<RemovalPolicy>,
}

impl CfnResource {
    pub fn new(resource_type: &str) -> Self {
        Self {
            resource_type: resource_type.to_string(),
            properties: Map::new(),
            depends_on: Vec::new(),
            deletion_policy: None,
            update_replace_policy: None,
        }
    }

    /// Set a property. Later calls with the same key overwrite.
    pub fn prop(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }

    /// Set a property only when the value is present.
    pub fn prop_opt(self, key: &str, value: Option<impl Into<Value>>) -> Self {
        match value {
            Some(v) => self.prop(key, v),
            None => self,
        }
    }

    /// Explicit ordering edge to an already-declared resource.
    pub fn depends_on(mut self, handle: &Handle) -> Self {
        if !self.depends_on.iter().any(|d| d == &handle.logical_id) {
            self.depends_on.push(handle.logical_id.clone());
        }
        self
    }

    /// Remove the physical resource when it leaves the template or the stack is deleted.
    pub fn destroy_on_removal(mut self) -> Self {
        self.deletion_policy = Some(RemovalPolicy::Delete);
        self.update_replace_policy = Some(RemovalPolicy::Delete);
        self
    }
}

/// A stack output, optionally exported for cross-stack reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Output {
    #[serde(rename = "Description", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(rename = "Value")]
    pub value: Value,

    #[serde(rename = "Export", default, skip_serializing_if = "Option::is_none")]
    pub export: Option<Export>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Export {
    #[serde(rename = "Name")]
    pub name: String,
}

/// Immutable reference to a declared resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Handle {
    logical_id: String,
    resource_type: String,
}

impl Handle {
    pub(crate) fn new(logical_id: &str, resource_type: &str) -> Self {
        Self {
            logical_id: logical_id.to_string(),
            resource_type: resource_type.to_string(),
        }
    }

    pub fn logical_id(&self) -> &str {
        &self.logical_id
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    /// `{"Ref": id}`: the physical id, name, or ARN depending on type.
    pub fn reference(&self) -> Value {
        json!({ "Ref": self.logical_id })
    }

    /// `{"Fn::GetAtt": [id, attribute]}`.
    pub fn att(&self, attribute: &str) -> Value {
        json!({ "Fn::GetAtt": [self.logical_id, attribute] })
    }

    pub fn arn(&self) -> Value {
        self.att("Arn")
    }

    /// `${Id}` or `${Id.Attr}` placeholder for use inside [`sub`].
    pub fn sub_ref(&self, attribute: Option<&str>) -> String {
        match attribute {
            Some(attr) => format!("${{{}.{}}}", self.logical_id, attr),
            None => format!("${{{}}}", self.logical_id),
        }
    }
}

// ============================================================================
// Intrinsics
// ============================================================================

/// `{"Fn::Sub": template}`.
pub fn sub(template: impl Into<String>) -> Value {
    json!({ "Fn::Sub": template.into() })
}

/// `{"Fn::Sub": [template, vars]}`.
pub fn sub_with(template: impl Into<String>, vars: Map<String, Value>) -> Value {
    json!({ "Fn::Sub": [template.into(), Value::Object(vars)] })
}

/// `{"Fn::Join": [delimiter, parts]}`.
pub fn join(delimiter: &str, parts: Vec<Value>) -> Value {
    json!({ "Fn::Join": [delimiter, parts] })
}

/// `{"Fn::Select": [index, list]}`.
pub fn select(index: usize, list: Value) -> Value {
    json!({ "Fn::Select": [index.to_string(), list] })
}

/// `{"Fn::GetAZs": ""}`, the current region's zones.
pub fn get_azs() -> Value {
    json!({ "Fn::GetAZs": "" })
}

/// `{"Ref": "AWS::..."}` pseudo parameter.
pub fn pseudo(name: &str) -> Value {
    json!({ "Ref": format!("AWS::{}", name) })
}

/// Tag list in the common `[{Key, Value}]` shape.
pub fn tag_list(tags: &IndexMap<String, String>) -> Value {
    Value::Array(
        tags.iter()
            .map(|(k, v)| json!({ "Key": k, "Value": v }))
            .collect(),
    )
}

/// Tag map in the `{Key: Value}` shape used by a few resource types.
pub fn tag_map(tags: &IndexMap<String, String>) -> Value {
    Value::Object(
        tags.iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_intrinsics() {
        let h = Handle::new("CodeRefactorBucket", "AWS::S3::Bucket");
        assert_eq!(h.reference(), json!({"Ref": "CodeRefactorBucket"}));
        assert_eq!(
            h.arn(),
            json!({"Fn::GetAtt": ["CodeRefactorBucket", "Arn"]})
        );
        assert_eq!(h.sub_ref(None), "${CodeRefactorBucket}");
        assert_eq!(h.sub_ref(Some("Arn")), "${CodeRefactorBucket.Arn}");
        assert_eq!(h.resource_type(), "AWS::S3::Bucket");
    }

    #[test]
    fn test_resource_builder() {
        let r = CfnResource::new("AWS::S3::Bucket")
            .prop("BucketName", "b")
            .prop_opt("Missing", None::<String>)
            .destroy_on_removal();
        assert_eq!(r.properties.len(), 1);
        assert_eq!(r.deletion_policy, Some(RemovalPolicy::Delete));
        assert_eq!(r.update_replace_policy, Some(RemovalPolicy::Delete));
    }

    #[test]
    fn test_depends_on_dedup() {
        let h = Handle::new("Attach", "AWS::EC2::VPCGatewayAttachment");
        let r = CfnResource::new("AWS::EC2::Route").depends_on(&h).depends_on(&h);
        assert_eq!(r.depends_on, vec!["Attach"]);
    }

    #[test]
    fn test_template_serializes_cfn_keys() {
        let mut t = Template::new(Some("test".to_string()));
        t.resources.insert(
            "Vpc".to_string(),
            CfnResource::new("AWS::EC2::VPC").prop("CidrBlock", "10.0.0.0/16"),
        );
        let json = serde_json::to_value(&t).unwrap();
        assert_eq!(json["AWSTemplateFormatVersion"], "2010-09-09");
        assert_eq!(json["Resources"]["Vpc"]["Type"], "AWS::EC2::VPC");
        assert!(json.get("Outputs").is_none());
        assert!(json["Resources"]["Vpc"].get("DependsOn").is_none());
    }

    #[test]
    fn test_select_and_azs() {
        assert_eq!(
            select(1, get_azs()),
            json!({"Fn::Select": ["1", {"Fn::GetAZs": ""}]})
        );
        assert_eq!(pseudo("Region"), json!({"Ref": "AWS::Region"}));
    }

    #[test]
    fn test_tags_shapes() {
        let tags = IndexMap::from([("Project".to_string(), "code-refactor".to_string())]);
        assert_eq!(
            tag_list(&tags),
            json!([{"Key": "Project", "Value": "code-refactor"}])
        );
        assert_eq!(tag_map(&tags), json!({"Project": "code-refactor"}));
    }

    #[test]
    fn test_count_of_type() {
        let mut t = Template::new(None);
        t.resources.insert("A".into(), CfnResource::new("AWS::EC2::Subnet"));
        t.resources.insert("B".into(), CfnResource::new("AWS::EC2::Subnet"));
        t.resources.insert("C".into(), CfnResource::new("AWS::EC2::VPC"));
        assert_eq!(t.count_of_type("AWS::EC2::Subnet"), 2);
        assert_eq!(t.ids_of_type("AWS::EC2::VPC").collect::<Vec<_>>(), vec!["C"]);
    }
}
