//! IAM policy documents, trust policies, and role declarations.

use crate::core::template::{sub, CfnResource};
use serde_json::{json, Value};

pub const POLICY_VERSION: &str = "2012-10-17";

/// Everything the Data API needs to run statements against a cluster.
pub const RDS_DATA_ACTIONS: [&str; 7] = [
    "rds-data:ExecuteStatement",
    "rds-data:BatchExecuteStatement",
    "rds-data:BeginTransaction",
    "rds-data:CommitTransaction",
    "rds-data:RollbackTransaction",
    "rds-data:ExecuteSql",
    "rds-data:DescribeTable",
];

pub const SECRET_READ_ACTIONS: [&str; 2] = [
    "secretsmanager:GetSecretValue",
    "secretsmanager:DescribeSecret",
];

pub const PARAMETER_READ_ACTIONS: [&str; 3] = [
    "ssm:GetParameter",
    "ssm:GetParameters",
    "ssm:GetParametersByPath",
];

/// An `Allow` statement.
pub fn allow(actions: &[&str], resources: Vec<Value>) -> Value {
    json!({
        "Effect": "Allow",
        "Action": actions,
        "Resource": resources,
    })
}

/// An `Allow` statement with a statement id.
pub fn allow_sid(sid: &str, actions: &[&str], resources: Vec<Value>) -> Value {
    json!({
        "Sid": sid,
        "Effect": "Allow",
        "Action": actions,
        "Resource": resources,
    })
}

pub fn document(statements: Vec<Value>) -> Value {
    json!({
        "Version": POLICY_VERSION,
        "Statement": statements,
    })
}

/// `{PolicyName, PolicyDocument}` entry for a role's `Policies` list.
pub fn inline(name: &str, statements: Vec<Value>) -> Value {
    json!({
        "PolicyName": name,
        "PolicyDocument": document(statements),
    })
}

/// Trust policy letting an AWS service assume the role.
pub fn service_trust(service: &str) -> Value {
    document(vec![json!({
        "Effect": "Allow",
        "Principal": { "Service": service },
        "Action": "sts:AssumeRole",
    })])
}

/// Trust policy for a federated web-identity principal.
pub fn web_identity_trust(provider_arn: &str, conditions: Value) -> Value {
    document(vec![json!({
        "Effect": "Allow",
        "Principal": { "Federated": provider_arn },
        "Action": "sts:AssumeRoleWithWebIdentity",
        "Condition": conditions,
    })])
}

/// ARN of an AWS-managed policy in the current partition.
pub fn managed_policy(name: &str) -> Value {
    sub(format!("arn:${{AWS::Partition}}:iam::aws:policy/{}", name))
}

/// `AWS::IAM::Role` with a trust policy and inline policies.
pub fn role(trust: Value, policies: Vec<Value>) -> CfnResource {
    CfnResource::new("AWS::IAM::Role")
        .prop("AssumeRolePolicyDocument", trust)
        .prop_opt(
            "Policies",
            (!policies.is_empty()).then(|| Value::Array(policies)),
        )
        .destroy_on_removal()
}

/// `arn/*` companion for object-level S3 grants.
pub fn objects_of(bucket_arn_sub: &str) -> Value {
    sub(format!("{}/*", bucket_arn_sub))
}

/// Every action granted by a role's inline policies, flattened.
pub fn granted_actions(role: &CfnResource) -> Vec<String> {
    let mut actions = Vec::new();
    let Some(Value::Array(policies)) = role.properties.get("Policies") else {
        return actions;
    };
    for policy in policies {
        let Some(Value::Array(statements)) = policy.pointer("/PolicyDocument/Statement") else {
            continue;
        };
        for statement in statements {
            match statement.get("Action") {
                Some(Value::Array(list)) => {
                    actions.extend(list.iter().filter_map(|a| a.as_str().map(String::from)))
                }
                Some(Value::String(a)) => actions.push(a.clone()),
                _ => {}
            }
        }
    }
    actions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_trust() {
        let t = service_trust("lambda.amazonaws.com");
        assert_eq!(t["Version"], "2012-10-17");
        assert_eq!(
            t["Statement"][0]["Principal"]["Service"],
            "lambda.amazonaws.com"
        );
        assert_eq!(t["Statement"][0]["Action"], "sts:AssumeRole");
    }

    #[test]
    fn test_role_and_granted_actions() {
        let r = role(
            service_trust("bedrock.amazonaws.com"),
            vec![inline(
                "Kb",
                vec![
                    allow(&["s3:GetObject", "s3:ListBucket"], vec![json!("*")]),
                    allow(&RDS_DATA_ACTIONS, vec![json!("*")]),
                ],
            )],
        );
        assert_eq!(r.resource_type, "AWS::IAM::Role");
        let actions = granted_actions(&r);
        assert_eq!(actions.len(), 9);
        assert!(actions.contains(&"rds-data:DescribeTable".to_string()));
    }

    #[test]
    fn test_role_without_policies_omits_key() {
        let r = role(service_trust("ecs-tasks.amazonaws.com"), vec![]);
        assert!(r.properties.get("Policies").is_none());
    }

    #[test]
    fn test_managed_policy_sub() {
        assert_eq!(
            managed_policy("service-role/AWSLambdaBasicExecutionRole"),
            json!({"Fn::Sub": "arn:${AWS::Partition}:iam::aws:policy/service-role/AWSLambdaBasicExecutionRole"})
        );
    }

    #[test]
    fn test_allow_sid() {
        let s = allow_sid("AgentKnowledgeBaseQuery", &["bedrock:Retrieve"], vec![json!("*")]);
        assert_eq!(s["Sid"], "AgentKnowledgeBaseQuery");
        assert_eq!(s["Effect"], "Allow");
    }
}
