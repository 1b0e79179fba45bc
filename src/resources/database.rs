//! Credential secret, serverless PostgreSQL cluster, and schema-migration function.
//!
//! The secret is declared first; the cluster reads its master credentials
//! through a dynamic reference to it and the engine attaches connection
//! details back onto the secret once the cluster exists.

use super::network::{security_group, tcp_ingress_from, Network};
use super::policy::{self, RDS_DATA_ACTIONS, SECRET_READ_ACTIONS};
use crate::core::error::Result;
use crate::core::naming;
use crate::core::stack::Stack;
use crate::core::template::{sub, CfnResource, Handle};
use serde_json::{json, Map, Value};

pub const ENGINE: &str = "aurora-postgresql";
pub const INSTANCE_CLASS: &str = "db.serverless";
pub const MIGRATION_RUNTIME: &str = "python3.12";
pub const MIGRATION_HANDLER: &str = "handler.lambda_handler";
pub const MIGRATION_TIMEOUT_SECONDS: u32 = 10;
/// One concurrent execution keeps network-interface churn in the VPC to a minimum.
pub const MIGRATION_RESERVED_CONCURRENCY: u32 = 1;
pub const PASSWORD_KEY: &str = "password";

#[derive(Debug, Clone)]
pub struct Database {
    pub secret: Handle,
    pub security_group: Handle,
    pub subnet_group: Handle,
    pub cluster: Handle,
    pub writer: Handle,
    pub secret_attachment: Handle,
    pub migration_security_group: Handle,
    pub migration_ingress: Handle,
    pub migration_role: Handle,
    pub migration_function: Handle,
    pub name: String,
    pub port: u16,
}

impl Database {
    pub fn cluster_arn(&self) -> Value {
        self.cluster.att("DBClusterArn")
    }

    pub fn secret_arn(&self) -> Value {
        self.secret.reference()
    }

    pub fn endpoint_address(&self) -> Value {
        self.cluster.att("Endpoint.Address")
    }
}

/// `{{resolve:secretsmanager:...}}` dynamic reference to one JSON key of a secret.
pub fn secret_field(secret: &Handle, key: &str) -> Value {
    sub(format!(
        "{{{{resolve:secretsmanager:{}:SecretString:{}::}}}}",
        secret.sub_ref(None),
        key
    ))
}

pub fn declare_database(stack: &mut Stack, network: &Network) -> Result<Database> {
    let db = stack.config().database.clone();
    let prefix = stack.prefix().to_string();

    let secret = stack.declare(
        "CodeRefactorDbSecret",
        CfnResource::new("AWS::SecretsManager::Secret")
            .prop("Name", format!("{}-db-secret", prefix))
            .prop(
                "GenerateSecretString",
                json!({
                    "SecretStringTemplate": json!({"username": db.username}).to_string(),
                    "GenerateStringKey": PASSWORD_KEY,
                    "ExcludeCharacters": db.exclude_characters,
                    "PasswordLength": db.password_length,
                }),
            )
            .destroy_on_removal(),
    )?;

    let db_security_group = stack.declare(
        "CodeRefactorDbClusterSecurityGroup",
        security_group(network, "Database cluster security group"),
    )?;

    let subnet_group = stack.declare(
        "CodeRefactorDbClusterSubnets",
        CfnResource::new("AWS::RDS::DBSubnetGroup")
            .prop("DBSubnetGroupDescription", "Subnets for the database cluster")
            .prop("SubnetIds", network.subnet_refs())
            .destroy_on_removal(),
    )?;

    let cluster = stack.declare(
        "CodeRefactorDbCluster",
        CfnResource::new("AWS::RDS::DBCluster")
            .prop("Engine", ENGINE)
            .prop("EngineVersion", db.engine_version.as_str())
            .prop("DBClusterIdentifier", db.cluster_identifier.as_str())
            .prop("DatabaseName", db.name.as_str())
            .prop("Port", db.port)
            .prop("MasterUsername", secret_field(&secret, "username"))
            .prop("MasterUserPassword", secret_field(&secret, PASSWORD_KEY))
            .prop("DBSubnetGroupName", subnet_group.reference())
            .prop("VpcSecurityGroupIds", json!([db_security_group.att("GroupId")]))
            .prop("EnableHttpEndpoint", true)
            .prop("StorageEncrypted", true)
            .prop("CopyTagsToSnapshot", true)
            .prop(
                "ServerlessV2ScalingConfiguration",
                json!({
                    "MinCapacity": db.min_capacity,
                    "MaxCapacity": db.max_capacity,
                }),
            )
            .destroy_on_removal(),
    )?;

    let writer = stack.declare(
        "CodeRefactorDbClusterWriter",
        CfnResource::new("AWS::RDS::DBInstance")
            .prop("DBClusterIdentifier", cluster.reference())
            .prop("DBInstanceClass", INSTANCE_CLASS)
            .prop("Engine", ENGINE)
            .prop("AutoMinorVersionUpgrade", true)
            .prop("PubliclyAccessible", true)
            .destroy_on_removal(),
    )?;

    let secret_attachment = stack.declare(
        "CodeRefactorDbSecretAttachment",
        CfnResource::new("AWS::SecretsManager::SecretTargetAttachment")
            .prop("SecretId", secret.reference())
            .prop("TargetId", cluster.reference())
            .prop("TargetType", "AWS::RDS::DBCluster"),
    )?;

    // Migration function

    let migration_security_group = stack.declare(
        "DbMigrationLambdaSG",
        security_group(
            network,
            "Allow outbound connection to the database for schema migrations",
        ),
    )?;

    let migration_ingress = stack.declare(
        "CodeRefactorDbClusterFromDbMigrationLambdaSG",
        tcp_ingress_from(
            &db_security_group,
            &migration_security_group,
            db.port,
            "Allow DB migration lambda",
        ),
    )?;

    let migration_role = stack.declare(
        "DbMigrationLambdaRole",
        policy::role(
            policy::service_trust("lambda.amazonaws.com"),
            vec![policy::inline(
                "DbMigrationAccess",
                vec![
                    policy::allow(&SECRET_READ_ACTIONS, vec![secret.reference()]),
                    policy::allow(&RDS_DATA_ACTIONS, vec![cluster.att("DBClusterArn")]),
                ],
            )],
        )
        .prop(
            "ManagedPolicyArns",
            json!([
                policy::managed_policy("service-role/AWSLambdaBasicExecutionRole"),
                policy::managed_policy("service-role/AWSLambdaVPCAccessExecutionRole"),
            ]),
        ),
    )?;

    let code_bucket = naming::migration_code_bucket(stack.config())?;
    let mut variables = Map::new();
    variables.insert("DB_SECRET_ARN".into(), secret.reference());
    variables.insert("DB_NAME".into(), Value::from(db.name.as_str()));
    variables.insert("DB_HOST".into(), cluster.att("Endpoint.Address"));
    variables.insert("DB_PORT".into(), Value::from(db.port.to_string()));
    variables.insert(
        "EMBEDDING_DIMENSIONS".into(),
        Value::from(db.migration.embedding_dimensions.to_string()),
    );
    variables.insert(
        "AUTO_MIGRATE_SCHEMA".into(),
        Value::from(db.migration.auto_migrate.to_string()),
    );

    let migration_function = stack.declare(
        "DbMigrationLambda",
        CfnResource::new("AWS::Lambda::Function")
            .prop("Runtime", MIGRATION_RUNTIME)
            .prop("Handler", MIGRATION_HANDLER)
            .prop(
                "Code",
                json!({"S3Bucket": code_bucket, "S3Key": db.migration.code_key}),
            )
            .prop("Role", migration_role.arn())
            .prop("Timeout", MIGRATION_TIMEOUT_SECONDS)
            .prop("ReservedConcurrentExecutions", MIGRATION_RESERVED_CONCURRENCY)
            .prop(
                "VpcConfig",
                json!({
                    "SubnetIds": network.subnet_refs(),
                    "SecurityGroupIds": [migration_security_group.att("GroupId")],
                }),
            )
            .prop("Environment", json!({ "Variables": variables }))
            .depends_on(&migration_role)
            .destroy_on_removal(),
    )?;

    tracing::info!(
        cluster = %db.cluster_identifier,
        engine_version = %db.engine_version,
        min_acu = db.min_capacity,
        max_acu = db.max_capacity,
        "database declared"
    );

    Ok(Database {
        secret,
        security_group: db_security_group,
        subnet_group,
        cluster,
        writer,
        secret_attachment,
        migration_security_group,
        migration_ingress,
        migration_role,
        migration_function,
        name: db.name,
        port: db.port,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::resolver::declaration_order_violations;
    use crate::core::types::StackConfig;
    use crate::resources::network::declare_network;
    use crate::resources::policy::granted_actions;

    fn build() -> (Stack, Database) {
        let config: StackConfig = serde_yaml_ng::from_str(
            "version: \"1.0\"\nname: CodeRefactorInfra\naccount: \"123456789012\"\nregion: us-east-1\n",
        )
        .unwrap();
        let mut stack = Stack::new(&config);
        let net = declare_network(&mut stack).unwrap();
        let db = declare_database(&mut stack, &net).unwrap();
        (stack, db)
    }

    #[test]
    fn test_secret_precedes_cluster() {
        let (stack, db) = build();
        let ids: Vec<&String> = stack.template().resources.keys().collect();
        let secret_pos = ids.iter().position(|i| *i == db.secret.logical_id()).unwrap();
        let cluster_pos = ids.iter().position(|i| *i == db.cluster.logical_id()).unwrap();
        assert!(secret_pos < cluster_pos);
        assert!(declaration_order_violations(stack.template()).is_empty());
    }

    #[test]
    fn test_credential_policy() {
        let (stack, db) = build();
        let gen = &stack.template().resources[db.secret.logical_id()].properties
            ["GenerateSecretString"];
        assert_eq!(gen["GenerateStringKey"], "password");
        assert_eq!(gen["ExcludeCharacters"], "\"@/\\");
        assert_eq!(gen["PasswordLength"], 30);
        assert_eq!(gen["SecretStringTemplate"], "{\"username\":\"postgres\"}");
    }

    #[test]
    fn test_cluster_settings() {
        let (stack, db) = build();
        let p = &stack.template().resources[db.cluster.logical_id()].properties;
        assert_eq!(p["Engine"], "aurora-postgresql");
        assert_eq!(p["EngineVersion"], "15.12");
        assert_eq!(p["DBClusterIdentifier"], "code-refactor-cluster");
        assert_eq!(p["Port"], 5432);
        assert_eq!(p["EnableHttpEndpoint"], true);
        assert_eq!(p["ServerlessV2ScalingConfiguration"]["MinCapacity"], 0.5);
        assert_eq!(p["ServerlessV2ScalingConfiguration"]["MaxCapacity"], 4.0);
        assert_eq!(
            p["MasterUserPassword"],
            json!({"Fn::Sub": "{{resolve:secretsmanager:${CodeRefactorDbSecret}:SecretString:password::}}"})
        );
    }

    #[test]
    fn test_migration_role_grants_exactly() {
        let (stack, db) = build();
        let role = &stack.template().resources[db.migration_role.logical_id()];
        let actions = granted_actions(role);
        let mut expected: Vec<String> = SECRET_READ_ACTIONS
            .iter()
            .chain(RDS_DATA_ACTIONS.iter())
            .map(|s| s.to_string())
            .collect();
        let mut got = actions.clone();
        expected.sort();
        got.sort();
        assert_eq!(got, expected);
        assert_eq!(
            role.properties["ManagedPolicyArns"].as_array().unwrap().len(),
            2
        );
    }

    #[test]
    fn test_migration_function() {
        let (stack, db) = build();
        let p = &stack.template().resources[db.migration_function.logical_id()].properties;
        assert_eq!(p["Runtime"], "python3.12");
        assert_eq!(p["Timeout"], 10);
        assert_eq!(p["ReservedConcurrentExecutions"], 1);
        let vars = &p["Environment"]["Variables"];
        assert_eq!(vars["DB_NAME"], "code_refactor_db");
        assert_eq!(vars["DB_PORT"], "5432");
        assert_eq!(vars["EMBEDDING_DIMENSIONS"], "1536");
        assert_eq!(vars["AUTO_MIGRATE_SCHEMA"], "true");
        assert_eq!(p["Code"]["S3Bucket"], "code-refactor-assets-123456789012-us-east-1");
    }

    #[test]
    fn test_migration_ingress_on_db_port() {
        let (stack, db) = build();
        let p = &stack.template().resources[db.migration_ingress.logical_id()].properties;
        assert_eq!(p["FromPort"], 5432);
        assert_eq!(p["IpProtocol"], "tcp");
    }

    #[test]
    fn test_cluster_and_migration_have_own_security_groups() {
        let (stack, db) = build();
        let t = stack.template();
        assert_ne!(db.security_group.logical_id(), db.migration_security_group.logical_id());
        for sg in [&db.security_group, &db.migration_security_group] {
            assert_eq!(t.resources[sg.logical_id()].resource_type, "AWS::EC2::SecurityGroup");
        }
        let cluster = &t.resources["CodeRefactorDbCluster"].properties;
        assert_eq!(
            cluster["VpcSecurityGroupIds"][0]["Fn::GetAtt"][0],
            "CodeRefactorDbClusterSecurityGroup"
        );
        let ingress = &t.resources[db.migration_ingress.logical_id()].properties;
        assert_eq!(ingress["SourceSecurityGroupId"]["Fn::GetAtt"][0], "DbMigrationLambdaSG");
    }
}
