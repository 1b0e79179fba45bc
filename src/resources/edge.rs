//! Load balancer, container service, and the authenticated API gateway in front.
//!
//! The gateway forwards every request verbatim to the load balancer. All
//! methods carry the directory authorizer except the ones declared from
//! [`PUBLIC_ROUTES`] and the CORS preflight mocks.

use super::compute::{Compute, CONTAINER_NAME};
use super::database::Database;
use super::identity::Identity;
use super::network::{security_group, tcp_ingress_from, Network};
use super::routes::{
    CORS_ALLOW_HEADERS, CORS_ALLOW_METHODS, CORS_ALLOW_ORIGINS, PUBLIC_ROUTES,
};
use crate::core::error::Result;
use crate::core::stack::Stack;
use crate::core::template::{sub, CfnResource, Handle};
use serde_json::{json, Value};
use std::collections::HashMap;

pub const API_ID: &str = "CodeRefactorAPI";
pub const STAGE_NAME: &str = "prod";
pub const LISTENER_PORT: u16 = 80;
pub const HEALTH_CHECK_PATH: &str = "/health";
pub const SERVICE_GRACE_PERIOD_SECONDS: u32 = 60;

#[derive(Debug, Clone)]
pub struct Edge {
    pub alb_security_group: Handle,
    pub load_balancer: Handle,
    pub target_group: Handle,
    pub service_security_group: Handle,
    pub service_ingress: Handle,
    pub database_ingress: Handle,
    pub listener: Handle,
    pub service: Handle,
    pub rest_api: Handle,
    pub authorizer: Handle,
    pub proxy_resource: Handle,
    pub methods: Vec<Handle>,
    pub deployment: Handle,
    pub stage: Handle,
}

impl Edge {
    /// `https://{api}.execute-api.{region}.amazonaws.com/prod/`
    pub fn api_url(&self) -> Value {
        sub(format!(
            "https://{}.execute-api.${{AWS::Region}}.${{AWS::URLSuffix}}/{}/",
            self.rest_api.sub_ref(None),
            STAGE_NAME
        ))
    }
}

/// Construct-style id fragment for a path segment: `health` -> `Health`.
fn segment_id(segment: &str) -> String {
    let cleaned: String = segment.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
    let mut chars = cleaned.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => "Proxy".to_string(),
    }
}

/// `HTTP_PROXY` integration to `http://{alb}{path}`.
fn proxy_integration(alb: &Handle, backend_path: &str, greedy: bool) -> Value {
    let mut integration = json!({
        "Type": "HTTP_PROXY",
        "IntegrationHttpMethod": "ANY",
        "Uri": sub(format!("http://{}{}", alb.sub_ref(Some("DNSName")), backend_path)),
    });
    if greedy {
        integration["RequestParameters"] =
            json!({"integration.request.path.proxy": "method.request.path.proxy"});
    }
    integration
}

/// Mock integration answering CORS preflight with 204.
fn preflight_method(api: &Handle, resource_id: Value) -> CfnResource {
    let allow_headers = format!("'{}'", CORS_ALLOW_HEADERS.join(","));
    let allow_methods = format!("'{}'", CORS_ALLOW_METHODS.join(","));
    let allow_origin = format!("'{}'", CORS_ALLOW_ORIGINS.join(","));
    CfnResource::new("AWS::ApiGateway::Method")
        .prop("HttpMethod", "OPTIONS")
        .prop("ResourceId", resource_id)
        .prop("RestApiId", api.reference())
        .prop("AuthorizationType", "NONE")
        .prop(
            "Integration",
            json!({
                "Type": "MOCK",
                "RequestTemplates": {"application/json": "{ statusCode: 200 }"},
                "IntegrationResponses": [{
                    "StatusCode": "204",
                    "ResponseParameters": {
                        "method.response.header.Access-Control-Allow-Headers": allow_headers,
                        "method.response.header.Access-Control-Allow-Origin": allow_origin,
                        "method.response.header.Access-Control-Allow-Methods": allow_methods,
                    }
                }]
            }),
        )
        .prop(
            "MethodResponses",
            json!([{
                "StatusCode": "204",
                "ResponseParameters": {
                    "method.response.header.Access-Control-Allow-Headers": true,
                    "method.response.header.Access-Control-Allow-Origin": true,
                    "method.response.header.Access-Control-Allow-Methods": true,
                }
            }]),
        )
}

pub fn declare_edge(
    stack: &mut Stack,
    network: &Network,
    compute: &Compute,
    identity: &Identity,
    database: &Database,
) -> Result<Edge> {
    let config = stack.config().clone();
    let port = compute.container_port;

    // Load balancer

    let alb_security_group = stack.declare(
        "CodeRefactorALBSecurityGroup",
        security_group(network, "Automatically created Security Group for ELB").prop(
            "SecurityGroupIngress",
            json!([{
                "CidrIp": "0.0.0.0/0",
                "Description": format!("Allow from anyone on port {}", LISTENER_PORT),
                "FromPort": LISTENER_PORT,
                "ToPort": LISTENER_PORT,
                "IpProtocol": "tcp"
            }]),
        ),
    )?;

    let load_balancer = stack.declare(
        "CodeRefactorALB",
        CfnResource::new("AWS::ElasticLoadBalancingV2::LoadBalancer")
            .prop("Type", "application")
            .prop("Scheme", "internet-facing")
            .prop("Subnets", network.subnet_refs())
            .prop("SecurityGroups", json!([alb_security_group.att("GroupId")]))
            .prop(
                "LoadBalancerAttributes",
                json!([{"Key": "deletion_protection.enabled", "Value": "false"}]),
            )
            .depends_on(&network.gateway_attachment)
            .destroy_on_removal(),
    )?;

    let target_group = stack.declare(
        "CodeRefactorTargetGroup",
        CfnResource::new("AWS::ElasticLoadBalancingV2::TargetGroup")
            .prop("Port", port)
            .prop("Protocol", "HTTP")
            .prop("TargetType", "ip")
            .prop("VpcId", network.vpc_ref())
            .prop("HealthCheckPath", HEALTH_CHECK_PATH)
            .prop("Matcher", json!({"HttpCode": "200"}))
            .prop("HealthyThresholdCount", 2)
            .prop("UnhealthyThresholdCount", 3)
            .prop("HealthCheckTimeoutSeconds", 5)
            .prop("HealthCheckIntervalSeconds", 30),
    )?;

    let service_security_group = stack.declare(
        "EcsServiceSG",
        security_group(
            network,
            "Allow outbound connections from ECS service to RDS and other AWS services",
        ),
    )?;

    let service_ingress = stack.declare(
        "EcsServiceSGFromCodeRefactorALBSecurityGroup",
        tcp_ingress_from(
            &service_security_group,
            &alb_security_group,
            port,
            "Load balancer to target",
        ),
    )?;

    let database_ingress = stack.declare(
        "CodeRefactorDbClusterFromEcsServiceSG",
        tcp_ingress_from(
            &database.security_group,
            &service_security_group,
            database.port,
            "Allow ECS service to connect to RDS",
        ),
    )?;

    let listener = stack.declare(
        "CodeRefactorListener",
        CfnResource::new("AWS::ElasticLoadBalancingV2::Listener")
            .prop("LoadBalancerArn", load_balancer.reference())
            .prop("Port", LISTENER_PORT)
            .prop("Protocol", "HTTP")
            .prop(
                "DefaultActions",
                json!([{"Type": "forward", "TargetGroupArn": target_group.reference()}]),
            ),
    )?;

    let service = stack.declare(
        "CodeRefactorService",
        CfnResource::new("AWS::ECS::Service")
            .prop("Cluster", compute.cluster.reference())
            .prop("TaskDefinition", compute.task_definition.reference())
            .prop("DesiredCount", config.compute.desired_count)
            .prop("LaunchType", "FARGATE")
            .prop("HealthCheckGracePeriodSeconds", SERVICE_GRACE_PERIOD_SECONDS)
            .prop(
                "NetworkConfiguration",
                json!({
                    "AwsvpcConfiguration": {
                        "AssignPublicIp": "ENABLED",
                        "Subnets": network.subnet_refs(),
                        "SecurityGroups": [service_security_group.att("GroupId")],
                    }
                }),
            )
            .prop(
                "LoadBalancers",
                json!([{
                    "ContainerName": CONTAINER_NAME,
                    "ContainerPort": port,
                    "TargetGroupArn": target_group.reference(),
                }]),
            )
            .depends_on(&listener)
            .destroy_on_removal(),
    )?;

    // Gateway

    let rest_api = stack.declare(
        API_ID,
        CfnResource::new("AWS::ApiGateway::RestApi")
            .prop("Name", format!("{}-api", config.prefix))
            .prop("Description", "API Gateway for Code Refactoring Tool")
            .prop("EndpointConfiguration", json!({"Types": ["REGIONAL"]}))
            .destroy_on_removal(),
    )?;
    let root = rest_api.att("RootResourceId");

    let authorizer = stack.declare(
        "CodeRefactorAuthorizer",
        CfnResource::new("AWS::ApiGateway::Authorizer")
            .prop("Name", format!("{}-authorizer", config.prefix))
            .prop("RestApiId", rest_api.reference())
            .prop("Type", "COGNITO_USER_POOLS")
            .prop("IdentitySource", "method.request.header.Authorization")
            .prop("ProviderARNs", json!([identity.user_pool.arn()])),
    )?;

    let guarded = |resource_id: Value, greedy: bool, backend_path: &str| {
        let mut method = CfnResource::new("AWS::ApiGateway::Method")
            .prop("HttpMethod", "ANY")
            .prop("ResourceId", resource_id)
            .prop("RestApiId", rest_api.reference())
            .prop("AuthorizationType", "COGNITO_USER_POOLS")
            .prop("AuthorizerId", authorizer.reference())
            .prop(
                "Integration",
                proxy_integration(&load_balancer, backend_path, greedy),
            );
        if greedy {
            method = method.prop(
                "RequestParameters",
                json!({"method.request.path.proxy": true}),
            );
        }
        method
    };

    let mut methods = Vec::new();

    methods.push(stack.declare(
        &format!("{}OPTIONS", API_ID),
        preflight_method(&rest_api, root.clone()),
    )?);
    methods.push(stack.declare(
        &format!("{}ANY", API_ID),
        guarded(root.clone(), false, "/"),
    )?);

    let proxy_resource = stack.declare(
        &format!("{}Proxy", API_ID),
        CfnResource::new("AWS::ApiGateway::Resource")
            .prop("ParentId", root.clone())
            .prop("PathPart", "{proxy+}")
            .prop("RestApiId", rest_api.reference()),
    )?;
    methods.push(stack.declare(
        &format!("{}ProxyOPTIONS", API_ID),
        preflight_method(&rest_api, proxy_resource.reference()),
    )?);
    methods.push(stack.declare(
        &format!("{}ProxyANY", API_ID),
        guarded(proxy_resource.reference(), true, "/{proxy}"),
    )?);

    // Open methods, one gateway resource per path segment
    let mut resources: HashMap<String, Handle> = HashMap::new();
    for public in PUBLIC_ROUTES.iter() {
        let mut parent_path = String::new();
        let mut parent_id = root.clone();
        let mut id_prefix = API_ID.to_string();
        for segment in public.path.split('/').filter(|s| !s.is_empty()) {
            parent_path = format!("{}/{}", parent_path, segment);
            id_prefix = format!("{}{}", id_prefix, segment_id(segment));
            let handle = match resources.get(&parent_path) {
                Some(existing) => existing.clone(),
                None => {
                    let created = stack.declare(
                        &id_prefix,
                        CfnResource::new("AWS::ApiGateway::Resource")
                            .prop("ParentId", parent_id.clone())
                            .prop("PathPart", segment)
                            .prop("RestApiId", rest_api.reference()),
                    )?;
                    methods.push(stack.declare(
                        &format!("{}OPTIONS", id_prefix),
                        preflight_method(&rest_api, created.reference()),
                    )?);
                    resources.insert(parent_path.clone(), created.clone());
                    created
                }
            };
            parent_id = handle.reference();
        }
        methods.push(stack.declare(
            &format!("{}{}", id_prefix, public.method),
            CfnResource::new("AWS::ApiGateway::Method")
                .prop("HttpMethod", public.method)
                .prop("ResourceId", parent_id)
                .prop("RestApiId", rest_api.reference())
                .prop("AuthorizationType", "NONE")
                .prop(
                    "Integration",
                    proxy_integration(&load_balancer, public.path, false),
                ),
        )?);
    }

    let mut deployment_resource = CfnResource::new("AWS::ApiGateway::Deployment")
        .prop("RestApiId", rest_api.reference())
        .prop("Description", "Automatically created by the RestApi construct");
    for method in &methods {
        deployment_resource = deployment_resource.depends_on(method);
    }
    let deployment = stack.declare(&format!("{}Deployment", API_ID), deployment_resource)?;

    let stage = stack.declare(
        &format!("{}DeploymentStage{}", API_ID, STAGE_NAME),
        CfnResource::new("AWS::ApiGateway::Stage")
            .prop("RestApiId", rest_api.reference())
            .prop("DeploymentId", deployment.reference())
            .prop("StageName", STAGE_NAME),
    )?;

    tracing::info!(
        methods = methods.len(),
        public = PUBLIC_ROUTES.len(),
        "edge declared"
    );

    Ok(Edge {
        alb_security_group,
        load_balancer,
        target_group,
        service_security_group,
        service_ingress,
        database_ingress,
        listener,
        service,
        rest_api,
        authorizer,
        proxy_resource,
        methods,
        deployment,
        stage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_id() {
        assert_eq!(segment_id("health"), "Health");
        assert_eq!(segment_id("api-docs"), "Apidocs");
        assert_eq!(segment_id("{proxy+}"), "Proxy");
    }

    #[test]
    fn test_proxy_integration_uri() {
        let alb = Handle::new("CodeRefactorALB", "AWS::ElasticLoadBalancingV2::LoadBalancer");
        let i = proxy_integration(&alb, "/{proxy}", true);
        assert_eq!(i["Type"], "HTTP_PROXY");
        assert_eq!(
            i["Uri"],
            json!({"Fn::Sub": "http://${CodeRefactorALB.DNSName}/{proxy}"})
        );
        assert_eq!(
            i["RequestParameters"]["integration.request.path.proxy"],
            "method.request.path.proxy"
        );
        let fixed = proxy_integration(&alb, "/health", false);
        assert!(fixed.get("RequestParameters").is_none());
    }

    #[test]
    fn test_preflight_is_mock_without_auth() {
        let api = Handle::new(API_ID, "AWS::ApiGateway::RestApi");
        let m = preflight_method(&api, api.att("RootResourceId"));
        assert_eq!(m.properties["AuthorizationType"], "NONE");
        assert_eq!(m.properties["Integration"]["Type"], "MOCK");
        assert_eq!(
            m.properties["Integration"]["IntegrationResponses"][0]["ResponseParameters"]
                ["method.response.header.Access-Control-Allow-Methods"],
            "'GET,POST,PUT,DELETE,OPTIONS'"
        );
    }
}
