//! Isolated VPC with public subnets across availability zones and no NAT.
//!
//! Each zone gets one `/24` public subnet carved from the VPC's `/16`, its
//! own route table, and a default route to the internet gateway.

use crate::core::error::{InfraError, Result};
use crate::core::stack::Stack;
use crate::core::template::{get_azs, select, CfnResource, Handle};
use serde_json::{json, Value};

pub const VPC_ID: &str = "RefactorVpc";

/// Handles produced by [`declare_network`].
#[derive(Debug, Clone)]
pub struct Network {
    pub vpc: Handle,
    pub internet_gateway: Handle,
    pub gateway_attachment: Handle,
    pub subnets: Vec<Handle>,
    pub route_tables: Vec<Handle>,
    pub default_routes: Vec<Handle>,
}

impl Network {
    /// `[{"Ref": subnet}, ...]` for subnet-list properties.
    pub fn subnet_refs(&self) -> Value {
        Value::Array(self.subnets.iter().map(Handle::reference).collect())
    }

    pub fn vpc_ref(&self) -> Value {
        self.vpc.reference()
    }
}

/// Security group with unrestricted egress.
pub fn security_group(network: &Network, description: &str) -> CfnResource {
    CfnResource::new("AWS::EC2::SecurityGroup")
        .prop("GroupDescription", description)
        .prop("VpcId", network.vpc_ref())
        .prop(
            "SecurityGroupEgress",
            json!([{
                "CidrIp": "0.0.0.0/0",
                "Description": "Allow all outbound traffic by default",
                "IpProtocol": "-1"
            }]),
        )
        .destroy_on_removal()
}

/// TCP ingress rule on `target` from members of `source`.
pub fn tcp_ingress_from(target: &Handle, source: &Handle, port: u16, description: &str) -> CfnResource {
    CfnResource::new("AWS::EC2::SecurityGroupIngress")
        .prop("GroupId", target.att("GroupId"))
        .prop("SourceSecurityGroupId", source.att("GroupId"))
        .prop("IpProtocol", "tcp")
        .prop("FromPort", port)
        .prop("ToPort", port)
        .prop("Description", description)
}

/// `/24` blocks 0..count inside a `/16`.
pub fn subnet_cidrs(vpc_cidr: &str, count: u8) -> Result<Vec<String>> {
    let invalid = || InfraError::Validation(format!("invalid VPC CIDR '{}'", vpc_cidr));
    let (addr, _) = vpc_cidr.split_once('/').ok_or_else(invalid)?;
    let octets: Vec<u8> = addr
        .split('.')
        .map(|o| o.parse::<u8>().map_err(|_| invalid()))
        .collect::<Result<_>>()?;
    if octets.len() != 4 {
        return Err(invalid());
    }
    Ok((0..count)
        .map(|i| format!("{}.{}.{}.0/24", octets[0], octets[1], i))
        .collect())
}

/// Declare the VPC, internet gateway, and one public subnet per zone.
pub fn declare_network(stack: &mut Stack) -> Result<Network> {
    let net = stack.config().network.clone();
    let stack_name = stack.name().to_string();
    if net.max_azs < 2 {
        return Err(InfraError::Validation(format!(
            "network needs at least 2 availability zones, got {}",
            net.max_azs
        )));
    }
    if net.nat_gateways != 0 {
        return Err(InfraError::Validation(
            "NAT gateways are not supported; workloads use public subnets".to_string(),
        ));
    }

    let vpc = stack.declare(
        VPC_ID,
        CfnResource::new("AWS::EC2::VPC")
            .prop("CidrBlock", net.cidr.as_str())
            .prop("EnableDnsHostnames", true)
            .prop("EnableDnsSupport", true)
            .prop("InstanceTenancy", "default")
            .destroy_on_removal(),
    )?;

    let internet_gateway = stack.declare(
        &format!("{}IGW", VPC_ID),
        CfnResource::new("AWS::EC2::InternetGateway"),
    )?;

    let gateway_attachment = stack.declare(
        &format!("{}VPCGW", VPC_ID),
        CfnResource::new("AWS::EC2::VPCGatewayAttachment")
            .prop("VpcId", vpc.reference())
            .prop("InternetGatewayId", internet_gateway.reference()),
    )?;

    let cidrs = subnet_cidrs(&net.cidr, net.max_azs)?;
    let mut subnets = Vec::with_capacity(cidrs.len());
    let mut route_tables = Vec::with_capacity(cidrs.len());
    let mut default_routes = Vec::with_capacity(cidrs.len());

    for (i, cidr) in cidrs.iter().enumerate() {
        let base = format!("{}PublicSubnet{}", VPC_ID, i + 1);

        let subnet = stack.declare(
            &format!("{}Subnet", base),
            CfnResource::new("AWS::EC2::Subnet")
                .prop("VpcId", vpc.reference())
                .prop("AvailabilityZone", select(i, get_azs()))
                .prop("CidrBlock", cidr.as_str())
                .prop("MapPublicIpOnLaunch", true)
                .prop(
                    "Tags",
                    json!([
                        {"Key": "aws-cdk:subnet-name", "Value": "Public"},
                        {"Key": "aws-cdk:subnet-type", "Value": "Public"},
                        {"Key": "Name", "Value": format!("{}/{}", stack_name, base)}
                    ]),
                ),
        )?;

        let route_table = stack.declare(
            &format!("{}RouteTable", base),
            CfnResource::new("AWS::EC2::RouteTable").prop("VpcId", vpc.reference()),
        )?;

        stack.declare(
            &format!("{}RouteTableAssociation", base),
            CfnResource::new("AWS::EC2::SubnetRouteTableAssociation")
                .prop("RouteTableId", route_table.reference())
                .prop("SubnetId", subnet.reference()),
        )?;

        let route = stack.declare(
            &format!("{}DefaultRoute", base),
            CfnResource::new("AWS::EC2::Route")
                .prop("RouteTableId", route_table.reference())
                .prop("DestinationCidrBlock", "0.0.0.0/0")
                .prop("GatewayId", internet_gateway.reference())
                .depends_on(&gateway_attachment),
        )?;

        subnets.push(subnet);
        route_tables.push(route_table);
        default_routes.push(route);
    }

    tracing::info!(
        zones = subnets.len(),
        cidr = %net.cidr,
        "network declared"
    );

    Ok(Network {
        vpc,
        internet_gateway,
        gateway_attachment,
        subnets,
        route_tables,
        default_routes,
    })
}
