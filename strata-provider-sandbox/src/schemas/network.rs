//! VPC, subnet and security group schemas

use strata_core::resource::Value;
use strata_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types};

use super::types as sbx_types;

pub fn vpc_schema() -> ResourceSchema {
    ResourceSchema::new("sandbox.vpc")
        .with_description("An isolated virtual network")
        .attribute(
            AttributeSchema::new("cidr_block", types::cidr())
                .required()
                .force_replace()
                .with_description("The IPv4 address range of the VPC"),
        )
        .attribute(
            AttributeSchema::new("enable_dns", AttributeType::Bool).with_default(Value::Bool(true)),
        )
        .attribute(AttributeSchema::new(
            "tags",
            AttributeType::Map(Box::new(AttributeType::String)),
        ))
        .output("id")
        .output("arn")
}

pub fn subnet_schema() -> ResourceSchema {
    ResourceSchema::new("sandbox.subnet")
        .with_description("A range of addresses inside a VPC")
        .attribute(
            AttributeSchema::new("vpc_id", AttributeType::String)
                .required()
                .force_replace(),
        )
        .attribute(
            AttributeSchema::new("cidr_block", types::cidr())
                .required()
                .force_replace(),
        )
        .attribute(
            AttributeSchema::new("availability_zone", sbx_types::availability_zone())
                .force_replace()
                .with_default(Value::string("sbx-east-1a")),
        )
        .attribute(
            AttributeSchema::new("map_public_ip", AttributeType::Bool)
                .with_default(Value::Bool(false)),
        )
        .attribute(AttributeSchema::new(
            "tags",
            AttributeType::Map(Box::new(AttributeType::String)),
        ))
        .output("id")
        .output("arn")
}

/// Security groups are unique by name within their VPC
pub fn security_group_schema() -> ResourceSchema {
    let rules = || AttributeType::List(Box::new(sbx_types::security_rule()));
    ResourceSchema::new("sandbox.security_group")
        .with_description("A virtual firewall for traffic in and out of a VPC")
        .attribute(
            AttributeSchema::new("name", sbx_types::group_name())
                .required()
                .force_replace(),
        )
        .attribute(
            AttributeSchema::new("vpc_id", AttributeType::String)
                .required()
                .force_replace(),
        )
        .attribute(
            AttributeSchema::new("description", AttributeType::String)
                .force_replace()
                .with_default(Value::string("Managed by Strata")),
        )
        .attribute(AttributeSchema::new("ingress", rules()))
        .attribute(AttributeSchema::new("egress", rules()))
        .output("id")
        .output("arn")
        .with_unique_identity()
}

pub fn schemas() -> Vec<ResourceSchema> {
    vec![vpc_schema(), subnet_schema(), security_group_schema()]
}
