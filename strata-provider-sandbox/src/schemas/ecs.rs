//! Container cluster, task definition and service schemas

use strata_core::resource::Value;
use strata_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types};

use super::types as sbx_types;

/// Valid (cpu, memory) combinations for awsvpc tasks
const TASK_SIZES: &[(&str, &[&str])] = &[
    ("256", &["512", "1024", "2048"]),
    ("512", &["1024", "2048", "3072", "4096"]),
    ("1024", &["2048", "3072", "4096", "5120", "6144", "7168", "8192"]),
    ("2048", &["4096", "8192", "16384"]),
    ("4096", &["8192", "16384", "30720"]),
];

/// Whether `memory` can be paired with `cpu`
pub fn task_size_is_valid(cpu: &str, memory: &str) -> bool {
    TASK_SIZES
        .iter()
        .any(|(c, memories)| *c == cpu && memories.contains(&memory))
}

pub fn cluster_schema() -> ResourceSchema {
    ResourceSchema::new("sandbox.ecs_cluster")
        .attribute(
            AttributeSchema::new("name", sbx_types::cluster_name())
                .required()
                .force_replace(),
        )
        .attribute(
            AttributeSchema::new("container_insights", AttributeType::Bool)
                .with_default(Value::Bool(false)),
        )
        .output("id")
        .output("arn")
        .with_unique_identity()
}

/// Task definitions are immutable revisions of a family
pub fn task_definition_schema() -> ResourceSchema {
    ResourceSchema::new("sandbox.task_definition")
        .with_description("A versioned description of the containers a task runs")
        .attribute(
            AttributeSchema::new("family", sbx_types::cluster_name())
                .required()
                .force_replace(),
        )
        .attribute(
            AttributeSchema::new(
                "cpu",
                AttributeType::Enum(TASK_SIZES.iter().map(|(c, _)| c.to_string()).collect()),
            )
            .required()
            .force_replace(),
        )
        .attribute(
            AttributeSchema::new("memory", AttributeType::String)
                .required()
                .force_replace(),
        )
        .attribute(
            AttributeSchema::new(
                "network_mode",
                AttributeType::Enum(vec!["awsvpc".to_string(), "bridge".to_string()]),
            )
            .force_replace()
            .with_default(Value::string("awsvpc")),
        )
        .attribute(AttributeSchema::new("execution_role_arn", sbx_types::arn()).force_replace())
        .attribute(
            AttributeSchema::new("image", sbx_types::image())
                .required()
                .force_replace(),
        )
        .attribute(AttributeSchema::new("container_name", AttributeType::String).force_replace())
        .attribute(AttributeSchema::new("container_port", types::port()).force_replace())
        .output("id")
        .output("arn")
        .output("revision")
}

/// Services are unique by name within their cluster
pub fn service_schema() -> ResourceSchema {
    ResourceSchema::new("sandbox.ecs_service")
        .with_description("Keeps a number of tasks running behind a load balancer")
        .attribute(
            AttributeSchema::new("name", sbx_types::cluster_name())
                .required()
                .force_replace(),
        )
        .attribute(
            AttributeSchema::new("cluster", sbx_types::arn())
                .required()
                .force_replace(),
        )
        .attribute(AttributeSchema::new("task_definition", sbx_types::arn()).required())
        .attribute(
            AttributeSchema::new("desired_count", sbx_types::non_negative_int())
                .with_default(Value::Int(1)),
        )
        .attribute(
            AttributeSchema::new(
                "launch_type",
                AttributeType::Enum(vec!["FARGATE".to_string(), "EC2".to_string()]),
            )
            .force_replace()
            .with_default(Value::string("FARGATE")),
        )
        .attribute(
            AttributeSchema::new("assign_public_ip", AttributeType::Bool)
                .with_default(Value::Bool(false)),
        )
        .attribute(AttributeSchema::new(
            "subnets",
            AttributeType::List(Box::new(AttributeType::String)),
        ))
        .attribute(AttributeSchema::new(
            "security_groups",
            AttributeType::List(Box::new(AttributeType::String)),
        ))
        .attribute(AttributeSchema::new("target_group_arn", sbx_types::arn()))
        .attribute(AttributeSchema::new("container_name", AttributeType::String))
        .attribute(AttributeSchema::new("container_port", types::port()))
        .output("id")
        .output("arn")
        .with_unique_identity()
}

pub fn schemas() -> Vec<ResourceSchema> {
    vec![cluster_schema(), task_definition_schema(), service_schema()]
}
