//! Sandbox resource schema definitions

pub mod ecs;
pub mod iam;
pub mod load_balancing;
pub mod network;
pub mod types;

use strata_core::schema::ResourceSchema;

/// Returns all sandbox schemas
pub fn all_schemas() -> Vec<ResourceSchema> {
    let mut schemas = Vec::new();
    schemas.extend(network::schemas());
    schemas.extend(load_balancing::schemas());
    schemas.extend(iam::schemas());
    schemas.extend(ecs::schemas());
    schemas
}

/// How the simulated cloud stores one resource type
#[derive(Debug)]
pub struct Kind {
    pub resource_type: &'static str,
    /// Identifier prefix (e.g., "vpc" gives "vpc-0a1b2c3d4e5f6a7b8")
    pub id_prefix: &'static str,
    /// ARN service and resource path segment
    pub arn_service: &'static str,
    pub arn_resource: &'static str,
    /// Attributes that together must be unique among live objects of this type
    pub identity: &'static [&'static str],
    /// Attributes holding the id, ARN, or name of another live object
    pub references: &'static [&'static str],
}

pub const KINDS: &[Kind] = &[
    Kind {
        resource_type: "sandbox.vpc",
        id_prefix: "vpc",
        arn_service: "ec2",
        arn_resource: "vpc",
        identity: &[],
        references: &[],
    },
    Kind {
        resource_type: "sandbox.subnet",
        id_prefix: "subnet",
        arn_service: "ec2",
        arn_resource: "subnet",
        identity: &[],
        references: &["vpc_id"],
    },
    Kind {
        resource_type: "sandbox.security_group",
        id_prefix: "sg",
        arn_service: "ec2",
        arn_resource: "security-group",
        identity: &["vpc_id", "name"],
        references: &["vpc_id"],
    },
    Kind {
        resource_type: "sandbox.load_balancer",
        id_prefix: "lb",
        arn_service: "elasticloadbalancing",
        arn_resource: "loadbalancer/app",
        identity: &["name"],
        references: &["subnets", "security_groups"],
    },
    Kind {
        resource_type: "sandbox.target_group",
        id_prefix: "tg",
        arn_service: "elasticloadbalancing",
        arn_resource: "targetgroup",
        identity: &["name"],
        references: &["vpc_id"],
    },
    Kind {
        resource_type: "sandbox.listener",
        id_prefix: "lsn",
        arn_service: "elasticloadbalancing",
        arn_resource: "listener/app",
        identity: &["load_balancer_arn", "port"],
        references: &["load_balancer_arn", "target_group_arn"],
    },
    Kind {
        resource_type: "sandbox.iam_role",
        id_prefix: "role",
        arn_service: "iam",
        arn_resource: "role",
        identity: &["name"],
        references: &[],
    },
    Kind {
        resource_type: "sandbox.role_policy_attachment",
        id_prefix: "rpa",
        arn_service: "iam",
        arn_resource: "attachment",
        identity: &["role", "policy_arn"],
        references: &["role"],
    },
    Kind {
        resource_type: "sandbox.ecs_cluster",
        id_prefix: "cluster",
        arn_service: "ecs",
        arn_resource: "cluster",
        identity: &["name"],
        references: &[],
    },
    Kind {
        resource_type: "sandbox.task_definition",
        id_prefix: "td",
        arn_service: "ecs",
        arn_resource: "task-definition",
        identity: &[],
        references: &["execution_role_arn"],
    },
    Kind {
        resource_type: "sandbox.ecs_service",
        id_prefix: "svc",
        arn_service: "ecs",
        arn_resource: "service",
        identity: &["cluster", "name"],
        references: &[
            "cluster",
            "task_definition",
            "subnets",
            "security_groups",
            "target_group_arn",
        ],
    },
];

pub fn kind(resource_type: &str) -> Option<&'static Kind> {
    KINDS.iter().find(|k| k.resource_type == resource_type)
}
