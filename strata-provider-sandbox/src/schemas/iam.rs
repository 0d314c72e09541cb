//! IAM role schemas

use strata_core::schema::{AttributeSchema, AttributeType, ResourceSchema};

use super::types as sbx_types;

pub fn role_schema() -> ResourceSchema {
    ResourceSchema::new("sandbox.iam_role")
        .with_description("An identity that services can assume")
        .attribute(
            AttributeSchema::new("name", sbx_types::iam_name())
                .required()
                .force_replace(),
        )
        .attribute(
            AttributeSchema::new("assume_role_service", AttributeType::String)
                .required()
                .with_description("Service principal allowed to assume the role"),
        )
        .attribute(AttributeSchema::new("description", AttributeType::String))
        .output("id")
        .output("arn")
        .with_unique_identity()
}

pub fn role_policy_attachment_schema() -> ResourceSchema {
    ResourceSchema::new("sandbox.role_policy_attachment")
        .attribute(
            AttributeSchema::new("role", sbx_types::iam_name())
                .required()
                .force_replace(),
        )
        .attribute(
            AttributeSchema::new("policy_arn", sbx_types::arn())
                .required()
                .force_replace(),
        )
        .output("id")
}

pub fn schemas() -> Vec<ResourceSchema> {
    vec![role_schema(), role_policy_attachment_schema()]
}
