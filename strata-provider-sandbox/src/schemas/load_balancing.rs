//! Load balancer, target group and listener schemas

use strata_core::resource::Value;
use strata_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types};

use super::types as sbx_types;

fn string_list() -> AttributeType {
    AttributeType::List(Box::new(AttributeType::String))
}

pub fn load_balancer_schema() -> ResourceSchema {
    ResourceSchema::new("sandbox.load_balancer")
        .with_description("An application load balancer")
        .attribute(
            AttributeSchema::new("name", sbx_types::elb_name())
                .required()
                .force_replace(),
        )
        .attribute(AttributeSchema::new("subnets", string_list()).required())
        .attribute(AttributeSchema::new("security_groups", string_list()))
        .attribute(
            AttributeSchema::new("internal", AttributeType::Bool)
                .force_replace()
                .with_default(Value::Bool(false)),
        )
        .output("id")
        .output("arn")
        .output("dns_name")
        .with_unique_identity()
}

pub fn target_group_schema() -> ResourceSchema {
    ResourceSchema::new("sandbox.target_group")
        .with_description("Targets a load balancer can route requests to")
        .attribute(
            AttributeSchema::new("name", sbx_types::elb_name())
                .required()
                .force_replace(),
        )
        .attribute(
            AttributeSchema::new("port", types::port())
                .required()
                .force_replace(),
        )
        .attribute(
            AttributeSchema::new("protocol", sbx_types::lb_protocol())
                .force_replace()
                .with_default(Value::string("HTTP")),
        )
        .attribute(
            AttributeSchema::new(
                "target_type",
                AttributeType::Enum(vec!["ip".to_string(), "instance".to_string()]),
            )
            .force_replace()
            .with_default(Value::string("ip")),
        )
        .attribute(
            AttributeSchema::new("vpc_id", AttributeType::String)
                .required()
                .force_replace(),
        )
        .attribute(
            AttributeSchema::new("health_check_path", AttributeType::String)
                .with_default(Value::string("/")),
        )
        .output("id")
        .output("arn")
        .with_unique_identity()
}

pub fn listener_schema() -> ResourceSchema {
    ResourceSchema::new("sandbox.listener")
        .with_description("Accepts connections on a load balancer port")
        .attribute(
            AttributeSchema::new("load_balancer_arn", sbx_types::arn())
                .required()
                .force_replace(),
        )
        .attribute(AttributeSchema::new("port", types::port()).required())
        .attribute(
            AttributeSchema::new("protocol", sbx_types::lb_protocol())
                .with_default(Value::string("HTTP")),
        )
        .attribute(
            AttributeSchema::new("target_group_arn", sbx_types::arn())
                .required()
                .with_description("Target group that receives forwarded requests"),
        )
        .output("id")
        .output("arn")
}

pub fn schemas() -> Vec<ResourceSchema> {
    vec![
        load_balancer_schema(),
        target_group_schema(),
        listener_schema(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::resource::Attributes;

    #[test]
    fn target_group_port_is_range_checked() {
        let attrs: Attributes = [
            ("name".to_string(), Value::string("todo-app-tg")),
            ("port".to_string(), Value::Int(70000)),
            ("vpc_id".to_string(), Value::string("vpc-1")),
        ]
        .into();
        assert!(target_group_schema().validate(&attrs).is_err());
    }

    #[test]
    fn listener_accepts_references() {
        let attrs: Attributes = [
            ("load_balancer_arn".to_string(), Value::reference("alb", "arn")),
            ("port".to_string(), Value::Int(80)),
            ("target_group_arn".to_string(), Value::reference("tg", "arn")),
        ]
        .into();
        assert!(listener_schema().validate(&attrs).is_ok());
    }
}
