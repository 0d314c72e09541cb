//! The simulated cloud: live objects and the rules they obey
//!
//! Every operation here is synchronous and runs under the provider's lock,
//! so each call sees a consistent view of all live objects.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strata_core::provider::{AttributeDiff, Created, ProviderError, ProviderResult};
use strata_core::resource::{Attributes, ResourceId, Value, decode_attributes, encode_attributes};
use strata_core::schema::{ResourceSchema, UpdateBehavior};

use crate::schemas::Kind;
use crate::schemas::ecs::task_size_is_valid;

/// Where generated ARNs point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub region: String,
    pub account_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudObject {
    pub resource_type: String,
    /// Inputs with defaults filled in, plus computed attributes
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl CloudObject {
    fn get(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(serde_json::Value::as_str)
    }

    /// Strings other objects may use to point at this one
    fn handles(&self) -> Vec<&str> {
        let mut handles: Vec<&str> = ["id", "arn"].iter().filter_map(|a| self.get(a)).collect();
        if self.resource_type == "sandbox.iam_role"
            && let Some(name) = self.get("name")
        {
            handles.push(name);
        }
        handles
    }

    /// Every string held in `attribute`, looking inside lists
    fn strings_in(&self, attribute: &str) -> Vec<&str> {
        match self.attributes.get(attribute) {
            Some(serde_json::Value::String(s)) => vec![s.as_str()],
            Some(serde_json::Value::Array(items)) => {
                items.iter().filter_map(serde_json::Value::as_str).collect()
            }
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cloud {
    /// Live objects by identifier
    #[serde(default)]
    objects: BTreeMap<String, CloudObject>,
    /// Last revision handed out per task definition family
    #[serde(default)]
    revisions: BTreeMap<String, i64>,
}

impl Cloud {
    pub fn get(&self, identifier: &str) -> Option<&CloudObject> {
        self.objects.get(identifier)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn objects(&self) -> impl Iterator<Item = (&String, &CloudObject)> {
        self.objects.iter()
    }

    /// Current attributes of a live object of the given type
    pub fn read(&self, id: &ResourceId, identifier: &str) -> Option<Attributes> {
        self.objects
            .get(identifier)
            .filter(|o| o.resource_type == id.resource_type)
            .map(|o| decode_attributes(&o.attributes))
    }

    pub fn create(
        &mut self,
        kind: &Kind,
        schema: &ResourceSchema,
        account: &Account,
        id: &ResourceId,
        inputs: &Attributes,
    ) -> ProviderResult<Created> {
        let mut attributes = inputs.clone();
        schema.apply_defaults(&mut attributes);
        check_inputs(schema, id, &attributes)?;

        let object = CloudObject {
            resource_type: id.resource_type.clone(),
            attributes: encode_attributes(&attributes),
        };
        self.check_identity(kind, id, &object, None)?;
        self.check_references(kind, id, &object)?;

        let identifier = format!(
            "{}-{}",
            kind.id_prefix,
            &uuid::Uuid::new_v4().simple().to_string()[..17]
        );
        let label = match kind.resource_type {
            "sandbox.task_definition" => {
                let family = object.get("family").unwrap_or(identifier.as_str()).to_string();
                let revision = self.revisions.entry(family.clone()).or_insert(0);
                *revision += 1;
                attributes.insert("revision".to_string(), Value::Int(*revision));
                format!("{}:{}", family, revision)
            }
            _ => object.get("name").unwrap_or(identifier.as_str()).to_string(),
        };

        let arn = arn(kind, account, &label);
        if kind.resource_type == "sandbox.load_balancer" {
            attributes.insert(
                "dns_name".to_string(),
                Value::string(format!(
                    "{}-{}.{}.elb.sandbox.local",
                    label,
                    &identifier[identifier.len() - 8..],
                    account.region
                )),
            );
        }
        attributes.insert("id".to_string(), Value::string(identifier.clone()));
        if schema.is_output("arn") {
            attributes.insert("arn".to_string(), Value::string(arn));
        }

        log::debug!("sandbox: created {} as {}", id, identifier);
        self.objects.insert(
            identifier.clone(),
            CloudObject {
                resource_type: id.resource_type.clone(),
                attributes: encode_attributes(&attributes),
            },
        );
        Ok(Created {
            identifier,
            outputs: attributes,
        })
    }

    pub fn update(
        &mut self,
        kind: &Kind,
        schema: &ResourceSchema,
        id: &ResourceId,
        identifier: &str,
        diff: &AttributeDiff,
    ) -> ProviderResult<Attributes> {
        let current = self
            .objects
            .get(identifier)
            .filter(|o| o.resource_type == id.resource_type)
            .ok_or_else(|| not_found(id, identifier))?;

        for attr in diff.changed() {
            if schema.update_behavior(attr) == UpdateBehavior::Replace {
                return Err(ProviderError::new(format!(
                    "InvalidParameter: '{}' cannot be changed on an existing {}",
                    attr, id.resource_type
                ))
                .for_resource(id.clone()));
            }
        }

        let mut attributes = diff.new.clone();
        schema.apply_defaults(&mut attributes);
        check_inputs(schema, id, &attributes)?;

        let computed = decode_attributes(&current.attributes)
            .into_iter()
            .filter(|(k, _)| schema.is_output(k));
        attributes.extend(computed);

        let object = CloudObject {
            resource_type: id.resource_type.clone(),
            attributes: encode_attributes(&attributes),
        };
        self.check_identity(kind, id, &object, Some(identifier))?;
        self.check_references(kind, id, &object)?;

        log::debug!("sandbox: updated {} ({})", id, identifier);
        self.objects.insert(identifier.to_string(), object);
        Ok(attributes)
    }

    pub fn delete(&mut self, id: &ResourceId, identifier: &str) -> ProviderResult<()> {
        let object = self
            .objects
            .get(identifier)
            .filter(|o| o.resource_type == id.resource_type)
            .ok_or_else(|| not_found(id, identifier))?;

        let handles = object.handles();
        let mut users: Vec<&str> = self
            .objects
            .iter()
            .filter(|(other, _)| other.as_str() != identifier)
            .filter(|(_, o)| {
                crate::schemas::kind(&o.resource_type).is_some_and(|k| {
                    k.references
                        .iter()
                        .any(|attr| o.strings_in(attr).iter().any(|s| handles.contains(s)))
                })
            })
            .map(|(other, _)| other.as_str())
            .collect();
        if !users.is_empty() {
            users.sort();
            return Err(ProviderError::new(format!(
                "DependencyViolation: {} is still used by {}",
                identifier,
                users.join(", ")
            ))
            .for_resource(id.clone()));
        }

        log::debug!("sandbox: deleted {} ({})", id, identifier);
        self.objects.remove(identifier);
        Ok(())
    }

    fn check_identity(
        &self,
        kind: &Kind,
        id: &ResourceId,
        object: &CloudObject,
        except: Option<&str>,
    ) -> ProviderResult<()> {
        if kind.identity.is_empty() {
            return Ok(());
        }
        let key = |o: &CloudObject| -> Vec<Option<serde_json::Value>> {
            kind.identity
                .iter()
                .map(|a| o.attributes.get(*a).cloned())
                .collect()
        };
        let wanted = key(object);

        let clash = self.objects.iter().find(|(identifier, other)| {
            Some(identifier.as_str()) != except
                && other.resource_type == object.resource_type
                && key(other) == wanted
        });
        match clash {
            Some((existing, _)) => Err(ProviderError::new(format!(
                "Conflict: a {} with the same {} already exists ({})",
                id.resource_type,
                kind.identity.join(" and "),
                existing
            ))
            .for_resource(id.clone())),
            None => Ok(()),
        }
    }

    fn check_references(&self, kind: &Kind, id: &ResourceId, object: &CloudObject) -> ProviderResult<()> {
        for attr in kind.references {
            for target in object.strings_in(attr) {
                let exists = self.objects.values().any(|o| o.handles().contains(&target));
                if !exists {
                    return Err(ProviderError::new(format!(
                        "InvalidReference: {} '{}' does not exist",
                        attr, target
                    ))
                    .for_resource(id.clone()));
                }
            }
        }
        Ok(())
    }
}

/// Checks that need resolved values, which the planner could not run
fn check_inputs(schema: &ResourceSchema, id: &ResourceId, attributes: &Attributes) -> ProviderResult<()> {
    if let Err(errors) = schema.validate(attributes) {
        let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
        return Err(
            ProviderError::new(format!("InvalidParameter: {}", messages.join("; ")))
                .for_resource(id.clone()),
        );
    }

    if schema.resource_type == "sandbox.task_definition" {
        let cpu = attributes.get("cpu").and_then(Value::as_str).unwrap_or_default();
        let memory = attributes.get("memory").and_then(Value::as_str).unwrap_or_default();
        if !task_size_is_valid(cpu, memory) {
            return Err(ProviderError::new(format!(
                "InvalidParameter: memory {} is not supported with cpu {}",
                memory, cpu
            ))
            .for_resource(id.clone()));
        }
    }
    Ok(())
}

fn not_found(id: &ResourceId, identifier: &str) -> ProviderError {
    ProviderError::not_found(format!("{} does not exist", identifier)).for_resource(id.clone())
}

fn arn(kind: &Kind, account: &Account, label: &str) -> String {
    // IAM is global
    let region = if kind.arn_service == "iam" {
        ""
    } else {
        account.region.as_str()
    };
    format!(
        "arn:sandbox:{}:{}:{}:{}/{}",
        kind.arn_service, region, account.account_id, kind.arn_resource, label
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::{all_schemas, kind};
    use std::collections::HashMap;

    struct Fixture {
        cloud: Cloud,
        schemas: HashMap<String, ResourceSchema>,
        account: Account,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                cloud: Cloud::default(),
                schemas: all_schemas()
                    .into_iter()
                    .map(|s| (s.resource_type.clone(), s))
                    .collect(),
                account: Account {
                    region: "sbx-east-1".to_string(),
                    account_id: "123456789012".to_string(),
                },
            }
        }

        fn create(&mut self, resource_type: &str, name: &str, attrs: &[(&str, Value)]) -> ProviderResult<Created> {
            let inputs: Attributes = attrs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
            self.cloud.create(
                kind(resource_type).unwrap(),
                &self.schemas[resource_type],
                &self.account,
                &ResourceId::new(resource_type, name),
                &inputs,
            )
        }

        fn delete(&mut self, resource_type: &str, identifier: &str) -> ProviderResult<()> {
            self.cloud
                .delete(&ResourceId::new(resource_type, "x"), identifier)
        }

        fn vpc(&mut self) -> String {
            self.create("sandbox.vpc", "vpc", &[("cidr_block", Value::string("10.0.0.0/16"))])
                .unwrap()
                .identifier
        }
    }

    fn s(v: &str) -> Value {
        Value::string(v)
    }

    #[test]
    fn create_generates_ids_arns_and_defaults() {
        let mut f = Fixture::new();
        let created = f
            .create("sandbox.vpc", "main", &[("cidr_block", s("10.0.0.0/16"))])
            .unwrap();

        assert!(created.identifier.starts_with("vpc-"));
        assert_eq!(created.identifier.len(), "vpc-".len() + 17);
        assert_eq!(created.outputs["id"], s(&created.identifier));
        assert_eq!(created.outputs["enable_dns"], Value::Bool(true));
        assert_eq!(
            created.outputs["arn"],
            s(&format!(
                "arn:sandbox:ec2:sbx-east-1:123456789012:vpc/{}",
                created.identifier
            ))
        );
    }

    #[test]
    fn unique_names_conflict_permanently() {
        let mut f = Fixture::new();
        let vpc = f.vpc();
        let group = [("name", s("web-secgrp")), ("vpc_id", s(&vpc))];
        f.create("sandbox.security_group", "a", &group).unwrap();

        let err = f.create("sandbox.security_group", "b", &group).unwrap_err();
        assert!(err.message.starts_with("Conflict"));
        assert_eq!(err.kind, strata_core::provider::ErrorKind::Permanent);

        // Same name in another VPC is fine
        let other = f.vpc();
        f.create(
            "sandbox.security_group",
            "c",
            &[("name", s("web-secgrp")), ("vpc_id", s(&other))],
        )
        .unwrap();
    }

    #[test]
    fn references_must_exist_and_block_deletion() {
        let mut f = Fixture::new();
        let err = f
            .create(
                "sandbox.subnet",
                "subnet",
                &[("vpc_id", s("vpc-missing")), ("cidr_block", s("10.0.1.0/24"))],
            )
            .unwrap_err();
        assert!(err.message.starts_with("InvalidReference"));

        let vpc = f.vpc();
        let subnet = f
            .create(
                "sandbox.subnet",
                "subnet",
                &[("vpc_id", s(&vpc)), ("cidr_block", s("10.0.1.0/24"))],
            )
            .unwrap()
            .identifier;

        let err = f.delete("sandbox.vpc", &vpc).unwrap_err();
        assert!(err.message.contains(&subnet));
        f.delete("sandbox.subnet", &subnet).unwrap();
        f.delete("sandbox.vpc", &vpc).unwrap();
        assert!(f.cloud.is_empty());
        assert!(f.delete("sandbox.vpc", &vpc).unwrap_err().is_not_found());
    }

    #[test]
    fn role_attachments_point_at_role_names() {
        let mut f = Fixture::new();
        let role = f
            .create(
                "sandbox.iam_role",
                "role",
                &[("name", s("task-init")), ("assume_role_service", s("ecs-tasks.sandbox.local"))],
            )
            .unwrap();
        assert_eq!(
            role.outputs["arn"],
            s("arn:sandbox:iam::123456789012:role/task-init")
        );
        f.create(
            "sandbox.role_policy_attachment",
            "rpa",
            &[
                ("role", s("task-init")),
                ("policy_arn", s("arn:aws:iam::aws:policy/service-role/AmazonECSTaskExecutionRolePolicy")),
            ],
        )
        .unwrap();
        assert!(f.delete("sandbox.iam_role", &role.identifier).is_err());
    }

    #[test]
    fn task_definitions_get_revisions() {
        let mut f = Fixture::new();
        let attrs = [
            ("family", s("app-task")),
            ("cpu", s("256")),
            ("memory", s("512")),
            ("image", s("nginx")),
        ];
        let first = f.create("sandbox.task_definition", "td", &attrs).unwrap();
        let second = f.create("sandbox.task_definition", "td", &attrs).unwrap();
        assert_eq!(first.outputs["revision"], Value::Int(1));
        assert_eq!(second.outputs["revision"], Value::Int(2));
        assert!(second.outputs["arn"].as_str().unwrap().ends_with("task-definition/app-task:2"));

        let bad = [
            ("family", s("app-task")),
            ("cpu", s("256")),
            ("memory", s("8192")),
            ("image", s("nginx")),
        ];
        assert!(f.create("sandbox.task_definition", "td", &bad).is_err());
    }

    #[test]
    fn resolved_values_are_validated() {
        let mut f = Fixture::new();
        let err = f
            .create("sandbox.vpc", "vpc", &[("cidr_block", s("10.0.0.0/33"))])
            .unwrap_err();
        assert!(err.message.starts_with("InvalidParameter"));
    }

    #[test]
    fn update_keeps_computed_attributes_and_rejects_replacing_changes() {
        let mut f = Fixture::new();
        let created = f
            .create("sandbox.vpc", "vpc", &[("cidr_block", s("10.0.0.0/16"))])
            .unwrap();
        let id = ResourceId::new("sandbox.vpc", "vpc");
        let schema = f.schemas["sandbox.vpc"].clone();
        let kind = kind("sandbox.vpc").unwrap();

        let old: Attributes = [("cidr_block".to_string(), s("10.0.0.0/16"))].into();
        let mut new = old.clone();
        new.insert("enable_dns".to_string(), Value::Bool(false));
        let updated = f
            .cloud
            .update(kind, &schema, &id, &created.identifier, &AttributeDiff::new(old.clone(), new))
            .unwrap();
        assert_eq!(updated["enable_dns"], Value::Bool(false));
        assert_eq!(updated["arn"], created.outputs["arn"]);

        let replace: Attributes = [("cidr_block".to_string(), s("10.1.0.0/16"))].into();
        assert!(f
            .cloud
            .update(kind, &schema, &id, &created.identifier, &AttributeDiff::new(old, replace))
            .is_err());
    }

    #[test]
    fn read_checks_type() {
        let mut f = Fixture::new();
        let vpc = f.vpc();
        assert!(f.cloud.read(&ResourceId::new("sandbox.vpc", "vpc"), &vpc).is_some());
        assert!(f.cloud.read(&ResourceId::new("sandbox.subnet", "vpc"), &vpc).is_none());
    }
}
