//! Differ - Compare declared resources with recorded state to generate a Plan
//!
//! Nodes are visited in topological order so every resource sees the
//! decisions already made for its producers. A reference to a producer that
//! will be created or replaced cannot be known before apply and always
//! counts as a change.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::ConfigError;
use crate::graph::{DependencyGraph, ResourceNode};
use crate::plan::{Action, AttributeChange, Plan, PlanEntry, PlannedValue, ReplaceOrder};
use crate::resource::{ResourceId, StateRecord, Value};
use crate::schema::{Capabilities, UpdateBehavior};

/// Compute the plan that moves `records` to the declared resources in `graph`
pub fn create_plan(
    graph: &DependencyGraph,
    records: &BTreeMap<String, StateRecord>,
    capabilities: &dyn Capabilities,
) -> Result<Plan, ConfigError> {
    // name -> replaced producer, for escalations found only after a resource was visited
    let mut forced: HashMap<String, String> = HashMap::new();
    loop {
        let mut pass = DiffPass::new(records, capabilities, &forced);
        for node in graph.topological_order() {
            pass.visit(node)?;
        }

        let late = pass.late_escalations();
        if late.is_empty() {
            return pass.into_plan(graph);
        }
        log::debug!("Re-planning with late escalations: {:?}", late);
        forced.extend(late);
    }
}

/// Plan that destroys every recorded object
pub fn create_destroy_plan(records: &BTreeMap<String, StateRecord>) -> Result<Plan, ConfigError> {
    let mut plan = Plan::new();
    let names: Vec<&str> = records
        .iter()
        .filter(|(_, record)| record.is_live())
        .map(|(name, _)| name.as_str())
        .collect();
    for name in deletion_order(&names, records) {
        plan.add(delete_entry(&name, &records[&name])?);
    }
    add_deposed_deletes(&mut plan, records);
    Ok(plan)
}

struct DiffPass<'a> {
    records: &'a BTreeMap<String, StateRecord>,
    capabilities: &'a dyn Capabilities,
    forced: &'a HashMap<String, String>,
    decisions: HashMap<String, Action>,
    /// Planned inputs of every visited resource
    planned: HashMap<String, BTreeMap<String, PlannedValue>>,
    entries: Vec<PlanEntry>,
}

/// A reference that cannot be resolved before apply
struct Unknown;

impl<'a> DiffPass<'a> {
    fn new(
        records: &'a BTreeMap<String, StateRecord>,
        capabilities: &'a dyn Capabilities,
        forced: &'a HashMap<String, String>,
    ) -> Self {
        Self {
            records,
            capabilities,
            forced,
            decisions: HashMap::new(),
            planned: HashMap::new(),
            entries: Vec::new(),
        }
    }

    fn visit(&mut self, node: &ResourceNode) -> Result<(), ConfigError> {
        let spec = &node.spec;
        let name = spec.name();
        let capabilities = self.capabilities;
        let schema = capabilities
            .schema(&spec.id.resource_type)
            .ok_or_else(|| ConfigError::UnknownResourceType(spec.id.resource_type.clone()))?;

        let planned: BTreeMap<String, PlannedValue> = spec
            .attributes
            .iter()
            .map(|(k, v)| (k.clone(), self.plan_value(v)))
            .collect();

        let mut entry = PlanEntry::new(spec.id.clone(), Action::Create);
        entry.depends_on = node.dependencies.clone();
        let mut effective = spec.clone();

        match self.records.get(name).filter(|r| r.is_live()) {
            None => {
                entry.changes = planned
                    .iter()
                    .map(|(k, v)| AttributeChange {
                        name: k.clone(),
                        old: None,
                        new: v.clone(),
                        forces_replacement: false,
                    })
                    .collect();
            }
            Some(record) => {
                let ignored = &spec.lifecycle.ignore_changes;
                let old_inputs = record.input_values();

                for (attr, new) in &planned {
                    if ignored.contains(attr) {
                        if let Some(old) = old_inputs.get(attr) {
                            effective.attributes.insert(attr.clone(), old.clone());
                        }
                        continue;
                    }
                    let old = old_inputs.get(attr);
                    let changed = match new {
                        PlannedValue::Known(v) => old != Some(v),
                        PlannedValue::Unknown => true,
                        PlannedValue::Removed => old.is_some(),
                    };
                    if changed {
                        entry.changes.push(AttributeChange {
                            name: attr.clone(),
                            old: old.cloned(),
                            new: new.clone(),
                            forces_replacement: schema.update_behavior(attr)
                                == UpdateBehavior::Replace,
                        });
                    }
                }
                for (attr, old) in &old_inputs {
                    if planned.contains_key(attr) || ignored.contains(attr) {
                        continue;
                    }
                    entry.changes.push(AttributeChange {
                        name: attr.clone(),
                        old: Some(old.clone()),
                        new: PlannedValue::Removed,
                        forces_replacement: schema.update_behavior(attr) == UpdateBehavior::Replace,
                    });
                }
                entry.changes.sort_by(|a, b| a.name.cmp(&b.name));

                entry.replace_triggers = entry
                    .changes
                    .iter()
                    .filter(|c| c.forces_replacement)
                    .map(|c| c.name.clone())
                    .collect();
                if record.resource_type != spec.id.resource_type {
                    entry.replace_triggers.insert(0, "resource_type".to_string());
                }

                entry.replaced_dependency = record
                    .dependencies
                    .iter()
                    .find(|d| self.is_destroyed_first(d))
                    .cloned()
                    .or_else(|| self.forced.get(name).cloned());

                entry.action = if entry.replaced_dependency.is_some() {
                    Action::Replace {
                        order: ReplaceOrder::DestroyBeforeCreate,
                    }
                } else if !entry.replace_triggers.is_empty() {
                    // A retyped object must be deleted through its old type before the new one exists
                    let type_changed = record.resource_type != spec.id.resource_type;
                    Action::Replace {
                        order: if schema.unique_identity || type_changed {
                            ReplaceOrder::DestroyBeforeCreate
                        } else {
                            ReplaceOrder::CreateBeforeDestroy
                        },
                    }
                } else if !entry.changes.is_empty() {
                    Action::Update
                } else {
                    Action::NoOp
                };

                if entry.action.destroys() && (record.protected || spec.lifecycle.prevent_destroy)
                {
                    return Err(ConfigError::PreventDestroy(name.to_string()));
                }
                entry.prior = Some(record.clone());
            }
        }

        log::debug!("{}: {}", spec.id, entry.action);
        self.decisions.insert(name.to_string(), entry.action);
        self.planned.insert(name.to_string(), planned);
        entry.spec = Some(effective);
        self.entries.push(entry);
        Ok(())
    }

    fn is_destroyed_first(&self, name: &str) -> bool {
        matches!(
            self.decisions.get(name),
            Some(Action::Replace {
                order: ReplaceOrder::DestroyBeforeCreate
            })
        )
    }

    /// Resolve a declared value as far as possible before apply
    fn plan_value(&self, value: &Value) -> PlannedValue {
        match value.resolve_with(&mut |r| self.resolve_reference(&r.target, &r.attribute)) {
            Ok(v) => PlannedValue::Known(v),
            Err(Unknown) => PlannedValue::Unknown,
        }
    }

    fn resolve_reference(&self, target: &str, attribute: &str) -> Result<Value, Unknown> {
        let record = self.records.get(target);
        match self.decisions.get(target) {
            Some(Action::NoOp) => record.and_then(|r| r.attribute(attribute)).ok_or(Unknown),
            Some(Action::Update) => match self.planned.get(target).and_then(|p| p.get(attribute)) {
                Some(PlannedValue::Known(v)) => Ok(v.clone()),
                Some(_) => Err(Unknown),
                None => record
                    .and_then(|r| r.outputs.get(attribute))
                    .and_then(Value::from_json)
                    .ok_or(Unknown),
            },
            _ => Err(Unknown),
        }
    }

    /// Resources whose recorded producer turned out to be destroyed first after they were visited
    fn late_escalations(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .filter(|e| !self.forced.contains_key(e.name()))
            .filter(|e| {
                !matches!(
                    e.action,
                    Action::Create
                        | Action::Replace {
                            order: ReplaceOrder::DestroyBeforeCreate
                        }
                )
            })
            .filter_map(|e| {
                let record = e.prior.as_ref()?;
                let dep = record
                    .dependencies
                    .iter()
                    .find(|d| self.is_destroyed_first(d))?;
                Some((e.name().to_string(), dep.clone()))
            })
            .collect()
    }

    fn into_plan(self, graph: &DependencyGraph) -> Result<Plan, ConfigError> {
        let mut plan = Plan::new();
        for entry in self.entries {
            plan.add(entry);
        }

        let removed: Vec<&str> = self
            .records
            .iter()
            .filter(|(name, record)| record.is_live() && !graph.contains(name))
            .map(|(name, _)| name.as_str())
            .collect();
        for name in deletion_order(&removed, self.records) {
            plan.add(delete_entry(&name, &self.records[&name])?);
        }

        add_deposed_deletes(&mut plan, self.records);
        Ok(plan)
    }
}

fn delete_entry(name: &str, record: &StateRecord) -> Result<PlanEntry, ConfigError> {
    if record.protected {
        return Err(ConfigError::PreventDestroy(name.to_string()));
    }
    let mut entry = PlanEntry::new(
        ResourceId::new(record.resource_type.clone(), name),
        Action::Delete,
    );
    entry.prior = Some(record.clone());
    Ok(entry)
}

/// Old objects left behind by an interrupted create-before-destroy replace
fn add_deposed_deletes(plan: &mut Plan, records: &BTreeMap<String, StateRecord>) {
    for (name, record) in records {
        for deposed in &record.deposed {
            let mut entry = PlanEntry::new(
                ResourceId::new(record.resource_type.clone(), name.clone()),
                Action::Delete,
            );
            entry.deposed = Some(deposed.identifier.clone());
            entry.prior = Some(record.clone());
            plan.add(entry);
        }
    }
}

/// Order `names` so that every resource comes before the resources it depended on
fn deletion_order(names: &[&str], records: &BTreeMap<String, StateRecord>) -> Vec<String> {
    let in_set: BTreeSet<&str> = names.iter().copied().collect();
    let mut blockers: BTreeMap<&str, usize> = in_set.iter().map(|n| (*n, 0)).collect();
    for name in &in_set {
        for dep in &records[*name].dependencies {
            if let Some(count) = blockers.get_mut(dep.as_str()) {
                *count += 1;
            }
        }
    }

    let mut ready: BTreeSet<&str> = blockers
        .iter()
        .filter(|&(_, c)| *c == 0)
        .map(|(n, _)| *n)
        .collect();
    let mut order = Vec::with_capacity(in_set.len());
    while let Some(name) = ready.pop_first() {
        order.push(name.to_string());
        for dep in &records[name].dependencies {
            if let Some(count) = blockers.get_mut(dep.as_str()) {
                *count -= 1;
                if *count == 0 {
                    ready.insert(dep.as_str());
                }
            }
        }
    }

    // Recorded dependencies form a cycle only if the state file was edited by hand
    if order.len() < in_set.len() {
        log::warn!("Recorded dependencies contain a cycle; deleting the rest in name order");
        for name in in_set {
            if !order.iter().any(|o| o == name) {
                order.push(name.to_string());
            }
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{DeposedObject, Lifecycle, ResourceSpec};
    use crate::schema::{AttributeSchema, AttributeType, ResourceSchema, types};

    fn capabilities() -> HashMap<String, ResourceSchema> {
        [
            ResourceSchema::new("sandbox.vpc")
                .attribute(
                    AttributeSchema::new("cidr_block", types::cidr())
                        .required()
                        .force_replace(),
                )
                .attribute(AttributeSchema::new(
                    "tags",
                    AttributeType::Map(Box::new(AttributeType::String)),
                ))
                .output("id"),
            ResourceSchema::new("sandbox.subnet")
                .attribute(
                    AttributeSchema::new("vpc_id", AttributeType::String)
                        .required()
                        .force_replace(),
                )
                .attribute(AttributeSchema::new("cidr_block", types::cidr()).force_replace())
                .attribute(AttributeSchema::new("description", AttributeType::String))
                .output("id"),
            ResourceSchema::new("sandbox.security_group")
                .attribute(
                    AttributeSchema::new("name", AttributeType::String)
                        .required()
                        .force_replace(),
                )
                .attribute(AttributeSchema::new("vpc_id", AttributeType::String).force_replace())
                .attribute(AttributeSchema::new("description", AttributeType::String))
                .output("id")
                .with_unique_identity(),
        ]
        .into_iter()
        .map(|s| (s.resource_type.clone(), s))
        .collect()
    }

    fn vpc(cidr: &str) -> ResourceSpec {
        ResourceSpec::new("sandbox.vpc", "vpc").with_attribute("cidr_block", Value::string(cidr))
    }

    fn subnet() -> ResourceSpec {
        ResourceSpec::new("sandbox.subnet", "subnet")
            .with_attribute("vpc_id", Value::reference("vpc", "id"))
            .with_attribute("cidr_block", Value::string("10.0.1.0/24"))
    }

    fn vpc_record(cidr: &str) -> StateRecord {
        StateRecord::new("sandbox.vpc", "vpc-1")
            .with_input("cidr_block", Value::string(cidr))
            .with_output("id", Value::string("vpc-1"))
    }

    fn subnet_record() -> StateRecord {
        StateRecord::new("sandbox.subnet", "subnet-1")
            .with_input("vpc_id", Value::string("vpc-1"))
            .with_input("cidr_block", Value::string("10.0.1.0/24"))
            .with_output("id", Value::string("subnet-1"))
            .with_dependency("vpc")
    }

    fn plan(resources: Vec<ResourceSpec>, records: &BTreeMap<String, StateRecord>) -> Plan {
        let graph = DependencyGraph::build(resources).unwrap();
        create_plan(&graph, records, &capabilities()).unwrap()
    }

    fn action(plan: &Plan, name: &str) -> Action {
        plan.get(name).unwrap().action
    }

    #[test]
    fn empty_state_creates_everything() {
        let plan = plan(vec![subnet(), vpc("10.0.0.0/16")], &BTreeMap::new());
        let names: Vec<_> = plan.entries().iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["vpc", "subnet"]);
        assert_eq!(action(&plan, "vpc"), Action::Create);

        let change = &plan.get("subnet").unwrap().changes;
        let vpc_id = change.iter().find(|c| c.name == "vpc_id").unwrap();
        assert_eq!(vpc_id.new, PlannedValue::Unknown);
    }

    #[test]
    fn unchanged_resources_are_noop() {
        let records = BTreeMap::from([
            ("vpc".to_string(), vpc_record("10.0.0.0/16")),
            ("subnet".to_string(), subnet_record()),
        ]);
        let plan = plan(vec![vpc("10.0.0.0/16"), subnet()], &records);
        assert!(!plan.has_changes());
        assert_eq!(plan.summary().noop, 2);
    }

    #[test]
    fn in_place_change_is_update() {
        let records = BTreeMap::from([("vpc".to_string(), vpc_record("10.0.0.0/16"))]);
        let spec = vpc("10.0.0.0/16").with_attribute(
            "tags",
            Value::Map([("env".to_string(), Value::string("prod"))].into()),
        );
        let plan = plan(vec![spec], &records);
        let entry = plan.get("vpc").unwrap();
        assert_eq!(entry.action, Action::Update);
        assert_eq!(entry.changes.len(), 1);
        assert_eq!(entry.changes[0].name, "tags");
        assert_eq!(entry.changes[0].old, None);
    }

    #[test]
    fn replace_propagates_unknown_to_consumers() {
        let records = BTreeMap::from([
            ("vpc".to_string(), vpc_record("10.0.0.0/16")),
            ("subnet".to_string(), subnet_record()),
        ]);
        let plan = plan(vec![vpc("10.1.0.0/16"), subnet()], &records);

        assert_eq!(
            action(&plan, "vpc"),
            Action::Replace {
                order: ReplaceOrder::CreateBeforeDestroy
            }
        );
        let subnet = plan.get("subnet").unwrap();
        assert_eq!(
            subnet.action,
            Action::Replace {
                order: ReplaceOrder::CreateBeforeDestroy
            }
        );
        assert_eq!(subnet.replace_triggers, vec!["vpc_id".to_string()]);
    }

    #[test]
    fn reference_to_updated_input_uses_new_value() {
        let records = BTreeMap::from([
            (
                "vpc".to_string(),
                vpc_record("10.0.0.0/16").with_input("tags", Value::Map(BTreeMap::new())),
            ),
            (
                "subnet".to_string(),
                subnet_record().with_input("description", Value::Map(BTreeMap::new())),
            ),
        ]);
        let tags = Value::Map([("env".to_string(), Value::string("prod"))].into());
        let resources = vec![
            vpc("10.0.0.0/16").with_attribute("tags", tags.clone()),
            subnet().with_attribute("description", Value::reference("vpc", "tags")),
        ];
        let plan = plan(resources, &records);

        let entry = plan.get("subnet").unwrap();
        assert_eq!(entry.action, Action::Update);
        assert_eq!(entry.changes[0].new, PlannedValue::Known(tags));
    }

    #[test]
    fn removed_attribute_is_a_change() {
        let records = BTreeMap::from([(
            "vpc".to_string(),
            vpc_record("10.0.0.0/16").with_input("tags", Value::Map(BTreeMap::new())),
        )]);
        let plan = plan(vec![vpc("10.0.0.0/16")], &records);
        let entry = plan.get("vpc").unwrap();
        assert_eq!(entry.action, Action::Update);
        assert_eq!(entry.changes[0].new, PlannedValue::Removed);
    }

    #[test]
    fn ignore_changes_excludes_attribute() {
        let records = BTreeMap::from([(
            "vpc".to_string(),
            vpc_record("10.0.0.0/16")
                .with_input("tags", Value::Map([("a".to_string(), Value::string("1"))].into())),
        )]);
        let spec = vpc("10.0.0.0/16")
            .with_attribute("tags", Value::Map(BTreeMap::new()))
            .with_lifecycle(Lifecycle {
                prevent_destroy: false,
                ignore_changes: vec!["tags".to_string()],
            });
        let plan = plan(vec![spec], &records);
        let entry = plan.get("vpc").unwrap();
        assert_eq!(entry.action, Action::NoOp);
        // The recorded value is carried forward
        assert_eq!(
            entry.spec.as_ref().unwrap().attributes["tags"],
            Value::Map([("a".to_string(), Value::string("1"))].into())
        );
    }

    #[test]
    fn resource_type_change_forces_replace() {
        let records = BTreeMap::from([(
            "vpc".to_string(),
            StateRecord::new("sandbox.subnet", "subnet-9")
                .with_input("cidr_block", Value::string("10.0.0.0/16")),
        )]);
        let plan = plan(vec![vpc("10.0.0.0/16")], &records);
        let entry = plan.get("vpc").unwrap();
        assert_eq!(
            entry.action,
            Action::Replace {
                order: ReplaceOrder::DestroyBeforeCreate
            }
        );
        assert_eq!(entry.replace_triggers, vec!["resource_type".to_string()]);
    }

    #[test]
    fn unique_identity_is_destroyed_before_create_and_dependents_escalate() {
        let sg_record = StateRecord::new("sandbox.security_group", "sg-1")
            .with_input("name", Value::string("web"))
            .with_output("id", Value::string("sg-1"));
        // Only ordered after the group, so no attribute of it changes
        let dependent_record = StateRecord::new("sandbox.vpc", "vpc-1")
            .with_input("cidr_block", Value::string("10.0.0.0/16"))
            .with_dependency("sg");
        let records = BTreeMap::from([
            ("sg".to_string(), sg_record),
            ("vpc".to_string(), dependent_record),
        ]);

        let resources = vec![
            ResourceSpec::new("sandbox.security_group", "sg")
                .with_attribute("name", Value::string("web-v2")),
            vpc("10.0.0.0/16").with_depends_on("sg"),
        ];
        let plan = plan(resources, &records);

        let dbc = Action::Replace {
            order: ReplaceOrder::DestroyBeforeCreate,
        };
        assert_eq!(action(&plan, "sg"), dbc);
        let vpc = plan.get("vpc").unwrap();
        assert_eq!(vpc.action, dbc);
        assert_eq!(vpc.replaced_dependency.as_deref(), Some("sg"));
    }

    #[test]
    fn escalation_through_recorded_dependency_only() {
        // The subnet no longer references the group but was applied against it;
        // it is visited before the group because no declared edge orders them
        let sg_record = StateRecord::new("sandbox.security_group", "sg-1")
            .with_input("name", Value::string("web"))
            .with_output("id", Value::string("sg-1"));
        let records = BTreeMap::from([
            ("sg".to_string(), sg_record),
            ("subnet".to_string(), subnet_record().with_dependency("sg")),
            ("vpc".to_string(), vpc_record("10.0.0.0/16")),
        ]);
        let resources = vec![
            vpc("10.0.0.0/16"),
            subnet(),
            ResourceSpec::new("sandbox.security_group", "sg")
                .with_attribute("name", Value::string("web-v2")),
        ];
        let plan = plan(resources, &records);
        let subnet = plan.get("subnet").unwrap();
        assert_eq!(
            subnet.action,
            Action::Replace {
                order: ReplaceOrder::DestroyBeforeCreate
            }
        );
        assert_eq!(subnet.replaced_dependency.as_deref(), Some("sg"));
    }

    #[test]
    fn removed_resources_are_deleted_dependents_first() {
        let records = BTreeMap::from([
            ("vpc".to_string(), vpc_record("10.0.0.0/16")),
            ("subnet".to_string(), subnet_record()),
        ]);
        let plan = plan(vec![], &records);
        let names: Vec<_> = plan.entries().iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["subnet", "vpc"]);
        assert!(plan.entries().iter().all(|e| e.action == Action::Delete));
    }

    #[test]
    fn prevent_destroy_blocks_delete_and_replace() {
        let mut record = vpc_record("10.0.0.0/16");
        record.protected = true;
        let records = BTreeMap::from([("vpc".to_string(), record)]);
        let capabilities = capabilities();

        let graph = DependencyGraph::build(vec![]).unwrap();
        assert!(matches!(
            create_plan(&graph, &records, &capabilities),
            Err(ConfigError::PreventDestroy(name)) if name == "vpc"
        ));

        let graph = DependencyGraph::build(vec![vpc("10.9.0.0/16")]).unwrap();
        assert!(matches!(
            create_plan(&graph, &records, &capabilities),
            Err(ConfigError::PreventDestroy(_))
        ));

        // In-place changes are still allowed
        let graph = DependencyGraph::build(vec![vpc("10.0.0.0/16").with_attribute(
            "tags",
            Value::Map(BTreeMap::new()),
        )])
        .unwrap();
        assert!(create_plan(&graph, &records, &capabilities).is_ok());
    }

    #[test]
    fn deposed_objects_are_deleted() {
        let mut record = vpc_record("10.0.0.0/16");
        record.deposed.push(DeposedObject {
            identifier: "vpc-0".to_string(),
            outputs: BTreeMap::new(),
        });
        let records = BTreeMap::from([("vpc".to_string(), record)]);
        let plan = plan(vec![vpc("10.0.0.0/16")], &records);

        assert_eq!(action(&plan, "vpc"), Action::NoOp);
        let deposed = plan
            .entries()
            .iter()
            .find(|e| e.deposed.is_some())
            .unwrap();
        assert_eq!(deposed.action, Action::Delete);
        assert_eq!(deposed.deposed.as_deref(), Some("vpc-0"));
        assert!(plan.has_changes());
    }

    fn vanished_record_with_deposed() -> StateRecord {
        let mut record = vpc_record("10.0.0.0/16");
        record.vanished = true;
        record.deposed.push(DeposedObject {
            identifier: "vpc-0".to_string(),
            outputs: BTreeMap::new(),
        });
        record
    }

    #[test]
    fn vanished_object_is_recreated_and_its_deposed_copy_deleted() {
        let records = BTreeMap::from([("vpc".to_string(), vanished_record_with_deposed())]);
        let recreate = plan(vec![vpc("10.0.0.0/16")], &records);

        let entries: Vec<_> = recreate
            .entries()
            .iter()
            .map(|e| (e.action, e.deposed.as_deref()))
            .collect();
        assert_eq!(
            entries,
            vec![(Action::Create, None), (Action::Delete, Some("vpc-0"))]
        );
        assert!(recreate.get("vpc").unwrap().prior.is_none());

        // Dropped from the configuration, only the deposed copy is left to delete
        let removed = plan(vec![], &records);
        assert_eq!(removed.mutation_count(), 1);
        assert_eq!(removed.entries()[0].deposed.as_deref(), Some("vpc-0"));

        let destroy = create_destroy_plan(&records).unwrap();
        assert_eq!(destroy.mutation_count(), 1);
        assert_eq!(destroy.entries()[0].deposed.as_deref(), Some("vpc-0"));
    }

    #[test]
    fn destroy_plan_orders_dependents_first() {
        let records = BTreeMap::from([
            ("vpc".to_string(), vpc_record("10.0.0.0/16")),
            ("subnet".to_string(), subnet_record()),
        ]);
        let plan = create_destroy_plan(&records).unwrap();
        let names: Vec<_> = plan.entries().iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["subnet", "vpc"]);
    }
}
