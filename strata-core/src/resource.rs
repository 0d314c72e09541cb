//! Resource - Representing declared resources and their recorded state

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Attribute map, ordered so plans and snapshots are deterministic
pub type Attributes = BTreeMap<String, Value>;

/// Unique identifier for a resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId {
    /// Resource type (e.g., "sandbox.vpc", "sandbox.ecs_service")
    pub resource_type: String,
    /// Logical name (the binding name in the configuration)
    pub name: String,
}

impl ResourceId {
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
        }
    }

    /// Provider prefix of the resource type (`sandbox` for `sandbox.vpc`)
    pub fn provider(&self) -> &str {
        self.resource_type
            .split_once('.')
            .map_or(self.resource_type.as_str(), |(provider, _)| provider)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource_type, self.name)
    }
}

/// Reference to another resource's attribute, unresolved until its producer has run
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Reference {
    /// Logical name of the producing resource
    pub target: String,
    /// Attribute of the producer (input or provider-assigned output)
    pub attribute: String,
}

impl Reference {
    pub fn new(target: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            attribute: attribute.into(),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.target, self.attribute)
    }
}

/// Attribute value of a resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    String(String),
    Int(i64),
    Bool(bool),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    /// Reference to another resource's attribute
    Ref(Reference),
}

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    pub fn reference(target: impl Into<String>, attribute: impl Into<String>) -> Self {
        Value::Ref(Reference::new(target, attribute))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Collect every reference contained in this value, depth first
    pub fn references(&self) -> Vec<&Reference> {
        let mut refs = Vec::new();
        self.collect_references(&mut refs);
        refs
    }

    fn collect_references<'a>(&'a self, refs: &mut Vec<&'a Reference>) {
        match self {
            Value::Ref(r) => refs.push(r),
            Value::List(items) => items.iter().for_each(|v| v.collect_references(refs)),
            Value::Map(map) => map.values().for_each(|v| v.collect_references(refs)),
            Value::String(_) | Value::Int(_) | Value::Bool(_) => {}
        }
    }

    /// Returns true if no reference remains anywhere in this value
    pub fn is_resolved(&self) -> bool {
        self.references().is_empty()
    }

    /// Replace every reference using `resolve`; fails on the first reference it cannot resolve
    pub fn resolve_with<E>(
        &self,
        resolve: &mut impl FnMut(&Reference) -> Result<Value, E>,
    ) -> Result<Value, E> {
        match self {
            Value::Ref(r) => resolve(r),
            Value::List(items) => items
                .iter()
                .map(|v| v.resolve_with(&mut *resolve))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            Value::Map(map) => map
                .iter()
                .map(|(k, v)| v.resolve_with(&mut *resolve).map(|v| (k.clone(), v)))
                .collect::<Result<BTreeMap<_, _>, _>>()
                .map(Value::Map),
            other => Ok(other.clone()),
        }
    }

    /// Convert to JSON for persistence. References are kept in `${target.attribute}` form.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Int(n) => serde_json::Value::Number((*n).into()),
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::List(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            Value::Ref(r) => serde_json::Value::String(format!("${{{}}}", r)),
        }
    }

    /// Convert a persisted JSON value back. Returns None for JSON null.
    pub fn from_json(json: &serde_json::Value) -> Option<Self> {
        match json {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(Value::String(s.clone())),
            serde_json::Value::Number(n) => Some(
                n.as_i64()
                    .map(Value::Int)
                    .unwrap_or_else(|| Value::String(n.to_string())),
            ),
            serde_json::Value::Bool(b) => Some(Value::Bool(*b)),
            serde_json::Value::Array(items) => {
                Some(Value::List(items.iter().filter_map(Value::from_json).collect()))
            }
            serde_json::Value::Object(map) => Some(Value::Map(
                map.iter()
                    .filter_map(|(k, v)| Value::from_json(v).map(|v| (k.clone(), v)))
                    .collect(),
            )),
        }
    }

    pub(crate) fn type_name(&self) -> String {
        match self {
            Value::String(_) => "String".to_string(),
            Value::Int(_) => "Int".to_string(),
            Value::Bool(_) => "Bool".to_string(),
            Value::List(_) => "List".to_string(),
            Value::Map(_) => "Map".to_string(),
            Value::Ref(r) => format!("Ref({})", r),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "\"{}\"", s),
            Value::Int(n) => write!(f, "{}", n),
            Value::Bool(b) => write!(f, "{}", b),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Map(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} = {}", k, v)?;
                }
                write!(f, "}}")
            }
            Value::Ref(r) => write!(f, "{}", r),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// Lifecycle settings declared alongside a resource
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Lifecycle {
    /// Refuse any plan that deletes or replaces this resource
    pub prevent_destroy: bool,
    /// Attributes whose drift is ignored when diffing
    pub ignore_changes: Vec<String>,
}

/// Desired state of one managed resource, as declared in configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSpec {
    pub id: ResourceId,
    pub attributes: Attributes,
    /// Explicit ordering dependencies beyond attribute references
    pub depends_on: Vec<String>,
    pub lifecycle: Lifecycle,
}

impl ResourceSpec {
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: ResourceId::new(resource_type, name),
            attributes: Attributes::new(),
            depends_on: Vec::new(),
            lifecycle: Lifecycle::default(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn with_depends_on(mut self, target: impl Into<String>) -> Self {
        self.depends_on.push(target.into());
        self
    }

    pub fn with_lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    pub fn name(&self) -> &str {
        &self.id.name
    }

    /// Every reference made by the attributes, in attribute order
    pub fn references(&self) -> Vec<&Reference> {
        self.attributes.values().flat_map(Value::references).collect()
    }
}

/// An old object kept alive by a create-before-destroy replacement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeposedObject {
    pub identifier: String,
    #[serde(default)]
    pub outputs: BTreeMap<String, serde_json::Value>,
}

/// Last known real-world state of a managed resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    pub resource_type: String,
    /// Provider-assigned identifier (e.g., vpc-1a2b3c)
    pub identifier: String,
    /// Attributes assigned by the provider
    #[serde(default)]
    pub outputs: BTreeMap<String, serde_json::Value>,
    /// Inputs as last applied, with references resolved
    #[serde(default)]
    pub inputs: BTreeMap<String, serde_json::Value>,
    /// Logical names this resource depended on when applied
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Set from `lifecycle.prevent_destroy`
    #[serde(default)]
    pub protected: bool,
    /// Old copies still to be deleted
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deposed: Vec<DeposedObject>,
    /// The object itself no longer exists; the record is kept only for `deposed`
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub vanished: bool,
}

impl StateRecord {
    pub fn new(resource_type: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            identifier: identifier.into(),
            outputs: BTreeMap::new(),
            inputs: BTreeMap::new(),
            dependencies: Vec::new(),
            protected: false,
            deposed: Vec::new(),
            vanished: false,
        }
    }

    pub fn with_input(mut self, key: impl Into<String>, value: Value) -> Self {
        self.inputs.insert(key.into(), value.to_json());
        self
    }

    pub fn with_output(mut self, key: impl Into<String>, value: Value) -> Self {
        self.outputs.insert(key.into(), value.to_json());
        self
    }

    pub fn with_dependency(mut self, name: impl Into<String>) -> Self {
        self.dependencies.push(name.into());
        self
    }

    /// Whether the recorded object itself still exists
    pub fn is_live(&self) -> bool {
        !self.vanished
    }

    /// Look up an attribute as a downstream reference would see it: outputs win over inputs
    pub fn attribute(&self, name: &str) -> Option<Value> {
        self.outputs
            .get(name)
            .or_else(|| self.inputs.get(name))
            .and_then(Value::from_json)
    }

    /// Last-applied inputs decoded back to values
    pub fn input_values(&self) -> Attributes {
        decode_attributes(&self.inputs)
    }

    /// Outputs decoded back to values
    pub fn output_values(&self) -> Attributes {
        decode_attributes(&self.outputs)
    }
}

/// Decode a persisted JSON attribute map, dropping nulls
pub fn decode_attributes(map: &BTreeMap<String, serde_json::Value>) -> Attributes {
    map.iter()
        .filter_map(|(k, v)| Value::from_json(v).map(|v| (k.clone(), v)))
        .collect()
}

/// Encode an attribute map for persistence
pub fn encode_attributes(attrs: &Attributes) -> BTreeMap<String, serde_json::Value> {
    attrs.iter().map(|(k, v)| (k.clone(), v.to_json())).collect()
}
