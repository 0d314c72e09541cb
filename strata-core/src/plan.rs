//! Plan - Actions needed to move recorded state to declared state
//!
//! A Plan is an ordered list of entries. No side effects occur until the
//! executor consumes it.

use serde::Serialize;

use crate::resource::{ResourceId, ResourceSpec, StateRecord, Value};

/// Order of the two halves of a replacement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplaceOrder {
    CreateBeforeDestroy,
    DestroyBeforeCreate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Action {
    NoOp,
    Create,
    Update,
    Replace { order: ReplaceOrder },
    Delete,
}

impl Action {
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Action::NoOp)
    }

    /// Whether the plan calls the provider's create or update for this entry
    pub fn applies(&self) -> bool {
        matches!(self, Action::Create | Action::Update | Action::Replace { .. })
    }

    /// Whether the plan destroys the recorded object
    pub fn destroys(&self) -> bool {
        matches!(self, Action::Delete | Action::Replace { .. })
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Action::NoOp => " ",
            Action::Create => "+",
            Action::Update => "~",
            Action::Replace {
                order: ReplaceOrder::CreateBeforeDestroy,
            } => "+/-",
            Action::Replace {
                order: ReplaceOrder::DestroyBeforeCreate,
            } => "-/+",
            Action::Delete => "-",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::NoOp => write!(f, "no-op"),
            Action::Create => write!(f, "create"),
            Action::Update => write!(f, "update"),
            Action::Replace {
                order: ReplaceOrder::CreateBeforeDestroy,
            } => write!(f, "replace (create before destroy)"),
            Action::Replace {
                order: ReplaceOrder::DestroyBeforeCreate,
            } => write!(f, "replace (destroy before create)"),
            Action::Delete => write!(f, "delete"),
        }
    }
}

/// Planned value of an attribute
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum PlannedValue {
    Known(Value),
    /// Depends on an output that will only exist after apply
    Unknown,
    Removed,
}

impl std::fmt::Display for PlannedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlannedValue::Known(v) => write!(f, "{}", v),
            PlannedValue::Unknown => write!(f, "(known after apply)"),
            PlannedValue::Removed => write!(f, "(removed)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeChange {
    pub name: String,
    /// Last applied value, absent on create
    pub old: Option<Value>,
    pub new: PlannedValue,
    /// Changing this attribute forces replacement
    pub forces_replacement: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanEntry {
    pub id: ResourceId,
    pub action: Action,
    pub changes: Vec<AttributeChange>,
    /// Attributes (or "resource_type") that force replacement
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub replace_triggers: Vec<String>,
    /// Set when a replace was forced by a producer replaced destroy-before-create
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replaced_dependency: Option<String>,
    /// Logical names of the declared producers
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// Identifier of the deposed object this entry deletes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deposed: Option<String>,
    /// Declared resource, absent on delete
    #[serde(skip)]
    pub spec: Option<ResourceSpec>,
    /// Recorded state before the run, absent on create
    #[serde(skip)]
    pub prior: Option<StateRecord>,
}

impl PlanEntry {
    pub fn new(id: ResourceId, action: Action) -> Self {
        Self {
            id,
            action,
            changes: Vec::new(),
            replace_triggers: Vec::new(),
            replaced_dependency: None,
            depends_on: Vec::new(),
            deposed: None,
            spec: None,
            prior: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.id.name
    }

    /// Display key; deposed objects are suffixed with their identifier
    pub fn label(&self) -> String {
        match &self.deposed {
            Some(identifier) => format!("{} (deposed {})", self.id, identifier),
            None => self.id.to_string(),
        }
    }
}

/// Plan containing entries in execution-compatible order
#[derive(Debug, Clone, Default, Serialize)]
pub struct Plan {
    entries: Vec<PlanEntry>,
}

impl Plan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, entry: PlanEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[PlanEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<PlanEntry> {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry for a declared or recorded resource (not a deposed object)
    pub fn get(&self, name: &str) -> Option<&PlanEntry> {
        self.entries
            .iter()
            .find(|e| e.name() == name && e.deposed.is_none())
    }

    /// Whether anything would change
    pub fn has_changes(&self) -> bool {
        self.entries.iter().any(|e| e.action.is_mutating())
    }

    /// Number of entries that would change something
    pub fn mutation_count(&self) -> usize {
        self.entries.iter().filter(|e| e.action.is_mutating()).count()
    }

    /// Generate a summary of the Plan for display
    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for entry in &self.entries {
            match entry.action {
                Action::NoOp => summary.noop += 1,
                Action::Create => summary.create += 1,
                Action::Update => summary.update += 1,
                Action::Replace { .. } => summary.replace += 1,
                Action::Delete => summary.delete += 1,
            }
        }
        summary
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub replace: usize,
    pub delete: usize,
    pub noop: usize,
}

impl std::fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Plan: {} to add, {} to change, {} to replace, {} to destroy.",
            self.create, self.update, self.replace, self.delete
        )
    }
}
