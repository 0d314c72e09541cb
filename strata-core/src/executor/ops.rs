//! Expansion of plan entries into ordered operations

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::Serialize;

use crate::error::CycleError;
use crate::plan::{Action, PlanEntry, ReplaceOrder};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    /// Create, update, or the create half of a replace
    Apply,
    /// Delete, or the destroy half of a replace
    Destroy,
}

/// Identity of one operation in a run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct OpKey {
    pub name: String,
    pub kind: OpKind,
    /// Identifier of the deposed object a destroy targets
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deposed: Option<String>,
}

impl fmt::Display for OpKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            OpKind::Apply => "apply",
            OpKind::Destroy => "destroy",
        };
        match &self.deposed {
            Some(identifier) => write!(f, "{} {} (deposed {})", kind, self.name, identifier),
            None => write!(f, "{} {}", kind, self.name),
        }
    }
}

#[derive(Debug)]
pub(crate) struct Op {
    pub key: OpKey,
    /// Index of the plan entry this op executes
    pub entry: usize,
    pub dependencies: Vec<usize>,
    pub dependents: Vec<usize>,
}

/// Operations in plan order with their ordering edges
#[derive(Debug)]
pub(crate) struct OpGraph {
    pub ops: Vec<Op>,
}

impl OpGraph {
    pub fn build(entries: &[PlanEntry]) -> Result<Self, CycleError> {
        let mut ops = Vec::new();
        let mut applies: HashMap<&str, usize> = HashMap::new();
        let mut destroys: HashMap<&str, usize> = HashMap::new();
        let mut deposed: HashMap<&str, Vec<usize>> = HashMap::new();
        let mut deposed_by_entry: HashMap<usize, usize> = HashMap::new();

        for (index, entry) in entries.iter().enumerate() {
            let name = entry.name();
            let mut push = |kind, deposed_id: Option<String>| {
                ops.push(Op {
                    key: OpKey {
                        name: name.to_string(),
                        kind,
                        deposed: deposed_id,
                    },
                    entry: index,
                    dependencies: Vec::new(),
                    dependents: Vec::new(),
                });
                ops.len() - 1
            };

            if let Some(identifier) = &entry.deposed {
                let op = push(OpKind::Destroy, Some(identifier.clone()));
                deposed.entry(name).or_default().push(op);
                deposed_by_entry.insert(index, op);
                continue;
            }
            if entry.action.applies() {
                let op = push(OpKind::Apply, None);
                applies.insert(name, op);
            }
            if entry.action.destroys() {
                let op = push(OpKind::Destroy, None);
                destroys.insert(name, op);
            }
        }

        let mut edges: Vec<(usize, usize)> = Vec::new();
        for (op_index, op) in ops.iter().enumerate() {
            let entry = &entries[op.entry];
            let name = entry.name();

            match op.key.kind {
                OpKind::Apply => {
                    for producer in &entry.depends_on {
                        if let Some(&p) = applies.get(producer.as_str()) {
                            edges.push((p, op_index));
                        }
                    }
                    if entry.action
                        == (Action::Replace {
                            order: ReplaceOrder::DestroyBeforeCreate,
                        })
                        && let Some(&d) = destroys.get(name)
                    {
                        edges.push((d, op_index));
                    }
                }
                OpKind::Destroy => {
                    // Anything still recorded as depending on this object goes first
                    for (other_index, other) in entries.iter().enumerate() {
                        if other_index == op.entry || other.name() == name {
                            continue;
                        }
                        let depends = other
                            .prior
                            .as_ref()
                            .is_some_and(|r| r.dependencies.iter().any(|d| d == name));
                        if !depends {
                            continue;
                        }
                        if other.deposed.is_some() {
                            if let Some(&d) = deposed_by_entry.get(&other_index) {
                                edges.push((d, op_index));
                            }
                        } else if let Some(&d) = destroys.get(other.name()) {
                            edges.push((d, op_index));
                        } else if let Some(&a) = applies.get(other.name()) {
                            edges.push((a, op_index));
                        }
                    }
                    if op.key.deposed.is_some() {
                        continue;
                    }
                    if entry.action
                        == (Action::Replace {
                            order: ReplaceOrder::CreateBeforeDestroy,
                        })
                        && let Some(&a) = applies.get(name)
                    {
                        edges.push((a, op_index));
                    }
                    // Older copies of the same resource are removed first
                    for &d in deposed.get(name).map_or(&[][..], Vec::as_slice) {
                        edges.push((d, op_index));
                    }
                }
            }
        }

        let mut seen = HashSet::new();
        for (from, to) in edges {
            if from != to && seen.insert((from, to)) {
                ops[to].dependencies.push(from);
                ops[from].dependents.push(to);
            }
        }

        let graph = Self { ops };
        if let Some(path) = graph.find_cycle() {
            return Err(CycleError { path });
        }
        Ok(graph)
    }

    fn find_cycle(&self) -> Option<Vec<String>> {
        let mut visited = HashSet::new();
        let mut stack = Vec::new();
        (0..self.ops.len()).find_map(|i| self.find_cycle_from(i, &mut visited, &mut stack))
    }

    fn find_cycle_from(
        &self,
        index: usize,
        visited: &mut HashSet<usize>,
        stack: &mut Vec<usize>,
    ) -> Option<Vec<String>> {
        if let Some(pos) = stack.iter().position(|&i| i == index) {
            let mut path: Vec<String> = stack[pos..]
                .iter()
                .map(|&i| self.ops[i].key.to_string())
                .collect();
            path.push(self.ops[index].key.to_string());
            return Some(path);
        }
        if !visited.insert(index) {
            return None;
        }
        stack.push(index);
        for &dep in &self.ops[index].dependencies {
            if let Some(path) = self.find_cycle_from(dep, visited, stack) {
                return Some(path);
            }
        }
        stack.pop();
        None
    }
}
