//! Per-operation status and the summary of a run

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use super::ops::OpKey;
use crate::plan::Action;

/// Why an operation was never attempted
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// An operation it depends on failed (the failed operation's label)
    UpstreamFailed(String),
    Cancelled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::UpstreamFailed(op) => write!(f, "{} failed", op),
            SkipReason::Cancelled => write!(f, "run cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "reason")]
pub enum NodeStatus {
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed,
    Skipped(SkipReason),
}

impl NodeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NodeStatus::Succeeded | NodeStatus::Failed | NodeStatus::Skipped(_)
        )
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeStatus::Pending => write!(f, "pending"),
            NodeStatus::Ready => write!(f, "ready"),
            NodeStatus::Running => write!(f, "running"),
            NodeStatus::Succeeded => write!(f, "succeeded"),
            NodeStatus::Failed => write!(f, "failed"),
            NodeStatus::Skipped(reason) => write!(f, "skipped ({})", reason),
        }
    }
}

/// Terminal report for one operation
#[derive(Debug, Clone, Serialize)]
pub struct NodeReport {
    pub op: OpKey,
    pub resource_type: String,
    pub action: Action,
    pub status: NodeStatus,
    /// Provider calls made, including retries
    pub attempts: u32,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Succeeded,
    /// Some operations failed; state reflects exactly the ones that succeeded
    PartialFailure,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub outcome: RunOutcome,
    pub nodes: Vec<NodeReport>,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.outcome == RunOutcome::Succeeded
    }

    /// Report for an operation by its label (e.g., "apply vpc")
    pub fn node(&self, label: &str) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| n.op.to_string() == label)
    }

    pub fn succeeded(&self) -> usize {
        self.count(|s| matches!(s, NodeStatus::Succeeded))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, NodeStatus::Failed))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, NodeStatus::Skipped(_)))
    }

    fn count(&self, pred: impl Fn(&NodeStatus) -> bool) -> usize {
        self.nodes.iter().filter(|n| pred(&n.status)).count()
    }
}

/// Progress notifications sent while a run is in flight
#[derive(Debug, Clone)]
pub enum ExecutorEvent {
    Started {
        op: OpKey,
    },
    Retrying {
        op: OpKey,
        attempt: u32,
        delay: Duration,
        error: String,
    },
    Finished {
        op: OpKey,
        status: NodeStatus,
    },
}
