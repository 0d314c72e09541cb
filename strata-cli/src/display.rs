//! Terminal rendering of plans, run progress, and state

use colored::{ColoredString, Colorize};

use strata_core::executor::{ExecutorEvent, NodeStatus, RunOutcome, RunSummary};
use strata_core::graph::DependencyGraph;
use strata_core::plan::{Action, AttributeChange, Plan, PlanEntry, PlannedValue, ReplaceOrder};
use strata_core::resource::StateRecord;
use strata_state::StateFile;

fn colored_symbol(action: &Action) -> ColoredString {
    let symbol = action.symbol();
    match action {
        Action::NoOp => symbol.normal(),
        Action::Create => symbol.green().bold(),
        Action::Update => symbol.yellow().bold(),
        Action::Replace {
            order: ReplaceOrder::CreateBeforeDestroy,
        } => symbol.green().bold(),
        Action::Replace {
            order: ReplaceOrder::DestroyBeforeCreate,
        } => symbol.red().bold(),
        Action::Delete => symbol.red().bold(),
    }
}

/// `key: old -> new`, or `key: new` when there is no old value
fn change_text(change: &AttributeChange) -> String {
    let mut text = match &change.old {
        Some(old) => format!("{}: {} -> {}", change.name, old, change.new),
        None => format!("{}: {}", change.name, change.new),
    };
    if change.forces_replacement {
        text.push_str(" (forces replacement)");
    }
    text
}

/// Why an entry is replaced, if it is
fn replace_reason(entry: &PlanEntry) -> Option<String> {
    if let Some(dependency) = &entry.replaced_dependency {
        return Some(format!("{} is replaced first", dependency));
    }
    if entry.replace_triggers.iter().any(|t| t == "resource_type") {
        return Some("resource type changed".to_string());
    }
    None
}

pub fn print_plan(plan: &Plan) {
    if !plan.has_changes() {
        println!("{}", "No changes. Infrastructure is up-to-date.".green());
        return;
    }

    println!("{}", "Execution Plan:".cyan().bold());
    println!();

    for entry in plan.entries().iter().filter(|e| e.action.is_mutating()) {
        print!("  {} {}", colored_symbol(&entry.action), entry.label().cyan().bold());
        if let Some(reason) = replace_reason(entry) {
            print!(" {}", format!("({})", reason).dimmed());
        }
        println!();

        if entry.action == Action::Delete {
            continue;
        }
        for change in &entry.changes {
            let line = change_text(change);
            let line = match (&change.new, change.forces_replacement) {
                (_, true) => line.red(),
                (PlannedValue::Unknown, _) => line.dimmed(),
                (PlannedValue::Removed, _) => line.red(),
                (PlannedValue::Known(_), _) if change.old.is_none() => line.green(),
                _ => line.yellow(),
            };
            println!("      {}", line);
        }
    }

    println!();
    println!("{}", plan.summary().to_string().bold());
}

/// Progress line for one executor event
pub fn print_event(event: &ExecutorEvent) {
    match event {
        ExecutorEvent::Started { op } => {
            println!("  {} {}", "…".dimmed(), op.to_string().dimmed());
        }
        ExecutorEvent::Retrying {
            op,
            attempt,
            delay,
            error,
        } => {
            println!(
                "  {} {} attempt {} failed ({}), retrying in {:?}",
                "↻".yellow(),
                op,
                attempt,
                error,
                delay
            );
        }
        ExecutorEvent::Finished { op, status } => match status {
            NodeStatus::Succeeded => println!("  {} {}", "✓".green(), op),
            NodeStatus::Failed => println!("  {} {}", "✗".red(), op),
            NodeStatus::Skipped(reason) => {
                println!("  {} {} {}", "-".yellow(), op, format!("skipped: {}", reason).yellow())
            }
            other => log::debug!("{} is {}", op, other),
        },
    }
}

pub fn print_summary(verb: &str, summary: &RunSummary) {
    let failures: Vec<_> = summary
        .nodes
        .iter()
        .filter(|n| n.status == NodeStatus::Failed)
        .collect();
    if !failures.is_empty() {
        println!();
        println!("{}", "Failures:".red().bold());
        for node in failures {
            println!(
                "  {} {} after {} attempt(s): {}",
                "✗".red(),
                node.op,
                node.attempts,
                node.error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    println!();
    let counts = format!(
        "{} succeeded, {} failed, {} skipped.",
        summary.succeeded(),
        summary.failed(),
        summary.skipped()
    );
    match summary.outcome {
        RunOutcome::Succeeded => {
            println!("{}", format!("{} complete! {}", verb, counts).green().bold())
        }
        RunOutcome::PartialFailure => {
            println!("{}", format!("{} partially failed. {}", verb, counts).red().bold())
        }
        RunOutcome::Failed => println!("{}", format!("{} failed. {}", verb, counts).red().bold()),
        RunOutcome::Cancelled => {
            println!("{}", format!("{} cancelled. {}", verb, counts).yellow().bold())
        }
    }
}

pub fn print_graph(graph: &DependencyGraph) {
    println!("{}", "Resources in apply order:".cyan().bold());
    for node in graph.topological_order() {
        println!("  {} {}", node.spec.id.to_string().bold(), dependency_text(graph, node.name()));
    }
}

fn dependency_text(graph: &DependencyGraph, name: &str) -> String {
    let deps = graph.dependencies_of(name);
    if deps.is_empty() {
        String::new()
    } else {
        format!("<- {}", deps.join(", "))
    }
}

pub fn print_state_list(state: &StateFile) {
    if state.resources.is_empty() {
        println!("{}", "No resources in state.".yellow());
        return;
    }
    println!(
        "{}",
        format!("State serial {} (lineage {})", state.serial, state.lineage).dimmed()
    );
    for (name, record) in &state.resources {
        println!("  {}", record_line(name, record));
    }
}

fn record_line(name: &str, record: &StateRecord) -> String {
    let mut line = format!("{}.{} ({})", record.resource_type, name, record.identifier);
    if !record.is_live() {
        line.push_str(", vanished");
    }
    if !record.deposed.is_empty() {
        line.push_str(&format!(", {} deposed", record.deposed.len()));
    }
    if record.protected {
        line.push_str(", protected");
    }
    line
}
