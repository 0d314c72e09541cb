//! Executor - Run a plan against providers
//!
//! The plan is expanded into apply and destroy operations. Operations whose
//! dependencies have succeeded run concurrently, up to the configured
//! parallelism. The coordinator loop is the only writer to the state store:
//! each operation's record is committed as soon as that operation succeeds,
//! so a failed or cancelled run leaves state describing exactly what exists.

mod ops;
mod report;
mod retry;

pub use ops::{OpKey, OpKind};
pub use report::{ExecutorEvent, NodeReport, NodeStatus, RunOutcome, RunSummary, SkipReason};
pub use retry::RetryPolicy;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::{self, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::error::CycleError;
use crate::plan::{Action, Plan, PlanEntry, ReplaceOrder};
use crate::provider::{AttributeDiff, Created, ErrorClass, Provider, ProviderRegistry, ProviderResult};
use crate::resource::{
    Attributes, DeposedObject, Reference, ResourceId, ResourceSpec, StateRecord, encode_attributes,
};
use crate::store::{StateStore, StoreError};
use ops::OpGraph;

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("Invalid operation ordering: {0}")]
    Ordering(#[from] CycleError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Engine tunables
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum number of provider operations in flight
    pub parallelism: usize,
    /// Backoff for transient provider errors
    pub retry: RetryPolicy,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            parallelism: 10,
            retry: RetryPolicy::default(),
        }
    }
}

/// Everything a run needs from its surroundings
#[derive(Clone)]
pub struct RunContext {
    /// Providers by resource type prefix
    pub providers: Arc<ProviderRegistry>,
    /// Receives a commit after every successful operation
    pub store: Arc<dyn StateStore>,
    /// Stops dispatch of new operations once cancelled
    pub cancel: CancellationToken,
}

impl RunContext {
    /// Context with a fresh cancellation token
    pub fn new(providers: Arc<ProviderRegistry>, store: Arc<dyn StateStore>) -> Self {
        Self {
            providers,
            store,
            cancel: CancellationToken::new(),
        }
    }

    /// Share a token with the caller, e.g. a Ctrl-C handler
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Runs plans against providers
pub struct Executor {
    ctx: RunContext,
    config: ExecutorConfig,
    /// Progress sink, if anyone is listening
    events: Option<mpsc::UnboundedSender<ExecutorEvent>>,
}

impl Executor {
    /// Create an executor without progress events
    pub fn new(ctx: RunContext, config: ExecutorConfig) -> Self {
        Self {
            ctx,
            config,
            events: None,
        }
    }

    /// Send progress events to `sender`
    pub fn with_events(mut self, sender: mpsc::UnboundedSender<ExecutorEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    /// Execute a plan, committing state as operations succeed
    pub async fn execute(&self, plan: Plan) -> Result<RunSummary, ExecutorError> {
        let entries = plan.into_entries();
        let graph = OpGraph::build(&entries)?;
        let records = self.ctx.store.load().await?;

        log::info!(
            "Executing {} operation(s) with parallelism {}",
            graph.ops.len(),
            self.config.parallelism.max(1)
        );

        let mut run = Run::new(self, entries, graph, records);
        run.drive().await;
        Ok(run.finish())
    }
}

/// A provider call prepared with fully resolved inputs
enum OpRequest {
    Create {
        id: ResourceId,
        inputs: Attributes,
    },
    Update {
        id: ResourceId,
        identifier: String,
        diff: AttributeDiff,
    },
    Delete {
        id: ResourceId,
        identifier: String,
    },
}

enum OpOutput {
    Created(Created),
    Updated(Attributes),
    Deleted,
}

impl OpRequest {
    async fn dispatch(&self, provider: &dyn Provider) -> ProviderResult<OpOutput> {
        match self {
            OpRequest::Create { id, inputs } => {
                provider.create(id, inputs).await.map(OpOutput::Created)
            }
            OpRequest::Update {
                id,
                identifier,
                diff,
            } => provider
                .update(id, identifier, diff)
                .await
                .map(OpOutput::Updated),
            OpRequest::Delete { id, identifier } => match provider.delete(id, identifier).await {
                Ok(()) => Ok(OpOutput::Deleted),
                Err(e) if e.is_not_found() => {
                    log::debug!("{} ({}) was already gone", id, identifier);
                    Ok(OpOutput::Deleted)
                }
                Err(e) => Err(e),
            },
        }
    }

    /// Inputs to record once the call succeeds
    fn into_inputs(self) -> Attributes {
        match self {
            OpRequest::Create { inputs, .. } => inputs,
            OpRequest::Update { diff, .. } => diff.new,
            OpRequest::Delete { .. } => Attributes::new(),
        }
    }
}

struct OpResult {
    attempts: u32,
    outcome: Result<(OpRequest, OpOutput), String>,
}

/// Call the provider, retrying transient errors with backoff until the policy gives up
async fn run_op(
    key: OpKey,
    provider: Arc<dyn Provider>,
    request: OpRequest,
    policy: RetryPolicy,
    cancel: CancellationToken,
    events: Option<mpsc::UnboundedSender<ExecutorEvent>>,
) -> OpResult {
    let mut attempt = 1;
    loop {
        let error = match request.dispatch(provider.as_ref()).await {
            Ok(output) => {
                return OpResult {
                    attempts: attempt,
                    outcome: Ok((request, output)),
                };
            }
            Err(e) => e,
        };

        let failed = |message: String| OpResult {
            attempts: attempt,
            outcome: Err(message),
        };
        if provider.classify(&error) == ErrorClass::Permanent {
            return failed(error.to_string());
        }
        let Some(delay) = policy.delay_for_attempt(attempt) else {
            return failed(format!("{} (gave up after {} attempts)", error, attempt));
        };

        log::warn!(
            "{} failed on attempt {}/{}: {}; retrying in {:?}",
            key,
            attempt,
            policy.max_attempts,
            error,
            delay
        );
        if let Some(events) = &events {
            let _ = events.send(ExecutorEvent::Retrying {
                op: key.clone(),
                attempt,
                delay,
                error: error.to_string(),
            });
        }

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => {
                return failed(format!("{} (retry abandoned: run cancelled)", error));
            }
        }
        attempt += 1;
    }
}

/// Mutable state of one execution
struct Run<'a> {
    executor: &'a Executor,
    entries: Vec<PlanEntry>,
    graph: OpGraph,
    /// Live view of state, kept in step with every commit
    records: BTreeMap<String, StateRecord>,
    status: Vec<NodeStatus>,
    attempts: Vec<u32>,
    errors: Vec<Option<String>>,
    /// Unfinished dependencies per op
    waiting_on: Vec<usize>,
    /// Ready ops by index, which is plan order
    ready: BTreeSet<usize>,
    /// Op index of every spawned task still in the join set
    in_flight: HashMap<task::Id, usize>,
    cancelled: bool,
}

impl<'a> Run<'a> {
    fn new(
        executor: &'a Executor,
        entries: Vec<PlanEntry>,
        graph: OpGraph,
        records: BTreeMap<String, StateRecord>,
    ) -> Self {
        let n = graph.ops.len();
        let waiting_on: Vec<usize> = graph.ops.iter().map(|o| o.dependencies.len()).collect();
        let mut status = vec![NodeStatus::Pending; n];
        let mut ready = BTreeSet::new();
        for (i, waiting) in waiting_on.iter().enumerate() {
            if *waiting == 0 {
                status[i] = NodeStatus::Ready;
                ready.insert(i);
            }
        }

        Self {
            executor,
            entries,
            graph,
            records,
            status,
            attempts: vec![0; n],
            errors: vec![None; n],
            waiting_on,
            ready,
            in_flight: HashMap::new(),
            cancelled: false,
        }
    }

    async fn drive(&mut self) {
        let cancel = self.executor.ctx.cancel.clone();
        let parallelism = self.executor.config.parallelism.max(1);
        let mut tasks: JoinSet<(usize, OpResult)> = JoinSet::new();

        loop {
            if !self.cancelled && cancel.is_cancelled() {
                self.cancel_requested(tasks.len());
            }

            while !self.cancelled && tasks.len() < parallelism {
                let Some(index) = self.ready.pop_first() else {
                    break;
                };
                match self.prepare(index) {
                    Ok((provider, request)) => self.spawn(&mut tasks, index, provider, request),
                    Err(message) => self.fail(index, message),
                }
            }

            if tasks.is_empty() {
                break;
            }

            tokio::select! {
                joined = tasks.join_next_with_id() => match joined {
                    Some(Ok((id, (index, result)))) => {
                        self.in_flight.remove(&id);
                        self.complete(index, result).await;
                    }
                    Some(Err(e)) => self.task_lost(e),
                    None => {}
                },
                _ = cancel.cancelled(), if !self.cancelled => {
                    self.cancel_requested(tasks.len());
                }
            }
        }

        if self.cancelled {
            for (index, status) in self.status.iter_mut().enumerate() {
                if !status.is_terminal() {
                    log::debug!("{} not started: run cancelled", self.graph.ops[index].key);
                    *status = NodeStatus::Skipped(SkipReason::Cancelled);
                }
            }
        }
    }

    fn cancel_requested(&mut self, in_flight: usize) {
        log::warn!(
            "Cancellation requested; waiting for {} in-flight operation(s)",
            in_flight
        );
        self.cancelled = true;
    }

    fn spawn(
        &mut self,
        tasks: &mut JoinSet<(usize, OpResult)>,
        index: usize,
        provider: Arc<dyn Provider>,
        request: OpRequest,
    ) {
        let key = self.graph.ops[index].key.clone();
        log::debug!("Dispatching {}", key);
        self.status[index] = NodeStatus::Running;
        self.emit(ExecutorEvent::Started { op: key.clone() });

        let op = run_op(
            key,
            provider,
            request,
            self.executor.config.retry,
            self.executor.ctx.cancel.clone(),
            self.executor.events.clone(),
        );
        // The inner task turns a panicking provider into an ordinary failure
        let handle = tasks.spawn(async move {
            let result = match tokio::spawn(op).await {
                Ok(result) => result,
                Err(e) => OpResult {
                    attempts: 1,
                    outcome: Err(format!("provider task aborted: {}", e)),
                },
            };
            (index, result)
        });
        self.in_flight.insert(handle.id(), index);
    }

    /// An op whose task could not be joined has an unknown effect; treat it as failed
    fn task_lost(&mut self, error: JoinError) {
        match self.in_flight.remove(&error.id()) {
            Some(index) => self.fail(index, format!("operation task failed to join: {}", error)),
            None => log::error!("Unknown operation task failed to join: {}", error),
        }
    }

    /// Build the provider call for an op, resolving references against live state
    fn prepare(&self, index: usize) -> Result<(Arc<dyn Provider>, OpRequest), String> {
        let op = &self.graph.ops[index];
        let entry = &self.entries[op.entry];

        match op.key.kind {
            OpKind::Apply => {
                let spec = entry
                    .spec
                    .as_ref()
                    .ok_or_else(|| format!("{} has no declared resource", entry.id))?;
                let provider = self.provider(&spec.id.resource_type)?;
                let inputs = self.resolve_inputs(spec)?;

                let request = if entry.action == Action::Update {
                    let record = self
                        .records
                        .get(entry.name())
                        .ok_or_else(|| format!("{} has no recorded state to update", entry.id))?;
                    OpRequest::Update {
                        id: spec.id.clone(),
                        identifier: record.identifier.clone(),
                        diff: AttributeDiff::new(record.input_values(), inputs),
                    }
                } else {
                    OpRequest::Create {
                        id: spec.id.clone(),
                        inputs,
                    }
                };
                Ok((provider, request))
            }
            OpKind::Destroy => {
                let prior = entry
                    .prior
                    .as_ref()
                    .ok_or_else(|| format!("{} has no recorded state to destroy", entry.id))?;
                let provider = self.provider(&prior.resource_type)?;
                let identifier = op
                    .key
                    .deposed
                    .clone()
                    .unwrap_or_else(|| prior.identifier.clone());
                Ok((
                    provider,
                    OpRequest::Delete {
                        id: ResourceId::new(prior.resource_type.clone(), entry.name()),
                        identifier,
                    },
                ))
            }
        }
    }

    fn provider(&self, resource_type: &str) -> Result<Arc<dyn Provider>, String> {
        self.executor
            .ctx
            .providers
            .provider_for(resource_type)
            .ok_or_else(|| format!("No provider registered for '{}'", resource_type))
    }

    fn resolve_inputs(&self, spec: &ResourceSpec) -> Result<Attributes, String> {
        let mut resolve = |r: &Reference| {
            self.records
                .get(&r.target)
                .and_then(|record| record.attribute(&r.attribute))
                .ok_or_else(|| format!("Reference {} could not be resolved for {}", r, spec.id))
        };
        spec.attributes
            .iter()
            .map(|(k, v)| v.resolve_with(&mut resolve).map(|v| (k.clone(), v)))
            .collect()
    }

    async fn complete(&mut self, index: usize, result: OpResult) {
        self.attempts[index] = result.attempts;
        match result.outcome {
            Ok((request, output)) => match self.commit(index, request, output).await {
                Ok(()) => self.succeed(index),
                Err(e) => self.fail(
                    index,
                    format!("Provider call succeeded but state commit failed: {}", e),
                ),
            },
            Err(message) => self.fail(index, message),
        }
    }

    /// Record the effect of a successful op
    async fn commit(
        &mut self,
        index: usize,
        request: OpRequest,
        output: OpOutput,
    ) -> Result<(), StoreError> {
        let store = Arc::clone(&self.executor.ctx.store);
        let op = &self.graph.ops[index];
        let entry = &self.entries[op.entry];
        let name = entry.name().to_string();
        let current = self.records.get(&name);

        let record = match output {
            OpOutput::Created(created) => {
                let mut record = StateRecord::new(entry.id.resource_type.clone(), created.identifier);
                record.outputs = encode_attributes(&created.outputs);
                record.inputs = encode_attributes(&request.into_inputs());
                record.dependencies = entry.depends_on.clone();
                record.protected = entry
                    .spec
                    .as_ref()
                    .is_some_and(|s| s.lifecycle.prevent_destroy);
                if let Some(current) = current {
                    record.deposed = current.deposed.clone();
                    if entry.action
                        == (Action::Replace {
                            order: ReplaceOrder::CreateBeforeDestroy,
                        })
                    {
                        record.deposed.push(DeposedObject {
                            identifier: current.identifier.clone(),
                            outputs: current.outputs.clone(),
                        });
                    }
                }
                Some(record)
            }
            OpOutput::Updated(outputs) => {
                let mut record = current.cloned().ok_or_else(|| {
                    StoreError::Corrupted(format!("{} vanished from state during update", name))
                })?;
                record.outputs = encode_attributes(&outputs);
                record.inputs = encode_attributes(&request.into_inputs());
                record.dependencies = entry.depends_on.clone();
                record.protected = entry
                    .spec
                    .as_ref()
                    .is_some_and(|s| s.lifecycle.prevent_destroy);
                Some(record)
            }
            OpOutput::Deleted => {
                let old_copy = match &op.key.deposed {
                    Some(identifier) => Some(identifier.clone()),
                    None if entry.action
                        == (Action::Replace {
                            order: ReplaceOrder::CreateBeforeDestroy,
                        }) =>
                    {
                        entry.prior.as_ref().map(|p| p.identifier.clone())
                    }
                    None => None,
                };
                match old_copy {
                    Some(identifier) => current.cloned().map(|mut record| {
                        record.deposed.retain(|d| d.identifier != identifier);
                        record
                    }),
                    None => None,
                }
            }
        };

        match record {
            // Last deposed copy of a vanished object is gone
            Some(record) if record.vanished && record.deposed.is_empty() => {
                store.remove(&name).await?;
                self.records.remove(&name);
            }
            Some(record) => {
                store.commit(&name, record.clone()).await?;
                self.records.insert(name, record);
            }
            None if op.key.kind == OpKind::Destroy && op.key.deposed.is_none() => {
                store.remove(&name).await?;
                self.records.remove(&name);
            }
            None => {}
        }
        Ok(())
    }

    fn succeed(&mut self, index: usize) {
        let op = &self.graph.ops[index];
        log::info!("{} succeeded", op.key);
        self.status[index] = NodeStatus::Succeeded;
        self.emit(ExecutorEvent::Finished {
            op: op.key.clone(),
            status: NodeStatus::Succeeded,
        });

        for &dependent in &self.graph.ops[index].dependents {
            self.waiting_on[dependent] -= 1;
            if self.waiting_on[dependent] == 0 && self.status[dependent] == NodeStatus::Pending {
                self.status[dependent] = NodeStatus::Ready;
                self.ready.insert(dependent);
            }
        }
    }

    /// Mark an op failed and skip everything downstream of it
    fn fail(&mut self, index: usize, message: String) {
        let label = self.graph.ops[index].key.to_string();
        log::error!("{} failed: {}", label, message);
        self.status[index] = NodeStatus::Failed;
        self.errors[index] = Some(message);
        self.emit(ExecutorEvent::Finished {
            op: self.graph.ops[index].key.clone(),
            status: NodeStatus::Failed,
        });

        let mut stack: Vec<usize> = self.graph.ops[index].dependents.clone();
        while let Some(next) = stack.pop() {
            if self.status[next].is_terminal() || self.status[next] == NodeStatus::Running {
                continue;
            }
            log::info!("Skipping {}: {} failed", self.graph.ops[next].key, label);
            let status = NodeStatus::Skipped(SkipReason::UpstreamFailed(label.clone()));
            self.status[next] = status.clone();
            self.ready.remove(&next);
            self.emit(ExecutorEvent::Finished {
                op: self.graph.ops[next].key.clone(),
                status,
            });
            stack.extend(self.graph.ops[next].dependents.iter().copied());
        }
    }

    fn emit(&self, event: ExecutorEvent) {
        if let Some(events) = &self.executor.events {
            // The receiver may have gone away; progress is best effort
            let _ = events.send(event);
        }
    }

    fn finish(self) -> RunSummary {
        let any_failed = self.status.iter().any(|s| *s == NodeStatus::Failed);
        let any_succeeded = self.status.iter().any(|s| *s == NodeStatus::Succeeded);
        let outcome = if self.cancelled {
            RunOutcome::Cancelled
        } else if !any_failed {
            RunOutcome::Succeeded
        } else if any_succeeded {
            RunOutcome::PartialFailure
        } else {
            RunOutcome::Failed
        };

        let entries = &self.entries;
        let nodes = self
            .graph
            .ops
            .into_iter()
            .zip(self.status)
            .zip(self.attempts.into_iter().zip(self.errors))
            .map(|((op, status), (attempts, error))| {
                let entry = &entries[op.entry];
                NodeReport {
                    resource_type: entry
                        .prior
                        .as_ref()
                        .filter(|_| op.key.kind == OpKind::Destroy)
                        .map_or_else(|| entry.id.resource_type.clone(), |p| p.resource_type.clone()),
                    action: entry.action,
                    op: op.key,
                    status,
                    attempts,
                    error,
                }
            })
            .collect();

        log::info!("Run finished: {:?}", outcome);
        RunSummary { outcome, nodes }
    }
}
