//! Lifecycle coordinator
//!
//! Brings shards up in dependency order and tears them down in reverse.
//! Independent branches initialize concurrently up to a configured limit; a
//! shard never starts before every one of its dependencies is Ready.
//! Failures stay local to the failing branch.

use crate::config::LifecycleConfig;
use crate::error::HostError;
use crate::events::EventBus;
use crate::metrics::HostMetrics;
use crate::rpc::CallRouter;
use crate::shard::definition::{Shard, ShardContext, ShardDefinition, ShardFactory, ShardHandle};
use crate::shard::registry::ShardRegistry;
use crate::shard::resolver;
use crate::shard::state::{FailureReason, LifecycleState, ShardTable};
use crate::sync::StateSyncBridge;

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Outcome of [`LifecycleCoordinator::start`]
#[derive(Debug, Clone, Default)]
pub struct StartupReport {
    /// Shards that reached Ready, in the order they did
    pub order: Vec<String>,
    /// Failed shards with their reasons, in registration order
    pub failed: Vec<(String, FailureReason)>,
}

impl StartupReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// One error per failed shard
    pub fn errors(&self) -> Vec<HostError> {
        self.failed
            .iter()
            .map(|(id, reason)| reason.to_error(id))
            .collect()
    }

    /// Collapse failures into a single summary naming every failed shard
    pub fn ensure_success(&self) -> Result<(), HostError> {
        if self.is_success() {
            return Ok(());
        }
        Err(HostError::InitializationFailed {
            failed: self
                .failed
                .iter()
                .map(|(id, reason)| format!("{id} ({reason})"))
                .collect(),
        })
    }
}

/// Outcome of [`LifecycleCoordinator::dispose`]
#[derive(Debug, Default)]
pub struct DisposalReport {
    /// Shards whose dispose was invoked, in invocation order
    pub order: Vec<String>,
    /// Recorded, non-fatal dispose failures
    pub failures: Vec<HostError>,
}

/// A shard that was constructed and therefore owes a dispose call
struct Initialized {
    id: String,
    instance: Arc<dyn Shard>,
    /// False when init failed or timed out after construction
    ready: bool,
}

struct InitOutcome {
    index: usize,
    id: String,
    instance: Option<Arc<dyn Shard>>,
    result: Result<(), FailureReason>,
    elapsed: Duration,
}

pub struct LifecycleCoordinator {
    table: ShardTable,
    bridge: StateSyncBridge,
    router: CallRouter,
    bus: EventBus,
    metrics: Arc<HostMetrics>,
    config: LifecycleConfig,
    initialized: Mutex<Vec<Initialized>>,
    started: AtomicBool,
}

impl LifecycleCoordinator {
    pub fn new(
        table: ShardTable,
        bridge: StateSyncBridge,
        router: CallRouter,
        bus: EventBus,
        metrics: Arc<HostMetrics>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            table,
            bridge,
            router,
            bus,
            metrics,
            config,
            initialized: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    /// Resolve and initialize every registered shard.
    ///
    /// Resolution errors abort startup and are returned. Init failures are
    /// reported in the [`StartupReport`]; unaffected branches still come up.
    pub async fn start(&self, registry: &ShardRegistry) -> Result<StartupReport, HostError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(HostError::AlreadyStarted);
        }

        for definition in registry.iter() {
            self.table.set_state(definition.id(), LifecycleState::Resolving);
        }

        let order = match resolver::resolve(registry) {
            Ok(order) => order,
            Err(err) => {
                error!(error = %err, "Dependency resolution failed");
                self.metrics.record_error(err.error_type_label());
                for definition in registry.iter() {
                    self.table.fail(definition.id(), FailureReason::ResolutionAborted);
                }
                return Err(err);
            }
        };
        info!(shards = order.len(), ?order, "Dependency order resolved");

        let position: HashMap<&str, usize> = order
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();
        let definitions: Vec<&ShardDefinition> =
            order.iter().filter_map(|id| registry.get(id)).collect();

        let mut remaining: Vec<usize> = definitions
            .iter()
            .map(|d| d.dependency_ids().len())
            .collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); definitions.len()];
        for (idx, definition) in definitions.iter().enumerate() {
            for dependency_id in definition.dependency_ids() {
                if let Some(&dep_idx) = position.get(dependency_id.as_str()) {
                    dependents[dep_idx].push(idx);
                }
            }
        }

        let mut eligible: BTreeSet<usize> = remaining
            .iter()
            .enumerate()
            .filter(|(_, &n)| n == 0)
            .map(|(i, _)| i)
            .collect();
        let limit = self.config.max_concurrent_inits.max(1);
        let mut running: JoinSet<InitOutcome> = JoinSet::new();
        let mut report = StartupReport::default();

        loop {
            while running.len() < limit {
                let Some(idx) = eligible.pop_first() else {
                    break;
                };
                running.spawn(self.init_task(definitions[idx], idx));
            }

            let Some(joined) = running.join_next().await else {
                break;
            };
            let InitOutcome {
                index,
                id,
                instance,
                result,
                elapsed,
            } = match joined {
                Ok(outcome) => outcome,
                Err(err) => {
                    // fail_stragglers picks up whatever this task left Initializing
                    error!(error = %err, "Init supervisor task failed");
                    continue;
                }
            };

            if let Some(instance) = &instance {
                self.initialized.lock().await.push(Initialized {
                    id: id.clone(),
                    instance: Arc::clone(instance),
                    ready: result.is_ok(),
                });
            }

            match result {
                Ok(()) => {
                    self.table.set_state(&id, LifecycleState::Ready);
                    if let Some(instance) = instance {
                        self.router.register(&id, instance);
                    }
                    self.metrics.record_init(&id, elapsed, true);
                    info!(shard_id = %id, elapsed_ms = elapsed.as_millis() as u64, "Shard ready");
                    report.order.push(id);

                    for &dep_idx in &dependents[index] {
                        remaining[dep_idx] -= 1;
                        if remaining[dep_idx] == 0
                            && self.table.state(definitions[dep_idx].id())
                                == Some(LifecycleState::Resolving)
                        {
                            eligible.insert(dep_idx);
                        }
                    }
                }
                Err(reason) => {
                    error!(shard_id = %id, %reason, "Shard failed");
                    self.metrics.record_init(&id, elapsed, false);
                    self.metrics.record_error(reason.to_error(&id).error_type_label());
                    self.table.fail(&id, reason);
                    self.bridge.remove_shard(&id);
                    self.skip_dependents(index, &definitions, &dependents);
                }
            }
        }

        self.fail_stragglers(&definitions, &dependents);

        report.failed = self.table.failed();
        self.metrics.set_shards_ready(self.table.ready_shards());

        if report.is_success() {
            info!(ready = report.order.len(), "All shards ready");
        } else {
            let failed: Vec<&str> = report.failed.iter().map(|(id, _)| id.as_str()).collect();
            error!(ready = report.order.len(), ?failed, "Initialization failed");
        }

        Ok(report)
    }

    /// Fail anything a lost supervisor task left Initializing, along with its
    /// dependents, then anything that never started.
    fn fail_stragglers(&self, definitions: &[&ShardDefinition], dependents: &[Vec<usize>]) {
        for (idx, definition) in definitions.iter().enumerate() {
            if self.table.state(definition.id()) == Some(LifecycleState::Initializing) {
                self.table.fail(
                    definition.id(),
                    FailureReason::InitFailure("init supervisor lost".to_string()),
                );
                self.bridge.remove_shard(definition.id());
                self.skip_dependents(idx, definitions, dependents);
            }
        }
        for definition in definitions {
            if self.table.state(definition.id()) == Some(LifecycleState::Resolving) {
                self.table.fail(
                    definition.id(),
                    FailureReason::InitFailure("never started".to_string()),
                );
            }
        }
    }

    /// Mark every not-yet-started dependent of a failed shard as Failed
    fn skip_dependents(
        &self,
        failed_idx: usize,
        definitions: &[&ShardDefinition],
        dependents: &[Vec<usize>],
    ) {
        let mut stack = vec![failed_idx];
        while let Some(idx) = stack.pop() {
            let failed_id = definitions[idx].id();
            for &dep_idx in &dependents[idx] {
                let dependent_id = definitions[dep_idx].id();
                if self.table.fail(
                    dependent_id,
                    FailureReason::DependencyFailed(failed_id.to_string()),
                ) {
                    warn!(
                        shard_id = dependent_id,
                        dependency = failed_id,
                        "Shard skipped: dependency failed"
                    );
                    stack.push(dep_idx);
                }
            }
        }
    }

    fn init_task(
        &self,
        definition: &ShardDefinition,
        index: usize,
    ) -> impl Future<Output = InitOutcome> + Send + 'static {
        let id = definition.id().to_string();
        let factory = definition.factory();
        let timeout = definition
            .init_timeout()
            .unwrap_or(self.config.init_timeout);

        let dependencies: BTreeMap<String, ShardHandle> = definition
            .dependency_ids()
            .iter()
            .map(|dep| {
                (
                    dep.clone(),
                    ShardHandle::new(dep.clone(), self.router.clone(), self.bridge.clone()),
                )
            })
            .collect();
        let context = ShardContext::new(
            id.clone(),
            dependencies,
            self.bridge.clone(),
            self.bus.clone(),
        );

        self.table.set_state(&id, LifecycleState::Initializing);
        debug!(shard_id = %id, timeout_ms = timeout.as_millis() as u64, "Shard initializing");

        async move {
            let started = Instant::now();
            let (instance, result) = run_init(factory, context, timeout).await;
            InitOutcome {
                index,
                id,
                instance,
                result,
                elapsed: started.elapsed(),
            }
        }
    }

    /// Dispose every constructed shard in exact reverse of the achieved
    /// initialization order. Failures are recorded and teardown continues.
    pub async fn dispose(&self) -> DisposalReport {
        let initialized = std::mem::take(&mut *self.initialized.lock().await);
        let mut report = DisposalReport::default();

        for Initialized {
            id,
            instance,
            ready,
        } in initialized.into_iter().rev()
        {
            self.router.unregister(&id);
            if ready {
                self.table.set_state(&id, LifecycleState::Disposing);
            }
            debug!(shard_id = %id, "Disposing shard");

            let task = tokio::spawn(async move { instance.dispose().await });
            let abort = task.abort_handle();
            let failure = match tokio::time::timeout(self.config.dispose_timeout, task).await {
                Ok(Ok(Ok(()))) => None,
                Ok(Ok(Err(failure))) => Some(failure.to_string()),
                Ok(Err(err)) => Some(format!("dispose task panicked: {err}")),
                Err(_) => {
                    abort.abort();
                    Some(format!(
                        "dispose timed out after {}ms",
                        self.config.dispose_timeout.as_millis()
                    ))
                }
            };

            self.bridge.remove_shard(&id);
            if ready {
                self.table.set_state(&id, LifecycleState::Disposed);
            }

            if let Some(message) = failure {
                let err = HostError::DisposeFailure {
                    shard_id: id.clone(),
                    message,
                };
                warn!(shard_id = %id, error = %err, "Dispose failed, continuing teardown");
                self.metrics.record_error(err.error_type_label());
                report.failures.push(err);
            }
            report.order.push(id);
        }

        self.metrics.set_shards_ready(self.table.ready_shards());
        if !report.order.is_empty() {
            info!(
                disposed = report.order.len(),
                failures = report.failures.len(),
                "Shards disposed"
            );
        }
        report
    }
}

/// Construct then initialize. The instance is returned whenever the factory
/// succeeded, so a failed, timed out or panicking init still gets disposed.
async fn run_init(
    factory: ShardFactory,
    context: ShardContext,
    timeout: Duration,
) -> (Option<Arc<dyn Shard>>, Result<(), FailureReason>) {
    let instance = match panic::catch_unwind(AssertUnwindSafe(|| factory(&context))) {
        Ok(Ok(instance)) => instance,
        Ok(Err(failure)) => return (None, Err(FailureReason::InitFailure(failure.to_string()))),
        Err(payload) => {
            let message = format!("factory panicked: {}", panic_message(payload.as_ref()));
            return (None, Err(FailureReason::InitFailure(message)));
        }
    };

    // Inner task so a panicking init becomes a failure
    let init = tokio::spawn({
        let instance = Arc::clone(&instance);
        async move { tokio::time::timeout(timeout, instance.init()).await }
    });
    let result = match init.await {
        Ok(Ok(Ok(()))) => Ok(()),
        Ok(Ok(Err(failure))) => Err(FailureReason::InitFailure(failure.to_string())),
        Ok(Err(_)) => Err(FailureReason::InitTimeout { timeout }),
        Err(err) => Err(FailureReason::InitFailure(format!("init task panicked: {err}"))),
    };
    (Some(instance), result)
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
