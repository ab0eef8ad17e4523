//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use shard_host::config::LifecycleConfig;
use shard_host::events::EventPublisher;
use shard_host::rpc::ClientNotice;
use shard_host::shard::{Shard, ShardContext, ShardDefinition};
use shard_host::sync::ObservableState;
use shard_host::ShardFailure;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

/// Ordered record of lifecycle hooks across shards
#[derive(Clone, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Journal {
    pub fn push(&self, entry: impl Into<String>) {
        self.entries.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }

    /// Shard ids of entries with the given prefix, in order
    pub fn with_prefix(&self, prefix: &str) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter_map(|e| e.strip_prefix(prefix).map(str::to_string))
            .collect()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries().iter().position(|e| e == entry)
    }
}

/// Tracks how many inits run at once
#[derive(Clone, Default)]
pub struct Gauge {
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl Gauge {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Default)]
pub enum InitBehavior {
    #[default]
    Succeed,
    Fail,
    Panic,
    Delay(Duration),
}

#[derive(Clone, Default)]
pub enum DisposeBehavior {
    #[default]
    Succeed,
    Fail,
    Hang,
}

/// Configurable shard used throughout the integration tests.
///
/// Operations:
/// - `echo(args..)` returns its arguments
/// - `fail()` returns a handler error
/// - `sleep(ms)` resolves after `ms` milliseconds
/// - `bump()` sets `x` three times and `y` once in the same turn
/// - `set(field, value)` sets one field
/// - `announce(payload)` publishes `<id>/announced`
#[derive(Clone, Default)]
pub struct Stub {
    pub journal: Journal,
    pub gauge: Gauge,
    pub init: InitBehavior,
    pub dispose: DisposeBehavior,
}

impl Stub {
    pub fn new(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
            ..Self::default()
        }
    }

    pub fn init(mut self, init: InitBehavior) -> Self {
        self.init = init;
        self
    }

    pub fn dispose(mut self, dispose: DisposeBehavior) -> Self {
        self.dispose = dispose;
        self
    }

    pub fn gauge(mut self, gauge: &Gauge) -> Self {
        self.gauge = gauge.clone();
        self
    }

    /// Definition for shard `id` built from this stub
    pub fn definition(self, id: &str, dependencies: &[&str]) -> ShardDefinition {
        let mut definition = ShardDefinition::new(id, move |ctx| {
            Ok(Arc::new(StubShard::new(ctx, self.clone())?) as Arc<dyn Shard>)
        });
        for dependency in dependencies {
            definition = definition.depends_on(*dependency);
        }
        definition
    }
}

struct StubShard {
    id: String,
    stub: Stub,
    state: ObservableState,
    events: EventPublisher,
}

impl StubShard {
    fn new(ctx: &ShardContext, stub: Stub) -> Result<Self, ShardFailure> {
        stub.journal.push(format!("construct:{}", ctx.id()));
        let state = ctx.observe([("x", json!(0)), ("y", json!(0)), ("label", json!(""))])?;
        Ok(Self {
            id: ctx.id().to_string(),
            stub,
            state,
            events: ctx.events(),
        })
    }
}

#[async_trait]
impl Shard for StubShard {
    fn operations(&self) -> &[&'static str] {
        &["echo", "fail", "sleep", "bump", "set", "announce"]
    }

    async fn call(&self, operation: &str, args: Vec<Value>) -> Result<Value, ShardFailure> {
        match operation {
            "echo" => Ok(Value::Array(args)),
            "fail" => Err(ShardFailure::new("asked to fail")),
            "sleep" => {
                let ms = args.first().and_then(Value::as_u64).unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(json!(ms))
            }
            "bump" => {
                for n in 1..=3 {
                    self.state.set("x", n)?;
                }
                self.state.set("y", 1)?;
                Ok(Value::Null)
            }
            "set" => {
                let field = args.first().and_then(Value::as_str).unwrap_or_default();
                let value = args.get(1).cloned().unwrap_or(Value::Null);
                self.state.set(field, value)?;
                Ok(Value::Null)
            }
            "announce" => {
                let payload = args.first().cloned().unwrap_or(Value::Null);
                Ok(json!(self.events.publish("announced", payload)))
            }
            other => Err(ShardFailure::new(format!("unhandled operation '{other}'"))),
        }
    }

    async fn init(&self) -> Result<(), ShardFailure> {
        self.stub.journal.push(format!("init-start:{}", self.id));
        self.stub.gauge.enter();
        let result = match &self.stub.init {
            InitBehavior::Succeed => Ok(()),
            InitBehavior::Fail => Err(ShardFailure::new("init refused")),
            InitBehavior::Panic => {
                self.stub.gauge.exit();
                panic!("init exploded");
            }
            InitBehavior::Delay(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(())
            }
        };
        self.stub.gauge.exit();
        if result.is_ok() {
            self.stub.journal.push(format!("init-done:{}", self.id));
        }
        result
    }

    async fn dispose(&self) -> Result<(), ShardFailure> {
        self.stub.journal.push(format!("dispose:{}", self.id));
        match self.stub.dispose {
            DisposeBehavior::Succeed => Ok(()),
            DisposeBehavior::Fail => Err(ShardFailure::new("dispose refused")),
            DisposeBehavior::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }
}

pub fn config(max_concurrent_inits: usize) -> LifecycleConfig {
    LifecycleConfig {
        init_timeout: Duration::from_secs(2),
        dispose_timeout: Duration::from_millis(200),
        max_concurrent_inits,
    }
}

/// Wait for the first notice matching `pred`, failing after one second
pub async fn next_notice(
    notices: &mut broadcast::Receiver<ClientNotice>,
    pred: impl Fn(&ClientNotice) -> bool,
) -> ClientNotice {
    tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            match notices.recv().await {
                Ok(notice) if pred(&notice) => return notice,
                Ok(_) => continue,
                Err(e) => panic!("notice stream ended: {e}"),
            }
        }
    })
    .await
    .expect("timed out waiting for notice")
}

/// Give spawned tasks a chance to run
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}
