//! `app-common` shard
//!
//! Application-wide facts and switches that do not belong to a more specific
//! shard: version, start time, hardware acceleration and shutdown intent.

use super::{arg, unhandled};
use crate::error::ShardFailure;
use crate::events::EventPublisher;
use crate::rpc::{BridgeClient, ClientNotice};
use crate::shard::{Shard, ShardContext, ShardDefinition};
use crate::sync::ObservableState;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

pub const ID: &str = "app-common";

pub const FIELD_VERSION: &str = "version";
pub const FIELD_STARTED_AT: &str = "startedAt";
pub const FIELD_HARDWARE_ACCELERATION: &str = "hardwareAcceleration";
pub const FIELD_SHUTTING_DOWN: &str = "shuttingDown";

pub const EVENT_SECOND_INSTANCE: &str = "second-instance";
pub const EVENT_RELAUNCH_REQUIRED: &str = "relaunch-required";

const OPERATIONS: &[&str] = &[
    "getVersion",
    "setHardwareAcceleration",
    "notifySecondInstance",
    "beginShutdown",
];

pub fn definition(version: &str) -> ShardDefinition {
    let version = version.to_string();
    ShardDefinition::new(ID, move |ctx| {
        Ok(Arc::new(AppCommon::new(ctx, version.clone())?) as Arc<dyn Shard>)
    })
}

pub struct AppCommon {
    version: String,
    state: ObservableState,
    events: EventPublisher,
}

impl AppCommon {
    fn new(ctx: &ShardContext, version: String) -> Result<Self, ShardFailure> {
        let started_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();

        let state = ctx.observe([
            (FIELD_VERSION, json!(version)),
            (FIELD_STARTED_AT, json!(started_at)),
            (FIELD_HARDWARE_ACCELERATION, json!(true)),
            (FIELD_SHUTTING_DOWN, json!(false)),
        ])?;

        Ok(Self {
            version,
            state,
            events: ctx.events(),
        })
    }

    fn flag(&self, field: &str) -> bool {
        self.state
            .get(field)
            .and_then(|v| v.as_bool())
            .unwrap_or_default()
    }

    /// Returns whether a relaunch is needed for the change to take effect
    fn set_hardware_acceleration(&self, enabled: bool) -> Result<bool, ShardFailure> {
        if self.flag(FIELD_HARDWARE_ACCELERATION) == enabled {
            return Ok(false);
        }
        self.state.set(FIELD_HARDWARE_ACCELERATION, enabled)?;
        self.events.publish(
            EVENT_RELAUNCH_REQUIRED,
            json!({ FIELD_HARDWARE_ACCELERATION: enabled }),
        );
        info!(enabled, "Hardware acceleration changed, relaunch required");
        Ok(true)
    }

    fn notify_second_instance(&self, command_line: Vec<String>, working_directory: Option<String>) {
        let delivered = self.events.publish(
            EVENT_SECOND_INSTANCE,
            json!([command_line, working_directory]),
        );
        debug!(delivered, "Second instance forwarded");
    }

    /// Returns false if shutdown had already begun
    fn begin_shutdown(&self) -> Result<bool, ShardFailure> {
        if self.flag(FIELD_SHUTTING_DOWN) {
            return Ok(false);
        }
        self.state.set(FIELD_SHUTTING_DOWN, true)?;
        info!("Shutdown requested");
        Ok(true)
    }
}

/// Resolve once `shuttingDown` turns true, watching it through `client` like
/// any other subscriber. Also resolves when the client's transport closes.
pub async fn shutdown_requested(client: &BridgeClient) {
    let mut notices = client.notices();
    if let Err(err) = client.subscribe(ID).await {
        warn!(error = %err, "Cannot watch shutdown intent");
        return;
    }

    loop {
        let shutting_down = client
            .fields(ID)
            .and_then(|fields| fields.get(FIELD_SHUTTING_DOWN).and_then(Value::as_bool))
            .unwrap_or_default();
        if shutting_down {
            return;
        }
        match notices.recv().await {
            Ok(ClientNotice::Closed) | Err(RecvError::Closed) => return,
            Ok(_) | Err(RecvError::Lagged(_)) => {}
        }
    }
}

#[async_trait]
impl Shard for AppCommon {
    fn operations(&self) -> &[&'static str] {
        OPERATIONS
    }

    async fn call(&self, operation: &str, args: Vec<Value>) -> Result<Value, ShardFailure> {
        match operation {
            "getVersion" => Ok(json!(self.version)),
            "setHardwareAcceleration" => {
                let enabled: bool = arg(&args, 0, "enabled")?;
                Ok(json!(self.set_hardware_acceleration(enabled)?))
            }
            "notifySecondInstance" => {
                let command_line: Option<Vec<String>> = arg(&args, 0, "commandLine")?;
                let working_directory: Option<String> = arg(&args, 1, "workingDirectory")?;
                self.notify_second_instance(command_line.unwrap_or_default(), working_directory);
                Ok(Value::Null)
            }
            "beginShutdown" => Ok(json!(self.begin_shutdown()?)),
            other => Err(unhandled(other)),
        }
    }

    async fn init(&self) -> Result<(), ShardFailure> {
        info!(version = %self.version, "App common ready");
        Ok(())
    }
}
