//! `close-policy` shard
//!
//! Decides what closing the main window means. The remembered strategy is
//! an observable field; when it is `unset` the decision is pushed back to
//! the front end as a `close-policy/close-asking` event and answered with
//! `answerClose`. Quitting goes through `app-common/beginShutdown`.

use super::{app_common, arg, unhandled};
use crate::error::ShardFailure;
use crate::events::EventPublisher;
use crate::shard::{Shard, ShardContext, ShardDefinition, ShardHandle};
use crate::sync::ObservableState;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

pub const ID: &str = "close-policy";

pub const FIELD_STRATEGY: &str = "strategy";

pub const EVENT_CLOSE_ASKING: &str = "close-asking";

const OPERATIONS: &[&str] = &["setStrategy", "requestClose", "answerClose"];

/// Remembered answer to "what should closing the window do"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CloseStrategy {
    #[default]
    Unset,
    MinimizeToTray,
    Quit,
}

/// What the front end should do with the window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CloseDecision {
    Hide,
    Quit,
    Ask,
}

pub fn definition() -> ShardDefinition {
    ShardDefinition::new(ID, |ctx| Ok(Arc::new(ClosePolicy::new(ctx)?) as Arc<dyn Shard>))
        .depends_on(app_common::ID)
}

pub struct ClosePolicy {
    app: ShardHandle,
    state: ObservableState,
    events: EventPublisher,
}

impl ClosePolicy {
    fn new(ctx: &ShardContext) -> Result<Self, ShardFailure> {
        let app = ctx.dependency(app_common::ID)?;
        let state = ctx.observe([(FIELD_STRATEGY, json!(CloseStrategy::Unset))])?;
        Ok(Self {
            app,
            state,
            events: ctx.events(),
        })
    }

    pub fn strategy(&self) -> CloseStrategy {
        self.state
            .get(FIELD_STRATEGY)
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }

    fn set_strategy(&self, strategy: CloseStrategy) -> Result<(), ShardFailure> {
        self.state.set(FIELD_STRATEGY, json!(strategy))?;
        debug!(?strategy, "Close strategy set");
        Ok(())
    }

    fn shutting_down(&self) -> bool {
        self.app
            .field(app_common::FIELD_SHUTTING_DOWN)
            .and_then(|v| v.as_bool())
            .unwrap_or_default()
    }

    async fn request_close(&self) -> Result<CloseDecision, ShardFailure> {
        if self.shutting_down() {
            return Ok(CloseDecision::Quit);
        }
        match self.strategy() {
            CloseStrategy::MinimizeToTray => Ok(CloseDecision::Hide),
            CloseStrategy::Quit => self.quit().await,
            CloseStrategy::Unset => {
                let delivered = self.events.publish(EVENT_CLOSE_ASKING, Value::Null);
                debug!(delivered, "Asking how to close");
                Ok(CloseDecision::Ask)
            }
        }
    }

    async fn answer_close(
        &self,
        choice: CloseStrategy,
        remember: bool,
    ) -> Result<CloseDecision, ShardFailure> {
        if remember {
            self.set_strategy(choice)?;
        }
        match choice {
            CloseStrategy::MinimizeToTray => Ok(CloseDecision::Hide),
            CloseStrategy::Quit => self.quit().await,
            CloseStrategy::Unset => Err(ShardFailure::new(
                "close choice must be 'minimize-to-tray' or 'quit'",
            )),
        }
    }

    async fn quit(&self) -> Result<CloseDecision, ShardFailure> {
        self.app.call("beginShutdown", vec![]).await?;
        info!("Close resolved to quit");
        Ok(CloseDecision::Quit)
    }
}

#[async_trait]
impl Shard for ClosePolicy {
    fn operations(&self) -> &[&'static str] {
        OPERATIONS
    }

    async fn call(&self, operation: &str, args: Vec<Value>) -> Result<Value, ShardFailure> {
        match operation {
            "setStrategy" => {
                let strategy: CloseStrategy = arg(&args, 0, "strategy")?;
                self.set_strategy(strategy)?;
                Ok(Value::Null)
            }
            "requestClose" => Ok(json!(self.request_close().await?)),
            "answerClose" => {
                let choice: CloseStrategy = arg(&args, 0, "choice")?;
                let remember: Option<bool> = arg(&args, 1, "remember")?;
                Ok(json!(
                    self.answer_close(choice, remember.unwrap_or_default()).await?
                ))
            }
            other => Err(unhandled(other)),
        }
    }
}
