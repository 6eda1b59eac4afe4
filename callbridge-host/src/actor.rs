//! Single-writer queue in front of a [`CorrelationEngine`]
//!
//! Host callbacks may arrive on any thread. Each of them posts an
//! [`EngineCommand`] through a cloned [`EngineHandle`]; one task drains the
//! queue and is the only code touching the engine.

use std::collections::HashMap;

use callbridge_api::{ActivityResult, RequestId};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::call::Call;
use crate::engine::{CorrelationEngine, EngineError};

/// Error type for actor handles
#[derive(Debug, Error)]
pub enum ActorError {
    #[error("Engine actor has stopped")]
    Stopped,

    #[error(transparent)]
    Engine(#[from] EngineError),
}

type ExecFn = Box<dyn FnOnce(&mut CorrelationEngine) + Send>;

/// Work item for the engine task
pub enum EngineCommand {
    Invoke(Call),
    PermissionResult {
        request: RequestId,
        raw: HashMap<String, bool>,
    },
    ActivityResult {
        request: RequestId,
        result: ActivityResult,
    },
    Notify {
        event: String,
        payload: Value,
        retain: bool,
    },
    Exec(ExecFn),
    /// Snapshot, clear, and stop the actor
    Teardown {
        reply: oneshot::Sender<Result<Option<usize>, EngineError>>,
    },
}

impl std::fmt::Debug for EngineCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Invoke(call) => f.debug_tuple("Invoke").field(call).finish(),
            Self::PermissionResult { request, .. } => f
                .debug_struct("PermissionResult")
                .field("request", request)
                .finish_non_exhaustive(),
            Self::ActivityResult { request, result } => f
                .debug_struct("ActivityResult")
                .field("request", request)
                .field("status", &result.status)
                .finish(),
            Self::Notify { event, retain, .. } => f
                .debug_struct("Notify")
                .field("event", event)
                .field("retain", retain)
                .finish_non_exhaustive(),
            Self::Exec(_) => f.write_str("Exec"),
            Self::Teardown { .. } => f.write_str("Teardown"),
        }
    }
}

/// Cloneable sender side of the engine queue
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<EngineCommand>,
}

impl EngineHandle {
    pub fn send(&self, command: EngineCommand) -> Result<(), ActorError> {
        self.tx.send(command).map_err(|_| ActorError::Stopped)
    }

    pub fn invoke(&self, call: Call) -> Result<(), ActorError> {
        self.send(EngineCommand::Invoke(call))
    }

    pub fn permission_result(
        &self,
        request: RequestId,
        raw: HashMap<String, bool>,
    ) -> Result<(), ActorError> {
        self.send(EngineCommand::PermissionResult { request, raw })
    }

    pub fn activity_result(&self, request: RequestId, result: ActivityResult) -> Result<(), ActorError> {
        self.send(EngineCommand::ActivityResult { request, result })
    }

    pub fn notify(&self, event: impl Into<String>, payload: Value, retain: bool) -> Result<(), ActorError> {
        self.send(EngineCommand::Notify {
            event: event.into(),
            payload,
            retain,
        })
    }

    /// Run a closure on the engine task and wait for its result
    pub async fn with_engine<F, R>(&self, f: F) -> Result<R, ActorError>
    where
        F: FnOnce(&mut CorrelationEngine) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        self.send(EngineCommand::Exec(Box::new(move |engine: &mut CorrelationEngine| {
            let _ = reply.send(f(engine));
        })))?;
        rx.await.map_err(|_| ActorError::Stopped)
    }

    /// Tear the engine down and stop the actor
    pub async fn teardown(&self) -> Result<Option<usize>, ActorError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineCommand::Teardown { reply })?;
        let saved = rx.await.map_err(|_| ActorError::Stopped)??;
        Ok(saved)
    }
}

/// Task owning the engine
#[derive(Debug)]
pub struct EngineActor {
    engine: CorrelationEngine,
    rx: mpsc::UnboundedReceiver<EngineCommand>,
}

impl EngineActor {
    pub fn new(engine: CorrelationEngine) -> (Self, EngineHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { engine, rx }, EngineHandle { tx })
    }

    /// Spawn the actor on the current tokio runtime
    pub fn spawn(engine: CorrelationEngine) -> (EngineHandle, JoinHandle<CorrelationEngine>) {
        let (actor, handle) = Self::new(engine);
        (handle, tokio::spawn(actor.run()))
    }

    /// Drain commands until teardown or until every handle is dropped
    pub async fn run(mut self) -> CorrelationEngine {
        tracing::debug!(plugin = %self.engine.plugin_id(), "Engine actor started");

        while let Some(command) = self.rx.recv().await {
            tracing::trace!(plugin = %self.engine.plugin_id(), command = ?command, "Engine command");
            match command {
                EngineCommand::Invoke(call) => self.engine.invoke(call),
                EngineCommand::PermissionResult { request, raw } => {
                    self.engine.on_permission_result(request, raw);
                }
                EngineCommand::ActivityResult { request, result } => {
                    self.engine.on_activity_result(request, result);
                }
                EngineCommand::Notify {
                    event,
                    payload,
                    retain,
                } => {
                    self.engine.notify_listeners(&event, payload, retain);
                }
                EngineCommand::Exec(f) => f(&mut self.engine),
                EngineCommand::Teardown { reply } => {
                    let result = self.engine.teardown();
                    if reply.send(result).is_err() {
                        tracing::debug!(plugin = %self.engine.plugin_id(), "Teardown reply dropped");
                    }
                    break;
                }
            }
        }

        tracing::debug!(plugin = %self.engine.plugin_id(), "Engine actor stopped");
        self.engine
    }
}
