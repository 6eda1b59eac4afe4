//! Pending calls and the sinks their responses flow into
//!
//! A [`Call`] is the unit of work a caller is waiting on. Responses never
//! go through the call registry: each call carries a [`CallResponder`] that
//! can be cloned into event subscriptions and invoked from continuations.

use callbridge_api::{CallFailure, CallId, CallResponse};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc;

/// Error type for response delivery
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Response channel closed for call {0}")]
    Closed(CallId),

    #[error("Delivery failed for call {call}: {reason}")]
    Failed { call: CallId, reason: String },
}

/// Destination of call responses
///
/// The embedding layer implements this to forward resolutions and
/// rejections back to whoever issued the call.
pub trait ResponseSink: Send + Sync {
    /// Deliver one response for a call
    fn deliver(&self, call: &CallId, response: CallResponse) -> Result<(), DeliveryError>;
}

impl<T: ResponseSink + ?Sized> ResponseSink for Arc<T> {
    fn deliver(&self, call: &CallId, response: CallResponse) -> Result<(), DeliveryError> {
        (**self).deliver(call, response)
    }
}

/// Handle used to respond to a specific call
#[derive(Clone)]
pub struct CallResponder {
    call_id: CallId,
    sink: Arc<dyn ResponseSink>,
}

impl CallResponder {
    pub fn new(call_id: CallId, sink: Arc<dyn ResponseSink>) -> Self {
        Self { call_id, sink }
    }

    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }

    pub fn resolve(&self, payload: Option<Value>) -> Result<(), DeliveryError> {
        self.sink
            .deliver(&self.call_id, CallResponse::Resolved(payload))
    }

    pub fn reject(&self, message: &str, code: Option<&str>) -> Result<(), DeliveryError> {
        self.sink.deliver(
            &self.call_id,
            CallResponse::Rejected(CallFailure {
                message: message.to_string(),
                code: code.map(str::to_string),
            }),
        )
    }
}

impl fmt::Debug for CallResponder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallResponder")
            .field("call_id", &self.call_id)
            .finish_non_exhaustive()
    }
}

/// A pending unit of work awaiting a terminal response
pub struct Call {
    id: CallId,
    method: String,
    data: Map<String, Value>,
    saved: bool,
    released: bool,
    responder: CallResponder,
}

impl Call {
    pub fn new(
        id: impl Into<CallId>,
        method: impl Into<String>,
        data: Map<String, Value>,
        sink: Arc<dyn ResponseSink>,
    ) -> Self {
        let id = id.into();
        Self {
            responder: CallResponder::new(id.clone(), sink),
            id,
            method: method.into(),
            data,
            saved: false,
            released: false,
        }
    }

    pub fn id(&self) -> &CallId {
        &self.id
    }

    /// Name of the exported operation that created this call
    pub fn method_name(&self) -> &str {
        &self.method
    }

    /// Input parameters
    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.data.get(key).and_then(Value::as_bool)
    }

    /// String elements of an array parameter; non-string elements are skipped
    pub fn get_array_of_strings(&self, key: &str) -> Option<Vec<String>> {
        let items = self.data.get(key)?.as_array()?;
        Some(
            items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect(),
        )
    }

    /// Clone of the response handle, e.g. for event subscriptions
    pub fn responder(&self) -> CallResponder {
        self.responder.clone()
    }

    pub fn resolve(&self, payload: Value) {
        self.respond(Some(payload));
    }

    /// Resolve without a payload (undefined)
    pub fn resolve_empty(&self) {
        self.respond(None);
    }

    pub fn reject(&self, message: &str) {
        self.reject_with_code(message, None);
    }

    pub fn reject_with_code(&self, message: &str, code: Option<&str>) {
        if self.released {
            tracing::warn!(call = %self.id, "Rejecting a released call ignored");
            return;
        }
        if let Err(e) = self.responder.reject(message, code) {
            tracing::warn!(call = %self.id, error = %e, "Failed to deliver rejection");
        }
    }

    fn respond(&self, payload: Option<Value>) {
        if self.released {
            tracing::warn!(call = %self.id, "Resolving a released call ignored");
            return;
        }
        if let Err(e) = self.responder.resolve(payload) {
            tracing::warn!(call = %self.id, error = %e, "Failed to deliver resolution");
        }
    }

    /// Keep this call alive past its first response
    pub fn save(&mut self) {
        self.saved = true;
    }

    pub fn unsave(&mut self) {
        self.saved = false;
    }

    pub fn is_saved(&self) -> bool {
        self.saved
    }

    /// Mark the call released; it must not respond afterwards
    pub fn release(&mut self) {
        self.saved = false;
        self.released = true;
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl fmt::Debug for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("saved", &self.saved)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Channel Sink
// ============================================================================

/// Sink that forwards responses into a tokio channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<(CallId, CallResponse)>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(CallId, CallResponse)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ResponseSink for ChannelSink {
    fn deliver(&self, call: &CallId, response: CallResponse) -> Result<(), DeliveryError> {
        self.tx
            .send((call.clone(), response))
            .map_err(|_| DeliveryError::Closed(call.clone()))
    }
}

// ============================================================================
// Collecting Sink (for testing)
// ============================================================================

/// Sink that keeps every response in memory
#[derive(Debug, Default)]
pub struct CollectingSink {
    responses: Mutex<Vec<(CallId, CallResponse)>>,
    failing: Mutex<HashSet<CallId>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make deliveries to this call fail
    pub fn fail_for(&self, call: impl Into<CallId>) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(call.into());
    }

    pub fn responses(&self) -> Vec<(CallId, CallResponse)> {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Responses delivered to one call, in order
    pub fn responses_for(&self, call: &str) -> Vec<CallResponse> {
        self.responses()
            .into_iter()
            .filter(|(id, _)| id.as_str() == call)
            .map(|(_, response)| response)
            .collect()
    }

    pub fn count(&self) -> usize {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl ResponseSink for CollectingSink {
    fn deliver(&self, call: &CallId, response: CallResponse) -> Result<(), DeliveryError> {
        let failing = self
            .failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(call);
        if failing {
            return Err(DeliveryError::Failed {
                call: call.clone(),
                reason: "configured to fail".to_string(),
            });
        }
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((call.clone(), response));
        Ok(())
    }
}
