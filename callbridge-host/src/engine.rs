//! Correlation engine
//!
//! Owns one plugin instance's calls, pending host requests, event
//! subscriptions and persisted-call slot. Every mutation goes through
//! `&mut self`; wrap the engine in an [`EngineActor`](crate::EngineActor)
//! when host callbacks arrive from several threads.
//!
//! ```text
//! request ──► resolve launcher ──► resolve aliases ──┬─► nothing declared ──► resolve(undefined)
//!                                                    ├─► auto-grant only ───► continuation
//!                                                    └─► store call, launch prompt
//!                                                              │
//! host result ──► pending[request] ──► take call ──► states ──► continuation ──► release unless saved
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use callbridge_api::{
    states_to_value, ActivityResult, CallId, CallSnapshot, PermissionState, PermissionStates,
    PluginDescriptor, RequestId,
};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::audit::{self, AuditDetails, AuditEvent, AuditEventType, AuditSink};
use crate::call::{Call, ResponseSink};
use crate::config::{ConfigError, EngineConfig};
use crate::events::{EventHub, NotifyOutcome};
use crate::permission::{
    HostBridge, HostError, Launcher, LauncherError, LauncherRegistry, PermissionResolver,
    ResolveError,
};
use crate::persistence::{decode_snapshot, encode_snapshot, SnapshotError, SnapshotStore};
use crate::registry::{CallRegistry, RegistryError};

/// Handler for a plugin-defined operation
pub type MethodHandler = Arc<dyn Fn(&mut CorrelationEngine, Call) + Send + Sync>;

/// Error type for engine operations
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Launcher(#[from] LauncherError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Host(#[from] HostError),

    #[error("Missing the following permissions in the host manifest: {0:?}")]
    UndeclaredPermissions(Vec<String>),

    #[error("Persisted-call slot is held by call {held}")]
    SlotOccupied { held: CallId },

    #[error("No pending call with id {0}")]
    UnknownCall(CallId),

    #[error("No pending request {0}; response dropped")]
    StaleResponse(RequestId),

    #[error("method not implemented")]
    MethodNotImplemented(String),

    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),
}

/// What happened to a permission or activity request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// The call was rejected synchronously
    Rejected,
    /// The call was answered without a host round-trip
    Delivered,
    /// Waiting for the host to answer this request
    AwaitingHost(RequestId),
}

/// What happened to a host answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseOutcome {
    Delivered,
    /// Unknown, duplicate or mismatched request; dropped
    Stale,
}

#[derive(Debug, Clone)]
enum PendingKind {
    Permission { operation: String },
    Activity { callback: String },
}

#[derive(Debug, Clone)]
struct PendingRequest {
    call_id: CallId,
    kind: PendingKind,
}

/// Receives the snapshot replayed after a restart
pub trait RestoreHandler {
    fn restore(&self, engine: &mut CorrelationEngine, snapshot: CallSnapshot);
}

impl<F> RestoreHandler for F
where
    F: Fn(&mut CorrelationEngine, CallSnapshot),
{
    fn restore(&self, engine: &mut CorrelationEngine, snapshot: CallSnapshot) {
        self(engine, snapshot)
    }
}

/// Discards restored snapshots
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRestore;

impl RestoreHandler for NoopRestore {
    fn restore(&self, _engine: &mut CorrelationEngine, snapshot: CallSnapshot) {
        tracing::debug!(plugin = %snapshot.plugin_id, method = %snapshot.method, "Snapshot restore ignored");
    }
}

/// Permission and activity correlation for one plugin instance
pub struct CorrelationEngine {
    descriptor: PluginDescriptor,
    resolver: PermissionResolver,
    launchers: LauncherRegistry,
    calls: CallRegistry,
    events: EventHub,
    pending: HashMap<RequestId, PendingRequest>,
    next_request: u64,
    persist_slot: Option<CallId>,
    methods: HashMap<String, MethodHandler>,
    host: Arc<dyn HostBridge>,
    snapshots: Arc<dyn SnapshotStore>,
    audit: Arc<dyn AuditSink>,
    max_snapshot_bytes: usize,
}

impl CorrelationEngine {
    /// Create an engine, checking that every operation declaring a
    /// permission callback has one bound
    pub fn new(
        descriptor: PluginDescriptor,
        launchers: LauncherRegistry,
        config: EngineConfig,
    ) -> Result<Self, ConfigError> {
        if let Err(e) = launchers.verify(&descriptor) {
            tracing::error!(plugin = %descriptor.id, error = %e, "Launcher verification failed");
            return Err(e.into());
        }

        tracing::debug!(
            plugin = %descriptor.id,
            groups = descriptor.permissions.len(),
            operations = descriptor.operations.len(),
            "Engine created"
        );

        Ok(Self {
            resolver: PermissionResolver::new(descriptor.permissions.clone()),
            descriptor,
            launchers,
            calls: CallRegistry::new(),
            events: EventHub::new(),
            pending: HashMap::new(),
            next_request: 0,
            persist_slot: None,
            methods: HashMap::new(),
            host: config.host,
            snapshots: config.snapshots,
            audit: config.audit,
            max_snapshot_bytes: config.max_snapshot_bytes,
        })
    }

    pub fn plugin_id(&self) -> &str {
        &self.descriptor.id
    }

    pub fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    /// Free-form plugin configuration
    pub fn config(&self) -> &Map<String, Value> {
        &self.descriptor.config
    }

    /// Typed configuration lookup; `None` if absent or of another shape
    pub fn config_value<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.descriptor.config.get(key)?;
        match serde_json::from_value(value.clone()) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::debug!(plugin = %self.descriptor.id, key = %key, error = %e, "Config value has unexpected shape");
                None
            }
        }
    }

    pub fn calls(&self) -> &CallRegistry {
        &self.calls
    }

    pub fn calls_mut(&mut self) -> &mut CallRegistry {
        &mut self.calls
    }

    pub fn events(&self) -> &EventHub {
        &self.events
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, request: RequestId) -> bool {
        self.pending.contains_key(&request)
    }

    pub fn persist_slot(&self) -> Option<&CallId> {
        self.persist_slot.as_ref()
    }

    // ========================================================================
    // Operation routing
    // ========================================================================

    /// Register a handler for a plugin-defined operation
    ///
    /// Registered handlers take precedence over the built-in operations.
    pub fn register_method<F>(&mut self, name: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(&mut CorrelationEngine, Call) + Send + Sync + 'static,
    {
        self.methods.insert(name.into(), Arc::new(handler));
        self
    }

    /// Route a call to the operation named by its method
    pub fn invoke(&mut self, call: Call) {
        let method = call.method_name().to_string();
        tracing::trace!(plugin = %self.descriptor.id, method = %method, call = %call.id(), "Invoking");

        if let Some(handler) = self.methods.get(&method).cloned() {
            handler(self, call);
            return;
        }

        match method.as_str() {
            "requestPermissions" => {
                let aliases = call.get_array_of_strings("permissions").unwrap_or_default();
                self.request_permissions(call, &aliases);
            }
            "checkPermissions" => self.check_permissions_call(call),
            "addListener" => self.add_listener(call),
            "removeListener" => self.remove_listener(call),
            "removeAllListeners" => self.remove_all_listeners(call),
            _ => {
                let err = EngineError::MethodNotImplemented(method.clone());
                self.reject_call(call, &err);
            }
        }
    }

    // ========================================================================
    // Permission requests
    // ========================================================================

    /// Request permissions for the given aliases; an empty list requests
    /// every declared group
    ///
    /// Never blocks on the host. The continuation bound to the call's
    /// operation runs once the host answers through
    /// [`on_permission_result`](Self::on_permission_result).
    pub fn request_permissions(&mut self, call: Call, aliases: &[String]) -> RequestOutcome {
        let launcher = match self.launchers.resolve(call.method_name()) {
            Ok(launcher) => launcher,
            Err(e) => {
                self.reject_call(call, &e.into());
                return RequestOutcome::Rejected;
            }
        };

        let resolution = match self.resolver.resolve_requested(aliases) {
            Ok(resolution) => resolution,
            Err(e) => {
                self.reject_call(call, &e.into());
                return RequestOutcome::Rejected;
            }
        };

        if resolution.is_empty() {
            tracing::debug!(plugin = %self.descriptor.id, call = %call.id(), "No permissions declared");
            let mut call = call;
            call.resolve_empty();
            call.release();
            return RequestOutcome::Delivered;
        }

        if !resolution.needs_host() {
            let states = resolution.auto_grant_states();
            self.record(audit::permission_resolved(
                &self.descriptor.id,
                call.method_name(),
                None,
                &states,
            ));
            self.complete(call, &launcher, &states);
            return RequestOutcome::Delivered;
        }

        let identifiers: Vec<String> = resolution.to_request.into_iter().collect();
        let undeclared: Vec<String> = identifiers
            .iter()
            .filter(|id| !self.host.is_declared(id))
            .cloned()
            .collect();
        if !undeclared.is_empty() {
            self.reject_call(call, &EngineError::UndeclaredPermissions(undeclared));
            return RequestOutcome::Rejected;
        }

        let operation = call.method_name().to_string();
        let kind = PendingKind::Permission {
            operation: operation.clone(),
        };
        let Some((request, call_id)) = self.dispatch(call, kind) else {
            return RequestOutcome::Rejected;
        };
        if let Err(e) = self
            .host
            .launch_permission_prompt(&self.descriptor.id, request, &identifiers)
        {
            self.abort_dispatch(request, &call_id, e.into());
            return RequestOutcome::Rejected;
        }

        tracing::info!(
            plugin = %self.descriptor.id,
            method = %operation,
            request = %request,
            identifiers = ?identifiers,
            "Permission prompt launched"
        );
        self.record(audit::permission_requested(
            &self.descriptor.id,
            &operation,
            request,
            &identifiers,
        ));
        RequestOutcome::AwaitingHost(request)
    }

    /// Request every declared group through the call's bound launcher
    pub fn request_all_permissions(&mut self, call: Call) -> RequestOutcome {
        self.request_permissions(call, &[])
    }

    pub fn request_permission_for_alias(&mut self, alias: &str, call: Call) -> RequestOutcome {
        self.request_permission_for_aliases(&[alias.to_string()], call)
    }

    /// Like [`request_permissions`](Self::request_permissions), but an empty
    /// alias list is an error
    pub fn request_permission_for_aliases(&mut self, aliases: &[String], call: Call) -> RequestOutcome {
        if aliases.is_empty() {
            self.reject_call(call, &ResolveError::NoAliasProvided.into());
            return RequestOutcome::Rejected;
        }
        self.request_permissions(call, aliases)
    }

    /// Host answer to a permission prompt
    ///
    /// `raw` maps raw identifiers to whether they were granted. Declared
    /// identifiers missing from the answer fall back to the host's current
    /// status. Unknown or already answered requests are dropped.
    pub fn on_permission_result(
        &mut self,
        request: RequestId,
        raw: HashMap<String, bool>,
    ) -> ResponseOutcome {
        let operation = match self.pending.get(&request) {
            Some(PendingRequest {
                kind: PendingKind::Permission { operation },
                ..
            }) => operation.clone(),
            _ => return self.stale(request),
        };
        let Some(pending) = self.pending.remove(&request) else {
            return self.stale(request);
        };
        let Some(call) = self.calls.take(&pending.call_id) else {
            return self.stale(request);
        };

        let merged: HashMap<String, bool> = self
            .resolver
            .all_identifiers()
            .into_iter()
            .map(|id| {
                let granted = raw
                    .get(&id)
                    .copied()
                    .unwrap_or_else(|| self.host.permission_status(&id).is_granted());
                (id, granted)
            })
            .collect();
        let states = self.resolver.states_from_raw_results(&merged);

        tracing::info!(
            plugin = %self.descriptor.id,
            method = %operation,
            request = %request,
            "Permission result received"
        );
        self.record(audit::permission_resolved(
            &self.descriptor.id,
            &operation,
            Some(request),
            &states,
        ));

        match self.launchers.resolve(&operation) {
            Ok(launcher) => self.complete(call, &launcher, &states),
            Err(e) => self.reject_call(call, &e.into()),
        }
        ResponseOutcome::Delivered
    }

    // ========================================================================
    // Permission status helpers
    // ========================================================================

    /// Per-alias states from the host's current statuses, without prompting
    pub fn check_permissions(&self) -> PermissionStates {
        self.resolver
            .states_from_statuses(|id| self.host.permission_status(id))
    }

    /// Answer a call with [`check_permissions`](Self::check_permissions);
    /// resolves without a payload when no groups are declared
    pub fn check_permissions_call(&mut self, mut call: Call) {
        if self.resolver.has_groups() {
            call.resolve(states_to_value(&self.check_permissions()));
        } else {
            call.resolve_empty();
        }
        call.release();
    }

    /// Whether one raw identifier is currently granted
    pub fn has_permission(&self, identifier: &str) -> bool {
        self.host.permission_status(identifier) == PermissionState::Granted
    }

    /// Whether every declared raw identifier is currently granted
    pub fn has_required_permissions(&self) -> bool {
        self.resolver
            .all_identifiers()
            .iter()
            .all(|id| self.has_permission(id))
    }

    /// Whether the host manifest declares every given identifier
    pub fn has_defined_permissions(&self, identifiers: &[&str]) -> bool {
        identifiers.iter().all(|id| self.host.is_declared(id))
    }

    /// Whether the host manifest declares every identifier of every group
    pub fn has_defined_required_permissions(&self) -> bool {
        self.resolver
            .all_identifiers()
            .iter()
            .all(|id| self.host.is_declared(id))
    }

    // ========================================================================
    // Listeners
    // ========================================================================

    /// Save the call and subscribe it to the event named by `eventName`
    pub fn add_listener(&mut self, mut call: Call) {
        let Some(event) = call.get_str("eventName").map(str::to_string) else {
            self.reject_call(call, &EngineError::MissingParameter("eventName"));
            return;
        };
        if self.calls.contains(call.id()) {
            let err = EngineError::Registry(RegistryError::DuplicateId(call.id().clone()));
            self.reject_call(call, &err);
            return;
        }

        call.save();
        let responder = call.responder();
        if let Err(e) = self.calls.save(call) {
            tracing::error!(plugin = %self.descriptor.id, error = %e, "Failed to store listener call");
            return;
        }
        tracing::debug!(plugin = %self.descriptor.id, event = %event, call = %responder.call_id(), "Listener added");
        self.events.subscribe(&event, responder);
    }

    /// Unsubscribe and release the listener call named by `callbackId`
    ///
    /// Only a call subscribed to `eventName` is released; other saved calls
    /// and listeners of other events are left alone.
    pub fn remove_listener(&mut self, mut call: Call) {
        let event = call.get_str("eventName").map(str::to_string);
        let callback = call.get_str("callbackId").map(CallId::new);

        if let (Some(event), Some(callback)) = (event, callback) {
            if self.events.unsubscribe(&event, &callback) {
                self.calls.release(&callback);
                self.clear_slot_if(&callback);
                tracing::debug!(plugin = %self.descriptor.id, event = %event, call = %callback, "Listener removed");
            } else {
                tracing::debug!(plugin = %self.descriptor.id, event = %event, call = %callback, "No such listener");
            }
        }
        call.resolve_empty();
        call.release();
    }

    /// Drop every subscription and release the listener calls
    pub fn remove_all_listeners(&mut self, mut call: Call) {
        let released = self.release_listeners();
        tracing::debug!(plugin = %self.descriptor.id, released, "All listeners removed");
        call.resolve_empty();
        call.release();
    }

    /// Deliver a payload to the event's subscribers, or retain it for the
    /// first future subscriber
    pub fn notify_listeners(&mut self, event: &str, payload: Value, retain: bool) -> NotifyOutcome {
        let outcome = self.events.notify(event, payload, retain);
        if outcome == NotifyOutcome::Retained {
            self.record(AuditEvent::new(
                AuditEventType::EventRetained,
                &self.descriptor.id,
                AuditDetails::Event {
                    name: event.to_string(),
                },
            ));
        }
        outcome
    }

    pub fn has_listeners(&self, event: &str) -> bool {
        self.events.has_subscribers(event)
    }

    // ========================================================================
    // External activities
    // ========================================================================

    /// Store the call and ask the host to start an activity for it
    ///
    /// The activity continuation bound under `callback` runs once the host
    /// answers through [`on_activity_result`](Self::on_activity_result).
    pub fn start_activity_for_result(&mut self, call: Call, intent: Value, callback: &str) -> RequestOutcome {
        if let Err(e) = self.launchers.resolve_activity(callback) {
            self.reject_call(call, &e.into());
            return RequestOutcome::Rejected;
        }

        let kind = PendingKind::Activity {
            callback: callback.to_string(),
        };
        let Some((request, call_id)) = self.dispatch(call, kind) else {
            return RequestOutcome::Rejected;
        };
        if let Err(e) = self
            .host
            .launch_activity(&self.descriptor.id, request, &call_id, &intent)
        {
            self.abort_dispatch(request, &call_id, e.into());
            return RequestOutcome::Rejected;
        }

        tracing::info!(plugin = %self.descriptor.id, request = %request, call = %call_id, "Activity launched");
        self.record(AuditEvent::new(
            AuditEventType::ActivityLaunched,
            &self.descriptor.id,
            AuditDetails::Activity {
                request,
                call: call_id.to_string(),
            },
        ));
        RequestOutcome::AwaitingHost(request)
    }

    /// Host answer to an activity launch
    pub fn on_activity_result(&mut self, request: RequestId, result: ActivityResult) -> ResponseOutcome {
        let callback = match self.pending.get(&request) {
            Some(PendingRequest {
                kind: PendingKind::Activity { callback },
                ..
            }) => callback.clone(),
            _ => return self.stale(request),
        };
        let Some(pending) = self.pending.remove(&request) else {
            return self.stale(request);
        };
        let Some(mut call) = self.calls.take(&pending.call_id) else {
            return self.stale(request);
        };

        tracing::debug!(plugin = %self.descriptor.id, request = %request, status = ?result.status, "Activity result received");
        match self.launchers.resolve_activity(&callback) {
            Ok(continuation) => {
                continuation(&mut call, &result);
                self.settle(call);
            }
            Err(e) => self.reject_call(call, &e.into()),
        }
        ResponseOutcome::Delivered
    }

    // ========================================================================
    // Teardown and restore
    // ========================================================================

    /// Mark a pending call as the one to snapshot on teardown
    pub fn persist_on_teardown(&mut self, call: &CallId) -> Result<(), EngineError> {
        if !self.calls.contains(call) {
            return Err(EngineError::UnknownCall(call.clone()));
        }
        if let Some(held) = &self.persist_slot {
            if held != call && self.calls.contains(held) {
                return Err(EngineError::SlotOccupied { held: held.clone() });
            }
        }
        tracing::debug!(plugin = %self.descriptor.id, call = %call, "Call marked for persistence");
        self.persist_slot = Some(call.clone());
        Ok(())
    }

    /// Write the persisted call's input to the snapshot store
    ///
    /// Returns the encoded size, or `None` when there was nothing to save.
    pub fn save_instance_state(&self) -> Result<Option<usize>, EngineError> {
        let Some(slot) = &self.persist_slot else {
            return Ok(None);
        };
        let Some(call) = self.calls.get(slot) else {
            tracing::debug!(plugin = %self.descriptor.id, call = %slot, "Persisted call no longer pending");
            return Ok(None);
        };

        let snapshot = CallSnapshot::new(&self.descriptor.id, call.method_name(), call.data().clone());
        let bytes = encode_snapshot(&snapshot, self.max_snapshot_bytes)?;
        let size = bytes.len();
        self.snapshots.put(&self.descriptor.id, bytes)?;

        tracing::info!(plugin = %self.descriptor.id, call = %slot, bytes = size, "Snapshot saved");
        self.record(
            AuditEvent::new(
                AuditEventType::SnapshotSaved,
                &self.descriptor.id,
                AuditDetails::Snapshot { bytes: size },
            )
            .with_method(call.method_name()),
        );
        Ok(Some(size))
    }

    /// Consume the stored snapshot, if any, and hand it to `handler`
    pub fn restore_state(&mut self, handler: &dyn RestoreHandler) -> Result<bool, EngineError> {
        let Some(bytes) = self.snapshots.take(&self.descriptor.id)? else {
            return Ok(false);
        };
        let snapshot = decode_snapshot(&bytes)?;

        tracing::info!(plugin = %self.descriptor.id, method = %snapshot.method, bytes = bytes.len(), "Snapshot restored");
        self.record(
            AuditEvent::new(
                AuditEventType::SnapshotRestored,
                &self.descriptor.id,
                AuditDetails::Snapshot { bytes: bytes.len() },
            )
            .with_method(snapshot.method.clone()),
        );
        handler.restore(self, snapshot);
        Ok(true)
    }

    /// Rebuild a call from a restored snapshot under a fresh id
    pub fn restored_call(&mut self, snapshot: CallSnapshot, sink: Arc<dyn ResponseSink>) -> Call {
        let id = self.calls.generate_id();
        Call::new(id, snapshot.method, snapshot.data, sink)
    }

    /// Snapshot the persisted call, then drop every subscription and
    /// pending call
    pub fn teardown(&mut self) -> Result<Option<usize>, EngineError> {
        let saved = self.save_instance_state();
        if let Err(e) = &saved {
            tracing::error!(plugin = %self.descriptor.id, error = %e, "Snapshot on teardown failed");
        }

        self.events.clear_all();
        let released = self.calls.release_all();
        self.pending.clear();
        self.persist_slot = None;
        if let Err(e) = self.audit.flush() {
            tracing::warn!(plugin = %self.descriptor.id, error = %e, "Failed to flush audit sink");
        }

        tracing::info!(plugin = %self.descriptor.id, released, "Engine torn down");
        saved
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn next_request_id(&mut self) -> RequestId {
        self.next_request += 1;
        RequestId::new(self.next_request)
    }

    /// Store a call for a host round-trip under a fresh request id
    ///
    /// Rejects the call when its id is already pending.
    fn dispatch(&mut self, call: Call, kind: PendingKind) -> Option<(RequestId, CallId)> {
        let call_id = call.id().clone();
        if self.calls.contains(&call_id) {
            self.reject_call(call, &RegistryError::DuplicateId(call_id).into());
            return None;
        }
        if let Err(e) = self.calls.save(call) {
            tracing::error!(plugin = %self.descriptor.id, error = %e, "Failed to store call");
            return None;
        }
        let request = self.next_request_id();
        self.pending.insert(
            request,
            PendingRequest {
                call_id: call_id.clone(),
                kind,
            },
        );
        Some((request, call_id))
    }

    fn abort_dispatch(&mut self, request: RequestId, call_id: &CallId, err: EngineError) {
        self.pending.remove(&request);
        self.clear_slot_if(call_id);
        if let Some(call) = self.calls.take(call_id) {
            self.reject_call(call, &err);
        }
    }

    /// Run the continuation, then release the call unless it was saved
    fn complete(&mut self, mut call: Call, launcher: &Launcher, states: &PermissionStates) {
        launcher.deliver(&mut call, states);
        self.settle(call);
    }

    fn settle(&mut self, mut call: Call) {
        if call.is_released() {
            self.clear_slot_if(&call.id().clone());
            return;
        }
        if call.is_saved() {
            let id = call.id().clone();
            if let Err(e) = self.calls.save(call) {
                tracing::warn!(plugin = %self.descriptor.id, call = %id, error = %e, "Saved call dropped");
            }
            return;
        }
        let id = call.id().clone();
        call.release();
        self.clear_slot_if(&id);
        tracing::trace!(plugin = %self.descriptor.id, call = %id, "Call released after continuation");
    }

    fn release_listeners(&mut self) -> usize {
        let ids = self.events.clear_all();
        let mut released = 0;
        for id in &ids {
            if self.calls.release(id) {
                released += 1;
            }
            self.clear_slot_if(id);
        }
        released
    }

    fn clear_slot_if(&mut self, call: &CallId) {
        if self.persist_slot.as_ref() == Some(call) {
            self.persist_slot = None;
        }
    }

    fn reject_call(&self, mut call: Call, err: &EngineError) {
        let reason = err.to_string();
        tracing::warn!(
            plugin = %self.descriptor.id,
            method = %call.method_name(),
            call = %call.id(),
            error = %reason,
            "Call rejected"
        );
        self.record(
            audit::call_rejected(&self.descriptor.id, call.method_name(), &reason).with_call(call.id()),
        );
        call.reject(&reason);
        call.release();
    }

    fn stale(&self, request: RequestId) -> ResponseOutcome {
        tracing::debug!(
            plugin = %self.descriptor.id,
            error = %EngineError::StaleResponse(request),
            "Stale host response"
        );
        self.record(audit::stale_response(&self.descriptor.id, request));
        ResponseOutcome::Stale
    }

    fn record(&self, event: AuditEvent) {
        if let Err(e) = self.audit.record(event) {
            tracing::warn!(plugin = %self.descriptor.id, error = %e, "Failed to record audit event");
        }
    }
}

impl fmt::Debug for CorrelationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CorrelationEngine")
            .field("plugin", &self.descriptor.id)
            .field("calls", &self.calls.len())
            .field("pending", &self.pending.len())
            .field("launchers", &self.launchers)
            .field("persist_slot", &self.persist_slot)
            .finish_non_exhaustive()
    }
}
