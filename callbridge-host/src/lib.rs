//! callbridge-host: call correlation runtime for plugins
//!
//! A plugin operation often cannot finish on its own: it needs a permission
//! prompt, an external activity, or an event that fires later. This crate
//! keeps the waiting call, hands the host a request id, and resumes the
//! right continuation when the host answers, at most once.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! use callbridge_api::{PermissionGroup, PluginDescriptor};
//! use callbridge_host::{
//!     Call, CollectingSink, CorrelationEngine, EnginePresets, LauncherRegistry, RecordingHost,
//! };
//!
//! let descriptor = PluginDescriptor::new("Camera")
//!     .permission(PermissionGroup::new("camera", ["CAMERA"]));
//! let host = Arc::new(RecordingHost::new());
//! let mut engine = CorrelationEngine::new(
//!     descriptor,
//!     LauncherRegistry::new(),
//!     EnginePresets::testing(Arc::clone(&host)),
//! )
//! .unwrap();
//!
//! let sink = Arc::new(CollectingSink::new());
//! engine.invoke(Call::new("cb-1", "requestPermissions", Default::default(), sink.clone()));
//!
//! // Later, the host answers the prompt
//! let (request, _) = host.last_permission_request().unwrap();
//! engine.on_permission_result(request, HashMap::from([("CAMERA".to_string(), true)]));
//!
//! assert_eq!(sink.count(), 1);
//! ```

pub mod actor;
pub mod audit;
pub mod call;
pub mod config;
pub mod engine;
pub mod events;
pub mod permission;
pub mod persistence;
pub mod registry;
pub mod tracing_support;

pub use actor::{ActorError, EngineActor, EngineCommand, EngineHandle};
pub use audit::{
    AuditDetails, AuditError, AuditEvent, AuditEventType, AuditSink, CompositeAuditSink,
    FileAuditSink, MemoryAuditSink, NullAuditSink,
};
pub use call::{
    Call, CallResponder, ChannelSink, CollectingSink, DeliveryError, ResponseSink,
};
pub use config::{
    ConfigError, EngineConfig, EngineConfigBuilder, EnginePresets, DEFAULT_MAX_SNAPSHOT_BYTES,
};
pub use engine::{
    CorrelationEngine, EngineError, MethodHandler, NoopRestore, RequestOutcome, ResponseOutcome,
    RestoreHandler,
};
pub use events::{EventHub, NotifyOutcome};
pub use permission::{
    AutoHost, HostBridge, HostError, HostLaunch, LauncherError, LauncherRegistry,
    PermissionResolver, RecordingHost, ResolveError,
};
pub use persistence::{
    FileSnapshotStore, MemorySnapshotStore, ReadOnlySnapshotStore, SnapshotError, SnapshotStore,
};
pub use registry::{CallRegistry, RegistryError};
pub use callbridge_api::{
    ActivityResult, ActivityStatus, CallId, CallResponse, CallSnapshot, PermissionGroup,
    PermissionState, PermissionStates, PluginDescriptor, RequestId,
};
