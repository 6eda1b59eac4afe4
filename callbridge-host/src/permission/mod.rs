//! Permission request plumbing
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                        CorrelationEngine                      │
//! │  ┌──────────────┐   ┌──────────────────┐   ┌───────────────┐  │
//! │  │   Resolver   │   │ LauncherRegistry │   │  HostBridge   │  │
//! │  │              │   │                  │   │               │  │
//! │  │ alias → ids  │   │ op → continuation│   │ prompt        │  │
//! │  │ ids → states │   │ base fallback    │   │ activity      │  │
//! │  │              │   │                  │   │ status        │  │
//! │  └──────────────┘   └──────────────────┘   └───────────────┘  │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Resolver
//!
//! Maps requested aliases to the raw identifiers the host must prompt for,
//! separates auto-grant groups, and folds raw results back into per-alias
//! [`PermissionState`](callbridge_api::PermissionState)s.
//!
//! ## Launchers
//!
//! Each operation that requests permissions binds its continuation once,
//! before any call can reference it. `requestPermissions` falls back to the
//! base launcher, which answers the caller with the state map.
//!
//! ## Host
//!
//! - `AutoHost`: static statuses, launches are discarded
//! - `RecordingHost`: records launches (testing)

pub mod host;
pub mod launcher;
pub mod resolver;

// Re-exports for convenience
pub use host::{AutoHost, HostBridge, HostError, HostLaunch, RecordingHost};
pub use launcher::{
    ActivityCallback, Launcher, LauncherError, LauncherRegistry, PermissionCallback,
    DEFAULT_REQUEST_OPERATION,
};
pub use resolver::{PermissionResolver, Resolution, ResolveError};
