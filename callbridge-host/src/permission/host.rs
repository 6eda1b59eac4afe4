//! Host collaborator contract
//!
//! The host owns the actual permission dialogs and activity launches. Both
//! launches are fire-and-forget: the host answers later, at most once, by
//! feeding the result back into the engine under the same [`RequestId`].

use callbridge_api::{CallId, PermissionState, RequestId};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use thiserror::Error;

/// Error type for host launches
#[derive(Debug, Error)]
pub enum HostError {
    #[error("Host is not available: {0}")]
    Unavailable(String),

    #[error("Host launch failed: {0}")]
    LaunchFailed(String),
}

/// Host-side services consumed by the engine
///
/// # Example
///
/// ```rust
/// use callbridge_host::permission::{HostBridge, HostError};
/// use callbridge_api::{CallId, PermissionState, RequestId};
/// use serde_json::Value;
///
/// struct DesktopHost;
///
/// impl HostBridge for DesktopHost {
///     fn launch_permission_prompt(
///         &self,
///         _plugin: &str,
///         _request: RequestId,
///         _identifiers: &[String],
///     ) -> Result<(), HostError> {
///         // Show a dialog and answer through the engine handle later
///         Ok(())
///     }
///
///     fn launch_activity(
///         &self,
///         _plugin: &str,
///         _request: RequestId,
///         _call: &CallId,
///         _intent: &Value,
///     ) -> Result<(), HostError> {
///         Err(HostError::Unavailable("no activities on desktop".into()))
///     }
///
///     fn permission_status(&self, _identifier: &str) -> PermissionState {
///         PermissionState::Granted
///     }
/// }
/// ```
pub trait HostBridge: Send + Sync {
    /// Ask the host to prompt for raw identifiers
    fn launch_permission_prompt(
        &self,
        plugin: &str,
        request: RequestId,
        identifiers: &[String],
    ) -> Result<(), HostError>;

    /// Ask the host to start an external activity for a call
    fn launch_activity(
        &self,
        plugin: &str,
        request: RequestId,
        call: &CallId,
        intent: &Value,
    ) -> Result<(), HostError>;

    /// Current OS-level status of one raw identifier, without prompting
    fn permission_status(&self, identifier: &str) -> PermissionState;

    /// Whether the identifier is declared in the host application manifest
    fn is_declared(&self, identifier: &str) -> bool {
        let _ = identifier;
        true
    }
}

impl<T: HostBridge + ?Sized> HostBridge for Arc<T> {
    fn launch_permission_prompt(
        &self,
        plugin: &str,
        request: RequestId,
        identifiers: &[String],
    ) -> Result<(), HostError> {
        (**self).launch_permission_prompt(plugin, request, identifiers)
    }

    fn launch_activity(
        &self,
        plugin: &str,
        request: RequestId,
        call: &CallId,
        intent: &Value,
    ) -> Result<(), HostError> {
        (**self).launch_activity(plugin, request, call, intent)
    }

    fn permission_status(&self, identifier: &str) -> PermissionState {
        (**self).permission_status(identifier)
    }

    fn is_declared(&self, identifier: &str) -> bool {
        (**self).is_declared(identifier)
    }
}

// ============================================================================
// Auto Host (static statuses, launches go nowhere)
// ============================================================================

/// Host with fixed statuses whose launches never answer
#[derive(Debug)]
pub struct AutoHost {
    statuses: HashMap<String, PermissionState>,
    default_status: PermissionState,
    declared: Option<HashSet<String>>,
}

impl AutoHost {
    /// Every identifier reports `prompt`
    pub fn new() -> Self {
        Self {
            statuses: HashMap::new(),
            default_status: PermissionState::Prompt,
            declared: None,
        }
    }

    /// Every identifier reports `granted`
    pub fn all_granted() -> Self {
        Self {
            default_status: PermissionState::Granted,
            ..Self::new()
        }
    }

    pub fn with_status(mut self, identifier: impl Into<String>, state: PermissionState) -> Self {
        self.statuses.insert(identifier.into(), state);
        self
    }

    /// Restrict the manifest to the given identifiers
    pub fn with_declared<I, S>(mut self, identifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.declared = Some(identifiers.into_iter().map(Into::into).collect());
        self
    }
}

impl Default for AutoHost {
    fn default() -> Self {
        Self::new()
    }
}

impl HostBridge for AutoHost {
    fn launch_permission_prompt(
        &self,
        plugin: &str,
        request: RequestId,
        _identifiers: &[String],
    ) -> Result<(), HostError> {
        tracing::debug!(plugin = %plugin, request = %request, "Permission prompt discarded");
        Ok(())
    }

    fn launch_activity(
        &self,
        plugin: &str,
        request: RequestId,
        _call: &CallId,
        _intent: &Value,
    ) -> Result<(), HostError> {
        tracing::debug!(plugin = %plugin, request = %request, "Activity launch discarded");
        Ok(())
    }

    fn permission_status(&self, identifier: &str) -> PermissionState {
        self.statuses
            .get(identifier)
            .copied()
            .unwrap_or(self.default_status)
    }

    fn is_declared(&self, identifier: &str) -> bool {
        self.declared
            .as_ref()
            .map_or(true, |declared| declared.contains(identifier))
    }
}

// ============================================================================
// Recording Host (for testing)
// ============================================================================

/// A launch observed by [`RecordingHost`]
#[derive(Debug, Clone, PartialEq)]
pub enum HostLaunch {
    Permission {
        plugin: String,
        request: RequestId,
        identifiers: Vec<String>,
    },
    Activity {
        plugin: String,
        request: RequestId,
        call: CallId,
        intent: Value,
    },
}

impl HostLaunch {
    pub fn request(&self) -> RequestId {
        match self {
            Self::Permission { request, .. } | Self::Activity { request, .. } => *request,
        }
    }
}

/// Host that records every launch and serves mutable statuses
#[derive(Default)]
pub struct RecordingHost {
    launches: Mutex<Vec<HostLaunch>>,
    statuses: RwLock<HashMap<String, PermissionState>>,
    undeclared: RwLock<HashSet<String>>,
    fail_launches: RwLock<bool>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_status(&self, identifier: impl Into<String>, state: PermissionState) {
        self.statuses
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(identifier.into(), state);
    }

    /// Report an identifier as missing from the manifest
    pub fn set_undeclared(&self, identifier: impl Into<String>) {
        self.undeclared
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(identifier.into());
    }

    /// Make every later launch fail
    pub fn set_fail_launches(&self, fail: bool) {
        *self
            .fail_launches
            .write()
            .unwrap_or_else(PoisonError::into_inner) = fail;
    }

    pub fn launches(&self) -> Vec<HostLaunch> {
        self.launches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn launch_count(&self) -> usize {
        self.launches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Most recent permission launch as (request, identifiers)
    pub fn last_permission_request(&self) -> Option<(RequestId, Vec<String>)> {
        self.launches().into_iter().rev().find_map(|launch| match launch {
            HostLaunch::Permission {
                request,
                identifiers,
                ..
            } => Some((request, identifiers)),
            HostLaunch::Activity { .. } => None,
        })
    }

    /// Most recent activity launch as (request, call)
    pub fn last_activity_request(&self) -> Option<(RequestId, CallId)> {
        self.launches().into_iter().rev().find_map(|launch| match launch {
            HostLaunch::Activity { request, call, .. } => Some((request, call)),
            HostLaunch::Permission { .. } => None,
        })
    }

    fn record(&self, launch: HostLaunch) -> Result<(), HostError> {
        if *self
            .fail_launches
            .read()
            .unwrap_or_else(PoisonError::into_inner)
        {
            return Err(HostError::LaunchFailed("configured to fail".into()));
        }
        self.launches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(launch);
        Ok(())
    }
}

impl HostBridge for RecordingHost {
    fn launch_permission_prompt(
        &self,
        plugin: &str,
        request: RequestId,
        identifiers: &[String],
    ) -> Result<(), HostError> {
        self.record(HostLaunch::Permission {
            plugin: plugin.to_string(),
            request,
            identifiers: identifiers.to_vec(),
        })
    }

    fn launch_activity(
        &self,
        plugin: &str,
        request: RequestId,
        call: &CallId,
        intent: &Value,
    ) -> Result<(), HostError> {
        self.record(HostLaunch::Activity {
            plugin: plugin.to_string(),
            request,
            call: call.clone(),
            intent: intent.clone(),
        })
    }

    fn permission_status(&self, identifier: &str) -> PermissionState {
        self.statuses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identifier)
            .copied()
            .unwrap_or(PermissionState::Prompt)
    }

    fn is_declared(&self, identifier: &str) -> bool {
        !self
            .undeclared
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(identifier)
    }
}

impl fmt::Debug for RecordingHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingHost")
            .field("launches", &self.launch_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_auto_host_statuses() {
        let host = AutoHost::new().with_status("CAMERA", PermissionState::Granted);
        assert_eq!(host.permission_status("CAMERA"), PermissionState::Granted);
        assert_eq!(host.permission_status("MIC"), PermissionState::Prompt);

        let host = AutoHost::all_granted().with_declared(["CAMERA"]);
        assert_eq!(host.permission_status("MIC"), PermissionState::Granted);
        assert!(host.is_declared("CAMERA"));
        assert!(!host.is_declared("MIC"));
    }

    #[test]
    fn test_recording_host_records_launches() {
        let host = RecordingHost::new();
        host.launch_permission_prompt("Camera", RequestId::new(1), &["CAMERA".into()])
            .unwrap();
        host.launch_activity(
            "Camera",
            RequestId::new(2),
            &CallId::new("cb-7"),
            &json!({"action": "pick"}),
        )
        .unwrap();

        assert_eq!(host.launch_count(), 2);
        assert_eq!(
            host.last_permission_request(),
            Some((RequestId::new(1), vec!["CAMERA".to_string()]))
        );
        assert_eq!(
            host.last_activity_request(),
            Some((RequestId::new(2), CallId::new("cb-7")))
        );
        assert_eq!(host.launches()[1].request(), RequestId::new(2));
    }

    #[test]
    fn test_recording_host_failure_mode() {
        let host = RecordingHost::new();
        host.set_fail_launches(true);

        let result = host.launch_permission_prompt("Camera", RequestId::new(1), &[]);
        assert!(matches!(result, Err(HostError::LaunchFailed(_))));
        assert_eq!(host.launch_count(), 0);
    }

    #[test]
    fn test_shared_host_through_arc() {
        let host = Arc::new(RecordingHost::new());
        host.set_status("CAMERA", PermissionState::Denied);
        host.set_undeclared("MIC");

        let shared: Arc<dyn HostBridge> = Arc::new(Arc::clone(&host));
        assert_eq!(shared.permission_status("CAMERA"), PermissionState::Denied);
        assert!(!shared.is_declared("MIC"));
    }
}
