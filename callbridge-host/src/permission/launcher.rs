//! Binding of operations to their result continuations
//!
//! Every operation that requests permissions through its own continuation
//! binds it here at initialization time. The built-in `requestPermissions`
//! operation falls back to the base launcher, which answers the caller with
//! the per-alias state map.

use crate::call::Call;
use callbridge_api::{states_to_value, ActivityResult, PermissionStates, PluginDescriptor};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Operation name that falls back to the base launcher
pub const DEFAULT_REQUEST_OPERATION: &str = "requestPermissions";

/// Continuation run when a permission round-trip completes
pub type PermissionCallback = Arc<dyn Fn(&mut Call, &PermissionStates) + Send + Sync>;

/// Continuation run when an external activity returns
pub type ActivityCallback = Arc<dyn Fn(&mut Call, &ActivityResult) + Send + Sync>;

/// Error type for launcher lookups
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LauncherError {
    #[error(
        "There is no permission callback registered for the plugin method {operation}. \
         Bind a continuation with the signature Fn(&mut Call, &PermissionStates) for it."
    )]
    MissingLauncher { operation: String },

    #[error(
        "There is no activity callback registered under the name {name}. \
         Bind a continuation with the signature Fn(&mut Call, &ActivityResult) for it."
    )]
    MissingActivityCallback { name: String },
}

/// The launcher resolved for an operation
#[derive(Clone)]
pub enum Launcher {
    /// Answers the call with the per-alias state map
    Base,
    /// Runs a plugin continuation
    Bound {
        operation: String,
        callback: PermissionCallback,
    },
}

impl Launcher {
    /// Hand resolved states to the continuation
    pub fn deliver(&self, call: &mut Call, states: &PermissionStates) {
        match self {
            Self::Base => call.resolve(states_to_value(states)),
            Self::Bound { callback, .. } => callback(call, states),
        }
    }

    pub fn is_base(&self) -> bool {
        matches!(self, Self::Base)
    }
}

impl fmt::Debug for Launcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Base => f.write_str("Launcher::Base"),
            Self::Bound { operation, .. } => f
                .debug_struct("Launcher::Bound")
                .field("operation", operation)
                .finish_non_exhaustive(),
        }
    }
}

/// Registry of permission and activity continuations
#[derive(Default, Clone)]
pub struct LauncherRegistry {
    permission: HashMap<String, PermissionCallback>,
    activity: HashMap<String, ActivityCallback>,
}

impl LauncherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a permission continuation to an operation
    ///
    /// Binding the same operation again replaces the continuation.
    pub fn bind<F>(&mut self, operation: impl Into<String>, callback: F) -> &mut Self
    where
        F: Fn(&mut Call, &PermissionStates) + Send + Sync + 'static,
    {
        let operation = operation.into();
        if self
            .permission
            .insert(operation.clone(), Arc::new(callback))
            .is_some()
        {
            tracing::debug!(method = %operation, "Permission callback rebound");
        }
        self
    }

    /// Builder-style [`bind`](Self::bind)
    pub fn with_permission_callback<F>(mut self, operation: impl Into<String>, callback: F) -> Self
    where
        F: Fn(&mut Call, &PermissionStates) + Send + Sync + 'static,
    {
        self.bind(operation, callback);
        self
    }

    /// Bind an activity continuation under a name
    pub fn bind_activity<F>(&mut self, name: impl Into<String>, callback: F) -> &mut Self
    where
        F: Fn(&mut Call, &ActivityResult) + Send + Sync + 'static,
    {
        self.activity.insert(name.into(), Arc::new(callback));
        self
    }

    /// Builder-style [`bind_activity`](Self::bind_activity)
    pub fn with_activity_callback<F>(mut self, name: impl Into<String>, callback: F) -> Self
    where
        F: Fn(&mut Call, &ActivityResult) + Send + Sync + 'static,
    {
        self.bind_activity(name, callback);
        self
    }

    pub fn is_bound(&self, operation: &str) -> bool {
        self.permission.contains_key(operation)
    }

    /// Launcher for an operation, falling back to the base launcher for
    /// the default request operation
    pub fn resolve(&self, operation: &str) -> Result<Launcher, LauncherError> {
        if let Some(callback) = self.permission.get(operation) {
            return Ok(Launcher::Bound {
                operation: operation.to_string(),
                callback: Arc::clone(callback),
            });
        }
        if operation == DEFAULT_REQUEST_OPERATION {
            return Ok(Launcher::Base);
        }
        Err(LauncherError::MissingLauncher {
            operation: operation.to_string(),
        })
    }

    pub fn resolve_activity(&self, name: &str) -> Result<ActivityCallback, LauncherError> {
        self.activity
            .get(name)
            .cloned()
            .ok_or_else(|| LauncherError::MissingActivityCallback {
                name: name.to_string(),
            })
    }

    /// Check that every operation declaring a permission callback has one
    pub fn verify(&self, descriptor: &PluginDescriptor) -> Result<(), LauncherError> {
        for operation in descriptor.operations_requiring_callback() {
            self.resolve(operation)?;
        }
        Ok(())
    }
}

impl fmt::Debug for LauncherRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut permission: Vec<&String> = self.permission.keys().collect();
        permission.sort();
        let mut activity: Vec<&String> = self.activity.keys().collect();
        activity.sort();
        f.debug_struct("LauncherRegistry")
            .field("permission", &permission)
            .field("activity", &activity)
            .finish()
    }
}
