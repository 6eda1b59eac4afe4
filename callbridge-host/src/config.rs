//! Engine configuration bundles
//!
//! Provides the collaborator bundle a [`CorrelationEngine`](crate::CorrelationEngine)
//! is built from, a builder, and ready-to-use presets.

use std::path::PathBuf;
use std::sync::Arc;

use crate::audit::{AuditSink, FileAuditSink, MemoryAuditSink, NullAuditSink};
use crate::permission::{HostBridge, LauncherError};
use crate::persistence::{FileSnapshotStore, MemorySnapshotStore, SnapshotStore};

/// Default upper bound for an encoded snapshot
pub const DEFAULT_MAX_SNAPSHOT_BYTES: usize = 512 * 1024;

/// Error type for configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("No host bridge configured")]
    MissingHost,

    #[error("Failed to initialize audit: {0}")]
    AuditInit(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    MissingLauncher(#[from] LauncherError),
}

/// Complete engine configuration
pub struct EngineConfig {
    pub host: Arc<dyn HostBridge>,
    pub snapshots: Arc<dyn SnapshotStore>,
    pub audit: Arc<dyn AuditSink>,
    pub max_snapshot_bytes: usize,
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("max_snapshot_bytes", &self.max_snapshot_bytes)
            .finish_non_exhaustive()
    }
}

impl EngineConfig {
    pub fn new(
        host: impl HostBridge + 'static,
        snapshots: impl SnapshotStore + 'static,
        audit: impl AuditSink + 'static,
    ) -> Self {
        Self {
            host: Arc::new(host),
            snapshots: Arc::new(snapshots),
            audit: Arc::new(audit),
            max_snapshot_bytes: DEFAULT_MAX_SNAPSHOT_BYTES,
        }
    }
}

/// Builder for engine configurations
#[derive(Default)]
pub struct EngineConfigBuilder {
    host: Option<Arc<dyn HostBridge>>,
    snapshots: Option<Arc<dyn SnapshotStore>>,
    audit: Option<Arc<dyn AuditSink>>,
    max_snapshot_bytes: Option<usize>,
    app_name: Option<String>,
}

impl EngineConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Application name (used for default paths)
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = Some(name.into());
        self
    }

    pub fn host(mut self, host: impl HostBridge + 'static) -> Self {
        self.host = Some(Arc::new(host));
        self
    }

    pub fn snapshots(mut self, store: impl SnapshotStore + 'static) -> Self {
        self.snapshots = Some(Arc::new(store));
        self
    }

    pub fn audit(mut self, audit: impl AuditSink + 'static) -> Self {
        self.audit = Some(Arc::new(audit));
        self
    }

    pub fn max_snapshot_bytes(mut self, limit: usize) -> Self {
        self.max_snapshot_bytes = Some(limit);
        self
    }

    pub fn build(self) -> Result<EngineConfig, ConfigError> {
        let host = self.host.ok_or(ConfigError::MissingHost)?;
        let max_snapshot_bytes = self.max_snapshot_bytes.unwrap_or(DEFAULT_MAX_SNAPSHOT_BYTES);
        if max_snapshot_bytes == 0 {
            return Err(ConfigError::InvalidConfig(
                "max_snapshot_bytes must be greater than zero".into(),
            ));
        }
        let app_name = self.app_name.as_deref().unwrap_or("callbridge");

        Ok(EngineConfig {
            host,
            snapshots: self
                .snapshots
                .unwrap_or_else(|| Arc::new(FileSnapshotStore::default_for_app(app_name))),
            audit: self.audit.unwrap_or_else(|| Arc::new(NullAuditSink)),
            max_snapshot_bytes,
        })
    }
}

// ============================================================================
// Preset Configurations
// ============================================================================

/// Preset configurations for common use cases
pub struct EnginePresets;

impl EnginePresets {
    /// Testing mode (in-memory, no persistence)
    ///
    /// - In-memory snapshot store
    /// - Memory-based audit
    pub fn testing(host: impl HostBridge + 'static) -> EngineConfig {
        EngineConfig::new(host, MemorySnapshotStore::new(), MemoryAuditSink::new())
    }

    /// Persistent mode for real hosts
    ///
    /// - File snapshots under `<config>/<app>/snapshots`
    /// - File-based audit log at `<config>/<app>/audit.jsonl`
    pub fn persistent(
        app_name: &str,
        host: impl HostBridge + 'static,
    ) -> Result<EngineConfig, ConfigError> {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(app_name);

        let audit = FileAuditSink::new(config_dir.join("audit.jsonl"))
            .map_err(|e| ConfigError::AuditInit(e.to_string()))?;

        Ok(EngineConfig::new(
            host,
            FileSnapshotStore::new(config_dir.join("snapshots")),
            audit,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::AutoHost;

    #[test]
    fn test_builder_requires_host() {
        let err = EngineConfigBuilder::new().build().unwrap_err();
        assert!(matches!(err, ConfigError::MissingHost));
    }

    #[test]
    fn test_builder_defaults() {
        let config = EngineConfigBuilder::new()
            .app_name("test-app")
            .host(AutoHost::new())
            .snapshots(MemorySnapshotStore::new())
            .build()
            .unwrap();

        assert_eq!(config.max_snapshot_bytes, DEFAULT_MAX_SNAPSHOT_BYTES);
    }

    #[test]
    fn test_builder_rejects_zero_limit() {
        let err = EngineConfigBuilder::new()
            .host(AutoHost::new())
            .max_snapshot_bytes(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidConfig(_)));
    }

    #[test]
    fn test_testing_preset() {
        let config = EnginePresets::testing(AutoHost::new());
        assert_eq!(config.max_snapshot_bytes, DEFAULT_MAX_SNAPSHOT_BYTES);
        assert!(!config.snapshots.contains("anything").unwrap());
    }
}
