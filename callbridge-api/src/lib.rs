//! callbridge-api: Shared types for the callbridge runtime
//!
//! This crate defines the data that crosses the boundary between a plugin,
//! the host that dispatches permission prompts and activities, and the
//! caller awaiting a result. Persisted snapshots use MessagePack.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// API version for snapshot compatibility checking
pub const API_VERSION: u32 = 1;

/// Identifier of a pending call, unique among non-released calls
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for CallId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Correlation key for one outstanding host round-trip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Grant state of a permission alias
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PermissionState {
    Granted,
    Denied,
    /// Not determined yet; the host would show a prompt
    Prompt,
    /// Not determined, and the host wants the plugin to explain why first
    PromptWithRationale,
}

impl PermissionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Granted => "granted",
            Self::Denied => "denied",
            Self::Prompt => "prompt",
            Self::PromptWithRationale => "prompt-with-rationale",
        }
    }

    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted)
    }
}

impl fmt::Display for PermissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-alias permission states, ordered by alias
pub type PermissionStates = BTreeMap<String, PermissionState>;

/// Render a state map as the JSON object handed back to callers
pub fn states_to_value(states: &PermissionStates) -> Value {
    let object: Map<String, Value> = states
        .iter()
        .map(|(alias, state)| (alias.clone(), Value::String(state.as_str().to_string())))
        .collect();
    Value::Object(object)
}

/// A declared permission group
///
/// An alias bundles zero or more raw host permission identifiers. A group
/// without identifiers is granted automatically, without any host prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionGroup {
    /// Logical name; empty means unnamed
    #[serde(default)]
    pub alias: String,

    /// Raw host permission identifiers
    #[serde(default)]
    pub identifiers: Vec<String>,
}

impl PermissionGroup {
    pub fn new<I, S>(alias: impl Into<String>, identifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            alias: alias.into(),
            identifiers: identifiers.into_iter().map(Into::into).collect(),
        }
    }

    /// Create a group that is always granted
    pub fn auto_grant(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            identifiers: Vec::new(),
        }
    }

    /// No non-empty identifiers
    pub fn is_auto_grant(&self) -> bool {
        self.identifiers.iter().all(String::is_empty)
    }

    /// Non-empty raw identifiers of this group
    pub fn raw_identifiers(&self) -> impl Iterator<Item = &str> {
        self.identifiers
            .iter()
            .map(String::as_str)
            .filter(|id| !id.is_empty())
    }
}

/// An exported plugin operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationSpec {
    /// Method name used for routing, e.g. "takePhoto"
    pub name: String,

    /// Whether the operation requests permissions through its own continuation
    #[serde(default)]
    pub permission_callback: bool,
}

impl OperationSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            permission_callback: false,
        }
    }

    /// Require a bound permission continuation for this operation
    pub fn with_permission_callback(mut self) -> Self {
        self.permission_callback = true;
        self
    }
}

/// Static description of a plugin
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    /// Plugin identifier, also the snapshot key
    pub id: String,

    /// Declared permission groups
    #[serde(default)]
    pub permissions: Vec<PermissionGroup>,

    /// Exported operations
    #[serde(default)]
    pub operations: Vec<OperationSpec>,

    /// Free-form plugin configuration
    #[serde(default)]
    pub config: Map<String, Value>,
}

impl PluginDescriptor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Declare a permission group
    pub fn permission(mut self, group: PermissionGroup) -> Self {
        self.permissions.push(group);
        self
    }

    /// Declare an exported operation
    pub fn operation(mut self, operation: OperationSpec) -> Self {
        self.operations.push(operation);
        self
    }

    /// Add a configuration entry
    pub fn config_entry(mut self, key: impl Into<String>, value: Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }

    /// Names of operations that need a bound permission continuation
    pub fn operations_requiring_callback(&self) -> impl Iterator<Item = &str> {
        self.operations
            .iter()
            .filter(|op| op.permission_callback)
            .map(|op| op.name.as_str())
    }
}

/// Failure details delivered to a rejected call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallFailure {
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Terminal or intermediate response delivered to a caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CallResponse {
    /// Resolved, with an optional payload (None = undefined)
    Resolved(Option<Value>),

    /// Rejected with an error
    Rejected(CallFailure),
}

impl CallResponse {
    pub fn resolved(payload: Value) -> Self {
        Self::Resolved(Some(payload))
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(CallFailure {
            message: message.into(),
            code: None,
        })
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }

    /// Payload of a resolved response
    pub fn payload(&self) -> Option<&Value> {
        match self {
            Self::Resolved(payload) => payload.as_ref(),
            Self::Rejected(_) => None,
        }
    }

    /// Message of a rejected response
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Resolved(_) => None,
            Self::Rejected(failure) => Some(&failure.message),
        }
    }
}

/// How an external activity finished
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    Completed,
    Cancelled,
}

/// Result payload of an externally launched activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityResult {
    pub status: ActivityStatus,

    #[serde(default)]
    pub data: Option<Value>,
}

impl ActivityResult {
    pub fn completed(data: Value) -> Self {
        Self {
            status: ActivityStatus::Completed,
            data: Some(data),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            status: ActivityStatus::Cancelled,
            data: None,
        }
    }
}

/// Persisted input of the one call that should survive process teardown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSnapshot {
    pub api_version: u32,
    pub plugin_id: String,
    pub method: String,
    pub data: Map<String, Value>,
    /// blake3 hex digest of the serialized data
    pub checksum: String,
}

impl CallSnapshot {
    pub fn new(
        plugin_id: impl Into<String>,
        method: impl Into<String>,
        data: Map<String, Value>,
    ) -> Self {
        let checksum = Self::compute_checksum(&data);
        Self {
            api_version: API_VERSION,
            plugin_id: plugin_id.into(),
            method: method.into(),
            data,
            checksum,
        }
    }

    /// Digest of the call data
    pub fn compute_checksum(data: &Map<String, Value>) -> String {
        let bytes = serde_json::to_vec(data).unwrap_or_default();
        blake3::hash(&bytes).to_hex().to_string()
    }

    /// Check that the data still matches its checksum
    pub fn verify(&self) -> bool {
        self.checksum == Self::compute_checksum(&self.data)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec_named(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_auto_grant_detection() {
        assert!(PermissionGroup::auto_grant("net").is_auto_grant());
        assert!(PermissionGroup::new("net", [""]).is_auto_grant());
        assert!(PermissionGroup::new("net", ["", ""]).is_auto_grant());
        assert!(!PermissionGroup::new("camera", ["CAMERA"]).is_auto_grant());
        assert!(!PermissionGroup::new("odd", ["", "CAMERA"]).is_auto_grant());

        let group = PermissionGroup::new("odd", ["", "CAMERA"]);
        assert_eq!(group.raw_identifiers().collect::<Vec<_>>(), vec!["CAMERA"]);
    }

    #[test]
    fn test_permission_state_strings() {
        assert_eq!(
            serde_json::to_value(PermissionState::PromptWithRationale).unwrap(),
            json!("prompt-with-rationale")
        );
        assert_eq!(PermissionState::Granted.to_string(), "granted");

        let mut states = PermissionStates::new();
        states.insert("camera".into(), PermissionState::Granted);
        states.insert("photos".into(), PermissionState::Denied);
        assert_eq!(
            states_to_value(&states),
            json!({"camera": "granted", "photos": "denied"})
        );
    }

    #[test]
    fn test_descriptor_serialization() {
        let descriptor = PluginDescriptor::new("Camera")
            .permission(PermissionGroup::new("camera", ["CAMERA"]))
            .operation(OperationSpec::new("takePhoto").with_permission_callback());

        let bytes = rmp_serde::to_vec_named(&descriptor).unwrap();
        let decoded: PluginDescriptor = rmp_serde::from_slice(&bytes).unwrap();

        assert_eq!(decoded.id, "Camera");
        assert_eq!(decoded.permissions.len(), 1);
        assert_eq!(
            decoded.operations_requiring_callback().collect::<Vec<_>>(),
            vec!["takePhoto"]
        );
    }

    #[test]
    fn test_descriptor_defaults_from_json() {
        let descriptor: PluginDescriptor = serde_json::from_value(json!({
            "id": "Geo",
            "permissions": [{"alias": "location", "identifiers": ["FINE", "COARSE"]}]
        }))
        .unwrap();

        assert!(descriptor.operations.is_empty());
        assert_eq!(descriptor.permissions[0].identifiers, vec!["FINE", "COARSE"]);
    }

    #[test]
    fn test_snapshot_checksum() {
        let mut data = Map::new();
        data.insert("quality".into(), json!(90));
        let snapshot = CallSnapshot::new("Camera", "takePhoto", data);
        assert!(snapshot.verify());

        let decoded = CallSnapshot::from_bytes(&snapshot.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, snapshot);

        let mut tampered = decoded;
        tampered.data.insert("quality".into(), json!(10));
        assert!(!tampered.verify());
    }

    #[test]
    fn test_call_response_accessors() {
        let ok = CallResponse::resolved(json!({"value": 1}));
        assert!(ok.is_resolved());
        assert_eq!(ok.payload(), Some(&json!({"value": 1})));

        let err = CallResponse::rejected("nope");
        assert_eq!(err.error_message(), Some("nope"));
        assert!(err.payload().is_none());
    }
}
