//! Teardown, snapshot and restore across engine instances

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use callbridge_api::{CallSnapshot, PermissionGroup, PluginDescriptor};
use callbridge_host::{
    AuditEventType, Call, CollectingSink, CorrelationEngine, EngineConfig, EngineConfigBuilder,
    EngineError, EnginePresets, FileSnapshotStore, LauncherRegistry, MemoryAuditSink,
    NoopRestore, RecordingHost, RequestOutcome, SnapshotError, SnapshotStore,
};
use serde_json::{json, Map, Value};

fn descriptor() -> PluginDescriptor {
    PluginDescriptor::new("Camera").permission(PermissionGroup::new("camera", ["CAMERA"]))
}

fn launchers() -> LauncherRegistry {
    LauncherRegistry::new().with_permission_callback("takePhoto", |call, _states| {
        let quality = call.data().get("quality").cloned().unwrap_or(Value::Null);
        call.resolve(json!({"quality": quality}));
    })
}

fn data(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

fn file_engine(dir: &std::path::Path, host: Arc<RecordingHost>, audit: Arc<MemoryAuditSink>) -> CorrelationEngine {
    let config = EngineConfig::new(host, FileSnapshotStore::new(dir), audit);
    CorrelationEngine::new(descriptor(), launchers(), config).expect("Failed to create engine")
}

#[test]
fn test_teardown_snapshot_is_replayed_once() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let sink = Arc::new(CollectingSink::new());

    // First process: a permission round-trip is in flight at teardown
    let audit = Arc::new(MemoryAuditSink::new());
    let mut engine = file_engine(dir.path(), Arc::new(RecordingHost::new()), Arc::clone(&audit));
    let call = Call::new("cb-1", "takePhoto", data(json!({"quality": 90})), sink.clone());
    let outcome = engine.request_permission_for_alias("camera", call);
    assert!(matches!(outcome, RequestOutcome::AwaitingHost(_)));

    engine
        .persist_on_teardown(&"cb-1".into())
        .expect("slot should be free");
    let written = engine.teardown().expect("teardown should succeed");
    assert!(written.is_some_and(|bytes| bytes > 0));
    assert!(engine.calls().is_empty());
    assert_eq!(engine.pending_count(), 0);
    assert_eq!(audit.find_by_type(AuditEventType::SnapshotSaved).len(), 1);

    // Second process: restore re-issues the original request
    let host = Arc::new(RecordingHost::new());
    let audit = Arc::new(MemoryAuditSink::new());
    let mut engine = file_engine(dir.path(), Arc::clone(&host), Arc::clone(&audit));
    let replayed: Arc<Mutex<Vec<CallSnapshot>>> = Arc::default();
    let seen = Arc::clone(&replayed);
    let resume_sink = sink.clone();

    let restored = engine
        .restore_state(&move |engine: &mut CorrelationEngine, snapshot: CallSnapshot| {
            seen.lock().unwrap().push(snapshot.clone());
            let call = engine.restored_call(snapshot, resume_sink.clone());
            engine.request_permission_for_alias("camera", call);
        })
        .expect("restore should succeed");
    assert!(restored);

    let replayed = replayed.lock().unwrap().clone();
    assert_eq!(replayed.len(), 1);
    assert_eq!(replayed[0].method, "takePhoto");
    assert_eq!(replayed[0].data, data(json!({"quality": 90})));
    assert_eq!(audit.find_by_type(AuditEventType::SnapshotRestored).len(), 1);

    let (request, _) = host.last_permission_request().expect("request re-issued");
    engine.on_permission_result(request, HashMap::from([("CAMERA".to_string(), true)]));
    let resumed: Vec<_> = sink
        .responses()
        .into_iter()
        .filter(|(id, _)| id.as_str() != "cb-1")
        .collect();
    assert_eq!(resumed.len(), 1);
    assert_eq!(resumed[0].1.payload(), Some(&json!({"quality": 90})));

    // Read-once
    assert!(!engine.restore_state(&NoopRestore).expect("second restore"));
}

#[test]
fn test_teardown_without_slot_writes_nothing() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let mut engine = file_engine(
        dir.path(),
        Arc::new(RecordingHost::new()),
        Arc::new(MemoryAuditSink::new()),
    );
    let sink = Arc::new(CollectingSink::new());
    engine.request_all_permissions(Call::new("cb-1", "takePhoto", Map::new(), sink));

    assert_eq!(engine.teardown().expect("teardown"), None);
    assert!(!FileSnapshotStore::new(dir.path())
        .contains("Camera")
        .expect("store readable"));
}

#[test]
fn test_slot_clears_when_call_completes() {
    let host = Arc::new(RecordingHost::new());
    let mut engine = CorrelationEngine::new(
        descriptor(),
        launchers(),
        EnginePresets::testing(Arc::clone(&host)),
    )
    .expect("Failed to create engine");
    let sink = Arc::new(CollectingSink::new());

    engine.request_all_permissions(Call::new("cb-1", "takePhoto", Map::new(), sink.clone()));
    engine.persist_on_teardown(&"cb-1".into()).expect("slot free");
    let (request, _) = host.last_permission_request().expect("prompt launched");
    engine.on_permission_result(request, HashMap::new());

    assert!(engine.persist_slot().is_none());
    assert_eq!(engine.save_instance_state().expect("save"), None);

    // The slot can be taken by another call now
    engine.request_all_permissions(Call::new("cb-2", "takePhoto", Map::new(), sink));
    assert!(engine.persist_on_teardown(&"cb-2".into()).is_ok());
}

#[test]
fn test_oversized_snapshot_is_refused() {
    let config = EngineConfigBuilder::new()
        .host(RecordingHost::new())
        .snapshots(callbridge_host::MemorySnapshotStore::new())
        .max_snapshot_bytes(256)
        .build()
        .expect("config should build");
    let mut engine =
        CorrelationEngine::new(descriptor(), launchers(), config).expect("Failed to create engine");
    let sink = Arc::new(CollectingSink::new());
    let call = Call::new(
        "cb-1",
        "takePhoto",
        data(json!({"blob": "x".repeat(1024)})),
        sink,
    );
    engine.request_all_permissions(call);
    engine.persist_on_teardown(&"cb-1".into()).expect("slot free");

    let err = engine.save_instance_state().unwrap_err();
    assert!(matches!(
        err,
        EngineError::Snapshot(SnapshotError::TooLarge { limit: 256, .. })
    ));
}

#[test]
fn test_corrupted_snapshot_is_rejected() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    FileSnapshotStore::new(dir.path())
        .put("Camera", vec![0xc1, 0xc1, 0xc1])
        .expect("write garbage");

    let mut engine = file_engine(
        dir.path(),
        Arc::new(RecordingHost::new()),
        Arc::new(MemoryAuditSink::new()),
    );
    let err = engine.restore_state(&NoopRestore).unwrap_err();
    assert!(matches!(err, EngineError::Snapshot(SnapshotError::Decode(_))));

    // Consumed even when unreadable
    assert!(!engine.restore_state(&NoopRestore).expect("second restore"));
}
