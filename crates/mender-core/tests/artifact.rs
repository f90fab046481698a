//! Flow artifacts: persisted flows read back intact, tampering is refused.

use std::sync::Arc;

use mender_core::fakes::{self, RecordingLearning, ScriptedAnalyzer, ScriptedExecutor, ScriptedGenerator, ScriptedValidator};
use mender_core::{
    read_flow_artifact, write_flow_artifact, ArtifactError, ContextManager, ErrorReport, EventBus,
    MenderConfig, Orchestrator, RecoveryFlow,
};

async fn finished_flow() -> RecoveryFlow {
    let bus = Arc::new(EventBus::default());
    let contexts = Arc::new(ContextManager::new(Default::default(), bus.clone()));
    let orchestrator = Orchestrator::new(
        fakes::collaborators(
            Arc::new(ScriptedAnalyzer::returning(fakes::analysis_for("DiskFull", "resource_exhaustion"))),
            Arc::new(ScriptedGenerator::with_strategies(vec![fakes::strategy("purge", "purge_logs", 0.7)])),
            Arc::new(ScriptedValidator::accept_all()),
            Arc::new(ScriptedExecutor::new()),
            Arc::new(RecordingLearning::new()),
        ),
        bus,
        contexts,
        &MenderConfig::default(),
    );
    orchestrator
        .recover_from_error(ErrorReport::new("DiskFull", "no space left on device"))
        .await
        .flow
}

#[tokio::test]
async fn test_artifact_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let flow = finished_flow().await;

    let path = write_flow_artifact(&flow, dir.path()).unwrap();
    assert!(path.ends_with("flow.json"));
    assert!(path.starts_with(dir.path().join(flow.id.as_str())));

    let loaded = read_flow_artifact(flow.id.as_str(), dir.path()).unwrap();
    assert_eq!(loaded.id, flow.id);
    assert_eq!(loaded.status, flow.status);
    assert_eq!(loaded.steps.len(), flow.steps.len());
    assert_eq!(loaded.strategies_attempted, flow.strategies_attempted);
}

#[tokio::test]
async fn test_tampered_artifact_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let flow = finished_flow().await;
    let path = write_flow_artifact(&flow, dir.path()).unwrap();

    let body = std::fs::read_to_string(&path).unwrap();
    std::fs::write(&path, body.replace("COMPLETED", "FAILED")).unwrap();

    match read_flow_artifact(flow.id.as_str(), dir.path()) {
        Err(ArtifactError::DigestMismatch { expected, actual }) => assert_ne!(expected, actual),
        other => panic!("expected DigestMismatch, got {other:?}"),
    }
}

#[test]
fn test_missing_artifact_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = read_flow_artifact("no-such-flow", dir.path()).unwrap_err();
    assert!(matches!(err, ArtifactError::Io(_)));
}

#[test]
fn test_flow_ids_cannot_leave_the_artifact_dir() {
    let root = tempfile::tempdir().unwrap();
    let artifacts = root.path().join("flows");
    std::fs::create_dir_all(&artifacts).unwrap();
    std::fs::create_dir_all(root.path().join("outside")).unwrap();
    std::fs::write(root.path().join("outside").join("flow.json"), "{}").unwrap();

    for id in ["../outside", "..", ".", "a/b", "", "/etc"] {
        let err = read_flow_artifact(id, &artifacts).unwrap_err();
        assert!(matches!(err, ArtifactError::InvalidFlowId(_)), "{id}: {err}");
    }
}
