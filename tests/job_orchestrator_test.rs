//! Job orchestrator integration tests
//!
//! Drives the submit / poll / result / cancel cycle against a scripted
//! in-memory geoprocessing task.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::json;

use common::{fast_settings, FakeGeoprocessing, JOB_ID};
use webmap_print::services::{JobOrchestrator, JobSettings, JobState, RemoteJobStatus};
use webmap_print::PrintError;

fn params() -> webmap_print::services::JobParameters {
    let mut params = webmap_print::services::JobParameters::new();
    params.insert("template".to_string(), "Standard".to_string());
    params
}

#[tokio::test]
async fn test_job_resolves_with_requested_output() -> Result<()> {
    let service = Arc::new(FakeGeoprocessing::succeeding());
    let orchestrator = JobOrchestrator::new(service.clone(), fast_settings());
    let tracker = orchestrator.tracker();

    let value = orchestrator.execute(params(), "url").await?;
    assert_eq!(value, json!("https://gis.example.com/output/print.pdf"));

    let job = tracker.snapshot().await;
    assert_eq!(job.job_id.as_deref(), Some(JOB_ID));
    assert!(matches!(job.state, JobState::Succeeded(_)));
    assert!(!job.cancel_requested);
    assert_eq!(service.submitted_params().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_failure_payload_is_passed_through() -> Result<()> {
    let messages = vec![
        json!({"type": "esriJobMessageTypeInformative", "description": "Executing..."}),
        json!({"type": "esriJobMessageTypeError", "description": "Layout 'A9' not found"}),
    ];
    let service = Arc::new(
        FakeGeoprocessing::new(RemoteJobStatus::Submitted, vec![RemoteJobStatus::Failed])
            .with_messages(messages.clone()),
    );
    let orchestrator = JobOrchestrator::new(service, fast_settings());
    let tracker = orchestrator.tracker();

    match orchestrator.execute(params(), "url").await {
        Err(PrintError::JobFailed(payload)) => assert_eq!(payload, json!(messages)),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(matches!(tracker.snapshot().await.state, JobState::Failed(_)));
    Ok(())
}

#[tokio::test]
async fn test_result_error_field_rejects() -> Result<()> {
    let service = Arc::new(
        FakeGeoprocessing::succeeding()
            .with_result(json!("{\"error\": \"Template missing\", \"url\": \"\"}")),
    );
    let orchestrator = JobOrchestrator::new(service, fast_settings());

    match orchestrator.execute(params(), "url").await {
        Err(PrintError::JobFailed(payload)) => assert_eq!(payload, json!("Template missing")),
        other => panic!("unexpected outcome {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn test_only_first_terminal_status_is_honoured() -> Result<()> {
    let service = Arc::new(FakeGeoprocessing::new(
        RemoteJobStatus::Submitted,
        vec![RemoteJobStatus::Succeeded, RemoteJobStatus::Failed],
    ));
    let orchestrator = JobOrchestrator::new(service.clone(), fast_settings());

    let value = orchestrator.execute(params(), "url").await?;
    assert!(value.is_string());
    assert_eq!(service.status_calls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn test_server_side_cancellation_settles_cancelled() -> Result<()> {
    let service = Arc::new(FakeGeoprocessing::new(
        RemoteJobStatus::Submitted,
        vec![RemoteJobStatus::Cancelling, RemoteJobStatus::Cancelled],
    ));
    let orchestrator = JobOrchestrator::new(service, fast_settings());

    let outcome = orchestrator.execute(params(), "url").await;
    assert!(matches!(outcome, Err(PrintError::JobCancelled)));
    Ok(())
}

#[tokio::test]
async fn test_cancel_before_job_id_is_applied_on_acknowledgement() -> Result<()> {
    let service = Arc::new(FakeGeoprocessing::running().with_submit_delay(Duration::from_millis(100)));
    let orchestrator = JobOrchestrator::new(service.clone(), fast_settings());
    let tracker = orchestrator.tracker();

    let job = tokio::spawn(async move { orchestrator.execute(params(), "url").await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(tracker.snapshot().await.job_id, None);
    tracker.cancel();

    let outcome = tokio::time::timeout(Duration::from_secs(2), job).await??;
    assert!(matches!(outcome, Err(PrintError::JobCancelled)));
    assert_eq!(service.cancelled_jobs(), vec![JOB_ID.to_string()]);

    let job = tracker.snapshot().await;
    assert_eq!(job.state, JobState::Cancelled);
    assert!(job.cancel_requested);
    assert_eq!(job.job_id.as_deref(), Some(JOB_ID));
    Ok(())
}

#[tokio::test]
async fn test_cancel_while_running_sends_cancel_request() -> Result<()> {
    let service = Arc::new(FakeGeoprocessing::running());
    let orchestrator = JobOrchestrator::new(service.clone(), fast_settings());
    let cancel = orchestrator.cancel_token();

    let job = tokio::spawn(async move { orchestrator.execute(params(), "url").await });
    tokio::time::sleep(Duration::from_millis(30)).await;
    cancel.cancel();

    let outcome = tokio::time::timeout(Duration::from_secs(2), job).await??;
    assert!(matches!(outcome, Err(PrintError::JobCancelled)));
    assert_eq!(service.cancelled_jobs(), vec![JOB_ID.to_string()]);
    assert!(service.status_calls.load(Ordering::SeqCst) >= 1);
    Ok(())
}

#[tokio::test]
async fn test_cancel_settles_when_acknowledgement_never_arrives() -> Result<()> {
    let service = Arc::new(FakeGeoprocessing::running().with_submit_delay(Duration::from_secs(30)));
    let settings = JobSettings {
        poll_interval: Duration::from_millis(5),
        cancel_grace: Duration::from_millis(50),
    };
    let orchestrator = JobOrchestrator::new(service.clone(), settings);
    let cancel = orchestrator.cancel_token();

    let job = tokio::spawn(async move { orchestrator.execute(params(), "url").await });
    tokio::time::sleep(Duration::from_millis(10)).await;
    cancel.cancel();

    let outcome = tokio::time::timeout(Duration::from_secs(2), job).await??;
    assert!(matches!(outcome, Err(PrintError::JobCancelled)));
    assert!(service.cancelled_jobs().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_cancelled_orchestrator_never_submits() -> Result<()> {
    let service = Arc::new(FakeGeoprocessing::succeeding());
    let orchestrator = JobOrchestrator::new(service.clone(), fast_settings());
    orchestrator.cancel();

    let outcome = orchestrator.execute(params(), "url").await;
    assert!(matches!(outcome, Err(PrintError::JobCancelled)));
    assert!(service.submitted_params().is_empty());
    Ok(())
}
