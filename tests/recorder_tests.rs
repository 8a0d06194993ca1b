// Integration tests for the posture sampling loop
//
// The recorder is owned by the session manager: it starts with a fresh
// session, keeps sampling through pauses, and stops with the session.

use anyhow::Result;
use fitmirror::{
    BiometricsLog, FrameMetrics, JointAngles, JsonlMetricsStore, PostureHub, PostureReport,
    PostureTracker, SessionCommands, SessionManager, SessionSettings, SessionStatus, StartRequest,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn settings(sample_hz: f64) -> SessionSettings {
    SessionSettings {
        default_exercise: "squat".to_string(),
        collaborator_timeout: Duration::from_secs(1),
        recorder_sample_hz: sample_hz,
    }
}

fn manager_with(posture: Arc<dyn PostureTracker>, sample_hz: f64) -> (Arc<SessionManager>, TempDir) {
    let dir = TempDir::new().expect("tempdir");
    let manager = Arc::new(SessionManager::new(
        settings(sample_hz),
        posture,
        Arc::new(BiometricsLog::new(16)),
        Arc::new(JsonlMetricsStore::new(dir.path().join("metrics.jsonl"))),
    ));
    (manager, dir)
}

#[tokio::test]
async fn test_recorder_runs_with_session_and_emits_increasing_t() -> Result<()> {
    let posture = Arc::new(PostureHub::new("squat"));
    posture
        .publish(FrameMetrics {
            angles: JointAngles {
                left_knee: Some(95.0),
                right_knee: Some(105.0),
                ..JointAngles::default()
            },
            ..FrameMetrics::default()
        })
        .await;
    let (manager, _dir) = manager_with(posture, 40.0);

    manager.start(StartRequest::default()).await?;
    assert!(manager.recorder().is_running());

    tokio::time::sleep(Duration::from_millis(200)).await;
    manager.stop().await?;
    assert!(!manager.recorder().is_running());

    let samples = manager.recorder().samples().await;
    assert!(samples.len() >= 3, "expected several samples, got {}", samples.len());
    for pair in samples.windows(2) {
        assert!(pair[1].t > pair[0].t, "t must be strictly increasing");
    }
    assert!(samples.iter().all(|s| s.angle == Some(100.0)));

    Ok(())
}

#[tokio::test]
async fn test_rep_edges_marked_exactly_on_increments() -> Result<()> {
    let posture = Arc::new(PostureHub::new("squat"));
    let (manager, _dir) = manager_with(posture.clone(), 40.0);

    manager.start(StartRequest::default()).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    posture
        .publish(FrameMetrics {
            rep_completed: true,
            ..FrameMetrics::default()
        })
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    posture
        .publish(FrameMetrics {
            rep_completed: true,
            ..FrameMetrics::default()
        })
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    manager.stop().await?;

    let samples = manager.recorder().samples().await;
    let edges: Vec<_> = samples.iter().filter(|s| s.is_rep).collect();
    assert_eq!(edges.len(), 2, "one edge per rep count increment");
    assert!(samples.first().map_or(true, |s| !s.is_rep));

    // Every edge sample's count is strictly above its predecessor's
    for pair in samples.windows(2) {
        if pair[1].is_rep {
            assert!(pair[1].rep_count > pair[0].rep_count);
        }
    }

    Ok(())
}

#[tokio::test]
async fn test_sampling_continues_through_pause_with_status_tag() -> Result<()> {
    let posture = Arc::new(PostureHub::new("squat"));
    let (manager, _dir) = manager_with(posture, 40.0);

    manager.start(StartRequest::default()).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    manager.pause().await?;
    assert!(manager.recorder().is_running(), "pause must not stop the recorder");
    tokio::time::sleep(Duration::from_millis(100)).await;

    manager.stop().await?;

    let samples = manager.recorder().samples().await;
    assert!(samples.iter().any(|s| s.status == SessionStatus::Active));
    assert!(
        samples.iter().any(|s| s.status == SessionStatus::Paused),
        "samples taken while paused carry the paused tag"
    );

    Ok(())
}

#[tokio::test]
async fn test_fresh_session_clears_previous_series() -> Result<()> {
    let posture = Arc::new(PostureHub::new("squat"));
    let (manager, _dir) = manager_with(posture, 40.0);

    manager.start(StartRequest::default()).await?;
    tokio::time::sleep(Duration::from_millis(120)).await;
    manager.stop().await?;
    let first_len = manager.recorder().samples().await.len();
    assert!(first_len > 0);

    manager.start(StartRequest::default()).await?;
    tokio::time::sleep(Duration::from_millis(60)).await;
    manager.stop().await?;

    let samples = manager.recorder().samples().await;
    assert!(
        samples.first().map_or(true, |s| s.t < 0.1),
        "second run must restart the time origin"
    );

    Ok(())
}

/// Tracker whose queries always fail; the loop must skip ticks, not die.
struct FailingTracker;

#[async_trait::async_trait]
impl PostureTracker for FailingTracker {
    async fn query(&self) -> Result<PostureReport> {
        anyhow::bail!("camera offline")
    }

    async fn set_exercise(&self, _exercise: &str, _reset: bool) -> Result<()> {
        Ok(())
    }

    async fn reset_session(&self, _preserve_totals: bool) -> Result<()> {
        Ok(())
    }

    async fn set_counting_enabled(&self, _enabled: bool) -> Result<()> {
        Ok(())
    }

    async fn average_quality(&self) -> Result<f64> {
        Ok(0.0)
    }
}

#[tokio::test]
async fn test_failed_queries_skip_ticks_without_killing_loop() -> Result<()> {
    let (manager, _dir) = manager_with(Arc::new(FailingTracker), 40.0);

    manager.start(StartRequest::default()).await?;
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(manager.recorder().is_running(), "loop survives failing reads");

    manager.stop().await?;
    assert!(manager.recorder().samples().await.is_empty());

    Ok(())
}
