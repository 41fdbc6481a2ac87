//! Rolling update tests

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{group, policy, revision, FakeLauncher, ScriptedProber};
use deckhand::balancer::target::TargetState;
use deckhand::errors::DeckhandError;
use deckhand::rollout::engine::{RollingUpdate, RunningTask};

fn update(
    desired: u32,
    min: u32,
    max: u32,
    launcher: Arc<FakeLauncher>,
    prober: Arc<ScriptedProber>,
    group: Arc<deckhand::balancer::group::TargetGroup>,
) -> RollingUpdate {
    RollingUpdate::new(
        policy(desired, min, max),
        Duration::from_millis(1),
        group,
        launcher,
        prober,
    )
}

#[tokio::test]
async fn test_first_deployment_from_zero_tasks() {
    let launcher = Arc::new(FakeLauncher::default());
    let prober = Arc::new(ScriptedProber::default());
    let group = group(2, 2);

    let tasks = update(2, 100, 200, launcher.clone(), prober, group.clone())
        .run(Vec::new(), &revision("web", 1))
        .await
        .unwrap();

    assert_eq!(tasks.len(), 2);
    assert!(tasks.iter().all(|t| t.revision == "web:1"));
    assert_eq!(group.healthy_count(), 2);
    assert_eq!(launcher.running().len(), 2);
}

#[tokio::test]
async fn test_replaces_old_tasks_without_dropping_below_minimum() {
    let launcher = Arc::new(FakeLauncher::default());
    let prober = Arc::new(ScriptedProber::default());
    let group = group(2, 2);

    let old = update(2, 100, 200, launcher.clone(), prober.clone(), group.clone())
        .run(Vec::new(), &revision("web", 1))
        .await
        .unwrap();

    // Watch the healthy count while the second rollout runs
    let watcher_group = group.clone();
    let watcher = tokio::spawn(async move {
        let mut lowest = usize::MAX;
        for _ in 0..200 {
            lowest = lowest.min(watcher_group.healthy_count());
            tokio::time::sleep(Duration::from_micros(200)).await;
        }
        lowest
    });

    let new = update(2, 100, 200, launcher.clone(), prober, group.clone())
        .run(old.clone(), &revision("web", 2))
        .await
        .unwrap();

    assert_eq!(new.len(), 2);
    assert!(new.iter().all(|t| t.revision == "web:2"));
    for task in &old {
        assert_eq!(group.state(&task.id), None);
    }
    let running = launcher.running();
    assert_eq!(running.len(), 2);
    assert!(running.iter().all(|id| id.starts_with("web-2-")));
    assert!(watcher.await.unwrap() >= 2);
}

#[tokio::test]
async fn test_max_percent_100_drains_before_launching() {
    let launcher = Arc::new(FakeLauncher::default());
    let prober = Arc::new(ScriptedProber::default());
    let group = group(1, 2);

    let old = update(2, 50, 100, launcher.clone(), prober.clone(), group.clone())
        .run(Vec::new(), &revision("web", 1))
        .await
        .unwrap();

    let new = update(2, 50, 100, launcher.clone(), prober, group.clone())
        .run(old, &revision("web", 2))
        .await
        .unwrap();

    assert_eq!(new.len(), 2);
    assert_eq!(launcher.running().len(), 2);
}

#[tokio::test]
async fn test_unhealthy_new_tasks_fail_rollout_and_keep_old() {
    let launcher = Arc::new(FakeLauncher::default());
    let prober = Arc::new(ScriptedProber::default());
    let group = group(2, 2);

    let old = update(1, 100, 200, launcher.clone(), prober.clone(), group.clone())
        .run(Vec::new(), &revision("web", 1))
        .await
        .unwrap();

    prober.fail("web-2-");
    let (err, kept) = update(1, 100, 200, launcher.clone(), prober, group.clone())
        .run(old.clone(), &revision("web", 2))
        .await
        .unwrap_err();

    assert!(matches!(err, DeckhandError::RolloutError(_)));
    assert_eq!(kept, old);
    assert_eq!(group.state(&old[0].id), Some(TargetState::Healthy));
    assert_eq!(launcher.running(), vec![old[0].id.clone()]);
    // Every replacement counted toward the threshold
    assert_eq!(launcher.launched.load(std::sync::atomic::Ordering::SeqCst), 1 + 3);
}

#[tokio::test]
async fn test_rollout_gives_up_after_max_intervals() {
    let launcher = Arc::new(FakeLauncher::default());
    let prober = Arc::new(ScriptedProber::default());
    // Unreachable healthy threshold: new tasks stay Initial forever
    let group = group(50, 50);

    let old = vec![RunningTask {
        id: "legacy".to_string(),
        revision: "web:1".to_string(),
        url: "http://legacy".to_string(),
    }];
    group.register("legacy", "http://legacy").unwrap();

    let (err, kept) = update(1, 100, 200, launcher.clone(), prober, group.clone())
        .run(old.clone(), &revision("web", 2))
        .await
        .unwrap_err();

    assert!(err.to_string().contains("did not become stable"));
    assert_eq!(kept, old);
    assert!(launcher.running().is_empty());
    assert_eq!(group.state("legacy"), Some(TargetState::Initial));
}

#[tokio::test]
async fn test_launch_failure_aborts() {
    let launcher = Arc::new(FakeLauncher::default());
    *launcher.fail_launch.lock().unwrap() = true;
    let prober = Arc::new(ScriptedProber::default());

    let (err, kept) = update(1, 100, 200, launcher, prober, group(2, 2))
        .run(Vec::new(), &revision("web", 1))
        .await
        .unwrap_err();

    assert!(err.to_string().contains("no capacity"));
    assert!(kept.is_empty());
}

#[tokio::test]
async fn test_fix_forward_over_unhealthy_revision() {
    let launcher = Arc::new(FakeLauncher::default());
    let prober = Arc::new(ScriptedProber::default());
    let group = group(1, 1);

    let old: Vec<RunningTask> = (0..2)
        .map(|n| RunningTask {
            id: format!("web-1-{}", n),
            revision: "web:1".to_string(),
            url: format!("http://web-1-{}", n),
        })
        .collect();
    for task in &old {
        group.register(&task.id, &task.url).unwrap();
    }
    prober.fail("web-1-");
    group.probe_all(prober.as_ref()).await;
    assert_eq!(group.state("web-1-0"), Some(TargetState::Unhealthy));

    // No room to launch alongside the old tasks; they have to go first
    let new = update(2, 50, 100, launcher.clone(), prober, group.clone())
        .run(old.clone(), &revision("web", 2))
        .await
        .unwrap();

    assert_eq!(new.len(), 2);
    assert!(new.iter().all(|t| t.revision == "web:2"));
    assert_eq!(group.state("web-1-0"), None);
    assert_eq!(group.healthy_count(), 2);
}
