//! Target group health and routing tests

mod common;

use common::{group, ScriptedProber};
use deckhand::balancer::target::{ProbeOutcome, TargetHealth, TargetState, Thresholds};

#[test]
fn test_full_lifecycle() {
    let mut target = TargetHealth::new(Thresholds {
        healthy: 2,
        unhealthy: 2,
    });
    assert_eq!(target.state(), TargetState::Unused);

    target.register().unwrap();
    assert_eq!(target.record(ProbeOutcome::Success), TargetState::Initial);
    assert_eq!(target.record(ProbeOutcome::Success), TargetState::Healthy);

    let fail = || ProbeOutcome::Failure("unexpected status 503".to_string());
    assert_eq!(target.record(fail()), TargetState::Healthy);
    assert_eq!(target.record(fail()), TargetState::Unhealthy);
    assert_eq!(target.last_failure(), Some("unexpected status 503"));

    assert_eq!(target.record(ProbeOutcome::Success), TargetState::Unhealthy);
    assert_eq!(target.record(ProbeOutcome::Success), TargetState::Healthy);

    target.deregister().unwrap();
    assert_eq!(target.record(ProbeOutcome::Success), TargetState::Draining);
    target.drained().unwrap();
    assert_eq!(target.state(), TargetState::Unused);
}

#[test]
fn test_invalid_transitions() {
    let mut target = TargetHealth::new(Thresholds::default());
    assert!(target.deregister().is_err());
    assert!(target.drained().is_err());

    target.register().unwrap();
    assert!(target.register().is_err());
}

#[tokio::test]
async fn test_routing_only_reaches_healthy_targets() {
    let group = group(2, 2);
    let prober = ScriptedProber::default();
    group.register("a", "http://a").unwrap();
    group.register("b", "http://b").unwrap();
    group.register("c", "http://c").unwrap();
    prober.fail("http://c");

    // Nothing is healthy before the threshold is met
    group.probe_all(&prober).await;
    assert_eq!(group.next_target(), None);

    let snapshot = group.probe_all(&prober).await;
    let c = snapshot.iter().find(|t| t.id == "c").unwrap();
    assert_eq!(c.state, TargetState::Unhealthy);
    assert!(c.last_failure.is_some());

    let mut seen: Vec<String> = (0..6).filter_map(|_| group.next_target()).collect();
    seen.sort();
    seen.dedup();
    assert_eq!(seen, vec!["http://a".to_string(), "http://b".to_string()]);
    assert_eq!(group.healthy_targets().len(), 2);
}

#[tokio::test]
async fn test_recovered_target_rejoins_rotation() {
    let group = group(1, 1);
    let prober = ScriptedProber::default();
    group.register("a", "http://a").unwrap();

    prober.fail("http://a");
    group.probe_all(&prober).await;
    assert_eq!(group.state("a"), Some(TargetState::Unhealthy));
    assert_eq!(group.next_target(), None);

    prober.heal("http://a");
    group.probe_all(&prober).await;
    assert_eq!(group.next_target(), Some("http://a".to_string()));
}

#[tokio::test]
async fn test_draining_target_is_not_probed_or_routed() {
    let group = group(1, 1);
    let prober = ScriptedProber::default();
    group.register("a", "http://a").unwrap();
    group.probe_all(&prober).await;
    assert_eq!(group.healthy_count(), 1);

    group.deregister("a").unwrap();
    assert_eq!(group.state("a"), Some(TargetState::Draining));
    assert_eq!(group.next_target(), None);

    group.probe_all(&prober).await;
    assert_eq!(group.state("a"), Some(TargetState::Draining));

    group.remove("a").unwrap();
    assert_eq!(group.state("a"), None);
    assert!(group.register("a", "http://a").is_ok());
}

#[test]
fn test_duplicate_registration_is_rejected() {
    let group = group(1, 1);
    group.register("a", "http://a").unwrap();
    assert!(group.register("a", "http://other").is_err());
}
