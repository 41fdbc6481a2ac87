//! Pipeline FSM tests

use deckhand::pipeline::fsm::{PipelineEvent, PipelineFsm, PipelineState};

#[test]
fn test_fsm_initial_state() {
    let fsm = PipelineFsm::new();
    assert_eq!(fsm.state(), PipelineState::Triggered);
    assert!(fsm.error().is_none());
    assert!(fsm.failed_stage().is_none());
}

#[test]
fn test_fsm_release_flow() {
    let mut fsm = PipelineFsm::new();

    // Triggered -> ImageBuilt
    fsm.process(PipelineEvent::Built).unwrap();
    assert_eq!(fsm.state(), PipelineState::ImageBuilt);

    // ImageBuilt -> ImagePushed
    fsm.process(PipelineEvent::Pushed).unwrap();
    assert_eq!(fsm.state(), PipelineState::ImagePushed);

    // ImagePushed -> TaskRegistered
    fsm.process(PipelineEvent::Registered).unwrap();
    assert_eq!(fsm.state(), PipelineState::TaskRegistered);

    // TaskRegistered -> ServiceUpdated
    fsm.process(PipelineEvent::ServiceUpdated).unwrap();
    assert_eq!(fsm.state(), PipelineState::ServiceUpdated);

    // ServiceUpdated -> RolloutStable
    fsm.process(PipelineEvent::Stable).unwrap();
    assert_eq!(fsm.state(), PipelineState::RolloutStable);
    assert!(fsm.state().is_terminal());
}

#[test]
fn test_fsm_push_failure() {
    let mut fsm = PipelineFsm::new();

    fsm.process(PipelineEvent::Built).unwrap();
    fsm.process(PipelineEvent::Failed("denied".to_string()))
        .unwrap();

    assert_eq!(fsm.state(), PipelineState::Failed);
    assert_eq!(fsm.failed_stage(), Some(PipelineState::ImageBuilt));
    assert_eq!(fsm.error(), Some("denied"));
}

#[test]
fn test_fsm_stages_cannot_be_skipped() {
    let mut fsm = PipelineFsm::new();

    // Cannot register before the image is pushed
    assert!(fsm.process(PipelineEvent::Registered).is_err());
    assert_eq!(fsm.state(), PipelineState::Triggered);

    fsm.process(PipelineEvent::Built).unwrap();
    assert!(fsm.process(PipelineEvent::Stable).is_err());
    assert!(fsm.process(PipelineEvent::Built).is_err());
}

#[test]
fn test_fsm_terminal_states_accept_nothing() {
    let mut fsm = PipelineFsm::new();
    fsm.process(PipelineEvent::Failed("boom".to_string())).unwrap();

    assert!(fsm.process(PipelineEvent::Built).is_err());
    assert!(fsm
        .process(PipelineEvent::Failed("again".to_string()))
        .is_err());
    assert_eq!(fsm.error(), Some("boom"));
}

#[test]
fn test_state_names() {
    assert_eq!(PipelineState::ImagePushed.to_string(), "image-pushed");
    assert_eq!(PipelineState::RolloutStable.to_string(), "rollout-stable");
    assert_eq!(
        serde_json::to_string(&PipelineState::TaskRegistered).unwrap(),
        "\"task_registered\""
    );
}
