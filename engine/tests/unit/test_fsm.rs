//! Deployment state machine tests

mod common;

use hubspoke_engine::deploy::fsm::{validate_transition, DeploymentRecord, Phase, STATE_VERSION};
use hubspoke_engine::deploy::state::StateMachine;
use hubspoke_engine::errors::EngineError;
use hubspoke_engine::filesys::file::File;
use tokio_test::{assert_err, assert_ok};

use common::temp_layout;

#[test]
fn test_transition_table_is_exact() {
    let allowed = [
        (Phase::Unknown, Phase::Initializing),
        (Phase::Initializing, Phase::Deploying),
        (Phase::Deploying, Phase::Configuring),
        (Phase::Configuring, Phase::Verifying),
        (Phase::Verifying, Phase::Complete),
    ];

    for from in Phase::ALL {
        for to in Phase::ALL {
            let expected = to == Phase::Failed || allowed.contains(&(from, to));
            assert_eq!(
                validate_transition(from, to),
                expected,
                "{} -> {}",
                from,
                to
            );
        }
    }

    assert!(!validate_transition(Phase::Complete, Phase::Deploying));
    assert!(validate_transition(Phase::Deploying, Phase::Failed));
}

#[tokio::test]
async fn test_missing_record_is_unknown() {
    let states = StateMachine::new(temp_layout("fsm-unknown").await);
    assert_eq!(states.get_state("usa").await.unwrap(), Phase::Unknown);
    assert!(!states.should_skip_step("usa", "certs").await.unwrap());
    assert_ok!(states.validate_integrity("usa").await);
}

#[tokio::test]
async fn test_full_deployment_flow() {
    let states = StateMachine::new(temp_layout("fsm-flow").await);

    for phase in [
        Phase::Initializing,
        Phase::Deploying,
        Phase::Configuring,
        Phase::Verifying,
        Phase::Complete,
    ] {
        states.set_state("usa", phase).await.unwrap();
        assert_eq!(states.get_state("usa").await.unwrap(), phase);
    }

    let record = states.snapshot("usa").await.unwrap().unwrap();
    assert_eq!(record.version.as_deref(), Some(STATE_VERSION));
    assert_ok!(states.validate_integrity("usa").await);
}

#[tokio::test]
async fn test_invalid_transition_is_rejected_and_not_written() {
    let states = StateMachine::new(temp_layout("fsm-invalid").await);

    let result = states.set_state("usa", Phase::Complete).await;
    assert!(matches!(
        result,
        Err(EngineError::InvalidTransition {
            from: Phase::Unknown,
            to: Phase::Complete
        })
    ));
    assert!(states.snapshot("usa").await.unwrap().is_none());

    states.set_state("usa", Phase::Initializing).await.unwrap();
    assert_err!(states.set_state("usa", Phase::Verifying).await);
    assert_eq!(states.get_state("usa").await.unwrap(), Phase::Initializing);
}

#[tokio::test]
async fn test_failed_from_any_phase() {
    let states = StateMachine::new(temp_layout("fsm-fail").await);
    states.set_state("fra", Phase::Initializing).await.unwrap();
    states.set_state("fra", Phase::Deploying).await.unwrap();
    states.set_state("fra", Phase::Failed).await.unwrap();
    assert_eq!(states.get_state("fra").await.unwrap(), Phase::Failed);

    // Failed is terminal except for failing again
    assert_err!(states.set_state("fra", Phase::Deploying).await);
}

#[tokio::test]
async fn test_steps_round_trip() {
    let layout = temp_layout("fsm-steps").await;
    let states = StateMachine::new(layout.clone());

    states.set_state("gbr", Phase::Initializing).await.unwrap();
    states.mark_step_complete("gbr", "certificates").await.unwrap();
    states.mark_step_complete("gbr", "secrets").await.unwrap();
    states.mark_step_complete("gbr", "certificates").await.unwrap();

    // A fresh machine over the same storage sees the same record
    let resumed = StateMachine::new(layout);
    assert!(resumed.should_skip_step("gbr", "certificates").await.unwrap());
    assert!(resumed.should_skip_step("gbr", "secrets").await.unwrap());
    assert!(!resumed.should_skip_step("gbr", "federation").await.unwrap());
    assert_eq!(resumed.get_state("gbr").await.unwrap(), Phase::Initializing);

    let record = resumed.snapshot("gbr").await.unwrap().unwrap();
    assert_eq!(record.completed_steps.len(), 2);
    assert_ok!(resumed.validate_integrity("gbr").await);
}

#[tokio::test]
async fn test_instances_are_isolated() {
    let states = StateMachine::new(temp_layout("fsm-isolated").await);
    states.set_state("usa", Phase::Initializing).await.unwrap();
    states.mark_step_complete("usa", "certs").await.unwrap();

    assert_eq!(states.get_state("deu").await.unwrap(), Phase::Unknown);
    assert!(!states.should_skip_step("deu", "certs").await.unwrap());
}

async fn tamper(file: &File, edit: impl FnOnce(&mut DeploymentRecord)) {
    let mut record: DeploymentRecord = file.read_json().await.unwrap();
    edit(&mut record);
    file.write_json(&record).await.unwrap();
}

#[tokio::test]
async fn test_corrupted_fields_fail_integrity() {
    let layout = temp_layout("fsm-corrupt").await;
    let states = StateMachine::new(layout.clone());
    let file = layout.state_file("usa");

    let edits: Vec<Box<dyn FnOnce(&mut DeploymentRecord)>> = vec![
        Box::new(|r| r.phase = Phase::Complete),
        Box::new(|r| {
            r.completed_steps.insert("forged".to_string());
        }),
        Box::new(|r| r.updated_at = r.updated_at + chrono::Duration::seconds(1)),
        Box::new(|r| r.checksum = "0".repeat(64)),
    ];

    for edit in edits {
        states.clear_state("usa").await.unwrap();
        states.set_state("usa", Phase::Initializing).await.unwrap();
        states.mark_step_complete("usa", "certs").await.unwrap();
        assert_ok!(states.validate_integrity("usa").await);

        tamper(&file, edit).await;
        assert!(matches!(
            states.validate_integrity("usa").await,
            Err(EngineError::CorruptState(_))
        ));
    }
}

#[tokio::test]
async fn test_corrupt_record_is_never_resealed() {
    let layout = temp_layout("fsm-reseal").await;
    let states = StateMachine::new(layout.clone());
    let file = layout.state_file("usa");

    states.set_state("usa", Phase::Initializing).await.unwrap();
    states.mark_step_complete("usa", "certs").await.unwrap();
    tamper(&file, |r| {
        r.completed_steps.insert("forged".to_string());
    })
    .await;
    let tampered = file.read_json::<DeploymentRecord>().await.unwrap();

    assert!(matches!(
        states.should_skip_step("usa", "forged").await,
        Err(EngineError::CorruptState(_))
    ));
    assert!(matches!(
        states.get_state("usa").await,
        Err(EngineError::CorruptState(_))
    ));
    assert!(matches!(
        states.mark_step_complete("usa", "secrets").await,
        Err(EngineError::CorruptState(_))
    ));
    assert!(matches!(
        states.set_state("usa", Phase::Deploying).await,
        Err(EngineError::CorruptState(_))
    ));

    // Writes were refused, so the damage is still detectable
    assert_eq!(file.read_json::<DeploymentRecord>().await.unwrap(), tampered);
    assert!(matches!(
        states.validate_integrity("usa").await,
        Err(EngineError::CorruptState(_))
    ));

    // Teardown is the way back
    states.clear_state("usa").await.unwrap();
    states.set_state("usa", Phase::Initializing).await.unwrap();
    assert!(!states.should_skip_step("usa", "forged").await.unwrap());
    assert_ok!(states.validate_integrity("usa").await);
}

#[tokio::test]
async fn test_truncated_record_is_corrupt() {
    let layout = temp_layout("fsm-truncated").await;
    let states = StateMachine::new(layout.clone());
    states.set_state("usa", Phase::Initializing).await.unwrap();

    layout
        .state_file("usa")
        .write_atomic(br#"{"version":"2.0","phase":"initi"#)
        .await
        .unwrap();

    assert!(matches!(
        states.get_state("usa").await,
        Err(EngineError::CorruptState(_))
    ));
    assert!(matches!(
        states.validate_integrity("usa").await,
        Err(EngineError::CorruptState(_))
    ));
}

#[tokio::test]
async fn test_stale_version_rejected_and_unversioned_migrated() {
    let layout = temp_layout("fsm-version").await;
    let states = StateMachine::new(layout.clone());
    let file = layout.state_file("usa");

    states.set_state("usa", Phase::Initializing).await.unwrap();
    tamper(&file, |r| {
        r.version = Some("1.0".to_string());
        r.checksum = r.compute_checksum();
    })
    .await;
    assert!(matches!(
        states.validate_integrity("usa").await,
        Err(EngineError::CorruptState(_))
    ));

    tamper(&file, |r| {
        r.version = None;
        r.checksum = r.compute_checksum();
    })
    .await;
    assert_ok!(states.validate_integrity("usa").await);

    states.set_state("usa", Phase::Deploying).await.unwrap();
    let record = states.snapshot("usa").await.unwrap().unwrap();
    assert_eq!(record.version.as_deref(), Some(STATE_VERSION));
}

#[tokio::test]
async fn test_clear_state_resets_to_unknown() {
    let states = StateMachine::new(temp_layout("fsm-clear").await);
    states.set_state("usa", Phase::Initializing).await.unwrap();
    states.clear_state("usa").await.unwrap();
    assert_eq!(states.get_state("usa").await.unwrap(), Phase::Unknown);

    // Clearing twice is fine
    states.clear_state("usa").await.unwrap();
}

#[tokio::test]
async fn test_concurrent_step_marks_are_not_lost() {
    let states = std::sync::Arc::new(StateMachine::new(temp_layout("fsm-concurrent").await));
    states.set_state("usa", Phase::Initializing).await.unwrap();

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let states = states.clone();
            tokio::spawn(async move {
                states
                    .mark_step_complete("usa", &format!("step-{}", i))
                    .await
                    .unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    let record = states.snapshot("usa").await.unwrap().unwrap();
    assert_eq!(record.completed_steps.len(), 16);
    assert_ok!(states.validate_integrity("usa").await);
}
