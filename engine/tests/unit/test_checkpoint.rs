//! Checkpoint store tests

mod common;

use std::time::Duration;

use hubspoke_engine::deploy::checkpoint::{CheckpointLevel, CheckpointRefs, CheckpointStore};
use hubspoke_engine::deploy::fsm::Phase;
use hubspoke_engine::errors::EngineError;

use common::{temp_layout, ManualClock};

#[tokio::test]
async fn test_no_checkpoints() {
    let store = CheckpointStore::new(temp_layout("cp-empty").await);
    assert!(matches!(
        store.find_latest("usa").await,
        Err(EngineError::CheckpointNotFound(_))
    ));
    assert!(store.list("usa").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_latest_is_second() {
    let clock = ManualClock::new();
    let store = CheckpointStore::with_clock(temp_layout("cp-latest").await, clock.clone());

    let first = store
        .create_checkpoint("usa", CheckpointLevel::Container, "containers up")
        .await
        .unwrap();
    clock.advance(Duration::from_secs(30));
    let second = store
        .create_checkpoint("usa", CheckpointLevel::Complete, "deployment complete")
        .await
        .unwrap();

    assert_ne!(first, second);
    assert_eq!(store.find_latest("usa").await.unwrap(), second);
}

#[tokio::test]
async fn test_same_timestamp_uses_insertion_order() {
    let clock = ManualClock::new();
    let store = CheckpointStore::with_clock(temp_layout("cp-tie").await, clock);

    let mut ids = Vec::new();
    for level in [
        CheckpointLevel::Container,
        CheckpointLevel::Configuration,
        CheckpointLevel::Federation,
    ] {
        ids.push(
            store
                .create_checkpoint("deu", level, "same instant")
                .await
                .unwrap(),
        );
    }

    assert_eq!(store.find_latest("deu").await.unwrap(), ids[2]);
    let listed: Vec<String> = store
        .list("deu")
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.id)
        .collect();
    assert_eq!(listed, ids);
}

#[tokio::test]
async fn test_checkpoint_record_contents() {
    let clock = ManualClock::new();
    let store = CheckpointStore::with_clock(temp_layout("cp-record").await, clock);

    let refs = CheckpointRefs {
        phase: Some(Phase::Deploying),
        services: vec!["postgres".to_string(), "keycloak".to_string()],
    };
    let id = store
        .create_checkpoint_with_refs("gbr", CheckpointLevel::Container, "core up", refs.clone())
        .await
        .unwrap();

    let checkpoint = store.load("gbr", &id).await.unwrap();
    assert_eq!(checkpoint.id, id);
    assert_eq!(checkpoint.instance_code, "gbr");
    assert_eq!(checkpoint.level, CheckpointLevel::Container);
    assert_eq!(checkpoint.description, "core up");
    assert_eq!(checkpoint.sequence, 0);
    assert_eq!(checkpoint.refs, refs);
    assert!(id.starts_with("20250101T120000"));
}

#[tokio::test]
async fn test_instances_do_not_share_checkpoints() {
    let store = CheckpointStore::new(temp_layout("cp-scoped").await);
    let usa = store
        .create_checkpoint("usa", CheckpointLevel::Complete, "done")
        .await
        .unwrap();

    assert_eq!(store.find_latest("usa").await.unwrap(), usa);
    assert!(matches!(
        store.find_latest("fra").await,
        Err(EngineError::CheckpointNotFound(_))
    ));
    assert!(matches!(
        store.load("fra", &usa).await,
        Err(EngineError::CheckpointNotFound(_))
    ));
}

#[tokio::test]
async fn test_checkpoint_files_are_write_once() {
    let layout = temp_layout("cp-immutable").await;
    let store = CheckpointStore::new(layout.clone());
    let id = store
        .create_checkpoint("usa", CheckpointLevel::Container, "original")
        .await
        .unwrap();

    let file = layout.checkpoints_dir("usa").file(&format!("{}.json", id));
    let overwrite = file.write_json_new(&serde_json::json!({"description": "edited"})).await;
    assert!(matches!(
        overwrite,
        Err(EngineError::IoError(ref e)) if e.kind() == std::io::ErrorKind::AlreadyExists
    ));
    assert_eq!(store.load("usa", &id).await.unwrap().description, "original");
}

#[test]
fn test_levels_are_ordered_coarse_to_fine() {
    assert!(CheckpointLevel::Container < CheckpointLevel::Configuration);
    assert!(CheckpointLevel::Configuration < CheckpointLevel::Federation);
    assert!(CheckpointLevel::Federation < CheckpointLevel::Complete);
}
