mod common;

use common::{DAY, World, hash};
use object_tiering::{
    clock::Clock,
    config::TieringConfig,
    manipulators::ManipulatorKind,
    models::ObjectLocation,
    selectors,
};
use std::time::Duration;

fn config() -> TieringConfig {
    TieringConfig {
        size_threshold: 8,
        minimum_age: Duration::from_secs(DAY as u64),
        consistency_delay: Duration::from_secs(DAY as u64),
        delete_local: true,
        ..TieringConfig::default()
    }
}

const PAYLOAD: &[u8] = b"sixteen bytes!!!";

#[tokio::test]
async fn local_to_duplicated_to_external() {
    let world = World::new(config()).await;
    let h = hash(1);
    world.add_file(&h, PAYLOAD).await;

    world.run(ManipulatorKind::Checker).await;
    assert_eq!(world.location(&h).await, Some(ObjectLocation::Local));
    assert_eq!(world.record(&h).await.unwrap().filesize, Some(16));

    // Too young to push.
    let report = world.run(ManipulatorKind::Pusher).await;
    assert_eq!(report.processed, 0);

    world.advance(DAY);
    let report = world.run(ManipulatorKind::Pusher).await;
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.bytes, 16);
    assert_eq!(world.location(&h).await, Some(ObjectLocation::Duplicated));

    world.advance(DAY);
    world.run(ManipulatorKind::Deleter).await;
    assert_eq!(world.location(&h).await, Some(ObjectLocation::External));
    assert!(!world.has_local(&h));
    assert_eq!(world.read(&h).await, PAYLOAD);
}

#[tokio::test]
async fn local_copy_survives_until_consistency_delay() {
    let world = World::new(config()).await;
    let h = hash(2);
    world.add_file(&h, PAYLOAD).await;
    world.run(ManipulatorKind::Checker).await;
    world.advance(DAY);
    world.run(ManipulatorKind::Pusher).await;
    let duplicated_at = world.record(&h).await.unwrap().timeduplicated.unwrap();
    assert_eq!(duplicated_at, world.clock.now().timestamp());

    world.advance(DAY - 1);
    let report = world.run(ManipulatorKind::Deleter).await;
    assert_eq!(report.processed, 0);
    assert!(world.has_local(&h));
    assert_eq!(world.location(&h).await, Some(ObjectLocation::Duplicated));

    world.advance(1);
    let report = world.run(ManipulatorKind::Deleter).await;
    assert_eq!(report.succeeded, 1);
    assert!(!world.has_local(&h));
    assert_eq!(world.location(&h).await, Some(ObjectLocation::External));
}

#[tokio::test]
async fn failed_verification_never_duplicates_or_deletes() {
    let world = World::new(config()).await;
    let h = hash(3);
    world.add_file(&h, PAYLOAD).await;
    world.run(ManipulatorKind::Checker).await;
    world.remote.update_faults(|faults| {
        faults.corrupt_put_for.insert(h.clone());
    });

    world.advance(DAY);
    let report = world.run(ManipulatorKind::Pusher).await;
    assert_eq!(report.failed, 1);
    assert_eq!(world.location(&h).await, Some(ObjectLocation::Local));

    world.advance(30 * DAY);
    world.run(ManipulatorKind::Deleter).await;
    assert!(world.has_local(&h));
    assert_eq!(world.read(&h).await, PAYLOAD);
}

#[tokio::test]
async fn size_threshold_is_strict_for_push_and_delete() {
    let world = World::new(config()).await;
    let below = hash(7);
    let at = hash(8);
    let above = hash(9);
    world.add_file(&below, b"1234567").await;
    world.add_file(&at, b"12345678").await;
    world.add_file(&above, b"123456789").await;
    world.run(ManipulatorKind::Checker).await;

    world.advance(DAY);
    let report = world.run(ManipulatorKind::Pusher).await;
    assert_eq!(report.succeeded, 1);
    assert_eq!(world.location(&below).await, Some(ObjectLocation::Local));
    assert_eq!(world.location(&at).await, Some(ObjectLocation::Local));
    assert_eq!(world.location(&above).await, Some(ObjectLocation::Duplicated));

    world.advance(DAY);
    world.run(ManipulatorKind::Deleter).await;
    assert_eq!(world.location(&above).await, Some(ObjectLocation::External));
    assert!(world.has_local(&at));
}

#[tokio::test]
async fn pull_after_reconfiguration_restores_both_copies() {
    let mut world = World::new(config()).await;
    let h = hash(4);
    world.add_file(&h, PAYLOAD).await;
    world.run(ManipulatorKind::Checker).await;
    world.advance(DAY);
    world.run(ManipulatorKind::Pusher).await;
    world.advance(DAY);
    world.run(ManipulatorKind::Deleter).await;
    assert_eq!(world.location(&h).await, Some(ObjectLocation::External));

    world.config.size_threshold = 1024;
    let report = world.run(ManipulatorKind::Puller).await;
    assert_eq!(report.succeeded, 1);
    assert_eq!(world.location(&h).await, Some(ObjectLocation::Duplicated));
    assert!(world.has_local(&h));
    assert!(world.remote.stored(&h).is_some());
    assert_eq!(world.read(&h).await, PAYLOAD);

    // Small objects are never deleted locally, so they stay duplicated.
    world.advance(10 * DAY);
    world.run(ManipulatorKind::Deleter).await;
    assert_eq!(world.location(&h).await, Some(ObjectLocation::Duplicated));
}

#[tokio::test]
async fn rerunning_changes_nothing() {
    let world = World::new(config()).await;
    let lost = hash(5);
    world.add_file_row(&lost, 16).await;
    world
        .registry
        .insert_if_absent(&lost, ObjectLocation::Error, Some(16), world.clock.now())
        .await
        .unwrap();

    for _ in 0..2 {
        let report = world.run(ManipulatorKind::Recoverer).await;
        assert_eq!(report.processed, 1);
        assert_eq!(report.succeeded, 0);
        assert_eq!(world.location(&lost).await, Some(ObjectLocation::Error));
    }

    let pushed = hash(6);
    world.add_file(&pushed, PAYLOAD).await;
    world.run(ManipulatorKind::Checker).await;
    world.advance(DAY);
    world.run(ManipulatorKind::Pusher).await;
    let before = world.record(&pushed).await;
    let report = world.run(ManipulatorKind::Pusher).await;
    assert_eq!(report.processed, 0);
    assert_eq!(world.record(&pushed).await, before);
    assert_eq!(world.remote.put_count(), 1);
}

#[tokio::test]
async fn recoverer_heals_objects_that_reappear() {
    let world = World::new(config()).await;
    let h = hash(10);
    world.add_file(&h, PAYLOAD).await;
    world
        .registry
        .insert_if_absent(&h, ObjectLocation::Error, Some(16), world.clock.now())
        .await
        .unwrap();

    let report = world.run(ManipulatorKind::Recoverer).await;
    assert_eq!(report.succeeded, 1);
    assert_eq!(world.location(&h).await, Some(ObjectLocation::Local));
}

#[tokio::test]
async fn selectors_cap_batches_without_claiming() {
    let world = World::new(TieringConfig {
        batch_size: 100,
        ..config()
    })
    .await;
    sqlx::query(
        "WITH RECURSIVE seq(n) AS (SELECT 1 UNION ALL SELECT n + 1 FROM seq WHERE n < 10000)
         INSERT INTO objects (contenthash, location, filesize, timeduplicated)
         SELECT printf('%040d', n), 2, 1, 0 FROM seq",
    )
    .execute(&*world.db)
    .await
    .unwrap();

    let ctx = world.context();
    let selector = selectors::build(ManipulatorKind::Puller, &ctx);
    let first = selector.select(world.clock.now()).await.unwrap();
    let second = selector.select(world.clock.now()).await.unwrap();
    assert_eq!(first.len(), 100);
    assert_eq!(first, second);
}

#[tokio::test]
async fn one_bad_object_does_not_stop_the_batch() {
    let world = World::new(config()).await;
    for n in 1..=5 {
        world.add_file(&hash(n), PAYLOAD).await;
    }
    world.run(ManipulatorKind::Checker).await;
    world.remote.update_faults(|faults| {
        faults.fail_put_for.insert(hash(3));
    });

    world.advance(DAY);
    let report = world.run(ManipulatorKind::Pusher).await;
    assert_eq!(report.processed, 5);
    assert_eq!(report.succeeded, 4);
    assert_eq!(report.failed, 1);
    assert_eq!(world.location(&hash(3)).await, Some(ObjectLocation::Local));
    for n in [4, 5] {
        assert_eq!(world.location(&hash(n)).await, Some(ObjectLocation::Duplicated));
    }
}

#[tokio::test]
async fn vanished_local_source_goes_to_error() {
    let world = World::new(config()).await;
    let h = hash(11);
    world.add_file(&h, PAYLOAD).await;
    world.run(ManipulatorKind::Checker).await;
    std::fs::remove_file(world.fs.resolve_local_path(&h)).unwrap();

    world.advance(DAY);
    let report = world.run(ManipulatorKind::Pusher).await;
    assert_eq!(report.failed, 1);
    assert_eq!(world.location(&h).await, Some(ObjectLocation::Error));
}
