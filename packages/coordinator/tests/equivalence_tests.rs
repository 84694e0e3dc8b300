//! Re-creation semantics: equivalent definitions merge, conflicting ones
//! are rejected without side effects.

mod common;

use common::*;

use syncstore::StateStore;

use coordinator_core::common::resource::{ResourceId, ResourceType};
use coordinator_core::common::{Error, NameVariant};
use coordinator_core::kernel::metadata::resources::{Status, Tags};
use coordinator_core::kernel::metadata::{CreateOutcome, MetadataServer};

/// Re-creating an identical source merges tags and properties and leaves
/// the READY status alone.
#[tokio::test]
async fn equivalent_recreate_is_a_merge() {
    let harness = TestHarness::start().await;
    harness.seed().await;

    let mut first = primary_source("s", "v", "SomeTable");
    first.tags = ["original"].into_iter().collect();
    first.properties.0.insert("team".into(), "ml".into());
    harness.metadata.create_source_variant(first).await.unwrap();

    let id = ResourceId::new("s", "v", ResourceType::SourceVariant);
    harness.await_status(&id, Status::Ready).await;

    let mut again = primary_source("s", "v", "SomeTable");
    again.tags = ["original", "resubmitted"].into_iter().collect();
    again.properties.0.insert("team".into(), "platform".into());
    let outcome = harness.metadata.create_source_variant(again).await.unwrap();
    assert_eq!(outcome, CreateOutcome::Merged);

    let stored = harness
        .metadata
        .get_source_variant(&NameVariant::new("s", "v"))
        .await
        .unwrap();
    // Status untouched, tags unioned, properties last-wins.
    assert_eq!(stored.status.status, Status::Ready);
    assert_eq!(
        stored.tags,
        ["original", "resubmitted"].into_iter().collect::<Tags>()
    );
    assert_eq!(stored.properties.0.get("team").unwrap(), "platform");

    // A merge queues no second job.
    assert!(harness.store.get(&id.job_key()).await.unwrap().is_none());
}

/// Re-creating with a different definition after READY is rejected and
/// the stored variant is untouched.
#[tokio::test]
async fn conflicting_recreate_is_rejected() {
    let harness = TestHarness::start().await;
    harness.seed().await;

    harness
        .metadata
        .create_source_variant(primary_source("s", "v", "SomeTable"))
        .await
        .unwrap();
    let id = ResourceId::new("s", "v", ResourceType::SourceVariant);
    harness.await_status(&id, Status::Ready).await;

    let conflicting = primary_source("s", "v", "ADifferentTable");
    let err = harness
        .metadata
        .create_source_variant(conflicting)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ResourceChanged { .. }));

    let stored = harness
        .metadata
        .get_source_variant(&NameVariant::new("s", "v"))
        .await
        .unwrap();
    assert_eq!(stored.status.status, Status::Ready);
}

/// Conflicting SQL after READY is the canonical ResourceChanged case.
#[tokio::test]
async fn changed_sql_query_is_resource_changed() {
    let harness = TestHarness::start().await;
    harness.seed().await;

    harness
        .metadata
        .create_source_variant(primary_source("txns", "v1", "Transactions"))
        .await
        .unwrap();
    harness
        .await_status(
            &ResourceId::new("txns", "v1", ResourceType::SourceVariant),
            Status::Ready,
        )
        .await;

    harness
        .metadata
        .create_source_variant(sql_transformation(
            "avg",
            "v1",
            "SELECT avg(x) FROM {{ txns.v1 }}",
            vec![NameVariant::new("txns", "v1")],
        ))
        .await
        .unwrap();
    let id = ResourceId::new("avg", "v1", ResourceType::SourceVariant);
    harness.await_status(&id, Status::Ready).await;

    let err = harness
        .metadata
        .create_source_variant(sql_transformation(
            "avg",
            "v1",
            "SELECT max(x) FROM {{ txns.v1 }}",
            vec![NameVariant::new("txns", "v1")],
        ))
        .await
        .unwrap_err();
    match err {
        Error::ResourceChanged { reason, .. } => assert!(reason.contains("sql query")),
        other => panic!("expected ResourceChanged, got {other}"),
    }
}

/// Names violating the naming rule are rejected before anything is
/// created.
#[tokio::test]
async fn invalid_variant_names_are_rejected() {
    let harness = TestHarness::start().await;
    harness.seed().await;

    let err = harness
        .metadata
        .create_source_variant(primary_source("double__underscore", "v", "T"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidResourceVariantName(_)));

    let err = harness
        .metadata
        .create_source_variant(primary_source("ok", "_leading", "T"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidResourceVariantName(_)));
}
