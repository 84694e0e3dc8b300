//! End-to-end job flow: register, transform, materialize, build, fail.

mod common;

use common::*;

use coordinator_core::common::resource::{ResourceId, ResourceType};
use coordinator_core::common::NameVariant;
use coordinator_core::kernel::metadata::resources::Status;
use coordinator_core::kernel::metadata::MetadataServer;

/// Register a primary, a transformation over it, then a feature - the
/// whole chain converges to READY and the template expands against the
/// user's own table name.
#[tokio::test]
async fn primary_then_transformation_then_feature() {
    let harness = TestHarness::start().await;
    harness.seed().await;

    harness
        .metadata
        .create_source_variant(primary_source("txns", "v1", "Transactions"))
        .await
        .unwrap();
    let source_id = ResourceId::new("txns", "v1", ResourceType::SourceVariant);
    harness.await_status(&source_id, Status::Ready).await;

    harness
        .metadata
        .create_source_variant(sql_transformation(
            "avg_amt",
            "v1",
            "SELECT id, avg(x) FROM {{ txns.v1 }}",
            vec![NameVariant::new("txns", "v1")],
        ))
        .await
        .unwrap();
    let transformation_id = ResourceId::new("avg_amt", "v1", ResourceType::SourceVariant);
    harness.await_status(&transformation_id, Status::Ready).await;

    let query = harness
        .catalog
        .offline()
        .transformation_query(&transformation_id)
        .await
        .expect("transformation table should exist");
    assert_eq!(query, "SELECT id, avg(x) FROM \"Transactions\"");

    harness
        .metadata
        .create_feature_variant(feature(
            "avg_amt_feat",
            "v1",
            NameVariant::new("avg_amt", "v1"),
        ))
        .await
        .unwrap();
    let feature_id = ResourceId::new("avg_amt_feat", "v1", ResourceType::FeatureVariant);
    harness.await_status(&feature_id, Status::Ready).await;

    // The feature landed in both stores and its job key is gone.
    assert!(harness.catalog.offline().materialization_exists(&feature_id).await);
    assert!(harness.catalog.online().table_exists("avg_amt_feat", "v1").await);
    harness.await_key_absent(&feature_id.job_key()).await;
}

/// A FAILED dependency surfaces as a job failure naming the dependency.
#[tokio::test]
async fn failed_dependency_fails_the_feature() {
    let harness = TestHarness::start().await;
    harness.seed().await;

    harness
        .metadata
        .create_source_variant(primary_source("s", "v", "SomeTable"))
        .await
        .unwrap();
    let source_id = ResourceId::new("s", "v", ResourceType::SourceVariant);
    harness.await_status(&source_id, Status::Ready).await;
    harness
        .metadata
        .set_status(&source_id, Status::Failed, Some("backfill exploded".into()))
        .await
        .unwrap();

    harness
        .metadata
        .create_feature_variant(feature("f", "v", NameVariant::new("s", "v")))
        .await
        .unwrap();
    let feature_id = ResourceId::new("f", "v", ResourceType::FeatureVariant);

    let status = harness.await_status(&feature_id, Status::Failed).await;
    let message = status.error_message.unwrap_or_default();
    assert!(
        message.contains("dependency failed"),
        "error should name the failed dependency: {message}"
    );
    assert!(message.contains("s.v"));
}

/// Injected runner failures exhaust the attempt budget: the job key is
/// deleted and the variant stays FAILED.
#[tokio::test]
async fn attempt_exhaustion_deletes_the_job() {
    let harness = TestHarness::start_failing_materialize().await;
    harness.seed().await;

    harness
        .metadata
        .create_source_variant(primary_source("txns", "v1", "Transactions"))
        .await
        .unwrap();
    let source_id = ResourceId::new("txns", "v1", ResourceType::SourceVariant);
    harness.await_status(&source_id, Status::Ready).await;

    harness
        .metadata
        .create_feature_variant(feature("f", "v", NameVariant::new("txns", "v1")))
        .await
        .unwrap();
    let feature_id = ResourceId::new("f", "v", ResourceType::FeatureVariant);

    let status = harness.await_status(&feature_id, Status::Failed).await;
    assert!(status
        .error_message
        .unwrap_or_default()
        .contains("injected materialize failure"));
    harness.await_key_absent(&feature_id.job_key()).await;
}

/// Label then training set: every dependency is awaited, and the
/// training set converges once the whole graph is READY.
#[tokio::test]
async fn training_set_builds_after_all_dependencies() {
    let harness = TestHarness::start().await;
    harness.seed().await;

    harness
        .metadata
        .create_source_variant(primary_source("txns", "v1", "Transactions"))
        .await
        .unwrap();
    let source_nv = NameVariant::new("txns", "v1");
    harness
        .await_status(
            &ResourceId::new("txns", "v1", ResourceType::SourceVariant),
            Status::Ready,
        )
        .await;

    harness
        .metadata
        .create_feature_variant(feature("avg_amt", "v1", source_nv.clone()))
        .await
        .unwrap();
    harness
        .metadata
        .create_label_variant(label("churned", "v1", source_nv))
        .await
        .unwrap();
    harness
        .await_status(
            &ResourceId::new("churned", "v1", ResourceType::LabelVariant),
            Status::Ready,
        )
        .await;

    harness
        .metadata
        .create_training_set_variant(training_set(
            "churn_data",
            "v1",
            NameVariant::new("churned", "v1"),
            vec![NameVariant::new("avg_amt", "v1")],
        ))
        .await
        .unwrap();
    let ts_id = ResourceId::new("churn_data", "v1", ResourceType::TrainingSetVariant);
    harness.await_status(&ts_id, Status::Ready).await;
    harness.await_key_absent(&ts_id.job_key()).await;

    // P3: everything the training set depends on is READY too.
    for dep in [
        ResourceId::new("txns", "v1", ResourceType::SourceVariant),
        ResourceId::new("avg_amt", "v1", ResourceType::FeatureVariant),
        ResourceId::new("churned", "v1", ResourceType::LabelVariant),
    ] {
        let status = harness.metadata.get_status(&dep).await.unwrap();
        assert_eq!(status.status, Status::Ready, "{dep} should be READY");
    }
}

/// A label staged for deletion is dropped at the provider and removed
/// from the graph.
#[tokio::test]
async fn staged_label_deletion_runs() {
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
        .create_label_variant(label("churned", "v1", NameVariant::new("txns", "v1")))
        .await
        .unwrap();
    let label_id = ResourceId::new("churned", "v1", ResourceType::LabelVariant);
    harness.await_status(&label_id, Status::Ready).await;

    harness.metadata.stage_label_deletion(&label_id).await.unwrap();
    harness.await_key_absent(&label_id.job_key()).await;

    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    loop {
        if harness
            .metadata
            .get_label_variant(&label_id.name_variant())
            .await
            .is_err()
        {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "label should be removed from the graph"
        );
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
}
