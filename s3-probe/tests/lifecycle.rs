mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{target, Harness, BUCKET};
use common_s3::{BodyFault, MockOp, MockS3Client, S3Error};
use s3_probe::lifecycle::{LifecycleEngine, Stage, StepStatus};
use s3_probe::metrics::InMemorySink;
use s3_probe::store::{MultipartSettings, ObjectStore};
use s3_probe::target::Operation;
use s3_probe::verify::IntegrityVerdict;

const FIVE_SECS: Duration = Duration::from_secs(5);

fn failure(message: &str) -> S3Error {
    S3Error::OperationFailed(message.to_string())
}

#[tokio::test]
async fn healthy_run_round_trips_and_cleans_up() {
    let harness = Harness::new(MockS3Client::new());
    let provisioned = harness.provision(&[target("a", 1024, FIVE_SECS)]).await;
    let a = &provisioned[0];

    let outcome = harness.engine.run(a).await;

    assert_eq!(
        outcome.stages,
        vec![
            Stage::Start,
            Stage::Uploading,
            Stage::Downloading,
            Stage::Verifying,
            Stage::LocalCleanup,
            Stage::Deleting,
            Stage::Done,
        ]
    );
    assert_eq!(outcome.integrity, IntegrityVerdict::Match);
    assert_eq!(
        harness.client.ops_for("a"),
        vec![MockOp::PutObject, MockOp::GetObject, MockOp::DeleteObject]
    );

    let sink = &harness.sink;
    for operation in Operation::ALL {
        assert_eq!(sink.flags("a", operation), Some((false, false)), "{operation}");
        assert!(sink.duration("a", operation).is_some(), "{operation}");
    }
    assert_eq!(sink.integrity("a"), Some(true));

    // remote object and downloaded copy are gone, the artifact stays for the next cycle
    assert!(harness.client.object(BUCKET, "a").is_none());
    assert!(!a.download_path.exists());
    assert_eq!(tokio::fs::metadata(&a.artifact).await.unwrap().len(), 1024);
}

#[tokio::test]
async fn upload_failure_skips_every_later_step() {
    let harness = Harness::new(MockS3Client::new().fail_on(MockOp::PutObject, failure("SlowDown")));
    let provisioned = harness.provision(&[target("a", 1024, FIVE_SECS)]).await;

    let outcome = harness.engine.run(&provisioned[0]).await;

    assert_eq!(outcome.stages, vec![Stage::Start, Stage::Uploading, Stage::Done]);
    assert_eq!(outcome.upload.map(|s| s.status), Some(StepStatus::Failed));
    assert!(outcome.download.is_none());
    assert!(outcome.delete.is_none());
    assert_eq!(outcome.integrity, IntegrityVerdict::Skipped);
    assert_eq!(harness.client.ops_for("a"), vec![MockOp::PutObject]);

    let sink = &harness.sink;
    assert_eq!(sink.flags("a", Operation::Upload), Some((false, true)));
    assert_eq!(sink.duration("a", Operation::Upload), None);
    assert_eq!(sink.flags("a", Operation::Download), None);
    assert_eq!(sink.flags("a", Operation::Delete), None);
    assert_eq!(sink.integrity("a"), None);
}

#[tokio::test]
async fn download_failure_skips_verify_but_still_deletes() {
    let harness = Harness::new(MockS3Client::new().fail_on(MockOp::GetObject, failure("InternalError")));
    let provisioned = harness.provision(&[target("a", 1024, FIVE_SECS)]).await;

    let outcome = harness.engine.run(&provisioned[0]).await;

    assert_eq!(
        outcome.stages,
        vec![
            Stage::Start,
            Stage::Uploading,
            Stage::Downloading,
            Stage::LocalCleanup,
            Stage::Deleting,
            Stage::Done,
        ]
    );
    assert_eq!(outcome.integrity, IntegrityVerdict::Skipped);
    assert_eq!(outcome.delete.map(|s| s.status), Some(StepStatus::Succeeded));

    let sink = &harness.sink;
    assert_eq!(sink.flags("a", Operation::Download), Some((false, true)));
    assert_eq!(sink.flags("a", Operation::Delete), Some((false, false)));
    assert_eq!(sink.integrity("a"), None);
    assert!(harness.client.object(BUCKET, "a").is_none());
    assert!(!provisioned[0].download_path.exists());
}

#[tokio::test]
async fn corrupted_download_is_reported() {
    let harness = Harness::new(MockS3Client::new().corrupt_reads());
    let provisioned = harness.provision(&[target("a", 4096, FIVE_SECS)]).await;

    let outcome = harness.engine.run(&provisioned[0]).await;

    assert_eq!(outcome.integrity, IntegrityVerdict::Mismatch);
    assert_eq!(harness.sink.integrity("a"), Some(false));
    // a successful transfer of wrong bytes is not an operation error
    assert_eq!(harness.sink.flags("a", Operation::Download), Some((false, false)));
    assert_eq!(outcome.delete.map(|s| s.status), Some(StepStatus::Succeeded));
}

#[tokio::test]
async fn slow_download_times_out_without_error_flag() {
    let harness = Harness::new(
        MockS3Client::new().with_latency(MockOp::GetObject, Duration::from_secs(10)),
    );
    let mut a = target("a", 1024, FIVE_SECS);
    a.download_timeout = Duration::from_millis(100);
    let provisioned = harness.provision(&[a]).await;

    let started = Instant::now();
    let outcome = harness.engine.run(&provisioned[0]).await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(outcome.download.map(|s| s.status), Some(StepStatus::TimedOut));
    assert_eq!(harness.sink.flags("a", Operation::Download), Some((true, false)));
    assert_eq!(harness.sink.duration("a", Operation::Download), None);
    // the other steps are unaffected by the download deadline
    assert_eq!(harness.sink.flags("a", Operation::Upload), Some((false, false)));
    assert_eq!(harness.sink.flags("a", Operation::Delete), Some((false, false)));
}

#[tokio::test]
async fn delete_failure_is_flagged() {
    let harness = Harness::new(MockS3Client::new().fail_on(MockOp::DeleteObject, failure("AccessDenied")));
    let provisioned = harness.provision(&[target("a", 1024, FIVE_SECS)]).await;

    let outcome = harness.engine.run(&provisioned[0]).await;

    assert_eq!(outcome.stages.last(), Some(&Stage::Done));
    assert_eq!(outcome.integrity, IntegrityVerdict::Match);
    assert_eq!(harness.sink.flags("a", Operation::Delete), Some((false, true)));
    // a failed delete still reports how long the attempt took
    assert!(harness.sink.duration("a", Operation::Delete).is_some());
    assert!(harness.client.object(BUCKET, "a").is_some());
}

#[tokio::test]
async fn slow_upload_times_out_and_skips_every_later_step() {
    let harness = Harness::new(
        MockS3Client::new().with_latency(MockOp::PutObject, Duration::from_secs(10)),
    );
    let mut a = target("a", 1024, FIVE_SECS);
    a.upload_timeout = Duration::from_millis(100);
    let provisioned = harness.provision(&[a]).await;

    let started = Instant::now();
    let outcome = harness.engine.run(&provisioned[0]).await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(outcome.stages, vec![Stage::Start, Stage::Uploading, Stage::Done]);
    assert_eq!(outcome.upload.map(|s| s.status), Some(StepStatus::TimedOut));
    assert_eq!(harness.client.ops_for("a"), vec![MockOp::PutObject]);

    let sink = &harness.sink;
    assert_eq!(sink.flags("a", Operation::Upload), Some((true, false)));
    assert_eq!(sink.duration("a", Operation::Upload), None);
    assert_eq!(sink.flags("a", Operation::Download), None);
    assert_eq!(sink.flags("a", Operation::Delete), None);
}

#[tokio::test]
async fn slow_delete_times_out_and_still_finishes() {
    let harness = Harness::new(
        MockS3Client::new().with_latency(MockOp::DeleteObject, Duration::from_secs(10)),
    );
    let mut a = target("a", 1024, FIVE_SECS);
    a.delete_timeout = Duration::from_millis(100);
    let provisioned = harness.provision(&[a]).await;

    let started = Instant::now();
    let outcome = harness.engine.run(&provisioned[0]).await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(outcome.stages.last(), Some(&Stage::Done));
    assert_eq!(outcome.delete.map(|s| s.status), Some(StepStatus::TimedOut));
    assert_eq!(outcome.integrity, IntegrityVerdict::Match);

    let sink = &harness.sink;
    assert_eq!(sink.flags("a", Operation::Delete), Some((true, false)));
    assert!(sink.duration("a", Operation::Delete).is_some());
    assert_eq!(sink.flags("a", Operation::Upload), Some((false, false)));
    assert_eq!(sink.flags("a", Operation::Download), Some((false, false)));
    // the delete was abandoned before it removed anything
    assert!(harness.client.object(BUCKET, "a").is_some());
}

#[tokio::test]
async fn download_failing_mid_body_is_an_error_and_cleans_up() {
    let harness = Harness::new(MockS3Client::new().with_body_fault(BodyFault::ErrorAfter(100)));
    let provisioned = harness.provision(&[target("a", 1024, FIVE_SECS)]).await;
    let a = &provisioned[0];

    let outcome = harness.engine.run(a).await;

    assert_eq!(outcome.download.map(|s| s.status), Some(StepStatus::Failed));
    assert_eq!(outcome.integrity, IntegrityVerdict::Skipped);
    assert!(!outcome.stages.contains(&Stage::Verifying));
    assert_eq!(outcome.delete.map(|s| s.status), Some(StepStatus::Succeeded));

    let sink = &harness.sink;
    assert_eq!(sink.flags("a", Operation::Download), Some((false, true)));
    assert_eq!(sink.duration("a", Operation::Download), None);
    assert_eq!(sink.integrity("a"), None);
    assert!(!a.download_path.exists());
    assert!(harness.client.object(BUCKET, "a").is_none());
}

#[tokio::test]
async fn download_stalling_mid_body_times_out_and_cleans_up() {
    let harness = Harness::new(MockS3Client::new().with_body_fault(BodyFault::StallAfter(100)));
    let mut a = target("a", 1024, FIVE_SECS);
    a.download_timeout = Duration::from_millis(200);
    let provisioned = harness.provision(&[a]).await;
    let a = &provisioned[0];

    let started = Instant::now();
    let outcome = harness.engine.run(a).await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(outcome.download.map(|s| s.status), Some(StepStatus::TimedOut));
    assert_eq!(outcome.integrity, IntegrityVerdict::Skipped);
    assert_eq!(outcome.delete.map(|s| s.status), Some(StepStatus::Succeeded));

    let sink = &harness.sink;
    assert_eq!(sink.flags("a", Operation::Download), Some((true, false)));
    assert_eq!(sink.integrity("a"), None);
    assert!(!a.download_path.exists());
}

#[tokio::test]
async fn large_file_goes_through_multipart() {
    let multipart = MultipartSettings {
        threshold: 1024,
        part_size: 512,
        concurrency: 2,
    };
    let harness = Harness::with_multipart(MockS3Client::new(), multipart);
    let provisioned = harness.provision(&[target("big", 2000, FIVE_SECS)]).await;

    let outcome = harness.engine.run(&provisioned[0]).await;

    assert_eq!(outcome.integrity, IntegrityVerdict::Match);
    let ops = harness.client.ops_for("big");
    assert!(ops.contains(&MockOp::CreateMultipartUpload));
    assert_eq!(ops.iter().filter(|op| **op == MockOp::UploadPart).count(), 4);
    assert!(!ops.contains(&MockOp::PutObject));
    assert_eq!(harness.sink.flags("big", Operation::Upload), Some((false, false)));
}

#[tokio::test]
async fn empty_file_round_trips() {
    let harness = Harness::new(MockS3Client::new());
    let provisioned = harness.provision(&[target("empty", 0, FIVE_SECS)]).await;

    let outcome = harness.engine.run(&provisioned[0]).await;

    assert_eq!(outcome.integrity, IntegrityVerdict::Match);
    assert_eq!(harness.sink.integrity("empty"), Some(true));
}

#[tokio::test]
async fn failed_run_keeps_last_successful_duration() {
    let harness = Harness::new(MockS3Client::new());
    let provisioned = harness.provision(&[target("a", 1024, FIVE_SECS)]).await;
    harness.engine.run(&provisioned[0]).await;
    let before = harness.sink.duration("a", Operation::Upload);
    assert!(before.is_some());

    // same sink, store now failing every upload
    let failing = MockS3Client::new().fail_on(MockOp::PutObject, failure("SlowDown"));
    let store = ObjectStore::new(Arc::new(failing), BUCKET, common::SMALL_PARTS);
    let engine = LifecycleEngine::new(store, harness.sink.clone());
    engine.run(&provisioned[0]).await;

    assert_eq!(harness.sink.duration("a", Operation::Upload), before);
    assert_eq!(harness.sink.flags("a", Operation::Upload), Some((false, true)));
}

#[tokio::test]
async fn recovery_clears_flags() {
    let sink = Arc::new(InMemorySink::new());
    let harness = Harness::new(MockS3Client::new().fail_on(MockOp::GetObject, failure("InternalError")));
    let provisioned = harness.provision(&[target("a", 1024, FIVE_SECS)]).await;

    let failing = ObjectStore::new(Arc::new(harness.client.clone()), BUCKET, common::SMALL_PARTS);
    LifecycleEngine::new(failing, sink.clone())
        .run(&provisioned[0])
        .await;
    assert_eq!(sink.flags("a", Operation::Download), Some((false, true)));

    let healthy = ObjectStore::new(Arc::new(MockS3Client::new()), BUCKET, common::SMALL_PARTS);
    LifecycleEngine::new(healthy, sink.clone())
        .run(&provisioned[0])
        .await;
    assert_eq!(sink.flags("a", Operation::Download), Some((false, false)));
    assert_eq!(sink.integrity("a"), Some(true));
}
