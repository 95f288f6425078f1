use common::storage::ContentHash;
use common::{IndicatorType, JobStatus};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};

use ingestor::entity::{extracted_indicator, processed_file, processing_job};
use ingestor::worker::{JobOutcome, process_event};

use std::sync::Arc;

use crate::support::{
    PasswordRequiredExtractor, event, harness, harness_with, harness_with_extractor,
    leftover_work_dirs, zip_bytes,
};

#[tokio::test]
async fn archive_completes_and_mines_indicators() {
    let h = harness().await;
    let bytes = zip_bytes(&[("a.txt", b"admin@example.gov\n10.0.0.5\n")]);
    let ev = event(42, 7, 1001, "leak.zip", bytes.len() as u64);
    h.gateway.add_file(&ev.file_ref, bytes.clone()).await;

    let outcome = process_event(&h.ctx, &ev).await.unwrap();
    assert_eq!(outcome, JobOutcome::Completed);

    let file = processed_file::Entity::find_by_id("42_7_1001")
        .one(&h.db)
        .await
        .unwrap()
        .expect("processed file row");
    assert_eq!(file.filename, "leak.zip");
    assert_eq!(file.size_bytes, bytes.len() as i64);
    assert_eq!(file.file_hash, ContentHash::compute(&bytes).to_hex());
    assert!(h.store_root.join(&file.storage_path).exists());

    let jobs = processing_job::Entity::find().all(&h.db).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Completed);
    assert_eq!(jobs[0].file_hash.as_deref(), Some(file.file_hash.as_str()));

    let indicators = extracted_indicator::Entity::find()
        .order_by_asc(extracted_indicator::Column::SourceLine)
        .all(&h.db)
        .await
        .unwrap();
    assert_eq!(indicators.len(), 2);
    assert_eq!(indicators[0].indicator_type, IndicatorType::Email);
    assert_eq!(indicators[0].value, "admin@example.gov");
    assert_eq!(indicators[0].source_relative_path, "a.txt");
    assert_eq!(indicators[0].source_line, 1);
    assert_eq!(indicators[0].source_file_hash, file.file_hash);
    assert_eq!(indicators[1].indicator_type, IndicatorType::Ipv4);
    assert_eq!(indicators[1].value, "10.0.0.5");
    assert_eq!(indicators[1].source_line, 2);

    assert_eq!(leftover_work_dirs(&h), 0);
}

#[tokio::test]
async fn redelivered_event_is_skipped_before_download() {
    let h = harness().await;
    let bytes = b"plain document".to_vec();
    let ev = event(42, 7, 1001, "doc.bin", bytes.len() as u64);
    h.gateway.add_file(&ev.file_ref, bytes).await;

    assert_eq!(process_event(&h.ctx, &ev).await.unwrap(), JobOutcome::Completed);
    assert_eq!(
        process_event(&h.ctx, &ev).await.unwrap(),
        JobOutcome::SkippedDuplicate
    );

    // One file row, one job row: the duplicate wrote nothing.
    assert_eq!(
        processed_file::Entity::find().all(&h.db).await.unwrap().len(),
        1
    );
    assert_eq!(
        processing_job::Entity::find().all(&h.db).await.unwrap().len(),
        1
    );
    // The duplicate never touched the gateway again.
    assert_eq!(h.gateway.attempts(&ev.file_ref).await, 1);
}

#[tokio::test]
async fn transient_download_failures_retry_then_succeed() {
    let h = harness().await;
    let bytes = b"eventually delivered".to_vec();
    let ev = event(1, 2, 3, "doc.bin", bytes.len() as u64);
    h.gateway.add_file(&ev.file_ref, bytes.clone()).await;
    h.gateway.fail_downloads(&ev.file_ref, 2).await;

    let outcome = process_event(&h.ctx, &ev).await.unwrap();
    assert_eq!(outcome, JobOutcome::Completed);
    assert_eq!(h.gateway.attempts(&ev.file_ref).await, 3);

    let file = processed_file::Entity::find_by_id(ev.file_ref.token())
        .one(&h.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(file.file_hash, ContentHash::compute(&bytes).to_hex());
}

#[tokio::test]
async fn download_failures_past_cap_fail_the_job() {
    let h = harness().await;
    let bytes = b"never arrives".to_vec();
    let ev = event(1, 2, 3, "doc.bin", bytes.len() as u64);
    h.gateway.add_file(&ev.file_ref, bytes).await;
    h.gateway.fail_downloads(&ev.file_ref, 50).await;

    let outcome = process_event(&h.ctx, &ev).await.unwrap();
    assert_eq!(outcome, JobOutcome::Failed);
    assert_eq!(h.gateway.attempts(&ev.file_ref).await, 5);

    let jobs = processing_job::Entity::find().all(&h.db).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Failed);
    assert!(
        jobs[0]
            .error
            .as_deref()
            .unwrap()
            .starts_with("transient_network")
    );
    assert!(
        processed_file::Entity::find()
            .all(&h.db)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn identical_bytes_from_two_refs_share_one_stored_file() {
    let h = harness().await;
    let bytes = b"identical payload".to_vec();
    let first = event(10, 1, 100, "one.bin", bytes.len() as u64);
    let second = event(11, 2, 200, "two.bin", bytes.len() as u64);
    h.gateway.add_file(&first.file_ref, bytes.clone()).await;
    h.gateway.add_file(&second.file_ref, bytes.clone()).await;

    assert_eq!(process_event(&h.ctx, &first).await.unwrap(), JobOutcome::Completed);
    assert_eq!(process_event(&h.ctx, &second).await.unwrap(), JobOutcome::Completed);

    let files = processed_file::Entity::find().all(&h.db).await.unwrap();
    assert_eq!(files.len(), 2);
    assert_eq!(files[0].storage_path, files[1].storage_path);
    assert_eq!(files[0].file_hash, files[1].file_hash);

    // One underlying blob on disk.
    let hash = ContentHash::compute(&bytes);
    let blob_dir = h
        .store_root
        .join(hash.shard_prefix())
        .join(hash.shard_subprefix());
    assert_eq!(std::fs::read_dir(blob_dir).unwrap().count(), 1);
    assert_eq!(h.ctx.stats.files_deduplicated(), 1);
}

#[tokio::test]
async fn ip_outside_configured_cidr_yields_no_rows() {
    let h = harness_with(
        ingestor::extract::ExtractLimits::new(64 * 1024 * 1024, 10_000),
        &["10.0.0.0/8"],
    )
    .await;
    let bytes = zip_bytes(&[("a.txt", b"seen at 192.168.1.10\n")]);
    let ev = event(5, 5, 5, "scan.zip", bytes.len() as u64);
    h.gateway.add_file(&ev.file_ref, bytes).await;

    assert_eq!(process_event(&h.ctx, &ev).await.unwrap(), JobOutcome::Completed);
    assert!(
        extracted_indicator::Entity::find()
            .all(&h.db)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn traversal_member_fails_job_without_file_row() {
    let h = harness().await;
    let bytes = zip_bytes(&[("../../etc/passwd", b"root:x:0:0\n")]);
    let ev = event(9, 9, 9, "evil.zip", bytes.len() as u64);
    h.gateway.add_file(&ev.file_ref, bytes).await;

    assert_eq!(process_event(&h.ctx, &ev).await.unwrap(), JobOutcome::Failed);

    let jobs = processing_job::Entity::find().all(&h.db).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Failed);
    assert!(jobs[0].error.as_deref().unwrap().starts_with("unsafe_archive"));
    // The hash was computed before extraction, so the failed job keeps it.
    assert!(jobs[0].file_hash.is_some());

    assert!(
        processed_file::Entity::find()
            .all(&h.db)
            .await
            .unwrap()
            .is_empty()
    );
    assert!(
        extracted_indicator::Entity::find()
            .all(&h.db)
            .await
            .unwrap()
            .is_empty()
    );
    assert_eq!(leftover_work_dirs(&h), 0);
}

#[tokio::test]
async fn password_protected_archive_fails_without_file_row() {
    let h = harness_with_extractor(Arc::new(PasswordRequiredExtractor), &["10.0.0.0/24"]).await;
    let bytes = b"encrypted archive bytes".to_vec();
    let ev = event(4, 4, 4, "secret.rar", bytes.len() as u64);
    h.gateway.add_file(&ev.file_ref, bytes).await;

    assert_eq!(process_event(&h.ctx, &ev).await.unwrap(), JobOutcome::Failed);

    let jobs = processing_job::Entity::find().all(&h.db).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Failed);
    assert_eq!(
        jobs[0].error.as_deref(),
        Some("password_required: archive requires a password")
    );
    // The hash was computed before extraction, so the failed job keeps it.
    assert!(jobs[0].file_hash.is_some());

    assert!(
        processed_file::Entity::find()
            .all(&h.db)
            .await
            .unwrap()
            .is_empty()
    );
    assert!(
        extracted_indicator::Entity::find()
            .all(&h.db)
            .await
            .unwrap()
            .is_empty()
    );
    assert_eq!(leftover_work_dirs(&h), 0);
}

#[tokio::test]
async fn malformed_rar_fails_through_real_decoder() {
    let h = harness().await;
    // RAR4 signature followed by junk: the real decoder opens it and fails
    // reading the first header.
    let mut bytes = b"Rar!\x1a\x07\x00".to_vec();
    bytes.extend_from_slice(&[0u8; 64]);
    let ev = event(6, 6, 6, "broken.rar", bytes.len() as u64);
    h.gateway.add_file(&ev.file_ref, bytes).await;

    assert_eq!(process_event(&h.ctx, &ev).await.unwrap(), JobOutcome::Failed);

    let jobs = processing_job::Entity::find().all(&h.db).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Failed);
    assert!(jobs[0].error.as_deref().unwrap().starts_with("unsafe_archive"));
    assert!(
        processed_file::Entity::find()
            .all(&h.db)
            .await
            .unwrap()
            .is_empty()
    );
    assert_eq!(leftover_work_dirs(&h), 0);
}

#[tokio::test]
async fn decompression_bomb_aborts_and_cleans_up() {
    let h = harness_with(
        ingestor::extract::ExtractLimits::new(100 * 1024, 1_000_000),
        &["10.0.0.0/24"],
    )
    .await;
    let big = vec![0u8; 1024 * 1024];
    let bytes = zip_bytes(&[("flood.txt", big.as_slice())]);
    let ev = event(9, 10, 11, "bomb.zip", bytes.len() as u64);
    h.gateway.add_file(&ev.file_ref, bytes).await;

    assert_eq!(process_event(&h.ctx, &ev).await.unwrap(), JobOutcome::Failed);

    let jobs = processing_job::Entity::find().all(&h.db).await.unwrap();
    assert!(jobs[0].error.as_deref().unwrap().starts_with("unsafe_archive"));
    assert_eq!(leftover_work_dirs(&h), 0);
}

#[tokio::test]
async fn zero_length_document_completes() {
    let h = harness().await;
    let ev = event(3, 3, 3, "empty.bin", 0);
    h.gateway.add_file(&ev.file_ref, Vec::new()).await;

    assert_eq!(process_event(&h.ctx, &ev).await.unwrap(), JobOutcome::Completed);

    let file = processed_file::Entity::find_by_id(ev.file_ref.token())
        .one(&h.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(file.size_bytes, 0);
    assert_eq!(file.file_hash, ContentHash::compute(b"").to_hex());
    assert!(h.store_root.join(&file.storage_path).exists());
}

#[tokio::test]
async fn replaying_the_same_stream_changes_nothing() {
    let h = harness().await;
    let archive = zip_bytes(&[("a.txt", b"admin@example.gov\n10.0.0.7\n")]);
    let plain = b"just bytes".to_vec();
    let events = vec![
        event(1, 1, 1, "leak.zip", archive.len() as u64),
        event(1, 2, 2, "doc.bin", plain.len() as u64),
    ];
    h.gateway.add_file(&events[0].file_ref, archive).await;
    h.gateway.add_file(&events[1].file_ref, plain).await;

    for ev in &events {
        process_event(&h.ctx, ev).await.unwrap();
    }
    let files_before = processed_file::Entity::find().all(&h.db).await.unwrap();
    let jobs_before = processing_job::Entity::find().all(&h.db).await.unwrap();
    let indicators_before = extracted_indicator::Entity::find().all(&h.db).await.unwrap();

    for ev in &events {
        assert_eq!(
            process_event(&h.ctx, ev).await.unwrap(),
            JobOutcome::SkippedDuplicate
        );
    }

    assert_eq!(
        processed_file::Entity::find().all(&h.db).await.unwrap(),
        files_before
    );
    assert_eq!(
        processing_job::Entity::find().all(&h.db).await.unwrap(),
        jobs_before
    );
    assert_eq!(
        extracted_indicator::Entity::find().all(&h.db).await.unwrap(),
        indicators_before
    );
}

#[tokio::test]
async fn missing_upstream_document_is_terminal() {
    let h = harness().await;
    let ev = event(77, 8, 9, "gone.bin", 10);
    // Never added to the gateway: downloads return NotFound.

    assert_eq!(process_event(&h.ctx, &ev).await.unwrap(), JobOutcome::Failed);
    // Terminal errors never retry.
    assert_eq!(h.gateway.attempts(&ev.file_ref).await, 1);

    let jobs = processing_job::Entity::find()
        .filter(processing_job::Column::TelegramFileId.eq(ev.file_ref.token()))
        .all(&h.db)
        .await
        .unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Failed);
}
