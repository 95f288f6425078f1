use common::storage::{ContentHash, StoredBlob};
use common::{IndicatorType, JobStatus};
use sea_orm::EntityTrait;

use ingestor::entity::{extracted_indicator, processed_file, processing_job};
use ingestor::scanner::IndicatorHit;

use crate::support::{event, harness};

fn blob_for(bytes: &[u8]) -> StoredBlob {
    let hash = ContentHash::compute(bytes);
    StoredBlob {
        hash,
        relative_path: format!(
            "{}/{}/{}",
            hash.shard_prefix(),
            hash.shard_subprefix(),
            hash.to_hex()
        ),
        size_bytes: bytes.len() as u64,
        deduplicated: false,
    }
}

fn hit(kind: IndicatorType, value: &str, path: &str, line: u32) -> IndicatorHit {
    IndicatorHit {
        indicator_type: kind,
        value: value.to_string(),
        relative_path: path.to_string(),
        line,
    }
}

#[tokio::test]
async fn job_lifecycle_transitions_and_timestamps() {
    let h = harness().await;
    let repo = &h.ctx.repo;
    let ev = event(1, 2, 3, "x.bin", 4);

    let job_id = repo.begin_job(&ev.file_ref).await.unwrap();
    let job = processing_job::Entity::find_by_id(job_id)
        .one(&h.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.telegram_file_id, "1_2_3");
    assert!(job.error.is_none());
    assert!(job.file_hash.is_none());

    let hash = ContentHash::compute(b"bytes");
    repo.mark_job(job_id, JobStatus::Processing, None, Some(&hash))
        .await
        .unwrap();
    let job = processing_job::Entity::find_by_id(job_id)
        .one(&h.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.status, JobStatus::Processing);
    assert_eq!(job.file_hash.as_deref(), Some(hash.to_hex().as_str()));
    assert!(job.updated_at >= job.created_at);

    // A later transition without a hash leaves the recorded hash alone.
    repo.mark_job(job_id, JobStatus::Failed, Some("unknown: boom"), None)
        .await
        .unwrap();
    let job = processing_job::Entity::find_by_id(job_id)
        .one(&h.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.as_deref(), Some("unknown: boom"));
    assert_eq!(job.file_hash.as_deref(), Some(hash.to_hex().as_str()));
}

#[tokio::test]
async fn failed_jobs_exist_without_a_file_row() {
    let h = harness().await;
    let repo = &h.ctx.repo;
    let ev = event(5, 6, 7, "x.bin", 4);

    let job_id = repo.begin_job(&ev.file_ref).await.unwrap();
    repo.mark_job(job_id, JobStatus::Failed, Some("transient_network: timeout"), None)
        .await
        .unwrap();

    assert_eq!(
        processing_job::Entity::find().all(&h.db).await.unwrap().len(),
        1
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
async fn complete_job_twice_keeps_first_seen() {
    let h = harness().await;
    let repo = &h.ctx.repo;
    let ev = event(1, 2, 3, "x.bin", 5);
    let blob = blob_for(b"bytes");

    let first_job = repo.begin_job(&ev.file_ref).await.unwrap();
    repo.complete_job(first_job, &ev, &blob).await.unwrap();
    let first = processed_file::Entity::find_by_id(ev.file_ref.token())
        .one(&h.db)
        .await
        .unwrap()
        .unwrap();

    let second_job = repo.begin_job(&ev.file_ref).await.unwrap();
    repo.complete_job(second_job, &ev, &blob).await.unwrap();

    let rows = processed_file::Entity::find().all(&h.db).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].first_seen_at, first.first_seen_at);
    assert!(rows[0].last_seen_at >= first.last_seen_at);
}

#[tokio::test]
async fn indicator_replay_updates_last_seen_not_count() {
    let h = harness().await;
    let repo = &h.ctx.repo;
    let hash = ContentHash::compute(b"archive");
    let hits = vec![
        hit(IndicatorType::Email, "admin@example.gov", "a.txt", 1),
        hit(IndicatorType::Ipv4, "10.0.0.5", "a.txt", 2),
    ];

    assert_eq!(repo.upsert_indicators(&hits, &hash, 42).await.unwrap(), 2);
    let before = extracted_indicator::Entity::find().all(&h.db).await.unwrap();
    assert_eq!(before.len(), 2);

    assert_eq!(repo.upsert_indicators(&hits, &hash, 42).await.unwrap(), 2);
    let after = extracted_indicator::Entity::find().all(&h.db).await.unwrap();
    assert_eq!(after.len(), 2);
    for (b, a) in before.iter().zip(&after) {
        assert_eq!(a.id, b.id);
        assert_eq!(a.first_seen_at, b.first_seen_at);
        assert!(a.last_seen_at >= b.last_seen_at);
    }
}

#[tokio::test]
async fn same_value_different_lines_are_distinct_rows() {
    let h = harness().await;
    let repo = &h.ctx.repo;
    let hash = ContentHash::compute(b"archive");
    let hits = vec![
        hit(IndicatorType::Email, "admin@example.gov", "a.txt", 1),
        hit(IndicatorType::Email, "admin@example.gov", "a.txt", 9),
    ];

    assert_eq!(repo.upsert_indicators(&hits, &hash, 1).await.unwrap(), 2);
    assert_eq!(
        extracted_indicator::Entity::find().all(&h.db).await.unwrap().len(),
        2
    );
}

#[tokio::test]
async fn colliding_identities_within_one_batch_collapse() {
    let h = harness().await;
    let repo = &h.ctx.repo;
    let hash = ContentHash::compute(b"archive");
    // Same identity from two different members: the key excludes the path.
    let hits = vec![
        hit(IndicatorType::Ipv4, "10.0.0.5", "a.txt", 3),
        hit(IndicatorType::Ipv4, "10.0.0.5", "b.txt", 3),
    ];

    assert_eq!(repo.upsert_indicators(&hits, &hash, 1).await.unwrap(), 1);
    assert_eq!(
        extracted_indicator::Entity::find().all(&h.db).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn is_processed_reflects_completion_only() {
    let h = harness().await;
    let repo = &h.ctx.repo;
    let ev = event(8, 8, 8, "x.bin", 5);

    assert!(!repo.is_processed(&ev.file_ref).await.unwrap());

    let job_id = repo.begin_job(&ev.file_ref).await.unwrap();
    assert!(!repo.is_processed(&ev.file_ref).await.unwrap());

    repo.complete_job(job_id, &ev, &blob_for(b"bytes")).await.unwrap();
    assert!(repo.is_processed(&ev.file_ref).await.unwrap());
}

#[tokio::test]
async fn large_indicator_batches_chunk_cleanly() {
    let h = harness().await;
    let repo = &h.ctx.repo;
    let hash = ContentHash::compute(b"archive");
    let hits: Vec<IndicatorHit> = (0..450)
        .map(|i| hit(IndicatorType::Ipv4, &format!("10.0.{}.{}", i / 250, i % 250), "a.txt", i + 1))
        .collect();

    assert_eq!(repo.upsert_indicators(&hits, &hash, 1).await.unwrap(), 450);
    assert_eq!(
        extracted_indicator::Entity::find().all(&h.db).await.unwrap().len(),
        450
    );
}
