use common::storage::ContentHash;
use sea_orm::EntityTrait;

use ingestor::entity::processed_file;
use ingestor::worker::process_event;

use crate::support::{event, harness, zip_bytes};

/// Walk the store and verify every blob's filename equals the hash of its
/// bytes, and every processed_files row points at bytes matching its
/// recorded hash.
#[tokio::test]
async fn store_and_rows_agree_with_hashes() {
    let h = harness().await;

    let payloads: Vec<Vec<u8>> = vec![
        b"first payload".to_vec(),
        b"second payload".to_vec(),
        zip_bytes(&[("a.txt", b"admin@example.gov\n")]),
        Vec::new(),
    ];
    for (i, bytes) in payloads.iter().enumerate() {
        let name = if i == 2 { "arc.zip" } else { "doc.bin" };
        let ev = event(1, i as i32 + 1, i as i64 + 100, name, bytes.len() as u64);
        h.gateway.add_file(&ev.file_ref, bytes.clone()).await;
        process_event(&h.ctx, &ev).await.unwrap();
    }

    // Invariant: blob filename == BLAKE2b-256 of blob bytes.
    let mut blob_count = 0;
    for entry in walk_files(&h.store_root) {
        if entry
            .components()
            .any(|c| c.as_os_str().to_string_lossy() == ".tmp")
        {
            continue;
        }
        let bytes = std::fs::read(&entry).unwrap();
        let expected = ContentHash::compute(&bytes).to_hex();
        assert_eq!(
            entry.file_name().unwrap().to_string_lossy(),
            expected,
            "blob name must equal hash of its bytes"
        );
        blob_count += 1;
    }
    assert_eq!(blob_count, payloads.len());

    // Invariant: every row's storage_path exists and hashes to file_hash.
    let rows = processed_file::Entity::find().all(&h.db).await.unwrap();
    assert_eq!(rows.len(), payloads.len());
    for row in rows {
        let path = h.store_root.join(&row.storage_path);
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(ContentHash::compute(&bytes).to_hex(), row.file_hash);
        assert_eq!(bytes.len() as i64, row.size_bytes);
    }
}

fn walk_files(root: &std::path::Path) -> Vec<std::path::PathBuf> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                stack.push(path);
            } else {
                out.push(path);
            }
        }
    }
    out
}
