// Filesystem store integration: multi-chunk streaming writes, ranged
// reads across chunk boundaries, and metadata durability.

use bytes::Bytes;
use futures_util::stream;
use mediacdn::models::ObjectMetadata;
use mediacdn::object_store::{FsObjectStore, ObjectStore};
use mediacdn::stream_util::{collect_stream, ByteStream};
use std::io;

fn chunked_stream(data: &[u8], chunk: usize) -> ByteStream {
    let items: Vec<io::Result<Bytes>> = data
        .chunks(chunk)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    Box::pin(stream::iter(items))
}

fn meta() -> ObjectMetadata {
    ObjectMetadata {
        source_url: "https://example.com/big.mp4".to_string(),
        origin_host: "example.com".to_string(),
        cached_at: "2025-06-01T00:00:00Z".to_string(),
        content_length: Some(300_000),
    }
}

#[tokio::test]
async fn test_large_streaming_put_and_get() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsObjectStore::open(dir.path()).await.unwrap();

    let data: Vec<u8> = (0..300_000u32).map(|i| (i % 251) as u8).collect();
    store
        .put(
            "example.com/big.mp4",
            chunked_stream(&data, 7919),
            data.len() as u64,
            "video/mp4",
            meta(),
        )
        .await
        .unwrap();

    let object = store.get("example.com/big.mp4").await.unwrap().unwrap();
    assert_eq!(object.info.size, 300_000);
    let body = collect_stream(object.body).await.unwrap();
    assert_eq!(body.len(), data.len());
    assert_eq!(&body[..], &data[..]);
}

#[tokio::test]
async fn test_ranged_reads_cross_chunk_boundaries() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsObjectStore::open(dir.path()).await.unwrap();

    let data: Vec<u8> = (0..200_000u32).map(|i| (i % 241) as u8).collect();
    store
        .put(
            "example.com/big.mp4",
            chunked_stream(&data, 4096),
            data.len() as u64,
            "video/mp4",
            meta(),
        )
        .await
        .unwrap();

    for (offset, length) in [(0u64, 10u64), (65_530, 20), (131_072, 70_000), (199_999, 1)] {
        let object = store
            .get_range("example.com/big.mp4", offset, length)
            .await
            .unwrap()
            .unwrap();
        let body = collect_stream(object.body).await.unwrap();
        let end = ((offset + length) as usize).min(data.len());
        assert_eq!(&body[..], &data[offset as usize..end], "offset {}", offset);
    }
}

#[tokio::test]
async fn test_metadata_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = FsObjectStore::open(dir.path()).await.unwrap();
        store
            .put(
                "example.com/a.jpg",
                chunked_stream(b"jpeg-bytes", 4),
                10,
                "image/jpeg",
                meta(),
            )
            .await
            .unwrap();
    }
    let store = FsObjectStore::open(dir.path()).await.unwrap();
    let info = store.head("example.com/a.jpg").await.unwrap().unwrap();
    assert_eq!(info.size, 10);
    assert_eq!(info.content_type, "image/jpeg");
    assert_eq!(info.metadata.source_url, "https://example.com/big.mp4");
    assert_eq!(info.metadata.origin_host, "example.com");
    assert!(info.etag.starts_with('"') && info.etag.ends_with('"'));
}

#[tokio::test]
async fn test_keys_do_not_collide() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsObjectStore::open(dir.path()).await.unwrap();

    // Keys that a naive separator replacement would merge
    let keys = [
        "example.com/a/b.jpg",
        "example.com/a_b.jpg",
        "example.com/a%2Fb.jpg",
    ];
    for (i, key) in keys.iter().enumerate() {
        let body = vec![i as u8; 8];
        store
            .put(key, chunked_stream(&body, 3), 8, "image/png", meta())
            .await
            .unwrap();
    }
    for (i, key) in keys.iter().enumerate() {
        let object = store.get(key).await.unwrap().unwrap();
        let body = collect_stream(object.body).await.unwrap();
        assert_eq!(&body[..], &vec![i as u8; 8][..], "{}", key);
    }
}

#[tokio::test]
async fn test_concurrent_readers_share_an_object() {
    let dir = tempfile::tempdir().unwrap();
    let store = std::sync::Arc::new(FsObjectStore::open(dir.path()).await.unwrap());
    let data: Vec<u8> = (0..50_000u32).map(|i| (i % 199) as u8).collect();
    store
        .put(
            "example.com/shared.mp4",
            chunked_stream(&data, 1024),
            data.len() as u64,
            "video/mp4",
            meta(),
        )
        .await
        .unwrap();

    let mut readers = Vec::new();
    for _ in 0..8 {
        let store = std::sync::Arc::clone(&store);
        readers.push(tokio::spawn(async move {
            let object = store.get("example.com/shared.mp4").await.unwrap().unwrap();
            collect_stream(object.body).await.unwrap()
        }));
    }
    for reader in readers {
        let body = reader.await.unwrap();
        assert_eq!(body.len(), data.len());
    }
}
