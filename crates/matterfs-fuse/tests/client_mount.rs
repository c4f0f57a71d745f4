//! Bridge client against a real mount manager over the in-process duplex
//! channel: the same protocol boundary a spawned bridge process uses.

use std::sync::Arc;

use matterfs_config::{
    CacheConfig, ConflictStrategy, DriveConfig, HumanDuration, HumanSize, MountConfig,
    MountStrategy, RemoteConfig, SyncConfig,
};
use matterfs_core::{FileCache, FileCacheConfig, SyncLog};
use matterfs_fuse::BridgeClient;
use matterfs_remote::bridge::{BridgeOp, BridgeReply, ErrorCode};
use matterfs_remote::{InMemoryRemote, MountManager};

async fn mounted_manager(dir: &tempfile::TempDir) -> (Arc<MountManager>, Arc<InMemoryRemote>) {
    let remote = Arc::new(InMemoryRemote::new());
    remote.add_matter("m-1", "Acme Corp", "2024-017", "Patent Dispute");
    remote.seed_document("m-1", "/notes.txt", b"case notes");

    let cache = Arc::new(
        FileCache::open(FileCacheConfig {
            root: dir.path().join("cache"),
            max_size: 16 * 1024 * 1024,
            persist_debounce: std::time::Duration::from_secs(5),
        })
        .await
        .unwrap(),
    );

    let config = DriveConfig {
        remote: RemoteConfig {
            base_url: "https://api.example.com".to_string(),
            token: None,
            timeout: HumanDuration::from_secs(30),
        },
        cache: CacheConfig {
            dir: dir.path().join("cache").to_string_lossy().to_string(),
            max_size: HumanSize(16 * 1024 * 1024),
            persist_debounce: HumanDuration::from_secs(5),
        },
        sync: SyncConfig {
            interval: HumanDuration::from_secs(3600),
            write_settle: HumanDuration::from_secs(3600),
            retry_limit: 3,
            conflict: ConflictStrategy::Both,
        },
        mount: MountConfig {
            point: dir.path().join("mnt").to_string_lossy().to_string(),
            strategy: MountStrategy::Bridge,
        },
    };

    let manager = MountManager::new(config, remote.clone(), cache, Arc::new(SyncLog::new()));
    manager.mount().await.unwrap();
    (manager, remote)
}

#[tokio::test]
async fn test_full_edit_cycle_through_bridge_client() {
    let dir = tempfile::TempDir::new().unwrap();
    let (manager, remote) = mounted_manager(&dir).await;
    let client = BridgeClient::in_process(manager.clone());

    // Walk the tree.
    let reply = client
        .call(BridgeOp::Readdir { path: "/".into() })
        .await
        .unwrap();
    let matter = match reply {
        BridgeReply::Entries { entries } => entries[0].name.clone(),
        other => panic!("unexpected reply: {:?}", other),
    };
    assert_eq!(matter, "Acme Corp - 2024-017 Patent Dispute");

    // Open, write, read back, release.
    let path = format!("/{}/notes.txt", matter);
    let handle = match client
        .call(BridgeOp::Open { path: path.clone(), write: true })
        .await
        .unwrap()
    {
        BridgeReply::Handle { handle } => handle,
        other => panic!("unexpected reply: {:?}", other),
    };

    client
        .call(BridgeOp::Write {
            handle,
            offset: 0,
            data: b"amended notes".to_vec(),
        })
        .await
        .unwrap();

    let data = match client
        .call(BridgeOp::Read { handle, offset: 0, len: 64 })
        .await
        .unwrap()
    {
        BridgeReply::Data { data } => data,
        other => panic!("unexpected reply: {:?}", other),
    };
    assert_eq!(data, b"amended notes");

    client.call(BridgeOp::Release { handle }).await.unwrap();

    // The flush-on-close upload reached the remote.
    let doc_id = remote.document_at("m-1", "/notes.txt").unwrap();
    assert_eq!(remote.document_bytes(&doc_id).unwrap(), b"amended notes");
}

#[tokio::test]
async fn test_bridge_client_error_codes() {
    let dir = tempfile::TempDir::new().unwrap();
    let (manager, _remote) = mounted_manager(&dir).await;
    let client = BridgeClient::in_process(manager);

    let err = client
        .call(BridgeOp::Getattr { path: "/nope".into() })
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::NotFound);

    let err = client
        .call(BridgeOp::Create { path: "/root-file.txt".into() })
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::AccessDenied);
}
