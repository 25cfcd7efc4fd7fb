//! Both storage backends behave the same.

use serde_json::json;

use ribcage::config::StorageConfig;
use ribcage::storage::{Collection, MemoryStorage, SqliteStorage, Storage};

async fn exercise(storage: &dyn Storage) {
    assert_eq!(
        storage.get(Collection::Teams, "T1").await.expect("get"),
        None
    );

    storage
        .save(Collection::Teams, "T2", json!({ "id": "T2", "name": "Beta" }))
        .await
        .expect("save");
    storage
        .save(Collection::Teams, "T1", json!({ "id": "T1", "name": "Acme" }))
        .await
        .expect("save");
    storage
        .save(Collection::Users, "U1", json!({ "id": "U1" }))
        .await
        .expect("save");

    assert_eq!(
        storage.get(Collection::Teams, "T1").await.expect("get"),
        Some(json!({ "id": "T1", "name": "Acme" }))
    );

    // Ordered by id, scoped to the collection.
    let teams = storage.all(Collection::Teams).await.expect("all");
    assert_eq!(
        teams,
        vec![
            json!({ "id": "T1", "name": "Acme" }),
            json!({ "id": "T2", "name": "Beta" }),
        ]
    );
    assert!(storage
        .all(Collection::Channels)
        .await
        .expect("all")
        .is_empty());

    // Save replaces.
    storage
        .save(Collection::Teams, "T1", json!({ "id": "T1", "name": "Acme Corp" }))
        .await
        .expect("save");
    assert_eq!(
        storage.get(Collection::Teams, "T1").await.expect("get"),
        Some(json!({ "id": "T1", "name": "Acme Corp" }))
    );
    assert_eq!(storage.all(Collection::Teams).await.expect("all").len(), 2);
}

#[tokio::test]
async fn memory_storage_round_trips() {
    exercise(&MemoryStorage::default()).await;
}

#[tokio::test]
async fn sqlite_storage_round_trips() {
    let dir = tempfile::tempdir().expect("tempdir");
    let storage = SqliteStorage::open(&dir.path().join("bot.db"))
        .await
        .expect("open");
    exercise(&storage).await;
}

#[tokio::test]
async fn sqlite_storage_persists_across_opens() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("bot.db");

    {
        let storage = SqliteStorage::open(&path).await.expect("open");
        storage
            .save(Collection::Channels, "C1", json!({ "id": "C1" }))
            .await
            .expect("save");
    }

    let storage = SqliteStorage::open(&path).await.expect("reopen");
    assert_eq!(
        storage.get(Collection::Channels, "C1").await.expect("get"),
        Some(json!({ "id": "C1" }))
    );
}

#[tokio::test]
async fn storage_config_opens_the_selected_backend() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = StorageConfig::Sqlite {
        path: dir.path().join("from-config.db"),
    };
    let storage = config.open().await.expect("open");
    exercise(storage.as_ref()).await;
    assert!(dir.path().join("from-config.db").exists());

    exercise(StorageConfig::Memory.open().await.expect("open").as_ref()).await;
}
