use interfaces::state::{INTERACTION_LOG_KEY, MODEL_REGISTRY_KEY};
use interfaces::{BlobStore, MemoryBlobStore, SqliteBlobStore};
use std::sync::Once;
use tracing::info;

static INIT: Once = Once::new();

fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .try_init()
            .ok();
    });
}

async fn exercise_store(store: &dyn BlobStore) -> anyhow::Result<()> {
    assert_eq!(store.get(INTERACTION_LOG_KEY).await?, None);

    store.put(INTERACTION_LOG_KEY, "first").await?;
    store.put(INTERACTION_LOG_KEY, "second").await?;
    store.put(MODEL_REGISTRY_KEY, "{}").await?;

    assert_eq!(store.get(INTERACTION_LOG_KEY).await?.as_deref(), Some("second"));
    assert_eq!(store.get(MODEL_REGISTRY_KEY).await?.as_deref(), Some("{}"));

    store.remove(INTERACTION_LOG_KEY).await?;
    assert_eq!(store.get(INTERACTION_LOG_KEY).await?, None);
    assert_eq!(store.get(MODEL_REGISTRY_KEY).await?.as_deref(), Some("{}"));
    Ok(())
}

#[tokio::test]
async fn test_memory_store_overwrites_and_removes() -> anyhow::Result<()> {
    init_tracing();
    exercise_store(&MemoryBlobStore::new()).await
}

#[tokio::test]
async fn test_sqlite_store_overwrites_and_removes() -> anyhow::Result<()> {
    init_tracing();
    let store = SqliteBlobStore::in_memory().await?;
    exercise_store(&store).await
}

#[tokio::test]
async fn test_sqlite_store_survives_reopen() -> anyhow::Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let url = format!("sqlite://{}", dir.path().join("blobs.db").display());

    {
        let store = SqliteBlobStore::connect(&url).await?;
        store.put(MODEL_REGISTRY_KEY, "{\"current_version\":3}").await?;
        store.close().await;
    }

    info!("Reopening {}", url);
    let reopened = SqliteBlobStore::connect(&url).await?;
    assert_eq!(
        reopened.get(MODEL_REGISTRY_KEY).await?.as_deref(),
        Some("{\"current_version\":3}")
    );
    Ok(())
}
