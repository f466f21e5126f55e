use crate::types::{Result, SimulatorError, DEFAULT_RATE_PER_SECOND};
use interfaces::state::SESSION_METADATA_KEY;
use interfaces::BlobStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Settings and counters carried across restarts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    pub accelerated_mode: bool,
    pub target_rate_per_second: f64,
    pub next_sequence_number: u64,
}

impl Default for SessionMetadata {
    fn default() -> Self {
        Self {
            accelerated_mode: false,
            target_rate_per_second: DEFAULT_RATE_PER_SECOND,
            next_sequence_number: 1,
        }
    }
}

pub struct MetadataStore {
    store: Arc<dyn BlobStore>,
    current: Mutex<SessionMetadata>,
    defaults: SessionMetadata,
}

impl MetadataStore {
    pub async fn load(store: Arc<dyn BlobStore>) -> Self {
        Self::load_with_defaults(store, SessionMetadata::default()).await
    }

    /// Read persisted metadata; anything missing or unreadable falls back to
    /// `defaults`, which [`MetadataStore::reset`] also restores.
    pub async fn load_with_defaults(store: Arc<dyn BlobStore>, defaults: SessionMetadata) -> Self {
        let current = match store.get(SESSION_METADATA_KEY).await {
            Ok(Some(blob)) => match serde_json::from_str::<SessionMetadata>(&blob) {
                Ok(metadata) => sanitize(metadata, &defaults),
                Err(e) => {
                    warn!("Session metadata is corrupt, using defaults: {}", e);
                    defaults
                }
            },
            Ok(None) => defaults,
            Err(e) => {
                warn!("Failed to read session metadata, using defaults: {}", e);
                defaults
            }
        };

        debug!("Loaded session metadata: {:?}", current);
        Self {
            store,
            current: Mutex::new(current),
            defaults,
        }
    }

    pub fn defaults(&self) -> SessionMetadata {
        self.defaults
    }

    pub async fn get(&self) -> SessionMetadata {
        *self.current.lock().await
    }

    /// Apply `f` and persist the result; on a storage failure nothing changes.
    pub async fn update<F>(&self, f: F) -> Result<SessionMetadata>
    where
        F: FnOnce(&mut SessionMetadata),
    {
        let mut current = self.current.lock().await;
        let mut next = *current;
        f(&mut next);

        let blob = serde_json::to_string(&next)?;
        self.store
            .put(SESSION_METADATA_KEY, &blob)
            .await
            .map_err(SimulatorError::Storage)?;

        *current = next;
        Ok(next)
    }

    pub async fn reset(&self) -> Result<SessionMetadata> {
        let defaults = self.defaults;
        self.update(|metadata| *metadata = defaults).await
    }
}

fn sanitize(mut metadata: SessionMetadata, defaults: &SessionMetadata) -> SessionMetadata {
    if !(metadata.target_rate_per_second.is_finite() && metadata.target_rate_per_second > 0.0) {
        warn!(
            "Ignoring persisted target rate {}, using {}",
            metadata.target_rate_per_second, defaults.target_rate_per_second
        );
        metadata.target_rate_per_second = defaults.target_rate_per_second;
    }
    metadata.next_sequence_number = metadata.next_sequence_number.max(1);
    metadata
}
