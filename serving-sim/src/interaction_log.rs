use crate::log_codec;
use crate::metadata::MetadataStore;
use crate::types::{Interaction, InteractionRecord, Result, SimulatorError};
use interfaces::state::INTERACTION_LOG_KEY;
use interfaces::BlobStore;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 1024;

/// Mutation notifications for subscribers such as the analytics hub.
#[derive(Debug, Clone)]
pub enum LogEvent {
    Appended(InteractionRecord),
    Cleared,
}

struct LogState {
    records: Vec<InteractionRecord>,
    encoded: String,
    next_sequence_number: u64,
}

/// Append-only record of completed requests, persisted on every append.
pub struct InteractionLog {
    state: RwLock<LogState>,
    store: Arc<dyn BlobStore>,
    metadata: Arc<MetadataStore>,
    events: broadcast::Sender<LogEvent>,
}

impl InteractionLog {
    /// Restore the persisted log. An absent or corrupt blob yields an empty log.
    pub async fn load(store: Arc<dyn BlobStore>, metadata: Arc<MetadataStore>) -> Self {
        let records = match store.get(INTERACTION_LOG_KEY).await {
            Ok(Some(blob)) => match log_codec::decode(&blob) {
                Ok(records) if is_strictly_increasing(&records) => records,
                Ok(_) => {
                    warn!("Persisted interaction log is out of order, starting empty");
                    Vec::new()
                }
                Err(e) => {
                    warn!("Persisted interaction log is corrupt, starting empty: {}", e);
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("Failed to read interaction log, starting empty: {}", e);
                Vec::new()
            }
        };

        let after_last = records.last().map(|r| r.sequence_number + 1).unwrap_or(1);
        let next_sequence_number = metadata.get().await.next_sequence_number.max(after_last);
        let encoded = log_codec::encode(&records);

        info!(
            "Loaded interaction log with {} records, next sequence number {}",
            records.len(),
            next_sequence_number
        );

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: RwLock::new(LogState {
                records,
                encoded,
                next_sequence_number,
            }),
            store,
            metadata,
            events,
        }
    }

    /// Number the interaction, persist it, then notify subscribers.
    ///
    /// Nothing is appended and the counter does not move if the blob write fails.
    pub async fn append(&self, interaction: Interaction) -> Result<InteractionRecord> {
        let mut state = self.state.write().await;

        let record = InteractionRecord::from_interaction(state.next_sequence_number, interaction);
        let mut encoded = String::with_capacity(state.encoded.len() + 64);
        encoded.push_str(&state.encoded);
        encoded.push_str(&log_codec::encode_row(&record));
        encoded.push('\n');

        self.store
            .put(INTERACTION_LOG_KEY, &encoded)
            .await
            .map_err(SimulatorError::Storage)?;

        state.encoded = encoded;
        state.records.push(record.clone());
        state.next_sequence_number = record.sequence_number + 1;
        let next = state.next_sequence_number;

        // Counter is persisted under the write lock; a clear never interleaves here.
        if let Err(e) = self.metadata.update(|m| m.next_sequence_number = next).await {
            warn!("Failed to persist next sequence number {}: {}", next, e);
        }
        drop(state);

        debug!("Appended interaction #{}", record.sequence_number);
        let _ = self.events.send(LogEvent::Appended(record.clone()));
        Ok(record)
    }

    /// Records with `start <= sequence_number <= end`, ascending.
    pub async fn query(&self, start: u64, end: u64) -> Vec<InteractionRecord> {
        if start > end {
            return Vec::new();
        }
        let state = self.state.read().await;
        let records = &state.records;
        let from = records.partition_point(|r| r.sequence_number < start);
        let to = records.partition_point(|r| r.sequence_number <= end);
        records[from..to].to_vec()
    }

    /// Drop every record and restart numbering at 1.
    pub async fn clear(&self) -> Result<()> {
        let mut state = self.state.write().await;
        let encoded = log_codec::encode(&[]);

        self.store
            .put(INTERACTION_LOG_KEY, &encoded)
            .await
            .map_err(SimulatorError::Storage)?;

        let dropped = state.records.len();
        state.records.clear();
        state.encoded = encoded;
        state.next_sequence_number = 1;

        if let Err(e) = self.metadata.update(|m| m.next_sequence_number = 1).await {
            warn!("Failed to reset persisted sequence number: {}", e);
        }
        drop(state);

        info!("Cleared interaction log ({} records dropped)", dropped);
        let _ = self.events.send(LogEvent::Cleared);
        Ok(())
    }

    /// Owned copy of every record; callers process it without holding the log.
    pub async fn snapshot(&self) -> Vec<InteractionRecord> {
        self.state.read().await.records.clone()
    }

    pub async fn recent(&self, count: usize) -> Vec<InteractionRecord> {
        let state = self.state.read().await;
        let skip = state.records.len().saturating_sub(count);
        state.records[skip..].to_vec()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.records.is_empty()
    }

    pub async fn next_sequence_number(&self) -> u64 {
        self.state.read().await.next_sequence_number
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
        self.events.subscribe()
    }
}

fn is_strictly_increasing(records: &[InteractionRecord]) -> bool {
    records
        .windows(2)
        .all(|pair| pair[0].sequence_number < pair[1].sequence_number)
}
