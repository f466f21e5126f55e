use crate::holder::ModelHolder;
use crate::types::{ModelSnapshot, PredictionModel, Result, SimulatorError, TrainingExample};
use chrono::{DateTime, Utc};
use interfaces::state::MODEL_REGISTRY_KEY;
use interfaces::{BlobStore, FrequencyModel};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// A trained model that has not been committed yet.
#[derive(Debug, Clone)]
pub struct CandidateModel {
    model: FrequencyModel,
    trained_from_version: u32,
    example_count: usize,
}

impl CandidateModel {
    pub fn version(&self) -> u32 {
        self.model.version()
    }

    /// Registry version that was current when this candidate was trained.
    pub fn trained_from_version(&self) -> u32 {
        self.trained_from_version
    }

    pub fn example_count(&self) -> usize {
        self.example_count
    }

    pub fn model(&self) -> &FrequencyModel {
        &self.model
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelSummary {
    pub version: u32,
    pub trained_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Default)]
struct RegistryState {
    models: BTreeMap<u32, Arc<FrequencyModel>>,
    current_version: u32,
}

/// Persisted shape: model snapshots keyed by version string plus the explicit current version.
#[derive(Serialize, Deserialize)]
struct RegistryBlob {
    models: BTreeMap<String, ModelSnapshot>,
    current_version: u32,
}

/// Versioned store of committed models; the only writer of the active-model holder.
pub struct ModelRegistry {
    state: Mutex<RegistryState>,
    holder: Arc<ModelHolder>,
    store: Arc<dyn BlobStore>,
}

impl ModelRegistry {
    /// Restore committed models and create the holder.
    ///
    /// The holder starts on the model at the persisted current version, or on
    /// `fallback` when there is none.
    pub async fn load(store: Arc<dyn BlobStore>, fallback: Arc<dyn PredictionModel>) -> Self {
        let state = match store.get(MODEL_REGISTRY_KEY).await {
            Ok(Some(blob)) => match serde_json::from_str::<RegistryBlob>(&blob) {
                Ok(blob) => decode_state(blob),
                Err(e) => {
                    warn!("Persisted model registry is corrupt, starting empty: {}", e);
                    RegistryState::default()
                }
            },
            Ok(None) => RegistryState::default(),
            Err(e) => {
                warn!("Failed to read model registry, starting empty: {}", e);
                RegistryState::default()
            }
        };

        let initial: Arc<dyn PredictionModel> = match state.models.get(&state.current_version) {
            Some(model) => model.clone() as Arc<dyn PredictionModel>,
            None => {
                if state.current_version > 0 {
                    warn!(
                        "Current model version {} is missing, serving {}",
                        state.current_version,
                        fallback.model_name()
                    );
                }
                fallback
            }
        };

        info!(
            "Loaded model registry: {} models, current version {}",
            state.models.len(),
            state.current_version
        );

        Self {
            state: Mutex::new(state),
            holder: Arc::new(ModelHolder::new(initial)),
            store,
        }
    }

    pub fn holder(&self) -> Arc<ModelHolder> {
        self.holder.clone()
    }

    /// Train a candidate tagged `current_version + 1` without touching registry state.
    pub async fn train(&self, dataset: &[TrainingExample]) -> CandidateModel {
        let current_version = self.state.lock().await.current_version;
        let model = FrequencyModel::train(current_version + 1, dataset, Utc::now());

        info!(
            "Trained candidate v{} from {} examples",
            model.version(),
            dataset.len()
        );

        CandidateModel {
            model,
            trained_from_version: current_version,
            example_count: dataset.len(),
        }
    }

    /// Store the candidate, make it current, persist, and swap it into the holder.
    ///
    /// Fails with `StaleVersion` when another commit has already reached the
    /// candidate's version; the registry is left untouched.
    pub async fn commit(&self, candidate: CandidateModel) -> Result<u32> {
        let mut state = self.state.lock().await;
        let version = candidate.version();

        if state.current_version >= version {
            warn!(
                "Rejecting stale candidate v{} (current version {})",
                version, state.current_version
            );
            return Err(SimulatorError::StaleVersion {
                candidate: version,
                current: state.current_version,
            });
        }

        let model = Arc::new(candidate.model);
        let mut next = state.clone();
        if next.models.insert(version, model.clone()).is_some() {
            debug!("Overwriting stored model v{}", version);
        }
        next.current_version = version;

        self.persist(&next).await?;
        *state = next;
        self.holder.set_active(model);

        info!("Committed model v{}", version);
        Ok(version)
    }

    /// Models ordered by version.
    pub async fn list(&self) -> Vec<ModelSummary> {
        let state = self.state.lock().await;
        state
            .models
            .values()
            .map(|model| ModelSummary {
                version: model.version(),
                trained_at: model.trained_at(),
            })
            .collect()
    }

    /// Remove a stored version. Returns `Ok(false)` when it does not exist.
    pub async fn delete(&self, version: u32) -> Result<bool> {
        let mut state = self.state.lock().await;

        if !state.models.contains_key(&version) {
            debug!("Model v{} not found, nothing to delete", version);
            return Ok(false);
        }
        if version == state.current_version || self.holder.active_version() == Some(version) {
            warn!("Refusing to delete active model v{}", version);
            return Err(SimulatorError::ActiveModelInUse { version });
        }

        let mut next = state.clone();
        next.models.remove(&version);
        self.persist(&next).await?;
        *state = next;

        info!("Deleted model v{}", version);
        Ok(true)
    }

    pub async fn get_by_version(&self, version: u32) -> Option<Arc<FrequencyModel>> {
        self.state.lock().await.models.get(&version).cloned()
    }

    /// Point the holder at an already committed version.
    pub async fn activate(&self, version: u32) -> Result<()> {
        let mut state = self.state.lock().await;
        let model = state
            .models
            .get(&version)
            .cloned()
            .ok_or(SimulatorError::ModelNotFound { version })?;

        let mut next = state.clone();
        next.current_version = version;
        self.persist(&next).await?;
        *state = next;
        self.holder.set_active(model);

        info!("Activated model v{}", version);
        Ok(())
    }

    pub async fn current_version(&self) -> u32 {
        self.state.lock().await.current_version
    }

    pub async fn model_count(&self) -> usize {
        self.state.lock().await.models.len()
    }

    async fn persist(&self, state: &RegistryState) -> Result<()> {
        let blob = RegistryBlob {
            models: state
                .models
                .iter()
                .map(|(version, model)| (version.to_string(), model.to_snapshot()))
                .collect(),
            current_version: state.current_version,
        };
        let json = serde_json::to_string(&blob)?;
        self.store
            .put(MODEL_REGISTRY_KEY, &json)
            .await
            .map_err(SimulatorError::Storage)
    }
}

fn decode_state(blob: RegistryBlob) -> RegistryState {
    let mut models = BTreeMap::new();
    for (key, snapshot) in blob.models {
        match key.parse::<u32>() {
            Ok(version) if version == snapshot.version => {
                match FrequencyModel::from_snapshot(snapshot) {
                    Ok(model) => {
                        models.insert(version, Arc::new(model));
                    }
                    Err(e) => warn!("Skipping unreadable model {}: {}", key, e),
                }
            }
            _ => warn!(
                "Skipping model stored under {:?} with version {}",
                key, snapshot.version
            ),
        }
    }

    RegistryState {
        models,
        current_version: blob.current_version,
    }
}
