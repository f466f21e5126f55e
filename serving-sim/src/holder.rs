use crate::types::PredictionModel;
use arc_swap::ArcSwap;
use std::sync::Arc;
use tracing::info;

/// Shared slot naming the model every prediction goes through.
///
/// Readers clone the current `Arc` and keep using it for the whole call, so
/// a swap only affects predictions that start after it lands.
pub struct ModelHolder {
    active: ArcSwap<Arc<dyn PredictionModel>>,
}

impl ModelHolder {
    pub(crate) fn new(model: Arc<dyn PredictionModel>) -> Self {
        Self {
            active: ArcSwap::from_pointee(model),
        }
    }

    pub fn get_active(&self) -> Arc<dyn PredictionModel> {
        let guard = self.active.load();
        let model: &Arc<dyn PredictionModel> = &guard;
        Arc::clone(model)
    }

    /// Only the registry swaps models.
    pub(crate) fn set_active(&self, model: Arc<dyn PredictionModel>) {
        info!("Active model is now {}", model.model_name());
        self.active.store(Arc::new(model));
    }

    pub fn active_version(&self) -> Option<u32> {
        self.active.load().version()
    }
}
