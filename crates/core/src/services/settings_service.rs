use std::sync::Arc;

use log::debug;

use crate::errors::CoreError;
use crate::models::settings::{decode_settings_document, PortfolioSettings};
use crate::storage::store::RecordStore;

/// Loads and persists per-user portfolio settings, applying the
/// shape migration on load.
pub struct SettingsService {
    store: Arc<dyn RecordStore>,
}

impl SettingsService {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Load the user's settings.
    ///
    /// A missing document falls back to [`PortfolioSettings::default`]
    /// without writing anything. A document in an older shape is upgraded
    /// and persisted back exactly once before returning; loading an
    /// already-current document performs no write.
    pub async fn load(&self, user_id: &str) -> Result<PortfolioSettings, CoreError> {
        let document = match self.store.load_settings(user_id).await? {
            Some(document) => document,
            None => return Ok(PortfolioSettings::default()),
        };

        let (settings, migrated) = decode_settings_document(&document)?;
        if migrated {
            debug!("settings: persisting upgraded document for user {user_id}");
            let upgraded = serde_json::to_value(&settings)
                .map_err(|e| CoreError::Serialization(e.to_string()))?;
            self.store.save_settings(user_id, &upgraded).await?;
        }
        Ok(settings)
    }

    /// Persist `settings` in the canonical current shape.
    pub async fn update(
        &self,
        user_id: &str,
        settings: &PortfolioSettings,
    ) -> Result<(), CoreError> {
        let document =
            serde_json::to_value(settings).map_err(|e| CoreError::Serialization(e.to_string()))?;
        self.store.save_settings(user_id, &document).await
    }
}
