use crate::auth::password::PasswordHasher;
use crate::config::AppConfig;
use crate::store::CredentialStore;
use anyhow::Context;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: CredentialStore,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let config = Arc::new(config);
        let hasher = PasswordHasher::new()?;
        let store = CredentialStore::open(&config.database.store_options(), hasher)
            .await
            .context("open credential store")?;
        Ok(Self { store, config })
    }

    pub fn from_parts(store: CredentialStore, config: Arc<AppConfig>) -> Self {
        Self { store, config }
    }
}
