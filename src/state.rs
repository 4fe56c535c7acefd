use std::sync::Arc;

use anyhow::Context;

use crate::auth::{jwt::JwtKeys, password::PasswordHasher, services::AuthService};
use crate::config::AppConfig;
use crate::error::{ApiError, AuthError};
use crate::store::{CredentialStore, MemoryStore, PgStore};

/// `DATABASE_URL` value selecting the in-process store.
pub const MEMORY_URL: &str = "memory://";

#[derive(Clone)]
pub struct AppState {
    pub auth: AuthService,
    pub config: Arc<AppConfig>,
    /// Set when backed by Postgres, for running migrations.
    pub pg: Option<PgStore>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = AppConfig::from_env().context("load configuration")?;

        let pg = if config.database_url == MEMORY_URL {
            tracing::warn!("using in-memory credential store; data is not persisted");
            None
        } else {
            let pg = PgStore::connect(&config.database_url, config.db_max_connections)
                .await
                .context("connect to database")?;
            Some(pg)
        };
        let store: Arc<dyn CredentialStore> = match &pg {
            Some(pg) => Arc::new(pg.clone()),
            None => Arc::new(MemoryStore::new()),
        };

        Ok(Self::from_parts(store, config, PasswordHasher::default(), pg))
    }

    pub fn from_parts(
        store: Arc<dyn CredentialStore>,
        config: AppConfig,
        hasher: PasswordHasher,
        pg: Option<PgStore>,
    ) -> Self {
        let keys = JwtKeys::new(&config.jwt);
        let auth = AuthService::new(store, keys, hasher, config.store_timeout());
        Self {
            auth,
            config: Arc::new(config),
            pg,
        }
    }

    /// Shapes a service error, exposing diagnostics outside production.
    pub fn reject(&self, err: AuthError) -> ApiError {
        ApiError::new(err, !self.config.production)
    }

    #[cfg(test)]
    pub fn in_memory(production: bool) -> (Self, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (Self::with_store(store.clone(), production), store)
    }

    #[cfg(test)]
    pub fn with_store(store: Arc<dyn CredentialStore>, production: bool) -> Self {
        let config = AppConfig {
            database_url: MEMORY_URL.into(),
            jwt: crate::config::JwtConfig {
                secret: "test".into(),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
            },
            host: "127.0.0.1".into(),
            port: 0,
            production,
            store_timeout_secs: 5,
            db_max_connections: 1,
        };
        Self::from_parts(store, config, PasswordHasher::fast(), None)
    }
}
