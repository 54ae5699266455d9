pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod pipeline;

use std::sync::Arc;
use actix_web::{web, HttpResponse};

pub use error::AppError;
pub type Result<T> = std::result::Result<T, AppError>;
pub use config::Settings;

pub use auth::{IdentityManager, Principal, StrategyRegistry};
pub use db::{ConnectionCache, CredentialStore, StoreConnector};
pub use pipeline::Pipeline;

/// Health check endpoint handler
/// Reports whether the credential store is connected without connecting it.
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let store = if state.store.is_warm() { "warm" } else { "cold" };
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "store": store,
    }))
}

/// Application state shared across all workers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Settings>,
    pub store: ConnectionCache,
    pub strategies: Arc<StrategyRegistry>,
    pub identity: Arc<IdentityManager>,
}

impl AppState {
    /// Builds the state without touching the data store; the first request connects.
    pub fn new(config: Settings) -> Result<Self> {
        let connector = db::connector_for(&config.database, config.connect_timeout())?;
        Self::with_connector(config, connector)
    }

    pub fn with_connector(config: Settings, connector: Arc<dyn StoreConnector>) -> Result<Self> {
        let store = ConnectionCache::new(connector, config.connect_timeout());
        let strategies = StrategyRegistry::from_config(&config.auth)?;
        let identity = IdentityManager::from_settings(&config)?;

        Ok(Self {
            config: Arc::new(config),
            store,
            strategies: Arc::new(strategies),
            identity: Arc::new(identity),
        })
    }
}

/// Routes and extractor configuration shared by the server and tests.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default()
            .error_handler(|err, _req| AppError::ValidationError(err.to_string()).into()),
    )
    .route("/", web::get().to(auth::handlers::index))
    .route(pipeline::HEALTH_PATH, web::get().to(health_check))
    .route("/register", web::post().to(auth::handlers::register))
    .route("/login", web::post().to(auth::handlers::login))
    .route("/logout", web::post().to(auth::handlers::logout))
    .route("/me", web::get().to(auth::handlers::me));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_state_creation_is_lazy() {
        let config = Settings::new_for_test().expect("Failed to load test config");
        let state = AppState::new(config).expect("Failed to build state");

        assert!(!state.store.is_warm());
        assert_eq!(state.store.connect_attempts(), 0);
        assert!(state.identity.is_stateful());
    }

    #[test]
    fn test_app_state_rejects_unknown_store_scheme() {
        let mut config = Settings::new_for_test().unwrap();
        config.database.url = "mongodb://localhost/auth".into();

        assert!(matches!(AppState::new(config), Err(AppError::ConfigError(_))));
    }

    #[test]
    fn test_app_state_clone() {
        let config = Settings::new_for_test().unwrap();
        let state = AppState::new(config).unwrap();
        let cloned = state.clone();

        assert!(Arc::ptr_eq(&state.config, &cloned.config));
        assert!(Arc::ptr_eq(&state.strategies, &cloned.strategies));
        assert!(Arc::ptr_eq(&state.identity, &cloned.identity));
    }
}
