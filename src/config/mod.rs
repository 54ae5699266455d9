use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use config::builder::DefaultState;
use serde::Deserialize;
use std::env;
use std::time::Duration;

/// Minimum length of the session-signing secret in stateful mode.
pub const MIN_SESSION_SECRET_LEN: usize = 32;
pub const MAX_SESSION_TTL_HOURS: i64 = 24 * 365 * 10;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Deployment {
    Development,
    Production,
    Test,
}

impl Deployment {
    pub fn is_production(self) -> bool {
        matches!(self, Deployment::Production)
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IdentityModeKind {
    Stateless,
    Stateful,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// Data-store URI. `postgres://` selects Postgres, `memory://` the in-process store.
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_secs: Option<u64>,
    pub run_migrations: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub identity_mode: IdentityModeKind,
    pub strategy: String,
    pub session_secret: Option<String>,
    pub session_ttl_hours: i64,
    pub cookie_name: String,
    pub hash_memory_kib: u32,
    pub hash_iterations: u32,
    pub hash_parallelism: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorsConfig {
    pub enabled: bool,
    pub allow_any_origin: bool,
    pub allowed_origins: Vec<String>,
    pub max_age: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub environment: Deployment,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub cors: CorsConfig,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let settings: Settings = Self::defaults()?
            // Add in settings from the config file if it exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // E.g., `APP_DATABASE__URL=postgres://...` sets `Settings.database.url`
            .add_source(
                Environment::with_prefix("app")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Defaults for every key except `database.url`, which has to be supplied.
    pub fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        Config::builder()
            .set_default("environment", "development")?
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 3000)?
            .set_default("server.workers", num_cpus::get() as i64)?
            .set_default("database.max_connections", 5)?
            .set_default("database.run_migrations", true)?
            .set_default("auth.identity_mode", "stateful")?
            .set_default("auth.strategy", "local")?
            .set_default("auth.session_ttl_hours", 24)?
            .set_default("auth.cookie_name", "sid")?
            .set_default("auth.hash_memory_kib", 19 * 1024)?
            .set_default("auth.hash_iterations", 2)?
            .set_default("auth.hash_parallelism", 1)?
            .set_default("cors.enabled", false)?
            .set_default("cors.allow_any_origin", false)?
            .set_default("cors.allowed_origins", Vec::<String>::new())?
            .set_default("cors.max_age", 3600)
    }

    /// Checks the values the service cannot start without.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.trim().is_empty() {
            return Err(ConfigError::Message("database.url must be set".into()));
        }

        if self.auth.identity_mode == IdentityModeKind::Stateful {
            match &self.auth.session_secret {
                Some(secret) if secret.len() >= MIN_SESSION_SECRET_LEN => {}
                Some(_) => {
                    return Err(ConfigError::Message(format!(
                        "auth.session_secret must be at least {} bytes",
                        MIN_SESSION_SECRET_LEN
                    )))
                }
                None => {
                    return Err(ConfigError::Message(
                        "auth.session_secret is required in stateful mode".into(),
                    ))
                }
            }
        }

        if self.auth.session_ttl_hours <= 0 || self.auth.session_ttl_hours > MAX_SESSION_TTL_HOURS {
            return Err(ConfigError::Message(format!(
                "auth.session_ttl_hours must be between 1 and {}",
                MAX_SESSION_TTL_HOURS
            )));
        }

        Ok(())
    }

    /// Bound on establishing the data-store connection.
    pub fn connect_timeout(&self) -> Duration {
        let default_secs = if self.environment.is_production() { 10 } else { 5 };
        Duration::from_secs(self.database.connect_timeout_secs.unwrap_or(default_secs))
    }

    /// Session cookies carry `Secure` only in production deployments.
    pub fn secure_cookies(&self) -> bool {
        self.environment.is_production()
    }

    pub fn new_for_test() -> Result<Self, ConfigError> {
        Self::defaults()?
            .set_override("environment", "test")?
            .set_override("server.port", 8080)?
            .set_override("database.url", "memory://test")?
            .set_override("database.connect_timeout_secs", 2)?
            .set_override("auth.session_secret", "test_secret_test_secret_test_secret_0123")?
            .set_override("auth.hash_memory_kib", 64)?
            .set_override("auth.hash_iterations", 1)?
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn cleanup_env() {
        env::remove_var("APP_SERVER__PORT");
        env::remove_var("APP_DATABASE__URL");
        env::remove_var("APP_AUTH__IDENTITY_MODE");
        env::remove_var("APP_AUTH__SESSION_SECRET");
    }

    #[test]
    fn test_settings_defaults() {
        cleanup_env();
        let settings = Settings::new_for_test().expect("Failed to load settings");
        assert_eq!(settings.environment, Deployment::Test);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.server.workers as usize, num_cpus::get());
        assert_eq!(settings.database.url, "memory://test");
        assert_eq!(settings.auth.identity_mode, IdentityModeKind::Stateful);
        assert_eq!(settings.auth.cookie_name, "sid");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_missing_database_url_is_rejected() {
        let result = Settings::defaults()
            .unwrap()
            .set_override("auth.session_secret", "x".repeat(32))
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize::<Settings>();

        // No default exists for database.url.
        assert!(result.is_err());
    }

    #[test]
    fn test_stateful_requires_long_secret() {
        let mut settings = Settings::new_for_test().unwrap();
        settings.auth.session_secret = Some("short".into());
        assert!(settings.validate().is_err());

        settings.auth.session_secret = None;
        assert!(settings.validate().is_err());

        settings.auth.identity_mode = IdentityModeKind::Stateless;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_session_ttl_is_bounded() {
        let mut settings = Settings::new_for_test().unwrap();
        settings.auth.session_ttl_hours = 0;
        assert!(settings.validate().is_err());

        settings.auth.session_ttl_hours = 2_400_000_000;
        assert!(settings.validate().is_err());

        settings.auth.session_ttl_hours = MAX_SESSION_TTL_HOURS + 1;
        assert!(settings.validate().is_err());

        settings.auth.session_ttl_hours = MAX_SESSION_TTL_HOURS;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_deployment_gates_cookie_and_timeout() {
        let mut settings = Settings::new_for_test().unwrap();
        settings.database.connect_timeout_secs = None;
        assert!(!settings.secure_cookies());
        assert_eq!(settings.connect_timeout(), Duration::from_secs(5));

        settings.environment = Deployment::Production;
        assert!(settings.secure_cookies());
        assert_eq!(settings.connect_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_invalid_port() {
        let result = Settings::defaults()
            .unwrap()
            .set_override("database.url", "memory://test")
            .unwrap()
            .set_override("server.port", "invalid")
            .unwrap()
            .build()
            .and_then(|config| config.try_deserialize::<Settings>());

        assert!(result.is_err(), "Expected error for invalid port");
    }
}
