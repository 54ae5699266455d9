use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use tracing::{debug, info};

use crate::auth::password::PasswordHasher;
use crate::auth::principal::Principal;
use crate::config::AuthConfig;
use crate::db::models::NewCredential;
use crate::db::CredentialStore;
use crate::error::{AppError, AuthError};

const MIN_SECRET_LEN: usize = 8;
const MAX_IDENTIFIER_LEN: usize = 254;

/// Identifiers are matched after trimming and lower-casing.
pub fn normalize_identifier(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// An (identifier, secret) pair as presented by a client.
#[derive(Deserialize)]
pub struct Credentials {
    #[serde(alias = "email")]
    pub identifier: String,
    #[serde(alias = "password")]
    pub secret: String,
}

impl Credentials {
    pub fn new(identifier: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("identifier", &self.identifier)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Known credential schemes, selected by name at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    Local,
}

impl StrategyKind {
    pub fn name(self) -> &'static str {
        match self {
            StrategyKind::Local => "local",
        }
    }
}

impl FromStr for StrategyKind {
    type Err = AppError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(StrategyKind::Local),
            other => Err(AppError::ConfigError(format!("unknown auth strategy: {}", other))),
        }
    }
}

/// Identifier + Argon2 secret checked against the credential store.
pub struct LocalStrategy {
    hasher: PasswordHasher,
    /// Verified against when the identifier is unknown, so both failure
    /// paths do the same hashing work.
    dummy_hash: String,
}

impl LocalStrategy {
    pub fn new(hasher: PasswordHasher) -> Result<Self, AppError> {
        let dummy_hash = hasher.hash_blocking("no-such-identity-placeholder")?;
        Ok(Self { hasher, dummy_hash })
    }

    pub async fn verify(
        &self,
        store: &dyn CredentialStore,
        identifier: &str,
        secret: &str,
    ) -> Result<Principal, AppError> {
        let identifier = normalize_identifier(identifier);
        let record = store.find_by_identifier(&identifier).await?;

        match record {
            Some(record) => {
                let matched = self
                    .hasher
                    .verify(secret.to_owned(), record.password_hash.clone())
                    .await?;
                if matched {
                    Ok(Principal::from_record(&record))
                } else {
                    debug!("Secret mismatch");
                    Err(AuthError::BadSecret.into())
                }
            }
            None => {
                self.hasher
                    .verify(secret.to_owned(), self.dummy_hash.clone())
                    .await?;
                debug!("Unknown identity");
                Err(AuthError::NoSuchIdentity.into())
            }
        }
    }

    pub async fn register(
        &self,
        store: &dyn CredentialStore,
        identifier: &str,
        secret: &str,
    ) -> Result<Principal, AppError> {
        let identifier = normalize_identifier(identifier);
        if identifier.is_empty() || identifier.len() > MAX_IDENTIFIER_LEN || !identifier.contains('@') {
            return Err(AppError::ValidationError("identifier must be an email address".into()));
        }
        if secret.chars().count() < MIN_SECRET_LEN {
            return Err(AppError::ValidationError(format!(
                "secret must be at least {} characters",
                MIN_SECRET_LEN
            )));
        }

        let password_hash = self.hasher.hash(secret.to_owned()).await?;
        let record = store
            .create(NewCredential {
                identifier,
                password_hash,
            })
            .await?;

        info!(user_id = %record.id, "Registered new identity");
        Ok(Principal::from_record(&record))
    }
}

pub enum Strategy {
    Local(LocalStrategy),
}

impl Strategy {
    pub fn kind(&self) -> StrategyKind {
        match self {
            Strategy::Local(_) => StrategyKind::Local,
        }
    }

    pub async fn verify(
        &self,
        store: &dyn CredentialStore,
        credentials: &Credentials,
    ) -> Result<Principal, AppError> {
        match self {
            Strategy::Local(local) => local.verify(store, &credentials.identifier, &credentials.secret).await,
        }
    }

    pub async fn register(
        &self,
        store: &dyn CredentialStore,
        credentials: &Credentials,
    ) -> Result<Principal, AppError> {
        match self {
            Strategy::Local(local) => local.register(store, &credentials.identifier, &credentials.secret).await,
        }
    }
}

/// Strategies available to the pipeline, looked up by kind.
pub struct StrategyRegistry {
    strategies: HashMap<StrategyKind, Strategy>,
    default: StrategyKind,
}

impl StrategyRegistry {
    pub fn new(default: StrategyKind) -> Self {
        Self {
            strategies: HashMap::new(),
            default,
        }
    }

    pub fn from_config(config: &AuthConfig) -> Result<Self, AppError> {
        let default = config.strategy.parse::<StrategyKind>()?;
        let mut registry = Self::new(default);
        let local = LocalStrategy::new(PasswordHasher::from_config(config)?)?;
        registry.add(Strategy::Local(local));
        // Fail at startup rather than on the first login.
        registry.get(default)?;
        Ok(registry)
    }

    pub fn add(&mut self, strategy: Strategy) {
        info!("Registered auth strategy: {}", strategy.kind().name());
        self.strategies.insert(strategy.kind(), strategy);
    }

    pub fn get(&self, kind: StrategyKind) -> Result<&Strategy, AppError> {
        self.strategies
            .get(&kind)
            .ok_or_else(|| AppError::ConfigError(format!("auth strategy not registered: {}", kind.name())))
    }

    pub fn default_kind(&self) -> StrategyKind {
        self.default
    }

    pub async fn authenticate(
        &self,
        store: &dyn CredentialStore,
        credentials: &Credentials,
    ) -> Result<Principal, AppError> {
        self.get(self.default)?.verify(store, credentials).await
    }

    pub async fn register(
        &self,
        store: &dyn CredentialStore,
        credentials: &Credentials,
    ) -> Result<Principal, AppError> {
        self.get(self.default)?.register(store, credentials).await
    }
}
