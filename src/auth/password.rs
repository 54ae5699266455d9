use argon2::password_hash::SaltString;
use argon2::{Algorithm, Argon2, Params, PasswordHash, PasswordHasher as _, PasswordVerifier, Version};
use rand::RngCore;
use tracing::warn;

use crate::config::AuthConfig;
use crate::error::AppError;

const SALT_LEN: usize = 16;

/// Argon2id hashing with the configured cost.
///
/// The async methods move the work onto the blocking pool so request
/// tasks are never stalled by hashing.
#[derive(Clone)]
pub struct PasswordHasher {
    params: Params,
}

impl PasswordHasher {
    pub fn new(memory_kib: u32, iterations: u32, parallelism: u32) -> Result<Self, AppError> {
        let params = Params::new(memory_kib, iterations, parallelism, None)
            .map_err(|e| AppError::ConfigError(format!("invalid password hash parameters: {}", e)))?;
        Ok(Self { params })
    }

    pub fn from_config(config: &AuthConfig) -> Result<Self, AppError> {
        Self::new(config.hash_memory_kib, config.hash_iterations, config.hash_parallelism)
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// Produces a PHC string with a fresh random salt.
    pub fn hash_blocking(&self, secret: &str) -> Result<String, AppError> {
        let mut salt_bytes = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt_bytes);
        let salt = SaltString::encode_b64(&salt_bytes)
            .map_err(|e| AppError::InternalError(e.to_string()))?;

        let phc = self
            .argon2()
            .hash_password(secret.as_bytes(), &salt)
            .map_err(|e| AppError::InternalError(e.to_string()))?
            .to_string();
        Ok(phc)
    }

    /// Compares in constant time. An unparsable stored hash never matches.
    pub fn verify_blocking(&self, secret: &str, phc: &str) -> bool {
        match PasswordHash::new(phc) {
            Ok(parsed) => self.argon2().verify_password(secret.as_bytes(), &parsed).is_ok(),
            Err(e) => {
                warn!("Stored password hash could not be parsed: {}", e);
                false
            }
        }
    }

    pub async fn hash(&self, secret: String) -> Result<String, AppError> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.hash_blocking(&secret))
            .await
            .map_err(|e| AppError::InternalError(e.to_string()))?
    }

    pub async fn verify(&self, secret: String, phc: String) -> Result<bool, AppError> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.verify_blocking(&secret, &phc))
            .await
            .map_err(|e| AppError::InternalError(e.to_string()))
    }
}
