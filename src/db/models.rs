use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Persisted shape of a user. Only the store adapters construct or mutate it.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StoredCredential {
    pub id: Uuid,
    /// Normalized (trimmed, lower-cased) identifier, unique per store.
    pub identifier: String,
    /// Argon2 PHC string; the salt is embedded.
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewCredential {
    pub identifier: String,
    pub password_hash: String,
}

impl StoredCredential {
    pub fn new(new: NewCredential) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            identifier: new.identifier,
            password_hash: new.password_hash,
            created_at: now,
            updated_at: now,
        }
    }
}
