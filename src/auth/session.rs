use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use actix_web::cookie::{time::Duration as CookieDuration, Cookie, SameSite};
use actix_web::http::header::AUTHORIZATION;
use actix_web::HttpRequest;
use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::auth::principal::Principal;
use crate::auth::strategy::{Credentials, StrategyRegistry};
use crate::config::{IdentityModeKind, Settings};
use crate::db::CredentialStore;
use crate::error::{AppError, AuthError};

type HmacSha256 = Hmac<Sha256>;

const TOKEN_BYTES: usize = 32;

/// What a session remembers about its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaim {
    pub identifier: String,
}

#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub token: String,
    /// Serialized [`SessionClaim`].
    pub claim: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(token: String, claim: &SessionClaim, ttl: Duration) -> Result<Self, AppError> {
        let claim = serde_json::to_string(claim).map_err(|e| AppError::InternalError(e.to_string()))?;
        let now = Utc::now();
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or_else(|| AppError::InternalError("session expiry out of range".into()))?;
        Ok(Self {
            token,
            claim,
            created_at: now,
            expires_at,
            last_activity: now,
        })
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, record: SessionRecord) -> Result<(), AppError>;

    async fn get(&self, token: &str) -> Result<Option<SessionRecord>, AppError>;

    async fn touch(&self, token: &str) -> Result<(), AppError>;

    async fn remove(&self, token: &str) -> Result<(), AppError>;

    /// Drops expired records and returns how many were removed.
    async fn cleanup_expired(&self) -> Result<usize, AppError>;
}

/// Session records held in process memory.
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, SessionRecord>>,
    cleanup_threshold: usize,
    /// Map size that triggers the next sweep on insert.
    sweep_at: AtomicUsize,
}

impl InMemorySessionStore {
    const DEFAULT_CLEANUP_THRESHOLD: usize = 10_000;

    pub fn new() -> Self {
        Self::with_cleanup_threshold(Self::DEFAULT_CLEANUP_THRESHOLD)
    }

    pub fn with_cleanup_threshold(cleanup_threshold: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            cleanup_threshold,
            sweep_at: AtomicUsize::new(cleanup_threshold),
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn insert(&self, record: SessionRecord) -> Result<(), AppError> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(record.token.clone(), record);

        // Sweep, then wait for the map to double before sweeping again.
        if sessions.len() > self.sweep_at.load(Ordering::Relaxed) {
            sessions.retain(|_, s| !s.is_expired());
            let next = self.cleanup_threshold.max(sessions.len() * 2);
            self.sweep_at.store(next, Ordering::Relaxed);
        }
        Ok(())
    }

    async fn get(&self, token: &str) -> Result<Option<SessionRecord>, AppError> {
        Ok(self.sessions.read().await.get(token).cloned())
    }

    async fn touch(&self, token: &str) -> Result<(), AppError> {
        if let Some(record) = self.sessions.write().await.get_mut(token) {
            record.last_activity = Utc::now();
        }
        Ok(())
    }

    async fn remove(&self, token: &str) -> Result<(), AppError> {
        self.sessions.write().await.remove(token);
        Ok(())
    }

    async fn cleanup_expired(&self) -> Result<usize, AppError> {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired());
        Ok(before - sessions.len())
    }
}

/// Signs session tokens so forged cookies are rejected before any lookup.
#[derive(Clone)]
pub struct TokenSigner {
    key: Vec<u8>,
}

impl TokenSigner {
    pub fn new(secret: &[u8]) -> Self {
        Self { key: secret.to_vec() }
    }

    fn mac(&self) -> Result<HmacSha256, AppError> {
        HmacSha256::new_from_slice(&self.key).map_err(|e| AppError::InternalError(e.to_string()))
    }

    /// Returns `token.signature`.
    pub fn sign(&self, token: &str) -> Result<String, AppError> {
        let mut mac = self.mac()?;
        mac.update(token.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        Ok(format!("{}.{}", token, signature))
    }

    /// Returns the token if the signature checks out.
    pub fn verify(&self, value: &str) -> Result<String, AppError> {
        let invalid = || AppError::AuthError(AuthError::SessionInvalid);
        let (token, signature) = value.rsplit_once('.').ok_or_else(invalid)?;
        let signature = URL_SAFE_NO_PAD.decode(signature).map_err(|_| invalid())?;

        let mut mac = self.mac()?;
        mac.update(token.as_bytes());
        mac.verify_slice(&signature).map_err(|_| invalid())?;
        Ok(token.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct CookieConfig {
    pub name: String,
    pub secure: bool,
    pub ttl: Duration,
}

impl CookieConfig {
    fn session_cookie(&self, value: String) -> Cookie<'static> {
        Cookie::build(self.name.clone(), value)
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.secure)
            .max_age(CookieDuration::seconds(self.ttl.num_seconds()))
            .finish()
    }

    fn removal_cookie(&self) -> Cookie<'static> {
        let mut cookie = Cookie::build(self.name.clone(), "")
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.secure)
            .finish();
        cookie.make_removal();
        cookie
    }
}

pub enum IdentityMode {
    /// Credentials are re-verified on every request.
    Stateless,
    /// Login issues a signed session cookie backed by a session store.
    Stateful {
        sessions: Arc<dyn SessionStore>,
        cookie: CookieConfig,
        signer: TokenSigner,
    },
}

/// Decides how an authenticated identity carries over between requests.
pub struct IdentityManager {
    mode: IdentityMode,
}

impl IdentityManager {
    pub fn new(mode: IdentityMode) -> Self {
        Self { mode }
    }

    pub fn stateless() -> Self {
        Self::new(IdentityMode::Stateless)
    }

    pub fn stateful(sessions: Arc<dyn SessionStore>, cookie: CookieConfig, signer: TokenSigner) -> Self {
        Self::new(IdentityMode::Stateful {
            sessions,
            cookie,
            signer,
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, AppError> {
        match settings.auth.identity_mode {
            IdentityModeKind::Stateless => Ok(Self::stateless()),
            IdentityModeKind::Stateful => {
                let secret = settings
                    .auth
                    .session_secret
                    .as_deref()
                    .ok_or_else(|| AppError::ConfigError("auth.session_secret is required in stateful mode".into()))?;
                let cookie = CookieConfig {
                    name: settings.auth.cookie_name.clone(),
                    secure: settings.secure_cookies(),
                    ttl: Duration::try_hours(settings.auth.session_ttl_hours).ok_or_else(|| {
                        AppError::ConfigError("auth.session_ttl_hours is out of range".into())
                    })?,
                };
                Ok(Self::stateful(
                    Arc::new(InMemorySessionStore::new()),
                    cookie,
                    TokenSigner::new(secret.as_bytes()),
                ))
            }
        }
    }

    pub fn is_stateful(&self) -> bool {
        matches!(self.mode, IdentityMode::Stateful { .. })
    }

    /// Resolves the principal for an incoming request, if any.
    ///
    /// Missing, bad, expired or tampered credentials yield `Ok(None)`;
    /// only store failures surface as errors.
    pub async fn resolve(
        &self,
        req: &HttpRequest,
        store: &dyn CredentialStore,
        strategies: &StrategyRegistry,
    ) -> Result<Option<Principal>, AppError> {
        let outcome = match &self.mode {
            IdentityMode::Stateless => match basic_credentials(req) {
                Some(credentials) => strategies.authenticate(store, &credentials).await,
                None => return Ok(None),
            },
            IdentityMode::Stateful { cookie, .. } => match req.cookie(&cookie.name) {
                Some(session_cookie) => self.resume(session_cookie.value(), store).await,
                None => return Ok(None),
            },
        };

        match outcome {
            Ok(principal) => Ok(Some(principal)),
            Err(AppError::AuthError(e)) => {
                debug!("Request continues unauthenticated: {}", e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Starts continuity for a freshly verified principal.
    ///
    /// Returns the cookie to set, or `None` in stateless mode.
    pub async fn establish(&self, principal: &Principal) -> Result<Option<Cookie<'static>>, AppError> {
        let IdentityMode::Stateful { sessions, cookie, signer } = &self.mode else {
            return Ok(None);
        };

        let token = new_token();
        let claim = SessionClaim {
            identifier: principal.identifier().to_string(),
        };
        sessions.insert(SessionRecord::new(token.clone(), &claim, cookie.ttl)?).await?;
        info!(user_id = %principal.id(), "Session established");

        Ok(Some(cookie.session_cookie(signer.sign(&token)?)))
    }

    /// Rebuilds the principal behind a session cookie value.
    pub async fn resume(&self, cookie_value: &str, store: &dyn CredentialStore) -> Result<Principal, AppError> {
        let IdentityMode::Stateful { sessions, signer, .. } = &self.mode else {
            return Err(AuthError::SessionInvalid.into());
        };

        let token = signer.verify(cookie_value)?;
        let record = sessions
            .get(&token)
            .await?
            .ok_or(AppError::AuthError(AuthError::SessionInvalid))?;

        if record.is_expired() {
            sessions.remove(&token).await?;
            return Err(AuthError::SessionInvalid.into());
        }

        let claim: SessionClaim =
            serde_json::from_str(&record.claim).map_err(|_| AppError::AuthError(AuthError::SessionInvalid))?;
        let stored = store
            .find_by_identifier(&claim.identifier)
            .await?
            .ok_or(AppError::AuthError(AuthError::SessionInvalid))?;

        sessions.touch(&token).await?;
        Ok(Principal::from_record(&stored))
    }

    /// Ends the caller's session and returns the cookie that clears it.
    pub async fn end(&self, req: &HttpRequest) -> Result<Option<Cookie<'static>>, AppError> {
        let IdentityMode::Stateful { sessions, cookie, signer } = &self.mode else {
            return Ok(None);
        };

        if let Some(session_cookie) = req.cookie(&cookie.name) {
            if let Ok(token) = signer.verify(session_cookie.value()) {
                sessions.remove(&token).await?;
                info!("Session destroyed");
            }
        }
        Ok(Some(cookie.removal_cookie()))
    }

    pub async fn cleanup_expired(&self) -> Result<usize, AppError> {
        match &self.mode {
            IdentityMode::Stateful { sessions, .. } => sessions.cleanup_expired().await,
            IdentityMode::Stateless => Ok(0),
        }
    }
}

fn new_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Parses `Authorization: Basic base64(identifier:secret)`.
fn basic_credentials(req: &HttpRequest) -> Option<Credentials> {
    let header = req.headers().get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = header.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = String::from_utf8(STANDARD.decode(encoded.trim()).ok()?).ok()?;
    let (identifier, secret) = decoded.split_once(':')?;
    Some(Credentials::new(identifier, secret))
}
