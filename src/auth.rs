//! Viewer authorization with Google ID tokens.

use std::collections::HashSet;
use std::path::Path;
use std::time::{Duration, Instant};

use axum::http::{HeaderMap, header};
use jsonwebtoken::{
    Algorithm, DecodingKey, Validation, decode, decode_header,
    jwk::{Jwk, JwkSet},
};
use serde::Deserialize;
use tokio::sync::RwLock;

/// Google's signing keys in JWK form.
pub const GOOGLE_CERTS_URL: &str = "https://www.googleapis.com/oauth2/v3/certs";
const GOOGLE_ISSUERS: [&str; 2] = ["accounts.google.com", "https://accounts.google.com"];
/// Unknown key ids within this interval of the last fetch are rejected without
/// asking Google again.
const MIN_REFETCH_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Authorization header missing")]
    MissingHeader,
    #[error("Bearer token missing")]
    MissingBearer,
    #[error("token has no key id")]
    MissingKeyId,
    #[error("key not found")]
    UnknownKey,
    #[error("fetch signing keys: {0}")]
    Keys(#[from] reqwest::Error),
    #[error("{0}")]
    Token(#[from] jsonwebtoken::errors::Error),
    #[error("email is not verified")]
    EmailUnverified,
    #[error("user is invalid")]
    NotAllowed,
}

/// Who is watching. `email` is `None` when authentication is disabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub email: Option<String>,
}

impl Identity {
    pub fn anonymous() -> Self {
        Self { email: None }
    }

    pub fn name(&self) -> &str {
        self.email.as_deref().unwrap_or("anonymous")
    }
}

pub enum Authenticator {
    /// Every request is let through.
    Disabled,
    Google(GoogleVerifier),
}

impl Authenticator {
    pub async fn verify(&self, headers: &HeaderMap) -> Result<Identity, AuthError> {
        match self {
            Authenticator::Disabled => Ok(Identity::anonymous()),
            Authenticator::Google(verifier) => {
                let token = bearer_token(headers)?;
                let claims = verifier.verify_token(token).await?;
                Ok(Identity {
                    email: Some(claims.email),
                })
            }
        }
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self, Authenticator::Disabled)
    }
}

/// Extracts the token of an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or(AuthError::MissingHeader)?;
    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(AuthError::MissingBearer)
}

// ============================================================================
// Accounts
// ============================================================================

/// E-mail addresses allowed to watch, compared case-insensitively.
#[derive(Debug, Default, Clone)]
pub struct AllowedAccounts {
    emails: HashSet<String>,
}

impl AllowedAccounts {
    /// One address per line; blank lines and `#` comments are ignored.
    pub fn parse(text: &str) -> Self {
        let emails = text
            .lines()
            .map(|line| line.split('#').next().unwrap_or_default().trim())
            .filter(|line| !line.is_empty())
            .map(str::to_lowercase)
            .collect();
        Self { emails }
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("read accounts file {}: {}", path.display(), e))?;
        Ok(Self::parse(&text))
    }

    pub fn contains(&self, email: &str) -> bool {
        self.emails.contains(&email.trim().to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.emails.len()
    }

    pub fn is_empty(&self) -> bool {
        self.emails.is_empty()
    }
}

// ============================================================================
// Google ID tokens
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleClaims {
    pub email: String,
    #[serde(default)]
    pub email_verified: bool,
}

/// Verifies RS256 ID tokens issued by Google for one OAuth client.
///
/// Signing keys are cached and refetched when a token names an unknown key,
/// at most once per `MIN_REFETCH_INTERVAL`.
pub struct GoogleVerifier {
    client_id: String,
    accounts: AllowedAccounts,
    certs_url: String,
    http: reqwest::Client,
    keys: RwLock<KeyCache>,
}

struct KeyCache {
    keys: JwkSet,
    /// Last fetch attempt, successful or not.
    fetched_at: Option<Instant>,
}

impl KeyCache {
    fn new(keys: JwkSet) -> Self {
        Self {
            keys,
            fetched_at: None,
        }
    }

    fn find(&self, kid: &str) -> Option<Jwk> {
        self.keys.find(kid).cloned()
    }

    fn fetched_recently(&self) -> bool {
        self.fetched_at
            .is_some_and(|at| at.elapsed() < MIN_REFETCH_INTERVAL)
    }
}

impl GoogleVerifier {
    pub fn new(client_id: &str, accounts: AllowedAccounts) -> Self {
        Self {
            client_id: client_id.to_string(),
            accounts,
            certs_url: GOOGLE_CERTS_URL.to_string(),
            http: reqwest::Client::new(),
            keys: RwLock::new(KeyCache::new(JwkSet { keys: Vec::new() })),
        }
    }

    #[cfg(test)]
    pub fn with_certs_url(mut self, url: &str) -> Self {
        self.certs_url = url.to_string();
        self
    }

    /// Seeds the key cache.
    #[cfg(test)]
    pub fn with_keys(mut self, keys: JwkSet) -> Self {
        self.keys = RwLock::new(KeyCache::new(keys));
        self
    }

    pub async fn verify_token(&self, token: &str) -> Result<GoogleClaims, AuthError> {
        let header = decode_header(token)?;
        let kid = header.kid.ok_or(AuthError::MissingKeyId)?;
        let key = self.decoding_key(&kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[&self.client_id]);
        validation.set_issuer(&GOOGLE_ISSUERS);
        let claims = decode::<GoogleClaims>(token, &key, &validation)?.claims;

        self.check_claims(&claims)?;
        Ok(claims)
    }

    fn check_claims(&self, claims: &GoogleClaims) -> Result<(), AuthError> {
        if !claims.email_verified {
            return Err(AuthError::EmailUnverified);
        }
        if !self.accounts.contains(&claims.email) {
            log::info!("rejected {}: not in the accounts file", claims.email);
            return Err(AuthError::NotAllowed);
        }
        Ok(())
    }

    async fn decoding_key(&self, kid: &str) -> Result<DecodingKey, AuthError> {
        if let Some(jwk) = self.keys.read().await.find(kid) {
            return Ok(DecodingKey::from_jwk(&jwk)?);
        }

        // keys rotate, so an unknown kid triggers a refetch; the write lock
        // lets one request fetch while the others wait for its result
        let mut cache = self.keys.write().await;
        if let Some(jwk) = cache.find(kid) {
            return Ok(DecodingKey::from_jwk(&jwk)?);
        }
        if cache.fetched_recently() {
            log::debug!("unknown key id {}, keys were fetched recently", kid);
            return Err(AuthError::UnknownKey);
        }

        cache.fetched_at = Some(Instant::now());
        cache.keys = self.fetch_keys().await?;
        log::debug!("fetched {} signing keys", cache.keys.keys.len());

        let jwk = cache.find(kid).ok_or(AuthError::UnknownKey)?;
        Ok(DecodingKey::from_jwk(&jwk)?)
    }

    async fn fetch_keys(&self) -> Result<JwkSet, AuthError> {
        let keys = self
            .http
            .get(&self.certs_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(keys)
    }
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod auth_test;
