use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use jsonwebtoken::{
    jwk::{Jwk, JwkSet},
    Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

pub const FIREBASE_JWKS_URL: &str =
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";

const KEY_SET_MAX_AGE: Duration = Duration::from_secs(60 * 60);
const REFETCH_COOLDOWN: Duration = Duration::from_secs(60);

/// Claims of an identity-provider ID token. Only `sub` and `exp` are
/// guaranteed; `email` is absent for anonymous or phone sign-ins.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct IdTokenClaims {
    pub sub: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    pub exp: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("{0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("token header has no key id")]
    MissingKeyId,

    #[error("token signed with unknown key {0}")]
    UnknownKey(String),

    #[error("failed to fetch signing keys: {0}")]
    KeyFetch(#[from] reqwest::Error),
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn verify(&self, token: &str) -> Result<IdTokenClaims, VerifyError>;
}

#[derive(Clone)]
pub struct SharedIdentityProvider(pub Arc<dyn IdentityProvider>);

impl std::ops::Deref for SharedIdentityProvider {
    type Target = dyn IdentityProvider;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

struct CachedKeys {
    set: JwkSet,
    fetched_at: Instant,
}

#[derive(Default)]
struct KeyCache {
    keys: Option<CachedKeys>,
    last_attempt: Option<Instant>,
}

impl KeyCache {
    fn fresh_key(&self, kid: &str) -> Option<&Jwk> {
        self.keys
            .as_ref()
            .filter(|it| it.fetched_at.elapsed() < KEY_SET_MAX_AGE)
            .and_then(|it| it.set.find(kid))
    }

    fn cooling_down(&self) -> bool {
        self.last_attempt
            .map_or(false, |it| it.elapsed() < REFETCH_COOLDOWN)
    }
}

/// Verifies Firebase ID tokens against Google's published signing keys.
///
/// The key set is refetched when it is older than an hour or when a token
/// names a key id the current set does not contain (Google rotates keys).
/// Refetches are at most one per minute; in between, unknown key ids are
/// answered from the cache.
pub struct FirebaseVerifier {
    http: reqwest::Client,
    jwks_url: String,
    validation: Validation,
    cache: RwLock<KeyCache>,
}

impl FirebaseVerifier {
    pub fn new(project_id: &str) -> Self {
        Self::with_jwks_url(project_id, FIREBASE_JWKS_URL)
    }

    pub fn with_jwks_url(project_id: &str, jwks_url: &str) -> Self {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[project_id]);
        validation.set_issuer(&[format!("https://securetoken.google.com/{}", project_id)]);

        Self {
            http: reqwest::Client::new(),
            jwks_url: jwks_url.to_string(),
            validation,
            cache: RwLock::new(KeyCache::default()),
        }
    }

    async fn fetch_keys(&self) -> Result<JwkSet, VerifyError> {
        tracing::debug!("fetching identity signing keys from {}", self.jwks_url);
        self.http
            .get(&self.jwks_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .map_err(Into::into)
    }

    async fn decoding_key(&self, kid: &str) -> Result<DecodingKey, VerifyError> {
        if let Some(jwk) = self.cache.read().await.fresh_key(kid) {
            return DecodingKey::from_jwk(jwk).map_err(Into::into);
        }

        // held across the fetch so concurrent misses share one request
        let mut cache = self.cache.write().await;

        if !cache.cooling_down() {
            cache.last_attempt = Some(Instant::now());
            let set = self.fetch_keys().await?;
            cache.keys = Some(CachedKeys {
                set,
                fetched_at: Instant::now(),
            });
        } else {
            tracing::debug!("key {} not cached, refetch cooling down", kid);
        }

        cache
            .keys
            .as_ref()
            .and_then(|it| it.set.find(kid))
            .map(DecodingKey::from_jwk)
            .transpose()?
            .ok_or_else(|| VerifyError::UnknownKey(kid.to_string()))
    }
}

#[async_trait]
impl IdentityProvider for FirebaseVerifier {
    async fn verify(&self, token: &str) -> Result<IdTokenClaims, VerifyError> {
        let header = jsonwebtoken::decode_header(token)?;
        let kid = header.kid.ok_or(VerifyError::MissingKeyId)?;
        let key = self.decoding_key(&kid).await?;

        jsonwebtoken::decode::<IdTokenClaims>(token, &key, &self.validation)
            .map(|it| it.claims)
            .map_err(Into::into)
    }
}

/// HS256 tokens signed with a shared secret, for local development where
/// no identity provider project is available.
#[derive(Clone)]
pub struct SecretVerifier {
    header: Header,
    validation: Validation,

    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl SecretVerifier {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            header: Header::new(Algorithm::HS256),
            validation: Validation::new(Algorithm::HS256),

            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
        }
    }

    pub fn issue(&self, claims: &IdTokenClaims) -> Result<String, VerifyError> {
        jsonwebtoken::encode(&self.header, claims, &self.encoding_key).map_err(Into::into)
    }
}

#[async_trait]
impl IdentityProvider for SecretVerifier {
    async fn verify(&self, token: &str) -> Result<IdTokenClaims, VerifyError> {
        jsonwebtoken::decode::<IdTokenClaims>(token, &self.decoding_key, &self.validation)
            .map(|it| it.claims)
            .map_err(Into::into)
    }
}
