use base64::Engine;
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, String),

    #[error("no identity provider configured: set FIREBASE_PROJECT_ID, FB_SERVICE_KEY or IDENTITY_SECRET")]
    NoIdentityProvider,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityConfig {
    Firebase { project_id: String },
    SharedSecret(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub mongodb_uri: String,
    pub database_name: String,
    pub port: u16,
    /// Empty allows any origin.
    pub cors_origins: Vec<String>,
    pub identity: IdentityConfig,
    pub stripe_secret_key: String,
    pub payment_currency: String,
}

#[derive(Deserialize)]
struct ServiceAccount {
    project_id: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        // a missing .env file is fine; the process environment still applies
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).filter(|it| !it.trim().is_empty());

        let port = match var("PORT") {
            Some(port) => port
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid("PORT", port))?,
            None => 3000,
        };

        let identity = if let Some(project_id) = var("FIREBASE_PROJECT_ID") {
            IdentityConfig::Firebase { project_id }
        } else if let Some(key) = var("FB_SERVICE_KEY").or_else(|| var("FB_Service_Key")) {
            IdentityConfig::Firebase {
                project_id: service_account_project(&key)?,
            }
        } else if let Some(secret) = var("IDENTITY_SECRET") {
            IdentityConfig::SharedSecret(secret)
        } else {
            return Err(ConfigError::NoIdentityProvider);
        };

        Ok(Self {
            mongodb_uri: var("MONGODB_URI").ok_or(ConfigError::Missing("MONGODB_URI"))?,
            database_name: var("DATABASE_NAME").unwrap_or_else(|| "courier".to_string()),
            port,
            cors_origins: var("CORS_ORIGINS")
                .map(|it| {
                    it.split(',')
                        .map(str::trim)
                        .filter(|it| !it.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            identity,
            stripe_secret_key: var("STRIPE_SECRET_KEY")
                .ok_or(ConfigError::Missing("STRIPE_SECRET_KEY"))?,
            payment_currency: var("PAYMENT_CURRENCY").unwrap_or_else(|| "usd".to_string()),
        })
    }
}

/// `project_id` of a base64 encoded service account key.
fn service_account_project(encoded: &str) -> Result<String, ConfigError> {
    let invalid = |reason: String| ConfigError::Invalid("FB_SERVICE_KEY", reason);

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|err| invalid(err.to_string()))?;

    let account: ServiceAccount =
        serde_json::from_slice(&decoded).map_err(|err| invalid(err.to_string()))?;

    Ok(account.project_id)
}
