//! Payment-intent creation against the card processor.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

pub const STRIPE_API_URL: &str = "https://api.stripe.com/v1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    /// Rejection reported by the processor, with its own message.
    #[error("{0}")]
    Rejected(String),

    #[error("{0}")]
    Transport(#[from] reqwest::Error),
}

#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// `amount` is in the currency's minor unit (cents for usd).
    async fn create_payment_intent(&self, amount: i64) -> Result<PaymentIntent, ProcessorError>;
}

#[derive(Clone)]
pub struct SharedPaymentProcessor(pub Arc<dyn PaymentProcessor>);

impl std::ops::Deref for SharedPaymentProcessor {
    type Target = dyn PaymentProcessor;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

pub struct StripeClient {
    http: reqwest::Client,
    base_url: String,
    secret_key: String,
    currency: String,
}

#[derive(Deserialize)]
struct StripeIntent {
    id: String,
    client_secret: String,
}

#[derive(Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Deserialize)]
struct StripeErrorDetail {
    message: Option<String>,
}

impl StripeClient {
    pub fn new(secret_key: &str, currency: &str) -> Self {
        Self::with_base_url(STRIPE_API_URL, secret_key, currency)
    }

    pub fn with_base_url(base_url: &str, secret_key: &str, currency: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            secret_key: secret_key.to_string(),
            currency: currency.to_string(),
        }
    }
}

#[async_trait]
impl PaymentProcessor for StripeClient {
    #[tracing::instrument(skip(self), fields(currency = %self.currency))]
    async fn create_payment_intent(&self, amount: i64) -> Result<PaymentIntent, ProcessorError> {
        let amount = amount.to_string();
        let response = self
            .http
            .post(format!("{}/payment_intents", self.base_url))
            .bearer_auth(&self.secret_key)
            .form(&[
                ("amount", amount.as_str()),
                ("currency", self.currency.as_str()),
                ("payment_method_types[]", "card"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let message = response
                .json::<StripeErrorBody>()
                .await
                .ok()
                .and_then(|it| it.error.message)
                .unwrap_or_else(|| format!("payment processor responded with {}", status));

            return Err(ProcessorError::Rejected(message));
        }

        let intent: StripeIntent = response.json().await?;
        tracing::debug!("created payment intent {}", intent.id);

        Ok(PaymentIntent {
            id: intent.id,
            client_secret: intent.client_secret,
        })
    }
}
