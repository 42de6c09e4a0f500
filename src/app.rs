use std::sync::Arc;

use axum::{
    extract::FromRef,
    http::HeaderValue,
    routing::{get, patch, post},
    Router,
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::{
    api::v1::{
        dashboard, parcel::{self, ParcelCollection},
        payment::{self, PaymentCollection},
        rider::{self, RiderCollection},
        token::{FirebaseVerifier, SecretVerifier, SharedIdentityProvider},
        tracking::{self, TrackingCollection},
        user::{self, UserCollection},
    },
    config::{Config, IdentityConfig},
    error::Error,
    migrate,
    payment_gateway::{SharedPaymentProcessor, StripeClient},
    store::{Parcels, Payments, Riders, Trackings, Users},
};

#[derive(FromRef, Clone)]
pub struct AppState {
    pub identity: SharedIdentityProvider,
    pub processor: SharedPaymentProcessor,

    pub users: Users,
    pub riders: Riders,
    pub parcels: Parcels,
    pub payments: Payments,
    pub trackings: Trackings,
}

impl AppState {
    pub async fn connect(config: &Config) -> Result<Self, Error> {
        let mongo_client_opt = mongodb::options::ClientOptions::parse(&config.mongodb_uri).await?;
        let mongo_client = mongodb::Client::with_options(mongo_client_opt)?;

        let db = mongo_client.database(&config.database_name);
        migrate::run_migration(&db).await?;

        let identity = match &config.identity {
            IdentityConfig::Firebase { project_id } => {
                tracing::info!("verifying identity tokens for project {}", project_id);
                SharedIdentityProvider(Arc::new(FirebaseVerifier::new(project_id)))
            }
            IdentityConfig::SharedSecret(secret) => {
                tracing::warn!("verifying identity tokens with a shared secret");
                SharedIdentityProvider(Arc::new(SecretVerifier::new(secret.as_bytes())))
            }
        };

        Ok(Self {
            identity,
            processor: SharedPaymentProcessor(Arc::new(StripeClient::new(
                &config.stripe_secret_key,
                &config.payment_currency,
            ))),

            users: Users(Arc::new(UserCollection(db.collection("users").into()))),
            riders: Riders(Arc::new(RiderCollection(db.collection("riders").into()))),
            parcels: Parcels(Arc::new(ParcelCollection(db.collection("parcels").into()))),
            payments: Payments(Arc::new(PaymentCollection(db.collection("payments").into()))),
            trackings: Trackings(Arc::new(TrackingCollection(
                db.collection("trackings").into(),
            ))),
        })
    }
}

async fn liveness() -> &'static str {
    "Courier server is running"
}

pub fn router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(liveness))
        .route("/users", post(user::create))
        .route("/users/search", get(user::search))
        .route("/users/:id/role", get(user::role).patch(user::update_role))
        .route("/riders", get(rider::index).post(rider::create))
        .route("/riders/active", get(rider::active))
        .route("/riders/available", get(rider::available))
        .route("/riders/:id", axum::routing::delete(rider::delete))
        .route("/riders/:id/status", patch(rider::update_status))
        .route("/parcels", get(parcel::index).post(parcel::create))
        .route(
            "/parcels/delivery/status-count",
            get(dashboard::status_count),
        )
        .route("/parcels/:id", get(parcel::show).delete(parcel::delete))
        .route("/parcels/:id/status", patch(parcel::update_status))
        .route("/parcels/:id/cashout", patch(parcel::cashout))
        .route("/parcels/:id/assign", patch(parcel::assign))
        .route("/rider/parcels", get(parcel::rider_parcels))
        .route("/rider/completed-parcels", get(parcel::completed_parcels))
        .route("/rider/dashboard", get(dashboard::rider_dashboard))
        .route("/payments", get(payment::index).post(payment::record))
        .route("/create-payment-intent", post(payment::create_intent))
        .route("/trackings", post(tracking::create))
        .route("/trackings/:code", get(tracking::index))
        .route("/trackings/:code/details", get(tracking::details))
        .with_state(app_state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Any origin when `origins` is empty.
pub fn cors_layer(origins: &[String]) -> Result<CorsLayer, axum::http::header::InvalidHeaderValue> {
    let allow_origin = if origins.is_empty() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            origins
                .iter()
                .map(|it| HeaderValue::from_str(it))
                .collect::<Result<Vec<_>, _>>()?,
        )
    };

    Ok(CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any))
}
