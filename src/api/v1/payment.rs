use async_trait::async_trait;
use axum::{
    extract::{Query, State},
    http::StatusCode,
};
use bson::oid::ObjectId;
use mongodb::options::FindOptions;
use serde::{Deserialize, Serialize};
use tap::TapFallible;

use crate::{
    error::Error,
    mongo_ext::Collection,
    payment_gateway::SharedPaymentProcessor,
    store::{ParcelStore, Parcels, PaymentStore, Payments},
    util::{
        current_timestamp, iso_timestamp, lenient_f64, lenient_text, parse_object_id,
        FormattedDateTime, Json, ObjectIdString,
    },
};

use super::{auth::VerifiedIdentity, parcel::payment_status};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PaymentModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    #[serde(rename = "parcelId")]
    pub parcel_id: String,
    pub email: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub amount: Option<f64>,
    #[serde(rename = "paymentMethod")]
    pub payment_method: Option<String>,
    #[serde(rename = "transactionId")]
    pub transaction_id: Option<String>,
    pub paid_at_string: String,
    pub paid_at: bson::DateTime,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct PaymentJson {
    #[serde(rename = "_id")]
    pub id: ObjectIdString,
    #[serde(rename = "parcelId")]
    pub parcel_id: String,
    pub email: Option<String>,
    pub amount: Option<f64>,
    #[serde(rename = "paymentMethod")]
    pub payment_method: Option<String>,
    #[serde(rename = "transactionId")]
    pub transaction_id: Option<String>,
    pub paid_at_string: String,
    pub paid_at: FormattedDateTime,
}

impl From<PaymentModel> for PaymentJson {
    fn from(value: PaymentModel) -> Self {
        Self {
            id: value.id.into(),
            parcel_id: value.parcel_id,
            email: value.email,
            amount: value.amount,
            payment_method: value.payment_method,
            transaction_id: value.transaction_id,
            paid_at_string: value.paid_at_string,
            paid_at: value.paid_at.into(),
        }
    }
}

#[derive(Clone)]
pub struct PaymentCollection(pub Collection<PaymentModel>);

impl std::ops::Deref for PaymentCollection {
    type Target = Collection<PaymentModel>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[async_trait]
impl PaymentStore for PaymentCollection {
    async fn insert(&self, payment: PaymentModel) -> Result<ObjectId, Error> {
        self.insert_one(&payment, None).await?;
        Ok(payment.id)
    }

    async fn find(&self, email: Option<String>) -> Result<Vec<PaymentModel>, Error> {
        let filter = match email {
            Some(email) => bson::doc! { "email": email },
            None => bson::doc! {},
        };

        self.find_all(
            filter,
            FindOptions::builder()
                .sort(bson::doc! { "paid_at": -1 })
                .build(),
        )
        .await
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreateIntentRequest {
    pub amount_in_cents: Option<i64>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateIntentResponse {
    pub client_secret: String,
}

#[tracing::instrument(skip_all)]
pub async fn create_intent(
    State(processor): State<SharedPaymentProcessor>,
    Json(request): Json<CreateIntentRequest>,
) -> Result<Json<CreateIntentResponse>, Error> {
    let amount = request
        .amount_in_cents
        .ok_or(Error::BadRequest("amountInCents is required"))?;

    let intent = processor
        .create_payment_intent(amount)
        .await
        .tap_err(|err| tracing::warn!("payment intent for {} refused: {}", amount, err))?;

    Ok(Json(CreateIntentResponse {
        client_secret: intent.client_secret,
    }))
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct RecordPaymentRequest {
    pub parcel_id: Option<String>,
    pub email: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub amount: Option<f64>,
    pub payment_method: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub transaction_id: Option<String>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct RecordPaymentResponse {
    pub message: &'static str,
    #[serde(rename = "insertedId")]
    pub inserted_id: ObjectIdString,
}

/// Marks the parcel paid, then records the payment. The parcel update
/// doubles as the duplicate guard: a parcel already paid is not modified
/// and no second payment is written.
#[tracing::instrument(skip_all)]
pub async fn record(
    State(parcels): State<Parcels>,
    State(payments): State<Payments>,
    Json(request): Json<RecordPaymentRequest>,
) -> Result<(StatusCode, Json<RecordPaymentResponse>), Error> {
    let parcel_id = request
        .parcel_id
        .ok_or(Error::BadRequest("Invalid ID format"))?;
    let id = parse_object_id(&parcel_id)?;

    let marked = parcels
        .set_fields(id, bson::doc! { "payment_status": payment_status::PAID })
        .await?;

    if marked.modified_count == 0 {
        return Err(Error::NotFound("Parcel not found or already paid"))
            .tap_err(|_| tracing::debug!("parcel {} not payable", parcel_id));
    }

    let now = current_timestamp();
    let payment = PaymentModel {
        id: ObjectId::new(),
        parcel_id,
        email: request.email,
        amount: request.amount,
        payment_method: request.payment_method,
        transaction_id: request.transaction_id,
        paid_at_string: iso_timestamp(now),
        paid_at: now.into(),
    };

    // the parcel stays paid even when this insert fails
    let inserted = payments
        .insert(payment)
        .await
        .tap_err(|err| tracing::error!("parcel {} marked paid without a payment: {}", id, err))?;

    Ok((
        StatusCode::CREATED,
        Json(RecordPaymentResponse {
            message: "Payment recorded and parcel marked as paid",
            inserted_id: inserted.into(),
        }),
    ))
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct PaymentQuery {
    pub email: Option<String>,
}

pub async fn index(
    State(payments): State<Payments>,
    _identity: VerifiedIdentity,
    Query(query): Query<PaymentQuery>,
) -> Result<Json<Vec<PaymentJson>>, Error> {
    let found = payments
        .find(query.email.filter(|it| !it.is_empty()))
        .await?;

    Ok(Json(found.into_iter().map(Into::into).collect()))
}
