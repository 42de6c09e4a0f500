use async_trait::async_trait;
use axum::{
    extract::{Path, State},
    http::StatusCode,
};
use bson::{oid::ObjectId, Bson, Document};
use mongodb::options::FindOptions;
use serde::Serialize;
use serde_json::Value;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::{
    error::Error,
    mongo_ext::Collection,
    store::{InsertSummary, ParcelStore, Parcels, TrackingStore, Trackings},
    util::{bson_to_json, current_timestamp, display_timestamp, DocumentJson, Json},
};

use super::auth::VerifiedIdentity;

#[derive(Clone)]
pub struct TrackingCollection(pub Collection<Document>);

impl std::ops::Deref for TrackingCollection {
    type Target = Collection<Document>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TrackingCollection {
    async fn find_in_order(&self, filter: Document) -> Result<Vec<Document>, Error> {
        self.find_all(
            filter,
            FindOptions::builder()
                .sort(bson::doc! { "timestamp": 1 })
                .build(),
        )
        .await
    }
}

#[async_trait]
impl TrackingStore for TrackingCollection {
    async fn insert(&self, mut event: Document) -> Result<ObjectId, Error> {
        let id = ObjectId::new();
        event.insert("_id", id);
        self.insert_one(event, None).await?;
        Ok(id)
    }

    async fn find_by_tracking_id(&self, tracking_id: &str) -> Result<Vec<Document>, Error> {
        self.find_in_order(bson::doc! { "tracking_id": tracking_id })
            .await
    }

    async fn find_by_tracking_code(&self, code: &str) -> Result<Vec<Document>, Error> {
        self.find_in_order(bson::doc! { "trackingCode": code })
            .await
    }
}

/// Loose truthiness of stored values: absent, null, false, zero and empty
/// strings all count as missing.
fn is_truthy(value: &Bson) -> bool {
    match value {
        Bson::Null | Bson::Undefined => false,
        Bson::Boolean(value) => *value,
        Bson::String(value) => !value.is_empty(),
        Bson::Int32(value) => *value != 0,
        Bson::Int64(value) => *value != 0,
        Bson::Double(value) => *value != 0.0 && !value.is_nan(),
        _ => true,
    }
}

fn truthy_field<'a>(doc: &'a Document, key: &str) -> Option<&'a Bson> {
    doc.get(key).filter(|it| is_truthy(it))
}

fn field_or(doc: &Document, key: &str, default: impl Into<Bson>) -> Value {
    bson_to_json(truthy_field(doc, key).cloned().unwrap_or_else(|| default.into()))
}

#[tracing::instrument(skip_all)]
pub async fn create(
    State(trackings): State<Trackings>,
    Json(mut event): Json<Document>,
) -> Result<(StatusCode, Json<InsertSummary>), Error> {
    if truthy_field(&event, "tracking_id").is_none() || truthy_field(&event, "status").is_none() {
        return Err(Error::BadRequest("tracking_id and status are required."));
    }

    event.remove("_id");
    event.insert("timestamp", bson::DateTime::from(current_timestamp()));

    let id = trackings.insert(event).await?;

    Ok((StatusCode::CREATED, Json(id.into())))
}

pub async fn index(
    State(trackings): State<Trackings>,
    Path(code): Path<String>,
) -> Result<Json<Vec<DocumentJson>>, Error> {
    let events = trackings.find_by_tracking_id(&code).await?;

    Ok(Json(events.into_iter().map(Into::into).collect()))
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProductDetails {
    pub date: Value,
    pub id: Value,
    pub invoice: Value,
    pub tracking_code: Value,
    pub name: Value,
    pub address: Value,
    pub phone: Value,
    pub approved: Value,
    pub weight: Value,
    pub cod: Value,
    pub status: Value,
}

impl ProductDetails {
    fn from_parcel(parcel: &Document) -> Self {
        Self {
            date: field_or(parcel, "date", "N/A"),
            id: parcel
                .get("_id")
                .cloned()
                .map(bson_to_json)
                .unwrap_or(Value::Null),
            invoice: field_or(parcel, "invoice", "N/A"),
            tracking_code: parcel
                .get("trackingCode")
                .cloned()
                .map(bson_to_json)
                .unwrap_or(Value::Null),
            name: field_or(parcel, "customerName", "N/A"),
            address: field_or(parcel, "customerAddress", "N/A"),
            phone: field_or(parcel, "customerPhone", "N/A"),
            approved: field_or(parcel, "approved", "Pending"),
            weight: field_or(parcel, "weight", "N/A"),
            cod: field_or(parcel, "cod", 0),
            status: field_or(parcel, "status", "Unknown"),
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct TrackingUpdate {
    pub date: String,
    pub status: Value,
}

impl From<&Document> for TrackingUpdate {
    fn from(event: &Document) -> Self {
        let at = match truthy_field(event, "timestamp") {
            Some(Bson::DateTime(at)) => Some(OffsetDateTime::from(*at)),
            Some(Bson::String(at)) => OffsetDateTime::parse(at, &Rfc3339).ok(),
            _ => None,
        };

        Self {
            date: at
                .map(display_timestamp)
                .unwrap_or_else(|| "N/A".to_string()),
            status: field_or(event, "status", "Update info not available"),
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrackingDetails {
    pub product_details: ProductDetails,
    pub tracking_updates: Vec<TrackingUpdate>,
}

pub async fn details(
    State(parcels): State<Parcels>,
    State(trackings): State<Trackings>,
    _identity: VerifiedIdentity,
    Path(code): Path<String>,
) -> Result<Json<TrackingDetails>, Error> {
    if code.is_empty() {
        return Err(Error::BadRequest("Tracking code is required"));
    }

    let parcel = parcels
        .find_by_tracking_code(&code)
        .await?
        .ok_or(Error::NotFound("Consignment not found"))?;

    let events = trackings.find_by_tracking_code(&code).await?;

    Ok(Json(TrackingDetails {
        product_details: ProductDetails::from_parcel(&parcel),
        tracking_updates: events.iter().map(Into::into).collect(),
    }))
}
