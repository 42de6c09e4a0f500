use async_trait::async_trait;
use axum::{
    extract::{Query, State},
    http::StatusCode,
};
use bson::{oid::ObjectId, Document};
use mongodb::options::FindOptions;
use serde::{Deserialize, Serialize};
use tap::TapFallible;

use crate::{
    error::Error,
    mongo_ext::Collection,
    store::{
        AssignedFilter, DeleteSummary, InsertSummary, ParcelFilter, ParcelStore, Parcels,
        RiderStore, Riders, UpdateSummary,
    },
    util::{
        current_timestamp, iso_timestamp, lenient_text, parse_object_id, DocumentJson, Json,
        PathObjectId,
    },
};

use super::{
    auth::VerifiedIdentity,
    dashboard::{StatusCount, StatusEarnings},
    rider::work_status,
};

pub mod delivery_status {
    pub const PENDING: &str = "pending";
    pub const RIDER_ASSIGNED: &str = "rider_assigned";
    pub const IN_TRANSIT: &str = "in_transit";
    pub const DELIVERED: &str = "delivered";
    pub const SERVICE_CENTER_DELIVERED: &str = "service_center_delivered";

    pub const IN_FLIGHT: &[&str] = &[RIDER_ASSIGNED, IN_TRANSIT];
    pub const COMPLETED: &[&str] = &[DELIVERED, SERVICE_CENTER_DELIVERED];
}

pub mod payment_status {
    pub const PAID: &str = "paid";
}

pub const CASHED_OUT: &str = "cashed_out";

#[derive(Clone)]
pub struct ParcelCollection(pub Collection<Document>);

impl std::ops::Deref for ParcelCollection {
    type Target = Collection<Document>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[async_trait]
impl ParcelStore for ParcelCollection {
    async fn insert(&self, mut parcel: Document) -> Result<ObjectId, Error> {
        let id = ObjectId::new();
        parcel.insert("_id", id);
        self.insert_one(parcel, None).await?;
        Ok(id)
    }

    async fn find(&self, filter: ParcelFilter) -> Result<Vec<Document>, Error> {
        self.find_all(
            filter.to_document(),
            FindOptions::builder()
                .sort(bson::doc! { "createdAt": -1 })
                .build(),
        )
        .await
    }

    async fn find_assigned(&self, filter: AssignedFilter) -> Result<Vec<Document>, Error> {
        self.find_all(
            filter.to_document(),
            FindOptions::builder()
                .sort(bson::doc! { "creation_date": -1 })
                .build(),
        )
        .await
    }

    async fn find_by_id(&self, id: ObjectId) -> Result<Option<Document>, Error> {
        self.find_one_by_id(id).await
    }

    async fn find_by_tracking_code(&self, code: &str) -> Result<Option<Document>, Error> {
        self.find_one(bson::doc! { "trackingCode": code }, None)
            .await
            .map_err(Into::into)
    }

    async fn set_fields(&self, id: ObjectId, fields: Document) -> Result<UpdateSummary, Error> {
        self.set_one_by_id(id, fields).await.map(Into::into)
    }

    async fn delete(&self, id: ObjectId) -> Result<DeleteSummary, Error> {
        self.delete_one_by_id(id).await.map(Into::into)
    }

    async fn count_by_delivery_status(&self) -> Result<Vec<StatusCount>, Error> {
        self.aggregate_into(vec![
            bson::doc! {
                "$group": {
                    "_id": "$delivery_status",
                    "count": { "$sum": 1 },
                }
            },
            bson::doc! {
                "$project": {
                    "status": "$_id",
                    "count": 1,
                    "_id": 0,
                }
            },
        ])
        .await
    }

    async fn earnings_by_status(&self, rider_id: &str) -> Result<Vec<StatusEarnings>, Error> {
        self.aggregate_into(vec![
            bson::doc! { "$match": { "rider_id": rider_id } },
            bson::doc! {
                "$group": {
                    "_id": "$delivery_status",
                    "count": { "$sum": 1 },
                    "totalEarnings": { "$sum": "$delivery_fee" },
                }
            },
            bson::doc! {
                "$project": {
                    "status": "$_id",
                    "count": 1,
                    "totalEarnings": 1,
                    "_id": 0,
                }
            },
        ])
        .await
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct MessageResponse {
    pub message: &'static str,
}

#[tracing::instrument(skip_all)]
pub async fn create(
    State(parcels): State<Parcels>,
    Json(mut parcel): Json<Document>,
) -> Result<(StatusCode, Json<InsertSummary>), Error> {
    parcel.remove("_id");

    let id = parcels.insert(parcel).await?;
    tracing::debug!("created parcel {}", id);

    Ok((StatusCode::CREATED, Json(id.into())))
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ParcelQuery {
    pub email: Option<String>,
    pub payment_status: Option<String>,
    pub delivery_status: Option<String>,
}

pub async fn index(
    State(parcels): State<Parcels>,
    _identity: VerifiedIdentity,
    Query(query): Query<ParcelQuery>,
) -> Result<Json<Vec<DocumentJson>>, Error> {
    let filter = ParcelFilter {
        created_by: query.email.filter(|it| !it.is_empty()),
        payment_status: query.payment_status.filter(|it| !it.is_empty()),
        delivery_status: query.delivery_status.filter(|it| !it.is_empty()),
    };
    tracing::debug!("parcel query {:?}", filter);

    let found = parcels.find(filter).await?;

    Ok(Json(found.into_iter().map(Into::into).collect()))
}

pub async fn show(
    State(parcels): State<Parcels>,
    PathObjectId(id): PathObjectId,
) -> Result<Json<DocumentJson>, Error> {
    let parcel = parcels
        .find_by_id(id)
        .await?
        .ok_or(Error::NotFound("Parcel not found"))?;

    Ok(Json(parcel.into()))
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct RiderParcelsQuery {
    pub email: Option<String>,
}

impl RiderParcelsQuery {
    fn into_filter(self, statuses: &'static [&'static str]) -> Result<AssignedFilter, Error> {
        let rider_email = self
            .email
            .filter(|it| !it.is_empty())
            .ok_or(Error::BadRequest("Rider email is required"))?;

        Ok(AssignedFilter {
            rider_email,
            statuses,
        })
    }
}

pub async fn rider_parcels(
    State(parcels): State<Parcels>,
    _identity: VerifiedIdentity,
    Query(query): Query<RiderParcelsQuery>,
) -> Result<Json<Vec<DocumentJson>>, Error> {
    let filter = query.into_filter(delivery_status::IN_FLIGHT)?;
    let found = parcels.find_assigned(filter).await?;

    Ok(Json(found.into_iter().map(Into::into).collect()))
}

pub async fn completed_parcels(
    State(parcels): State<Parcels>,
    Query(query): Query<RiderParcelsQuery>,
) -> Result<Json<Vec<DocumentJson>>, Error> {
    let filter = query.into_filter(delivery_status::COMPLETED)?;
    let found = parcels.find_assigned(filter).await?;

    Ok(Json(found.into_iter().map(Into::into).collect()))
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct UpdateStatusRequest {
    pub status: Option<String>,
}

#[tracing::instrument(skip_all, fields(id = %id))]
pub async fn update_status(
    State(parcels): State<Parcels>,
    PathObjectId(id): PathObjectId,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<Json<UpdateSummary>, Error> {
    let status = request
        .status
        .filter(|it| !it.is_empty())
        .ok_or(Error::BadRequest("Status is required"))?;

    let mut fields = bson::doc! { "delivery_status": status.as_str() };
    match status.as_str() {
        delivery_status::IN_TRANSIT => {
            fields.insert("picked_at", iso_timestamp(current_timestamp()));
        }
        delivery_status::DELIVERED => {
            fields.insert("delivered_at", iso_timestamp(current_timestamp()));
        }
        _ => {}
    }

    let result = parcels.set_fields(id, fields).await?;
    tracing::debug!("parcel moved to {}", status);

    Ok(Json(result))
}

#[tracing::instrument(skip_all, fields(id = %id))]
pub async fn cashout(
    State(parcels): State<Parcels>,
    PathObjectId(id): PathObjectId,
) -> Result<Json<UpdateSummary>, Error> {
    let result = parcels
        .set_fields(
            id,
            bson::doc! {
                "cashout_status": CASHED_OUT,
                "cashed_out_at": bson::DateTime::from(current_timestamp()),
            },
        )
        .await?;

    Ok(Json(result))
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct AssignRequest {
    pub rider_id: Option<String>,
    pub rider_name: Option<String>,
    pub rider_email: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub rider_contact: Option<String>,
}

/// Hands a parcel to a rider. The parcel and rider writes are independent;
/// a failure between them leaves the parcel assigned to a rider still
/// marked available.
#[tracing::instrument(skip_all, fields(id = %id))]
pub async fn assign(
    State(parcels): State<Parcels>,
    State(riders): State<Riders>,
    PathObjectId(id): PathObjectId,
    Json(request): Json<AssignRequest>,
) -> Result<Json<MessageResponse>, Error> {
    let rider_id = request
        .rider_id
        .as_deref()
        .ok_or(Error::BadRequest("Invalid ID format"))
        .and_then(parse_object_id)?;

    parcels
        .set_fields(
            id,
            bson::doc! {
                "delivery_status": delivery_status::RIDER_ASSIGNED,
                "assigned_rider_id": request.rider_id.as_deref(),
                "assigned_rider_name": request.rider_name.as_deref(),
                "assigned_rider_email": request.rider_email.as_deref(),
                "assigned_rider_contact": request.rider_contact.as_deref(),
            },
        )
        .await
        .tap_err(|err| tracing::error!("failed to assign parcel: {}", err))?;

    riders
        .set_fields(
            rider_id,
            bson::doc! { "work_status": work_status::IN_DELIVERY },
        )
        .await
        .tap_err(|err| tracing::error!("parcel assigned but rider {} not updated: {}", rider_id, err))?;

    Ok(Json(MessageResponse {
        message: "Rider assigned",
    }))
}

#[tracing::instrument(skip_all, fields(id = %id))]
pub async fn delete(
    State(parcels): State<Parcels>,
    PathObjectId(id): PathObjectId,
) -> Result<Json<MessageResponse>, Error> {
    let result = parcels.delete(id).await?;

    if result.deleted_count == 0 {
        return Err(Error::NotFound("Parcel not found"));
    }

    Ok(Json(MessageResponse {
        message: "Parcel deleted successfully",
    }))
}
