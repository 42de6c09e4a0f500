use async_trait::async_trait;
use axum::{
    extract::{Query, State},
    http::StatusCode,
};
use bson::{oid::ObjectId, Document};
use serde::{Deserialize, Serialize};
use tap::TapFallible;
use validator::Validate;

use crate::{
    error::Error,
    mongo_ext::Collection,
    store::{DeleteSummary, RiderFilter, RiderStore, Riders, UpdateSummary, Users},
    util::{
        current_timestamp, lenient_text, lenient_u32, DocumentJson, Json, ObjectIdString,
        PathObjectId,
    },
};

use super::{
    auth::{AdminIdentity, VerifiedIdentity},
    user::Role,
};

pub mod status {
    pub const PENDING: &str = "Pending";
    pub const ACTIVE: &str = "active";
}

pub mod work_status {
    pub const IN_DELIVERY: &str = "in_delivery";
}

#[derive(Clone)]
pub struct RiderCollection(pub Collection<Document>);

impl std::ops::Deref for RiderCollection {
    type Target = Collection<Document>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[async_trait]
impl RiderStore for RiderCollection {
    async fn insert(&self, mut rider: Document) -> Result<ObjectId, Error> {
        let id = ObjectId::new();
        rider.insert("_id", id);
        self.insert_one(rider, None).await?;
        Ok(id)
    }

    async fn find(&self, filter: RiderFilter) -> Result<Vec<Document>, Error> {
        self.find_all(filter.to_document(), None).await
    }

    async fn set_fields(&self, id: ObjectId, fields: Document) -> Result<UpdateSummary, Error> {
        self.set_one_by_id(id, fields).await.map(Into::into)
    }

    async fn delete(&self, id: ObjectId) -> Result<DeleteSummary, Error> {
        self.delete_one_by_id(id).await.map(Into::into)
    }
}

/// Fields a rider application must carry. The rest of the submitted
/// document is stored as sent.
#[derive(Deserialize, Validate, Debug, Clone, Default)]
pub struct RiderApplication {
    #[validate(required, length(min = 1))]
    #[serde(default, deserialize_with = "lenient_text")]
    pub name: Option<String>,

    #[validate(required, range(min = 1))]
    #[serde(default, deserialize_with = "lenient_u32")]
    pub age: Option<u32>,

    #[validate(required, length(min = 1))]
    #[serde(default, deserialize_with = "lenient_text")]
    pub email: Option<String>,

    #[validate(required, length(min = 1))]
    #[serde(default, deserialize_with = "lenient_text")]
    pub nid: Option<String>,

    #[validate(required, length(min = 1))]
    #[serde(default, deserialize_with = "lenient_text")]
    pub contact: Option<String>,

    #[validate(required, length(min = 1))]
    #[serde(default, deserialize_with = "lenient_text")]
    pub district: Option<String>,

    #[validate(required, length(min = 1))]
    #[serde(default, deserialize_with = "lenient_text")]
    pub region: Option<String>,

    #[validate(required, length(min = 1))]
    #[serde(default, deserialize_with = "lenient_text")]
    pub warehouse: Option<String>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct CreateRiderResponse {
    pub message: &'static str,
    #[serde(rename = "insertedId")]
    pub inserted_id: ObjectIdString,
}

#[tracing::instrument(skip_all)]
pub async fn create(
    State(riders): State<Riders>,
    Json(mut rider): Json<Document>,
) -> Result<(StatusCode, Json<CreateRiderResponse>), Error> {
    let application: RiderApplication = bson::from_document(rider.clone())
        .map_err(|_| Error::BadRequest("Malformed rider application"))
        .tap_err(|_| tracing::debug!("rider application failed to parse"))?;

    application
        .validate()
        .tap_err(|err| tracing::debug!("rider application rejected: {}", err))?;

    rider.remove("_id");
    rider.insert("status", status::PENDING);
    rider.insert("createdAt", bson::DateTime::from(current_timestamp()));

    let id = riders.insert(rider).await?;
    tracing::debug!("rider application {} received", id);

    Ok((
        StatusCode::CREATED,
        Json(CreateRiderResponse {
            message: "Rider added successfully",
            inserted_id: id.into(),
        }),
    ))
}

pub async fn index(
    State(riders): State<Riders>,
    _identity: VerifiedIdentity,
) -> Result<Json<Vec<DocumentJson>>, Error> {
    let found = riders.find(RiderFilter::default()).await?;

    Ok(Json(found.into_iter().map(Into::into).collect()))
}

pub async fn active(
    State(riders): State<Riders>,
    _admin: AdminIdentity,
) -> Result<Json<Vec<DocumentJson>>, Error> {
    let found = riders
        .find(RiderFilter {
            status: Some(status::ACTIVE.to_string()),
            district: None,
        })
        .await?;

    Ok(Json(found.into_iter().map(Into::into).collect()))
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct AvailableQuery {
    pub district: Option<String>,
}

pub async fn available(
    State(riders): State<Riders>,
    _identity: VerifiedIdentity,
    Query(query): Query<AvailableQuery>,
) -> Result<Json<Vec<DocumentJson>>, Error> {
    let district = query
        .district
        .filter(|it| !it.is_empty())
        .ok_or(Error::BadRequest("District is required"))?;

    let found = riders
        .find(RiderFilter {
            status: None,
            district: Some(district),
        })
        .await?;

    Ok(Json(found.into_iter().map(Into::into).collect()))
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct UpdateStatusRequest {
    pub status: Option<String>,
    pub email: Option<String>,
}

#[tracing::instrument(skip_all, fields(id = %id))]
pub async fn update_status(
    State(riders): State<Riders>,
    State(users): State<Users>,
    PathObjectId(id): PathObjectId,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<Json<UpdateSummary>, Error> {
    let new_status = request
        .status
        .filter(|it| !it.is_empty())
        .ok_or(Error::BadRequest("Status is required"))?;

    let result = riders
        .set_fields(id, bson::doc! { "status": new_status.as_str() })
        .await?;

    if new_status == status::ACTIVE {
        if let Some(email) = request.email.filter(|it| !it.is_empty()) {
            // promotion is best effort; the rider update already happened
            match users.set_role_by_email(&email, Role::Rider).await {
                Ok(promoted) => tracing::info!(
                    "promoted {} to rider, {} record(s) modified",
                    email,
                    promoted.modified_count
                ),
                Err(err) => tracing::warn!("failed to promote {} to rider: {}", email, err),
            }
        }
    }

    Ok(Json(result))
}

#[tracing::instrument(skip_all, fields(id = %id))]
pub async fn delete(
    State(riders): State<Riders>,
    PathObjectId(id): PathObjectId,
) -> Result<Json<DeleteSummary>, Error> {
    let result = riders.delete(id).await?;
    tracing::debug!("deleted {} rider(s)", result.deleted_count);

    Ok(Json(result))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use axum::{
        extract::{Path, Query},
        http::StatusCode,
    };
    use bson::{doc, Document};

    use crate::{
        api::v1::{auth::AdminIdentity, tests::bootstrap},
        error::Error,
        store::RiderFilter,
        util::{Json, PathObjectId},
    };

    use super::{AvailableQuery, UpdateStatusRequest};

    fn application() -> Document {
        doc! {
            "name": "Rahim",
            "age": 27,
            "email": "rahim@example.com",
            "nid": 1990123456_i64,
            "contact": "01700000000",
            "district": "Dhaka",
            "region": "Dhaka",
            "warehouse": "Mirpur",
            "bike": "Honda CD80",
        }
    }

    #[tokio::test]
    async fn test_create_sets_pending() {
        let bootstrap = bootstrap().await;

        let mut rider = application();
        rider.insert("status", "active");
        rider.insert("createdAt", "1999-01-01");

        let (status, Json(response)) = super::create(bootstrap.riders(), Json(rider))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(response.message, "Rider added successfully");

        let stored = bootstrap
            .app_state
            .riders
            .find(RiderFilter::default())
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].get_object_id("_id").unwrap(), *response.inserted_id);
        assert_eq!(stored[0].get_str("status").unwrap(), "Pending");
        assert!(stored[0].get_datetime("createdAt").is_ok());
        assert_eq!(stored[0].get_str("bike").unwrap(), "Honda CD80");
    }

    #[tokio::test]
    async fn test_create_rejects_missing_fields() {
        let bootstrap = bootstrap().await;

        let mut rider = application();
        rider.remove("district");
        let err = super::create(bootstrap.riders(), Json(rider))
            .await
            .unwrap_err();
        assert_matches!(&err, Error::ValidationError(errors) if errors.field_errors().contains_key("district"));

        let mut rider = application();
        rider.insert("age", "");
        rider.insert("name", "");
        let err = super::create(bootstrap.riders(), Json(rider))
            .await
            .unwrap_err();
        assert_matches!(&err, Error::ValidationError(errors) if {
            let fields = errors.field_errors();
            fields.contains_key("age") && fields.contains_key("name")
        });

        let stored = bootstrap
            .app_state
            .riders
            .find(RiderFilter::default())
            .await
            .unwrap();
        assert!(stored.is_empty());
    }

    #[tokio::test]
    async fn test_activation_promotes_user() {
        let bootstrap = bootstrap().await;
        bootstrap.register("rahim@example.com", None).await;
        let id = bootstrap.insert_rider(application()).await;

        super::update_status(
            bootstrap.riders(),
            bootstrap.users(),
            PathObjectId(id),
            Json(UpdateStatusRequest {
                status: Some("active".to_string()),
                email: Some("rahim@example.com".to_string()),
            }),
        )
        .await
        .unwrap();

        let Json(role) = crate::api::v1::user::role(
            bootstrap.users(),
            Path("rahim@example.com".to_string()),
        )
        .await
        .unwrap();
        assert_eq!(role.role, "rider");
    }

    #[tokio::test]
    async fn test_other_status_leaves_role() {
        let bootstrap = bootstrap().await;
        bootstrap.register("rahim@example.com", None).await;
        let id = bootstrap.insert_rider(application()).await;

        let Json(result) = super::update_status(
            bootstrap.riders(),
            bootstrap.users(),
            PathObjectId(id),
            Json(UpdateStatusRequest {
                status: Some("rejected".to_string()),
                email: Some("rahim@example.com".to_string()),
            }),
        )
        .await
        .unwrap();
        assert_eq!(result.modified_count, 1);

        let Json(role) = crate::api::v1::user::role(
            bootstrap.users(),
            Path("rahim@example.com".to_string()),
        )
        .await
        .unwrap();
        assert_eq!(role.role, "user");
    }

    #[tokio::test]
    async fn test_activation_without_email_still_updates_rider() {
        let bootstrap = bootstrap().await;
        let id = bootstrap.insert_rider(application()).await;

        let Json(result) = super::update_status(
            bootstrap.riders(),
            bootstrap.users(),
            PathObjectId(id),
            Json(UpdateStatusRequest {
                status: Some("active".to_string()),
                email: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(result.matched_count, 1);

        let admin = AdminIdentity(bootstrap.identity("admin@example.com"));
        let Json(active) = super::active(bootstrap.riders(), admin).await.unwrap();
        assert_eq!(active.len(), 1);
    }

    #[tokio::test]
    async fn test_available_by_district() {
        let bootstrap = bootstrap().await;
        bootstrap.insert_rider(application()).await;
        let mut elsewhere = application();
        elsewhere.insert("district", "Khulna");
        bootstrap.insert_rider(elsewhere).await;

        let Json(found) = super::available(
            bootstrap.riders(),
            bootstrap.identity("user@example.com"),
            Query(AvailableQuery {
                district: Some("Khulna".to_string()),
            }),
        )
        .await
        .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0.get_str("district").unwrap(), "Khulna");

        let err = super::available(
            bootstrap.riders(),
            bootstrap.identity("user@example.com"),
            Query(AvailableQuery::default()),
        )
        .await
        .unwrap_err();
        assert_matches!(err, Error::BadRequest(_));

        let Json(all) = super::index(bootstrap.riders(), bootstrap.identity("user@example.com"))
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_delete() {
        let bootstrap = bootstrap().await;
        let id = bootstrap.insert_rider(application()).await;

        let Json(result) = super::delete(bootstrap.riders(), PathObjectId(id))
            .await
            .unwrap();
        assert_eq!(result.deleted_count, 1);

        let Json(result) = super::delete(bootstrap.riders(), PathObjectId(id))
            .await
            .unwrap();
        assert_eq!(result.deleted_count, 0);
    }
}
