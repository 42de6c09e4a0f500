//! Store seams between the handlers and the document database.
//!
//! Each collection is reached through a trait object so handlers can run
//! against MongoDB in production and against in-memory fakes in tests.
//! Documents stay schemaless (`bson::Document`) wherever the client
//! supplies the record verbatim.

use std::sync::Arc;

use async_trait::async_trait;
use bson::{oid::ObjectId, Bson, Document};
use serde::Serialize;

use crate::{
    api::v1::{
        dashboard::{StatusCount, StatusEarnings},
        payment::PaymentModel,
        user::Role,
    },
    error::Error,
    util::ObjectIdString,
};

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InsertSummary {
    pub acknowledged: bool,
    pub inserted_id: ObjectIdString,
}

impl From<ObjectId> for InsertSummary {
    fn from(value: ObjectId) -> Self {
        Self {
            acknowledged: true,
            inserted_id: value.into(),
        }
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSummary {
    pub acknowledged: bool,
    pub matched_count: u64,
    pub modified_count: u64,
}

impl From<mongodb::results::UpdateResult> for UpdateSummary {
    fn from(value: mongodb::results::UpdateResult) -> Self {
        Self {
            acknowledged: true,
            matched_count: value.matched_count,
            modified_count: value.modified_count,
        }
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeleteSummary {
    pub acknowledged: bool,
    pub deleted_count: u64,
}

impl From<mongodb::results::DeleteResult> for DeleteSummary {
    fn from(value: mongodb::results::DeleteResult) -> Self {
        Self {
            acknowledged: true,
            deleted_count: value.deleted_count,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserInsert {
    Inserted(ObjectId),
    AlreadyExists,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Case-insensitive partial match on `email`, at most `limit` users.
    async fn search_by_email(&self, fragment: &str, limit: i64) -> Result<Vec<Document>, Error>;

    async fn find_by_email(&self, email: &str) -> Result<Option<Document>, Error>;

    /// Inserts `user` unless a user with `email` is already registered.
    async fn insert_if_absent(&self, email: &str, user: Document) -> Result<UserInsert, Error>;

    async fn set_role_by_id(&self, id: ObjectId, role: Role) -> Result<UpdateSummary, Error>;

    async fn set_role_by_email(&self, email: &str, role: Role) -> Result<UpdateSummary, Error>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RiderFilter {
    pub status: Option<String>,
    pub district: Option<String>,
}

impl RiderFilter {
    pub fn to_document(&self) -> Document {
        let mut filter = Document::new();
        if let Some(status) = &self.status {
            filter.insert("status", status.as_str());
        }
        if let Some(district) = &self.district {
            filter.insert("district", district.as_str());
        }
        filter
    }

    pub fn matches(&self, rider: &Document) -> bool {
        field_equals(rider, "status", self.status.as_deref())
            && field_equals(rider, "district", self.district.as_deref())
    }
}

#[async_trait]
pub trait RiderStore: Send + Sync {
    async fn insert(&self, rider: Document) -> Result<ObjectId, Error>;

    async fn find(&self, filter: RiderFilter) -> Result<Vec<Document>, Error>;

    async fn set_fields(&self, id: ObjectId, fields: Document) -> Result<UpdateSummary, Error>;

    async fn delete(&self, id: ObjectId) -> Result<DeleteSummary, Error>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParcelFilter {
    pub created_by: Option<String>,
    pub payment_status: Option<String>,
    pub delivery_status: Option<String>,
}

impl ParcelFilter {
    pub fn to_document(&self) -> Document {
        let mut filter = Document::new();
        if let Some(created_by) = &self.created_by {
            filter.insert("created_by", created_by.as_str());
        }
        if let Some(payment_status) = &self.payment_status {
            filter.insert("payment_status", payment_status.as_str());
        }
        if let Some(delivery_status) = &self.delivery_status {
            filter.insert("delivery_status", delivery_status.as_str());
        }
        filter
    }

    pub fn matches(&self, parcel: &Document) -> bool {
        field_equals(parcel, "created_by", self.created_by.as_deref())
            && field_equals(parcel, "payment_status", self.payment_status.as_deref())
            && field_equals(parcel, "delivery_status", self.delivery_status.as_deref())
    }
}

/// Parcels handed to one rider, restricted to a set of delivery statuses.
#[derive(Debug, Clone, PartialEq)]
pub struct AssignedFilter {
    pub rider_email: String,
    pub statuses: &'static [&'static str],
}

impl AssignedFilter {
    pub fn to_document(&self) -> Document {
        bson::doc! {
            "assigned_rider_email": self.rider_email.as_str(),
            "delivery_status": { "$in": self.statuses.to_vec() },
        }
    }

    pub fn matches(&self, parcel: &Document) -> bool {
        field_equals(parcel, "assigned_rider_email", Some(self.rider_email.as_str()))
            && parcel
                .get_str("delivery_status")
                .map(|status| self.statuses.iter().any(|it| *it == status))
                .unwrap_or(false)
    }
}

#[async_trait]
pub trait ParcelStore: Send + Sync {
    async fn insert(&self, parcel: Document) -> Result<ObjectId, Error>;

    /// Newest first by `createdAt`.
    async fn find(&self, filter: ParcelFilter) -> Result<Vec<Document>, Error>;

    /// Newest first by `creation_date`.
    async fn find_assigned(&self, filter: AssignedFilter) -> Result<Vec<Document>, Error>;

    async fn find_by_id(&self, id: ObjectId) -> Result<Option<Document>, Error>;

    async fn find_by_tracking_code(&self, code: &str) -> Result<Option<Document>, Error>;

    async fn set_fields(&self, id: ObjectId, fields: Document) -> Result<UpdateSummary, Error>;

    async fn delete(&self, id: ObjectId) -> Result<DeleteSummary, Error>;

    async fn count_by_delivery_status(&self) -> Result<Vec<StatusCount>, Error>;

    /// Per delivery status: parcel count and summed `delivery_fee` for the
    /// parcels whose `rider_id` equals `rider_id`.
    async fn earnings_by_status(&self, rider_id: &str) -> Result<Vec<StatusEarnings>, Error>;
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn insert(&self, payment: PaymentModel) -> Result<ObjectId, Error>;

    /// Latest first by `paid_at`.
    async fn find(&self, email: Option<String>) -> Result<Vec<PaymentModel>, Error>;
}

#[async_trait]
pub trait TrackingStore: Send + Sync {
    async fn insert(&self, event: Document) -> Result<ObjectId, Error>;

    /// Oldest first by `timestamp`.
    async fn find_by_tracking_id(&self, tracking_id: &str) -> Result<Vec<Document>, Error>;

    /// Oldest first by `timestamp`.
    async fn find_by_tracking_code(&self, code: &str) -> Result<Vec<Document>, Error>;
}

macro_rules! shared_store {
    ($($name:ident => $store:ident),+ $(,)?) => {
        $(
            #[derive(Clone)]
            pub struct $name(pub Arc<dyn $store>);

            impl std::ops::Deref for $name {
                type Target = dyn $store;

                fn deref(&self) -> &Self::Target {
                    self.0.as_ref()
                }
            }
        )+
    };
}

shared_store! {
    Users => UserStore,
    Riders => RiderStore,
    Parcels => ParcelStore,
    Payments => PaymentStore,
    Trackings => TrackingStore,
}

/// `expected == None` matches anything.
fn field_equals(doc: &Document, key: &str, expected: Option<&str>) -> bool {
    match expected {
        None => true,
        Some(expected) => matches!(doc.get(key), Some(Bson::String(value)) if value == expected),
    }
}
