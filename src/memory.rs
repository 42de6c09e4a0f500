//! In-memory stores standing in for MongoDB in handler tests. Filters, sort
//! orders and update counts follow what the database reports.

use std::{
    cmp::Ordering,
    sync::{
        atomic::{AtomicUsize, Ordering as AtomicOrdering},
        Mutex,
    },
};

use async_trait::async_trait;
use bson::{oid::ObjectId, Bson, Document};

use crate::{
    api::v1::{
        dashboard::{StatusCount, StatusEarnings},
        payment::PaymentModel,
        user::Role,
    },
    error::Error,
    payment_gateway::{PaymentIntent, PaymentProcessor, ProcessorError},
    store::{
        AssignedFilter, DeleteSummary, ParcelFilter, ParcelStore, PaymentStore, RiderFilter,
        RiderStore, TrackingStore, UpdateSummary, UserInsert, UserStore,
    },
};

/// Rank of a value's type in the database's cross-type sort order.
fn type_rank(value: Option<&Bson>) -> u8 {
    match value {
        None | Some(Bson::Null) | Some(Bson::Undefined) => 0,
        Some(Bson::Int32(_)) | Some(Bson::Int64(_)) | Some(Bson::Double(_)) => 1,
        Some(Bson::String(_)) => 2,
        Some(Bson::Document(_)) => 3,
        Some(Bson::Array(_)) => 4,
        Some(Bson::ObjectId(_)) => 6,
        Some(Bson::Boolean(_)) => 7,
        Some(Bson::DateTime(_)) => 8,
        Some(_) => 5,
    }
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(value) => Some(*value as f64),
        Bson::Int64(value) => Some(*value as f64),
        Bson::Double(value) => Some(*value),
        _ => None,
    }
}

pub fn compare_bson(a: Option<&Bson>, b: Option<&Bson>) -> Ordering {
    match (a, b) {
        (Some(Bson::String(a)), Some(Bson::String(b))) => a.cmp(b),
        (Some(Bson::DateTime(a)), Some(Bson::DateTime(b))) => a.cmp(b),
        (Some(Bson::ObjectId(a)), Some(Bson::ObjectId(b))) => a.cmp(b),
        (Some(Bson::Boolean(a)), Some(Bson::Boolean(b))) => a.cmp(b),
        (Some(a), Some(b)) if type_rank(Some(a)) == 1 && type_rank(Some(b)) == 1 => {
            match (as_f64(a), as_f64(b)) {
                (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
                _ => Ordering::Equal,
            }
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Ascending,
    Descending,
}

/// A collection of documents keyed by `_id`.
#[derive(Default)]
pub struct MemoryCollection {
    documents: Mutex<Vec<Document>>,
}

impl MemoryCollection {
    fn insert(&self, mut document: Document) -> ObjectId {
        let id = ObjectId::new();
        document.insert("_id", id);
        self.documents.lock().unwrap().push(document);
        id
    }

    fn find(
        &self,
        predicate: impl Fn(&Document) -> bool,
        sort: Option<(&str, Direction)>,
    ) -> Vec<Document> {
        let mut found: Vec<_> = self
            .documents
            .lock()
            .unwrap()
            .iter()
            .filter(|it| predicate(it))
            .cloned()
            .collect();

        if let Some((key, direction)) = sort {
            found.sort_by(|a, b| {
                let ordering = compare_bson(a.get(key), b.get(key));
                match direction {
                    Direction::Ascending => ordering,
                    Direction::Descending => ordering.reverse(),
                }
            });
        }

        found
    }

    fn find_one(&self, predicate: impl Fn(&Document) -> bool) -> Option<Document> {
        self.documents
            .lock()
            .unwrap()
            .iter()
            .find(|it| predicate(it))
            .cloned()
    }

    fn update_one(
        &self,
        predicate: impl Fn(&Document) -> bool,
        fields: Document,
    ) -> UpdateSummary {
        let mut documents = self.documents.lock().unwrap();
        let Some(document) = documents.iter_mut().find(|it| predicate(it)) else {
            return UpdateSummary {
                acknowledged: true,
                matched_count: 0,
                modified_count: 0,
            };
        };

        let mut modified = false;
        for (key, value) in fields {
            if document.get(&key) != Some(&value) {
                modified = true;
                document.insert(key, value);
            }
        }

        UpdateSummary {
            acknowledged: true,
            matched_count: 1,
            modified_count: modified as u64,
        }
    }

    fn delete_one(&self, id: ObjectId) -> DeleteSummary {
        let mut documents = self.documents.lock().unwrap();
        let before = documents.len();
        if let Some(position) = documents.iter().position(|it| has_id(it, id)) {
            documents.remove(position);
        }

        DeleteSummary {
            acknowledged: true,
            deleted_count: (before - documents.len()) as u64,
        }
    }

    pub fn all(&self) -> Vec<Document> {
        self.documents.lock().unwrap().clone()
    }
}

fn has_id(document: &Document, id: ObjectId) -> bool {
    matches!(document.get("_id"), Some(Bson::ObjectId(it)) if *it == id)
}

fn has_str(document: &Document, key: &str, expected: &str) -> bool {
    matches!(document.get(key), Some(Bson::String(it)) if it == expected)
}

#[derive(Default)]
pub struct MemoryUsers(MemoryCollection);

#[async_trait]
impl UserStore for MemoryUsers {
    async fn search_by_email(&self, fragment: &str, limit: i64) -> Result<Vec<Document>, Error> {
        let fragment = fragment.to_lowercase();

        Ok(self
            .0
            .find(
                |it| {
                    it.get_str("email")
                        .map(|email| email.to_lowercase().contains(&fragment))
                        .unwrap_or(false)
                },
                None,
            )
            .into_iter()
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Document>, Error> {
        Ok(self.0.find_one(|it| has_str(it, "email", email)))
    }

    async fn insert_if_absent(&self, email: &str, user: Document) -> Result<UserInsert, Error> {
        let mut documents = self.0.documents.lock().unwrap();
        if documents.iter().any(|it| has_str(it, "email", email)) {
            return Ok(UserInsert::AlreadyExists);
        }

        let id = ObjectId::new();
        let mut user = user;
        user.insert("_id", id);
        documents.push(user);

        Ok(UserInsert::Inserted(id))
    }

    async fn set_role_by_id(&self, id: ObjectId, role: Role) -> Result<UpdateSummary, Error> {
        Ok(self
            .0
            .update_one(|it| has_id(it, id), bson::doc! { "role": role.as_str() }))
    }

    async fn set_role_by_email(&self, email: &str, role: Role) -> Result<UpdateSummary, Error> {
        Ok(self
            .0
            .update_one(|it| has_str(it, "email", email), bson::doc! { "role": role.as_str() }))
    }
}

#[derive(Default)]
pub struct MemoryRiders(pub MemoryCollection);

#[async_trait]
impl RiderStore for MemoryRiders {
    async fn insert(&self, rider: Document) -> Result<ObjectId, Error> {
        Ok(self.0.insert(rider))
    }

    async fn find(&self, filter: RiderFilter) -> Result<Vec<Document>, Error> {
        Ok(self.0.find(|it| filter.matches(it), None))
    }

    async fn set_fields(&self, id: ObjectId, fields: Document) -> Result<UpdateSummary, Error> {
        Ok(self.0.update_one(|it| has_id(it, id), fields))
    }

    async fn delete(&self, id: ObjectId) -> Result<DeleteSummary, Error> {
        Ok(self.0.delete_one(id))
    }
}

#[derive(Default)]
pub struct MemoryParcels(pub MemoryCollection);

impl MemoryParcels {
    /// Groups parcels by `delivery_status` in order of first appearance.
    fn group_by_status<'a>(
        parcels: impl Iterator<Item = &'a Document>,
    ) -> Vec<(Option<String>, Vec<&'a Document>)> {
        let mut groups: Vec<(Option<String>, Vec<&Document>)> = vec![];

        for parcel in parcels {
            let status = parcel.get_str("delivery_status").ok().map(str::to_string);
            match groups.iter_mut().find(|(it, _)| *it == status) {
                Some((_, members)) => members.push(parcel),
                None => groups.push((status, vec![parcel])),
            }
        }

        groups
    }
}

#[async_trait]
impl ParcelStore for MemoryParcels {
    async fn insert(&self, parcel: Document) -> Result<ObjectId, Error> {
        Ok(self.0.insert(parcel))
    }

    async fn find(&self, filter: ParcelFilter) -> Result<Vec<Document>, Error> {
        Ok(self.0.find(
            |it| filter.matches(it),
            Some(("createdAt", Direction::Descending)),
        ))
    }

    async fn find_assigned(&self, filter: AssignedFilter) -> Result<Vec<Document>, Error> {
        Ok(self.0.find(
            |it| filter.matches(it),
            Some(("creation_date", Direction::Descending)),
        ))
    }

    async fn find_by_id(&self, id: ObjectId) -> Result<Option<Document>, Error> {
        Ok(self.0.find_one(|it| has_id(it, id)))
    }

    async fn find_by_tracking_code(&self, code: &str) -> Result<Option<Document>, Error> {
        Ok(self.0.find_one(|it| has_str(it, "trackingCode", code)))
    }

    async fn set_fields(&self, id: ObjectId, fields: Document) -> Result<UpdateSummary, Error> {
        Ok(self.0.update_one(|it| has_id(it, id), fields))
    }

    async fn delete(&self, id: ObjectId) -> Result<DeleteSummary, Error> {
        Ok(self.0.delete_one(id))
    }

    async fn count_by_delivery_status(&self) -> Result<Vec<StatusCount>, Error> {
        let parcels = self.0.all();

        Ok(Self::group_by_status(parcels.iter())
            .into_iter()
            .map(|(status, members)| StatusCount {
                status,
                count: members.len() as i64,
            })
            .collect())
    }

    async fn earnings_by_status(&self, rider_id: &str) -> Result<Vec<StatusEarnings>, Error> {
        let parcels = self.0.all();
        let matching = parcels.iter().filter(|it| has_str(it, "rider_id", rider_id));

        Ok(Self::group_by_status(matching)
            .into_iter()
            .map(|(status, members)| StatusEarnings {
                status,
                count: members.len() as i64,
                total_earnings: members
                    .iter()
                    .filter_map(|it| it.get("delivery_fee").and_then(as_f64))
                    .sum(),
            })
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryPayments(Mutex<Vec<PaymentModel>>);

#[async_trait]
impl PaymentStore for MemoryPayments {
    async fn insert(&self, payment: PaymentModel) -> Result<ObjectId, Error> {
        let id = payment.id;
        self.0.lock().unwrap().push(payment);
        Ok(id)
    }

    async fn find(&self, email: Option<String>) -> Result<Vec<PaymentModel>, Error> {
        let mut found: Vec<_> = self
            .0
            .lock()
            .unwrap()
            .iter()
            .filter(|it| email.is_none() || it.email == email)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.paid_at.cmp(&a.paid_at));

        Ok(found)
    }
}

#[derive(Default)]
pub struct MemoryTrackings(pub MemoryCollection);

#[async_trait]
impl TrackingStore for MemoryTrackings {
    async fn insert(&self, event: Document) -> Result<ObjectId, Error> {
        Ok(self.0.insert(event))
    }

    async fn find_by_tracking_id(&self, tracking_id: &str) -> Result<Vec<Document>, Error> {
        Ok(self.0.find(
            |it| has_str(it, "tracking_id", tracking_id),
            Some(("timestamp", Direction::Ascending)),
        ))
    }

    async fn find_by_tracking_code(&self, code: &str) -> Result<Vec<Document>, Error> {
        Ok(self.0.find(
            |it| has_str(it, "trackingCode", code),
            Some(("timestamp", Direction::Ascending)),
        ))
    }
}

/// Hands out sequential intents and refuses non-positive amounts the way
/// the processor does.
#[derive(Default)]
pub struct FakeProcessor {
    issued: AtomicUsize,
}

#[async_trait]
impl PaymentProcessor for FakeProcessor {
    async fn create_payment_intent(&self, amount: i64) -> Result<PaymentIntent, ProcessorError> {
        if amount <= 0 {
            return Err(ProcessorError::Rejected(
                "This value must be greater than or equal to 1.".to_string(),
            ));
        }

        let n = self.issued.fetch_add(1, AtomicOrdering::SeqCst);

        Ok(PaymentIntent {
            id: format!("pi_{}", n),
            client_secret: format!("pi_{}_secret_{}", n, amount),
        })
    }
}

#[cfg(test)]
mod tests {
    use bson::doc;

    use super::*;

    #[test]
    fn test_missing_sorts_first() {
        let dated = Bson::DateTime(bson::DateTime::from_millis(0));

        assert_eq!(compare_bson(None, Some(&dated)), Ordering::Less);
        assert_eq!(
            compare_bson(Some(&Bson::Int32(2)), Some(&Bson::Double(1.5))),
            Ordering::Greater
        );
    }

    #[test]
    fn test_update_reports_real_modifications() {
        let collection = MemoryCollection::default();
        let id = collection.insert(doc! { "payment_status": "unpaid" });

        let first = collection.update_one(|it| has_id(it, id), doc! { "payment_status": "paid" });
        let second = collection.update_one(|it| has_id(it, id), doc! { "payment_status": "paid" });

        assert_eq!((first.matched_count, first.modified_count), (1, 1));
        assert_eq!((second.matched_count, second.modified_count), (1, 0));
    }
}
