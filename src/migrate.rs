use std::collections::HashSet;

use bson::{oid::ObjectId, Document};
use mongodb::{options::IndexOptions, Database, IndexModel};
use serde::{Deserialize, Serialize};

use crate::{error::Error, mongo_ext::Collection};

#[derive(Serialize, Deserialize)]
pub struct MigrateModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub version: i64,
}

#[derive(Clone)]
pub struct MigrationCollection(pub Collection<MigrateModel>);

impl std::ops::Deref for MigrationCollection {
    type Target = Collection<MigrateModel>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl MigrationCollection {
    pub async fn insert_version(&self, version: i64) -> Result<(), mongodb::error::Error> {
        self.insert_one(
            MigrateModel {
                id: ObjectId::new(),
                version,
            },
            None,
        )
        .await
        .map(|_| ())
    }
}

fn index(keys: Document, unique: bool) -> IndexModel {
    IndexModel::builder()
        .keys(keys)
        .options(IndexOptions::builder().unique(unique).build())
        .build()
}

/// Versioned schema setup, recorded in the `migrations` collection.
pub struct Migrator {
    db: Database,
    migrations: MigrationCollection,
}

impl Migrator {
    pub fn new(db: &Database) -> Self {
        Self {
            db: db.clone(),
            migrations: MigrationCollection(db.collection("migrations").into()),
        }
    }

    async fn create_indexes(
        &self,
        collection: &str,
        indexes: Vec<IndexModel>,
    ) -> Result<(), mongodb::error::Error> {
        self.db
            .collection::<Document>(collection)
            .create_indexes(indexes, None)
            .await
            .map(|_| ())
    }

    async fn v1_migrate(&self) -> Result<(), mongodb::error::Error> {
        self.migrations
            .create_index(index(bson::doc! { "version": 1 }, true), None)
            .await?;

        // also what makes concurrent sign-ins idempotent
        self.create_indexes("users", vec![index(bson::doc! { "email": 1 }, true)])
            .await?;

        self.create_indexes(
            "parcels",
            vec![
                index(bson::doc! { "trackingCode": 1 }, false),
                index(bson::doc! { "assigned_rider_email": 1 }, false),
                index(bson::doc! { "createdAt": -1 }, false),
            ],
        )
        .await?;

        self.create_indexes(
            "riders",
            vec![
                index(bson::doc! { "district": 1 }, false),
                index(bson::doc! { "status": 1 }, false),
            ],
        )
        .await?;

        self.create_indexes(
            "payments",
            vec![index(bson::doc! { "email": 1, "paid_at": -1 }, false)],
        )
        .await?;

        self.create_indexes(
            "trackings",
            vec![
                index(bson::doc! { "tracking_id": 1, "timestamp": 1 }, false),
                index(bson::doc! { "trackingCode": 1 }, false),
            ],
        )
        .await?;

        Ok(())
    }

    async fn applied_versions(&self) -> Result<HashSet<i64>, Error> {
        Ok(self
            .migrations
            .find_all(None, None)
            .await?
            .into_iter()
            .map(|it| it.version)
            .collect())
    }

    pub async fn run(&self) -> Result<(), Error> {
        let applied = self.applied_versions().await?;

        macro_rules! migrate {
            ($version:expr, $fun:ident) => {
                if !applied.contains(&$version) {
                    tracing::debug!("running migration version {}", $version);
                    self.$fun().await?;
                    self.migrations.insert_version($version).await?;
                }
            };
        }

        migrate!(1, v1_migrate);

        Ok(())
    }
}

pub async fn run_migration(db: &Database) -> Result<(), Error> {
    Migrator::new(db).run().await
}
