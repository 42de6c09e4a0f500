use std::str::FromStr;

use async_trait::async_trait;
use axum::{
    extract::{Path, Query, State},
};
use bson::{oid::ObjectId, Document};
use mongodb::options::FindOptions;
use serde::{Deserialize, Serialize};
use tap::TapFallible;

use crate::{
    error::Error,
    mongo_ext::{is_duplicate_key, Collection},
    store::{UpdateSummary, UserInsert, UserStore, Users},
    util::{DocumentJson, Json, ObjectIdString, PathObjectId},
};

use super::auth::VerifiedIdentity;

pub const SEARCH_LIMIT: i64 = 10;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Rider,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Rider => "rider",
            Self::Admin => "admin",
        }
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "rider" => Ok(Self::Rider),
            "admin" => Ok(Self::Admin),
            _ => Err(Error::BadRequest("Invalid role")),
        }
    }
}

/// Stored role of a user record; records without one are plain users.
pub fn role_of(user: &Document) -> String {
    match user.get_str("role") {
        Ok(role) if !role.is_empty() => role.to_string(),
        _ => Role::User.as_str().to_string(),
    }
}

#[derive(Clone)]
pub struct UserCollection(pub Collection<Document>);

impl std::ops::Deref for UserCollection {
    type Target = Collection<Document>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[async_trait]
impl UserStore for UserCollection {
    async fn search_by_email(&self, fragment: &str, limit: i64) -> Result<Vec<Document>, Error> {
        self.find_all(
            bson::doc! {
                "email": {
                    "$regex": regex::escape(fragment),
                    "$options": "i",
                }
            },
            FindOptions::builder().limit(limit).build(),
        )
        .await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Document>, Error> {
        self.find_one(bson::doc! { "email": email }, None)
            .await
            .map_err(Into::into)
    }

    async fn insert_if_absent(&self, email: &str, mut user: Document) -> Result<UserInsert, Error> {
        if self.find_by_email(email).await?.is_some() {
            return Ok(UserInsert::AlreadyExists);
        }

        let id = ObjectId::new();
        user.insert("_id", id);

        match self.insert_one(user, None).await {
            Ok(_) => Ok(UserInsert::Inserted(id)),
            // lost a race against a concurrent sign-in; the unique index decides
            Err(err) if is_duplicate_key(&err) => Ok(UserInsert::AlreadyExists),
            Err(err) => Err(err.into()),
        }
    }

    async fn set_role_by_id(&self, id: ObjectId, role: Role) -> Result<UpdateSummary, Error> {
        self.set_one_by_id(id, bson::doc! { "role": role.as_str() })
            .await
            .map(Into::into)
    }

    async fn set_role_by_email(&self, email: &str, role: Role) -> Result<UpdateSummary, Error> {
        self.update_one(
            bson::doc! { "email": email },
            bson::doc! { "$set": { "role": role.as_str() } },
            None,
        )
        .await
        .map(Into::into)
        .map_err(Into::into)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct SearchQuery {
    pub email: Option<String>,
}

pub async fn search(
    State(users): State<Users>,
    _identity: VerifiedIdentity,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<DocumentJson>>, Error> {
    let fragment = query
        .email
        .filter(|it| !it.is_empty())
        .ok_or(Error::BadRequest("Missing email query"))?;

    let found = users.search_by_email(&fragment, SEARCH_LIMIT).await?;

    Ok(Json(found.into_iter().map(Into::into).collect()))
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RoleResponse {
    pub role: String,
}

pub async fn role(
    State(users): State<Users>,
    Path(email): Path<String>,
) -> Result<Json<RoleResponse>, Error> {
    if email.is_empty() {
        return Err(Error::BadRequest("Email is required"));
    }

    let user = users
        .find_by_email(&email)
        .await?
        .ok_or(Error::NotFound("User not found"))
        .tap_err(|_| tracing::debug!("role requested for unknown user {}", email))?;

    Ok(Json(RoleResponse {
        role: role_of(&user),
    }))
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum CreateUserResponse {
    Inserted {
        acknowledged: bool,
        #[serde(rename = "insertedId")]
        inserted_id: ObjectIdString,
        inserted: bool,
    },
    Existing {
        message: &'static str,
        inserted: bool,
    },
}

#[tracing::instrument(skip_all)]
pub async fn create(
    State(users): State<Users>,
    Json(mut user): Json<Document>,
) -> Result<Json<CreateUserResponse>, Error> {
    let email = match user.get_str("email") {
        Ok(email) if !email.is_empty() => email.to_string(),
        _ => return Err(Error::BadRequest("Email is required")),
    };

    // roles only change through the role endpoints
    user.remove("_id");
    user.insert("role", Role::User.as_str());

    let response = match users.insert_if_absent(&email, user).await? {
        UserInsert::Inserted(id) => {
            tracing::debug!("registered user {}", email);
            CreateUserResponse::Inserted {
                acknowledged: true,
                inserted_id: id.into(),
                inserted: true,
            }
        }
        UserInsert::AlreadyExists => CreateUserResponse::Existing {
            message: "User already exists",
            inserted: false,
        },
    };

    Ok(Json(response))
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct UpdateRoleRequest {
    pub role: Option<String>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct UpdateRoleResponse {
    pub message: String,
    pub result: UpdateSummary,
}

#[tracing::instrument(skip_all, fields(id = %id))]
pub async fn update_role(
    State(users): State<Users>,
    PathObjectId(id): PathObjectId,
    Json(request): Json<UpdateRoleRequest>,
) -> Result<Json<UpdateRoleResponse>, Error> {
    let role = match request.role.as_deref().map(Role::from_str) {
        Some(Ok(role @ (Role::Admin | Role::User))) => role,
        _ => {
            return Err(Error::BadRequest("Invalid role"))
                .tap_err(|_| tracing::debug!("rejected role {:?}", request.role))
        }
    };

    let result = users.set_role_by_id(id, role).await?;

    Ok(Json(UpdateRoleResponse {
        message: format!("User role updated to {}", role.as_str()),
        result,
    }))
}
