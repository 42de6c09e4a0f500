use axum::{
    extract::{FromRef, FromRequestParts},
    headers::{authorization::Bearer, Authorization},
    http::request::Parts,
    RequestPartsExt, TypedHeader,
};
use tap::TapFallible;

use crate::{
    error::{Error, ForbiddenType},
    store::Users,
};

use super::{token::SharedIdentityProvider, user::role_of};

/// Identity proven by a bearer ID token.
///
/// Rejects with `Unauthorized` when the `Authorization: Bearer` header is
/// missing and with `Forbidden` when the provider refuses the token.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedIdentity {
    pub uid: String,
    pub email: Option<String>,
}

impl VerifiedIdentity {
    pub async fn from_token(provider: &SharedIdentityProvider, token: &str) -> Result<Self, Error> {
        let claims = provider
            .verify(token)
            .await
            .tap_err(|err| tracing::debug!("identity token rejected: {}", err))?;

        Ok(Self {
            uid: claims.sub,
            email: claims.email,
        })
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for VerifiedIdentity
where
    SharedIdentityProvider: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(token)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| Error::Unauthorized)
            .tap_err(|_| tracing::debug!("request without bearer token"))?;

        let provider = SharedIdentityProvider::from_ref(state);

        Self::from_token(&provider, token.token()).await
    }
}

/// A verified identity whose user record carries the `admin` role.
#[derive(Debug, Clone, PartialEq)]
pub struct AdminIdentity(pub VerifiedIdentity);

impl AdminIdentity {
    pub async fn check(users: &Users, identity: VerifiedIdentity) -> Result<Self, Error> {
        let email = identity
            .email
            .as_deref()
            .ok_or(Error::Forbidden(ForbiddenType::MissingEmail))?;

        let user = users.find_by_email(email).await?;

        match user.as_ref().map(role_of) {
            Some(role) if role == "admin" => Ok(Self(identity)),
            _ => Err(Error::Forbidden(ForbiddenType::NotAdmin))
                .tap_err(|_| tracing::debug!("{} tried an admin operation", email)),
        }
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AdminIdentity
where
    SharedIdentityProvider: FromRef<S>,
    Users: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let identity = parts.extract_with_state::<VerifiedIdentity, _>(state).await?;
        let users = Users::from_ref(state);

        Self::check(&users, identity).await
    }
}
