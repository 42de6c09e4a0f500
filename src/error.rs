use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

use crate::{payment_gateway::ProcessorError, api::v1::token::VerifyError};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("validation error: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("{0}")]
    BadRequest(&'static str),

    #[error("{0}")]
    NotFound(&'static str),

    #[error("unauthorized access")]
    Unauthorized,

    #[error("forbidden access")]
    Forbidden(ForbiddenType),

    #[error("{0}")]
    DatabaseError(#[from] mongodb::error::Error),

    #[error("{0}")]
    BSONSerError(#[from] bson::ser::Error),

    #[error("{0}")]
    BSONDeError(#[from] bson::de::Error),

    #[error("{0}")]
    PaymentProcessor(#[from] ProcessorError),
}

#[derive(Debug, thiserror::Error)]
pub enum ForbiddenType {
    #[error("invalid identity token: {0}")]
    InvalidToken(#[from] VerifyError),

    #[error("identity carries no email claim")]
    MissingEmail,

    #[error("user is not an admin")]
    NotAdmin,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorJson {
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<serde_json::Value>,
    r#type: String,
    message: String,
}

impl From<Error> for ErrorJson {
    fn from(err: Error) -> Self {
        let r#type = err.to_string_variant();

        let message = if err.is_internal() {
            "internal server error".to_string()
        } else {
            err.to_string()
        };

        let errors = match err {
            Error::ValidationError(err) => serde_json::to_value(err).ok(),
            Error::BadRequest(..)
            | Error::NotFound(..)
            | Error::Unauthorized
            | Error::Forbidden(..)
            | Error::DatabaseError(..)
            | Error::BSONSerError(..)
            | Error::BSONDeError(..)
            | Error::PaymentProcessor(..) => None,
        };

        Self {
            errors,
            message,
            r#type,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        tracing::error!("error: {:?}", self);
        let status = match self {
            Self::ValidationError(..) | Self::BadRequest(..) => StatusCode::BAD_REQUEST,
            Self::NotFound(..) => StatusCode::NOT_FOUND,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden(..) => StatusCode::FORBIDDEN,
            Self::DatabaseError(..)
            | Self::BSONSerError(..)
            | Self::BSONDeError(..)
            | Self::PaymentProcessor(..) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let error = ErrorJson::from(self);

        (status, Json(error)).into_response()
    }
}

impl Error {
    /// Store and codec failures are reported with a generic message; the
    /// details only go to the log. Processor failures keep their message.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            Self::DatabaseError(..) | Self::BSONSerError(..) | Self::BSONDeError(..)
        )
    }

    pub fn to_string_variant(&self) -> String {
        macro_rules! match_var {
            ($id:ident !) => {
                Self::$id
            };
            ($id:ident (..)) => {
                Self::$id(..)
            };
        }

        macro_rules! variant {
            ($($name:ident $tt:tt),+) => {
                match self {
                    $(
                        match_var!($name $tt) => {
                            stringify!($name)
                       }
                    )+
                }
            };
        }

        variant! {
            ValidationError(..),
            BadRequest(..),
            NotFound(..),
            Unauthorized!,
            Forbidden(..),
            DatabaseError(..),
            BSONSerError(..),
            BSONDeError(..),
            PaymentProcessor(..)
        }
        .to_string()
    }
}

impl From<axum::extract::rejection::JsonRejection> for Error {
    fn from(value: axum::extract::rejection::JsonRejection) -> Self {
        tracing::debug!("rejected request body: {}", value.body_text());
        Self::BadRequest("Invalid request body")
    }
}

impl From<VerifyError> for Error {
    fn from(value: VerifyError) -> Self {
        Self::Forbidden(value.into())
    }
}
