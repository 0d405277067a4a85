use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use miette::Diagnostic;
use serde_json::json;
use thiserror::Error;

use crate::authz::errors::AuthzError;

#[derive(Debug, Error, Diagnostic)]
pub enum OrgError {
    #[error("I/O error: {0}")]
    #[diagnostic(code(orgauthz::io))]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    #[diagnostic(code(orgauthz::config))]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    #[diagnostic(code(orgauthz::serde))]
    Serde(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    #[diagnostic(code(orgauthz::db))]
    Db(#[from] sea_orm::DbErr),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Authz(#[from] AuthzError),

    #[error("Bad request: {0}")]
    #[diagnostic(code(orgauthz::bad_request))]
    BadRequest(String),

    #[error("Authentication required")]
    #[diagnostic(
        code(orgauthz::unauthorized),
        help("Send the acting user's id in the `x-user-id` header")
    )]
    Unauthorized,

    #[error("{0}")]
    #[diagnostic(code(orgauthz::forbidden))]
    Forbidden(String),

    #[error("{0} not found")]
    #[diagnostic(code(orgauthz::not_found))]
    NotFound(String),

    #[error("{0}")]
    #[diagnostic(code(orgauthz::conflict))]
    Conflict(String),

    #[error("{0}")]
    #[diagnostic(code(orgauthz::other))]
    Other(String),
}

impl IntoResponse for OrgError {
    fn into_response(self) -> Response {
        let status = match &self {
            OrgError::BadRequest(_) => StatusCode::BAD_REQUEST,
            OrgError::Unauthorized => StatusCode::UNAUTHORIZED,
            OrgError::Forbidden(_) => StatusCode::FORBIDDEN,
            OrgError::NotFound(_) => StatusCode::NOT_FOUND,
            OrgError::Conflict(_) => StatusCode::CONFLICT,
            OrgError::Authz(AuthzError::InvalidReference(_)) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
        }
        let body = json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}
