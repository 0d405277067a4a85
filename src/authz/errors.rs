use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use miette::Diagnostic;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum AuthzError {
    #[error("Fact store error: {0}")]
    #[diagnostic(
        code(orgauthz::authz::store),
        help("The fact store rejected the operation; callers deny or defer the write")
    )]
    Store(String),

    #[error("Fact store operation `{0}` timed out")]
    #[diagnostic(
        code(orgauthz::authz::timeout),
        help("Raise `authz.query_timeout_ms` / `authz.write_timeout_ms` if the store is slow")
    )]
    Timeout(String),

    #[error("Invalid reference: {0}")]
    #[diagnostic(
        code(orgauthz::authz::invalid_reference),
        help("References use the form \"Kind/id\" with Kind one of User, Profile, Company, TimeOffRequest")
    )]
    InvalidReference(String),

    #[error("Directory lookup failed: {0}")]
    #[diagnostic(code(orgauthz::authz::directory))]
    Directory(String),

    #[error("Database error: {0}")]
    #[diagnostic(code(orgauthz::authz::db))]
    Db(#[from] sea_orm::DbErr),
}

impl IntoResponse for AuthzError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AuthzError::InvalidReference(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            _ => {
                tracing::error!(error = %self, "authorization API request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
        };
        let body = json!({ "error": message });
        (status, Json(body)).into_response()
    }
}
