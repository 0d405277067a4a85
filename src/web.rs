//! HTTP surface of the HR service. `/api` routes act on behalf of the user
//! named in the `x-user-id` header; the authorization API is served on its
//! own port.
use crate::authz::Authz;
use crate::errors::OrgError;
use crate::hr::{Decision, HrService, ProfileUpdate, RequestInput};
use crate::model::{CompanyId, NewUser, RequestId, User, UserId, UserRole};
use crate::settings::Settings;
use axum::extract::{FromRequestParts, Path, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use miette::IntoDiagnostic;
use sea_orm::DatabaseConnection;
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub const ACTOR_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub hr: HrService,
}

/// The acting user, resolved from the `x-user-id` header.
pub struct Actor(pub User);

impl FromRequestParts<AppState> for Actor {
    type Rejection = OrgError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let id: UserId = parts
            .headers
            .get(ACTOR_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
            .ok_or(OrgError::Unauthorized)?;
        let user = state
            .hr
            .find_user(id)
            .await?
            .ok_or(OrgError::Unauthorized)?;
        Ok(Actor(user))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/companies", get(list_companies).post(create_company))
        .route("/api/companies/{id}", get(get_company))
        .route("/api/companies/{id}/users", get(company_users))
        .route("/api/users", get(list_users).post(create_user))
        .route("/api/users/{id}", get(get_user).put(update_user))
        .route("/api/users/{id}/role", put(change_role))
        .route("/api/users/{id}/manager", put(change_manager))
        .route("/api/users/{id}/reports", get(direct_reports))
        .route("/api/users/{id}/all-reports", get(all_reports))
        .route("/api/timeoff", get(list_requests).post(create_request))
        .route("/api/timeoff/my-requests", get(my_requests))
        .route("/api/timeoff/pending", get(pending_requests))
        .route("/api/timeoff/{id}", get(get_request))
        .route("/api/timeoff/{id}/approve", post(approve_request))
        .route("/api/timeoff/{id}/reject", post(reject_request))
        .route("/healthz", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(settings: Settings, db: DatabaseConnection, authz: Authz) -> miette::Result<()> {
    let state = AppState {
        settings: Arc::new(settings),
        hr: HrService::new(db, authz.clone()),
    };

    let public_addr: SocketAddr = format!(
        "{}:{}",
        state.settings.server.host, state.settings.server.port
    )
    .parse()
    .map_err(|e| miette::miette!("bad listen addr: {e}"))?;

    // Authorization API on its own port
    let authz_port = state.settings.authz_port()?;
    let authz_addr: SocketAddr = format!("{}:{}", state.settings.server.host, authz_port)
        .parse()
        .map_err(|e| miette::miette!("bad authz addr: {e}"))?;
    let authz_router = crate::authz::web::router(authz).layer(TraceLayer::new_for_http());
    let authz_listener = tokio::net::TcpListener::bind(authz_addr)
        .await
        .into_diagnostic()?;
    tracing::info!(%authz_addr, "Authorization API listening");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(authz_listener, authz_router).await {
            tracing::error!(error = %e, "Authorization API server failed");
        }
    });

    let router = router(state);
    tracing::info!(%public_addr, "HR API listening");
    let listener = tokio::net::TcpListener::bind(public_addr)
        .await
        .into_diagnostic()?;
    axum::serve(listener, router).await.into_diagnostic()?;
    Ok(())
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

// ---------- companies ----------

#[derive(Debug, Deserialize)]
struct CompanyInput {
    #[serde(default)]
    name: String,
}

async fn list_companies(State(state): State<AppState>) -> Result<Json<Value>, OrgError> {
    let companies = state.hr.list_companies().await?;
    Ok(Json(json!({ "companies": companies })))
}

async fn create_company(
    State(state): State<AppState>,
    Json(input): Json<CompanyInput>,
) -> Result<impl IntoResponse, OrgError> {
    let company = state.hr.create_company(&input.name).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Company created successfully", "company": company })),
    ))
}

async fn get_company(
    State(state): State<AppState>,
    Path(id): Path<CompanyId>,
) -> Result<Json<Value>, OrgError> {
    let company = state.hr.get_company(id).await?;
    Ok(Json(json!({ "company": company })))
}

async fn company_users(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<CompanyId>,
) -> Result<Json<Value>, OrgError> {
    let users = state.hr.company_users(&actor, id).await?;
    Ok(Json(json!({ "users": users })))
}

// ---------- users ----------

async fn create_user(
    State(state): State<AppState>,
    Json(input): Json<NewUser>,
) -> Result<impl IntoResponse, OrgError> {
    let user = state.hr.create_user(input).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "User created successfully", "user": user.sensitive_profile() })),
    ))
}

async fn list_users(
    State(state): State<AppState>,
    Actor(actor): Actor,
) -> Result<Json<Value>, OrgError> {
    let users = state.hr.list_users(&actor).await?;
    Ok(Json(json!({ "users": users })))
}

async fn get_user(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<UserId>,
) -> Result<Json<Value>, OrgError> {
    let user = state.hr.get_user(&actor, id).await?;
    Ok(Json(json!({ "user": user })))
}

async fn update_user(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<UserId>,
    Json(update): Json<ProfileUpdate>,
) -> Result<Json<Value>, OrgError> {
    let user = state.hr.update_profile(&actor, id, update).await?;
    Ok(Json(json!({ "message": "Profile updated successfully", "user": user })))
}

#[derive(Debug, Deserialize)]
struct RoleInput {
    role: UserRole,
}

async fn change_role(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<UserId>,
    Json(input): Json<RoleInput>,
) -> Result<Json<Value>, OrgError> {
    let user = state.hr.change_role(&actor, id, input.role).await?;
    Ok(Json(json!({ "user": user.sensitive_profile() })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManagerInput {
    manager_id: Option<UserId>,
}

async fn change_manager(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<UserId>,
    Json(input): Json<ManagerInput>,
) -> Result<Json<Value>, OrgError> {
    let user = state.hr.change_manager(&actor, id, input.manager_id).await?;
    Ok(Json(json!({ "user": user.sensitive_profile() })))
}

async fn direct_reports(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<UserId>,
) -> Result<Json<Value>, OrgError> {
    let reports = state.hr.reports(&actor, id, false).await?;
    Ok(Json(json!({ "reports": reports })))
}

async fn all_reports(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<UserId>,
) -> Result<Json<Value>, OrgError> {
    let reports = state.hr.reports(&actor, id, true).await?;
    Ok(Json(json!({ "reports": reports })))
}

// ---------- time-off requests ----------

async fn list_requests(
    State(state): State<AppState>,
    Actor(actor): Actor,
) -> Result<Json<Value>, OrgError> {
    let requests = state.hr.list_requests(&actor).await?;
    Ok(Json(json!({ "requests": requests })))
}

async fn my_requests(
    State(state): State<AppState>,
    Actor(actor): Actor,
) -> Result<Json<Value>, OrgError> {
    let requests = state.hr.my_requests(&actor).await?;
    Ok(Json(json!({ "requests": requests })))
}

async fn pending_requests(
    State(state): State<AppState>,
    Actor(actor): Actor,
) -> Result<Json<Value>, OrgError> {
    let requests = state.hr.pending_requests(&actor).await?;
    Ok(Json(json!({ "requests": requests })))
}

async fn create_request(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Json(input): Json<RequestInput>,
) -> Result<impl IntoResponse, OrgError> {
    let request = state.hr.create_request(&actor, input).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Time-off request submitted successfully",
            "request": request
        })),
    ))
}

async fn get_request(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<RequestId>,
) -> Result<Json<Value>, OrgError> {
    let request = state.hr.get_request(&actor, id).await?;
    Ok(Json(json!({ "request": request })))
}

async fn approve_request(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<RequestId>,
) -> Result<Json<Value>, OrgError> {
    let request = state.hr.decide_request(&actor, id, Decision::Approve).await?;
    Ok(Json(json!({
        "message": "Time-off request approved successfully",
        "request": request
    })))
}

async fn reject_request(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<RequestId>,
) -> Result<Json<Value>, OrgError> {
    let request = state.hr.decide_request(&actor, id, Decision::Reject).await?;
    Ok(Json(json!({
        "message": "Time-off request rejected successfully",
        "request": request
    })))
}
