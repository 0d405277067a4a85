use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::authz::errors::AuthzError;
use crate::authz::types::{
    Action, CheckRequest, CheckResponse, EntityKind, EntityRef, ExpandRequest, ExpandResponse,
    FactQuery, FlatFact, RoleFact,
};
use crate::authz::Authz;
use crate::model::UserId;

pub fn router(authz: Authz) -> Router {
    Router::new()
        .route("/v1/check", post(handle_check))
        .route("/v1/expand", post(handle_expand))
        .route(
            "/v1/facts",
            get(list_facts).post(add_fact).delete(remove_fact),
        )
        .route("/healthz", get(health))
        .with_state(authz)
}

fn parse_ref(s: &str) -> Result<EntityRef, AuthzError> {
    EntityRef::parse(s).ok_or_else(|| {
        AuthzError::InvalidReference(format!("invalid reference `{s}` (expected \"Kind/id\")"))
    })
}

fn parse_principal(s: &str) -> Result<UserId, AuthzError> {
    let principal = parse_ref(s)?;
    match (principal.kind, principal.numeric_id()) {
        (EntityKind::User, Some(id)) => Ok(id),
        _ => Err(AuthzError::InvalidReference(format!(
            "principal `{s}` must be \"User/<id>\""
        ))),
    }
}

async fn check(authz: &Authz, req: &CheckRequest) -> Result<bool, AuthzError> {
    let actor = parse_principal(&req.principal)?;
    let action: Action = req.action.parse()?;
    let Some(resource) = authz.resolve(&parse_ref(&req.resource)?).await? else {
        return Ok(false);
    };
    Ok(authz.authorize(actor, action, &resource).await)
}

async fn handle_check(
    State(authz): State<Authz>,
    Json(req): Json<CheckRequest>,
) -> impl IntoResponse {
    match check(&authz, &req).await {
        Ok(allowed) => Json(CheckResponse { allowed }).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn expand(authz: &Authz, req: &ExpandRequest) -> Result<Vec<String>, AuthzError> {
    let action: Action = req.action.parse()?;
    let Some(resource) = authz.resolve(&parse_ref(&req.resource)?).await? else {
        return Ok(Vec::new());
    };
    let subjects = authz.evaluator.expand(action, &resource).await?;
    Ok(subjects.iter().map(ToString::to_string).collect())
}

async fn handle_expand(
    State(authz): State<Authz>,
    Json(req): Json<ExpandRequest>,
) -> impl IntoResponse {
    match expand(&authz, &req).await {
        Ok(subjects) => Json(ExpandResponse { subjects }).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn list_facts(
    State(authz): State<Authz>,
    Query(query): Query<FactQuery>,
) -> Result<Json<Vec<FlatFact>>, AuthzError> {
    let pattern = query.to_pattern()?;
    let facts = authz.store.query(&pattern).await?;
    Ok(Json(facts.iter().map(FlatFact::from).collect()))
}

async fn add_fact(
    State(authz): State<Authz>,
    Json(flat): Json<FlatFact>,
) -> Result<StatusCode, AuthzError> {
    let fact = RoleFact::try_from(flat)?;
    tracing::info!(%fact, "fact inserted through API");
    authz.store.insert(&fact).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn remove_fact(
    State(authz): State<Authz>,
    Json(flat): Json<FlatFact>,
) -> Result<StatusCode, AuthzError> {
    let fact = RoleFact::try_from(flat)?;
    tracing::info!(%fact, "fact deleted through API");
    authz.store.delete(&fact).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
