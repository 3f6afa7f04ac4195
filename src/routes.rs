//! src/routes.rs
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, RawQuery, State},
    http::{header::AUTHORIZATION, HeaderMap, Request, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    auth::{AuthError, Authenticator, Session},
    config::ConfigError,
    dashboard::{Dashboard, DashboardPage},
    error::AppError,
    lead::{Lead, NewLead, StatusUpdateRequest, VISA_OPTIONS},
    view::ListQuery,
};

/// Shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub auth:      Arc<dyn Authenticator>,
    /// `None` when `SHEET_URL` is not configured.
    pub dashboard: Option<Arc<Dashboard>>,
}

impl AppState {
    fn dashboard(&self) -> Result<&Arc<Dashboard>, AppError> {
        self.dashboard
            .as_ref()
            .ok_or(AppError::Configuration(ConfigError::MissingSheetUrl))
    }
}

pub fn router(state: AppState) -> Router {
    let protected: Router<AppState> = Router::new()
        .route("/api/get-leads", get(get_leads))
        .route("/api/leads",     get(list_leads))
        .route("/api/edit-lead", post(edit_lead))
        .route("/api/logout",    post(logout))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_session));

    Router::new()
        .route("/api/submit-form",  post(submit_form))
        .route("/api/login",        post(login))
        .route("/api/session",      get(session))
        .route("/api/visa-options", get(visa_options))
        .merge(protected)
        .with_state(state)
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

async fn require_session<B>(
    State(state): State<AppState>,
    request: Request<B>,
    next: Next<B>,
) -> Result<Response, AppError> {
    let token = bearer(request.headers()).ok_or(AuthError::MissingToken)?;
    if !state.auth.is_authenticated(token) {
        return Err(AuthError::InvalidToken.into());
    }
    Ok(next.run(request).await)
}

// ── incoming JSON payloads ─────────────────────────────────────────────
#[derive(Deserialize)]
pub struct Credentials {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

// ── POST /api/submit-form ──────────────────────────────────────────────
pub async fn submit_form(
    State(state): State<AppState>,
    body: Result<Json<NewLead>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let dashboard = state.dashboard()?;
    let Json(form) = body?;
    form.validate()?;

    let reply = dashboard.gateway().submit(&form).await?;
    Ok(Json(reply))
}

// ── POST /api/login ────────────────────────────────────────────────────
pub async fn login(
    State(state): State<AppState>,
    body: Result<Json<Credentials>, JsonRejection>,
) -> Result<Json<Session>, AppError> {
    let Json(credentials) = body?;
    let session = state.auth.login(&credentials.username, &credentials.password)?;
    Ok(Json(session))
}

// ── GET /api/session ───────────────────────────────────────────────────
pub async fn session(State(state): State<AppState>, headers: HeaderMap) -> Json<Value> {
    let authenticated = bearer(&headers).map_or(false, |token| state.auth.is_authenticated(token));
    Json(json!({ "authenticated": authenticated }))
}

// ── POST /api/logout ───────────────────────────────────────────────────
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> StatusCode {
    if let Some(token) = bearer(&headers) {
        state.auth.logout(token);
    }
    StatusCode::NO_CONTENT
}

// ── GET /api/get-leads ─────────────────────────────────────────────────
pub async fn get_leads(State(state): State<AppState>) -> Result<Json<Vec<Lead>>, AppError> {
    let leads = state.dashboard()?.reload().await?;
    Ok(Json(leads))
}

// ── GET /api/leads?page=&status=&search= ───────────────────────────────
pub async fn list_leads(
    State(state): State<AppState>,
    RawQuery(raw): RawQuery,
) -> Result<Json<DashboardPage>, AppError> {
    let dashboard = state.dashboard()?;
    let query     = ListQuery::from_query_str(raw.as_deref().unwrap_or_default())?;

    Ok(Json(dashboard.view(&query).await?))
}

// ── POST /api/edit-lead ────────────────────────────────────────────────
pub async fn edit_lead(
    State(state): State<AppState>,
    body: Result<Json<StatusUpdateRequest>, JsonRejection>,
) -> Result<Json<Lead>, AppError> {
    let dashboard = state.dashboard()?;
    let Json(request) = body?;
    let update = request.validate()?;

    Ok(Json(dashboard.update_status(update).await?))
}

// ── GET /api/visa-options ──────────────────────────────────────────────
pub async fn visa_options() -> Json<[&'static str; 4]> {
    Json(VISA_OPTIONS)
}
