//! HTTP surface of the dispatch service.

use crate::config::StoreBackend;
use crate::dispatch::DispatchOrchestrator;
use crate::error::{DispatchError, DispatchResult};
use crate::models::emergency::{EmergencyRequest, NewEmergencyRequest, StatusChangeRequest};
use crate::models::user::Role;
use axum::async_trait;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Path, Request, State};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderName, HeaderValue, Method, StatusCode};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

pub mod auth;

pub use auth::AuthUser;

pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const DEFAULT_SEARCH_RADIUS_METERS: u32 = 5000;

const STATUS_UPDATERS: &[Role] = &[Role::Hospital, Role::Admin, Role::Ambulance];

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<DispatchOrchestrator>,
    pub jwt_secret: Arc<str>,
    pub store_backend: StoreBackend,
}

/// `Json` whose rejections use the service's error body.
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = DispatchError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => Err(DispatchError::Validation(rejection_message(&rejection))),
        }
    }
}

fn rejection_message(rejection: &JsonRejection) -> String {
    format!("Invalid request body: {}", rejection.body_text())
}

#[derive(Debug, Deserialize)]
pub struct NearbyHospitalsBody {
    pub address: String,
    #[serde(default)]
    pub radius: Option<u32>,
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "store": state.store_backend.as_str(),
    }))
}

async fn create_emergency(
    State(state): State<AppState>,
    user: AuthUser,
    ApiJson(body): ApiJson<NewEmergencyRequest>,
) -> DispatchResult<(StatusCode, Json<EmergencyRequest>)> {
    let record = state.orchestrator.create(body, user.user_id).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn get_emergency(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> DispatchResult<Json<EmergencyRequest>> {
    let record = state.orchestrator.get(&id, user.user_id, user.role).await?;
    Ok(Json(record))
}

async fn update_emergency_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<StatusChangeRequest>,
) -> DispatchResult<Json<EmergencyRequest>> {
    user.require_role(STATUS_UPDATERS)?;
    let record = state.orchestrator.update_status(&id, body).await?;
    Ok(Json(record))
}

async fn nearby_hospitals(
    State(state): State<AppState>,
    _user: AuthUser,
    ApiJson(body): ApiJson<NearbyHospitalsBody>,
) -> DispatchResult<Json<Value>> {
    let radius = body.radius.unwrap_or(DEFAULT_SEARCH_RADIUS_METERS);
    let hospitals = state.orchestrator.nearby_hospitals(&body.address, radius).await?;
    Ok(Json(json!({ "hospitals": hospitals })))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE]);

    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin '{}'", origin);
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}

pub fn router(state: AppState, cors_origins: &[String]) -> Router {
    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    Router::new()
        .route("/health", get(health))
        .route("/emergency", post(create_emergency))
        .route("/emergency/nearby-hospitals", post(nearby_hospitals))
        .route("/emergency/:id", get(get_emergency))
        .route("/emergency/:id/status", patch(update_emergency_status))
        .with_state(state)
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
        .layer(cors_layer(cors_origins))
}
