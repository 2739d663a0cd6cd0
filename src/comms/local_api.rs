use anyhow::Result;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequestParts, Path, State};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::{AuthError, StoreError};
use crate::security::auth::bearer_token;
use crate::security::{AuditLogger, Principal, TokenVerifier};
use crate::store::{SecretStore, TotpCode};

type SharedState = Arc<AppState>;

const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Clone)]
pub struct AppState {
    pub store: SecretStore,
    pub verifier: TokenVerifier,
    pub audit: AuditLogger,
}

impl AppState {
    pub fn new(store: SecretStore, verifier: TokenVerifier) -> Self {
        Self {
            store,
            verifier,
            audit: AuditLogger::new(),
        }
    }
}

#[derive(Deserialize)]
pub struct CreateTotpRequest {
    pub name: String,
    pub secret: String,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Failures a handler can answer with.
#[derive(Debug)]
pub enum ApiError {
    Auth(AuthError),
    Store(StoreError),
    Body(JsonRejection),
    NotFound,
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Body(rejection)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Auth(e) if e.is_upstream_failure() => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Auth(_) => StatusCode::UNAUTHORIZED,
            ApiError::Store(StoreError::InvalidName | StoreError::InvalidSecretFormat) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Store(StoreError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Store(StoreError::ReadFailed(_) | StoreError::WriteFailed(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::Body(rejection) => rejection.status(),
            ApiError::NotFound => StatusCode::NOT_FOUND,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Auth(AuthError::KeySetUnavailable(_)) => {
                "Failed to fetch authentication keys".to_string()
            }
            ApiError::Auth(e) => e.to_string(),
            ApiError::Store(StoreError::ReadFailed(_)) => "Error retrieving TOTP".to_string(),
            ApiError::Store(StoreError::WriteFailed(_)) => "Error creating TOTP".to_string(),
            ApiError::Store(StoreError::Unavailable(_)) => {
                "The TOTP service is currently unavailable".to_string()
            }
            ApiError::Store(e) => e.to_string(),
            ApiError::Body(rejection) => rejection.body_text(),
            ApiError::NotFound => "TOTP not found".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(ErrorResponse {
            error: self.message(),
        });
        if status == StatusCode::UNAUTHORIZED {
            (status, [(header::WWW_AUTHENTICATE, "Bearer")], body).into_response()
        } else {
            (status, body).into_response()
        }
    }
}

fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// Principal behind the request's bearer token.
#[derive(Debug, Clone)]
pub struct Authenticated {
    pub principal: Principal,
    pub request_id: String,
}

impl FromRequestParts<SharedState> for Authenticated {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &SharedState) -> Result<Self, Self::Rejection> {
        let request_id = request_id(&parts.headers);

        let verified = match bearer_token(&parts.headers) {
            Ok(token) => state.verifier.verify(token).await,
            Err(e) => Err(e),
        };

        match verified {
            Ok(principal) => {
                state.audit.auth_success(&principal, &request_id);
                Ok(Authenticated {
                    principal,
                    request_id,
                })
            }
            Err(e) => {
                state.audit.auth_failure(&request_id, &e.to_string());
                Err(ApiError::Auth(e))
            }
        }
    }
}

impl AppState {
    fn store_failure(&self, auth: &Authenticated, err: StoreError) -> ApiError {
        if err.is_client_error() {
            self.audit
                .secret_rejected(&auth.principal, &auth.request_id, &err.to_string());
        } else {
            error!(principal = %auth.principal, request_id = %auth.request_id, error = %err, "secret store failure");
            self.audit
                .internal_error(Some(&auth.principal), &auth.request_id, &err.to_string());
        }
        ApiError::Store(err)
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn list_totps(
    State(state): State<SharedState>,
    auth: Authenticated,
) -> Result<Json<Vec<TotpCode>>, ApiError> {
    let codes = state
        .store
        .list_and_read_all(&auth.principal)
        .await
        .map_err(|e| state.store_failure(&auth, e))?;
    debug!(principal = %auth.principal, count = codes.len(), "listed TOTPs");
    Ok(Json(codes))
}

async fn get_totp(
    State(state): State<SharedState>,
    auth: Authenticated,
    Path(name): Path<String>,
) -> Result<Json<TotpCode>, ApiError> {
    state
        .store
        .read_one(&auth.principal, &name)
        .await
        .map_err(|e| state.store_failure(&auth, e))?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

async fn create_totp(
    State(state): State<SharedState>,
    auth: Authenticated,
    payload: Result<Json<CreateTotpRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    state
        .store
        .write(&auth.principal, &req.name, &req.secret)
        .await
        .map_err(|e| state.store_failure(&auth, e))?;

    state
        .audit
        .secret_written(&auth.principal, &auth.request_id, req.name.trim());
    Ok((
        StatusCode::CREATED,
        Json(json!({"message": "TOTP created successfully"})),
    ))
}

pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/totp", get(list_totps).post(create_totp))
        .route("/totp/{name}", get(get_totp))
        .with_state(state)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

pub async fn serve(state: AppState, port: u16) -> Result<()> {
    let app = create_router(Arc::new(state));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);
    axum::serve(listener, app).into_future().await?;
    Ok(())
}
