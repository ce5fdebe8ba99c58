/// API request handlers

use super::responses::*;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::{debug, error, warn};
use xpanel_common::{DataQuota, PanelError, Timestamp, UserId};
use xpanel_core::{Dialect, NewUser, Panel, SyncStatus, UserUpdate};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub panel: Arc<Panel>,
}

/// 202 when the change is stored but the engine did not pick it up
fn mutation_status<T>(response: &MutationResponse<T>, applied: StatusCode) -> StatusCode {
    if response.synced {
        applied
    } else {
        StatusCode::ACCEPTED
    }
}

fn parse_user_id(raw: &str) -> Result<UserId, AppError> {
    UserId::parse(raw).map_err(|e| AppError::bad_request(e.to_string()))
}

/// Handler for GET /api/users
pub async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<ListUsersQuery>,
) -> Result<Json<UserListResponse>, AppError> {
    debug!("API: GET /api/users");

    let now = Timestamp::now();
    let users: Vec<UserResponse> = state
        .panel
        .list_users(query.active)
        .await?
        .iter()
        .map(|u| UserResponse::from_user(u, now))
        .collect();

    let total = users.len();
    Ok(Json(UserListResponse { users, total }))
}

/// Handler for POST /api/users
pub async fn create_user(
    State(state): State<AppState>,
    Json(req): Json<CreateUserRequest>,
) -> Result<Response, AppError> {
    debug!("API: POST /api/users");

    let new = NewUser {
        name: req.name,
        data_limit: DataQuota::new(req.data_limit),
        expires_at: req.expires_at.map(Timestamp::from_secs),
        is_active: req.is_active,
    };

    let synced = state.panel.create_user(new).await?;
    let body = MutationResponse::from_synced(synced, |u| {
        UserResponse::from_user(&u, Timestamp::now())
    });
    Ok((mutation_status(&body, StatusCode::CREATED), Json(body)).into_response())
}

/// Handler for GET /api/users/:id
pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<UserResponse>, AppError> {
    debug!("API: GET /api/users/{}", id);

    let user = state.panel.get_user(parse_user_id(&id)?).await?;
    Ok(Json(UserResponse::from_user(&user, Timestamp::now())))
}

/// Handler for PUT /api/users/:id
pub async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateUserRequest>,
) -> Result<Response, AppError> {
    debug!("API: PUT /api/users/{}", id);

    let expires_at = if req.clear_expiry {
        Some(None)
    } else {
        req.expires_at.map(|secs| Some(Timestamp::from_secs(secs)))
    };
    let update = UserUpdate {
        name: req.name,
        data_limit: req.data_limit.map(DataQuota::new),
        expires_at,
        is_active: req.is_active,
    };

    let synced = state.panel.update_user(parse_user_id(&id)?, update).await?;
    let body = MutationResponse::from_synced(synced, |u| {
        UserResponse::from_user(&u, Timestamp::now())
    });
    Ok((mutation_status(&body, StatusCode::OK), Json(body)).into_response())
}

/// Handler for DELETE /api/users/:id
pub async fn delete_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    debug!("API: DELETE /api/users/{}", id);

    let user_id = parse_user_id(&id)?;
    let synced = state.panel.delete_user(user_id).await?;
    let body = MutationResponse::from_synced(synced, |()| user_id.to_string());
    Ok((mutation_status(&body, StatusCode::OK), Json(body)).into_response())
}

/// Handler for POST /api/users/:id/reset-usage
pub async fn reset_user_usage(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<UserResponse>, AppError> {
    debug!("API: POST /api/users/{}/reset-usage", id);

    let user = state.panel.reset_user_usage(parse_user_id(&id)?).await?;
    Ok(Json(UserResponse::from_user(&user, Timestamp::now())))
}

/// Handler for GET /api/users/stats
pub async fn user_stats(
    State(state): State<AppState>,
) -> Result<Json<xpanel_core::UserStats>, AppError> {
    debug!("API: GET /api/users/stats");

    Ok(Json(state.panel.user_stats().await?))
}

/// Handler for GET /api/subscriptions/:id
pub async fn get_subscription(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<SubscriptionQuery>,
) -> Result<Json<SubscriptionResponse>, AppError> {
    debug!("API: GET /api/subscriptions/{}", id);

    let user = state.panel.get_user(parse_user_id(&id)?).await?;
    let links = state
        .panel
        .subscription(user.id, query.address.as_deref())
        .await?;

    Ok(Json(SubscriptionResponse {
        user_id: user.id.to_string(),
        name: user.name,
        links: links.links,
        warnings: links.warnings,
    }))
}

/// Handler for GET /api/subscriptions/:id/:dialect
///
/// Plain-text link for clients that import straight from a URL.
pub async fn get_subscription_link(
    State(state): State<AppState>,
    Path((id, dialect)): Path<(String, String)>,
    Query(query): Query<SubscriptionQuery>,
) -> Result<String, AppError> {
    debug!("API: GET /api/subscriptions/{}/{}", id, dialect);

    let dialect: Dialect = dialect.parse()?;
    let link = state
        .panel
        .link(parse_user_id(&id)?, query.address.as_deref(), dialect)
        .await?;
    if let Some(warning) = &link.warning {
        warn!("Link for {} served with warning: {}", id, warning);
    }
    Ok(link.uri)
}

/// Handler for GET /api/credentials
pub async fn get_credentials(
    State(state): State<AppState>,
) -> Result<Json<CredentialView>, AppError> {
    debug!("API: GET /api/credentials");

    let credentials = state.panel.credentials().await?;
    Ok(Json(CredentialView::new(
        &credentials,
        state.panel.config().rotation_interval(),
    )))
}

/// Handler for POST /api/credentials/rotate
pub async fn rotate_credentials(State(state): State<AppState>) -> Result<Response, AppError> {
    debug!("API: POST /api/credentials/rotate");

    let interval = state.panel.config().rotation_interval();
    let synced = state.panel.rotate_now().await?;
    let body = MutationResponse::from_synced(synced, |c| CredentialView::new(&c, interval));
    Ok((mutation_status(&body, StatusCode::OK), Json(body)).into_response())
}

/// Handler for PUT /api/credentials/destination
pub async fn set_destination(
    State(state): State<AppState>,
    Json(req): Json<DestinationRequest>,
) -> Result<Response, AppError> {
    debug!("API: PUT /api/credentials/destination");

    let interval = state.panel.config().rotation_interval();
    let synced = state.panel.set_destination(&req.dest).await?;
    let body = MutationResponse::from_synced(synced, |c| CredentialView::new(&c, interval));
    Ok((mutation_status(&body, StatusCode::OK), Json(body)).into_response())
}

/// Handler for PUT /api/credentials/server-names
pub async fn set_server_names(
    State(state): State<AppState>,
    Json(req): Json<ServerNamesRequest>,
) -> Result<Response, AppError> {
    debug!("API: PUT /api/credentials/server-names");

    let interval = state.panel.config().rotation_interval();
    let synced = state.panel.set_server_names(req.server_names).await?;
    let body = MutationResponse::from_synced(synced, |c| CredentialView::new(&c, interval));
    Ok((mutation_status(&body, StatusCode::OK), Json(body)).into_response())
}

/// Handler for PUT /api/credentials/address
pub async fn set_address(
    State(state): State<AppState>,
    Json(req): Json<AddressRequest>,
) -> Result<Json<CredentialView>, AppError> {
    debug!("API: PUT /api/credentials/address");

    let credentials = state.panel.set_external_address(req.address).await?;
    Ok(Json(CredentialView::new(
        &credentials,
        state.panel.config().rotation_interval(),
    )))
}

/// Handler for GET /api/config
pub async fn get_config(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    debug!("API: GET /api/config");

    Ok(Json(state.panel.render().await?.into_value()))
}

/// Handler for POST /api/sync
pub async fn resync(State(state): State<AppState>) -> Response {
    debug!("API: POST /api/sync");

    match state.panel.resync().await {
        SyncStatus::Applied(path) => (
            StatusCode::OK,
            Json(serde_json::json!({ "synced": true, "reload_path": path })),
        )
            .into_response(),
        SyncStatus::Stale(e) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "synced": false, "sync_error": e.to_string() })),
        )
            .into_response(),
    }
}

/// Handler for GET /api/status
pub async fn get_status(State(state): State<AppState>) -> Result<Json<StatusResponse>, AppError> {
    debug!("API: GET /api/status");

    Ok(Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        last_sync: state.panel.last_sync(),
        users: state.panel.user_stats().await?,
    }))
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    debug!("API: GET /health");
    (StatusCode::OK, "OK")
}

/// Application error type
#[derive(Debug)]
pub struct AppError {
    message: String,
    status_code: StatusCode,
}

impl AppError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code: StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code: StatusCode::NOT_FOUND,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code: StatusCode::BAD_REQUEST,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        self.status_code
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status_code.is_server_error() {
            error!("API Error: {}", self.message);
        } else {
            debug!("API Error: {}", self.message);
        }

        let body = Json(ErrorResponse::new(
            self.message,
            self.status_code.as_u16(),
        ));

        (self.status_code, body).into_response()
    }
}

impl From<PanelError> for AppError {
    fn from(err: PanelError) -> Self {
        let status_code = match &err {
            PanelError::NotFound(_) => return AppError::not_found(err.to_string()),
            PanelError::InvalidInput(_) => return AppError::bad_request(err.to_string()),
            PanelError::Conflict(_) => StatusCode::CONFLICT,
            PanelError::EngineUnreachable(_) | PanelError::ReloadFailure { .. } => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            message: err.to_string(),
            status_code,
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}
