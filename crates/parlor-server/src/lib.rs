use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use parlor_db::Database;
use parlor_gateway::auth::Authenticator;
use parlor_gateway::connection;
use parlor_gateway::router::MessageRouter;
use parlor_types::PresenceRecord;

#[derive(Clone)]
pub struct AppState {
    pub router: MessageRouter,
    pub db: Arc<Database>,
    pub auth: Arc<dyn Authenticator>,
}

/// Assemble the service: the WebSocket gateway plus a small REST surface.
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/gateway", get(gateway_upgrade))
        .route("/users/{identity}/last-seen", get(last_seen))
        .route("/healthz", get(healthz))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

#[derive(Deserialize)]
struct GatewayParams {
    token: Option<String>,
}

/// Authentication happens before the upgrade: a bad token gets a plain
/// 401 response and no socket ever exists for it.
async fn gateway_upgrade(
    State(state): State<AppState>,
    Query(params): Query<GatewayParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let token = params.token.unwrap_or_default();
    match state.auth.authenticate(&token) {
        Ok(identity) => ws
            .on_upgrade(move |socket| {
                connection::handle_socket(socket, state.router.clone(), identity)
            })
            .into_response(),
        Err(err) => {
            warn!("Gateway upgrade refused: {err}");
            StatusCode::UNAUTHORIZED.into_response()
        }
    }
}

async fn last_seen(
    State(state): State<AppState>,
    Path(identity): Path<String>,
) -> Result<Json<PresenceRecord>, StatusCode> {
    let db = state.db.clone();
    let lookup = identity.clone();
    let stamp = tokio::task::spawn_blocking(move || db.last_seen(&lookup))
        .await
        .map_err(|err| {
            error!("Last-seen task failed: {err}");
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|err| {
            error!("Last-seen query failed: {err:#}");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    match stamp {
        Some(last_seen) => Ok(Json(PresenceRecord {
            identity,
            last_seen,
        })),
        None => Err(StatusCode::NOT_FOUND),
    }
}

async fn healthz() -> &'static str {
    "ok"
}
