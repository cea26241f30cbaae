use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tracing::{debug, instrument};

use super::dto::{ChangesQuery, DashboardView, VisibilityRequest};
use crate::{auth::AuthUser, state::AppState};

// --- public routers ---

pub fn read_routes() -> Router<AppState> {
    Router::new()
        .route("/dashboard", get(get_dashboard).delete(close_dashboard))
        .route("/dashboard/changes", get(wait_for_changes))
}

pub fn event_routes() -> Router<AppState> {
    Router::new()
        .route("/dashboard/refresh", post(force_refresh))
        .route("/dashboard/focus", post(window_focused))
        .route("/dashboard/visibility", post(visibility_changed))
}

// --- handlers ---

/// Current snapshot; mounts the caller's session on first use.
#[instrument(skip(state))]
pub async fn get_dashboard(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Json<DashboardView> {
    let session = state.sessions.open(user_id).await;
    let snapshot = session.get_dashboard_state();
    Json(DashboardView {
        user_id,
        state: (*snapshot).clone(),
    })
}

/// Long-poll for the first snapshot newer than `after`.
#[instrument(skip(state))]
pub async fn wait_for_changes(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(q): Query<ChangesQuery>,
) -> Result<Response, (StatusCode, String)> {
    let session = state.sessions.open(user_id).await;
    let handle = session.dashboard();
    let ceiling = state.sessions.config().long_poll;
    match tokio::time::timeout(ceiling, handle.wait_newer_than(q.after)).await {
        Ok(Some(snapshot)) => Ok(Json(DashboardView {
            user_id,
            state: (*snapshot).clone(),
        })
        .into_response()),
        Ok(None) => Err((StatusCode::GONE, "dashboard session closed".into())),
        Err(_) => {
            debug!(%user_id, after = q.after, "long-poll ceiling reached");
            Ok(StatusCode::NO_CONTENT.into_response())
        }
    }
}

#[instrument(skip(state))]
pub async fn force_refresh(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> StatusCode {
    state.sessions.open(user_id).await.force_refresh();
    StatusCode::ACCEPTED
}

#[instrument(skip(state))]
pub async fn window_focused(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> StatusCode {
    state.sessions.open(user_id).await.window_focused();
    StatusCode::ACCEPTED
}

#[instrument(skip(state))]
pub async fn visibility_changed(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(req): Json<VisibilityRequest>,
) -> StatusCode {
    state
        .sessions
        .open(user_id)
        .await
        .visibility_changed(req.visible);
    StatusCode::ACCEPTED
}

#[instrument(skip(state))]
pub async fn close_dashboard(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> StatusCode {
    if !state.sessions.close(user_id).await {
        debug!(%user_id, "no dashboard session to close");
    }
    StatusCode::NO_CONTENT
}
