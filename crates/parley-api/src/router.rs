use axum::{
    Json, Router,
    extract::State,
    http::Uri,
    middleware,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use parley_types::api::{Envelope, HealthResponse};

use crate::channel::channel_upgrade;
use crate::error::{ApiError, ApiResult};
use crate::middleware::require_auth;
use crate::state::AppState;
use crate::{groups, messages};

pub fn build_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route(
            "/groups",
            post(groups::create_group)
                .put(groups::rename_group)
                .delete(groups::delete_group),
        )
        .route("/groups/public", get(groups::list_public_groups))
        .route("/groups/private", get(groups::list_private_groups))
        .route("/groups/byid", get(groups::get_group))
        .route(
            "/groups/members",
            get(groups::list_members)
                .post(groups::add_member)
                .delete(groups::remove_member),
        )
        .route(
            "/messages",
            get(messages::list_messages)
                .post(messages::add_message)
                .put(messages::edit_message)
                .delete(messages::delete_message),
        )
        .route("/messages/byid", get(messages::get_message))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state.clone());

    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/channel", get(channel_upgrade))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .fallback(not_found)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn health(State(state): State<AppState>) -> ApiResult<HealthResponse> {
    Ok(Json(Envelope::ok(HealthResponse {
        status: "ok".to_string(),
        channels: state.dispatcher.channel_count().await,
    })))
}

async fn not_found(uri: Uri) -> ApiError {
    ApiError::not_found(format!("No route for {}", uri.path()))
}
