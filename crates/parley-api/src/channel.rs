use axum::{
    extract::{Query, State, WebSocketUpgrade},
    response::Response,
};
use serde::Deserialize;
use tracing::info;

use parley_gateway::connection;

use crate::error::ApiError;
use crate::middleware::verify_token;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ChannelQuery {
    pub token: Option<String>,
}

/// Browsers cannot set headers on a WebSocket handshake, so the identity token
/// rides in the query string and is verified before the upgrade.
pub async fn channel_upgrade(
    State(state): State<AppState>,
    Query(query): Query<ChannelQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let token = query
        .token
        .ok_or_else(|| ApiError::unauthorized("Missing token"))?;
    let claims = verify_token(&token, &state.jwt_secret)?;

    info!("Channel upgrade for {}", claims.sub);
    let dispatcher = state.dispatcher.clone();
    let engine = state.engine.clone();
    Ok(ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, dispatcher, engine, claims.sub)
    }))
}
