use axum::{
    Extension, Json,
    extract::{
        Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
};

use parley_core::{MessageEdit, NewMessage};
use parley_types::Message;
use parley_types::api::{
    Claims, DeletedMessages, EditMessageRequest, Envelope, MessageIdQuery, MessagesQuery,
    SendMessageRequest,
};
use parley_types::events::RelayEvent;

use crate::error::{ApiError, ApiResult, blocking};
use crate::state::AppState;

/// One page of history, newest first. `skip` counts messages already loaded.
pub async fn list_messages(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    query: Result<Query<MessagesQuery>, QueryRejection>,
) -> ApiResult<Vec<Message>> {
    let Query(query) = query?;
    let page_size = query.page_size.unwrap_or(state.page_size);
    let messages = blocking(&state.engine, move |e| {
        e.list_messages(query.group_id, claims.sub, query.skip, page_size)
    })
    .await?;
    Ok(Json(Envelope::ok(messages)))
}

pub async fn get_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    query: Result<Query<MessageIdQuery>, QueryRejection>,
) -> ApiResult<Message> {
    let Query(query) = query?;
    let message = blocking(&state.engine, move |e| e.get_message(query.message_id, claims.sub)).await?;
    Ok(Json(Envelope::ok(message)))
}

pub async fn add_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Envelope<Message>>), ApiError> {
    let Json(req) = payload?;
    let new = NewMessage {
        group_id: req.group_id,
        author_user_id: claims.sub,
        text: req.text,
        reply_to_id: req.reply_to_id,
        attachment_ref: req.attachment_ref,
    };
    let message = blocking(&state.engine, move |e| e.add_message(new)).await?;

    state
        .publish(message.group_id, RelayEvent::MessageAdded(message.clone()), claims.sub)
        .await;
    Ok((StatusCode::CREATED, Json(Envelope::ok(message))))
}

pub async fn edit_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<EditMessageRequest>, JsonRejection>,
) -> ApiResult<Message> {
    let Json(req) = payload?;
    let edit = MessageEdit {
        message_id: req.message_id,
        caller_user_id: claims.sub,
        text: req.text,
        reply_to_id: req.reply_to_id,
        attachment_ref: req.attachment_ref,
    };
    let message = blocking(&state.engine, move |e| e.edit_message(edit)).await?;

    state
        .publish(message.group_id, RelayEvent::MessageEdited(message.clone()), claims.sub)
        .await;
    Ok(Json(Envelope::ok(message)))
}

pub async fn delete_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    query: Result<Query<MessageIdQuery>, QueryRejection>,
) -> ApiResult<DeletedMessages> {
    let Query(query) = query?;
    let deleted = blocking(&state.engine, move |e| e.delete_message(query.message_id, claims.sub)).await?;

    for message_id in std::iter::once(deleted.message_id).chain(deleted.reply_ids.iter().copied()) {
        state
            .publish(deleted.group_id, RelayEvent::MessageDeleted { message_id }, claims.sub)
            .await;
    }
    Ok(Json(Envelope::ok(deleted)))
}
