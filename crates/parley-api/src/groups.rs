use axum::{
    Extension, Json,
    extract::{
        Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
};
use tracing::info;

use parley_types::api::{
    Claims, CreateGroupRequest, DeletedGroup, Envelope, GroupIdQuery, MemberQuery,
    PrivateGroupsQuery, RenameGroupRequest,
};
use parley_types::events::RelayEvent;
use parley_types::{ErrorKind, Group, Membership};

use crate::error::{ApiError, ApiResult, blocking};
use crate::state::AppState;

pub async fn list_public_groups(
    State(state): State<AppState>,
    Extension(_claims): Extension<Claims>,
) -> ApiResult<Vec<Group>> {
    let groups = blocking(&state.engine, |e| e.list_public_groups()).await?;
    Ok(Json(Envelope::ok(groups)))
}

/// Private groups can only be listed for the caller themselves.
pub async fn list_private_groups(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    query: Result<Query<PrivateGroupsQuery>, QueryRejection>,
) -> ApiResult<Vec<Group>> {
    let Query(query) = query?;
    if query.user_id != claims.sub {
        return Err(ApiError::new(
            ErrorKind::Forbidden,
            "Private groups can only be listed for yourself",
        ));
    }
    let groups = blocking(&state.engine, move |e| e.list_private_groups(query.user_id)).await?;
    Ok(Json(Envelope::ok(groups)))
}

pub async fn get_group(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    query: Result<Query<GroupIdQuery>, QueryRejection>,
) -> ApiResult<Group> {
    let Query(query) = query?;
    let group = blocking(&state.engine, move |e| e.authorize_view(query.group_id, claims.sub)).await?;
    Ok(Json(Envelope::ok(group)))
}

pub async fn create_group(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<CreateGroupRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Envelope<Group>>), ApiError> {
    let Json(req) = payload?;
    let group = blocking(&state.engine, move |e| {
        e.create_group(&req.name, req.visibility, claims.sub)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(Envelope::ok(group))))
}

pub async fn rename_group(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<RenameGroupRequest>, JsonRejection>,
) -> ApiResult<Group> {
    let Json(req) = payload?;
    let group = blocking(&state.engine, move |e| {
        e.rename_group(req.group_id, &req.name, claims.sub)
    })
    .await?;
    Ok(Json(Envelope::ok(group)))
}

pub async fn delete_group(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    query: Result<Query<GroupIdQuery>, QueryRejection>,
) -> ApiResult<DeletedGroup> {
    let Query(query) = query?;
    let deleted = blocking(&state.engine, move |e| e.delete_group(query.group_id, claims.sub)).await?;

    state
        .publish(deleted.group_id, RelayEvent::GroupDeleted, claims.sub)
        .await;
    Ok(Json(Envelope::ok(deleted)))
}

pub async fn list_members(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    query: Result<Query<GroupIdQuery>, QueryRejection>,
) -> ApiResult<Vec<Membership>> {
    let Query(query) = query?;
    let members = blocking(&state.engine, move |e| e.list_members(query.group_id, claims.sub)).await?;
    Ok(Json(Envelope::ok(members)))
}

pub async fn add_member(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    query: Result<Query<MemberQuery>, QueryRejection>,
) -> Result<(StatusCode, Json<Envelope<Membership>>), ApiError> {
    let Query(query) = query?;
    let membership = blocking(&state.engine, move |e| {
        e.add_member(query.group_id, query.user_id, claims.sub)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(Envelope::ok(membership))))
}

pub async fn remove_member(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    query: Result<Query<MemberQuery>, QueryRejection>,
) -> ApiResult<MemberQuery> {
    let Query(query) = query?;
    let removed = query.clone();
    blocking(&state.engine, move |e| {
        e.remove_member(removed.group_id, removed.user_id, claims.sub)
    })
    .await?;

    // The removed user may no longer read the group's live events
    let evicted = state.dispatcher.evict_user(query.group_id, query.user_id).await;
    if evicted > 0 {
        info!(
            "Evicted {} connections of {} from group {}",
            evicted, query.user_id, query.group_id
        );
    }
    Ok(Json(Envelope::ok_with_message(query, "member removed")))
}
