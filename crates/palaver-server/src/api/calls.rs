use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use palaver_shared::{CallId, CallType, GroupId, UserId};
use palaver_store::{CallEvent, GroupCall, GroupCallState, PersonalCall};
use serde::Deserialize;

use super::{page_limit, AppState};
use crate::auth::AuthUser;
use crate::error::ServerError;

#[derive(Deserialize)]
pub struct InviteRequest {
    callee_id: UserId,
    call_type: CallType,
}

#[derive(Deserialize)]
pub struct StartGroupCallRequest {
    call_type: CallType,
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    limit: Option<u32>,
}

// ---------------------------------------------------------------------------
// Personal calls
// ---------------------------------------------------------------------------

pub async fn invite(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(req): Json<InviteRequest>,
) -> Result<(StatusCode, Json<PersonalCall>), ServerError> {
    let call = state
        .calls
        .invite(user.id, req.callee_id, req.call_type)
        .await?;
    Ok((StatusCode::CREATED, Json(call)))
}

pub async fn history(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<PersonalCall>>, ServerError> {
    let limit = page_limit(query.limit, state.config.message_page_limit);
    let db = state.db.lock().await;
    Ok(Json(db.list_calls_for_user(user.id, limit)?))
}

async fn party_call(state: &AppState, user: UserId, id: CallId) -> Result<PersonalCall, ServerError> {
    let db = state.db.lock().await;
    let call = db
        .get_personal_call(id)
        .map_err(ServerError::lookup("Call"))?;
    if !call.is_party(user) {
        return Err(ServerError::Forbidden("You are not part of this call".into()));
    }
    Ok(call)
}

pub async fn show(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<CallId>,
) -> Result<Json<PersonalCall>, ServerError> {
    Ok(Json(party_call(&state, user.id, id).await?))
}

pub async fn events(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<CallId>,
) -> Result<Json<Vec<CallEvent>>, ServerError> {
    party_call(&state, user.id, id).await?;
    let db = state.db.lock().await;
    Ok(Json(db.list_call_events(id)?))
}

pub async fn answer(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<CallId>,
) -> Result<Json<PersonalCall>, ServerError> {
    Ok(Json(state.calls.answer(user.id, id).await?))
}

pub async fn reject(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<CallId>,
) -> Result<Json<PersonalCall>, ServerError> {
    Ok(Json(state.calls.reject(user.id, id).await?))
}

pub async fn cancel(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<CallId>,
) -> Result<Json<PersonalCall>, ServerError> {
    Ok(Json(state.calls.cancel(user.id, id).await?))
}

pub async fn end(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<CallId>,
) -> Result<Json<PersonalCall>, ServerError> {
    Ok(Json(state.calls.end(user.id, id).await?))
}

// ---------------------------------------------------------------------------
// Group calls
// ---------------------------------------------------------------------------

pub async fn start_group(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(group_id): Path<GroupId>,
    Json(req): Json<StartGroupCallRequest>,
) -> Result<(StatusCode, Json<GroupCallState>), ServerError> {
    let call = state
        .calls
        .start_group_call(user.id, group_id, req.call_type)
        .await?;
    Ok((StatusCode::CREATED, Json(call)))
}

pub async fn group_history(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(group_id): Path<GroupId>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<GroupCall>>, ServerError> {
    let limit = page_limit(query.limit, state.config.message_page_limit);
    let db = state.db.lock().await;
    db.get_group(group_id).map_err(ServerError::lookup("Group"))?;
    if !db.is_group_member(group_id, user.id)? {
        return Err(ServerError::Forbidden("You are not a member of this group".into()));
    }
    Ok(Json(db.list_group_calls(group_id, limit)?))
}

pub async fn show_group(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<CallId>,
) -> Result<Json<GroupCallState>, ServerError> {
    let db = state.db.lock().await;
    let call = db
        .get_group_call_state(id)
        .map_err(ServerError::lookup("Call"))?;
    if call.participant(user.id).is_none() && !db.is_group_member(call.call.group_id, user.id)? {
        return Err(ServerError::Forbidden("You are not part of this call".into()));
    }
    Ok(Json(call))
}

pub async fn join_group(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<CallId>,
) -> Result<Json<GroupCallState>, ServerError> {
    Ok(Json(state.calls.join_group_call(user.id, id).await?))
}

pub async fn decline_group(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<CallId>,
) -> Result<Json<GroupCallState>, ServerError> {
    Ok(Json(state.calls.decline_group_call(user.id, id).await?))
}

pub async fn leave_group(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<CallId>,
) -> Result<Json<GroupCallState>, ServerError> {
    Ok(Json(state.calls.leave_group_call(user.id, id).await?))
}

pub async fn end_group(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<CallId>,
) -> Result<Json<GroupCallState>, ServerError> {
    Ok(Json(state.calls.end_group_call(user.id, id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tests::{token, TestApp};
    use serde_json::json;

    #[tokio::test]
    async fn test_personal_call_flow() {
        let app = TestApp::new().await;
        app.user("Alice").await;
        let bob = app.user("Bob").await;
        app.user("Carol").await;

        let (status, call) = app
            .request(
                "POST",
                "/calls",
                Some(&token("Alice")),
                Some(json!({ "callee_id": bob.id, "call_type": "video" })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(call["status"], "ringing");
        let id = call["id"].as_str().unwrap().to_string();
        assert_eq!(call["channel_name"], format!("call-{id}"));

        let (status, _) = app
            .request("GET", &format!("/calls/{id}"), Some(&token("Carol")), None)
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = app
            .request("POST", &format!("/calls/{id}/answer"), Some(&token("Alice")), None)
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, answered) = app
            .request("POST", &format!("/calls/{id}/answer"), Some(&token("Bob")), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(answered["status"], "ongoing");

        let (status, _) = app
            .request("POST", &format!("/calls/{id}/answer"), Some(&token("Bob")), None)
            .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, ended) = app
            .request("POST", &format!("/calls/{id}/end"), Some(&token("Alice")), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ended["status"], "ended");

        let (_, events) = app
            .request("GET", &format!("/calls/{id}/events"), Some(&token("Bob")), None)
            .await;
        let kinds: Vec<&str> = events
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["event"].as_str().unwrap())
            .collect();
        assert_eq!(kinds, ["initiated", "answered", "ended"]);

        let (_, history) = app.request("GET", "/calls", Some(&token("Bob")), None).await;
        assert_eq!(history.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_call_errors() {
        let app = TestApp::new().await;
        app.user("Alice").await;
        let bob = app.user("Bob").await;

        let (status, _) = app
            .request(
                "POST",
                "/calls",
                Some(&token("Alice")),
                Some(json!({ "callee_id": bob.id, "call_type": "hologram" })),
            )
            .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, _) = app
            .request(
                "POST",
                &format!("/calls/{}/cancel", CallId::new()),
                Some(&token("Alice")),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_group_call_flow() {
        let app = TestApp::new().await;
        app.user("Alice").await;
        let bob = app.user("Bob").await;

        let (_, created) = app
            .request(
                "POST",
                "/groups",
                Some(&token("Alice")),
                Some(json!({ "name": "Team", "member_ids": [bob.id] })),
            )
            .await;
        let group = created["group"]["id"].as_str().unwrap().to_string();

        let (status, state) = app
            .request(
                "POST",
                &format!("/groups/{group}/calls"),
                Some(&token("Alice")),
                Some(json!({ "call_type": "audio" })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = state["call"]["id"].as_str().unwrap().to_string();

        let (status, _) = app
            .request(
                "POST",
                &format!("/groups/{group}/calls"),
                Some(&token("Bob")),
                Some(json!({ "call_type": "audio" })),
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, joined) = app
            .request("POST", &format!("/group-calls/{id}/join"), Some(&token("Bob")), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(joined["call"]["status"], "ongoing");

        let (status, _) = app
            .request("POST", &format!("/group-calls/{id}/end"), Some(&token("Bob")), None)
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, ended) = app
            .request("POST", &format!("/group-calls/{id}/end"), Some(&token("Alice")), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ended["call"]["status"], "ended");

        let (_, history) = app
            .request("GET", &format!("/groups/{group}/calls"), Some(&token("Bob")), None)
            .await;
        assert_eq!(history.as_array().unwrap().len(), 1);
    }
}
