use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use palaver_shared::constants::MAX_GROUP_NAME_CHARS;
use palaver_shared::{ChannelName, GroupId, MessageId, UserId};
use palaver_store::{Database, Group, GroupMember, GroupMessage};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::messages::{MessageContent, PageQuery};
use super::{page_limit, AppState};
use crate::auth::AuthUser;
use crate::error::ServerError;
use crate::events::BroadcastEvent;

#[derive(Deserialize)]
pub struct CreateGroupRequest {
    name: String,
    description: Option<String>,
    #[serde(default)]
    member_ids: Vec<UserId>,
}

#[derive(Deserialize)]
pub struct AddMemberRequest {
    user_id: UserId,
}

#[derive(Serialize)]
pub struct GroupDetails {
    group: Group,
    members: Vec<GroupMember>,
}

/// Load a group and make sure `user` belongs to it.
fn member_group(db: &Database, group_id: GroupId, user: UserId) -> Result<Group, ServerError> {
    let group = db.get_group(group_id).map_err(ServerError::lookup("Group"))?;
    if !db.is_group_member(group_id, user)? {
        return Err(ServerError::Forbidden("You are not a member of this group".into()));
    }
    Ok(group)
}

pub async fn create(
    State(state): State<AppState>,
    AuthUser(owner): AuthUser,
    Json(req): Json<CreateGroupRequest>,
) -> Result<(StatusCode, Json<GroupDetails>), ServerError> {
    let name = req.name.trim();
    if name.is_empty() || name.chars().count() > MAX_GROUP_NAME_CHARS {
        return Err(ServerError::Validation(format!(
            "Group name must be 1 to {MAX_GROUP_NAME_CHARS} characters"
        )));
    }
    let description = req
        .description
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty());

    let mut db = state.db.lock().await;
    for member in &req.member_ids {
        if !db.user_exists(*member)? {
            return Err(ServerError::NotFound("User"));
        }
    }
    let group = db.create_group(name, description, owner.id, &req.member_ids)?;
    let members = db.list_group_members(group.id)?;
    info!(group = %group.id, owner = %owner.id, members = members.len(), "Group created");

    Ok((StatusCode::CREATED, Json(GroupDetails { group, members })))
}

pub async fn list(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<Group>>, ServerError> {
    let db = state.db.lock().await;
    Ok(Json(db.list_groups_for_user(user.id)?))
}

pub async fn show(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<GroupId>,
) -> Result<Json<GroupDetails>, ServerError> {
    let db = state.db.lock().await;
    let group = member_group(&db, id, user.id)?;
    let members = db.list_group_members(id)?;
    Ok(Json(GroupDetails { group, members }))
}

/// Owner only.
pub async fn add_member(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<GroupId>,
    Json(req): Json<AddMemberRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let db = state.db.lock().await;
    let group = member_group(&db, id, user.id)?;
    if group.owner_id != user.id {
        return Err(ServerError::Forbidden("Only the owner can add members".into()));
    }
    if !db.user_exists(req.user_id)? {
        return Err(ServerError::NotFound("User"));
    }
    let added = db.add_group_member(id, req.user_id)?;
    Ok(Json(serde_json::json!({ "added": added })))
}

/// The owner removes anyone but themself; members may remove themselves.
pub async fn remove_member(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path((id, member)): Path<(GroupId, UserId)>,
) -> Result<Json<serde_json::Value>, ServerError> {
    {
        let db = state.db.lock().await;
        let group = member_group(&db, id, user.id)?;
        if member == group.owner_id {
            return Err(ServerError::Validation("The owner cannot leave the group".into()));
        }
        if user.id != group.owner_id && user.id != member {
            return Err(ServerError::Forbidden("Only the owner can remove members".into()));
        }
        if !db.remove_group_member(id, member)? {
            return Err(ServerError::NotFound("Member"));
        }
    }
    info!(group = %id, member = %member, by = %user.id, "Group member removed");

    state.calls.withdraw_member(id, member).await?;
    Ok(Json(serde_json::json!({ "removed": true })))
}

pub async fn send_message(
    State(state): State<AppState>,
    AuthUser(sender): AuthUser,
    Path(id): Path<GroupId>,
    Json(content): Json<MessageContent>,
) -> Result<(StatusCode, Json<GroupMessage>), ServerError> {
    let message = {
        let db = state.db.lock().await;
        member_group(&db, id, sender.id)?;
        let new = content.validate(&db, sender.id)?;
        if let Some(parent) = new.reply_to {
            let parent = db
                .get_group_message(parent)
                .map_err(ServerError::lookup("Message"))?;
            if parent.group_id != id {
                return Err(ServerError::Validation(
                    "Replies must stay in the same group".into(),
                ));
            }
        }
        db.insert_group_message(id, sender.id, &new)?
    };

    state
        .hub
        .publish(
            ChannelName::group(id),
            BroadcastEvent::GroupMessageSent(message.clone()),
        )
        .await;

    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn messages(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<GroupId>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Vec<GroupMessage>>, ServerError> {
    let limit = page_limit(page.limit, state.config.message_page_limit);
    let db = state.db.lock().await;
    member_group(&db, id, user.id)?;
    Ok(Json(db.list_group_messages(user.id, id, limit, page.before)?))
}

/// Hide a group message from the caller's own view.
pub async fn hide_message(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path((id, message_id)): Path<(GroupId, MessageId)>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let db = state.db.lock().await;
    member_group(&db, id, user.id)?;
    let message = db
        .get_group_message(message_id)
        .map_err(ServerError::lookup("Message"))?;
    if message.group_id != id {
        return Err(ServerError::NotFound("Message"));
    }
    db.hide_group_message_for(message_id, user.id)?;
    Ok(Json(serde_json::json!({ "hidden": true })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tests::{token, TestApp};
    use serde_json::{json, Value};

    async fn create_team(app: &TestApp, members: &[UserId]) -> Value {
        let (status, body) = app
            .request(
                "POST",
                "/groups",
                Some(&token("Alice")),
                Some(json!({ "name": "Team", "member_ids": members })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        body
    }

    #[tokio::test]
    async fn test_create_and_show() {
        let app = TestApp::new().await;
        app.user("Alice").await;
        let bob = app.user("Bob").await;
        app.user("Carol").await;

        let created = create_team(&app, &[bob.id]).await;
        assert_eq!(created["members"].as_array().unwrap().len(), 2);
        let uri = format!("/groups/{}", created["group"]["id"].as_str().unwrap());

        let (status, _) = app.request("GET", &uri, Some(&token("Bob")), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = app.request("GET", &uri, Some(&token("Carol")), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (_, list) = app.request("GET", "/groups", Some(&token("Bob")), None).await;
        assert_eq!(list.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_membership_rules() {
        let app = TestApp::new().await;
        let alice = app.user("Alice").await;
        let bob = app.user("Bob").await;
        let carol = app.user("Carol").await;
        let created = create_team(&app, &[bob.id]).await;
        let group = created["group"]["id"].as_str().unwrap().to_string();

        let (status, _) = app
            .request(
                "POST",
                &format!("/groups/{group}/members"),
                Some(&token("Bob")),
                Some(json!({ "user_id": carol.id })),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = app
            .request(
                "POST",
                &format!("/groups/{group}/members"),
                Some(&token("Alice")),
                Some(json!({ "user_id": carol.id })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["added"], true);

        let (status, _) = app
            .request(
                "DELETE",
                &format!("/groups/{group}/members/{}", alice.id),
                Some(&token("Alice")),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, _) = app
            .request(
                "DELETE",
                &format!("/groups/{group}/members/{}", carol.id),
                Some(&token("Bob")),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = app
            .request(
                "DELETE",
                &format!("/groups/{group}/members/{}", bob.id),
                Some(&token("Bob")),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_removed_member_leaves_active_call() {
        let app = TestApp::new().await;
        app.user("Alice").await;
        let bob = app.user("Bob").await;
        let created = create_team(&app, &[bob.id]).await;
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
        let call = state["call"]["id"].as_str().unwrap().to_string();

        let (status, _) = app
            .request(
                "DELETE",
                &format!("/groups/{group}/members/{}", bob.id),
                Some(&token("Alice")),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);

        // Bob was the only invitee, so the call was missed.
        let (status, shown) = app
            .request("GET", &format!("/group-calls/{call}"), Some(&token("Alice")), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(shown["call"]["status"], "missed");

        let (status, _) = app
            .request("POST", &format!("/group-calls/{call}/join"), Some(&token("Bob")), None)
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_group_messages() {
        let app = TestApp::new().await;
        app.user("Alice").await;
        let bob = app.user("Bob").await;
        app.user("Carol").await;
        let created = create_team(&app, &[bob.id]).await;
        let group = created["group"]["id"].as_str().unwrap().to_string();
        let uri = format!("/groups/{group}/messages");

        let (status, sent) = app
            .request("POST", &uri, Some(&token("Bob")), Some(json!({ "body": "hey all" })))
            .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, _) = app
            .request("POST", &uri, Some(&token("Carol")), Some(json!({ "body": "let me in" })))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = app
            .request(
                "DELETE",
                &format!("{uri}/{}", sent["id"].as_str().unwrap()),
                Some(&token("Alice")),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);

        let (_, alice_view) = app.request("GET", &uri, Some(&token("Alice")), None).await;
        assert!(alice_view.as_array().unwrap().is_empty());
        let (_, bob_view) = app.request("GET", &uri, Some(&token("Bob")), None).await;
        assert_eq!(bob_view.as_array().unwrap().len(), 1);
    }
}
