use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use palaver_shared::constants::MAX_MESSAGE_BODY_CHARS;
use palaver_shared::{BlobId, ChannelName, MessageId, UserId};
use palaver_store::{ChatMessage, Database, NewMessage};
use serde::Deserialize;
use tracing::debug;

use super::{page_limit, AppState};
use crate::auth::AuthUser;
use crate::error::ServerError;
use crate::events::BroadcastEvent;

/// Content fields shared by chat and group messages.
#[derive(Debug, Deserialize)]
pub struct MessageContent {
    pub body: Option<String>,
    pub file_id: Option<BlobId>,
    pub reply_to: Option<MessageId>,
}

impl MessageContent {
    /// Normalize and check the content. The reply target is checked by the
    /// caller since its scope depends on the message kind. An attached file
    /// must be one the sender can already read.
    pub(super) fn validate(self, db: &Database, sender: UserId) -> Result<NewMessage, ServerError> {
        let body = self
            .body
            .map(|b| b.trim().to_string())
            .filter(|b| !b.is_empty());

        if body.is_none() && self.file_id.is_none() {
            return Err(ServerError::Validation(
                "A message needs a body or a file".into(),
            ));
        }
        if body
            .as_ref()
            .is_some_and(|b| b.chars().count() > MAX_MESSAGE_BODY_CHARS)
        {
            return Err(ServerError::Validation(format!(
                "Message body is longer than {MAX_MESSAGE_BODY_CHARS} characters"
            )));
        }
        if let Some(file_id) = self.file_id {
            db.get_blob_meta(file_id).map_err(ServerError::lookup("File"))?;
            if !db.blob_visible_to(file_id, sender)? {
                return Err(ServerError::Forbidden("You cannot attach this file".into()));
            }
        }

        Ok(NewMessage {
            body,
            file_id: self.file_id,
            reply_to: self.reply_to,
            call_metadata: None,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    receiver_id: UserId,
    #[serde(flatten)]
    content: MessageContent,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub limit: Option<u32>,
    pub before: Option<DateTime<Utc>>,
}

pub async fn send(
    State(state): State<AppState>,
    AuthUser(sender): AuthUser,
    Json(req): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<ChatMessage>), ServerError> {
    if req.receiver_id == sender.id {
        return Err(ServerError::Validation("You cannot message yourself".into()));
    }

    let message = {
        let db = state.db.lock().await;
        if !db.user_exists(req.receiver_id)? {
            return Err(ServerError::NotFound("User"));
        }
        let new = req.content.validate(&db, sender.id)?;
        if let Some(parent) = new.reply_to {
            let parent = db
                .get_chat_message(parent)
                .map_err(ServerError::lookup("Message"))?;
            if ChannelName::chat(parent.sender_id, parent.receiver_id)
                != ChannelName::chat(sender.id, req.receiver_id)
            {
                return Err(ServerError::Validation(
                    "Replies must stay in the same conversation".into(),
                ));
            }
        }
        db.insert_chat_message(sender.id, req.receiver_id, &new)?
    };
    debug!(message = %message.id, from = %sender.id, to = %message.receiver_id, "Message sent");

    state
        .hub
        .publish_all(
            [
                ChannelName::chat(message.sender_id, message.receiver_id),
                ChannelName::user(message.receiver_id),
            ],
            &BroadcastEvent::MessageSent(message.clone()),
        )
        .await;

    Ok((StatusCode::CREATED, Json(message)))
}

/// Conversation with `peer`, newest first, excluding messages the caller hid.
pub async fn conversation(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(peer): Path<UserId>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Vec<ChatMessage>>, ServerError> {
    let limit = page_limit(page.limit, state.config.message_page_limit);
    let db = state.db.lock().await;
    if !db.user_exists(peer)? {
        return Err(ServerError::NotFound("User"));
    }
    Ok(Json(db.list_conversation(user.id, peer, limit, page.before)?))
}

/// Hide a message from the caller's own view.
pub async fn hide(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<MessageId>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let db = state.db.lock().await;
    let message = db
        .get_chat_message(id)
        .map_err(ServerError::lookup("Message"))?;
    if message.sender_id != user.id && message.receiver_id != user.id {
        return Err(ServerError::Forbidden("Not your conversation".into()));
    }
    db.hide_chat_message_for(id, user.id)?;
    Ok(Json(serde_json::json!({ "hidden": true })))
}

/// Delete a message for both sides. Sender only.
pub async fn delete_for_everyone(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<MessageId>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let message = {
        let db = state.db.lock().await;
        let message = db
            .get_chat_message(id)
            .map_err(ServerError::lookup("Message"))?;
        if message.sender_id != user.id {
            return Err(ServerError::Forbidden(
                "Only the sender can delete a message for everyone".into(),
            ));
        }
        db.delete_chat_message(id)?;
        message
    };

    state
        .hub
        .publish(
            ChannelName::chat(message.sender_id, message.receiver_id),
            BroadcastEvent::MessageDeleted {
                message_id: message.id,
                sender_id: message.sender_id,
                receiver_id: message.receiver_id,
            },
        )
        .await;

    Ok(Json(serde_json::json!({ "deleted": true })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tests::{token, TestApp};
    use serde_json::json;

    #[tokio::test]
    async fn test_send_and_list() {
        let app = TestApp::new().await;
        let alice = app.user("Alice").await;
        let bob = app.user("Bob").await;
        let mut bob_rx = app.state.hub.subscribe(ChannelName::user(bob.id)).await;

        let (status, sent) = app
            .request(
                "POST",
                "/messages",
                Some(&token("Alice")),
                Some(json!({ "receiver_id": bob.id, "body": "hello" })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(sent["body"], "hello");
        assert_eq!(bob_rx.try_recv().unwrap().event.name(), "MessageSent");

        let (status, list) = app
            .request("GET", &format!("/messages/{}", alice.id), Some(&token("Bob")), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list.as_array().unwrap().len(), 1);
    }

    async fn post(app: &TestApp, body: serde_json::Value) -> StatusCode {
        app.request("POST", "/messages", Some(&token("Alice")), Some(body))
            .await
            .0
    }

    #[tokio::test]
    async fn test_validation() {
        let app = TestApp::new().await;
        let alice = app.user("Alice").await;
        let bob = app.user("Bob").await;
        assert_eq!(
            post(&app, json!({ "receiver_id": bob.id, "body": "   " })).await,
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            post(&app, json!({ "receiver_id": alice.id, "body": "me" })).await,
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            post(&app, json!({ "receiver_id": UserId::new(), "body": "x" })).await,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            post(&app, json!({ "receiver_id": bob.id, "file_id": BlobId::new() })).await,
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn test_hide_only_for_me() {
        let app = TestApp::new().await;
        let alice = app.user("Alice").await;
        let bob = app.user("Bob").await;
        app.user("Carol").await;

        let (_, sent) = app
            .request(
                "POST",
                "/messages",
                Some(&token("Alice")),
                Some(json!({ "receiver_id": bob.id, "body": "secret" })),
            )
            .await;
        let id = sent["id"].as_str().unwrap().to_string();

        let (status, _) = app
            .request("DELETE", &format!("/messages/{id}"), Some(&token("Carol")), None)
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = app
            .request("DELETE", &format!("/messages/{id}"), Some(&token("Alice")), None)
            .await;
        assert_eq!(status, StatusCode::OK);

        let (_, mine) = app
            .request("GET", &format!("/messages/{}", bob.id), Some(&token("Alice")), None)
            .await;
        assert!(mine.as_array().unwrap().is_empty());
        let (_, theirs) = app
            .request("GET", &format!("/messages/{}", alice.id), Some(&token("Bob")), None)
            .await;
        assert_eq!(theirs.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_for_everyone() {
        let app = TestApp::new().await;
        let alice = app.user("Alice").await;
        let bob = app.user("Bob").await;

        let (_, sent) = app
            .request(
                "POST",
                "/messages",
                Some(&token("Alice")),
                Some(json!({ "receiver_id": bob.id, "body": "oops" })),
            )
            .await;
        let uri = format!("/messages/{}/everyone", sent["id"].as_str().unwrap());

        let (status, _) = app.request("DELETE", &uri, Some(&token("Bob")), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = app.request("DELETE", &uri, Some(&token("Alice")), None).await;
        assert_eq!(status, StatusCode::OK);

        let (_, list) = app
            .request("GET", &format!("/messages/{}", alice.id), Some(&token("Bob")), None)
            .await;
        assert!(list.as_array().unwrap().is_empty());
    }
}
