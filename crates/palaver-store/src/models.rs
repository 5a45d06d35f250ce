//! Domain model structs persisted in the database.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to the HTTP layer and embedded in broadcast events.

use chrono::{DateTime, Utc};
use palaver_shared::{
    BlobId, CallEventKind, CallId, CallKind, CallStatus, CallType, GroupId, MemberRole,
    MessageId, ParticipantStatus, UserId,
};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A registered user. The API token is never part of this struct.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub about: Option<String>,
    pub photo_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Fields supplied when registering a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

/// Partial profile update. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub about: Option<String>,
    pub photo_url: Option<String>,
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

/// Metadata for an uploaded file. The bytes live in the server's blob store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlobMeta {
    pub id: BlobId,
    pub uploader_id: UserId,
    pub file_name: String,
    pub content_type: Option<String>,
    pub file_size: i64,
    /// BLAKE3 content hash (hex string).
    pub blake3_hash: String,
    pub created_at: DateTime<Utc>,
}

/// The attachment view of a blob as embedded in a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub blob_id: BlobId,
    pub file_name: String,
    pub content_type: Option<String>,
    pub file_size: i64,
    pub blake3_hash: String,
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// A one-to-one message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub body: Option<String>,
    pub file: Option<Attachment>,
    pub reply_to: Option<MessageId>,
    /// Set on the summary message written when a call finishes.
    pub call_metadata: Option<serde_json::Value>,
    /// Users who hid this message from their own view.
    pub deleted_by: Vec<UserId>,
    pub created_at: DateTime<Utc>,
}

/// A message posted to a group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupMessage {
    pub id: MessageId,
    pub group_id: GroupId,
    pub sender_id: UserId,
    pub body: Option<String>,
    pub file: Option<Attachment>,
    pub reply_to: Option<MessageId>,
    pub call_metadata: Option<serde_json::Value>,
    pub deleted_by: Vec<UserId>,
    pub created_at: DateTime<Utc>,
}

/// Content of a message about to be stored, shared by both message kinds.
#[derive(Debug, Clone, Default)]
pub struct NewMessage {
    pub body: Option<String>,
    pub file_id: Option<BlobId>,
    pub reply_to: Option<MessageId>,
    pub call_metadata: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Groups
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub description: Option<String>,
    pub owner_id: UserId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupMember {
    pub group_id: GroupId,
    pub user_id: UserId,
    pub role: MemberRole,
    pub joined_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Calls
// ---------------------------------------------------------------------------

/// A one-to-one voice/video call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersonalCall {
    pub id: CallId,
    pub caller_id: UserId,
    pub callee_id: UserId,
    pub call_type: CallType,
    pub status: CallStatus,
    /// Media channel the clients join through the calling SDK.
    pub channel_name: String,
    pub created_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_secs: Option<i64>,
}

impl PersonalCall {
    pub fn is_party(&self, user: UserId) -> bool {
        self.caller_id == user || self.callee_id == user
    }

    /// The other side of the call from `user`'s point of view.
    pub fn peer_of(&self, user: UserId) -> UserId {
        if self.caller_id == user {
            self.callee_id
        } else {
            self.caller_id
        }
    }
}

/// A call hosted inside a group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupCall {
    pub id: CallId,
    pub group_id: GroupId,
    pub host_id: UserId,
    pub call_type: CallType,
    pub status: CallStatus,
    pub channel_name: String,
    pub created_at: DateTime<Utc>,
    /// When the first invitee joined.
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_secs: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupCallParticipant {
    pub call_id: CallId,
    pub user_id: UserId,
    pub status: ParticipantStatus,
    pub joined_at: Option<DateTime<Utc>>,
    pub left_at: Option<DateTime<Utc>>,
}

/// A group call together with every participant row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupCallState {
    pub call: GroupCall,
    pub participants: Vec<GroupCallParticipant>,
}

impl GroupCallState {
    pub fn participant(&self, user: UserId) -> Option<&GroupCallParticipant> {
        self.participants.iter().find(|p| p.user_id == user)
    }

    pub fn user_ids(&self) -> impl Iterator<Item = UserId> + '_ {
        self.participants.iter().map(|p| p.user_id)
    }
}

/// One row of the append-only call log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallEvent {
    pub id: i64,
    pub call_id: CallId,
    pub call_kind: CallKind,
    /// `None` when the system (ring timeout) caused the change.
    pub actor_id: Option<UserId>,
    pub event: CallEventKind,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
