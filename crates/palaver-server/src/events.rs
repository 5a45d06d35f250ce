//! Real-time notifications published through the hub.
//!
//! Serialized adjacently tagged, so a WebSocket frame looks like
//! `{"channel": "user.<id>", "event": "CallInvited", "data": {...}}`.

use palaver_shared::{CallStatus, ChannelName, MessageId, UserId};
use palaver_store::{
    ChatMessage, GroupCall, GroupCallParticipant, GroupCallState, GroupMessage, PersonalCall,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum BroadcastEvent {
    MessageSent(ChatMessage),
    MessageDeleted {
        message_id: MessageId,
        sender_id: UserId,
        receiver_id: UserId,
    },
    GroupMessageSent(GroupMessage),

    CallInvited(PersonalCall),
    CallAnswered(PersonalCall),
    CallRejected(PersonalCall),
    CallCancelled(PersonalCall),
    CallEnded(PersonalCall),
    CallMissed(PersonalCall),

    GroupCallStarted(GroupCallState),
    GroupCallParticipantUpdated {
        call: GroupCall,
        participant: GroupCallParticipant,
    },
    GroupCallEnded(GroupCallState),
    GroupCallMissed(GroupCallState),
}

impl BroadcastEvent {
    /// The notification matching a personal call's current status.
    pub fn for_personal_call(call: PersonalCall) -> Self {
        match call.status {
            CallStatus::Ringing => BroadcastEvent::CallInvited(call),
            CallStatus::Ongoing => BroadcastEvent::CallAnswered(call),
            CallStatus::Rejected => BroadcastEvent::CallRejected(call),
            CallStatus::Cancelled => BroadcastEvent::CallCancelled(call),
            CallStatus::Ended => BroadcastEvent::CallEnded(call),
            CallStatus::Missed => BroadcastEvent::CallMissed(call),
        }
    }

    /// The notification for a group call that just closed.
    pub fn for_closed_group_call(state: GroupCallState) -> Self {
        match state.call.status {
            CallStatus::Missed => BroadcastEvent::GroupCallMissed(state),
            _ => BroadcastEvent::GroupCallEnded(state),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BroadcastEvent::MessageSent(_) => "MessageSent",
            BroadcastEvent::MessageDeleted { .. } => "MessageDeleted",
            BroadcastEvent::GroupMessageSent(_) => "GroupMessageSent",
            BroadcastEvent::CallInvited(_) => "CallInvited",
            BroadcastEvent::CallAnswered(_) => "CallAnswered",
            BroadcastEvent::CallRejected(_) => "CallRejected",
            BroadcastEvent::CallCancelled(_) => "CallCancelled",
            BroadcastEvent::CallEnded(_) => "CallEnded",
            BroadcastEvent::CallMissed(_) => "CallMissed",
            BroadcastEvent::GroupCallStarted(_) => "GroupCallStarted",
            BroadcastEvent::GroupCallParticipantUpdated { .. } => "GroupCallParticipantUpdated",
            BroadcastEvent::GroupCallEnded(_) => "GroupCallEnded",
            BroadcastEvent::GroupCallMissed(_) => "GroupCallMissed",
        }
    }
}

/// One event as delivered on one channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    pub channel: ChannelName,
    #[serde(flatten)]
    pub event: BroadcastEvent,
}
