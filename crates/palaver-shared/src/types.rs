use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SharedError;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = SharedError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

uuid_id!(
    /// A registered user.
    UserId
);
uuid_id!(
    /// A personal or group chat message.
    MessageId
);
uuid_id!(GroupId);
uuid_id!(
    /// A personal or group call. Both kinds share the id space.
    CallId
);
uuid_id!(
    /// An uploaded file.
    BlobId
);

macro_rules! string_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = SharedError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(SharedError::UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    Audio,
    Video,
}

string_enum!(CallType, "call type", {
    Audio => "audio",
    Video => "video",
});

/// Lifecycle of a personal or group call.
///
/// `Ringing -> Ongoing -> Ended`, or `Ringing -> Missed | Rejected | Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Ringing,
    Ongoing,
    Ended,
    Missed,
    Rejected,
    Cancelled,
}

string_enum!(CallStatus, "call status", {
    Ringing => "ringing",
    Ongoing => "ongoing",
    Ended => "ended",
    Missed => "missed",
    Rejected => "rejected",
    Cancelled => "cancelled",
});

impl CallStatus {
    pub const ACTIVE: [CallStatus; 2] = [CallStatus::Ringing, CallStatus::Ongoing];

    pub fn is_terminal(&self) -> bool {
        !matches!(self, CallStatus::Ringing | CallStatus::Ongoing)
    }

    pub fn can_transition_to(&self, next: CallStatus) -> bool {
        use CallStatus::*;
        matches!(
            (self, next),
            (Ringing, Ongoing | Missed | Rejected | Cancelled) | (Ongoing, Ended)
        )
    }
}

/// Per-member status within a group call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantStatus {
    Ringing,
    Joined,
    Declined,
    Left,
    Missed,
}

string_enum!(ParticipantStatus, "participant status", {
    Ringing => "ringing",
    Joined => "joined",
    Declined => "declined",
    Left => "left",
    Missed => "missed",
});

impl ParticipantStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ParticipantStatus::Declined | ParticipantStatus::Left | ParticipantStatus::Missed
        )
    }

    pub fn can_transition_to(&self, next: ParticipantStatus) -> bool {
        use ParticipantStatus::*;
        matches!(
            (self, next),
            (Ringing, Joined | Declined | Missed) | (Joined, Left)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallKind {
    Personal,
    Group,
}

string_enum!(CallKind, "call kind", {
    Personal => "personal",
    Group => "group",
});

/// Entries of the append-only call event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallEventKind {
    Initiated,
    Answered,
    Rejected,
    Cancelled,
    Ended,
    Missed,
    Joined,
    Declined,
    Left,
}

string_enum!(CallEventKind, "call event", {
    Initiated => "initiated",
    Answered => "answered",
    Rejected => "rejected",
    Cancelled => "cancelled",
    Ended => "ended",
    Missed => "missed",
    Joined => "joined",
    Declined => "declined",
    Left => "left",
});

impl CallEventKind {
    /// The event logged when a call enters `status`.
    pub fn for_status(status: CallStatus) -> Self {
        match status {
            CallStatus::Ringing => CallEventKind::Initiated,
            CallStatus::Ongoing => CallEventKind::Answered,
            CallStatus::Ended => CallEventKind::Ended,
            CallStatus::Missed => CallEventKind::Missed,
            CallStatus::Rejected => CallEventKind::Rejected,
            CallStatus::Cancelled => CallEventKind::Cancelled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Owner,
    Member,
}

string_enum!(MemberRole, "member role", {
    Owner => "owner",
    Member => "member",
});
