//! Pub/sub channel naming.
//!
//! Clients subscribe to `user.{id}` for personal notifications, `group.{id}`
//! for group traffic, and `chat.{a}.{b}` for a one-to-one conversation. The
//! two ids of a chat channel are always ordered so both parties derive the
//! same name.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::{GROUP_CALL_CHANNEL_PREFIX, PERSONAL_CALL_CHANNEL_PREFIX};
use crate::error::SharedError;
use crate::types::{CallId, GroupId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelName {
    User(UserId),
    Group(GroupId),
    Chat(UserId, UserId),
}

impl ChannelName {
    /// Conversation channel between two users, independent of argument order.
    pub fn chat(a: UserId, b: UserId) -> Self {
        if a <= b {
            ChannelName::Chat(a, b)
        } else {
            ChannelName::Chat(b, a)
        }
    }

    pub fn user(id: UserId) -> Self {
        ChannelName::User(id)
    }

    pub fn group(id: GroupId) -> Self {
        ChannelName::Group(id)
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelName::User(id) => write!(f, "user.{id}"),
            ChannelName::Group(id) => write!(f, "group.{id}"),
            ChannelName::Chat(a, b) => write!(f, "chat.{a}.{b}"),
        }
    }
}

impl FromStr for ChannelName {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SharedError::InvalidChannel(s.to_string());
        let parts: Vec<&str> = s.split('.').collect();
        match parts.as_slice() {
            ["user", id] => Ok(ChannelName::User(id.parse().map_err(|_| invalid())?)),
            ["group", id] => Ok(ChannelName::Group(id.parse().map_err(|_| invalid())?)),
            ["chat", a, b] => {
                let a: UserId = a.parse().map_err(|_| invalid())?;
                let b: UserId = b.parse().map_err(|_| invalid())?;
                Ok(ChannelName::chat(a, b))
            }
            _ => Err(invalid()),
        }
    }
}

impl Serialize for ChannelName {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ChannelName {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Media channel name handed to the calling SDK for a personal call.
pub fn personal_call_channel(id: CallId) -> String {
    format!("{PERSONAL_CALL_CHANNEL_PREFIX}{id}")
}

/// Media channel name handed to the calling SDK for a group call.
pub fn group_call_channel(id: CallId) -> String {
    format!("{GROUP_CALL_CHANNEL_PREFIX}{id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_channel_is_symmetric() {
        let a = UserId::new();
        let b = UserId::new();
        assert_eq!(ChannelName::chat(a, b), ChannelName::chat(b, a));
        assert_eq!(
            ChannelName::chat(a, b).to_string(),
            ChannelName::chat(b, a).to_string()
        );
    }

    #[test]
    fn test_parse_channels() {
        let u = UserId::new();
        let g = GroupId::new();
        assert_eq!(
            format!("user.{u}").parse::<ChannelName>().unwrap(),
            ChannelName::User(u)
        );
        assert_eq!(
            format!("group.{g}").parse::<ChannelName>().unwrap(),
            ChannelName::Group(g)
        );

        let v = UserId::new();
        let parsed: ChannelName = format!("chat.{v}.{u}").parse().unwrap();
        assert_eq!(parsed, ChannelName::chat(u, v));
    }

    #[test]
    fn test_reject_malformed_channels() {
        assert!("user".parse::<ChannelName>().is_err());
        assert!("user.abc".parse::<ChannelName>().is_err());
        assert!("presence.1".parse::<ChannelName>().is_err());
        assert!("chat.1.2.3".parse::<ChannelName>().is_err());
    }

    #[test]
    fn test_call_channel_names() {
        let id = CallId::new();
        assert_eq!(personal_call_channel(id), format!("call-{id}"));
        assert_eq!(group_call_channel(id), format!("group-call-{id}"));
    }
}
