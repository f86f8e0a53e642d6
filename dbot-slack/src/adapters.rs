//! Slack Web API records and their conversion to dbot_core types.

use dbot_core::{Room, ToCoreRoom, ToCoreUser, User};
use serde::Deserialize;

/// User object as returned in `rtm.start`'s `users` list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SlackUser {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub real_name: Option<String>,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub deleted: bool,
}

/// Channel object as returned in `rtm.start`'s `channels` list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SlackChannel {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_archived: bool,
    #[serde(default)]
    pub is_member: bool,
}

/// Direct-message channel: `id` is the IM channel, `user` the other party.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SlackIm {
    pub id: String,
    pub user: String,
}

/// Wraps a [`SlackUser`] for conversion to core [`User`].
pub struct SlackUserWrapper<'a>(pub &'a SlackUser);

impl<'a> ToCoreUser for SlackUserWrapper<'a> {
    fn to_core(&self) -> User {
        User {
            id: self.0.id.clone(),
            name: self.0.name.clone(),
            real_name: self.0.real_name.clone().filter(|n| !n.is_empty()),
            is_bot: self.0.is_bot,
            deleted: self.0.deleted,
        }
    }
}

/// Wraps a [`SlackChannel`] for conversion to core [`Room`].
pub struct SlackChannelWrapper<'a>(pub &'a SlackChannel);

impl<'a> ToCoreRoom for SlackChannelWrapper<'a> {
    fn to_core(&self) -> Room {
        Room {
            id: self.0.id.clone(),
            name: self.0.name.clone(),
            is_archived: self.0.is_archived,
            is_member: self.0.is_member,
        }
    }
}
