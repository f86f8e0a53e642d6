//! Core types: robot identity, user and room records, and the collaborator traits a chat
//! transport hands its data to.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The bot's own identity on the chat platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RobotIdentity {
    pub id: String,
    pub name: String,
}

/// A known user of the team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub real_name: Option<String>,
    pub is_bot: bool,
    pub deleted: bool,
}

impl User {
    /// Real name when the platform has one, otherwise the handle.
    pub fn display_name(&self) -> &str {
        match self.real_name.as_deref() {
            Some(real) if !real.is_empty() => real,
            _ => &self.name,
        }
    }
}

/// A known channel (room) of the team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    pub name: String,
    pub is_archived: bool,
    pub is_member: bool,
}

/// Converts a transport-specific user record to core [`User`].
pub trait ToCoreUser: Send + Sync {
    fn to_core(&self) -> User;
}

/// Converts a transport-specific channel record to core [`Room`].
pub trait ToCoreRoom: Send + Sync {
    fn to_core(&self) -> Room;
}

/// Interprets inbound events. The transport only parses frames; the handler is the sole
/// interpreter of their shape.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, robot: &RobotIdentity, event: Value) -> crate::error::Result<()>;
}

/// Materializes the team's users into a directory once the session is open.
#[async_trait]
pub trait UserCreator: Send + Sync {
    async fn create_users(&self, users: &[User], robot: &RobotIdentity) -> crate::error::Result<()>;
}

/// Materializes the team's channels into a directory once the session is open.
#[async_trait]
pub trait RoomCreator: Send + Sync {
    async fn create_rooms(&self, rooms: &[Room]) -> crate::error::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(real_name: Option<&str>) -> User {
        User {
            id: "U1".to_string(),
            name: "alice".to_string(),
            real_name: real_name.map(str::to_string),
            is_bot: false,
            deleted: false,
        }
    }

    #[test]
    fn test_display_name_prefers_real_name() {
        assert_eq!(user(Some("Alice Liddell")).display_name(), "Alice Liddell");
    }

    #[test]
    fn test_display_name_falls_back_to_handle() {
        assert_eq!(user(None).display_name(), "alice");
        assert_eq!(user(Some("")).display_name(), "alice");
    }
}
