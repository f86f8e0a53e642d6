//! In-memory directory of the team's users and rooms, filled by the transport on session open.
//! Nothing is persisted; a new session starts from an empty roster.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::Result;
use crate::types::{RobotIdentity, Room, RoomCreator, User, UserCreator};

#[derive(Debug, Default)]
pub struct InMemoryRoster {
    users: RwLock<HashMap<String, User>>,
    rooms: RwLock<HashMap<String, Room>>,
    robot: RwLock<Option<User>>,
}

impl InMemoryRoster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user(&self, id: &str) -> Option<User> {
        self.users
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Looks a user up by handle (`name`), case-insensitively.
    pub fn find_user_by_name(&self, name: &str) -> Option<User> {
        self.users
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .find(|u| u.name.eq_ignore_ascii_case(name))
            .cloned()
    }

    pub fn room(&self, id: &str) -> Option<Room> {
        self.rooms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// The robot's own user record, once the user list containing it has been materialized.
    pub fn robot(&self) -> Option<User> {
        self.robot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn user_count(&self) -> usize {
        self.users.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[async_trait]
impl UserCreator for InMemoryRoster {
    async fn create_users(&self, users: &[User], robot: &RobotIdentity) -> Result<()> {
        let mut known = self.users.write().unwrap_or_else(PoisonError::into_inner);
        for user in users {
            debug!(user_id = %user.id, name = %user.display_name(), "roster: user");
            if user.id == robot.id {
                *self.robot.write().unwrap_or_else(PoisonError::into_inner) = Some(user.clone());
            }
            known.insert(user.id.clone(), user.clone());
        }
        info!(count = users.len(), "roster: users materialized");
        Ok(())
    }
}

#[async_trait]
impl RoomCreator for InMemoryRoster {
    async fn create_rooms(&self, rooms: &[Room]) -> Result<()> {
        let mut known = self.rooms.write().unwrap_or_else(PoisonError::into_inner);
        for room in rooms {
            known.insert(room.id.clone(), room.clone());
        }
        info!(count = rooms.len(), "roster: rooms materialized");
        Ok(())
    }
}
