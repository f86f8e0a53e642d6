//! User id → direct-message channel id.
//!
//! Seeded from the bootstrap snapshot; a miss falls back to one [`Directory`] lookup whose
//! answer is cached for the life of the mapping. Entries are never evicted: the map is bounded
//! by the number of users in one team, and once a user id resolves it keeps resolving to the
//! same channel id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use dbot_core::Result;
use tracing::debug;

use crate::adapters::SlackIm;
use crate::api::Directory;

pub struct ImMapping {
    directory: Arc<dyn Directory>,
    mapping: Mutex<HashMap<String, String>>,
}

impl std::fmt::Debug for ImMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImMapping").field("len", &self.len()).finish()
    }
}

impl ImMapping {
    pub fn new(directory: Arc<dyn Directory>, ims: &[SlackIm]) -> Self {
        let mapping = ims
            .iter()
            .map(|im| (im.user.clone(), im.id.clone()))
            .collect();
        Self {
            directory,
            mapping: Mutex::new(mapping),
        }
    }

    fn cached(&self, user_id: &str) -> Option<String> {
        self.mapping
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user_id)
            .cloned()
    }

    /// Resolves the DM channel for `user_id`, asking the directory on a cache miss.
    pub async fn im_for(&self, user_id: &str) -> Result<Option<String>> {
        if let Some(channel_id) = self.cached(user_id) {
            return Ok(Some(channel_id));
        }

        debug!(user_id = %user_id, "im mapping miss, asking directory");
        let Some(channel_id) = self.directory.open_im(user_id).await? else {
            return Ok(None);
        };

        // A concurrent lookup may have filled the entry first; keep whichever landed first.
        let mut mapping = self.mapping.lock().unwrap_or_else(PoisonError::into_inner);
        let resolved = mapping
            .entry(user_id.to_string())
            .or_insert(channel_id)
            .clone();
        Ok(Some(resolved))
    }

    pub fn len(&self) -> usize {
        self.mapping.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
