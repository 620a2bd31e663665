//! Telegram users that must never be added to the target channel.

use crate::prelude::*;
use crate::storage::{JsonDocument, PersistError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use teloxide::types::UserId;

#[derive(Debug, thiserror::Error)]
pub enum BlocklistError {
    #[error("Failed to save the blocklist, the change did not take effect")]
    Persistence { source: PersistError },
}

#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq, Eq)]
struct BlocklistDoc {
    #[serde(default)]
    blocked_users: BTreeSet<u64>,
}

pub struct Blocklist {
    doc: JsonDocument<BlocklistDoc>,
}

impl Blocklist {
    pub fn load(path: PathBuf) -> Self {
        let (doc, result) = JsonDocument::<BlocklistDoc>::load(path);

        match result {
            Ok(()) => info!(
                path = ?doc.path(),
                blocked = doc.get().blocked_users.len(),
                "Blocklist loaded"
            ),
            Err(err) => error!(err = tracing_err(&err), "Starting with an empty blocklist"),
        }

        Self { doc }
    }

    /// Blocked user IDs in ascending order.
    pub fn list(&self) -> Vec<UserId> {
        self.doc.get().blocked_users.iter().copied().map(UserId).collect()
    }

    pub fn contains(&self, user_id: UserId) -> bool {
        self.doc.get().blocked_users.contains(&user_id.0)
    }

    /// Returns `false` if the user was already blocked.
    pub async fn block(&self, user_id: UserId) -> Result<bool, BlocklistError> {
        self.modify(user_id, |users, id| users.insert(id)).await
    }

    /// Returns `false` if the user wasn't blocked.
    pub async fn unblock(&self, user_id: UserId) -> Result<bool, BlocklistError> {
        self.modify(user_id, |users, id| users.remove(&id)).await
    }

    async fn modify(
        &self,
        user_id: UserId,
        apply: fn(&mut BTreeSet<u64>, u64) -> bool,
    ) -> Result<bool, BlocklistError> {
        let changed = self
            .doc
            .update(|current| {
                let mut next = current.clone();
                apply(&mut next.blocked_users, user_id.0).then_some(next)
            })
            .await
            .map_err(|source| BlocklistError::Persistence { source })?;

        if changed {
            info!(%user_id, blocked = self.doc.get().blocked_users.len(), "Blocklist updated");
        }

        Ok(changed)
    }
}
