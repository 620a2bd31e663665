//! Results of the last phone check of every admin.
//!
//! The results are saved to disk, so the follow-up commands keep working
//! after the bot restarts.

use crate::phones::PhoneStatus;
use crate::prelude::*;
use crate::storage::{JsonDocument, PersistError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use teloxide::types::UserId;

#[derive(Debug, thiserror::Error)]
pub enum JobsError {
    #[error("Failed to save the check results")]
    Persistence { source: PersistError },
}

#[derive(Serialize, Deserialize, Default, Clone, Debug)]
struct JobsDoc {
    /// Keyed by the admin's user ID
    #[serde(default)]
    results: BTreeMap<u64, Vec<PhoneStatus>>,
}

pub(crate) struct JobResults {
    doc: JsonDocument<JobsDoc>,
}

impl JobResults {
    pub(crate) fn load(path: PathBuf) -> Self {
        let (doc, result) = JsonDocument::<JobsDoc>::load(path);

        match result {
            Ok(()) => info!(
                path = ?doc.path(),
                admins = doc.get().results.len(),
                "Check results loaded"
            ),
            Err(err) => error!(err = tracing_err(&err), "Starting without check results"),
        }

        Self { doc }
    }

    /// Replaces the previous results of the admin
    pub(crate) async fn store(&self, admin: UserId, results: &[PhoneStatus]) -> Result<(), JobsError> {
        self.doc
            .update(|current| {
                let mut next = current.clone();
                next.results.insert(admin.0, results.to_vec());
                Some(next)
            })
            .await
            .map_err(|source| JobsError::Persistence { source })?;

        debug!(%admin, results = results.len(), "Check results saved");

        Ok(())
    }

    pub(crate) fn last(&self, admin: UserId) -> Option<Vec<PhoneStatus>> {
        self.doc.get().results.get(&admin.0).cloned()
    }
}
