//! Process registry - The set of process names under observation

use std::sync::Arc;

use tracing::info;

use super::error::{ConfigError, TrackerError};
use crate::persistence::Database;

/// Append-only set of tracked process names, stored verbatim
#[derive(Clone)]
pub struct ProcessRegistry {
    database: Arc<Database>,
}

impl ProcessRegistry {
    pub fn new(database: Arc<Database>) -> Self {
        Self { database }
    }

    /// Start tracking `name`. Returns false when the exact name was already tracked.
    pub fn register(&self, name: &str) -> Result<bool, TrackerError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ConfigError::EmptyProcessName.into());
        }

        let added = self.database.add_process(name)?;
        if added {
            info!("Now tracking process '{}'", name);
        }
        Ok(added)
    }

    /// All tracked names; order carries no meaning
    pub fn list(&self) -> Result<Vec<String>, TrackerError> {
        Ok(self.database.load_processes()?)
    }
}
