//! Status store contract used by the reconciler

use chrono::{DateTime, Utc};

use super::error::StoreError;
use super::status::{ProcessStatus, StatusRecord};

/// Durable mapping from (user, process name) to last known status.
///
/// `upsert_status` must be atomic per key: `status` and `last_checked` are
/// always overwritten, while `last_active` is only replaced when `active_at`
/// is present and never moves backwards.
pub trait StatusStore: Send + Sync {
    fn upsert_status(
        &self,
        username: &str,
        process_name: &str,
        status: ProcessStatus,
        checked_at: DateTime<Utc>,
        active_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    fn get_last_active(
        &self,
        username: &str,
        process_name: &str,
    ) -> Result<Option<DateTime<Utc>>, StoreError>;

    fn list_statuses(&self) -> Result<Vec<StatusRecord>, StoreError>;
}
