//! Core module - Registry, liveness probing, reconciliation and scheduling

pub mod error;
mod monitor;
mod reconcile;
mod registry;
mod scheduler;
pub mod settings;
mod status;
mod store;

pub use error::StoreError;
pub use monitor::{resolve_username, SystemProbe};
pub use reconcile::Reconciler;
pub use registry::ProcessRegistry;
pub use scheduler::Scheduler;
pub use settings::{Settings, TrackerConfig};
pub use status::{ProcessStatus, StatusRecord};
pub use store::StatusStore;
