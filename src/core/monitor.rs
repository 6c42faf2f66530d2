//! Liveness monitoring - Answers whether a named process is currently alive

use std::ffi::OsStr;
use std::path::Path;
use std::sync::{PoisonError, RwLock};

use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind, Users};
use tracing::{debug, trace};

use super::error::{ConfigError, ProbeError};

/// Answers "is a process with this name alive?"
pub trait LivenessProbe: Send + Sync {
    /// Take a fresh snapshot of the process table; called once per cycle
    fn refresh(&self) -> Result<(), ProbeError> {
        Ok(())
    }

    /// Case-insensitive exact match against any live process
    fn is_running(&self, name: &str) -> Result<bool, ProbeError>;
}

/// Probe backed by the host process table
pub struct SystemProbe {
    system: RwLock<System>,
}

impl SystemProbe {
    pub fn new() -> Self {
        Self {
            system: RwLock::new(System::new()),
        }
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl LivenessProbe for SystemProbe {
    fn refresh(&self) -> Result<(), ProbeError> {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            return Err(ProbeError::Unavailable(format!(
                "process listing is not supported on {}",
                std::env::consts::OS
            )));
        }

        // The snapshot is rebuilt below, so a poisoned lock holds nothing stale
        let mut system = self
            .system
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::new().with_exe(UpdateKind::OnlyIfNotSet),
        );
        trace!("Process table refreshed ({} processes)", system.processes().len());
        Ok(())
    }

    fn is_running(&self, name: &str) -> Result<bool, ProbeError> {
        let system = self.system.read().unwrap_or_else(PoisonError::into_inner);

        let processes = system.processes();
        // Our own process is always alive, so an empty table means enumeration failed
        if processes.is_empty() {
            return Err(ProbeError::Enumeration);
        }

        let found = processes
            .values()
            .any(|process| matches_process(process.name(), process.exe(), name));
        debug!("Process '{}' running: {}", name, found);
        Ok(found)
    }
}

/// Compare a live process against a tracked name, ignoring case.
///
/// The executable's file name is checked too because some platforms truncate
/// process names (Linux keeps only 15 bytes).
pub fn matches_process(process_name: &OsStr, exe: Option<&Path>, wanted: &str) -> bool {
    let wanted = wanted.to_lowercase();
    if process_name.to_string_lossy().to_lowercase() == wanted {
        return true;
    }

    exe.and_then(Path::file_name)
        .map(|file| file.to_string_lossy().to_lowercase() == wanted)
        .unwrap_or(false)
}

/// Resolve the user to track: explicit override, then the owner of this
/// process, then the login environment variables.
pub fn resolve_username(explicit: Option<String>) -> Result<String, ConfigError> {
    explicit
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .or_else(current_process_user)
        .or_else(|| std::env::var("USER").ok().filter(|u| !u.is_empty()))
        .or_else(|| std::env::var("USERNAME").ok().filter(|u| !u.is_empty()))
        .ok_or(ConfigError::UnknownUser)
}

fn current_process_user() -> Option<String> {
    let pid = sysinfo::get_current_pid().ok()?;
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[pid]),
        true,
        ProcessRefreshKind::new().with_user(UpdateKind::Always),
    );
    let uid = system.process(pid)?.user_id()?.clone();

    let users = Users::new_with_refreshed_list();
    users.get_user_by_id(&uid).map(|user| user.name().to_string())
}
