//! Reconciliation - Combines probe answers with stored history into new statuses

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, warn};

use super::error::{StoreError, TrackerError};
use super::monitor::LivenessProbe;
use super::registry::ProcessRegistry;
use super::status::ProcessStatus;
use super::store::StatusStore;

/// Compute the new status and the `last_active` value to write.
///
/// A process never seen running has no `prior_last_active` and can only be
/// `NotRunning`. Dormancy requires strictly more than `dormant_timeout` since
/// the last sighting.
pub fn evaluate(
    observed: bool,
    prior_last_active: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    dormant_timeout: TimeDelta,
) -> (ProcessStatus, Option<DateTime<Utc>>) {
    if observed {
        return (ProcessStatus::Running, Some(now));
    }

    let status = match prior_last_active {
        Some(last_active) if now - last_active > dormant_timeout => ProcessStatus::Dormant,
        _ => ProcessStatus::NotRunning,
    };
    // The store keeps the previous last_active when none is supplied
    (status, None)
}

/// A process name whose reconciliation failed during a cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameFailure {
    pub process_name: String,
    pub error: String,
}

/// Outcome of one pass over the registry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub running: usize,
    pub not_running: usize,
    pub dormant: usize,
    pub failures: Vec<NameFailure>,
}

impl CycleReport {
    fn record(&mut self, status: ProcessStatus) {
        match status {
            ProcessStatus::Running => self.running += 1,
            ProcessStatus::NotRunning => self.not_running += 1,
            ProcessStatus::Dormant => self.dormant += 1,
        }
    }
}

impl std::fmt::Display for CycleReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} running, {} not running, {} dormant, {} failed",
            self.running,
            self.not_running,
            self.dormant,
            self.failures.len()
        )?;
        for failure in &self.failures {
            write!(f, "; {}: {}", failure.process_name, failure.error)?;
        }
        Ok(())
    }
}

/// Runs one reconciliation pass for a user
pub struct Reconciler {
    registry: ProcessRegistry,
    store: Arc<dyn StatusStore>,
    probe: Arc<dyn LivenessProbe>,
    dormant_timeout: TimeDelta,
}

impl Reconciler {
    pub fn new(
        registry: ProcessRegistry,
        store: Arc<dyn StatusStore>,
        probe: Arc<dyn LivenessProbe>,
        dormant_timeout: TimeDelta,
    ) -> Self {
        Self {
            registry,
            store,
            probe,
            dormant_timeout,
        }
    }

    /// Reconcile every registered name against the current time
    pub fn reconcile(&self, username: &str) -> Result<CycleReport, TrackerError> {
        self.reconcile_at(username, Utc::now())
    }

    /// Reconcile every registered name as of `now`.
    ///
    /// Failing to load the registry or refresh the probe abandons the cycle.
    /// A failure for a single name is recorded in the report and leaves that
    /// name's record untouched.
    pub fn reconcile_at(
        &self,
        username: &str,
        now: DateTime<Utc>,
    ) -> Result<CycleReport, TrackerError> {
        let names = self.registry.list()?;
        self.probe.refresh()?;

        let mut report = CycleReport::default();
        for name in names {
            match self.reconcile_name(username, &name, now) {
                Ok(status) => report.record(status),
                Err(e) => {
                    warn!("Failed to reconcile process '{}': {}", name, e);
                    report.failures.push(NameFailure {
                        process_name: name,
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }

    fn reconcile_name(
        &self,
        username: &str,
        name: &str,
        now: DateTime<Utc>,
    ) -> Result<ProcessStatus, TrackerError> {
        let observed = self.probe.is_running(name)?;
        let prior_last_active = if observed {
            None
        } else {
            self.prior_last_active(username, name)?
        };

        let (status, last_active) = evaluate(observed, prior_last_active, now, self.dormant_timeout);
        self.store
            .upsert_status(username, name, status, now, last_active)?;

        debug!("Process '{}' for {} is {}", name, username, status);
        Ok(status)
    }

    /// Stored `last_active`; an undecodable value counts as never seen
    fn prior_last_active(
        &self,
        username: &str,
        name: &str,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        match self.store.get_last_active(username, name) {
            Err(StoreError::Timestamp { column, value }) => {
                warn!(
                    "Ignoring unreadable {} {:?} for process '{}'",
                    column, value, name
                );
                Ok(None)
            }
            other => other,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::error::ProbeError;
    use crate::core::status::StatusRecord;
    use crate::persistence::Database;
    use chrono::TimeZone;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    /// Probe whose answers are set by the test
    #[derive(Default)]
    pub(crate) struct ScriptedProbe {
        running: Mutex<HashSet<String>>,
        faulty: Mutex<HashSet<String>>,
        fail_refresh: Mutex<bool>,
    }

    impl ScriptedProbe {
        pub(crate) fn set_running(&self, name: &str, running: bool) {
            let mut set = self.running.lock().unwrap();
            if running {
                set.insert(name.to_lowercase());
            } else {
                set.remove(&name.to_lowercase());
            }
        }

        pub(crate) fn set_faulty(&self, name: &str, faulty: bool) {
            let mut set = self.faulty.lock().unwrap();
            if faulty {
                set.insert(name.to_string());
            } else {
                set.remove(name);
            }
        }

        pub(crate) fn set_fail_refresh(&self, fail: bool) {
            *self.fail_refresh.lock().unwrap() = fail;
        }
    }

    impl LivenessProbe for ScriptedProbe {
        fn refresh(&self) -> Result<(), ProbeError> {
            if *self.fail_refresh.lock().unwrap() {
                return Err(ProbeError::Enumeration);
            }
            Ok(())
        }

        fn is_running(&self, name: &str) -> Result<bool, ProbeError> {
            if self.faulty.lock().unwrap().contains(name) {
                return Err(ProbeError::Unavailable(format!("scripted fault for {}", name)));
            }
            Ok(self.running.lock().unwrap().contains(&name.to_lowercase()))
        }
    }

    /// Store that fails writes for selected names and delegates the rest
    struct FlakyStore {
        inner: Arc<Database>,
        failing: HashSet<String>,
    }

    impl StatusStore for FlakyStore {
        fn upsert_status(
            &self,
            username: &str,
            process_name: &str,
            status: ProcessStatus,
            checked_at: DateTime<Utc>,
            active_at: Option<DateTime<Utc>>,
        ) -> Result<(), StoreError> {
            if self.failing.contains(process_name) {
                return Err(StoreError::LockPoisoned("injected".to_string()));
            }
            self.inner
                .upsert_status(username, process_name, status, checked_at, active_at)
        }

        fn get_last_active(
            &self,
            username: &str,
            process_name: &str,
        ) -> Result<Option<DateTime<Utc>>, StoreError> {
            self.inner.get_last_active(username, process_name)
        }

        fn list_statuses(&self) -> Result<Vec<StatusRecord>, StoreError> {
            self.inner.list_statuses()
        }
    }

    pub(crate) struct Fixture {
        pub(crate) db: Arc<Database>,
        pub(crate) probe: Arc<ScriptedProbe>,
        pub(crate) reconciler: Reconciler,
    }

    pub(crate) fn fixture(names: &[&str]) -> Fixture {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        fixture_with(Arc::new(db), names)
    }

    fn fixture_with(db: Arc<Database>, names: &[&str]) -> Fixture {
        let registry = ProcessRegistry::new(Arc::clone(&db));
        for name in names {
            registry.register(name).unwrap();
        }
        let probe = Arc::new(ScriptedProbe::default());
        let reconciler = Reconciler::new(
            registry,
            db.clone(),
            probe.clone(),
            TimeDelta::minutes(10),
        );
        Fixture {
            db,
            probe,
            reconciler,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    fn record(db: &Database, name: &str) -> StatusRecord {
        db.list_statuses()
            .unwrap()
            .into_iter()
            .find(|r| r.username == "alice" && r.process_name == name)
            .unwrap()
    }

    fn statuses(db: &Database) -> HashMap<String, ProcessStatus> {
        db.list_statuses()
            .unwrap()
            .into_iter()
            .map(|r| (r.process_name, r.status))
            .collect()
    }

    #[test]
    fn test_evaluate_never_seen_is_not_running() {
        let (status, active) = evaluate(false, None, t0(), TimeDelta::minutes(10));
        assert_eq!(status, ProcessStatus::NotRunning);
        assert_eq!(active, None);
    }

    #[test]
    fn test_evaluate_timeout_boundary() {
        let timeout = TimeDelta::minutes(10);
        let exactly = evaluate(false, Some(t0()), t0() + timeout, timeout);
        assert_eq!(exactly.0, ProcessStatus::NotRunning);

        let beyond = evaluate(false, Some(t0()), t0() + timeout + TimeDelta::seconds(1), timeout);
        assert_eq!(beyond.0, ProcessStatus::Dormant);
    }

    #[test]
    fn test_evaluate_running_sets_last_active() {
        let now = t0() + TimeDelta::hours(5);
        let (status, active) = evaluate(true, Some(t0()), now, TimeDelta::minutes(10));
        assert_eq!(status, ProcessStatus::Running);
        assert_eq!(active, Some(now));
    }

    #[test]
    fn test_editor_lifecycle() {
        let f = fixture(&["editor"]);

        f.probe.set_running("editor", true);
        f.reconciler.reconcile_at("alice", t0()).unwrap();
        let r = record(&f.db, "editor");
        assert_eq!(r.status, ProcessStatus::Running);
        assert_eq!(r.last_active, Some(t0()));

        f.probe.set_running("editor", false);
        f.reconciler
            .reconcile_at("alice", t0() + TimeDelta::minutes(5))
            .unwrap();
        let r = record(&f.db, "editor");
        assert_eq!(r.status, ProcessStatus::NotRunning);
        assert_eq!(r.last_active, Some(t0()));
        assert_eq!(r.last_checked, t0() + TimeDelta::minutes(5));

        f.reconciler
            .reconcile_at("alice", t0() + TimeDelta::minutes(15))
            .unwrap();
        let r = record(&f.db, "editor");
        assert_eq!(r.status, ProcessStatus::Dormant);
        assert_eq!(r.last_active, Some(t0()));

        f.probe.set_running("editor", true);
        f.reconciler
            .reconcile_at("alice", t0() + TimeDelta::minutes(20))
            .unwrap();
        let r = record(&f.db, "editor");
        assert_eq!(r.status, ProcessStatus::Running);
        assert_eq!(r.last_active, Some(t0() + TimeDelta::minutes(20)));
    }

    #[test]
    fn test_never_seen_process_stays_not_running() {
        let f = fixture(&["tool"]);
        for hour in 0..48 {
            f.reconciler
                .reconcile_at("alice", t0() + TimeDelta::hours(hour))
                .unwrap();
            let r = record(&f.db, "tool");
            assert_eq!(r.status, ProcessStatus::NotRunning);
            assert_eq!(r.last_active, None);
        }
        assert_eq!(f.db.list_statuses().unwrap().len(), 1);
    }

    #[test]
    fn test_last_active_never_decreases() {
        let f = fixture(&["editor"]);
        let mut previous = None;
        for (step, running) in [true, false, false, true, false, true, false].iter().enumerate() {
            f.probe.set_running("editor", *running);
            f.reconciler
                .reconcile_at("alice", t0() + TimeDelta::minutes(7 * step as i64))
                .unwrap();
            let current = record(&f.db, "editor").last_active;
            assert!(current >= previous);
            previous = current;
        }
    }

    #[test]
    fn test_probe_matches_case_insensitively() {
        let f = fixture(&["Editor"]);
        f.probe.set_running("editor", true);
        let report = f.reconciler.reconcile_at("alice", t0()).unwrap();
        assert_eq!(report.running, 1);
    }

    #[test]
    fn test_probe_fault_is_isolated_per_name() {
        let f = fixture(&["editor", "shell", "browser"]);
        f.probe.set_running("editor", true);
        f.probe.set_running("browser", true);
        f.probe.set_faulty("shell", true);

        let report = f.reconciler.reconcile_at("alice", t0()).unwrap();
        assert_eq!(report.running, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].process_name, "shell");

        let by_name = statuses(&f.db);
        assert_eq!(by_name.get("editor"), Some(&ProcessStatus::Running));
        assert_eq!(by_name.get("browser"), Some(&ProcessStatus::Running));
        assert!(!by_name.contains_key("shell"));

        // Next cycle recovers the faulty name
        f.probe.set_faulty("shell", false);
        f.probe.set_running("shell", true);
        let report = f
            .reconciler
            .reconcile_at("alice", t0() + TimeDelta::minutes(5))
            .unwrap();
        assert!(report.failures.is_empty());
        assert_eq!(statuses(&f.db).get("shell"), Some(&ProcessStatus::Running));
    }

    #[test]
    fn test_faulted_name_keeps_previous_record() {
        let f = fixture(&["editor"]);
        f.probe.set_running("editor", true);
        f.reconciler.reconcile_at("alice", t0()).unwrap();

        f.probe.set_faulty("editor", true);
        f.reconciler
            .reconcile_at("alice", t0() + TimeDelta::minutes(5))
            .unwrap();

        let r = record(&f.db, "editor");
        assert_eq!(r.status, ProcessStatus::Running);
        assert_eq!(r.last_checked, t0());
    }

    #[test]
    fn test_refresh_failure_abandons_cycle() {
        let f = fixture(&["editor"]);
        f.probe.set_fail_refresh(true);
        let result = f.reconciler.reconcile_at("alice", t0());
        assert!(matches!(result, Err(TrackerError::Probe(ProbeError::Enumeration))));
        assert!(f.db.list_statuses().unwrap().is_empty());
    }

    #[test]
    fn test_store_fault_is_isolated_per_name() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let db = Arc::new(db);
        let registry = ProcessRegistry::new(Arc::clone(&db));
        registry.register("editor").unwrap();
        registry.register("shell").unwrap();

        let store = Arc::new(FlakyStore {
            inner: Arc::clone(&db),
            failing: HashSet::from(["shell".to_string()]),
        });
        let probe = Arc::new(ScriptedProbe::default());
        let reconciler = Reconciler::new(registry, store, probe, TimeDelta::minutes(10));

        let report = reconciler.reconcile_at("alice", t0()).unwrap();
        assert_eq!(report.not_running, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(statuses(&db).get("editor"), Some(&ProcessStatus::NotRunning));
    }

    #[test]
    fn test_dormant_detection_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracker.db");

        {
            let db = Database::open(&path).unwrap();
            db.initialize().unwrap();
            let f = fixture_with(Arc::new(db), &["editor"]);
            f.probe.set_running("editor", true);
            f.reconciler.reconcile_at("alice", t0()).unwrap();
        }

        let db = Database::open(&path).unwrap();
        db.initialize().unwrap();
        let f = fixture_with(Arc::new(db), &[]);
        f.reconciler
            .reconcile_at("alice", t0() + TimeDelta::minutes(30))
            .unwrap();
        let r = record(&f.db, "editor");
        assert_eq!(r.status, ProcessStatus::Dormant);
        assert_eq!(r.last_active, Some(t0()));
    }

    fn seeded_database(last_checked: &str, last_active: &str) -> (tempfile::TempDir, Arc<Database>) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracker.db");
        let db = Database::open(&path).unwrap();
        db.initialize().unwrap();

        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute(
            "INSERT INTO process_status (username, process_name, status, last_checked, last_active) VALUES ('alice', 'editor', 'running', ?1, ?2)",
            rusqlite::params![last_checked, last_active],
        )
        .unwrap();

        (dir, Arc::new(db))
    }

    #[test]
    fn test_resumes_from_offsetless_timestamps() {
        let (_dir, db) = seeded_database("2024-03-01T08:59:00.123456", "2024-03-01T08:55:00.123456");
        let f = fixture_with(db, &["editor"]);

        f.reconciler
            .reconcile_at("alice", t0() + TimeDelta::minutes(1))
            .unwrap();
        let r = record(&f.db, "editor");
        assert_eq!(r.status, ProcessStatus::NotRunning);
        assert_eq!(
            r.last_active,
            Some(t0() - TimeDelta::minutes(5) + TimeDelta::microseconds(123_456))
        );

        f.reconciler
            .reconcile_at("alice", t0() + TimeDelta::minutes(10))
            .unwrap();
        assert_eq!(record(&f.db, "editor").status, ProcessStatus::Dormant);

        f.probe.set_running("editor", true);
        for minute in [15, 20, 25] {
            let report = f
                .reconciler
                .reconcile_at("alice", t0() + TimeDelta::minutes(minute))
                .unwrap();
            assert_eq!(report.running, 1);
            assert!(report.failures.is_empty());
        }
        let r = record(&f.db, "editor");
        assert_eq!(r.status, ProcessStatus::Running);
        assert_eq!(r.last_active, Some(t0() + TimeDelta::minutes(25)));
    }

    #[test]
    fn test_unreadable_last_active_counts_as_never_seen() {
        let (_dir, db) = seeded_database("2024-03-01T08:59:00Z", "last tuesday");
        let f = fixture_with(db, &["editor"]);

        let report = f.reconciler.reconcile_at("alice", t0()).unwrap();
        assert!(report.failures.is_empty());
        assert_eq!(report.not_running, 1);

        f.probe.set_running("editor", true);
        let report = f
            .reconciler
            .reconcile_at("alice", t0() + TimeDelta::minutes(5))
            .unwrap();
        assert_eq!(report.running, 1);
        assert_eq!(
            record(&f.db, "editor").last_active,
            Some(t0() + TimeDelta::minutes(5))
        );
    }

    #[test]
    fn test_report_display() {
        let report = CycleReport {
            running: 1,
            not_running: 2,
            dormant: 0,
            failures: vec![],
        };
        assert_eq!(report.to_string(), "1 running, 2 not running, 0 dormant, 0 failed");

        let report = CycleReport {
            failures: vec![NameFailure {
                process_name: "shell".to_string(),
                error: "boom".to_string(),
            }],
            ..Default::default()
        };
        assert_eq!(
            report.to_string(),
            "0 running, 0 not running, 0 dormant, 1 failed; shell: boom"
        );
    }
}
