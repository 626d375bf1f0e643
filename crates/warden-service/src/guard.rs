//! Background enforcement loop for locked applications.
//!
//! Polls the process table on a fixed interval, cross-references the active
//! lock set, and neutralizes matches: suspend on first sight, terminate
//! after a bounded grace interval. Matching contract: an exact
//! executable-path match always takes precedence over the basename
//! fallback (which exists to tolerate PATH-resolved invocations).

use crate::process::{ProcessControl, ProcessInfo, ProcessTable};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use warden_core::records::{AuditEvent, LockRecord, ResourceKind};
use warden_core::settings::WardenSettings;
use warden_core::store::RecordStore;
use warden_core::{Result, WardenError};

#[derive(Debug, Clone)]
pub struct GuardConfig {
    pub poll_interval: Duration,
    pub grace: Duration,
    pub stop_timeout: Duration,
}

impl GuardConfig {
    pub fn from_settings(settings: &WardenSettings) -> Self {
        Self {
            poll_interval: Duration::from_secs(settings.enforcement.poll_interval_secs),
            grace: Duration::from_secs(settings.enforcement.grace_secs),
            stop_timeout: Duration::from_secs(5),
        }
    }
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            grace: Duration::from_secs(1),
            stop_timeout: Duration::from_secs(5),
        }
    }
}

pub struct ProcessGuard {
    store: Arc<dyn RecordStore>,
    table: Arc<dyn ProcessTable>,
    control: Arc<dyn ProcessControl>,
    config: GuardConfig,
    suspended: Arc<Mutex<HashMap<u32, Instant>>>,
    task: Mutex<Option<(JoinHandle<()>, watch::Sender<bool>)>>,
}

impl ProcessGuard {
    pub fn new(
        store: Arc<dyn RecordStore>,
        table: Arc<dyn ProcessTable>,
        control: Arc<dyn ProcessControl>,
        config: GuardConfig,
    ) -> Self {
        Self {
            store,
            table,
            control,
            config,
            suspended: Arc::new(Mutex::new(HashMap::new())),
            task: Mutex::new(None),
        }
    }

    /// Start the polling task. Idempotent; a running guard is left alone.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.is_some() {
            warn!("process guard already running");
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let store = self.store.clone();
        let table = self.table.clone();
        let control = self.control.clone();
        let suspended = self.suspended.clone();
        let interval = self.config.poll_interval;
        let grace = self.config.grace;

        let handle = tokio::spawn(async move {
            info!(interval_secs = interval.as_secs_f64(), "process guard started");
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            info!("process guard shutting down");
                            return;
                        }
                    }
                }
                if *shutdown_rx.borrow() {
                    return;
                }
                tick(&*store, &*table, &*control, &suspended, grace);
            }
        });

        *task = Some((handle, shutdown_tx));
    }

    /// Signal the loop to exit and wait for it, bounded by the configured
    /// stop timeout. Idempotent; stopping a stopped guard is a no-op.
    pub async fn stop(&self) {
        let Some((handle, shutdown_tx)) = self.task.lock().take() else {
            return;
        };
        let _ = shutdown_tx.send(true);
        let abort = handle.abort_handle();
        match tokio::time::timeout(self.config.stop_timeout, handle).await {
            Ok(_) => info!("process guard stopped"),
            Err(_) => {
                warn!("process guard did not stop in time; aborting task");
                abort.abort();
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }

    /// Resume a suspended process. Returns whether the signal was
    /// delivered; a pid that already exited is a non-fatal race.
    pub fn resume(&self, pid: u32) -> Result<bool> {
        let delivered = match self.control.resume(pid) {
            Ok(()) => true,
            Err(WardenError::ProcessRace(_)) => false,
            Err(err) => return Err(err),
        };
        self.suspended.lock().remove(&pid);
        Ok(delivered)
    }

    /// Terminate a process. Returns whether the signal was delivered; a
    /// pid that already exited is a non-fatal race.
    pub fn terminate(&self, pid: u32) -> Result<bool> {
        let delivered = match self.control.terminate(pid) {
            Ok(()) => true,
            Err(WardenError::ProcessRace(_)) => false,
            Err(err) => return Err(err),
        };
        self.suspended.lock().remove(&pid);
        Ok(delivered)
    }

    pub fn suspended_pids(&self) -> Vec<u32> {
        self.suspended.lock().keys().copied().collect()
    }
}

/// One polling pass: terminate suspended processes whose grace expired,
/// then match the process table against the active lock set.
fn tick(
    store: &dyn RecordStore,
    table: &dyn ProcessTable,
    control: &dyn ProcessControl,
    suspended: &Mutex<HashMap<u32, Instant>>,
    grace: Duration,
) {
    reap_expired(control, suspended, grace);

    let locks = match store.active_locks() {
        Ok(locks) => locks,
        Err(err) => {
            warn!(error = %err, "could not read active locks; skipping pass");
            return;
        }
    };
    if locks.is_empty() {
        return;
    }

    for proc in table.processes() {
        let Some(lock) = match_lock(&proc, &locks) else {
            continue;
        };
        {
            // Idempotency guard: never suspend the same pid twice.
            let held = suspended.lock();
            if held.contains_key(&proc.pid) {
                continue;
            }
        }
        match control.suspend(proc.pid) {
            Ok(()) => {
                suspended.lock().insert(proc.pid, Instant::now());
                info!(pid = proc.pid, app = %lock.app_name, "suspended locked application");
                let event = AuditEvent::new(ResourceKind::Application, lock.app_name.clone(), false);
                if let Err(err) = store.append_audit(event) {
                    warn!(error = %err, "failed to append audit event");
                }
            }
            Err(WardenError::ProcessRace(_)) => {
                debug!(pid = proc.pid, "process vanished before suspension");
            }
            Err(err) => {
                warn!(pid = proc.pid, error = %err, "suspend failed");
            }
        }
    }
}

fn reap_expired(control: &dyn ProcessControl, suspended: &Mutex<HashMap<u32, Instant>>, grace: Duration) {
    let expired: Vec<u32> = suspended
        .lock()
        .iter()
        .filter(|(_, since)| since.elapsed() >= grace)
        .map(|(pid, _)| *pid)
        .collect();
    for pid in expired {
        match control.terminate(pid) {
            Ok(()) => info!(pid, "terminated locked application after grace interval"),
            Err(WardenError::ProcessRace(_)) => debug!(pid, "process exited before termination"),
            Err(err) => warn!(pid, error = %err, "terminate failed"),
        }
        suspended.lock().remove(&pid);
    }
}

/// Find the lock record a process violates, if any. Exact executable-path
/// equality beats the basename fallback; the fallback only applies when no
/// lock matches exactly.
fn match_lock<'a>(proc: &ProcessInfo, locks: &'a [LockRecord]) -> Option<&'a LockRecord> {
    let exe = proc.exe.as_deref()?;
    if let Some(lock) = locks.iter().find(|l| l.app_path == exe) {
        return Some(lock);
    }
    let exe_name = exe.file_name()?;
    locks
        .iter()
        .find(|l| l.app_path.file_name() == Some(exe_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn proc(pid: u32, exe: &str) -> ProcessInfo {
        ProcessInfo {
            pid,
            exe: Some(PathBuf::from(exe)),
            name: PathBuf::from(exe)
                .file_name()
                .unwrap()
                .to_string_lossy()
                .into_owned(),
        }
    }

    #[test]
    fn exact_match_beats_basename() {
        // The basename candidate is listed first; precedence must not
        // depend on record order.
        let locks = vec![
            LockRecord::new("basename-foo", "/opt/other/foo"),
            LockRecord::new("exact-foo", "/usr/bin/foo"),
        ];
        let matched = match_lock(&proc(10, "/usr/bin/foo"), &locks).unwrap();
        assert_eq!(matched.app_name, "exact-foo");
    }

    #[test]
    fn basename_fallback_applies_without_exact_match() {
        let locks = vec![LockRecord::new("tool", "/opt/app/tool")];
        let matched = match_lock(&proc(11, "/usr/local/bin/tool"), &locks).unwrap();
        assert_eq!(matched.app_name, "tool");
        assert!(match_lock(&proc(12, "/usr/bin/unrelated"), &locks).is_none());
    }

    #[test]
    fn processes_without_exe_are_ignored() {
        let locks = vec![LockRecord::new("foo", "/usr/bin/foo")];
        let no_exe = ProcessInfo {
            pid: 13,
            exe: None,
            name: "foo".into(),
        };
        assert!(match_lock(&no_exe, &locks).is_none());
    }
}
