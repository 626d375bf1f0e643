//! OS process table and process control primitives.
//!
//! Both surfaces are traits so the guard loop can be driven by fakes in
//! tests. The real adapters tolerate processes disappearing mid-operation:
//! a vanished or inaccessible pid is an expected race, not a failure.

use std::path::PathBuf;
use sysinfo::System;
use warden_core::{Result, WardenError};

/// A live process as seen by one enumeration pass.
#[derive(Debug, Clone)]
pub struct ProcessInfo {
    pub pid: u32,
    pub exe: Option<PathBuf>,
    pub name: String,
}

/// Enumerate live processes. Processes may exit between enumeration and
/// any subsequent action on them.
pub trait ProcessTable: Send + Sync {
    fn processes(&self) -> Vec<ProcessInfo>;
}

/// Suspend/resume/terminate by pid.
///
/// A process that is already gone or inaccessible surfaces as
/// `WardenError::ProcessRace`; callers treat that as an expected, non-fatal
/// outcome. Any other error is a genuinely unexpected OS failure.
pub trait ProcessControl: Send + Sync {
    fn suspend(&self, pid: u32) -> Result<()>;
    fn resume(&self, pid: u32) -> Result<()>;
    fn terminate(&self, pid: u32) -> Result<()>;
}

/// Process table backed by `sysinfo`.
pub struct SystemProcessTable {
    sys: parking_lot::Mutex<System>,
}

impl SystemProcessTable {
    pub fn new() -> Self {
        Self {
            sys: parking_lot::Mutex::new(System::new()),
        }
    }
}

impl Default for SystemProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable for SystemProcessTable {
    fn processes(&self) -> Vec<ProcessInfo> {
        let mut sys = self.sys.lock();
        sys.refresh_processes();
        sys.processes()
            .iter()
            .map(|(pid, proc)| ProcessInfo {
                pid: pid.as_u32(),
                exe: proc.exe().map(|p| p.to_path_buf()),
                name: proc.name().to_string(),
            })
            .collect()
    }
}

/// Process control via POSIX signals (SIGSTOP/SIGCONT/SIGTERM).
pub struct SignalProcessControl;

#[cfg(unix)]
fn send_signal(pid: u32, signal: libc::c_int) -> Result<()> {
    let Ok(pid_i32) = i32::try_from(pid) else {
        return Err(WardenError::ProcessRace(pid));
    };
    if pid_i32 <= 0 {
        return Err(WardenError::ProcessRace(pid));
    }
    let rc = unsafe { libc::kill(pid_i32, signal) };
    if rc == 0 {
        return Ok(());
    }
    let errno = std::io::Error::last_os_error();
    match errno.raw_os_error() {
        // Process exited, or we may not signal it: expected races.
        Some(code) if code == libc::ESRCH || code == libc::EPERM => {
            Err(WardenError::ProcessRace(pid))
        }
        _ => Err(errno.into()),
    }
}

#[cfg(unix)]
impl ProcessControl for SignalProcessControl {
    fn suspend(&self, pid: u32) -> Result<()> {
        send_signal(pid, libc::SIGSTOP)
    }

    fn resume(&self, pid: u32) -> Result<()> {
        send_signal(pid, libc::SIGCONT)
    }

    fn terminate(&self, pid: u32) -> Result<()> {
        send_signal(pid, libc::SIGTERM)
    }
}

#[cfg(not(unix))]
impl ProcessControl for SignalProcessControl {
    fn suspend(&self, pid: u32) -> Result<()> {
        Err(WardenError::ProcessRace(pid))
    }

    fn resume(&self, pid: u32) -> Result<()> {
        Err(WardenError::ProcessRace(pid))
    }

    fn terminate(&self, pid: u32) -> Result<()> {
        Err(WardenError::ProcessRace(pid))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn signal_roundtrip_on_real_child() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id();
        let control = SignalProcessControl;

        control.suspend(pid).unwrap();
        control.resume(pid).unwrap();
        control.terminate(pid).unwrap();

        child.wait().unwrap();
    }

    #[test]
    fn vanished_pid_is_a_non_fatal_race() {
        let control = SignalProcessControl;
        // A pid far above any plausible pid_max allocation.
        assert!(matches!(
            control.terminate(u32::MAX - 1),
            Err(WardenError::ProcessRace(_))
        ));
        assert!(matches!(
            control.resume(0),
            Err(WardenError::ProcessRace(_))
        ));
    }

    #[test]
    fn table_lists_this_process() {
        let table = SystemProcessTable::new();
        let me = std::process::id();
        assert!(table.processes().iter().any(|p| p.pid == me));
    }
}
