//! Process-table probes.
//!
//! Two concerns: pid liveness for lock stale-holder detection (Unix
//! `kill(pid, 0)`, the probe-without-signal idiom) and a sysinfo scan for
//! running assistant processes matched by name, with their working
//! directories for repository attribution.

use std::path::PathBuf;

use sysinfo::{ProcessRefreshKind, System, UpdateKind};

use crate::error::ProbeError;

/// One running assistant process found by the scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssistantProcess {
    pub pid: u32,
    pub cwd: PathBuf,
    /// Parent process, used to associate the session with its host terminal.
    pub host_pid: Option<u32>,
}

/// Return `true` if the OS process is still alive.
///
/// Uses `kill(pid, 0)` on Unix. Always `false` on non-Unix platforms
/// (conservative: treat as dead).
pub fn pid_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        if pid == 0 || pid > i32::MAX as u32 {
            return false;
        }
        // SAFETY: signal 0 performs validity checks only; no signal is sent.
        unsafe { libc::kill(pid as i32, 0) == 0 }
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

/// Scan the process table for assistant processes matching `name`.
///
/// Blocking; callers run this under `spawn_blocking`.
pub fn scan_by_name(name: &str) -> Result<Vec<AssistantProcess>, ProbeError> {
    let mut sys = System::new();
    sys.refresh_processes_specifics(
        ProcessRefreshKind::new()
            .with_cmd(UpdateKind::Always)
            .with_cwd(UpdateKind::Always),
    );

    let mut found = Vec::new();
    for (pid, process) in sys.processes() {
        if !process_matches(process.name(), name) {
            continue;
        }
        let Some(cwd) = process.cwd() else {
            // Inaccessible cwd (permissions, zombie); nothing to attribute.
            continue;
        };
        found.push(AssistantProcess {
            pid: pid.as_u32(),
            cwd: cwd.to_path_buf(),
            host_pid: process.parent().map(|p| p.as_u32()),
        });
    }
    Ok(found)
}

fn process_matches(process_name: &str, wanted: &str) -> bool {
    process_name == wanted || process_name.strip_suffix(".exe") == Some(wanted)
}
