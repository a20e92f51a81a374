//! Process liveness helpers

use std::path::Path;
use sysinfo::{Pid, ProcessesToUpdate, System};

/// Check if a process with the given pid is running
pub fn is_alive(pid: u32) -> bool {
    let mut sys = System::new();
    let pids = [Pid::from_u32(pid)];
    sys.refresh_processes(ProcessesToUpdate::Some(&pids), true);
    sys.process(Pid::from_u32(pid)).is_some()
}

/// Read a pid file, ignoring anything that is not a positive integer
pub fn read_pid_file(path: &Path) -> Option<u32> {
    let raw = std::fs::read_to_string(path).ok()?;
    let parsed = raw.trim().parse::<u32>().ok()?;
    if parsed == 0 {
        None
    } else {
        Some(parsed)
    }
}

/// Write the current process id to a pid file
pub fn write_pid_file(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, format!("{}\n", std::process::id()))
}
