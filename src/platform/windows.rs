use crate::error::TerminationError;
use crate::logging::debug;
use std::thread;
use std::time::{Duration, Instant};
use sysinfo::{Pid, ProcessesToUpdate, System};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

fn refreshed(pid: u32) -> (System, Pid) {
    let sys_pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[sys_pid]), true);
    (system, sys_pid)
}

pub fn process_alive(pid: u32) -> bool {
    let (system, sys_pid) = refreshed(pid);
    system.process(sys_pid).is_some()
}

/// `TerminateProcess` through sysinfo, then wait up to `grace` for the exit.
pub fn terminate_process(pid: u32, grace: Duration) -> Result<(), TerminationError> {
    let (system, sys_pid) = refreshed(pid);
    let process = system.process(sys_pid).ok_or(TerminationError::NotFound(pid))?;

    if !process.kill() {
        return Err(TerminationError::PermissionDenied(pid));
    }
    debug(format!("pid={} kill requested", pid));

    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        if !process_alive(pid) {
            return Ok(());
        }
        thread::sleep(POLL_INTERVAL);
    }

    if process_alive(pid) {
        return Err(TerminationError::Os {
            pid,
            message: format!("still running {:?} after kill", grace),
        });
    }
    Ok(())
}
