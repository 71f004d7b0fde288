use crate::error::TerminationError;
use crate::logging::debug;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// `kill(pid, 0)`; EPERM still means the process exists.
pub fn process_alive(pid: u32) -> bool {
    let Some(target) = to_pid(pid) else {
        return false;
    };
    match kill(target, None) {
        Ok(()) => true,
        Err(errno) => errno == Errno::EPERM,
    }
}

/// SIGTERM, wait up to `grace` for the process to go away, then SIGKILL.
///
/// Blocks the calling thread; callers on the async runtime go through
/// `spawn_blocking`.
pub fn terminate_process(pid: u32, grace: Duration) -> Result<(), TerminationError> {
    // pid 0 and negative values address process groups, never a single process.
    let target = to_pid(pid).ok_or(TerminationError::NotFound(pid))?;

    kill(target, Signal::SIGTERM).map_err(|errno| map_errno(pid, errno))?;

    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        if !process_alive(pid) {
            return Ok(());
        }
        thread::sleep(POLL_INTERVAL);
    }

    match kill(target, Signal::SIGKILL) {
        Ok(()) => {
            debug(format!("pid={} sent SIGKILL", pid));
            Ok(())
        }
        // Exited between the last poll and the SIGKILL.
        Err(Errno::ESRCH) => Ok(()),
        Err(errno) => Err(map_errno(pid, errno)),
    }
}

fn to_pid(pid: u32) -> Option<Pid> {
    i32::try_from(pid).ok().filter(|raw| *raw > 0).map(Pid::from_raw)
}

fn map_errno(pid: u32, errno: Errno) -> TerminationError {
    match errno {
        Errno::ESRCH => TerminationError::NotFound(pid),
        Errno::EPERM => TerminationError::PermissionDenied(pid),
        other => TerminationError::Os {
            pid,
            message: other.desc().to_string(),
        },
    }
}
