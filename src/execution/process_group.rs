//! Process-group helpers for reliable reclamation of guest processes.
//!
//! Every guest is spawned as the leader of its own process group, so a
//! single `killpg` reaches anything it forked. On Linux a host-mode guest
//! also gets `SIGKILL` when the server dies. The death signal does not
//! survive a setuid exec or a credential change, so sandboxed guests rely on
//! the helper's supervision instead.

use std::io;

/// Prepare a command so the child leads its own process group and (Linux)
/// dies with the server.
#[cfg(unix)]
pub fn configure(cmd: &mut tokio::process::Command) {
    cmd.process_group(0);

    #[cfg(target_os = "linux")]
    {
        let parent = unsafe { libc::getpid() };
        // SAFETY: only async-signal-safe libc calls run between fork and exec.
        unsafe {
            cmd.pre_exec(move || set_parent_death_signal(parent));
        }
    }
}

#[cfg(not(unix))]
pub fn configure(_cmd: &mut tokio::process::Command) {}

/// Arrange for the calling process to receive `SIGKILL` when its parent dies.
///
/// `parent` is captured before fork; if the parent is already gone the
/// signal is raised immediately.
#[cfg(target_os = "linux")]
pub fn set_parent_death_signal(parent: libc::pid_t) -> io::Result<()> {
    if unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL) } == -1 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::getppid() } != parent {
        unsafe {
            libc::raise(libc::SIGKILL);
        }
    }
    Ok(())
}

/// Send `SIGKILL` to the process group led by `pid`.
///
/// Returns `true` if the signal was delivered. A group that is already gone
/// is not an error.
#[cfg(unix)]
pub fn kill_group(pid: u32) -> bool {
    signal_group(pid, libc::SIGKILL)
}

/// Send `signal` to the process group led by `pid`.
#[cfg(unix)]
pub fn signal_group(pid: u32, signal: libc::c_int) -> bool {
    // killpg(0) would hit our own group.
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pgid <= 1 {
        return false;
    }

    if unsafe { libc::killpg(pgid, signal) } == 0 {
        return true;
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() != Some(libc::ESRCH) {
        tracing::debug!(pgid, signal, "killpg failed: {}", err);
    }
    false
}

/// Ask the process group led by `pid` to terminate.
#[cfg(unix)]
pub fn terminate_group(pid: u32) -> bool {
    signal_group(pid, libc::SIGTERM)
}

#[cfg(not(unix))]
pub fn kill_group(_pid: u32) -> bool {
    false
}

#[cfg(not(unix))]
pub fn terminate_group(_pid: u32) -> bool {
    false
}
