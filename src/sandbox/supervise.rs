//! Limits the privileged helper enforces on the guest it started.
//!
//! The guest runs under a uid the server cannot signal, so reclamation is
//! the helper's job: it stays behind as the guest's root parent, kills the
//! guest's process group on timeout or when the server goes away, and kills
//! the group again if anything survives the watchdog margin.

use std::ffi::OsString;
#[cfg(unix)]
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
#[cfg(unix)]
use std::time::Instant;

#[cfg(unix)]
use super::{HELPER_FAILURE_STATUS, HELPER_TIMEOUT_STATUS};
#[cfg(unix)]
use crate::execution::process_group::kill_group;

/// Default delay between the first kill and the re-kill.
pub const DEFAULT_GUEST_WATCHDOG: Duration = Duration::from_millis(1000);

/// How often the helper checks on its guest.
#[cfg(unix)]
const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[cfg(unix)]
static TERMINATE: AtomicBool = AtomicBool::new(false);

/// Reclamation limits passed from the server to the helper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Supervision {
    /// Hard time limit; `None` for interactive shells.
    pub timeout: Option<Duration>,
    /// Margin after the first kill before the group is killed again.
    pub watchdog: Duration,
    /// Server process; the guest is reclaimed once it is gone.
    pub watch_pid: Option<u32>,
}

impl Default for Supervision {
    fn default() -> Self {
        Self {
            timeout: None,
            watchdog: DEFAULT_GUEST_WATCHDOG,
            watch_pid: None,
        }
    }
}

impl Supervision {
    /// Supervision for a guest started by this server process.
    pub fn for_server(timeout: Option<Duration>, watchdog: Duration) -> Self {
        Self {
            timeout,
            watchdog,
            watch_pid: Some(std::process::id()),
        }
    }

    /// Helper options: `[--timeout-ms N] --watchdog-ms N [--watch-pid PID]`.
    pub fn to_args(&self) -> Vec<OsString> {
        let mut args = Vec::with_capacity(6);
        if let Some(timeout) = self.timeout {
            args.push("--timeout-ms".into());
            args.push(millis(timeout).into());
        }
        args.push("--watchdog-ms".into());
        args.push(millis(self.watchdog).into());
        if let Some(pid) = self.watch_pid {
            args.push("--watch-pid".into());
            args.push(pid.to_string().into());
        }
        args
    }
}

fn millis(duration: Duration) -> String {
    duration.as_millis().to_string()
}

/// How a supervised guest ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuestExit {
    /// Exited on its own.
    Exited(i32),
    /// Killed by a signal the helper did not send.
    Signaled(i32),
    /// Killed because the time limit passed.
    TimedOut,
    /// Killed because the server (or the helper's own parent) went away.
    Abandoned,
}

#[cfg(unix)]
impl GuestExit {
    /// Exit status the helper reports for this outcome.
    pub fn status(self) -> i32 {
        match self {
            GuestExit::Exited(code) => code,
            GuestExit::Signaled(signal) => 128 + signal,
            GuestExit::TimedOut => HELPER_TIMEOUT_STATUS,
            GuestExit::Abandoned => 128 + libc::SIGKILL,
        }
    }
}

#[cfg(unix)]
extern "C" fn on_terminate(_signal: libc::c_int) {
    TERMINATE.store(true, Ordering::SeqCst);
}

/// Turn `SIGTERM`, `SIGINT` and `SIGHUP` into a request to reclaim the guest.
///
/// Handlers are reset by exec, so the guest starts with default dispositions.
#[cfg(unix)]
pub fn install_termination_handlers() {
    let handler = on_terminate as extern "C" fn(libc::c_int) as libc::sighandler_t;
    for signal in [libc::SIGTERM, libc::SIGINT, libc::SIGHUP] {
        unsafe {
            libc::signal(signal, handler);
        }
    }
}

#[cfg(unix)]
fn process_exists(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
}

/// Reap `pid` if it has ended.
#[cfg(unix)]
fn try_reap(pid: libc::pid_t) -> Option<GuestExit> {
    let mut status: libc::c_int = 0;
    loop {
        match unsafe { libc::waitpid(pid, &mut status, libc::WNOHANG) } {
            0 => return None,
            -1 if std::io::Error::last_os_error().raw_os_error() == Some(libc::EINTR) => continue,
            // Not our child (or already reaped): nothing left to wait for.
            -1 => return Some(GuestExit::Exited(HELPER_FAILURE_STATUS)),
            _ => break,
        }
    }
    if libc::WIFEXITED(status) {
        Some(GuestExit::Exited(libc::WEXITSTATUS(status)))
    } else if libc::WIFSIGNALED(status) {
        Some(GuestExit::Signaled(libc::WTERMSIG(status)))
    } else {
        None
    }
}

/// Wait for the guest leading process group `pid`, enforcing `supervision`.
///
/// Whatever the outcome, the guest's group is killed before returning so
/// background jobs never outlive the run.
#[cfg(unix)]
pub fn supervise(pid: u32, supervision: &Supervision) -> GuestExit {
    let Ok(leader) = libc::pid_t::try_from(pid) else {
        return GuestExit::Exited(HELPER_FAILURE_STATUS);
    };
    let start = Instant::now();
    let parent = unsafe { libc::getppid() };
    let mut reason: Option<GuestExit> = None;
    let mut killed_at: Option<Instant> = None;
    let mut rekilled = false;

    loop {
        if let Some(exit) = try_reap(leader) {
            kill_group(pid);
            return reason.unwrap_or(exit);
        }

        let now = Instant::now();
        match killed_at {
            None => {
                let stop = if supervision.timeout.is_some_and(|t| now.duration_since(start) >= t) {
                    Some(GuestExit::TimedOut)
                } else if TERMINATE.load(Ordering::SeqCst)
                    || unsafe { libc::getppid() } != parent
                    || supervision.watch_pid.is_some_and(|p| !process_exists(p))
                {
                    Some(GuestExit::Abandoned)
                } else {
                    None
                };
                if let Some(stop) = stop {
                    kill_group(pid);
                    reason = Some(stop);
                    killed_at = Some(now);
                }
            }
            Some(at) if !rekilled && now.duration_since(at) >= supervision.watchdog => {
                kill_group(pid);
                rekilled = true;
            }
            Some(_) => {}
        }

        std::thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};
    use std::os::unix::process::CommandExt;
    use std::process::{Command, Stdio};

    fn guest(script: &str) -> std::process::Child {
        Command::new("/bin/sh")
            .arg("-c")
            .arg(script)
            .process_group(0)
            .stdout(Stdio::piped())
            .spawn()
            .unwrap()
    }

    fn is_gone(pid: u32) -> bool {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => stat
                .rsplit_once(')')
                .map(|(_, rest)| rest.trim_start().starts_with('Z'))
                .unwrap_or(false),
            Err(_) => true,
        }
    }

    #[test]
    fn test_supervision_args() {
        let supervision = Supervision {
            timeout: Some(Duration::from_secs(2)),
            watchdog: Duration::from_millis(250),
            watch_pid: Some(42),
        };
        let args: Vec<_> = supervision
            .to_args()
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec!["--timeout-ms", "2000", "--watchdog-ms", "250", "--watch-pid", "42"]
        );

        let interactive = Supervision::default().to_args();
        assert_eq!(interactive.len(), 2);
    }

    #[test]
    fn test_exit_status_passes_through() {
        let child = guest("exit 7");
        assert_eq!(supervise(child.id(), &Supervision::default()), GuestExit::Exited(7));
        assert_eq!(GuestExit::Exited(7).status(), 7);
    }

    #[test]
    fn test_signal_death_reported() {
        let child = guest("kill -TERM $$");
        let exit = supervise(child.id(), &Supervision::default());
        assert_eq!(exit, GuestExit::Signaled(libc::SIGTERM));
        assert_eq!(exit.status(), 128 + libc::SIGTERM);
    }

    #[test]
    fn test_timeout_kills_guest() {
        let child = guest("sleep 30");
        let supervision = Supervision {
            timeout: Some(Duration::from_millis(200)),
            watchdog: Duration::from_millis(100),
            watch_pid: None,
        };

        let start = Instant::now();
        let exit = supervise(child.id(), &supervision);
        assert_eq!(exit, GuestExit::TimedOut);
        assert_eq!(exit.status(), HELPER_TIMEOUT_STATUS);
        assert!(start.elapsed() < Duration::from_secs(3), "took {:?}", start.elapsed());
    }

    #[test]
    fn test_background_jobs_reclaimed_after_exit() {
        let mut child = guest("sleep 30 & echo $!; exit 0");
        let mut line = String::new();
        BufReader::new(child.stdout.take().unwrap())
            .read_line(&mut line)
            .unwrap();
        let background: u32 = line.trim().parse().unwrap();

        assert_eq!(supervise(child.id(), &Supervision::default()), GuestExit::Exited(0));

        let deadline = Instant::now() + Duration::from_secs(3);
        while !is_gone(background) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(is_gone(background), "background job {} survived", background);
    }

    #[test]
    fn test_guest_reclaimed_when_server_dies() {
        let mut server = Command::new("/bin/sh").arg("-c").arg("sleep 30").spawn().unwrap();
        let child = guest("sleep 30");
        let supervision = Supervision {
            timeout: None,
            watchdog: Duration::from_millis(100),
            watch_pid: Some(server.id()),
        };

        let killer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(200));
            server.kill().unwrap();
            server.wait().unwrap();
        });

        let start = Instant::now();
        assert_eq!(supervise(child.id(), &supervision), GuestExit::Abandoned);
        assert!(start.elapsed() < Duration::from_secs(3));
        killer.join().unwrap();
    }
}
