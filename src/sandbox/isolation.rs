//! Restrict-root-then-drop-privilege sequence run by the `sandbox-exec` helper.

use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use super::Supervision;
use crate::error::TunnelError;
use crate::Result;

const USAGE: &str = "usage: sandbox-exec [--timeout-ms N] [--watchdog-ms N] [--watch-pid PID] \
                     <root> <uid> <workdir> <command> [args...]";

/// Everything the helper needs to start and supervise one guest program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsolationRequest {
    /// Root image the guest is confined to (host path).
    pub root: PathBuf,
    /// Unprivileged user the guest runs as.
    pub uid: u32,
    /// Working directory inside the root image.
    pub workdir: PathBuf,
    /// Program to execute (path inside the root image).
    pub command: OsString,
    /// Program arguments.
    pub args: Vec<OsString>,
    /// Limits enforced while the guest runs.
    pub supervision: Supervision,
}

impl IsolationRequest {
    /// Parse `[options] <root> <uid> <workdir> <command> [args...]`.
    ///
    /// Options are only recognized before the command; everything after it
    /// is passed to the guest untouched.
    pub fn from_args<I>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = OsString>,
    {
        use lexopt::prelude::*;

        let bad = |e: lexopt::Error| TunnelError::BadRequest(e.to_string());
        let mut parser = lexopt::Parser::from_args(args);
        let mut supervision = Supervision::default();
        let mut positional: Vec<OsString> = Vec::with_capacity(4);

        while positional.len() < 4 {
            match parser.next().map_err(bad)? {
                Some(Long("timeout-ms")) => {
                    let ms = parser.value().and_then(|v| v.parse::<u64>()).map_err(bad)?;
                    supervision.timeout = Some(Duration::from_millis(ms));
                }
                Some(Long("watchdog-ms")) => {
                    let ms = parser.value().and_then(|v| v.parse::<u64>()).map_err(bad)?;
                    supervision.watchdog = Duration::from_millis(ms);
                }
                Some(Long("watch-pid")) => {
                    let pid = parser.value().and_then(|v| v.parse::<u32>()).map_err(bad)?;
                    supervision.watch_pid = Some(pid);
                }
                Some(Value(value)) => positional.push(value),
                Some(other) => return Err(bad(other.unexpected())),
                None => break,
            }
        }

        let [root, uid, workdir, command]: [OsString; 4] = positional
            .try_into()
            .map_err(|_| TunnelError::BadRequest(USAGE.to_string()))?;
        let uid = uid
            .to_str()
            .and_then(|s| s.parse::<u32>().ok())
            .ok_or_else(|| TunnelError::BadRequest("uid must be a number".to_string()))?;
        let args = parser.raw_args().map_err(bad)?.collect();

        Ok(Self {
            root: PathBuf::from(root),
            uid,
            workdir: PathBuf::from(workdir),
            command,
            args,
            supervision,
        })
    }

    /// Checks that must pass before any irreversible step.
    pub fn check_preconditions(&self) -> Result<()> {
        if !self.root.is_absolute() {
            return Err(TunnelError::AccessDenied(format!(
                "root image {} is not absolute",
                self.root.display()
            )));
        }
        if !self.root.is_dir() {
            return Err(TunnelError::AccessDenied(format!(
                "root image {} does not exist",
                self.root.display()
            )));
        }
        if self.uid == 0 {
            return Err(TunnelError::AccessDenied("refusing to run guest as uid 0".to_string()));
        }
        if self.command.is_empty() {
            return Err(TunnelError::AccessDenied("empty command".to_string()));
        }
        if !self.workdir.is_absolute() {
            return Err(TunnelError::AccessDenied(format!(
                "working directory {} is not absolute",
                self.workdir.display()
            )));
        }
        Ok(())
    }

    /// Start the guest and supervise it until it is gone.
    ///
    /// The helper forks: the child confines itself, drops privilege and
    /// becomes the guest, leading its own process group; the parent keeps
    /// root and enforces [`Supervision`] on that group. Returns the status
    /// the helper should exit with. Fails without starting anything if a
    /// precondition or the account lookup fails.
    #[cfg(target_os = "linux")]
    pub fn run(self) -> Result<i32> {
        sys::run(self)
    }

    #[cfg(not(target_os = "linux"))]
    pub fn run(self) -> Result<i32> {
        self.check_preconditions()?;
        Err(TunnelError::AccessDenied(
            "isolation is only supported on Linux".to_string(),
        ))
    }
}

#[cfg(target_os = "linux")]
mod sys {
    use std::convert::Infallible;
    use std::ffi::{CStr, CString};
    use std::io;
    use std::os::unix::ffi::OsStrExt;

    use super::IsolationRequest;
    use crate::error::TunnelError;
    use crate::execution::process_group::set_parent_death_signal;
    use crate::sandbox::{install_termination_handlers, supervise, HELPER_FAILURE_STATUS};
    use crate::Result;

    const MAX_GROUPS: usize = 65536;

    struct Account {
        name: CString,
        gid: libc::gid_t,
    }

    /// Everything the child needs, computed while the host's databases are
    /// still reachable.
    struct Prepared {
        root: CString,
        slash: CString,
        workdir: CString,
        program: CString,
        argv: Vec<CString>,
        uid: libc::uid_t,
        gid: libc::gid_t,
        groups: Vec<libc::gid_t>,
    }

    fn cstring(bytes: &[u8]) -> Result<CString> {
        CString::new(bytes).map_err(|_| TunnelError::AccessDenied("argument contains NUL".to_string()))
    }

    fn step(rc: libc::c_int, what: &str) -> Result<()> {
        if rc == 0 {
            Ok(())
        } else {
            Err(TunnelError::AccessDenied(format!(
                "{} failed: {}",
                what,
                io::Error::last_os_error()
            )))
        }
    }

    fn lookup_account(uid: libc::uid_t) -> Result<Account> {
        let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
        let mut buf = vec![0 as libc::c_char; 16 * 1024];
        let mut found: *mut libc::passwd = std::ptr::null_mut();

        let rc = unsafe { libc::getpwuid_r(uid, &mut pwd, buf.as_mut_ptr(), buf.len(), &mut found) };
        if rc != 0 || found.is_null() {
            return Err(TunnelError::AccessDenied(format!("uid {} has no account", uid)));
        }

        let name = unsafe { CStr::from_ptr(pwd.pw_name) }.to_owned();
        Ok(Account { name, gid: pwd.pw_gid })
    }

    fn group_list(account: &Account) -> Result<Vec<libc::gid_t>> {
        let mut capacity: usize = 32;
        loop {
            let mut groups = vec![0 as libc::gid_t; capacity];
            let mut count = capacity as libc::c_int;
            let rc = unsafe {
                libc::getgrouplist(account.name.as_ptr(), account.gid, groups.as_mut_ptr(), &mut count)
            };
            if rc >= 0 {
                groups.truncate(count.max(0) as usize);
                return Ok(groups);
            }
            let wanted = (count.max(0) as usize).max(capacity * 2);
            if wanted > MAX_GROUPS {
                return Err(TunnelError::AccessDenied("too many supplementary groups".to_string()));
            }
            capacity = wanted;
        }
    }

    fn prepare(request: &IsolationRequest) -> Result<Prepared> {
        request.check_preconditions()?;

        let account = lookup_account(request.uid)?;
        if account.gid == 0 {
            return Err(TunnelError::AccessDenied(format!(
                "uid {} has primary group 0",
                request.uid
            )));
        }
        let groups = group_list(&account)?;
        if groups.contains(&0) {
            return Err(TunnelError::AccessDenied(format!(
                "uid {} is a member of group 0",
                request.uid
            )));
        }

        let program = cstring(request.command.as_bytes())?;
        let mut argv = vec![program.clone()];
        for arg in &request.args {
            argv.push(cstring(arg.as_bytes())?);
        }

        Ok(Prepared {
            root: cstring(request.root.as_os_str().as_bytes())?,
            slash: cstring(b"/")?,
            workdir: cstring(request.workdir.as_os_str().as_bytes())?,
            program,
            argv,
            uid: request.uid,
            gid: account.gid,
            groups,
        })
    }

    impl Prepared {
        /// Child side: confine, drop privilege and replace the process
        /// image. Only returns on failure; nothing of the target runs unless
        /// every step succeeded.
        fn enter(&self, supervisor: libc::pid_t) -> Result<Infallible> {
            step(unsafe { libc::setpgid(0, 0) }, "setpgid")?;
            take_terminal_foreground();

            step(unsafe { libc::chroot(self.root.as_ptr()) }, "chroot")?;
            step(unsafe { libc::chdir(self.slash.as_ptr()) }, "chdir to new root")?;

            // Groups first: once the uid is gone so is the right to change them.
            step(unsafe { libc::setgroups(self.groups.len(), self.groups.as_ptr()) }, "setgroups")?;
            step(unsafe { libc::setgid(self.gid) }, "setgid")?;
            step(unsafe { libc::setuid(self.uid) }, "setuid")?;

            unsafe {
                if libc::getuid() == 0 || libc::geteuid() == 0 {
                    return Err(TunnelError::AccessDenied("privilege drop did not take effect".to_string()));
                }
                if libc::getgid() == 0 || libc::getegid() == 0 {
                    return Err(TunnelError::AccessDenied("group drop did not take effect".to_string()));
                }
                if libc::setuid(0) == 0 {
                    return Err(TunnelError::AccessDenied("privilege can be regained".to_string()));
                }
            }

            // The credential change cleared any death signal.
            set_parent_death_signal(supervisor)
                .map_err(|e| TunnelError::AccessDenied(format!("prctl failed: {}", e)))?;

            // Workspaces are shared with the server, which runs as another
            // user; whatever the guest creates there must stay writable.
            unsafe {
                libc::umask(0);
            }

            step(unsafe { libc::chdir(self.workdir.as_ptr()) }, "chdir to working directory")?;

            let mut argv: Vec<*const libc::c_char> = self.argv.iter().map(|a| a.as_ptr()).collect();
            argv.push(std::ptr::null());
            unsafe {
                libc::execvp(self.program.as_ptr(), argv.as_ptr());
            }
            Err(TunnelError::AccessDenied(format!(
                "exec {} failed: {}",
                self.program.to_string_lossy(),
                io::Error::last_os_error()
            )))
        }
    }

    /// Make the calling process group the foreground group of the
    /// controlling terminal, if stdin is one. An interactive guest in a
    /// background group is stopped on its first read.
    fn take_terminal_foreground() {
        unsafe {
            if libc::isatty(libc::STDIN_FILENO) == 1 {
                let previous = libc::signal(libc::SIGTTOU, libc::SIG_IGN);
                libc::tcsetpgrp(libc::STDIN_FILENO, libc::getpgrp());
                libc::signal(libc::SIGTTOU, previous);
            }
        }
    }

    pub(super) fn run(request: IsolationRequest) -> Result<i32> {
        let prepared = prepare(&request)?;
        install_termination_handlers();
        let supervisor = unsafe { libc::getpid() };

        match unsafe { libc::fork() } {
            -1 => Err(TunnelError::AccessDenied(format!(
                "fork failed: {}",
                io::Error::last_os_error()
            ))),
            0 => {
                if let Err(e) = prepared.enter(supervisor) {
                    eprintln!("sandbox-exec: {}", e);
                }
                unsafe { libc::_exit(HELPER_FAILURE_STATUS) }
            }
            child => {
                // Whichever side runs first creates the group.
                unsafe {
                    libc::setpgid(child, child);
                }
                Ok(supervise(child as u32, &request.supervision).status())
            }
        }
    }
}
