//! Building the helper invocation that runs a guest inside the root image.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tokio::process::Command;

use super::Supervision;
use crate::error::TunnelError;
use crate::Result;

/// One argument handed to a guest program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuestArg {
    /// Host path; translated to its in-image location when sandboxed.
    Path(PathBuf),
    /// Passed through unchanged.
    Literal(OsString),
}

impl GuestArg {
    /// Literal argument.
    pub fn literal(arg: impl Into<OsString>) -> Self {
        GuestArg::Literal(arg.into())
    }

    /// Host form of the argument.
    pub fn to_host(&self) -> OsString {
        match self {
            GuestArg::Path(path) => path.clone().into_os_string(),
            GuestArg::Literal(arg) => arg.clone(),
        }
    }
}

/// Spawns guests through the `sandbox-exec` helper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxLauncher {
    root: PathBuf,
    uid: u32,
    helper: PathBuf,
    use_sudo: bool,
}

impl SandboxLauncher {
    /// Create a launcher for the given root image and guest uid.
    pub fn new(root: impl Into<PathBuf>, uid: u32, helper: impl Into<PathBuf>, use_sudo: bool) -> Self {
        Self {
            root: root.into(),
            uid,
            helper: helper.into(),
            use_sudo,
        }
    }

    /// Root image on the host.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Guest uid.
    pub fn uid(&self) -> u32 {
        self.uid
    }

    /// Translate a host path under the root image to the path the guest sees.
    pub fn guest_path(&self, host: &Path) -> Result<PathBuf> {
        let rel = host.strip_prefix(&self.root).map_err(|_| {
            TunnelError::AccessDenied(format!("{} is outside the sandbox root", host.display()))
        })?;
        Ok(Path::new("/").join(rel))
    }

    /// Helper argv:
    /// `[sudo -n] <helper> <supervision options> <root> <uid> <workdir> <program> [args...]`.
    pub fn argv(
        &self,
        workdir: &Path,
        program: &Path,
        args: &[GuestArg],
        supervision: &Supervision,
    ) -> Result<Vec<OsString>> {
        let mut argv: Vec<OsString> = Vec::with_capacity(args.len() + 13);
        if self.use_sudo {
            argv.push("sudo".into());
            argv.push("-n".into());
        }
        argv.push(self.helper.clone().into_os_string());
        argv.extend(supervision.to_args());
        argv.push(self.root.clone().into_os_string());
        argv.push(self.uid.to_string().into());
        argv.push(self.guest_path(workdir)?.into_os_string());
        argv.push(program.as_os_str().to_os_string());
        for arg in args {
            argv.push(match arg {
                GuestArg::Path(path) => self.guest_path(path)?.into_os_string(),
                GuestArg::Literal(arg) => arg.clone(),
            });
        }
        Ok(argv)
    }

    /// Build the command that runs `program args` confined to the root image.
    ///
    /// `workdir` and path arguments are host paths under the root; `program`
    /// is already an in-image path.
    pub fn command(
        &self,
        workdir: &Path,
        program: &Path,
        args: &[GuestArg],
        supervision: &Supervision,
    ) -> Result<Command> {
        let argv = self.argv(workdir, program, args, supervision)?;
        let (first, rest) = argv
            .split_first()
            .ok_or_else(|| TunnelError::BadRequest("empty helper command".to_string()))?;
        let mut cmd = Command::new(first);
        cmd.args(rest).current_dir(workdir);
        Ok(cmd)
    }
}
