use std::env;
use std::ffi::{CString, OsStr};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use nix::{
    errno::Errno,
    sys::{signal::{kill, Signal}, ptrace},
    unistd::{fork, getpid, ForkResult, Pid},
};
use tracing::debug;

use crate::error::{Error, Result};

/// Exit code of a forked child that could not become a tracee or exec its target.
const CHILD_FAILURE: libc::c_int = 127;


/// Command to spawn as a child process to be traced.
#[derive(Clone, Debug)]
pub struct Command {
    /// Program name as given, used for diagnostics and `PATH` lookup.
    program: String,

    /// Argument vector to pass to `execv()`.
    argv: Vec<CString>,
}

impl Command {
    pub fn new(argv: Vec<impl Into<Vec<u8>>>) -> Result<Self> {
        let argv: Vec<Vec<u8>> = argv.into_iter().map(Into::into).collect();

        let program = match argv.first() {
            Some(exe) => String::from_utf8_lossy(exe).into_owned(),
            None => internal_error!("command exe required"),
        };

        // Ensure we own NUL-terminated strings to for the foreign exec call.
        //
        // We're heap-allocating, so always do this before forking.
        let argv = argv
            .into_iter()
            .map(CString::new)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|_| Error::Exec { program: program.clone(), source: Errno::EINVAL })?;

        Ok(Self { program, argv })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Fork and exec a child process determined by `self.argv`.
    ///
    /// The child sets itself as a tracee of the parent, then raises `SIGSTOP` so the
    /// parent can resume and observe it without a race. The next system call it makes
    /// is the `execve()` of the target.
    pub fn fork_exec(&self) -> Result<Pid> {
        // Heap-allocates, must occur pre-fork.
        let path = self.executable()?;
        let argv = self.argv();

        debug!(program = %self.program, path = ?path, "forking tracee");

        match unsafe { fork() } {
            Ok(ForkResult::Child) => {
                // Only async-signal-safe calls from here on. Any failure ends the child;
                // the parent sees it as an exit during the attach handshake.
                if ptrace::traceme().is_err() {
                    unsafe { libc::_exit(CHILD_FAILURE) };
                }

                // `kill()` rather than `raise()`, which may make extra syscalls to mask
                // signals around the stop. The parent expects `execve()` to be next.
                if kill(getpid(), Signal::SIGSTOP).is_err() {
                    unsafe { libc::_exit(CHILD_FAILURE) };
                }

                // Use unsafe `libc::execv`, because the `nix` wrapper heap-allocates a
                // `Vec` internally, which is not async-signal-safe.
                unsafe {
                    libc::execv(path.as_ptr(), argv.as_ptr());
                    libc::_exit(CHILD_FAILURE)
                }
            },
            Ok(ForkResult::Parent { child }) => {
                Ok(child)
            },
            Err(source) => {
                Err(Error::Fork { source })
            },
        }
    }

    // Resolve the program like `execvp()` does, but before forking: a name with a slash
    // is used as-is, otherwise the first executable match on `PATH` wins.
    fn executable(&self) -> Result<CString> {
        let exe = self.argv[0].as_bytes();

        let path = if exe.contains(&b'/') {
            PathBuf::from(OsStr::from_bytes(exe))
        } else {
            let search = env::var_os("PATH").unwrap_or_else(|| "/usr/local/bin:/usr/bin:/bin".into());

            env::split_paths(&search)
                .map(|dir| dir.join(OsStr::from_bytes(exe)))
                .find(|candidate| is_executable(candidate))
                .ok_or_else(|| Error::Exec { program: self.program.clone(), source: Errno::ENOENT })?
        };

        CString::new(path.as_os_str().as_bytes())
            .map_err(|_| Error::Exec { program: self.program.clone(), source: Errno::EINVAL })
    }

    // Construct NUL-terminated arguments for `execv`. We heap-allocate to return a `Vec`,
    // and so must do this before calling `fork()`.
    fn argv(&self) -> Vec<*const libc::c_char> {
        let mut argv: Vec<_> = self.argv
            .iter()
            .map(|s| s.as_ptr())
            .collect();
        argv.push(std::ptr::null());
        argv
    }
}

fn is_executable(path: &Path) -> bool {
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}
