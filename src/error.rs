use std::io;

use nix::errno::Errno;
use nix::sys::ptrace::Request;
use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;


pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("fork() failed: {source}")]
    Fork { source: nix::Error },

    #[error("waitpid() on tracee = {pid} failed: {source}")]
    Wait { pid: Pid, source: nix::Error },

    #[error("ptrace({request:?}) on tracee = {pid} failed: {source}")]
    Ptrace { pid: Pid, request: Request, source: nix::Error },

    #[error("Tracee = {pid} died during ptrace({request:?})")]
    TraceeDied { pid: Pid, request: Request },

    #[error("Unexpected status for tracee = {pid} while attaching: {status:?}")]
    Handshake { pid: Pid, status: WaitStatus },

    #[error("Could not exec `{program}`: {source}")]
    Exec { program: String, source: nix::Error },

    #[error("Could not read symbols of tracee = {pid}: {source}")]
    Symbols { pid: Pid, source: io::Error },

    #[error("Could not parse executable image: {0}")]
    Elf(#[from] goblin::error::Error),

    #[error("Could not install handler for {signal}: {source}")]
    Signal { signal: Signal, source: nix::Error },

    #[error("OS error: {0}")]
    OS(#[from] nix::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True if the error was caused by the tracee no longer existing.
    pub fn tracee_died(&self) -> bool {
        matches!(self, Error::TraceeDied { .. })
    }
}

pub(crate) trait ResultExt<T> {
    /// Attribute a failed ptrace request to `pid`, reporting `ESRCH` as a dead tracee.
    fn died_if_esrch(self, pid: Pid, request: Request) -> Result<T>;
}

impl<T> ResultExt<T> for nix::Result<T> {
    fn died_if_esrch(self, pid: Pid, request: Request) -> Result<T> {
        self.map_err(|source| match source {
            Errno::ESRCH => Error::TraceeDied { pid, request },
            source => Error::Ptrace { pid, request, source },
        })
    }
}

macro_rules! internal_error {
    ($msg: expr) => {
        return Err($crate::error::Error::Internal($msg.into()))
    };
}
