//! Launching a tracee and following it through its lifecycle.

use nix::{
    sys::{
        ptrace::{self, Options, Request},
        signal::{kill, Signal},
        wait::{waitpid, WaitStatus},
    },
    unistd::Pid,
};
use tracing::{debug, trace, warn};

use crate::cmd::Command;
use crate::engine::{Status, Target};
use crate::error::{Error, Result, ResultExt};
use crate::regs::{self, FpRegisters, RegisterSnapshot, Registers};

/// Options set on the tracee once it has stopped for attach.
///
/// `PTRACE_O_TRACESYSGOOD` lets the exec handshake tell syscall-stops from signal
/// stops. `PTRACE_O_EXITKILL` kills the tracee if the tracer dies first.
pub const TRACEE_OPTIONS: Options = Options::empty()
    .union(Options::PTRACE_O_TRACESYSGOOD)
    .union(Options::PTRACE_O_EXITKILL);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProcessState {
    // Forked, not yet seen to stop.
    Launched,

    // Stopped after the attach handshake, with the target image loaded.
    Attached,

    // Being single-stepped.
    Stepping,

    // Exited normally, and reaped.
    Exited(i32),

    // Killed by a signal, and reaped.
    Signaled(Signal),
}

impl ProcessState {
    pub fn is_terminated(&self) -> bool {
        matches!(self, ProcessState::Exited(_) | ProcessState::Signaled(_))
    }
}

/// A child process traced by this process.
///
/// Every request must be made from the thread that called [`launch()`]. If the child
/// is still alive when this is dropped, it is killed and reaped.
#[derive(Debug)]
pub struct TracedProcess {
    pid: Pid,
    state: ProcessState,
}

/// Spawn `cmd` as a tracee, and advance it until it has completed `execve()`.
///
/// On return, the tracee is stopped at the syscall-exit-stop of its `execve()`, so its
/// image and `/proc/<pid>/exe` describe the target program.
pub fn launch(cmd: &Command) -> Result<TracedProcess> {
    let pid = cmd.fork_exec()?;
    let mut process = TracedProcess { pid, state: ProcessState::Launched };

    process.attach()?;

    // Into `execve()`.
    process.advance_syscall()?;

    let entry = regs::getregs(pid)?;
    trace!(pid = pid.as_raw(), syscall = entry.orig_rax, "syscall-enter-stop before exec");

    // And out of it.
    process.advance_syscall()?;

    // `execve()` only returns to the caller on failure, as a negated errno.
    let ret = regs::getregs(pid)?.rax as i64;
    if ret < 0 {
        let source = nix::errno::Errno::from_i32(-ret as i32);
        return Err(Error::Exec { program: cmd.program().to_owned(), source });
    }

    process.state = ProcessState::Attached;
    debug!(pid = pid.as_raw(), "tracee attached after exec");

    Ok(process)
}

impl TracedProcess {
    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    // Attach handshake: the child stops itself with `SIGSTOP` after `PTRACE_TRACEME`.
    fn attach(&mut self) -> Result<()> {
        match self.wait()? {
            WaitStatus::Stopped(_, Signal::SIGSTOP) => {},
            status => return Err(Error::Handshake { pid: self.pid, status }),
        }

        ptrace::setoptions(self.pid, TRACEE_OPTIONS)
            .died_if_esrch(self.pid, Request::PTRACE_SETOPTIONS)
    }

    // Restart with `PTRACE_SYSCALL` and expect the next stop to be a syscall-stop.
    fn advance_syscall(&mut self) -> Result<()> {
        ptrace::syscall(self.pid, None).died_if_esrch(self.pid, Request::PTRACE_SYSCALL)?;

        match self.wait()? {
            WaitStatus::PtraceSyscall(_) => Ok(()),
            status => Err(Error::Handshake { pid: self.pid, status }),
        }
    }

    // Wait for the outcome of a restart.
    fn next_status(&mut self) -> Result<Status> {
        let status = match self.wait()? {
            WaitStatus::Exited(_, exit_code) => Status::Exited(exit_code),
            WaitStatus::Signaled(_, signal, _) => Status::Signaled(signal),
            WaitStatus::Stopped(..) |
            WaitStatus::PtraceEvent(..) |
            WaitStatus::PtraceSyscall(..) => Status::Stopped,
            // Assume `!WNOHANG`, `!WCONTINUED`.
            WaitStatus::Continued(_) |
            WaitStatus::StillAlive => internal_error!("unreachable `wait()` status"),
        };

        Ok(status)
    }

    // Block until the tracee changes state, recording termination.
    fn wait(&mut self) -> Result<WaitStatus> {
        let pid = self.pid;
        let status = waitpid(pid, None).map_err(|source| Error::Wait { pid, source })?;

        match status {
            WaitStatus::Exited(_, exit_code) => {
                debug!(pid = pid.as_raw(), exit_code, "tracee exited");
                self.state = ProcessState::Exited(exit_code);
            },
            WaitStatus::Signaled(_, signal, _) => {
                debug!(pid = pid.as_raw(), %signal, "tracee killed by signal");
                self.state = ProcessState::Signaled(signal);
            },
            _ => {},
        }

        Ok(status)
    }
}

impl Target for TracedProcess {
    fn step(&mut self) -> Result<Status> {
        self.state = ProcessState::Stepping;

        // Never deliver a pending signal, so the trace isn't perturbed by signals sent
        // to the tracee.
        match ptrace::step(self.pid, None).died_if_esrch(self.pid, Request::PTRACE_SINGLESTEP) {
            Ok(()) => {},
            Err(err) if err.tracee_died() => {
                debug!(pid = self.pid.as_raw(), %err, "tracee died while stopped");
                return self.reap();
            },
            Err(err) => return Err(err),
        }

        self.next_status()
    }

    fn registers(&self) -> Result<Registers> {
        regs::getregs(self.pid)
    }

    fn fp_registers(&self) -> Result<FpRegisters> {
        regs::getfpregs(self.pid)
    }

    fn set_registers(&mut self, snapshot: &RegisterSnapshot) -> Result<()> {
        regs::write(self.pid, snapshot)
    }

    fn reap(&mut self) -> Result<Status> {
        // No stop is reported for a killed tracee, only its termination.
        match self.next_status()? {
            Status::Stopped => internal_error!("tracee stopped after ptrace reported it dead"),
            status => Ok(status),
        }
    }
}

impl Drop for TracedProcess {
    fn drop(&mut self) {
        if self.state.is_terminated() {
            return;
        }

        debug!(pid = self.pid.as_raw(), state = ?self.state, "killing live tracee");

        // A traced child can be killed from any stop, then reaped.
        if let Err(errno) = kill(self.pid, Signal::SIGKILL) {
            warn!(pid = self.pid.as_raw(), %errno, "could not kill tracee");
            return;
        }

        if let Err(errno) = waitpid(self.pid, None) {
            warn!(pid = self.pid.as_raw(), %errno, "could not reap tracee");
        }
    }
}
