//! The single-step loop that clobbers registers outside the privileged region.

use nix::sys::signal::Signal;
use tracing::{debug, trace};

use crate::boundary::Boundary;
use crate::error::Result;
use crate::interrupt::ExitSignal;
use crate::regs::{FpRegisters, RegisterSnapshot, Registers};

/// State of a target after being single-stepped.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Status {
    Stopped,
    Exited(i32),
    Signaled(Signal),
}

/// A stopped process that can be single-stepped and have its registers rewritten.
///
/// Register methods may only be called after [`Target::step()`] has reported
/// [`Status::Stopped`].
pub trait Target {
    /// Execute one instruction and block until the target stops or terminates.
    fn step(&mut self) -> Result<Status>;

    fn registers(&self) -> Result<Registers>;

    fn fp_registers(&self) -> Result<FpRegisters>;

    fn set_registers(&mut self, snapshot: &RegisterSnapshot) -> Result<()>;

    /// Block until a target that vanished while stopped has terminated, and return how.
    ///
    /// Called after a register request failed with [`crate::Error::TraceeDied`], which happens
    /// when the target is killed between stops.
    fn reap(&mut self) -> Result<Status>;
}

/// How a run ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Outcome {
    Exited(i32),
    Signaled(Signal),
    Interrupted(Signal),
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Counters {
    instructions: u64,
    clobbers: u64,
}

impl Counters {
    pub fn instructions(&self) -> u64 {
        self.instructions
    }

    pub fn clobbers(&self) -> u64 {
        self.clobbers
    }
}

pub struct Engine<'a> {
    boundary: Boundary,
    exit_signal: &'a ExitSignal,
    counters: Counters,
}

impl<'a> Engine<'a> {
    pub fn new(boundary: Boundary, exit_signal: &'a ExitSignal) -> Self {
        let counters = Counters::default();

        Self { boundary, exit_signal, counters }
    }

    pub fn counters(&self) -> Counters {
        self.counters
    }

    /// Single-step `target` until it terminates or an exit signal is requested.
    ///
    /// Exit requests are only honored between steps, so a step that has begun always
    /// finishes its clobber decision.
    pub fn run<T: Target>(&mut self, target: &mut T) -> Result<Outcome> {
        debug!(boundary = %self.boundary, "stepping");

        loop {
            if let Some(signal) = self.exit_signal.requested() {
                debug!(%signal, "exit requested");
                return Ok(Outcome::Interrupted(signal));
            }

            if let Some(outcome) = terminated(target.step()?) {
                return Ok(outcome);
            }

            self.counters.instructions += 1;

            match self.clobber(target) {
                Ok(()) => {},
                Err(err) if err.tracee_died() => {
                    debug!(%err, "tracee died while stopped");

                    return match terminated(target.reap()?) {
                        Some(outcome) => Ok(outcome),
                        None => Err(err),
                    };
                },
                Err(err) => return Err(err),
            }
        }
    }

    fn clobber<T: Target>(&mut self, target: &mut T) -> Result<()> {
        let regs = target.registers()?;

        if self.boundary.is_privileged(regs.rip) {
            return Ok(());
        }

        let mut snapshot = RegisterSnapshot::new(regs, target.fp_registers()?);
        snapshot.clobber();
        target.set_registers(&snapshot)?;

        self.counters.clobbers += 1;
        trace!(rip = regs.rip, "clobbered");

        Ok(())
    }
}

fn terminated(status: Status) -> Option<Outcome> {
    match status {
        Status::Stopped => None,
        Status::Exited(exit_code) => Some(Outcome::Exited(exit_code)),
        Status::Signaled(signal) => Some(Outcome::Signaled(signal)),
    }
}
