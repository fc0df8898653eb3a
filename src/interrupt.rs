//! Recording exit requests delivered to the tracer as signals.

use std::convert::TryFrom;
use std::sync::atomic::{AtomicI32, Ordering};

use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

use crate::error::{Error, Result};

static EXIT_SIGNAL: ExitSignal = ExitSignal::new();

/// Signals which request a graceful exit.
pub const EXIT_SIGNALS: &[Signal] = &[Signal::SIGINT, Signal::SIGTERM];

/// The most recent exit request, as a signal number.
///
/// Written from a signal handler, read between steps.
#[derive(Debug, Default)]
pub struct ExitSignal {
    signum: AtomicI32,
}

impl ExitSignal {
    pub const fn new() -> Self {
        Self { signum: AtomicI32::new(0) }
    }

    /// Route `signals` to the process-wide flag, and return it.
    ///
    /// Handlers restart interrupted system calls, so a tracer blocked in `waitpid()`
    /// keeps waiting for the current step to finish.
    pub fn install(signals: &[Signal]) -> Result<&'static ExitSignal> {
        let action = SigAction::new(
            SigHandler::Handler(handle_exit_signal),
            SaFlags::SA_RESTART,
            SigSet::empty(),
        );

        for &signal in signals {
            unsafe { sigaction(signal, &action) }
                .map_err(|source| Error::Signal { signal, source })?;
        }

        Ok(&EXIT_SIGNAL)
    }

    pub fn request(&self, signal: Signal) {
        self.signum.store(signal as i32, Ordering::SeqCst);
    }

    pub fn requested(&self) -> Option<Signal> {
        match self.signum.load(Ordering::SeqCst) {
            0 => None,
            signum => Signal::try_from(signum).ok(),
        }
    }
}

// Async-signal-safe: a single atomic store.
extern "C" fn handle_exit_signal(signum: libc::c_int) {
    EXIT_SIGNAL.signum.store(signum, Ordering::SeqCst);
}
