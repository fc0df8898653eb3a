use std::fmt;

use crate::engine::{Counters, Outcome};

/// Final counts of a run, and the exit code it maps to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Report {
    pub counters: Counters,
    pub outcome: Outcome,
}

impl Report {
    pub fn new(counters: Counters, outcome: Outcome) -> Self {
        Self { counters, outcome }
    }

    /// The tracee's own exit code, or `128 + signal` for a run ended by a signal.
    pub fn exit_code(&self) -> i32 {
        match self.outcome {
            Outcome::Exited(exit_code) => exit_code,
            Outcome::Signaled(signal) |
            Outcome::Interrupted(signal) => 128 + signal as i32,
        }
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Executed {} instructions; clobbered registers {} times.",
            self.counters.instructions(),
            self.counters.clobbers(),
        )
    }
}
