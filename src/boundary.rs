use std::fmt;

use nix::unistd::Pid;
use tracing::{info, warn};

use crate::error::Result;
use crate::symbols::SymbolResolver;

/// Name of the symbol marking the start of forbidden code.
pub const DEFAULT_SYMBOL: &str = "FORBID_REGS";

/// Split between privileged code (below) and forbidden code (at or above).
///
/// The default boundary of 0 has no privileged region, so registers are clobbered
/// after every instruction.
#[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
pub struct Boundary(u64);

impl Boundary {
    pub fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub fn addr(&self) -> u64 {
        self.0
    }

    /// True if code at `rip` may keep its register state.
    pub fn is_privileged(&self, rip: u64) -> bool {
        rip < self.0
    }
}

impl fmt::Display for Boundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Find the boundary of the tracee `pid` from the address of `symbol`.
///
/// A missing symbol is not an error: registers are then forbidden everywhere.
pub fn resolve(pid: Pid, resolver: &dyn SymbolResolver, symbol: &str) -> Result<Boundary> {
    let boundary = match resolver.lookup(pid, symbol)? {
        Some(addr) => {
            let boundary = Boundary::new(addr);
            info!(symbol, %boundary, "found register boundary");
            boundary
        },
        None => {
            warn!(symbol, "could not find symbol, registers are forbidden everywhere");
            Boundary::default()
        },
    };

    Ok(boundary)
}
