#[cfg(not(all(target_os = "linux", target_arch = "x86_64")))]
compile_error!("regclobber only supports x86_64 Linux");

#[macro_use]
pub mod error;

pub mod boundary;
pub mod cmd;
pub mod engine;
pub mod interrupt;
pub mod process;
pub mod regs;
pub mod report;
pub mod symbols;

pub use boundary::Boundary;
pub use cmd::Command;
pub use engine::{Counters, Engine, Outcome, Status, Target};
pub use error::{Error, Result};
pub use interrupt::ExitSignal;
pub use nix::sys::signal::Signal;
pub use nix::unistd::Pid;
pub use process::{launch, ProcessState, TracedProcess};
pub use regs::{FpRegisters, RegisterSnapshot, Registers};
pub use report::Report;
pub use symbols::{ElfSymbols, FixedAddress, NmSymbols, SymbolResolver};
