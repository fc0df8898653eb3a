//! Reading, writing, and clobbering the register state of a stopped tracee.

use std::mem::{self, MaybeUninit};

use nix::{
    errno::Errno,
    sys::ptrace::{self, Request},
    unistd::Pid,
};

use crate::error::{Result, ResultExt};

/// Integer register state of a tracee.
pub type Registers = libc::user_regs_struct;

/// x87 and SSE register state of a tracee.
pub type FpRegisters = libc::user_fpregs_struct;

/// Bits of `eflags` kept by a clobber. Everything but the condition codes and the
/// direction flag: CF, PF, AF, ZF, SF, DF, and OF are cleared.
pub const EFLAGS_MASK: u64 = 0xffff_ffff_ffff_f32a;

const WORD: usize = mem::size_of::<u64>();

/// Full register state of a stopped tracee.
///
/// Snapshots are taken fresh at every stop. They describe the tracee only until it is
/// next restarted.
#[derive(Clone, Copy)]
pub struct RegisterSnapshot {
    pub regs: Registers,
    pub fp_regs: FpRegisters,
}

impl RegisterSnapshot {
    pub fn new(regs: Registers, fp_regs: FpRegisters) -> Self {
        Self { regs, fp_regs }
    }

    /// Snapshot with every register zeroed.
    pub fn zeroed() -> Self {
        // SAFETY: both structs are plain `repr(C)` integer aggregates, for which the
        // all-zero bit pattern is valid.
        unsafe { mem::zeroed() }
    }

    pub fn instruction_pointer(&self) -> u64 {
        self.regs.rip
    }

    /// Destroy all general-purpose and vector register values, keeping the tracee able
    /// to resume at the current instruction.
    ///
    /// Zeroes every integer register laid out before `rip` (see `sys/user.h`), plus
    /// `rsp`, which comes after it. Condition codes in `eflags` are masked off with
    /// [`EFLAGS_MASK`]. The x87 stack and the SSE bank are zeroed. `rip` and the
    /// segment registers are untouched.
    pub fn clobber(&mut self) {
        let preceding = memoffset::offset_of!(libc::user_regs_struct, rip) / WORD;

        self.gp_words_mut()[..preceding].fill(0);
        self.regs.rsp = 0;
        self.regs.eflags &= EFLAGS_MASK;

        self.fp_regs.st_space = [0; 32];
        self.fp_regs.xmm_space = [0; 64];
    }

    fn gp_words_mut(&mut self) -> &mut [u64] {
        let len = mem::size_of::<Registers>() / WORD;
        let base = &mut self.regs as *mut Registers as *mut u64;

        // SAFETY: `user_regs_struct` is `repr(C)` and consists only of `u64` fields, so
        // it has no padding and may be viewed as `len` words. The borrow of `self`
        // keeps the view unique.
        unsafe { std::slice::from_raw_parts_mut(base, len) }
    }
}

/// Read the full register state of the stopped tracee `pid`.
pub fn read(pid: Pid) -> Result<RegisterSnapshot> {
    let regs = getregs(pid)?;
    let fp_regs = getfpregs(pid)?;

    Ok(RegisterSnapshot::new(regs, fp_regs))
}

/// Overwrite the full register state of the stopped tracee `pid`.
pub fn write(pid: Pid, snapshot: &RegisterSnapshot) -> Result<()> {
    setregs(pid, snapshot.regs)?;
    setfpregs(pid, &snapshot.fp_regs)
}

pub fn getregs(pid: Pid) -> Result<Registers> {
    ptrace::getregs(pid).died_if_esrch(pid, Request::PTRACE_GETREGS)
}

pub fn setregs(pid: Pid, regs: Registers) -> Result<()> {
    ptrace::setregs(pid, regs).died_if_esrch(pid, Request::PTRACE_SETREGS)
}

pub fn getfpregs(pid: Pid) -> Result<FpRegisters> {
    let mut data = MaybeUninit::<FpRegisters>::uninit();

    let res = unsafe {
        libc::ptrace(
            libc::PTRACE_GETFPREGS,
            pid.as_raw(),
            std::ptr::null_mut::<libc::c_void>(),
            data.as_mut_ptr() as *mut libc::c_void,
        )
    };
    Errno::result(res).died_if_esrch(pid, Request::PTRACE_GETFPREGS)?;

    // SAFETY: the kernel filled the whole struct on success.
    Ok(unsafe { data.assume_init() })
}

pub fn setfpregs(pid: Pid, fp_regs: &FpRegisters) -> Result<()> {
    let res = unsafe {
        libc::ptrace(
            libc::PTRACE_SETFPREGS,
            pid.as_raw(),
            std::ptr::null_mut::<libc::c_void>(),
            fp_regs as *const FpRegisters as *mut libc::c_void,
        )
    };
    Errno::result(res).died_if_esrch(pid, Request::PTRACE_SETFPREGS)?;

    Ok(())
}
