#![allow(dead_code)]

use std::collections::VecDeque;

use nix::sys::ptrace::Request;
use regclobber::{
    Error, ExitSignal, FpRegisters, Pid, RegisterSnapshot, Registers, Result, Signal, Status,
    Target,
};

/// Arbitrary nonzero register contents, as a tracee would leave them.
pub fn dirty_snapshot(rip: u64) -> RegisterSnapshot {
    let mut snapshot = RegisterSnapshot::zeroed();
    let regs = &mut snapshot.regs;

    regs.r15 = 0x0f0f;
    regs.r14 = 0x0e0e;
    regs.r13 = 0x0d0d;
    regs.r12 = 0x0c0c;
    regs.rbp = 0x7ffd_0000_1000;
    regs.rbx = 0xbbbb;
    regs.r11 = 0x0b0b;
    regs.r10 = 0x0a0a;
    regs.r9 = 0x0909;
    regs.r8 = 0x0808;
    regs.rax = 0xaaaa;
    regs.rcx = 0xcccc;
    regs.rdx = 0xdddd;
    regs.rsi = 0x5151;
    regs.rdi = 0xd1d1;
    regs.orig_rax = u64::MAX;
    regs.rip = rip;
    regs.cs = 0x33;
    // IF, and the reserved bit, plus CF, PF, ZF, SF, and OF.
    regs.eflags = 0x202 | 0x8c5;
    regs.rsp = 0x7ffd_0000_0ff0;
    regs.ss = 0x2b;
    regs.fs_base = 0x7f00_0000_0740;

    let fp_regs = &mut snapshot.fp_regs;
    fp_regs.cwd = 0x37f;
    fp_regs.mxcsr = 0x1f80;
    fp_regs.st_space = [0xdead_beef; 32];
    fp_regs.xmm_space = [0xcafe_babe; 64];

    snapshot
}

/// A fake tracee which stops at a scripted sequence of instruction pointers, then
/// terminates with a final status.
pub struct ScriptedTarget<'a> {
    ips: VecDeque<u64>,
    last: Status,
    current: Option<RegisterSnapshot>,
    steps: usize,

    /// Request an exit signal during this step, as if it arrived mid-step.
    interrupt: Option<(usize, Signal, &'a ExitSignal)>,

    /// Vanish while stopped after this step, leaving only the final status to reap.
    vanish: Option<usize>,

    /// Every snapshot written back, with the `rip` read just before.
    pub writes: Vec<(u64, RegisterSnapshot)>,
}

impl<'a> ScriptedTarget<'a> {
    pub fn new(ips: impl IntoIterator<Item = u64>, last: Status) -> Self {
        Self {
            ips: ips.into_iter().collect(),
            last,
            current: None,
            steps: 0,
            interrupt: None,
            vanish: None,
            writes: vec![],
        }
    }

    pub fn interrupt_during(mut self, step: usize, signal: Signal, flag: &'a ExitSignal) -> Self {
        self.interrupt = Some((step, signal, flag));
        self
    }

    pub fn vanish_after(mut self, step: usize) -> Self {
        self.vanish = Some(step);
        self
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    fn stopped(&self) -> Result<RegisterSnapshot> {
        if self.vanish.map_or(false, |step| self.steps >= step) {
            let pid = Pid::from_raw(1);
            return Err(Error::TraceeDied { pid, request: Request::PTRACE_GETREGS });
        }

        Ok(self.current.expect("registers accessed while not stopped"))
    }
}

impl<'a> Target for ScriptedTarget<'a> {
    fn step(&mut self) -> Result<Status> {
        self.steps += 1;

        if let Some((step, signal, flag)) = self.interrupt {
            if step == self.steps {
                flag.request(signal);
            }
        }

        match self.ips.pop_front() {
            Some(rip) => {
                self.current = Some(dirty_snapshot(rip));
                Ok(Status::Stopped)
            },
            None => {
                self.current = None;
                Ok(self.last)
            },
        }
    }

    fn registers(&self) -> Result<Registers> {
        Ok(self.stopped()?.regs)
    }

    fn fp_registers(&self) -> Result<FpRegisters> {
        Ok(self.stopped()?.fp_regs)
    }

    fn set_registers(&mut self, snapshot: &RegisterSnapshot) -> Result<()> {
        let rip = self.stopped()?.regs.rip;
        self.writes.push((rip, *snapshot));
        self.current = Some(*snapshot);
        Ok(())
    }

    fn reap(&mut self) -> Result<Status> {
        assert!(self.vanish.is_some(), "reaped a target that is still stopped");

        self.current = None;
        Ok(self.last)
    }
}

/// Assert `snapshot` holds no general-purpose or vector register values.
pub fn assert_clobbered(snapshot: &RegisterSnapshot) {
    let r = &snapshot.regs;

    let gprs = [
        r.r15, r.r14, r.r13, r.r12, r.rbp, r.rbx, r.r11, r.r10,
        r.r9, r.r8, r.rax, r.rcx, r.rdx, r.rsi, r.rdi, r.orig_rax,
    ];
    assert!(gprs.iter().all(|&word| word == 0), "nonzero GPR in {:x?}", gprs);
    assert_eq!(r.rsp, 0);
    assert_eq!(r.eflags & !regclobber::regs::EFLAGS_MASK, 0);

    assert!(snapshot.fp_regs.st_space.iter().all(|&word| word == 0));
    assert!(snapshot.fp_regs.xmm_space.iter().all(|&word| word == 0));
}
