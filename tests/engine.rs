use anyhow::Result;
use pretty_assertions::assert_eq;
use regclobber::{Boundary, Engine, ExitSignal, Outcome, Report, Signal, Status};

mod support;
use support::*;

#[test]
fn test_no_boundary_clobbers_every_step() -> Result<()> {
    let exit_signal = ExitSignal::new();
    let mut target = ScriptedTarget::new(vec![0x401000, 0x401003, 0x401008], Status::Exited(7));

    let mut engine = Engine::new(Boundary::default(), &exit_signal);
    let outcome = engine.run(&mut target)?;
    let counters = engine.counters();

    assert_eq!(outcome, Outcome::Exited(7));
    assert_eq!(counters.instructions(), 3);
    assert_eq!(counters.clobbers(), counters.instructions());
    assert_eq!(Report::new(counters, outcome).exit_code(), 7);

    Ok(())
}

#[test]
fn test_boundary_splits_privileged_prefix() -> Result<()> {
    let exit_signal = ExitSignal::new();
    let boundary = 0x401000;
    let ips = vec![0x400ff0, 0x400ff4, 0x400ffc, 0x401000, 0x401004, 0x400ff0];
    let mut target = ScriptedTarget::new(ips, Status::Exited(0));

    let mut engine = Engine::new(Boundary::new(boundary), &exit_signal);
    let outcome = engine.run(&mut target)?;

    assert_eq!(outcome, Outcome::Exited(0));
    assert_eq!(engine.counters().instructions(), 6);
    assert_eq!(engine.counters().clobbers(), 2);

    let clobbered: Vec<u64> = target.writes.iter().map(|(rip, _)| *rip).collect();
    assert_eq!(clobbered, vec![0x401000, 0x401004]);

    for (rip, snapshot) in &target.writes {
        assert_eq!(snapshot.instruction_pointer(), *rip);
        assert_clobbered(snapshot);
    }

    Ok(())
}

#[test]
fn test_boundary_above_all_code_never_clobbers() -> Result<()> {
    let exit_signal = ExitSignal::new();
    let mut target = ScriptedTarget::new(vec![0x401000; 100], Status::Exited(3));

    let mut engine = Engine::new(Boundary::new(u64::MAX), &exit_signal);
    let outcome = engine.run(&mut target)?;

    assert_eq!(outcome, Outcome::Exited(3));
    assert_eq!(engine.counters().instructions(), 100);
    assert_eq!(engine.counters().clobbers(), 0);
    assert!(target.writes.is_empty());

    Ok(())
}

#[test]
fn test_exit_without_instructions() -> Result<()> {
    let exit_signal = ExitSignal::new();
    let mut target = ScriptedTarget::new(Vec::new(), Status::Exited(0));

    let mut engine = Engine::new(Boundary::default(), &exit_signal);
    let outcome = engine.run(&mut target)?;

    assert_eq!(outcome, Outcome::Exited(0));
    assert_eq!(engine.counters().instructions(), 0);
    assert_eq!(engine.counters().clobbers(), 0);

    Ok(())
}

#[test]
fn test_interrupt_completes_inflight_step() -> Result<()> {
    let exit_signal = ExitSignal::new();
    let ips = vec![0x400000, 0x401000, 0x401004, 0x401008];
    let mut target = ScriptedTarget::new(ips, Status::Exited(0))
        .interrupt_during(2, Signal::SIGINT, &exit_signal);

    let mut engine = Engine::new(Boundary::new(0x401000), &exit_signal);
    let outcome = engine.run(&mut target)?;
    let report = Report::new(engine.counters(), outcome);

    // The second step had begun, so it was counted and clobbered before halting.
    assert_eq!(outcome, Outcome::Interrupted(Signal::SIGINT));
    assert_eq!(target.steps(), 2);
    assert_eq!(engine.counters().instructions(), 2);
    assert_eq!(engine.counters().clobbers(), 1);
    assert_eq!(report.exit_code(), 128 + 2);

    Ok(())
}

#[test]
fn test_interrupt_before_first_step() -> Result<()> {
    let exit_signal = ExitSignal::new();
    exit_signal.request(Signal::SIGTERM);

    let mut target = ScriptedTarget::new(vec![0x401000], Status::Exited(0));
    let mut engine = Engine::new(Boundary::default(), &exit_signal);
    let outcome = engine.run(&mut target)?;

    assert_eq!(outcome, Outcome::Interrupted(Signal::SIGTERM));
    assert_eq!(target.steps(), 0);
    assert_eq!(Report::new(engine.counters(), outcome).exit_code(), 128 + 15);

    Ok(())
}

#[test]
fn test_signaled_target() -> Result<()> {
    let exit_signal = ExitSignal::new();
    let mut target = ScriptedTarget::new(vec![0x401000], Status::Signaled(Signal::SIGKILL));

    let mut engine = Engine::new(Boundary::default(), &exit_signal);
    let outcome = engine.run(&mut target)?;

    assert_eq!(outcome, Outcome::Signaled(Signal::SIGKILL));
    assert_eq!(engine.counters().instructions(), 1);
    assert_eq!(Report::new(engine.counters(), outcome).exit_code(), 128 + 9);

    Ok(())
}

#[test]
fn test_counters_are_monotonic() -> Result<()> {
    let exit_signal = ExitSignal::new();
    let mut engine = Engine::new(Boundary::new(0x401000), &exit_signal);
    let mut last = engine.counters();

    // Run the same engine over successive script fragments, checking between them.
    for ips in vec![vec![0x400000, 0x401000], vec![], vec![0x401000, 0x400000, 0x402000]] {
        let mut target = ScriptedTarget::new(ips, Status::Exited(0));
        engine.run(&mut target)?;

        let now = engine.counters();
        assert!(now.instructions() >= last.instructions());
        assert!(now.clobbers() >= last.clobbers());
        assert!(now.instructions() >= now.clobbers());
        last = now;
    }

    assert_eq!(last.instructions(), 5);
    assert_eq!(last.clobbers(), 3);

    Ok(())
}

#[test]
fn test_report_line() {
    let exit_signal = ExitSignal::new();
    let engine = Engine::new(Boundary::default(), &exit_signal);
    let report = Report::new(engine.counters(), Outcome::Exited(0));

    assert_eq!(
        report.to_string(),
        "Executed 0 instructions; clobbered registers 0 times.",
    );
}

#[test]
fn test_target_killed_while_stopped() -> Result<()> {
    let exit_signal = ExitSignal::new();
    let ips = vec![0x401000, 0x401004, 0x401008, 0x40100c];
    let mut target = ScriptedTarget::new(ips, Status::Signaled(Signal::SIGKILL)).vanish_after(2);

    let mut engine = Engine::new(Boundary::default(), &exit_signal);
    let outcome = engine.run(&mut target)?;

    // Killed after its second stop was reported, before it could be clobbered.
    assert_eq!(outcome, Outcome::Signaled(Signal::SIGKILL));
    assert_eq!(target.steps(), 2);
    assert_eq!(engine.counters().instructions(), 2);
    assert_eq!(engine.counters().clobbers(), 1);
    assert_eq!(Report::new(engine.counters(), outcome).exit_code(), 128 + 9);

    Ok(())
}
