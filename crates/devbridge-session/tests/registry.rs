mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use devbridge_session::{
    BridgeError, ProcessKind, ProcessRegistry, ProcessSlot, ProcessSpec, ReadinessPolicy,
    StopOutcome,
};

use common::{closed_port, pid_alive, FakeDebugger};

fn sleeper() -> ProcessSpec {
    ProcessSpec::new("sleep").arg("30")
}

fn fast_policy() -> ReadinessPolicy {
    ReadinessPolicy {
        interval: Duration::from_millis(20),
        timeout: Duration::from_millis(300),
    }
}

#[test]
fn concurrent_starts_leave_exactly_one_live_process() {
    let slot = Arc::new(ProcessSlot::new(ProcessKind::Executable));
    let starters: Vec<_> = (0..4)
        .map(|_| {
            let slot = Arc::clone(&slot);
            thread::spawn(move || slot.start(&sleeper()).unwrap())
        })
        .collect();
    let handles: Vec<_> = starters
        .into_iter()
        .map(|starter| starter.join().unwrap())
        .collect();

    let current = slot.current().expect("slot occupied");
    let alive: Vec<_> = handles.iter().filter(|handle| handle.is_alive()).collect();
    assert_eq!(alive.len(), 1);
    assert_eq!(alive[0].pid(), current.pid());
    for handle in &handles {
        if handle.pid() != current.pid() {
            assert!(!pid_alive(handle.pid()));
        }
    }
    slot.stop_current();
    assert!(!current.is_alive());
}

#[test]
fn stop_is_idempotent_and_never_blocks() {
    let slot = ProcessSlot::new(ProcessKind::Executable);
    let handle = slot.start(&sleeper()).unwrap();
    assert!(matches!(slot.stop_current(), StopOutcome::Stopped { .. }));
    assert_eq!(slot.stop_current(), StopOutcome::NotRunning);
    let (outcome, cleared) = slot.release(&handle);
    assert!(matches!(outcome, StopOutcome::AlreadyExited { .. }));
    assert!(!cleared);
}

#[test]
fn stop_after_natural_exit_reports_already_exited() {
    let slot = ProcessSlot::new(ProcessKind::Executable);
    let handle = slot
        .start(&ProcessSpec::new("sh").args(["-c", "exit 0"]))
        .unwrap();
    handle.wait_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(
        slot.stop_current(),
        StopOutcome::AlreadyExited { code: Some(0) }
    );
}

#[test]
fn releasing_a_replaced_handle_keeps_the_new_occupant() {
    let slot = ProcessSlot::new(ProcessKind::Executable);
    let first = slot.start(&sleeper()).unwrap();
    let second = slot.start(&sleeper()).unwrap();
    let (_, cleared) = slot.release(&first);
    assert!(!cleared);
    assert_eq!(slot.current().map(|handle| handle.pid()), Some(second.pid()));
    slot.stop_current();
}

#[test]
fn spawn_failure_leaves_slot_empty() {
    let slot = ProcessSlot::new(ProcessKind::Executable);
    let previous = slot.start(&sleeper()).unwrap();
    let err = slot
        .start(&ProcessSpec::new("devbridge-no-such-program"))
        .unwrap_err();
    assert!(matches!(err, BridgeError::Spawn { .. }));
    assert!(slot.current().is_none());
    assert!(!previous.is_alive());
}

#[test]
fn second_debugger_start_kills_the_first() {
    let fake = FakeDebugger::start();
    let registry = ProcessRegistry::new();
    let first = registry
        .start_debugger(&sleeper(), fake.addr, fast_policy())
        .unwrap();
    let first_pid = first.pid();
    assert!(pid_alive(first_pid));

    let second = registry
        .start_debugger(&sleeper(), fake.addr, fast_policy())
        .unwrap();
    assert!(!pid_alive(first_pid));
    assert!(second.is_alive());
    assert_eq!(
        registry.debugger().current().map(|handle| handle.pid()),
        Some(second.pid())
    );
    registry.shutdown();
    assert!(!second.is_alive());
}

#[test]
fn unresponsive_debugger_is_killed() {
    let registry = ProcessRegistry::new();
    let err = registry
        .start_debugger(&sleeper(), closed_port(), fast_policy())
        .unwrap_err();
    assert!(matches!(err, BridgeError::NotResponding { .. }));
    assert!(registry.debugger().current().is_none());
}

#[test]
fn debugger_exiting_during_startup_reports_its_code() {
    let registry = ProcessRegistry::new();
    let spec = ProcessSpec::new("sh").args(["-c", "exit 7"]);
    let policy = ReadinessPolicy {
        interval: Duration::from_millis(20),
        timeout: Duration::from_secs(5),
    };
    let err = registry
        .start_debugger(&spec, closed_port(), policy)
        .unwrap_err();
    assert!(matches!(err, BridgeError::ExitedEarly { code: Some(7) }));
    assert!(registry.debugger().current().is_none());
}

#[test]
fn debugger_printing_binary_output_keeps_running() {
    let fake = FakeDebugger::start();
    let registry = ProcessRegistry::new();
    let spec = ProcessSpec::new("sh").args([
        "-c",
        "printf '\\377\\n'; sleep 0.3; i=0; while [ $i -lt 20 ]; do echo still-running; printf '\\376\\n' >&2; i=$((i+1)); done; exec sleep 30",
    ]);
    let handle = registry
        .start_debugger(&spec, fake.addr, fast_policy())
        .unwrap();

    thread::sleep(Duration::from_millis(1500));
    assert!(handle.try_wait().unwrap().is_none());
    assert!(handle.is_alive());
    registry.shutdown();
}
