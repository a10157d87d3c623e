use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::unbounded;

use fairland::{
    Instruction, Keep, Listener, Process, SchedError, Scheduler, SchedulerConfig,
};

/// Millisecond ticks and a short idle timeout so tests finish quickly.
fn fast_cfg() -> SchedulerConfig {
    SchedulerConfig {
        sched_latency: 45.0,
        min_granularity: 30.0,
        idle_timeout: 10,
        tick: Duration::from_millis(1),
    }
}

fn new_scheduler(cfg: SchedulerConfig) -> Arc<Scheduler> {
    Arc::new(Scheduler::new(cfg, Arc::new(AtomicBool::new(false))))
}

fn write_tape(dir: &std::path::Path, name: &str, lines: &[&str]) -> PathBuf {
    let path = dir.join(format!("proc_{name}"));
    let mut file = std::fs::File::create(&path).unwrap();
    for line in lines {
        writeln!(file, "{line}").unwrap();
    }
    path
}

/// Poll until `cond` holds, failing the test after `timeout`.
fn wait_for(timeout: Duration, what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(2));
    }
}

/// The A/B scenario: A is pure CPU and finishes in one slice; B blocks on
/// I/O after one unit, comes back, and finishes.
#[test]
fn test_cpu_and_io_processes_complete() {
    let sched = new_scheduler(fast_cfg());

    sched
        .insert(Process::new("a", vec![Instruction::Cpu; 3]))
        .unwrap();
    sched
        .insert(Process::new(
            "b",
            vec![Instruction::Cpu, Instruction::Io(5), Instruction::Cpu],
        ))
        .unwrap();

    let handle = sched.spawn();
    handle.join().unwrap();

    let stats = sched.stats();
    assert_eq!(stats.completions(), 2, "both processes should finish");
    assert_eq!(stats.io_returns(), 1, "b should return from io exactly once");
    assert_eq!(stats.requeues(), 0, "neither slice should run out");
    assert_eq!(sched.nr_queued(), 0);
    assert_eq!(sched.nr_io_waiting(), 0);
}

/// A pure-CPU tape longer than one slice completes after exactly
/// `len(tape)` units, across several slice exhaustions.
#[test]
fn test_long_tape_survives_slice_exhaustion() {
    let sched = new_scheduler(fast_cfg());
    sched
        .insert(Process::new("cruncher", vec![Instruction::Cpu; 100]))
        .unwrap();

    let handle = sched.spawn();
    handle.join().unwrap();

    // Alone in the queue the slice is the full 45-unit latency target:
    // 45 + 45 + 10 units across three selections.
    let stats = sched.stats();
    assert_eq!(stats.completions(), 1);
    assert_eq!(stats.requeues(), 2);
}

/// A process blocked on `io <n>` stays out of the run queue and inside the
/// I/O wait set for the full duration, then reappears exactly once.
#[test]
fn test_io_wait_duration_and_single_return() {
    let cfg = fast_cfg();
    let tick = cfg.tick;
    let sched = new_scheduler(cfg);

    let inserted_at = Instant::now();
    sched
        .insert(Process::new(
            "sleeper",
            vec![Instruction::Cpu, Instruction::Io(100), Instruction::Cpu],
        ))
        .unwrap();
    let handle = sched.spawn();

    wait_for(Duration::from_secs(5), "process to block on io", || {
        sched.is_io_waiting("sleeper")
    });
    assert!(
        !sched.is_queued("sleeper"),
        "blocked process must not be runnable"
    );

    // Halfway through the I/O window it is still parked.
    thread::sleep(tick * 50);
    assert!(sched.is_io_waiting("sleeper"));
    assert!(!sched.is_queued("sleeper"));

    wait_for(Duration::from_secs(5), "io completion", || {
        sched.stats().io_returns() == 1
    });
    assert!(
        inserted_at.elapsed() >= tick * 100,
        "io return fired before the full duration elapsed"
    );

    handle.join().unwrap();
    assert_eq!(sched.stats().io_returns(), 1, "exactly one requeue");
    assert_eq!(sched.stats().completions(), 1);
}

/// An empty scheduler exits after the idle timeout: not before it, and not
/// indefinitely later.
#[test]
fn test_idle_timeout_bounds() {
    let cfg = fast_cfg();
    let (tick, timeout_ticks) = (cfg.tick, cfg.idle_timeout);
    let sched = new_scheduler(cfg);

    let started = Instant::now();
    let handle = sched.spawn();
    handle.join().unwrap();
    let elapsed = started.elapsed();

    assert!(
        elapsed >= tick * timeout_ticks as u32,
        "exited after {elapsed:?}, before the idle timeout"
    );
    assert!(
        elapsed < Duration::from_secs(5),
        "idle exit took {elapsed:?}"
    );
}

/// Pending I/O holds off the idle timeout even while the run queue is
/// empty the whole time.
#[test]
fn test_pending_io_defers_idle_exit() {
    let cfg = fast_cfg();
    let tick = cfg.tick;
    let sched = new_scheduler(cfg);

    // Blocks immediately, then sleeps far longer than the idle timeout.
    sched
        .insert(Process::new(
            "napper",
            vec![Instruction::Io(50), Instruction::Cpu],
        ))
        .unwrap();

    let started = Instant::now();
    let handle = sched.spawn();
    handle.join().unwrap();

    assert!(
        started.elapsed() >= tick * 50,
        "scheduler exited while a process was still parked on io"
    );
    assert_eq!(sched.stats().completions(), 1);
}

/// A duplicate name is rejected loudly and the queued process is untouched.
#[test]
fn test_duplicate_name_rejected() {
    let sched = new_scheduler(fast_cfg());
    sched
        .insert(Process::new("dup", vec![Instruction::Cpu; 4]))
        .unwrap();

    let err = sched
        .insert(Process::new("dup", vec![Instruction::Cpu; 9]))
        .unwrap_err();
    assert!(matches!(err, SchedError::DuplicateProcess(ref n) if n == "dup"));

    let handle = sched.spawn();
    handle.join().unwrap();
    assert_eq!(sched.stats().completions(), 1);
}

/// Full ingestion path: tape files on disk, arrival messages over the
/// channel, a garbled message and a duplicate along the way, then `end`
/// drains the scheduler.
#[test]
fn test_listener_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let tape_a = write_tape(dir.path(), "a", &["cpu", "cpu", "cpu"]);
    let tape_b = write_tape(dir.path(), "b", &["cpu", "io 5", "cpu"]);

    let sched = new_scheduler(fast_cfg());
    let sched_loop = sched.spawn();

    let (tx, rx) = unbounded();
    tx.send(format!("proc a {}", tape_a.display())).unwrap();
    tx.send("not a real message".to_string()).unwrap();
    tx.send(format!("proc b {}", tape_b.display())).unwrap();
    // Duplicate arrival for a name that is still queued.
    tx.send(format!("proc a {}", tape_a.display())).unwrap();
    tx.send("end".to_string()).unwrap();

    Listener::new(rx, sched.clone(), Box::new(Keep))
        .run(sched_loop)
        .unwrap();

    let stats = sched.stats();
    assert_eq!(stats.completions(), 2, "a and b should finish exactly once");
    assert_eq!(stats.io_returns(), 1);
    assert_eq!(sched.nr_queued(), 0);
    assert_eq!(sched.nr_io_waiting(), 0);
}

/// A closed channel without `end` still drains gracefully.
#[test]
fn test_listener_disconnect_drains() {
    let dir = tempfile::tempdir().unwrap();
    let tape = write_tape(dir.path(), "only", &["cpu"]);

    let sched = new_scheduler(fast_cfg());
    let sched_loop = sched.spawn();

    let (tx, rx) = unbounded();
    tx.send(format!("proc only {}", tape.display())).unwrap();
    drop(tx);

    Listener::new(rx, sched.clone(), Box::new(Keep))
        .run(sched_loop)
        .unwrap();

    assert_eq!(sched.stats().completions(), 1);
}

/// A missing tape file skips that arrival without disturbing the rest.
#[test]
fn test_listener_skips_unreadable_tape() {
    let dir = tempfile::tempdir().unwrap();
    let tape = write_tape(dir.path(), "real", &["cpu"]);

    let sched = new_scheduler(fast_cfg());
    let sched_loop = sched.spawn();

    let (tx, rx) = unbounded();
    tx.send("proc ghost /nonexistent/tape".to_string()).unwrap();
    tx.send(format!("proc real {}", tape.display())).unwrap();
    tx.send("end".to_string()).unwrap();

    Listener::new(rx, sched.clone(), Box::new(Keep))
        .run(sched_loop)
        .unwrap();

    assert_eq!(sched.stats().completions(), 1);
}
