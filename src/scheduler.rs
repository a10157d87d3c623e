//! The scheduling loop and its completion timers.
//!
//! A single loop thread repeatedly pops the minimum-vruntime process,
//! grants it a time slice, runs it, and then retires, parks, or requeues
//! it. Each process that blocks on I/O gets a short-lived timer thread
//! that sleeps out the I/O duration and moves the process back to the run
//! queue.
//!
//! Locking discipline: "pop min + weight sum" is one critical section on
//! the run queue lock. The timer's move takes the I/O wait lock first,
//! releases it, then takes the run queue lock; that order holds everywhere
//! the two locks meet.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use log::{error, info, warn};

use crate::error::SchedError;
use crate::iowait::IoWaitSet;
use crate::process::{Process, RunResult};
use crate::runqueue::RunQueue;

/// Fixed-for-lifetime scheduling parameters.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Target period, in time units, that one full pass over the queue
    /// should cover.
    pub sched_latency: f64,
    /// Floor on any single time slice, in time units.
    pub min_granularity: f64,
    /// Consecutive idle ticks after which an empty scheduler exits.
    pub idle_timeout: u64,
    /// Wall-clock duration of one simulated time unit.
    pub tick: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            sched_latency: 45.0,
            min_granularity: 30.0,
            idle_timeout: 60,
            tick: Duration::from_millis(100),
        }
    }
}

/// Counters maintained by the scheduling loop, readable from any thread.
#[derive(Debug, Default)]
pub struct SchedStats {
    /// Times a process was selected and granted a slice.
    pub nr_selections: AtomicU64,
    /// Processes that ran their tape to completion.
    pub nr_completions: AtomicU64,
    /// Runs that ended on an I/O instruction.
    pub nr_io_blocks: AtomicU64,
    /// Processes returned to the queue by a completion timer.
    pub nr_io_returns: AtomicU64,
    /// Runs that exhausted their slice and were requeued.
    pub nr_requeues: AtomicU64,
    /// Ticks spent with an empty run queue.
    pub nr_idle_ticks: AtomicU64,
}

impl SchedStats {
    pub fn completions(&self) -> u64 {
        self.nr_completions.load(Ordering::Relaxed)
    }

    pub fn io_returns(&self) -> u64 {
        self.nr_io_returns.load(Ordering::Relaxed)
    }

    pub fn requeues(&self) -> u64 {
        self.nr_requeues.load(Ordering::Relaxed)
    }
}

/// The scheduler: shared queues plus the configuration, handed out as an
/// `Arc` to the loop thread, the ingestion listener, and the timers.
pub struct Scheduler {
    cfg: SchedulerConfig,
    run_queue: Arc<Mutex<RunQueue>>,
    io_wait: Arc<Mutex<IoWaitSet>>,
    stats: Arc<SchedStats>,
    shutdown: Arc<AtomicBool>,
}

impl Scheduler {
    pub fn new(cfg: SchedulerConfig, shutdown: Arc<AtomicBool>) -> Self {
        Scheduler {
            cfg,
            run_queue: Arc::new(Mutex::new(RunQueue::new())),
            io_wait: Arc::new(Mutex::new(IoWaitSet::new())),
            stats: Arc::new(SchedStats::default()),
            shutdown,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.cfg
    }

    pub fn stats(&self) -> &SchedStats {
        &self.stats
    }

    /// The flag that asks the loop (and its collaborators) to stop early.
    pub fn shutdown_flag(&self) -> &AtomicBool {
        &self.shutdown
    }

    /// Queue a newly arrived process. Duplicate names are rejected and the
    /// existing entry is left alone.
    pub fn insert(&self, process: Process) -> Result<(), SchedError> {
        self.run_queue.lock().unwrap().insert(process)
    }

    /// Number of processes currently runnable.
    pub fn nr_queued(&self) -> usize {
        self.run_queue.lock().unwrap().len()
    }

    /// Number of processes currently parked on I/O.
    pub fn nr_io_waiting(&self) -> usize {
        self.io_wait.lock().unwrap().len()
    }

    /// Whether a process is currently runnable (in the run queue).
    pub fn is_queued(&self, name: &str) -> bool {
        self.run_queue.lock().unwrap().contains(name)
    }

    /// Whether a process is currently parked on I/O.
    pub fn is_io_waiting(&self, name: &str) -> bool {
        self.io_wait.lock().unwrap().contains(name)
    }

    /// Start the scheduling loop on its own thread.
    pub fn spawn(self: &Arc<Self>) -> thread::JoinHandle<()> {
        let sched = Arc::clone(self);
        thread::Builder::new()
            .name("sched-loop".into())
            .spawn(move || sched.run_loop())
            .expect("failed to spawn scheduling loop thread")
    }

    /// The scheduling loop. Runs until the idle timeout elapses with no
    /// queued work and no outstanding I/O, or the shutdown flag is raised.
    fn run_loop(&self) {
        info!(
            "scheduler started: latency={} min_granularity={} idle_timeout={} ticks",
            self.cfg.sched_latency, self.cfg.min_granularity, self.cfg.idle_timeout
        );

        let mut idle_for: u64 = 0;
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                info!("shutdown requested, stopping scheduling loop");
                break;
            }

            let Some((process, weight_sum)) = self.select_next() else {
                if self.io_wait.lock().unwrap().is_empty() {
                    if idle_for >= self.cfg.idle_timeout {
                        info!("idle for {idle_for} consecutive ticks, shutting down");
                        break;
                    }
                    idle_for += 1;
                    info!("idle tick {idle_for}");
                } else {
                    // Blocked processes will come back; an idle exit here
                    // would drop them.
                    idle_for = 0;
                }
                self.stats.nr_idle_ticks.fetch_add(1, Ordering::Relaxed);
                thread::sleep(self.cfg.tick);
                continue;
            };
            idle_for = 0;

            self.run_one(process, weight_sum);
        }

        self.report();
    }

    /// Pop the minimum-vruntime process and compute the weight sum over the
    /// remaining queue plus the popped process, as one critical section.
    fn select_next(&self) -> Option<(Process, u64)> {
        let mut rq = self.run_queue.lock().unwrap();
        let process = rq.pop_min()?;
        let weight_sum = rq.total_weight() + process.weight() as u64;
        Some((process, weight_sum))
    }

    /// Grant one time slice to a selected process and route it by outcome.
    fn run_one(&self, mut process: Process, weight_sum: u64) {
        let slice =
            process.time_slice(self.cfg.sched_latency, self.cfg.min_granularity, weight_sum);
        // Execution proceeds in whole synthetic units.
        let quantum = slice as u64;

        info!(
            "running {} for {quantum} units (weight {}, vruntime {:.2}, queue weight {weight_sum})",
            process.name(),
            process.weight(),
            process.vruntime()
        );
        self.stats.nr_selections.fetch_add(1, Ordering::Relaxed);

        match process.run_for(quantum) {
            RunResult::Completed { ran } => {
                process.charge(ran);
                self.stats.nr_completions.fetch_add(1, Ordering::Relaxed);
                info!(
                    "{} completed after {:.0} total units (vruntime {:.2})",
                    process.name(),
                    process.raw_runtime(),
                    process.vruntime()
                );
            }
            RunResult::Blocked { ran, io_duration } => {
                process.charge(ran);
                self.stats.nr_io_blocks.fetch_add(1, Ordering::Relaxed);
                info!(
                    "{} entered io for {io_duration} units after running {ran}",
                    process.name()
                );
                self.park_on_io(process, io_duration);
            }
            RunResult::SliceExhausted { ran } => {
                process.charge(ran);
                self.stats.nr_requeues.fetch_add(1, Ordering::Relaxed);
                info!(
                    "{} exhausted its slice of {ran} units, requeueing (vruntime {:.2})",
                    process.name(),
                    process.vruntime()
                );
                if let Err(err) = self.run_queue.lock().unwrap().insert(process) {
                    // Unreachable while names stay unique handles.
                    error!("failed to requeue process: {err}");
                }
            }
        }
    }

    /// Move a blocked process into the I/O wait set and arm its completion
    /// timer. The timer carries only the process name and the duration; it
    /// claims the live descriptor at wakeup.
    fn park_on_io(&self, process: Process, io_duration: u64) {
        let name = process.name().to_string();
        self.io_wait.lock().unwrap().park(process);

        let io_wait = Arc::clone(&self.io_wait);
        let run_queue = Arc::clone(&self.run_queue);
        let stats = Arc::clone(&self.stats);
        let sleep_for = self.cfg.tick * io_duration as u32;

        let timer_name = name.clone();
        let timer = thread::Builder::new()
            .name(format!("io-timer-{name}"))
            .spawn(move || {
                let name = timer_name;
                thread::sleep(sleep_for);

                // I/O wait lock first, released before the run queue lock.
                let process = io_wait.lock().unwrap().claim(&name);
                match process {
                    Some(process) => {
                        info!("{name} returned from io after {io_duration} units");
                        stats.nr_io_returns.fetch_add(1, Ordering::Relaxed);
                        if let Err(err) = run_queue.lock().unwrap().insert(process) {
                            error!("failed to requeue {name} after io: {err}");
                        }
                    }
                    None => warn!("io timer fired for {name} but it was not parked"),
                }
            });
        if let Err(err) = timer {
            // Without a timer the process would be parked forever; pull it
            // straight back into the run queue instead.
            error!("failed to spawn io completion timer for {name}: {err}");
            if let Some(process) = self.io_wait.lock().unwrap().claim(&name) {
                if let Err(err) = self.run_queue.lock().unwrap().insert(process) {
                    error!("failed to requeue {name}: {err}");
                }
            }
        }
    }

    /// Final counter dump, mirrored from the loop's own counters.
    fn report(&self) {
        let s = &self.stats;
        info!(
            "scheduler exiting: nr_selections={} nr_completions={} nr_io_blocks={} \
             nr_io_returns={} nr_requeues={} nr_idle_ticks={}",
            s.nr_selections.load(Ordering::Relaxed),
            s.nr_completions.load(Ordering::Relaxed),
            s.nr_io_blocks.load(Ordering::Relaxed),
            s.nr_io_returns.load(Ordering::Relaxed),
            s.nr_requeues.load(Ordering::Relaxed),
            s.nr_idle_ticks.load(Ordering::Relaxed),
        );
    }
}
