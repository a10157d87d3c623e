//! fairland - a user-space Completely Fair Scheduler simulator.
//!
//! This crate simulates the Linux CFS scheduling policy against synthetic
//! workloads. Processes arrive over a text message channel, carry a tape of
//! `cpu` / `io <n>` instructions, and are run in weighted virtual-runtime
//! order until every tape is exhausted.
//!
//! # Architecture
//!
//! - **Weights**: the kernel's niceness-to-weight curve
//! - **Process**: instruction tape, cursor, raw runtime and vruntime
//! - **RunQueue**: vruntime-ordered queue with stable insertion tiebreak
//! - **IoWaitSet**: processes parked on a simulated I/O completion timer
//! - **Scheduler**: the scheduling loop plus per-blocked-process timers
//! - **Ingest**: listener that turns arrival messages into queued processes
//! - **Workload**: batch-file parser and instruction tape generator
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::atomic::AtomicBool;
//! use std::sync::Arc;
//!
//! use fairland::{Process, Scheduler, SchedulerConfig};
//!
//! let shutdown = Arc::new(AtomicBool::new(false));
//! let sched = Arc::new(Scheduler::new(SchedulerConfig::default(), shutdown));
//! let handle = sched.spawn();
//!
//! sched.insert(Process::from_tape_file("worker", "tapes/proc_worker".as_ref()).unwrap()).unwrap();
//! handle.join().unwrap();
//! ```

pub mod error;
pub mod ingest;
pub mod iowait;
pub mod process;
pub mod runqueue;
pub mod scheduler;
pub mod weights;
pub mod workload;

// Re-export the main public types for convenience.
pub use error::SchedError;
pub use ingest::{EveryNth, Keep, Listener, Message, NicenessPolicy};
pub use iowait::IoWaitSet;
pub use process::{Instruction, Process, RunResult};
pub use runqueue::RunQueue;
pub use scheduler::{SchedStats, Scheduler, SchedulerConfig};
pub use weights::{weight_of, NICE_0_WEIGHT};
pub use workload::{parse_batch, run_generator, BatchEntry};
