//! Ingestion listener: turns arrival messages into queued processes.
//!
//! Messages are text lines. `proc <name> <path>` announces a new process
//! whose instruction tape lives at `<path>`; the literal `end` closes the
//! stream. After `end` the listener blocks until the scheduling loop has
//! drained and exited, so in-flight work is never cancelled.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Result};
use crossbeam::channel::{Receiver, RecvTimeoutError};
use log::{info, warn};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::process::Process;
use crate::scheduler::Scheduler;

/// A parsed ingestion message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A process arrival: name plus the path of its instruction tape.
    Proc { name: String, path: PathBuf },
    /// End of stream; no further arrivals will follow.
    End,
}

impl FromStr for Message {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_whitespace().collect::<Vec<_>>().as_slice() {
            ["end"] => Ok(Message::End),
            ["proc", name, path] => Ok(Message::Proc {
                name: name.to_string(),
                path: PathBuf::from(path),
            }),
            _ => Err(format!("unrecognized message '{s}'")),
        }
    }
}

/// Decides the niceness of each arriving process.
///
/// Niceness assignment is an external policy, not a scheduler invariant;
/// swap implementations freely.
pub trait NicenessPolicy: Send {
    /// Niceness for the `arrival`-th process (1-based), or `None` to keep
    /// the default.
    fn niceness_for(&mut self, name: &str, arrival: u64) -> Option<i32>;
}

/// Leave every process at the default niceness.
pub struct Keep;

impl NicenessPolicy for Keep {
    fn niceness_for(&mut self, _name: &str, _arrival: u64) -> Option<i32> {
        None
    }
}

/// Give every n-th arrival a uniformly random niceness in [-20, 20].
pub struct EveryNth {
    modulus: u64,
    rng: SmallRng,
}

impl EveryNth {
    pub fn new(modulus: u64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };
        EveryNth { modulus, rng }
    }
}

impl NicenessPolicy for EveryNth {
    fn niceness_for(&mut self, _name: &str, arrival: u64) -> Option<i32> {
        if self.modulus > 0 && arrival % self.modulus == 0 {
            Some(self.rng.gen_range(-20..=20))
        } else {
            None
        }
    }
}

/// Consumes arrival messages and feeds the scheduler.
pub struct Listener {
    rx: Receiver<String>,
    scheduler: Arc<Scheduler>,
    policy: Box<dyn NicenessPolicy>,
    arrivals: u64,
}

impl Listener {
    pub fn new(
        rx: Receiver<String>,
        scheduler: Arc<Scheduler>,
        policy: Box<dyn NicenessPolicy>,
    ) -> Self {
        Listener {
            rx,
            scheduler,
            policy,
            arrivals: 0,
        }
    }

    /// Consume messages until `end` (or the channel closes or the shutdown
    /// flag is raised), then wait for the scheduling loop to drain.
    pub fn run(mut self, sched_loop: JoinHandle<()>) -> Result<()> {
        loop {
            match self.rx.recv_timeout(Duration::from_millis(100)) {
                Ok(line) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match line.parse::<Message>() {
                        Ok(Message::End) => {
                            info!("received end of arrivals");
                            break;
                        }
                        Ok(Message::Proc { name, path }) => self.admit(name, path),
                        Err(reason) => {
                            // A garbled message is transient; keep listening.
                            warn!("ignoring message: {reason}");
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    if self.shutdown_requested() {
                        info!("shutdown requested, listener stopping");
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    warn!("arrival channel closed without an end message");
                    break;
                }
            }
        }

        info!("waiting for the scheduling loop to drain");
        sched_loop
            .join()
            .map_err(|_| anyhow!("scheduling loop panicked"))?;
        let left_behind = self.scheduler.nr_queued();
        if left_behind > 0 {
            warn!("{left_behind} queued processes never ran (loop already exited)");
        }
        Ok(())
    }

    fn shutdown_requested(&self) -> bool {
        self.scheduler.shutdown_flag().load(Ordering::Relaxed)
    }

    /// Build a process from its tape file, apply the niceness policy, and
    /// queue it. Failures skip this arrival and keep the listener alive.
    fn admit(&mut self, name: String, path: PathBuf) {
        let mut process = match Process::from_tape_file(name.as_str(), &path) {
            Ok(process) => process,
            Err(err) => {
                warn!("dropping arrival '{name}': {err:#}");
                return;
            }
        };

        self.arrivals += 1;
        if let Some(niceness) = self.policy.niceness_for(&name, self.arrivals) {
            match process.set_niceness(niceness) {
                Ok(()) => info!("set niceness of {name} to {niceness}"),
                Err(err) => warn!("keeping default weight for {name}: {err}"),
            }
        }

        info!(
            "admitting {name} with {} instructions (weight {})",
            process.remaining(),
            process.weight()
        );
        if let Err(err) = self.scheduler.insert(process) {
            warn!("rejecting arrival: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_messages() {
        assert_eq!("end".parse::<Message>().unwrap(), Message::End);
        assert_eq!(
            "proc p1 tapes/proc_p1".parse::<Message>().unwrap(),
            Message::Proc {
                name: "p1".to_string(),
                path: PathBuf::from("tapes/proc_p1"),
            }
        );
        assert!("".parse::<Message>().is_err());
        assert!("proc p1".parse::<Message>().is_err());
        assert!("launch p1 file".parse::<Message>().is_err());
    }

    #[test]
    fn every_nth_policy_hits_on_schedule() {
        let mut policy = EveryNth::new(3, Some(42));
        let hits: Vec<u64> = (1..=9)
            .filter(|&i| policy.niceness_for("p", i).is_some())
            .collect();
        assert_eq!(hits, vec![3, 6, 9]);
    }

    #[test]
    fn every_nth_policy_stays_in_range() {
        let mut policy = EveryNth::new(1, Some(7));
        for i in 1..=100 {
            let nice = policy.niceness_for("p", i).unwrap();
            assert!((-20..=20).contains(&nice), "niceness {nice} out of range");
        }
    }

    #[test]
    fn zero_modulus_never_fires() {
        let mut policy = EveryNth::new(0, Some(1));
        assert!((1..=10).all(|i| policy.niceness_for("p", i).is_none()));
    }
}
