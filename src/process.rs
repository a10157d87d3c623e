//! Process descriptor: an instruction tape plus runtime accounting.
//!
//! A process owns its full tape from creation. Executing a `cpu` unit is a
//! synthetic no-op; an `io <n>` instruction ends the current run and parks
//! the process until a completion timer fires. The scheduling loop charges
//! raw runtime and vruntime exactly once per run from the returned unit
//! count, whatever the outcome.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use log::debug;

use crate::error::SchedError;
use crate::weights::{weight_of, NICE_0_WEIGHT};

/// One step of a process's tape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    /// One synthetic compute unit.
    Cpu,
    /// Block for the given number of time units.
    Io(u64),
}

impl FromStr for Instruction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_whitespace().collect::<Vec<_>>().as_slice() {
            ["cpu"] => Ok(Instruction::Cpu),
            ["io", n] => n
                .parse::<u64>()
                .map(Instruction::Io)
                .map_err(|_| format!("invalid io duration '{n}'")),
            _ => Err(format!("unrecognized instruction '{s}'")),
        }
    }
}

/// Outcome of running a process for an allocated slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunResult {
    /// The cursor reached the end of the tape; `ran` units were consumed.
    Completed { ran: u64 },
    /// The process hit an I/O instruction after `ran` CPU units. The cursor
    /// has already advanced past the I/O instruction.
    Blocked { ran: u64, io_duration: u64 },
    /// The slice ran out with instructions still remaining.
    SliceExhausted { ran: u64 },
}

/// A schedulable process.
#[derive(Debug)]
pub struct Process {
    name: String,
    instructions: Vec<Instruction>,
    /// Index of the next instruction. Only ever moves forward.
    cursor: usize,
    /// Cumulative synthetic CPU units consumed.
    raw_runtime: f64,
    /// Scheduling weight from the niceness table. Fixed after creation.
    weight: u32,
    /// Weight-normalized runtime; the sole run queue ordering key.
    vruntime: f64,
}

impl Process {
    pub fn new(name: impl Into<String>, instructions: Vec<Instruction>) -> Self {
        Process {
            name: name.into(),
            instructions,
            cursor: 0,
            raw_runtime: 0.0,
            weight: NICE_0_WEIGHT,
            vruntime: 0.0,
        }
    }

    /// Load a process from a line-oriented tape file (`cpu` / `io <n>`).
    ///
    /// Any unrecognized line fails the whole load; a process never starts
    /// with a partial tape.
    pub fn from_tape_file(name: impl Into<String>, path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("failed to open tape {}", path.display()))?;

        let mut instructions = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line.with_context(|| format!("failed to read tape {}", path.display()))?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let instr = line.parse::<Instruction>().map_err(|reason| {
                SchedError::Parse {
                    line: idx + 1,
                    reason,
                }
            })?;
            instructions.push(instr);
        }

        Ok(Process::new(name, instructions))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn vruntime(&self) -> f64 {
        self.vruntime
    }

    pub fn raw_runtime(&self) -> f64 {
        self.raw_runtime
    }

    /// Remaining instructions on the tape.
    pub fn remaining(&self) -> usize {
        self.instructions.len() - self.cursor
    }

    /// Apply a niceness level, replacing the weight. Out-of-range values
    /// are rejected and the current weight is kept.
    pub fn set_niceness(&mut self, niceness: i32) -> Result<(), SchedError> {
        self.weight = weight_of(niceness)?;
        Ok(())
    }

    /// The time slice this process gets out of a scheduling period covering
    /// `weight_sum` total weight.
    ///
    /// Under heavy contention the granularity floor deliberately
    /// over-subscribes the latency target; every process still makes
    /// progress each turn.
    pub fn time_slice(&self, sched_latency: f64, min_granularity: f64, weight_sum: u64) -> f64 {
        let slice = (self.weight as f64 / weight_sum as f64) * sched_latency;
        if slice < min_granularity {
            min_granularity
        } else {
            slice
        }
    }

    /// Charge `ran` synthetic units of runtime, advancing vruntime in
    /// inverse proportion to weight. Called once per run by the scheduling
    /// loop.
    pub fn charge(&mut self, ran: u64) {
        self.raw_runtime += ran as f64;
        self.vruntime += (NICE_0_WEIGHT as f64 / self.weight as f64) * ran as f64;
    }

    /// Execute up to `allocated` synthetic units, stopping early on an I/O
    /// instruction or the end of the tape.
    ///
    /// Does not touch the runtime counters; the caller charges the returned
    /// unit count.
    pub fn run_for(&mut self, allocated: u64) -> RunResult {
        let mut ran = 0;
        while ran < allocated {
            let Some(instr) = self.instructions.get(self.cursor).copied() else {
                return RunResult::Completed { ran };
            };
            self.cursor += 1;
            match instr {
                Instruction::Cpu => {
                    // The compute unit itself is a no-op.
                    debug!("{}: cpu unit at tape position {}", self.name, self.cursor - 1);
                    ran += 1;
                }
                Instruction::Io(io_duration) => {
                    return RunResult::Blocked { ran, io_duration };
                }
            }
        }
        if self.cursor >= self.instructions.len() {
            RunResult::Completed { ran }
        } else {
            RunResult::SliceExhausted { ran }
        }
    }
}
