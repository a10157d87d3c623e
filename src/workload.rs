//! Workload generation: batch descriptions into instruction tapes and
//! arrival messages.
//!
//! A batch file describes one process per line as
//! `name,delayBeforeArrival,totalCpuUnits,numInterrupts`. The generator
//! expands each entry into a tape of `cpu` lines with `numInterrupts`
//! randomly placed `io <n>` instructions, writes the tape to a file, and
//! emits the arrival message after the requested delay.

use std::fs::File;
use std::io::{BufRead, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam::channel::Sender;
use log::info;
use rand::rngs::SmallRng;
use rand::Rng;

use crate::error::SchedError;

/// Longest simulated I/O duration the generator will emit, in time units.
const MAX_IO_DURATION: u64 = 10;

/// One line of a batch description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntry {
    pub name: String,
    /// Time units to wait before announcing this process.
    pub delay: u64,
    /// Number of synthetic CPU units on the tape.
    pub total_cpu: u64,
    /// Number of CPU units to replace with I/O instructions.
    pub interrupts: u64,
}

impl BatchEntry {
    /// Expand this entry into tape lines: `total_cpu` CPU units with
    /// `interrupts` positions overwritten by random-duration I/O.
    pub fn build_tape(&self, rng: &mut SmallRng) -> Vec<String> {
        let mut lines = vec!["cpu".to_string(); self.total_cpu as usize];
        if lines.is_empty() {
            return lines;
        }
        for _ in 0..self.interrupts {
            let idx = rng.gen_range(0..lines.len());
            let duration = rng.gen_range(0..=MAX_IO_DURATION);
            lines[idx] = format!("io {duration}");
        }
        lines
    }
}

/// Parse a whole batch description.
///
/// Any malformed line fails the entire load; the scheduler never starts on
/// garbled input.
pub fn parse_batch<R: BufRead>(reader: R) -> Result<Vec<BatchEntry>, SchedError> {
    let mut entries = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let lineno = idx + 1;
        let line = line.map_err(|err| SchedError::Parse {
            line: lineno,
            reason: format!("read failed: {err}"),
        })?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        entries.push(parse_entry(line, lineno)?);
    }
    Ok(entries)
}

fn parse_entry(line: &str, lineno: usize) -> Result<BatchEntry, SchedError> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    let [name, delay, total_cpu, interrupts] = fields.as_slice() else {
        return Err(SchedError::Parse {
            line: lineno,
            reason: format!("expected 4 comma-separated fields, found {}", fields.len()),
        });
    };
    if name.is_empty() {
        return Err(SchedError::Parse {
            line: lineno,
            reason: "empty process name".to_string(),
        });
    }

    let number = |field: &str, what: &str| {
        field.parse::<u64>().map_err(|_| SchedError::Parse {
            line: lineno,
            reason: format!("{what} '{field}' is not a non-negative integer"),
        })
    };

    Ok(BatchEntry {
        name: name.to_string(),
        delay: number(delay, "delay")?,
        total_cpu: number(total_cpu, "total cpu units")?,
        interrupts: number(interrupts, "interrupt count")?,
    })
}

/// Write tape lines to `<dir>/proc_<name>` and return the path.
pub fn write_tape(dir: &Path, name: &str, lines: &[String]) -> Result<PathBuf> {
    let path = dir.join(format!("proc_{name}"));
    let file = File::create(&path)
        .with_context(|| format!("failed to create tape {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    for line in lines {
        writeln!(writer, "{line}")
            .with_context(|| format!("failed to write tape {}", path.display()))?;
    }
    writer
        .flush()
        .with_context(|| format!("failed to flush tape {}", path.display()))?;
    Ok(path)
}

/// Play a batch out as arrival messages: write each tape, honor the entry's
/// arrival delay, send `proc <name> <path>`, and close with `end`.
pub fn run_generator(
    entries: Vec<BatchEntry>,
    dir: &Path,
    tx: Sender<String>,
    mut rng: SmallRng,
    tick: Duration,
) -> Result<()> {
    for entry in &entries {
        let lines = entry.build_tape(&mut rng);
        let path = write_tape(dir, &entry.name, &lines)?;

        info!("delaying arrival of {} by {} units", entry.name, entry.delay);
        thread::sleep(tick * entry.delay as u32);

        let message = format!("proc {} {}", entry.name, path.display());
        info!("announcing arrival: {message}");
        tx.send(message)
            .context("scheduler hung up before the batch was delivered")?;
    }

    tx.send("end".to_string())
        .context("scheduler hung up before the end message")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use rand::SeedableRng;

    use super::*;

    #[test]
    fn parses_well_formed_batch() {
        let input = "p1,0,10,2\np2, 5, 20, 0\n\np3,1,3,1\n";
        let entries = parse_batch(Cursor::new(input)).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(
            entries[0],
            BatchEntry {
                name: "p1".to_string(),
                delay: 0,
                total_cpu: 10,
                interrupts: 2,
            }
        );
        assert_eq!(entries[1].delay, 5);
        assert_eq!(entries[2].interrupts, 1);
    }

    #[test]
    fn malformed_line_fails_whole_batch() {
        let cases = [
            "p1,0,10",          // missing field
            "p1,0,10,2,9",      // extra field
            "p1,x,10,2",        // non-integer delay
            "p1,0,ten,2",       // non-integer cpu units
            "p1,0,10,-1",       // negative interrupts
            ",0,10,2",          // empty name
        ];
        for case in cases {
            let err = parse_batch(Cursor::new(case)).unwrap_err();
            assert!(
                matches!(err, SchedError::Parse { line: 1, .. }),
                "expected parse failure for '{case}', got {err}"
            );
        }
    }

    #[test]
    fn parse_error_reports_line_number() {
        let input = "p1,0,10,2\nbroken line\n";
        let err = parse_batch(Cursor::new(input)).unwrap_err();
        assert!(matches!(err, SchedError::Parse { line: 2, .. }));
    }

    #[test]
    fn tape_has_requested_shape() {
        let entry = BatchEntry {
            name: "p1".to_string(),
            delay: 0,
            total_cpu: 50,
            interrupts: 5,
        };
        let mut rng = SmallRng::seed_from_u64(1);
        let lines = entry.build_tape(&mut rng);

        assert_eq!(lines.len(), 50);
        let io_lines = lines.iter().filter(|l| l.starts_with("io ")).count();
        // Random positions may collide, so at most `interrupts` io lines.
        assert!(io_lines >= 1 && io_lines <= 5, "io lines: {io_lines}");
        for line in &lines {
            assert!(
                line.parse::<crate::Instruction>().is_ok(),
                "unparseable tape line '{line}'"
            );
        }
    }

    #[test]
    fn empty_tape_for_zero_cpu_units() {
        let entry = BatchEntry {
            name: "p1".to_string(),
            delay: 0,
            total_cpu: 0,
            interrupts: 3,
        };
        let mut rng = SmallRng::seed_from_u64(1);
        assert!(entry.build_tape(&mut rng).is_empty());
    }

    #[test]
    fn tape_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let lines = vec!["cpu".to_string(), "io 4".to_string(), "cpu".to_string()];
        let path = write_tape(dir.path(), "p9", &lines).unwrap();
        assert!(path.ends_with("proc_p9"));

        let process = crate::Process::from_tape_file("p9", &path).unwrap();
        assert_eq!(process.remaining(), 3);
    }
}
