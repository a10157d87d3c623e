// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam::channel::{unbounded, Sender};
use log::{error, info, warn};
use rand::rngs::SmallRng;
use rand::SeedableRng;

use fairland::{
    parse_batch, run_generator, EveryNth, Keep, Listener, NicenessPolicy, Scheduler,
    SchedulerConfig,
};

/// fairland: a user-space Completely Fair Scheduler simulator
///
/// fairland replays a synthetic workload through the CFS scheduling policy:
/// processes carry a tape of `cpu` and `io <n>` instructions, arrive over a
/// message channel, and run in weighted virtual-runtime order until every
/// tape is exhausted.
///
/// The default mode reads a batch description file (one process per line as
/// `name,delayBeforeArrival,totalCpuUnits,numInterrupts`), expands each
/// entry into an instruction tape with randomly placed I/O, and feeds the
/// arrivals to the scheduler with the requested delays. With --stdin the
/// built-in generator is skipped and arrival messages (`proc <name> <path>`,
/// terminated by `end`) are read line by line from standard input instead,
/// so an external driver can feed the scheduler over a pipe.
///
/// All progress is reported on stderr: selections, granted slices, I/O
/// entry and return, idle ticks, and the final shutdown counters.
#[derive(Debug, Parser)]
struct Opts {
    /// Batch description file (required unless --stdin is given).
    batch_file: Option<PathBuf>,

    /// Read arrival messages from stdin instead of generating a batch.
    #[clap(long, action = clap::ArgAction::SetTrue)]
    stdin: bool,

    /// Target scheduling period, in time units.
    #[clap(short = 'l', long, default_value = "45.0")]
    sched_latency: f64,

    /// Floor on any single time slice, in time units.
    #[clap(short = 'g', long, default_value = "30.0")]
    min_granularity: f64,

    /// Consecutive idle ticks after which an empty scheduler exits.
    #[clap(long, default_value = "60")]
    idle_timeout: u64,

    /// Wall-clock microseconds per simulated time unit.
    #[clap(long, default_value = "100000")]
    tick_us: u64,

    /// Directory for generated instruction tapes.
    #[clap(long, default_value = "tapes")]
    tape_dir: PathBuf,

    /// Give every n-th arrival a random niceness; 0 disables the policy.
    #[clap(long, default_value = "3")]
    nice_every: u64,

    /// Seed for tape generation and niceness draws; omit for entropy.
    #[clap(long)]
    seed: Option<u64>,

    /// Enable verbose output.
    #[clap(short = 'v', long, action = clap::ArgAction::SetTrue)]
    verbose: bool,
}

/// Bridge stdin lines onto the arrival channel. Read failures are logged
/// and retried; the scheduler side never sees them.
fn feed_from_stdin(tx: Sender<String>) {
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        match line {
            Ok(line) => {
                if tx.send(line).is_err() {
                    // Listener is gone; nothing left to feed.
                    break;
                }
            }
            Err(err) => warn!("failed to read from stdin: {err}"),
        }
    }
}

fn init_logger(verbose: bool) -> Result<()> {
    let loglevel = if verbose {
        simplelog::LevelFilter::Debug
    } else {
        simplelog::LevelFilter::Info
    };

    let mut lcfg = simplelog::ConfigBuilder::new();
    lcfg.set_time_level(simplelog::LevelFilter::Error)
        .set_location_level(simplelog::LevelFilter::Off)
        .set_target_level(simplelog::LevelFilter::Off)
        .set_thread_level(simplelog::LevelFilter::Off);
    simplelog::TermLogger::init(
        loglevel,
        lcfg.build(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Auto,
    )?;
    Ok(())
}

fn main() -> Result<()> {
    let opts = Opts::parse();
    init_logger(opts.verbose)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    ctrlc::set_handler(move || {
        shutdown_clone.store(true, Ordering::Relaxed);
    })
    .context("Error setting Ctrl-C handler")?;

    let cfg = SchedulerConfig {
        sched_latency: opts.sched_latency,
        min_granularity: opts.min_granularity,
        idle_timeout: opts.idle_timeout,
        tick: Duration::from_micros(opts.tick_us),
    };

    let (tx, rx) = unbounded();

    if opts.stdin {
        thread::Builder::new()
            .name("stdin-feed".into())
            .spawn(move || feed_from_stdin(tx))
            .context("failed to spawn stdin reader")?;
    } else {
        let batch_file = opts
            .batch_file
            .context("a batch file is required unless --stdin is given")?;
        let file = File::open(&batch_file)
            .with_context(|| format!("failed to open batch file {}", batch_file.display()))?;
        let entries = parse_batch(BufReader::new(file))
            .with_context(|| format!("failed to parse batch file {}", batch_file.display()))?;
        info!("loaded {} process descriptions", entries.len());

        std::fs::create_dir_all(&opts.tape_dir)
            .with_context(|| format!("failed to create tape dir {}", opts.tape_dir.display()))?;

        let rng = match opts.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };
        let dir = opts.tape_dir.clone();
        let tick = cfg.tick;
        thread::Builder::new()
            .name("generator".into())
            .spawn(move || {
                if let Err(err) = run_generator(entries, &dir, tx, rng, tick) {
                    error!("workload generator failed: {err:#}");
                }
            })
            .context("failed to spawn workload generator")?;
    }

    let sched = Arc::new(Scheduler::new(cfg, shutdown));
    let sched_loop = sched.spawn();

    let policy: Box<dyn NicenessPolicy> = if opts.nice_every > 0 {
        // Offset the seed so niceness draws differ from tape placement.
        Box::new(EveryNth::new(opts.nice_every, opts.seed.map(|s| s ^ 0x9e37)))
    } else {
        Box::new(Keep)
    };

    Listener::new(rx, sched.clone(), policy).run(sched_loop)?;

    let stats = sched.stats();
    info!(
        "simulation complete: {} processes finished",
        stats.completions()
    );
    Ok(())
}
