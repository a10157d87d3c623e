//! Error taxonomy for the scheduler core.
//!
//! None of these are fatal to the scheduling loop: parse failures abort a
//! batch load before the scheduler starts, and everything else is reported
//! to the caller and logged.

use std::error::Error;
use std::fmt;

#[derive(Debug)]
pub enum SchedError {
    /// A malformed batch or tape line. Carries the 1-based line number.
    Parse { line: usize, reason: String },
    /// The ingestion channel failed to deliver a message. Transient.
    ChannelRead(String),
    /// An insert would have overwritten an already-queued process.
    /// Names are the sole identity key, so this is rejected loudly.
    DuplicateProcess(String),
    /// Niceness outside [-20, 20]. The process keeps its current weight.
    NicenessOutOfRange(i32),
}

impl fmt::Display for SchedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedError::Parse { line, reason } => {
                write!(f, "parse error on line {line}: {reason}")
            }
            SchedError::ChannelRead(reason) => {
                write!(f, "failed to read from ingestion channel: {reason}")
            }
            SchedError::DuplicateProcess(name) => {
                write!(f, "process '{name}' is already queued")
            }
            SchedError::NicenessOutOfRange(nice) => {
                write!(f, "niceness {nice} is outside the allowed range [-20, 20]")
            }
        }
    }
}

impl Error for SchedError {}
