// MOLT ERROR TAXONOMY
// ONE ENUM FOR THE WHOLE ENGINE. NO RETRIES ANYWHERE: EVERY EXTERNAL
// INVOCATION HAS SIDE EFFECTS, SO THE ONLY RECOVERY IS TEARDOWN AND ABORT.

use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BenchError>;

#[derive(Debug, Error)]
pub enum BenchError {
    // PRE-FLIGHT: MISSING OR UNUSABLE CONFIGURATION KEY
    #[error("configuration: {0}")]
    Configuration(String),

    #[error("launch of {exe:?} failed: {reason}")]
    Launch { exe: PathBuf, reason: String },

    // TARGET ALREADY GONE AT TERMINATION TIME. FATAL IN SERVER-LIFECYCLE
    // CONTEXTS, TOLERATED DURING PROBE CLEANUP.
    #[error("termination of pid {pid} failed: {reason}")]
    Termination { pid: u32, reason: String },

    #[error("upgrade trigger for version {version:?} exited with {status}")]
    UpgradeScriptFailed { version: String, status: ExitStatus },

    // THE WORKLOAD IS A CORRECTNESS PROBE. ITS FAILURE INVALIDATES THE
    // MEASUREMENT BASIS FOR EVERY SUBSEQUENT NUMBER.
    #[error("workload {script:?} exited with {status}")]
    WorkloadFailed { script: PathBuf, status: ExitStatus },

    #[error("status snapshot for pid {pid} unavailable")]
    SampleUnavailable { pid: u32 },

    #[error("status snapshot missing field {field:?}")]
    MalformedSnapshot { field: &'static str },

    #[error("timing log holds {got} samples, need {need}")]
    InsufficientSamples { need: usize, got: usize },

    #[error("unsupported log record schema {schema}")]
    UnsupportedSchema { schema: u32 },

    // NORMAL PASS-COMPLETION SIGNAL, NOT A FAILURE
    #[error("no more versions to advance to")]
    NoMoreVersions,

    // THE RUNNING INSTANCE VANISHED WHERE THE STATE MACHINE REQUIRES IT
    #[error("running instance lost during version {version:?}: {detail}")]
    InstanceLost { version: String, detail: String },

    #[error("{what} exceeded the {secs}s deadline")]
    Timeout { what: String, secs: u64 },

    #[error("interrupted by operator")]
    Interrupted,

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("log record parse: {0}")]
    Record(#[from] serde_json::Error),
}
