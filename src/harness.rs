// MOLT CONCURRENCY HARNESS
// FAN OUT N PROBES AGAINST ONE RUNNING INSTANCE WITHOUT WAITING FOR ANY
// OF THEM, HOLD THE OBSERVATION WINDOW, SAMPLE THE SERVER'S MEMORY UNDER
// LOAD, THEN BULK-KILL EVERY PROBE HANDLE.
//
// PROBE HANDLES LIVE HERE AND NOWHERE ELSE: SERVER AND PROBE PIDS STAY
// IN DISJOINT SETS BY OWNERSHIP.

use std::time::Duration;

use crate::config::BenchConfig;
use crate::error::{BenchError, Result};
use crate::metrics::{self, MemorySample};
use crate::process::{self, LaunchMode, ProcessHandle};

pub struct HarnessReport {
    pub sample: MemorySample,
    pub probes: usize,
    pub terminated: usize,
    // PROBES ALREADY GONE AT CLEANUP. EXPECTED UNDER THE RACY SELF-TIMEOUT
    // DESIGN, SO TerminationError IS TOLERATED HERE AND ONLY HERE.
    pub already_gone: usize,
}

pub fn run_concurrent(cfg: &BenchConfig, server: &ProcessHandle) -> Result<HarnessReport> {
    let n = cfg.concurrent.connections;
    let mut probes: Vec<ProcessHandle> = Vec::with_capacity(n);
    for _ in 0..n {
        let sink = match process::output_sink(&cfg.logs.output) {
            Ok(s) => s,
            Err(e) => {
                cleanup(probes);
                return Err(e);
            }
        };
        // NON-BLOCKING PER-PROBE LAUNCH, NO INDIVIDUAL WAITS
        match process::launch(
            &cfg.concurrent.script,
            &[],
            sink,
            server.version,
            LaunchMode::FreshStart,
        ) {
            Ok(h) => probes.push(h),
            Err(e) => {
                // EVERY PROBE SPAWNED SO FAR IS STILL REAPED
                cleanup(probes);
                return Err(e);
            }
        }
    }

    std::thread::sleep(Duration::from_millis(cfg.concurrent.window_ms));

    // ONE SAMPLE UNDER CONCURRENT LOAD. CLEANUP RUNS EVEN IF IT FAILS.
    let sampled = metrics::sample_memory(server);
    let (terminated, already_gone) = cleanup(probes);
    let sample = sampled?;

    Ok(HarnessReport {
        sample,
        probes: n,
        terminated,
        already_gone,
    })
}

// UNCONDITIONAL BULK CLEANUP: ONE TERMINATE PER SPAWNED PROBE
fn cleanup(probes: Vec<ProcessHandle>) -> (usize, usize) {
    let mut terminated = 0;
    let mut already_gone = 0;
    for p in probes {
        match process::terminate(p) {
            Ok(()) => terminated += 1,
            Err(BenchError::Termination { .. }) => already_gone += 1,
            Err(_) => already_gone += 1,
        }
    }
    (terminated, already_gone)
}
