// MOLT RUN COORDINATOR
// TOP-LEVEL LOOP: FOR EACH VARIANT AND EACH VERSION, DRIVE THE LIFECYCLE
// AND THE SAMPLER IN ORDER AND ACCUMULATE RESULTS. PASSES NEVER OVERLAP:
// BOTH VARIANTS BIND THE SAME SERVICE ENDPOINT.
//
// ON ANY FATAL ERROR THE CURRENT INSTANCE IS TORN DOWN, THE FAILED PASS
// IS MARKED INCOMPLETE, AND ALREADY-ACCUMULATED RESULTS ARE KEPT.

use std::fs::File;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;

use crate::config::{BenchConfig, Variant};
use crate::error::{BenchError, Result};
use crate::harness;
use crate::lifecycle::{LifecycleDriver, UpgradeOutcome};
use crate::metrics::{self, MemoryRecord, MemorySample, Phase, RECORD_SCHEMA};

#[derive(Debug, Clone, Serialize)]
pub struct VersionOutcome {
    pub median_secs: f64,
    pub memory: MemorySample,
}

#[derive(Debug, Clone, Serialize)]
pub struct PassResults {
    pub variant: Variant,
    pub complete: bool,
    // INDEXED BY VERSION. None = NEVER REACHED.
    pub versions: Vec<Option<VersionOutcome>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConcurrentPhase {
    pub complete: bool,
    pub live: Vec<Option<MemorySample>>,
    pub restart: Vec<Option<MemorySample>>,
}

// THE ARTIFACT HANDED TO THE (EXTERNAL) REPORT RENDERER
#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkResult {
    pub versions: Vec<String>,
    pub serial_runs: usize,
    pub connections: usize,
    pub live: PassResults,
    pub restart: PassResults,
    pub concurrent: ConcurrentPhase,
}

impl BenchmarkResult {
    fn new(cfg: &BenchConfig) -> Self {
        let n = cfg.versions.len();
        Self {
            versions: cfg.versions.clone(),
            serial_runs: cfg.workload.serial_runs,
            connections: cfg.concurrent.connections,
            live: PassResults {
                variant: Variant::Live,
                complete: false,
                versions: vec![None; n],
            },
            restart: PassResults {
                variant: Variant::Restart,
                complete: false,
                versions: vec![None; n],
            },
            concurrent: ConcurrentPhase {
                complete: false,
                live: vec![None; n],
                restart: vec![None; n],
            },
        }
    }
}

pub struct Coordinator<'a> {
    cfg: &'a BenchConfig,
    shutdown: &'a AtomicBool,
}

impl<'a> Coordinator<'a> {
    pub fn new(cfg: &'a BenchConfig, shutdown: &'a AtomicBool) -> Self {
        Self { cfg, shutdown }
    }

    // RUNS BOTH SERIAL PASSES, THEN THE CONCURRENT PHASE. ALWAYS RETURNS
    // WHATEVER RESULTS ACCUMULATED SO THE CALLER CAN REPORT PARTIALS.
    pub fn run(&self) -> (BenchmarkResult, Result<()>) {
        let mut result = BenchmarkResult::new(self.cfg);
        if let Err(e) = self.truncate_logs() {
            return (result, Err(e));
        }

        for variant in [Variant::Live, Variant::Restart] {
            let slots = match variant {
                Variant::Live => &mut result.live.versions,
                Variant::Restart => &mut result.restart.versions,
            };
            match self.serial_pass(variant, slots) {
                Ok(()) => match variant {
                    Variant::Live => result.live.complete = true,
                    Variant::Restart => result.restart.complete = true,
                },
                Err(e) => {
                    println!("SERIAL PASS {} FAILED: {}", variant.label(), e);
                    return (result, Err(e));
                }
            }
        }

        match self.concurrent_phase(&mut result.concurrent) {
            Ok(()) => result.concurrent.complete = true,
            Err(e) => {
                println!("CONCURRENT PHASE FAILED: {}", e);
                return (result, Err(e));
            }
        }

        (result, Ok(()))
    }

    // EVERY RESULT LOG STARTS EMPTY
    fn truncate_logs(&self) -> Result<()> {
        for path in [
            &self.cfg.logs.output,
            &self.cfg.logs.timing_live,
            &self.cfg.logs.timing_restart,
            &self.cfg.logs.memory_live,
            &self.cfg.logs.memory_restart,
        ] {
            File::create(path)?;
        }
        Ok(())
    }

    fn check_interrupt(&self) -> Result<()> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(BenchError::Interrupted);
        }
        Ok(())
    }

    fn serial_pass(
        &self,
        variant: Variant,
        slots: &mut [Option<VersionOutcome>],
    ) -> Result<()> {
        println!("{}", "-".repeat(60));
        println!(
            "SERIAL PASS: {} ({} VERSIONS, {} RUNS EACH)",
            variant.label(),
            self.cfg.versions.len(),
            self.cfg.workload.serial_runs
        );
        println!("{}", "-".repeat(60));

        let mut driver = LifecycleDriver::new(self.cfg, variant)?;
        driver.start()?;
        let body = self.serial_pass_body(&mut driver, slots);
        // ALWAYS THE LAST ACTION OF A PASS, FAILURE PATHS INCLUDED
        let term = driver.terminate();
        body?;
        term?;
        Ok(())
    }

    fn serial_pass_body(
        &self,
        driver: &mut LifecycleDriver,
        slots: &mut [Option<VersionOutcome>],
    ) -> Result<()> {
        let variant = driver.variant();
        loop {
            self.check_interrupt()?;
            let v = driver.current_version();
            println!(
                "  VERSION {} ({}/{})",
                driver.current_id(),
                v + 1,
                self.cfg.versions.len()
            );

            for _ in 0..self.cfg.workload.serial_runs {
                let secs = driver.run_workload()?;
                metrics::record_timing(self.cfg.timing_log(variant), v, variant, secs)?;
            }
            let reduced =
                metrics::reduce_timings(self.cfg.timing_log(variant), self.cfg.workload.serial_runs)?;
            let secs: Vec<f64> = reduced.iter().map(|r| r.secs).collect();
            let median = metrics::median(&secs);

            // MEMORY SAMPLED IMMEDIATELY BEFORE TEARDOWN-OR-UPGRADE
            let sample = metrics::sample_memory(driver.handle()?)?;
            metrics::record_memory(
                self.cfg.memory_log(variant),
                &MemoryRecord {
                    schema: RECORD_SCHEMA,
                    version: v,
                    variant,
                    phase: Phase::Serial,
                    vm_size_kb: sample.vm_size_kb,
                    vm_rss_kb: sample.vm_rss_kb,
                },
            )?;
            slots[v] = Some(VersionOutcome {
                median_secs: median,
                memory: sample,
            });
            println!(
                "    MEDIAN: {:.3}s  VMSIZE: {} kB  VMRSS: {} kB",
                median, sample.vm_size_kb, sample.vm_rss_kb
            );

            match driver.upgrade()? {
                UpgradeOutcome::Advanced(_) => {}
                UpgradeOutcome::Exhausted => return Ok(()),
            }
        }
    }

    // FRESH INSTANCE PER (VERSION, VARIANT), N PROBES EACH
    fn concurrent_phase(&self, out: &mut ConcurrentPhase) -> Result<()> {
        println!("{}", "-".repeat(60));
        println!(
            "CONCURRENT PHASE ({} CONNECTIONS, {} ms WINDOW)",
            self.cfg.concurrent.connections, self.cfg.concurrent.window_ms
        );
        println!("{}", "-".repeat(60));

        for v in 0..self.cfg.versions.len() {
            for variant in [Variant::Live, Variant::Restart] {
                self.check_interrupt()?;
                let mut driver = LifecycleDriver::new_at(self.cfg, variant, v)?;
                driver.start()?;
                let run = driver
                    .handle()
                    .and_then(|h| harness::run_concurrent(self.cfg, h));
                let term = driver.terminate();
                let report = run?;
                term?;

                metrics::record_memory(
                    self.cfg.memory_log(variant),
                    &MemoryRecord {
                        schema: RECORD_SCHEMA,
                        version: v,
                        variant,
                        phase: Phase::Concurrent,
                        vm_size_kb: report.sample.vm_size_kb,
                        vm_rss_kb: report.sample.vm_rss_kb,
                    },
                )?;
                let slot = match variant {
                    Variant::Live => &mut out.live[v],
                    Variant::Restart => &mut out.restart[v],
                };
                *slot = Some(report.sample);
                println!(
                    "  {} {}: VMSIZE {} kB  VMRSS {} kB  ({} PROBES, {} ALREADY GONE)",
                    self.cfg.versions[v],
                    variant.label(),
                    report.sample.vm_size_kb,
                    report.sample.vm_rss_kb,
                    report.probes,
                    report.already_gone
                );
            }
        }
        Ok(())
    }
}
