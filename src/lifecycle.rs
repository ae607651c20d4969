// MOLT LIFECYCLE DRIVER
// PER-VARIANT STATE MACHINE OVER THE VERSION SEQUENCE:
//   Unstarted -> Running(v) -> Upgrading(v -> v+1) -> Running(v+1) -> ... -> Terminated
// THE LIVE VARIANT UPGRADES IN PLACE AND KEEPS ITS PID; THE RESTART
// VARIANT KILLS AND RELAUNCHES, CHANGING PID. TERMINATE IS ALWAYS THE
// LAST ACTION OF A PASS, FAILURE PATHS INCLUDED.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{BenchConfig, ReadinessPolicy, Variant};
use crate::error::{BenchError, Result};
use crate::process::{self, LaunchMode, ProcessHandle};
use crate::versions::VersionSequencer;

// RESULT OF ONE UPGRADE ATTEMPT. Exhausted ENDS THE PASS SUCCESSFULLY.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeOutcome {
    Advanced(usize),
    Exhausted,
}

pub struct LifecycleDriver<'a> {
    cfg: &'a BenchConfig,
    variant: Variant,
    seq: VersionSequencer,
    handle: Option<ProcessHandle>,
}

impl<'a> LifecycleDriver<'a> {
    pub fn new(cfg: &'a BenchConfig, variant: Variant) -> Result<Self> {
        Self::new_at(cfg, variant, 0)
    }

    // THE CONCURRENT PHASE STARTS EACH VERSION SEPARATELY
    pub fn new_at(cfg: &'a BenchConfig, variant: Variant, start: usize) -> Result<Self> {
        Ok(Self {
            cfg,
            variant,
            seq: VersionSequencer::new(&cfg.versions, start)?,
            handle: None,
        })
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    pub fn current_version(&self) -> usize {
        self.seq.current()
    }

    pub fn current_id(&self) -> &str {
        self.seq.current_id()
    }

    pub fn pid(&self) -> Option<u32> {
        self.handle.as_ref().map(|h| h.pid)
    }

    // FOR MEMORY SAMPLING. THE HANDLE STAYS OWNED HERE.
    pub fn handle(&self) -> Result<&ProcessHandle> {
        self.handle.as_ref().ok_or_else(|| BenchError::InstanceLost {
            version: self.seq.current_id().to_string(),
            detail: "no running instance".to_string(),
        })
    }

    // Unstarted -> Running(current). LAUNCH, THEN READINESS WAIT.
    pub fn start(&mut self) -> Result<()> {
        debug_assert!(self.handle.is_none());
        let version = self.seq.current();
        let handle = self.launch_server(version)?;
        self.adopt(handle)
    }

    // A READINESS FAILURE MUST NOT LEAK THE FRESHLY LAUNCHED INSTANCE
    fn adopt(&mut self, handle: ProcessHandle) -> Result<()> {
        if let Err(e) = self.wait_ready(handle.pid) {
            let _ = process::terminate(handle);
            return Err(e);
        }
        self.handle = Some(handle);
        Ok(())
    }

    fn launch_server(&self, version: usize) -> Result<ProcessHandle> {
        let id = &self.cfg.versions[version];
        let (exe, args) = self.server_command(id);
        self.breadcrumb(&format!(
            "starting {} (version {}, {})",
            exe.display(),
            id,
            self.variant.label()
        ))?;
        let sink = process::output_sink(&self.cfg.logs.output)?;
        process::launch(&exe, &args, sink, version, LaunchMode::FreshStart)
    }

    fn server_command(&self, id: &str) -> (PathBuf, Vec<String>) {
        match self.variant {
            Variant::Live => {
                // DRIVER HOSTS THE UPDATABLE IMAGE
                let mut args = vec![self.cfg.live_image(id).display().to_string()];
                args.extend(self.cfg.server_args.iter().cloned());
                (self.cfg.live.launcher.clone(), args)
            }
            Variant::Restart => (self.cfg.restart_binary(id), self.cfg.server_args.clone()),
        }
    }

    // "starting ..." LINES GO TO THE SAME APPEND-ONLY OUTPUT LOG AS THE
    // REDIRECTED CHILD STDOUT. OPERATOR-INSPECTED, NEVER PARSED.
    fn breadcrumb(&self, line: &str) -> Result<()> {
        let mut sink = process::output_sink(&self.cfg.logs.output)?;
        writeln!(sink, "{}", line)?;
        Ok(())
    }

    fn wait_ready(&self, pid: u32) -> Result<()> {
        match self.cfg.readiness {
            ReadinessPolicy::SettleDelay { settle_ms } => {
                std::thread::sleep(Duration::from_millis(settle_ms));
                Ok(())
            }
            ReadinessPolicy::PollStatus {
                interval_ms,
                attempts,
            } => {
                for _ in 0..attempts {
                    if crate::metrics::read_status(pid).is_ok() {
                        return Ok(());
                    }
                    std::thread::sleep(Duration::from_millis(interval_ms));
                }
                Err(BenchError::Timeout {
                    what: format!("readiness of pid {}", pid),
                    secs: interval_ms * u64::from(attempts) / 1000,
                })
            }
        }
    }

    // Running(v) -> Upgrading(v -> v+1) -> Running(v+1)
    pub fn upgrade(&mut self) -> Result<UpgradeOutcome> {
        let next = match self.seq.advance() {
            Ok(idx) => idx,
            Err(BenchError::NoMoreVersions) => return Ok(UpgradeOutcome::Exhausted),
            Err(e) => return Err(e),
        };
        match self.variant {
            Variant::Live => self.upgrade_in_place(next)?,
            Variant::Restart => self.relaunch(next)?,
        }
        Ok(UpgradeOutcome::Advanced(next))
    }

    // RUN THE EXTERNAL TRIGGER TO COMPLETION, CHILD CWD SET TO THE TARGET
    // VERSION'S OWN DIRECTORY. THE ORCHESTRATOR'S CWD IS NEVER TOUCHED.
    // PID PRESERVATION IS THE PROPERTY UNDER TEST, SO IT IS CHECKED AS A
    // POSTCONDITION RATHER THAN ASSUMED.
    fn upgrade_in_place(&mut self, next: usize) -> Result<()> {
        let id = self.cfg.versions[next].clone();
        let dir = self.cfg.live_version_dir(&id);
        let script = self.cfg.live_update_script(&id);
        let pid = match &self.handle {
            Some(h) => h.pid,
            None => {
                return Err(BenchError::InstanceLost {
                    version: id,
                    detail: "no running instance at upgrade".to_string(),
                })
            }
        };
        self.breadcrumb(&format!("upgrading pid {} to {}", pid, id))?;
        let sink = process::output_sink(&self.cfg.logs.output)?;
        let status = process::run_to_completion(
            &script,
            &[],
            Some(&dir),
            sink,
            Duration::from_secs(self.cfg.wait_timeout_secs),
            &format!("upgrade trigger for {}", id),
        )?;
        if !status.success() {
            return Err(BenchError::UpgradeScriptFailed {
                version: id,
                status,
            });
        }
        // PID-IDENTITY POSTCONDITION
        match self.handle.as_mut() {
            Some(h) => {
                if h.is_running() {
                    h.promote(next);
                } else {
                    return Err(BenchError::InstanceLost {
                        version: id,
                        detail: format!("pid {} gone after live upgrade", pid),
                    });
                }
            }
            None => {
                return Err(BenchError::InstanceLost {
                    version: id,
                    detail: format!("pid {} gone after live upgrade", pid),
                })
            }
        }
        Ok(())
    }

    // BASELINE TRANSITION: KILL, THEN LAUNCH FRESH AT THE NEXT VERSION
    fn relaunch(&mut self, next: usize) -> Result<()> {
        let id = self.cfg.versions[next].clone();
        match self.handle.take() {
            Some(h) => process::terminate(h)?,
            None => {
                return Err(BenchError::InstanceLost {
                    version: id,
                    detail: "no running instance at relaunch".to_string(),
                })
            }
        }
        let handle = self.launch_server(next)?;
        self.adopt(handle)
    }

    // SYNCHRONOUS ORDERED DISPATCH: THE SERVER IS VERIFIED RUNNING BEFORE
    // THE WORKLOAD FIRES, AND THE CALL BLOCKS UNTIL THE SCRIPT EXITS.
    pub fn run_workload(&mut self) -> Result<f64> {
        let version = self.seq.current_id().to_string();
        match self.handle.as_mut() {
            Some(h) => {
                if !h.is_running() {
                    return Err(BenchError::InstanceLost {
                        version,
                        detail: format!("pid {} dead at workload dispatch", h.pid),
                    });
                }
            }
            None => {
                return Err(BenchError::InstanceLost {
                    version,
                    detail: "no running instance at workload dispatch".to_string(),
                })
            }
        }
        let sink = process::output_sink(&self.cfg.logs.output)?;
        let start = std::time::Instant::now();
        let status = process::run_to_completion(
            &self.cfg.workload.script,
            &[],
            None,
            sink,
            Duration::from_secs(self.cfg.wait_timeout_secs),
            "serial workload",
        )?;
        let secs = start.elapsed().as_secs_f64();
        if !status.success() {
            return Err(BenchError::WorkloadFailed {
                script: self.cfg.workload.script.clone(),
                status,
            });
        }
        Ok(secs)
    }

    // Running -> Terminated. SAFE TO CALL WITH NOTHING RUNNING: TEARDOWN
    // RUNS ON EVERY EXIT PATH, INCLUDING PASSES THAT FAILED BEFORE START.
    pub fn terminate(&mut self) -> Result<()> {
        match self.handle.take() {
            Some(h) => process::terminate(h),
            None => Ok(()),
        }
    }
}
