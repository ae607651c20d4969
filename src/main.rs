// MOLT -- LIVE-UPDATE VS RESTART BENCHMARK ORCHESTRATOR
// ONE ORCHESTRATION THREAD; ALL CONCURRENCY IS PROCESS FAN-OUT.
// EXITS NON-ZERO ON ANY FATAL KIND, ZERO ON FULL COMPLETION OF BOTH
// VARIANT PASSES PLUS THE CONCURRENT PHASE.

mod cli;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use clap::{Parser, Subcommand};

use molt::config::BenchConfig;
use molt::coordinator::Coordinator;
use molt::report;

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

#[derive(Parser)]
#[command(name = "molt")]
#[command(about = "MOLT -- LIVE-UPDATE VS RESTART BENCHMARK ORCHESTRATOR")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    // RUN BOTH VARIANT PASSES PLUS THE CONCURRENT PHASE
    Run {
        #[arg(long, default_value = "bench.json")]
        config: PathBuf,
    },
    // PREFLIGHT: VERIFY EVERY CONFIGURED PATH BEFORE ANYTHING LAUNCHES
    Check {
        #[arg(long, default_value = "bench.json")]
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run { config } => run(&config),
        Command::Check { config } => cli::check::run_check(&config),
    }
}

fn run(config_path: &Path) -> Result<()> {
    ctrlc::set_handler(move || {
        SHUTDOWN.store(true, Ordering::Relaxed);
    })?;

    let cfg = BenchConfig::load(config_path)?;

    println!("MOLT v{}", env!("CARGO_PKG_VERSION"));
    println!("VERSIONS:     {}", cfg.versions.join(", "));
    println!("SERIAL RUNS:  {}", cfg.workload.serial_runs);
    println!("CONNECTIONS:  {}", cfg.concurrent.connections);
    println!("WAIT TIMEOUT: {}s", cfg.wait_timeout_secs);
    println!();

    let coordinator = Coordinator::new(&cfg, &SHUTDOWN);
    let (result, outcome) = coordinator.run();

    // THE REPORT ALWAYS PRINTS: PARTIAL RESULTS SURVIVE A FAILED PASS
    let text = report::render(&result);
    print!("{}", text);
    let report_path = report::save_report(&cfg.logs.results_dir, &text)?;
    let results_path = report::save_results(&cfg.logs.results_dir, &result)?;
    println!("SAVED {}", report_path.display());
    println!("SAVED {}", results_path.display());

    outcome?;
    println!("MOLT OUT.");
    Ok(())
}
