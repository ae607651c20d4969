// MOLT PREFLIGHT CHECK
// EVERY CONFIGURED EXECUTABLE AND DIRECTORY, VERIFIED BEFORE ANYTHING
// LAUNCHES. PATH RESOLUTION IS THE SAME CODE run USES.

use std::fs;
use std::path::Path;

use anyhow::Result;

use molt::config::BenchConfig;
use molt::process;

fn row(label: &str, path: &Path, ok: bool) -> bool {
    println!(
        "  {:<16}{:<44}{}",
        label,
        path.display(),
        if ok { "OK" } else { "MISSING" }
    );
    ok
}

fn check_exec(label: &str, path: &Path) -> bool {
    row(label, path, process::is_executable(path))
}

fn check_dir(label: &str, path: &Path) -> bool {
    row(label, path, path.is_dir())
}

pub fn run_check(config_path: &Path) -> Result<()> {
    println!("MOLT PREFLIGHT CHECK");
    println!();

    let cfg = match BenchConfig::load(config_path) {
        Ok(c) => {
            println!("  {:<16}{:<44}OK", "config", config_path.display());
            c
        }
        Err(e) => {
            println!("  {:<16}{:<44}BAD ({})", "config", config_path.display(), e);
            std::process::exit(1);
        }
    };
    println!();

    let mut ok = true;
    ok &= check_exec("live launcher", &cfg.live.launcher);
    ok &= check_dir("live root", &cfg.live.root);
    ok &= check_dir("restart root", &cfg.restart.root);
    ok &= check_exec("workload", &cfg.workload.script);
    ok &= check_exec("probe", &cfg.concurrent.script);
    println!();

    for id in &cfg.versions {
        println!("VERSION {}:", id);
        ok &= check_exec("image", &cfg.live_image(id));
        ok &= check_exec("update script", &cfg.live_update_script(id));
        ok &= check_exec("binary", &cfg.restart_binary(id));
    }
    println!();

    let results_ok = fs::create_dir_all(&cfg.logs.results_dir).is_ok();
    ok &= row("results dir", &cfg.logs.results_dir, results_ok);
    println!();

    if ok {
        println!("ALL CHECKS PASSED");
    } else {
        println!("SOME CHECKS FAILED");
        std::process::exit(1);
    }

    Ok(())
}
