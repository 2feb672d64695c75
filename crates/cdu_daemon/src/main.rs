use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use cdu_daemon::{bootstrap, DaemonError, InstanceLock};

/// CDU controller daemon — the single executable that bootstraps transport,
/// schedulers, derivation, the HMI slave, and auto-control.
#[derive(Parser, Debug)]
#[command(name = "cdu_daemon", about = "CDU controller daemon", version)]
struct Args {
    /// Directory containing settings.json, cdu_120kw_component.json,
    /// communication_task.json, and low_frequency_task.json.
    #[arg(long, default_value = "./config")]
    config_dir: PathBuf,

    /// Overrides which settings document is read in place of
    /// <config-dir>/settings.json.
    #[arg(long, value_name = "FILE")]
    settings: Option<PathBuf>,

    /// Increases log verbosity (-v = debug, -vv = trace).
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decreases log verbosity (-q = warn, -qq = error).
    #[arg(short = 'q', action = clap::ArgAction::Count)]
    quiet: u8,
}

fn init_logging(args: &Args) {
    let level = match args.verbose as i8 - args.quiet as i8 {
        i8::MIN..=-2 => "error",
        -1 => "warn",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn main() {
    let args = Args::parse();
    init_logging(&args);

    if let Err(e) = run(&args) {
        log::error!("{e}");
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), DaemonError> {
    log::info!("starting cdu_daemon, config_dir={}", args.config_dir.display());

    let lock = InstanceLock::acquire(&args.config_dir)?;

    let mut controller = bootstrap(&args.config_dir, args.settings.as_deref())?;

    wait_for_shutdown_signal();

    log::info!("shutdown requested, stopping controller");
    controller.shutdown();
    drop(lock);
    log::info!("cdu_daemon stopped cleanly");
    Ok(())
}

/// Blocks the main thread until Ctrl-C/SIGTERM, polling a short-lived flag
/// rather than parking forever so shutdown runs promptly, mirroring the
/// original program's `while True: time.sleep(0.1)` main loop.
fn wait_for_shutdown_signal() {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
        .expect("failed to install Ctrl-C handler");

    while !shutdown.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(100));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_dir_is_relative_config() {
        let args = Args::parse_from(["cdu_daemon"]);
        assert_eq!(args.config_dir, PathBuf::from("./config"));
        assert!(args.settings.is_none());
        assert_eq!(args.verbose, 0);
        assert_eq!(args.quiet, 0);
    }

    #[test]
    fn settings_and_config_dir_overrides_parse() {
        let args = Args::parse_from([
            "cdu_daemon",
            "--config-dir",
            "/etc/cdu",
            "--settings",
            "/etc/cdu/settings.override.json",
            "-vv",
        ]);
        assert_eq!(args.config_dir, PathBuf::from("/etc/cdu"));
        assert_eq!(args.settings, Some(PathBuf::from("/etc/cdu/settings.override.json")));
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn verbosity_resolves_to_expected_filter_string() {
        let quiet = Args::parse_from(["cdu_daemon", "-qq"]);
        assert_eq!(quiet.verbose as i8 - quiet.quiet as i8, -2);
    }
}
