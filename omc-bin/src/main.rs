//! `omc`: the Order Management Core's cycle-driving binary.
//!
//! Wires `Config::from_env`, the single-instance lock, the live/dry-run
//! adapter, and `omc_core::run_cycle` into a loop: parse args, init
//! logging, install the panic handler, install a Ctrl+C shutdown flag,
//! run the main loop on a fixed interval, print a final report.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use omc_core::adapter::{DryRunAdapter, ExchangeAdapter, RestAdapter};
use omc_core::config::Config;
use omc_core::core::types::OrderIntent;
use omc_core::cycle::run_cycle;
use omc_core::execution::SafetyContext;
use omc_core::lock::InstanceLock;
use omc_core::resilience::install_panic_handler;
use omc_core::store::Store;
use omc_core::utils::init_logger;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{error, info, warn};

/// Configuration exit code.
const EXIT_CONFIG_ERROR: i32 = 2;
/// Single-instance lock contention.
const EXIT_LOCK_CONTENDED: i32 = 3;
/// Unsafe live-arming.
const EXIT_UNSAFE_LIVE_ARMING: i32 = 4;

#[derive(Parser, Debug)]
#[command(author, version, about = "Order Management Core cycle runner")]
struct Args {
    /// Seconds to sleep between cycles. Ignored when `--once` is set.
    #[arg(long, default_value = "5")]
    interval_seconds: u64,

    /// Run exactly one cycle and exit, instead of looping until signaled.
    #[arg(long)]
    once: bool,

    /// Optional path to a JSON array of `OrderIntent` values to submit on
    /// the next cycle (strategy/risk filtering is out of this crate's
    /// scope, so intents arrive pre-approved from here).
    #[arg(long)]
    intents_file: Option<PathBuf>,

    /// Force-remove a stale lock file and exit, bypassing the liveness
    /// check. Requires `--force-ack I_UNDERSTAND`.
    #[arg(long)]
    unlock: bool,

    #[arg(long, default_value = "")]
    force_ack: String,
}

fn main() {
    let args = Args::parse();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("config error: {e}");
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };

    init_logger(&config.log_level, config.json_logs);
    install_panic_handler();

    if let Err(e) = config.validate() {
        error!(error = %e, "configuration failed validation");
        std::process::exit(EXIT_CONFIG_ERROR);
    }

    if args.unlock {
        match InstanceLock::force_unlock(&config.db_path, &args.force_ack) {
            Ok(()) => {
                info!("lock file removed");
                std::process::exit(0);
            }
            Err(e) => {
                error!(error = %e, "force unlock failed");
                std::process::exit(EXIT_CONFIG_ERROR);
            }
        }
    }

    if !config.dry_run && !config.is_live_armed() {
        error!("refusing to run against a live adapter without the full live-arming combination (LIVE_TRADING=true, LIVE_TRADING_ACK=I_UNDERSTAND, KILL_SWITCH=false)");
        std::process::exit(EXIT_UNSAFE_LIVE_ARMING);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start tokio runtime");
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };

    let exit_code = runtime.block_on(run(args, config));
    std::process::exit(exit_code);
}

async fn run(args: Args, config: Config) -> i32 {
    let instance_id = format!("omc-{}", std::process::id());
    let now = unix_now();

    let lock = match InstanceLock::acquire(&config.db_path, instance_id, now) {
        Ok(lock) => lock,
        Err(e) => {
            error!(error = %e, "single-instance lock contended");
            return 3;
        }
    };

    let store = match Store::open(&config.db_path) {
        Ok(store) => store,
        Err(e) => {
            error!(error = %e, "failed to open state store");
            return EXIT_CONFIG_ERROR;
        }
    };

    let adapter: Box<dyn ExchangeAdapter> = match build_adapter(&config) {
        Ok(a) => a,
        Err(e) => {
            error!(error = %e, "failed to construct exchange adapter");
            return EXIT_CONFIG_ERROR;
        }
    };

    let ctx = SafetyContext::from_config(&config);

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_ctrlc = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        warn!("received shutdown signal, finishing in-flight cycle before exiting");
        shutdown_ctrlc.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "failed to install Ctrl+C handler; signals will use the default action");
    }

    let exit_code = loop {
        let intents = match load_intents(&args.intents_file) {
            Ok(intents) => intents,
            Err(e) => {
                error!(error = %e, "failed to load intents file");
                break EXIT_CONFIG_ERROR;
            }
        };

        let now = unix_now();
        match run_cycle(&store, adapter.as_ref(), &ctx, &config, intents, now).await {
            Ok(outcome) => {
                info!(
                    cycle_id = outcome.cycle_id,
                    submitted = outcome.execution.submitted,
                    canceled = outcome.execution.canceled,
                    rejected = outcome.execution.rejected,
                    unknown = outcome.execution.unknown,
                    positions = outcome.positions.len(),
                    "cycle report"
                );
                for reason in &outcome.execution.reasons {
                    info!(reason = %reason, "cycle reason");
                }
            }
            Err(e) => {
                error!(error = %e, "cycle aborted on store error");
                break 10;
            }
        }

        if args.once || shutdown.load(Ordering::SeqCst) {
            break 0;
        }

        tokio::time::sleep(Duration::from_secs(args.interval_seconds)).await;
    };

    lock.release();
    exit_code
}

fn build_adapter(config: &Config) -> Result<Box<dyn ExchangeAdapter>> {
    let rest = RestAdapter::new(config).context("constructing REST adapter")?;
    if config.dry_run {
        Ok(Box::new(DryRunAdapter::new(rest)))
    } else {
        Ok(Box::new(rest))
    }
}

fn load_intents(path: &Option<PathBuf>) -> Result<Vec<OrderIntent>> {
    let Some(path) = path else { return Ok(Vec::new()) };
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).map_err(|e| anyhow!("parsing {}: {e}", path.display()))
}

fn unix_now() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}
