//! Hatohol core - self-monitoring pollers and incident queues
//!
//! The operator entry point for hatohol-core, handling:
//! - Config inspection (`config show`)
//! - Dry runs of the arm escalation logic (`simulate`)

use clap::{Args, Parser, Subcommand};
use hatohol_core::arm::PollResult;
use hatohol_core::config::{load_config, ConfigOptions, ResolvedConfig};
use hatohol_core::exit_codes::ExitCode;
use hatohol_core::logging::{event_names, init_logging, LogConfig, LogFormat, LogLevel};
use hatohol_core::simulate::simulate;
use std::path::PathBuf;
use tracing::{debug, error, info};

/// Hatohol core - self-monitoring pollers and incident queues
#[derive(Parser)]
#[command(name = "hatohol-core")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOpts,
}

#[derive(Args, Debug)]
struct GlobalOpts {
    /// Path to hatohol.json
    #[arg(long, global = true, env = "HATOHOL_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    /// Log format (human, jsonl)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Inspect configuration
    Config(ConfigArgs),
    /// Run configured arms against scripted poll outcomes
    Simulate(SimulateArgs),
}

#[derive(Args, Debug)]
struct ConfigArgs {
    #[command(subcommand)]
    action: ConfigAction,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the resolved configuration as JSON
    Show,
    /// Validate the configuration and exit
    Validate,
}

#[derive(Args, Debug)]
struct SimulateArgs {
    /// Poll outcomes in order: `ok` or a failure kind such as `disconnected`
    #[arg(long, value_delimiter = ',', required = true)]
    script: Vec<PollResult>,

    /// Print only the final table of each arm
    #[arg(long)]
    final_only: bool,
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let cli_level = cli.global.log_level.or(match cli.global.verbose {
        0 => None,
        1 => Some(LogLevel::Debug),
        _ => Some(LogLevel::Trace),
    });
    let log_config = LogConfig::from_env(cli_level, cli.global.log_format);
    init_logging(&log_config);

    let exit_code = match &cli.command {
        Commands::Config(args) => run_config(&cli.global, args),
        Commands::Simulate(args) => run_simulate(&cli.global, args),
    };
    debug!(code = exit_code.as_i32(), "exiting");
    exit_code.into()
}

fn resolve(global: &GlobalOpts) -> Result<ResolvedConfig, ExitCode> {
    let options = ConfigOptions {
        path: global.config.clone(),
    };
    match load_config(&options) {
        Ok(resolved) => {
            match &resolved.path {
                Some(path) => info!(
                    event = event_names::CONFIG_LOADED,
                    path = %path.display(),
                    arms = resolved.config.arms.len(),
                    "config loaded"
                ),
                None => info!(event = event_names::CONFIG_DEFAULT_USED, "using default config"),
            }
            Ok(resolved)
        }
        Err(e) => {
            error!(error = %e, "failed to load config");
            eprintln!("hatohol-core: {}", e);
            Err(ExitCode::ConfigError)
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> ExitCode {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            println!("{}", json);
            ExitCode::Clean
        }
        Err(e) => {
            eprintln!("hatohol-core: failed to serialize output: {}", e);
            ExitCode::InternalError
        }
    }
}

fn run_config(global: &GlobalOpts, args: &ConfigArgs) -> ExitCode {
    let resolved = match resolve(global) {
        Ok(resolved) => resolved,
        Err(code) => return code,
    };
    match args.action {
        ConfigAction::Show => print_json(&resolved),
        ConfigAction::Validate => {
            println!(
                "config OK ({} arm(s), source: {:?})",
                resolved.config.arms.len(),
                resolved.source
            );
            ExitCode::Clean
        }
    }
}

fn run_simulate(global: &GlobalOpts, args: &SimulateArgs) -> ExitCode {
    let resolved = match resolve(global) {
        Ok(resolved) => resolved,
        Err(code) => return code,
    };

    let mut sims = match simulate(&resolved.config, &args.script) {
        Ok(sims) => sims,
        Err(e) => {
            error!(error = %e, "simulation failed");
            eprintln!("hatohol-core: {}", e);
            return ExitCode::InternalError;
        }
    };
    if args.final_only {
        for sim in &mut sims {
            if let Some(last) = sim.steps.pop() {
                sim.steps = vec![last];
            }
        }
    }

    let code = print_json(&sims);
    if code != ExitCode::Clean {
        return code;
    }
    if sims.iter().any(|sim| sim.has_problems()) {
        ExitCode::ProblemsFound
    } else {
        ExitCode::Clean
    }
}
