//! redis-migrate CLI - Copy every key between two Redis deployments.

mod logging;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use redis_migrate::error::{EXIT_CANCELLED, EXIT_DISCOVERY_FAILED, EXIT_SUCCESS};
use redis_migrate::orchestrator::HostHealth;
use redis_migrate::report::format_snapshot;
use redis_migrate::{Config, LogOutput, MigrateError, Orchestrator};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "redis-migrate")]
#[command(about = "Copy every key between two Redis deployments, preserving TTLs")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Override the configured log destination
    #[arg(long, value_enum)]
    log_output: Option<LogOutputArg>,

    /// Seconds to wait for the current batch after SIGINT/SIGTERM before exiting
    #[arg(long, default_value = "60")]
    shutdown_timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogOutputArg {
    Stdout,
    File,
    Syslog,
}

impl From<LogOutputArg> for LogOutput {
    fn from(arg: LogOutputArg) -> Self {
        match arg {
            LogOutputArg::Stdout => LogOutput::Stdout,
            LogOutputArg::File => LogOutput::File,
            LogOutputArg::Syslog => LogOutput::Syslog,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Migrate every key from the source primary to the target primary
    Run {
        /// Override SCAN COUNT hint
        #[arg(long)]
        scan_count: Option<usize>,

        /// Override number of databases transferred concurrently
        #[arg(long)]
        workers: Option<usize>,

        /// Dry run: locate primaries and show the plan without copying keys
        #[arg(long)]
        dry_run: bool,
    },

    /// Locate both primaries and print their keyspace statistics
    Inspect,

    /// Probe every configured host and report its role
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<u8, MigrateError> {
    let cli = Cli::parse();

    let mut config = Config::load(&cli.config)?;
    if let Some(output) = cli.log_output {
        config.logging.output = output.into();
    }

    logging::setup_logging(&cli.verbosity, &cli.log_format, &config.logging)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Run {
            scan_count,
            workers,
            dry_run,
        } => {
            // Apply overrides
            if let Some(n) = scan_count {
                config.migration.scan_count = Some(n);
            }
            if let Some(w) = workers {
                config.migration.workers = w;
            }
            if dry_run {
                config.migration.dry_run = true;
            }
            config.validate()?;
            let config = config.with_auto_tuning();

            // Setup signal handling for graceful shutdown (SIGINT and SIGTERM)
            let cancel_token = setup_signal_handler(cli.shutdown_timeout)?;

            let orchestrator = Orchestrator::new(config);
            let result = orchestrator.run(cancel_token).await?;

            if cli.output_json {
                println!("{}", result.to_json()?);
            } else {
                println!("\nMigration {}", result.status);
                println!("  Run ID: {}", result.run_id);
                println!("  Source master: {}", result.source_master);
                println!("  Target master: {}", result.target_master);
                println!("  Duration: {:.2}s", result.duration_seconds);
                println!("  Databases: {}", result.databases_total);
                println!(
                    "  Keys: {} restored, {} vanished, {} failed",
                    result.keys_restored, result.keys_vanished, result.keys_failed
                );
                println!("  Throughput: {} keys/sec", result.keys_per_second);
                for failure in &result.failed_databases {
                    println!("  Failed database db{}: {}", failure.db, failure.error);
                }
            }

            Ok(result.exit_code())
        }

        Commands::Inspect => {
            let orchestrator = Orchestrator::new(config);
            let result = orchestrator.inspect().await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Source master: {}", result.source_master);
                println!("  {}", format_snapshot(&result.source, "Source"));
                println!("Target master: {}", result.target_master);
                println!("  {}", format_snapshot(&result.target, "Target"));
            }

            Ok(EXIT_SUCCESS)
        }

        Commands::HealthCheck => {
            let orchestrator = Orchestrator::new(config);
            let result = orchestrator.health_check().await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                print_hosts("Source", &result.source);
                print_hosts("Target", &result.target);
                println!(
                    "\n  Overall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if result.healthy {
                Ok(EXIT_SUCCESS)
            } else {
                Ok(EXIT_DISCOVERY_FAILED)
            }
        }
    }
}

fn print_hosts(label: &str, hosts: &[HostHealth]) {
    println!("  {}:", label);
    for host in hosts {
        if host.connected {
            println!("    {} OK role={} ({}ms)", host.host, host.role, host.latency_ms);
        } else {
            println!("    {} FAILED ({}ms)", host.host, host.latency_ms);
        }
        if let Some(ref err) = host.error {
            println!("      Error: {}", err);
        }
    }
}

/// Exit once the grace period after a shutdown signal has elapsed.
fn spawn_shutdown_deadline(shutdown_timeout: u64) {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(shutdown_timeout)).await;
        eprintln!("Shutdown timeout of {}s exceeded, exiting", shutdown_timeout);
        std::process::exit(i32::from(EXIT_CANCELLED));
    });
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM (Kubernetes/systemd shutdown).
/// Returns a CancellationToken that will be cancelled when a signal is received.
#[cfg(unix)]
fn setup_signal_handler(shutdown_timeout: u64) -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let token = cancel_token.clone();
    tokio::spawn(async move {
        let name = tokio::select! {
            _ = sigint.recv() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        };
        eprintln!(
            "\nReceived {}. Finishing current batch (timeout: {}s)...",
            name, shutdown_timeout
        );
        token.cancel();
        spawn_shutdown_deadline(shutdown_timeout);
    });

    Ok(cancel_token)
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
fn setup_signal_handler(shutdown_timeout: u64) -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Finishing current batch...");
            token.cancel();
            spawn_shutdown_deadline(shutdown_timeout);
        }
    });

    Ok(cancel_token)
}
