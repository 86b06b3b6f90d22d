//! pgcheckd: runs the database consistency probe.
//!
//! Resolves configuration, starts the probe against Postgres (or the
//! in-memory backend with `--memory`), and keeps it cycling until Ctrl-C
//! or SIGTERM.
//!
//! # Usage
//!
//! ```text
//! INSTANCE_ID=probe-1 DB_HOST=db pgcheckd run --interval 0.1
//! pgcheckd config --config /etc/pgcheck.toml
//! ```
//!
//! Exit status is 0 after a graceful stop and non-zero when configuration
//! is invalid or the startup budget is spent.

mod settings;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use pgcheck_probe::config as probe_env;
use pgcheck_probe::{ConsistencyProbe, ProbeConfig, ProbeStats};
use pgcheck_store::{Connector, MemoryConnector, PgConnector, StoreConfig};
use tokio::sync::watch;
use tracing::info;

use crate::settings::{DatabaseSection, FileConfig, Layers, ProbeSection};

#[derive(Parser)]
#[command(name = "pgcheckd", about = "Database liveness and consistency probe", version)]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    /// Optional TOML file; environment variables take precedence over it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the probe until interrupted.
    Run {
        /// Counter row identity (overrides INSTANCE_ID).
        #[arg(long)]
        instance_id: Option<String>,

        /// Seconds between cycles, fractions allowed (overrides UPDATE_INTERVAL).
        #[arg(long)]
        interval: Option<String>,

        /// Stop after this many completed cycles.
        #[arg(long)]
        cycles: Option<u64>,

        /// Use the in-memory backend instead of Postgres.
        #[arg(long)]
        memory: bool,
    },
    /// Print the resolved configuration (password redacted) and exit.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format)?;

    let file = cli
        .config
        .as_deref()
        .map(FileConfig::from_file)
        .transpose()?;
    let mut layers = Layers::new(file.as_ref());

    match cli.command {
        Command::Run {
            instance_id,
            interval,
            cycles,
            memory,
        } => {
            layers.set(probe_env::ENV_INSTANCE_ID, instance_id);
            layers.set(probe_env::ENV_UPDATE_INTERVAL, interval);
            let (store, probe) = resolve(&layers)?;

            let stats = if memory {
                run_probe(MemoryConnector::new(), probe, cycles).await?
            } else {
                run_probe(PgConnector::new(store), probe, cycles).await?
            };
            info!(
                cycles = stats.cycles,
                violations = stats.violations,
                store_errors = stats.store_errors,
                reconnects = stats.reconnects,
                "pgcheckd stopped"
            );
            Ok(())
        }
        Command::Config => {
            let (store, probe) = resolve(&layers)?;
            print!("{}", toml::to_string_pretty(&redacted(&store, &probe))?);
            Ok(())
        }
    }
}

fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info"))?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
    Ok(())
}

fn resolve(layers: &Layers) -> anyhow::Result<(StoreConfig, ProbeConfig)> {
    let store = StoreConfig::from_lookup(|k| layers.get(k)).context("database configuration")?;
    let probe = ProbeConfig::from_lookup(|k| layers.get(k)).context("probe configuration")?;
    Ok((store, probe))
}

async fn run_probe<C: Connector>(
    connector: C,
    config: ProbeConfig,
    cycles: Option<u64>,
) -> anyhow::Result<ProbeStats> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        instance_id = %config.instance_id,
        interval = ?config.interval,
        target = %connector.target(),
        "pgcheckd starting"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let signal_handle = tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let mut probe = ConsistencyProbe::new(connector, config).with_shutdown(shutdown_rx);
    let result = match probe.start().await {
        Ok(()) => Ok(probe.run(cycles).await),
        Err(pgcheck_probe::ProbeError::Interrupted) => {
            info!("interrupted before startup completed");
            Ok(probe.stats().clone())
        }
        Err(e) => Err(e).context("probe startup"),
    };

    signal_handle.abort();
    result
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot listen for SIGTERM, Ctrl-C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Resolved settings in file form, with the password hidden.
fn redacted(store: &StoreConfig, probe: &ProbeConfig) -> FileConfig {
    FileConfig {
        database: Some(DatabaseSection {
            host: Some(store.host.clone()),
            port: Some(store.port),
            name: Some(store.database.clone()),
            user: Some(store.user.clone()),
            password: Some("<redacted>".to_string()),
            connect_timeout: Some(store.connect_timeout.as_secs_f64()),
        }),
        probe: Some(ProbeSection {
            instance_id: Some(probe.instance_id.clone()),
            update_interval: Some(probe.interval.as_secs_f64()),
            reconnect_settle_delay: Some(probe.reconnect.settle_delay.as_secs_f64()),
            reconnect_attempt_delay: Some(probe.reconnect.attempt_delay.as_secs_f64()),
            reconnect_max_attempts: Some(probe.reconnect.max_attempts),
            reconnect_resume_delay: Some(probe.reconnect.resume_delay.as_secs_f64()),
            startup_delay: Some(probe.startup.initial_delay.as_secs_f64()),
            startup_max_attempts: Some(probe.startup.max_attempts),
            startup_retry_delay: Some(probe.startup.retry_delay.as_secs_f64()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_run_flags() {
        let cli = Cli::try_parse_from([
            "pgcheckd",
            "--log-format",
            "json",
            "run",
            "--instance-id",
            "probe-1",
            "--interval",
            "0.25",
            "--cycles",
            "3",
            "--memory",
        ])
        .unwrap();

        assert!(matches!(cli.log_format, LogFormat::Json));
        match cli.command {
            Command::Run {
                instance_id,
                interval,
                cycles,
                memory,
            } => {
                assert_eq!(instance_id.as_deref(), Some("probe-1"));
                assert_eq!(interval.as_deref(), Some("0.25"));
                assert_eq!(cycles, Some(3));
                assert!(memory);
            }
            Command::Config => panic!("expected run"),
        }
    }

    #[test]
    fn redacted_config_hides_password_and_round_trips() {
        let store = StoreConfig {
            password: "hunter2".to_string(),
            ..StoreConfig::default()
        };
        let probe = ProbeConfig::default();

        let text = toml::to_string_pretty(&redacted(&store, &probe)).unwrap();
        assert!(!text.contains("hunter2"));

        let parsed: FileConfig = toml::from_str(&text).unwrap();
        let layers = Layers::with_env(Some(&parsed), |_| None);
        let (_, reparsed) = resolve(&layers).unwrap();
        assert_eq!(reparsed, probe);
    }

    #[test]
    fn invalid_interval_flag_fails_resolution() {
        let mut layers = Layers::with_env(None, |_| None);
        layers.set(probe_env::ENV_UPDATE_INTERVAL, Some("-1".to_string()));
        assert!(resolve(&layers).is_err());
    }

    #[tokio::test]
    async fn memory_run_completes_requested_cycles() {
        let stats = run_probe(MemoryConnector::new(), ProbeConfig::immediate("probe-1"), Some(3))
            .await
            .unwrap();
        assert_eq!(stats.cycles, 3);
        assert_eq!(stats.violations, 0);
    }

    #[tokio::test]
    async fn unreachable_backend_fails_startup() {
        let backend = MemoryConnector::new();
        backend.set_unreachable(true);
        let mut config = ProbeConfig::immediate("probe-1");
        config.startup = pgcheck_probe::StartupPolicy::immediate(2);

        let err = run_probe(backend.clone(), config, Some(1)).await.unwrap_err();
        assert!(format!("{err:#}").contains("startup failed after 2 attempts"));
        assert_eq!(backend.connect_attempts(), 2);
    }
}
