// SPDX-License-Identifier: GPL-3.0-or-later
mod dev;
mod signals;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use axum::serve;
use clap::{Args, Parser, Subcommand};
use syncarr_api::{router, ApiState};
use syncarr_config::{load as load_config, AppConfig, PollWindow, TelemetryConfig};
use syncarr_domain::SourceId;
use syncarr_infrastructure::init_database;
use syncarr_scheduler::maintenance::{delete_source, reset_all_tasks};
use syncarr_scheduler::{Lifecycle, Scheduler};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt, fmt::writer::BoxMakeWriter, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};
use uuid::Uuid;

/// Background task runner for the media library.
#[derive(Parser, Debug)]
#[command(name = "syncarr", version, about)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(long, global = true, env = "SYNCARR_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the task consumer until stopped
    Run(RunArgs),
    /// Drop every queued task and reschedule the recurring work of each source
    ResetTasks,
    /// Delete a source together with its media and tasks
    DeleteSource {
        #[arg(long)]
        source: Uuid,
    },
    /// Print the configured sources
    ListSources,
}

#[derive(Args, Debug, Default)]
struct RunArgs {
    /// Stop after this many seconds; 0 runs until a signal arrives
    #[arg(long, default_value_t = 0)]
    duration: u64,

    /// Fixed idle poll interval in seconds
    #[arg(long)]
    sleep: Option<u64>,

    /// Only consume these queues (repeatable)
    #[arg(long = "queue", value_name = "NAME")]
    queues: Vec<String>,

    /// Write logs to this file instead of stderr
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Restart when the binary changes on disk
    #[arg(long)]
    dev: bool,

    /// Do not serve the HTTP API
    #[arg(long)]
    no_api: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;

    let log_file = match &cli.command {
        Command::Run(args) => {
            apply_run_overrides(&mut config, args);
            args.log_file.clone()
        }
        _ => None,
    };
    let _log_guard = init_tracing(&config.telemetry, log_file.as_deref())?;

    match cli.command {
        Command::Run(args) => run(config, args).await,
        Command::ResetTasks => reset_tasks(config).await,
        Command::DeleteSource { source } => remove_source(config, source).await,
        Command::ListSources => list_sources(config).await,
    }
}

fn apply_run_overrides(config: &mut AppConfig, args: &RunArgs) {
    if let Some(secs) = args.sleep {
        config.tasks.poll.slow = PollWindow::fixed(secs.saturating_mul(1000));
    }
}

fn init_tracing(telemetry: &TelemetryConfig, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&telemetry.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let (writer, guard, ansi) = match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            (BoxMakeWriter::new(writer), Some(guard), false)
        }
        None => (BoxMakeWriter::new(std::io::stderr), None, true),
    };

    let (json_layer, text_layer) = if telemetry.json {
        (Some(fmt::layer().json().with_target(true).with_writer(writer)), None)
    } else {
        let layer = fmt::layer()
            .with_target(true)
            .with_thread_names(true)
            .with_level(true)
            .with_ansi(ansi)
            .with_writer(writer);
        (None, Some(layer))
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()?;
    Ok(guard)
}

fn bind_addr(http: &syncarr_config::HttpConfig) -> Result<SocketAddr> {
    let addr = format!("{}:{}", http.host, http.port);
    addr.parse()
        .with_context(|| format!("invalid listen address {}", addr))
}

async fn open(config: AppConfig, lifecycle: Lifecycle) -> Result<Scheduler> {
    let pool = init_database(&config).await?;
    Scheduler::build(config, pool, lifecycle)
}

async fn run(config: AppConfig, args: RunArgs) -> Result<()> {
    // Captured before anything can replace the file on disk
    let binary = std::env::current_exe()?;
    let lifecycle = Lifecycle::new(&config.tasks.poll);
    let scheduler = Arc::new(open(config.clone(), lifecycle.clone()).await?);
    scheduler.seed().await?;

    let signal_listener = signals::install(lifecycle.clone())?;
    let budget = (args.duration > 0).then(|| Duration::from_secs(args.duration));
    let dispatchers = scheduler.start(&args.queues, budget)?;
    let watcher = args.dev.then(|| dev::watch(binary.clone(), lifecycle.clone()));
    let api = if args.no_api {
        None
    } else {
        Some(spawn_api(&config, scheduler.clone(), lifecycle.clone()).await?)
    };

    for dispatcher in dispatchers {
        match dispatcher.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!(target: "cli", error = %err, "dispatcher failed"),
            Err(err) => error!(target: "cli", error = %err, "dispatcher panicked"),
        }
    }
    // A duration budget ends the dispatchers without a signal
    lifecycle.request_shutdown();

    if let Some(api) = api {
        match api.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!(target: "cli", error = %err, "http server failed"),
            Err(err) => error!(target: "cli", error = %err, "http server panicked"),
        }
    }
    signal_listener.abort();

    let restart = match watcher {
        Some(watcher) => watcher.await.unwrap_or(false),
        None => false,
    };
    scheduler.pool().close().await;
    if restart {
        dev::reexec(&binary)?;
    }
    info!(target: "cli", "stopped");
    Ok(())
}

async fn spawn_api(
    config: &AppConfig,
    scheduler: Arc<Scheduler>,
    lifecycle: Lifecycle,
) -> Result<JoinHandle<Result<()>>> {
    let listener = TcpListener::bind(bind_addr(&config.http)?).await?;
    let addr = listener.local_addr()?;
    info!(target: "cli", "listening on {}", addr);

    let app = router(ApiState::new(scheduler));
    Ok(tokio::spawn(async move {
        serve(listener, app)
            .with_graceful_shutdown(async move { lifecycle.cancelled().await })
            .await?;
        Ok::<(), anyhow::Error>(())
    }))
}

async fn reset_tasks(config: AppConfig) -> Result<()> {
    let lifecycle = Lifecycle::new(&config.tasks.poll);
    let scheduler = open(config, lifecycle).await?;
    reset_all_tasks(scheduler.handle(), scheduler.sources().as_ref()).await?;
    println!("All tasks reset.");
    Ok(())
}

async fn remove_source(config: AppConfig, source: Uuid) -> Result<()> {
    let lifecycle = Lifecycle::new(&config.tasks.poll);
    let scheduler = open(config, lifecycle).await?;
    let revoked = delete_source(
        scheduler.pool(),
        scheduler.sources().as_ref(),
        scheduler.media().as_ref(),
        scheduler.handle(),
        scheduler.media_server_names(),
        SourceId::from_uuid(source),
    )
    .await?;
    match revoked {
        Some(tasks) => {
            println!("Deleted source {} and revoked {} task(s).", source, tasks.len());
            Ok(())
        }
        None => bail!("source {} not found", source),
    }
}

async fn list_sources(config: AppConfig) -> Result<()> {
    let lifecycle = Lifecycle::new(&config.tasks.poll);
    let scheduler = open(config, lifecycle).await?;
    let mut offset = 0;
    loop {
        let page = scheduler.sources().list(100, offset).await?;
        if page.is_empty() {
            break;
        }
        offset += page.len() as i64;
        for source in page {
            let last_crawl = source
                .last_crawl
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "never".to_string());
            println!(
                "{}\t{}\t{}\t{}\tactive={}\tfailed={}\tlast_crawl={}",
                source.id,
                source.name,
                source.kind,
                source.key,
                source.active,
                source.has_failed,
                last_crawl
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_flags_parse() {
        let cli = Cli::try_parse_from([
            "syncarr",
            "--config",
            "/etc/syncarr.toml",
            "run",
            "--duration",
            "30",
            "--sleep",
            "2",
            "--queue",
            "network",
            "--queue",
            "limited",
            "--no-api",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/etc/syncarr.toml")));
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.duration, 30);
        assert_eq!(args.sleep, Some(2));
        assert_eq!(args.queues, vec!["network", "limited"]);
        assert!(args.no_api);
        assert!(!args.dev);
    }

    #[test]
    fn delete_source_requires_a_uuid() {
        assert!(Cli::try_parse_from(["syncarr", "delete-source", "--source", "abc"]).is_err());
        let id = Uuid::new_v4().to_string();
        let cli = Cli::try_parse_from(["syncarr", "delete-source", "--source", &id]).unwrap();
        assert!(matches!(cli.command, Command::DeleteSource { source } if source.to_string() == id));
    }

    #[test]
    fn sleep_overrides_the_slow_poll_window() {
        let mut config = AppConfig::default();
        let args = RunArgs {
            sleep: Some(3),
            ..RunArgs::default()
        };
        apply_run_overrides(&mut config, &args);
        assert_eq!(config.tasks.poll.slow, PollWindow::fixed(3000));

        let untouched = AppConfig::default();
        let mut config = AppConfig::default();
        apply_run_overrides(&mut config, &RunArgs::default());
        assert_eq!(config.tasks.poll.slow, untouched.tasks.poll.slow);
    }

    #[test]
    fn test_bind_addr_parsing() {
        let http = syncarr_config::HttpConfig {
            host: "127.0.0.1".to_string(),
            port: 5150,
        };
        let addr = bind_addr(&http).unwrap();
        assert_eq!(addr.port(), 5150);
        assert!(addr.is_ipv4());
    }

    #[test]
    fn test_bind_addr_ipv6() {
        let http = syncarr_config::HttpConfig {
            host: "[::1]".to_string(),
            port: 8080,
        };
        let addr = bind_addr(&http).unwrap();
        assert_eq!(addr.port(), 8080);
        assert!(addr.is_ipv6());
    }

    #[test]
    fn bad_bind_addr_is_an_error() {
        let http = syncarr_config::HttpConfig {
            host: "not a host".to_string(),
            port: 1,
        };
        assert!(bind_addr(&http).is_err());
    }
}
