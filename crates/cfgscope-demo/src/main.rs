//! Background workers on keyed, configuration-scoped services
//!
//! Each worker repeatedly acquires its own keyed service, prints one line of
//! work and releases it, while a schedule rewrites the named options behind
//! the services.

mod config;
mod worker;

use anyhow::Context;
use cfgscope_core::{FactoryError, KeyedFnFactory, OptionsMonitor};
use cfgscope_registry::{OptionsStore, ServiceRegistry};
use clap::{value_parser, Arg, ArgAction, Command};
use config::{DemoConfig, ScheduledChange};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use worker::{run_worker, WorkService, WorkerOptions};

fn cli() -> Command {
    Command::new("cfgscope-demo")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Background workers using keyed configuration-scoped services")
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON"),
        )
        .subcommand(
            Command::new("run")
                .about("Run the workers against a configuration schedule")
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_parser(value_parser!(PathBuf))
                        .help("TOML workload file (built-in schedule when omitted)"),
                )
                .arg(
                    Arg::new("duration-ms")
                        .long("duration-ms")
                        .default_value("8000")
                        .value_parser(value_parser!(u64))
                        .help("Stop after this many milliseconds (0 = until Ctrl-C)"),
                )
                .arg(
                    Arg::new("blocking")
                        .long("blocking")
                        .action(ArgAction::SetTrue)
                        .help("Use the blocking swap strategy"),
                ),
        )
        .subcommand(
            Command::new("show-config")
                .about("Print the effective workload as JSON")
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_parser(value_parser!(PathBuf)),
                ),
        )
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<DemoConfig> {
    match path {
        Some(path) => DemoConfig::load(path),
        None => Ok(DemoConfig::builtin()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("json-logs"));

    match matches.subcommand() {
        Some(("show-config", args)) => {
            let config = load_config(args.get_one::<PathBuf>("config"))?;
            println!("{}", serde_json::to_string_pretty(&config.services)?);
            println!("{}", serde_json::to_string_pretty(&config.schedule)?);
            Ok(())
        }
        Some(("run", args)) => {
            let mut config = load_config(args.get_one::<PathBuf>("config"))?;
            if args.get_flag("blocking") {
                config.scope.blocking_on_swap = true;
            }
            let duration = args.get_one::<u64>("duration-ms").copied().unwrap_or(0);
            run(config, duration).await
        }
        _ => run(DemoConfig::builtin(), 8_000).await,
    }
}

async fn run(config: DemoConfig, duration_ms: u64) -> anyhow::Result<()> {
    let registry = ServiceRegistry::new();
    let store = Arc::new(OptionsStore::<WorkerOptions>::new());
    for service in &config.services {
        store.set(Some(&service.options_name), service.options.clone());
    }

    let monitor: Arc<dyn OptionsMonitor<WorkerOptions>> = store.clone();
    let cancel = CancellationToken::new();
    let interval = Duration::from_millis(config.work_interval_ms);
    let mut workers = Vec::with_capacity(config.services.len());

    for service in &config.services {
        let factory = KeyedFnFactory::new(
            service.key.clone(),
            |key: &String, options: &WorkerOptions| -> Result<WorkService, FactoryError> {
                tracing::info!(key = %key, enabled = options.enabled, "building work service");
                Ok(WorkService::new(options))
            },
        );

        let manager = registry
            .register_bound(
                Some(&service.key),
                Arc::clone(&monitor),
                Some(&service.options_name),
                factory,
                config.scope.clone(),
            )
            .with_context(|| format!("registering {}", service.key))?;

        workers.push(tokio::spawn(run_worker(
            service.key.clone(),
            manager,
            interval,
            cancel.clone(),
        )));
    }

    let schedule = tokio::spawn(apply_schedule(
        Arc::clone(&store),
        config.schedule.clone(),
        cancel.clone(),
    ));

    if duration_ms == 0 {
        tokio::signal::ctrl_c().await?;
    } else {
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            () = tokio::time::sleep(Duration::from_millis(duration_ms)) => {}
        }
    }

    cancel.cancel();
    for worker in workers {
        worker.await?;
    }
    schedule.await?;

    for (key, stats) in registry.stats() {
        tracing::info!(registration = %key, stats = %serde_json::to_string(&stats)?, "final statistics");
    }

    let mut failed = 0;
    for (key, result) in registry.shutdown_all().await {
        match result {
            Ok(report) => tracing::info!(registration = %key, disposed = report.disposed, "shut down"),
            Err(err) => {
                failed += 1;
                tracing::error!(registration = %key, error = %err, "shutdown failed");
            }
        }
    }
    anyhow::ensure!(failed == 0, "{failed} manager(s) failed to shut down cleanly");
    Ok(())
}

async fn apply_schedule(
    store: Arc<OptionsStore<WorkerOptions>>,
    mut schedule: Vec<ScheduledChange>,
    cancel: CancellationToken,
) {
    schedule.sort_by_key(|change| change.at_ms);
    let start = tokio::time::Instant::now();

    for change in schedule {
        let due = start + Duration::from_millis(change.at_ms);
        tokio::select! {
            () = cancel.cancelled() => return,
            () = tokio::time::sleep_until(due) => {}
        }

        tracing::info!(
            options_name = %change.options_name,
            enabled = change.options.enabled,
            work_value = change.options.work_value,
            "applying scheduled options change"
        );
        store.set(Some(&change.options_name), change.options);
    }
}
