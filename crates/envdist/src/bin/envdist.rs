//! envdist CLI
//!
//! Usage:
//!   envdist resolve dist/equinox --use-by ide
//!   envdist resolve dist/equinox --use-by integration-test -D osgi.console=5555 --json
//!   envdist list --environment equinox --root dist/equinox
//!   envdist shutdown 4711 --agent shutdown-agent.jar --timeout-ms 5000 --halt-code 1

use anyhow::{bail, Context};
use envdist::cli::{
    apply_defines, Command, ListArgs, LookupArgs, ResolveArgs, ShutdownArgs, WatchArgs,
};
use envdist::runtime::HotSpotAttacher;
use envdist::{
    resolve_environment, CliArgs, DistFile, EnvironmentRegistry, ForcedShutdown, RegistryConfig,
    ShutdownAgent,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[tokio::main]
async fn main() {
    let args: CliArgs = argh::from_env();

    // Initialize logging
    let log_level = match args.log_level.to_lowercase().as_str() {
        "error" => "error",
        "warn" => "warn",
        "info" => "info",
        "debug" => "debug",
        "trace" => "trace",
        _ => "info",
    };
    let env = env_logger::Env::default().default_filter_or(log_level);
    env_logger::init_from_env(env);

    if let Err(e) = run(args).await {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: CliArgs) -> anyhow::Result<()> {
    let config = RegistryConfig {
        call_timeout: Duration::from_millis(args.call_timeout_ms),
        ..Default::default()
    };

    match args.command {
        Command::Resolve(args) => run_resolve(args),
        Command::List(args) => run_list(args, config).await,
        Command::Watch(args) => run_watch(args, config).await,
        Command::Shutdown(args) => run_shutdown(args, config).await,
        Command::Lookup(args) => run_lookup(args, config).await,
    }
}

fn run_resolve(args: ResolveArgs) -> anyhow::Result<()> {
    let Some(dist) = DistFile::from_dist_dir(&args.dist_dir)
        .with_context(|| format!("Failed to load distribution {}", args.dist_dir.display()))?
    else {
        bail!("No distribution file in {}", args.dist_dir.display());
    };

    let mut resolved = resolve_environment(&dist, args.use_by);
    apply_defines(&mut resolved, &args.defines());
    let launch = resolved.launch_configuration()?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&launch)?);
        return Ok(());
    }

    println!("Environment '{}' ({})", resolved.id, resolved.use_by);
    println!("  Main class: {}", launch.main_class);
    println!("  Classpath: {}", launch.classpath);
    if let Some(main_jar) = &launch.main_jar {
        println!("  Main jar: {}", main_jar);
    }
    println!("  System properties: {}", launch.system_properties.join(" "));
    println!("  VM arguments: {}", launch.vm_arguments.join(" "));
    println!("  Program arguments: {}", launch.program_arguments.join(" "));
    Ok(())
}

async fn open_registry(config: RegistryConfig) -> anyhow::Result<EnvironmentRegistry> {
    EnvironmentRegistry::open(Arc::new(HotSpotAttacher::default()), config)
        .await
        .context("Failed to scan running processes")
}

async fn run_list(args: ListArgs, config: RegistryConfig) -> anyhow::Result<()> {
    let registry = open_registry(config).await?;

    let infos = match &args.environment {
        Some(environment_id) => {
            let root = match args.root {
                Some(root) => root,
                None => std::env::current_dir().context("Failed to get current directory")?,
            };
            registry.runtime_informations(environment_id, &root).await
        }
        None => registry.all_runtime_informations().await,
    };
    registry.close().await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&infos)?);
        return Ok(());
    }

    if infos.is_empty() {
        println!("No environment processes found");
    }
    for info in &infos {
        println!(
            "{:>8}  {:<24} {}",
            info.process_id,
            info.environment_id,
            info.working_directory.display()
        );
    }
    Ok(())
}

async fn run_watch(args: WatchArgs, config: RegistryConfig) -> anyhow::Result<()> {
    let registry = open_registry(config).await?;
    registry
        .add_state_change_listener(|| log::info!("Set of running processes changed"))
        .await;

    // Create shutdown channel
    let (shutdown_tx, mut shutdown_rx) = watch::channel(());
    ctrlc::set_handler(move || {
        log::info!("Received Ctrl+C, stopping...");
        let _ = shutdown_tx.send(());
    })
    .context("Error setting Ctrl+C handler")?;

    let mut interval = tokio::time::interval(Duration::from_millis(args.interval_ms));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = registry.refresh().await {
                    log::warn!("Refresh failed: {}", e);
                }
            }
            _ = shutdown_rx.changed() => break,
        }
    }

    registry.close().await;
    log::info!("Abandoned workers: {}", registry.guard().abandoned_workers());
    Ok(())
}

async fn run_shutdown(args: ShutdownArgs, config: RegistryConfig) -> anyhow::Result<()> {
    let config = RegistryConfig {
        shutdown_agent: Some(ShutdownAgent::File(args.agent.clone())),
        ..config
    };
    let registry = open_registry(config).await?;

    let forced = args.timeout_ms.map(|timeout_ms| ForcedShutdown {
        timeout_ms,
        halt_code: args.halt_code,
    });
    let result = registry
        .shutdown(&args.process_id, forced)
        .await
        .with_context(|| format!("Failed to shut down process {}", args.process_id));
    registry.close().await;
    result
}

async fn run_lookup(args: LookupArgs, config: RegistryConfig) -> anyhow::Result<()> {
    let registry = open_registry(config).await?;
    let process_id = registry.lookup_process_by_launch_id(&args.launch_id).await;
    registry.close().await;

    match process_id {
        Some(process_id) => {
            println!("{}", process_id);
            Ok(())
        }
        None => bail!("No running process for launch '{}'", args.launch_id),
    }
}
