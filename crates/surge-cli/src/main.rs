//! `surge` command line driver

use anyhow::{bail, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use surge_core::prelude::*;
use surge_core::{ControllerSimulator, InMemoryPlatform, WorkloadObject};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn cli() -> Command {
    Command::new("surge")
        .version(surge_core::VERSION)
        .about("Bounded-surge workload migration")
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("TOML file with migrator settings"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON"),
        )
        .subcommand(
            Command::new("simulate")
                .about("Migrate a Deployment to a CloneSet on an in-memory platform")
                .arg(
                    Arg::new("namespace")
                        .long("namespace")
                        .default_value("default")
                        .help("Namespace of both workloads"),
                )
                .arg(
                    Arg::new("name")
                        .long("name")
                        .default_value("web")
                        .help("Deployment name; the CloneSet is named after it"),
                )
                .arg(
                    Arg::new("source-replicas")
                        .long("source-replicas")
                        .default_value("10")
                        .value_parser(value_parser!(i32))
                        .help("Replicas declared by the Deployment"),
                )
                .arg(
                    Arg::new("destination-replicas")
                        .long("destination-replicas")
                        .default_value("0")
                        .value_parser(value_parser!(i32))
                        .help("Replicas already declared by the CloneSet"),
                )
                .arg(
                    Arg::new("replicas")
                        .long("replicas")
                        .value_parser(value_parser!(i32))
                        .help("Replicas to migrate (defaults to the source count)"),
                )
                .arg(
                    Arg::new("max-surge")
                        .long("max-surge")
                        .value_parser(value_parser!(i32))
                        .help("Destination replicas allowed above migrated source replicas"),
                )
                .arg(
                    Arg::new("timeout-seconds")
                        .long("timeout-seconds")
                        .value_parser(value_parser!(i32))
                        .help("Fail the migration after this many seconds"),
                )
                .arg(
                    Arg::new("controller-delay-ms")
                        .long("controller-delay-ms")
                        .default_value("50")
                        .value_parser(value_parser!(u64))
                        .help("Simulated controller reaction time"),
                )
                .arg(
                    Arg::new("wait-seconds")
                        .long("wait-seconds")
                        .default_value("300")
                        .value_parser(value_parser!(u64))
                        .help("Stop waiting for the result after this many seconds"),
                ),
        )
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init();
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<MigratorConfig> {
    let Some(path) = path else {
        return Ok(MigratorConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("invalid config {}", path.display()))
}

fn arg<T: Clone + Send + Sync + 'static>(args: &ArgMatches, name: &str) -> Result<T> {
    args.get_one::<T>(name)
        .cloned()
        .with_context(|| format!("missing --{name}"))
}

async fn simulate(args: &ArgMatches, config: MigratorConfig) -> Result<()> {
    let namespace: String = arg(args, "namespace")?;
    let name: String = arg(args, "name")?;
    let source_replicas: i32 = arg(args, "source-replicas")?;
    let destination_replicas: i32 = arg(args, "destination-replicas")?;
    let delay = Duration::from_millis(arg(args, "controller-delay-ms")?);
    let wait = Duration::from_secs(arg(args, "wait-seconds")?);

    let opts = MigrationOptions {
        replicas: args.get_one::<i32>("replicas").copied(),
        max_surge: args.get_one::<i32>("max-surge").copied(),
        timeout_seconds: args.get_one::<i32>("timeout-seconds").copied(),
        copy_replicas: false,
    };

    let platform = Arc::new(InMemoryPlatform::new());
    let mut deployment = WorkloadObject::new(WorkloadKind::Deployment, &namespace, &name);
    deployment.spec.replicas = Some(source_replicas);
    let src = platform.insert(deployment).resource_ref();
    platform.settle_all();

    let controllers = ControllerSimulator::spawn(
        Arc::clone(&platform),
        &[WorkloadKind::Deployment, WorkloadKind::CloneSet],
        delay,
    );
    let migrator = Migrator::start(platform.clone(), config);

    let dst = ResourceRef::cloneset(&namespace, &name);
    let created = migrator
        .create(&src, &dst, CreateOptions::default())
        .await
        .context("failed to create CloneSet")?;
    if destination_replicas > 0 {
        let mut cloneset = created;
        cloneset.spec.replicas = Some(destination_replicas);
        platform.insert(cloneset);
    }
    platform.settle_all();

    let submitted = migrator.submit(src, dst, opts).await?;
    tracing::info!(task = %submitted.id, "waiting for migration");

    let interval = migrator.config().poll_interval();
    let outcome = poll_until_terminal(&migrator, submitted.id, interval, wait, |r| {
        tracing::info!(
            state = %r.state,
            src_migrated = r.src_migrated_replicas,
            dst_migrated = r.dst_migrated_replicas,
            "progress"
        );
    })
    .await;

    migrator.shutdown().await;
    controllers.stop();

    let result = outcome?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    if result.state == MigrationState::Failed {
        bail!("migration failed: {}", result.message);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    init_logging(matches.get_flag("json"));
    let config = load_config(matches.get_one::<PathBuf>("config"))?;

    match matches.subcommand() {
        Some(("simulate", args)) => simulate(args, config).await,
        _ => {
            cli().print_help()?;
            Ok(())
        }
    }
}
