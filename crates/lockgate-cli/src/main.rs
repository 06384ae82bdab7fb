//! Lockgate CLI - lock admission control toolkit

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use lockgate_core::config::Config;
use lockgate_core::deadlock::{DeadlockDetector, DeadlockResolver, DetectorConfig, ResolutionPolicy};
use lockgate_core::domain::locking::{InMemoryReleaser, Lock, LockRequest, Priority, ResourceIdentifier};
use lockgate_core::scheduler::{FairScheduler, SchedulingAlgorithm};
use serde_json::json;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "lockgate")]
#[command(author, version, about = "Deadlock detection, resolution and fair lock scheduling", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Drive the scheduler with synthetic users and report admissions
    Simulate {
        /// Number of competing users
        #[arg(short, long, default_value_t = 4)]
        users: usize,
        /// Number of admissions to run
        #[arg(short, long, default_value_t = 1000)]
        requests: usize,
        /// Scheduling algorithm (overrides the configured one)
        #[arg(short, long)]
        algorithm: Option<String>,
        /// Lottery seed (overrides the configured one)
        #[arg(long)]
        seed: Option<u64>,
        /// Give users different priorities instead of all normal
        #[arg(long)]
        mixed_priorities: bool,
    },

    /// Build a wait-for cycle and resolve it
    DeadlockDemo {
        /// Number of participants in the cycle
        #[arg(short, long, default_value_t = 3)]
        size: usize,
        /// Resolution policy (disables adaptive selection)
        #[arg(short, long)]
        policy: Option<String>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// List all configuration values
    List,
    /// Reset configuration to defaults
    Reset,
    /// Show config file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let directive = if cli.quiet { "lockgate=warn" } else { "lockgate=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(directive.parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Config { action } => cmd_config(action, cli.format, cli.quiet),

        Commands::Simulate {
            users,
            requests,
            algorithm,
            seed,
            mixed_priorities,
        } => {
            let options = SimulateOptions {
                users,
                requests,
                algorithm,
                seed,
                mixed_priorities,
            };
            cmd_simulate(options, cli.format, cli.quiet).await
        }

        Commands::DeadlockDemo { size, policy } => {
            cmd_deadlock_demo(size, policy.as_deref(), cli.format, cli.quiet).await
        }
    };

    if let Err(e) = &result {
        if let Some(hint) = e
            .downcast_ref::<lockgate_core::Error>()
            .and_then(lockgate_core::Error::suggestion)
        {
            eprintln!("Hint: {}", hint);
        }
    }

    result
}

fn cmd_config(action: ConfigAction, format: OutputFormat, quiet: bool) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key)?;
            match format {
                OutputFormat::Json => println!("{}", json!({ "key": key, "value": value })),
                OutputFormat::Text => println!("{}", value),
            }
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::List => {
            let config = Config::load()?;
            let items = config.list()?;
            match format {
                OutputFormat::Json => {
                    let map: BTreeMap<String, String> = items.into_iter().collect();
                    println!("{}", serde_json::to_string_pretty(&map)?);
                }
                OutputFormat::Text => {
                    for (key, value) in items {
                        println!("{} = {}", key, value);
                    }
                }
            }
        }
        ConfigAction::Reset => {
            Config::reset()?;
            if !quiet {
                println!("Configuration reset to defaults.");
            }
        }
        ConfigAction::Path => {
            let path = Config::config_path()?;
            println!("{}", path.display());
        }
    }
    Ok(())
}

struct SimulateOptions {
    users: usize,
    requests: usize,
    algorithm: Option<String>,
    seed: Option<u64>,
    mixed_priorities: bool,
}

fn simulation_request(user: &str, round: usize, priority: Priority) -> LockRequest {
    LockRequest::with_id(
        format!("{}-{}", user, round),
        ResourceIdentifier::new("simulation", "shared", "default"),
        user,
        priority,
    )
}

async fn cmd_simulate(options: SimulateOptions, format: OutputFormat, quiet: bool) -> anyhow::Result<()> {
    if options.users == 0 {
        anyhow::bail!("--users must be at least 1");
    }

    let mut scheduler_config = Config::load()?.scheduler_config()?;
    if let Some(name) = &options.algorithm {
        scheduler_config.algorithm = name.parse::<SchedulingAlgorithm>()?;
    }
    if let Some(seed) = options.seed {
        scheduler_config.lottery_seed = Some(seed);
    }
    let scheduler = FairScheduler::new(scheduler_config)?;

    let users: Vec<(String, Priority)> = (0..options.users)
        .map(|i| {
            let priority = if options.mixed_priorities {
                Priority::from_level((i % 4) as u8)
            } else {
                Priority::Normal
            };
            (format!("user-{}", i + 1), priority)
        })
        .collect();
    let priority_of: BTreeMap<&str, Priority> = users.iter().map(|(u, p)| (u.as_str(), *p)).collect();

    for (user, priority) in &users {
        scheduler.enqueue(simulation_request(user, 0, *priority)).await?;
    }

    info!(
        algorithm = %scheduler.algorithm(),
        users = options.users,
        requests = options.requests,
        "Starting simulation"
    );

    let mut admissions: BTreeMap<String, u64> = users.iter().map(|(u, _)| (u.clone(), 0)).collect();
    for round in 1..=options.requests {
        let Some(admitted) = scheduler.schedule().await? else {
            warn!(round, "Scheduler returned no request");
            break;
        };
        *admissions.entry(admitted.user.clone()).or_insert(0) += 1;

        let priority = priority_of.get(admitted.user.as_str()).copied().unwrap_or_default();
        scheduler
            .enqueue(simulation_request(&admitted.user, round, priority))
            .await?;
    }

    let metrics = scheduler.metrics().await;
    match format {
        OutputFormat::Json => {
            let output = json!({
                "algorithm": scheduler.algorithm(),
                "requests": options.requests,
                "admissions": admissions,
                "metrics": metrics,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => {
            if !quiet {
                println!("Simulation ({})", scheduler.algorithm());
                println!("==========");
            }
            for (user, count) in &admissions {
                let priority = priority_of.get(user.as_str()).copied().unwrap_or_default();
                println!(
                    "{:<10} {:<9} {:>6}  {:>5.1}%",
                    user,
                    priority,
                    count,
                    metrics.user_share(user) * 100.0
                );
            }
            if !quiet {
                println!();
                println!("Processed: {}", metrics.processed_requests);
                println!(
                    "Starvation: {} events, {} boosts",
                    metrics.starvation_events, metrics.starvation_boosts
                );
            }
        }
    }

    Ok(())
}

async fn cmd_deadlock_demo(
    size: usize,
    policy: Option<&str>,
    format: OutputFormat,
    quiet: bool,
) -> anyhow::Result<()> {
    if size < 2 {
        anyhow::bail!("--size must be at least 2 to form a cycle");
    }

    let config = Config::load()?;
    let detector = Arc::new(DeadlockDetector::new(
        DetectorConfig {
            enabled: true,
            ..config.detector_config()
        }
        .with_prevention(false),
    ));

    let mut resolver_config = config.resolver_config()?;
    if let Some(name) = policy {
        resolver_config = resolver_config.fixed_policy(name.parse::<ResolutionPolicy>()?);
    }
    let releaser = Arc::new(InMemoryReleaser::new());
    let resolver = DeadlockResolver::new(detector.clone(), resolver_config)?.with_releaser(releaser.clone());

    // owner-1 waits for owner-2, ..., owner-N waits for owner-1
    let resource = ResourceIdentifier::new("demo", "ledger", "default");
    let now = Utc::now();
    let locks: Vec<Lock> = (0..size)
        .map(|i| {
            let owner = format!("owner-{}", i + 1);
            Lock::new(format!("lock-{}", i + 1), resource.clone(), owner, Priority::from_level((i % 3) as u8))
                .acquired_at(now - chrono::Duration::seconds((size - i) as i64))
        })
        .collect();
    for (i, lock) in locks.iter().enumerate() {
        let blocker = &locks[(i + 1) % size];
        let request = LockRequest::with_id(lock.owner.clone(), resource.clone(), lock.owner.clone(), lock.priority);
        detector.add_lock_request(&request, std::slice::from_ref(blocker)).await?;
    }

    let mut resolved = Vec::new();
    for mut deadlock in detector.check_for_deadlocks().await? {
        resolver.resolve_deadlock_advanced(&mut deadlock, &locks).await?;
        resolved.push(deadlock);
    }
    resolver.wait_for_cascades().await;

    let stats = resolver.get_resolution_stats().await;
    let released = releaser.released().await;

    match format {
        OutputFormat::Json => {
            let output = json!({
                "deadlocks": resolved,
                "released_locks": released,
                "stats": stats,
                "graph": detector.graph_stats().await,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => {
            for deadlock in &resolved {
                println!("Deadlock {}", deadlock.id);
                println!("  Cycle:  {}", deadlock.cycle.join(" -> "));
                println!("  Victim: {}", deadlock.victim_id.as_deref().unwrap_or("none"));
            }
            if !quiet {
                println!();
                println!("Released locks: {}", released.join(", "));
                println!(
                    "Resolutions: {} total, {} successful, {} failed",
                    stats.total_resolutions, stats.successful_resolutions, stats.failed_resolutions
                );
            }
        }
    }

    Ok(())
}
