use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use ns_core::{EngineConfig, Family};
use ns_nft::{Engine, diff_dumps, display_status};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nftsim")]
#[command(version, about = "In-memory nftables transaction simulator", long_about = None)]
struct Cli {
    #[command(flatten)]
    engine: EngineArgs,

    /// Log every applied operation
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct EngineArgs {
    /// Engine config file (YAML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Default family for objects that do not name one
    #[arg(long, global = true)]
    family: Option<String>,

    /// Default table for objects that do not name one
    #[arg(long, global = true)]
    table: Option<String>,

    /// Run destroy as add followed by delete
    #[arg(long, global = true)]
    emulate_destroy: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay command files in order and print the resulting ruleset
    Apply {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Dry-run a command file against a base ruleset
    Check {
        file: PathBuf,
        /// Ruleset to check against
        #[arg(long)]
        base: Option<PathBuf>,
    },
    /// Print a command file in canonical dump form
    Dump { file: PathBuf },
    /// Show the changes needed to go from one ruleset to another
    Diff { current: PathBuf, desired: PathBuf },
    /// Show per-table object counts
    Status { file: PathBuf },
    /// List objects of one kind in the bound table
    List {
        file: PathBuf,
        /// chains, sets, maps, flowtables or counters
        #[arg(long)]
        kind: String,
        #[arg(long)]
        json: bool,
    },
    /// List the rules of a chain in the bound table
    Rules {
        file: PathBuf,
        #[arg(long)]
        chain: String,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = engine_config(&cli.engine)?;
    tracing::debug!("engine config: {:?}", config);
    tokio::runtime::Runtime::new()?.block_on(async { handle_command(cli.command, config).await })
}

fn engine_config(args: &EngineArgs) -> Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };

    if let Some(family) = &args.family {
        config.family = Some(
            family
                .parse::<Family>()
                .with_context(|| format!("Invalid --family '{}'", family))?,
        );
    }
    if let Some(table) = &args.table {
        config.table = Some(table.clone());
    }
    if args.emulate_destroy {
        config.emulate_destroy = true;
    }

    Ok(config)
}

async fn handle_command(command: Commands, config: EngineConfig) -> Result<()> {
    match command {
        Commands::Apply { files } => {
            let engine = Engine::new(config);
            for file in &files {
                replay(&engine, file).await?;
                eprintln!("✅ Applied {}", file.display());
            }
            print!("{}", engine.dump().await);
        }
        Commands::Check { file, base } => {
            let engine = Engine::new(config);
            if let Some(base) = &base {
                replay(&engine, base).await?;
            }
            let text = read_file(&file)?;
            let tx = engine
                .parse_transaction(&text)
                .await
                .with_context(|| format!("Failed to parse {}", file.display()))?;
            engine
                .check(&tx)
                .await
                .with_context(|| format!("Check failed for {}", file.display()))?;
            println!("✅ {} operations would apply cleanly", tx.num_operations());
        }
        Commands::Dump { file } => {
            let engine = load(config, &file).await?;
            print!("{}", engine.dump().await);
        }
        Commands::Diff { current, desired } => {
            let current = load(config.clone(), &current).await?.dump().await;
            let desired = load(config, &desired).await?.dump().await;
            diff_dumps(&current, &desired).display();
        }
        Commands::Status { file } => {
            let engine = load(config, &file).await?;
            display_status(&engine.status().await);
        }
        Commands::List { file, kind, json } => {
            let engine = load(config, &file).await?;
            let names = engine.list(&kind).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&names)?);
            } else {
                for name in names {
                    println!("{}", name);
                }
            }
        }
        Commands::Rules { file, chain, json } => {
            let engine = load(config, &file).await?;
            let rules = engine.list_rules(&chain).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&rules)?);
            } else {
                for rule in rules {
                    let handle = rule.handle.map(|h| h.to_string()).unwrap_or_default();
                    match &rule.comment {
                        Some(comment) => println!("{:>6}  {} comment {:?}", handle, rule.rule, comment),
                        None => println!("{:>6}  {}", handle, rule.rule),
                    }
                }
            }
        }
    }

    Ok(())
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

async fn replay(engine: &Engine, path: &Path) -> Result<()> {
    let text = read_file(path)?;
    engine
        .parse_dump(&text)
        .await
        .with_context(|| format!("Failed to apply {}", path.display()))
}

async fn load(config: EngineConfig, path: &Path) -> Result<Engine> {
    let engine = Engine::new(config);
    replay(&engine, path).await?;
    Ok(engine)
}
