use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::info;

use runeforge::{
    config::{ConfigUpdate, load_or_default},
    core::engine::{ErrorPolicy, ProjectionEngine},
    domain::projectors::{
        AccountLookupProjector, RealmListProjector, RuneChildCountProjector, RuneDetailProjector,
        RuneListProjector,
    },
    logging,
    sqlite::{SqliteCheckpointStore, SqliteEventStore, SqliteProjectionStore, open_database},
};

#[derive(Parser)]
#[command(author, version, about = "runeforge event-sourced tracker daemon")]
struct Cli {
    /// Path to the configuration file. Defaults to ./.runeforge/config.toml
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the catch-up daemon
    Start(StartArgs),
    /// Update the stored configuration
    Config(ConfigArgs),
}

#[derive(Args)]
struct StartArgs {
    /// Override the configured data directory
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Override the catch-up poll interval in milliseconds
    #[arg(long)]
    poll_interval_ms: Option<u64>,
}

#[derive(Args)]
struct ConfigArgs {
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[arg(long)]
    poll_interval_ms: Option<u64>,

    /// What the catch-up cycle does when a projector fails on an event
    #[arg(long, value_enum)]
    on_projector_error: Option<ErrorPolicyArg>,
}

#[derive(Clone, Copy, ValueEnum)]
enum ErrorPolicyArg {
    Advance,
    Halt,
}

impl From<ErrorPolicyArg> for ErrorPolicy {
    fn from(arg: ErrorPolicyArg) -> Self {
        match arg {
            ErrorPolicyArg::Advance => ErrorPolicy::AdvanceOnError,
            ErrorPolicyArg::Halt => ErrorPolicy::HaltOnError,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start(args) => start_command(cli.config, args).await,
        Commands::Config(args) => config_command(cli.config, args),
    }
}

async fn start_command(config_path: Option<PathBuf>, args: StartArgs) -> Result<()> {
    let (mut config, path) = load_or_default(config_path)?;
    config.apply_update(ConfigUpdate {
        data_dir: args.data_dir,
        poll_interval_ms: args.poll_interval_ms,
        on_projector_error: None,
    });
    config.ensure_data_dir()?;
    config.save(&path)?;

    logging::init(&config.log_dir())?;

    let db = open_database(&config.database_path())?;
    let event_store = Arc::new(SqliteEventStore::new(db.clone()));
    let projection_store = Arc::new(SqliteProjectionStore::new(db.clone()));
    let checkpoint_store = Arc::new(SqliteCheckpointStore::new(db));

    let mut engine = ProjectionEngine::new(event_store, projection_store, checkpoint_store)
        .with_poll_interval(config.poll_interval())
        .with_error_policy(config.on_projector_error);
    engine.register(Arc::new(RuneListProjector));
    engine.register(Arc::new(RuneDetailProjector));
    engine.register(Arc::new(RuneChildCountProjector));
    engine.register(Arc::new(RealmListProjector));
    engine.register(Arc::new(AccountLookupProjector));

    engine.start_catch_up();
    info!(
        "runeforge catch-up running against {} (every {}ms)",
        config.database_path().display(),
        config.poll_interval_ms
    );

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, stopping catch-up");
    engine.stop().await;
    Ok(())
}

fn config_command(config_path: Option<PathBuf>, args: ConfigArgs) -> Result<()> {
    let (mut config, path) = load_or_default(config_path)?;

    config.apply_update(ConfigUpdate {
        data_dir: args.data_dir,
        poll_interval_ms: args.poll_interval_ms,
        on_projector_error: args.on_projector_error.map(Into::into),
    });

    config.ensure_data_dir()?;
    config.save(&path)?;

    info!("configuration saved to {}", path.display());
    println!("configuration saved to {}", path.display());
    Ok(())
}
