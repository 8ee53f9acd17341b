use std::{
    path::{Path, PathBuf},
    process,
    sync::Arc,
};

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use flowly::{
    Dispatcher,
    action::{
        ActionRegistry,
        calendar::{CalendarBackend, InMemoryCalendar},
    },
    config::{AppConfig, EnvConfigManager},
    flow::{FileFlowSource, FlowSource, validate::FlowValidator},
    logger::{LogConfig, init_tracing},
    schema::write_schema,
};
use flowly_channel::{ChannelClient, ConsoleChannel, InboundEvent, LogLevel};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    task::JoinSet,
};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "flowly",
    about = "Multi-tenant conversational flow engine",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Dispatch newline-delimited inbound events read from stdin
    Run(RunArgs),

    /// Load and validate one tenant's flow
    Validate(ValidateArgs),

    /// Write JSON Schemas for flow documents and channel messages
    Schema(SchemaArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// trace, debug, info, warn, error or critical
    #[arg(long, default_value = "info")]
    log_level: LogLevel,

    /// Write rolling log files here instead of stderr
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Directory holding `.env` and `.env.<APP_ENV>`
    #[arg(long, default_value = ".")]
    env_dir: PathBuf,
}

#[derive(Args, Debug)]
struct ValidateArgs {
    tenant: String,

    #[arg(long, default_value = ".")]
    env_dir: PathBuf,
}

#[derive(Args, Debug)]
struct SchemaArgs {
    #[arg(long, default_value = "schemas")]
    out: PathBuf,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Validate(args) => validate(args).await,
        Commands::Schema(args) => {
            for path in write_schema(&args.out)? {
                println!("wrote {}", path.display());
            }
            Ok(())
        }
    }
}

async fn load_config(env_dir: &Path) -> anyhow::Result<AppConfig> {
    let manager = EnvConfigManager::new(env_dir);
    AppConfig::from_manager(&manager)
        .await
        .context("invalid configuration")
}

fn actions(config: &AppConfig) -> Arc<ActionRegistry> {
    // TODO: swap in a hosted calendar backend once one is configured per tenant
    let calendar: Arc<dyn CalendarBackend> = Arc::new(InMemoryCalendar::new());
    Arc::new(ActionRegistry::builtin(calendar, config.utc_offset))
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    init_tracing(&LogConfig::new(args.log_level, args.log_dir))?;
    let config = load_config(&args.env_dir).await?;
    info!(
        app_env = %config.app_env,
        config_root = %config.config_root.display(),
        default_tenant = %config.default_tenant,
        "flowly starting up"
    );

    let channel: Arc<dyn ChannelClient> = Arc::new(ConsoleChannel::new());
    let dispatcher = Arc::new(Dispatcher::from_config(&config, actions(&config), channel));
    preload(&dispatcher, &config).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut tasks = JoinSet::new();
    while let Some(line) = lines.next_line().await.context("reading stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let event: InboundEvent = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "skipping malformed event");
                continue;
            }
        };

        let dispatcher = dispatcher.clone();
        tasks.spawn(async move {
            if let Err(e) = dispatcher.handle(&event).await {
                warn!(event_id = %event.id, error = %e, "event not dispatched");
            }
        });
        while let Some(done) = tasks.try_join_next() {
            if let Err(e) = done {
                error!(error = %e, "dispatch task panicked");
            }
        }
    }

    while let Some(done) = tasks.join_next().await {
        if let Err(e) = done {
            error!(error = %e, "dispatch task panicked");
        }
    }
    info!(sessions = dispatcher.sessions().len(), "input closed, shutting down");
    Ok(())
}

/// Loads every tenant found under the config root so a broken flow or a
/// missing asset base URL stops the process before any event is accepted.
async fn preload(dispatcher: &Dispatcher, config: &AppConfig) -> anyhow::Result<()> {
    let source = FileFlowSource::new(&config.config_root);
    let tenants = source
        .tenants()
        .with_context(|| format!("listing tenants under {}", config.config_root.display()))?;
    if tenants.is_empty() {
        warn!(config_root = %config.config_root.display(), "no tenant flows found");
    }

    for tenant in &tenants {
        let flow = dispatcher
            .cache()
            .get(tenant)
            .await
            .with_context(|| format!("loading flow for tenant `{tenant}`"))?;
        if flow.uses_local_media() && config.public_base_url.is_none() {
            bail!("tenant `{tenant}` serves header media from its assets but PUBLIC_BASE_URL is not set");
        }
    }
    info!(tenants = tenants.len(), "flows loaded");
    Ok(())
}

async fn validate(args: ValidateArgs) -> anyhow::Result<()> {
    init_tracing(&LogConfig::new(LogLevel::Warn, None))?;
    let config = load_config(&args.env_dir).await?;
    let validator = FlowValidator::new(&config.default_state).with_actions(actions(&config));
    let source = FileFlowSource::new(&config.config_root);

    let checked = match source.load(&args.tenant).await {
        Ok(flow) => validator.validate(&args.tenant, &flow).map(|()| flow),
        Err(e) => Err(e),
    };
    match checked {
        Ok(flow) => {
            for (from, target) in flow.dangling_targets() {
                println!("warning: state {from} points at undeclared state {target}");
            }
            println!(
                "flow for tenant `{}` is valid ({} states)",
                args.tenant,
                flow.states.len()
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("{e}");
            process::exit(1);
        }
    }
}
