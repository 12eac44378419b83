use std::env;
use std::fmt::Debug;
use std::fs;
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use serde::Serialize;
use tracing::{debug, info};

use tether::chat::ChatService;
use tether::clock::system_clock;
use tether::config::{APP_NAME, AppConfig, AppPaths, load_config, write_default_config};
use tether::db::Database;
use tether::local::{LocalStore, LocalStoreConfig, open_local_store};
use tether::remote::SqliteRemoteStore;
use tether::session::SessionManager;
use tether::snapshot::SnapshotEngine;
use tether::sync::{LocalDedupStore, StaticIdentity, SyncEngine, SyncIdentity};

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn async_main(ctx: RuntimeContext, command: Command) -> Result<()> {
    match command {
        Command::Sessions { command } => handle_sessions(&ctx, command).await,
        Command::Queue { command } => handle_queue(&ctx, command).await,
        Command::Chat { command } => handle_chat(&ctx, command).await,
        _ => Err(anyhow!("command does not need the runtime")),
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();

    let ctx = RuntimeContext::new(cli.common.clone())?;
    ctx.init_logging();
    debug!("resolved paths: {}", ctx.paths);

    match cli.command {
        Command::Init(cmd) => handle_init(&ctx, cmd),
        Command::Config { command } => handle_config(&ctx, command),
        Command::Completions { shell } => handle_completions(shell),
        command => async_main(ctx, command),
    }
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Operator tool for the tether persistence core.",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the config file path
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Reduce output to only errors
    #[arg(short, long, action = clap::ArgAction::SetTrue, global = true)]
    quiet: bool,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Enable debug logging (equivalent to -vv)
    #[arg(long, global = true)]
    debug: bool,
    /// Enable trace logging (overrides other levels)
    #[arg(long, global = true)]
    trace: bool,
    /// Output machine readable JSON
    #[arg(long, global = true, conflicts_with = "yaml")]
    json: bool,
    /// Output machine readable YAML
    #[arg(long, global = true)]
    yaml: bool,
    /// Disable ANSI colors in output
    #[arg(long = "no-color", global = true, conflicts_with = "color")]
    no_color: bool,
    /// Control color output (auto, always, never)
    #[arg(long, value_enum, default_value_t = ColorOption::Auto, global = true)]
    color: ColorOption,
    /// Do not change anything on disk
    #[arg(long = "dry-run", global = true)]
    dry_run: bool,
    /// Assume "yes" for interactive prompts
    #[arg(short = 'y', long = "yes", alias = "force", global = true)]
    assume_yes: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ColorOption {
    Auto,
    Always,
    Never,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create config directories and default files
    Init(InitCommand),
    /// Inspect and manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Inspect and revoke sessions
    Sessions {
        #[command(subcommand)]
        command: SessionsCommand,
    },
    /// Inspect and drain the offline sync queue
    Queue {
        #[command(subcommand)]
        command: QueueCommand,
    },
    /// Inspect local chats, snapshots and rewinds
    Chat {
        #[command(subcommand)]
        command: ChatCommand,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Clone, Args)]
struct InitCommand {
    /// Recreate configuration even if it already exists
    #[arg(long = "force")]
    force: bool,
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Output the effective configuration
    Show,
    /// Print the path to the config file
    Path,
    /// Regenerate the default configuration file
    Reset,
}

#[derive(Debug, Subcommand)]
enum SessionsCommand {
    /// Delete every expired session
    Sweep,
    /// Revoke all sessions of a user
    RevokeUser {
        #[arg(value_name = "USER_ID")]
        user_id: String,
    },
    /// List live sessions of a user
    List {
        #[arg(value_name = "USER_ID")]
        user_id: String,
    },
}

#[derive(Debug, Subcommand)]
enum QueueCommand {
    /// Show pending sync operations
    List,
    /// Push pending operations to the remote store
    Drain {
        /// User the operations are written as
        #[arg(long, value_name = "USER_ID")]
        user: String,
    },
}

#[derive(Debug, Subcommand)]
enum ChatCommand {
    /// Print the local copy of a chat
    Show {
        #[arg(value_name = "CHAT_ID")]
        chat_id: String,
    },
    /// List snapshots of a chat
    Snapshots {
        #[arg(value_name = "CHAT_ID")]
        chat_id: String,
    },
    /// Compute a rewind, and with --apply persist it
    Rewind {
        #[arg(value_name = "CHAT_ID")]
        chat_id: String,
        #[arg(value_name = "MESSAGE_ID")]
        message_id: String,
        /// Persist the result to the local store
        #[arg(long)]
        apply: bool,
    },
}

struct RuntimeContext {
    common: CommonOpts,
    paths: AppPaths,
    config: AppConfig,
}

impl RuntimeContext {
    fn new(common: CommonOpts) -> Result<Self> {
        let paths = AppPaths::discover(common.config.clone())?;
        let config = load_or_init_config(&paths, &common)?;
        let paths = paths.apply_overrides(&config)?;
        let ctx = Self {
            common,
            paths,
            config,
        };
        ctx.ensure_directories()?;
        Ok(ctx)
    }

    fn init_logging(&self) {
        use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

        if self.common.quiet {
            return;
        }

        let level = self.effective_log_level();
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("tether={level},tetherctl={level}")));

        if self.common.json {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(io::stderr))
                .try_init()
                .ok();
        } else {
            let force_color = matches!(self.common.color, ColorOption::Always)
                || env::var_os("FORCE_COLOR").is_some();
            let disable_color = self.common.no_color
                || matches!(self.common.color, ColorOption::Never)
                || env::var_os("NO_COLOR").is_some()
                || (!force_color && !io::stderr().is_terminal());

            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(io::stderr)
                        .with_ansi(!disable_color)
                        .with_target(false),
                )
                .try_init()
                .ok();
        }
    }

    fn effective_log_level(&self) -> &str {
        if self.common.trace {
            "trace"
        } else if self.common.debug {
            "debug"
        } else {
            match self.common.verbose {
                0 => self.config.logging.level.as_str(),
                1 => "debug",
                _ => "trace",
            }
        }
    }

    fn ensure_directories(&self) -> Result<()> {
        if self.common.dry_run {
            info!(
                "dry-run: would ensure data dir {} and state dir {}",
                self.paths.data_dir.display(),
                self.paths.state_dir.display()
            );
            return Ok(());
        }

        fs::create_dir_all(&self.paths.data_dir).with_context(|| {
            format!("creating data directory {}", self.paths.data_dir.display())
        })?;
        fs::create_dir_all(&self.paths.state_dir).with_context(|| {
            format!(
                "creating state directory {}",
                self.paths.state_dir.display()
            )
        })?;
        Ok(())
    }

    /// Print a value in the selected output format.
    fn emit<T: Serialize + Debug>(&self, value: &T) -> Result<()> {
        if self.common.json {
            println!(
                "{}",
                serde_json::to_string_pretty(value).context("serializing output to JSON")?
            );
        } else if self.common.yaml {
            println!(
                "{}",
                serde_yaml::to_string(value).context("serializing output to YAML")?
            );
        } else {
            println!("{value:#?}");
        }
        Ok(())
    }

    async fn local_store(&self) -> Result<LocalStore> {
        open_local_store(LocalStoreConfig::Sqlite(self.paths.local_db.clone()))
            .await
            .with_context(|| format!("opening local store {}", self.paths.local_db.display()))
    }

    async fn database(&self) -> Result<Database> {
        Database::new(&self.paths.remote_db).await
    }

    async fn sync_engine(&self, identity: Arc<dyn SyncIdentity>) -> Result<SyncEngine> {
        self.sync_engine_on(self.local_store().await?, identity).await
    }

    async fn sync_engine_on(
        &self,
        local: LocalStore,
        identity: Arc<dyn SyncIdentity>,
    ) -> Result<SyncEngine> {
        let remote = SqliteRemoteStore::new(self.database().await?);
        let mut config = self.config.sync.clone();
        config.auto_drain = false;
        Ok(SyncEngine::new(
            local.clone(),
            Arc::new(remote),
            Arc::new(LocalDedupStore::new(local)),
            identity,
            config,
            system_clock(),
        ))
    }
}

fn load_or_init_config(paths: &AppPaths, common: &CommonOpts) -> Result<AppConfig> {
    if !paths.config_file.exists() {
        if common.dry_run {
            info!(
                "dry-run: would create default config at {}",
                paths.config_file.display()
            );
        } else {
            write_default_config(&paths.config_file)?;
        }
    }
    load_config(&paths.config_file)
}

fn handle_init(ctx: &RuntimeContext, cmd: InitCommand) -> Result<()> {
    if ctx.paths.config_file.exists() && !(cmd.force || ctx.common.assume_yes) {
        return Err(anyhow!(
            "config already exists at {} (use --force to overwrite)",
            ctx.paths.config_file.display()
        ));
    }

    if ctx.common.dry_run {
        info!(
            "dry-run: would write default config to {}",
            ctx.paths.config_file.display()
        );
        return Ok(());
    }

    write_default_config(&ctx.paths.config_file)
}

fn handle_config(ctx: &RuntimeContext, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => ctx.emit(&ctx.config),
        ConfigCommand::Path => {
            println!("{}", ctx.paths.config_file.display());
            Ok(())
        }
        ConfigCommand::Reset => {
            if ctx.common.dry_run {
                info!(
                    "dry-run: would reset config at {}",
                    ctx.paths.config_file.display()
                );
                return Ok(());
            }
            write_default_config(&ctx.paths.config_file)
        }
    }
}

fn handle_completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, format!("{APP_NAME}ctl"), &mut io::stdout());
    Ok(())
}

async fn handle_sessions(ctx: &RuntimeContext, command: SessionsCommand) -> Result<()> {
    let database = ctx.database().await?;
    let sessions = SessionManager::new(
        database.pool().clone(),
        ctx.config.session.clone(),
        system_clock(),
    );

    match command {
        SessionsCommand::Sweep => {
            if ctx.common.dry_run {
                info!("dry-run: would delete expired sessions");
                return Ok(());
            }
            let removed = sessions.sweep_expired().await?;
            info!("Removed {} expired session(s)", removed);
            ctx.emit(&serde_json::json!({ "removed": removed }))
        }
        SessionsCommand::RevokeUser { user_id } => {
            if ctx.common.dry_run {
                info!("dry-run: would revoke all sessions of {}", user_id);
                return Ok(());
            }
            let revoked = sessions.destroy_all_user_sessions(&user_id).await?;
            info!("Revoked {} session(s) for {}", revoked, user_id);
            ctx.emit(&serde_json::json!({ "user_id": user_id, "revoked": revoked }))
        }
        SessionsCommand::List { user_id } => {
            let list = sessions.list_user_sessions(&user_id).await?;
            ctx.emit(&list)
        }
    }
}

async fn handle_queue(ctx: &RuntimeContext, command: QueueCommand) -> Result<()> {
    match command {
        QueueCommand::List => {
            let local = ctx.local_store().await?;
            let queue = tether::sync::SyncQueue::new(local);
            ctx.emit(&queue.entries().await?)
        }
        QueueCommand::Drain { user } => {
            if ctx.common.dry_run {
                info!("dry-run: would drain the sync queue as {}", user);
                return Ok(());
            }
            let engine = ctx.sync_engine(Arc::new(StaticIdentity::new(user))).await?;
            let report = engine.process_queue().await?;
            info!(
                "Applied {}, failed {}, dropped {}, deferred {}",
                report.applied, report.failed, report.dropped, report.deferred
            );
            ctx.emit(&report)
        }
    }
}

async fn handle_chat(ctx: &RuntimeContext, command: ChatCommand) -> Result<()> {
    let local = ctx.local_store().await?;
    let snapshots = SnapshotEngine::new(local.clone(), ctx.config.snapshot.clone(), system_clock());

    match command {
        ChatCommand::Show { chat_id } => {
            let record = local
                .get_chat(&chat_id)
                .await?
                .ok_or_else(|| anyhow!("chat {chat_id} not found"))?;
            ctx.emit(&record)
        }
        ChatCommand::Snapshots { chat_id } => ctx.emit(&snapshots.list_snapshots(&chat_id).await?),
        ChatCommand::Rewind {
            chat_id,
            message_id,
            apply,
        } => {
            if !apply || ctx.common.dry_run {
                return ctx.emit(&snapshots.rewind(&chat_id, &message_id).await?);
            }
            // Queued only; `queue drain` pushes it.
            let sync = ctx
                .sync_engine_on(local.clone(), Arc::new(StaticIdentity::anonymous()))
                .await?;
            let chat = ChatService::new(local, sync, snapshots, system_clock());
            let result = chat.rewind_to(&chat_id, &message_id).await?;
            info!(
                "Rewound {} to {}, archived {} message(s)",
                chat_id,
                message_id,
                result.archived.len()
            );
            ctx.emit(&result)
        }
    }
}
