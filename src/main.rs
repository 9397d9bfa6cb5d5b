use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;

use modhub::application::errors::BotError;
use modhub::application::messaging::MessageDispatcher;
use modhub::application::modules::{InstallEngine, LifecycleController, LifecycleSettings, ModuleCatalog};
use modhub::application::services::ModuleService;
use modhub::domain::entities::User;
use modhub::domain::traits::{Bot, HubClient, PresenceEvent};
use modhub::infrastructure::adapters::ConsoleAdapter;
use modhub::infrastructure::config::Config;
use modhub::infrastructure::hub::{DisabledHub, HttpHubClient};
use modhub::infrastructure::plugins::{CommandInstaller, LocalPluginHost};
use modhub::infrastructure::storage::JsonSwitchStore;

#[derive(Parser)]
#[command(name = "modhub")]
#[command(about = "Chat bot host with a hot-swappable module manager", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Module directory (overrides config)
    #[arg(short, long)]
    modules: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the bot
    Run,
    /// Show version
    Version,
    /// Generate default config
    InitConfig,
    /// Print the modules found in the module directory
    List,
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run => {
            let config = load_config(&cli.config, cli.modules);
            let rt = match tokio::runtime::Runtime::new() {
                Ok(rt) => rt,
                Err(e) => {
                    tracing::error!("Failed to start runtime: {}", e);
                    std::process::exit(1);
                }
            };
            if let Err(e) = rt.block_on(run_bot(config)) {
                tracing::error!("Bot stopped: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Version => {
            println!("modhub v{}", env!("CARGO_PKG_VERSION"));
        }
        Commands::InitConfig => {
            init_config(&cli.config);
        }
        Commands::List => {
            let config = load_config(&cli.config, cli.modules);
            list_modules(&config);
        }
    }
}

fn load_config(path: &str, modules_override: Option<String>) -> Config {
    let mut config = if std::path::Path::new(path).exists() {
        Config::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config: {}, using defaults", e);
            Config::load_env()
        })
    } else {
        Config::load_env()
    };
    if let Some(dir) = modules_override {
        config.modules.directory = dir.into();
    }
    config
}

async fn run_bot(config: Config) -> Result<(), BotError> {
    tracing::info!("Starting {}", config.bot.name);
    let module_root = config.modules.directory.clone();
    tokio::fs::create_dir_all(&module_root)
        .await
        .map_err(|e| BotError::Internal(format!("Cannot create {}: {}", module_root.display(), e)))?;

    let switches = Arc::new(JsonSwitchStore::open(&config.switch.data_file).await?);
    let host = Arc::new(LocalPluginHost::new(&module_root));
    let requirements = Arc::new(CommandInstaller::from_command_line(&config.requirements.command)?);

    let (hub, http_hub): (Arc<dyn HubClient>, Option<Arc<HttpHubClient>>) = if config.hub.enabled {
        let client = Arc::new(HttpHubClient::new(&config)?);
        match client.connect().await {
            Ok(()) => (client.clone() as Arc<dyn HubClient>, Some(client)),
            Err(e) => {
                tracing::error!("Hub unavailable, continuing without it: {}", e);
                (Arc::new(DisabledHub) as Arc<dyn HubClient>, None)
            }
        }
    } else {
        tracing::info!("Hub service is disabled");
        (Arc::new(DisabledHub) as Arc<dyn HubClient>, None)
    };

    let catalog = ModuleCatalog::new(&module_root, config.modules.exclusion_prefix.clone()).shared();
    let installer = Arc::new(InstallEngine::new(
        catalog.clone(),
        host.clone(),
        hub.clone(),
        requirements,
        &module_root,
        &config.modules.cache_dir,
    ));
    let lifecycle = Arc::new(LifecycleController::new(
        catalog,
        host,
        installer.clone(),
        switches.clone(),
        LifecycleSettings {
            activation_retries: config.modules.activation_retries,
            manager_pack: config.modules.manager_pack.clone(),
            default_switch: config.switch.default,
        },
    ));

    let report = lifecycle.startup().await?;
    for corrupt in &report.corrupt {
        tracing::error!("Reinstall needed: {} was lost in an interrupted upgrade", corrupt.display());
    }
    for (pack, reason) in &report.failed {
        tracing::warn!("{} is not loaded: {}", pack, reason);
    }

    let service = Arc::new(ModuleService::new(
        lifecycle,
        installer,
        hub.clone(),
        switches,
        http_hub.is_some(),
    ));
    let dispatcher = MessageDispatcher::new(config.bot.prefix.clone(), service);
    let bot = Arc::new(ConsoleAdapter::new(config.bot.name.clone()));

    if let Some(client) = &http_hub {
        if let Err(e) = client.report_presence(PresenceEvent::Online).await {
            tracing::warn!("Failed to report online: {}", e);
        }
        let interval = Duration::from_secs(config.hub.heartbeat_secs.max(1));
        tokio::spawn(heartbeat(client.clone(), bot.clone(), config.bot.dev_group.clone(), interval));
    }

    run_console_bot(bot.as_ref(), &dispatcher, &config).await;

    if let Some(client) = &http_hub {
        if let Err(e) = client.report_presence(PresenceEvent::Offline).await {
            tracing::warn!("Failed to report offline: {}", e);
        }
    }
    Ok(())
}

/// Periodic liveness report; peers the hub reports offline are announced
/// to the dev groups
async fn heartbeat(hub: Arc<HttpHubClient>, bot: Arc<ConsoleAdapter>, dev_group: Vec<String>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let offline = match hub.heartbeat().await {
            Ok(offline) => offline,
            Err(e) => {
                tracing::warn!("Heartbeat failed: {}", e);
                continue;
            }
        };

        for peer in offline {
            let notice = format!("{}#{} ({}) is offline", peer.name, peer.num, peer.id);
            let mut notified = false;
            for group in &dev_group {
                match bot.send_message(group, &notice).await {
                    Ok(_) => notified = true,
                    Err(e) => tracing::warn!("Failed to notify {}: {}", group, e),
                }
            }
            if notified {
                if let Err(e) = hub.notified_missing(peer.id).await {
                    tracing::warn!("Failed to acknowledge {}: {}", peer.id, e);
                }
            }
        }
    }
}

async fn run_console_bot(bot: &ConsoleAdapter, dispatcher: &MessageDispatcher, config: &Config) {
    if let Err(e) = bot.start().await {
        tracing::error!("Failed to start bot: {}", e);
        return;
    }

    let info = bot.bot_info();
    tracing::info!("Bot started: @{}", info.username);

    let account = config.adapters.console.user.clone();
    let user = User::new(account.clone()).with_permission(config.permission_of(&account));

    // Main loop (for console mode)
    while let Some(input) = bot.read_line("> ").await {
        if input.is_empty() {
            continue;
        }
        if input == "exit" || input == "quit" {
            break;
        }

        match dispatcher.process_text("console", input.as_str(), Some(user.clone()), None).await {
            Some(reply) => {
                let _ = bot.send_message("console", &reply).await;
            }
            None => {
                let hint = format!("Module commands start with {}", dispatcher.parser().prefix());
                let _ = bot.send_message("console", &hint).await;
            }
        }
    }
    tracing::info!("Console closed");
}

fn list_modules(config: &Config) {
    let catalog = ModuleCatalog::new(&config.modules.directory, config.modules.exclusion_prefix.clone());
    match catalog.scan() {
        Ok(modules) if modules.is_empty() => println!("No modules in {}", config.modules.directory.display()),
        Ok(modules) => {
            for (index, module) in modules.iter().enumerate() {
                println!("{}\n", module.details(index + 1));
            }
        }
        Err(e) => tracing::error!("Failed to scan {}: {}", config.modules.directory.display(), e),
    }
}

fn init_config(path: &str) {
    let config = Config::default();
    match serde_yaml::to_string(&config) {
        Ok(yaml) => {
            println!("{}", yaml);
            println!("\nSave this to {} and adjust as needed.", path);
        }
        Err(e) => tracing::error!("Failed to render config: {}", e),
    }
}
