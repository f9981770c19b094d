use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use taskhub_core::channel::{
    spawn_reconnect, Backoff, ChannelManager, ConnectionState, Frame, FrameFilter,
    SubscriberRegistry, WsConnector,
};
use taskhub_core::config::{self, Config, RoutesConfig};
use taskhub_core::gate::{Navigator, Route, SessionGate};
use taskhub_core::session::{FileSessionStore, RemoteSessionStore, SessionStore};

#[derive(Parser)]
#[command(name = "taskhub")]
#[command(about = "Task Hub CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config file.
    Init {
        /// Config file path (default: TASKHUB_CONFIG_PATH or ~/.taskhub/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Resolve the current session once and print where the client would be routed.
    Gate {
        /// Config file path (default: TASKHUB_CONFIG_PATH or ~/.taskhub/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Path the client is currently on; no redirect is issued when it is already the destination.
        #[arg(long, value_name = "PATH")]
        from: Option<String>,
    },

    /// Connect to the hub and print every inbound frame until Ctrl-C.
    Listen {
        /// Config file path (default: TASKHUB_CONFIG_PATH or ~/.taskhub/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Hub address (default: TASKHUB_HUB_ENDPOINT or hub.endpoint from config)
        #[arg(long, short, value_name = "URL")]
        endpoint: Option<String>,
    },

    /// Connect to the hub, send one frame, and disconnect.
    Send {
        /// Config file path (default: TASKHUB_CONFIG_PATH or ~/.taskhub/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Hub address (default: TASKHUB_HUB_ENDPOINT or hub.endpoint from config)
        #[arg(long, short, value_name = "URL")]
        endpoint: Option<String>,

        /// Frame type
        #[arg(long = "type", value_name = "TYPE")]
        typ: String,

        /// JSON object merged into the frame beside "type"
        #[arg(long, value_name = "JSON")]
        payload: Option<String>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("taskhub {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Gate { config, from }) => {
            if let Err(e) = run_gate(config, from).await {
                log::error!("gate failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Listen { config, endpoint }) => {
            if let Err(e) = run_listen(config, endpoint).await {
                log::error!("listen failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Send {
            config,
            endpoint,
            typ,
            payload,
        }) => {
            if let Err(e) = run_send(config, endpoint, typ, payload).await {
                log::error!("send failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(config::default_config_path);
    let dir = taskhub_core::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

/// Prints the destination path instead of driving a browser.
struct PrintNavigator {
    routes: RoutesConfig,
    at: Mutex<Option<Route>>,
}

impl Navigator for PrintNavigator {
    fn current(&self) -> Option<Route> {
        *self.at.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn navigate(&self, route: Route) {
        println!("{}", self.routes.path(route));
        *self.at.lock().unwrap_or_else(|p| p.into_inner()) = Some(route);
    }
}

fn session_store(config: &Config, config_path: &std::path::Path) -> Arc<dyn SessionStore> {
    let file = FileSessionStore::new(config::resolve_session_path(config, config_path));
    match &config.session.validate_url {
        Some(url) if !url.trim().is_empty() => Arc::new(
            RemoteSessionStore::new(url.trim(), config::resolve_session_token()).with_cache(file),
        ),
        _ => Arc::new(file),
    }
}

async fn run_gate(config_path: Option<PathBuf>, from: Option<String>) -> anyhow::Result<()> {
    let (config, path) = config::load_config(config_path)?;
    let store = session_store(&config, &path);
    let at = from.as_deref().and_then(|p| config.routes.route_for(p));
    let navigator = Arc::new(PrintNavigator {
        routes: config.routes.clone(),
        at: Mutex::new(at),
    });
    let gate = SessionGate::new(store, navigator, config.session.strategy);
    if gate.activate().finished().await.is_none() {
        log::info!("already at destination, no redirect");
    }
    Ok(())
}

fn hub_endpoint(config: &Config, endpoint: Option<String>) -> anyhow::Result<String> {
    endpoint
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty())
        .or_else(|| config::resolve_hub_endpoint(config))
        .ok_or_else(|| {
            anyhow::anyhow!(
                "no hub endpoint configured; pass --endpoint, set TASKHUB_HUB_ENDPOINT, or set hub.endpoint in the config"
            )
        })
}

fn channel_manager(config: &Config, registry: Arc<SubscriberRegistry>) -> anyhow::Result<ChannelManager> {
    let manager = ChannelManager::new(Arc::new(WsConnector), registry);
    Ok(match &config.hub.handshake {
        Some(value) => manager.with_handshake(Frame::from_value(value.clone())?),
        None => manager,
    })
}

async fn run_listen(config_path: Option<PathBuf>, endpoint: Option<String>) -> anyhow::Result<()> {
    let (config, _) = config::load_config(config_path)?;
    let endpoint = hub_endpoint(&config, endpoint)?;

    let registry = Arc::new(SubscriberRegistry::new());
    registry.subscribe(FrameFilter::Any, |frame| match frame.encode() {
        Ok(text) => println!("{}", text),
        Err(e) => log::warn!("cannot print frame: {}", e),
    });
    let manager = Arc::new(channel_manager(&config, registry)?);
    manager.connect(&endpoint)?;

    let reconnect = config.hub.reconnect.enabled.then(|| {
        spawn_reconnect(
            manager.clone(),
            endpoint.clone(),
            Backoff::from(&config.hub.reconnect),
        )
    });

    let mut state_rx = manager.watch_state();
    let outcome = tokio::select! {
        res = tokio::signal::ctrl_c() => res.map_err(anyhow::Error::from),
        // without reconnect, a failed channel ends the session
        _ = state_rx.wait_for(|s| *s == ConnectionState::Failed), if reconnect.is_none() => {
            Err(anyhow::anyhow!("hub channel failed"))
        }
    };

    manager.close().await;
    if let Some(task) = reconnect {
        let _ = task.await;
    }
    outcome
}

async fn run_send(
    config_path: Option<PathBuf>,
    endpoint: Option<String>,
    typ: String,
    payload: Option<String>,
) -> anyhow::Result<()> {
    let (config, _) = config::load_config(config_path)?;
    let endpoint = hub_endpoint(&config, endpoint)?;

    let mut frame = Frame::new(typ);
    if let Some(p) = payload {
        let value: serde_json::Value = serde_json::from_str(&p)?;
        let serde_json::Value::Object(fields) = value else {
            anyhow::bail!("--payload must be a JSON object");
        };
        for (k, v) in fields {
            frame = frame.with_field(k, v);
        }
    }

    let manager = channel_manager(&config, Arc::new(SubscriberRegistry::new()))?;
    manager.connect(&endpoint)?;
    let mut state_rx = manager.watch_state();
    let state = *state_rx
        .wait_for(|s| matches!(s, ConnectionState::Open | ConnectionState::Failed))
        .await?;
    if state == ConnectionState::Failed {
        anyhow::bail!("could not connect to {}", endpoint);
    }
    let sent = manager.send(&frame);
    manager.close().await;
    sent?;
    println!("sent {}", frame.typ);
    Ok(())
}
