use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use lib_realtime::configs::RealtimeConfig;
use lib_realtime::connections::events::EVENT_CONNECT;
use lib_realtime::loggers::init_tracing;
use lib_realtime::notifications::{NotificationSink, NotificationStore, Toast};
use lib_realtime::retrieve::{ApiClient, HttpTransport};
use lib_realtime::{CachedClient, ChannelConfig, ChannelManager, NotificationEngine, Role};
use tracing::info;

/// Follows the live notification feed of a storefront user on the terminal.
#[derive(Parser, Debug)]
#[command(
    version,
    about,
    long_about = "Connects to the storefront event channel as the given user, \
fetches the current notification feed over REST, and then prints every \
notification as it arrives. Intended for debugging the backend push pipeline \
without a browser."
)]
struct Args {
    /// User id to authenticate the channel with.
    #[arg(short, long)]
    user: String,

    /// Authenticate as an admin session instead of a customer one.
    #[arg(long)]
    admin: bool,

    /// Override the channel endpoint (default: STOREFRONT_CHANNEL_URL).
    #[arg(long)]
    channel_url: Option<String>,

    /// Override the REST base URL (default: STOREFRONT_API_URL).
    #[arg(long)]
    api_url: Option<String>,

    /// Seconds between liveness probes.
    #[arg(long, default_value_t = 30)]
    probe_interval: u64,
}

/// Prints cues and toasts to stdout instead of playing sounds.
struct StdoutSink;

impl NotificationSink for StdoutSink {
    fn play_cue(&self) {
        println!("\x07");
    }

    fn show_toast(&self, toast: &Toast) {
        match &toast.order_code {
            Some(code) => println!("[{code}] {}: {}", toast.title, toast.body),
            None => println!("{}: {}", toast.title, toast.body),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let _guard = init_tracing("notify-tail", None);
    let args = Args::parse();

    let mut config = RealtimeConfig::from_env();
    if let Some(url) = args.channel_url {
        config.channel_url = url;
    }
    if let Some(url) = args.api_url {
        config.api_url = url;
    }
    let data_dir = config.ensure_data_dir().context("creating data directory")?;

    let transport: Arc<dyn HttpTransport> = Arc::new(
        ApiClient::new(&config.api_url, config.auth_token.clone())
            .context("building the API client")?,
    );
    let client = Arc::new(CachedClient::new(transport));

    let mut channel_config = ChannelConfig::new(config.channel_url.clone());
    channel_config.diagnostics = config.diagnostics;
    let channel = ChannelManager::new(channel_config);

    let role = if args.admin { Role::Admin } else { Role::Customer };
    let engine = NotificationEngine::new(
        role,
        client,
        Arc::clone(&channel),
        NotificationStore::new(data_dir),
    );
    engine.set_user(args.user.clone());
    engine.set_sink(Arc::new(StdoutSink));
    engine.spawn();

    // Subscribe before connecting so the first connect event is not missed:
    // every (re)connection needs a fresh authentication handshake.
    let mut events = channel.subscribe();
    channel.connect();
    {
        let channel = Arc::clone(&channel);
        let engine = Arc::clone(&engine);
        let user = args.user.clone();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                if event.name == EVENT_CONNECT {
                    channel.authenticate(&user, args.admin);
                    engine.fetch_notifications().await;
                    info!(unread = engine.unread_count(), "feed synchronized");
                }
            }
        });
    }

    info!(
        endpoint = %config.channel_url,
        role = if args.admin { "admin" } else { "customer" },
        "tailing notifications, press Ctrl-C to stop"
    );

    let mut probe = tokio::time::interval(Duration::from_secs(args.probe_interval.max(1)));
    probe.tick().await;
    loop {
        tokio::select! {
            _ = probe.tick() => {
                channel.check_connection("cli");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
    }
    Ok(())
}
