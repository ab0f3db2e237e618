//! rcbot: keeps a logged-in session with a chat server and logs what happens
//! in the rooms the bot can see.
//!
//! # Usage
//!
//! ```text
//! rcbot [OPTIONS]
//!
//! Options:
//!   --config   <PATH>  TOML config file [default: rcbot.toml]
//!   --uri      <URI>   WebSocket endpoint, e.g. wss://chat.example.com/websocket
//!   --user     <NAME>  Login username
//!   --password <PASS>  Login password
//! ```
//!
//! | Variable         | Overrides            |
//! |------------------|----------------------|
//! | `RCBOT_CONFIG`   | `--config`           |
//! | `RCBOT_URI`      | `[server] uri`       |
//! | `RCBOT_USER`     | `[credentials] user` |
//! | `RCBOT_PASSWORD` | `[credentials] password` |
//!
//! Command-line and environment values win over the file.  The process exits
//! with a non-zero status when the server rejects the login or the session
//! runs out of reconnect attempts, and with status zero on Ctrl+C.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use rcbot::infrastructure::channels::{ChannelHost, ChannelSink};
use rcbot::infrastructure::storage::config::{load_config, AppConfig};
use rcbot::infrastructure::transport::WebSocketTransport;
use rcbot::{Session, Transport};
use rcbot_core::RealtimeEvent;

/// How long shutdown waits for the WebSocket close frame to go out.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

// ── CLI argument definitions ──────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(
    name = "rcbot",
    about = "Persistent realtime session client for Rocket.Chat-style servers",
    version
)]
struct Cli {
    /// Path of the TOML configuration file.  A missing file means defaults.
    #[arg(long, default_value = "rcbot.toml", env = "RCBOT_CONFIG")]
    config: PathBuf,

    /// WebSocket endpoint of the realtime API.
    #[arg(long, env = "RCBOT_URI")]
    uri: Option<String>,

    /// Username to log in with.
    #[arg(long, env = "RCBOT_USER")]
    user: Option<String>,

    /// Password to log in with.
    #[arg(long, env = "RCBOT_PASSWORD", hide_env_values = true)]
    password: Option<String>,
}

impl Cli {
    /// Overlays command-line and environment values on the file config.
    fn apply_to(self, config: &mut AppConfig) {
        if let Some(uri) = self.uri {
            config.server.uri = uri;
        }
        if let Some(user) = self.user {
            config.credentials.user = user;
        }
        if let Some(password) = self.password {
            config.credentials.password = password;
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone();
    let mut config = load_config(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    cli.apply_to(&mut config);

    // `RUST_LOG` wins; otherwise the configured level applies.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.session.log_level)),
        )
        .init();

    let settings = config
        .session_settings()
        .context("invalid configuration")?;
    info!(endpoint = %settings.endpoint, user = %settings.username, "rcbot starting");

    let (transport, transport_events) = WebSocketTransport::new();
    let (sink, mut events) = ChannelSink::channel();
    let (host, mut fatal) = ChannelHost::channel();
    let transport = Arc::new(transport);
    let session = Session::new(
        settings,
        Arc::clone(&transport) as Arc<dyn Transport>,
        Arc::new(sink),
        Arc::new(host),
    );

    session.start();
    let io = tokio::spawn(Arc::clone(&session).run(transport_events));

    let outcome = loop {
        tokio::select! {
            Some(event) = events.recv() => {
                handle_event(&session, event, config.session.subscribe_my_messages);
            }
            Some(error) = fatal.recv() => {
                error!("session cannot continue: {error}");
                break Err(error);
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    error!("failed to listen for Ctrl+C: {e}");
                }
                info!("received Ctrl+C, shutting down");
                break Ok(());
            }
        }
    };

    // Stop processing transport events first so the close below is not
    // answered with a reconnect.
    io.abort();
    let _ = io.await;
    if !transport.close(CLOSE_GRACE).await {
        warn!("websocket did not close within {CLOSE_GRACE:?}");
    }

    match outcome {
        Ok(()) => {
            info!("rcbot stopped");
            Ok(())
        }
        Err(error) => Err(error.into()),
    }
}

/// Reacts to one published event.
fn handle_event(session: &Session, event: RealtimeEvent, subscribe_my_messages: bool) {
    match event {
        RealtimeEvent::ClientStarted => {
            info!(user_id = ?session.user_id(), "session ready");
            if subscribe_my_messages {
                subscribe(session);
            }
        }
        RealtimeEvent::Message(message) => info!(
            room = message.room_name.as_deref().unwrap_or(&message.room_id),
            from = %message.user.username,
            "{}",
            message.text
        ),
        RealtimeEvent::UserJoined(e) => {
            info!(room = %e.room_id, user = %e.user.username, "user joined")
        }
        RealtimeEvent::UserLeft(e) => {
            info!(room = %e.room_id, user = %e.user.username, "user left")
        }
        RealtimeEvent::TopicChanged(e) => {
            info!(room = %e.room_id, by = %e.user.username, topic = %e.topic, "topic changed")
        }
        RealtimeEvent::RoomChanged { room_id, action } => {
            debug!(room = %room_id, %action, "room list changed")
        }
    }
}

fn subscribe(session: &Session) {
    let ready = match session.subscribe_my_messages() {
        Ok(ready) => ready,
        Err(e) => {
            warn!("could not subscribe to room messages: {e}");
            return;
        }
    };
    tokio::spawn(async move {
        match ready.await {
            Ok(reply) if reply.msg() == Some("nosub") => {
                warn!("room message subscription refused: {:?}", reply.error())
            }
            Ok(_) => info!("subscribed to room messages"),
            // The connection dropped before the server answered.
            Err(_) => debug!("room message subscription abandoned"),
        }
    });
}

// ── Tests ─────────────────────────────────────────────────────────────────────
