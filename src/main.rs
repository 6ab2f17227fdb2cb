use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use talestolen::config::DEFAULT_CONFIG_PATH;
use talestolen::relay::{self, RelayState};
use talestolen::session::{spawn_ticker, SessionState, SessionStore};
use talestolen::sync::local::load_snapshot;
use talestolen::sync::peer::WebRtcFactory;
use talestolen::sync::{spawn_inbound, Inbound, LiveSync, LocalBus, LocalTransport, RelayTransport};
use talestolen::{console, Config};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "talestolen", version, about = "Speaker queue and timer for assemblies")]
struct Cli {
    /// Config file, with or without extension
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the room relay
    Relay {
        /// Override the configured port
        #[arg(long)]
        port: Option<u16>,
    },
    /// Admin console synced with other surfaces on this device
    Console {
        /// Relay room to join
        #[arg(long, requires = "relay")]
        room: Option<String>,
        /// Relay base URL, e.g. http://localhost:8080
        #[arg(long, requires = "room")]
        relay: Option<String>,
    },
    /// Read-only timer display
    Display {
        #[arg(long, requires = "relay")]
        room: Option<String>,
        #[arg(long, requires = "room")]
        relay: Option<String>,
    },
    /// Host a peer-to-peer session and print the offer blob
    Host,
    /// Join a peer-to-peer session with the host's offer blob
    Join {
        /// Offer blob; read from the first stdin line when omitted
        offer: Option<String>,
    },
}

/// A running surface: the store plus the transports feeding it
struct Surface {
    store: Arc<SessionStore>,
    inbound: mpsc::Sender<Inbound>,
    _local: Arc<LocalTransport>,
}

impl Surface {
    /// Start from the last persisted snapshot and join same-device sync
    async fn start(cfg: &Config) -> Result<Self> {
        let initial = match load_snapshot(&cfg.sync.snapshot_path).await {
            Some(snapshot) => snapshot,
            None => SessionState::new(cfg.session.type_durations(), chrono::Utc::now().timestamp_millis()),
        };
        info!("Starting at version {}", initial.version);

        let store = Arc::new(SessionStore::with_system_clock(initial));
        let (inbound, inbound_rx) = mpsc::channel(64);
        spawn_inbound(Arc::clone(&store), inbound_rx);

        let local = LocalTransport::start(&LocalBus::new(), &cfg.sync.snapshot_path, inbound.clone())?;
        store.attach(local.clone()).await;

        Ok(Self {
            store,
            inbound,
            _local: local,
        })
    }

    async fn join_relay(&self, url: &str, room: &str) -> Result<Arc<RelayTransport>> {
        let transport = RelayTransport::connect(url, room, self.inbound.clone()).await?;
        self.store.attach_and_publish(transport.clone()).await;
        Ok(transport)
    }

    /// Peer endpoint attached to the store; it catches the other side up on connect
    async fn peer(&self, cfg: &Config) -> Arc<LiveSync> {
        let factory = WebRtcFactory::new(cfg.sync.peer.ice_servers.clone(), cfg.sync.peer.gather_timeout());
        let peer = LiveSync::new(Arc::new(factory), self.inbound.clone());
        self.store.attach(peer.clone()).await;
        peer.sync_on_connect(Arc::clone(&self.store));
        peer
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;
    info!("Talestolen v{} ({})", env!("CARGO_PKG_VERSION"), cfg.service.name);

    match cli.command {
        Commands::Relay { port } => {
            let mut http = cfg.service.http.clone();
            if let Some(port) = port {
                http.port = port;
            }
            let state = RelayState::new(cfg.relay.room_ttl());
            relay::serve(http.socket_addr()?, state, cfg.relay.gc_interval()).await
        }
        Commands::Console { room, relay } => {
            let surface = Surface::start(&cfg).await?;
            let _relay = match (relay, room) {
                (Some(url), Some(room)) => Some(surface.join_relay(&url, &room).await?),
                _ => None,
            };
            let (_view, _ticker) = spawn_ticker(surface.store.clone(), cfg.session.tick_ms, true);

            println!("{}", console::HELP);
            let stdin = BufReader::new(tokio::io::stdin());
            console::run_console(stdin, surface.store.clone(), None).await
        }
        Commands::Display { room, relay } => {
            let surface = Surface::start(&cfg).await?;
            let _relay = match (relay, room) {
                (Some(url), Some(room)) => Some(surface.join_relay(&url, &room).await?),
                _ => None,
            };
            let (mut view, _ticker) = spawn_ticker(surface.store.clone(), cfg.session.tick_ms, false);

            loop {
                tokio::select! {
                    changed = view.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let v = view.borrow_and_update().clone();
                        match (&v.speaker, v.slot) {
                            (Some(name), Some(slot)) => println!(
                                "{} [{}] {}{}",
                                name,
                                slot.kind().label(),
                                v.formatted,
                                if v.paused { " (paused)" } else { "" }
                            ),
                            _ => println!("{}", v.formatted),
                        }
                    }
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
            Ok(())
        }
        Commands::Host => {
            let surface = Surface::start(&cfg).await?;
            let peer = surface.peer(&cfg).await;
            let (_view, _ticker) = spawn_ticker(surface.store.clone(), cfg.session.tick_ms, true);

            let offer = peer.host().await?;
            println!("Send this offer to the joiner:\n{}\n", offer);
            println!("Then paste their reply as: answer <blob>");

            let stdin = BufReader::new(tokio::io::stdin());
            console::run_console(stdin, surface.store.clone(), Some(peer.clone())).await?;
            peer.disconnect().await;
            Ok(())
        }
        Commands::Join { offer } => {
            let surface = Surface::start(&cfg).await?;
            let peer = surface.peer(&cfg).await;

            let mut stdin = BufReader::new(tokio::io::stdin());
            let offer = match offer {
                Some(offer) => offer,
                None => {
                    println!("Paste the host's offer:");
                    let mut line = String::new();
                    stdin.read_line(&mut line).await.context("Failed to read offer")?;
                    line
                }
            };

            let answer = peer.join(&offer).await?;
            println!("Send this answer back to the host:\n{}\n", answer);

            console::run_console(stdin, surface.store.clone(), Some(peer.clone())).await?;
            peer.disconnect().await;
            Ok(())
        }
    }
}
