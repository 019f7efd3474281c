//! Gatelink console probe.
//!
//! Connects to a gateway, forwards stdin lines as outbound payloads and
//! prints every inbound frame. Useful for poking at a gateway by hand and
//! for watching reconnect behavior.

use std::collections::VecDeque;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Parser;
use gatelink::{Delivery, Engine, LinkEvent, Stage, Transport, TransportConfig};

/// Tick interval of the main loop (~60 Hz).
const TICK: Duration = Duration::from_millis(16);

#[derive(Parser)]
#[command(name = "gatelink")]
#[command(version)]
#[command(about = "Reconnecting WebSocket console for game gateways")]
struct Cli {
    /// Gateway URL. Overrides stage address resolution.
    url: Option<String>,

    /// Stage to resolve the address for when no URL is given.
    #[arg(long)]
    stage: Option<Stage>,

    /// Sandbox gateway address.
    #[arg(long, default_value = "sandbox.gateway.localhost/channel")]
    sandbox_address: String,

    /// Production gateway address.
    #[arg(long, default_value = "gateway.localhost/channel")]
    production_address: String,

    /// JSON configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print frames from the reader thread instead of the main loop.
    #[arg(long)]
    background: bool,
}

/// Engine that sends stdin lines and prints inbound frames.
struct ConsoleEngine {
    outbox: Mutex<VecDeque<Bytes>>,
    sandbox_address: String,
    production_address: String,
}

impl ConsoleEngine {
    fn queue_line(&self, line: String) {
        self.outbox
            .lock()
            .expect("outbox lock poisoned")
            .push_back(Bytes::from(line));
    }
}

impl Engine for ConsoleEngine {
    fn outbound_payloads(&self) -> Vec<Bytes> {
        self.outbox
            .lock()
            .expect("outbox lock poisoned")
            .drain(..)
            .collect()
    }

    fn has_payloads(&self) -> bool {
        !self.outbox.lock().expect("outbox lock poisoned").is_empty()
    }

    fn on_inbound_frame(&self, frame: &str) -> bool {
        println!("< {frame}");
        true
    }

    fn on_reconnected(&self) {
        println!("* reconnected");
    }

    fn sandbox_address(&self) -> String {
        self.sandbox_address.clone()
    }

    fn production_address(&self) -> String {
        self.production_address.clone()
    }
}

fn load_config(cli: &Cli) -> Result<TransportConfig> {
    let mut config = match &cli.config {
        Some(path) => TransportConfig::load(path)?,
        None => TransportConfig::default(),
    };
    config.apply_env_overrides();

    if let Some(stage) = cli.stage {
        config.stage = stage;
    }
    if cli.background {
        config.delivery = Delivery::Background;
    }
    Ok(config)
}

fn spawn_stdin_reader(engine: Arc<ConsoleEngine>, shutdown: Arc<AtomicBool>) -> Result<()> {
    std::thread::Builder::new()
        .name("gatelink-stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) if line.is_empty() => {}
                    Ok(line) => engine.queue_line(line),
                    Err(e) => {
                        log::error!("Failed to read stdin: {e}");
                        break;
                    }
                }
            }
            log::info!("stdin closed, shutting down");
            shutdown.store(true, Ordering::SeqCst);
        })
        .context("failed to spawn stdin reader")?;
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let stage = config.stage;

    let engine = Arc::new(ConsoleEngine {
        outbox: Mutex::new(VecDeque::new()),
        sandbox_address: cli.sandbox_address.clone(),
        production_address: cli.production_address.clone(),
    });

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        ctrlc::set_handler(move || shutdown.store(true, Ordering::SeqCst))
            .context("failed to install Ctrl-C handler")?;
    }

    let mut transport = Transport::new(config)?;
    let _events = transport.subscribe(|event| match event {
        LinkEvent::Reconnecting { attempt, retry_in } => {
            println!("* reconnecting (attempt {attempt}, retry in {retry_in:?})");
        }
        other => log::debug!("Link event: {other:?}"),
    });

    let dyn_engine: Arc<dyn Engine> = Arc::clone(&engine) as Arc<dyn Engine>;
    match &cli.url {
        Some(url) => {
            transport.open(url).with_context(|| format!("failed to open {url}"))?;
            transport.run(dyn_engine)?;
        }
        None => transport.open_and_run(dyn_engine, stage)?,
    }
    println!("* connected; type lines to send, Ctrl-C to quit");

    spawn_stdin_reader(Arc::clone(&engine), Arc::clone(&shutdown))?;

    while !shutdown.load(Ordering::SeqCst) {
        transport.update(engine.as_ref());
        std::thread::sleep(TICK);
    }

    transport.stop();
    Ok(())
}
