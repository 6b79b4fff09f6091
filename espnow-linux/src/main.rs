// ESP-NOW node for Linux: emulated radio over UDP multicast, peers file, stdin shell.

mod config;
mod frame;
mod radio;
mod shell;

use std::sync::Arc;

use anyhow::Context;
use espnow_core::{
    AddressReceiveFn, AddressSendFn, Category, EspNow, Interface, JsonFileStore, MacAddress,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use radio::{RadioEvent, UdpRadio};
use shell::Command;

const VERSION: &str = env!("CARGO_PKG_VERSION");

type Node = EspNow<UdpRadio, JsonFileStore>;

fn main() -> anyhow::Result<()> {
    for arg in std::env::args().skip(1) {
        if arg == "--version" || arg == "-V" {
            println!("espnow-linux {}", VERSION);
            return Ok(());
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cfg = config::load();
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(cfg))
}

async fn run(cfg: config::Config) -> anyhow::Result<()> {
    let local = cfg.radio.mac.unwrap_or_else(config::random_mac);
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let radio = UdpRadio::new(local, &cfg.radio, events_tx);
    let store = JsonFileStore::new(&cfg.radio.peers_file);
    let mut node = EspNow::init(cfg.espnow.clone(), radio, store).context("espnow init")?;
    if !node.is_active() {
        anyhow::bail!("espnow is not active, check [espnow] enable and wifi interfaces");
    }
    tracing::info!(mac = %local, peers = node.total_peers(), "node up");
    subscribe_console(&mut node)?;
    println!("{}", shell::HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            Some(ev) = events.recv() => match ev {
                RadioEvent::Received { from, payload } => {
                    node.on_receive(&from, &payload);
                }
                RadioEvent::SendResult { to, success } => {
                    node.on_send_result(&to, success);
                }
            },
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    if !handle_line(&mut node, &line) {
                        break;
                    }
                }
                Ok(None) => {
                    tracing::debug!("stdin closed");
                    stdin_open = false;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "stdin read failed");
                    stdin_open = false;
                }
            },
            r = &mut shutdown => {
                r?;
                break;
            }
        }
    }

    node.shutdown();
    tracing::info!("node stopped");
    Ok(())
}

/// Print every inbound datagram and every send outcome.
fn subscribe_console(node: &mut Node) -> anyhow::Result<()> {
    let on_rx: Arc<AddressReceiveFn> = Arc::new(|from: &MacAddress, data: &[u8]| {
        println!("< {}: {}", from, String::from_utf8_lossy(data));
    });
    node.register_receive_by_address(Category::Everything, on_rx)?;
    let on_tx: Arc<AddressSendFn> = Arc::new(|to: &MacAddress, success: bool| {
        println!("> {}: {}", to, if success { "ok" } else { "failed" });
    });
    node.register_send_by_address(Category::Everything, on_tx)?;
    Ok(())
}

/// Run one shell line. Returns false on `quit`.
fn handle_line(node: &mut Node, line: &str) -> bool {
    let cmd = match shell::parse_command(line) {
        Ok(Some(cmd)) => cmd,
        Ok(None) => return true,
        Err(e) => {
            println!("error: {}", e);
            return true;
        }
    };
    let result = match cmd {
        Command::Add { name, mac, channel } => node
            .add_peer(&name, mac, Interface::Station, channel, true)
            .map(|id| println!("added {} ({}) as {}", name, mac, id)),
        Command::Remove { name } => {
            if !node.remove_peer(&name, true) {
                println!("no peer named {}", name);
            }
            Ok(())
        }
        Command::Send { name, text } => node.send_to_peer(&name, text.as_bytes()),
        Command::SendAll { text } => node
            .send_to_all(text.as_bytes())
            .map(|n| println!("queued to {} peers", n)),
        Command::Broadcast { text } => node.broadcast(text.as_bytes()),
        Command::Peers => {
            for p in node.peers() {
                println!(
                    "{} {} ch{} {:?}",
                    p.name, p.address, p.channel, p.interface
                );
            }
            Ok(())
        }
        Command::Help => {
            println!("{}", shell::HELP);
            Ok(())
        }
        Command::Quit => return false,
    };
    if let Err(e) = result {
        println!("error: {}", e);
    }
    true
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
