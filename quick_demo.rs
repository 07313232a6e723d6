//! Quick lanlink demo - host, searcher and two clients in one process
//! Everything runs on loopback, so no LAN or fixed ports are needed

use anyhow::{Context, Result};
use lanlink_core::Message;
use lanlink_network::{Session, SessionConfig, SessionEvent};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Searcher first, so the host can aim its beacon at it
    let searcher = Session::new(SessionConfig::loopback(0));
    let mut discovered = searcher.subscribe();
    searcher.start_searching().await?;
    let discovery_addr = searcher
        .local_discovery_addr()
        .context("Discovery listener has no address")?;

    let mut host_config = SessionConfig::loopback(0);
    host_config.beacon_target = discovery_addr;
    let host = Session::new(host_config);
    host.on_message(|m| println!("host    <- [{}] {}", m.from, m.raw));
    host.start_host("Quick Demo").await?;

    let found = tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            match discovered.recv().await {
                Ok(SessionEvent::PeerDiscovered(peer)) => return Some(peer),
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
    .context("No host discovered")?;
    println!("searcher found {}", found);

    let addr = host
        .local_session_addr()
        .context("Host has no session address")?
        .to_string();

    let alice = Session::new(SessionConfig::loopback(0));
    let bob = Session::new(SessionConfig::loopback(0));
    alice.on_message(|m| println!("alice   <- {}", m.raw));
    bob.on_message(|m| println!("bob     <- {}", m.raw));
    alice.connect_to_server(&addr).await?;
    bob.connect_to_server(&addr).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    alice.send(&Message::place(7, 12.5, -3.0))?;
    bob.send(&Message::place(8, 0.0, 4.25))?;
    host.send_line("2,#ff8800")?;
    tokio::time::sleep(Duration::from_millis(200)).await;

    println!("host has {} connection(s)", host.connection_count());

    alice.shutdown().await;
    bob.shutdown().await;
    host.shutdown().await;
    searcher.shutdown().await;
    Ok(())
}
