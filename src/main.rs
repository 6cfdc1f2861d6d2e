#![forbid(unsafe_code)]
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::info;

mod bridge;
mod cli;
mod config;
mod discord;
mod instance;
mod media;
mod store;
mod tickets;
mod transcript;
mod utils;
mod whatsapp;

use bridge::BridgeRouter;
use config::Config;
use discord::{DiscordApi, DiscordGateway};
use instance::InstanceManager;
use store::ConfigStore;
use whatsapp::OfflineSessionFactory;

#[tokio::main]
async fn main() -> Result<()> {
    utils::logging::init_tracing();

    let args = cli::Cli::parse();
    let config = Arc::new(Config::load_from_file(&args.config)?);
    info!("discord-whatsapp bridge starting up");

    let store = Arc::new(ConfigStore::new(&config.storage.data_dir)?);
    let gateway = Arc::new(DiscordGateway::new(config.clone()));

    let manager = Arc::new(InstanceManager::new(
        store,
        gateway.clone() as Arc<dyn DiscordApi>,
        Arc::new(OfflineSessionFactory),
        config.tickets.clone(),
        Duration::from_millis(config.limits.qr_timeout),
        Duration::from_millis(config.limits.delete_channel_delay),
        Duration::from_millis(config.limits.setup_ttl),
    ));

    let router = Arc::new(BridgeRouter::new(
        manager.clone(),
        gateway.clone() as Arc<dyn DiscordApi>,
    ));
    gateway.set_router(router.clone()).await;

    gateway.start().await?;

    let started = manager.initialize_all_instances().await;
    info!(started, "instance fleet initialized");
    for instance in manager.live_instances().await {
        router.clone().spawn_session_pump(instance);
    }

    let purge_manager = manager.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        loop {
            ticker.tick().await;
            purge_manager.setup.purge_expired();
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    manager.shutdown().await;
    gateway.stop().await?;
    info!("discord-whatsapp bridge shutting down");
    Ok(())
}
