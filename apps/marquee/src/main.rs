mod cli;
mod config;
mod dispatch;
mod identity;
mod platform;
mod poll;
mod screens;
mod secondary;
mod session;
mod settings;
#[cfg(test)]
mod testutil;

use anyhow::{bail, Context, Result};
use clap::Parser;
use display_bus::{DisplayBus, FileStore, StoreBackend};
use marquee_api::RegistrationClient;
use marquee_core::SessionRole;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;
use crate::config::Config;
use crate::platform::{
    ConfiguredScreens, HostProbe, LogRenderer, ProcessSpawner, UnmanagedIdentity,
};
use crate::screens::ScreenTopologyMonitor;
use crate::session::{watch_host_setting, SessionContext, SessionCoordinator};
use crate::settings::{Settings, KEY_INVENUE_HOST};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(host) = cli.host {
        config.invenue_host = Some(host);
    }
    if let Some(device_id) = cli.device_id {
        config.device_id_override = Some(device_id);
    }
    if let Some(store_dir) = cli.store_dir {
        config.store_dir = store_dir;
    }

    let role = SessionRole::from_launch(cli.slot, cli.unallocated);

    let store: Arc<dyn StoreBackend> = Arc::new(
        FileStore::open(&config.store_dir)
            .with_context(|| format!("opening shared store at {}", config.store_dir.display()))?,
    );
    let bus = DisplayBus::new(store);
    let settings = Settings::load(bus.clone());

    let host = config
        .invenue_host
        .clone()
        .or_else(|| settings.get_str(KEY_INVENUE_HOST));
    let host = match host {
        Some(host) => host,
        // The unallocated screen never talks to the service.
        None if role == SessionRole::Unallocated => String::new(),
        None => bail!("no venue host configured; pass --host or set MARQUEE_HOST"),
    };
    info!(
        target: "marquee",
        %host,
        ?role,
        instance = %bus.instance_id(),
        "starting marquee"
    );

    let client = Arc::new(RegistrationClient::new(
        host,
        config.device_id_override.clone().unwrap_or_default(),
    ));
    watch_host_setting(&settings, client.clone());

    let screens = ScreenTopologyMonitor::new(Arc::new(ConfiguredScreens::from_config(&config)));
    let probe = Arc::new(HostProbe::new(config.fallback_screen));
    let spawner = Arc::new(ProcessSpawner::new(config.clone()));
    let resume = Arc::new(Notify::new());
    spawn_resume_listener(resume.clone());

    let ctx = Arc::new(SessionContext {
        config,
        bus,
        client,
        renderer: Arc::new(LogRenderer),
        probe,
        identity_provider: Arc::new(UnmanagedIdentity),
        screens,
        spawner,
        settings,
        resume,
    });

    SessionCoordinator::new(role, ctx).run().await;
    Ok(())
}

/// SIGUSR1 stands in for the host's "instance became active" hook and
/// requests an immediate out-of-band poll.
#[cfg(unix)]
fn spawn_resume_listener(resume: Arc<Notify>) {
    use tokio::signal::unix::{signal, SignalKind};
    tokio::spawn(async move {
        let Ok(mut stream) = signal(SignalKind::user_defined1()) else {
            return;
        };
        while stream.recv().await.is_some() {
            info!(target: "marquee", "resume signal received");
            resume.notify_one();
        }
    });
}

#[cfg(not(unix))]
fn spawn_resume_listener(_resume: Arc<Notify>) {}
