//! # Muster Daemon
//!
//! `musterd` runs the collective listener: it loads the service
//! configuration, builds the plugin registry and dispatch core, and
//! accepts peer dispatch connections on the collective port.
//!
//! ```bash
//! musterd --config /etc/muster/config.toml
//! musterd --config config.toml --log-level debug
//! ```
//!
//! The HTTP/socket front-end is a separate service; it drives the same
//! [`muster_core::Core`] this binary constructs.

use clap::Parser;
use muster_core::{
    CollectiveConfig, CollectiveServer, Config, Core, MemoryConfigManager, TlsIdentity,
};
use muster_plugin_sdk::{CollectiveMember, PluginRegistry};
use std::sync::Arc;
use std::time::Duration;

/// Command line arguments for the muster daemon.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Logging filter; overrides the configured level.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::load(&args.config)?;
    let log_level = args
        .log_level
        .unwrap_or_else(|| config.logging.level.clone());
    tracing_subscriber::fmt().with_env_filter(log_level).init();

    let Some(collective) = config.collective.clone() else {
        anyhow::bail!("A [collective] section is required to run the listener");
    };

    // Seed the attribute store with the configured trust registry
    let store = Arc::new(MemoryConfigManager::new());
    for member in &collective.members {
        store.add_collective_member(CollectiveMember {
            name: member.name.clone(),
            address: member.address.clone(),
            fingerprint: member.fingerprint.clone(),
        });
    }

    let registry = PluginRegistry::builder()
        .register(Arc::new(muster_core::plugins::AttributesPlugin))
        .build();

    let identity = Arc::new(TlsIdentity::load(&collective.certificate, &collective.key)?);
    tracing::info!(
        member = %collective.name,
        fingerprint = %identity.fingerprint(),
        "loaded collective identity"
    );

    let core = Core::builder(store)
        .with_registry(registry)
        .with_collective(
            CollectiveConfig::new(collective.name.clone(), identity)
                .with_port(collective.port)
                .with_idle_timeout(Duration::from_secs(collective.idle_timeout_secs)),
        )
        .build();

    let addr = format!("{}:{}", collective.bind, collective.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "collective listener started");

    let server = CollectiveServer::new(core)?;
    server.serve(listener).await?;

    Ok(())
}
