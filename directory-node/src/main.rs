//! Directory Authority: relay registry, reachability poller, broadcast
//! fan-out, and the directory HTTP surface — wired the way
//! `ubl-server::main` wires its pool and router into one `AppState`.

mod broadcast;
mod config;
mod http;
mod poller;
mod state;

use std::net::SocketAddr;

use letter_registry::Registry;
use tracing::info;

use config::PollerConfig;
use state::DirectoryState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("directory_node=info".parse().unwrap()),
        )
        .init();

    let root = config::default_root();
    std::fs::create_dir_all(&root)?;

    let registry = Registry::load_or_init(state::state_path(&root))?;
    info!(relays = registry.relays().count(), "directory registry loaded");

    let directory_state = DirectoryState::new(registry);

    let poller_config = PollerConfig::resolve();
    tokio::spawn(poller::run(
        std::sync::Arc::clone(&directory_state),
        poller_config.interval,
        poller_config.timeout,
    ));

    let http_client = reqwest::Client::builder()
        .build()
        .expect("reqwest client builds with default settings");

    let app = http::router(directory_state, http_client);
    let bind_addr = config::default_bind_addr();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "directory node listening");
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}
