//! Relay Node: write pipeline, chain sync engine, heartbeat loop, and the
//! relay HTTP surface, wired together the way `ubl-server::main` wires its
//! Postgres pool, policy registry, and router into one `AppState`.

mod config;
mod directory_client;
mod error;
mod fsutil;
mod heartbeat;
mod http;
mod identity;
mod pipeline;
mod state;
mod sync;

use std::sync::Arc;

use letter_ledger::{ChainStore, PendingQueue};
use tokio::sync::Mutex;
use tracing::info;

use config::{Intervals, RelayConfig};
use directory_client::DirectoryClient;
use heartbeat::Reporter;
use identity::RelayIdentity;
use pipeline::WorkerDeps;
use state::RelayState;
use sync::SyncEngine;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("relay_node=info".parse().unwrap()),
        )
        .init();

    let root = config::default_root();
    std::fs::create_dir_all(&root)?;

    let config_path = root.join("config.json");
    let mut config = RelayConfig::load_or_default(&config_path)?;
    let identity = RelayIdentity::load_or_create(&root.join("identity.json"))?;
    let intervals = Intervals::resolve(&config);

    let chain_store = ChainStore::new(root.join("chains"));
    let legacy_chain_path = root.join("blocks.json");
    let ledger = match config.active_genesis_hash.clone() {
        Some(hash) => chain_store.open(&hash)?,
        None if legacy_chain_path.exists() => {
            let genesis_hash = chain_store.migrate_legacy(&legacy_chain_path)?;
            info!(genesis = %genesis_hash, "migrated legacy blocks.json into its genesis subdirectory");
            config.active_genesis_hash = Some(genesis_hash.clone());
            config.save(&config_path)?;
            chain_store.open(&genesis_hash)?
        }
        None => {
            let (ledger, genesis_hash) = chain_store.bootstrap()?;
            config.active_genesis_hash = Some(genesis_hash);
            config.save(&config_path)?;
            ledger
        }
    };
    info!(genesis = ?ledger.genesis_hash(), blocks = ledger.blocks().len(), "chain loaded");

    let ledger = Arc::new(Mutex::new(ledger));
    let queue = PendingQueue::load_or_init(root.join("pending.json"))?;
    let directory = Arc::new(DirectoryClient::new(config.directory_url.clone()));
    let config_cell = Arc::new(Mutex::new(config.clone()));

    let sync_engine = Arc::new(SyncEngine::new(
        config.onion.clone(),
        Arc::clone(&ledger),
        chain_store.clone(),
        Arc::clone(&directory),
    ));

    let reporter = Arc::new(Reporter::new(
        Arc::clone(&config_cell),
        config_path.clone(),
        identity.clone(),
        Arc::clone(&ledger),
        chain_store.clone(),
        Arc::clone(&directory),
    ));

    let pipeline = pipeline::spawn(
        queue,
        WorkerDeps {
            ledger: Arc::clone(&ledger),
            sync_engine: Arc::clone(&sync_engine),
            reporter: Arc::clone(&reporter),
        },
    );
    sync_engine.attach_pipeline(pipeline.clone());

    {
        let sync_engine = Arc::clone(&sync_engine);
        let interval = std::time::Duration::from_millis(intervals.sync_ms);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                sync_engine.run_timer_tick().await;
            }
        });
    }
    {
        let reporter = Arc::clone(&reporter);
        let interval = std::time::Duration::from_millis(intervals.report_ms);
        tokio::spawn(reporter.run_timer(interval));
    }

    let state = Arc::new(RelayState {
        config: config_cell,
        config_path,
        identity,
        chain_store,
        ledger,
        pipeline,
        sync_engine,
        reporter,
        directory,
    });

    let app = http::router(state);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %config.bind_addr, "relay node listening");
    axum::serve(listener, app).await?;

    Ok(())
}
