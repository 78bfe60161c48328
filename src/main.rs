use rpki_history_lib::cli::{self, Command};
use rpki_history_lib::config::Config;
use rpki_history_lib::db::{build_db_pool, run_migrations};
use rpki_history_lib::feed::{JsonFileFeed, VrpFeed};
use rpki_history_lib::ingest::ReconciliationEngine;
use rpki_history_lib::query::QueryEngine;
use rpki_history_lib::server::monitoring::{IngestMetrics, INGEST_METRICS};
use rpki_history_lib::server::setup_server;
use rpki_history_lib::state::AppState;
use rpki_history_lib::store::{IntervalStore, PgStore};
use rpki_history_lib::vrp::FeedPayload;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use dotenv::dotenv;
use log::info;
use prometheus_client::registry::Registry;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

fn parse_dump_timestamp(raw: &str) -> DateTime<Utc> {
    let naive = NaiveDateTime::parse_from_str(raw, "%Y%m%dT%H%M%S")
        .expect("Timestamp has to be in YYYYmmddTHHMMSS format");
    Utc.from_utc_datetime(&naive)
}

async fn update(store: Arc<dyn IntervalStore>, feed_path: &str, timestamp: Option<String>) {
    let feed = JsonFileFeed::new(feed_path);
    let payload = match &timestamp {
        Some(raw) => feed
            .fetch_at(parse_dump_timestamp(raw))
            .await
            .expect("Failed to fetch feed payload"),
        None => match feed.fetch_latest().await.expect("Failed to fetch feed payload") {
            Some(payload) => payload,
            None => {
                info!("No new data available.");
                return;
            }
        },
    };

    // Skip snapshots we already ingested, unless one was requested explicitly.
    if timestamp.is_none() {
        if let FeedPayload::Snapshot(observation) = &payload {
            let latest = store
                .dump_time_range()
                .await
                .expect("Failed to read dump time range")
                .map(|(_, latest)| latest);
            if latest.is_some_and(|latest| observation.dump_time <= latest) {
                info!("No new data available.");
                return;
            }
        }
    }

    let engine = ReconciliationEngine::new(store);
    let start_time = Instant::now();
    engine.run(payload).await.expect("Reconciliation run failed");
    info!("Reconciliation time elapsed: {:?}", start_time.elapsed());
}

async fn serve(store: Arc<dyn IntervalStore>, listen_addr: &str, page_size: i64) {
    let mut registry = Registry::default();
    let metrics = IngestMetrics::register(&mut registry);
    INGEST_METRICS.set(metrics).ok();

    let shutdown_token = CancellationToken::new();
    let state = Arc::new(AppState::new(
        QueryEngine::new(store),
        registry,
        shutdown_token.clone(),
        page_size,
    ));

    let addr: SocketAddr = listen_addr.parse().expect("Invalid LISTEN_ADDR");
    let server_handle = setup_server(state, addr).await;
    info!("Serving on {}", addr);

    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to register SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("Failed to register SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => {
            info!("SIGTERM received, shutting down.");
        }
        _ = sigint.recv() => {
            info!("SIGINT received, shutting down.");
        }
    }

    shutdown_token.cancel();
    server_handle.await.unwrap();
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    env_logger::init();
    info!("Starting rpki-history");

    let config = Config::from_env().expect("Config incorrectly specified");
    let args = cli::parse_args();

    match args.command {
        Command::Init => {
            run_migrations(&config.db_url)
                .await
                .expect("Database initialization failed");
            info!("Database initialized");
        }
        Command::Update { timestamp } => {
            let pool = build_db_pool(&config.db_url)
                .await
                .expect("Could not establish connection!");
            let store: Arc<dyn IntervalStore> = Arc::new(PgStore::new(pool));
            update(store, &config.feed_path, timestamp).await;
        }
        Command::Serve => {
            let pool = build_db_pool(&config.db_url)
                .await
                .expect("Could not establish connection!");
            let store: Arc<dyn IntervalStore> = Arc::new(PgStore::new(pool));
            serve(store, &config.listen_addr, config.page_size).await;
        }
    }
}
