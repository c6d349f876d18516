use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use feed_core::clients::AppViewClient;
use feed_core::db::fatigue_repo::FatigueRepo;
use feed_core::db::graph_repo::GraphRepo;
use feed_core::db::meta_repo::MetaRepo;
use feed_core::db::post_repo::PostRepo;
use feed_core::db::taste_repo::TasteRepo;
use feed_core::db::MIGRATOR;
use feed_core::fatigue::FatigueEngine;
use feed_core::graph::GraphService;
use feed_core::taste::TasteEngine;

use ingest_service::batcher::WriteBatcher;
use ingest_service::config::IngestConfig;
use ingest_service::firehose::Firehose;
use ingest_service::tracked::{run_refresher, TrackedSets};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let config = match IngestConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("ERROR: Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };
    info!("Starting ingest-service v{}", env!("CARGO_PKG_VERSION"));

    let db_cfg = db_pool::DbConfig::for_service("ingest-service");
    let pool = match db_pool::create_pool(db_cfg).await {
        Ok(pool) => pool,
        Err(e) => {
            error!("Database pool creation failed: {e:#}");
            std::process::exit(1);
        }
    };
    db_pool::run_migrations(&pool, &MIGRATOR).await?;

    let appview_url =
        std::env::var("APPVIEW_URL").unwrap_or_else(|_| "https://api.bsky.app".to_string());
    let appview = AppViewClient::new(appview_url)?;

    let post_repo = PostRepo::new(pool.clone());
    let graph_repo = GraphRepo::new(pool.clone());
    let taste_repo = TasteRepo::new(pool.clone());
    let fatigue_repo = FatigueRepo::new(pool.clone());
    let meta_repo = MetaRepo::new(pool.clone());

    let graph = GraphService::new(graph_repo.clone(), meta_repo.clone(), appview);
    let taste = TasteEngine::new(taste_repo.clone(), graph);
    let fatigue = FatigueEngine::new(fatigue_repo);

    let tracked = TrackedSets::new(config.whitelist.clone());
    tracked
        .refresh(
            &graph_repo,
            &taste_repo,
            &config.whitelist,
            config.twin_tracking_min_reputation,
        )
        .await;
    tokio::spawn(run_refresher(
        tracked.clone(),
        graph_repo.clone(),
        taste_repo.clone(),
        config.whitelist.clone(),
        config.twin_tracking_min_reputation,
        config.tracked_refresh_secs,
    ));

    let batcher = WriteBatcher::new(pool.clone(), config.service_name.clone());

    // Timer-driven flush task; the only writer to the store.
    let flush_batcher = batcher.clone();
    let flush_interval = config.flush_interval_secs;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(flush_interval));
        loop {
            interval.tick().await;
            if let Err(e) = flush_batcher.flush().await {
                error!(error = %e, "Periodic flush failed");
            }
        }
    });

    let firehose = Arc::new(Firehose::new(
        config,
        batcher.clone(),
        tracked,
        taste,
        fatigue,
        graph_repo,
        post_repo,
        meta_repo,
    ));

    let consumer = {
        let firehose = firehose.clone();
        tokio::spawn(async move { firehose.run().await })
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, running final flush");
        }
        _ = consumer => {
            error!("Consumer task exited unexpectedly");
        }
    }

    if let Err(e) = batcher.flush().await {
        error!(error = %e, "Final flush failed");
    }
    info!("ingest-service stopped");
    Ok(())
}
