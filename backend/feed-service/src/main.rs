use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use feed_core::clients::{
    AppViewClient, ClustererClient, EmbedderClient, IdentityClient, KeywordExtractorClient,
    VectorIndexClient,
};
use feed_core::db::batch_repo::BatchRepo;
use feed_core::db::fatigue_repo::FatigueRepo;
use feed_core::db::feedback_repo::FeedbackRepo;
use feed_core::db::graph_repo::GraphRepo;
use feed_core::db::keyword_repo::KeywordRepo;
use feed_core::db::meta_repo::MetaRepo;
use feed_core::db::post_repo::PostRepo;
use feed_core::db::serving_repo::ServingRepo;
use feed_core::db::taste_repo::TasteRepo;
use feed_core::db::MIGRATOR;
use feed_core::fatigue::FatigueEngine;
use feed_core::graph::GraphService;
use feed_core::keywords::KeywordEngine;
use feed_core::taste::TasteEngine;

use feed_service::config::Config;
use feed_service::handlers::{
    describe_feed_generator, did_document, get_feed_skeleton, health, send_interactions, ApiState,
};
use feed_service::jobs;
use feed_service::jobs::scheduler::scheduler_channel;
use feed_service::metrics::serve_metrics;
use feed_service::services::feedback::FeedbackService;
use feed_service::services::fusion::FusionService;
use feed_service::services::ranking::Ranker;
use feed_service::services::semantic::SemanticPipeline;

/// Embedder batch size, per the embedder CLI contract.
const EMBED_BATCH_SIZE: usize = 32;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("ERROR: Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };
    info!("Starting feed-service v{}", env!("CARGO_PKG_VERSION"));
    if config.feed.whitelist.is_empty() {
        warn!("FEEDGEN_WHITELIST is empty; every request will be rejected");
    }

    let db_cfg = db_pool::DbConfig::for_service("feed-service");
    let pool = match db_pool::create_pool(db_cfg).await {
        Ok(pool) => pool,
        Err(e) => {
            error!("Database pool creation failed: {e:#}");
            std::process::exit(1);
        }
    };
    if let Err(e) = db_pool::run_migrations(&pool, &MIGRATOR).await {
        error!("Migrations failed: {e:#}");
        std::process::exit(1);
    }

    // External collaborators.
    let appview = AppViewClient::new(config.external.appview_url.clone())
        .expect("appview client construction");
    let identity = config
        .external
        .identity_resolver_url
        .clone()
        .and_then(|url| IdentityClient::new(url).ok());
    let vector = VectorIndexClient::new(config.external.vector_index_url.clone())
        .expect("vector client construction");
    if let Err(e) = vector.ensure_collections().await {
        warn!(error = %e, "Vector index unavailable at startup; semantic features degraded");
    }
    let embedder = EmbedderClient::new(
        config.external.embedder_bin.clone(),
        config.external.embedder_model_path.clone(),
        EMBED_BATCH_SIZE,
    );
    let clusterer = ClustererClient::new(config.external.clusterer_bin.clone());
    let extractor = KeywordExtractorClient::new(config.external.keyword_extractor_bin.clone());

    // Repositories and engines.
    let post_repo = PostRepo::new(pool.clone());
    let graph_repo = GraphRepo::new(pool.clone());
    let taste_repo = TasteRepo::new(pool.clone());
    let fatigue_repo = FatigueRepo::new(pool.clone());
    let keyword_repo = KeywordRepo::new(pool.clone());
    let serving_repo = ServingRepo::new(pool.clone());
    let batch_repo = BatchRepo::new(pool.clone());
    let feedback_repo = FeedbackRepo::new(pool.clone());
    let meta_repo = MetaRepo::new(pool.clone());

    let graph = GraphService::new(graph_repo.clone(), meta_repo.clone(), appview.clone());
    let taste = TasteEngine::new(taste_repo.clone(), graph.clone());
    let fatigue_engine = FatigueEngine::new(fatigue_repo.clone());
    let keyword_engine = KeywordEngine::new(
        keyword_repo.clone(),
        post_repo.clone(),
        extractor,
        config.feed.restricted_keywords.clone(),
    );

    let ranker = Ranker::new(
        post_repo.clone(),
        graph_repo.clone(),
        taste_repo.clone(),
        fatigue_repo.clone(),
        keyword_repo.clone(),
        serving_repo.clone(),
        fatigue_engine.clone(),
        appview.clone(),
    );

    let pipeline = Arc::new(SemanticPipeline::new(
        ranker.clone(),
        graph_repo.clone(),
        taste_repo.clone(),
        serving_repo.clone(),
        batch_repo.clone(),
        feedback_repo.clone(),
        appview.clone(),
        vector,
        embedder,
        clusterer,
    ));

    let (scheduler, scheduler_rx) = scheduler_channel();
    let users: Vec<String> = config.feed.whitelist.iter().cloned().collect();

    // Background jobs, one instance each.
    tokio::spawn(jobs::scheduler::run_semantic_scheduler(
        pipeline,
        users.clone(),
        scheduler_rx,
    ));
    tokio::spawn(jobs::graph_refresh::run_graph_refresh(
        graph.clone(),
        users.clone(),
    ));
    tokio::spawn(jobs::keyword_refresh::run_keyword_refresh(
        keyword_engine.clone(),
        users,
    ));
    tokio::spawn(jobs::gc::run_gc(
        post_repo.clone(),
        serving_repo.clone(),
        batch_repo.clone(),
    ));
    info!("Background jobs started");

    let fusion = FusionService::new(
        ranker,
        batch_repo,
        graph_repo,
        serving_repo.clone(),
        post_repo.clone(),
        fatigue_engine.clone(),
        scheduler,
    );
    let feedback = FeedbackService::new(
        post_repo.clone(),
        feedback_repo,
        fatigue_engine.clone(),
        keyword_engine,
        taste,
        graph,
    );

    let state = web::Data::new(ApiState {
        feed: config.feed.clone(),
        fusion,
        feedback,
        serving_repo,
        fatigue_engine,
        post_repo,
        identity,
        pool: pool.clone(),
    });

    let bind_addr = (config.app.host.clone(), config.app.port);
    info!(host = %config.app.host, port = config.app.port, "HTTP server listening");

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .service(get_feed_skeleton)
            .service(send_interactions)
            .service(describe_feed_generator)
            .service(did_document)
            .service(health)
            .route("/metrics", web::get().to(serve_metrics))
    })
    .bind(bind_addr)?
    .run()
    .await
}
