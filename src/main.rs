//! OMEN - Signal Intelligence Engine
//! Converts heterogeneous real-world events into audited, decision-grade
//! signals. No risk decisions, no recommendations.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use omen_backend::api::{build_router, AppState};
use omen_backend::background::BackgroundGenerator;
use omen_backend::config::OmenConfig;
use omen_backend::domain::attestation::SourceType;
use omen_backend::gate::{LiveGateService, SourceRegistry};
use omen_backend::observability::{ActivityLog, MetricsCollector, RejectionTracker};
use omen_backend::persistence::{
    InMemorySignalRepository, ReconcileStateStore, SignalHistoryStore, SignalLedger,
};
use omen_backend::pipeline::{OmenPipeline, SignalValidator};
use omen_backend::publish::{ConsolePublisher, OutputPublisher, WebhookPublisher};
use omen_backend::reconcile::{LocalDownstream, ReconcileJob};
use omen_backend::rules::{
    AnomalyConfig, AnomalyDetectionRule, GeographicRelevanceRule, LiquidityValidationRule,
    SemanticRelevanceRule, ValidationRule,
};
use omen_backend::sources::scenario::{
    ScenarioAisProvider, ScenarioCommodityProvider, ScenarioConfig, ScenarioFreightProvider,
    ScenarioMarketProvider, ScenarioNewsProvider, ScenarioWeatherProvider,
};
use omen_backend::sources::{
    AisSource, CommoditySource, FreightSource, MarketSource, NewsSource, SignalSource,
    WeatherSource,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "omen_backend=info,omen=info,tower_http=warn".into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = OmenConfig::from_env();
    info!(
        port = config.port,
        ruleset = %config.ruleset_version,
        allow_live = config.allow_live_mode,
        "starting OMEN"
    );

    // Observability
    let metrics = Arc::new(MetricsCollector::new());
    let activity = Arc::new(ActivityLog::default());
    let rejections = Arc::new(RejectionTracker::default());

    // Provenance
    let registry = Arc::new(SourceRegistry::new());
    let gate = Arc::new(LiveGateService::new(
        config.gate_config(),
        registry.clone(),
        activity.clone(),
    ));

    // Persistence
    let repository = Arc::new(InMemorySignalRepository::new());
    let ledger = Arc::new(
        SignalLedger::new(&config.ledger_base_path, config.ledger.clone())
            .context("open signal ledger")?,
    );
    let history = Arc::new(
        SignalHistoryStore::open(&config.history_db).context("open history store")?,
    );

    // Sources. The demo deployment runs entirely on deterministic scenario
    // providers registered as MOCK; swapping in live providers flips the
    // registry to REAL and feeds the live gate.
    let scenario = ScenarioConfig::new(Utc::now().timestamp() as u64, Utc::now());
    let sources: Vec<Arc<dyn SignalSource>> = vec![
        Arc::new(MarketSource::new(
            "polymarket",
            SourceType::Mock,
            Arc::new(ScenarioMarketProvider::new(scenario.clone())),
            registry.clone(),
            metrics.clone(),
        )),
        Arc::new(NewsSource::new(
            "news",
            SourceType::Mock,
            Arc::new(ScenarioNewsProvider::new(scenario.clone())),
            registry.clone(),
            metrics.clone(),
        )),
        Arc::new(CommoditySource::new(
            "commodity",
            SourceType::Mock,
            Arc::new(ScenarioCommodityProvider::new(scenario.clone())),
            registry.clone(),
            metrics.clone(),
        )),
        Arc::new(AisSource::new(
            "ais",
            SourceType::Mock,
            Arc::new(ScenarioAisProvider::new(scenario.clone())),
            registry.clone(),
            metrics.clone(),
        )),
        Arc::new(FreightSource::new(
            "freight",
            SourceType::Mock,
            Arc::new(ScenarioFreightProvider::new(scenario.clone())),
            registry.clone(),
            metrics.clone(),
        )),
        Arc::new(WeatherSource::new(
            "weather",
            SourceType::Mock,
            Arc::new(ScenarioWeatherProvider::new(scenario)),
            registry.clone(),
            metrics.clone(),
        )),
    ];

    // Pipeline
    let rules: Vec<Box<dyn ValidationRule>> = vec![
        Box::new(LiquidityValidationRule::new(config.min_liquidity_usd)),
        Box::new(AnomalyDetectionRule::new(AnomalyConfig {
            min_volume_for_high_confidence: config.min_volume_usd,
            ..AnomalyConfig::default()
        })),
        Box::new(SemanticRelevanceRule),
        Box::new(GeographicRelevanceRule::default()),
    ];
    let publisher: Arc<dyn OutputPublisher> = match &config.webhook_url {
        Some(url) => Arc::new(WebhookPublisher::new(
            url.clone(),
            config.webhook_secret.clone(),
        )),
        None => Arc::new(ConsolePublisher),
    };
    let pipeline = Arc::new(
        OmenPipeline::new(
            SignalValidator::new(rules, false),
            repository.clone(),
            registry.clone(),
            gate.clone(),
            metrics.clone(),
            activity.clone(),
            rejections.clone(),
            config.pipeline_config(),
        )
        .with_publisher(publisher)
        .with_ledger(ledger.clone())
        .with_history(history),
    );

    // Streaming + background generation
    let (broadcast_tx, _) = broadcast::channel(256);
    let generator = Arc::new(BackgroundGenerator::new(
        sources.clone(),
        pipeline.clone(),
        config.signal_poll_interval,
        broadcast_tx.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    {
        let generator = generator.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            generator.run(shutdown).await;
        });
    }

    // Reconcile scheduler against the local idempotency store.
    {
        let reconcile_state = Arc::new(
            ReconcileStateStore::open(&config.reconcile_state_db)
                .context("open reconcile state store")?,
        );
        let job = ReconcileJob::new(
            ledger.clone(),
            reconcile_state,
            Arc::new(LocalDownstream::new()),
        );
        let interval = config.reconcile_interval;
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            job.run_periodic(interval, shutdown).await;
        });
    }

    // Ledger maintenance (seal, compress, archive) on a slow cadence.
    {
        let ledger = ledger.clone();
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(3600));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = ledger.maintain(Utc::now()) {
                            warn!(error = %e, "ledger maintenance failed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        });
    }

    let state = AppState {
        pipeline,
        repository,
        sources,
        registry,
        gate,
        metrics,
        activity,
        rejections,
        generator,
        broadcast_tx,
    };
    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!(%addr, "OMEN API listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    })
    .await
    .context("serve")?;

    Ok(())
}
