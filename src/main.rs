mod classify;
mod config;
mod core;
mod enrich;
mod fusion;
mod market;
mod orchestrator;
mod pipeline;
mod prompt;
mod report;
mod signal;

use crate::config::config::AppCfg;
use crate::core::types::EventReference;
use crate::enrich::news::NewsSummaryProvider;
use crate::enrich::sentiment::WorldSentimentProvider;
use crate::enrich::ContextProvider;
use crate::fusion::engine::FusionEngine;
use crate::market::gamma::{GammaEventSource, GammaMarketSource};
use crate::market::gateway::{ClobProbe, MarketGateway};
use crate::market::scrape::PageScrapeSource;
use crate::orchestrator::assistant::AssistantChain;
use crate::orchestrator::client::HttpModelClient;
use crate::orchestrator::orchestrator::ModelOrchestrator;
use crate::orchestrator::registry::ModelRegistry;
use crate::pipeline::coordinator::Pipeline;
use crate::report::formatter::format_prediction;
use crate::report::sink::{JsonlSink, LogSink};
use anyhow::{Context, Result};
use reqwest::Client;
use std::sync::Arc;
use tracing::{error, info, warn};

fn parse_args() -> Option<EventReference> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        return None;
    }
    let joined = args.join(" ");
    if joined.starts_with("http://") || joined.starts_with("https://") {
        Some(EventReference::MarketUrl(joined))
    } else {
        Some(EventReference::FreeText(joined))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .json()
        .with_max_level(tracing::Level::INFO)
        .with_current_span(false)
        .init();
    dotenv::dotenv().ok();

    // Prometheus exporter for orchestration and pipeline counters.
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    let handle = builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    tokio::spawn(async move {
        let app = axum::Router::new().route(
            "/metrics",
            axum::routing::get(move || {
                let handle = handle.clone();
                async move { handle.render() }
            }),
        );
        match tokio::net::TcpListener::bind("0.0.0.0:9000").await {
            Ok(listener) => {
                info!("Metrics endpoint listening on 0.0.0.0:9000/metrics");
                if let Err(e) = axum::serve(listener, app).await {
                    error!(?e, "metrics server exited");
                }
            }
            Err(e) => warn!(?e, "metrics port unavailable, continuing without exporter"),
        }
    });

    let cfg = AppCfg::load("config.yml")
        .map_err(|e| crate::core::error::PredictError::Config(format!("{:#}", e)))?;

    let Some(reference) = parse_args() else {
        anyhow::bail!("usage: polyfuse <event question or polymarket url>");
    };

    info!("Initializing HTTP client");
    let client = Client::builder()
        .use_rustls_tls()
        .user_agent(cfg.http.user_agent.clone())
        .pool_idle_timeout(cfg.http.pool_idle_timeout)
        .pool_max_idle_per_host(cfg.http.pool_max_idle_per_host)
        .tcp_keepalive(cfg.http.tcp_keep_alive)
        .timeout(cfg.http.timeout)
        .build()
        .context("building http client")?;

    info!("Loading model registry");
    let registry = Arc::new(ModelRegistry::from_cfg(&cfg.models)?);
    anyhow::ensure!(!registry.is_empty(), "no enabled models configured");

    let model_client = Arc::new(HttpModelClient::new(client.clone()));
    let orchestrator = Arc::new(ModelOrchestrator::new(
        Arc::clone(&registry),
        model_client.clone(),
        cfg.timeouts.model_call,
        cfg.limits.model_concurrency,
    ));
    let fusion = Arc::new(FusionEngine::new(Arc::clone(&registry), cfg.fusion.clone()));

    let gateway = MarketGateway::new(
        vec![
            Arc::new(GammaEventSource::new(cfg.polymarket.clone(), client.clone())),
            Arc::new(GammaMarketSource::new(cfg.polymarket.clone(), client.clone())),
            Arc::new(PageScrapeSource::new(cfg.polymarket.clone(), client.clone())),
        ],
        Arc::new(ClobProbe::new(cfg.polymarket.clone(), client.clone())),
        cfg.timeouts.clone(),
        cfg.limits.clone(),
    );

    // Optional enrichment sidecars; the core path is identical with or
    // without them.
    let mut providers: Vec<Arc<dyn ContextProvider>> = Vec::new();
    if cfg.enrichment.world_sentiment {
        providers.push(Arc::new(WorldSentimentProvider::new(&cfg.enrichment.cache_dir)));
    }
    if cfg.enrichment.news && cfg.enrichment.assistant {
        let chain = AssistantChain::new(cfg.assistant.clone(), model_client);
        providers.push(Arc::new(NewsSummaryProvider::new(
            chain,
            &cfg.enrichment.cache_dir,
        )));
    }

    let pipeline = Pipeline::new(
        gateway,
        orchestrator,
        fusion,
        providers,
        cfg.trade.clone(),
        cfg.timeouts.clone(),
        cfg.limits.clone(),
        cfg.mock_on_resolution_failure,
    );
    let sink = JsonlSink::from_cfg(&cfg.report);

    info!(reference = reference.raw(), "Starting prediction");

    let prediction = tokio::select! {
        result = pipeline.predict(&reference) => result?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Ctrl-C received, aborting prediction");
            return Ok(());
        }
    };

    println!("{}", format_prediction(&prediction));

    if let Err(e) = sink.record(&prediction).await {
        error!(?e, "failed to record prediction");
    }

    info!("Done");
    Ok(())
}
