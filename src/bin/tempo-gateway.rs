use std::sync::Arc;

use tempo_gateway::limiter::BucketStore;
use tempo_gateway::{
    AppState, Clock, GatewayConfig, GeminiClient, MetricsSink, RateLimiter, SystemClock,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let mut listen = "127.0.0.1:8080".to_string();
    let mut json_logs = false;
    let mut otel_enabled = false;
    let mut otel_endpoint: Option<String> = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--listen" | "--addr" => {
                listen = args.next().ok_or("missing value for --listen/--addr")?;
            }
            "--json-logs" => {
                json_logs = true;
            }
            "--otel" => {
                otel_enabled = true;
            }
            "--otel-endpoint" => {
                otel_enabled = true;
                otel_endpoint = Some(args.next().ok_or("missing value for --otel-endpoint")?);
            }
            "--help" | "-h" => {
                println!(
                    "usage: tempo-gateway [--listen HOST:PORT] [--json-logs] [--otel] [--otel-endpoint URL]"
                );
                return Ok(());
            }
            other => return Err(format!("unknown arg: {other}").into()),
        }
    }

    let _otel_guard = init_logging(otel_enabled, otel_endpoint.as_deref(), json_logs)?;

    let config = GatewayConfig::from_env();
    tracing::info!(?config, "starting gateway");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = build_store(&config, clock.clone()).await;
    let limiter = RateLimiter::new(store, clock)
        .with_capacity(config.limiter_capacity)
        .with_refill_per_sec(config.limiter_refill_per_sec)
        .with_fail_open(config.runtime_mode.fail_open());

    let mut metrics = MetricsSink::new(config.cost_alert_threshold_usd);
    if config.metrics_debug {
        metrics = metrics.with_debug_counters();
    }

    let ai_api_key = config.ai_api_key.clone();
    let mut state = AppState::new(config, limiter, metrics);
    match ai_api_key {
        Some(key) => {
            state = state.with_backend(Arc::new(GeminiClient::new(key)));
        }
        None => {
            tracing::warn!("no AI credential configured; assistant endpoints will return 500");
        }
    }

    let app = tempo_gateway::router(state);
    let listener = tokio::net::TcpListener::bind(&listen).await?;
    println!("tempo-gateway listening on {listen}");
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(feature = "store-redis")]
async fn build_store(config: &GatewayConfig, clock: Arc<dyn Clock>) -> Arc<dyn BucketStore> {
    match tempo_gateway::RedisBucketStore::new(config.redis_connection_url()) {
        Ok(store) => {
            if let Err(err) = store.ping().await {
                // Not fatal: the limiter's fail-open/fail-closed policy
                // governs behavior while the store is down.
                tracing::warn!(error = %err, "bucket store unreachable at startup");
            }
            Arc::new(store)
        }
        Err(err) => {
            tracing::error!(error = %err, "invalid bucket store URL, falling back to in-process buckets");
            Arc::new(tempo_gateway::MemoryBucketStore::new(clock))
        }
    }
}

#[cfg(not(feature = "store-redis"))]
async fn build_store(_config: &GatewayConfig, clock: Arc<dyn Clock>) -> Arc<dyn BucketStore> {
    tracing::warn!("built without store-redis; bucket state is per-process only");
    Arc::new(tempo_gateway::MemoryBucketStore::new(clock))
}

fn init_fmt(json_logs: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }
}

#[cfg(feature = "otel")]
fn init_logging(
    otel_enabled: bool,
    endpoint: Option<&str>,
    json_logs: bool,
) -> Result<Option<tempo_gateway::otel::OtelGuard>, Box<dyn std::error::Error>> {
    if otel_enabled {
        return Ok(Some(tempo_gateway::otel::init_tracing(endpoint, json_logs)?));
    }
    init_fmt(json_logs);
    Ok(None)
}

#[cfg(not(feature = "otel"))]
fn init_logging(
    otel_enabled: bool,
    _endpoint: Option<&str>,
    json_logs: bool,
) -> Result<Option<()>, Box<dyn std::error::Error>> {
    if otel_enabled {
        return Err("otel support requires `--features otel`".into());
    }
    init_fmt(json_logs);
    Ok(None)
}
