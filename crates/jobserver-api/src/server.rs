use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::http::{HeaderValue, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::Router;
use jobserver_core::{Config, JobManager, JobManagerConfig, Journal, PoolRegistry, Result};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::routes::job_routes;
use crate::state::AppState;

static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(0);

pub async fn run(config: Config) -> Result<()> {
    let addr = SocketAddr::from((
        config.server.host.parse::<std::net::IpAddr>().map_err(|e| jobserver_core::Error::Config(format!("invalid host: {e}")))?,
        config.server.port,
    ));

    let app_state = create_app_state(&config).await?;
    let app = build_router(app_state);

    info!("job server listening on http://{}", addr);
    log_routes(&config);

    let listener = tokio::net::TcpListener::bind(addr).await.map_err(jobserver_core::Error::Io)?;
    axum::serve(listener, app).await.map_err(jobserver_core::Error::Io)?;

    Ok(())
}

async fn create_app_state(config: &Config) -> Result<AppState> {
    let journal = Arc::new(Journal::open(&config.jobs.journal_path)?);
    let pools = Arc::new(PoolRegistry::new());
    for (name, workers, depth) in config.startup_pools() {
        pools.init_pool(&name, workers, depth).await;
    }

    let manager_config = JobManagerConfig {
        queue_depth: config.jobs.queue_depth,
        max_total: config.jobs.max_total,
        timeouts: config.jobs.timeouts.clone(),
        default_timeout_ms: config.jobs.default_timeout_ms,
    };
    let manager = JobManager::new(manager_config, pools, journal);
    manager.rehydrate().await?;

    Ok(AppState::new(manager))
}

fn build_router(app_state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .merge(job_routes())
        .layer(middleware::from_fn(transport_headers))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

/// Transport-layer headers the spec requires on every response (§6):
/// `X-Request-Id`, `X-Worker-Pid`, `Content-Length`, `Connection: close`.
/// `X-Worker-Id` is stamped inside the Worker Pool, not here (§9 design note).
async fn transport_headers(request: Request<axum::body::Body>, next: Next) -> Response {
    let request_id = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert("X-Request-Id", HeaderValue::from_str(&request_id.to_string()).unwrap());
    headers.insert("X-Worker-Pid", HeaderValue::from_str(&std::process::id().to_string()).unwrap());
    headers.insert("Connection", HeaderValue::from_static("close"));
    response
}

fn log_routes(config: &Config) {
    info!("available routes (http://localhost:{}):", config.server.port);
    info!("  GET /jobs/submit?task=..&priority=..   - submit a job");
    info!("  GET /jobs/status?id=..                 - job status");
    info!("  GET /jobs/result?id=..                 - job result");
    info!("  GET /jobs/cancel?id=..                 - cancel a job");
    info!("  GET /status                            - pool metrics");
    info!("  GET /health                            - health check");
}
