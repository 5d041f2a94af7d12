// Ocelot v0.1.0 - queued inference dispatch engine

mod api;
mod billing;
mod db;
mod dispatcher;
mod error;
mod extractor;
mod infrastructure;
mod metrics;
mod models;
mod queue;
mod repository;
mod runtime;

use dotenvy::dotenv;
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::queue::JobQueue;
use crate::repository::{Repository, SqliteRepository};
use crate::runtime::{ContainerRuntime, DockerRuntime};

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_CONTAINER_TIMEOUT_SECS: u64 = 3600;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    tracing_subscriber::fmt::init();

    info!(":: Ocelot v0.1.0 ::");

    // 1. Connections: built here once, injected everywhere.
    let infra = infrastructure::setup().await?;

    // 2. Wire the dispatcher.
    let repo: Arc<dyn Repository> = Arc::new(SqliteRepository::new(infra.db_pool.clone()));
    let container_runtime: Arc<dyn ContainerRuntime> =
        Arc::new(DockerRuntime::new(infra.docker.clone()));
    let job_queue: Arc<dyn JobQueue> = infra.queue.clone();

    let wait_timeout = env::var("OCELOT_CONTAINER_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(DEFAULT_CONTAINER_TIMEOUT_SECS);
    let dispatcher = Arc::new(dispatcher::Dispatcher::new(
        job_queue.clone(),
        container_runtime,
        repo,
        Duration::from_secs(wait_timeout),
    ));

    // 3. Register the single queue consumer. Concurrency stays at 1 unless
    //    explicitly raised.
    let concurrency = env::var("OCELOT_CONCURRENCY")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(1);
    let _consumer = queue::register_consumer(job_queue.clone(), concurrency, dispatcher)?;

    // 4. Serve the facade.
    let state = Arc::new(api::AppState {
        db: infra.db_pool,
        queue: job_queue,
    });
    let app = api::create_router(state);

    let port = env::var("OCELOT_PORT")
        .ok()
        .and_then(|v| v.parse::<u16>().ok())
        .unwrap_or(DEFAULT_PORT);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
