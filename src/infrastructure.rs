use bollard::Docker;
use std::env;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::db::{self, DbPool};
use crate::queue::{JobQueue, RedisQueue};

/// Every long-lived connection handle, constructed once at startup and
/// injected from here; no lazily-initialized globals.
pub struct Infrastructure {
    pub db_pool: DbPool,
    pub queue: Arc<RedisQueue>,
    pub docker: Docker,
}

pub async fn setup() -> Result<Infrastructure, Box<dyn std::error::Error>> {
    // 1. Initialize DB (with Retry)
    let db_url = env::var("OCELOT_DB").unwrap_or_else(|_| db::DEFAULT_DB_URL.to_string());
    let mut db_retry_attempts = 0;
    let db_pool = loop {
        match db::init_pool(&db_url).await {
            Ok(pool) => break pool,
            Err(e) => {
                db_retry_attempts += 1;
                if db_retry_attempts > 5 {
                    error!("❌ Failed to connect to DB after 5 attempts. Exiting.");
                    return Err(e);
                }
                warn!(
                    "⚠️  DB Connection failed: {}. Retrying in 5s... ({}/5)",
                    e, db_retry_attempts
                );
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            }
        }
    };
    info!("✅ Database connected successfully.");

    // 2. Initialize Redis Queue
    let redis_url = env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    let queue = Arc::new(RedisQueue::new(&redis_url));
    queue.ping().await?;
    info!("Connected to Redis Queue successfully.");

    // Requeue anything a previous process left in the processing list.
    info!("🔎 Checking for stranded jobs in processing queue...");
    match queue.restore_stranded().await {
        Ok(0) => info!("✅ No stranded jobs found."),
        Ok(count) => info!("♻️  Restored {} stranded jobs to the main queue.", count),
        Err(e) => error!("❌ Failed to restore stranded jobs: {}", e),
    }

    // 3. Initialize Docker
    let docker = Docker::connect_with_local_defaults()?;
    docker.ping().await?;
    info!("Connected to Docker engine.");

    Ok(Infrastructure {
        db_pool,
        queue,
        docker,
    })
}
