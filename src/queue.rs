use async_trait::async_trait;
use redis::AsyncCommands;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::dispatcher::Dispatcher;
use crate::error::QueueError;
use crate::models::{Job, JobData, JobRecord};

/// Records of terminal jobs stick around this long for status polling.
const RECORD_RETENTION_SECS: i64 = 86400;

/// Durable work queue keyed by job id. One registered consumer per instance;
/// enqueueing never blocks on processing.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Append a unit of work and create its poll-able record.
    async fn enqueue(&self, name: &str, data: JobData) -> Result<Job, QueueError>;
    /// Pull the next job, moving it to the processing list (at-least-once).
    /// Returns None when the queue is empty for the poll window.
    async fn dequeue(&self) -> Result<Option<Job>, QueueError>;
    /// Drop the job from the processing list once it reached a terminal state.
    async fn acknowledge(&self, job: &Job) -> Result<(), QueueError>;
    async fn get_job(&self, id: &str) -> Result<JobRecord, QueueError>;
    async fn save(&self, record: &JobRecord) -> Result<(), QueueError>;
    /// Requeue jobs stranded in the processing list by a previous crash.
    async fn restore_stranded(&self) -> Result<usize, QueueError>;
    async fn ping(&self) -> Result<(), QueueError>;
    /// Release backend resources. Safe to call with no consumer registered.
    async fn close(&self) -> Result<(), QueueError>;
    /// One-shot claim of the single consumer slot.
    fn claim_consumer(&self) -> bool;
}

// --- REDIS IMPLEMENTATION ---

pub struct RedisQueue {
    client: redis::Client,
    queue_name: String,
    processing_queue_name: String,
    consumer_claimed: AtomicBool,
}

impl RedisQueue {
    pub fn new(url: &str) -> Self {
        let client = redis::Client::open(url).expect("Invalid Redis URL");
        Self {
            client,
            queue_name: "ocelot:jobs".to_string(),
            processing_queue_name: "ocelot:jobs:processing".to_string(),
            consumer_claimed: AtomicBool::new(false),
        }
    }

    fn record_key(id: &str) -> String {
        format!("ocelot:job:{}", id)
    }
}

#[async_trait]
impl JobQueue for RedisQueue {
    async fn enqueue(&self, name: &str, data: JobData) -> Result<Job, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let job = Job {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            data,
        };
        let record = JobRecord::new(&job);

        // Record first so a status poll racing the enqueue still resolves.
        let _: () = conn
            .set(Self::record_key(&job.id), serde_json::to_string(&record)?)
            .await?;
        let _: () = conn
            .lpush(&self.queue_name, serde_json::to_string(&job)?)
            .await?;

        Ok(job)
    }

    async fn dequeue(&self) -> Result<Option<Job>, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        // Blocking pop with a short timeout so the consumer loop stays responsive.
        let payload: Option<String> = conn
            .brpoplpush(&self.queue_name, &self.processing_queue_name, 1.0)
            .await?;

        match payload {
            Some(payload_str) => {
                let job: Job = serde_json::from_str(&payload_str)?;
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    async fn acknowledge(&self, job: &Job) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        // The envelope is immutable, so the re-serialized value matches what
        // brpoplpush parked in the processing list.
        let payload = serde_json::to_string(job)?;
        let removed: i64 = conn.lrem(&self.processing_queue_name, 1, payload).await?;
        if removed == 0 {
            warn!(
                "Could not acknowledge job {}. It might have been already removed.",
                job.id
            );
        }
        Ok(())
    }

    async fn get_job(&self, id: &str) -> Result<JobRecord, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let payload: Option<String> = conn.get(Self::record_key(id)).await?;
        match payload {
            Some(payload_str) => Ok(serde_json::from_str(&payload_str)?),
            None => Err(QueueError::NotFound(id.to_string())),
        }
    }

    async fn save(&self, record: &JobRecord) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let key = Self::record_key(&record.id);
        let _: () = conn.set(&key, serde_json::to_string(record)?).await?;
        if record.is_terminal() {
            let _: () = conn.expire(&key, RECORD_RETENTION_SECS).await?;
        }
        Ok(())
    }

    async fn restore_stranded(&self) -> Result<usize, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let mut count = 0;
        loop {
            let item: Option<String> = conn.rpop(&self.processing_queue_name, None).await?;
            match item {
                Some(payload) => {
                    if serde_json::from_str::<Job>(&payload).is_err() {
                        warn!("Dropping unparseable stranded entry from processing list");
                        continue;
                    }
                    let _: () = conn.lpush(&self.queue_name, &payload).await?;
                    count += 1;
                }
                None => break,
            }
        }

        if count > 0 {
            info!(
                "Restored {} stranded job(s) from '{}'",
                count, self.processing_queue_name
            );
        }
        Ok(count)
    }

    async fn ping(&self) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), QueueError> {
        // Connections are per-call on the multiplexed client; nothing is held
        // open here beyond the consumer task, which shuts down separately.
        self.consumer_claimed.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn claim_consumer(&self) -> bool {
        !self.consumer_claimed.swap(true, Ordering::SeqCst)
    }
}

// --- CONSUMER ---

/// Handle to the single consumer loop bound to a queue.
pub struct Consumer {
    handle: tokio::task::JoinHandle<()>,
}

impl Consumer {
    pub fn shutdown(self) {
        self.handle.abort();
    }
}

/// Bind the dispatcher to the queue as its one consumer. `concurrency` bounds
/// how many jobs run at once; the permit is taken before the dequeue, so at
/// concurrency 1 jobs serialize strictly while enqueues keep flowing.
pub fn register_consumer(
    queue: Arc<dyn JobQueue>,
    concurrency: usize,
    dispatcher: Arc<Dispatcher>,
) -> Result<Consumer, QueueError> {
    if !queue.claim_consumer() {
        return Err(QueueError::ConsumerAlreadyRegistered);
    }

    let concurrency = concurrency.max(1);
    let handle = tokio::spawn(async move {
        let limiter = Arc::new(Semaphore::new(concurrency));
        info!("Queue consumer started (concurrency = {})", concurrency);

        loop {
            let permit = limiter.clone().acquire_owned().await.unwrap();
            match queue.dequeue().await {
                Ok(Some(job)) => {
                    let queue = queue.clone();
                    let dispatcher = dispatcher.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        dispatcher.process(&job).await;
                        if let Err(e) = queue.acknowledge(&job).await {
                            error!("[{}] Failed to acknowledge job in queue: {}", job.id, e);
                        }
                    });
                }
                Ok(None) => drop(permit),
                Err(e) => {
                    drop(permit);
                    error!("Queue dequeue error: {}", e);
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        }
    });

    Ok(Consumer { handle })
}
