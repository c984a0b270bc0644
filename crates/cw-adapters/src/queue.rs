//! NATS JetStream job queue adapter.
//!
//! Stage jobs are published to per-stage subjects on a durable stream and
//! consumed through a durable pull consumer with explicit acks. Publishes
//! carry a `Nats-Msg-Id` derived from `(job_id, attempt)` so redelivered
//! enqueues deduplicate inside the JetStream duplicate window. Dead letters
//! land on their own stream.

use std::time::Duration;

use async_nats::jetstream::{
    self,
    consumer::{pull::Config as PullConsumerConfig, AckPolicy, Consumer, DeliverPolicy},
    stream::Config as StreamConfig,
    Context as JetStreamContext,
};
use cw_domain::Stage;
use cw_ports::{JobQueue, JobSource, QueueError, StageJob};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

/// NATS job queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatsQueueConfig {
    /// NATS server URL (e.g., "nats://localhost:4222")
    pub url: String,
    /// Subject and stream prefix.
    pub stream_prefix: String,
    /// Durable consumer name.
    pub consumer_name: String,
    /// Message TTL in seconds.
    pub message_ttl_secs: u64,
    /// Duplicate detection window in seconds.
    pub duplicate_window_secs: u64,
}

impl Default for NatsQueueConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            stream_prefix: "cw".to_string(),
            consumer_name: "stage-worker".to_string(),
            message_ttl_secs: 24 * 60 * 60,
            duplicate_window_secs: 120,
        }
    }
}

impl NatsQueueConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            url: std::env::var("NATS_URL").unwrap_or(defaults.url),
            stream_prefix: std::env::var("NATS_STREAM_PREFIX").unwrap_or(defaults.stream_prefix),
            consumer_name: std::env::var("NATS_CONSUMER_NAME").unwrap_or(defaults.consumer_name),
            message_ttl_secs: std::env::var("NATS_MESSAGE_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.message_ttl_secs),
            duplicate_window_secs: std::env::var("NATS_DUPLICATE_WINDOW_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.duplicate_window_secs),
        }
    }
}

/// Dead-letter payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub job: StageJob,
    pub reason: String,
}

/// JetStream-backed [`JobQueue`].
pub struct NatsJobQueue {
    jetstream: JetStreamContext,
    config: NatsQueueConfig,
}

impl NatsJobQueue {
    /// Connect to NATS and ensure the job and dead-letter streams exist.
    pub async fn connect(config: NatsQueueConfig) -> Result<Self, QueueError> {
        info!(url = %config.url, "connecting to NATS");
        let client = async_nats::connect(&config.url)
            .await
            .map_err(|e| QueueError::Connection {
                message: format!("failed to connect to NATS: {e}"),
            })?;
        let jetstream = jetstream::new(client);

        let queue = Self { jetstream, config };
        queue
            .ensure_stream(
                &queue.stream_name("jobs"),
                vec![format!("{}.jobs.>", queue.config.stream_prefix)],
            )
            .await?;
        queue
            .ensure_stream(
                &queue.stream_name("dead"),
                vec![format!("{}.dead.>", queue.config.stream_prefix)],
            )
            .await?;
        info!("NATS job queue initialized");
        Ok(queue)
    }

    fn stream_name(&self, suffix: &str) -> String {
        format!("{}-{}", self.config.stream_prefix, suffix)
    }

    fn job_subject(&self, stage: Stage) -> String {
        format!("{}.jobs.{}", self.config.stream_prefix, stage.queue_name())
    }

    async fn ensure_stream(&self, name: &str, subjects: Vec<String>) -> Result<(), QueueError> {
        let config = StreamConfig {
            name: name.to_string(),
            subjects,
            max_age: Duration::from_secs(self.config.message_ttl_secs),
            duplicate_window: Duration::from_secs(self.config.duplicate_window_secs),
            ..Default::default()
        };

        match self.jetstream.get_stream(name).await {
            Ok(_) => {
                debug!(stream = %name, "stream exists, updating config");
                self.jetstream
                    .update_stream(config)
                    .await
                    .map_err(|e| QueueError::Connection {
                        message: format!("failed to update stream: {e}"),
                    })?;
            }
            Err(_) => {
                info!(stream = %name, "creating stream");
                self.jetstream.create_stream(config).await.map_err(|e| {
                    QueueError::Connection {
                        message: format!("failed to create stream: {e}"),
                    }
                })?;
            }
        }
        Ok(())
    }

    async fn publish(
        &self,
        subject: String,
        payload: Vec<u8>,
        msg_id: String,
    ) -> Result<(), QueueError> {
        let mut headers = async_nats::HeaderMap::new();
        headers.insert("Nats-Msg-Id", msg_id);
        let ack = self
            .jetstream
            .publish_with_headers(subject, headers, payload.into())
            .await
            .map_err(|e| QueueError::Publish {
                message: format!("failed to publish: {e}"),
            })?;
        ack.await.map_err(|e| QueueError::Publish {
            message: format!("failed to get publish ack: {e}"),
        })?;
        Ok(())
    }

    /// Create the durable pull consumer for stage jobs.
    pub async fn job_source(&self) -> Result<NatsJobSource, QueueError> {
        let stream = self
            .jetstream
            .get_stream(self.stream_name("jobs"))
            .await
            .map_err(|e| QueueError::Connection {
                message: format!("failed to get jobs stream: {e}"),
            })?;

        let consumer = stream
            .get_or_create_consumer(
                &self.config.consumer_name,
                PullConsumerConfig {
                    durable_name: Some(self.config.consumer_name.clone()),
                    ack_policy: AckPolicy::Explicit,
                    deliver_policy: DeliverPolicy::All,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| QueueError::Connection {
                message: format!("failed to create consumer: {e}"),
            })?;

        info!(consumer = %self.config.consumer_name, "job consumer created");
        Ok(NatsJobSource { consumer })
    }
}

impl JobQueue for NatsJobQueue {
    #[instrument(skip(self, job), fields(job_id = %job.job_id.as_str(), stage = job.stage.as_str()))]
    async fn enqueue(&self, job: StageJob, delay: Option<Duration>) -> Result<(), QueueError> {
        let subject = self.job_subject(job.stage);
        let msg_id = format!("{}-{}", job.job_id.as_str(), job.attempt);
        let payload = serde_json::to_vec(&job).map_err(|e| QueueError::Serialization {
            message: e.to_string(),
        })?;

        match delay {
            None => self.publish(subject, payload, msg_id).await,
            Some(delay) => {
                // JetStream has no delayed publish; a client-side timer
                // covers retry backoff.
                let jetstream = self.jetstream.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let mut headers = async_nats::HeaderMap::new();
                    headers.insert("Nats-Msg-Id", msg_id);
                    match jetstream
                        .publish_with_headers(subject, headers, payload.into())
                        .await
                    {
                        Ok(ack) => {
                            if let Err(e) = ack.await {
                                warn!(error = %e, "delayed enqueue not acknowledged");
                            }
                        }
                        Err(e) => warn!(error = %e, "delayed enqueue failed"),
                    }
                });
                Ok(())
            }
        }
    }

    #[instrument(skip(self, job), fields(job_id = %job.job_id.as_str(), reason))]
    async fn dead_letter(&self, job: StageJob, reason: &str) -> Result<(), QueueError> {
        let subject = format!(
            "{}.dead.{}",
            self.config.stream_prefix,
            job.stage.queue_name()
        );
        let msg_id = format!("dead-{}-{}", job.job_id.as_str(), job.attempt);
        let payload = serde_json::to_vec(&DeadLetter {
            job,
            reason: reason.to_string(),
        })
        .map_err(|e| QueueError::Serialization {
            message: e.to_string(),
        })?;
        self.publish(subject, payload, msg_id).await
    }
}

/// Pull-consumer [`JobSource`]. Messages are acknowledged on receipt; the
/// store's per-attempt idempotency absorbs redeliveries.
pub struct NatsJobSource {
    consumer: Consumer<PullConsumerConfig>,
}

impl JobSource for NatsJobSource {
    async fn next_job(&mut self) -> Result<Option<StageJob>, QueueError> {
        loop {
            let mut batch = self
                .consumer
                .fetch()
                .max_messages(1)
                .expires(Duration::from_secs(5))
                .messages()
                .await
                .map_err(|e| QueueError::Connection {
                    message: format!("failed to fetch jobs: {e}"),
                })?;

            let Some(message) = batch.next().await else {
                // Batch expired with nothing pending; poll again.
                continue;
            };
            let message = message.map_err(|e| QueueError::Connection {
                message: format!("failed to receive job: {e}"),
            })?;

            match serde_json::from_slice::<StageJob>(&message.payload) {
                Ok(job) => {
                    if let Err(e) = message.ack().await {
                        warn!(error = %e, "failed to ack job message");
                    }
                    return Ok(Some(job));
                }
                Err(e) => {
                    warn!(error = %e, "unparseable job payload, terminating message");
                    if let Err(e) = message
                        .ack_with(jetstream::AckKind::Term)
                        .await
                    {
                        warn!(error = %e, "failed to term poison message");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = NatsQueueConfig::default();
        assert_eq!(config.url, "nats://localhost:4222");
        assert_eq!(config.stream_prefix, "cw");
        assert_eq!(config.duplicate_window_secs, 120);
    }

    #[test]
    fn dead_letter_round_trips() {
        let dead = DeadLetter {
            job: StageJob {
                job_id: cw_domain::JobId::new(),
                application_id: cw_domain::ApplicationId::new(),
                stage: Stage::Extract,
                document_id: None,
                attempt: 2,
                max_attempts: 3,
            },
            reason: "poison".to_string(),
        };
        let bytes = serde_json::to_vec(&dead).unwrap();
        let parsed: DeadLetter = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed.reason, "poison");
        assert_eq!(parsed.job.attempt, 2);
    }
}
