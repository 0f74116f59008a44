//! Backend selection and pipeline wiring.

use std::sync::Arc;

use delivery::{DeliveryWorker, ErpQueueSource, Pipeline, WebhookSource};
use event_log::{EventLog, InMemoryEventLog, PostgresEventLog};
use registry::{
    DestinationRegistry, InMemoryDestinationRegistry, InMemoryQueueStore,
    PostgresDestinationRegistry, PostgresQueueStore, QueueStore,
};
use sqlx::PgPool;
use transport::{ClientConfig, ErpTransport, WebhookTransport};

use crate::Config;

/// The three stores the pipelines and the HTTP surface share.
#[derive(Clone)]
pub struct Stores {
    pub log: Arc<dyn EventLog>,
    pub registry: Arc<dyn DestinationRegistry>,
    pub queue: Arc<dyn QueueStore>,
}

impl Stores {
    /// Process-local stores; everything is lost on restart.
    pub fn in_memory(config: &Config) -> Self {
        Self {
            log: Arc::new(InMemoryEventLog::new()),
            registry: Arc::new(
                InMemoryDestinationRegistry::new().with_policy(config.destination_policy()),
            ),
            queue: Arc::new(InMemoryQueueStore::new().with_policy(config.queue_policy())),
        }
    }

    /// PostgreSQL-backed stores. Runs pending migrations first.
    pub async fn postgres(pool: PgPool, config: &Config) -> registry::Result<Self> {
        registry::run_migrations(&pool).await?;

        Ok(Self {
            log: Arc::new(PostgresEventLog::new(pool.clone())),
            registry: Arc::new(
                PostgresDestinationRegistry::new(pool.clone())
                    .with_policy(config.destination_policy()),
            ),
            queue: Arc::new(PostgresQueueStore::new(pool).with_policy(config.queue_policy())),
        })
    }

    /// Builds the webhook pipeline for the configured category, plus the ERP
    /// pipeline when an ERP endpoint and secret are configured.
    pub fn pipelines(&self, config: &Config) -> delivery::Result<Vec<Arc<dyn Pipeline>>> {
        let worker_config = config.worker_config();
        worker_config.validate()?;

        let client = ClientConfig {
            timeout: config.send_timeout,
            ..ClientConfig::default()
        };

        let webhooks = DeliveryWorker::new(
            WebhookSource::new(
                self.log.clone(),
                self.registry.clone(),
                config.webhook_category.as_str(),
                config.batch_size,
            ),
            WebhookTransport::new(&client)?,
            worker_config,
        );
        let mut pipelines: Vec<Arc<dyn Pipeline>> = vec![Arc::new(webhooks)];

        match config.erp_connection() {
            Some(connection) => {
                let erp = DeliveryWorker::new(
                    ErpQueueSource::new(self.queue.clone(), connection),
                    ErpTransport::new(&client)?,
                    worker_config,
                );
                pipelines.push(Arc::new(erp));
            }
            None if config.erp_endpoint.is_some() => {
                tracing::warn!("ERP_SECRET not set, ERP pipeline disabled")
            }
            None => tracing::info!("ERP_ENDPOINT not set, ERP pipeline disabled"),
        }

        Ok(pipelines)
    }
}
