use std::sync::Arc;
use std::time::Duration;

use mongodb::Client as MongoClient;
use redis::aio::ConnectionManager;

use crate::config::Config;

pub mod content_graph;
pub mod events;
pub mod progress_store;
pub mod progression_service;

use content_graph::{CmsClient, ContentGraph};
use events::{event_queue, run_event_forwarder, EventQueue, RedisStreamSink};
use progress_store::{MongoProgressStore, ProgressStore};

pub struct AppState {
    pub config: Config,
    pub content: Arc<dyn ContentGraph>,
    pub store: Arc<dyn ProgressStore>,
    pub events: EventQueue,
    /// Connection behind the event stream; `None` when running without Redis.
    pub redis: Option<ConnectionManager>,
}

impl AppState {
    /// Wires the production collaborators and starts the event forwarder.
    pub async fn new(
        config: Config,
        mongo_client: MongoClient,
        redis_client: redis::Client,
    ) -> anyhow::Result<Self> {
        let mongo = mongo_client.database(&config.mongo_database);
        let store = MongoProgressStore::new(mongo);
        store.ensure_indexes().await?;

        tracing::info!("Attempting to connect to Redis...");

        let redis = tokio::time::timeout(
            Duration::from_secs(30),
            ConnectionManager::new(redis_client),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis connection timeout after 30s"))??;

        let mut conn = redis.clone();
        tokio::time::timeout(
            Duration::from_secs(5),
            redis::cmd("PING").query_async::<String>(&mut conn),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis PING timeout after 5s"))??;

        tracing::info!("Redis connection established successfully");

        let content = CmsClient::new(
            &config.cms_api_url,
            Duration::from_secs(config.cms_timeout_secs),
        )?;

        let (events, receiver) = event_queue();
        let sink = RedisStreamSink::new(redis.clone(), config.events_stream.clone());
        tokio::spawn(run_event_forwarder(receiver, sink));

        Ok(Self::from_parts(config, Arc::new(content), Arc::new(store), events).with_redis(redis))
    }

    pub fn from_parts(
        config: Config,
        content: Arc<dyn ContentGraph>,
        store: Arc<dyn ProgressStore>,
        events: EventQueue,
    ) -> Self {
        Self {
            config,
            content,
            store,
            events,
            redis: None,
        }
    }

    pub fn with_redis(mut self, redis: ConnectionManager) -> Self {
        self.redis = Some(redis);
        self
    }
}
