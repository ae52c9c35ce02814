use crate::components::scheduler::{PowerState, Publisher};
use crate::error::{publish_error, redis_error, AppResult};
use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, AsyncCommands, Client as RedisClient};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{info, warn};

// Redis key constants
pub mod keys {
    pub const GRAPH_CALENDAR_TOKEN: &str = "graph_calendar_token";

    /// Key and channel carrying a device's power state
    pub fn device_power(device_id: &str) -> String {
        format!("aircon/{}/power", device_id)
    }
}

/// The Redis actor that processes messages
pub struct RedisActor {
    client: RedisClient,
    connection: Option<MultiplexedConnection>,
    command_rx: mpsc::Receiver<RedisCommand>,
}

/// Commands that can be sent to the Redis actor
pub enum RedisCommand {
    GetToken(mpsc::Sender<AppResult<Option<Value>>>),
    SaveToken(Value, mpsc::Sender<AppResult<()>>),
    PublishPower(String, PowerState, mpsc::Sender<AppResult<()>>),
    Shutdown,
}

/// Handle for communicating with the Redis actor
#[derive(Clone)]
pub struct RedisActorHandle {
    command_tx: mpsc::Sender<RedisCommand>,
}

impl RedisActorHandle {
    /// Create a handle with no actor behind it, for tests and wiring
    pub fn empty() -> Self {
        let (command_tx, _) = mpsc::channel(32);
        Self { command_tx }
    }

    /// Get token from Redis
    pub async fn get_token(&self) -> AppResult<Option<Value>> {
        let (response_tx, mut response_rx) = mpsc::channel(1);
        self.command_tx
            .send(RedisCommand::GetToken(response_tx))
            .await
            .map_err(|e| redis_error(&format!("Actor mailbox error: {}", e)))?;

        response_rx
            .recv()
            .await
            .ok_or_else(|| redis_error("Response channel closed"))?
    }

    /// Save token to Redis
    pub async fn save_token(&self, token: Value) -> AppResult<()> {
        let (response_tx, mut response_rx) = mpsc::channel(1);
        self.command_tx
            .send(RedisCommand::SaveToken(token, response_tx))
            .await
            .map_err(|e| redis_error(&format!("Actor mailbox error: {}", e)))?;

        response_rx
            .recv()
            .await
            .ok_or_else(|| redis_error("Response channel closed"))?
    }

    /// Store and broadcast a device power state
    pub async fn publish_power(&self, device_id: &str, state: PowerState) -> AppResult<()> {
        let (response_tx, mut response_rx) = mpsc::channel(1);
        self.command_tx
            .send(RedisCommand::PublishPower(
                device_id.to_string(),
                state,
                response_tx,
            ))
            .await
            .map_err(|e| redis_error(&format!("Actor mailbox error: {}", e)))?;

        response_rx
            .recv()
            .await
            .ok_or_else(|| redis_error("Response channel closed"))?
    }

    /// Shutdown the actor
    pub async fn shutdown(&self) -> AppResult<()> {
        let _ = self.command_tx.send(RedisCommand::Shutdown).await;
        Ok(())
    }
}

#[async_trait]
impl Publisher for RedisActorHandle {
    async fn publish(&self, device_id: &str, state: PowerState) -> AppResult<()> {
        self.publish_power(device_id, state).await
    }
}

impl RedisActor {
    /// Create a new actor and return its handle
    pub fn new(redis_url: &str) -> AppResult<(Self, RedisActorHandle)> {
        let (command_tx, command_rx) = mpsc::channel(32);

        let client = RedisClient::open(redis_url)
            .map_err(|e| redis_error(&format!("Failed to create Redis client: {}", e)))?;

        let actor = Self {
            client,
            connection: None,
            command_rx,
        };

        let handle = RedisActorHandle { command_tx };

        Ok((actor, handle))
    }

    /// Start the actor's processing loop
    pub async fn run(&mut self) {
        info!("Redis actor started");

        // Process commands
        while let Some(cmd) = self.command_rx.recv().await {
            match cmd {
                RedisCommand::GetToken(response_tx) => {
                    let result = self.get_token_from_redis().await;
                    let _ = response_tx.send(result).await;
                }
                RedisCommand::SaveToken(token, response_tx) => {
                    let result = self.save_token_to_redis(token).await;
                    let _ = response_tx.send(result).await;
                }
                RedisCommand::PublishPower(device_id, state, response_tx) => {
                    let result = self.publish_power_to_redis(&device_id, state).await;
                    let _ = response_tx.send(result).await;
                }
                RedisCommand::Shutdown => {
                    info!("Redis actor shutting down");
                    break;
                }
            }
        }

        info!("Redis actor shut down");
    }

    /// Get a redis connection, connecting on first use
    async fn get_redis_connection(&mut self) -> AppResult<MultiplexedConnection> {
        if let Some(connection) = &self.connection {
            return Ok(connection.clone());
        }

        let connection = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| redis_error(&format!("Failed to connect to Redis: {}", e)))?;

        self.connection = Some(connection.clone());
        Ok(connection)
    }

    /// Drop the cached connection after a failure so the next command reconnects
    fn reset_connection<T>(&mut self, result: AppResult<T>) -> AppResult<T> {
        if result.is_err() {
            warn!("Resetting Redis connection after error");
            self.connection = None;
        }
        result
    }

    /// Get token from Redis
    async fn get_token_from_redis(&mut self) -> AppResult<Option<Value>> {
        let mut redis_conn = self.get_redis_connection().await?;

        let token_json: AppResult<Option<String>> = redis_conn
            .get(keys::GRAPH_CALENDAR_TOKEN)
            .await
            .map_err(|e| redis_error(&format!("Failed to read token from Redis: {}", e)));

        match self.reset_connection(token_json)? {
            Some(token_json) => Ok(Some(serde_json::from_str(&token_json)?)),
            None => Ok(None),
        }
    }

    /// Save token to Redis
    async fn save_token_to_redis(&mut self, token: Value) -> AppResult<()> {
        let mut redis_conn = self.get_redis_connection().await?;

        let result: AppResult<()> = redis_conn
            .set(keys::GRAPH_CALENDAR_TOKEN, token.to_string())
            .await
            .map_err(|e| redis_error(&format!("Failed to save token to Redis: {}", e)));

        self.reset_connection(result)
    }

    /// Store the state under the device key, then publish it on the same channel.
    ///
    /// The stored key is the retained copy: a subscriber that reconnects reads
    /// it to learn the last commanded state.
    async fn publish_power_to_redis(&mut self, device_id: &str, state: PowerState) -> AppResult<()> {
        let mut redis_conn = self.get_redis_connection().await?;
        let key = keys::device_power(device_id);

        let stored: AppResult<()> = redis_conn
            .set(&key, state.payload())
            .await
            .map_err(|e| redis_error(&format!("Failed to store power state: {}", e)));
        self.reset_connection(stored)?;

        let published: AppResult<i64> = redis_conn
            .publish(&key, state.payload())
            .await
            .map_err(|e| publish_error(&format!("Failed to publish power state: {}", e)));
        self.reset_connection(published)?;

        Ok(())
    }
}
