use crate::config::redact_url;
use crate::models::Position;
use crate::Result;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::sync::Arc;
use tokio::time::{timeout, Duration};

/// Receives a position snapshot after every state transition
///
/// Publication is best effort: implementations log their own failures and
/// never interrupt the trading cycle.
#[async_trait]
pub trait PositionObserver: Send + Sync {
    async fn publish(&self, position: &Position);
}

/// Renders each snapshot as one structured log line
#[derive(Debug, Default, Clone)]
pub struct LogObserver;

#[async_trait]
impl PositionObserver for LogObserver {
    async fn publish(&self, position: &Position) {
        tracing::info!(
            transaction_id = %position.transaction_id,
            order_id = ?position.order_id,
            sell_order_id = ?position.sell_order_id,
            status = %position.status,
            buy_price = ?position.buy_price,
            sell_price = ?position.sell_price,
            current_price = ?position.current_price,
            buy_qty = %position.buy.executed_qty,
            buy_actual_qty = ?position.buy.actual_qty,
            sell_qty = %position.sell.executed_qty,
            sell_actual_qty = ?position.sell.actual_qty,
            sold_qty = %position.sold_qty,
            unrealized_profit = ?position.unrealized_profit,
            realized_profit = ?position.realized_profit,
            expired = position.expired,
            "📒 {} {}",
            position.symbol,
            position.status
        );
    }
}

/// Fan-out to several observers
#[derive(Default, Clone)]
pub struct ObserverSet {
    observers: Vec<Arc<dyn PositionObserver>>,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, observer: Arc<dyn PositionObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

#[async_trait]
impl PositionObserver for ObserverSet {
    async fn publish(&self, position: &Position) {
        for observer in &self.observers {
            observer.publish(position).await;
        }
    }
}

/// Redis publication of position snapshots
///
/// Keeps `position:{symbol}:latest` plus a sorted set `positions:{symbol}`
/// scored by snapshot time, trimmed to the newest `history` entries.
pub struct RedisPersistence {
    conn: ConnectionManager,
    history: usize,
}

impl RedisPersistence {
    /// Connect to Redis
    ///
    /// # Arguments
    /// * `redis_url` - Redis connection URL (e.g., "redis://127.0.0.1:6379")
    /// * `history` - Snapshots kept per symbol
    pub async fn new(redis_url: &str, history: usize) -> Result<Self> {
        let client = Client::open(redis_url)?;

        let conn = timeout(Duration::from_secs(5), ConnectionManager::new(client))
            .await
            .map_err(|_| "Redis connection timeout after 5 seconds")??;

        tracing::info!("Connected to Redis at {}", redact_url(redis_url));

        Ok(Self {
            conn,
            history: history.max(1),
        })
    }

    fn latest_key(symbol: &str) -> String {
        format!("position:{}:latest", symbol)
    }

    fn history_key(symbol: &str) -> String {
        format!("positions:{}", symbol)
    }

    pub async fn save_snapshot(&self, position: &Position) -> Result<()> {
        let mut conn = self.conn.clone();
        let value = serde_json::to_string(position)?;
        let score = chrono::Utc::now().timestamp_millis() as f64;
        let history_key = Self::history_key(&position.symbol);

        conn.set::<_, _, ()>(Self::latest_key(&position.symbol), &value)
            .await?;
        conn.zadd::<_, _, _, ()>(&history_key, &value, score).await?;
        conn.zremrangebyrank::<_, ()>(&history_key, 0, -(self.history as isize) - 1)
            .await?;

        Ok(())
    }

    /// Last published snapshot for a symbol
    pub async fn latest(&self, symbol: &str) -> Result<Option<Position>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(Self::latest_key(symbol)).await?;
        match value {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Newest snapshots first
    pub async fn history(&self, symbol: &str, limit: usize) -> Result<Vec<Position>> {
        let mut conn = self.conn.clone();
        let stop = limit.max(1) as isize - 1;
        let values: Vec<String> = conn.zrevrange(Self::history_key(symbol), 0, stop).await?;

        let mut positions = Vec::with_capacity(values.len());
        for json in values {
            positions.push(serde_json::from_str(&json)?);
        }
        Ok(positions)
    }

    #[cfg(test)]
    async fn clear(&self, symbol: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(Self::latest_key(symbol)).await?;
        conn.del::<_, ()>(Self::history_key(symbol)).await?;
        Ok(())
    }
}

#[async_trait]
impl PositionObserver for RedisPersistence {
    async fn publish(&self, position: &Position) {
        if let Err(e) = self.save_snapshot(position).await {
            tracing::warn!(
                "Failed to publish position {} to Redis: {}",
                position.transaction_id,
                e
            );
        }
    }
}
