pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresPersistence;

use crate::error::StoreError;
use crate::models::{OrderId, Position, Signal, TradeType};
use async_trait::async_trait;
use uuid::Uuid;

/// Durable position rows, one per trading cycle
///
/// Rows are never deleted; terminal states are only marked.
#[async_trait]
pub trait PositionStore: Send + Sync {
    /// Insert or update in place, keyed by transaction id
    async fn upsert(&self, position: &Position) -> Result<Position, StoreError>;

    /// The non-terminal position for a pair, if any
    async fn find_open(
        &self,
        symbol: &str,
        trade_type: TradeType,
    ) -> Result<Option<Position>, StoreError>;

    async fn find_by_order_id(&self, order_id: OrderId) -> Result<Option<Position>, StoreError>;

    async fn find(&self, transaction_id: Uuid) -> Result<Option<Position>, StoreError>;

    async fn mark_expired(&self, transaction_id: Uuid) -> Result<(), StoreError>;

    async fn mark_closed(&self, transaction_id: Uuid) -> Result<(), StoreError>;

    async fn mark_cancelled(&self, transaction_id: Uuid) -> Result<(), StoreError>;

    /// Most recent positions first
    async fn recent(&self, limit: i64) -> Result<Vec<Position>, StoreError>;
}

/// Read side of the prediction feed
#[async_trait]
pub trait SignalSource: Send + Sync {
    async fn latest_signal(&self, symbol: &str) -> Result<Option<Signal>, StoreError>;
}
