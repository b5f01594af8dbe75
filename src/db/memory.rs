use super::{PositionStore, SignalSource};
use crate::error::StoreError;
use crate::models::{OrderId, Position, PositionStatus, Signal, TradeType};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

/// In-process store for tests and embedding
#[derive(Default)]
pub struct MemoryStore {
    positions: RwLock<Vec<Position>>,
    signals: RwLock<HashMap<String, Signal>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the prediction for a symbol
    pub fn set_signal(&self, signal: Signal) {
        let mut signals = self.signals.write().unwrap_or_else(|e| e.into_inner());
        signals.insert(signal.symbol.clone(), signal);
    }

    pub fn clear_signal(&self, symbol: &str) {
        let mut signals = self.signals.write().unwrap_or_else(|e| e.into_inner());
        signals.remove(symbol);
    }

    /// Every stored row in insertion order
    pub fn positions(&self) -> Vec<Position> {
        self.positions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn mark(&self, transaction_id: Uuid, apply: impl FnOnce(&mut Position)) -> Result<(), StoreError> {
        let mut positions = self.positions.write().unwrap_or_else(|e| e.into_inner());
        let position = positions
            .iter_mut()
            .find(|p| p.transaction_id == transaction_id)
            .ok_or(StoreError::NotFound(transaction_id))?;
        apply(position);
        Ok(())
    }
}

#[async_trait]
impl PositionStore for MemoryStore {
    async fn upsert(&self, position: &Position) -> Result<Position, StoreError> {
        let mut positions = self.positions.write().unwrap_or_else(|e| e.into_inner());
        match positions
            .iter_mut()
            .find(|p| p.transaction_id == position.transaction_id)
        {
            Some(existing) => *existing = position.clone(),
            None => positions.push(position.clone()),
        }
        Ok(position.clone())
    }

    async fn find_open(
        &self,
        symbol: &str,
        trade_type: TradeType,
    ) -> Result<Option<Position>, StoreError> {
        let positions = self.positions.read().unwrap_or_else(|e| e.into_inner());
        Ok(positions
            .iter()
            .rev()
            .find(|p| p.symbol == symbol && p.trade_type == trade_type && p.is_open())
            .cloned())
    }

    async fn find_by_order_id(&self, order_id: OrderId) -> Result<Option<Position>, StoreError> {
        let positions = self.positions.read().unwrap_or_else(|e| e.into_inner());
        Ok(positions
            .iter()
            .find(|p| p.order_id == Some(order_id) || p.sell_order_id == Some(order_id))
            .cloned())
    }

    async fn find(&self, transaction_id: Uuid) -> Result<Option<Position>, StoreError> {
        let positions = self.positions.read().unwrap_or_else(|e| e.into_inner());
        Ok(positions
            .iter()
            .find(|p| p.transaction_id == transaction_id)
            .cloned())
    }

    async fn mark_expired(&self, transaction_id: Uuid) -> Result<(), StoreError> {
        self.mark(transaction_id, |p| {
            p.status = PositionStatus::Expired;
            p.expired = true;
        })
    }

    async fn mark_closed(&self, transaction_id: Uuid) -> Result<(), StoreError> {
        self.mark(transaction_id, |p| p.status = PositionStatus::Closed)
    }

    async fn mark_cancelled(&self, transaction_id: Uuid) -> Result<(), StoreError> {
        self.mark(transaction_id, |p| p.status = PositionStatus::Canceled)
    }

    async fn recent(&self, limit: i64) -> Result<Vec<Position>, StoreError> {
        let positions = self.positions.read().unwrap_or_else(|e| e.into_inner());
        let mut recent: Vec<Position> = positions.clone();
        recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        recent.truncate(limit.max(0) as usize);
        Ok(recent)
    }
}

#[async_trait]
impl SignalSource for MemoryStore {
    async fn latest_signal(&self, symbol: &str) -> Result<Option<Signal>, StoreError> {
        let signals = self.signals.read().unwrap_or_else(|e| e.into_inner());
        Ok(signals.get(symbol).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderResult, OrderStatus, Side};
    use rust_decimal_macros::dec;

    fn position(order_id: OrderId) -> Position {
        let order = OrderResult {
            order_id,
            symbol: "BTCUSDT".to_string(),
            side: Side::Buy,
            status: OrderStatus::New,
            price: dec!(20000),
            orig_qty: dec!(0.01),
            executed_qty: dec!(0),
            cumulative_quote_qty: dec!(0),
            update_time: None,
        };
        Position::opened("BTCUSDT", TradeType::Spot, dec!(0.01), dec!(20000), &order)
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let store = MemoryStore::new();
        let p = position(1);

        store.upsert(&p).await.unwrap();
        store.upsert(&p).await.unwrap();

        assert_eq!(store.positions().len(), 1);
    }

    #[tokio::test]
    async fn test_upsert_updates_in_place() {
        let store = MemoryStore::new();
        let mut p = position(1);
        store.upsert(&p).await.unwrap();

        p.status = PositionStatus::Filled;
        p.buy.executed_qty = dec!(0.01);
        store.upsert(&p).await.unwrap();

        let stored = store.find(p.transaction_id).await.unwrap().unwrap();
        assert_eq!(stored.status, PositionStatus::Filled);
        assert_eq!(store.positions().len(), 1);
    }

    #[tokio::test]
    async fn test_find_open_skips_terminal_rows() {
        let store = MemoryStore::new();
        let p = position(1);
        store.upsert(&p).await.unwrap();

        assert!(store
            .find_open("BTCUSDT", TradeType::Spot)
            .await
            .unwrap()
            .is_some());
        assert!(store
            .find_open("BTCUSDT", TradeType::Futures)
            .await
            .unwrap()
            .is_none());

        store.mark_cancelled(p.transaction_id).await.unwrap();
        assert!(store
            .find_open("BTCUSDT", TradeType::Spot)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_mark_expired_sets_marker() {
        let store = MemoryStore::new();
        let p = position(7);
        store.upsert(&p).await.unwrap();
        store.mark_expired(p.transaction_id).await.unwrap();

        let stored = store.find_by_order_id(7).await.unwrap().unwrap();
        assert_eq!(stored.status, PositionStatus::Expired);
        assert!(stored.expired);
    }

    #[tokio::test]
    async fn test_mark_unknown_position() {
        let store = MemoryStore::new();
        let result = store.mark_closed(Uuid::new_v4()).await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }
}
