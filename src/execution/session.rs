use crate::config::EngineConfig;
use crate::db::{PositionStore, SignalSource};
use crate::error::{EngineError, StoreError};
use crate::exchange::Exchange;
use crate::execution::pacing::Pacer;
use crate::execution::precision::Precision;
use crate::models::{
    ExchangeFilters, OrderId, OrderResult, OrderStatus, Position, PositionStatus, Signal,
};
use crate::persistence::PositionObserver;
use crate::retry::{with_retry, RetryPolicy};
use std::sync::Arc;

/// Mutable state of the cycle in flight
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub position: Option<Position>,
    pub signal: Option<Signal>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self) -> Result<&Position, EngineError> {
        self.position.as_ref().ok_or(EngineError::MissingPosition)
    }

    pub fn position_mut(&mut self) -> Result<&mut Position, EngineError> {
        self.position.as_mut().ok_or(EngineError::MissingPosition)
    }
}

/// How a cancel request ended
#[derive(Debug, Clone, PartialEq)]
pub enum CancelOutcome {
    /// The order filled before the cancel landed
    Filled(OrderResult),
    /// Canceled; `None` when the venue gave no usable snapshot
    Canceled(Option<OrderResult>),
}

/// Read-only collaborators shared by the controllers
pub struct EngineContext {
    pub config: Arc<EngineConfig>,
    pub filters: ExchangeFilters,
    pub precision: Precision,
    pub exchange: Arc<dyn Exchange>,
    pub store: Arc<dyn PositionStore>,
    pub signals: Arc<dyn SignalSource>,
    pub observer: Arc<dyn PositionObserver>,
    pub pacer: Pacer,
    store_retry: RetryPolicy,
}

impl EngineContext {
    /// Fetch the pair's filters once and wire the collaborators together
    pub async fn new(
        config: Arc<EngineConfig>,
        exchange: Arc<dyn Exchange>,
        store: Arc<dyn PositionStore>,
        signals: Arc<dyn SignalSource>,
        observer: Arc<dyn PositionObserver>,
    ) -> Result<Self, EngineError> {
        let filters = exchange.filters(&config.trading_pair).await?;
        tracing::info!(
            "Loaded {} filters from {}: precision {}, lot {:?}, notional {:?}",
            filters.symbol,
            exchange.name(),
            filters.base_asset_precision,
            filters.lot_size,
            filters.notional
        );

        Ok(Self {
            precision: Precision::for_filters(&filters),
            pacer: Pacer::from_config(&config),
            config,
            filters,
            exchange,
            store,
            signals,
            observer,
            store_retry: RetryPolicy::default(),
        })
    }

    pub fn with_pacer(mut self, pacer: Pacer) -> Self {
        self.pacer = pacer;
        self
    }

    pub async fn latest_signal(&self) -> Result<Option<Signal>, EngineError> {
        Ok(self.signals.latest_signal(&self.config.symbol).await?)
    }

    async fn persist(&self, position: &Position) -> Result<(), EngineError> {
        let store = &self.store;
        with_retry(&self.store_retry, "upsert", StoreError::is_transient, move || {
            store.upsert(position)
        })
        .await?;
        Ok(())
    }

    /// Upsert and publish a snapshot
    pub async fn save(&self, position: &Position) -> Result<(), EngineError> {
        self.persist(position).await?;
        self.observer.publish(position).await;
        Ok(())
    }

    /// Persist the final leg fields, then mark the row terminal
    pub async fn finish(
        &self,
        position: &mut Position,
        status: PositionStatus,
    ) -> Result<(), EngineError> {
        self.persist(position).await?;
        match status {
            PositionStatus::Closed => self.store.mark_closed(position.transaction_id).await?,
            PositionStatus::Canceled => {
                self.store.mark_cancelled(position.transaction_id).await?
            }
            PositionStatus::Expired => {
                self.store.mark_expired(position.transaction_id).await?;
                position.expired = true;
            }
            _ => {}
        }
        position.status = status;
        self.observer.publish(position).await;
        Ok(())
    }

    /// Cancel a tracked order, falling back to clearing the whole pair
    ///
    /// When the direct cancel fails, every open order on the pair is canceled
    /// and the tracked order is re-read so a fill that raced the cancel is not lost.
    pub async fn cancel(&self, order_id: OrderId) -> Result<CancelOutcome, EngineError> {
        let pair = &self.config.trading_pair;

        match self.exchange.cancel_order(pair, order_id).await {
            Ok(order) if order.status == OrderStatus::Filled => {
                return Ok(CancelOutcome::Filled(order));
            }
            Ok(order) => return Ok(CancelOutcome::Canceled(Some(order))),
            Err(e) => {
                tracing::warn!(
                    "[cancel] order {} could not be canceled ({}), canceling all open orders on {}",
                    order_id,
                    e,
                    pair
                );
            }
        }

        for open in self.exchange.open_orders(pair).await? {
            if let Err(e) = self.exchange.cancel_order(pair, open.order_id).await {
                tracing::warn!("[cancel] open order {} not canceled: {}", open.order_id, e);
            }
        }

        match self.exchange.order_details(pair, order_id).await? {
            Some(order) if order.status == OrderStatus::Filled => {
                Ok(CancelOutcome::Filled(order))
            }
            other => Ok(CancelOutcome::Canceled(other)),
        }
    }

    /// Balance checkpoint for the pair's assets
    pub async fn log_balances(&self, label: &str) {
        for asset in [&self.config.base_asset, &self.config.quote_asset] {
            match self.exchange.account_balance(asset).await {
                Ok(balance) => tracing::info!(
                    "💰 [{}] {}: free {} locked {}",
                    label,
                    balance.asset,
                    balance.free,
                    balance.locked
                ),
                Err(e) => tracing::warn!("💰 [{}] {} balance unavailable: {}", label, asset, e),
            }
        }
    }
}
