use super::Exchange;
use crate::error::ExchangeError;
use crate::models::{Balance, ExchangeFilters, OrderId, OrderRequest, OrderResult, Side};
use crate::retry::{with_retry, RetryPolicy};
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Retries transient venue failures so the engine only sees final outcomes
///
/// Order placement is not retried: a network error after the venue accepted
/// the order would otherwise place it twice.
pub struct RetryingExchange<E> {
    inner: E,
    policy: RetryPolicy,
}

impl<E: Exchange> RetryingExchange<E> {
    pub fn new(inner: E, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }
}

#[async_trait]
impl<E: Exchange> Exchange for RetryingExchange<E> {
    async fn filters(&self, symbol: &str) -> Result<ExchangeFilters, ExchangeError> {
        let inner = &self.inner;
        with_retry(&self.policy, "filters", ExchangeError::is_transient, move || {
            inner.filters(symbol)
        })
        .await
    }

    async fn book_price(
        &self,
        symbol: &str,
        side: Side,
        depth: usize,
    ) -> Result<Decimal, ExchangeError> {
        let inner = &self.inner;
        with_retry(&self.policy, "book_price", ExchangeError::is_transient, move || {
            inner.book_price(symbol, side, depth)
        })
        .await
    }

    async fn current_price(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        let inner = &self.inner;
        with_retry(
            &self.policy,
            "current_price",
            ExchangeError::is_transient,
            move || inner.current_price(symbol),
        )
        .await
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderResult, ExchangeError> {
        self.inner.place_order(request).await
    }

    async fn order_details(
        &self,
        symbol: &str,
        order_id: OrderId,
    ) -> Result<Option<OrderResult>, ExchangeError> {
        let inner = &self.inner;
        with_retry(
            &self.policy,
            "order_details",
            ExchangeError::is_transient,
            move || inner.order_details(symbol, order_id),
        )
        .await
    }

    async fn cancel_order(
        &self,
        symbol: &str,
        order_id: OrderId,
    ) -> Result<OrderResult, ExchangeError> {
        let inner = &self.inner;
        with_retry(
            &self.policy,
            "cancel_order",
            ExchangeError::is_transient,
            move || inner.cancel_order(symbol, order_id),
        )
        .await
    }

    async fn open_orders(&self, symbol: &str) -> Result<Vec<OrderResult>, ExchangeError> {
        let inner = &self.inner;
        with_retry(&self.policy, "open_orders", ExchangeError::is_transient, move || {
            inner.open_orders(symbol)
        })
        .await
    }

    async fn account_balance(&self, asset: &str) -> Result<Balance, ExchangeError> {
        let inner = &self.inner;
        with_retry(
            &self.policy,
            "account_balance",
            ExchangeError::is_transient,
            move || inner.account_balance(asset),
        )
        .await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
