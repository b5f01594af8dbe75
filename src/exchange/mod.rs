pub mod paper;
pub mod retry;

pub use paper::{PaperConfig, PaperExchange};
pub use retry::RetryingExchange;

use crate::error::ExchangeError;
use crate::models::{Balance, ExchangeFilters, OrderId, OrderRequest, OrderResult, Side};
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Spot venue capability used by the lifecycle engine
///
/// One implementation is selected at startup; call sites never branch on venue type.
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Trading rules for a pair
    async fn filters(&self, symbol: &str) -> Result<ExchangeFilters, ExchangeError>;

    /// Price at `depth` levels into the book
    ///
    /// `Side::Buy` reads the bid ladder, `Side::Sell` the ask ladder; depth 0 is top of book.
    async fn book_price(
        &self,
        symbol: &str,
        side: Side,
        depth: usize,
    ) -> Result<Decimal, ExchangeError>;

    /// Average/ticker price used for unrealized profit
    async fn current_price(&self, symbol: &str) -> Result<Decimal, ExchangeError>;

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderResult, ExchangeError>;

    /// `None` when the venue no longer knows the order
    async fn order_details(
        &self,
        symbol: &str,
        order_id: OrderId,
    ) -> Result<Option<OrderResult>, ExchangeError>;

    async fn cancel_order(
        &self,
        symbol: &str,
        order_id: OrderId,
    ) -> Result<OrderResult, ExchangeError>;

    async fn open_orders(&self, symbol: &str) -> Result<Vec<OrderResult>, ExchangeError>;

    async fn account_balance(&self, asset: &str) -> Result<Balance, ExchangeError>;

    /// Venue name for log lines
    fn name(&self) -> &str;
}
