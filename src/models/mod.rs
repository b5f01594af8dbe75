use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Exchange-assigned order identifier
pub type OrderId = i64;

/// Order side / trading leg
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BUY" => Ok(Side::Buy),
            "SELL" => Ok(Side::Sell),
            other => Err(format!("unknown side: {}", other)),
        }
    }
}

/// Market the position trades on
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TradeType {
    Spot,
    Futures,
}

impl TradeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeType::Spot => "spot",
            TradeType::Futures => "futures",
        }
    }
}

impl fmt::Display for TradeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TradeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "spot" => Ok(TradeType::Spot),
            "futures" => Ok(TradeType::Futures),
            other => Err(format!("unknown trade type: {}", other)),
        }
    }
}

/// Status reported by the exchange for a single order
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Canceled => "CANCELED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Expired => "EXPIRED",
        }
    }

    /// Order is still resting on the book
    pub fn is_working(&self) -> bool {
        matches!(self, OrderStatus::New | OrderStatus::PartiallyFilled)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Limit,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeInForce {
    Gtc,
}

/// Lifecycle status of a position row
///
/// While a leg is working the status mirrors that leg's order status
/// (`New`, `PartiallyFilled`). `Filled` means the buy leg is complete and
/// no sell order is resting. `Closed`, `Canceled` and `Expired` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionStatus {
    New,
    PartiallyFilled,
    Filled,
    Closed,
    Canceled,
    Expired,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::New => "NEW",
            PositionStatus::PartiallyFilled => "PARTIALLY_FILLED",
            PositionStatus::Filled => "FILLED",
            PositionStatus::Closed => "CLOSED",
            PositionStatus::Canceled => "CANCELED",
            PositionStatus::Expired => "EXPIRED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PositionStatus::Closed | PositionStatus::Canceled | PositionStatus::Expired
        )
    }

    /// Map a working-leg order status onto the position
    pub fn from_order(status: OrderStatus) -> Self {
        match status {
            OrderStatus::New => PositionStatus::New,
            OrderStatus::PartiallyFilled => PositionStatus::PartiallyFilled,
            OrderStatus::Filled => PositionStatus::Filled,
            OrderStatus::Canceled | OrderStatus::Rejected => PositionStatus::Canceled,
            OrderStatus::Expired => PositionStatus::Expired,
        }
    }
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PositionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(PositionStatus::New),
            "PARTIALLY_FILLED" => Ok(PositionStatus::PartiallyFilled),
            "FILLED" => Ok(PositionStatus::Filled),
            "CLOSED" => Ok(PositionStatus::Closed),
            "CANCELED" => Ok(PositionStatus::Canceled),
            "EXPIRED" => Ok(PositionStatus::Expired),
            other => Err(format!("unknown position status: {}", other)),
        }
    }
}

/// Quantities for one leg of a position
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LegFill {
    pub orig_qty: Decimal,
    pub executed_qty: Decimal,
    pub cumulative_quote_qty: Decimal,
    /// cumulative quote / fill price, at base asset precision
    pub actual_qty: Option<Decimal>,
}

/// One trading cycle: entry leg, exit leg and profit bookkeeping
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub transaction_id: Uuid,
    pub order_id: Option<OrderId>,
    pub sell_order_id: Option<OrderId>,
    pub symbol: String,
    pub side: Side,
    pub status: PositionStatus,
    pub trade_type: TradeType,
    pub amount: Decimal,
    pub buy_price: Option<Decimal>,
    pub sell_price: Option<Decimal>,
    pub current_price: Option<Decimal>,
    pub buy: LegFill,
    pub sell: LegFill,
    /// Base quantity sold by this position's sell orders that are no longer working
    #[serde(default)]
    pub sold_qty: Decimal,
    /// Quote proceeds matching `sold_qty`
    #[serde(default)]
    pub sold_quote_qty: Decimal,
    pub unrealized_profit: Option<Decimal>,
    pub realized_profit: Option<Decimal>,
    pub update_time: Option<DateTime<Utc>>,
    pub expired: bool,
    pub created_at: DateTime<Utc>,
}

impl Position {
    /// Fresh row for a just-placed buy order
    pub fn opened(
        symbol: &str,
        trade_type: TradeType,
        amount: Decimal,
        bid_price: Decimal,
        order: &OrderResult,
    ) -> Self {
        let now = Utc::now();
        Self {
            transaction_id: Uuid::new_v4(),
            order_id: Some(order.order_id),
            sell_order_id: None,
            symbol: symbol.to_string(),
            side: Side::Buy,
            status: PositionStatus::from_order(order.status),
            trade_type,
            amount,
            buy_price: Some(bid_price),
            sell_price: None,
            current_price: None,
            buy: LegFill {
                orig_qty: order.orig_qty,
                executed_qty: order.executed_qty,
                cumulative_quote_qty: order.cumulative_quote_qty,
                actual_qty: None,
            },
            sell: LegFill::default(),
            sold_qty: Decimal::ZERO,
            sold_quote_qty: Decimal::ZERO,
            unrealized_profit: None,
            realized_profit: None,
            update_time: order.update_time.or(Some(now)),
            expired: false,
            created_at: now,
        }
    }

    pub fn is_open(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Quantity actually bought, falling back to executed quantity
    pub fn held_quantity(&self) -> Decimal {
        self.buy.actual_qty.unwrap_or(self.buy.executed_qty)
    }

    /// Held quantity not yet sold by earlier sell orders
    pub fn unsold_quantity(&self) -> Decimal {
        (self.held_quantity() - self.sold_qty).max(Decimal::ZERO)
    }

    /// Move the current sell order's fill into the sold totals and clear the leg
    ///
    /// Called once per sell order, when it stops working without filling.
    pub fn settle_sell_leg(&mut self) {
        self.sold_qty += self.sell.executed_qty;
        self.sold_quote_qty += self.sell.cumulative_quote_qty;
        self.sell = LegFill::default();
    }
}

/// Directional call carried by a prediction
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
    None,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "long",
            Direction::Short => "short",
            Direction::None => "none",
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "long" => Ok(Direction::Long),
            "short" => Ok(Direction::Short),
            "none" | "-" | "" => Ok(Direction::None),
            other => Err(format!("unknown direction: {}", other)),
        }
    }
}

/// Latest prediction for a symbol, read-only to the engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Signal {
    pub symbol: String,
    pub direction: Direction,
    /// Minutes since the call was made; `None` when the feed shows a placeholder
    pub elapsed_minutes: Option<i64>,
    pub trade_time: Option<DateTime<Utc>>,
    pub entry_price: Option<Decimal>,
    pub target_price: Option<Decimal>,
    pub current_price: Option<Decimal>,
    pub price_spread: Option<Decimal>,
    pub amount: Option<Decimal>,
    pub current_profit: Option<Decimal>,
    pub daily_profit: Option<Decimal>,
    pub monthly_profit: Option<Decimal>,
    pub updated_at: DateTime<Utc>,
}

impl Signal {
    /// Placeholder row written before the feed has a call for this symbol
    pub fn is_placeholder(&self) -> bool {
        self.direction == Direction::None && self.elapsed_minutes.is_none()
    }
}

/// LOT_SIZE filter
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LotSizeFilter {
    pub min_qty: Decimal,
    pub max_qty: Decimal,
    pub step_size: Decimal,
}

/// NOTIONAL filter
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotionalFilter {
    pub min_notional: Decimal,
    pub max_notional: Decimal,
}

/// Exchange-declared trading rules for a pair, fetched once per run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExchangeFilters {
    pub symbol: String,
    pub base_asset_precision: u32,
    pub quote_precision: u32,
    pub lot_size: Option<LotSizeFilter>,
    pub notional: Option<NotionalFilter>,
    pub tick_size: Option<Decimal>,
}

impl ExchangeFilters {
    pub fn step_size(&self) -> Option<Decimal> {
        self.lot_size.as_ref().map(|lot| lot.step_size)
    }
}

/// Order placement request
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Decimal,
    pub time_in_force: TimeInForce,
}

impl OrderRequest {
    pub fn limit(symbol: &str, side: Side, quantity: Decimal, price: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Limit,
            quantity,
            price,
            time_in_force: TimeInForce::Gtc,
        }
    }
}

/// Snapshot returned by every order call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderResult {
    pub order_id: OrderId,
    pub symbol: String,
    pub side: Side,
    pub status: OrderStatus,
    pub price: Decimal,
    pub orig_qty: Decimal,
    pub executed_qty: Decimal,
    pub cumulative_quote_qty: Decimal,
    pub update_time: Option<DateTime<Utc>>,
}

/// Free/locked balance of one asset
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Balance {
    pub asset: String,
    pub free: Decimal,
    pub locked: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn test_order(status: OrderStatus) -> OrderResult {
        OrderResult {
            order_id: 42,
            symbol: "BTCUSDT".to_string(),
            side: Side::Buy,
            status,
            price: dec!(20000),
            orig_qty: dec!(0.01),
            executed_qty: dec!(0),
            cumulative_quote_qty: dec!(0),
            update_time: None,
        }
    }

    #[test]
    fn test_position_opened_from_order() {
        let order = test_order(OrderStatus::New);
        let position =
            Position::opened("BTCUSDT", TradeType::Spot, dec!(0.01), dec!(20000), &order);

        assert_eq!(position.order_id, Some(42));
        assert_eq!(position.status, PositionStatus::New);
        assert_eq!(position.side, Side::Buy);
        assert_eq!(position.buy.orig_qty, dec!(0.01));
        assert!(position.is_open());
        assert!(!position.expired);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(PositionStatus::Closed.is_terminal());
        assert!(PositionStatus::Canceled.is_terminal());
        assert!(PositionStatus::Expired.is_terminal());
        assert!(!PositionStatus::Filled.is_terminal());
        assert!(!PositionStatus::PartiallyFilled.is_terminal());
    }

    #[test]
    fn test_status_string_roundtrip() {
        for status in [
            PositionStatus::New,
            PositionStatus::PartiallyFilled,
            PositionStatus::Filled,
            PositionStatus::Closed,
            PositionStatus::Canceled,
            PositionStatus::Expired,
        ] {
            assert_eq!(status.as_str().parse::<PositionStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_direction_placeholder_parsing() {
        assert_eq!("Long".parse::<Direction>().unwrap(), Direction::Long);
        assert_eq!("-".parse::<Direction>().unwrap(), Direction::None);
        assert!("sideways".parse::<Direction>().is_err());
    }

    #[test]
    fn test_held_quantity_prefers_actual() {
        let mut position = Position::opened(
            "BTCUSDT",
            TradeType::Spot,
            dec!(0.01),
            dec!(20000),
            &test_order(OrderStatus::Filled),
        );
        position.buy.executed_qty = dec!(0.01);
        assert_eq!(position.held_quantity(), dec!(0.01));

        position.buy.actual_qty = Some(dec!(0.0099));
        assert_eq!(position.held_quantity(), dec!(0.0099));
    }

    #[test]
    fn test_settled_sell_leg_reduces_unsold_quantity() {
        let mut position = Position::opened(
            "BTCUSDT",
            TradeType::Spot,
            dec!(0.01),
            dec!(20000),
            &test_order(OrderStatus::Filled),
        );
        position.buy.executed_qty = dec!(0.01);
        position.sell.executed_qty = dec!(0.004);
        position.sell.cumulative_quote_qty = dec!(80.04);

        position.settle_sell_leg();
        assert_eq!(position.sold_qty, dec!(0.004));
        assert_eq!(position.sold_quote_qty, dec!(80.04));
        assert_eq!(position.sell, LegFill::default());
        assert_eq!(position.unsold_quantity(), dec!(0.006));

        position.settle_sell_leg();
        assert_eq!(position.sold_qty, dec!(0.004));
    }
}
