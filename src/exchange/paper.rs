use super::Exchange;
use crate::error::ExchangeError;
use crate::execution::precision::align_price;
use crate::models::{
    Balance, ExchangeFilters, LotSizeFilter, NotionalFilter, OrderId, OrderRequest, OrderResult,
    OrderStatus, Side,
};
use async_trait::async_trait;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

const INSUFFICIENT_BALANCE: &str = "Account has insufficient balance for requested action.";
const PRECISION_OVER_MAX: &str = "Precision is over the maximum defined for this asset.";
const LOT_SIZE_FAILURE: &str = "Filter failure: LOT_SIZE";
const NOTIONAL_FAILURE: &str = "Filter failure: NOTIONAL";
const PRICE_FILTER_FAILURE: &str = "Filter failure: PRICE_FILTER";
const UNKNOWN_ORDER: &str = "Unknown order sent.";

/// Parameters of the simulated venue
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PaperConfig {
    pub seed: u64,
    /// Starting mid price
    pub mid_price: Decimal,
    /// Max random-walk move per market tick, in basis points
    pub volatility_bps: u32,
    /// Distance between book levels, in price ticks
    pub level_spacing_ticks: u32,
    /// Share of the remaining quantity filled each time the market crosses an order
    pub fill_ratio: Decimal,
    pub quote_balance: Decimal,
    pub base_balance: Decimal,
    pub base_asset_precision: u32,
    pub quote_precision: u32,
    pub min_qty: Decimal,
    pub max_qty: Decimal,
    pub step_size: Decimal,
    pub min_notional: Decimal,
    pub max_notional: Decimal,
    pub tick_size: Decimal,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            mid_price: Decimal::new(20_000, 0),
            volatility_bps: 5,
            level_spacing_ticks: 100,
            fill_ratio: Decimal::new(5, 1),
            quote_balance: Decimal::new(10_000, 0),
            base_balance: Decimal::ZERO,
            base_asset_precision: 8,
            quote_precision: 8,
            min_qty: Decimal::new(1, 5),
            max_qty: Decimal::new(9_000, 0),
            step_size: Decimal::new(1, 5),
            min_notional: Decimal::new(5, 0),
            max_notional: Decimal::new(9_000_000, 0),
            tick_size: Decimal::new(1, 2),
        }
    }
}

struct PaperState {
    rng: StdRng,
    mid: Decimal,
    next_order_id: OrderId,
    orders: HashMap<OrderId, OrderResult>,
    balances: HashMap<String, Balance>,
}

/// Seeded random-walk spot venue for a single pair
///
/// Every market read advances the walk one step and matches resting orders
/// against the new top of book. Orders fill at their limit price, possibly in
/// several partial fills. Funds are locked while an order rests.
pub struct PaperExchange {
    config: PaperConfig,
    symbol: String,
    base_asset: String,
    quote_asset: String,
    state: Mutex<PaperState>,
}

impl PaperExchange {
    pub fn new(config: PaperConfig, symbol: &str, base_asset: &str, quote_asset: &str) -> Self {
        let mut balances = HashMap::new();
        balances.insert(
            base_asset.to_string(),
            Balance {
                asset: base_asset.to_string(),
                free: config.base_balance,
                locked: Decimal::ZERO,
            },
        );
        balances.insert(
            quote_asset.to_string(),
            Balance {
                asset: quote_asset.to_string(),
                free: config.quote_balance,
                locked: Decimal::ZERO,
            },
        );

        let state = PaperState {
            rng: StdRng::seed_from_u64(config.seed),
            mid: align_price(config.mid_price, Some(config.tick_size)),
            next_order_id: 1,
            orders: HashMap::new(),
            balances,
        };

        tracing::info!(
            "Paper venue for {} at mid {} (seed {})",
            symbol,
            state.mid,
            config.seed
        );

        Self {
            config,
            symbol: symbol.to_string(),
            base_asset: base_asset.to_string(),
            quote_asset: quote_asset.to_string(),
            state: Mutex::new(state),
        }
    }

    fn state(&self) -> MutexGuard<'_, PaperState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_symbol(&self, symbol: &str) -> Result<(), ExchangeError> {
        if symbol == self.symbol {
            Ok(())
        } else {
            Err(ExchangeError::UnknownSymbol(symbol.to_string()))
        }
    }

    fn level_spacing(&self) -> Decimal {
        self.config.tick_size * Decimal::from(self.config.level_spacing_ticks.max(1))
    }

    fn level_price(&self, mid: Decimal, side: Side, depth: usize) -> Decimal {
        let offset = self.level_spacing() * Decimal::from(depth as u64 + 1);
        match side {
            Side::Buy => (mid - offset).max(self.config.tick_size),
            Side::Sell => mid + offset,
        }
    }

    /// Advance the random walk one step and fill whatever the new book crosses
    fn tick(&self, state: &mut PaperState) {
        let bps = self.config.volatility_bps as i64;
        let step = state.rng.gen_range(-bps..=bps);
        let moved = state.mid + state.mid * Decimal::new(step, 4);
        let moved = align_price(moved, Some(self.config.tick_size));
        if moved > self.level_spacing() {
            state.mid = moved;
        }

        let best_bid = self.level_price(state.mid, Side::Buy, 0);
        let best_ask = self.level_price(state.mid, Side::Sell, 0);

        let crossed: Vec<OrderId> = state
            .orders
            .values()
            .filter(|order| order.status.is_working())
            .filter(|order| match order.side {
                Side::Buy => best_ask <= order.price,
                Side::Sell => best_bid >= order.price,
            })
            .map(|order| order.order_id)
            .collect();

        for order_id in crossed {
            self.fill(state, order_id);
        }
    }

    fn fill(&self, state: &mut PaperState, order_id: OrderId) {
        let Some(order) = state.orders.get(&order_id).cloned() else {
            return;
        };

        let remaining = order.orig_qty - order.executed_qty;
        let mut qty = self.floor_to_step(remaining * self.config.fill_ratio);
        if qty.is_zero() || qty > remaining {
            qty = remaining;
        }
        let quote = qty * order.price;

        match order.side {
            Side::Buy => {
                self.adjust(state, &self.quote_asset, Decimal::ZERO, -quote);
                self.adjust(state, &self.base_asset, qty, Decimal::ZERO);
            }
            Side::Sell => {
                self.adjust(state, &self.base_asset, Decimal::ZERO, -qty);
                self.adjust(state, &self.quote_asset, quote, Decimal::ZERO);
            }
        }

        if let Some(order) = state.orders.get_mut(&order_id) {
            order.executed_qty += qty;
            order.cumulative_quote_qty += quote;
            order.status = if order.executed_qty >= order.orig_qty {
                OrderStatus::Filled
            } else {
                OrderStatus::PartiallyFilled
            };
            order.update_time = Some(Utc::now());
            tracing::debug!(
                "[paper] {} {} filled {} @ {} ({}/{})",
                order.side,
                order.order_id,
                qty,
                order.price,
                order.executed_qty,
                order.orig_qty
            );
        }
    }

    fn adjust(&self, state: &mut PaperState, asset: &str, free: Decimal, locked: Decimal) {
        let balance = state
            .balances
            .entry(asset.to_string())
            .or_insert_with(|| Balance {
                asset: asset.to_string(),
                ..Balance::default()
            });
        balance.free += free;
        balance.locked += locked;
    }

    fn free(&self, state: &PaperState, asset: &str) -> Decimal {
        state
            .balances
            .get(asset)
            .map(|b| b.free)
            .unwrap_or(Decimal::ZERO)
    }

    fn floor_to_step(&self, qty: Decimal) -> Decimal {
        crate::execution::precision::floor_to_step(qty, self.config.step_size)
    }

    /// Binance-style validation, in the order the venue reports failures
    fn validate(&self, request: &OrderRequest) -> Result<(), ExchangeError> {
        let qty = request.quantity.normalize();
        if qty.scale() > self.config.base_asset_precision {
            return Err(ExchangeError::rejected(PRECISION_OVER_MAX));
        }
        if qty < self.config.min_qty || qty > self.config.max_qty {
            return Err(ExchangeError::rejected(LOT_SIZE_FAILURE));
        }
        if !self.config.step_size.is_zero()
            && !((qty - self.config.min_qty) % self.config.step_size).is_zero()
        {
            return Err(ExchangeError::rejected(LOT_SIZE_FAILURE));
        }
        if !self.config.tick_size.is_zero() && !(request.price % self.config.tick_size).is_zero() {
            return Err(ExchangeError::rejected(PRICE_FILTER_FAILURE));
        }
        let notional = qty * request.price;
        if notional < self.config.min_notional || notional > self.config.max_notional {
            return Err(ExchangeError::rejected(NOTIONAL_FAILURE));
        }
        Ok(())
    }
}

#[async_trait]
impl Exchange for PaperExchange {
    async fn filters(&self, symbol: &str) -> Result<ExchangeFilters, ExchangeError> {
        self.check_symbol(symbol)?;
        Ok(ExchangeFilters {
            symbol: symbol.to_string(),
            base_asset_precision: self.config.base_asset_precision,
            quote_precision: self.config.quote_precision,
            lot_size: Some(LotSizeFilter {
                min_qty: self.config.min_qty,
                max_qty: self.config.max_qty,
                step_size: self.config.step_size,
            }),
            notional: Some(NotionalFilter {
                min_notional: self.config.min_notional,
                max_notional: self.config.max_notional,
            }),
            tick_size: Some(self.config.tick_size),
        })
    }

    async fn book_price(
        &self,
        symbol: &str,
        side: Side,
        depth: usize,
    ) -> Result<Decimal, ExchangeError> {
        self.check_symbol(symbol)?;
        let mut state = self.state();
        self.tick(&mut state);
        // bid ladder runs out before reaching zero
        if side == Side::Buy
            && state.mid <= self.level_spacing() * Decimal::from(depth as u64 + 1)
        {
            return Err(ExchangeError::EmptyBook(symbol.to_string()));
        }
        Ok(self.level_price(state.mid, side, depth))
    }

    async fn current_price(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        self.check_symbol(symbol)?;
        let mut state = self.state();
        self.tick(&mut state);
        Ok(state.mid)
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderResult, ExchangeError> {
        self.check_symbol(&request.symbol)?;
        self.validate(request)?;

        let mut state = self.state();
        let quantity = request.quantity.normalize();
        match request.side {
            Side::Buy => {
                let cost = quantity * request.price;
                if self.free(&state, &self.quote_asset) < cost {
                    return Err(ExchangeError::rejected(INSUFFICIENT_BALANCE));
                }
                self.adjust(&mut state, &self.quote_asset, -cost, cost);
            }
            Side::Sell => {
                if self.free(&state, &self.base_asset) < quantity {
                    return Err(ExchangeError::rejected(INSUFFICIENT_BALANCE));
                }
                self.adjust(&mut state, &self.base_asset, -quantity, quantity);
            }
        }

        let order_id = state.next_order_id;
        state.next_order_id += 1;
        let order = OrderResult {
            order_id,
            symbol: request.symbol.clone(),
            side: request.side,
            status: OrderStatus::New,
            price: request.price,
            orig_qty: quantity,
            executed_qty: Decimal::ZERO,
            cumulative_quote_qty: Decimal::ZERO,
            update_time: Some(Utc::now()),
        };
        state.orders.insert(order_id, order.clone());

        tracing::debug!(
            "[paper] placed {} {} {} @ {}",
            order.side,
            order_id,
            quantity,
            request.price
        );

        Ok(order)
    }

    async fn order_details(
        &self,
        symbol: &str,
        order_id: OrderId,
    ) -> Result<Option<OrderResult>, ExchangeError> {
        self.check_symbol(symbol)?;
        let mut state = self.state();
        self.tick(&mut state);
        Ok(state.orders.get(&order_id).cloned())
    }

    async fn cancel_order(
        &self,
        symbol: &str,
        order_id: OrderId,
    ) -> Result<OrderResult, ExchangeError> {
        self.check_symbol(symbol)?;
        let mut state = self.state();

        let order = match state.orders.get(&order_id) {
            Some(order) if order.status.is_working() => order.clone(),
            _ => return Err(ExchangeError::rejected(UNKNOWN_ORDER)),
        };

        let remaining = order.orig_qty - order.executed_qty;
        match order.side {
            Side::Buy => {
                let held = remaining * order.price;
                self.adjust(&mut state, &self.quote_asset, held, -held);
            }
            Side::Sell => {
                self.adjust(&mut state, &self.base_asset, remaining, -remaining);
            }
        }

        let mut canceled = order;
        canceled.status = OrderStatus::Canceled;
        canceled.update_time = Some(Utc::now());
        state.orders.insert(order_id, canceled.clone());

        Ok(canceled)
    }

    async fn open_orders(&self, symbol: &str) -> Result<Vec<OrderResult>, ExchangeError> {
        self.check_symbol(symbol)?;
        let state = self.state();
        let mut open: Vec<OrderResult> = state
            .orders
            .values()
            .filter(|order| order.status.is_working())
            .cloned()
            .collect();
        open.sort_by_key(|order| order.order_id);
        Ok(open)
    }

    async fn account_balance(&self, asset: &str) -> Result<Balance, ExchangeError> {
        let state = self.state();
        Ok(state.balances.get(asset).cloned().unwrap_or_else(|| Balance {
            asset: asset.to_string(),
            ..Balance::default()
        }))
    }

    fn name(&self) -> &str {
        "paper"
    }
}
