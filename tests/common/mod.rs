use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use spotbot::config::EngineConfig;
use spotbot::db::{MemoryStore, SignalSource};
use spotbot::exchange::Exchange;
use spotbot::execution::{EngineContext, Pacer};
use spotbot::persistence::{ObserverSet, PositionObserver};
use spotbot::{
    Balance, Direction, ExchangeError, ExchangeFilters, LotSizeFilter, NotionalFilter, OrderId,
    OrderRequest, OrderResult, OrderStatus, Position, PositionStatus, Side, Signal, StoreError,
    TradeType,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const PAIR: &str = "BTCUSDT";
pub const SYMBOL: &str = "btc";

/// What `order_details` reports on a given poll
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Poll {
    Open,
    Partial(Decimal),
    Filled,
    Canceled,
    Gone,
}

/// How the venue answers a cancel request
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OnCancel {
    Cancel,
    /// The cancel response already reports the fill
    Fill,
    /// Cancel fails, the order turns out filled on the next read
    RaceFill,
}

/// Scripted life of one placed order; the last poll repeats
#[derive(Debug, Clone)]
pub struct OrderScript {
    polls: Vec<Poll>,
    on_cancel: OnCancel,
}

impl OrderScript {
    pub fn new(polls: Vec<Poll>) -> Self {
        Self {
            polls,
            on_cancel: OnCancel::Cancel,
        }
    }

    pub fn filled_after(open_polls: usize) -> Self {
        let mut polls = vec![Poll::Open; open_polls];
        polls.push(Poll::Filled);
        Self::new(polls)
    }

    pub fn never_fills() -> Self {
        Self::new(vec![Poll::Open])
    }

    pub fn on_cancel(mut self, on_cancel: OnCancel) -> Self {
        self.on_cancel = on_cancel;
        self
    }
}

struct TrackedOrder {
    request: OrderRequest,
    script: OrderScript,
    polls_served: usize,
    last: OrderResult,
    filled_on_cancel: bool,
}

#[derive(Default)]
struct ScriptState {
    bids: Vec<Decimal>,
    asks: Vec<Decimal>,
    current_price: Decimal,
    balances: HashMap<String, Balance>,
    scripts: VecDeque<OrderScript>,
    rejections: VecDeque<String>,
    orders: HashMap<OrderId, TrackedOrder>,
    placed: Vec<OrderRequest>,
    canceled: Vec<OrderId>,
    next_order_id: OrderId,
}

/// Exchange double driven by per-order scripts
pub struct ScriptedExchange {
    filters: ExchangeFilters,
    state: Mutex<ScriptState>,
}

impl ScriptedExchange {
    pub fn new() -> Self {
        let state = ScriptState {
            bids: (0..10).map(|i| dec!(20000) - Decimal::from(i)).collect(),
            asks: (0..10).map(|i| dec!(20001) + Decimal::from(i)).collect(),
            current_price: dec!(20000),
            next_order_id: 100,
            ..ScriptState::default()
        };
        Self {
            filters: test_filters(),
            state: Mutex::new(state),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap()
    }

    /// Queue the script used by the next placed order
    pub fn push_order(&self, script: OrderScript) {
        self.state().scripts.push_back(script);
    }

    /// Reject the next placement with a venue message
    pub fn push_rejection(&self, message: &str) {
        self.state().rejections.push_back(message.to_string());
    }

    pub fn set_balance(&self, asset: &str, free: Decimal) {
        self.state().balances.insert(
            asset.to_string(),
            Balance {
                asset: asset.to_string(),
                free,
                locked: Decimal::ZERO,
            },
        );
    }

    pub fn set_current_price(&self, price: Decimal) {
        self.state().current_price = price;
    }

    pub fn placed(&self) -> Vec<OrderRequest> {
        self.state().placed.clone()
    }

    pub fn canceled(&self) -> Vec<OrderId> {
        self.state().canceled.clone()
    }

    fn snapshot(order_id: OrderId, request: &OrderRequest, status: OrderStatus, executed: Decimal) -> OrderResult {
        OrderResult {
            order_id,
            symbol: request.symbol.clone(),
            side: request.side,
            status,
            price: request.price,
            orig_qty: request.quantity,
            executed_qty: executed,
            cumulative_quote_qty: executed * request.price,
            update_time: Some(Utc::now()),
        }
    }
}

pub fn test_filters() -> ExchangeFilters {
    ExchangeFilters {
        symbol: PAIR.to_string(),
        base_asset_precision: 8,
        quote_precision: 8,
        lot_size: Some(LotSizeFilter {
            min_qty: dec!(0.00001),
            max_qty: dec!(9000),
            step_size: dec!(0.00001),
        }),
        notional: Some(NotionalFilter {
            min_notional: dec!(5),
            max_notional: dec!(9000000),
        }),
        tick_size: Some(dec!(0.01)),
    }
}

#[async_trait]
impl Exchange for ScriptedExchange {
    async fn filters(&self, _symbol: &str) -> Result<ExchangeFilters, ExchangeError> {
        Ok(self.filters.clone())
    }

    async fn book_price(
        &self,
        symbol: &str,
        side: Side,
        depth: usize,
    ) -> Result<Decimal, ExchangeError> {
        let state = self.state();
        let ladder = match side {
            Side::Buy => &state.bids,
            Side::Sell => &state.asks,
        };
        ladder
            .get(depth)
            .copied()
            .ok_or_else(|| ExchangeError::EmptyBook(symbol.to_string()))
    }

    async fn current_price(&self, _symbol: &str) -> Result<Decimal, ExchangeError> {
        Ok(self.state().current_price)
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderResult, ExchangeError> {
        let mut state = self.state();
        if let Some(message) = state.rejections.pop_front() {
            return Err(ExchangeError::rejected(message));
        }

        let order_id = state.next_order_id;
        state.next_order_id += 1;
        let script = state
            .scripts
            .pop_front()
            .unwrap_or_else(OrderScript::never_fills);
        let last = Self::snapshot(order_id, request, OrderStatus::New, Decimal::ZERO);

        state.placed.push(request.clone());
        state.orders.insert(
            order_id,
            TrackedOrder {
                request: request.clone(),
                script,
                polls_served: 0,
                last: last.clone(),
                filled_on_cancel: false,
            },
        );
        Ok(last)
    }

    async fn order_details(
        &self,
        _symbol: &str,
        order_id: OrderId,
    ) -> Result<Option<OrderResult>, ExchangeError> {
        let mut state = self.state();
        let Some(tracked) = state.orders.get_mut(&order_id) else {
            return Ok(None);
        };

        let status = if tracked.filled_on_cancel {
            Poll::Filled
        } else {
            let index = tracked
                .polls_served
                .min(tracked.script.polls.len().saturating_sub(1));
            tracked.polls_served += 1;
            tracked.script.polls.get(index).copied().unwrap_or(Poll::Open)
        };

        let result = match status {
            Poll::Open => Self::snapshot(order_id, &tracked.request, OrderStatus::New, Decimal::ZERO),
            Poll::Partial(executed) => Self::snapshot(
                order_id,
                &tracked.request,
                OrderStatus::PartiallyFilled,
                executed,
            ),
            Poll::Filled => Self::snapshot(
                order_id,
                &tracked.request,
                OrderStatus::Filled,
                tracked.request.quantity,
            ),
            Poll::Canceled => Self::snapshot(
                order_id,
                &tracked.request,
                OrderStatus::Canceled,
                tracked.last.executed_qty,
            ),
            Poll::Gone => return Ok(None),
        };
        tracked.last = result.clone();
        Ok(Some(result))
    }

    async fn cancel_order(
        &self,
        _symbol: &str,
        order_id: OrderId,
    ) -> Result<OrderResult, ExchangeError> {
        let mut state = self.state();
        state.canceled.push(order_id);
        let Some(tracked) = state.orders.get_mut(&order_id) else {
            return Err(ExchangeError::rejected("Unknown order sent."));
        };

        match tracked.script.on_cancel {
            OnCancel::Cancel => {
                let result = Self::snapshot(
                    order_id,
                    &tracked.request,
                    OrderStatus::Canceled,
                    tracked.last.executed_qty,
                );
                tracked.last = result.clone();
                Ok(result)
            }
            OnCancel::Fill => {
                let result = Self::snapshot(
                    order_id,
                    &tracked.request,
                    OrderStatus::Filled,
                    tracked.request.quantity,
                );
                tracked.last = result.clone();
                Ok(result)
            }
            OnCancel::RaceFill => {
                tracked.filled_on_cancel = true;
                tracked.last.status = OrderStatus::Filled;
                Err(ExchangeError::rejected("Unknown order sent."))
            }
        }
    }

    async fn open_orders(&self, _symbol: &str) -> Result<Vec<OrderResult>, ExchangeError> {
        Ok(self
            .state()
            .orders
            .values()
            .filter(|tracked| tracked.last.status.is_working())
            .map(|tracked| tracked.last.clone())
            .collect())
    }

    async fn account_balance(&self, asset: &str) -> Result<Balance, ExchangeError> {
        Ok(self
            .state()
            .balances
            .get(asset)
            .cloned()
            .unwrap_or_else(|| Balance {
                asset: asset.to_string(),
                ..Balance::default()
            }))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Signal source that serves queued predictions in order; the last one repeats
#[derive(Default)]
pub struct SignalScript {
    queue: Mutex<VecDeque<Signal>>,
    last: Mutex<Option<Signal>>,
}

impl SignalScript {
    pub fn new(signals: Vec<Signal>) -> Self {
        Self {
            queue: Mutex::new(signals.into()),
            last: Mutex::new(None),
        }
    }
}

#[async_trait]
impl SignalSource for SignalScript {
    async fn latest_signal(&self, _symbol: &str) -> Result<Option<Signal>, StoreError> {
        let mut last = self.last.lock().unwrap();
        if let Some(next) = self.queue.lock().unwrap().pop_front() {
            *last = Some(next);
        }
        Ok(last.clone())
    }
}

pub fn signal(direction: Direction, elapsed_minutes: Option<i64>) -> Signal {
    Signal {
        symbol: SYMBOL.to_string(),
        direction,
        elapsed_minutes,
        trade_time: None,
        entry_price: Some(dec!(20000)),
        target_price: Some(dec!(20500)),
        current_price: Some(dec!(20000)),
        price_spread: None,
        amount: Some(dec!(0.01)),
        current_profit: None,
        daily_profit: None,
        monthly_profit: None,
        updated_at: Utc::now(),
    }
}

pub fn long(elapsed_minutes: i64) -> Signal {
    signal(Direction::Long, Some(elapsed_minutes))
}

pub fn flat(elapsed_minutes: i64) -> Signal {
    signal(Direction::None, Some(elapsed_minutes))
}

pub fn engine_config() -> EngineConfig {
    EngineConfig {
        symbol: SYMBOL.to_string(),
        trading_pair: PAIR.to_string(),
        base_asset: "BTC".to_string(),
        quote_asset: "USDT".to_string(),
        trade_type: TradeType::Spot,
        amount: dec!(0.01),
        buy_delay: 0,
        bid_retry: 5,
        sell_retry: 3,
        sell_index: 9,
        elapsed_time_exp: 60,
        book_depth: 10,
        max_sell_attempts: 5,
        max_sell_adjustments: 3,
        strict_step_size: false,
        run_forever: false,
        sleep_buffer_min: Duration::ZERO,
        sleep_buffer_max: Duration::ZERO,
        back_off_start: Duration::ZERO,
        back_off_limit: Duration::ZERO,
    }
}

/// Observer that keeps every published snapshot
#[derive(Default)]
pub struct SnapshotLog {
    snapshots: Mutex<Vec<Position>>,
}

impl SnapshotLog {
    pub fn snapshots(&self) -> Vec<Position> {
        self.snapshots.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<(Side, PositionStatus)> {
        self.snapshots()
            .iter()
            .map(|position| (position.side, position.status))
            .collect()
    }
}

#[async_trait]
impl PositionObserver for SnapshotLog {
    async fn publish(&self, position: &Position) {
        self.snapshots.lock().unwrap().push(position.clone());
    }
}

async fn build_context(
    config: EngineConfig,
    exchange: Arc<ScriptedExchange>,
    store: Arc<MemoryStore>,
    signals: Arc<dyn SignalSource>,
    observers: ObserverSet,
) -> Arc<EngineContext> {
    let ctx = EngineContext::new(Arc::new(config), exchange, store, signals, Arc::new(observers))
        .await
        .unwrap()
        .with_pacer(Pacer::immediate());
    Arc::new(ctx)
}

pub async fn context(
    config: EngineConfig,
    exchange: Arc<ScriptedExchange>,
    store: Arc<MemoryStore>,
    signals: Arc<dyn SignalSource>,
) -> Arc<EngineContext> {
    build_context(config, exchange, store, signals, ObserverSet::new()).await
}

/// Context whose published snapshots are kept for inspection
pub async fn recording_context(
    config: EngineConfig,
    exchange: Arc<ScriptedExchange>,
    store: Arc<MemoryStore>,
    signals: Arc<dyn SignalSource>,
) -> (Arc<EngineContext>, Arc<SnapshotLog>) {
    let log = Arc::new(SnapshotLog::default());
    let observers = ObserverSet::new().with(log.clone());
    let ctx = build_context(config, exchange, store, signals, observers).await;
    (ctx, log)
}
