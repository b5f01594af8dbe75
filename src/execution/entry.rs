use crate::error::EngineError;
use crate::execution::filters::{check_lot_size, check_notional};
use crate::execution::precision::{floor_to_step, Precision};
use crate::execution::session::{CancelOutcome, EngineContext, Session};
use crate::models::{
    Direction, OrderRequest, OrderResult, OrderStatus, Position, PositionStatus, Side, Signal,
};
use rust_decimal::Decimal;
use std::sync::Arc;

/// How the buy leg ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOutcome {
    Filled,
    Canceled,
    Expired,
}

/// Copy a buy-order snapshot onto the position
pub fn apply_buy_update(position: &mut Position, order: &OrderResult, precision: &Precision) {
    position.buy.orig_qty = order.orig_qty;
    position.buy.executed_qty = order.executed_qty;
    position.buy.cumulative_quote_qty = order.cumulative_quote_qty;
    position.status = PositionStatus::from_order(order.status);
    if order.update_time.is_some() {
        position.update_time = order.update_time;
    }

    if order.status == OrderStatus::Filled || !order.executed_qty.is_zero() {
        let fill_price = if order.price.is_zero() {
            position.buy_price.unwrap_or(Decimal::ZERO)
        } else {
            order.price
        };
        position.buy_price = Some(fill_price);
        position.buy.actual_qty =
            Some(precision.actual_filled_quantity(order.cumulative_quote_qty, fill_price));
    }
}

/// Drives the buy leg from signal to fill
pub struct EntryController {
    ctx: Arc<EngineContext>,
}

impl EntryController {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// A long call old enough to act on
    fn is_actionable(&self, signal: &Signal) -> bool {
        if signal.is_placeholder() || signal.direction != Direction::Long {
            return false;
        }
        matches!(signal.elapsed_minutes, Some(elapsed) if elapsed > self.ctx.config.buy_delay)
    }

    /// Configured amount, or the signal's suggestion when none is configured
    ///
    /// Truncated to base precision, then floored onto the lot step grid.
    fn order_amount(&self, signal: &Signal) -> Option<Decimal> {
        let amount = if self.ctx.config.amount > Decimal::ZERO {
            self.ctx.config.amount
        } else {
            signal.amount.filter(|a| *a > Decimal::ZERO)?
        };
        let step = self.ctx.filters.step_size().unwrap_or(Decimal::ZERO);
        Some(floor_to_step(self.ctx.precision.truncate(amount), step))
    }

    /// Wait for a signal, price it, place the buy and track it to a final state
    pub async fn run(&self, session: &mut Session) -> Result<EntryOutcome, EngineError> {
        let config = &self.ctx.config;

        let (signal, amount, price) = loop {
            let Some(signal) = self.ctx.latest_signal().await? else {
                tracing::debug!("[entry] no prediction for {} yet", config.symbol);
                self.ctx.pacer.idle().await;
                continue;
            };
            if !self.is_actionable(&signal) {
                tracing::debug!(
                    "[entry] waiting: {} is {} with elapsed {:?} (buy delay {})",
                    signal.symbol,
                    signal.direction.as_str(),
                    signal.elapsed_minutes,
                    config.buy_delay
                );
                self.ctx.pacer.idle().await;
                continue;
            }

            let Some(amount) = self.order_amount(&signal) else {
                tracing::warn!("[entry] no amount configured and none suggested by the signal");
                self.ctx.pacer.idle().await;
                continue;
            };

            let price = self
                .ctx
                .exchange
                .book_price(&config.trading_pair, Side::Buy, 0)
                .await?;

            if let Err(violation) = check_lot_size(&self.ctx.filters, amount, config.strict_step_size)
            {
                tracing::warn!("[entry] {}", violation);
                self.ctx.pacer.idle().await;
                continue;
            }
            if let Err(violation) = check_notional(&self.ctx.filters, amount, price) {
                tracing::warn!("[entry] {}", violation);
                self.ctx.pacer.idle().await;
                continue;
            }

            break (signal, amount, price);
        };

        tracing::info!(
            "📈 {} call on {} ({} min old), buying {} @ {}",
            signal.direction.as_str(),
            signal.symbol,
            signal.elapsed_minutes.unwrap_or_default(),
            amount,
            price
        );
        session.signal = Some(signal);

        let request = OrderRequest::limit(&config.trading_pair, Side::Buy, amount, price);
        let order = self.ctx.exchange.place_order(&request).await?;
        let position = Position::opened(
            &config.trading_pair,
            config.trade_type,
            amount,
            price,
            &order,
        );

        tracing::info!(
            "✅ Buy order {} placed for position {}",
            order.order_id,
            position.transaction_id
        );
        self.ctx.save(&position).await?;
        session.position = Some(position);

        self.track_fill(session).await
    }

    /// Poll the buy order up to `bid_retry` times, canceling it if it never fills
    pub async fn track_fill(&self, session: &mut Session) -> Result<EntryOutcome, EngineError> {
        let config = &self.ctx.config;
        let position = session.position_mut()?;
        let order_id = position.order_id.ok_or(EngineError::MissingPosition)?;

        for attempt in 1..=config.bid_retry {
            self.ctx.pacer.idle().await;

            let Some(order) = self
                .ctx
                .exchange
                .order_details(&config.trading_pair, order_id)
                .await?
            else {
                tracing::warn!(
                    "⚠️ Buy order {} vanished, expiring position {}",
                    order_id,
                    position.transaction_id
                );
                self.ctx.finish(position, PositionStatus::Expired).await?;
                return Ok(EntryOutcome::Expired);
            };

            apply_buy_update(position, &order, &self.ctx.precision);
            tracing::debug!(
                "[entry] poll {}/{}: order {} {} ({}/{})",
                attempt,
                config.bid_retry,
                order_id,
                order.status,
                order.executed_qty,
                order.orig_qty
            );

            match order.status {
                OrderStatus::Filled => {
                    self.ctx.save(position).await?;
                    tracing::info!(
                        "✅ Buy order {} filled: {} @ {:?}",
                        order_id,
                        position.held_quantity(),
                        position.buy_price
                    );
                    self.ctx.log_balances("buy filled").await;
                    return Ok(EntryOutcome::Filled);
                }
                OrderStatus::New | OrderStatus::PartiallyFilled => {
                    self.ctx.save(position).await?;
                }
                OrderStatus::Canceled | OrderStatus::Rejected => {
                    tracing::warn!("Buy order {} was {} by the venue", order_id, order.status);
                    self.ctx.finish(position, PositionStatus::Canceled).await?;
                    return Ok(EntryOutcome::Canceled);
                }
                OrderStatus::Expired => {
                    tracing::warn!("Buy order {} expired on the venue", order_id);
                    self.ctx.finish(position, PositionStatus::Expired).await?;
                    return Ok(EntryOutcome::Expired);
                }
            }
        }

        tracing::info!(
            "⏱️ Buy order {} not filled after {} polls, canceling",
            order_id,
            config.bid_retry
        );

        match self.ctx.cancel(order_id).await? {
            CancelOutcome::Filled(order) => {
                apply_buy_update(position, &order, &self.ctx.precision);
                self.ctx.save(position).await?;
                tracing::info!("✅ Buy order {} filled while canceling", order_id);
                self.ctx.log_balances("buy filled").await;
                Ok(EntryOutcome::Filled)
            }
            CancelOutcome::Canceled(order) => {
                if let Some(order) = order {
                    apply_buy_update(position, &order, &self.ctx.precision);
                }
                if !position.buy.executed_qty.is_zero() {
                    tracing::warn!(
                        "Buy order {} canceled with {} already executed; the remainder stays in the account",
                        order_id,
                        position.buy.executed_qty
                    );
                }
                self.ctx.finish(position, PositionStatus::Canceled).await?;
                Ok(EntryOutcome::Canceled)
            }
        }
    }
}
