use crate::error::{EngineError, RejectReason};
use crate::execution::filters::{check_notional, is_allowed_lot_size, is_allowed_notional};
use crate::execution::precision::{adjust_sell_quantity, Precision};
use crate::execution::session::{CancelOutcome, EngineContext, Session};
use crate::models::{
    Direction, OrderId, OrderRequest, OrderResult, OrderStatus, Position, PositionStatus, Side, Signal,
};
use rust_decimal::Decimal;
use std::sync::Arc;

/// How the sell leg ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    Closed,
    Expired,
}

/// Result of one priced sell attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SellAttempt {
    Filled,
    Unfilled,
    Vanished,
}

/// Copy a sell-order snapshot onto the position's sell leg
pub fn apply_sell_update(position: &mut Position, order: &OrderResult, precision: &Precision) {
    position.sell_order_id = Some(order.order_id);
    position.sell.orig_qty = order.orig_qty;
    position.sell.executed_qty = order.executed_qty;
    position.sell.cumulative_quote_qty = order.cumulative_quote_qty;
    if order.update_time.is_some() {
        position.update_time = order.update_time;
    }

    let fill_price = if order.price.is_zero() {
        position.sell_price.unwrap_or(Decimal::ZERO)
    } else {
        order.price
    };
    position.sell_price = Some(fill_price);
    if !order.executed_qty.is_zero() {
        position.sell.actual_qty =
            Some(precision.actual_filled_quantity(order.cumulative_quote_qty, fill_price));
    }

    position.status = match order.status {
        OrderStatus::New | OrderStatus::PartiallyFilled => PositionStatus::from_order(order.status),
        // Buy leg stays filled until the sell completes
        _ => PositionStatus::Filled,
    };
}

/// Drives the sell leg from monitoring to a closed position
pub struct ExitController {
    ctx: Arc<EngineContext>,
}

impl ExitController {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// Direction gone to "none", or the call has aged past the expiry threshold
    pub fn is_sell_signal(&self, signal: Option<&Signal>) -> bool {
        match signal {
            Some(signal) => {
                signal.direction == Direction::None
                    || signal
                        .elapsed_minutes
                        .is_some_and(|elapsed| elapsed >= self.ctx.config.elapsed_time_exp)
            }
            None => false,
        }
    }

    /// Monitor the filled position, then sell it
    pub async fn run(&self, session: &mut Session) -> Result<ExitOutcome, EngineError> {
        self.monitor(session).await?;
        self.sell(session).await
    }

    /// Recompute unrealized profit every iteration until a sell signal fires
    pub async fn monitor(&self, session: &mut Session) -> Result<(), EngineError> {
        loop {
            let signal = self.ctx.latest_signal().await?;
            self.refresh_profit(session.position_mut()?).await?;

            if self.is_sell_signal(signal.as_ref()) {
                if let Some(signal) = &signal {
                    tracing::info!(
                        "📉 Sell signal for {}: {} with elapsed {:?} (expiry {})",
                        signal.symbol,
                        signal.direction.as_str(),
                        signal.elapsed_minutes,
                        self.ctx.config.elapsed_time_exp
                    );
                }
                session.signal = signal;
                return Ok(());
            }

            session.signal = signal;
            self.ctx.pacer.idle().await;
        }
    }

    async fn refresh_profit(&self, position: &mut Position) -> Result<(), EngineError> {
        let current = self
            .ctx
            .exchange
            .current_price(&self.ctx.config.trading_pair)
            .await?;
        let buy_price = position.buy_price.unwrap_or(Decimal::ZERO);
        position.current_price = Some(current);
        position.unrealized_profit = Some(self.ctx.precision.unrealized_profit(
            current,
            buy_price,
            position.held_quantity(),
        ));

        tracing::debug!(
            "[monitor] {} current {} buy {} unrealized {:?}",
            position.symbol,
            current,
            buy_price,
            position.unrealized_profit
        );
        self.ctx.save(position).await
    }

    /// Sell attempts walking the ask ladder from `sell_index` toward the top of book
    pub async fn sell(&self, session: &mut Session) -> Result<ExitOutcome, EngineError> {
        let config = &self.ctx.config;
        let mut depth = config.sell_index.min(config.book_depth.saturating_sub(1));

        for attempt in 1..=config.max_sell_attempts {
            if attempt > 1 {
                depth = depth.saturating_sub(1);
            }
            tracing::info!(
                "[sell] attempt {}/{} at depth {}",
                attempt,
                config.max_sell_attempts,
                depth
            );

            match self.sell_attempt(session, depth).await? {
                SellAttempt::Filled => return Ok(ExitOutcome::Closed),
                SellAttempt::Vanished => return Ok(ExitOutcome::Expired),
                SellAttempt::Unfilled => self.ctx.pacer.idle().await,
            }
        }

        let transaction_id = session.position()?.transaction_id;
        tracing::error!(
            "🚨 Position {} still open after {} sell attempts",
            transaction_id,
            config.max_sell_attempts
        );
        Err(EngineError::SellAttemptsExhausted {
            transaction_id,
            attempts: config.max_sell_attempts,
        })
    }

    async fn sell_attempt(
        &self,
        session: &mut Session,
        depth: usize,
    ) -> Result<SellAttempt, EngineError> {
        let config = &self.ctx.config;
        let position = session.position_mut()?;

        // Earlier sell orders of this position may have sold part of it
        let quantity = self.ctx.precision.truncate(position.unsold_quantity());
        let price = self
            .ctx
            .exchange
            .book_price(&config.trading_pair, Side::Sell, depth)
            .await?;

        if !position.sold_qty.is_zero()
            && (quantity.is_zero()
                || !is_allowed_lot_size(&self.ctx.filters, quantity)
                || !is_allowed_notional(&self.ctx.filters, quantity, price))
        {
            tracing::warn!(
                "[sell] {} left of position {} cannot be sold, closing with {} sold",
                quantity,
                position.transaction_id,
                position.sold_qty
            );
            self.close(position).await?;
            return Ok(SellAttempt::Filled);
        }

        if let Err(violation) = check_notional(&self.ctx.filters, quantity, price) {
            tracing::warn!("[sell] {}", violation);
            return Ok(SellAttempt::Unfilled);
        }

        let Some(order) = self.place_sell(position, quantity, price).await? else {
            return Ok(SellAttempt::Unfilled);
        };
        let order_id = order.order_id;

        position.side = Side::Sell;
        position.sell_price = Some(price);
        apply_sell_update(position, &order, &self.ctx.precision);
        self.ctx.save(position).await?;
        tracing::info!("Sell order {} placed: {} @ {}", order_id, order.orig_qty, price);

        for poll in 1..=config.sell_retry {
            self.ctx.pacer.idle().await;

            let Some(order) = self
                .ctx
                .exchange
                .order_details(&config.trading_pair, order_id)
                .await?
            else {
                tracing::warn!(
                    "⚠️ Sell order {} vanished, expiring position {}",
                    order_id,
                    position.transaction_id
                );
                self.ctx.finish(position, PositionStatus::Expired).await?;
                return Ok(SellAttempt::Vanished);
            };

            apply_sell_update(position, &order, &self.ctx.precision);
            tracing::debug!(
                "[sell] poll {}/{}: order {} {} ({}/{})",
                poll,
                config.sell_retry,
                order_id,
                order.status,
                order.executed_qty,
                order.orig_qty
            );

            match order.status {
                OrderStatus::Filled => {
                    self.close(position).await?;
                    return Ok(SellAttempt::Filled);
                }
                OrderStatus::New | OrderStatus::PartiallyFilled => {
                    self.ctx.save(position).await?;
                }
                OrderStatus::Canceled | OrderStatus::Rejected | OrderStatus::Expired => {
                    tracing::warn!("Sell order {} ended {} on the venue", order_id, order.status);
                    position.settle_sell_leg();
                    self.ctx.save(position).await?;
                    return Ok(SellAttempt::Unfilled);
                }
            }
        }

        tracing::info!(
            "⏱️ Sell order {} not filled after {} polls, canceling",
            order_id,
            config.sell_retry
        );
        self.cancel_sell(position, order_id).await
    }

    /// Place a limit sell, adjusting the quantity after balance/precision/lot-size rejections
    ///
    /// Returns `None` when the venue rejects the notional, which only a new price can fix.
    async fn place_sell(
        &self,
        position: &Position,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<Option<OrderResult>, EngineError> {
        let config = &self.ctx.config;
        let mut quantity = quantity;
        let mut adjustments = 0;

        loop {
            let request = OrderRequest::limit(&config.trading_pair, Side::Sell, quantity, price);
            let err = match self.ctx.exchange.place_order(&request).await {
                Ok(order) => return Ok(Some(order)),
                Err(err) => err,
            };

            let reason = match err.reject_reason() {
                Some(RejectReason::Notional) => {
                    tracing::warn!("[sell] {} @ {} rejected: {}", quantity, price, err);
                    return Ok(None);
                }
                Some(
                    reason @ (RejectReason::InsufficientBalance
                    | RejectReason::Precision
                    | RejectReason::LotSize),
                ) => reason,
                _ => return Err(err.into()),
            };

            if adjustments >= config.max_sell_adjustments {
                tracing::error!(
                    "🚨 Sell quantity for position {} still rejected after {} adjustments: {}",
                    position.transaction_id,
                    adjustments,
                    err
                );
                return Err(EngineError::AdjustmentsExhausted {
                    transaction_id: position.transaction_id,
                    adjustments,
                });
            }
            adjustments += 1;

            let free = if reason == RejectReason::InsufficientBalance {
                self.ctx
                    .exchange
                    .account_balance(&config.base_asset)
                    .await?
                    .free
            } else {
                quantity
            };
            let adjusted = adjust_sell_quantity(reason, quantity, free, &self.ctx.filters);
            tracing::warn!(
                "[sell] {} rejected ({:?}), retrying with {} (adjustment {}/{})",
                quantity,
                reason,
                adjusted,
                adjustments,
                config.max_sell_adjustments
            );
            quantity = adjusted;
            self.ctx.pacer.idle().await;
        }
    }

    async fn cancel_sell(
        &self,
        position: &mut Position,
        order_id: OrderId,
    ) -> Result<SellAttempt, EngineError> {
        match self.ctx.cancel(order_id).await? {
            CancelOutcome::Filled(order) => {
                apply_sell_update(position, &order, &self.ctx.precision);
                tracing::info!("Sell order {} filled while canceling", order_id);
                self.close(position).await?;
                Ok(SellAttempt::Filled)
            }
            CancelOutcome::Canceled(order) => {
                if let Some(order) = order {
                    apply_sell_update(position, &order, &self.ctx.precision);
                }
                if !position.sell.executed_qty.is_zero() {
                    tracing::warn!(
                        "Sell order {} canceled with {} already sold",
                        order_id,
                        position.sell.executed_qty
                    );
                }
                position.settle_sell_leg();
                position.status = PositionStatus::Filled;
                self.ctx.save(position).await?;
                Ok(SellAttempt::Unfilled)
            }
        }
    }

    /// Cancel a sell order left working by an earlier process
    ///
    /// Returns `Some(Closed)` when it turns out to have filled.
    pub async fn recover_sell(
        &self,
        session: &mut Session,
    ) -> Result<Option<ExitOutcome>, EngineError> {
        let position = session.position_mut()?;
        let Some(order_id) = position.sell_order_id else {
            position.status = PositionStatus::Filled;
            self.ctx.save(position).await?;
            return Ok(None);
        };

        tracing::info!("♻️ Canceling sell order {} left by a previous run", order_id);
        match self.cancel_sell(position, order_id).await? {
            SellAttempt::Filled => Ok(Some(ExitOutcome::Closed)),
            SellAttempt::Vanished => Ok(Some(ExitOutcome::Expired)),
            SellAttempt::Unfilled => Ok(None),
        }
    }

    /// Book the final sell order on top of earlier partial sells and close the position
    async fn close(&self, position: &mut Position) -> Result<(), EngineError> {
        let precision = &self.ctx.precision;
        let sell_price = position.sell_price.unwrap_or(Decimal::ZERO);
        let buy_price = position.buy_price.unwrap_or(Decimal::ZERO);
        let final_qty = if position.sell.executed_qty.is_zero() {
            Decimal::ZERO
        } else {
            position.sell.actual_qty.unwrap_or_else(|| {
                precision.actual_filled_quantity(position.sell.cumulative_quote_qty, sell_price)
            })
        };
        let earlier_proceeds = position.sold_quote_qty;

        position.sold_qty += position.sell.executed_qty;
        position.sold_quote_qty += position.sell.cumulative_quote_qty;
        position.sell.actual_qty = Some(final_qty);
        position.realized_profit = Some(precision.round(
            earlier_proceeds
                + precision.realized_profit(
                    final_qty,
                    sell_price,
                    position.held_quantity(),
                    buy_price,
                ),
        ));
        position.unrealized_profit = Some(Decimal::ZERO);

        self.ctx.finish(position, PositionStatus::Closed).await?;
        tracing::info!(
            "🏁 Position {} closed: sold {} (last fill {} @ {}), realized profit {:?}",
            position.transaction_id,
            position.sold_qty,
            final_qty,
            sell_price,
            position.realized_profit
        );
        self.ctx.log_balances("position closed").await;
        Ok(())
    }
}
