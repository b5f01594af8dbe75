use crate::error::RejectReason;
use crate::models::ExchangeFilters;
use rust_decimal::{Decimal, RoundingStrategy};

/// Fixed-point arithmetic at the pair's declared base asset precision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Precision {
    digits: u32,
}

impl Precision {
    pub fn new(digits: u32) -> Self {
        Self { digits }
    }

    pub fn for_filters(filters: &ExchangeFilters) -> Self {
        Self::new(filters.base_asset_precision)
    }

    pub fn digits(&self) -> u32 {
        self.digits
    }

    /// Round half-to-even to the declared precision and pin the scale
    pub fn round(&self, value: Decimal) -> Decimal {
        let mut rounded = value.round_dp_with_strategy(self.digits, RoundingStrategy::MidpointNearestEven);
        rounded.rescale(self.digits);
        rounded
    }

    /// Truncate toward zero; used for quantities sent to the exchange
    pub fn truncate(&self, value: Decimal) -> Decimal {
        let mut truncated = value.round_dp_with_strategy(self.digits, RoundingStrategy::ToZero);
        truncated.rescale(self.digits);
        truncated
    }

    /// `cumulativeQuoteQty / fillPrice`; zero when nothing has a price yet
    pub fn actual_filled_quantity(&self, cumulative_quote_qty: Decimal, fill_price: Decimal) -> Decimal {
        if fill_price.is_zero() {
            return self.round(Decimal::ZERO);
        }
        self.round(cumulative_quote_qty / fill_price)
    }

    /// `(currentPrice - buyPrice) * actualBuyQty`
    pub fn unrealized_profit(
        &self,
        current_price: Decimal,
        buy_price: Decimal,
        actual_buy_qty: Decimal,
    ) -> Decimal {
        self.round((current_price - buy_price) * actual_buy_qty)
    }

    /// `actualSellQty * sellPrice - actualBuyQty * buyPrice`
    pub fn realized_profit(
        &self,
        actual_sell_qty: Decimal,
        sell_price: Decimal,
        actual_buy_qty: Decimal,
        buy_price: Decimal,
    ) -> Decimal {
        let sell_value = actual_sell_qty * sell_price;
        let buy_value = actual_buy_qty * buy_price;
        self.round(sell_value - buy_value)
    }
}

/// Largest multiple of `step` not above `qty`
pub fn floor_to_step(qty: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return qty;
    }
    let steps = (qty / step).floor();
    (steps * step).normalize()
}

/// Snap a price down onto the tick grid
pub fn align_price(price: Decimal, tick: Option<Decimal>) -> Decimal {
    match tick {
        Some(tick) if tick > Decimal::ZERO => ((price / tick).floor() * tick).normalize(),
        _ => price,
    }
}

/// Recompute a rejected sell quantity
///
/// # Arguments
/// * `reason` - Classified rejection from the exchange
/// * `quantity` - Quantity that was just rejected
/// * `free_balance` - Live free balance of the base asset (used for balance rejections)
///
/// # Returns
/// The quantity to retry with; unchanged for reasons that have no adjustment.
pub fn adjust_sell_quantity(
    reason: RejectReason,
    quantity: Decimal,
    free_balance: Decimal,
    filters: &ExchangeFilters,
) -> Decimal {
    let precision = Precision::for_filters(filters);
    let step = filters.step_size().unwrap_or(Decimal::ZERO);

    match reason {
        RejectReason::InsufficientBalance => {
            let trimmed = precision.truncate(free_balance - step);
            trimmed.max(Decimal::ZERO)
        }
        RejectReason::Precision => {
            let digits = if step > Decimal::ZERO {
                step.normalize().scale().min(precision.digits())
            } else {
                precision.digits()
            };
            Precision::new(digits).truncate(quantity)
        }
        RejectReason::LotSize => floor_to_step(quantity, step),
        RejectReason::Notional | RejectReason::Other => quantity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LotSizeFilter;
    use rust_decimal_macros::dec;

    fn filters(step: Decimal, precision: u32) -> ExchangeFilters {
        ExchangeFilters {
            symbol: "BTCUSDT".to_string(),
            base_asset_precision: precision,
            quote_precision: 8,
            lot_size: Some(LotSizeFilter {
                min_qty: dec!(0.0001),
                max_qty: dec!(100),
                step_size: step,
            }),
            notional: None,
            tick_size: Some(dec!(0.01)),
        }
    }

    #[test]
    fn test_actual_filled_quantity() {
        let precision = Precision::new(4);
        let qty = precision.actual_filled_quantity(dec!(200), dec!(20000));
        assert_eq!(qty, dec!(0.0100));
        assert_eq!(qty.to_string(), "0.0100");
    }

    #[test]
    fn test_actual_filled_quantity_without_price() {
        let precision = Precision::new(8);
        assert_eq!(precision.actual_filled_quantity(dec!(0), dec!(0)), Decimal::ZERO);
    }

    #[test]
    fn test_realized_profit_has_no_drift() {
        let precision = Precision::new(8);
        let mut total = Decimal::ZERO;
        for _ in 0..1000 {
            let profit = precision.realized_profit(dec!(0.01), dec!(20500), dec!(0.01), dec!(20000));
            assert_eq!(profit, dec!(5.00));
            total += profit;
        }
        assert_eq!(total, dec!(5000));
    }

    #[test]
    fn test_unrealized_profit() {
        let precision = Precision::new(8);
        assert_eq!(
            precision.unrealized_profit(dec!(19900), dec!(20000), dec!(0.01)),
            dec!(-1)
        );
    }

    #[test]
    fn test_round_is_half_even_and_truncate_is_toward_zero() {
        let precision = Precision::new(2);
        assert_eq!(precision.round(dec!(0.125)), dec!(0.12));
        assert_eq!(precision.round(dec!(0.135)), dec!(0.14));
        assert_eq!(precision.truncate(dec!(0.129)), dec!(0.12));
    }

    #[test]
    fn test_floor_to_step() {
        assert_eq!(floor_to_step(dec!(0.01234), dec!(0.001)), dec!(0.012));
        assert_eq!(floor_to_step(dec!(5.7), dec!(1)), dec!(5));
        assert_eq!(floor_to_step(dec!(0.5), dec!(0)), dec!(0.5));
    }

    #[test]
    fn test_align_price() {
        assert_eq!(align_price(dec!(20000.129), Some(dec!(0.01))), dec!(20000.12));
        assert_eq!(align_price(dec!(20000.129), None), dec!(20000.129));
    }

    #[test]
    fn test_adjust_for_insufficient_balance() {
        let f = filters(dec!(0.0001), 8);
        let qty = adjust_sell_quantity(
            RejectReason::InsufficientBalance,
            dec!(0.0100),
            dec!(0.00999),
            &f,
        );
        assert_eq!(qty, dec!(0.00989));
    }

    #[test]
    fn test_adjust_for_precision() {
        let f = filters(dec!(0.0001), 8);
        let qty = adjust_sell_quantity(RejectReason::Precision, dec!(0.012345678), dec!(1), &f);
        assert_eq!(qty, dec!(0.0123));
    }

    #[test]
    fn test_adjust_for_lot_size() {
        let f = filters(dec!(0.001), 8);
        let qty = adjust_sell_quantity(RejectReason::LotSize, dec!(0.01234), dec!(1), &f);
        assert_eq!(qty, dec!(0.012));
    }

    #[test]
    fn test_unknown_rejection_keeps_quantity() {
        let f = filters(dec!(0.001), 8);
        let qty = adjust_sell_quantity(RejectReason::Other, dec!(0.01234), dec!(1), &f);
        assert_eq!(qty, dec!(0.01234));
    }
}
