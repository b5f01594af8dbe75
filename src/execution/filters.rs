use crate::models::ExchangeFilters;
use rust_decimal::Decimal;
use std::fmt;

/// Which exchange filter a candidate order breaks
#[derive(Debug, Clone, PartialEq)]
pub enum FilterViolation {
    BelowMinQty { amount: Decimal, min_qty: Decimal },
    AboveMaxQty { amount: Decimal, max_qty: Decimal },
    StepSize { amount: Decimal, step_size: Decimal },
    BelowMinNotional { notional: Decimal, min_notional: Decimal },
    AboveMaxNotional { notional: Decimal, max_notional: Decimal },
}

impl fmt::Display for FilterViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterViolation::BelowMinQty { amount, min_qty } => write!(
                f,
                "Amount: {} is less than min allowed LOT_SIZE: {}",
                amount, min_qty
            ),
            FilterViolation::AboveMaxQty { amount, max_qty } => write!(
                f,
                "Amount: {} is greater than max allowed LOT_SIZE: {}",
                amount, max_qty
            ),
            FilterViolation::StepSize { amount, step_size } => write!(
                f,
                "Amount: {} doesn't match allowed STEP_SIZE: {}",
                amount, step_size
            ),
            FilterViolation::BelowMinNotional {
                notional,
                min_notional,
            } => write!(
                f,
                "Notional: {} is less than min allowed NOTIONAL: {}",
                notional, min_notional
            ),
            FilterViolation::AboveMaxNotional {
                notional,
                max_notional,
            } => write!(
                f,
                "Notional: {} is greater than max allowed NOTIONAL: {}",
                notional, max_notional
            ),
        }
    }
}

/// Check an order amount against LOT_SIZE
///
/// Step-size divisibility `(amount - minQty) % stepSize == 0` is only enforced
/// when `strict_step_size` is set; otherwise it is reported at debug level.
pub fn check_lot_size(
    filters: &ExchangeFilters,
    amount: Decimal,
    strict_step_size: bool,
) -> Result<(), FilterViolation> {
    let Some(lot) = &filters.lot_size else {
        return Ok(());
    };

    if amount < lot.min_qty {
        return Err(FilterViolation::BelowMinQty {
            amount,
            min_qty: lot.min_qty,
        });
    }
    if amount > lot.max_qty {
        return Err(FilterViolation::AboveMaxQty {
            amount,
            max_qty: lot.max_qty,
        });
    }

    if !lot.step_size.is_zero() && !((amount - lot.min_qty) % lot.step_size).is_zero() {
        let violation = FilterViolation::StepSize {
            amount,
            step_size: lot.step_size,
        };
        if strict_step_size {
            return Err(violation);
        }
        tracing::debug!("{} (not enforced)", violation);
    }

    Ok(())
}

/// Check `price * amount` against the NOTIONAL filter
pub fn check_notional(
    filters: &ExchangeFilters,
    amount: Decimal,
    price: Decimal,
) -> Result<(), FilterViolation> {
    let Some(range) = &filters.notional else {
        return Ok(());
    };

    let notional = price * amount;
    if notional < range.min_notional {
        return Err(FilterViolation::BelowMinNotional {
            notional,
            min_notional: range.min_notional,
        });
    }
    if notional > range.max_notional {
        return Err(FilterViolation::AboveMaxNotional {
            notional,
            max_notional: range.max_notional,
        });
    }

    Ok(())
}

pub fn is_allowed_lot_size(filters: &ExchangeFilters, amount: Decimal) -> bool {
    check_lot_size(filters, amount, false).is_ok()
}

pub fn is_allowed_notional(filters: &ExchangeFilters, amount: Decimal, price: Decimal) -> bool {
    check_notional(filters, amount, price).is_ok()
}
