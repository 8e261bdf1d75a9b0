//! Order sizing.
//!
//! Pure math from the alert's size mode to a base quantity:
//!
//! - `quote` / `fixed_usdt` — `qty = size_value × leverage / price`
//! - `base` — `size_value` directly
//! - `contracts` — raw contract count (contract-size scaling is the
//!   adapter's concern)
//! - `percentage` — `qty = balance × size_value/100 × leverage / price`
//!
//! With no `size_value`, explicit `quantity` then `contracts` apply. A
//! non-positive result is a terminal sizing failure.

use rust_decimal::Decimal;

use crate::domain::alert::{Alert, SizeMode};
use crate::error::{Error, Result};

/// Compute the order quantity for an entry alert.
///
/// `free_balance` is the spendable quote balance; it only participates in
/// `percentage` sizing.
pub fn order_quantity(alert: &Alert, price: Decimal, free_balance: Decimal) -> Result<Decimal> {
    if price <= Decimal::ZERO {
        return Err(Error::InvalidSize(format!("non-positive price {price}")));
    }
    let leverage = Decimal::from(alert.effective_leverage());

    let quantity = match (alert.size_mode, alert.size_value) {
        (Some(SizeMode::Quote | SizeMode::FixedUsdt), Some(value)) => value * leverage / price,
        (Some(SizeMode::Base), Some(value)) => value,
        (Some(SizeMode::Contracts), Some(value)) => value,
        (Some(SizeMode::Percentage), Some(value)) => {
            free_balance * value / Decimal::ONE_HUNDRED * leverage / price
        }
        // size_value without a mode spends quote currency.
        (None, Some(value)) => value * leverage / price,
        // No size_value: fall back to explicit quantity, then contracts.
        _ => match (alert.quantity, alert.contracts) {
            (Some(quantity), _) => quantity,
            (None, Some(contracts)) => contracts,
            (None, None) => {
                return Err(Error::InvalidSize(
                    "no size_value, quantity, or contracts specified".into(),
                ))
            }
        },
    };

    if quantity <= Decimal::ZERO {
        return Err(Error::InvalidSize(format!(
            "computed quantity {quantity} is not positive"
        )));
    }
    Ok(quantity)
}
