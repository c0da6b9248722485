use rust_decimal::{Decimal, RoundingStrategy};

use crate::models::LineItem;

/// Computed monetary summary of an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Totals {
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub total: Decimal,
}

const MONEY_SCALE: u32 = 2;

fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Compute subtotal, tax and total from line items and a percent tax rate.
///
/// Pure and deterministic: totals are always rederived from the items
/// rather than carried forward, so repeated recalculation cannot drift.
/// The line-item sum is carried at full decimal precision and only the
/// published figures are rounded; `total` is the exact sum of the
/// rounded parts, so `total == subtotal + tax_amount` always holds.
///
/// Callers validate items (non-empty, non-negative quantity and price)
/// and the tax rate (0-100) before reaching this point.
pub fn compute_totals(items: &[LineItem], tax_rate: Decimal) -> Totals {
    let raw_subtotal: Decimal = items
        .iter()
        .map(|item| item.quantity * item.unit_price)
        .sum();

    let subtotal = round_money(raw_subtotal);
    let tax_amount = round_money(raw_subtotal * tax_rate / Decimal::ONE_HUNDRED);
    let total = subtotal + tax_amount;

    Totals {
        subtotal,
        tax_amount,
        total,
    }
}
