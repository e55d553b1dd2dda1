use chrono::{DateTime, Utc};

use crate::entity::vouchers;

/// Evaluate a voucher against an order subtotal.
///
/// Returns the discount in minor currency units, or 0 when the voucher is not
/// applicable (inactive, outside its validity window, exhausted, or the order
/// is below the minimum). Never errors: the caller decides whether a zero
/// discount is acceptable.
pub fn evaluate(voucher: &vouchers::Model, subtotal: i64, now: DateTime<Utc>) -> i64 {
    if !voucher.active || voucher.remaining_uses <= 0 {
        return 0;
    }
    if now < voucher.valid_from.with_timezone(&Utc) || now > voucher.valid_to.with_timezone(&Utc) {
        return 0;
    }
    if subtotal < voucher.min_order_value {
        return 0;
    }

    let discount = match voucher.discount_type.as_str() {
        "percent" => {
            let raw = subtotal * voucher.discount_value / 100;
            match voucher.max_discount {
                Some(cap) => raw.min(cap),
                None => raw,
            }
        }
        "fixed" => voucher.discount_value,
        _ => 0,
    };

    // A discount can never exceed the subtotal or go negative.
    discount.clamp(0, subtotal)
}
