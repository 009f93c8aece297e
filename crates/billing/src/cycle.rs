//! Billing-cycle calculator — pure calendar arithmetic, no clock access.

use chrono::{DateTime, Duration, Months, Utc};
use rust_decimal::Decimal;

use pocketpay_core::types::BillingCycle;

/// Next due instant after `reference` for the given cycle.
///
/// Weekly adds 7 days; monthly/quarterly/yearly add calendar months, with
/// day-of-month overflow clamped to the last valid day of the target month
/// (Jan 31 + 1 month = Feb 28/29). No timezone normalization beyond the
/// calendar arithmetic; callers supply a consistent clock.
pub fn next_due_date(reference: DateTime<Utc>, cycle: BillingCycle) -> DateTime<Utc> {
    match cycle {
        BillingCycle::Weekly => reference + Duration::days(7),
        BillingCycle::Monthly => reference + Months::new(1),
        BillingCycle::Quarterly => reference + Months::new(3),
        BillingCycle::Yearly => reference + Months::new(12),
    }
}

/// Normalize a per-cycle amount to a per-month figure for threshold
/// comparison.
///
/// Weekly is 52 weeks over 12 months; quarterly divides by 3 and yearly by
/// 12. (An earlier front-end multiplied quarterly amounts by 4, overstating
/// monthly spend twelvefold; this is the corrected formula.)
pub fn monthly_equivalent(amount: Decimal, cycle: BillingCycle) -> Decimal {
    match cycle {
        BillingCycle::Weekly => amount * Decimal::from(52) / Decimal::from(12),
        BillingCycle::Monthly => amount,
        BillingCycle::Quarterly => amount / Decimal::from(3),
        BillingCycle::Yearly => amount / Decimal::from(12),
    }
}
