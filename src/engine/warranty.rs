//! Warranty window arithmetic.

use chrono::{Duration, NaiveDate};

/// Outcome of a warranty window check.
///
/// `valid` is `None` when the window cannot be determined (no purchase
/// date) — distinct from an expired window.
#[derive(Debug, Clone)]
pub struct WarrantyCheck {
    pub valid: Option<bool>,
    pub details: String,
    pub days_since_purchase: Option<i64>,
    pub days_remaining: Option<i64>,
}

/// Check whether a purchase falls inside the warranty window.
///
/// The window is inclusive: a purchase exactly `period_days` before the
/// evaluation date is still covered; one day more is expired.
pub fn check_warranty_window(
    purchase_date: Option<NaiveDate>,
    evaluation_date: NaiveDate,
    period_days: i64,
) -> WarrantyCheck {
    let Some(purchased) = purchase_date else {
        return WarrantyCheck {
            valid: None,
            details: "Purchase date not provided - cannot verify warranty window".to_string(),
            days_since_purchase: None,
            days_remaining: None,
        };
    };

    let expiration = purchased + Duration::days(period_days);
    let valid = evaluation_date <= expiration;
    let days_since = (evaluation_date - purchased).num_days();
    let days_remaining = (expiration - evaluation_date).num_days();

    let details = if valid {
        format!(
            "Within warranty period. Purchased {days_since} days ago. \
             {days_remaining} days remaining in warranty."
        )
    } else {
        format!(
            "Outside warranty period. Purchased {days_since} days ago. \
             Warranty expired {} days ago.",
            -days_remaining
        )
    };

    WarrantyCheck {
        valid: Some(valid),
        details,
        days_since_purchase: Some(days_since),
        days_remaining: Some(days_remaining),
    }
}
