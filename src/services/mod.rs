use crate::config::AppConfig;
use crate::errors::ServiceError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::ValidationError;

// Stock ledger: the only writer of product stock
pub mod inventory_ledger;

// Order lifecycle and bulk import
pub mod orders;

// Catalog and subscriber management
pub mod products;
pub mod subscriptions;

// Student accounts and their feedback
pub mod feedback;
pub mod students;

// Service factory for dependency injection
pub mod factory;

/// Bounds applied to every listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLimits {
    pub default_size: u64,
    pub max_size: u64,
}

impl Default for PageLimits {
    fn default() -> Self {
        Self {
            default_size: 100,
            max_size: 500,
        }
    }
}

impl From<&AppConfig> for PageLimits {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            default_size: cfg.default_page_size,
            max_size: cfg.max_page_size,
        }
    }
}

impl PageLimits {
    /// Clamp a requested page size to `1..=max_size`.
    pub fn clamp(&self, requested: Option<u64>) -> u64 {
        requested
            .unwrap_or(self.default_size)
            .clamp(1, self.max_size.max(1))
    }
}

/// Offset pagination as used by the listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub skip: u64,
    pub limit: Option<u64>,
}

/// Largest amount a `decimal(10,2)` money column holds: 99,999,999.99.
pub const MAX_MONEY: Decimal = Decimal::from_parts(0x540B_E3FF, 2, 0, false, 2);

/// Describes why `amount` cannot be stored as money, if it cannot.
pub(crate) fn money_problem(amount: &Decimal) -> Option<&'static str> {
    if amount.is_sign_negative() && !amount.is_zero() {
        Some("must not be negative")
    } else if amount.normalize().scale() > 2 {
        Some("must have at most 2 decimal places")
    } else if *amount > MAX_MONEY {
        Some("must not exceed 99999999.99")
    } else {
        None
    }
}

/// Adds up money amounts, failing instead of overflowing.
pub(crate) fn checked_sum<I>(amounts: I) -> Result<Decimal, ServiceError>
where
    I: IntoIterator<Item = Decimal>,
{
    amounts
        .into_iter()
        .try_fold(Decimal::ZERO, |acc, amount| acc.checked_add(amount))
        .ok_or_else(|| ServiceError::InvalidArgument("Amount is out of range".to_string()))
}

/// `None`, blank and `"all"` (any case) disable a listing filter.
pub(crate) fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("blank");
        err.message = Some("must not be empty".into());
        return Err(err);
    }
    Ok(())
}

pub(crate) fn filter_value(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim)
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("all"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_is_clamped() {
        let limits = PageLimits::default();
        assert_eq!(limits.clamp(None), 100);
        assert_eq!(limits.clamp(Some(0)), 1);
        assert_eq!(limits.clamp(Some(10_000)), 500);
    }

    #[test]
    fn all_disables_filters() {
        assert_eq!(filter_value(Some("ALL")), None);
        assert_eq!(filter_value(Some("  ")), None);
        assert_eq!(filter_value(None), None);
        assert_eq!(filter_value(Some(" Books ")), Some("Books"));
    }

    #[test]
    fn money_must_fit_two_decimal_places() {
        use rust_decimal_macros::dec;

        assert_eq!(MAX_MONEY, dec!(99999999.99));
        assert_eq!(money_problem(&dec!(19.99)), None);
        assert_eq!(money_problem(&dec!(19.990)), None);
        assert_eq!(money_problem(&dec!(0)), None);
        assert_eq!(money_problem(&MAX_MONEY), None);
        assert_eq!(money_problem(&dec!(-0.01)), Some("must not be negative"));
        assert_eq!(
            money_problem(&dec!(19.999)),
            Some("must have at most 2 decimal places")
        );
        assert_eq!(
            money_problem(&dec!(100000000)),
            Some("must not exceed 99999999.99")
        );
        assert_eq!(money_problem(&(Decimal::MAX / dec!(2))), Some("must not exceed 99999999.99"));
    }

    #[test]
    fn sums_report_overflow() {
        assert!(checked_sum([Decimal::MAX, Decimal::ONE]).is_err());
        assert_eq!(checked_sum(Vec::new()).ok(), Some(Decimal::ZERO));
    }
}
