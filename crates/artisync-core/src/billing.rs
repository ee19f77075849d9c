//! Token usage and credit conversion.
//!
//! ```text
//! credits = ceil((input + output × output_weight) / tokens_per_credit)
//! ```
//!
//! All arithmetic saturates, so the conversion is total and monotone in both
//! arguments. Credits for an operation are computed once over its summed
//! usage, never per call, so rounding happens exactly once.

use serde::{Deserialize, Serialize};
use std::ops::AddAssign;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.input_tokens == 0 && self.output_tokens == 0
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.input_tokens = self.input_tokens.saturating_add(rhs.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(rhs.output_tokens);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingRates {
    /// Multiplier applied to output tokens.
    pub output_weight: u64,
    /// Weighted tokens per credit. Zero is treated as one.
    pub tokens_per_credit: u64,
}

impl Default for BillingRates {
    fn default() -> Self {
        Self {
            output_weight: 5,
            tokens_per_credit: 1000,
        }
    }
}

pub fn to_billable_units(input_tokens: u64, output_tokens: u64, rates: &BillingRates) -> u64 {
    let weighted = input_tokens.saturating_add(output_tokens.saturating_mul(rates.output_weight));
    weighted.div_ceil(rates.tokens_per_credit.max(1))
}

/// Credits for a summed usage record.
pub fn credits_for(usage: &TokenUsage, rates: &BillingRates) -> u64 {
    to_billable_units(usage.input_tokens, usage.output_tokens, rates)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_formula() {
        let r = BillingRates::default();
        assert_eq!(to_billable_units(0, 0, &r), 0);
        assert_eq!(to_billable_units(1, 0, &r), 1);
        assert_eq!(to_billable_units(1000, 0, &r), 1);
        assert_eq!(to_billable_units(1001, 0, &r), 2);
        assert_eq!(to_billable_units(500, 100, &r), 1);
        assert_eq!(to_billable_units(12_000, 3_000, &r), 27);
    }

    #[test]
    fn test_saturates() {
        let r = BillingRates::default();
        let max = to_billable_units(u64::MAX, u64::MAX, &r);
        assert_eq!(max, u64::MAX.div_ceil(1000));
    }

    #[test]
    fn test_zero_tokens_per_credit() {
        let r = BillingRates {
            output_weight: 1,
            tokens_per_credit: 0,
        };
        assert_eq!(to_billable_units(3, 4, &r), 7);
    }

    #[test]
    fn test_usage_sums_before_rounding() {
        let r = BillingRates::default();
        let mut total = TokenUsage::default();
        total += TokenUsage::new(400, 0);
        total += TokenUsage::new(400, 0);
        assert_eq!(credits_for(&total, &r), 1);
        assert!(!total.is_zero());
    }
}
