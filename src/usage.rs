//! Per-operation usage ledger.
//!
//! Each operation owns one [`UsageLedger`] and passes it explicitly to every
//! component that spends tokens. Credits are computed once, when the ledger
//! is closed into a [`UsageRecord`].

use artisync_core::billing::{credits_for, BillingRates, TokenUsage};
use serde::Serialize;

#[derive(Debug, Clone, Default)]
pub struct UsageLedger {
    tokens: TokenUsage,
    model_calls: u32,
    sandbox_runs: u32,
}

impl UsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_model_call(&mut self, usage: TokenUsage) {
        self.tokens += usage;
        self.model_calls += 1;
    }

    pub fn record_sandbox_run(&mut self, usage: TokenUsage) {
        self.tokens += usage;
        self.sandbox_runs += 1;
    }

    pub fn tokens(&self) -> TokenUsage {
        self.tokens
    }

    pub fn model_calls(&self) -> u32 {
        self.model_calls
    }

    pub fn close(&self, rates: &BillingRates) -> UsageRecord {
        UsageRecord {
            tokens: self.tokens,
            credits: credits_for(&self.tokens, rates),
            model_calls: self.model_calls,
            sandbox_runs: self.sandbox_runs,
        }
    }
}

/// What an operation consumed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UsageRecord {
    pub tokens: TokenUsage,
    pub credits: u64,
    pub model_calls: u32,
    pub sandbox_runs: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credits_computed_once_over_sum() {
        let mut ledger = UsageLedger::new();
        // Each call alone would round up to 1 credit.
        ledger.record_model_call(TokenUsage::new(300, 0));
        ledger.record_model_call(TokenUsage::new(300, 0));
        ledger.record_sandbox_run(TokenUsage::new(300, 0));
        let record = ledger.close(&BillingRates::default());
        assert_eq!(record.credits, 1);
        assert_eq!(record.model_calls, 2);
        assert_eq!(record.sandbox_runs, 1);
        assert_eq!(record.tokens.input_tokens, 900);
    }
}
