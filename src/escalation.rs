//! Observable escalation state for one operation.

use artisync_core::artifact::StrategyKind;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Escalation {
    pub from: StrategyKind,
    pub to: StrategyKind,
    pub reason: String,
}

/// Ordered record of the strategies an operation tried.
///
/// Escalation only moves forward: once [`StrategyKind::Sandboxed`] has been
/// recorded, [`Attempts::begin`] refuses [`StrategyKind::Direct`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Attempts {
    strategies: Vec<StrategyKind>,
    escalations: Vec<Escalation>,
}

impl Attempts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strategies(&self) -> &[StrategyKind] {
        &self.strategies
    }

    pub fn escalations(&self) -> &[Escalation] {
        &self.escalations
    }

    pub fn last(&self) -> Option<StrategyKind> {
        self.strategies.last().copied()
    }

    /// Whether `kind` may still be attempted.
    pub fn allows(&self, kind: StrategyKind) -> bool {
        self.strategies.iter().all(|s| *s <= kind)
    }

    /// Record the start of an attempt. Returns false when the attempt would
    /// move escalation backwards; nothing is recorded in that case.
    pub fn begin(&mut self, kind: StrategyKind) -> bool {
        if !self.allows(kind) {
            return false;
        }
        self.strategies.push(kind);
        true
    }

    /// Record an escalation from the latest strategy and begin `to`.
    pub fn escalate(&mut self, to: StrategyKind, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        if let Some(from) = self.last() {
            if from != to && self.allows(to) {
                self.escalations.push(Escalation { from, to, reason });
            }
        }
        self.begin(to)
    }
}

impl fmt::Display for Attempts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.strategies.is_empty() {
            return f.write_str("none");
        }
        let names: Vec<String> = self.strategies.iter().map(|s| s.to_string()).collect();
        f.write_str(&names.join(" -> "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escalation_is_one_directional() {
        let mut a = Attempts::new();
        assert!(a.begin(StrategyKind::Direct));
        assert!(a.begin(StrategyKind::Direct));
        assert!(a.escalate(StrategyKind::Sandboxed, "patch failed"));
        assert!(!a.begin(StrategyKind::Direct));
        assert_eq!(
            a.strategies(),
            &[StrategyKind::Direct, StrategyKind::Direct, StrategyKind::Sandboxed]
        );
        assert_eq!(a.escalations().len(), 1);
        assert_eq!(a.escalations()[0].reason, "patch failed");
        assert_eq!(a.to_string(), "direct -> direct -> sandboxed");
    }

    #[test]
    fn test_escalate_without_prior_records_no_escalation() {
        let mut a = Attempts::new();
        assert!(a.escalate(StrategyKind::Sandboxed, "large input"));
        assert!(a.escalations().is_empty());
        assert_eq!(a.last(), Some(StrategyKind::Sandboxed));
    }
}
