use chrono::{NaiveDate, Utc};
use log::warn;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Per-day token budget for one LLM tier. When exhausted, extraction
/// re-enqueues its work and inference cycles skip.
pub struct TokenBudget {
    tier: String,
    daily_limit: u64,
    used: AtomicU64,
    day: Mutex<NaiveDate>,
}

impl TokenBudget {
    pub fn new(tier: impl Into<String>, daily_limit: u64) -> Self {
        Self {
            tier: tier.into(),
            daily_limit,
            used: AtomicU64::new(0),
            day: Mutex::new(Utc::now().date_naive()),
        }
    }

    /// Try to charge an estimate against today's budget.
    /// Returns false when the budget is exhausted.
    pub fn charge(&self, estimated_tokens: u64) -> bool {
        self.roll_day();
        let previous = self.used.fetch_add(estimated_tokens, Ordering::Relaxed);
        if previous + estimated_tokens > self.daily_limit {
            // Un-charge; the call will not happen.
            self.used.fetch_sub(estimated_tokens, Ordering::Relaxed);
            warn!(
                "token budget for {} exhausted ({}/{})",
                self.tier, previous, self.daily_limit
            );
            return false;
        }
        true
    }

    pub fn used_today(&self) -> u64 {
        self.roll_day();
        self.used.load(Ordering::Relaxed)
    }

    pub fn remaining_today(&self) -> u64 {
        self.daily_limit.saturating_sub(self.used_today())
    }

    fn roll_day(&self) {
        let mut day = self.day.lock().unwrap();
        let today = Utc::now().date_naive();
        if *day != today {
            *day = today;
            self.used.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charge_until_exhausted() {
        let budget = TokenBudget::new("llm_small", 100);
        assert!(budget.charge(60));
        assert!(budget.charge(40));
        assert!(!budget.charge(1));
        assert_eq!(budget.used_today(), 100);
        assert_eq!(budget.remaining_today(), 0);
    }

    #[test]
    fn rejected_charge_is_not_counted() {
        let budget = TokenBudget::new("llm_small", 50);
        assert!(!budget.charge(60));
        assert_eq!(budget.used_today(), 0);
    }
}
