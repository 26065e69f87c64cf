//! Recovery pacing for a collector whose source has gone dark

use std::time::Duration;
use tokio::time::sleep;

/// Escalating pause between source recovery attempts
///
/// The wait doubles per failed attempt up to a ceiling, and a bounded
/// attempt budget per outage keeps a dead feed from looping hot. The
/// collector resets the schedule once any interaction succeeds.
#[derive(Debug)]
pub struct RecoveryPacer {
    entity: String,
    base: Duration,
    ceiling: Duration,
    budget: u32,
    attempts: u32,
}

/// The outage outlived the pacer's attempt budget
#[derive(Debug)]
pub struct OutageBudgetSpent;

impl std::fmt::Display for OutageBudgetSpent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "recovery attempt budget spent")
    }
}

impl std::error::Error for OutageBudgetSpent {}

impl RecoveryPacer {
    pub fn new(
        entity: impl Into<String>,
        base: Duration,
        ceiling: Duration,
        budget: u32,
    ) -> Self {
        Self {
            entity: entity.into(),
            base,
            ceiling,
            budget,
            attempts: 0,
        }
    }

    /// Wait out the next recovery delay
    pub async fn wait(&mut self) -> Result<(), OutageBudgetSpent> {
        if self.attempts >= self.budget {
            return Err(OutageBudgetSpent);
        }

        // Shift capped so the multiplier cannot overflow for large budgets
        let doubling = 1u32 << self.attempts.min(16);
        let delay = self.base.saturating_mul(doubling).min(self.ceiling);
        log::warn!(
            "⏳ [{}] source recovery attempt {} of {} in {:?}",
            self.entity,
            self.attempts + 1,
            self.budget,
            delay
        );

        sleep(delay).await;
        self.attempts += 1;
        Ok(())
    }

    /// Back to the base schedule once the source answers again
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}
