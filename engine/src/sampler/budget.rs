//! Cooperative stopping between sweeps.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Wall-clock limit and/or shared cancel flag, polled by every chain before
/// each sweep. A chain never stops mid-sweep.
#[derive(Debug, Clone, Default)]
pub struct RunBudget {
    deadline: Option<Instant>,
    cancel: Option<Arc<AtomicBool>>,
}

impl RunBudget {
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Stop once `limit` has elapsed from now. An earlier deadline already
    /// set is kept. A limit past the end of `Instant`'s range sets none.
    pub fn with_wall_clock(mut self, limit: Duration) -> Self {
        let Some(deadline) = Instant::now().checked_add(limit) else {
            return self;
        };
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    /// Stop once `flag` is set.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn should_stop(&self) -> bool {
        if let Some(flag) = &self.cancel {
            if flag.load(Ordering::Relaxed) {
                return true;
            }
        }
        matches!(self.deadline, Some(deadline) if Instant::now() >= deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlimited_never_stops() {
        assert!(!RunBudget::unlimited().should_stop());
    }

    #[test]
    fn test_cancel_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        let budget = RunBudget::unlimited().with_cancel_flag(flag.clone());
        assert!(!budget.should_stop());
        flag.store(true, Ordering::Relaxed);
        assert!(budget.should_stop());
    }

    #[test]
    fn test_elapsed_deadline() {
        let budget = RunBudget::unlimited().with_wall_clock(Duration::ZERO);
        assert!(budget.should_stop());
        let budget = RunBudget::unlimited().with_wall_clock(Duration::from_secs(3600));
        assert!(!budget.should_stop());
        let budget = budget.with_wall_clock(Duration::ZERO);
        assert!(budget.should_stop());
        let budget = budget.with_wall_clock(Duration::from_secs(3600));
        assert!(budget.should_stop());
    }

    #[test]
    fn test_unrepresentable_deadline_is_ignored() {
        let budget = RunBudget::unlimited().with_wall_clock(Duration::MAX);
        assert!(!budget.should_stop());
        let budget = RunBudget::unlimited()
            .with_wall_clock(Duration::ZERO)
            .with_wall_clock(Duration::MAX);
        assert!(budget.should_stop());
    }
}
