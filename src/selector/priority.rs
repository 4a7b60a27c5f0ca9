//! Priority-based selection.

use crate::config::ClassTier;
use crate::selector::{Candidate, SelectionPolicy};

/// Lowest priority number wins. Ties go to the lowest observed response
/// time (unmeasured providers last), then to configuration order.
#[derive(Debug, Default)]
pub struct PriorityBased;

impl PriorityBased {
    pub fn new() -> Self {
        Self
    }
}

impl SelectionPolicy for PriorityBased {
    fn choose(&self, candidates: &[Candidate], _tier: ClassTier) -> Option<usize> {
        candidates
            .iter()
            .enumerate()
            .min_by_key(|(_, c)| (c.priority, c.response_time_ms.unwrap_or(u64::MAX), c.index))
            .map(|(pos, _)| pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::candidate;

    #[test]
    fn test_lowest_priority_wins() {
        let policy = PriorityBased::new();
        let candidates = vec![candidate(0, "a", 2), candidate(1, "b", 1), candidate(2, "c", 3)];
        assert_eq!(policy.choose(&candidates, ClassTier::Low), Some(1));
    }

    #[test]
    fn test_tie_broken_by_response_time() {
        let policy = PriorityBased::new();
        let mut a = candidate(0, "a", 1);
        let mut b = candidate(1, "b", 1);
        let c = candidate(2, "c", 1);
        a.response_time_ms = Some(300);
        b.response_time_ms = Some(120);
        assert_eq!(policy.choose(&[a.clone(), b, c.clone()], ClassTier::Low), Some(1));
        // Measured beats unmeasured.
        assert_eq!(policy.choose(&[c, a], ClassTier::Low), Some(1));
    }

    #[test]
    fn test_low_tier_uses_full_limit() {
        let policy = PriorityBased::new();
        let mut c = candidate(0, "a", 1);
        c.limits.per_second = 4;
        for _ in 0..3 {
            c.quota.record_attempt();
        }
        assert!(policy.admits(&c, ClassTier::Low));
        c.quota.record_attempt();
        assert!(!policy.admits(&c, ClassTier::Low));
        assert!(!policy.admits(&c, ClassTier::High));
    }

    #[test]
    fn test_empty() {
        assert_eq!(PriorityBased::new().choose(&[], ClassTier::High), None);
    }
}
