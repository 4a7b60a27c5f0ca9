//! Round-robin selection strategy.

use crate::config::ClassTier;
use crate::selector::{Candidate, SelectionPolicy};

/// Least-recently-used selector.
/// Rotation follows each provider's last use, so providers that were skipped
/// while unhealthy or throttled are picked first once they return.
#[derive(Debug, Default)]
pub struct RoundRobin;

impl RoundRobin {
    pub fn new() -> Self {
        Self
    }
}

impl SelectionPolicy for RoundRobin {
    fn choose(&self, candidates: &[Candidate], _tier: ClassTier) -> Option<usize> {
        // None (never used) sorts first
        candidates
            .iter()
            .enumerate()
            .min_by_key(|(_, c)| (c.last_used, c.index))
            .map(|(pos, _)| pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::candidate;
    use std::time::Duration;
    use tokio::time::Instant;

    #[test]
    fn test_round_robin() {
        let policy = RoundRobin::new();
        let now = Instant::now();
        let mut candidates = vec![candidate(0, "a", 0), candidate(1, "b", 0), candidate(2, "c", 0)];

        let mut picked = Vec::new();
        for step in 0..6u64 {
            let pos = policy.choose(&candidates, ClassTier::Low).unwrap();
            picked.push(candidates[pos].name.clone());
            candidates[pos].last_used = Some(now + Duration::from_millis(step));
        }
        assert_eq!(picked, vec!["a", "b", "c", "a", "b", "c"]);
    }

    #[test]
    fn test_unused_provider_first() {
        let policy = RoundRobin::new();
        let now = Instant::now();
        let mut a = candidate(0, "a", 0);
        let b = candidate(1, "b", 0);
        a.last_used = Some(now);
        assert_eq!(policy.choose(&[a, b], ClassTier::Low), Some(1));
    }
}
