//! Smooth weighted round robin with reserve capacity.
//!
//! Each pick adds every candidate's weight to its running score, takes the
//! highest score and subtracts the total weight from it. Over time each
//! provider receives a share proportional to its weight, interleaved rather
//! than in bursts.
//!
//! Low-tier classes only see providers below the reserved ceiling
//! (`limit * (100 - reserve) / 100`), leaving the rest for high-tier classes.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::config::ClassTier;
use crate::selector::{Candidate, SelectionPolicy};

#[derive(Debug, Default)]
pub struct WeightedRoundRobin {
    reserve_percent: u8,
    scores: Mutex<HashMap<String, i64>>,
}

impl WeightedRoundRobin {
    pub fn new(reserve_percent: u8) -> Self {
        Self {
            reserve_percent,
            scores: Mutex::new(HashMap::new()),
        }
    }
}

impl SelectionPolicy for WeightedRoundRobin {
    fn admits(&self, candidate: &Candidate, tier: ClassTier) -> bool {
        candidate
            .quota
            .has_headroom(&candidate.limits, tier, self.reserve_percent)
    }

    fn choose(&self, candidates: &[Candidate], _tier: ClassTier) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }

        let mut scores = self.scores.lock().unwrap_or_else(PoisonError::into_inner);
        let total: i64 = candidates.iter().map(|c| i64::from(c.weight)).sum();

        let mut best: Option<(usize, i64)> = None;
        for (pos, c) in candidates.iter().enumerate() {
            let score = scores.entry(c.name.clone()).or_insert(0);
            *score += i64::from(c.weight);
            if best.map_or(true, |(_, s)| *score > s) {
                best = Some((pos, *score));
            }
        }

        let (pos, _) = best?;
        if let Some(score) = scores.get_mut(&candidates[pos].name) {
            *score -= total;
        }
        Some(pos)
    }
}
