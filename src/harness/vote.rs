//! Majority vote over replica outcomes

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::harness::replica::ReplicaOutcome;
use crate::FALLBACK_COUNT;

/// How strongly the replicas agreed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Every replica produced the winning value
    Unanimous,
    /// More than half the replicas produced the winning value
    Majority,
    /// The winning value had the most support, but not a majority
    Plurality,
    /// No replica produced a value
    Degraded,
}

/// Result of voting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    /// Winning count, or the fallback sentinel
    pub value: i64,
    pub verdict: Verdict,
    /// Replicas that produced the winning value
    pub support: usize,
    /// Replicas that produced any value
    pub valid: usize,
}

impl Vote {
    /// Whether the vote fell back to the sentinel
    pub fn is_degraded(&self) -> bool {
        self.verdict == Verdict::Degraded
    }
}

/// Vote over replica outcomes.
///
/// Fallbacks are discarded; the most frequent remaining value wins and ties go
/// to the smallest value. The result depends only on the multiset of outcomes.
pub fn majority_vote(outcomes: &[ReplicaOutcome]) -> Vote {
    let mut tally: BTreeMap<u64, usize> = BTreeMap::new();
    for outcome in outcomes {
        if let ReplicaOutcome::Count(value) = outcome {
            *tally.entry(*value).or_default() += 1;
        }
    }
    let valid = tally.values().sum();

    // Ascending iteration, so keeping only strictly better entries picks the
    // smallest value among equals.
    let winner = tally.iter().fold(None, |best: Option<(u64, usize)>, (&value, &n)| {
        match best {
            Some((_, top)) if top >= n => best,
            _ => Some((value, n)),
        }
    });

    match winner {
        None => Vote {
            value: FALLBACK_COUNT,
            verdict: Verdict::Degraded,
            support: 0,
            valid,
        },
        Some((value, support)) => {
            let verdict = if support == outcomes.len() {
                Verdict::Unanimous
            } else if support * 2 > outcomes.len() {
                Verdict::Majority
            } else {
                Verdict::Plurality
            };
            Vote {
                value: i64::try_from(value).unwrap_or(i64::MAX),
                verdict,
                support,
                valid,
            }
        }
    }
}
