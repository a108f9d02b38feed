//! Winning threshold computation.
//!
//! The threshold is recomputed each round from the active weight (the sum of
//! continuing candidates' tallies), the number of seats, and the quota
//! flags. Candidates meet an integer threshold weakly (`>=`); with
//! `nonIntegerWinningThreshold` the comparison is strict (`>`), since the
//! exact quotient itself is not a winning total.

use crate::arithmetic::{FixedWeight, VoteArithmetic};
use crate::errors::TabResult;

#[derive(Debug, Clone, Copy)]
pub(crate) struct ThresholdPolicy {
    pub(crate) seats: u32,
    pub(crate) hare_quota: bool,
    pub(crate) non_integer: bool,
}

impl ThresholdPolicy {
    /// The winning threshold for a round with active weight `active`.
    ///
    /// Droop (default): `floor(active / (seats + 1)) + 1`.
    /// Hare: `active / seats`, truncated at the configured scale.
    /// Non-integer: `active / (seats + 1)` at scale, with no adjustment.
    pub(crate) fn winning_threshold(
        &self,
        arith: &VoteArithmetic,
        active: FixedWeight,
    ) -> TabResult<FixedWeight> {
        let divisor = if self.hare_quota { self.seats } else { self.seats + 1 };
        let quotient = arith.div(active, FixedWeight::from_count(u64::from(divisor)))?;
        if self.hare_quota || self.non_integer {
            Ok(quotient)
        } else {
            arith.add(arith.floor(quotient), FixedWeight::ONE)
        }
    }

    /// Whether a tally wins against the threshold.
    pub(crate) fn meets(&self, tally: FixedWeight, threshold: FixedWeight) -> bool {
        if self.non_integer {
            tally > threshold
        } else {
            tally >= threshold
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arith() -> VoteArithmetic {
        VoteArithmetic::new(4)
    }

    fn w(n: u64) -> FixedWeight {
        FixedWeight::from_count(n)
    }

    #[test]
    fn single_winner_majority() {
        let policy = ThresholdPolicy { seats: 1, hare_quota: false, non_integer: false };
        assert_eq!(policy.winning_threshold(&arith(), w(5)).unwrap(), w(3));
        assert_eq!(policy.winning_threshold(&arith(), w(7)).unwrap(), w(4));
        assert_eq!(policy.winning_threshold(&arith(), w(8)).unwrap(), w(5));
    }

    #[test]
    fn droop_quota_two_seats() {
        let policy = ThresholdPolicy { seats: 2, hare_quota: false, non_integer: false };
        // 10 votes, 2 seats: floor(10/3) + 1 = 4.
        assert_eq!(policy.winning_threshold(&arith(), w(10)).unwrap(), w(4));
        assert!(policy.meets(w(4), w(4)));
        assert!(!policy.meets(w(3), w(4)));
    }

    #[test]
    fn hare_quota_divides_by_seats() {
        let policy = ThresholdPolicy { seats: 4, hare_quota: true, non_integer: false };
        let t = policy.winning_threshold(&arith(), w(10)).unwrap();
        assert_eq!(t, "2.5".parse().unwrap());
        assert!(policy.meets("2.5".parse().unwrap(), t));
    }

    #[test]
    fn non_integer_threshold_is_strict() {
        let policy = ThresholdPolicy { seats: 2, hare_quota: false, non_integer: true };
        let t = policy.winning_threshold(&arith(), w(10)).unwrap();
        assert_eq!(t, "3.3333".parse().unwrap());
        assert!(!policy.meets("3.3333".parse().unwrap(), t));
        assert!(policy.meets("3.3334".parse().unwrap(), t));
    }
}
