// Copyright 2025 RISC Zero, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Integration of gross reward, commission and net reward over a segment timeline.

use std::ops::{Add, AddAssign};

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

use crate::segments::Segment;

/// Reward owed over some window, split between staker and validator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accrual {
    pub gross: U256,
    pub commission: U256,
    pub net: U256,
}

impl Accrual {
    pub const ZERO: Self = Self { gross: U256::ZERO, commission: U256::ZERO, net: U256::ZERO };

    /// Accrual of a single segment.
    ///
    /// Multiplications happen before divisions and each division truncates, so the error per
    /// segment is below one unit of gross and one unit of commission.
    pub fn for_segment(principal: U256, segment: &Segment, precision: U256) -> Self {
        let gross =
            principal * segment.reward_rate * U256::from(segment.duration()) / precision;
        let commission = (gross * segment.commission_rate / precision).min(gross);
        Self { gross, commission, net: gross - commission }
    }

    pub fn is_zero(&self) -> bool {
        self.gross.is_zero()
    }
}

impl Add for Accrual {
    type Output = Accrual;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            gross: self.gross + rhs.gross,
            commission: self.commission + rhs.commission,
            net: self.net + rhs.net,
        }
    }
}

impl AddAssign for Accrual {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs
    }
}

/// Sum the accrual of `principal` over every segment.
pub fn accrue(principal: U256, segments: &[Segment], precision: U256) -> Accrual {
    if principal.is_zero() {
        return Accrual::ZERO;
    }
    segments.iter().fold(Accrual::ZERO, |total, segment| {
        total + Accrual::for_segment(principal, segment, precision)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::REWARD_PRECISION;

    fn pct(percent: u64) -> U256 {
        REWARD_PRECISION * U256::from(percent) / U256::from(100)
    }

    fn seg(start: u64, end: u64, reward_rate: U256, commission_rate: U256) -> Segment {
        Segment { start, end, reward_rate, commission_rate }
    }

    #[test]
    fn single_segment_split() {
        // 1000 staked at 100 tokens per unit of stake per day, for 10 days, 10% commission.
        let rate = REWARD_PRECISION * U256::from(100);
        let accrual =
            Accrual::for_segment(U256::from(1000), &seg(0, 10, rate, pct(10)), REWARD_PRECISION);
        assert_eq!(accrual.gross, U256::from(1_000_000));
        assert_eq!(accrual.commission, U256::from(100_000));
        assert_eq!(accrual.net, U256::from(900_000));
    }

    #[test]
    fn truncation_is_per_segment() {
        // Each segment earns 2.5 units gross which truncates to 2.
        let rate = REWARD_PRECISION * U256::from(5) / U256::from(2);
        let segments = [seg(0, 1, rate, U256::ZERO), seg(1, 2, rate, U256::ZERO)];
        let accrual = accrue(U256::from(1), &segments, REWARD_PRECISION);
        assert_eq!(accrual.gross, U256::from(4));
        assert_eq!(accrual.net, U256::from(4));
    }

    #[test]
    fn commission_never_exceeds_gross() {
        let rate = REWARD_PRECISION;
        let accrual = Accrual::for_segment(
            U256::from(10),
            &seg(0, 10, rate, REWARD_PRECISION * U256::from(2)),
            REWARD_PRECISION,
        );
        assert_eq!(accrual.commission, accrual.gross);
        assert_eq!(accrual.net, U256::ZERO);
    }

    #[test]
    fn zero_principal_accrues_nothing() {
        let segments = [seg(0, 100, REWARD_PRECISION, pct(5))];
        assert_eq!(accrue(U256::ZERO, &segments, REWARD_PRECISION), Accrual::ZERO);
    }

    #[test]
    fn empty_timeline_accrues_nothing() {
        assert!(accrue(U256::from(1_000), &[], REWARD_PRECISION).is_zero());
    }
}
