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

//! Splitting an accrual window into intervals of constant reward and commission rate.

use std::collections::BTreeSet;

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

use crate::locator::{Locator, RateSample};

/// A maximal interval in which both the reward rate and the commission rate are constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub start: u64,
    pub end: u64,
    pub reward_rate: U256,
    pub commission_rate: U256,
}

impl Segment {
    pub fn duration(&self) -> u64 {
        self.end - self.start
    }
}

/// Build the ordered, non-overlapping segments covering `[from, to]`.
///
/// `to` is clamped to `slashed_at` when one is given. Break points are taken from both series so
/// that a commission change alone still starts a new segment. A degenerate window yields no
/// segments.
pub fn build_segments<R, C>(
    reward: Locator<'_, R>,
    commission: Locator<'_, C>,
    from: u64,
    to: u64,
    slashed_at: Option<u64>,
) -> Vec<Segment>
where
    R: RateSample,
    C: RateSample,
{
    let to = slashed_at.map_or(to, |cutoff| to.min(cutoff));
    if from >= to {
        return Vec::new();
    }

    let mut breaks: BTreeSet<u64> = reward.timestamps_between(from, to).collect();
    breaks.extend(commission.timestamps_between(from, to));
    breaks.insert(from);
    breaks.insert(to);

    let breaks: Vec<u64> = breaks.into_iter().collect();
    breaks
        .windows(2)
        .map(|pair| Segment {
            start: pair[0],
            end: pair[1],
            reward_rate: reward.rate_at(pair[0]),
            commission_rate: commission.rate_at(pair[0]),
        })
        .collect()
}
