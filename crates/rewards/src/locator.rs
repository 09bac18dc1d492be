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

//! Binary-search lookup of the checkpoint in effect at a given instant.

use alloy_primitives::U256;

use crate::checkpoint::RateCheckpoint;

/// A timestamped rate value that can be located within an ordered series.
pub trait RateSample {
    fn timestamp(&self) -> u64;
    fn rate(&self) -> U256;
}

impl RateSample for RateCheckpoint {
    fn timestamp(&self) -> u64 {
        self.timestamp
    }

    fn rate(&self) -> U256 {
        self.rate
    }
}

impl RateSample for (u64, U256) {
    fn timestamp(&self) -> u64 {
        self.0
    }

    fn rate(&self) -> U256 {
        self.1
    }
}

/// Read-only view over a series ordered by non-decreasing timestamp.
#[derive(Debug)]
pub struct Locator<'a, T> {
    samples: &'a [T],
}

impl<T> Clone for Locator<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Locator<'_, T> {}

impl<'a, T: RateSample> Locator<'a, T> {
    pub fn new(samples: &'a [T]) -> Self {
        Self { samples }
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Index of the latest sample with `timestamp <= at`.
    ///
    /// Returns `None` when `at` precedes the first sample. When several samples share a
    /// timestamp, the one inserted last wins.
    pub fn index_at(&self, at: u64) -> Option<usize> {
        self.samples.partition_point(|sample| sample.timestamp() <= at).checked_sub(1)
    }

    pub fn sample_at(&self, at: u64) -> Option<&'a T> {
        self.index_at(at).map(|index| &self.samples[index])
    }

    /// Rate in effect at `at`; zero before the first sample.
    pub fn rate_at(&self, at: u64) -> U256 {
        self.sample_at(at).map(RateSample::rate).unwrap_or(U256::ZERO)
    }

    /// Timestamps of samples strictly inside `(from, to)`.
    pub fn timestamps_between(&self, from: u64, to: u64) -> impl Iterator<Item = u64> + 'a {
        let samples: &'a [T] = self.samples;
        let start = samples.partition_point(|sample| sample.timestamp() <= from);
        samples[start..]
            .iter()
            .map(RateSample::timestamp)
            .take_while(move |timestamp| *timestamp < to)
    }
}

impl<'a> Locator<'a, RateCheckpoint> {
    /// Cumulative index at `at`.
    ///
    /// Time before the first retained checkpoint contributes nothing, including history that
    /// was pruned away.
    pub fn cumulative_at(&self, at: u64) -> U256 {
        match self.sample_at(at) {
            Some(cp) => cp.cumulative_index + cp.rate * U256::from(at - cp.timestamp),
            None => self.samples.first().map_or(U256::ZERO, |cp| cp.cumulative_index),
        }
    }

    /// Integral of the rate over `[from, to]` in O(log n).
    pub fn integral_between(&self, from: u64, to: u64) -> U256 {
        if from >= to {
            return U256::ZERO;
        }
        self.cumulative_at(to).saturating_sub(self.cumulative_at(from))
    }
}
