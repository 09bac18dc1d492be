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

//! Resumable propagation of a reward-rate change to every validator.

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::ValidatorId;

/// A reward rate change that still has to be written to some validators.
///
/// Validators are visited in increasing id order. The cursor records the last validator written,
/// so a job can be applied over several calls with a bounded amount of work each.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateFanOut {
    pub token: Address,
    pub rate: U256,
    /// Timestamp written into every checkpoint of this job.
    pub effective_at: u64,
    cursor: Option<ValidatorId>,
    touched: usize,
}

impl RateFanOut {
    pub fn new(token: Address, rate: U256, effective_at: u64) -> Self {
        Self { token, rate, effective_at, cursor: None, touched: 0 }
    }

    /// Last validator the job has written to.
    pub fn cursor(&self) -> Option<ValidatorId> {
        self.cursor
    }

    /// Number of validators written so far.
    pub fn touched(&self) -> usize {
        self.touched
    }

    /// Smallest validator id still to visit, or `None` once the id space is exhausted.
    pub(crate) fn next_start(&self) -> Option<ValidatorId> {
        match self.cursor {
            None => Some(ValidatorId::MIN),
            Some(id) => id.checked_add(1),
        }
    }

    pub(crate) fn record(&mut self, validator: ValidatorId) {
        self.cursor = Some(validator);
        self.touched += 1;
    }
}

/// Progress reported after applying part of a [RateFanOut].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanOutStatus {
    Pending { remaining: usize },
    Complete,
}

impl FanOutStatus {
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }
}
