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

//! Engine configuration.

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

/// Fixed-point scale of reward and commission rates (1e18).
pub const REWARD_PRECISION: U256 = U256::from_limbs([1_000_000_000_000_000_000, 0, 0, 0]);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Scale applied to every rate.
    pub reward_precision: U256,
    /// Maximum checkpoints a single series may hold. `None` means unbounded.
    pub max_checkpoints_per_subject: Option<usize>,
    /// Highest commission a validator may set, in units of `reward_precision`.
    pub max_commission_rate: U256,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reward_precision: REWARD_PRECISION,
            max_checkpoints_per_subject: None,
            max_commission_rate: REWARD_PRECISION,
        }
    }
}

impl EngineConfig {
    pub fn with_max_checkpoints(mut self, max: usize) -> Self {
        self.max_checkpoints_per_subject = Some(max);
        self
    }

    pub fn with_max_commission_rate(mut self, max: U256) -> Self {
        self.max_commission_rate = max;
        self
    }
}
