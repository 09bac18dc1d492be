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

//! Validator, reward token and stake position records tracked by the engine.

use std::collections::BTreeMap;

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::{error::EngineError, ValidatorId};

/// Lifecycle of a validator. `Slashed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ValidatorStatus {
    Active,
    Inactive,
    Slashed { at: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorState {
    pub id: ValidatorId,
    /// Address that receives claimed commission.
    pub commission_recipient: Address,
    status: ValidatorStatus,
}

impl ValidatorState {
    pub fn new(id: ValidatorId, commission_recipient: Address) -> Self {
        Self { id, commission_recipient, status: ValidatorStatus::Active }
    }

    pub fn status(&self) -> ValidatorStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status == ValidatorStatus::Active
    }

    pub fn slashed_at(&self) -> Option<u64> {
        match self.status {
            ValidatorStatus::Slashed { at } => Some(at),
            _ => None,
        }
    }

    /// Toggle between `Active` and `Inactive`. Accrual history is unaffected.
    pub fn set_active(&mut self, active: bool) -> Result<(), EngineError> {
        if self.slashed_at().is_some() {
            return Err(EngineError::ValidatorSlashed(self.id));
        }
        self.status = if active { ValidatorStatus::Active } else { ValidatorStatus::Inactive };
        Ok(())
    }

    pub fn slash(&mut self, at: u64) -> Result<(), EngineError> {
        if self.slashed_at().is_some() {
            return Err(EngineError::ValidatorSlashed(self.id));
        }
        self.status = ValidatorStatus::Slashed { at };
        Ok(())
    }

    /// Latest instant this validator may accrue rewards up to, given a requested `as_of`.
    pub fn accrual_cutoff(&self, as_of: u64) -> u64 {
        self.slashed_at().map_or(as_of, |at| as_of.min(at))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardToken {
    pub token: Address,
    /// Rate currently applied to every validator.
    pub rate: U256,
    pub max_rate: U256,
    pub active: bool,
}

/// Commission owed to a validator for one token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionBalance {
    pub accrued: U256,
    pub claimed: U256,
}

impl CommissionBalance {
    pub fn unclaimed(&self) -> U256 {
        self.accrued.saturating_sub(self.claimed)
    }
}

/// A staker's stake with one validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakePosition {
    pub staker: Address,
    pub validator: ValidatorId,
    pub principal: U256,
    /// Time of the first stake; the implicit settlement point for tokens never settled.
    pub started_at: u64,
    last_settled: BTreeMap<Address, u64>,
    /// Net reward accrued before a principal change but not yet paid out.
    pending: BTreeMap<Address, U256>,
}

impl StakePosition {
    pub fn new(staker: Address, validator: ValidatorId, started_at: u64) -> Self {
        Self {
            staker,
            validator,
            principal: U256::ZERO,
            started_at,
            last_settled: BTreeMap::new(),
            pending: BTreeMap::new(),
        }
    }

    pub fn last_settled(&self, token: Address) -> u64 {
        self.last_settled.get(&token).copied().unwrap_or(self.started_at)
    }

    pub fn pending(&self, token: Address) -> U256 {
        self.pending.get(&token).copied().unwrap_or(U256::ZERO)
    }

    pub(crate) fn advance_settled(&mut self, token: Address, to: u64) {
        let entry = self.last_settled.entry(token).or_insert(self.started_at);
        *entry = (*entry).max(to);
    }

    pub(crate) fn add_pending(&mut self, token: Address, amount: U256) {
        if !amount.is_zero() {
            *self.pending.entry(token).or_default() += amount;
        }
    }

    pub(crate) fn take_pending(&mut self, token: Address) -> U256 {
        self.pending.remove(&token).unwrap_or(U256::ZERO)
    }
}
