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

//! Recorded staking ledger events replayed through the accrual engine.

use std::path::Path;

use alloy_primitives::{Address, U256};
use anyhow::{bail, Context, Result};
use plume_rewards::ValidatorId;
use serde::{Deserialize, Serialize};

/// One administrative or staker action from the staking ledger.
///
/// Amounts and rates are `0x`-prefixed hex strings; rates are scaled by the reward precision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    AddValidator { validator: ValidatorId, commission: U256, recipient: Address },
    SetCommission { validator: ValidatorId, commission: U256 },
    SetValidatorActive { validator: ValidatorId, active: bool },
    SlashValidator { validator: ValidatorId },
    AddRewardToken { token: Address, rate: U256, max_rate: U256 },
    SetRewardRate { token: Address, rate: U256 },
    RemoveRewardToken { token: Address },
    Stake { staker: Address, validator: ValidatorId, amount: U256 },
    Unstake { staker: Address, validator: ValidatorId, amount: U256 },
    /// Settle one token, or every registered token when `token` is absent.
    Claim {
        staker: Address,
        validator: ValidatorId,
        #[serde(default)]
        token: Option<Address>,
    },
    ClaimCommission { validator: ValidatorId, token: Address },
    FundTreasury { token: Address, amount: U256 },
    /// Prune the reward series of `token`, or the commission series when `token` is absent.
    Prune {
        validator: ValidatorId,
        #[serde(default)]
        token: Option<Address>,
        before: u64,
    },
    SetMaxCheckpoints { max: Option<usize> },
}

impl LedgerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AddValidator { .. } => "add_validator",
            Self::SetCommission { .. } => "set_commission",
            Self::SetValidatorActive { .. } => "set_validator_active",
            Self::SlashValidator { .. } => "slash_validator",
            Self::AddRewardToken { .. } => "add_reward_token",
            Self::SetRewardRate { .. } => "set_reward_rate",
            Self::RemoveRewardToken { .. } => "remove_reward_token",
            Self::Stake { .. } => "stake",
            Self::Unstake { .. } => "unstake",
            Self::Claim { .. } => "claim",
            Self::ClaimCommission { .. } => "claim_commission",
            Self::FundTreasury { .. } => "fund_treasury",
            Self::Prune { .. } => "prune",
            Self::SetMaxCheckpoints { .. } => "set_max_checkpoints",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub timestamp: u64,
    pub event: LedgerEvent,
}

/// Parse a JSON array of timestamped events, rejecting logs that go back in time.
pub fn parse_events(json: &str) -> Result<Vec<TimestampedEvent>> {
    let events: Vec<TimestampedEvent> =
        serde_json::from_str(json).context("Failed to parse event log")?;

    for (index, pair) in events.windows(2).enumerate() {
        if pair[1].timestamp < pair[0].timestamp {
            bail!(
                "Event {} ({}) at {} precedes the previous event at {}",
                index + 1,
                pair[1].event.name(),
                pair[1].timestamp,
                pair[0].timestamp
            );
        }
    }
    Ok(events)
}

pub fn load_events(path: &Path) -> Result<Vec<TimestampedEvent>> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read event log {}", path.display()))?;
    parse_events(&json)
}
