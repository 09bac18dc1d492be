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

use alloy_primitives::{Address, U256};
use thiserror::Error;

use crate::{checkpoint::SubjectKey, treasury::TransferError, ValidatorId};

/// Failures of checkpoint storage mutations. None of them change state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("checkpoint for {subject} at {attempted} precedes latest checkpoint at {last}")]
    NonMonotonicTimestamp { subject: SubjectKey, last: u64, attempted: u64 },

    #[error("{subject} already holds the maximum of {max} checkpoints; prune first")]
    MaxCheckpointsExceeded { subject: SubjectKey, max: usize },

    #[error(
        "pruning {subject} before {before} would drop history needed by a position settled at \
         {oldest_unsettled}"
    )]
    PruneUnsafe { subject: SubjectKey, before: u64, oldest_unsettled: u64 },
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("transfer of {amount} {token:#x} to {recipient:#x} failed")]
    TransferFailed {
        token: Address,
        recipient: Address,
        amount: U256,
        #[source]
        source: TransferError,
    },

    #[error("unknown validator {0}")]
    UnknownValidator(ValidatorId),

    #[error("validator {0} already exists")]
    ValidatorExists(ValidatorId),

    #[error("validator {0} is slashed")]
    ValidatorSlashed(ValidatorId),

    #[error("validator {0} is inactive")]
    ValidatorInactive(ValidatorId),

    #[error("unknown reward token {0:#x}")]
    UnknownToken(Address),

    #[error("reward token {0:#x} is already active")]
    TokenExists(Address),

    #[error("reward token {0:#x} is not active")]
    TokenNotActive(Address),

    #[error("commission rate {rate} exceeds maximum {max}")]
    CommissionTooHigh { rate: U256, max: U256 },

    #[error("reward rate {rate} for {token:#x} exceeds maximum {max}")]
    RewardRateTooHigh { token: Address, rate: U256, max: U256 },

    #[error(
        "staker {staker:#x} has {principal} staked with validator {validator}, cannot unstake \
         {requested}"
    )]
    InsufficientStake { staker: Address, validator: ValidatorId, principal: U256, requested: U256 },

    #[error("no position for staker {staker:#x} with validator {validator}")]
    UnknownPosition { staker: Address, validator: ValidatorId },

    #[error("settlement for staker {staker:#x} with validator {validator} is in flight")]
    SettlementInFlight { staker: Address, validator: ValidatorId },

    #[error("amount must be greater than zero")]
    ZeroAmount,
}
