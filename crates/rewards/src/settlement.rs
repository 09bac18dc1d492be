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

//! Two-phase payouts.
//!
//! A payout is reserved while holding the engine, the transfer runs without it, and the result
//! is then reported back to finish the payout. Through a [SharedRewardsEngine] this keeps the
//! write lock free while the treasury is working.

use alloy_primitives::{Address, U256};

use crate::{
    engine::SharedRewardsEngine,
    error::EngineError,
    treasury::{TransferError, Treasury},
    ValidatorId,
};

/// A reserved staker payout whose transfer is outstanding.
///
/// While a ticket is open the position cannot be staked, unstaked or settled again for the same
/// token. Tickets are consumed by [crate::RewardsEngine::finish_settlement].
#[derive(Debug, PartialEq, Eq)]
pub struct SettlementTicket {
    pub(crate) staker: Address,
    pub(crate) validator: ValidatorId,
    pub(crate) token: Address,
    pub(crate) as_of: u64,
    pub(crate) amount: U256,
    pub(crate) commission: U256,
}

impl SettlementTicket {
    pub fn staker(&self) -> Address {
        self.staker
    }

    pub fn validator(&self) -> ValidatorId {
        self.validator
    }

    pub fn token(&self) -> Address {
        self.token
    }

    /// Instant the position is settled up to once the ticket finishes successfully.
    pub fn as_of(&self) -> u64 {
        self.as_of
    }

    /// Pending plus newly earned net reward.
    pub fn amount(&self) -> U256 {
        self.amount
    }

    /// Transfer the reserved amount to the staker. Zero amounts never reach the treasury.
    pub async fn pay(&self, treasury: &dyn Treasury) -> Result<(), TransferError> {
        if self.amount.is_zero() {
            return Ok(());
        }
        treasury.transfer(self.token, self.staker, self.amount).await
    }
}

/// Validator commission reserved for payout to its recipient.
#[derive(Debug, PartialEq, Eq)]
pub struct CommissionClaim {
    pub(crate) validator: ValidatorId,
    pub(crate) token: Address,
    pub(crate) recipient: Address,
    pub(crate) amount: U256,
}

impl CommissionClaim {
    pub fn validator(&self) -> ValidatorId {
        self.validator
    }

    pub fn token(&self) -> Address {
        self.token
    }

    pub fn recipient(&self) -> Address {
        self.recipient
    }

    pub fn amount(&self) -> U256 {
        self.amount
    }

    pub async fn pay(&self, treasury: &dyn Treasury) -> Result<(), TransferError> {
        if self.amount.is_zero() {
            return Ok(());
        }
        treasury.transfer(self.token, self.recipient, self.amount).await
    }
}

/// Settle one position through a shared engine, holding the write lock only to reserve and to
/// finish. Readers proceed while the transfer is in flight.
pub async fn settle_shared(
    engine: &SharedRewardsEngine,
    staker: Address,
    validator: ValidatorId,
    token: Address,
    as_of: u64,
    treasury: &dyn Treasury,
) -> Result<U256, EngineError> {
    let ticket = engine.write().await.begin_settlement(staker, validator, token, as_of)?;
    let outcome = ticket.pay(treasury).await;
    engine.write().await.finish_settlement(ticket, outcome)
}

/// Claim validator commission through a shared engine; see [settle_shared].
pub async fn claim_commission_shared(
    engine: &SharedRewardsEngine,
    validator: ValidatorId,
    token: Address,
    treasury: &dyn Treasury,
) -> Result<U256, EngineError> {
    let claim = engine.write().await.begin_commission_claim(validator, token)?;
    let outcome = claim.pay(treasury).await;
    engine.write().await.finish_commission_claim(claim, outcome)
}
