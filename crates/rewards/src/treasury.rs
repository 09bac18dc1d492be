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

//! Token transfer collaborator used to pay out settled rewards and commission.

use std::{collections::HashMap, sync::Arc};

use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("treasury holds {available} of {token:#x}, {requested} requested")]
    InsufficientFunds { token: Address, available: U256, requested: U256 },

    #[error("transfer rejected: {0}")]
    Rejected(String),
}

/// Moves reward tokens out of the rewards treasury.
///
/// A returned error means nothing was transferred.
#[async_trait]
pub trait Treasury: Send + Sync {
    async fn transfer(
        &self,
        token: Address,
        recipient: Address,
        amount: U256,
    ) -> Result<(), TransferError>;
}

#[derive(Debug, Default)]
struct Balances {
    reserves: HashMap<Address, U256>,
    paid: HashMap<(Address, Address), U256>,
}

/// Treasury backed by in-memory reserves per token.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTreasury {
    inner: Arc<Mutex<Balances>>,
}

impl InMemoryTreasury {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fund(&self, token: Address, amount: U256) {
        let mut balances = self.inner.lock().await;
        *balances.reserves.entry(token).or_default() += amount;
    }

    pub async fn reserve(&self, token: Address) -> U256 {
        self.inner.lock().await.reserves.get(&token).copied().unwrap_or(U256::ZERO)
    }

    /// Total amount of `token` transferred to `recipient` so far.
    pub async fn paid(&self, token: Address, recipient: Address) -> U256 {
        self.inner.lock().await.paid.get(&(token, recipient)).copied().unwrap_or(U256::ZERO)
    }
}

#[async_trait]
impl Treasury for InMemoryTreasury {
    async fn transfer(
        &self,
        token: Address,
        recipient: Address,
        amount: U256,
    ) -> Result<(), TransferError> {
        let mut balances = self.inner.lock().await;
        let available = balances.reserves.get(&token).copied().unwrap_or(U256::ZERO);
        if available < amount {
            return Err(TransferError::InsufficientFunds { token, available, requested: amount });
        }
        balances.reserves.insert(token, available - amount);
        *balances.paid.entry((token, recipient)).or_default() += amount;
        Ok(())
    }
}
