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

use std::sync::Arc;

use alloy_primitives::{Address, U256};
use anyhow::{ensure, Context, Result};
use plume_rewards::{
    CheckpointStore, Clock, EngineConfig, EngineError, InMemoryTreasury, ManualClock,
    RewardsEngine, SubjectKey, ValidatorId,
};
use serde::Serialize;

use super::events::{LedgerEvent, TimestampedEvent};
use crate::db::rewards::{RewardsDb, RewardsDbObj, Settlement, SettlementKind};

#[derive(Clone, Debug, Default)]
pub struct ReplayServiceConfig {
    pub engine: EngineConfig,
}

/// Counters describing one replay run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReplaySummary {
    pub events: usize,
    pub settlements: usize,
    pub failed_transfers: usize,
    pub last_timestamp: Option<u64>,
}

/// Unsettled rewards of one position for one token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PositionReport {
    pub staker: Address,
    pub validator: ValidatorId,
    pub token: Address,
    pub principal: U256,
    pub pending: U256,
    pub net: U256,
    pub commission: U256,
}

/// Replays a staking event log through a [RewardsEngine] and persists the results.
pub struct ReplayService {
    engine: RewardsEngine,
    clock: ManualClock,
    treasury: InMemoryTreasury,
    db: RewardsDbObj,
}

impl ReplayService {
    pub async fn new(db_conn: &str, config: ReplayServiceConfig) -> Result<Self> {
        let db: RewardsDbObj = Arc::new(RewardsDb::new(db_conn).await?);
        Self::with_db(db, config)
    }

    pub fn with_db(db: RewardsDbObj, config: ReplayServiceConfig) -> Result<Self> {
        ensure!(!config.engine.reward_precision.is_zero(), "reward precision must be non-zero");

        let clock = ManualClock::new(0);
        let engine =
            RewardsEngine::new(config.engine, CheckpointStore::new(), Arc::new(clock.clone()));
        Ok(Self { engine, clock, treasury: InMemoryTreasury::new(), db })
    }

    pub fn engine(&self) -> &RewardsEngine {
        &self.engine
    }

    pub fn treasury(&self) -> &InMemoryTreasury {
        &self.treasury
    }

    pub fn db(&self) -> RewardsDbObj {
        self.db.clone()
    }

    /// Apply every event in order, then persist all checkpoint series.
    pub async fn run(&mut self, events: &[TimestampedEvent]) -> Result<ReplaySummary> {
        let start_time = std::time::Instant::now();
        tracing::info!("Starting replay of {} events", events.len());

        let mut summary = ReplaySummary::default();
        for (index, record) in events.iter().enumerate() {
            ensure!(
                record.timestamp >= self.clock.now(),
                "Event {} at {} precedes replay time {}",
                index,
                record.timestamp,
                self.clock.now()
            );
            self.clock.set(record.timestamp);
            self.apply(&record.event, &mut summary).await.with_context(|| {
                format!(
                    "Failed to apply event {} ({}) at {}",
                    index,
                    record.event.name(),
                    record.timestamp
                )
            })?;
            summary.events += 1;
            summary.last_timestamp = Some(record.timestamp);
        }

        self.db
            .replace_checkpoints(&self.engine.store().records())
            .await
            .context("Failed to store checkpoints")?;
        if let Some(timestamp) = summary.last_timestamp {
            self.db.set_last_event_timestamp(timestamp).await?;
        }

        tracing::info!(
            "Replay complete: {} events, {} settlements, {} failed transfers in {:?}",
            summary.events,
            summary.settlements,
            summary.failed_transfers,
            start_time.elapsed()
        );
        Ok(summary)
    }

    async fn apply(&mut self, event: &LedgerEvent, summary: &mut ReplaySummary) -> Result<()> {
        let now = self.clock.now();
        match *event {
            LedgerEvent::AddValidator { validator, commission, recipient } => {
                self.engine.add_validator(validator, commission, recipient)?;
            }
            LedgerEvent::SetCommission { validator, commission } => {
                self.engine.set_validator_commission(validator, commission)?;
            }
            LedgerEvent::SetValidatorActive { validator, active } => {
                self.engine.set_validator_active(validator, active)?;
            }
            LedgerEvent::SlashValidator { validator } => {
                self.engine.slash_validator(validator)?;
            }
            LedgerEvent::AddRewardToken { token, rate, max_rate } => {
                self.engine.add_reward_token(token, rate, max_rate)?;
            }
            LedgerEvent::SetRewardRate { token, rate } => {
                self.engine.set_reward_rate(token, rate)?;
            }
            LedgerEvent::RemoveRewardToken { token } => {
                self.engine.remove_reward_token(token)?;
            }
            LedgerEvent::Stake { staker, validator, amount } => {
                self.engine.stake(staker, validator, amount)?;
            }
            LedgerEvent::Unstake { staker, validator, amount } => {
                self.engine.unstake(staker, validator, amount)?;
            }
            LedgerEvent::Claim { staker, validator, token: Some(token) } => {
                let outcome =
                    self.engine.settle(staker, validator, token, now, &self.treasury).await;
                self.record_payout(
                    staker,
                    validator,
                    token,
                    SettlementKind::Reward,
                    outcome,
                    summary,
                )
                .await?;
            }
            LedgerEvent::Claim { staker, validator, token: None } => {
                let outcomes = self.engine.settle_all(staker, validator, &self.treasury).await;
                for (token, outcome) in outcomes {
                    self.record_payout(
                        staker,
                        validator,
                        token,
                        SettlementKind::Reward,
                        outcome,
                        summary,
                    )
                    .await?;
                }
            }
            LedgerEvent::ClaimCommission { validator, token } => {
                let recipient = self
                    .engine
                    .validator(validator)
                    .map(|state| state.commission_recipient)
                    .ok_or(EngineError::UnknownValidator(validator))?;
                let outcome = self.engine.claim_commission(validator, token, &self.treasury).await;
                self.record_payout(
                    recipient,
                    validator,
                    token,
                    SettlementKind::Commission,
                    outcome,
                    summary,
                )
                .await?;
            }
            LedgerEvent::FundTreasury { token, amount } => {
                self.treasury.fund(token, amount).await;
                tracing::debug!("Funded treasury with {} {:#x}", amount, token);
            }
            LedgerEvent::Prune { validator, token, before } => {
                let subject = match token {
                    Some(token) => SubjectKey::reward(validator, token),
                    None => SubjectKey::commission(validator),
                };
                self.engine.prune(subject, before)?;
            }
            LedgerEvent::SetMaxCheckpoints { max } => {
                self.engine.set_max_checkpoints(max);
            }
        }
        Ok(())
    }

    /// Store a successful non-zero payout. Failed transfers are counted and skipped; any other
    /// engine error aborts the replay.
    async fn record_payout(
        &self,
        recipient: Address,
        validator: ValidatorId,
        token: Address,
        kind: SettlementKind,
        outcome: Result<U256, EngineError>,
        summary: &mut ReplaySummary,
    ) -> Result<()> {
        let amount = match outcome {
            Ok(amount) => amount,
            Err(err @ EngineError::TransferFailed { .. }) => {
                tracing::warn!("Skipping {} payout to {:#x}: {:?}", kind, recipient, err);
                summary.failed_transfers += 1;
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
        if amount.is_zero() {
            return Ok(());
        }

        let settlement = Settlement {
            recipient,
            validator,
            token,
            kind,
            amount,
            settled_at: self.clock.now(),
        };
        self.db.insert_settlement(&settlement).await?;
        summary.settlements += 1;
        Ok(())
    }

    /// Unsettled rewards of every position for every registered token as of `at`.
    ///
    /// Moves the replay clock forward to `at` if it is in the future.
    pub fn report(&self, at: u64) -> Vec<PositionReport> {
        if at > self.clock.now() {
            self.clock.set(at);
        }
        let mut reports = Vec::new();
        for position in self.engine.positions() {
            for token in self.engine.tokens() {
                let accrual = self.engine.compute_net_reward(
                    position.staker,
                    position.validator,
                    token.token,
                    at,
                );
                reports.push(PositionReport {
                    staker: position.staker,
                    validator: position.validator,
                    token: token.token,
                    principal: position.principal,
                    pending: position.pending(token.token),
                    net: accrual.net,
                    commission: accrual.commission,
                });
            }
        }
        reports
    }
}
