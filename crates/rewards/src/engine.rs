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

//! Accrual engine: validator and token administration, stake positions, settlement and pruning.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use alloy_primitives::{Address, U256};
use tokio::sync::RwLock;

use crate::{
    accrual::{accrue, Accrual},
    checkpoint::{CheckpointStore, RateCheckpoint, RateKind, SubjectKey},
    clock::Clock,
    config::EngineConfig,
    error::EngineError,
    fanout::{FanOutStatus, RateFanOut},
    segments::{build_segments, Segment},
    settlement::{CommissionClaim, SettlementTicket},
    state::{CommissionBalance, RewardToken, StakePosition, ValidatorState},
    treasury::{TransferError, Treasury},
    ValidatorId,
};

/// Engine shared between concurrent readers and a serialized writer.
pub type SharedRewardsEngine = Arc<RwLock<RewardsEngine>>;

type CommissionLedger = BTreeMap<(ValidatorId, Address), CommissionBalance>;

pub struct RewardsEngine {
    config: EngineConfig,
    store: CheckpointStore,
    clock: Arc<dyn Clock>,
    validators: BTreeMap<ValidatorId, ValidatorState>,
    tokens: BTreeMap<Address, RewardToken>,
    positions: BTreeMap<(Address, ValidatorId), StakePosition>,
    commission: CommissionLedger,
    /// Positions and tokens with a settlement transfer outstanding.
    settling: BTreeSet<(Address, ValidatorId, Address)>,
}

/// Segments of one position for one token, ending at `as_of` (already clamped by the caller).
fn position_segments(
    store: &CheckpointStore,
    position: &StakePosition,
    token: Address,
    as_of: u64,
) -> Vec<Segment> {
    build_segments(
        store.locator(&SubjectKey::reward(position.validator, token)),
        store.locator(&SubjectKey::commission(position.validator)),
        position.last_settled(token),
        as_of,
        None,
    )
}

fn position_accrual(
    store: &CheckpointStore,
    position: &StakePosition,
    token: Address,
    as_of: u64,
    precision: U256,
) -> Accrual {
    if position.principal.is_zero() {
        return Accrual::ZERO;
    }
    accrue(position.principal, &position_segments(store, position, token, as_of), precision)
}

/// Fold everything earned up to `as_of` into the position's pending balance and credit the
/// validator's commission, without paying anything out.
fn accrue_into_pending(
    store: &CheckpointStore,
    tokens: &BTreeMap<Address, RewardToken>,
    commission: &mut CommissionLedger,
    position: &mut StakePosition,
    as_of: u64,
    precision: U256,
) {
    for token in tokens.keys().copied() {
        let accrual = position_accrual(store, position, token, as_of, precision);
        if !accrual.is_zero() {
            tracing::debug!(
                "Accrued {} net / {} commission of {:#x} for {:#x} on validator {}",
                accrual.net,
                accrual.commission,
                token,
                position.staker,
                position.validator
            );
            position.add_pending(token, accrual.net);
            let balance = commission.entry((position.validator, token)).or_default();
            balance.accrued += accrual.commission;
        }
        position.advance_settled(token, as_of);
    }
}

impl RewardsEngine {
    /// Construct an engine around an existing checkpoint store.
    ///
    /// The store's checkpoint cap is replaced by the one in `config`.
    pub fn new(config: EngineConfig, mut store: CheckpointStore, clock: Arc<dyn Clock>) -> Self {
        store.set_max_checkpoints_per_subject(config.max_checkpoints_per_subject);
        Self {
            config,
            store,
            clock,
            validators: BTreeMap::new(),
            tokens: BTreeMap::new(),
            positions: BTreeMap::new(),
            commission: BTreeMap::new(),
            settling: BTreeSet::new(),
        }
    }

    pub fn into_shared(self) -> SharedRewardsEngine {
        Arc::new(RwLock::new(self))
    }

    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    pub fn validator(&self, id: ValidatorId) -> Option<&ValidatorState> {
        self.validators.get(&id)
    }

    pub fn validators(&self) -> impl Iterator<Item = &ValidatorState> {
        self.validators.values()
    }

    pub fn token(&self, token: Address) -> Option<&RewardToken> {
        self.tokens.get(&token)
    }

    pub fn tokens(&self) -> impl Iterator<Item = &RewardToken> {
        self.tokens.values()
    }

    pub fn position(&self, staker: Address, validator: ValidatorId) -> Option<&StakePosition> {
        self.positions.get(&(staker, validator))
    }

    pub fn positions(&self) -> impl Iterator<Item = &StakePosition> {
        self.positions.values()
    }

    pub fn count(&self, subject: &SubjectKey) -> usize {
        self.store.count(subject)
    }

    pub fn checkpoint_at(&self, subject: &SubjectKey, index: usize) -> Option<&RateCheckpoint> {
        self.store.at(subject, index)
    }

    /// Rate of `subject` in effect at `at`, zero before its first checkpoint.
    pub fn rate_at(&self, subject: &SubjectKey, at: u64) -> U256 {
        self.store.locator(subject).rate_at(at)
    }

    fn require_validator(&self, id: ValidatorId) -> Result<&ValidatorState, EngineError> {
        self.validators.get(&id).ok_or(EngineError::UnknownValidator(id))
    }

    fn ensure_not_settling(
        &self,
        staker: Address,
        validator: ValidatorId,
    ) -> Result<(), EngineError> {
        if self.settling.iter().any(|(s, v, _)| *s == staker && *v == validator) {
            return Err(EngineError::SettlementInFlight { staker, validator });
        }
        Ok(())
    }

    fn check_commission(&self, rate: U256) -> Result<(), EngineError> {
        if rate > self.config.max_commission_rate {
            return Err(EngineError::CommissionTooHigh {
                rate,
                max: self.config.max_commission_rate,
            });
        }
        Ok(())
    }

    pub fn add_validator(
        &mut self,
        id: ValidatorId,
        commission_rate: U256,
        commission_recipient: Address,
    ) -> Result<(), EngineError> {
        if self.validators.contains_key(&id) {
            return Err(EngineError::ValidatorExists(id));
        }
        self.check_commission(commission_rate)?;

        let now = self.now();
        self.store.check_append(&SubjectKey::commission(id), now)?;
        for token in self.tokens.values().filter(|token| token.active) {
            self.store.check_append(&SubjectKey::reward(id, token.token), now)?;
        }
        self.store.append(SubjectKey::commission(id), now, commission_rate)?;
        for token in self.tokens.values().filter(|token| token.active) {
            self.store.append(SubjectKey::reward(id, token.token), now, token.rate)?;
        }
        self.validators.insert(id, ValidatorState::new(id, commission_recipient));

        tracing::info!("Added validator {} with commission rate {}", id, commission_rate);
        Ok(())
    }

    pub fn set_validator_commission(
        &mut self,
        id: ValidatorId,
        rate: U256,
    ) -> Result<(), EngineError> {
        if self.require_validator(id)?.slashed_at().is_some() {
            return Err(EngineError::ValidatorSlashed(id));
        }
        self.check_commission(rate)?;

        let now = self.now();
        self.store.append(SubjectKey::commission(id), now, rate)?;
        tracing::info!("Validator {} commission set to {} at {}", id, rate, now);
        Ok(())
    }

    pub fn set_validator_active(
        &mut self,
        id: ValidatorId,
        active: bool,
    ) -> Result<(), EngineError> {
        self.validators.get_mut(&id).ok_or(EngineError::UnknownValidator(id))?.set_active(active)?;
        tracing::info!("Validator {} active: {}", id, active);
        Ok(())
    }

    /// Mark the validator slashed as of now. Returns the cutoff timestamp.
    pub fn slash_validator(&mut self, id: ValidatorId) -> Result<u64, EngineError> {
        let now = self.now();
        self.validators.get_mut(&id).ok_or(EngineError::UnknownValidator(id))?.slash(now)?;
        tracing::warn!("Validator {} slashed at {}; accrual stops at this timestamp", id, now);
        Ok(now)
    }

    /// Register a reward token, or reactivate a removed one, writing its initial rate for every
    /// validator.
    pub fn add_reward_token(
        &mut self,
        token: Address,
        initial_rate: U256,
        max_rate: U256,
    ) -> Result<(), EngineError> {
        if self.tokens.get(&token).is_some_and(|existing| existing.active) {
            return Err(EngineError::TokenExists(token));
        }
        if initial_rate > max_rate {
            return Err(EngineError::RewardRateTooHigh { token, rate: initial_rate, max: max_rate });
        }

        let now = self.now();
        self.check_fan_out(token, now)?;
        self.tokens
            .insert(token, RewardToken { token, rate: initial_rate, max_rate, active: true });
        let mut job = RateFanOut::new(token, initial_rate, now);
        self.apply_fan_out(&mut job, usize::MAX)?;

        tracing::info!("Added reward token {:#x} with rate {}", token, initial_rate);
        Ok(())
    }

    /// Validate a rate change and record it as the token's current rate.
    ///
    /// Nothing changes unless every validator's series can take the new checkpoint.
    ///
    /// The returned job must be driven to completion with [RewardsEngine::apply_fan_out] for the
    /// change to reach every validator.
    pub fn begin_reward_rate_update(
        &mut self,
        token: Address,
        rate: U256,
    ) -> Result<RateFanOut, EngineError> {
        let now = self.now();
        let entry = self.tokens.get(&token).ok_or(EngineError::UnknownToken(token))?;
        if !entry.active {
            return Err(EngineError::TokenNotActive(token));
        }
        if rate > entry.max_rate {
            return Err(EngineError::RewardRateTooHigh { token, rate, max: entry.max_rate });
        }
        self.check_fan_out(token, now)?;

        if let Some(entry) = self.tokens.get_mut(&token) {
            entry.rate = rate;
        }
        Ok(RateFanOut::new(token, rate, now))
    }

    /// Fail if a fan-out of `token` at `effective_at` would be rejected by any validator's series.
    fn check_fan_out(&self, token: Address, effective_at: u64) -> Result<(), EngineError> {
        for id in self.validators.keys() {
            let subject = SubjectKey::reward(*id, token);
            if self.store.last(&subject).is_some_and(|cp| cp.timestamp > effective_at) {
                continue;
            }
            self.store.check_append(&subject, effective_at)?;
        }
        Ok(())
    }

    /// Write the job's checkpoint for at most `budget` further validators.
    ///
    /// A job whose token was deactivated or whose rate was replaced by a later update is
    /// abandoned. Validators that already hold a later checkpoint for the token are skipped.
    pub fn apply_fan_out(
        &mut self,
        job: &mut RateFanOut,
        budget: usize,
    ) -> Result<FanOutStatus, EngineError> {
        let current = self.tokens.get(&job.token).ok_or(EngineError::UnknownToken(job.token))?;
        if !current.active || current.rate != job.rate {
            tracing::warn!("Abandoning superseded rate update for {:#x}", job.token);
            return Ok(FanOutStatus::Complete);
        }

        let Some(start) = job.next_start() else {
            return Ok(FanOutStatus::Complete);
        };
        let batch: Vec<ValidatorId> =
            self.validators.range(start..).map(|(id, _)| *id).take(budget).collect();
        for id in batch {
            let subject = SubjectKey::reward(id, job.token);
            let newer = self.store.last(&subject).is_some_and(|cp| cp.timestamp > job.effective_at);
            if !newer {
                self.store.append(subject, job.effective_at, job.rate)?;
            }
            job.record(id);
        }

        let remaining = match job.next_start() {
            Some(start) => self.validators.range(start..).count(),
            None => 0,
        };
        tracing::debug!(
            "Rate update for {:#x}: {} validators written, {} remaining",
            job.token,
            job.touched(),
            remaining
        );
        if remaining == 0 {
            Ok(FanOutStatus::Complete)
        } else {
            Ok(FanOutStatus::Pending { remaining })
        }
    }

    /// Change a token's rate for every validator in one call.
    pub fn set_reward_rate(&mut self, token: Address, rate: U256) -> Result<(), EngineError> {
        let mut job = self.begin_reward_rate_update(token, rate)?;
        self.apply_fan_out(&mut job, usize::MAX)?;
        tracing::info!("Reward rate for {:#x} set to {} at {}", token, rate, job.effective_at);
        Ok(())
    }

    /// Write a terminal zero-rate checkpoint for every validator and deactivate the token.
    ///
    /// The token stays registered so rewards earned before removal can still be settled.
    pub fn remove_reward_token(&mut self, token: Address) -> Result<(), EngineError> {
        let mut job = self.begin_reward_rate_update(token, U256::ZERO)?;
        self.apply_fan_out(&mut job, usize::MAX)?;
        if let Some(entry) = self.tokens.get_mut(&token) {
            entry.active = false;
        }
        tracing::info!("Removed reward token {:#x} at {}", token, job.effective_at);
        Ok(())
    }

    pub fn set_max_checkpoints(&mut self, max: Option<usize>) {
        self.config.max_checkpoints_per_subject = max;
        self.store.set_max_checkpoints_per_subject(max);
    }

    /// Add to a position, creating it on first stake. Returns the new principal.
    pub fn stake(
        &mut self,
        staker: Address,
        validator: ValidatorId,
        amount: U256,
    ) -> Result<U256, EngineError> {
        if amount.is_zero() {
            return Err(EngineError::ZeroAmount);
        }
        self.ensure_not_settling(staker, validator)?;
        let state = self.require_validator(validator)?;
        if state.slashed_at().is_some() {
            return Err(EngineError::ValidatorSlashed(validator));
        }
        if !state.is_active() {
            return Err(EngineError::ValidatorInactive(validator));
        }

        let now = self.now();
        let precision = self.config.reward_precision;
        let position = self
            .positions
            .entry((staker, validator))
            .or_insert_with(|| StakePosition::new(staker, validator, now));
        accrue_into_pending(
            &self.store,
            &self.tokens,
            &mut self.commission,
            position,
            now,
            precision,
        );
        position.principal += amount;

        tracing::info!(
            "Staker {:#x} staked {} with validator {} (principal {})",
            staker,
            amount,
            validator,
            position.principal
        );
        Ok(position.principal)
    }

    /// Remove principal from a position. Returns the remaining principal.
    pub fn unstake(
        &mut self,
        staker: Address,
        validator: ValidatorId,
        amount: U256,
    ) -> Result<U256, EngineError> {
        if amount.is_zero() {
            return Err(EngineError::ZeroAmount);
        }
        self.ensure_not_settling(staker, validator)?;
        let as_of = self.require_validator(validator)?.accrual_cutoff(self.now());
        let precision = self.config.reward_precision;
        let position = self
            .positions
            .get_mut(&(staker, validator))
            .ok_or(EngineError::UnknownPosition { staker, validator })?;
        if position.principal < amount {
            return Err(EngineError::InsufficientStake {
                staker,
                validator,
                principal: position.principal,
                requested: amount,
            });
        }

        accrue_into_pending(
            &self.store,
            &self.tokens,
            &mut self.commission,
            position,
            as_of,
            precision,
        );
        position.principal -= amount;

        tracing::info!(
            "Staker {:#x} unstaked {} from validator {} (principal {})",
            staker,
            amount,
            validator,
            position.principal
        );
        Ok(position.principal)
    }

    /// Instant up to which a position of `validator` may accrue when asked for `as_of`.
    fn effective_as_of(&self, validator: &ValidatorState, as_of: u64) -> u64 {
        validator.accrual_cutoff(as_of.min(self.now()))
    }

    /// Reward earned since the position's last settlement for `token`, up to
    /// `min(as_of, now, slashedAt)`.
    ///
    /// Never fails: unknown positions, degenerate windows and empty series yield zero.
    pub fn compute_net_reward(
        &self,
        staker: Address,
        validator: ValidatorId,
        token: Address,
        as_of: u64,
    ) -> Accrual {
        let (Some(state), Some(position)) =
            (self.validators.get(&validator), self.positions.get(&(staker, validator)))
        else {
            return Accrual::ZERO;
        };
        let as_of = self.effective_as_of(state, as_of);
        position_accrual(&self.store, position, token, as_of, self.config.reward_precision)
    }

    /// The segment timeline [RewardsEngine::compute_net_reward] integrates over.
    pub fn segments(
        &self,
        staker: Address,
        validator: ValidatorId,
        token: Address,
        as_of: u64,
    ) -> Vec<Segment> {
        let (Some(state), Some(position)) =
            (self.validators.get(&validator), self.positions.get(&(staker, validator)))
        else {
            return Vec::new();
        };
        position_segments(&self.store, position, token, self.effective_as_of(state, as_of))
    }

    /// Amount a settlement right now would pay: pending plus newly earned net reward.
    pub fn claimable(&self, staker: Address, validator: ValidatorId, token: Address) -> U256 {
        let pending = self
            .positions
            .get(&(staker, validator))
            .map(|position| position.pending(token))
            .unwrap_or(U256::ZERO);
        pending + self.compute_net_reward(staker, validator, token, self.now()).net
    }

    /// Gross reward of `principal` staked with `validator` over `[from, to]`, computed from the
    /// cumulative index of the reward series instead of walking segments.
    pub fn gross_reward_between(
        &self,
        validator: ValidatorId,
        token: Address,
        principal: U256,
        from: u64,
        to: u64,
    ) -> U256 {
        let Some(state) = self.validators.get(&validator) else {
            return U256::ZERO;
        };
        let to = state.accrual_cutoff(to);
        let integral =
            self.store.locator(&SubjectKey::reward(validator, token)).integral_between(from, to);
        principal * integral / self.config.reward_precision
    }

    /// Reserve a payout of everything a position has earned in `token` up to `as_of`.
    ///
    /// Nothing about the position changes until the ticket is finished, and the position is
    /// locked against stake, unstake and another settlement of `token` until then.
    pub fn begin_settlement(
        &mut self,
        staker: Address,
        validator: ValidatorId,
        token: Address,
        as_of: u64,
    ) -> Result<SettlementTicket, EngineError> {
        if !self.tokens.contains_key(&token) {
            return Err(EngineError::UnknownToken(token));
        }
        let state = self.require_validator(validator)?;
        let as_of = self.effective_as_of(state, as_of);
        let key = (staker, validator, token);
        if self.settling.contains(&key) {
            return Err(EngineError::SettlementInFlight { staker, validator });
        }

        let position = self
            .positions
            .get(&(staker, validator))
            .ok_or(EngineError::UnknownPosition { staker, validator })?;
        let accrual =
            position_accrual(&self.store, position, token, as_of, self.config.reward_precision);
        let amount = position.pending(token) + accrual.net;

        self.settling.insert(key);
        Ok(SettlementTicket {
            staker,
            validator,
            token,
            as_of,
            amount,
            commission: accrual.commission,
        })
    }

    /// Release a ticket with the outcome of its transfer.
    ///
    /// On success the position is settled up to the ticket's `as_of` and the validator is
    /// credited its commission. On failure only the reservation is dropped.
    pub fn finish_settlement(
        &mut self,
        ticket: SettlementTicket,
        outcome: Result<(), TransferError>,
    ) -> Result<U256, EngineError> {
        let SettlementTicket { staker, validator, token, as_of, amount, commission } = ticket;
        self.settling.remove(&(staker, validator, token));

        if let Err(source) = outcome {
            tracing::warn!(
                "Settlement of {} {:#x} to {:#x} failed: {}",
                amount,
                token,
                staker,
                source
            );
            return Err(EngineError::TransferFailed { token, recipient: staker, amount, source });
        }

        let position = self
            .positions
            .get_mut(&(staker, validator))
            .ok_or(EngineError::UnknownPosition { staker, validator })?;
        position.take_pending(token);
        position.advance_settled(token, as_of);
        if !commission.is_zero() {
            self.commission.entry((validator, token)).or_default().accrued += commission;
        }

        tracing::info!(
            "Settled {} {:#x} to {:#x} from validator {} up to {}",
            amount,
            token,
            staker,
            validator,
            as_of
        );
        Ok(amount)
    }

    /// Pay out everything a position has earned in `token` up to `as_of`.
    ///
    /// If the transfer fails, the position and commission ledger are left exactly as they were
    /// and the call may be retried. Settling twice with the same `as_of` pays zero the second
    /// time. Holders of a [SharedRewardsEngine] should use [crate::settle_shared] instead, which
    /// does not hold the lock during the transfer.
    pub async fn settle(
        &mut self,
        staker: Address,
        validator: ValidatorId,
        token: Address,
        as_of: u64,
        treasury: &dyn Treasury,
    ) -> Result<U256, EngineError> {
        let ticket = self.begin_settlement(staker, validator, token, as_of)?;
        let outcome = ticket.pay(treasury).await;
        self.finish_settlement(ticket, outcome)
    }

    /// Settle every registered token of one position at the current time.
    ///
    /// Each token commits on its own; a failed transfer does not undo earlier tokens.
    pub async fn settle_all(
        &mut self,
        staker: Address,
        validator: ValidatorId,
        treasury: &dyn Treasury,
    ) -> Vec<(Address, Result<U256, EngineError>)> {
        let now = self.now();
        let tokens: Vec<Address> = self.tokens.keys().copied().collect();
        let mut outcomes = Vec::with_capacity(tokens.len());
        for token in tokens {
            let outcome = self.settle(staker, validator, token, now, treasury).await;
            outcomes.push((token, outcome));
        }
        outcomes
    }

    /// Commission credited to `validator` for `token` and not yet claimed.
    pub fn accrued_commission(&self, validator: ValidatorId, token: Address) -> U256 {
        self.commission
            .get(&(validator, token))
            .map(CommissionBalance::unclaimed)
            .unwrap_or(U256::ZERO)
    }

    /// Bring every position of `validator` up to date for `token` and reserve the validator's
    /// unclaimed commission for its recipient.
    ///
    /// Bringing positions up to date moves earned net reward into their pending balances and
    /// credits commission. It changes no amount owed to anyone, so it is kept even if the
    /// transfer later fails; only the reservation is undone. Positions with a settlement in
    /// flight for `token` are left to that settlement.
    pub fn begin_commission_claim(
        &mut self,
        validator: ValidatorId,
        token: Address,
    ) -> Result<CommissionClaim, EngineError> {
        if !self.tokens.contains_key(&token) {
            return Err(EngineError::UnknownToken(token));
        }
        let state = self.require_validator(validator)?;
        let recipient = state.commission_recipient;
        let as_of = self.effective_as_of(state, self.now());
        let precision = self.config.reward_precision;

        for position in self.positions.values_mut().filter(|p| p.validator == validator) {
            if self.settling.contains(&(position.staker, validator, token)) {
                continue;
            }
            let accrual = position_accrual(&self.store, position, token, as_of, precision);
            if !accrual.is_zero() {
                position.add_pending(token, accrual.net);
                self.commission.entry((validator, token)).or_default().accrued +=
                    accrual.commission;
            }
            position.advance_settled(token, as_of);
        }

        let balance = self.commission.entry((validator, token)).or_default();
        let amount = balance.unclaimed();
        balance.claimed += amount;
        Ok(CommissionClaim { validator, token, recipient, amount })
    }

    pub fn finish_commission_claim(
        &mut self,
        claim: CommissionClaim,
        outcome: Result<(), TransferError>,
    ) -> Result<U256, EngineError> {
        let CommissionClaim { validator, token, recipient, amount } = claim;
        if let Err(source) = outcome {
            if let Some(balance) = self.commission.get_mut(&(validator, token)) {
                balance.claimed = balance.claimed.saturating_sub(amount);
            }
            tracing::warn!("Commission claim of {} {:#x} failed: {}", amount, token, source);
            return Err(EngineError::TransferFailed { token, recipient, amount, source });
        }

        if !amount.is_zero() {
            tracing::info!(
                "Validator {} claimed {} {:#x} commission to {:#x}",
                validator,
                amount,
                token,
                recipient
            );
        }
        Ok(amount)
    }

    /// Pay the validator's unclaimed commission for `token` to its recipient.
    pub async fn claim_commission(
        &mut self,
        validator: ValidatorId,
        token: Address,
        treasury: &dyn Treasury,
    ) -> Result<U256, EngineError> {
        let claim = self.begin_commission_claim(validator, token)?;
        let outcome = claim.pay(treasury).await;
        self.finish_commission_claim(claim, outcome)
    }

    /// Earliest settlement point among live positions that read `subject`.
    pub fn oldest_unsettled(&self, subject: &SubjectKey) -> Option<u64> {
        let live = self
            .positions
            .values()
            .filter(|p| p.validator == subject.validator && !p.principal.is_zero());
        match subject.kind {
            RateKind::Reward(token) => live.map(|p| p.last_settled(token)).min(),
            RateKind::Commission => live
                .flat_map(|p| self.tokens.keys().map(move |token| p.last_settled(*token)))
                .min(),
        }
    }

    /// Remove checkpoints of `subject` older than `before`, refusing if a live position still
    /// needs them. Returns the number of checkpoints removed.
    pub fn prune(&mut self, subject: SubjectKey, before: u64) -> Result<usize, EngineError> {
        let oldest = self.oldest_unsettled(&subject);
        let removed = self.store.prune(subject, before, oldest)?;
        tracing::info!("Pruned {} checkpoints of {} before {}", removed, subject, before);
        Ok(removed)
    }
}
