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

//! Checkpointed reward and commission accounting for Plume staking.
//!
//! Reward rates (per validator and token) and commission rates (per validator) are recorded as
//! append-only timestamped checkpoints. Rewards owed to a stake position are computed by merging
//! both series into constant-rate segments and integrating over the position's unsettled window.

pub mod accrual;
pub mod checkpoint;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod fanout;
pub mod locator;
pub mod segments;
pub mod settlement;
pub mod state;
pub mod treasury;

/// Compact validator identifier.
pub type ValidatorId = u16;

pub use accrual::{accrue, Accrual};
pub use checkpoint::{
    AppendOutcome, CheckpointStore, RateCheckpoint, RateKind, SeriesRecord, SubjectKey,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EngineConfig, REWARD_PRECISION};
pub use engine::{RewardsEngine, SharedRewardsEngine};
pub use error::{EngineError, StoreError};
pub use fanout::{FanOutStatus, RateFanOut};
pub use locator::{Locator, RateSample};
pub use segments::{build_segments, Segment};
pub use settlement::{claim_commission_shared, settle_shared, CommissionClaim, SettlementTicket};
pub use state::{CommissionBalance, RewardToken, StakePosition, ValidatorState, ValidatorStatus};
pub use treasury::{InMemoryTreasury, TransferError, Treasury};
