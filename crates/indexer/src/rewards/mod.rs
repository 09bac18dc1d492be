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

//! Replay of recorded staking events through the rewards engine.

pub mod events;
mod service;

pub use events::{load_events, parse_events, LedgerEvent, TimestampedEvent};
pub use service::{PositionReport, ReplayService, ReplayServiceConfig, ReplaySummary};
