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

//! Append-only, time-ordered storage of rate checkpoints keyed by subject.

use std::{collections::BTreeMap, fmt};

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::{error::StoreError, locator::Locator, ValidatorId};

/// One historical rate value for a subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateCheckpoint {
    /// Moment the rate became effective.
    pub timestamp: u64,
    /// Fixed-point rate, scaled by the reward precision.
    pub rate: U256,
    /// Integral of `rate * duration` from the first checkpoint up to `timestamp`.
    pub cumulative_index: U256,
}

impl RateCheckpoint {
    pub fn new(timestamp: u64, rate: U256) -> Self {
        Self { timestamp, rate, cumulative_index: U256::ZERO }
    }
}

/// Which rate series of a validator a checkpoint belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateKind {
    /// Reward emission rate for one token.
    Reward(Address),
    /// Commission fraction, shared by every token of the validator.
    Commission,
}

/// Composite key of a checkpoint series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubjectKey {
    pub validator: ValidatorId,
    pub kind: RateKind,
}

impl SubjectKey {
    pub const fn reward(validator: ValidatorId, token: Address) -> Self {
        Self { validator, kind: RateKind::Reward(token) }
    }

    pub const fn commission(validator: ValidatorId) -> Self {
        Self { validator, kind: RateKind::Commission }
    }
}

impl fmt::Display for SubjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            RateKind::Reward(token) => {
                write!(f, "validator {} reward {:#x}", self.validator, token)
            }
            RateKind::Commission => write!(f, "validator {} commission", self.validator),
        }
    }
}

/// Outcome of a successful append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// A new checkpoint was pushed at the given index.
    Appended(usize),
    /// The checkpoint at the given index had the same timestamp and its rate was replaced.
    Overwritten(usize),
}

impl AppendOutcome {
    pub fn index(&self) -> usize {
        match *self {
            Self::Appended(index) | Self::Overwritten(index) => index,
        }
    }
}

/// Snapshot of one series, used for serialization and persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesRecord {
    pub subject: SubjectKey,
    pub checkpoints: Vec<RateCheckpoint>,
}

/// Durable, per-subject ordered collection of [RateCheckpoint] entries.
///
/// Within a series, timestamps are strictly increasing. Appending at the timestamp of the latest
/// checkpoint replaces its rate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<SeriesRecord>", into = "Vec<SeriesRecord>")]
pub struct CheckpointStore {
    series: BTreeMap<SubjectKey, Vec<RateCheckpoint>>,
    max_checkpoints_per_subject: Option<usize>,
}

impl CheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct a store that rejects appends once a series holds `max` checkpoints.
    pub fn with_max_checkpoints(max: Option<usize>) -> Self {
        Self { series: BTreeMap::new(), max_checkpoints_per_subject: max }
    }

    pub fn max_checkpoints_per_subject(&self) -> Option<usize> {
        self.max_checkpoints_per_subject
    }

    pub fn set_max_checkpoints_per_subject(&mut self, max: Option<usize>) {
        self.max_checkpoints_per_subject = max;
    }

    /// Check that [CheckpointStore::append] would accept a checkpoint at `timestamp`, without
    /// writing it.
    pub fn check_append(&self, subject: &SubjectKey, timestamp: u64) -> Result<(), StoreError> {
        let series = self.checkpoints(subject);
        let Some(last) = series.last() else {
            return match self.max_checkpoints_per_subject {
                Some(0) => Err(StoreError::MaxCheckpointsExceeded { subject: *subject, max: 0 }),
                _ => Ok(()),
            };
        };

        if timestamp < last.timestamp {
            return Err(StoreError::NonMonotonicTimestamp {
                subject: *subject,
                last: last.timestamp,
                attempted: timestamp,
            });
        }
        match self.max_checkpoints_per_subject {
            Some(max) if timestamp > last.timestamp && series.len() >= max => {
                Err(StoreError::MaxCheckpointsExceeded { subject: *subject, max })
            }
            _ => Ok(()),
        }
    }

    /// Insert a rate effective from `timestamp`.
    pub fn append(
        &mut self,
        subject: SubjectKey,
        timestamp: u64,
        rate: U256,
    ) -> Result<AppendOutcome, StoreError> {
        self.check_append(&subject, timestamp)?;

        let series = self.series.entry(subject).or_default();
        let len = series.len();
        let Some(last) = series.last_mut() else {
            series.push(RateCheckpoint::new(timestamp, rate));
            return Ok(AppendOutcome::Appended(0));
        };
        if timestamp == last.timestamp {
            // The cumulative index only covers time before the checkpoint, so it is unaffected.
            last.rate = rate;
            return Ok(AppendOutcome::Overwritten(len - 1));
        }

        let cumulative_index =
            last.cumulative_index + last.rate * U256::from(timestamp - last.timestamp);
        series.push(RateCheckpoint { timestamp, rate, cumulative_index });
        Ok(AppendOutcome::Appended(len))
    }

    /// Drop history older than `before_timestamp`, keeping the latest checkpoint that precedes
    /// it so that lookups at or after `before_timestamp` are unchanged.
    ///
    /// `oldest_unsettled` is the earliest `lastSettledTimestamp` of any live position that reads
    /// this series. Returns the number of checkpoints removed.
    pub fn prune(
        &mut self,
        subject: SubjectKey,
        before_timestamp: u64,
        oldest_unsettled: Option<u64>,
    ) -> Result<usize, StoreError> {
        if let Some(oldest) = oldest_unsettled {
            if oldest < before_timestamp {
                return Err(StoreError::PruneUnsafe {
                    subject,
                    before: before_timestamp,
                    oldest_unsettled: oldest,
                });
            }
        }

        let Some(series) = self.series.get_mut(&subject) else {
            return Ok(0);
        };
        let older = series.partition_point(|cp| cp.timestamp < before_timestamp);
        let removed = older.saturating_sub(1);
        series.drain(..removed);
        Ok(removed)
    }

    pub fn count(&self, subject: &SubjectKey) -> usize {
        self.series.get(subject).map(Vec::len).unwrap_or(0)
    }

    pub fn at(&self, subject: &SubjectKey, index: usize) -> Option<&RateCheckpoint> {
        self.series.get(subject).and_then(|series| series.get(index))
    }

    pub fn last(&self, subject: &SubjectKey) -> Option<&RateCheckpoint> {
        self.series.get(subject).and_then(|series| series.last())
    }

    /// Full series for a subject; empty if nothing was ever appended.
    pub fn checkpoints(&self, subject: &SubjectKey) -> &[RateCheckpoint] {
        self.series.get(subject).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn locator(&self, subject: &SubjectKey) -> Locator<'_, RateCheckpoint> {
        Locator::new(self.checkpoints(subject))
    }

    pub fn subjects(&self) -> impl Iterator<Item = &SubjectKey> {
        self.series.keys()
    }

    /// Export every series in subject order.
    pub fn records(&self) -> Vec<SeriesRecord> {
        self.series
            .iter()
            .map(|(subject, checkpoints)| SeriesRecord {
                subject: *subject,
                checkpoints: checkpoints.clone(),
            })
            .collect()
    }

    /// Rebuild a store from exported records. Later records for the same subject replace earlier
    /// ones. Cumulative indices are recomputed from the first checkpoint of each series.
    pub fn from_records(records: impl IntoIterator<Item = SeriesRecord>) -> Self {
        let mut series = BTreeMap::new();
        for record in records {
            let mut checkpoints = record.checkpoints;
            checkpoints.sort_by_key(|cp| cp.timestamp);
            checkpoints.dedup_by(|later, earlier| {
                if later.timestamp == earlier.timestamp {
                    earlier.rate = later.rate;
                    true
                } else {
                    false
                }
            });
            for i in 1..checkpoints.len() {
                let prev = checkpoints[i - 1];
                checkpoints[i].cumulative_index = prev.cumulative_index
                    + prev.rate * U256::from(checkpoints[i].timestamp - prev.timestamp);
            }
            series.insert(record.subject, checkpoints);
        }
        Self { series, max_checkpoints_per_subject: None }
    }
}

impl From<Vec<SeriesRecord>> for CheckpointStore {
    fn from(records: Vec<SeriesRecord>) -> Self {
        Self::from_records(records)
    }
}

impl From<CheckpointStore> for Vec<SeriesRecord> {
    fn from(store: CheckpointStore) -> Self {
        store.records()
    }
}
