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

use std::{fmt, str::FromStr, sync::Arc};

use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use plume_rewards::{
    CheckpointStore, RateCheckpoint, RateKind, SeriesRecord, SubjectKey, ValidatorId,
};
use serde::{Deserialize, Serialize};
use sqlx::{any::AnyPoolOptions, AnyPool, Row};

use super::DbError;

pub type RewardsDbObj = Arc<dyn RewardsIndexerDb + Send + Sync>;

// Keep well under the SQLite bound parameter limit.
const BATCH_INSERT_CHUNK_SIZE: usize = 100;

const LAST_EVENT_TIMESTAMP_KEY: &str = "last_event_timestamp";

/// Convert a U256 to a zero-padded string for proper database sorting
/// U256 max value has 78 decimal digits
fn pad_u256(value: U256) -> String {
    format!("{:0>78}", value)
}

/// Convert a zero-padded string back to U256
fn unpad_u256(s: &str) -> Result<U256, DbError> {
    let trimmed = s.trim_start_matches('0');
    if trimmed.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str(trimmed).map_err(|_| DbError::BadValue(format!("Invalid U256 string: {}", s)))
}

fn parse_address(s: &str) -> Result<Address, DbError> {
    Address::from_str(s).map_err(|_| DbError::BadValue(format!("Invalid address: {}", s)))
}

fn parse_validator(value: i64) -> Result<ValidatorId, DbError> {
    ValidatorId::try_from(value)
        .map_err(|_| DbError::BadValue(format!("Invalid validator id: {}", value)))
}

fn timestamp_column(value: u64) -> Result<i64, DbError> {
    i64::try_from(value)
        .map_err(|_| DbError::BadValue(format!("Timestamp out of range: {}", value)))
}

fn parse_timestamp(value: i64) -> Result<u64, DbError> {
    u64::try_from(value).map_err(|_| DbError::BadValue(format!("Invalid timestamp: {}", value)))
}

/// Split a subject into its `(kind, token)` columns.
fn subject_columns(subject: &SubjectKey) -> (&'static str, String) {
    match subject.kind {
        RateKind::Reward(token) => ("reward", format!("{:#x}", token)),
        RateKind::Commission => ("commission", String::new()),
    }
}

fn subject_from_columns(validator: i64, kind: &str, token: &str) -> Result<SubjectKey, DbError> {
    let validator = parse_validator(validator)?;
    match kind {
        "reward" => Ok(SubjectKey::reward(validator, parse_address(token)?)),
        "commission" => Ok(SubjectKey::commission(validator)),
        other => Err(DbError::BadValue(format!("Invalid rate kind: {}", other))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementKind {
    /// Net reward paid to a staker.
    Reward,
    /// Commission paid to a validator's recipient.
    Commission,
}

impl fmt::Display for SettlementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reward => f.write_str("reward"),
            Self::Commission => f.write_str("commission"),
        }
    }
}

impl FromStr for SettlementKind {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reward" => Ok(Self::Reward),
            "commission" => Ok(Self::Commission),
            other => Err(DbError::BadValue(format!("Invalid settlement kind: {}", other))),
        }
    }
}

/// A successful payout made during replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub recipient: Address,
    pub validator: ValidatorId,
    pub token: Address,
    pub kind: SettlementKind,
    pub amount: U256,
    pub settled_at: u64,
}

#[async_trait]
pub trait RewardsIndexerDb {
    /// Replace every stored checkpoint series with `records`.
    async fn replace_checkpoints(&self, records: &[SeriesRecord]) -> Result<(), DbError>;

    /// Checkpoints of one series in timestamp order.
    async fn get_checkpoints(&self, subject: &SubjectKey)
        -> Result<Vec<RateCheckpoint>, DbError>;

    /// Rebuild a checkpoint store from every stored series.
    async fn load_checkpoint_store(&self) -> Result<CheckpointStore, DbError>;

    async fn insert_settlement(&self, settlement: &Settlement) -> Result<(), DbError>;

    /// Settlements paid to `recipient`, oldest first.
    async fn get_settlements_by_recipient(
        &self,
        recipient: Address,
    ) -> Result<Vec<Settlement>, DbError>;

    /// Timestamp of the last event applied by a replay.
    async fn get_last_event_timestamp(&self) -> Result<Option<u64>, DbError>;

    async fn set_last_event_timestamp(&self, timestamp: u64) -> Result<(), DbError>;
}

pub struct RewardsDb {
    pool: AnyPool,
}

impl RewardsDb {
    pub async fn new(database_url: &str) -> Result<Self, DbError> {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new().max_connections(20).connect(database_url).await?;

        // Run migrations
        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl RewardsIndexerDb for RewardsDb {
    async fn replace_checkpoints(&self, records: &[SeriesRecord]) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM rate_checkpoints").execute(&mut *tx).await?;

        let rows: Vec<(&SubjectKey, &RateCheckpoint)> = records
            .iter()
            .flat_map(|record| record.checkpoints.iter().map(move |cp| (&record.subject, cp)))
            .collect();

        // Process in chunks to avoid parameter limits
        for chunk in rows.chunks(BATCH_INSERT_CHUNK_SIZE) {
            let mut values_clauses = Vec::new();
            let mut param_idx = 1;

            for _ in chunk {
                values_clauses.push(format!(
                    "(${},${},${},${},${},${},CURRENT_TIMESTAMP)",
                    param_idx,
                    param_idx + 1,
                    param_idx + 2,
                    param_idx + 3,
                    param_idx + 4,
                    param_idx + 5
                ));
                param_idx += 6;
            }

            let query = format!(
                r#"INSERT INTO rate_checkpoints
                (validator_id, kind, token, effective_at, rate, cumulative_index, updated_at)
                VALUES {}"#,
                values_clauses.join(",")
            );

            let mut q = sqlx::query(&query);
            for (subject, checkpoint) in chunk {
                let (kind, token) = subject_columns(subject);
                q = q
                    .bind(subject.validator as i64)
                    .bind(kind)
                    .bind(token)
                    .bind(timestamp_column(checkpoint.timestamp)?)
                    .bind(pad_u256(checkpoint.rate))
                    .bind(pad_u256(checkpoint.cumulative_index));
            }
            q.execute(&mut *tx).await?;
        }

        tx.commit().await?;
        tracing::debug!("Stored {} checkpoints across {} series", rows.len(), records.len());
        Ok(())
    }

    async fn get_checkpoints(
        &self,
        subject: &SubjectKey,
    ) -> Result<Vec<RateCheckpoint>, DbError> {
        let (kind, token) = subject_columns(subject);
        let query = r#"
            SELECT effective_at, rate, cumulative_index
            FROM rate_checkpoints
            WHERE validator_id = $1 AND kind = $2 AND token = $3
            ORDER BY effective_at ASC
        "#;

        let rows = sqlx::query(query)
            .bind(subject.validator as i64)
            .bind(kind)
            .bind(token)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> Result<RateCheckpoint, DbError> {
                Ok(RateCheckpoint {
                    timestamp: parse_timestamp(row.get::<i64, _>("effective_at"))?,
                    rate: unpad_u256(&row.get::<String, _>("rate"))?,
                    cumulative_index: unpad_u256(&row.get::<String, _>("cumulative_index"))?,
                })
            })
            .collect()
    }

    async fn load_checkpoint_store(&self) -> Result<CheckpointStore, DbError> {
        let query = r#"
            SELECT validator_id, kind, token, effective_at, rate, cumulative_index
            FROM rate_checkpoints
            ORDER BY validator_id ASC, kind ASC, token ASC, effective_at ASC
        "#;
        let rows = sqlx::query(query).fetch_all(&self.pool).await?;

        let mut records: Vec<SeriesRecord> = Vec::new();
        for row in rows {
            let subject = subject_from_columns(
                row.get::<i64, _>("validator_id"),
                &row.get::<String, _>("kind"),
                &row.get::<String, _>("token"),
            )?;
            let checkpoint = RateCheckpoint {
                timestamp: parse_timestamp(row.get::<i64, _>("effective_at"))?,
                rate: unpad_u256(&row.get::<String, _>("rate"))?,
                cumulative_index: unpad_u256(&row.get::<String, _>("cumulative_index"))?,
            };
            match records.last_mut() {
                Some(record) if record.subject == subject => record.checkpoints.push(checkpoint),
                _ => records.push(SeriesRecord { subject, checkpoints: vec![checkpoint] }),
            }
        }

        Ok(CheckpointStore::from_records(records))
    }

    async fn insert_settlement(&self, settlement: &Settlement) -> Result<(), DbError> {
        let query = r#"
            INSERT INTO settlements
            (recipient, validator_id, token, kind, amount, settled_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, CURRENT_TIMESTAMP)
            ON CONFLICT (recipient, validator_id, token, kind, settled_at)
            DO UPDATE SET amount = $5, updated_at = CURRENT_TIMESTAMP
        "#;

        sqlx::query(query)
            .bind(format!("{:#x}", settlement.recipient))
            .bind(settlement.validator as i64)
            .bind(format!("{:#x}", settlement.token))
            .bind(settlement.kind.to_string())
            .bind(pad_u256(settlement.amount))
            .bind(timestamp_column(settlement.settled_at)?)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn get_settlements_by_recipient(
        &self,
        recipient: Address,
    ) -> Result<Vec<Settlement>, DbError> {
        let query = r#"
            SELECT recipient, validator_id, token, kind, amount, settled_at
            FROM settlements
            WHERE recipient = $1
            ORDER BY settled_at ASC, validator_id ASC, token ASC
        "#;

        let rows =
            sqlx::query(query).bind(format!("{:#x}", recipient)).fetch_all(&self.pool).await?;

        rows.iter()
            .map(|row| -> Result<Settlement, DbError> {
                Ok(Settlement {
                    recipient: parse_address(&row.get::<String, _>("recipient"))?,
                    validator: parse_validator(row.get::<i64, _>("validator_id"))?,
                    token: parse_address(&row.get::<String, _>("token"))?,
                    kind: row.get::<String, _>("kind").parse()?,
                    amount: unpad_u256(&row.get::<String, _>("amount"))?,
                    settled_at: parse_timestamp(row.get::<i64, _>("settled_at"))?,
                })
            })
            .collect()
    }

    async fn get_last_event_timestamp(&self) -> Result<Option<u64>, DbError> {
        let query = "SELECT value FROM indexer_state WHERE key = $1";
        let result =
            sqlx::query(query).bind(LAST_EVENT_TIMESTAMP_KEY).fetch_optional(&self.pool).await?;

        match result {
            Some(row) => {
                let value: String = row.get("value");
                Ok(Some(value.parse().map_err(|_| DbError::BadValue(value))?))
            }
            None => Ok(None),
        }
    }

    async fn set_last_event_timestamp(&self, timestamp: u64) -> Result<(), DbError> {
        let query = r#"
            INSERT INTO indexer_state (key, value, updated_at)
            VALUES ($1, $2, CURRENT_TIMESTAMP)
            ON CONFLICT (key)
            DO UPDATE SET value = $2, updated_at = CURRENT_TIMESTAMP
        "#;

        sqlx::query(query)
            .bind(LAST_EVENT_TIMESTAMP_KEY)
            .bind(timestamp.to_string())
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padded_u256_round_trips_and_sorts() {
        let small = pad_u256(U256::from(42));
        let large = pad_u256(U256::from(1_000_000));
        assert_eq!(small.len(), 78);
        assert!(small < large);
        assert_eq!(unpad_u256(&small).unwrap(), U256::from(42));
        assert_eq!(unpad_u256(&pad_u256(U256::ZERO)).unwrap(), U256::ZERO);
        assert_eq!(unpad_u256(&pad_u256(U256::MAX)).unwrap(), U256::MAX);
        assert!(matches!(unpad_u256("00x1"), Err(DbError::BadValue(_))));
    }

    #[test]
    fn timestamps_beyond_i64_are_rejected() {
        assert_eq!(timestamp_column(1_700_000_000).unwrap(), 1_700_000_000);
        let max = i64::MAX as u64;
        assert_eq!(parse_timestamp(timestamp_column(max).unwrap()).unwrap(), max);
        assert!(matches!(timestamp_column(max + 1), Err(DbError::BadValue(_))));
        assert!(matches!(timestamp_column(u64::MAX), Err(DbError::BadValue(_))));
    }

    #[test]
    fn subject_columns_round_trip() {
        let token = Address::repeat_byte(0x42);
        for subject in [SubjectKey::reward(7, token), SubjectKey::commission(7)] {
            let (kind, token) = subject_columns(&subject);
            assert_eq!(subject_from_columns(7, kind, &token).unwrap(), subject);
        }
        assert!(subject_from_columns(70_000, "commission", "").is_err());
        assert!(subject_from_columns(1, "bonus", "").is_err());
    }
}
