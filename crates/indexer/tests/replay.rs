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

use std::io::Write;

use alloy_primitives::{Address, U256};
use plume_rewards::{EngineConfig, SubjectKey, REWARD_PRECISION};
use plume_rewards_indexer::{
    db::{DbError, RewardsIndexerDb, Settlement, SettlementKind},
    rewards::{load_events, LedgerEvent, ReplayService, ReplayServiceConfig, TimestampedEvent},
};
use tempfile::NamedTempFile;
use tracing_test::traced_test;

const TOKEN: Address = Address::repeat_byte(0x70);
const ALICE: Address = Address::repeat_byte(0xa1);
const RECIPIENT: Address = Address::repeat_byte(0xc0);

fn pct(percent: u64) -> U256 {
    REWARD_PRECISION * U256::from(percent) / U256::from(100)
}

fn per_unit(amount: u64) -> U256 {
    REWARD_PRECISION * U256::from(amount)
}

fn at(timestamp: u64, event: LedgerEvent) -> TimestampedEvent {
    TimestampedEvent { timestamp, event }
}

// Keep the temp file alive for as long as the service uses the database.
async fn setup_service(config: ReplayServiceConfig) -> (ReplayService, NamedTempFile) {
    let temp_file = NamedTempFile::new().expect("Failed to create temp file");
    let db_url = format!("sqlite:{}", temp_file.path().display());
    let service = ReplayService::new(&db_url, config).await.expect("Failed to create service");
    (service, temp_file)
}

/// Validator 1 at 10% commission and a token paying 100 per unit from day 0, both raised at
/// day 10; ALICE stakes 1000 at day 0.
fn two_period_events() -> Vec<TimestampedEvent> {
    vec![
        at(
            0,
            LedgerEvent::AddRewardToken {
                token: TOKEN,
                rate: per_unit(100),
                max_rate: per_unit(1_000),
            },
        ),
        at(
            0,
            LedgerEvent::AddValidator { validator: 1, commission: pct(10), recipient: RECIPIENT },
        ),
        at(0, LedgerEvent::Stake { staker: ALICE, validator: 1, amount: U256::from(1_000) }),
        at(10, LedgerEvent::SetRewardRate { token: TOKEN, rate: per_unit(150) }),
        at(10, LedgerEvent::SetCommission { validator: 1, commission: pct(15) }),
    ]
}

#[tokio::test]
async fn replay_settles_and_persists() {
    let (mut service, _temp_file) = setup_service(ReplayServiceConfig::default()).await;

    let mut events = vec![at(
        0,
        LedgerEvent::FundTreasury { token: TOKEN, amount: U256::from(10_000_000) },
    )];
    events.extend(two_period_events());
    events.push(at(20, LedgerEvent::Claim { staker: ALICE, validator: 1, token: Some(TOKEN) }));
    events.push(at(20, LedgerEvent::ClaimCommission { validator: 1, token: TOKEN }));

    let summary = service.run(&events).await.unwrap();
    assert_eq!(summary.events, 8);
    assert_eq!(summary.settlements, 2);
    assert_eq!(summary.failed_transfers, 0);
    assert_eq!(summary.last_timestamp, Some(20));

    let db = service.db();
    let paid = db.get_settlements_by_recipient(ALICE).await.unwrap();
    assert_eq!(paid.len(), 1);
    assert_eq!(paid[0].kind, SettlementKind::Reward);
    assert_eq!(paid[0].amount, U256::from(2_175_000));
    assert_eq!(paid[0].settled_at, 20);

    let commission = db.get_settlements_by_recipient(RECIPIENT).await.unwrap();
    assert_eq!(commission.len(), 1);
    assert_eq!(commission[0].kind, SettlementKind::Commission);
    assert_eq!(commission[0].amount, U256::from(100_000 + 225_000));

    let reward_series = db.get_checkpoints(&SubjectKey::reward(1, TOKEN)).await.unwrap();
    assert_eq!(reward_series.len(), 2);
    assert_eq!(reward_series[1].timestamp, 10);
    assert_eq!(reward_series[1].cumulative_index, per_unit(1_000));
    assert_eq!(db.get_checkpoints(&SubjectKey::commission(1)).await.unwrap().len(), 2);
    assert_eq!(db.get_last_event_timestamp().await.unwrap(), Some(20));

    let loaded = db.load_checkpoint_store().await.unwrap();
    assert_eq!(&loaded, service.engine().store());
}

#[tokio::test]
#[traced_test]
async fn failed_transfer_does_not_stop_replay() {
    let (mut service, _temp_file) = setup_service(ReplayServiceConfig::default()).await;

    let mut events = two_period_events();
    events.push(at(10, LedgerEvent::Claim { staker: ALICE, validator: 1, token: None }));
    events.push(at(
        11,
        LedgerEvent::FundTreasury { token: TOKEN, amount: U256::from(10_000_000) },
    ));
    events.push(at(12, LedgerEvent::Claim { staker: ALICE, validator: 1, token: None }));
    events.push(at(12, LedgerEvent::Prune { validator: 1, token: Some(TOKEN), before: 12 }));

    let summary = service.run(&events).await.unwrap();
    assert_eq!(summary.failed_transfers, 1);
    assert_eq!(summary.settlements, 1);
    assert!(logs_contain("Skipping reward payout"));

    // Days 0-10 at 100 and 10% plus days 10-12 at 150 and 15%.
    let paid = service.db().get_settlements_by_recipient(ALICE).await.unwrap();
    assert_eq!(paid.len(), 1);
    assert_eq!(paid[0].amount, U256::from(900_000 + 255_000));
    assert_eq!(paid[0].settled_at, 12);
    assert_eq!(service.treasury().paid(TOKEN, ALICE).await, U256::from(1_155_000));

    let reward_series =
        service.db().get_checkpoints(&SubjectKey::reward(1, TOKEN)).await.unwrap();
    assert_eq!(reward_series.len(), 1);
    assert_eq!(reward_series[0].timestamp, 10);

    let loaded = service.db().load_checkpoint_store().await.unwrap();
    assert_eq!(&loaded, service.engine().store());
}

#[tokio::test]
async fn invalid_event_aborts_with_context() {
    let (mut service, _temp_file) = setup_service(ReplayServiceConfig::default()).await;

    let events = vec![
        at(
            0,
            LedgerEvent::AddValidator { validator: 1, commission: pct(10), recipient: RECIPIENT },
        ),
        at(3, LedgerEvent::Stake { staker: ALICE, validator: 2, amount: U256::from(1) }),
    ];
    let err = service.run(&events).await.unwrap_err();
    assert!(err.to_string().contains("Failed to apply event 1 (stake) at 3"));
    assert_eq!(service.db().get_last_event_timestamp().await.unwrap(), None);
}

#[tokio::test]
async fn checkpoint_cap_from_config_applies() {
    let config =
        ReplayServiceConfig { engine: EngineConfig::default().with_max_checkpoints(1) };
    let (mut service, _temp_file) = setup_service(config).await;

    let err = service.run(&two_period_events()).await.unwrap_err();
    assert!(err.to_string().contains("set_reward_rate"));
}

#[tokio::test]
async fn report_shows_unsettled_rewards() {
    let (mut service, _temp_file) = setup_service(ReplayServiceConfig::default()).await;
    service.run(&two_period_events()).await.unwrap();

    let report = service.report(20);
    assert_eq!(report.len(), 1);
    assert_eq!(report[0].staker, ALICE);
    assert_eq!(report[0].principal, U256::from(1_000));
    assert_eq!(report[0].net, U256::from(2_175_000));
    assert_eq!(report[0].commission, U256::from(325_000));
}

#[tokio::test]
async fn out_of_range_settlement_time_is_rejected() {
    let (service, _temp_file) = setup_service(ReplayServiceConfig::default()).await;
    let db = service.db();

    let settlement = Settlement {
        recipient: ALICE,
        validator: 1,
        token: TOKEN,
        kind: SettlementKind::Reward,
        amount: U256::from(5),
        settled_at: u64::MAX,
    };
    let err = db.insert_settlement(&settlement).await.unwrap_err();
    assert!(matches!(err, DbError::BadValue(_)));
    assert!(db.get_settlements_by_recipient(ALICE).await.unwrap().is_empty());
}

#[test]
fn event_log_file_round_trips() {
    let events = two_period_events();
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(serde_json::to_string(&events).unwrap().as_bytes()).unwrap();

    assert_eq!(load_events(file.path()).unwrap(), events);
}
