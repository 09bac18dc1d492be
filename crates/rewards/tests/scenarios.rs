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

//! End-to-end accrual scenarios and properties of the accrual engine.

use std::sync::Arc;

use alloy_primitives::{Address, U256};
use plume_rewards::{
    accrue, build_segments, Accrual, CheckpointStore, EngineConfig, InMemoryTreasury,
    ManualClock, RewardsEngine, SubjectKey, REWARD_PRECISION,
};
use proptest::prelude::*;

const TOKEN: Address = Address::repeat_byte(0x70);
const OTHER: Address = Address::repeat_byte(0x71);
const ALICE: Address = Address::repeat_byte(0xa1);
const RECIPIENT: Address = Address::repeat_byte(0xc0);

fn pct(percent: u64) -> U256 {
    REWARD_PRECISION * U256::from(percent) / U256::from(100)
}

fn per_unit(amount: u64) -> U256 {
    REWARD_PRECISION * U256::from(amount)
}

fn engine_at(now: u64) -> (RewardsEngine, ManualClock) {
    let clock = ManualClock::new(now);
    let engine = RewardsEngine::new(
        EngineConfig::default(),
        CheckpointStore::new(),
        Arc::new(clock.clone()),
    );
    (engine, clock)
}

async fn funded_treasury() -> InMemoryTreasury {
    let treasury = InMemoryTreasury::new();
    treasury.fund(TOKEN, U256::MAX).await;
    treasury.fund(OTHER, U256::MAX).await;
    treasury
}

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(future)
}

// Timestamps below are in days; rates are reward per unit of stake per day.

#[test]
fn two_rate_periods_with_commission_change() {
    let (mut engine, clock) = engine_at(0);
    engine.add_reward_token(TOKEN, per_unit(100), per_unit(1_000)).unwrap();
    engine.add_validator(1, pct(10), RECIPIENT).unwrap();
    engine.stake(ALICE, 1, U256::from(1_000)).unwrap();

    clock.set(10);
    engine.set_reward_rate(TOKEN, per_unit(150)).unwrap();
    engine.set_validator_commission(1, pct(15)).unwrap();

    clock.set(20);
    let segments = engine.segments(ALICE, 1, TOKEN, 20);
    assert_eq!(segments.len(), 2);
    assert_eq!((segments[0].start, segments[0].end), (0, 10));
    assert_eq!((segments[1].start, segments[1].end), (10, 20));

    let accrual = engine.compute_net_reward(ALICE, 1, TOKEN, 20);
    assert_eq!(accrual.gross, U256::from(1_000_000 + 1_500_000));
    assert_eq!(accrual.commission, U256::from(100_000 + 225_000));
    assert_eq!(accrual.net, U256::from(900_000 + 1_275_000));
    assert_eq!(accrual.net, U256::from(2_175_000));
}

#[test]
fn empty_series_accrue_nothing() {
    let store = CheckpointStore::new();
    for (from, to) in [(0, 0), (0, 100), (50, 10), (0, u64::MAX)] {
        let segments = build_segments(
            store.locator(&SubjectKey::reward(1, TOKEN)),
            store.locator(&SubjectKey::commission(1)),
            from,
            to,
            None,
        );
        assert!(segments.iter().all(|segment| segment.reward_rate.is_zero()));
        let accrual = accrue(U256::from(1_000), &segments, REWARD_PRECISION);
        assert_eq!((accrual.net, accrual.commission), (U256::ZERO, U256::ZERO));
    }

    // A validator that has never seen the token has no series for it.
    let (mut engine, clock) = engine_at(0);
    engine.add_validator(1, pct(10), RECIPIENT).unwrap();
    engine.stake(ALICE, 1, U256::from(1_000)).unwrap();
    clock.set(100);
    assert_eq!(engine.compute_net_reward(ALICE, 1, TOKEN, 100), Accrual::ZERO);
    assert_eq!(engine.compute_net_reward(ALICE, 1, OTHER, 100), Accrual::ZERO);
}

#[tokio::test]
async fn removed_token_stops_accruing() {
    let (mut engine, clock) = engine_at(0);
    engine.add_reward_token(TOKEN, per_unit(100), per_unit(1_000)).unwrap();
    engine.add_reward_token(OTHER, per_unit(10), per_unit(1_000)).unwrap();
    engine.add_validator(1, pct(10), RECIPIENT).unwrap();
    engine.stake(ALICE, 1, U256::from(1_000)).unwrap();

    clock.set(5);
    engine.remove_reward_token(TOKEN).unwrap();
    assert_eq!(engine.rate_at(&SubjectKey::reward(1, TOKEN), 5), U256::ZERO);

    clock.set(6);
    engine.set_reward_rate(OTHER, per_unit(500)).unwrap();

    clock.set(10);
    assert_eq!(
        engine.compute_net_reward(ALICE, 1, TOKEN, 10),
        engine.compute_net_reward(ALICE, 1, TOKEN, 5)
    );

    let treasury = funded_treasury().await;
    let paid = engine.settle(ALICE, 1, TOKEN, 5, &treasury).await.unwrap();
    assert_eq!(paid, U256::from(450_000));
    assert_eq!(engine.compute_net_reward(ALICE, 1, TOKEN, 10), Accrual::ZERO);

    // The other token keeps its own history.
    let other = engine.compute_net_reward(ALICE, 1, OTHER, 10);
    assert_eq!(other.gross, U256::from(1_000 * (10 * 6 + 500 * 4)));
}

#[test]
fn splitting_at_a_checkpoint_is_exact() {
    let mut store = CheckpointStore::new();
    let reward = SubjectKey::reward(1, TOKEN);
    let commission = SubjectKey::commission(1);
    store.append(reward, 0, per_unit(3) / U256::from(7)).unwrap();
    store.append(commission, 0, pct(13)).unwrap();
    store.append(reward, 40, per_unit(11) / U256::from(3)).unwrap();

    let accrual = |from, to| {
        let segments =
            build_segments(store.locator(&reward), store.locator(&commission), from, to, None);
        accrue(U256::from(12_345), &segments, REWARD_PRECISION)
    };
    assert_eq!(accrual(0, 100), accrual(0, 40) + accrual(40, 100));
}

prop_compose! {
    /// A store holding one reward series and one commission series for validator 1.
    fn arb_store()(
        rewards in prop::collection::vec((1u64..500, 0u64..10_000_000_000_000_000_000), 1..8),
        commissions in prop::collection::vec((1u64..500, 0u64..=1_000_000_000_000_000_000), 1..8),
    ) -> CheckpointStore {
        let mut store = CheckpointStore::new();
        for (subject, series) in [
            (SubjectKey::reward(1, TOKEN), rewards),
            (SubjectKey::commission(1), commissions),
        ] {
            let mut at = 0;
            for (gap, rate) in series {
                store.append(subject, at, U256::from(rate)).unwrap();
                at += gap;
            }
        }
        store
    }
}

fn accrue_window(store: &CheckpointStore, principal: U256, from: u64, to: u64) -> Accrual {
    let segments = build_segments(
        store.locator(&SubjectKey::reward(1, TOKEN)),
        store.locator(&SubjectKey::commission(1)),
        from,
        to,
        None,
    );
    accrue(principal, &segments, REWARD_PRECISION)
}

fn abs_diff(a: U256, b: U256) -> U256 {
    if a > b {
        a - b
    } else {
        b - a
    }
}

proptest! {
    #[test]
    fn split_windows_add_up(
        store in arb_store(),
        principal in 0u64..10_000_000,
        mut points in prop::collection::vec(0u64..5_000, 3),
    ) {
        points.sort_unstable();
        let (t0, t1, t2) = (points[0], points[1], points[2]);
        let principal = U256::from(principal);

        let whole = accrue_window(&store, principal, t0, t2);
        let split = accrue_window(&store, principal, t0, t1)
            + accrue_window(&store, principal, t1, t2);

        // Splitting one segment in two can lose one unit of gross and two of commission.
        prop_assert!(abs_diff(whole.gross, split.gross) <= U256::from(1));
        prop_assert!(abs_diff(whole.net, split.net) <= U256::from(2));
        prop_assert!(whole.gross >= split.gross);
    }

    #[test]
    fn constant_segment_matches_closed_form(
        principal in 0u64..10_000_000,
        rate in 0u64..10_000_000_000_000_000_000,
        commission in 0u64..=1_000_000_000_000_000_000,
        duration in 0u64..100_000,
    ) {
        let mut store = CheckpointStore::new();
        store.append(SubjectKey::reward(1, TOKEN), 0, U256::from(rate)).unwrap();
        store.append(SubjectKey::commission(1), 0, U256::from(commission)).unwrap();

        let principal = U256::from(principal);
        let accrual = accrue_window(&store, principal, 0, duration);
        let exact = principal
            * U256::from(rate)
            * U256::from(duration)
            * (REWARD_PRECISION - U256::from(commission))
            / (REWARD_PRECISION * REWARD_PRECISION);
        prop_assert!(abs_diff(accrual.net, exact) <= U256::from(1));
        prop_assert_eq!(accrual.gross, accrual.commission + accrual.net);
    }

    #[test]
    fn accrual_grows_with_time(
        store in arb_store(),
        principal in 0u64..10_000_000,
        from in 0u64..2_000,
        len in 0u64..2_000,
        extra in 0u64..2_000,
    ) {
        let principal = U256::from(principal);
        let shorter = accrue_window(&store, principal, from, from + len);
        let longer = accrue_window(&store, principal, from, from + len + extra);
        prop_assert!(longer.net >= shorter.net);
        prop_assert!(longer.gross >= shorter.gross);
    }

    #[test]
    fn nothing_accrues_after_slash(
        slash_at in 1u64..1_000,
        later in 0u64..10_000,
        rate_change in 1u64..2_000,
    ) {
        let (mut engine, clock) = engine_at(0);
        engine.add_reward_token(TOKEN, per_unit(7), per_unit(1_000)).unwrap();
        engine.add_validator(1, pct(5), RECIPIENT).unwrap();
        engine.stake(ALICE, 1, U256::from(333)).unwrap();

        clock.set(slash_at);
        engine.slash_validator(1).unwrap();
        clock.set(slash_at + rate_change);
        engine.set_reward_rate(TOKEN, per_unit(900)).unwrap();
        clock.set(slash_at + rate_change + later);

        prop_assert_eq!(
            engine.compute_net_reward(ALICE, 1, TOKEN, slash_at + later),
            engine.compute_net_reward(ALICE, 1, TOKEN, slash_at)
        );
        prop_assert_eq!(
            engine.compute_net_reward(ALICE, 1, TOKEN, u64::MAX),
            engine.compute_net_reward(ALICE, 1, TOKEN, slash_at)
        );
    }

    #[test]
    fn second_settlement_pays_nothing(
        changes in prop::collection::vec((1u64..100, 0u64..1_000), 0..6),
        settle_gap in 0u64..100,
    ) {
        let (mut engine, clock) = engine_at(0);
        engine.add_reward_token(TOKEN, per_unit(10), per_unit(1_000)).unwrap();
        engine.add_validator(1, pct(20), RECIPIENT).unwrap();
        engine.stake(ALICE, 1, U256::from(1_000)).unwrap();
        for (gap, rate) in changes {
            clock.advance(gap);
            engine.set_reward_rate(TOKEN, per_unit(rate)).unwrap();
        }
        clock.advance(settle_gap);
        let at = clock_now(&engine);

        let (first, second) = block_on(async {
            let treasury = funded_treasury().await;
            let first = engine.settle(ALICE, 1, TOKEN, at, &treasury).await.unwrap();
            let second = engine.settle(ALICE, 1, TOKEN, at, &treasury).await.unwrap();
            (first, second)
        });
        prop_assert_eq!(second, U256::ZERO);
        // Per-segment truncation never pays more than the exact integral.
        let gross_paid = first + engine.accrued_commission(1, TOKEN);
        prop_assert!(gross_paid <= engine.gross_reward_between(1, TOKEN, U256::from(1_000), 0, at));
    }

    #[test]
    fn pruning_keeps_settled_positions_exact(
        changes in prop::collection::vec((1u64..100, 0u64..1_000), 1..8),
        settle_at in 0u64..400,
        prune_offset in 0u64..400,
        tail in 1u64..100,
    ) {
        let (mut engine, clock) = engine_at(0);
        engine.add_reward_token(TOKEN, per_unit(10), per_unit(1_000)).unwrap();
        engine.add_validator(1, pct(20), RECIPIENT).unwrap();
        engine.stake(ALICE, 1, U256::from(1_000)).unwrap();
        for (gap, rate) in changes {
            clock.advance(gap);
            engine.set_reward_rate(TOKEN, per_unit(rate)).unwrap();
        }
        let settle_at = settle_at.min(clock_now(&engine));
        block_on(async {
            let treasury = funded_treasury().await;
            engine.settle(ALICE, 1, TOKEN, settle_at, &treasury).await.unwrap();
        });
        clock.advance(tail);
        let end = clock_now(&engine);
        let before_prune = engine.compute_net_reward(ALICE, 1, TOKEN, end);

        let subject = SubjectKey::reward(1, TOKEN);
        let before = prune_offset;
        let outcome = engine.prune(subject, before);
        if before <= settle_at {
            prop_assert!(outcome.is_ok());
        } else {
            prop_assert!(outcome.is_err());
        }
        prop_assert!(engine.count(&subject) >= 1);
        prop_assert_eq!(engine.compute_net_reward(ALICE, 1, TOKEN, end), before_prune);
    }
}

fn clock_now(engine: &RewardsEngine) -> u64 {
    engine.now()
}
