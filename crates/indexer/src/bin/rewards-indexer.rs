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

use std::path::PathBuf;

use alloy_primitives::U256;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use plume_rewards::EngineConfig;
use plume_rewards_indexer::rewards::{load_events, ReplayService, ReplayServiceConfig};

/// Arguments for the rewards indexer.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct RewardsIndexerArgs {
    /// Path to the JSON staking event log to replay.
    #[clap(long, env)]
    events: PathBuf,

    /// DB connection string.
    #[clap(long, env = "DATABASE_URL")]
    db: String,

    /// Maximum number of checkpoints a single rate series may hold.
    #[clap(long, env)]
    max_checkpoints: Option<usize>,

    /// Maximum validator commission rate, scaled by the reward precision.
    #[clap(long, env)]
    max_commission_rate: Option<U256>,

    /// Fixed-point scale of all rates (defaults to 1e18).
    #[clap(long, env)]
    reward_precision: Option<U256>,

    /// Print unsettled rewards for every position as of this timestamp after the replay.
    #[clap(long)]
    report_at: Option<u64>,

    /// Whether to log in JSON format.
    #[clap(long, env, default_value_t = false)]
    log_json: bool,
}

impl RewardsIndexerArgs {
    fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::default();
        if let Some(precision) = self.reward_precision {
            config.reward_precision = precision;
            config.max_commission_rate = precision;
        }
        if let Some(max) = self.max_checkpoints {
            config = config.with_max_checkpoints(max);
        }
        if let Some(max) = self.max_commission_rate {
            config = config.with_max_commission_rate(max);
        }
        config
    }
}

fn format_timestamp(timestamp: u64) -> String {
    i64::try_from(timestamp)
        .ok()
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| timestamp.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = RewardsIndexerArgs::parse();

    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
        .from_env_lossy();

    if args.log_json {
        tracing_subscriber::fmt().with_ansi(false).json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_ansi(false).with_env_filter(filter).init();
    }

    let events = load_events(&args.events)?;
    let config = ReplayServiceConfig { engine: args.engine_config() };
    let mut service = ReplayService::new(&args.db, config).await?;

    let summary = service.run(&events).await?;
    if let Some(last) = summary.last_timestamp {
        tracing::info!("Indexed events up to {}", format_timestamp(last));
    }

    if let Some(at) = args.report_at {
        tracing::info!("Reporting unsettled rewards as of {}", format_timestamp(at));
        let report = service.report(at);
        let json = serde_json::to_string_pretty(&report).context("Failed to serialize report")?;
        println!("{}", json);
    }

    Ok(())
}
