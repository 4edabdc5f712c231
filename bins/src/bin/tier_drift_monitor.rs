//! Fetches the live risk-limit tier table from Bybit and reports any field
//! that has drifted from the hardcoded fallback table beyond a threshold.
//! Meant to run on a schedule, independent of the trading core.
//!
//! Exit codes: 0 no drift, 1 configuration error, 2 drift found or fetch failed.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use rust_decimal::Decimal;

use gridval_bins::common::{exit_code_for, init_logging};
use gridval_core::config::RuntimeConfig;
use gridval_core::exchange::bybit::BybitAdapter;
use gridval_core::exchange::ExchangeAdapter;
use gridval_core::risk_limits::tiers::TierTable;
use gridval_core::risk_limits::drift;

#[derive(Parser, Debug)]
#[command(author, version, about = "Check live risk-limit tiers against the hardcoded fallback table")]
struct Cli {
    #[arg(long)]
    config: PathBuf,

    /// Relative change beyond which a tier field is reported.
    #[arg(long, default_value = "0.1")]
    threshold: Decimal,

    #[arg(long)]
    debug: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let config = match RuntimeConfig::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to load config");
            return ExitCode::from(exit_code_for(e.kind()) as u8);
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!(error = %e, "failed to start tokio runtime");
            return ExitCode::from(2);
        }
    };

    match runtime.block_on(check(&cli, &config)) {
        Ok(found_drift) => {
            if found_drift {
                ExitCode::from(2)
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "tier drift check failed");
            ExitCode::from(2)
        }
    }
}

async fn check(cli: &Cli, config: &RuntimeConfig) -> anyhow::Result<bool> {
    let adapter = BybitAdapter::new(
        config.exchange.symbol.clone(),
        config.exchange.ws_public_url.clone(),
        config.exchange.ws_private_url.clone(),
        config.exchange.rest_url.clone(),
        config.exchange.api_key.clone(),
        config.exchange.api_secret.clone(),
    );

    let rows = adapter.get_risk_limit(&config.exchange.symbol).await?;
    anyhow::ensure!(!rows.is_empty(), "exchange returned no risk-limit tiers for {}", config.exchange.symbol);

    let fetched = TierTable(
        rows.into_iter()
            .map(|r| gridval_core::risk_limits::tiers::RiskLimitTier {
                max_notional: r.max_notional,
                mmr_rate: r.mmr_rate,
                mm_deduction: r.mm_deduction,
                imr_rate: r.imr_rate,
            })
            .collect(),
    );

    let hardcoded = TierTable::hardcoded_btcusdt();
    let drifts = drift::compare(&hardcoded, &fetched, cli.threshold);

    if drifts.is_empty() {
        tracing::info!(symbol = %config.exchange.symbol, "no tier drift detected");
        return Ok(false);
    }

    for d in &drifts {
        tracing::warn!(
            tier = d.tier_index,
            field = d.field,
            hardcoded = %d.hardcoded,
            fetched = %d.fetched,
            relative_delta = %d.relative_delta,
            "risk-limit tier drift detected"
        );
    }
    Ok(true)
}
