//! Clash client comparison
//!
//! Signs in, then runs the scenario through both clients and prints the
//! timing and parity summary.

use std::sync::Arc;

use anyhow::{Context, Result};
use clash_client::StaticToken;
use clash_comparison::{acquire_token, AuthConfig, ComparisonConfig, ScenarioRunner};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    let config = ComparisonConfig::from_env().context("loading comparison settings")?;
    let auth = AuthConfig::from_env().context("loading sign-in settings")?;
    info!(
        itwin_id = %config.itwin_id,
        imodel_id = %config.imodel_id,
        policy = ?config.policy,
        call_rc = config.call_rc,
        call_wsg = config.call_wsg,
        "Starting clash client comparison"
    );

    let token = acquire_token(&auth).await.context("signing in")?;
    let mut runner = ScenarioRunner::new(config, Arc::new(StaticToken::new(token)))
        .context("building clients")?;

    let report = runner.run().await;
    report.print_summary();

    let mismatches = report.mismatches();
    if !mismatches.is_empty() {
        info!(steps = ?mismatches, "Outputs differed");
    }
    Ok(())
}
