//! Repair/reconciliation pass
//!
//! Runs independently of the step catalogue against an already-bridged table:
//! re-derives Source B literals from the current parent edges (overwriting
//! values made stale by re-parenting), flows them to Source A, and recomputes
//! child counts. Every statement runs under the stall watchdog.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Instant;
use tracing::info;

use crate::bridge::link::{self, Propagation};
use crate::bridge::{counts, literals, taxa_plan};
use crate::config::Config;
use crate::db::Database;
use crate::error::BridgeResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RepairMode {
    /// Literal re-derivation, literal flow, then counts
    Full,
    /// Child counts only
    CountsOnly,
}

impl fmt::Display for RepairMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepairMode::Full => write!(f, "full"),
            RepairMode::CountsOnly => write!(f, "counts-only"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RepairReport {
    pub mode: RepairMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub literals_propagated: u64,
    pub literals_flowed: u64,
    pub counts_updated: u64,
}

/// Run the repair pass; the watchdog is forced on for its duration
pub async fn run(db: &mut Database, config: &Config, mode: RepairMode) -> BridgeResult<RepairReport> {
    let previous = db.watchdog_threshold();
    db.set_watchdog(Some(config.database.stall_threshold()));

    let result = repair(db, config, mode).await;

    db.set_watchdog(previous);
    result
}

async fn repair(db: &mut Database, config: &Config, mode: RepairMode) -> BridgeResult<RepairReport> {
    let started_at = Utc::now();
    let started = Instant::now();
    info!(%mode, stall_threshold_secs = config.database.stall_threshold_secs, "Starting repair");

    let plan = taxa_plan(db, config).await?;
    let (literals_propagated, literals_flowed) = match mode {
        RepairMode::Full => {
            let propagated =
                link::propagate_b_literals(db, config, &plan, Propagation::Rederive).await?;
            let flowed = literals::flow_literals_with_plan(db, &plan).await?;
            (propagated, flowed)
        },
        RepairMode::CountsOnly => (0, 0),
    };
    let counts_updated = counts::compute_counts_with_plan(db, &plan).await?;

    info!(
        %mode,
        literals_propagated,
        literals_flowed,
        counts_updated,
        duration_secs = started.elapsed().as_secs_f64(),
        "✓ Repair complete"
    );

    Ok(RepairReport {
        mode,
        started_at,
        finished_at: Utc::now(),
        literals_propagated,
        literals_flowed,
        counts_updated,
    })
}
