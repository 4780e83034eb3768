//! Bridging engine
//!
//! Each submodule implements one or two catalogue steps. Every step takes the
//! run's [`Database`] and [`Config`] explicitly and returns the number of rows
//! it changed. Steps whose cost grows with the table sweep the segment plan
//! one range at a time and only touch rows that are still unresolved, so any
//! step can be re-run after an interruption.

pub mod counts;
pub mod graft;
pub mod link;
pub mod literals;
pub mod paths;
pub mod populate;
pub mod schema;
pub mod sources;
pub mod stage;
pub mod status;
pub mod synonyms;

use tracing::debug;

use crate::config::Config;
use crate::db::{Database, Statement};
use crate::error::{BridgeError, BridgeResult};
use crate::models::TAXA_TABLE;
use crate::segments::{Segment, SegmentPlan};

/// Segment plan over the canonical table's names
pub(crate) async fn taxa_plan(db: &mut Database, config: &Config) -> BridgeResult<SegmentPlan> {
    SegmentPlan::for_strategy(config.pipeline.segmentation, db, TAXA_TABLE, "full_name").await
}

/// Run one statement per segment, in plan order, returning the total rows changed
pub(crate) async fn sweep<F>(db: &mut Database, plan: &SegmentPlan, build: F) -> BridgeResult<u64>
where
    F: Fn(&Segment) -> Statement,
{
    let mut total = 0;
    for segment in plan {
        let statement = build(segment).for_segment(segment);
        let rows = db.execute(&statement).await?;
        debug!(statement = %statement.label, rows, "Segment done");
        total += rows;
    }
    Ok(total)
}

/// Pass counter for loops that repeat until nothing changes
#[derive(Debug)]
pub(crate) struct Convergence {
    operation: &'static str,
    max_passes: u32,
    passes: u32,
    changed: u64,
}

impl Convergence {
    pub(crate) fn new(operation: &'static str, max_passes: u32) -> Self {
        Self {
            operation,
            max_passes,
            passes: 0,
            changed: 0,
        }
    }

    /// Record a finished pass; `Ok(true)` means another pass is needed
    pub(crate) fn record(&mut self, changed: u64) -> BridgeResult<bool> {
        self.passes += 1;
        self.changed += changed;

        if changed == 0 {
            return Ok(false);
        }
        if self.passes >= self.max_passes {
            return Err(BridgeError::NotConverged {
                operation: self.operation,
                passes: self.passes,
            });
        }
        Ok(true)
    }

    pub(crate) fn passes(&self) -> u32 {
        self.passes
    }

    /// Rows changed across all passes
    pub(crate) fn total_changed(&self) -> u64 {
        self.changed
    }
}

/// Normalised rank expression: `Division` folds into `Phylum`, everything else
/// is title-cased (`SPECIES` → `Species`)
pub(crate) fn rank_sql(column: &str) -> String {
    format!(
        "CASE lower(btrim({column})) WHEN 'division' THEN 'Phylum' \
         ELSE initcap(lower(btrim({column}))) END"
    )
}

/// Normalised status expression: any synonym flavour becomes `Synonym`
pub(crate) fn status_sql(column: &str) -> String {
    format!(
        "CASE WHEN lower({column}) LIKE '%synonym%' THEN 'Synonym' \
         ELSE initcap(lower(btrim({column}))) END"
    )
}

/// Blank-to-NULL trimmed text
pub(crate) fn text_sql(column: &str) -> String {
    format!("NULLIF(btrim({column}), '')")
}
