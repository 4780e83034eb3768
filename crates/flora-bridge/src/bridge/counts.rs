//! Immediate child counts

use tracing::info;

use super::{sweep, taxa_plan};
use crate::config::Config;
use crate::db::{Database, Statement};
use crate::error::BridgeResult;
use crate::segments::{Segment, SegmentPlan};

/// Live count of rows pointing at each parent in the segment; unchanged
/// counts are not rewritten
pub(crate) fn counts_sql(segment: &Segment) -> String {
    format!(
        "WITH counted AS ( \
             SELECT p.id, k.children \
             FROM taxa p \
             CROSS JOIN LATERAL ( \
                 SELECT count(*)::int AS children FROM taxa c WHERE c.parent_id = p.id \
             ) k \
             WHERE {segment} \
         ) \
         UPDATE taxa t SET child_count = counted.children \
         FROM counted \
         WHERE t.id = counted.id AND t.child_count IS DISTINCT FROM counted.children",
        segment = segment.sql_predicate("p.full_name", 1),
    )
}

/// Step: recompute `child_count` for every row
pub async fn compute_counts(db: &mut Database, config: &Config) -> BridgeResult<u64> {
    let plan = taxa_plan(db, config).await?;
    compute_counts_with_plan(db, &plan).await
}

pub async fn compute_counts_with_plan(db: &mut Database, plan: &SegmentPlan) -> BridgeResult<u64> {
    let updated = sweep(db, plan, |segment| {
        Statement::new("compute child counts", counts_sql(segment)).bind_segment(segment)
    })
    .await?;

    info!(updated, "✓ Child counts computed");
    Ok(updated)
}
