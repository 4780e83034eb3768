//! Literal flow from Source B families to Source A records
//!
//! Matching is by family literal, not by `parent_id`: every Source A record
//! naming a family receives that family's higher classification, wherever it
//! sits in the tree.

use tracing::info;

use super::graft::FAMILY_ANCHORS_CTE;
use super::{sweep, taxa_plan};
use crate::config::Config;
use crate::db::{Database, Statement};
use crate::error::BridgeResult;
use crate::segments::{Segment, SegmentPlan};

pub(crate) fn flow_sql(segment: &Segment) -> String {
    format!(
        "WITH {FAMILY_ANCHORS_CTE} \
         UPDATE taxa c SET kingdom = a.kingdom, phylum = a.phylum, class = a.class, \
             \"order\" = a.\"order\" \
         FROM anchors a \
         WHERE c.source_a_id IS NOT NULL AND c.family = a.family \
             AND (c.kingdom, c.phylum, c.class, c.\"order\") \
                 IS DISTINCT FROM (a.kingdom, a.phylum, a.class, a.\"order\") \
             AND {segment}",
        segment = segment.sql_predicate("c.full_name", 1),
    )
}

/// Step: copy kingdom/phylum/class/order onto Source A records
pub async fn flow_literals(db: &mut Database, config: &Config) -> BridgeResult<u64> {
    let plan = taxa_plan(db, config).await?;
    flow_literals_with_plan(db, &plan).await
}

pub async fn flow_literals_with_plan(db: &mut Database, plan: &SegmentPlan) -> BridgeResult<u64> {
    let updated = sweep(db, plan, |segment| {
        Statement::new("flow family literals", flow_sql(segment)).bind_segment(segment)
    })
    .await?;

    info!(updated, "✓ Higher classification flowed to Source A");
    Ok(updated)
}
