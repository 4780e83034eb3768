//! Cross-source grafting
//!
//! Source A rows still without a parent after literal linking are attached to
//! the Source B `Family` record sharing their family literal. The two sources
//! have no common key; the family name is the only bridge.

use tracing::info;

use super::{sweep, taxa_plan};
use crate::config::Config;
use crate::db::{Database, Statement};
use crate::error::BridgeResult;
use crate::segments::Segment;

/// One Source B `Family` record per family literal, Accepted first, then lowest id
pub(crate) const FAMILY_ANCHORS_CTE: &str = "anchors AS ( \
         SELECT DISTINCT ON (family) id, family, kingdom, phylum, class, \"order\" \
         FROM taxa \
         WHERE source_b_id IS NOT NULL AND taxon_rank = 'Family' AND family IS NOT NULL \
         ORDER BY family, (taxon_status = 'Accepted') IS TRUE DESC, id \
     )";

pub(crate) fn graft_sql(segment: &Segment) -> String {
    format!(
        "WITH {FAMILY_ANCHORS_CTE}, \
         candidates AS ( \
             SELECT c.id AS child_id, a.id AS anchor_id, a.family \
             FROM taxa c \
             JOIN anchors a ON a.family = c.family \
             WHERE c.source_a_id IS NOT NULL AND c.parent_id IS NULL \
                 AND a.id <> c.id AND {segment} \
         ) \
         UPDATE taxa t SET parent_id = candidates.anchor_id, family = candidates.family \
         FROM candidates WHERE t.id = candidates.child_id",
        segment = segment.sql_predicate("c.full_name", 1),
    )
}

/// Step: attach unresolved Source A roots to Source B families
pub async fn graft_roots(db: &mut Database, config: &Config) -> BridgeResult<u64> {
    let plan = taxa_plan(db, config).await?;
    let grafted = sweep(db, &plan, |segment| {
        Statement::new("graft source-a roots", graft_sql(segment)).bind_segment(segment)
    })
    .await?;

    info!(grafted, "✓ Source A roots grafted onto Source B families");
    Ok(grafted)
}
