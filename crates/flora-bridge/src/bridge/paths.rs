//! Materialized hierarchy paths
//!
//! Paths are built breadth-first: roots first, then one tree level per pass,
//! each child taking `parent_path.child_id` once its parent has a path. A row
//! that already has a path is never rewritten. Rows on a parent cycle never
//! reach a root and keep a NULL path.

use tracing::info;

use super::{sweep, taxa_plan, Convergence};
use crate::config::Config;
use crate::db::{Database, Statement};
use crate::error::BridgeResult;
use crate::segments::Segment;

pub(crate) fn root_paths_sql(segment: &Segment) -> String {
    format!(
        "UPDATE taxa SET hierarchy_path = id::text \
         WHERE parent_id IS NULL AND hierarchy_path IS NULL AND {segment}",
        segment = segment.sql_predicate("full_name", 1),
    )
}

pub(crate) fn level_paths_sql(segment: &Segment) -> String {
    format!(
        "UPDATE taxa c SET hierarchy_path = p.hierarchy_path || '.' || c.id::text \
         FROM taxa p \
         WHERE p.id = c.parent_id \
             AND c.hierarchy_path IS NULL AND p.hierarchy_path IS NOT NULL \
             AND {segment}",
        segment = segment.sql_predicate("c.full_name", 1),
    )
}

/// Step: assign `hierarchy_path` to every row reachable from a root
pub async fn build_paths(db: &mut Database, config: &Config) -> BridgeResult<u64> {
    let plan = taxa_plan(db, config).await?;

    let roots = sweep(db, &plan, |segment| {
        Statement::new("root paths", root_paths_sql(segment)).bind_segment(segment)
    })
    .await?;
    info!(roots, "Level 1 paths assigned");

    let mut levels = Convergence::new("Hierarchy path levels", config.pipeline.max_propagation_passes);
    loop {
        let assigned = sweep(db, &plan, |segment| {
            Statement::new("level paths", level_paths_sql(segment)).bind_segment(segment)
        })
        .await?;
        info!(level = levels.passes() + 2, assigned, "Level paths assigned");

        if !levels.record(assigned)? {
            break;
        }
    }

    let total = roots + levels.total_changed();
    info!(total, depth = levels.passes(), "✓ Hierarchy paths built");
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roots_get_their_own_id() {
        let sql = root_paths_sql(&Segment::new("A", "", Some("B")));
        assert!(sql.starts_with("UPDATE taxa SET hierarchy_path = id::text"));
        assert!(sql.contains("parent_id IS NULL AND hierarchy_path IS NULL"));
    }

    #[test]
    fn test_children_extend_parent_path() {
        let sql = level_paths_sql(&Segment::new("Z", "Z", None));
        assert!(sql.contains("p.hierarchy_path || '.' || c.id::text"));
        assert!(sql.contains("c.hierarchy_path IS NULL AND p.hierarchy_path IS NOT NULL"));
    }
}
