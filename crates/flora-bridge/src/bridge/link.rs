//! Parent resolution within each source
//!
//! Source A links by name literal (`parent_name_key` + `parent_rank`), Source B
//! by id (`source_b_parent_id`). Only rows with `parent_id IS NULL` are
//! considered, which makes every segment resumable.
//!
//! A checklist row whose literal parent is a family attaches to the backbone's
//! family anchor when one exists, so the checklist's own family record and the
//! backbone's never end up stacked in one chain. Checklist rows whose literal
//! parent cannot be derived fall back to `parent_plant_name_id`.

use tracing::info;

use super::graft::FAMILY_ANCHORS_CTE;
use super::{sweep, taxa_plan, Convergence};
use crate::config::Config;
use crate::db::{Database, Statement};
use crate::error::BridgeResult;
use crate::models::{TaxonRank, CLASSIFICATION_LITERALS};
use crate::segments::{Segment, SegmentPlan};

/// How Source B literal propagation treats values a row already carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    /// Fill blanks only; values loaded from the source are kept
    Fill,
    /// Re-derive inherited literals from the current parent edge, overwriting
    /// stale values left behind by re-parenting
    Rederive,
}

pub(crate) fn link_a_to_anchor_sql(segment: &Segment) -> String {
    format!(
        "WITH {FAMILY_ANCHORS_CTE}, \
         candidates AS ( \
             SELECT c.id AS child_id, a.id AS anchor_id, a.family \
             FROM taxa c \
             JOIN anchors a ON a.family = c.parent_name_key \
             WHERE c.source_a_id IS NOT NULL AND c.parent_id IS NULL \
                 AND c.parent_rank = '{family}' AND a.id <> c.id AND {segment} \
         ) \
         UPDATE taxa t SET parent_id = candidates.anchor_id, family = candidates.family \
         FROM candidates WHERE t.id = candidates.child_id",
        family = TaxonRank::Family,
        segment = segment.sql_predicate("c.full_name", 1),
    )
}

pub(crate) fn link_a_sql(segment: &Segment) -> String {
    format!(
        "WITH candidates AS ( \
             SELECT DISTINCT ON (c.id) c.id AS child_id, p.id AS parent_id \
             FROM taxa c \
             JOIN taxa p ON p.full_name = c.parent_name_key \
                 AND p.taxon_rank = c.parent_rank \
                 AND p.source_a_id IS NOT NULL \
                 AND p.id <> c.id \
             WHERE c.source_a_id IS NOT NULL AND c.parent_id IS NULL \
                 AND c.parent_name_key IS NOT NULL AND {segment} \
             ORDER BY c.id, (p.taxon_status = 'Accepted') IS TRUE DESC, p.id \
         ) \
         UPDATE taxa t SET parent_id = candidates.parent_id \
         FROM candidates WHERE t.id = candidates.child_id",
        segment = segment.sql_predicate("c.full_name", 1),
    )
}

/// Id adjacency for checklist rows without a derivable literal parent
pub(crate) fn link_a_by_id_sql(segment: &Segment) -> String {
    format!(
        "UPDATE taxa c SET parent_id = p.id \
         FROM taxa p \
         WHERE p.source_a_id = c.source_a_parent_id \
             AND p.id <> c.id \
             AND c.source_a_id IS NOT NULL AND c.parent_id IS NULL \
             AND c.parent_name_key IS NULL AND c.source_a_parent_id IS NOT NULL AND {segment}",
        segment = segment.sql_predicate("c.full_name", 1),
    )
}

pub(crate) fn resolve_b_sql(segment: &Segment) -> String {
    format!(
        "UPDATE taxa c SET parent_id = p.id \
         FROM taxa p \
         WHERE p.source_b_id = c.source_b_parent_id \
             AND p.id <> c.id \
             AND c.source_b_id IS NOT NULL AND c.parent_id IS NULL \
             AND c.source_b_parent_id IS NOT NULL AND {segment}",
        segment = segment.sql_predicate("c.full_name", 1),
    )
}

/// Literal propagation from resolved parent to child within Source B
///
/// `Fill` never overwrites, so each pass can only shrink the number of blanks.
/// `Rederive` copies every literal the parent knows, except the column holding
/// the child's own rank name; values settle one level per pass from the roots
/// down.
pub(crate) fn propagate_b_sql(segment: &Segment, mode: Propagation) -> String {
    let (assignments, changed): (Vec<_>, Vec<_>) = CLASSIFICATION_LITERALS
        .iter()
        .map(|(column, rank)| match mode {
            Propagation::Fill => (
                format!("{column} = COALESCE(c.{column}, p.{column})"),
                format!("(c.{column} IS NULL AND p.{column} IS NOT NULL)"),
            ),
            Propagation::Rederive => (
                format!(
                    "{column} = CASE WHEN c.taxon_rank IS DISTINCT FROM '{rank}' \
                     THEN COALESCE(p.{column}, c.{column}) ELSE c.{column} END"
                ),
                format!(
                    "(c.taxon_rank IS DISTINCT FROM '{rank}' AND p.{column} IS NOT NULL \
                     AND c.{column} IS DISTINCT FROM p.{column})"
                ),
            ),
        })
        .unzip();

    format!(
        "UPDATE taxa c SET {assignments} \
         FROM taxa p \
         WHERE p.id = c.parent_id \
             AND c.source_b_id IS NOT NULL AND p.source_b_id IS NOT NULL \
             AND ({changed}) AND {segment}",
        assignments = assignments.join(", "),
        changed = changed.join(" OR "),
        segment = segment.sql_predicate("c.full_name", 1),
    )
}

/// Step: link Source A rows to family anchors, literal parents, then parent ids
pub async fn link_a_parents(db: &mut Database, config: &Config) -> BridgeResult<u64> {
    let plan = taxa_plan(db, config).await?;

    let anchored = sweep(db, &plan, |segment| {
        Statement::new("link source-a to family anchors", link_a_to_anchor_sql(segment))
            .bind_segment(segment)
    })
    .await?;
    let by_name = sweep(db, &plan, |segment| {
        Statement::new("link source-a parents", link_a_sql(segment)).bind_segment(segment)
    })
    .await?;
    let by_id = sweep(db, &plan, |segment| {
        Statement::new("link source-a parents by id", link_a_by_id_sql(segment))
            .bind_segment(segment)
    })
    .await?;

    info!(anchored, by_name, by_id, "✓ Source A parents linked");
    Ok(anchored + by_name + by_id)
}

/// Step: resolve Source B parents by id, then propagate literals to convergence
pub async fn resolve_b_hierarchy(db: &mut Database, config: &Config) -> BridgeResult<u64> {
    let plan = taxa_plan(db, config).await?;
    let resolved = sweep(db, &plan, |segment| {
        Statement::new("resolve source-b parents", resolve_b_sql(segment)).bind_segment(segment)
    })
    .await?;
    info!(resolved, "✓ Source B parents resolved");

    let filled = propagate_b_literals(db, config, &plan, Propagation::Fill).await?;
    Ok(resolved + filled)
}

/// Repeat literal propagation sweeps until one changes nothing
pub async fn propagate_b_literals(
    db: &mut Database,
    config: &Config,
    plan: &SegmentPlan,
    mode: Propagation,
) -> BridgeResult<u64> {
    let mut convergence = Convergence::new(
        "Source B literal propagation",
        config.pipeline.max_propagation_passes,
    );

    loop {
        let changed = sweep(db, plan, |segment| {
            Statement::new("propagate source-b literals", propagate_b_sql(segment, mode))
                .bind_segment(segment)
        })
        .await?;
        info!(pass = convergence.passes() + 1, ?mode, changed, "Literal propagation pass");

        if !convergence.record(changed)? {
            break;
        }
    }

    info!(
        passes = convergence.passes(),
        ?mode,
        changed = convergence.total_changed(),
        "✓ Source B literals converged"
    );
    Ok(convergence.total_changed())
}
