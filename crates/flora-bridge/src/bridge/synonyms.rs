//! Synonym dereferencing
//!
//! A child attached to a `Synonym` parent moves to that synonym's accepted
//! counterpart and takes its family literal. Sweeps repeat until nothing moves,
//! which walks synonym chains one link per pass.

use tracing::info;

use super::{sweep, taxa_plan, Convergence};
use crate::config::Config;
use crate::db::{Database, Statement};
use crate::error::BridgeResult;
use crate::models::SourceKind;
use crate::segments::Segment;

/// `(accepted pointer on the synonym, natural key it points at)`
fn accepted_link(kind: SourceKind) -> (&'static str, &'static str) {
    match kind {
        SourceKind::A => ("source_a_accepted_id", "source_a_id"),
        SourceKind::B => ("source_b_accepted_id", "source_b_id"),
    }
}

pub(crate) fn dereference_sql(kind: SourceKind, segment: &Segment) -> String {
    let (pointer, key) = accepted_link(kind);
    format!(
        "WITH candidates AS ( \
             SELECT c.id AS child_id, a.id AS accepted_id, a.family \
             FROM taxa c \
             JOIN taxa p ON p.id = c.parent_id \
             JOIN taxa a ON a.{key} = p.{pointer} \
             WHERE p.taxon_status = 'Synonym' AND p.{pointer} IS NOT NULL \
                 AND a.id <> c.id AND a.id <> p.id AND {segment} \
         ) \
         UPDATE taxa t SET parent_id = candidates.accepted_id, \
             family = COALESCE(candidates.family, t.family) \
         FROM candidates WHERE t.id = candidates.child_id",
        segment = segment.sql_predicate("c.full_name", 1),
    )
}

/// Step: redirect children of synonyms until no child sits under a synonym
/// that has a usable accepted counterpart
pub async fn dereference_synonyms(db: &mut Database, config: &Config) -> BridgeResult<u64> {
    let plan = taxa_plan(db, config).await?;
    let mut convergence =
        Convergence::new("Synonym dereferencing", config.pipeline.max_propagation_passes);

    loop {
        let mut moved = 0;
        for kind in SourceKind::ALL {
            let label = format!("dereference {kind} synonyms");
            moved += sweep(db, &plan, |segment| {
                Statement::new(label.clone(), dereference_sql(kind, segment)).bind_segment(segment)
            })
            .await?;
        }
        info!(pass = convergence.passes() + 1, moved, "Synonym dereference pass");

        if !convergence.record(moved)? {
            break;
        }
    }

    info!(
        passes = convergence.passes(),
        moved = convergence.total_changed(),
        "✓ Synonyms dereferenced"
    );
    Ok(convergence.total_changed())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_b_redirect_follows_accepted_usage() {
        let sql = dereference_sql(SourceKind::B, &Segment::new("A", "", Some("B")));
        assert!(sql.contains("JOIN taxa a ON a.source_b_id = p.source_b_accepted_id"));
        assert!(sql.contains("p.taxon_status = 'Synonym'"));
        assert!(sql.contains("a.id <> c.id"));
    }

    #[test]
    fn test_source_a_redirect_follows_accepted_name() {
        let sql = dereference_sql(SourceKind::A, &Segment::new("Z", "Z", None));
        assert!(sql.contains("JOIN taxa a ON a.source_a_id = p.source_a_accepted_id"));
        assert!(sql.contains("family = COALESCE(candidates.family, t.family)"));
    }
}
