//! Populate steps: staging rows become canonical `taxa` records
//!
//! Both steps are insert-or-ignore on the source's natural key, so a segment
//! that already landed is skipped on a re-run.

use tracing::info;

use super::{rank_sql, sources, status_sql, sweep, text_sql};
use crate::config::Config;
use crate::db::{Database, Statement};
use crate::error::BridgeResult;
use crate::models::{SourceKind, TaxonRank, CLASSIFICATION_LITERALS};
use crate::segments::{Segment, SegmentPlan};

/// Ranks whose parent is found by name literal rather than by id
const LITERAL_CHILD_RANKS: [TaxonRank; 6] = [
    TaxonRank::Genus,
    TaxonRank::Species,
    TaxonRank::Subspecies,
    TaxonRank::Variety,
    TaxonRank::Form,
    TaxonRank::Cultivar,
];

/// Name literal of the expected parent, built from the row's own literals
fn parent_key_expr(parent: TaxonRank) -> &'static str {
    match parent {
        TaxonRank::Family => "NULLIF(btrim(s.family), '')",
        TaxonRank::Genus => "NULLIF(btrim(s.genus), '')",
        _ => "CASE WHEN NULLIF(btrim(s.genus), '') IS NULL OR NULLIF(btrim(s.species), '') IS NULL \
              THEN NULL ELSE btrim(s.genus) || ' ' || btrim(s.species) END",
    }
}

/// `(parent_name_key, parent_rank)` CASE expressions keyed on the normalised rank
fn parent_columns_sql() -> (String, String) {
    let mut key = String::from("CASE r.rank");
    let mut rank = String::from("CASE r.rank");
    for child in &LITERAL_CHILD_RANKS {
        if let Some(parent) = child.literal_parent() {
            key.push_str(&format!(" WHEN '{}' THEN {}", child, parent_key_expr(parent)));
            rank.push_str(&format!(" WHEN '{child}' THEN '{parent}'"));
        }
    }
    key.push_str(" END");
    rank.push_str(" END");
    (key, rank)
}

pub(crate) fn populate_a_sql(segment: &Segment) -> String {
    let (parent_key, parent_rank) = parent_columns_sql();
    format!(
        "INSERT INTO taxa (source_a_id, source_a_accepted_id, source_a_parent_id, parent_name_key, \
             parent_rank, taxon_rank, taxon_status, full_name, family, genus, species, infraspecies, \
             source_id) \
         SELECT btrim(s.plant_name_id), {accepted}, {parent_id}, {parent_key}, {parent_rank}, \
             r.rank, {status}, btrim(s.taxon_name), {family}, {genus}, {species}, {infra}, $1 \
         FROM staging_source_a s \
         CROSS JOIN LATERAL (SELECT {rank} AS rank) r \
         WHERE {text_id} IS NOT NULL AND {text_name} IS NOT NULL AND {segment} \
         ON CONFLICT (source_a_id) DO NOTHING",
        accepted = text_sql("s.accepted_plant_name_id"),
        parent_id = text_sql("s.parent_plant_name_id"),
        status = status_sql("s.taxon_status"),
        family = text_sql("s.family"),
        genus = text_sql("s.genus"),
        species = text_sql("s.species"),
        infra = text_sql("s.infraspecies"),
        rank = rank_sql("s.taxon_rank"),
        text_id = text_sql("s.plant_name_id"),
        text_name = text_sql("s.taxon_name"),
        segment = segment.sql_predicate("s.taxon_name", 2),
    )
}

pub(crate) fn populate_b_sql(segment: &Segment) -> String {
    let literals = CLASSIFICATION_LITERALS
        .iter()
        .map(|(column, rank)| {
            format!("COALESCE(b.{column}, CASE WHEN b.rank = '{rank}' THEN b.full_name END)")
        })
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "INSERT INTO taxa (source_b_id, source_b_parent_id, source_b_accepted_id, taxon_rank, \
             taxon_status, full_name, kingdom, phylum, class, \"order\", family, genus, source_id) \
         SELECT DISTINCT ON (b.full_name, b.rank) \
             b.taxon_id, b.parent_id, b.accepted_id, b.rank, b.status, b.full_name, {literals}, b.genus, $1 \
         FROM ( \
             SELECT btrim(s.taxon_id) AS taxon_id, {parent} AS parent_id, {accepted} AS accepted_id, \
                 {rank} AS rank, {status} AS status, btrim(s.scientific_name) AS full_name, \
                 {kingdom} AS kingdom, {phylum} AS phylum, {class} AS class, {order} AS \"order\", \
                 {family} AS family, {genus} AS genus \
             FROM staging_source_b s \
             WHERE {text_id} IS NOT NULL AND {text_name} IS NOT NULL AND {segment} \
         ) b \
         ORDER BY b.full_name, b.rank, (b.status = 'Accepted') IS TRUE DESC, \
             length(b.taxon_id), b.taxon_id \
         ON CONFLICT (source_b_id) DO NOTHING",
        parent = text_sql("s.parent_name_usage_id"),
        accepted = text_sql("s.accepted_name_usage_id"),
        rank = rank_sql("s.taxon_rank"),
        status = status_sql("s.taxonomic_status"),
        kingdom = text_sql("s.kingdom"),
        phylum = text_sql("s.phylum"),
        class = text_sql("s.class"),
        order = text_sql("s.\"order\""),
        family = text_sql("s.family"),
        genus = text_sql("s.genus"),
        text_id = text_sql("s.taxon_id"),
        text_name = text_sql("s.scientific_name"),
        segment = segment.sql_predicate("s.scientific_name", 2),
    )
}

/// Insert staging rows for `kind` into `taxa`, one segment at a time
pub async fn populate(db: &mut Database, config: &Config, kind: SourceKind) -> BridgeResult<u64> {
    let data_source = sources::ensure_data_source(db, config.source(kind)).await?;
    let plan = SegmentPlan::for_strategy(
        config.pipeline.segmentation,
        db,
        kind.staging_table(),
        kind.staging_name_column(),
    )
    .await?;

    info!(source = %kind, segments = plan.len(), source_id = data_source.id, "Populating taxa");

    let label = format!("populate {kind}");
    let inserted = sweep(db, &plan, |segment| {
        let sql = match kind {
            SourceKind::A => populate_a_sql(segment),
            SourceKind::B => populate_b_sql(segment),
        };
        Statement::new(label.clone(), sql)
            .bind_int(data_source.id)
            .bind_segment(segment)
    })
    .await?;

    info!(source = %kind, inserted, "✓ Populate complete");
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_columns_cover_literal_ranks() {
        let (key, rank) = parent_columns_sql();
        assert!(key.contains("WHEN 'Genus' THEN NULLIF(btrim(s.family), '')"));
        assert!(key.contains("WHEN 'Species' THEN NULLIF(btrim(s.genus), '')"));
        assert!(key.contains("WHEN 'Variety' THEN CASE"));
        assert!(rank.contains("WHEN 'Cultivar' THEN 'Species'"));
        assert!(!rank.contains("WHEN 'Family'"));
    }

    #[test]
    fn test_populate_a_binds_source_then_segment() {
        let sql = populate_a_sql(&Segment::new("R", "R", Some("S")));
        assert!(sql.contains("$1 FROM staging_source_a"));
        assert!(sql.contains("NULLIF(btrim(s.parent_plant_name_id), '')"));
        assert!(sql.contains("s.taxon_name COLLATE \"C\" >= $2 AND s.taxon_name COLLATE \"C\" < $3"));
        assert!(sql.ends_with("ON CONFLICT (source_a_id) DO NOTHING"));
    }

    #[test]
    fn test_populate_b_prefers_accepted_and_fills_own_literal() {
        let sql = populate_b_sql(&Segment::new("Z", "Z", None));
        assert!(sql.contains("DISTINCT ON (b.full_name, b.rank)"));
        assert!(sql.contains("(b.status = 'Accepted') IS TRUE DESC"));
        assert!(sql.contains("COALESCE(b.family, CASE WHEN b.rank = 'Family' THEN b.full_name END)"));
        assert!(sql.contains("COALESCE(b.\"order\", CASE WHEN b.rank = 'Order' THEN b.full_name END)"));
        assert!(!sql.contains("$3"));
    }
}
