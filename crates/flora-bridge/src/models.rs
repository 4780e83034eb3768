//! Canonical taxon model and the two authority sources
//!
//! Rank strings are stored in their normalised spelling (see
//! [`TaxonRank::as_str`]); the SQL used by the populate steps produces exactly
//! these spellings, and statuses fold every synonym flavour into `Synonym`.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Name of the canonical table read by the serving application
pub const TAXA_TABLE: &str = "taxa";

/// The two independently produced authority datasets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    /// Nomenclatural checklist (literal adjacency)
    A,
    /// Taxonomic backbone (id adjacency)
    B,
}

impl SourceKind {
    pub const ALL: [SourceKind; 2] = [SourceKind::A, SourceKind::B];

    pub fn staging_table(self) -> &'static str {
        match self {
            SourceKind::A => "staging_source_a",
            SourceKind::B => "staging_source_b",
        }
    }

    /// Name column of the staging table, used for segmenting populate steps
    pub fn staging_name_column(self) -> &'static str {
        match self {
            SourceKind::A => "taxon_name",
            SourceKind::B => "scientific_name",
        }
    }

    /// Column list the cleaned file must carry, in order
    pub fn expected_columns(self) -> &'static [&'static str] {
        match self {
            SourceKind::A => &[
                "plant_name_id",
                "taxon_rank",
                "taxon_status",
                "family",
                "genus",
                "species",
                "infraspecies",
                "taxon_name",
                "parent_plant_name_id",
                "accepted_plant_name_id",
            ],
            SourceKind::B => &[
                "taxon_id",
                "parent_name_usage_id",
                "accepted_name_usage_id",
                "scientific_name",
                "taxon_rank",
                "taxonomic_status",
                "kingdom",
                "phylum",
                "class",
                "order",
                "family",
                "genus",
            ],
        }
    }

    pub(crate) fn env_suffix(self) -> &'static str {
        match self {
            SourceKind::A => "A",
            SourceKind::B => "B",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "source-{}", self.env_suffix().to_lowercase())
    }
}

/// Taxonomic rank, in the normalised spelling the populate steps store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaxonRank {
    Kingdom,
    Phylum,
    Class,
    Order,
    Family,
    Genus,
    Species,
    Subspecies,
    Variety,
    Form,
    Cultivar,
}

impl TaxonRank {
    pub fn as_str(self) -> &'static str {
        match self {
            TaxonRank::Kingdom => "Kingdom",
            TaxonRank::Phylum => "Phylum",
            TaxonRank::Class => "Class",
            TaxonRank::Order => "Order",
            TaxonRank::Family => "Family",
            TaxonRank::Genus => "Genus",
            TaxonRank::Species => "Species",
            TaxonRank::Subspecies => "Subspecies",
            TaxonRank::Variety => "Variety",
            TaxonRank::Form => "Form",
            TaxonRank::Cultivar => "Cultivar",
        }
    }

    /// Rank of the literal parent inside the checklist source
    pub fn literal_parent(self) -> Option<TaxonRank> {
        match self {
            TaxonRank::Genus => Some(TaxonRank::Family),
            TaxonRank::Species => Some(TaxonRank::Genus),
            TaxonRank::Subspecies | TaxonRank::Variety | TaxonRank::Form | TaxonRank::Cultivar => {
                Some(TaxonRank::Species)
            },
            _ => None,
        }
    }
}

impl std::fmt::Display for TaxonRank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Higher-classification literal columns, each paired with the rank whose
/// own name the column holds
pub const CLASSIFICATION_LITERALS: [(&str, TaxonRank); 5] = [
    ("kingdom", TaxonRank::Kingdom),
    ("phylum", TaxonRank::Phylum),
    ("class", TaxonRank::Class),
    ("\"order\"", TaxonRank::Order),
    ("family", TaxonRank::Family),
];

/// One row of the canonical `taxa` table
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct TaxonRecord {
    pub id: i64,
    pub parent_id: Option<i64>,
    pub source_a_id: Option<String>,
    pub source_a_accepted_id: Option<String>,
    pub source_a_parent_id: Option<String>,
    pub source_b_id: Option<String>,
    pub source_b_parent_id: Option<String>,
    pub source_b_accepted_id: Option<String>,
    pub parent_name_key: Option<String>,
    pub parent_rank: Option<String>,
    pub taxon_rank: Option<String>,
    pub taxon_status: Option<String>,
    pub full_name: String,
    pub family: Option<String>,
    pub genus: Option<String>,
    pub species: Option<String>,
    pub infraspecies: Option<String>,
    pub kingdom: Option<String>,
    pub phylum: Option<String>,
    pub class: Option<String>,
    pub order: Option<String>,
    pub source_id: Option<i32>,
    pub hierarchy_path: Option<String>,
    pub child_count: i32,
}

impl TaxonRecord {
    /// Ancestor ids parsed from `hierarchy_path`, root first, self last
    pub fn path_ids(&self) -> Vec<i64> {
        self.hierarchy_path
            .as_deref()
            .map(|path| path.split('.').filter_map(|id| id.parse().ok()).collect())
            .unwrap_or_default()
    }

    /// Number of ancestors on the path; roots have depth 0
    pub fn depth(&self) -> usize {
        self.path_ids().len().saturating_sub(1)
    }
}

/// Attribution record, one per source and version
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct DataSource {
    pub id: i32,
    pub name: String,
    pub version: String,
    pub trust_level: i16,
}

/// Select list matching [`TaxonRecord`]'s fields
pub const TAXON_COLUMNS: &str = "id, parent_id, source_a_id, source_a_accepted_id, source_a_parent_id, source_b_id, \
     source_b_parent_id, source_b_accepted_id, parent_name_key, parent_rank, taxon_rank, \
     taxon_status, full_name, family, genus, species, infraspecies, kingdom, phylum, class, \
     \"order\", source_id, hierarchy_path, child_count";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_parent_ranks() {
        assert_eq!(TaxonRank::Species.literal_parent(), Some(TaxonRank::Genus));
        assert_eq!(TaxonRank::Variety.literal_parent(), Some(TaxonRank::Species));
        assert_eq!(TaxonRank::Genus.literal_parent(), Some(TaxonRank::Family));
        assert_eq!(TaxonRank::Family.literal_parent(), None);
    }

    #[test]
    fn test_classification_literals_name_their_own_rank() {
        let family = CLASSIFICATION_LITERALS
            .iter()
            .find(|(column, _)| *column == "family")
            .map(|(_, rank)| *rank);
        assert_eq!(family, Some(TaxonRank::Family));
        assert_eq!(CLASSIFICATION_LITERALS[3].0, "\"order\"");
    }

    #[test]
    fn test_path_depth() {
        let record = TaxonRecord {
            id: 23,
            parent_id: Some(5),
            source_a_id: None,
            source_a_accepted_id: None,
            source_a_parent_id: None,
            source_b_id: None,
            source_b_parent_id: None,
            source_b_accepted_id: None,
            parent_name_key: None,
            parent_rank: None,
            taxon_rank: Some("Species".into()),
            taxon_status: Some("Accepted".into()),
            full_name: "Rosa canina".into(),
            family: Some("Rosaceae".into()),
            genus: Some("Rosa".into()),
            species: Some("canina".into()),
            infraspecies: None,
            kingdom: None,
            phylum: None,
            class: None,
            order: None,
            source_id: Some(1),
            hierarchy_path: Some("1.5.23".into()),
            child_count: 0,
        };
        assert_eq!(record.path_ids(), vec![1, 5, 23]);
        assert_eq!(record.depth(), 2);

        let root = TaxonRecord {
            hierarchy_path: Some("1".into()),
            parent_id: None,
            ..record.clone()
        };
        assert_eq!(root.depth(), 0);

        let unpathed = TaxonRecord {
            hierarchy_path: None,
            ..record
        };
        assert_eq!(unpathed.depth(), 0);
    }

    #[test]
    fn test_expected_columns_are_unique() {
        for kind in SourceKind::ALL {
            let mut columns = kind.expected_columns().to_vec();
            columns.sort_unstable();
            columns.dedup();
            assert_eq!(columns.len(), kind.expected_columns().len());
        }
    }
}
