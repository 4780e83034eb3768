//! DDL assets
//!
//! Schema and index files live in the configured SQL directory and are applied
//! verbatim. All of them are written to be idempotent.

use std::path::PathBuf;
use tracing::info;

use crate::config::Config;
use crate::db::Database;
use crate::error::{BridgeError, BridgeResult};
use crate::models::TAXA_TABLE;

/// A DDL file applied by one of the schema steps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DdlAsset {
    Schema,
    StructuralIndexes,
    ProductionIndexes,
}

impl DdlAsset {
    pub fn file_name(self) -> &'static str {
        match self {
            DdlAsset::Schema => "schema.sql",
            DdlAsset::StructuralIndexes => "structural_indexes.sql",
            DdlAsset::ProductionIndexes => "production_indexes.sql",
        }
    }

    pub fn path(self, config: &Config) -> PathBuf {
        config.pipeline.sql_dir.join(self.file_name())
    }
}

/// Read an asset from disk; a missing or blank file is an input error
pub fn load(config: &Config, asset: DdlAsset) -> BridgeResult<String> {
    let path = asset.path(config);
    let sql = std::fs::read_to_string(&path)
        .map_err(|e| BridgeError::input(format!("cannot read {}: {e}", path.display())))?;

    if sql.trim().is_empty() {
        return Err(BridgeError::input(format!("{} is empty", path.display())));
    }
    Ok(sql)
}

/// Apply an asset through the retry manager
pub async fn apply(db: &mut Database, config: &Config, asset: DdlAsset) -> BridgeResult<u64> {
    let sql = load(config, asset)?;
    db.execute_script(asset.file_name(), TAXA_TABLE, &sql).await?;
    info!(file = asset.file_name(), "✓ DDL applied");
    Ok(0)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn config_with_dir(dir: PathBuf) -> Config {
        let mut config = Config::default();
        config.pipeline.sql_dir = dir;
        config
    }

    #[test]
    fn test_bundled_assets_load() {
        let config = config_with_dir(PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("sql"));
        for asset in [DdlAsset::Schema, DdlAsset::StructuralIndexes, DdlAsset::ProductionIndexes] {
            let sql = load(&config, asset).unwrap();
            assert!(sql.contains("IF NOT EXISTS"), "{} is not idempotent", asset.file_name());
        }
    }

    #[test]
    fn test_schema_never_drops_tables() {
        let config = config_with_dir(PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("sql"));
        let sql = load(&config, DdlAsset::Schema).unwrap().to_uppercase();
        assert!(!sql.contains("DROP TABLE"));
        assert!(!sql.contains("TRUNCATE "));
    }

    #[test]
    fn test_missing_asset_is_input_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with_dir(dir.path().to_path_buf());
        assert!(matches!(load(&config, DdlAsset::Schema), Err(BridgeError::Input(_))));
    }
}
