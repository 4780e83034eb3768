//! Cleaned input files and their attribution records

use flora_common::fingerprint::InputFingerprint;
use std::path::Path;
use tracing::info;

use crate::config::SourceConfig;
use crate::db::{Database, Statement};
use crate::error::{BridgeError, BridgeResult};
use crate::models::{DataSource, SourceKind};

/// Outcome of checking an input file before import
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedSource {
    pub kind: SourceKind,
    pub fingerprint: InputFingerprint,
    /// Data rows, header excluded
    pub rows: u64,
}

/// Validate and fingerprint the cleaned file for `kind`
///
/// The file must exist, match a pinned digest when one is configured, carry
/// exactly the expected header, and have at least one well-formed row.
pub fn prepare(kind: SourceKind, source: &SourceConfig) -> BridgeResult<PreparedSource> {
    let fingerprint = InputFingerprint::of_file(&source.file)?;
    if let Some(expected) = &source.expected_sha256 {
        fingerprint.verify(expected)?;
    }

    let rows = scan_rows(kind, &source.file)?;
    if rows == 0 {
        return Err(BridgeError::input(format!(
            "{} has a header but no rows",
            source.file.display()
        )));
    }

    info!(
        source = %kind,
        path = %source.file.display(),
        bytes = fingerprint.bytes,
        sha256 = %fingerprint.sha256,
        rows,
        "✓ Input file verified"
    );

    Ok(PreparedSource {
        kind,
        fingerprint,
        rows,
    })
}

/// Check the header row against the expected column list
pub fn validate_header(kind: SourceKind, path: &Path) -> BridgeResult<()> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_path(path)?;
    check_header(kind, reader.headers()?)
}

/// Check the header, then read every record; uneven rows are a csv error
fn scan_rows(kind: SourceKind, path: &Path) -> BridgeResult<u64> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_path(path)?;
    check_header(kind, reader.headers()?)?;

    let mut record = csv::ByteRecord::new();
    let mut rows = 0u64;
    while reader.read_byte_record(&mut record)? {
        rows += 1;
    }
    Ok(rows)
}

fn check_header(kind: SourceKind, header: &csv::StringRecord) -> BridgeResult<()> {
    let found: Vec<String> = header
        .iter()
        .map(|column| column.trim_start_matches('\u{feff}').trim().to_lowercase())
        .collect();
    let expected = kind.expected_columns();

    if found.iter().map(String::as_str).eq(expected.iter().copied()) {
        Ok(())
    } else {
        Err(BridgeError::input(format!(
            "{kind} header mismatch: expected [{}], found [{}]",
            expected.join(", "),
            found.join(", ")
        )))
    }
}

/// Upsert the attribution row for `source` and return it
pub async fn ensure_data_source(db: &mut Database, source: &SourceConfig) -> BridgeResult<DataSource> {
    db.execute(
        &Statement::new(
            "upsert data source",
            "INSERT INTO data_sources (name, version, trust_level) VALUES ($1, $2, $3) \
             ON CONFLICT (name, version) DO UPDATE SET trust_level = EXCLUDED.trust_level",
        )
        .on_table("data_sources")
        .bind_text(source.name.clone())
        .bind_text(source.version.clone())
        .bind_small_int(source.trust_level),
    )
    .await?;

    db.fetch_optional::<DataSource>(
        &Statement::new(
            "load data source",
            "SELECT id, name, version, trust_level FROM data_sources WHERE name = $1 AND version = $2",
        )
        .bind_text(source.name.clone())
        .bind_text(source.version.clone()),
    )
    .await?
    .ok_or_else(|| {
        BridgeError::input(format!(
            "data source '{} {}' vanished after upsert",
            source.name, source.version
        ))
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::NamedTempFile;

    const SOURCE_A_HEADER: &str = "plant_name_id,taxon_rank,taxon_status,family,genus,species,\
        infraspecies,taxon_name,parent_plant_name_id,accepted_plant_name_id";

    fn write_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    fn source_for(path: PathBuf) -> SourceConfig {
        SourceConfig {
            file: path,
            name: "Checklist".into(),
            version: "2024".into(),
            trust_level: 90,
            expected_sha256: None,
        }
    }

    #[test]
    fn test_prepare_counts_rows() {
        let file = write_file(&format!(
            "{SOURCE_A_HEADER}\n1,Family,Accepted,Rosaceae,,,,Rosaceae,,\n\
             2,Genus,Accepted,Rosaceae,Rosa,,,Rosa,1,\n"
        ));
        let prepared = prepare(SourceKind::A, &source_for(file.path().to_path_buf())).unwrap();
        assert_eq!(prepared.rows, 2);
        assert_eq!(prepared.fingerprint.sha256.len(), 64);
    }

    #[test]
    fn test_header_with_bom_and_case_is_accepted() {
        let file = write_file(&format!("\u{feff}{}\n", SOURCE_A_HEADER.to_uppercase()));
        validate_header(SourceKind::A, file.path()).unwrap();
    }

    #[test]
    fn test_wrong_header_rejected() {
        let file = write_file("taxon_id,scientific_name\n1,Rosa\n");
        let err = validate_header(SourceKind::B, file.path()).unwrap_err();
        assert!(matches!(err, BridgeError::Input(_)));
        assert!(err.to_string().contains("scientific_name"));
    }

    #[test]
    fn test_header_only_file_rejected() {
        let file = write_file(&format!("{SOURCE_A_HEADER}\n"));
        let err = prepare(SourceKind::A, &source_for(file.path().to_path_buf())).unwrap_err();
        assert!(err.to_string().contains("no rows"));
    }

    #[test]
    fn test_uneven_row_rejected() {
        let file = write_file(&format!("{SOURCE_A_HEADER}\n1,Family,Accepted\n"));
        let err = prepare(SourceKind::A, &source_for(file.path().to_path_buf())).unwrap_err();
        assert!(matches!(err, BridgeError::Csv(_)));
    }

    #[test]
    fn test_missing_file_rejected() {
        let err = prepare(SourceKind::B, &source_for(PathBuf::from("/nonexistent/b.csv"))).unwrap_err();
        assert!(matches!(err, BridgeError::InputFile(_)));
    }

    #[test]
    fn test_pinned_digest_must_match() {
        let file = write_file(&format!("{SOURCE_A_HEADER}\n1,Family,Accepted,Rosaceae,,,,Rosaceae,,\n"));
        let mut source = source_for(file.path().to_path_buf());
        source.expected_sha256 = Some("00".repeat(32));
        assert!(matches!(prepare(SourceKind::A, &source), Err(BridgeError::InputFile(_))));
    }
}
