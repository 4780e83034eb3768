//! Staging import
//!
//! The staging tables are reloaded wholesale: truncate, then stream the
//! cleaned CSV through `COPY ... FROM STDIN`. Both happen in one retry unit.
//! The name index is built after the load so populate segments are range
//! scans instead of full staging scans.

use std::time::Instant;
use tracing::info;

use super::sources;
use crate::config::Config;
use crate::db::Database;
use crate::error::{BridgeError, BridgeResult};
use crate::models::SourceKind;

/// `COPY` statement loading the staging table for `kind`
pub fn copy_sql(kind: SourceKind) -> String {
    let columns = kind
        .expected_columns()
        .iter()
        .map(|column| format!("\"{column}\""))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "COPY {} ({columns}) FROM STDIN WITH (FORMAT csv, HEADER true)",
        kind.staging_table()
    )
}

/// Name index plus fresh statistics for the staging table of `kind`
pub fn staging_index_sql(kind: SourceKind) -> String {
    format!(
        "CREATE INDEX IF NOT EXISTS {table}_name_idx ON {table} ({column} COLLATE \"C\"); \
         ANALYZE {table};",
        table = kind.staging_table(),
        column = kind.staging_name_column(),
    )
}

/// Reload the staging table for `kind` from its cleaned file
pub async fn import(db: &mut Database, config: &Config, kind: SourceKind) -> BridgeResult<u64> {
    let source = config.source(kind);
    sources::validate_header(kind, &source.file)?;

    let data_source = sources::ensure_data_source(db, source).await?;
    info!(
        source = %kind,
        data_source_id = data_source.id,
        name = %data_source.name,
        version = %data_source.version,
        "Attribution record ready"
    );

    let started = Instant::now();
    let rows = db
        .truncate_and_copy(
            &format!("import {kind}"),
            kind.staging_table(),
            &copy_sql(kind),
            &source.file,
        )
        .await?;

    if rows == 0 {
        return Err(BridgeError::input(format!(
            "{} loaded no rows into {}",
            source.file.display(),
            kind.staging_table()
        )));
    }

    db.execute_script(
        &format!("index {kind} staging"),
        kind.staging_table(),
        &staging_index_sql(kind),
    )
    .await?;

    info!(
        source = %kind,
        table = kind.staging_table(),
        rows,
        duration_secs = started.elapsed().as_secs_f64(),
        "✓ Staging table loaded"
    );

    Ok(rows)
}
