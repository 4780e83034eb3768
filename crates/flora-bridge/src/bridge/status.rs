//! Read-only progress summary of the canonical table

use serde::Serialize;
use sqlx::FromRow;

use crate::db::{Database, Statement};
use crate::error::BridgeResult;

/// Row counts for one source
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct SourceStatus {
    pub source: String,
    pub total: i64,
    pub unresolved: i64,
    pub without_path: i64,
    pub synonym_parents: i64,
}

const STATUS_SQL: &str = "\
    SELECT CASE WHEN c.source_a_id IS NOT NULL THEN 'source-a' \
                WHEN c.source_b_id IS NOT NULL THEN 'source-b' \
                ELSE 'unattributed' END AS source, \
           count(*) AS total, \
           count(*) FILTER (WHERE c.parent_id IS NULL) AS unresolved, \
           count(*) FILTER (WHERE c.hierarchy_path IS NULL) AS without_path, \
           count(*) FILTER (WHERE p.taxon_status = 'Synonym') AS synonym_parents \
    FROM taxa c \
    LEFT JOIN taxa p ON p.id = c.parent_id \
    GROUP BY 1 \
    ORDER BY 1";

/// Summarize the canonical table per source
pub async fn report(db: &mut Database) -> BridgeResult<Vec<SourceStatus>> {
    db.fetch_all::<SourceStatus>(&Statement::new("status report", STATUS_SQL))
        .await
}

/// Rows currently in a staging table, or `None` if the table does not exist yet
pub async fn staging_rows(db: &mut Database, table: &'static str) -> BridgeResult<Option<i64>> {
    let exists: bool = db
        .fetch_scalar(
            &Statement::new("staging exists", "SELECT to_regclass($1) IS NOT NULL").bind_text(table),
        )
        .await?;
    if !exists {
        return Ok(None);
    }

    let rows: i64 = db
        .fetch_scalar(&Statement::new("staging rows", format!("SELECT count(*) FROM {table}")).on_table(table))
        .await?;
    Ok(Some(rows))
}
