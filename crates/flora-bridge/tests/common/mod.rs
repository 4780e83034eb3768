//! Common test utilities for Flora bridge integration tests using testcontainers
//!
//! Each test gets its own PostgreSQL container with the canonical schema
//! applied through the `reset-schema` step.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::TestPostgres;
//!
//! #[tokio::test]
//! #[ignore = "requires Docker"]
//! async fn test_with_postgres() {
//!     let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
//!     let mut db = pg.database().await.expect("Failed to connect");
//!     // Your test code here
//! }
//! ```

#![allow(dead_code)]

use anyhow::{Context, Result};
use sqlx::postgres::PgConnectOptions;
use sqlx::Row;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::NamedTempFile;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tracing::{debug, info};

use flora_bridge::config::Config;
use flora_bridge::db::{Database, RetryPolicy};
use flora_bridge::models::{TaxonRecord, TAXON_COLUMNS};
use flora_bridge::pipeline::{Orchestrator, StepId};

pub const SOURCE_A_HEADER: &str = "plant_name_id,taxon_rank,taxon_status,family,genus,species,\
    infraspecies,taxon_name,parent_plant_name_id,accepted_plant_name_id";

pub const SOURCE_B_HEADER: &str = "taxon_id,parent_name_usage_id,accepted_name_usage_id,\
    scientific_name,taxon_rank,taxonomic_status,kingdom,phylum,class,order,family,genus";

/// PostgreSQL test container wrapper
pub struct TestPostgres {
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

impl TestPostgres {
    /// Start a container and apply `schema.sql`
    pub async fn start() -> Result<Self> {
        info!("Starting PostgreSQL test container...");

        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let connection_string = format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);
        debug!("PostgreSQL connection: {}", connection_string);

        let pg = Self {
            container,
            connection_string,
        };

        let config = pg.config();
        let mut db = pg.database().await?;
        Orchestrator::new(&mut db, &config)
            .execute(StepId::ResetSchema)
            .await
            .context("Failed to apply schema")?;
        db.close().await?;

        Ok(pg)
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    /// Configuration pointing at this container and the crate's DDL assets
    pub fn config(&self) -> Config {
        let mut config = Config::default();
        config.database.url = Some(self.connection_string.clone());
        config.pipeline.sql_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("sql");
        config
    }

    pub fn connect_options(&self) -> Result<PgConnectOptions> {
        Ok(self.connection_string.parse()?)
    }

    /// A connected manager with a fast retry policy
    pub async fn database(&self) -> Result<Database> {
        let config = self.config();
        let db = Database::connect(self.connect_options()?, &config.database)
            .await
            .context("Failed to connect to PostgreSQL")?
            .with_retry_policy(RetryPolicy::new(2, Duration::from_millis(10)));
        Ok(db)
    }
}

/// Insert a taxa row from `(column, value)` pairs and return its id
pub async fn insert_taxon(db: &mut Database, fields: &[(&str, &str)]) -> Result<i64> {
    let columns = fields
        .iter()
        .map(|(column, _)| format!("\"{column}\""))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = (1..=fields.len())
        .map(|i| format!("${i}"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!("INSERT INTO taxa ({columns}) VALUES ({placeholders}) RETURNING id");

    let mut query = sqlx::query(&sql);
    for (_, value) in fields {
        query = query.bind(*value);
    }
    let row = query.fetch_one(db.connection().await?).await?;
    Ok(row.try_get("id")?)
}

/// Point `child` at `parent` directly
pub async fn set_parent(db: &mut Database, child: i64, parent: i64) -> Result<()> {
    sqlx::query("UPDATE taxa SET parent_id = $1 WHERE id = $2")
        .bind(parent)
        .bind(child)
        .execute(db.connection().await?)
        .await?;
    Ok(())
}

pub async fn fetch_taxon(db: &mut Database, id: i64) -> Result<TaxonRecord> {
    let sql = format!("SELECT {TAXON_COLUMNS} FROM taxa WHERE id = $1");
    Ok(sqlx::query_as::<_, TaxonRecord>(&sql)
        .bind(id)
        .fetch_one(db.connection().await?)
        .await?)
}

pub async fn fetch_by_name(db: &mut Database, full_name: &str, rank: &str) -> Result<TaxonRecord> {
    let sql = format!(
        "SELECT {TAXON_COLUMNS} FROM taxa WHERE full_name = $1 AND taxon_rank = $2 ORDER BY id LIMIT 1"
    );
    Ok(sqlx::query_as::<_, TaxonRecord>(&sql)
        .bind(full_name)
        .bind(rank)
        .fetch_one(db.connection().await?)
        .await?)
}

/// Whole table ordered by id, for before/after comparisons
pub async fn snapshot(db: &mut Database) -> Result<Vec<TaxonRecord>> {
    let sql = format!("SELECT {TAXON_COLUMNS} FROM taxa ORDER BY id");
    Ok(sqlx::query_as::<_, TaxonRecord>(&sql)
        .fetch_all(db.connection().await?)
        .await?)
}

/// Write a CSV fixture to a temp file
pub fn csv_file(header: &str, rows: &[&str]) -> Result<NamedTempFile> {
    let mut file = NamedTempFile::new()?;
    writeln!(file, "{header}")?;
    for row in rows {
        writeln!(file, "{row}")?;
    }
    file.flush()?;
    Ok(file)
}

/// Initialize tracing for tests
pub fn init_test_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,flora_bridge=debug,sqlx=warn,testcontainers=info")
        }))
        .with_test_writer()
        .try_init();
}
