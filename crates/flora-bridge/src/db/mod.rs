//! Connection/retry manager
//!
//! The pipeline is strictly sequential, so it owns exactly one connection. The
//! [`Database`] is created at run start, passed `&mut` into every step, and
//! closed by the caller on every exit path. The connection is checked before
//! use and re-established on demand; every mutating operation goes through a
//! bounded retry loop that throws the cached connection away between attempts.

pub mod retry;
pub mod watchdog;

use sqlx::postgres::{PgArguments, PgConnectOptions, PgRow};
use sqlx::query::{Query, QueryAs, QueryScalar};
use sqlx::{Connection, FromRow, PgConnection, Postgres};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::{debug, error, info, warn};

use crate::config::DatabaseSettings;
use crate::error::{BridgeError, BridgeResult};
use crate::models::TAXA_TABLE;
use crate::segments::Segment;

pub use retry::RetryPolicy;

const APPLICATION_NAME: &str = "flora-bridge";
const COPY_CHUNK_SIZE: usize = 256 * 1024;

/// A bind parameter for a [`Statement`]
#[derive(Debug, Clone, PartialEq)]
pub enum Bind {
    Text(Option<String>),
    Int(i32),
    SmallInt(i16),
    BigInt(i64),
}

/// SQL text plus ordered bind parameters
///
/// The label names the statement in logs; the target table is what the
/// watchdog inspects when the statement stalls.
#[derive(Debug, Clone)]
pub struct Statement {
    pub label: String,
    pub sql: String,
    pub binds: Vec<Bind>,
    pub target: &'static str,
}

macro_rules! bind_all {
    ($query:expr, $binds:expr) => {{
        let mut query = $query;
        for bind in $binds {
            query = match bind {
                Bind::Text(value) => query.bind(value.as_deref()),
                Bind::Int(value) => query.bind(*value),
                Bind::SmallInt(value) => query.bind(*value),
                Bind::BigInt(value) => query.bind(*value),
            };
        }
        query
    }};
}

impl Statement {
    pub fn new(label: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            sql: sql.into(),
            binds: Vec::new(),
            target: TAXA_TABLE,
        }
    }

    pub fn on_table(mut self, table: &'static str) -> Self {
        self.target = table;
        self
    }

    pub fn bind_text(mut self, value: impl Into<String>) -> Self {
        self.binds.push(Bind::Text(Some(value.into())));
        self
    }

    pub fn bind_opt_text(mut self, value: Option<String>) -> Self {
        self.binds.push(Bind::Text(value));
        self
    }

    pub fn bind_int(mut self, value: i32) -> Self {
        self.binds.push(Bind::Int(value));
        self
    }

    pub fn bind_small_int(mut self, value: i16) -> Self {
        self.binds.push(Bind::SmallInt(value));
        self
    }

    pub fn bind_big_int(mut self, value: i64) -> Self {
        self.binds.push(Bind::BigInt(value));
        self
    }

    /// Bind the bounds used by [`Segment::sql_predicate`]
    ///
    /// Unbounded segments bind only their start.
    pub fn bind_segment(self, segment: &Segment) -> Self {
        let statement = self.bind_text(segment.start.clone());
        match &segment.end {
            Some(end) => statement.bind_text(end.clone()),
            None => statement,
        }
    }

    /// Label extended with the segment name, for per-segment logging
    pub fn for_segment(mut self, segment: &Segment) -> Self {
        self.label = format!("{} [{}]", self.label, segment.name);
        self
    }

    fn query(&self) -> Query<'_, Postgres, PgArguments> {
        bind_all!(sqlx::query(&self.sql), &self.binds)
    }

    fn query_as<T>(&self) -> QueryAs<'_, Postgres, T, PgArguments>
    where
        T: for<'r> FromRow<'r, PgRow>,
    {
        bind_all!(sqlx::query_as::<_, T>(&self.sql), &self.binds)
    }

    fn query_scalar<T>(&self) -> QueryScalar<'_, Postgres, T, PgArguments>
    where
        (T,): for<'r> FromRow<'r, PgRow>,
    {
        bind_all!(sqlx::query_scalar::<_, T>(&self.sql), &self.binds)
    }
}

/// One unit of retryable work
enum Operation<'a> {
    Statement(&'a Statement),
    /// Multi-statement DDL script applied verbatim
    Script { sql: &'a str, target: &'static str },
    /// Truncate `table`, then stream `path` through `copy_sql`
    Copy {
        table: &'static str,
        copy_sql: &'a str,
        path: &'a Path,
    },
}

impl Operation<'_> {
    fn target(&self) -> &'static str {
        match self {
            Operation::Statement(statement) => statement.target,
            Operation::Script { target, .. } => *target,
            Operation::Copy { table, .. } => *table,
        }
    }
}

struct Session {
    conn: PgConnection,
    backend_pid: i32,
}

/// The process-wide connection handle, constructed explicitly per run
pub struct Database {
    options: PgConnectOptions,
    connect_timeout: Duration,
    retry: RetryPolicy,
    watchdog: Option<Duration>,
    session: Option<Session>,
}

impl Database {
    /// Create a manager without connecting yet
    pub fn new(options: PgConnectOptions, settings: &DatabaseSettings) -> Self {
        Self {
            options: options.application_name(APPLICATION_NAME),
            connect_timeout: settings.connect_timeout(),
            retry: RetryPolicy::from(settings),
            watchdog: None,
            session: None,
        }
    }

    /// Create a manager and establish the first connection eagerly
    pub async fn connect(options: PgConnectOptions, settings: &DatabaseSettings) -> BridgeResult<Self> {
        let mut db = Self::new(options, settings);
        db.session().await?;
        Ok(db)
    }

    /// Enable the stall watchdog for every operation
    pub fn with_watchdog(mut self, threshold: Duration) -> Self {
        self.watchdog = Some(threshold);
        self
    }

    /// Turn the stall watchdog on or off for subsequent operations
    pub fn set_watchdog(&mut self, threshold: Option<Duration>) {
        self.watchdog = threshold;
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn watchdog_threshold(&self) -> Option<Duration> {
        self.watchdog
    }

    /// A live connection, checked with a trivial round-trip first
    pub async fn connection(&mut self) -> BridgeResult<&mut PgConnection> {
        Ok(&mut self.session().await?.conn)
    }

    /// Backend pid of the current session, if connected
    pub fn backend_pid(&self) -> Option<i32> {
        self.session.as_ref().map(|s| s.backend_pid)
    }

    async fn session(&mut self) -> Result<&mut Session, sqlx::Error> {
        let cached = match self.session.take() {
            Some(mut session) => {
                match sqlx::query("SELECT 1").execute(&mut session.conn).await {
                    Ok(_) => Some(session),
                    Err(e) => {
                        warn!(error = %e, "Connection check failed; reconnecting");
                        None
                    },
                }
            },
            None => None,
        };

        let session = match cached {
            Some(session) => session,
            None => self.open().await?,
        };

        Ok(self.session.insert(session))
    }

    async fn open(&self) -> Result<Session, sqlx::Error> {
        let mut conn = tokio::time::timeout(self.connect_timeout, PgConnection::connect_with(&self.options))
            .await
            .map_err(|_| {
                sqlx::Error::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "timed out connecting to the database",
                ))
            })??;

        // Long bounded statements are expected; stalls are diagnosed, not killed.
        sqlx::query("SET statement_timeout = 0").execute(&mut conn).await?;
        let backend_pid: i32 = sqlx::query_scalar("SELECT pg_backend_pid()")
            .fetch_one(&mut conn)
            .await?;

        info!(backend_pid, "Database connection established");
        Ok(Session { conn, backend_pid })
    }

    /// Drop the cached connection; the next call reconnects
    pub fn discard(&mut self) {
        if self.session.take().is_some() {
            debug!("Discarded cached connection");
        }
    }

    /// Run a mutating statement with retries, returning rows affected
    pub async fn execute(&mut self, statement: &Statement) -> BridgeResult<u64> {
        self.run(&statement.label, Operation::Statement(statement)).await
    }

    /// Apply a multi-statement DDL script verbatim, with retries; `target` is
    /// the table the watchdog inspects
    pub async fn execute_script(
        &mut self,
        label: &str,
        target: &'static str,
        sql: &str,
    ) -> BridgeResult<()> {
        self.run(label, Operation::Script { sql, target })
            .await
            .map(|_| ())
    }

    /// Truncate `table` and stream a CSV file into it with `COPY ... FROM STDIN`
    ///
    /// The truncate and the copy form one retry unit, so a failed attempt never
    /// leaves half a file behind for the next one to append to.
    pub async fn truncate_and_copy(
        &mut self,
        label: &str,
        table: &'static str,
        copy_sql: &str,
        path: &Path,
    ) -> BridgeResult<u64> {
        self.run(
            label,
            Operation::Copy {
                table,
                copy_sql,
                path,
            },
        )
        .await
    }

    /// Read rows (reconnecting on demand, no retry)
    pub async fn fetch_all<T>(&mut self, statement: &Statement) -> BridgeResult<Vec<T>>
    where
        T: for<'r> FromRow<'r, PgRow> + Send + Unpin,
    {
        let session = self.session().await?;
        Ok(statement.query_as::<T>().fetch_all(&mut session.conn).await?)
    }

    pub async fn fetch_optional<T>(&mut self, statement: &Statement) -> BridgeResult<Option<T>>
    where
        T: for<'r> FromRow<'r, PgRow> + Send + Unpin,
    {
        let session = self.session().await?;
        Ok(statement.query_as::<T>().fetch_optional(&mut session.conn).await?)
    }

    pub async fn fetch_scalar<T>(&mut self, statement: &Statement) -> BridgeResult<T>
    where
        (T,): for<'r> FromRow<'r, PgRow>,
        T: Send + Unpin,
    {
        let session = self.session().await?;
        Ok(statement.query_scalar::<T>().fetch_one(&mut session.conn).await?)
    }

    /// Close the connection cleanly
    pub async fn close(mut self) -> BridgeResult<()> {
        if let Some(session) = self.session.take() {
            session.conn.close().await?;
            info!("Database connection closed");
        }
        Ok(())
    }

    async fn run(&mut self, label: &str, operation: Operation<'_>) -> BridgeResult<u64> {
        let mut attempt = 1;
        loop {
            match self.attempt(label, &operation).await {
                Ok(rows) => {
                    debug!(statement = label, rows, attempt, "Statement completed");
                    return Ok(rows);
                },
                Err(e) => {
                    self.discard();
                    if !self.retry.allows_retry(attempt) {
                        error!(statement = label, attempt, error = %e, "Statement failed; giving up");
                        return Err(BridgeError::StatementFailed {
                            label: label.to_string(),
                            attempts: attempt,
                            source: e,
                        });
                    }

                    let delay = self.retry.delay_after(attempt);
                    warn!(
                        statement = label,
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        delay_secs = delay.as_secs(),
                        error = %e,
                        "Statement failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                },
            }
        }
    }

    async fn attempt(&mut self, label: &str, operation: &Operation<'_>) -> Result<u64, sqlx::Error> {
        let options = self.options.clone();
        let watchdog = self.watchdog;
        let target = operation.target();

        let session = self.session().await?;
        let own_pid = Some(session.backend_pid);
        let work = perform(&mut session.conn, operation);

        match watchdog {
            Some(threshold) => {
                watchdog::watch(work, threshold, |elapsed| {
                    watchdog::report_stall(&options, target, own_pid, label, elapsed)
                })
                .await
            },
            None => work.await,
        }
    }
}

async fn perform(conn: &mut PgConnection, operation: &Operation<'_>) -> Result<u64, sqlx::Error> {
    match operation {
        Operation::Statement(statement) => {
            Ok(statement.query().execute(&mut *conn).await?.rows_affected())
        },
        Operation::Script { sql, .. } => {
            Ok(sqlx::raw_sql(sql).execute(&mut *conn).await?.rows_affected())
        },
        Operation::Copy {
            table,
            copy_sql,
            path,
        } => {
            sqlx::query(&format!("TRUNCATE {table}"))
                .execute(&mut *conn)
                .await?;
            copy_file(conn, copy_sql, path).await
        },
    }
}

async fn copy_file(conn: &mut PgConnection, copy_sql: &str, path: &Path) -> Result<u64, sqlx::Error> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut copy = conn.copy_in_raw(copy_sql).await?;
    let mut buffer = vec![0u8; COPY_CHUNK_SIZE];
    let mut sent = 0u64;

    loop {
        let read = match file.read(&mut buffer).await {
            Ok(read) => read,
            Err(e) => {
                // abort() reports the failure to the server and ends the COPY
                let _ = copy.abort(e.to_string()).await;
                return Err(sqlx::Error::Io(e));
            },
        };
        if read == 0 {
            break;
        }
        copy.send(&buffer[..read]).await?;
        sent += read as u64;
    }

    let rows = copy.finish().await?;
    debug!(path = %path.display(), bytes = sent, rows, "COPY finished");
    Ok(rows)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_builder_collects_binds() {
        let segment = Segment::new("z", "Z", None);
        let statement = Statement::new("link", "UPDATE taxa SET parent_id = NULL")
            .bind_int(1)
            .bind_segment(&segment)
            .for_segment(&segment);

        assert_eq!(statement.label, "link [z]");
        assert_eq!(
            statement.binds,
            vec![Bind::Int(1), Bind::Text(Some("Z".into()))]
        );
        assert_eq!(statement.target, TAXA_TABLE);

        let bounded = Segment::new("b", "B", Some("C"));
        let statement = Statement::new("populate", "SELECT 1").bind_segment(&bounded);
        assert_eq!(
            statement.binds,
            vec![Bind::Text(Some("B".into())), Bind::Text(Some("C".into()))]
        );
    }

    #[test]
    fn test_manager_is_lazy() {
        let settings = crate::config::Config::default().database;
        let options = "postgresql://nowhere.invalid/flora".parse().unwrap();
        let db = Database::new(options, &settings).with_watchdog(Duration::from_secs(20));
        assert!(db.backend_pid().is_none());
        assert_eq!(db.watchdog_threshold(), Some(Duration::from_secs(20)));
    }
}
