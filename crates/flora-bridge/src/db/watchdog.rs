//! Stall watchdog
//!
//! A statement that is still running after the threshold triggers a lock
//! inspection on a separate short-lived connection. Sessions that block the
//! watched statement are reported apart from sessions merely holding a
//! compatible lock on the same table. The inspection only logs: the watched
//! statement keeps running and is never cancelled.

use sqlx::postgres::PgConnectOptions;
use sqlx::{Connection, FromRow, PgConnection};
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::BridgeResult;

const WATCHDOG_APPLICATION_NAME: &str = "flora-bridge-watchdog";

/// A session holding (or waiting for) a lock on the watched table
#[derive(Debug, Clone, FromRow)]
pub struct LockHolder {
    pub pid: i32,
    /// Listed by `pg_blocking_pids` for the watched session
    pub blocking: bool,
    pub state: String,
    pub mode: String,
    pub granted: bool,
    pub running_secs: f64,
    pub application_name: String,
    pub query: String,
}

const LOCK_HOLDERS_SQL: &str = r#"
    SELECT a.pid,
           a.pid = ANY(pg_blocking_pids($2)) AS blocking,
           COALESCE(a.state, 'unknown') AS state,
           l.mode,
           l.granted,
           COALESCE(EXTRACT(EPOCH FROM (now() - a.query_start)), 0)::float8 AS running_secs,
           COALESCE(a.application_name, '') AS application_name,
           left(COALESCE(a.query, ''), 200) AS query
    FROM pg_locks l
    JOIN pg_stat_activity a ON a.pid = l.pid
    WHERE l.relation = to_regclass($1)
      AND l.pid <> $2
    ORDER BY blocking DESC, running_secs DESC
"#;

/// Drive `operation` to completion, calling `on_stall` every `threshold` while
/// it is still pending. `on_stall` receives the time elapsed so far and runs
/// concurrently with the operation.
pub async fn watch<T, F, S, SF>(operation: F, threshold: Duration, mut on_stall: S) -> T
where
    F: Future<Output = T>,
    S: FnMut(Duration) -> SF,
    SF: Future<Output = ()>,
{
    let started = Instant::now();
    tokio::pin!(operation);

    let mut ticker = tokio::time::interval_at(started + threshold, threshold);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            output = &mut operation => return output,
            _ = ticker.tick() => {
                let diagnosis = on_stall(started.elapsed());
                tokio::pin!(diagnosis);
                loop {
                    tokio::select! {
                        biased;
                        output = &mut operation => return output,
                        _ = &mut diagnosis => break,
                    }
                }
            }
        }
    }
}

/// List other sessions with locks on `table`, excluding `own_pid`; holders
/// that block `own_pid` come first
pub async fn inspect_locks(
    options: &PgConnectOptions,
    table: &str,
    own_pid: Option<i32>,
) -> BridgeResult<Vec<LockHolder>> {
    let options = options.clone().application_name(WATCHDOG_APPLICATION_NAME);
    let mut conn = PgConnection::connect_with(&options).await?;
    let holders = sqlx::query_as::<_, LockHolder>(LOCK_HOLDERS_SQL)
        .bind(table)
        .bind(own_pid.unwrap_or(0))
        .fetch_all(&mut conn)
        .await?;
    conn.close().await?;
    Ok(holders)
}

/// Stall callback used by the connection manager
pub async fn report_stall(
    options: &PgConnectOptions,
    table: &str,
    own_pid: Option<i32>,
    label: &str,
    elapsed: Duration,
) {
    warn!(
        statement = label,
        table,
        elapsed_secs = elapsed.as_secs(),
        "Statement still running; inspecting locks"
    );

    match inspect_locks(options, table, own_pid).await {
        Ok(holders) => {
            if !holders.iter().any(|holder| holder.blocking) {
                info!(statement = label, table, "No other session blocks the statement");
            }
            for holder in &holders {
                if holder.blocking {
                    warn!(
                        statement = label,
                        pid = holder.pid,
                        state = %holder.state,
                        mode = %holder.mode,
                        granted = holder.granted,
                        running_secs = holder.running_secs,
                        application = %holder.application_name,
                        query = %holder.query,
                        "Blocking session on watched table"
                    );
                } else {
                    debug!(
                        statement = label,
                        pid = holder.pid,
                        mode = %holder.mode,
                        granted = holder.granted,
                        application = %holder.application_name,
                        "Compatible lock holder on watched table"
                    );
                }
            }
        },
        Err(e) => {
            warn!(statement = label, error = %e, "Lock inspection failed");
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_lock_query_flags_blockers_of_the_watched_session() {
        assert!(LOCK_HOLDERS_SQL.contains("a.pid = ANY(pg_blocking_pids($2)) AS blocking"));
        assert!(LOCK_HOLDERS_SQL.contains("l.pid <> $2"));
        assert!(LOCK_HOLDERS_SQL.contains("ORDER BY blocking DESC"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_operation_never_triggers_diagnosis() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = watch(
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "done"
            },
            Duration::from_secs(20),
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async {}
            },
        )
        .await;

        assert_eq!(result, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_operation_is_diagnosed_but_not_cancelled() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();

        let result = watch(
            async {
                tokio::time::sleep(Duration::from_secs(50)).await;
                42
            },
            Duration::from_secs(20),
            move |elapsed| {
                if let Ok(mut seen) = sink.lock() {
                    seen.push(elapsed.as_secs());
                }
                async {}
            },
        )
        .await;

        assert_eq!(result, 42);
        assert_eq!(*seen.lock().unwrap(), vec![20, 40]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_operation_finishing_during_diagnosis_returns_immediately() {
        let started = Instant::now();

        let result = watch(
            async {
                tokio::time::sleep(Duration::from_secs(25)).await;
                "finished"
            },
            Duration::from_secs(20),
            |_| tokio::time::sleep(Duration::from_secs(60)),
        )
        .await;

        assert_eq!(result, "finished");
        assert_eq!(started.elapsed().as_secs(), 25);
    }
}
