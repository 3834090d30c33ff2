//! Thin CRUD and row-lock primitives over the timer table.

use crate::config::Config;
use crate::schema::Timer;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::info;

const COLUMNS: &str = "id, callable_module, callable_function, arguments, expires_at, duration, \
                       \"interval\", crontab, crontab_timezone, calls, max_calls, \
                       skip_if_offline, name, executing, inserted_at, updated_at";

const INSERT_COLUMNS: &str = "callable_module, callable_function, arguments, expires_at, \
                              duration, \"interval\", crontab, crontab_timezone, calls, \
                              max_calls, skip_if_offline, name, executing, inserted_at, \
                              updated_at";

// Scheduling under an existing name replaces the previous timer wholesale;
// only the id survives.
const REPLACE_ALL: &str = r#"
    ON CONFLICT (name) DO UPDATE SET
        callable_module = EXCLUDED.callable_module,
        callable_function = EXCLUDED.callable_function,
        arguments = EXCLUDED.arguments,
        expires_at = EXCLUDED.expires_at,
        duration = EXCLUDED.duration,
        "interval" = EXCLUDED."interval",
        crontab = EXCLUDED.crontab,
        crontab_timezone = EXCLUDED.crontab_timezone,
        calls = EXCLUDED.calls,
        max_calls = EXCLUDED.max_calls,
        skip_if_offline = EXCLUDED.skip_if_offline,
        executing = EXCLUDED.executing,
        inserted_at = EXCLUDED.inserted_at,
        updated_at = EXCLUDED.updated_at
"#;

/// Creates the timer table and its indexes if they do not exist yet.
pub async fn setup_database(pool: &PgPool, config: &Config) -> Result<(), sqlx::Error> {
    let table = config.table();

    let ddl = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            id BIGSERIAL PRIMARY KEY,
            callable_module TEXT NOT NULL,
            callable_function TEXT NOT NULL,
            arguments BYTEA NOT NULL,
            expires_at TIMESTAMPTZ NOT NULL,
            duration BIGINT,
            "interval" BIGINT,
            crontab TEXT,
            crontab_timezone TEXT,
            calls INTEGER NOT NULL DEFAULT 0,
            max_calls INTEGER,
            skip_if_offline BOOLEAN NOT NULL DEFAULT TRUE,
            name TEXT UNIQUE,
            executing BOOLEAN NOT NULL DEFAULT FALSE,
            inserted_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#
    );
    sqlx::query(&ddl).execute(pool).await?;

    let index = format!(
        "CREATE INDEX IF NOT EXISTS {table}_expires_at_idx ON {table} (expires_at ASC)"
    );
    sqlx::query(&index).execute(pool).await?;

    Ok(())
}

/// Inserts a draft row, replacing any existing timer with the same name.
pub(crate) async fn insert_timer(
    pool: &PgPool,
    config: &Config,
    timer: &Timer,
) -> Result<Timer, sqlx::Error> {
    let table = config.table();
    let sql = format!(
        "INSERT INTO {table} ({INSERT_COLUMNS}) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15) \
         {REPLACE_ALL} \
         RETURNING {COLUMNS}"
    );

    sqlx::query_as::<_, Timer>(&sql)
        .bind(&timer.callable_module)
        .bind(&timer.callable_function)
        .bind(&timer.arguments)
        .bind(timer.expires_at)
        .bind(timer.duration)
        .bind(timer.interval)
        .bind(&timer.crontab)
        .bind(&timer.crontab_timezone)
        .bind(timer.calls)
        .bind(timer.max_calls)
        .bind(timer.skip_if_offline)
        .bind(&timer.name)
        .bind(timer.executing)
        .bind(timer.inserted_at)
        .bind(timer.updated_at)
        .fetch_one(pool)
        .await
}

/// Bulk-inserts draft rows in a single round-trip, with the same
/// replace-by-name semantics as [`insert_timer`].
pub(crate) async fn insert_timers(
    pool: &PgPool,
    config: &Config,
    timers: &[Timer],
) -> Result<Vec<Timer>, sqlx::Error> {
    let table = config.table();
    let mut builder =
        QueryBuilder::<Postgres>::new(format!("INSERT INTO {table} ({INSERT_COLUMNS}) "));

    builder.push_values(timers, |mut row, timer| {
        row.push_bind(&timer.callable_module)
            .push_bind(&timer.callable_function)
            .push_bind(&timer.arguments)
            .push_bind(timer.expires_at)
            .push_bind(timer.duration)
            .push_bind(timer.interval)
            .push_bind(&timer.crontab)
            .push_bind(&timer.crontab_timezone)
            .push_bind(timer.calls)
            .push_bind(timer.max_calls)
            .push_bind(timer.skip_if_offline)
            .push_bind(&timer.name)
            .push_bind(timer.executing)
            .push_bind(timer.inserted_at)
            .push_bind(timer.updated_at);
    });
    builder.push(REPLACE_ALL);
    builder.push(format!(" RETURNING {COLUMNS}"));

    builder.build_query_as::<Timer>().fetch_all(pool).await
}

/// Atomically claims the earliest due timer: selects it under a row lock,
/// marks it as executing and returns the updated row.
///
/// Rows still flagged as executing past the orphan reclaim window are
/// presumed abandoned by a crashed worker and become claimable again.
pub(crate) async fn claim_next(
    pool: &PgPool,
    config: &Config,
) -> Result<Option<Timer>, sqlx::Error> {
    let table = config.table();
    let window_secs = i64::try_from(config.orphan_window().as_secs()).unwrap_or(i64::MAX);

    let mut tx = pool.begin().await?;

    let select = format!(
        "SELECT {COLUMNS} FROM {table} \
         WHERE expires_at < NOW() \
           AND (NOT executing OR expires_at < NOW() - INTERVAL '1 second' * $1) \
         ORDER BY expires_at ASC \
         LIMIT 1 \
         FOR UPDATE SKIP LOCKED"
    );
    let found = sqlx::query_as::<_, Timer>(&select)
        .bind(window_secs)
        .fetch_optional(&mut *tx)
        .await?;

    let Some(found) = found else {
        tx.rollback().await?;
        return Ok(None);
    };

    if found.executing {
        info!(timer.id = found.id, "Reclaiming orphaned timer lease");
    }

    let update = format!(
        "UPDATE {table} SET executing = TRUE, updated_at = NOW() \
         WHERE id = $1 \
         RETURNING {COLUMNS}"
    );
    let claimed = sqlx::query_as::<_, Timer>(&update)
        .bind(found.id)
        .fetch_optional(&mut *tx)
        .await?;

    let Some(claimed) = claimed else {
        // The locked row vanished under us; give up on this iteration.
        tx.rollback().await?;
        return Ok(None);
    };

    tx.commit().await?;
    Ok(Some(claimed))
}

/// Clears the lease and advances the row after a firing.
pub(crate) async fn finish_timer(
    pool: &PgPool,
    config: &Config,
    id: i64,
    next: DateTime<Utc>,
    calls: i32,
) -> Result<(), sqlx::Error> {
    let table = config.table();
    let sql = format!(
        "UPDATE {table} \
         SET expires_at = $2, executing = FALSE, calls = $3, updated_at = NOW() \
         WHERE id = $1"
    );
    sqlx::query(&sql)
        .bind(id)
        .bind(next)
        .bind(calls)
        .execute(pool)
        .await?;
    Ok(())
}

/// The earliest instant any claimable timer is due, if one exists.
pub(crate) async fn earliest_expiry(
    pool: &PgPool,
    config: &Config,
) -> Result<Option<DateTime<Utc>>, sqlx::Error> {
    let table = config.table();
    let window_secs = i64::try_from(config.orphan_window().as_secs()).unwrap_or(i64::MAX);

    let sql = format!(
        "SELECT expires_at FROM {table} \
         WHERE NOT executing OR expires_at < NOW() - INTERVAL '1 second' * $1 \
         ORDER BY expires_at ASC \
         LIMIT 1"
    );
    sqlx::query_scalar::<_, DateTime<Utc>>(&sql)
        .bind(window_secs)
        .fetch_optional(pool)
        .await
}

pub(crate) async fn delete_timer(
    pool: &PgPool,
    config: &Config,
    id: i64,
) -> Result<bool, sqlx::Error> {
    let table = config.table();
    let sql = format!("DELETE FROM {table} WHERE id = $1");
    let result = sqlx::query(&sql).bind(id).execute(pool).await?;
    Ok(result.rows_affected() > 0)
}

pub(crate) async fn delete_by_name(
    pool: &PgPool,
    config: &Config,
    name: &str,
) -> Result<bool, sqlx::Error> {
    let table = config.table();
    let sql = format!("DELETE FROM {table} WHERE name = $1");
    let result = sqlx::query(&sql).bind(name).execute(pool).await?;
    Ok(result.rows_affected() > 0)
}

pub(crate) async fn delete_by_callable(
    pool: &PgPool,
    config: &Config,
    module: &str,
    function: &str,
) -> Result<u64, sqlx::Error> {
    let table = config.table();
    let sql = format!("DELETE FROM {table} WHERE callable_module = $1 AND callable_function = $2");
    let result = sqlx::query(&sql)
        .bind(module)
        .bind(function)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

pub(crate) async fn id_exists(
    pool: &PgPool,
    config: &Config,
    id: i64,
) -> Result<bool, sqlx::Error> {
    let table = config.table();
    let sql = format!("SELECT EXISTS (SELECT 1 FROM {table} WHERE id = $1)");
    sqlx::query_scalar(&sql).bind(id).fetch_one(pool).await
}

pub(crate) async fn name_exists(
    pool: &PgPool,
    config: &Config,
    name: &str,
) -> Result<bool, sqlx::Error> {
    let table = config.table();
    let sql = format!("SELECT EXISTS (SELECT 1 FROM {table} WHERE name = $1)");
    sqlx::query_scalar(&sql).bind(name).fetch_one(pool).await
}

/// The number of persisted timers not currently mid-dispatch.
pub async fn pending_timer_count(pool: &PgPool, config: &Config) -> Result<i64, sqlx::Error> {
    let table = config.table();
    let sql = format!("SELECT COUNT(*) FROM {table} WHERE NOT executing");
    sqlx::query_scalar(&sql).fetch_one(pool).await
}
