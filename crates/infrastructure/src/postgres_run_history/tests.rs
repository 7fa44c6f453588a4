use chrono::{TimeDelta, Utc};
use runguard_application::{RunHistoryRepository, RunRegistration};
use runguard_core::AppError;
use runguard_domain::{
    RunId, RunRequestAttributes, RunStatus, ScopeDimension, ScopeKey, UNKNOWN_SCOPE_VALUE,
};
use sqlx::PgPool;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;

use super::PostgresRunHistory;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

async fn test_pool() -> Option<PgPool> {
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        return None;
    };

    let pool = match PgPoolOptions::new()
        .max_connections(2)
        .connect(database_url.as_str())
        .await
    {
        Ok(pool) => pool,
        Err(error) => panic!("failed to connect to DATABASE_URL in test: {error}"),
    };

    if let Err(error) = MIGRATOR.run(&pool).await {
        panic!("failed to run migrations for postgres run history tests: {error}");
    }

    Some(pool)
}

fn user_key(attributes: &RunRequestAttributes) -> ScopeKey {
    let dimensions = match ScopeDimension::new(ScopeDimension::REQUESTING_USER) {
        Ok(dimension) => vec![dimension],
        Err(error) => panic!("dimension should be valid: {error}"),
    };
    ScopeKey::from_dimensions(&dimensions, attributes)
}

fn registration(attributes: RunRequestAttributes) -> RunRegistration {
    RunRegistration {
        run_id: RunId::new(),
        attributes,
        started_at: Utc::now(),
    }
}

#[tokio::test]
async fn reserved_runs_are_queried_by_scope_until_completed() {
    let Some(pool) = test_pool().await else {
        return;
    };

    let repository = PostgresRunHistory::new(pool);
    let user = format!("user-{}", RunId::new());
    let attributes = RunRequestAttributes::new()
        .with(ScopeDimension::REQUESTING_USER, user.as_str())
        .with(ScopeDimension::PIPELINE_PATH, "/etl/daily");
    let key = user_key(&attributes);

    let first = registration(attributes.clone());
    let first_id = first.run_id;
    assert!(repository.reserve_run(first.clone()).await.is_ok());
    assert!(matches!(
        repository.reserve_run(first).await,
        Err(AppError::Conflict(_))
    ));

    assert!(repository.record_run_progress(first_id, 512).await.is_ok());
    let now = Utc::now();
    let runs = repository
        .query_runs(&key, now - TimeDelta::minutes(10), now + TimeDelta::seconds(1))
        .await;
    let Ok(runs) = runs else {
        panic!("query should succeed");
    };
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].attributes, attributes);
    assert_eq!(runs[0].bytes, Some(512));
    assert!(runs[0].is_running());

    assert!(repository.record_run_completion(first_id, 2048).await.is_ok());
    assert!(matches!(
        repository.record_run_progress(first_id, 4096).await,
        Err(AppError::Conflict(_))
    ));

    let later = Utc::now() + TimeDelta::hours(1);
    let runs = repository
        .query_runs(&key, later - TimeDelta::minutes(10), later)
        .await;
    assert!(matches!(runs, Ok(ref runs) if runs.is_empty()));
}

#[tokio::test]
async fn missing_attributes_match_the_unknown_bucket() {
    let Some(pool) = test_pool().await else {
        return;
    };

    let repository = PostgresRunHistory::new(pool);
    let path = format!("/pipelines/{}", RunId::new());
    let anonymous = RunRequestAttributes::new().with(ScopeDimension::PIPELINE_PATH, path.as_str());
    let blank = anonymous
        .clone()
        .with(ScopeDimension::REQUESTING_USER, "  ");

    let placeholder = anonymous
        .clone()
        .with(ScopeDimension::REQUESTING_USER, UNKNOWN_SCOPE_VALUE);

    assert!(repository.reserve_run(registration(anonymous.clone())).await.is_ok());
    assert!(repository.reserve_run(registration(blank)).await.is_ok());
    assert!(repository.reserve_run(registration(placeholder.clone())).await.is_ok());

    let dimensions = [
        ScopeDimension::REQUESTING_USER,
        ScopeDimension::PIPELINE_PATH,
    ]
    .into_iter()
    .map(ScopeDimension::new)
    .collect::<Result<Vec<_>, _>>();
    let Ok(dimensions) = dimensions else {
        panic!("dimensions should be valid");
    };
    let key = ScopeKey::from_dimensions(&dimensions, &anonymous);
    assert!(key.has_unknown());

    let now = Utc::now();
    let runs = repository
        .query_runs(&key, now - TimeDelta::minutes(1), now + TimeDelta::seconds(1))
        .await;
    assert!(matches!(runs, Ok(ref runs) if runs.len() == 3));

    // A request naming the placeholder itself lands in the same bucket.
    let placeholder_key = ScopeKey::from_dimensions(&dimensions, &placeholder);
    assert_eq!(placeholder_key, key);
    let runs = repository
        .query_runs(
            &placeholder_key,
            now - TimeDelta::minutes(1),
            now + TimeDelta::seconds(1),
        )
        .await;
    let Ok(runs) = runs else {
        panic!("query should succeed");
    };
    assert_eq!(runs.len(), 3);
    assert!(runs.iter().all(|run| run.is_running()));
}

#[tokio::test]
async fn release_is_idempotent_and_orphans_are_expired() {
    let Some(pool) = test_pool().await else {
        return;
    };

    let repository = PostgresRunHistory::new(pool.clone());
    let attributes = RunRequestAttributes::new()
        .with(ScopeDimension::REQUESTING_USER, format!("user-{}", RunId::new()));

    let released = registration(attributes.clone());
    let released_id = released.run_id;
    assert!(repository.reserve_run(released).await.is_ok());
    assert!(repository.release_run(released_id).await.is_ok());
    assert!(repository.release_run(released_id).await.is_ok());
    assert!(repository.release_run(RunId::new()).await.is_ok());

    let mut orphan = registration(attributes);
    orphan.started_at = Utc::now() - TimeDelta::days(3);
    let orphan_id = orphan.run_id;
    assert!(repository.reserve_run(orphan).await.is_ok());

    let expired = repository
        .expire_running_before(Utc::now() - TimeDelta::days(2))
        .await;
    assert!(matches!(expired, Ok(count) if count >= 1));

    let statuses = sqlx::query_scalar::<_, String>(
        r#"
        SELECT status
        FROM pipeline_runs
        WHERE run_id = ANY($1)
        ORDER BY started_at ASC
        "#,
    )
    .bind(vec![orphan_id.as_uuid(), released_id.as_uuid()])
    .fetch_all(&pool)
    .await;
    let Ok(statuses) = statuses else {
        panic!("status query should succeed");
    };
    assert_eq!(
        statuses,
        vec![
            RunStatus::Abandoned.as_str().to_owned(),
            RunStatus::Released.as_str().to_owned()
        ]
    );

    let removed = repository
        .cleanup_finished_before(Utc::now() + TimeDelta::seconds(1))
        .await;
    assert!(matches!(removed, Ok(count) if count >= 2));
}
