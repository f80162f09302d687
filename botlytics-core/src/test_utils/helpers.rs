// File: botlytics-core/src/test_utils/helpers.rs

use chrono::Utc;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};

use botlytics_common::models::{Event, Properties, PropertyValue};
use crate::db::Database;
use crate::Error;

/// Connects to `TEST_DATABASE_URL`. Returns `Ok(None)` when the variable is
/// unset so Postgres-backed tests can skip on machines without a database.
pub async fn create_test_db_pool() -> Result<Option<Pool<Postgres>>, Error> {
    let url = match std::env::var("TEST_DATABASE_URL") {
        Ok(url) if !url.trim().is_empty() => url,
        _ => return Ok(None),
    };

    let pool = PgPoolOptions::new()
        .max_connections(8)
        .connect(&url)
        .await?;

    Ok(Some(pool))
}

/// Wipes out test data so each test can start fresh.
pub async fn clean_database(pool: &Pool<Postgres>) -> Result<(), Error> {
    sqlx::query("TRUNCATE TABLE analytics_events")
        .execute(pool)
        .await?;
    Ok(())
}

/// Returns a migrated, empty test DB handle, or `None` without `TEST_DATABASE_URL`.
pub async fn setup_test_database() -> Result<Option<Database>, Error> {
    let Some(pool) = create_test_db_pool().await? else {
        return Ok(None);
    };
    let db = Database::from_pool(pool);
    db.migrate().await?;
    clean_database(db.pool()).await?;
    Ok(Some(db))
}

/// Builds a property map from a JSON object literal.
pub fn props(value: Value) -> Properties {
    match value {
        Value::Object(map) => map
            .into_iter()
            .filter_map(|(k, v)| PropertyValue::try_from(v).ok().map(|pv| (k, pv)))
            .collect(),
        _ => Properties::new(),
    }
}

/// A normalized-looking event for `user` in session `s-<user>`, stamped now.
pub fn sample_event(event_type: &str, user: &str) -> Event {
    let mut properties = Properties::new();
    properties.insert("user_id".into(), PropertyValue::from(user));
    properties.insert("session_id".into(), PropertyValue::from(format!("s-{}", user)));
    Event {
        event_type: event_type.to_string(),
        properties,
        received_at: Utc::now(),
    }
}

/// Same as [`sample_event`] with a `source` property.
pub fn sourced_event(event_type: &str, user: &str, source: &str) -> Event {
    let mut evt = sample_event(event_type, user);
    evt.properties.insert("source".into(), PropertyValue::from(source));
    evt
}
