mod engine;

pub use engine::Distribution;

use axum::{
    Json, Router, debug_handler,
    extract::{Path, Query, State},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use time::OffsetDateTime;

use crate::{AppError, AppResult, AppState, feeds::Feed};

/// One execution of the distribution engine. `num_profiles` is the
/// active-user count frozen at round start and doubles as the daily
/// send/receive cap while the round is computed.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Distributor {
    pub id: i64,
    pub num_profiles: i64,
    pub timestamp: i64,
}

pub async fn create_distributor(pool: &SqlitePool, num_profiles: i64) -> AppResult<Distributor> {
    let timestamp = OffsetDateTime::now_utc().unix_timestamp();
    let result = sqlx::query("INSERT INTO distributors (num_profiles,timestamp) VALUES (?,?)")
        .bind(num_profiles)
        .bind(timestamp)
        .execute(pool)
        .await?;

    Ok(Distributor {
        id: result.last_insert_rowid(),
        num_profiles,
        timestamp,
    })
}

pub async fn get_distributor(pool: &SqlitePool, id: i64) -> AppResult<Option<Distributor>> {
    let distributor = sqlx::query_as::<_, Distributor>(
        "SELECT id,num_profiles,timestamp FROM distributors WHERE id=?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(distributor)
}

pub async fn get_all_distributors(pool: &SqlitePool) -> AppResult<Vec<Distributor>> {
    let distributors = sqlx::query_as::<_, Distributor>(
        "SELECT id,num_profiles,timestamp FROM distributors ORDER BY id",
    )
    .fetch_all(pool)
    .await?;
    Ok(distributors)
}

pub async fn get_distributor_feeds(pool: &SqlitePool, id: i64) -> AppResult<Vec<Feed>> {
    let feeds = sqlx::query_as::<_, Feed>(
        "SELECT id,sender_id,receiver_id,distributor_id,seen FROM feeds WHERE distributor_id=?",
    )
    .bind(id)
    .fetch_all(pool)
    .await?;
    Ok(feeds)
}

/// Deletes the round and every feed it owns.
pub async fn delete_distributor(pool: &SqlitePool, id: i64) -> AppResult<bool> {
    if get_distributor(pool, id).await?.is_none() {
        return Ok(false);
    }

    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM feeds WHERE distributor_id=?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM distributors WHERE id=?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    Ok(true)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeenFilter {
    All,
    SeenOnly,
    UnseenOnly,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct DistributionRow {
    pub feed_id: i64,
    pub sender_id: i64,
    pub receiver_id: i64,
    pub distributor_id: i64,
    pub seen: bool,
}

/// Flat view of every feed, grouped by the round that created it.
pub async fn distribution_table(
    pool: &SqlitePool,
    filter: SeenFilter,
) -> AppResult<Vec<DistributionRow>> {
    let query = match filter {
        SeenFilter::All => {
            "SELECT id AS feed_id,sender_id,receiver_id,distributor_id,seen FROM feeds \
             ORDER BY distributor_id,id"
        }
        SeenFilter::SeenOnly => {
            "SELECT id AS feed_id,sender_id,receiver_id,distributor_id,seen FROM feeds \
             WHERE seen=1 ORDER BY distributor_id,id"
        }
        SeenFilter::UnseenOnly => {
            "SELECT id AS feed_id,sender_id,receiver_id,distributor_id,seen FROM feeds \
             WHERE seen=0 ORDER BY distributor_id,id"
        }
    };

    let rows = sqlx::query_as::<_, DistributionRow>(query)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/distribute", post(distribute_action))
        .route("/api/distribute/all", post(distribute_all_action))
        .route("/api/distribution", get(distribution_table_action))
        .route("/api/distributors", get(list_distributors_action))
        .route(
            "/api/distributors/{id}",
            get(get_distributor_action).delete(delete_distributor_action),
        )
        .route("/api/distributors/{id}/feeds", get(distributor_feeds_action))
}

#[debug_handler]
pub(crate) async fn distribute_action(
    State(distribution): State<Distribution>,
) -> AppResult<Json<serde_json::Value>> {
    let created = distribution.run_round().await?;
    Ok(Json(serde_json::json!({ "created": created })))
}

#[debug_handler]
pub(crate) async fn distribute_all_action(
    State(distribution): State<Distribution>,
) -> AppResult<Json<serde_json::Value>> {
    let rounds = distribution.run_all_rounds().await?;
    Ok(Json(serde_json::json!({ "rounds": rounds })))
}

#[derive(Debug, Deserialize)]
pub(crate) struct TableQuery {
    seen: Option<bool>,
}

#[debug_handler]
pub(crate) async fn distribution_table_action(
    State(db_pool): State<SqlitePool>,
    Query(TableQuery { seen }): Query<TableQuery>,
) -> AppResult<Json<Vec<DistributionRow>>> {
    let filter = match seen {
        None => SeenFilter::All,
        Some(true) => SeenFilter::SeenOnly,
        Some(false) => SeenFilter::UnseenOnly,
    };
    Ok(Json(distribution_table(&db_pool, filter).await?))
}

#[debug_handler]
pub(crate) async fn list_distributors_action(
    State(db_pool): State<SqlitePool>,
) -> AppResult<Json<Vec<Distributor>>> {
    Ok(Json(get_all_distributors(&db_pool).await?))
}

#[debug_handler]
pub(crate) async fn get_distributor_action(
    State(db_pool): State<SqlitePool>,
    Path(id): Path<i64>,
) -> AppResult<Json<Distributor>> {
    match get_distributor(&db_pool, id).await? {
        Some(distributor) => Ok(Json(distributor)),
        None => Err(AppError::NotFound("distributor")),
    }
}

#[debug_handler]
pub(crate) async fn distributor_feeds_action(
    State(db_pool): State<SqlitePool>,
    Path(id): Path<i64>,
) -> AppResult<Json<Vec<Feed>>> {
    if get_distributor(&db_pool, id).await?.is_none() {
        return Err(AppError::NotFound("distributor"));
    }
    Ok(Json(get_distributor_feeds(&db_pool, id).await?))
}

#[debug_handler]
pub(crate) async fn delete_distributor_action(
    State(db_pool): State<SqlitePool>,
    Path(id): Path<i64>,
) -> AppResult<Json<serde_json::Value>> {
    if delete_distributor(&db_pool, id).await? {
        Ok(Json(serde_json::json!({ "message": "Distributor deleted" })))
    } else {
        Err(AppError::NotFound("distributor"))
    }
}
