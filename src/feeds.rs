use axum::{
    Json, Router, debug_handler,
    extract::{Path, State},
    routing::{get, post},
};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::{AppError, AppResult, AppState, users};

/// One directed sender-to-receiver profile assignment, owned by the
/// distribution round that created it.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Feed {
    pub id: i64,
    pub sender_id: i64,
    pub receiver_id: i64,
    pub distributor_id: i64,
    pub seen: bool,
}

pub async fn create_feed(
    pool: &SqlitePool,
    sender_id: i64,
    receiver_id: i64,
    distributor_id: i64,
) -> AppResult<Feed> {
    let result =
        sqlx::query("INSERT INTO feeds (sender_id,receiver_id,distributor_id,seen) VALUES (?,?,?,0)")
            .bind(sender_id)
            .bind(receiver_id)
            .bind(distributor_id)
            .execute(pool)
            .await?;

    Ok(Feed {
        id: result.last_insert_rowid(),
        sender_id,
        receiver_id,
        distributor_id,
        seen: false,
    })
}

pub async fn get_feed(pool: &SqlitePool, id: i64) -> AppResult<Option<Feed>> {
    let feed = sqlx::query_as::<_, Feed>(
        "SELECT id,sender_id,receiver_id,distributor_id,seen FROM feeds WHERE id=?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(feed)
}

pub async fn get_feeds_by_sender(pool: &SqlitePool, sender_id: i64) -> AppResult<Vec<Feed>> {
    let feeds = sqlx::query_as::<_, Feed>(
        "SELECT id,sender_id,receiver_id,distributor_id,seen FROM feeds WHERE sender_id=?",
    )
    .bind(sender_id)
    .fetch_all(pool)
    .await?;
    Ok(feeds)
}

pub async fn get_feeds_by_receiver(pool: &SqlitePool, receiver_id: i64) -> AppResult<Vec<Feed>> {
    let feeds = sqlx::query_as::<_, Feed>(
        "SELECT id,sender_id,receiver_id,distributor_id,seen FROM feeds WHERE receiver_id=?",
    )
    .bind(receiver_id)
    .fetch_all(pool)
    .await?;
    Ok(feeds)
}

/// Marks the feed seen. Idempotent, viewing an already seen feed is a
/// no-op. Absent for a missing id.
pub async fn view_feed(pool: &SqlitePool, id: i64) -> AppResult<Option<Feed>> {
    if get_feed(pool, id).await?.is_none() {
        return Ok(None);
    }
    sqlx::query("UPDATE feeds SET seen=1 WHERE id=?")
        .bind(id)
        .execute(pool)
        .await?;
    get_feed(pool, id).await
}

pub async fn delete_feed(pool: &SqlitePool, id: i64) -> AppResult<bool> {
    if get_feed(pool, id).await?.is_none() {
        return Ok(false);
    }
    sqlx::query("DELETE FROM feeds WHERE id=?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(true)
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{id}", get(get_feed_action).delete(delete_feed_action))
        .route("/{id}/view", post(view_feed_action))
        .route("/sender/{sender_id}", get(feeds_by_sender_action))
        .route("/receiver/{receiver_id}", get(feeds_by_receiver_action))
}

#[debug_handler]
pub(crate) async fn get_feed_action(
    State(db_pool): State<SqlitePool>,
    Path(id): Path<i64>,
) -> AppResult<Json<Feed>> {
    match get_feed(&db_pool, id).await? {
        Some(feed) => Ok(Json(feed)),
        None => Err(AppError::NotFound("feed")),
    }
}

#[debug_handler]
pub(crate) async fn feeds_by_sender_action(
    State(db_pool): State<SqlitePool>,
    Path(sender_id): Path<i64>,
) -> AppResult<Json<Vec<Feed>>> {
    if users::get_user(&db_pool, sender_id).await?.is_none() {
        return Err(AppError::NotFound("user"));
    }
    Ok(Json(get_feeds_by_sender(&db_pool, sender_id).await?))
}

#[debug_handler]
pub(crate) async fn feeds_by_receiver_action(
    State(db_pool): State<SqlitePool>,
    Path(receiver_id): Path<i64>,
) -> AppResult<Json<Vec<Feed>>> {
    if users::get_user(&db_pool, receiver_id).await?.is_none() {
        return Err(AppError::NotFound("user"));
    }
    Ok(Json(get_feeds_by_receiver(&db_pool, receiver_id).await?))
}

#[debug_handler]
pub(crate) async fn view_feed_action(
    State(db_pool): State<SqlitePool>,
    Path(id): Path<i64>,
) -> AppResult<Json<Feed>> {
    match view_feed(&db_pool, id).await? {
        Some(feed) => Ok(Json(feed)),
        None => Err(AppError::NotFound("feed")),
    }
}
