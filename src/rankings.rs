use axum::{
    Json, Router, debug_handler,
    extract::{Path, State},
    http::StatusCode,
    routing::get,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::{AppError, AppResult, AppState, images, users};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Ranking {
    pub id: i64,
    pub ranker_id: i64,
    pub image_id: i64,
    pub rank: i64,
}

/// Declines with `None` unless the ranker and the image both exist.
pub async fn create_ranking(
    pool: &SqlitePool,
    ranker_id: i64,
    image_id: i64,
    rank: i64,
) -> AppResult<Option<Ranking>> {
    if users::get_user(pool, ranker_id).await?.is_none()
        || images::get_image(pool, image_id).await?.is_none()
    {
        return Ok(None);
    }

    let result = sqlx::query("INSERT INTO rankings (ranker_id,image_id,\"rank\") VALUES (?,?,?)")
        .bind(ranker_id)
        .bind(image_id)
        .bind(rank)
        .execute(pool)
        .await?;

    Ok(Some(Ranking {
        id: result.last_insert_rowid(),
        ranker_id,
        image_id,
        rank,
    }))
}

pub async fn get_ranking(pool: &SqlitePool, id: i64) -> AppResult<Option<Ranking>> {
    let ranking = sqlx::query_as::<_, Ranking>(
        "SELECT id,ranker_id,image_id,\"rank\" FROM rankings WHERE id=?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(ranking)
}

pub async fn get_rankings_by_ranker(pool: &SqlitePool, ranker_id: i64) -> AppResult<Vec<Ranking>> {
    let rankings = sqlx::query_as::<_, Ranking>(
        "SELECT id,ranker_id,image_id,\"rank\" FROM rankings WHERE ranker_id=?",
    )
    .bind(ranker_id)
    .fetch_all(pool)
    .await?;
    Ok(rankings)
}

pub async fn get_rankings_by_image(pool: &SqlitePool, image_id: i64) -> AppResult<Vec<Ranking>> {
    let rankings = sqlx::query_as::<_, Ranking>(
        "SELECT id,ranker_id,image_id,\"rank\" FROM rankings WHERE image_id=?",
    )
    .bind(image_id)
    .fetch_all(pool)
    .await?;
    Ok(rankings)
}

pub async fn update_ranking(pool: &SqlitePool, id: i64, rank: i64) -> AppResult<Option<Ranking>> {
    if get_ranking(pool, id).await?.is_none() {
        return Ok(None);
    }
    sqlx::query("UPDATE rankings SET \"rank\"=? WHERE id=?")
        .bind(rank)
        .bind(id)
        .execute(pool)
        .await?;
    get_ranking(pool, id).await
}

pub async fn delete_ranking(pool: &SqlitePool, id: i64) -> AppResult<bool> {
    if get_ranking(pool, id).await?.is_none() {
        return Ok(false);
    }
    sqlx::query("DELETE FROM rankings WHERE id=?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(true)
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_rankings_action).post(create_ranking_action))
        .route(
            "/{id}",
            get(get_ranking_action)
                .put(update_ranking_action)
                .delete(delete_ranking_action),
        )
        .route("/ranker/{ranker_id}", get(rankings_by_ranker_action))
        .route("/image/{image_id}", get(rankings_by_image_action))
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateRankingBody {
    ranker_id: i64,
    image_id: i64,
    rank: i64,
}

#[debug_handler]
pub(crate) async fn create_ranking_action(
    State(db_pool): State<SqlitePool>,
    Json(body): Json<CreateRankingBody>,
) -> AppResult<(StatusCode, Json<Ranking>)> {
    if users::get_user(&db_pool, body.ranker_id).await?.is_none() {
        return Err(AppError::NotFound("ranker"));
    }
    if images::get_image(&db_pool, body.image_id).await?.is_none() {
        return Err(AppError::NotFound("image"));
    }

    match create_ranking(&db_pool, body.ranker_id, body.image_id, body.rank).await? {
        Some(ranking) => Ok((StatusCode::CREATED, Json(ranking))),
        None => Err(AppError::Conflict("Unable to create ranking".to_owned())),
    }
}

#[debug_handler]
pub(crate) async fn list_rankings_action(
    State(db_pool): State<SqlitePool>,
) -> AppResult<Json<Vec<Ranking>>> {
    let rankings = sqlx::query_as::<_, Ranking>(
        "SELECT id,ranker_id,image_id,\"rank\" FROM rankings ORDER BY id",
    )
    .fetch_all(&db_pool)
    .await?;
    Ok(Json(rankings))
}

#[debug_handler]
pub(crate) async fn get_ranking_action(
    State(db_pool): State<SqlitePool>,
    Path(id): Path<i64>,
) -> AppResult<Json<Ranking>> {
    match get_ranking(&db_pool, id).await? {
        Some(ranking) => Ok(Json(ranking)),
        None => Err(AppError::NotFound("ranking")),
    }
}

#[debug_handler]
pub(crate) async fn rankings_by_ranker_action(
    State(db_pool): State<SqlitePool>,
    Path(ranker_id): Path<i64>,
) -> AppResult<Json<Vec<Ranking>>> {
    if users::get_user(&db_pool, ranker_id).await?.is_none() {
        return Err(AppError::NotFound("ranker"));
    }
    Ok(Json(get_rankings_by_ranker(&db_pool, ranker_id).await?))
}

#[debug_handler]
pub(crate) async fn rankings_by_image_action(
    State(db_pool): State<SqlitePool>,
    Path(image_id): Path<i64>,
) -> AppResult<Json<Vec<Ranking>>> {
    if images::get_image(&db_pool, image_id).await?.is_none() {
        return Err(AppError::NotFound("image"));
    }
    Ok(Json(get_rankings_by_image(&db_pool, image_id).await?))
}

#[debug_handler]
pub(crate) async fn update_ranking_action(
    State(db_pool): State<SqlitePool>,
    Path(id): Path<i64>,
    Json(body): Json<serde_json::Value>,
) -> AppResult<Json<Ranking>> {
    let Some(rank) = body.get("rank").and_then(|rank| rank.as_i64()) else {
        return Err(AppError::Conflict("rank is required".to_owned()));
    };

    match update_ranking(&db_pool, id, rank).await? {
        Some(ranking) => Ok(Json(ranking)),
        None => Err(AppError::NotFound("ranking")),
    }
}

#[debug_handler]
pub(crate) async fn delete_ranking_action(
    State(db_pool): State<SqlitePool>,
    Path(id): Path<i64>,
) -> AppResult<Json<serde_json::Value>> {
    if delete_ranking(&db_pool, id).await? {
        Ok(Json(serde_json::json!({ "message": "Ranking deleted" })))
    } else {
        Err(AppError::NotFound("ranking"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        db::ensure_schema(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn ranking_needs_ranker_and_image() {
        let pool = pool().await;
        let bob = users::create_user(&pool, "bob", "pass").await.unwrap().unwrap();
        assert!(create_ranking(&pool, bob.id, 5, 1).await.unwrap().is_none());

        let image = images::create_image(&pool, bob.id, "https://picsum.photos/200")
            .await
            .unwrap()
            .unwrap();
        assert!(create_ranking(&pool, 99, image.id, 1).await.unwrap().is_none());
        assert!(
            create_ranking(&pool, bob.id, image.id, 1)
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn update_missing_ranking_is_absent() {
        let pool = pool().await;
        assert!(update_ranking(&pool, 4, 2).await.unwrap().is_none());
    }
}
