use axum::{
    Json, Router, debug_handler,
    extract::{Path, State},
    http::StatusCode,
    routing::get,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::{AppError, AppResult, AppState, users};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Rating {
    pub id: i64,
    pub rater_id: i64,
    pub rated_id: i64,
    pub rating: i64,
}

/// Declines with `None` unless both the rater and the rated user exist.
pub async fn create_rating(
    pool: &SqlitePool,
    rater_id: i64,
    rated_id: i64,
    rating: i64,
) -> AppResult<Option<Rating>> {
    if users::get_user(pool, rater_id).await?.is_none()
        || users::get_user(pool, rated_id).await?.is_none()
    {
        return Ok(None);
    }

    let result = sqlx::query("INSERT INTO ratings (rater_id,rated_id,rating) VALUES (?,?,?)")
        .bind(rater_id)
        .bind(rated_id)
        .bind(rating)
        .execute(pool)
        .await?;

    Ok(Some(Rating {
        id: result.last_insert_rowid(),
        rater_id,
        rated_id,
        rating,
    }))
}

pub async fn get_rating(pool: &SqlitePool, id: i64) -> AppResult<Option<Rating>> {
    let rating =
        sqlx::query_as::<_, Rating>("SELECT id,rater_id,rated_id,rating FROM ratings WHERE id=?")
            .bind(id)
            .fetch_optional(pool)
            .await?;
    Ok(rating)
}

pub async fn get_all_ratings(pool: &SqlitePool) -> AppResult<Vec<Rating>> {
    let ratings =
        sqlx::query_as::<_, Rating>("SELECT id,rater_id,rated_id,rating FROM ratings ORDER BY id")
            .fetch_all(pool)
            .await?;
    Ok(ratings)
}

pub async fn get_ratings_by_rater(pool: &SqlitePool, rater_id: i64) -> AppResult<Vec<Rating>> {
    let ratings = sqlx::query_as::<_, Rating>(
        "SELECT id,rater_id,rated_id,rating FROM ratings WHERE rater_id=?",
    )
    .bind(rater_id)
    .fetch_all(pool)
    .await?;
    Ok(ratings)
}

pub async fn get_ratings_by_rated(pool: &SqlitePool, rated_id: i64) -> AppResult<Vec<Rating>> {
    let ratings = sqlx::query_as::<_, Rating>(
        "SELECT id,rater_id,rated_id,rating FROM ratings WHERE rated_id=?",
    )
    .bind(rated_id)
    .fetch_all(pool)
    .await?;
    Ok(ratings)
}

/// Mean received rating rounded to the nearest integer, `None` for a
/// user nobody has rated.
pub async fn average_rating_by_rated(pool: &SqlitePool, rated_id: i64) -> AppResult<Option<i64>> {
    let average =
        sqlx::query_scalar::<_, Option<f64>>("SELECT AVG(rating) FROM ratings WHERE rated_id=?")
            .bind(rated_id)
            .fetch_one(pool)
            .await?;
    Ok(average.map(|avg| avg.round() as i64))
}

pub async fn update_rating(pool: &SqlitePool, id: i64, rating: i64) -> AppResult<Option<Rating>> {
    if get_rating(pool, id).await?.is_none() {
        return Ok(None);
    }
    sqlx::query("UPDATE ratings SET rating=? WHERE id=?")
        .bind(rating)
        .bind(id)
        .execute(pool)
        .await?;
    get_rating(pool, id).await
}

pub async fn delete_rating(pool: &SqlitePool, id: i64) -> AppResult<bool> {
    if get_rating(pool, id).await?.is_none() {
        return Ok(false);
    }
    sqlx::query("DELETE FROM ratings WHERE id=?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(true)
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_ratings_action).post(create_rating_action))
        .route(
            "/{id}",
            get(get_rating_action)
                .put(update_rating_action)
                .delete(delete_rating_action),
        )
        .route("/rater/{rater_id}", get(ratings_by_rater_action))
        .route("/rated/{rated_id}", get(ratings_by_rated_action))
        .route("/rated/{rated_id}/average", get(average_rating_action))
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateRatingBody {
    rater_id: i64,
    rated_id: i64,
    rating: i64,
}

#[debug_handler]
pub(crate) async fn create_rating_action(
    State(db_pool): State<SqlitePool>,
    Json(body): Json<CreateRatingBody>,
) -> AppResult<(StatusCode, Json<Rating>)> {
    if users::get_user(&db_pool, body.rater_id).await?.is_none() {
        return Err(AppError::NotFound("rater"));
    }
    if users::get_user(&db_pool, body.rated_id).await?.is_none() {
        return Err(AppError::NotFound("rated user"));
    }

    match create_rating(&db_pool, body.rater_id, body.rated_id, body.rating).await? {
        Some(rating) => Ok((StatusCode::CREATED, Json(rating))),
        None => Err(AppError::Conflict("Unable to create rating".to_owned())),
    }
}

#[debug_handler]
pub(crate) async fn list_ratings_action(
    State(db_pool): State<SqlitePool>,
) -> AppResult<Json<Vec<Rating>>> {
    Ok(Json(get_all_ratings(&db_pool).await?))
}

#[debug_handler]
pub(crate) async fn get_rating_action(
    State(db_pool): State<SqlitePool>,
    Path(id): Path<i64>,
) -> AppResult<Json<Rating>> {
    match get_rating(&db_pool, id).await? {
        Some(rating) => Ok(Json(rating)),
        None => Err(AppError::NotFound("rating")),
    }
}

#[debug_handler]
pub(crate) async fn ratings_by_rater_action(
    State(db_pool): State<SqlitePool>,
    Path(rater_id): Path<i64>,
) -> AppResult<Json<Vec<Rating>>> {
    if users::get_user(&db_pool, rater_id).await?.is_none() {
        return Err(AppError::NotFound("rater"));
    }
    Ok(Json(get_ratings_by_rater(&db_pool, rater_id).await?))
}

#[debug_handler]
pub(crate) async fn ratings_by_rated_action(
    State(db_pool): State<SqlitePool>,
    Path(rated_id): Path<i64>,
) -> AppResult<Json<Vec<Rating>>> {
    if users::get_user(&db_pool, rated_id).await?.is_none() {
        return Err(AppError::NotFound("rated user"));
    }
    Ok(Json(get_ratings_by_rated(&db_pool, rated_id).await?))
}

#[debug_handler]
pub(crate) async fn average_rating_action(
    State(db_pool): State<SqlitePool>,
    Path(rated_id): Path<i64>,
) -> AppResult<Json<serde_json::Value>> {
    match average_rating_by_rated(&db_pool, rated_id).await? {
        Some(average) => Ok(Json(serde_json::json!({ "average": average }))),
        None => Err(AppError::NotFound("ratings")),
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
    async fn rating_needs_both_users() {
        let pool = pool().await;
        let bob = users::create_user(&pool, "bob", "pass").await.unwrap().unwrap();
        assert!(create_rating(&pool, bob.id, 99, 3).await.unwrap().is_none());
        assert!(create_rating(&pool, 99, bob.id, 3).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn average_rounds_half_up() {
        let pool = pool().await;
        let rated = users::create_user(&pool, "rated", "pass").await.unwrap().unwrap();
        let a = users::create_user(&pool, "a", "pass").await.unwrap().unwrap();
        let b = users::create_user(&pool, "b", "pass").await.unwrap().unwrap();

        assert!(average_rating_by_rated(&pool, rated.id).await.unwrap().is_none());

        create_rating(&pool, a.id, rated.id, 3).await.unwrap();
        create_rating(&pool, b.id, rated.id, 4).await.unwrap();
        assert_eq!(
            average_rating_by_rated(&pool, rated.id).await.unwrap(),
            Some(4)
        );
    }

    #[tokio::test]
    async fn update_and_delete() {
        let pool = pool().await;
        let a = users::create_user(&pool, "a", "pass").await.unwrap().unwrap();
        let b = users::create_user(&pool, "b", "pass").await.unwrap().unwrap();
        let rating = create_rating(&pool, a.id, b.id, 2).await.unwrap().unwrap();

        let updated = update_rating(&pool, rating.id, 5).await.unwrap().unwrap();
        assert_eq!(updated.rating, 5);

        assert!(delete_rating(&pool, rating.id).await.unwrap());
        assert!(!delete_rating(&pool, rating.id).await.unwrap());
        assert!(get_rating(&pool, rating.id).await.unwrap().is_none());
    }
}
