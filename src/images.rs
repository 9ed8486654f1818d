use axum::{
    Json, Router, debug_handler,
    extract::{Path, State},
    http::StatusCode,
    routing::get,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::{
    AppError, AppResult, AppState,
    rankings::{self, Ranking},
    users,
};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Image {
    pub id: i64,
    pub user_id: i64,
    pub url: String,
}

/// An image with its aggregated ranking stats, the shape the API hands out.
#[derive(Debug, Serialize)]
pub struct ImageView {
    pub id: i64,
    pub user_id: i64,
    pub url: String,
    pub rank: i64,
    pub num_rankings: i64,
}

/// Declines with `None` when the owning user does not exist.
pub async fn create_image(pool: &SqlitePool, user_id: i64, url: &str) -> AppResult<Option<Image>> {
    if users::get_user(pool, user_id).await?.is_none() {
        return Ok(None);
    }

    let result = sqlx::query("INSERT INTO images (user_id,url) VALUES (?,?)")
        .bind(user_id)
        .bind(url)
        .execute(pool)
        .await?;

    Ok(Some(Image {
        id: result.last_insert_rowid(),
        user_id,
        url: url.to_owned(),
    }))
}

pub async fn get_image(pool: &SqlitePool, id: i64) -> AppResult<Option<Image>> {
    let image = sqlx::query_as::<_, Image>("SELECT id,user_id,url FROM images WHERE id=?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(image)
}

pub async fn get_all_images(pool: &SqlitePool) -> AppResult<Vec<Image>> {
    let images = sqlx::query_as::<_, Image>("SELECT id,user_id,url FROM images ORDER BY id")
        .fetch_all(pool)
        .await?;
    Ok(images)
}

pub async fn get_images_by_user(pool: &SqlitePool, user_id: i64) -> AppResult<Vec<Image>> {
    let images = sqlx::query_as::<_, Image>("SELECT id,user_id,url FROM images WHERE user_id=?")
        .bind(user_id)
        .fetch_all(pool)
        .await?;
    Ok(images)
}

/// Mean rank over all rankings of the image, rounded to the nearest
/// integer. Unranked images report 0.
pub async fn average_rank(pool: &SqlitePool, image_id: i64) -> AppResult<i64> {
    let average = sqlx::query_scalar::<_, Option<f64>>(
        "SELECT AVG(\"rank\") FROM rankings WHERE image_id=?",
    )
    .bind(image_id)
    .fetch_one(pool)
    .await?;

    Ok(average.map(|avg| avg.round() as i64).unwrap_or(0))
}

pub async fn get_image_view(pool: &SqlitePool, id: i64) -> AppResult<Option<ImageView>> {
    let Some(image) = get_image(pool, id).await? else {
        return Ok(None);
    };

    let rank = average_rank(pool, id).await?;
    let num_rankings = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM rankings WHERE image_id=?")
        .bind(id)
        .fetch_one(pool)
        .await?;

    Ok(Some(ImageView {
        id: image.id,
        user_id: image.user_id,
        url: image.url,
        rank,
        num_rankings,
    }))
}

/// Deletes the image and the rankings that target it.
pub async fn delete_image(pool: &SqlitePool, id: i64) -> AppResult<bool> {
    if get_image(pool, id).await?.is_none() {
        return Ok(false);
    }

    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM rankings WHERE image_id=?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM images WHERE id=?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    Ok(true)
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_images_action).post(post_image_action))
        .route("/{id}", get(get_image_action).delete(delete_image_action))
        .route("/user/{user_id}", get(images_by_user_action))
        .route("/{id}/rank", get(image_rank_action))
        .route("/{id}/rankings", get(image_rankings_action))
}

#[derive(Debug, Deserialize)]
pub(crate) struct PostImageBody {
    user_id: i64,
    url: String,
}

#[debug_handler]
pub(crate) async fn post_image_action(
    State(db_pool): State<SqlitePool>,
    Json(PostImageBody { user_id, url }): Json<PostImageBody>,
) -> AppResult<(StatusCode, Json<Image>)> {
    match create_image(&db_pool, user_id, &url).await? {
        Some(image) => Ok((StatusCode::CREATED, Json(image))),
        None => Err(AppError::Conflict("Unable to create image".to_owned())),
    }
}

#[debug_handler]
pub(crate) async fn list_images_action(
    State(db_pool): State<SqlitePool>,
) -> AppResult<Json<Vec<Image>>> {
    Ok(Json(get_all_images(&db_pool).await?))
}

#[debug_handler]
pub(crate) async fn get_image_action(
    State(db_pool): State<SqlitePool>,
    Path(id): Path<i64>,
) -> AppResult<Json<ImageView>> {
    match get_image_view(&db_pool, id).await? {
        Some(view) => Ok(Json(view)),
        None => Err(AppError::NotFound("image")),
    }
}

#[debug_handler]
pub(crate) async fn images_by_user_action(
    State(db_pool): State<SqlitePool>,
    Path(user_id): Path<i64>,
) -> AppResult<Json<Vec<Image>>> {
    if users::get_user(&db_pool, user_id).await?.is_none() {
        return Err(AppError::NotFound("user"));
    }
    Ok(Json(get_images_by_user(&db_pool, user_id).await?))
}

#[debug_handler]
pub(crate) async fn image_rank_action(
    State(db_pool): State<SqlitePool>,
    Path(id): Path<i64>,
) -> AppResult<Json<serde_json::Value>> {
    if get_image(&db_pool, id).await?.is_none() {
        return Err(AppError::NotFound("image"));
    }
    let average = average_rank(&db_pool, id).await?;
    Ok(Json(serde_json::json!({ "average_rank": average })))
}

#[debug_handler]
pub(crate) async fn image_rankings_action(
    State(db_pool): State<SqlitePool>,
    Path(id): Path<i64>,
) -> AppResult<Json<Vec<Ranking>>> {
    if get_image(&db_pool, id).await?.is_none() {
        return Err(AppError::NotFound("image"));
    }
    Ok(Json(rankings::get_rankings_by_image(&db_pool, id).await?))
}
