use axum::{
    Json, Router, debug_handler,
    extract::{Path, State},
    http::StatusCode,
    routing::get,
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::info;

use crate::{
    AppError, AppResult, AppState,
    distributor::Distribution,
    images::{self, Image},
    rankings::{self, Ranking},
    ratings::{self, Rating},
};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub avatar: String,
}

/// A user together with everything it owns, the shape the API hands out.
#[derive(Debug, Serialize)]
pub struct UserProfile {
    pub id: i64,
    pub username: String,
    pub avatar: String,
    pub images: Vec<Image>,
    pub rankings: Vec<Ranking>,
}

#[derive(Debug, Serialize)]
pub struct UserSummary {
    pub id: i64,
    pub username: String,
    pub images: Vec<Image>,
    pub average_rating: Option<i64>,
    pub ratings: Vec<Rating>,
}

/// Declines with `None` when the username is already taken. Hashing the
/// password is the auth layer's job, the string is stored as given.
pub async fn create_user(
    pool: &SqlitePool,
    username: &str,
    password_hash: &str,
) -> AppResult<Option<User>> {
    if get_user_by_username(pool, username).await?.is_some() {
        return Ok(None);
    }

    let avatar = default_avatar();
    let result = sqlx::query("INSERT INTO users (username,password_hash,avatar) VALUES (?,?,?)")
        .bind(username)
        .bind(password_hash)
        .bind(&avatar)
        .execute(pool)
        .await?;

    Ok(Some(User {
        id: result.last_insert_rowid(),
        username: username.to_owned(),
        password_hash: password_hash.to_owned(),
        avatar,
    }))
}

fn default_avatar() -> String {
    format!(
        "https://gravatar.com/avatar/{:032x}?s=400&d=robohash&r=x",
        rand::rng().random::<u128>()
    )
}

pub async fn get_user(pool: &SqlitePool, id: i64) -> AppResult<Option<User>> {
    let user = sqlx::query_as::<_, User>(
        "SELECT id,username,password_hash,avatar FROM users WHERE id=?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(user)
}

pub async fn get_user_by_username(pool: &SqlitePool, username: &str) -> AppResult<Option<User>> {
    let user = sqlx::query_as::<_, User>(
        "SELECT id,username,password_hash,avatar FROM users WHERE username=?",
    )
    .bind(username)
    .fetch_optional(pool)
    .await?;
    Ok(user)
}

pub async fn get_all_users(pool: &SqlitePool) -> AppResult<Vec<User>> {
    let users = sqlx::query_as::<_, User>(
        "SELECT id,username,password_hash,avatar FROM users ORDER BY id",
    )
    .fetch_all(pool)
    .await?;
    Ok(users)
}

/// The ordered list of real user ids a distribution round iterates over.
pub async fn active_user_ids(pool: &SqlitePool) -> AppResult<Vec<i64>> {
    let ids = sqlx::query_scalar::<_, i64>("SELECT id FROM users ORDER BY id")
        .fetch_all(pool)
        .await?;
    Ok(ids)
}

pub async fn count_users(pool: &SqlitePool) -> AppResult<i64> {
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

pub async fn update_username(
    pool: &SqlitePool,
    id: i64,
    username: &str,
) -> AppResult<Option<User>> {
    if get_user(pool, id).await?.is_none() {
        return Ok(None);
    }
    sqlx::query("UPDATE users SET username=? WHERE id=?")
        .bind(username)
        .bind(id)
        .execute(pool)
        .await?;
    get_user(pool, id).await
}

pub async fn set_avatar(pool: &SqlitePool, id: i64, avatar: &str) -> AppResult<Option<User>> {
    if get_user(pool, id).await?.is_none() {
        return Ok(None);
    }
    sqlx::query("UPDATE users SET avatar=? WHERE id=?")
        .bind(avatar)
        .bind(id)
        .execute(pool)
        .await?;
    get_user(pool, id).await
}

/// Deletes the user together with its images, the rankings on those
/// images, and the rankings it authored. Feeds that name the user stay
/// in place as distribution history.
pub async fn delete_user(pool: &SqlitePool, id: i64) -> AppResult<bool> {
    if get_user(pool, id).await?.is_none() {
        return Ok(false);
    }

    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM rankings WHERE image_id IN (SELECT id FROM images WHERE user_id=?)")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM images WHERE user_id=?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM rankings WHERE ranker_id=?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM users WHERE id=?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    Ok(true)
}

pub async fn get_user_profile(pool: &SqlitePool, id: i64) -> AppResult<Option<UserProfile>> {
    let Some(user) = get_user(pool, id).await? else {
        return Ok(None);
    };

    let images = images::get_images_by_user(pool, id).await?;
    let rankings = rankings::get_rankings_by_ranker(pool, id).await?;

    Ok(Some(UserProfile {
        id: user.id,
        username: user.username,
        avatar: user.avatar,
        images,
        rankings,
    }))
}

pub async fn get_user_summary(pool: &SqlitePool, id: i64) -> AppResult<Option<UserSummary>> {
    let Some(user) = get_user(pool, id).await? else {
        return Ok(None);
    };

    let images = images::get_images_by_user(pool, id).await?;
    let average_rating = ratings::average_rating_by_rated(pool, id).await?;
    let ratings = ratings::get_ratings_by_rated(pool, id).await?;

    Ok(Some(UserSummary {
        id: user.id,
        username: user.username,
        images,
        average_rating,
        ratings,
    }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_users_action).post(signup_action))
        .route(
            "/{id}",
            get(get_user_action)
                .put(update_user_action)
                .delete(delete_user_action),
        )
        .route("/{id}/summary", get(user_summary_action))
}

#[derive(Debug, Deserialize)]
pub(crate) struct SignupBody {
    username: String,
    password: String,
}

#[debug_handler(state = AppState)]
pub(crate) async fn signup_action(
    State(db_pool): State<SqlitePool>,
    State(distribution): State<Distribution>,
    Json(SignupBody { username, password }): Json<SignupBody>,
) -> AppResult<(StatusCode, Json<serde_json::Value>)> {
    let Some(user) = create_user(&db_pool, &username, &password).await? else {
        return Err(AppError::Conflict("Username taken.".to_owned()));
    };

    // every signup is a triggering event for the distribution engine
    let rounds = distribution.run_all_rounds().await?;
    info!(user = %user.username, rounds, "signup ran distribution to exhaustion");

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "message": format!("user {} created", user.username) })),
    ))
}

#[debug_handler]
pub(crate) async fn list_users_action(
    State(db_pool): State<SqlitePool>,
) -> AppResult<Json<Vec<UserProfile>>> {
    let mut profiles = Vec::new();
    for user in get_all_users(&db_pool).await? {
        if let Some(profile) = get_user_profile(&db_pool, user.id).await? {
            profiles.push(profile);
        }
    }
    Ok(Json(profiles))
}

#[debug_handler]
pub(crate) async fn get_user_action(
    State(db_pool): State<SqlitePool>,
    Path(id): Path<i64>,
) -> AppResult<Json<UserProfile>> {
    match get_user_profile(&db_pool, id).await? {
        Some(profile) => Ok(Json(profile)),
        None => Err(AppError::NotFound("user")),
    }
}

#[debug_handler]
pub(crate) async fn user_summary_action(
    State(db_pool): State<SqlitePool>,
    Path(id): Path<i64>,
) -> AppResult<Json<UserSummary>> {
    match get_user_summary(&db_pool, id).await? {
        Some(summary) => Ok(Json(summary)),
        None => Err(AppError::NotFound("user")),
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct UpdateUserBody {
    username: Option<String>,
    avatar: Option<String>,
}

#[debug_handler]
pub(crate) async fn update_user_action(
    State(db_pool): State<SqlitePool>,
    Path(id): Path<i64>,
    Json(UpdateUserBody { username, avatar }): Json<UpdateUserBody>,
) -> AppResult<Json<User>> {
    if username.is_none() && avatar.is_none() {
        return Err(AppError::Conflict("nothing to update".to_owned()));
    }

    let mut updated = None;
    if let Some(username) = username {
        updated = update_username(&db_pool, id, &username).await?;
    }
    if let Some(avatar) = avatar {
        updated = set_avatar(&db_pool, id, &avatar).await?;
    }

    match updated {
        Some(user) => Ok(Json(user)),
        None => Err(AppError::NotFound("user")),
    }
}

#[debug_handler]
pub(crate) async fn delete_user_action(
    State(db_pool): State<SqlitePool>,
    Path(id): Path<i64>,
) -> AppResult<Json<serde_json::Value>> {
    if delete_user(&db_pool, id).await? {
        Ok(Json(serde_json::json!({ "message": "User deleted" })))
    } else {
        Err(AppError::NotFound("user"))
    }
}
