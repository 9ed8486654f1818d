pub mod config;
pub mod db;
pub mod distributor;
pub mod error;
pub mod feeds;
pub mod images;
pub mod rankings;
pub mod ratings;
pub mod users;

use axum::extract::FromRef;
use sqlx::SqlitePool;

pub use error::{AppError, AppResult};

use distributor::Distribution;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub db_pool: SqlitePool,
    pub distribution: Distribution,
}

impl AppState {
    pub fn new(db_pool: SqlitePool) -> Self {
        let distribution = Distribution::new(db_pool.clone());
        Self {
            db_pool,
            distribution,
        }
    }
}
