use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    avatar TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS images (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id),
    url TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS ratings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    rater_id INTEGER NOT NULL REFERENCES users(id),
    rated_id INTEGER NOT NULL REFERENCES users(id),
    rating INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS rankings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ranker_id INTEGER NOT NULL REFERENCES users(id),
    image_id INTEGER NOT NULL REFERENCES images(id),
    \"rank\" INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS distributors (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    num_profiles INTEGER NOT NULL,
    timestamp INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS feeds (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sender_id INTEGER NOT NULL REFERENCES users(id),
    receiver_id INTEGER NOT NULL REFERENCES users(id),
    distributor_id INTEGER NOT NULL REFERENCES distributors(id),
    seen INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_feeds_sender ON feeds (sender_id);
CREATE INDEX IF NOT EXISTS idx_feeds_receiver ON feeds (receiver_id);
CREATE INDEX IF NOT EXISTS idx_feeds_distributor ON feeds (distributor_id);
";

pub async fn connect(database_url: &str) -> sqlx::Result<SqlitePool> {
    // an in-memory sqlite database exists per connection, so the pool
    // must not grow past one connection for :memory: urls
    let max_connections = if database_url.contains(":memory:") {
        1
    } else {
        16
    };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;

    ensure_schema(&pool).await?;
    Ok(pool)
}

pub async fn ensure_schema(pool: &SqlitePool) -> sqlx::Result<()> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    Ok(())
}
