use anyhow::Context;
use axum::Router;
use clap::{Parser, Subcommand};
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use facefeed::{
    AppState,
    config::Config,
    db,
    distributor::{self, Distribution, SeenFilter},
    feeds, images, rankings, ratings, users,
};

#[derive(Parser)]
#[command(name = "facefeed", about = "profile exchange backend")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (the default)
    Serve,
    /// Create the database schema
    Init,
    /// Create a user
    UserCreate { username: String, password: String },
    /// List all users
    UserList,
    /// Create numbered test users
    Seed {
        #[arg(default_value_t = 4)]
        count: u32,
    },
    /// Run a single distribution round
    Distribute,
    /// Run distribution rounds until no more assignments are possible
    DistributeAll,
    /// List feeds for a sender or receiver
    Feeds {
        #[arg(long)]
        sender: Option<i64>,
        #[arg(long)]
        receiver: Option<i64>,
    },
    /// Mark a feed as seen
    View { feed_id: i64 },
    /// Print the distribution table
    Table {
        #[arg(long, conflicts_with = "unseen")]
        seen: bool,
        #[arg(long)]
        unseen: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = Config::load();
    let db_pool = db::connect(&config.database_url)
        .await
        .context("opening database")?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let state = AppState::new(db_pool.clone());
            let app = Router::new()
                .nest("/api/users", users::router())
                .nest("/api/image", images::router())
                .nest("/api/ratings", ratings::router())
                .nest("/api/ranking", rankings::router())
                .nest("/api/feed", feeds::router())
                .merge(distributor::router())
                .with_state(state)
                .layer(CorsLayer::permissive());

            let listener = tokio::net::TcpListener::bind(&config.bind_addr)
                .await
                .context("binding listener")?;
            info!("listening on {}", config.bind_addr);
            axum::serve(listener, app).await.context("serving")?;
        }
        Command::Init => {
            // connect already ran the schema, say so for the operator
            println!("database initialized");
        }
        Command::UserCreate { username, password } => {
            match users::create_user(&db_pool, &username, &password).await? {
                Some(user) => println!("{} created with id {}", user.username, user.id),
                None => println!("{username} already exists"),
            }
        }
        Command::UserList => {
            for user in users::get_all_users(&db_pool).await? {
                println!("{:>6}  {}", user.id, user.username);
            }
        }
        Command::Seed { count } => {
            for i in 1..=count {
                let username = format!("rob{i}");
                match users::create_user(&db_pool, &username, &format!("{username}pass")).await? {
                    Some(_) => println!("{username} created"),
                    None => println!("{username} already exists"),
                }
            }
        }
        Command::Distribute => {
            let distribution = Distribution::new(db_pool.clone());
            let created = distribution.run_round().await?;
            println!("round created feeds: {created}");
        }
        Command::DistributeAll => {
            let distribution = Distribution::new(db_pool.clone());
            let rounds = distribution.run_all_rounds().await?;
            println!("distribution exhausted after {rounds} rounds");
        }
        Command::Feeds { sender, receiver } => {
            let feeds = match (sender, receiver) {
                (Some(sender_id), _) => feeds::get_feeds_by_sender(&db_pool, sender_id).await?,
                (_, Some(receiver_id)) => {
                    feeds::get_feeds_by_receiver(&db_pool, receiver_id).await?
                }
                (None, None) => anyhow::bail!("pass --sender or --receiver"),
            };
            for feed in feeds {
                println!("{}", serde_json::to_string(&feed)?);
            }
        }
        Command::View { feed_id } => match feeds::view_feed(&db_pool, feed_id).await? {
            Some(feed) => println!("{}", serde_json::to_string(&feed)?),
            None => println!("Feed not found."),
        },
        Command::Table { seen, unseen } => {
            let filter = if seen {
                SeenFilter::SeenOnly
            } else if unseen {
                SeenFilter::UnseenOnly
            } else {
                SeenFilter::All
            };
            println!(
                "{:>8} {:>8} {:>10} {:>12} {:>6}",
                "FEED", "SENDER", "RECEIVER", "DISTRIBUTOR", "SEEN"
            );
            for row in distributor::distribution_table(&db_pool, filter).await? {
                println!(
                    "{:>8} {:>8} {:>10} {:>12} {:>6}",
                    row.feed_id, row.sender_id, row.receiver_id, row.distributor_id, row.seen
                );
            }
        }
    }

    Ok(())
}
