use std::collections::HashMap;

use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use facefeed::{
    db,
    distributor::{self, Distribution, SeenFilter},
    feeds, users,
};

async fn pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    db::ensure_schema(&pool).await.unwrap();
    pool
}

async fn seed(pool: &SqlitePool, count: usize) -> Vec<i64> {
    let mut ids = Vec::new();
    for i in 1..=count {
        let user = users::create_user(pool, &format!("rob{i}"), "robpass")
            .await
            .unwrap()
            .unwrap();
        ids.push(user.id);
    }
    ids
}

#[tokio::test]
async fn distribute_all_runs_four_users_to_exhaustion() {
    let pool = pool().await;
    let ids = seed(&pool, 4).await;
    let distribution = Distribution::new(pool.clone());

    // four full rotations fit in the window, the fifth call comes up dry
    let rounds = distribution.run_all_rounds().await.unwrap();
    assert_eq!(rounds, 5);

    let distributors = distributor::get_all_distributors(&pool).await.unwrap();
    assert_eq!(distributors.len(), 5);
    assert!(distributors.iter().all(|round| round.num_profiles == 4));

    let table = distributor::distribution_table(&pool, SeenFilter::All)
        .await
        .unwrap();
    assert_eq!(table.len(), 16);

    let mut sent: HashMap<i64, i64> = HashMap::new();
    let mut received: HashMap<i64, i64> = HashMap::new();
    for row in &table {
        assert_ne!(row.sender_id, row.receiver_id);
        *sent.entry(row.sender_id).or_default() += 1;
        *received.entry(row.receiver_id).or_default() += 1;
    }
    // everyone ends exactly at the daily cap in both directions
    for id in &ids {
        assert_eq!(sent[id], 4);
        assert_eq!(received[id], 4);
    }

    // saturated in both directions, another round changes nothing
    assert!(!distribution.run_round().await.unwrap());
}

#[tokio::test]
async fn consecutive_rounds_are_not_idempotent() {
    let pool = pool().await;
    seed(&pool, 4).await;
    let distribution = Distribution::new(pool.clone());

    assert!(distribution.run_round().await.unwrap());
    let first = distributor::distribution_table(&pool, SeenFilter::All)
        .await
        .unwrap();

    assert!(distribution.run_round().await.unwrap());
    let second = distributor::distribution_table(&pool, SeenFilter::All)
        .await
        .unwrap();

    // the second round produced fresh rows, not a replay of the first
    assert_eq!(first.len(), 4);
    assert_eq!(second.len(), 8);
    let first_pairs: Vec<(i64, i64)> = first
        .iter()
        .map(|row| (row.sender_id, row.receiver_id))
        .collect();
    let second_pairs: Vec<(i64, i64)> = second[4..]
        .iter()
        .map(|row| (row.sender_id, row.receiver_id))
        .collect();
    assert_ne!(first_pairs, second_pairs);
}

#[tokio::test]
async fn seen_views_track_the_feed_lifecycle() {
    let pool = pool().await;
    let ids = seed(&pool, 4).await;
    let distribution = Distribution::new(pool.clone());
    assert!(distribution.run_round().await.unwrap());

    let inbox = feeds::get_feeds_by_receiver(&pool, ids[0]).await.unwrap();
    assert_eq!(inbox.len(), 1);
    assert!(!inbox[0].seen);

    feeds::view_feed(&pool, inbox[0].id).await.unwrap().unwrap();
    feeds::view_feed(&pool, inbox[0].id).await.unwrap().unwrap();

    let seen = distributor::distribution_table(&pool, SeenFilter::SeenOnly)
        .await
        .unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].feed_id, inbox[0].id);

    let unseen = distributor::distribution_table(&pool, SeenFilter::UnseenOnly)
        .await
        .unwrap();
    assert_eq!(unseen.len(), 3);
}

#[tokio::test]
async fn deleting_a_round_erases_its_feeds_from_history() {
    let pool = pool().await;
    seed(&pool, 4).await;
    let distribution = Distribution::new(pool.clone());
    assert!(distribution.run_round().await.unwrap());
    assert!(distribution.run_round().await.unwrap());

    let distributors = distributor::get_all_distributors(&pool).await.unwrap();
    assert_eq!(distributors.len(), 2);

    assert!(
        distributor::delete_distributor(&pool, distributors[0].id)
            .await
            .unwrap()
    );

    let table = distributor::distribution_table(&pool, SeenFilter::All)
        .await
        .unwrap();
    assert_eq!(table.len(), 4);
    assert!(
        table
            .iter()
            .all(|row| row.distributor_id == distributors[1].id)
    );
}

#[tokio::test]
async fn user_churn_reshapes_the_next_round() {
    let pool = pool().await;
    let ids = seed(&pool, 4).await;
    let distribution = Distribution::new(pool.clone());
    assert!(distribution.run_round().await.unwrap());

    // a departure and an arrival between rounds
    users::delete_user(&pool, ids[3]).await.unwrap();
    let newcomer = users::create_user(&pool, "newcomer", "pass")
        .await
        .unwrap()
        .unwrap();

    assert!(distribution.run_round().await.unwrap());

    let second = distributor::get_all_distributors(&pool).await.unwrap()[1].clone();
    assert_eq!(second.num_profiles, 4);

    let round_feeds = distributor::get_distributor_feeds(&pool, second.id)
        .await
        .unwrap();
    assert!(
        round_feeds
            .iter()
            .all(|feed| feed.sender_id != ids[3] && feed.receiver_id != ids[3])
    );
    // the newcomer has no pairing history and is matched immediately
    assert!(
        round_feeds
            .iter()
            .any(|feed| feed.sender_id == newcomer.id || feed.receiver_id == newcomer.id)
    );
}
