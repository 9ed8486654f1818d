//! The matching engine behind profile distribution.
//!
//! A round hands each active user at most one feed entry from another
//! user. Phase A only makes pairings the receiver has never seen
//! before; phase B falls back to repeats for anyone phase A left out.
//! Both phases respect a per-user daily cap, in each direction, equal
//! to the active-user count frozen at round start.

use std::collections::HashSet;
use std::sync::Arc;

use sqlx::SqlitePool;
use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{AppResult, feeds, users};

use super::create_distributor;

/// Handle for running distribution rounds. Clones share one execution
/// gate, so at most one round is ever in flight per pool.
#[derive(Clone)]
pub struct Distribution {
    pool: SqlitePool,
    gate: Arc<Mutex<()>>,
}

impl Distribution {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            gate: Arc::new(Mutex::new(())),
        }
    }

    /// Runs one matching round. Returns true iff at least one feed was
    /// created. A Distributor row is persisted even for a round that
    /// matches nobody.
    pub async fn run_round(&self) -> AppResult<bool> {
        let _gate = self.gate.lock().await;
        self.round().await
    }

    /// Runs rounds until one reports no assignments, holding the gate
    /// throughout. Returns the number of calls made, counting the
    /// final failing one.
    pub async fn run_all_rounds(&self) -> AppResult<u32> {
        let _gate = self.gate.lock().await;

        let mut calls = 1;
        let mut created = self.round().await?;
        while created {
            created = self.round().await?;
            calls += 1;
        }
        Ok(calls)
    }

    async fn round(&self) -> AppResult<bool> {
        let pool = &self.pool;

        let profiles = users::active_user_ids(pool).await?;
        let cap = profiles.len() as i64;
        let round = create_distributor(pool, cap).await?;

        let mut senders_used: HashSet<i64> = HashSet::new();
        let mut receivers_served: HashSet<i64> = HashSet::new();

        // phase A: first-fit pairings the receiver has never had
        for &receiver_id in &profiles {
            let history = feeds::get_feeds_by_receiver(pool, receiver_id).await?;

            if daily_receiver_count(pool, receiver_id).await? >= cap {
                debug!(receiver_id, "receiver at daily cap");
                continue;
            }

            for &sender_id in &profiles {
                if daily_sender_count(pool, sender_id).await? >= cap {
                    continue;
                }

                let already_received = history.iter().any(|feed| feed.sender_id == sender_id);
                if sender_id != receiver_id
                    && !already_received
                    && !senders_used.contains(&sender_id)
                {
                    feeds::create_feed(pool, sender_id, receiver_id, round.id).await?;
                    senders_used.insert(sender_id);
                    receivers_served.insert(receiver_id);
                    break;
                }
            }
        }

        // phase B: repeat pairings for receivers phase A could not serve
        if (receivers_served.len() as i64) < cap {
            for &receiver_id in &profiles {
                if receivers_served.contains(&receiver_id) {
                    continue;
                }
                if daily_receiver_count(pool, receiver_id).await? >= cap {
                    continue;
                }

                for &sender_id in &profiles {
                    if daily_sender_count(pool, sender_id).await? < cap
                        && sender_id != receiver_id
                        && !senders_used.contains(&sender_id)
                    {
                        feeds::create_feed(pool, sender_id, receiver_id, round.id).await?;
                        senders_used.insert(sender_id);
                        receivers_served.insert(receiver_id);
                        break;
                    }
                }
            }
        }

        let created = !senders_used.is_empty() && !receivers_served.is_empty();
        info!(
            round = round.id,
            profiles = cap,
            feeds = receivers_served.len(),
            "distribution round finished"
        );
        Ok(created)
    }
}

// The 24 hour window slides against "now" at the moment of each check,
// deliberately not cached for the round, and the counts see feeds
// created earlier in the same round.

async fn daily_sender_count(pool: &SqlitePool, sender_id: i64) -> AppResult<i64> {
    let cutoff = (OffsetDateTime::now_utc() - Duration::days(1)).unix_timestamp();
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM feeds JOIN distributors ON feeds.distributor_id=distributors.id \
         WHERE feeds.sender_id=? AND distributors.timestamp>=?",
    )
    .bind(sender_id)
    .bind(cutoff)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

async fn daily_receiver_count(pool: &SqlitePool, receiver_id: i64) -> AppResult<i64> {
    let cutoff = (OffsetDateTime::now_utc() - Duration::days(1)).unix_timestamp();
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM feeds JOIN distributors ON feeds.distributor_id=distributors.id \
         WHERE feeds.receiver_id=? AND distributors.timestamp>=?",
    )
    .bind(receiver_id)
    .bind(cutoff)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, distributor};
    use std::collections::HashSet;

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

    async fn all_feeds(pool: &SqlitePool) -> Vec<feeds::Feed> {
        sqlx::query_as::<_, feeds::Feed>(
            "SELECT id,sender_id,receiver_id,distributor_id,seen FROM feeds ORDER BY id",
        )
        .fetch_all(pool)
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn first_round_serves_every_user_when_even() {
        let pool = pool().await;
        let ids = seed(&pool, 4).await;
        let distribution = Distribution::new(pool.clone());

        assert!(distribution.run_round().await.unwrap());

        let feeds = all_feeds(&pool).await;
        assert_eq!(feeds.len(), 4);

        let senders: HashSet<i64> = feeds.iter().map(|feed| feed.sender_id).collect();
        let receivers: HashSet<i64> = feeds.iter().map(|feed| feed.receiver_id).collect();
        let everyone: HashSet<i64> = ids.into_iter().collect();
        assert_eq!(senders, everyone);
        assert_eq!(receivers, everyone);
        assert!(feeds.iter().all(|feed| feed.sender_id != feed.receiver_id));
    }

    #[tokio::test]
    async fn first_round_leaves_last_receiver_when_odd() {
        // first-fit exhausts the other senders before the last
        // receiver's turn, and the only one left is the receiver itself
        let pool = pool().await;
        let ids = seed(&pool, 3).await;
        let distribution = Distribution::new(pool.clone());

        assert!(distribution.run_round().await.unwrap());

        let feeds = all_feeds(&pool).await;
        assert_eq!(feeds.len(), 2);
        let receivers: HashSet<i64> = feeds.iter().map(|feed| feed.receiver_id).collect();
        assert_eq!(receivers, HashSet::from([ids[0], ids[1]]));
    }

    #[tokio::test]
    async fn round_records_distributor_even_for_empty_population() {
        let pool = pool().await;
        let distribution = Distribution::new(pool.clone());

        assert!(!distribution.run_round().await.unwrap());

        let rounds = distributor::get_all_distributors(&pool).await.unwrap();
        assert_eq!(rounds.len(), 1);
        assert_eq!(rounds[0].num_profiles, 0);
        assert!(all_feeds(&pool).await.is_empty());
    }

    #[tokio::test]
    async fn two_users_saturate_after_three_calls() {
        let pool = pool().await;
        seed(&pool, 2).await;
        let distribution = Distribution::new(pool.clone());

        assert_eq!(distribution.run_all_rounds().await.unwrap(), 3);
        // both directions are at cap inside the window now
        assert!(!distribution.run_round().await.unwrap());
        assert_eq!(all_feeds(&pool).await.len(), 4);
    }

    #[tokio::test]
    async fn second_round_repeats_only_through_fallback() {
        let pool = pool().await;
        let ids = seed(&pool, 2).await;
        let distribution = Distribution::new(pool.clone());

        assert!(distribution.run_round().await.unwrap());
        assert!(distribution.run_round().await.unwrap());

        let feeds = all_feeds(&pool).await;
        assert_eq!(feeds.len(), 4);

        // the second round can only repeat the first round's pairings
        let first: HashSet<(i64, i64)> = feeds[..2]
            .iter()
            .map(|feed| (feed.sender_id, feed.receiver_id))
            .collect();
        let second: HashSet<(i64, i64)> = feeds[2..]
            .iter()
            .map(|feed| (feed.sender_id, feed.receiver_id))
            .collect();
        assert_eq!(first, second);
        assert_eq!(first, HashSet::from([(ids[1], ids[0]), (ids[0], ids[1])]));
    }

    #[tokio::test]
    async fn stale_rounds_block_unique_pairings_but_not_caps() {
        let pool = pool().await;
        let ids = seed(&pool, 2).await;
        let distribution = Distribution::new(pool.clone());

        // a round from three days ago already paired everyone
        let stale = (OffsetDateTime::now_utc() - Duration::days(3)).unix_timestamp();
        let result = sqlx::query("INSERT INTO distributors (num_profiles,timestamp) VALUES (?,?)")
            .bind(2_i64)
            .bind(stale)
            .execute(&pool)
            .await
            .unwrap();
        let stale_round = result.last_insert_rowid();
        feeds::create_feed(&pool, ids[1], ids[0], stale_round).await.unwrap();
        feeds::create_feed(&pool, ids[0], ids[1], stale_round).await.unwrap();

        // pairing history is forever, so phase A is blocked, but the
        // stale feeds are outside the window and do not consume cap
        assert!(distribution.run_round().await.unwrap());

        let feeds = all_feeds(&pool).await;
        assert_eq!(feeds.len(), 4);
        let fresh: Vec<_> = feeds
            .iter()
            .filter(|feed| feed.distributor_id != stale_round)
            .collect();
        assert_eq!(fresh.len(), 2);
        assert!(fresh.iter().all(|feed| feed.sender_id != feed.receiver_id));
    }

    #[tokio::test]
    async fn round_ids_survive_user_deletion_gaps() {
        // ids are taken from the live user table, not assumed contiguous
        let pool = pool().await;
        let ids = seed(&pool, 5).await;
        users::delete_user(&pool, ids[2]).await.unwrap();

        let distribution = Distribution::new(pool.clone());
        assert!(distribution.run_round().await.unwrap());

        let feeds = all_feeds(&pool).await;
        assert_eq!(feeds.len(), 4);
        assert!(
            feeds
                .iter()
                .all(|feed| feed.sender_id != ids[2] && feed.receiver_id != ids[2])
        );
    }
}
