use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::db::{Database, NewPost};
use crate::error::{Error, Result};
use crate::fetcher::FeedFetcher;

/// Parse `<integer><unit>` where unit is one of `ms`, `s`, `m`, `h`.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let invalid = || Error::InvalidDuration(input.to_string());

    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(invalid)?;
    let (digits, unit) = input.split_at(split);
    if digits.is_empty() {
        return Err(invalid());
    }
    let value: u64 = digits.parse().map_err(|_| invalid())?;

    let millis = match unit {
        "ms" => Some(value),
        "s" => value.checked_mul(1_000),
        "m" => value.checked_mul(60 * 1_000),
        "h" => value.checked_mul(60 * 60 * 1_000),
        _ => return Err(invalid()),
    }
    .ok_or_else(invalid)?;

    Ok(Duration::from_millis(millis))
}

/// What to do when the timer fires while a previous cycle is still running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverlapPolicy {
    /// Drop the tick; at most one cycle is in flight.
    #[default]
    Skip,
    /// Start another cycle regardless.
    Allow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    ShuttingDown,
}

/// Result of one pick-fetch-store cycle over a single feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub feed_name: String,
    pub items: usize,
    pub inserted: usize,
}

pub struct Aggregator {
    db: Arc<Database>,
    fetcher: FeedFetcher,
    overlap: OverlapPolicy,
    state: RwLock<SchedulerState>,
}

impl Aggregator {
    pub fn new(db: Arc<Database>, fetcher: FeedFetcher, overlap: OverlapPolicy) -> Self {
        Self {
            db,
            fetcher,
            overlap,
            state: RwLock::new(SchedulerState::Idle),
        }
    }

    pub async fn state(&self) -> SchedulerState {
        *self.state.read().await
    }

    /// One aggregation cycle. The feed is claimed (its `last_fetched_at`
    /// stamped) before the network fetch, so a failing feed waits a full
    /// interval before it is tried again.
    pub async fn run_cycle(&self) -> Result<Option<CycleReport>> {
        let feed = match self.db.claim_next_feed(Utc::now()).await? {
            Some(feed) => feed,
            None => {
                info!("No feeds to fetch");
                return Ok(None);
            }
        };

        info!("Fetching feed: {} ({})", feed.name, feed.url);
        let document = self.fetcher.fetch(&feed.url).await?;

        let mut inserted = 0;
        for item in &document.items {
            if item.link.is_empty() {
                warn!("Skipping entry with no link: {}", item.title);
                continue;
            }

            let post = NewPost {
                title: item.title.clone(),
                url: item.link.clone(),
                description: Some(item.description.clone()).filter(|d| !d.is_empty()),
                published_at: item.published_at,
                feed_id: feed.id,
            };
            if self.db.create_post(&post).await? {
                inserted += 1;
            }
        }

        info!(
            "Synced {} posts from {} ({} new)",
            document.items.len(),
            feed.name,
            inserted
        );

        Ok(Some(CycleReport {
            feed_name: feed.name,
            items: document.items.len(),
            inserted,
        }))
    }

    /// Run a cycle and swallow its error, so one bad feed never stops the loop.
    async fn scrape(&self) {
        if let Err(e) = self.run_cycle().await {
            error!("Feed aggregation cycle failed: {}", e);
        }
    }

    /// Aggregate immediately, then once per `interval`, until `shutdown`
    /// resolves. Cycles already in flight at shutdown run to completion
    /// before this returns.
    pub async fn run<F>(self: Arc<Self>, interval: Duration, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        if interval.is_zero() {
            return Err(Error::Validation("interval must be greater than zero".to_string()));
        }
        {
            let mut state = self.state.write().await;
            if *state != SchedulerState::Idle {
                return Err(Error::Validation("aggregator is already running".to_string()));
            }
            *state = SchedulerState::Running;
        }
        info!("Collecting feeds every {:?}", interval);

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cycles = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => break,

                Some(joined) = cycles.join_next(), if !cycles.is_empty() => {
                    if let Err(e) = joined {
                        error!("Aggregation cycle panicked: {}", e);
                    }
                }

                _ = ticker.tick() => {
                    if self.overlap == OverlapPolicy::Skip && !cycles.is_empty() {
                        info!("Previous cycle still running, skipping this tick");
                        continue;
                    }
                    let this = Arc::clone(&self);
                    cycles.spawn(async move { this.scrape().await });
                }
            }
        }

        *self.state.write().await = SchedulerState::ShuttingDown;
        info!(
            "Shutting down feed aggregator, waiting for {} in-flight cycle(s)",
            cycles.len()
        );
        while let Some(joined) = cycles.join_next().await {
            if let Err(e) = joined {
                error!("Aggregation cycle panicked: {}", e);
            }
        }

        *self.state.write().await = SchedulerState::Idle;
        info!("Feed aggregator stopped");
        Ok(())
    }
}
