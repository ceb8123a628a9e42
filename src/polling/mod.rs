//! Per-game comment polling.
//!
//! The engine owns one independent, cancellable polling loop per active
//! game. Each loop fetches new comments under the game's root post, runs
//! them through the protocol decoder, and delivers the resulting updates
//! over a single-consumer channel in comment-creation-time order. Failures
//! back off exponentially; after too many consecutive failures the loop
//! removes its own registry entry, and callers must re-initialize to
//! resume.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::gateway::Gateway;
use crate::protocol::{self, GameUpdate};
use crate::thread::SharedGameThread;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid game thread: {0}")]
    InvalidThread(String),
    #[error("polling already initialized for {0}")]
    AlreadyActive(String),
}

/// Tuning knobs for the polling loops. Defaults match production use; the
/// values are exposed because the right numbers are deployment-dependent.
#[derive(Debug, Clone)]
pub struct PollerSettings {
    /// Delay between successful fetch ticks.
    pub base_interval: Duration,
    /// Upper bound on the backoff delay.
    pub max_backoff: Duration,
    /// Consecutive failures tolerated before the game's polling state is
    /// dropped entirely.
    pub max_consecutive_errors: u32,
    /// Capacity of each game's update channel.
    pub channel_capacity: usize,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_secs(5),
            max_backoff: Duration::from_secs(300),
            max_consecutive_errors: 3,
            channel_capacity: 64,
        }
    }
}

/// Mutable per-game polling state held in the registry.
#[derive(Debug, Clone)]
struct PollingState {
    is_active: bool,
    error_count: u32,
    last_success: Option<DateTime<Utc>>,
    current_interval: Duration,
}

/// Read-only snapshot of one game's polling state.
#[derive(Debug, Clone, Serialize)]
pub struct PollingStatus {
    pub is_active: bool,
    pub error_count: u32,
    pub last_success: Option<DateTime<Utc>>,
    pub current_interval: Duration,
}

struct GameSlot {
    state: PollingState,
    cancel: CancellationToken,
}

/// Registry key for a game's polling state.
#[must_use]
pub fn game_key(post_id: &str) -> String {
    format!("game_{post_id}")
}

type Registry = Arc<RwLock<HashMap<String, GameSlot>>>;

/// The polling engine. One instance serves all games; each game gets an
/// isolated loop, and the keyed registry here is the only state shared
/// between them.
pub struct PollingEngine {
    gateway: Arc<dyn Gateway>,
    settings: PollerSettings,
    games: Registry,
}

impl PollingEngine {
    #[must_use]
    pub fn new(gateway: Arc<dyn Gateway>, settings: PollerSettings) -> Self {
        Self {
            gateway,
            settings,
            games: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Start polling for a game. Returns the single-consumer channel the
    /// game's updates are delivered on, oldest comment first.
    ///
    /// The thread is shared, not snapshotted: rounds the publisher appends
    /// while polling runs are picked up by later ticks.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread's post identifier is empty or the
    /// game is already being polled.
    pub async fn initialize_game_polling(
        &self,
        thread: &SharedGameThread,
    ) -> Result<mpsc::Receiver<GameUpdate>, EngineError> {
        let post_id = thread.read().await.post_id.clone();
        if post_id.trim().is_empty() {
            return Err(EngineError::InvalidThread("empty post id".to_string()));
        }

        let key = game_key(&post_id);
        let mut games = self.games.write().await;
        if games.contains_key(&key) {
            return Err(EngineError::AlreadyActive(key));
        }

        let (tx, rx) = mpsc::channel(self.settings.channel_capacity);
        let cancel = CancellationToken::new();
        games.insert(
            key.clone(),
            GameSlot {
                state: PollingState {
                    is_active: true,
                    error_count: 0,
                    last_success: None,
                    current_interval: self.settings.base_interval,
                },
                cancel: cancel.clone(),
            },
        );
        drop(games);

        info!(key = %key, "Polling initialized");

        let game_loop = GameLoop {
            gateway: Arc::clone(&self.gateway),
            settings: self.settings.clone(),
            games: Arc::clone(&self.games),
            key,
            post_id,
            thread: Arc::clone(thread),
            tx,
            cancel,
        };
        tokio::spawn(game_loop.run());

        Ok(rx)
    }

    /// Read-only snapshot of a game's polling state. `None` means the game
    /// is not being polled, whether never started, explicitly stopped, or
    /// dropped by the circuit breaker.
    pub async fn polling_status(&self, key: &str) -> Option<PollingStatus> {
        let games = self.games.read().await;
        games.get(key).map(|slot| PollingStatus {
            is_active: slot.state.is_active,
            error_count: slot.state.error_count,
            last_success: slot.state.last_success,
            current_interval: slot.state.current_interval,
        })
    }

    /// Stop polling for one game and drop its state. Safe to call at any
    /// time, including while a tick is in flight. Returns whether the game
    /// was registered.
    pub async fn stop_polling(&self, key: &str) -> bool {
        let removed = self.games.write().await.remove(key);
        match removed {
            Some(slot) => {
                slot.cancel.cancel();
                info!(key = %key, "Polling stopped");
                true
            }
            None => false,
        }
    }

    /// Stop every game's polling loop. Returns how many were stopped.
    pub async fn stop_all_polling(&self) -> usize {
        let mut games = self.games.write().await;
        let count = games.len();
        for (key, slot) in games.drain() {
            slot.cancel.cancel();
            debug!(key = %key, "Polling stopped");
        }
        if count > 0 {
            info!(count, "All polling stopped");
        }
        count
    }
}

/// What a finished tick means for the loop.
enum TickOutcome {
    /// Fetch and delivery succeeded; carries the newest comment timestamp
    /// seen, which becomes the next fetch watermark.
    Success(Option<DateTime<Utc>>),
    /// The gateway failed; subject to backoff and the circuit breaker.
    Failure(anyhow::Error),
    /// The consumer dropped its receiver; polling is pointless now.
    ConsumerGone,
    /// Cancellation was observed mid-tick; discard everything.
    Cancelled,
}

struct GameLoop {
    gateway: Arc<dyn Gateway>,
    settings: PollerSettings,
    games: Registry,
    key: String,
    post_id: String,
    thread: SharedGameThread,
    tx: mpsc::Sender<GameUpdate>,
    cancel: CancellationToken,
}

impl GameLoop {
    async fn run(self) {
        let mut watermark: Option<DateTime<Utc>> = None;
        let mut delay = self.settings.base_interval;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    debug!(key = %self.key, "Polling loop cancelled");
                    return;
                }
                () = tokio::time::sleep(delay) => {}
            }

            match self.tick(watermark).await {
                TickOutcome::Success(newest) => {
                    if newest.is_some() {
                        watermark = newest;
                    }
                    match self.record_success().await {
                        Some(next) => delay = next,
                        None => return,
                    }
                }
                TickOutcome::Failure(e) => {
                    warn!(key = %self.key, "Poll tick failed: {e:#}");
                    match self.record_failure().await {
                        Some(next) => delay = next,
                        None => return,
                    }
                }
                TickOutcome::ConsumerGone => {
                    debug!(key = %self.key, "Update receiver dropped, stopping polling");
                    self.remove_own_entry().await;
                    return;
                }
                TickOutcome::Cancelled => {
                    debug!(key = %self.key, "Polling loop cancelled mid-tick");
                    return;
                }
            }
        }
    }

    /// Fetch new comments, decode them, and deliver updates oldest first.
    /// Comment creation time, not fetch order, decides delivery order: the
    /// platform can surface comments late and out of sequence.
    async fn tick(&self, since: Option<DateTime<Utc>>) -> TickOutcome {
        let mut comments = match self.gateway.list_comments(&self.post_id, since).await {
            Ok(comments) => comments,
            Err(e) => return TickOutcome::Failure(e),
        };
        comments.sort_by_key(|c| c.created_at);
        let newest = comments.last().map(|c| c.created_at);

        // Classification uses the live thread model, so rounds announced
        // since the last tick are recognized.
        let thread = self.thread.read().await.clone();

        for comment in &comments {
            let Some(update) = protocol::decode(comment, &thread) else {
                continue;
            };
            debug!(key = %self.key, comment_id = %comment.id, "Decoded update");
            tokio::select! {
                () = self.cancel.cancelled() => return TickOutcome::Cancelled,
                sent = self.tx.send(update) => {
                    if sent.is_err() {
                        return TickOutcome::ConsumerGone;
                    }
                }
            }
        }

        TickOutcome::Success(newest)
    }

    /// Reset the error state after a good tick. Returns the next delay, or
    /// `None` if the loop's registry entry is gone and it must exit.
    async fn record_success(&self) -> Option<Duration> {
        if self.cancel.is_cancelled() {
            return None;
        }
        let mut games = self.games.write().await;
        let slot = games.get_mut(&self.key)?;
        slot.state.error_count = 0;
        slot.state.last_success = Some(Utc::now());
        slot.state.current_interval = self.settings.base_interval;
        Some(self.settings.base_interval)
    }

    /// Bump the error counter and compute the backoff delay. Once the
    /// counter reaches the configured maximum the entry is deleted: the
    /// circuit breaker trips and only an explicit re-initialization brings
    /// the game back.
    async fn record_failure(&self) -> Option<Duration> {
        if self.cancel.is_cancelled() {
            return None;
        }
        let mut games = self.games.write().await;
        let slot = games.get_mut(&self.key)?;

        slot.state.error_count += 1;
        let errors = slot.state.error_count;

        if errors >= self.settings.max_consecutive_errors {
            games.remove(&self.key);
            warn!(
                key = %self.key,
                errors,
                "Too many consecutive poll failures, dropping polling state"
            );
            return None;
        }

        let backoff = backoff_delay(self.settings.base_interval, errors, self.settings.max_backoff);
        slot.state.current_interval = backoff;
        debug!(key = %self.key, errors, backoff_ms = backoff.as_millis() as u64, "Backing off");
        Some(backoff)
    }

    /// Delete this loop's registry entry, unless a stop already did.
    async fn remove_own_entry(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.games.write().await.remove(&self.key);
    }
}

/// Exponential backoff: `base * 2^errors`, capped.
fn backoff_delay(base: Duration, errors: u32, cap: Duration) -> Duration {
    let factor = 2u32.saturating_pow(errors.min(16));
    base.saturating_mul(factor).min(cap)
}
