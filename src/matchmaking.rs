//! Elo-proximity matchmaking.
//!
//! Queued players are paired oldest first. The elo gap a pair may have
//! widens with how long both sides have waited; see [`MATCH_TOLERANCE`].

use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::constants::{BOARD_SIZES, MATCH_MAX_WAIT_SECS, MATCH_TOLERANCE};
use crate::error::GameError;
use crate::game::Game;
use crate::ids::{Player, PlayerId};
use crate::service::GameService;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    pub board_size: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    pub player: PlayerId,
    pub elo: f64,
    pub preferences: Preferences,
    pub joined_at: DateTime<Utc>,
}

/// Seconds both sides must have waited before a pair this far apart is made.
pub fn required_wait(gap: f64) -> i64 {
    MATCH_TOLERANCE
        .iter()
        .find(|(bound, _)| gap < *bound)
        .map_or(MATCH_MAX_WAIT_SECS, |&(_, wait)| wait)
}

pub fn can_pair(a: &QueueEntry, b: &QueueEntry, now: DateTime<Utc>) -> bool {
    let waited = (now - a.joined_at)
        .num_seconds()
        .min((now - b.joined_at).num_seconds());
    waited >= required_wait((a.elo - b.elo).abs())
}

/// Greedy first-fit pairing. Each entry, oldest first, takes the first
/// later entry it can pair with.
pub fn find_pairs(entries: &[QueueEntry], now: DateTime<Utc>) -> Vec<(QueueEntry, QueueEntry)> {
    let mut sorted = entries.to_vec();
    sorted.sort_by_key(|e| e.joined_at);

    let mut matched = vec![false; sorted.len()];
    let mut pairs = Vec::new();
    for i in 0..sorted.len() {
        if matched[i] {
            continue;
        }
        for j in i + 1..sorted.len() {
            if !matched[j] && can_pair(&sorted[i], &sorted[j], now) {
                matched[i] = true;
                matched[j] = true;
                pairs.push((sorted[i].clone(), sorted[j].clone()));
                break;
            }
        }
    }
    pairs
}

/// Black and White for a pair: the lower rating takes Black.
pub fn seat(a: &QueueEntry, b: &QueueEntry) -> (PlayerId, PlayerId) {
    let a_black = if a.elo == b.elo {
        fastrand::bool()
    } else {
        a.elo < b.elo
    };
    if a_black {
        (a.player, b.player)
    } else {
        (b.player, a.player)
    }
}

#[derive(Default)]
struct QueueState {
    entries: Vec<QueueEntry>,
    ticker: Option<JoinHandle<()>>,
}

/// The shared queue plus its periodic matcher. The matcher runs only while
/// at least two players are queued.
pub struct Matchmaker {
    service: Arc<GameService>,
    state: Mutex<QueueState>,
}

impl Matchmaker {
    pub fn new(service: Arc<GameService>) -> Arc<Self> {
        Arc::new(Self {
            service,
            state: Mutex::new(QueueState::default()),
        })
    }

    /// Queue `player`. Returns `false` if they were already queued.
    pub fn enqueue(
        self: &Arc<Self>,
        player: &Player,
        preferences: Preferences,
        now: DateTime<Utc>,
    ) -> Result<bool, GameError> {
        if let Some(size) = preferences.board_size.filter(|s| !BOARD_SIZES.contains(s)) {
            return Err(GameError::InvalidBoardSize(size));
        }
        let mut state = self.state.lock();
        if state.entries.iter().any(|e| e.player == player.id) {
            return Ok(false);
        }
        state.entries.push(QueueEntry {
            player: player.id,
            elo: player.elo,
            preferences,
            joined_at: now,
        });
        debug!(player_id = %player.id, queued = state.entries.len(), "enqueued");
        self.ensure_running(&mut state);
        Ok(true)
    }

    fn ensure_running(self: &Arc<Self>, state: &mut QueueState) {
        if state.entries.len() >= 2 && state.ticker.is_none() {
            state.ticker = Some(self.spawn_ticker());
        }
    }

    /// Leave the queue. Returns `false` if `player` was not queued.
    pub fn dequeue(&self, player: PlayerId) -> bool {
        let mut state = self.state.lock();
        let before = state.entries.len();
        state.entries.retain(|e| e.player != player);
        let removed = state.entries.len() < before;
        if removed {
            debug!(player_id = %player, queued = state.entries.len(), "dequeued");
        }
        if state.entries.len() < 2 {
            stop(&mut state);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    pub fn is_queued(&self, player: PlayerId) -> bool {
        self.state.lock().entries.iter().any(|e| e.player == player)
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().ticker.is_some()
    }

    fn spawn_ticker(self: &Arc<Self>) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let period = self.service.settings().tick_period;
        tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(this) = weak.upgrade() else { break };
                this.tick_at(Utc::now()).await;
            }
        })
    }

    /// One matching pass. Matched players leave the queue before their
    /// games are created, so the queue lock is never held across I/O. A pair
    /// whose game cannot be created goes back in with its original join
    /// times.
    pub async fn tick_at(self: &Arc<Self>, now: DateTime<Utc>) -> Vec<Game> {
        let pairs = {
            let mut state = self.state.lock();
            let pairs = find_pairs(&state.entries, now);
            state.entries.retain(|e| {
                !pairs
                    .iter()
                    .any(|(a, b)| a.player == e.player || b.player == e.player)
            });
            pairs
        };

        let mut games = Vec::with_capacity(pairs.len());
        let mut failed = Vec::new();
        for (a, b) in pairs {
            let (black, white) = seat(&a, &b);
            let size = a
                .preferences
                .board_size
                .or(b.preferences.board_size)
                .unwrap_or(self.service.settings().board_size);
            match self.service.create_game(black, white, size, now).await {
                Ok(game) => {
                    info!(
                        game_id = %game.id,
                        %black,
                        %white,
                        gap = (a.elo - b.elo).abs(),
                        "match made"
                    );
                    games.push(game);
                }
                Err(err) => {
                    warn!(%black, %white, %err, "failed to create matched game, requeueing");
                    failed.push(a);
                    failed.push(b);
                }
            }
        }

        let ticker = {
            let mut state = self.state.lock();
            for entry in failed {
                if !state.entries.iter().any(|e| e.player == entry.player) {
                    state.entries.push(entry);
                }
            }
            if state.entries.len() < 2 {
                state.ticker.take()
            } else {
                self.ensure_running(&mut state);
                None
            }
        };
        // May be the task running this tick; it stops at its next await.
        if let Some(handle) = ticker {
            handle.abort();
        }
        games
    }
}

fn stop(state: &mut QueueState) {
    if let Some(handle) = state.ticker.take() {
        handle.abort();
        debug!("matcher stopped");
    }
}

impl Drop for Matchmaker {
    fn drop(&mut self) {
        stop(self.state.get_mut());
    }
}
