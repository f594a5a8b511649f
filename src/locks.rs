//! One async mutex per game, so read-modify-write cycles never interleave.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::ids::GameId;

#[derive(Default)]
pub struct GameLocks {
    locks: DashMap<GameId, Arc<Mutex<()>>>,
}

impl GameLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `id`. Access ends when the guard drops.
    pub async fn lock(&self, id: GameId) -> OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }

    /// Forget the lock of a game nobody will touch again.
    pub fn release(&self, id: GameId) {
        self.locks.remove_if(&id, |_, m| Arc::strong_count(m) == 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_game_is_exclusive() {
        let locks = Arc::new(GameLocks::new());
        let id = GameId::new();
        let guard = locks.lock(id).await;

        let other = locks.clone();
        let waiter = tokio::spawn(async move {
            let _g = other.lock(id).await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_different_games_do_not_block() {
        let locks = GameLocks::new();
        let _a = locks.lock(GameId::new()).await;
        let _b = locks.lock(GameId::new()).await;
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_release_keeps_held_locks() {
        let locks = GameLocks::new();
        let id = GameId::new();
        let guard = locks.lock(id).await;
        locks.release(id);
        assert_eq!(locks.len(), 1);
        drop(guard);
        locks.release(id);
        assert!(locks.is_empty());
    }
}
