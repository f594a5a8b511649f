//! Persistence seam.
//!
//! Games are read and written whole; callers hold the game's lock from
//! [`crate::locks::GameLocks`] across each load/save pair.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::StoreError;
use crate::game::{Game, GameStatus};
use crate::ids::{GameId, Player, PlayerId};

#[async_trait]
pub trait GameStore: Send + Sync {
    async fn load_game(&self, id: GameId) -> Result<Option<Game>, StoreError>;

    async fn save_game(&self, game: &Game) -> Result<(), StoreError>;

    /// Ids of games currently in any of `statuses`.
    async fn game_ids_with_status(
        &self,
        statuses: &[GameStatus],
    ) -> Result<Vec<GameId>, StoreError>;

    async fn load_player(&self, id: PlayerId) -> Result<Option<Player>, StoreError>;

    async fn save_player(&self, player: &Player) -> Result<(), StoreError>;
}

/// Process-local store.
#[derive(Default)]
pub struct InMemoryStore {
    games: RwLock<HashMap<GameId, Game>>,
    players: RwLock<HashMap<PlayerId, Player>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GameStore for InMemoryStore {
    async fn load_game(&self, id: GameId) -> Result<Option<Game>, StoreError> {
        Ok(self.games.read().get(&id).cloned())
    }

    async fn save_game(&self, game: &Game) -> Result<(), StoreError> {
        self.games.write().insert(game.id, game.clone());
        Ok(())
    }

    async fn game_ids_with_status(
        &self,
        statuses: &[GameStatus],
    ) -> Result<Vec<GameId>, StoreError> {
        Ok(self
            .games
            .read()
            .values()
            .filter(|g| statuses.contains(&g.status))
            .map(|g| g.id)
            .collect())
    }

    async fn load_player(&self, id: PlayerId) -> Result<Option<Player>, StoreError> {
        Ok(self.players.read().get(&id).cloned())
    }

    async fn save_player(&self, player: &Player) -> Result<(), StoreError> {
        self.players.write().insert(player.id, player.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use chrono::Utc;

    #[tokio::test]
    async fn test_round_trip_and_status_query() {
        let store = InMemoryStore::new();
        let game = Game::new(
            GameId::new(),
            PlayerId::new(),
            PlayerId::new(),
            9,
            &Settings::default(),
            Utc::now(),
        )
        .unwrap();
        store.save_game(&game).await.unwrap();

        assert_eq!(store.load_game(game.id).await.unwrap(), Some(game.clone()));
        assert!(store.load_game(GameId::new()).await.unwrap().is_none());

        let waiting = store
            .game_ids_with_status(&[GameStatus::Waiting])
            .await
            .unwrap();
        assert_eq!(waiting, vec![game.id]);
        let started = store
            .game_ids_with_status(&[GameStatus::Started])
            .await
            .unwrap();
        assert!(started.is_empty());
    }

    #[tokio::test]
    async fn test_players() {
        let store = InMemoryStore::new();
        let player = Player::new("kim");
        store.save_player(&player).await.unwrap();
        assert_eq!(store.load_player(player.id).await.unwrap(), Some(player));
    }
}
