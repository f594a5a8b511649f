//! Game entry points.
//!
//! Each call resolves the caller's seat, takes the game's lock, loads the
//! game, applies one engine operation, saves, and fans the result out. The
//! lock is held for the whole cycle and nothing else.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info};

use crate::board::{Color, Point};
use crate::config::Settings;
use crate::error::GameError;
use crate::events::{Broadcaster, Channel, GameEvent};
use crate::game::Game;
use crate::ids::{GameId, Player, PlayerId};
use crate::locks::GameLocks;
use crate::rating::{self, RatingChange};
use crate::rules::{self, MoveOutcome};
use crate::store::GameStore;
use crate::{territory, undo};

pub struct GameService {
    store: Arc<dyn GameStore>,
    hub: Arc<dyn Broadcaster>,
    locks: GameLocks,
    settings: Settings,
}

/// A loaded game, its lock, and the caller's seat.
struct Checkout {
    _guard: OwnedMutexGuard<()>,
    game: Game,
    color: Color,
}

impl GameService {
    pub fn new(store: Arc<dyn GameStore>, hub: Arc<dyn Broadcaster>, settings: Settings) -> Self {
        Self {
            store,
            hub,
            locks: GameLocks::new(),
            settings,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub(crate) fn store(&self) -> &dyn GameStore {
        self.store.as_ref()
    }

    pub(crate) fn hub(&self) -> &dyn Broadcaster {
        self.hub.as_ref()
    }

    pub(crate) fn locks(&self) -> &GameLocks {
        &self.locks
    }

    pub async fn register_player(&self, player: &Player) -> Result<(), GameError> {
        self.store.save_player(player).await?;
        Ok(())
    }

    pub async fn player(&self, id: PlayerId) -> Result<Player, GameError> {
        self.store
            .load_player(id)
            .await?
            .ok_or_else(|| GameError::player_not_found(id.to_string()))
    }

    pub async fn game(&self, id: GameId) -> Result<Game, GameError> {
        self.store
            .load_game(id)
            .await?
            .ok_or_else(|| GameError::game_not_found(id.to_string()))
    }

    async fn checkout(&self, game_id: GameId, player: PlayerId) -> Result<Checkout, GameError> {
        let guard = self.locks.lock(game_id).await;
        let game = self.game(game_id).await?;
        let color = game.color_of(player).ok_or(GameError::Unauthorized)?;
        Ok(Checkout {
            _guard: guard,
            game,
            color,
        })
    }

    /// Give up the lock, and forget it entirely once the game is over.
    fn finish(&self, checkout: Checkout) -> Game {
        let Checkout {
            _guard: guard,
            game,
            ..
        } = checkout;
        drop(guard);
        if game.status.is_terminal() {
            self.locks.release(game.id);
        }
        game
    }

    fn publish_update(&self, game: &Game) {
        self.hub.publish(
            &Channel::Game(game.id),
            GameEvent::GameUpdated {
                game: Box::new(game.clone()),
            },
        );
    }

    /// Seat two matched players in a fresh `waiting` game.
    pub async fn create_game(
        &self,
        black: PlayerId,
        white: PlayerId,
        size: usize,
        now: DateTime<Utc>,
    ) -> Result<Game, GameError> {
        let game = Game::new(GameId::new(), black, white, size, &self.settings, now)?;
        let mut black_player = self.player(black).await?;
        let mut white_player = self.player(white).await?;

        let _guard = self.locks.lock(game.id).await;
        self.store.save_game(&game).await?;
        for (player, color) in [
            (&mut black_player, Color::Black),
            (&mut white_player, Color::White),
        ] {
            player.active_game = Some(game.id);
            self.store.save_player(player).await?;
            self.hub
                .move_member(player.id, &Channel::Searching, &Channel::Game(game.id));
            self.hub.publish(
                &Channel::Player(player.id),
                GameEvent::MatchFound {
                    game_id: game.id,
                    color,
                    opponent: game.player(color.opponent()),
                },
            );
        }
        info!(game_id = %game.id, %black, %white, size, "game created");
        Ok(game)
    }

    /// Settle a game that just reached a terminal status: ratings, seat
    /// pointers, and the final broadcast.
    pub(crate) async fn conclude(&self, game: &Game) -> Result<Option<RatingChange>, GameError> {
        let mut black = self.player(game.black.player).await?;
        let mut white = self.player(game.white.player).await?;
        let winner = game.status.winner();
        let change = winner.map(|w| rating::apply_result(&mut black, &mut white, w));
        for player in [&mut black, &mut white] {
            if player.active_game == Some(game.id) {
                player.active_game = None;
            }
            self.store.save_player(player).await?;
        }

        let event = match winner {
            Some(_) => GameEvent::GameFinished {
                game_id: game.id,
                status: game.status,
                rating: change,
            },
            None => GameEvent::GameCancelled {
                game_id: game.id,
                status: game.status,
            },
        };
        self.hub.publish(&Channel::Game(game.id), event);
        info!(game_id = %game.id, status = %game.status, ?change, "game concluded");
        Ok(change)
    }

    async fn save_after_move(&self, game: &Game, outcome: MoveOutcome) -> Result<(), GameError> {
        match outcome {
            MoveOutcome::Ignored(reason) => {
                debug!(game_id = %game.id, ?reason, "move ignored");
            }
            MoveOutcome::Played { .. } => {
                self.store.save_game(game).await?;
                self.publish_update(game);
            }
            MoveOutcome::OutOfTime => {
                self.store.save_game(game).await?;
                self.conclude(game).await?;
            }
        }
        Ok(())
    }

    /// Place a stone. Illegal placements return the game unchanged.
    pub async fn place_stone(
        &self,
        game_id: GameId,
        player: PlayerId,
        pt: Point,
    ) -> Result<Game, GameError> {
        let mut c = self.checkout(game_id, player).await?;
        let outcome = rules::place_stone(&mut c.game, c.color, pt, Utc::now())?;
        self.save_after_move(&c.game, outcome).await?;
        Ok(self.finish(c))
    }

    pub async fn pass(&self, game_id: GameId, player: PlayerId) -> Result<Game, GameError> {
        let mut c = self.checkout(game_id, player).await?;
        let outcome = rules::pass(&mut c.game, c.color, Utc::now())?;
        self.save_after_move(&c.game, outcome).await?;
        Ok(self.finish(c))
    }

    pub async fn resign(&self, game_id: GameId, player: PlayerId) -> Result<Game, GameError> {
        let mut c = self.checkout(game_id, player).await?;
        rules::resign(&mut c.game, c.color, Utc::now())?;
        self.store.save_game(&c.game).await?;
        self.conclude(&c.game).await?;
        Ok(self.finish(c))
    }

    pub async fn cancel_game(&self, game_id: GameId, player: PlayerId) -> Result<Game, GameError> {
        let mut c = self.checkout(game_id, player).await?;
        rules::cancel_game(&mut c.game, c.color, Utc::now())?;
        self.store.save_game(&c.game).await?;
        self.conclude(&c.game).await?;
        Ok(self.finish(c))
    }

    pub async fn request_undo(&self, game_id: GameId, player: PlayerId) -> Result<Game, GameError> {
        let mut c = self.checkout(game_id, player).await?;
        undo::request_undo(&mut c.game, c.color, self.settings.undo_timeout, Utc::now())?;
        self.store.save_game(&c.game).await?;
        self.hub.publish(
            &Channel::Game(game_id),
            GameEvent::UndoRequested {
                game_id,
                by: c.color,
            },
        );
        Ok(self.finish(c))
    }

    pub async fn accept_undo(&self, game_id: GameId, player: PlayerId) -> Result<Game, GameError> {
        let mut c = self.checkout(game_id, player).await?;
        undo::accept_undo(&mut c.game, c.color, Utc::now())?;
        self.store.save_game(&c.game).await?;
        self.hub
            .publish(&Channel::Game(game_id), GameEvent::UndoAccepted { game_id });
        self.publish_update(&c.game);
        Ok(self.finish(c))
    }

    pub async fn reject_undo(&self, game_id: GameId, player: PlayerId) -> Result<Game, GameError> {
        let mut c = self.checkout(game_id, player).await?;
        undo::reject_undo(&mut c.game, c.color)?;
        self.store.save_game(&c.game).await?;
        self.hub.publish(
            &Channel::Game(game_id),
            GameEvent::UndoRejected {
                game_id,
                timed_out: false,
            },
        );
        Ok(self.finish(c))
    }

    /// Flip a territory region or a group's life during finishing.
    pub async fn negate_selection(
        &self,
        game_id: GameId,
        player: PlayerId,
        pt: Point,
    ) -> Result<Game, GameError> {
        let mut c = self.checkout(game_id, player).await?;
        territory::negate_selection(&mut c.game, pt)?;
        self.store.save_game(&c.game).await?;
        self.publish_update(&c.game);
        Ok(self.finish(c))
    }

    pub async fn cancel_finishing(
        &self,
        game_id: GameId,
        player: PlayerId,
    ) -> Result<Game, GameError> {
        let mut c = self.checkout(game_id, player).await?;
        territory::cancel_finishing(&mut c.game, Utc::now())?;
        self.store.save_game(&c.game).await?;
        self.publish_update(&c.game);
        Ok(self.finish(c))
    }

    pub async fn confirm_finishing(
        &self,
        game_id: GameId,
        player: PlayerId,
    ) -> Result<Game, GameError> {
        let mut c = self.checkout(game_id, player).await?;
        let winner = territory::confirm_finishing(&mut c.game, c.color, Utc::now())?;
        self.store.save_game(&c.game).await?;
        match winner {
            Some(_) => {
                self.conclude(&c.game).await?;
            }
            None => self.publish_update(&c.game),
        }
        Ok(self.finish(c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NotFoundKind;
    use crate::events::LocalHub;
    use crate::game::GameStatus;
    use crate::store::InMemoryStore;

    struct Fixture {
        service: GameService,
        hub: Arc<LocalHub>,
        black: PlayerId,
        white: PlayerId,
    }

    async fn setup() -> Fixture {
        let hub = Arc::new(LocalHub::default());
        let service = GameService::new(
            Arc::new(InMemoryStore::new()),
            hub.clone(),
            Settings::default(),
        );
        let black = Player::new("ayumi").with_elo(1180.0);
        let white = Player::new("sai").with_elo(1220.0);
        service.register_player(&black).await.unwrap();
        service.register_player(&white).await.unwrap();
        Fixture {
            service,
            hub,
            black: black.id,
            white: white.id,
        }
    }

    async fn new_game(f: &Fixture) -> GameId {
        f.service
            .create_game(f.black, f.white, 9, Utc::now())
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_create_game_seats_players() {
        let f = setup().await;
        f.hub.join(f.black, Channel::Searching);
        f.hub.join(f.white, Channel::Searching);
        let mut rx = f.hub.subscribe();

        let id = new_game(&f).await;
        let black = f.service.player(f.black).await.unwrap();
        assert_eq!(black.active_game, Some(id));
        assert!(f.hub.members(&Channel::Searching).is_empty());
        assert_eq!(f.hub.members(&Channel::Game(id)).len(), 2);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.channel, Channel::Player(f.black));
        assert!(matches!(
            first.event,
            GameEvent::MatchFound { color: Color::Black, opponent, .. } if opponent == f.white
        ));
    }

    #[tokio::test]
    async fn test_first_move_starts_game() {
        let f = setup().await;
        let id = new_game(&f).await;
        let game = f.service.place_stone(id, f.black, (3, 3)).await.unwrap();
        assert_eq!(game.status, GameStatus::Started);
        assert_eq!(f.service.game(id).await.unwrap().moves.len(), 1);
    }

    #[tokio::test]
    async fn test_illegal_placement_changes_nothing() {
        let f = setup().await;
        let id = new_game(&f).await;
        f.service.place_stone(id, f.black, (3, 3)).await.unwrap();
        let game = f.service.place_stone(id, f.white, (3, 3)).await.unwrap();
        assert_eq!(game.moves.len(), 1);
        assert_eq!(game, f.service.game(id).await.unwrap());
    }

    #[tokio::test]
    async fn test_rejections() {
        let f = setup().await;
        let id = new_game(&f).await;

        let outsider = PlayerId::new();
        let err = f.service.place_stone(id, outsider, (0, 0)).await.unwrap_err();
        assert!(matches!(err, GameError::Unauthorized));

        let err = f.service.place_stone(id, f.white, (0, 0)).await.unwrap_err();
        assert!(matches!(err, GameError::NotYourTurn));

        let err = f.service.pass(GameId::new(), f.black).await.unwrap_err();
        assert!(matches!(err, GameError::NotFound(NotFoundKind::Game, _)));
    }

    #[tokio::test]
    async fn test_resign_settles_ratings() {
        let f = setup().await;
        let id = new_game(&f).await;
        let mut rx = f.hub.subscribe();
        f.service.place_stone(id, f.black, (4, 4)).await.unwrap();
        let game = f.service.resign(id, f.white).await.unwrap();
        assert_eq!(game.status.winner(), Some(Color::Black));

        let black = f.service.player(f.black).await.unwrap();
        let white = f.service.player(f.white).await.unwrap();
        assert!(black.elo > 1180.0);
        assert!((black.elo + white.elo - 2400.0).abs() < 1e-9);
        assert_eq!(black.active_game, None);
        assert_eq!(white.active_game, None);

        let mut finished = None;
        while let Ok(delivery) = rx.try_recv() {
            if let GameEvent::GameFinished { rating, .. } = delivery.event {
                finished = rating;
            }
        }
        assert!(finished.is_some());
    }

    #[tokio::test]
    async fn test_cancel_waiting_game_keeps_ratings() {
        let f = setup().await;
        let id = new_game(&f).await;
        let game = f.service.cancel_game(id, f.white).await.unwrap();
        assert!(game.status.is_terminal());
        assert_eq!(game.status.winner(), None);
        let white = f.service.player(f.white).await.unwrap();
        assert_eq!(white.elo, 1220.0);
        assert_eq!(white.active_game, None);
    }

    #[tokio::test]
    async fn test_undo_round_trip() {
        let f = setup().await;
        let id = new_game(&f).await;
        f.service.place_stone(id, f.black, (2, 2)).await.unwrap();
        f.service.request_undo(id, f.black).await.unwrap();
        let err = f.service.accept_undo(id, f.black).await.unwrap_err();
        assert!(matches!(err, GameError::NotYourTurn));

        let game = f.service.accept_undo(id, f.white).await.unwrap();
        assert!(game.moves.is_empty());
        assert!(game.board.get((2, 2)).is_empty());
        assert_eq!(game.black.undo_rights, 2);
    }

    #[tokio::test]
    async fn test_two_passes_then_scoring() {
        let f = setup().await;
        let id = new_game(&f).await;
        f.service.place_stone(id, f.black, (4, 4)).await.unwrap();
        f.service.pass(id, f.white).await.unwrap();
        let game = f.service.pass(id, f.black).await.unwrap();
        assert_eq!(game.status, GameStatus::Finishing);

        f.service.confirm_finishing(id, f.black).await.unwrap();
        let game = f.service.confirm_finishing(id, f.white).await.unwrap();
        assert!(game.status.is_terminal());
        assert!(game.status.winner().is_some());
    }

    #[tokio::test]
    async fn test_cancel_finishing_resumes_play() {
        let f = setup().await;
        let id = new_game(&f).await;
        f.service.place_stone(id, f.black, (4, 4)).await.unwrap();
        f.service.pass(id, f.white).await.unwrap();
        f.service.pass(id, f.black).await.unwrap();
        f.service.confirm_finishing(id, f.black).await.unwrap();

        let game = f.service.cancel_finishing(id, f.white).await.unwrap();
        assert_eq!(game.status, GameStatus::Started);
        assert!(!game.black.confirmed);
        assert!(game.empty_groups.is_empty());

        let game = f.service.place_stone(id, f.white, (2, 2)).await.unwrap();
        assert_eq!(game.status, GameStatus::Started);
        assert_eq!(game.moves.len(), 4);
        let game = f.service.place_stone(id, f.black, (6, 6)).await.unwrap();
        assert_eq!(game.moves.len(), 5);
        let white = f.service.player(f.white).await.unwrap();
        assert_eq!(white.active_game, Some(id));
    }
}
