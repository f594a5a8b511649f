//! Fan-out seam: named events pushed to named groups of connected players.

use std::collections::HashSet;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::board::Color;
use crate::game::{Game, GameStatus};
use crate::ids::{GameId, PlayerId};
use crate::rating::RatingChange;

/// A broadcast group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Channel {
    /// Everyone sitting in the matchmaking queue.
    Searching,
    Game(GameId),
    Player(PlayerId),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GameEvent {
    MatchFound {
        game_id: GameId,
        color: Color,
        opponent: PlayerId,
    },
    GameUpdated {
        game: Box<Game>,
    },
    GameFinished {
        game_id: GameId,
        status: GameStatus,
        rating: Option<RatingChange>,
    },
    GameCancelled {
        game_id: GameId,
        status: GameStatus,
    },
    UndoRequested {
        game_id: GameId,
        by: Color,
    },
    UndoAccepted {
        game_id: GameId,
    },
    UndoRejected {
        game_id: GameId,
        timed_out: bool,
    },
}

impl GameEvent {
    pub fn name(&self) -> &'static str {
        match self {
            GameEvent::MatchFound { .. } => "match_found",
            GameEvent::GameUpdated { .. } => "game_updated",
            GameEvent::GameFinished { .. } => "game_finished",
            GameEvent::GameCancelled { .. } => "game_cancelled",
            GameEvent::UndoRequested { .. } => "undo_requested",
            GameEvent::UndoAccepted { .. } => "undo_accepted",
            GameEvent::UndoRejected { .. } => "undo_rejected",
        }
    }
}

pub trait Broadcaster: Send + Sync {
    /// Deliver `event` to every member of `channel`. Never blocks.
    fn publish(&self, channel: &Channel, event: GameEvent);

    /// Move `player`'s connection from one group to another.
    fn move_member(&self, player: PlayerId, from: &Channel, to: &Channel);
}

/// What subscribers of a [`LocalHub`] receive.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub channel: Channel,
    pub recipients: Vec<PlayerId>,
    pub event: GameEvent,
}

/// In-process fan-out. Membership is tracked per channel; deliveries go out
/// on a tokio broadcast channel for whoever is listening.
pub struct LocalHub {
    members: DashMap<Channel, HashSet<PlayerId>>,
    sender: broadcast::Sender<Delivery>,
}

impl Default for LocalHub {
    fn default() -> Self {
        Self::new(256)
    }
}

impl LocalHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            members: DashMap::new(),
            sender,
        }
    }

    pub fn join(&self, player: PlayerId, channel: Channel) {
        self.members.entry(channel).or_default().insert(player);
    }

    pub fn leave(&self, player: PlayerId, channel: &Channel) {
        if let Some(mut set) = self.members.get_mut(channel) {
            set.remove(&player);
        }
        self.members.remove_if(channel, |_, set| set.is_empty());
    }

    pub fn members(&self, channel: &Channel) -> Vec<PlayerId> {
        self.members
            .get(channel)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Delivery> {
        self.sender.subscribe()
    }
}

impl Broadcaster for LocalHub {
    fn publish(&self, channel: &Channel, event: GameEvent) {
        let recipients = self.members(channel);
        trace!(?channel, event = event.name(), recipients = recipients.len(), "publish");
        // No subscribers is not an error.
        let _ = self.sender.send(Delivery {
            channel: channel.clone(),
            recipients,
            event,
        });
    }

    fn move_member(&self, player: PlayerId, from: &Channel, to: &Channel) {
        self.leave(player, from);
        self.join(player, to.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_move_member() {
        let hub = LocalHub::default();
        let p = PlayerId::new();
        let game = Channel::Game(GameId::new());
        hub.join(p, Channel::Searching);
        hub.move_member(p, &Channel::Searching, &game);
        assert!(hub.members(&Channel::Searching).is_empty());
        assert_eq!(hub.members(&game), vec![p]);
    }

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let hub = LocalHub::default();
        let mut rx = hub.subscribe();
        let p = PlayerId::new();
        let game_id = GameId::new();
        let channel = Channel::Game(game_id);
        hub.join(p, channel.clone());

        hub.publish(&channel, GameEvent::UndoAccepted { game_id });
        let delivery = rx.recv().await.unwrap();
        assert_eq!(delivery.channel, channel);
        assert_eq!(delivery.recipients, vec![p]);
        assert_eq!(delivery.event.name(), "undo_accepted");
    }

    #[test]
    fn test_event_json_shape() {
        let game_id = GameId::new();
        let json = serde_json::to_value(GameEvent::UndoRejected {
            game_id,
            timed_out: true,
        })
        .unwrap();
        assert_eq!(json["event"], "undo_rejected");
        assert_eq!(json["timed_out"], true);
    }
}
