//! Per-round state machines.
//!
//! Every machine is pure: it receives a random source and returns the
//! [`Effect`]s the session must apply. Timers are requested through
//! [`Effect::Schedule`] and fed back through `on_timer`, so a machine never
//! sleeps and never outlives the round that owns it.

pub mod combat;
pub mod parity;
pub mod reaction;
pub mod stepping_stone;
pub mod trace;
pub mod tug_of_war;

use std::collections::BTreeMap;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::{BridgeMode, RoundsConfig};
use crate::error::RoundError;
use crate::types::{PlayerAction, PlayerId, RoundKind};

use self::combat::Combat;
use self::parity::ParityGame;
use self::reaction::Reaction;
use self::stepping_stone::{SoloBridge, TurnBridge};
use self::trace::Trace;
use self::tug_of_war::TugOfWar;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimerKind {
    /// One-second countdown tick.
    Countdown,
    /// Current light signal has run out.
    Signal,
    /// Movement progress tick.
    Movement,
    /// Computer opponent pulls the rope.
    OpponentPull,
    /// Suspense delay before an outcome is revealed.
    Reveal,
}

/// A timer requested by a round. `player` routes it to a per-player machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timer {
    pub kind: TimerKind,
    pub player: Option<PlayerId>,
}

impl Timer {
    pub fn shared(kind: TimerKind) -> Self {
        Self { kind, player: None }
    }

    pub fn for_player(kind: TimerKind, player: &str) -> Self {
        Self {
            kind,
            player: Some(player.to_string()),
        }
    }
}

/// What a transition asks the session to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Schedule(Timer, Duration),
    Survived(PlayerId),
    Eliminated(PlayerId),
    /// A shared round has nothing left to resolve.
    Finished,
}

impl Effect {
    pub fn after_ms(timer: Timer, ms: u64) -> Self {
        Self::Schedule(timer, Duration::from_millis(ms))
    }

    pub fn after_secs(timer: Timer, secs: u64) -> Self {
        Self::Schedule(timer, Duration::from_secs(secs))
    }
}

/// A mini-game each player plays on their own instance.
pub trait SoloRound: Sized {
    type Settings: Clone + std::fmt::Debug;

    const KIND: RoundKind;

    /// Creates the instance in its playing phase.
    fn start<R: Rng + ?Sized>(
        player: &str,
        settings: &Self::Settings,
        rng: &mut R,
    ) -> (Self, Vec<Effect>);

    fn act<R: Rng + ?Sized>(
        &mut self,
        action: &PlayerAction,
        rng: &mut R,
    ) -> Result<Vec<Effect>, RoundError>;

    fn on_timer<R: Rng + ?Sized>(&mut self, kind: TimerKind, rng: &mut R) -> Vec<Effect>;

    fn status(&self) -> serde_json::Value;

    fn is_finished(&self) -> bool;
}

/// Per-player instances of a [`SoloRound`]. A player with no entry is still
/// waiting to start.
#[derive(Debug, Clone)]
pub struct PerPlayer<M: SoloRound> {
    settings: M::Settings,
    games: BTreeMap<PlayerId, M>,
}

impl<M: SoloRound> PerPlayer<M> {
    pub fn new(settings: M::Settings) -> Self {
        Self {
            settings,
            games: BTreeMap::new(),
        }
    }

    pub fn start<R: Rng + ?Sized>(
        &mut self,
        player: &str,
        rng: &mut R,
    ) -> Result<Vec<Effect>, RoundError> {
        if self.games.contains_key(player) {
            return Err(RoundError::AlreadyStarted);
        }
        let (game, effects) = M::start(player, &self.settings, rng);
        self.games.insert(player.to_string(), game);
        Ok(effects)
    }

    pub fn act<R: Rng + ?Sized>(
        &mut self,
        player: &str,
        action: &PlayerAction,
        rng: &mut R,
    ) -> Result<Vec<Effect>, RoundError> {
        let game = self.games.get_mut(player).ok_or(RoundError::NotStarted)?;
        if game.is_finished() {
            return Err(RoundError::Finished);
        }
        game.act(action, rng)
    }

    pub fn on_timer<R: Rng + ?Sized>(&mut self, timer: &Timer, rng: &mut R) -> Vec<Effect> {
        let Some(game) = timer.player.as_ref().and_then(|p| self.games.get_mut(p)) else {
            return Vec::new();
        };
        if game.is_finished() {
            return Vec::new();
        }
        game.on_timer(timer.kind, rng)
    }

    /// Drops a player's instance; its pending timers then find nothing.
    pub fn remove(&mut self, player: &str) {
        self.games.remove(player);
    }

    pub fn status(&self, player: &str) -> serde_json::Value {
        match self.games.get(player) {
            Some(game) => game.status(),
            None => serde_json::json!({ "phase": "waiting" }),
        }
    }
}

/// Stepping-stone round in whichever mode the session runs it.
#[derive(Debug, Clone)]
pub enum SteppingStone {
    Turns(TurnBridge),
    Solo(PerPlayer<SoloBridge>),
}

/// The sub-state of the session's current round.
#[derive(Debug, Clone)]
pub enum ActiveRound {
    Reaction(Reaction),
    Trace(PerPlayer<Trace>),
    TugOfWar(TugOfWar),
    Parity(PerPlayer<ParityGame>),
    SteppingStone(SteppingStone),
    Combat(PerPlayer<Combat>),
}

impl ActiveRound {
    /// Creates the machine for `kind` in its waiting phase.
    pub fn new(kind: RoundKind, config: &RoundsConfig) -> Self {
        match kind {
            RoundKind::Reaction => Self::Reaction(Reaction::new(config.reaction.clone())),
            RoundKind::Tracing => Self::Trace(PerPlayer::new(config.tracing.clone())),
            RoundKind::TugOfWar => Self::TugOfWar(TugOfWar::new(config.tug_of_war.clone())),
            RoundKind::Parity => Self::Parity(PerPlayer::new(config.parity.clone())),
            RoundKind::SteppingStone => {
                let settings = config.stepping_stone.clone();
                Self::SteppingStone(match settings.mode {
                    BridgeMode::Turns => SteppingStone::Turns(TurnBridge::new(settings)),
                    BridgeMode::Solo => SteppingStone::Solo(PerPlayer::new(settings)),
                })
            }
            RoundKind::Combat => Self::Combat(PerPlayer::new(config.combat.clone())),
        }
    }

    pub fn kind(&self) -> RoundKind {
        match self {
            Self::Reaction(_) => RoundKind::Reaction,
            Self::Trace(_) => RoundKind::Tracing,
            Self::TugOfWar(_) => RoundKind::TugOfWar,
            Self::Parity(_) => RoundKind::Parity,
            Self::SteppingStone(_) => RoundKind::SteppingStone,
            Self::Combat(_) => RoundKind::Combat,
        }
    }

    /// Whether every participant sees the same state.
    pub fn is_shared(&self) -> bool {
        match self {
            Self::Reaction(_) | Self::SteppingStone(SteppingStone::Turns(_)) => true,
            Self::TugOfWar(tug) => tug.is_shared(),
            _ => false,
        }
    }

    /// Whether finishing this round should advance the session by itself.
    pub fn is_cooperative(&self) -> bool {
        match self {
            Self::SteppingStone(SteppingStone::Turns(_)) => true,
            Self::TugOfWar(tug) => tug.is_teams(),
            _ => false,
        }
    }

    /// `waiting -> playing`. Shared rounds start for all `alive` players at
    /// once; per-player rounds start for `player` only.
    pub fn start<R: Rng + ?Sized>(
        &mut self,
        player: Option<&str>,
        alive: &[PlayerId],
        rng: &mut R,
    ) -> Result<Vec<Effect>, RoundError> {
        match self {
            Self::Reaction(game) => game.start(alive, rng),
            Self::TugOfWar(game) => game.start(player, alive, rng),
            Self::SteppingStone(SteppingStone::Turns(game)) => game.start(alive, rng),
            Self::Trace(games) => games.start(player.ok_or(RoundError::NotParticipant)?, rng),
            Self::Parity(games) => games.start(player.ok_or(RoundError::NotParticipant)?, rng),
            Self::SteppingStone(SteppingStone::Solo(games)) => {
                games.start(player.ok_or(RoundError::NotParticipant)?, rng)
            }
            Self::Combat(games) => games.start(player.ok_or(RoundError::NotParticipant)?, rng),
        }
    }

    pub fn act<R: Rng + ?Sized>(
        &mut self,
        player: &str,
        action: &PlayerAction,
        rng: &mut R,
    ) -> Result<Vec<Effect>, RoundError> {
        match self {
            Self::Reaction(game) => game.act(player, action),
            Self::Trace(games) => games.act(player, action, rng),
            Self::TugOfWar(game) => game.act(player, action, rng),
            Self::Parity(games) => games.act(player, action, rng),
            Self::SteppingStone(SteppingStone::Turns(game)) => game.act(player, action),
            Self::SteppingStone(SteppingStone::Solo(games)) => games.act(player, action, rng),
            Self::Combat(games) => games.act(player, action, rng),
        }
    }

    pub fn on_timer<R: Rng + ?Sized>(&mut self, timer: &Timer, rng: &mut R) -> Vec<Effect> {
        match self {
            Self::Reaction(game) => game.on_timer(timer.kind, rng),
            Self::Trace(games) => games.on_timer(timer, rng),
            Self::TugOfWar(game) => game.on_timer(timer, rng),
            Self::Parity(games) => games.on_timer(timer, rng),
            Self::SteppingStone(SteppingStone::Turns(game)) => game.on_timer(timer.kind),
            Self::SteppingStone(SteppingStone::Solo(games)) => games.on_timer(timer, rng),
            Self::Combat(games) => games.on_timer(timer, rng),
        }
    }

    /// A player was eliminated from outside the round (by the admin).
    pub fn remove_player(&mut self, player: &str) -> Vec<Effect> {
        match self {
            Self::Reaction(game) => game.remove_player(player),
            Self::Trace(games) => {
                games.remove(player);
                Vec::new()
            }
            Self::TugOfWar(game) => game.remove_player(player),
            Self::Parity(games) => {
                games.remove(player);
                Vec::new()
            }
            Self::SteppingStone(SteppingStone::Turns(game)) => game.remove_player(player),
            Self::SteppingStone(SteppingStone::Solo(games)) => {
                games.remove(player);
                Vec::new()
            }
            Self::Combat(games) => {
                games.remove(player);
                Vec::new()
            }
        }
    }

    /// A player's socket went away mid-round.
    pub fn player_disconnected(&mut self, player: &str) {
        match self {
            Self::Reaction(game) => game.release(player),
            Self::SteppingStone(SteppingStone::Turns(game)) => game.player_left(player),
            _ => {}
        }
    }

    pub fn player_reconnected(&mut self, player: &str) {
        if let Self::SteppingStone(SteppingStone::Turns(game)) = self {
            game.player_returned(player);
        }
    }

    /// Status as seen by `player`: the shared state, or their own instance.
    pub fn status_for(&self, player: &str) -> serde_json::Value {
        match self {
            Self::Reaction(game) => game.status(),
            Self::Trace(games) => games.status(player),
            Self::TugOfWar(game) => game.status_for(player),
            Self::Parity(games) => games.status(player),
            Self::SteppingStone(SteppingStone::Turns(game)) => game.status(),
            Self::SteppingStone(SteppingStone::Solo(games)) => games.status(player),
            Self::Combat(games) => games.status(player),
        }
    }

    /// Status of a shared round, for spectators such as the admin.
    pub fn shared_status(&self) -> Option<serde_json::Value> {
        match self {
            Self::Reaction(game) => Some(game.status()),
            Self::SteppingStone(SteppingStone::Turns(game)) => Some(game.status()),
            Self::TugOfWar(game) => game.shared_status(),
            _ => None,
        }
    }
}
