//! Tug of war, either two teams of players or each player against the house.

use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use super::{Effect, PerPlayer, SoloRound, Timer, TimerKind};
use crate::config::{TugMode, TugOfWarSettings};
use crate::error::RoundError;
use crate::types::{PlayerAction, PlayerId, RoundKind};

pub const MAX_STRENGTH: u8 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TugPhase {
    Playing,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Team {
    One,
    Two,
}

/// Team variant: the whole field split in two.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamTug {
    pub phase: TugPhase,
    pub remaining_secs: u32,
    pub team1: Vec<PlayerId>,
    pub team2: Vec<PlayerId>,
    pub team1_strength: u8,
    pub team2_strength: u8,
    pub winner: Option<Team>,
    pull_strength: u8,
}

impl TeamTug {
    /// Shuffles `alive` and gives team 1 the larger half.
    pub fn start<R: Rng + ?Sized>(
        alive: &[PlayerId],
        settings: &TugOfWarSettings,
        rng: &mut R,
    ) -> (Self, Vec<Effect>) {
        let mut shuffled = alive.to_vec();
        shuffled.shuffle(rng);
        let team2 = shuffled.split_off(shuffled.len().div_ceil(2));

        let game = Self {
            phase: TugPhase::Playing,
            remaining_secs: settings.duration_secs,
            team1: shuffled,
            team2,
            team1_strength: 0,
            team2_strength: 0,
            winner: None,
            pull_strength: settings.pull_strength,
        };
        tracing::debug!(
            team1 = game.team1.len(),
            team2 = game.team2.len(),
            "tug of war teams drawn"
        );
        (game, vec![Effect::after_secs(Timer::shared(TimerKind::Countdown), 1)])
    }

    pub fn team_of(&self, player: &str) -> Option<Team> {
        if self.team1.iter().any(|p| p == player) {
            Some(Team::One)
        } else if self.team2.iter().any(|p| p == player) {
            Some(Team::Two)
        } else {
            None
        }
    }

    pub fn pull(&mut self, player: &str) -> Result<Vec<Effect>, RoundError> {
        if self.phase == TugPhase::Finished {
            return Err(RoundError::Finished);
        }
        let strength = match self.team_of(player).ok_or(RoundError::NotParticipant)? {
            Team::One => &mut self.team1_strength,
            Team::Two => &mut self.team2_strength,
        };
        *strength = strength.saturating_add(self.pull_strength).min(MAX_STRENGTH);
        if *strength >= MAX_STRENGTH {
            return Ok(self.finish());
        }
        Ok(Vec::new())
    }

    pub fn on_timer(&mut self, kind: TimerKind) -> Vec<Effect> {
        if kind != TimerKind::Countdown || self.phase == TugPhase::Finished {
            return Vec::new();
        }
        self.remaining_secs = self.remaining_secs.saturating_sub(1);
        if self.remaining_secs == 0 {
            return self.finish();
        }
        vec![Effect::after_secs(Timer::shared(TimerKind::Countdown), 1)]
    }

    pub fn remove_player(&mut self, player: &str) {
        self.team1.retain(|p| p != player);
        self.team2.retain(|p| p != player);
    }

    /// Team 1 needs the strictly higher total; ties go to team 2.
    fn finish(&mut self) -> Vec<Effect> {
        self.phase = TugPhase::Finished;
        let winner = if self.team1_strength > self.team2_strength {
            Team::One
        } else {
            Team::Two
        };
        self.winner = Some(winner);
        let (winners, losers) = match winner {
            Team::One => (&self.team1, &self.team2),
            Team::Two => (&self.team2, &self.team1),
        };
        let mut effects: Vec<Effect> = winners.iter().cloned().map(Effect::Survived).collect();
        effects.extend(losers.iter().cloned().map(Effect::Eliminated));
        effects.push(Effect::Finished);
        effects
    }

    pub fn status(&self) -> serde_json::Value {
        serde_json::json!({
            "mode": "teams",
            "phase": self.phase,
            "remaining": self.remaining_secs,
            "team1": self.team1,
            "team2": self.team2,
            "team1Strength": self.team1_strength,
            "team2Strength": self.team2_strength,
            "winner": self.winner,
        })
    }
}

/// Solo variant: one player against an opponent that pulls on its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoloTug {
    pub player: PlayerId,
    pub phase: TugPhase,
    pub remaining_secs: u32,
    pub player_strength: u8,
    pub opponent_strength: u8,
    pub won: Option<bool>,
    settings: TugOfWarSettings,
}

impl SoloTug {
    fn finish(&mut self, won: bool) -> Vec<Effect> {
        self.phase = TugPhase::Finished;
        self.won = Some(won);
        if won {
            vec![Effect::Survived(self.player.clone())]
        } else {
            vec![Effect::Eliminated(self.player.clone())]
        }
    }
}

impl SoloRound for SoloTug {
    type Settings = TugOfWarSettings;

    const KIND: RoundKind = RoundKind::TugOfWar;

    fn start<R: Rng + ?Sized>(
        player: &str,
        settings: &TugOfWarSettings,
        _rng: &mut R,
    ) -> (Self, Vec<Effect>) {
        let game = Self {
            player: player.to_string(),
            phase: TugPhase::Playing,
            remaining_secs: settings.duration_secs,
            player_strength: 0,
            opponent_strength: 0,
            won: None,
            settings: settings.clone(),
        };
        let effects = vec![
            Effect::after_secs(Timer::for_player(TimerKind::Countdown, player), 1),
            Effect::after_ms(
                Timer::for_player(TimerKind::OpponentPull, player),
                settings.opponent_tick_ms,
            ),
        ];
        (game, effects)
    }

    fn act<R: Rng + ?Sized>(
        &mut self,
        action: &PlayerAction,
        _rng: &mut R,
    ) -> Result<Vec<Effect>, RoundError> {
        if *action != PlayerAction::Pull {
            return Err(RoundError::WrongAction(Self::KIND));
        }
        self.player_strength = self
            .player_strength
            .saturating_add(self.settings.pull_strength)
            .min(MAX_STRENGTH);
        if self.player_strength >= MAX_STRENGTH {
            return Ok(self.finish(true));
        }
        Ok(Vec::new())
    }

    fn on_timer<R: Rng + ?Sized>(&mut self, kind: TimerKind, _rng: &mut R) -> Vec<Effect> {
        if self.is_finished() {
            return Vec::new();
        }
        match kind {
            TimerKind::OpponentPull => {
                self.opponent_strength = self
                    .opponent_strength
                    .saturating_add(self.settings.opponent_strength)
                    .min(MAX_STRENGTH);
                if self.opponent_strength >= MAX_STRENGTH {
                    return self.finish(false);
                }
                vec![Effect::after_ms(
                    Timer::for_player(TimerKind::OpponentPull, &self.player),
                    self.settings.opponent_tick_ms,
                )]
            }
            TimerKind::Countdown => {
                self.remaining_secs = self.remaining_secs.saturating_sub(1);
                if self.remaining_secs == 0 {
                    let won = self.player_strength > self.opponent_strength;
                    return self.finish(won);
                }
                vec![Effect::after_secs(
                    Timer::for_player(TimerKind::Countdown, &self.player),
                    1,
                )]
            }
            _ => Vec::new(),
        }
    }

    fn status(&self) -> serde_json::Value {
        serde_json::json!({
            "mode": "solo",
            "phase": self.phase,
            "remaining": self.remaining_secs,
            "playerStrength": self.player_strength,
            "opponentStrength": self.opponent_strength,
            "won": self.won,
        })
    }

    fn is_finished(&self) -> bool {
        self.phase == TugPhase::Finished
    }
}

/// The round as the session holds it. The variant is picked on first start.
#[derive(Debug, Clone)]
pub enum TugOfWar {
    Waiting(TugOfWarSettings),
    Teams(TeamTug),
    Solo(PerPlayer<SoloTug>),
}

impl TugOfWar {
    pub fn new(settings: TugOfWarSettings) -> Self {
        match settings.mode {
            TugMode::Teams => Self::Waiting(settings),
            TugMode::Solo => Self::Solo(PerPlayer::new(settings)),
        }
    }

    pub fn is_teams(&self) -> bool {
        match self {
            Self::Waiting(settings) => settings.mode == TugMode::Teams,
            Self::Teams(_) => true,
            Self::Solo(_) => false,
        }
    }

    pub fn is_shared(&self) -> bool {
        self.is_teams()
    }

    /// Teams need two players; with fewer alive the round falls back to solo.
    pub fn start<R: Rng + ?Sized>(
        &mut self,
        player: Option<&str>,
        alive: &[PlayerId],
        rng: &mut R,
    ) -> Result<Vec<Effect>, RoundError> {
        match self {
            Self::Waiting(settings) => {
                let settings = settings.clone();
                if alive.len() >= 2 {
                    let (game, effects) = TeamTug::start(alive, &settings, rng);
                    *self = Self::Teams(game);
                    Ok(effects)
                } else {
                    tracing::info!("not enough players for teams, playing tug of war solo");
                    let mut games = PerPlayer::new(settings);
                    let effects = match player {
                        Some(player) => games.start(player, rng)?,
                        None => Vec::new(),
                    };
                    *self = Self::Solo(games);
                    Ok(effects)
                }
            }
            Self::Teams(_) => Err(RoundError::AlreadyStarted),
            Self::Solo(games) => games.start(player.ok_or(RoundError::NotParticipant)?, rng),
        }
    }

    pub fn act<R: Rng + ?Sized>(
        &mut self,
        player: &str,
        action: &PlayerAction,
        rng: &mut R,
    ) -> Result<Vec<Effect>, RoundError> {
        match self {
            Self::Waiting(_) => Err(RoundError::NotStarted),
            Self::Teams(game) => {
                if *action != PlayerAction::Pull {
                    return Err(RoundError::WrongAction(RoundKind::TugOfWar));
                }
                game.pull(player)
            }
            Self::Solo(games) => games.act(player, action, rng),
        }
    }

    pub fn on_timer<R: Rng + ?Sized>(&mut self, timer: &Timer, rng: &mut R) -> Vec<Effect> {
        match self {
            Self::Waiting(_) => Vec::new(),
            Self::Teams(game) => game.on_timer(timer.kind),
            Self::Solo(games) => games.on_timer(timer, rng),
        }
    }

    pub fn remove_player(&mut self, player: &str) -> Vec<Effect> {
        match self {
            Self::Waiting(_) => {}
            Self::Teams(game) => game.remove_player(player),
            Self::Solo(games) => games.remove(player),
        }
        Vec::new()
    }

    pub fn status_for(&self, player: &str) -> serde_json::Value {
        match self {
            Self::Waiting(_) => serde_json::json!({ "mode": "teams", "phase": "waiting" }),
            Self::Teams(game) => game.status(),
            Self::Solo(games) => games.status(player),
        }
    }

    pub fn shared_status(&self) -> Option<serde_json::Value> {
        match self {
            Self::Waiting(_) => Some(serde_json::json!({ "mode": "teams", "phase": "waiting" })),
            Self::Teams(game) => Some(game.status()),
            Self::Solo(_) => None,
        }
    }
}
