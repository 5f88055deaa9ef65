//! Final duel against a computer opponent.

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{Effect, SoloRound, Timer, TimerKind};
use crate::config::CombatSettings;
use crate::error::RoundError;
use crate::types::{CombatMove, PlayerAction, PlayerId, RoundKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CombatPhase {
    Choosing,
    Resolving,
    Finished,
}

/// One resolved exchange, shown to the player afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Exchange {
    pub player_move: CombatMove,
    pub opponent_move: CombatMove,
    pub player_damage: u32,
    pub opponent_damage: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Combat {
    pub player: PlayerId,
    pub phase: CombatPhase,
    pub player_health: u32,
    pub opponent_health: u32,
    pending: Option<CombatMove>,
    pub last: Option<Exchange>,
    pub won: Option<bool>,
    settings: CombatSettings,
}

impl Combat {
    fn roll<R: Rng + ?Sized>(&self, rng: &mut R) -> u32 {
        rng.random_range(self.settings.min_damage..=self.settings.max_damage)
    }

    /// Damage dealt to (player, opponent) for one pair of moves.
    fn damage<R: Rng + ?Sized>(
        &self,
        player_move: CombatMove,
        opponent_move: CombatMove,
        rng: &mut R,
    ) -> (u32, u32) {
        let divisor = self.settings.defend_divisor.max(1);
        match (player_move, opponent_move) {
            (CombatMove::Attack, CombatMove::Attack) => (self.roll(rng), self.roll(rng)),
            (CombatMove::Attack, CombatMove::Defend) => (0, self.roll(rng) / divisor),
            (CombatMove::Defend, CombatMove::Attack) => (self.roll(rng) / divisor, 0),
            (CombatMove::Defend, CombatMove::Defend) => (0, 0),
        }
    }
}

impl SoloRound for Combat {
    type Settings = CombatSettings;

    const KIND: RoundKind = RoundKind::Combat;

    fn start<R: Rng + ?Sized>(
        player: &str,
        settings: &CombatSettings,
        _rng: &mut R,
    ) -> (Self, Vec<Effect>) {
        let game = Self {
            player: player.to_string(),
            phase: CombatPhase::Choosing,
            player_health: settings.starting_health,
            opponent_health: settings.starting_health,
            pending: None,
            last: None,
            won: None,
            settings: settings.clone(),
        };
        (game, Vec::new())
    }

    fn act<R: Rng + ?Sized>(
        &mut self,
        action: &PlayerAction,
        _rng: &mut R,
    ) -> Result<Vec<Effect>, RoundError> {
        let PlayerAction::Combat { choice } = action else {
            return Err(RoundError::WrongAction(Self::KIND));
        };
        if self.phase == CombatPhase::Resolving {
            return Err(RoundError::MovePending);
        }
        self.pending = Some(*choice);
        self.phase = CombatPhase::Resolving;
        Ok(vec![Effect::after_ms(
            Timer::for_player(TimerKind::Reveal, &self.player),
            self.settings.resolve_ms,
        )])
    }

    fn on_timer<R: Rng + ?Sized>(&mut self, kind: TimerKind, rng: &mut R) -> Vec<Effect> {
        if kind != TimerKind::Reveal || self.phase != CombatPhase::Resolving {
            return Vec::new();
        }
        let Some(player_move) = self.pending.take() else {
            return Vec::new();
        };
        let opponent_move = if rng.random_bool(0.5) {
            CombatMove::Attack
        } else {
            CombatMove::Defend
        };
        let (player_damage, opponent_damage) = self.damage(player_move, opponent_move, rng);
        self.player_health = self.player_health.saturating_sub(player_damage);
        self.opponent_health = self.opponent_health.saturating_sub(opponent_damage);
        self.last = Some(Exchange {
            player_move,
            opponent_move,
            player_damage,
            opponent_damage,
        });

        // a double knockout counts against the player
        if self.player_health == 0 {
            self.phase = CombatPhase::Finished;
            self.won = Some(false);
            return vec![Effect::Eliminated(self.player.clone())];
        }
        if self.opponent_health == 0 {
            self.phase = CombatPhase::Finished;
            self.won = Some(true);
            return vec![Effect::Survived(self.player.clone())];
        }
        self.phase = CombatPhase::Choosing;
        Vec::new()
    }

    fn status(&self) -> serde_json::Value {
        serde_json::json!({
            "phase": self.phase,
            "playerHealth": self.player_health,
            "opponentHealth": self.opponent_health,
            "maxHealth": self.settings.starting_health,
            "last": self.last,
            "won": self.won,
        })
    }

    fn is_finished(&self) -> bool {
        self.phase == CombatPhase::Finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn fight(choice: CombatMove) -> PlayerAction {
        PlayerAction::Combat { choice }
    }

    fn new_game(rng: &mut StdRng) -> Combat {
        Combat::start("p", &CombatSettings::default(), rng).0
    }

    #[test]
    fn move_locked_while_resolving() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut game = new_game(&mut rng);
        game.act(&fight(CombatMove::Attack), &mut rng).unwrap();
        assert_eq!(
            game.act(&fight(CombatMove::Defend), &mut rng),
            Err(RoundError::MovePending)
        );
        game.on_timer(TimerKind::Reveal, &mut rng);
        assert!(game.act(&fight(CombatMove::Defend), &mut rng).is_ok());
    }

    #[test]
    fn damage_follows_move_table() {
        let mut rng = StdRng::seed_from_u64(2);
        let game = new_game(&mut rng);
        for _ in 0..200 {
            let (p, o) = game.damage(CombatMove::Attack, CombatMove::Attack, &mut rng);
            assert!((10..=29).contains(&p) && (10..=29).contains(&o));

            let (p, o) = game.damage(CombatMove::Attack, CombatMove::Defend, &mut rng);
            assert_eq!(p, 0);
            assert!((3..=9).contains(&o));

            let (p, o) = game.damage(CombatMove::Defend, CombatMove::Attack, &mut rng);
            assert!((3..=9).contains(&p));
            assert_eq!(o, 0);

            assert_eq!(
                game.damage(CombatMove::Defend, CombatMove::Defend, &mut rng),
                (0, 0)
            );
        }
    }

    #[test]
    fn double_knockout_eliminates_the_player() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut game = new_game(&mut rng);
        // keep attacking until an exchange where both swing
        loop {
            game.player_health = 1;
            game.opponent_health = 1;
            game.phase = CombatPhase::Choosing;
            game.act(&fight(CombatMove::Attack), &mut rng).unwrap();
            let effects = game.on_timer(TimerKind::Reveal, &mut rng);
            if game.last.map(|e| e.opponent_move) == Some(CombatMove::Attack) {
                assert_eq!(effects, vec![Effect::Eliminated("p".to_string())]);
                assert_eq!(game.opponent_health, 0);
                break;
            }
        }
    }

    #[test]
    fn health_never_underflows_and_fight_ends() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut game = new_game(&mut rng);
        let mut outcome = Vec::new();
        for _ in 0..500 {
            if game.is_finished() {
                break;
            }
            game.act(&fight(CombatMove::Attack), &mut rng).unwrap();
            outcome = game.on_timer(TimerKind::Reveal, &mut rng);
        }
        assert!(game.is_finished());
        assert!(game.player_health == 0 || game.opponent_health == 0);
        let expected = if game.player_health == 0 {
            Effect::Eliminated("p".to_string())
        } else {
            Effect::Survived("p".to_string())
        };
        assert_eq!(outcome, vec![expected]);
    }

    #[test]
    fn wrong_action_is_rejected() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut game = new_game(&mut rng);
        assert_eq!(
            game.act(&PlayerAction::Pull, &mut rng),
            Err(RoundError::WrongAction(RoundKind::Combat))
        );
    }
}
