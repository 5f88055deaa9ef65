//! Marbles: guess whether the hidden count is odd or even.

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{Effect, SoloRound, Timer, TimerKind};
use crate::config::ParitySettings;
use crate::error::RoundError;
use crate::types::{Parity, PlayerAction, PlayerId, RoundKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParityPhase {
    Guessing,
    Revealing,
    Finished,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParityGame {
    pub player: PlayerId,
    pub phase: ParityPhase,
    count: u32,
    pub guess: Option<Parity>,
    pub correct: Option<bool>,
    settings: ParitySettings,
}

/// `guess == even` iff `count` is even.
pub fn is_correct(guess: Parity, count: u32) -> bool {
    guess == Parity::of(count)
}

impl SoloRound for ParityGame {
    type Settings = ParitySettings;

    const KIND: RoundKind = RoundKind::Parity;

    fn start<R: Rng + ?Sized>(
        player: &str,
        settings: &ParitySettings,
        rng: &mut R,
    ) -> (Self, Vec<Effect>) {
        let game = Self {
            player: player.to_string(),
            phase: ParityPhase::Guessing,
            count: rng.random_range(1..=settings.max_count),
            guess: None,
            correct: None,
            settings: settings.clone(),
        };
        (game, Vec::new())
    }

    fn act<R: Rng + ?Sized>(
        &mut self,
        action: &PlayerAction,
        _rng: &mut R,
    ) -> Result<Vec<Effect>, RoundError> {
        let PlayerAction::Guess { parity } = action else {
            return Err(RoundError::WrongAction(Self::KIND));
        };
        if self.phase != ParityPhase::Guessing {
            return Err(RoundError::MovePending);
        }
        self.guess = Some(*parity);
        self.phase = ParityPhase::Revealing;
        Ok(vec![Effect::after_ms(
            Timer::for_player(TimerKind::Reveal, &self.player),
            self.settings.reveal_ms,
        )])
    }

    fn on_timer<R: Rng + ?Sized>(&mut self, kind: TimerKind, _rng: &mut R) -> Vec<Effect> {
        if kind != TimerKind::Reveal || self.phase != ParityPhase::Revealing {
            return Vec::new();
        }
        let Some(guess) = self.guess else {
            return Vec::new();
        };
        let correct = is_correct(guess, self.count);
        self.correct = Some(correct);
        self.phase = ParityPhase::Finished;
        if correct {
            vec![Effect::Survived(self.player.clone())]
        } else {
            vec![Effect::Eliminated(self.player.clone())]
        }
    }

    fn status(&self) -> serde_json::Value {
        // the count stays hidden until the reveal
        let count = (self.phase == ParityPhase::Finished).then_some(self.count);
        serde_json::json!({
            "phase": self.phase,
            "guess": self.guess,
            "count": count,
            "correct": self.correct,
        })
    }

    fn is_finished(&self) -> bool {
        self.phase == ParityPhase::Finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn guess_and_reveal(seed: u64, guess: Parity) -> (ParityGame, Vec<Effect>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let (mut game, _) = ParityGame::start("p", &ParitySettings::default(), &mut rng);
        game.act(&PlayerAction::Guess { parity: guess }, &mut rng)
            .unwrap();
        let effects = game.on_timer(TimerKind::Reveal, &mut rng);
        (game, effects)
    }

    #[test]
    fn outcome_follows_parity_of_count() {
        for seed in 0..50 {
            let (game, effects) = guess_and_reveal(seed, Parity::Even);
            let expected = if game.count % 2 == 0 {
                Effect::Survived("p".to_string())
            } else {
                Effect::Eliminated("p".to_string())
            };
            assert_eq!(effects, vec![expected]);
            assert!((1..=20).contains(&game.count));
        }
    }

    #[test]
    fn count_hidden_until_reveal() {
        let mut rng = StdRng::seed_from_u64(9);
        let (mut game, _) = ParityGame::start("p", &ParitySettings::default(), &mut rng);
        assert!(game.status()["count"].is_null());
        game.act(&PlayerAction::Guess { parity: Parity::Odd }, &mut rng)
            .unwrap();
        assert!(game.status()["count"].is_null());
        game.on_timer(TimerKind::Reveal, &mut rng);
        assert_eq!(game.status()["count"], game.count);
    }

    #[test]
    fn second_guess_is_rejected() {
        let mut rng = StdRng::seed_from_u64(10);
        let (mut game, _) = ParityGame::start("p", &ParitySettings::default(), &mut rng);
        game.act(&PlayerAction::Guess { parity: Parity::Odd }, &mut rng)
            .unwrap();
        assert_eq!(
            game.act(&PlayerAction::Guess { parity: Parity::Even }, &mut rng),
            Err(RoundError::MovePending)
        );
    }

    #[test]
    fn correctness_rate_is_about_half() {
        let trials = 4000;
        let wins = (0..trials)
            .filter(|seed| {
                let (game, _) = guess_and_reveal(*seed, Parity::Even);
                game.correct == Some(true)
            })
            .count();
        let rate = wins as f64 / trials as f64;
        assert!((0.45..0.55).contains(&rate), "rate {rate}");
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn even_guess_is_correct_iff_count_even(count in 1u32..=20) {
                prop_assert_eq!(is_correct(Parity::Even, count), count % 2 == 0);
                prop_assert_eq!(is_correct(Parity::Odd, count), count % 2 == 1);
            }
        }
    }
}
