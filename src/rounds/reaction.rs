//! Red light, green light.
//!
//! One shared light for the whole field, one runner per player. Runners only
//! gain ground on movement ticks while the light is green; starting to move
//! on red, or still moving when a red signal runs out, is fatal.

use std::collections::BTreeMap;

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{Effect, Timer, TimerKind};
use crate::config::ReactionSettings;
use crate::error::RoundError;
use crate::types::{PlayerAction, PlayerId, RoundKind};

pub const FINISH_LINE: u8 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LightPhase {
    Waiting,
    Go,
    Stop,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerState {
    Running,
    Safe,
    Eliminated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Runner {
    pub progress: u8,
    pub moving: bool,
    pub state: RunnerState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reaction {
    pub phase: LightPhase,
    pub remaining_secs: u32,
    pub signal_secs: u32,
    pub runners: BTreeMap<PlayerId, Runner>,
    settings: ReactionSettings,
}

impl Reaction {
    pub fn new(settings: ReactionSettings) -> Self {
        Self {
            phase: LightPhase::Waiting,
            remaining_secs: settings.duration_secs,
            signal_secs: 0,
            runners: BTreeMap::new(),
            settings,
        }
    }

    /// Opens on a green light for every player in `alive`.
    pub fn start<R: Rng + ?Sized>(
        &mut self,
        alive: &[PlayerId],
        rng: &mut R,
    ) -> Result<Vec<Effect>, RoundError> {
        match self.phase {
            LightPhase::Waiting => {}
            LightPhase::Done => return Err(RoundError::Finished),
            _ => return Err(RoundError::AlreadyStarted),
        }

        self.runners = alive
            .iter()
            .map(|id| {
                let runner = Runner {
                    progress: 0,
                    moving: false,
                    state: RunnerState::Running,
                };
                (id.clone(), runner)
            })
            .collect();
        self.remaining_secs = self.settings.duration_secs;
        self.phase = LightPhase::Go;
        self.signal_secs = self.roll_signal(rng);

        Ok(vec![
            Effect::after_secs(Timer::shared(TimerKind::Countdown), 1),
            Effect::after_secs(Timer::shared(TimerKind::Signal), u64::from(self.signal_secs)),
            Effect::after_ms(Timer::shared(TimerKind::Movement), self.settings.move_tick_ms),
        ])
    }

    pub fn act(&mut self, player: &str, action: &PlayerAction) -> Result<Vec<Effect>, RoundError> {
        match self.phase {
            LightPhase::Waiting => return Err(RoundError::NotStarted),
            LightPhase::Done => return Err(RoundError::Finished),
            LightPhase::Go | LightPhase::Stop => {}
        }
        let phase = self.phase;
        let runner = self
            .runners
            .get_mut(player)
            .ok_or(RoundError::NotParticipant)?;
        if runner.state != RunnerState::Running {
            return Err(RoundError::OutOfRound);
        }

        let mut effects = Vec::new();
        match action {
            PlayerAction::MoveStart => {
                runner.moving = true;
                if phase == LightPhase::Stop {
                    runner.state = RunnerState::Eliminated;
                    runner.moving = false;
                    effects.push(Effect::Eliminated(player.to_string()));
                    tracing::debug!(player, "moved on red light");
                }
            }
            PlayerAction::MoveStop => runner.moving = false,
            _ => return Err(RoundError::WrongAction(RoundKind::Reaction)),
        }

        self.finish_if_settled(&mut effects);
        Ok(effects)
    }

    pub fn on_timer<R: Rng + ?Sized>(&mut self, kind: TimerKind, rng: &mut R) -> Vec<Effect> {
        if matches!(self.phase, LightPhase::Waiting | LightPhase::Done) {
            return Vec::new();
        }
        let mut effects = Vec::new();
        match kind {
            TimerKind::Countdown => self.countdown(&mut effects),
            TimerKind::Signal => self.switch_signal(rng, &mut effects),
            TimerKind::Movement => self.advance_runners(&mut effects),
            _ => {}
        }
        self.finish_if_settled(&mut effects);
        effects
    }

    /// Eliminated from outside the round.
    pub fn remove_player(&mut self, player: &str) -> Vec<Effect> {
        if let Some(runner) = self.runners.get_mut(player)
            && runner.state == RunnerState::Running
        {
            runner.state = RunnerState::Eliminated;
            runner.moving = false;
        }
        let mut effects = Vec::new();
        self.finish_if_settled(&mut effects);
        effects
    }

    /// Stops a runner whose input went away.
    pub fn release(&mut self, player: &str) {
        if let Some(runner) = self.runners.get_mut(player) {
            runner.moving = false;
        }
    }

    pub fn status(&self) -> serde_json::Value {
        serde_json::json!({
            "phase": self.phase,
            "remaining": self.remaining_secs,
            "signal": self.signal_secs,
            "runners": self.runners,
        })
    }

    fn roll_signal<R: Rng + ?Sized>(&self, rng: &mut R) -> u32 {
        rng.random_range(self.settings.signal_min_secs..=self.settings.signal_max_secs)
    }

    fn countdown(&mut self, effects: &mut Vec<Effect>) {
        self.remaining_secs = self.remaining_secs.saturating_sub(1);
        if self.remaining_secs > 0 {
            effects.push(Effect::after_secs(Timer::shared(TimerKind::Countdown), 1));
            return;
        }
        for (id, runner) in self.runners.iter_mut() {
            if runner.state == RunnerState::Running {
                runner.state = RunnerState::Eliminated;
                runner.moving = false;
                effects.push(Effect::Eliminated(id.clone()));
            }
        }
    }

    fn switch_signal<R: Rng + ?Sized>(&mut self, rng: &mut R, effects: &mut Vec<Effect>) {
        if self.phase == LightPhase::Stop {
            for (id, runner) in self.runners.iter_mut() {
                if runner.state == RunnerState::Running && runner.moving {
                    runner.state = RunnerState::Eliminated;
                    runner.moving = false;
                    effects.push(Effect::Eliminated(id.clone()));
                }
            }
        }

        self.phase = if rng.random_bool(self.settings.go_probability) {
            LightPhase::Go
        } else {
            LightPhase::Stop
        };
        self.signal_secs = self.roll_signal(rng);
        effects.push(Effect::after_secs(
            Timer::shared(TimerKind::Signal),
            u64::from(self.signal_secs),
        ));
    }

    fn advance_runners(&mut self, effects: &mut Vec<Effect>) {
        if self.phase == LightPhase::Go {
            for (id, runner) in self.runners.iter_mut() {
                if runner.state != RunnerState::Running || !runner.moving {
                    continue;
                }
                runner.progress = runner
                    .progress
                    .saturating_add(self.settings.move_step)
                    .min(FINISH_LINE);
                if runner.progress >= FINISH_LINE {
                    runner.state = RunnerState::Safe;
                    runner.moving = false;
                    effects.push(Effect::Survived(id.clone()));
                }
            }
        }
        effects.push(Effect::after_ms(
            Timer::shared(TimerKind::Movement),
            self.settings.move_tick_ms,
        ));
    }

    fn finish_if_settled(&mut self, effects: &mut Vec<Effect>) {
        if self.phase == LightPhase::Done {
            return;
        }
        let settled = self
            .runners
            .values()
            .all(|r| r.state != RunnerState::Running);
        if settled {
            self.phase = LightPhase::Done;
            effects.retain(|e| !matches!(e, Effect::Schedule(..)));
            effects.push(Effect::Finished);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn players(names: &[&str]) -> Vec<PlayerId> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn started(names: &[&str]) -> Reaction {
        let mut game = Reaction::new(ReactionSettings::default());
        let mut rng = StdRng::seed_from_u64(1);
        game.start(&players(names), &mut rng).unwrap();
        game
    }

    #[test]
    fn start_opens_on_green_with_timers() {
        let mut game = Reaction::new(ReactionSettings::default());
        let mut rng = StdRng::seed_from_u64(7);
        let effects = game.start(&players(&["a", "b"]), &mut rng).unwrap();
        assert_eq!(game.phase, LightPhase::Go);
        assert!((2..=5).contains(&game.signal_secs));
        assert_eq!(effects.len(), 3);
        assert_eq!(
            game.start(&players(&["a"]), &mut rng),
            Err(RoundError::AlreadyStarted)
        );
    }

    #[test]
    fn moving_on_red_eliminates() {
        let mut game = started(&["a", "b"]);
        game.phase = LightPhase::Stop;
        let effects = game.act("a", &PlayerAction::MoveStart).unwrap();
        assert_eq!(effects, vec![Effect::Eliminated("a".to_string())]);
        assert_eq!(game.runners["a"].state, RunnerState::Eliminated);
        assert_eq!(
            game.act("a", &PlayerAction::MoveStop),
            Err(RoundError::OutOfRound)
        );
    }

    #[test]
    fn still_moving_when_red_ends_eliminates() {
        let mut game = started(&["a", "b"]);
        let mut rng = StdRng::seed_from_u64(2);
        game.act("a", &PlayerAction::MoveStart).unwrap();
        game.phase = LightPhase::Stop;
        let effects = game.on_timer(TimerKind::Signal, &mut rng);
        assert!(effects.contains(&Effect::Eliminated("a".to_string())));
        assert_eq!(game.runners["b"].state, RunnerState::Running);
    }

    #[test]
    fn progress_only_accumulates_on_green() {
        let mut game = started(&["a"]);
        let mut rng = StdRng::seed_from_u64(3);
        game.act("a", &PlayerAction::MoveStart).unwrap();
        game.on_timer(TimerKind::Movement, &mut rng);
        assert_eq!(game.runners["a"].progress, 2);

        game.runners.get_mut("a").unwrap().moving = true;
        game.phase = LightPhase::Stop;
        game.on_timer(TimerKind::Movement, &mut rng);
        assert_eq!(game.runners["a"].progress, 2);
    }

    #[test]
    fn reaching_the_line_is_safe_and_finishes() {
        let mut game = started(&["a"]);
        let mut rng = StdRng::seed_from_u64(4);
        game.act("a", &PlayerAction::MoveStart).unwrap();
        let mut survived = false;
        for _ in 0..50 {
            let effects = game.on_timer(TimerKind::Movement, &mut rng);
            if effects.contains(&Effect::Survived("a".to_string())) {
                survived = true;
                assert!(effects.contains(&Effect::Finished));
                break;
            }
        }
        assert!(survived);
        assert_eq!(game.phase, LightPhase::Done);

        // a safe runner is out of reach of later signals
        assert!(game.on_timer(TimerKind::Signal, &mut rng).is_empty());
    }

    #[test]
    fn timer_expiry_eliminates_runners_short_of_the_line() {
        let mut game = started(&["a", "b"]);
        let mut rng = StdRng::seed_from_u64(5);
        game.runners.get_mut("b").unwrap().state = RunnerState::Safe;
        game.remaining_secs = 1;
        let effects = game.on_timer(TimerKind::Countdown, &mut rng);
        assert!(effects.contains(&Effect::Eliminated("a".to_string())));
        assert!(!effects.contains(&Effect::Eliminated("b".to_string())));
        assert!(effects.contains(&Effect::Finished));
    }

    #[test]
    fn signals_reschedule_within_bounds() {
        let mut game = started(&["a"]);
        let mut rng = StdRng::seed_from_u64(6);
        for _ in 0..100 {
            let effects = game.on_timer(TimerKind::Signal, &mut rng);
            assert!(matches!(game.phase, LightPhase::Go | LightPhase::Stop));
            assert!((2..=5).contains(&game.signal_secs));
            assert!(
                effects
                    .iter()
                    .any(|e| matches!(e, Effect::Schedule(t, _) if t.kind == TimerKind::Signal))
            );
        }
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn safe_runners_are_never_eliminated(seed in any::<u64>(), ticks in 1usize..400) {
                let mut game = started(&["a"]);
                let mut rng = StdRng::seed_from_u64(seed);
                game.act("a", &PlayerAction::MoveStart).unwrap();
                let mut safe = false;
                for i in 0..ticks {
                    let kind = match i % 3 {
                        0 => TimerKind::Movement,
                        1 => TimerKind::Signal,
                        _ => TimerKind::Countdown,
                    };
                    let effects = game.on_timer(kind, &mut rng);
                    if safe {
                        prop_assert!(!effects.contains(&Effect::Eliminated("a".to_string())));
                    }
                    if game.runners["a"].state == RunnerState::Safe {
                        safe = true;
                    }
                }
            }
        }
    }
}
