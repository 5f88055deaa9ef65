//! Glass bridge: pick the tempered panel of every step.

use std::collections::BTreeSet;

use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use super::{Effect, SoloRound, Timer, TimerKind};
use crate::config::SteppingStoneSettings;
use crate::error::RoundError;
use crate::types::{PlayerAction, PlayerId, RoundKind, Side};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgePhase {
    Waiting,
    Choosing,
    Revealing,
    Finished,
}

fn random_layout<R: Rng + ?Sized>(steps: usize, rng: &mut R) -> Vec<Side> {
    (0..steps)
        .map(|_| if rng.random_bool(0.5) { Side::Left } else { Side::Right })
        .collect()
}

fn chosen_panel(action: &PlayerAction) -> Result<Side, RoundError> {
    match action {
        PlayerAction::ChoosePanel { side } => Ok(*side),
        _ => Err(RoundError::WrongAction(RoundKind::SteppingStone)),
    }
}

/// Shared bridge crossed by the alive players one turn at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnBridge {
    pub phase: BridgePhase,
    layout: Vec<Side>,
    pub step: usize,
    /// Safe side of each step once someone has stood on it.
    pub revealed: Vec<Option<Side>>,
    pub order: Vec<PlayerId>,
    pub turn: usize,
    pending: Option<(PlayerId, Side)>,
    /// Players whose socket is gone. Their turns are passed on.
    away: BTreeSet<PlayerId>,
    settings: SteppingStoneSettings,
}

impl TurnBridge {
    pub fn new(settings: SteppingStoneSettings) -> Self {
        Self {
            phase: BridgePhase::Waiting,
            layout: Vec::new(),
            step: 0,
            revealed: vec![None; settings.steps],
            order: Vec::new(),
            turn: 0,
            pending: None,
            away: BTreeSet::new(),
            settings,
        }
    }

    pub fn start<R: Rng + ?Sized>(
        &mut self,
        alive: &[PlayerId],
        rng: &mut R,
    ) -> Result<Vec<Effect>, RoundError> {
        if self.phase != BridgePhase::Waiting {
            return Err(RoundError::AlreadyStarted);
        }
        self.layout = random_layout(self.settings.steps, rng);
        self.order = alive.to_vec();
        self.order.shuffle(rng);
        if self.order.is_empty() {
            self.phase = BridgePhase::Finished;
            return Ok(vec![Effect::Finished]);
        }
        self.phase = BridgePhase::Choosing;
        self.pass_away_turns();
        tracing::debug!(players = self.order.len(), "bridge turn order drawn");
        Ok(Vec::new())
    }

    pub fn current_player(&self) -> Option<&PlayerId> {
        match self.phase {
            BridgePhase::Choosing | BridgePhase::Revealing => self.order.get(self.turn),
            _ => None,
        }
    }

    pub fn act(&mut self, player: &str, action: &PlayerAction) -> Result<Vec<Effect>, RoundError> {
        let side = chosen_panel(action)?;
        match self.phase {
            BridgePhase::Waiting => return Err(RoundError::NotStarted),
            BridgePhase::Finished => return Err(RoundError::Finished),
            BridgePhase::Revealing => return Err(RoundError::MovePending),
            BridgePhase::Choosing => {}
        }
        if self.current_player().map(String::as_str) != Some(player) {
            return Err(if self.order.iter().any(|p| p == player) {
                RoundError::NotYourTurn
            } else {
                RoundError::NotParticipant
            });
        }

        self.pending = Some((player.to_string(), side));
        self.phase = BridgePhase::Revealing;
        Ok(vec![Effect::after_ms(
            Timer::shared(TimerKind::Reveal),
            self.settings.reveal_ms,
        )])
    }

    pub fn on_timer(&mut self, kind: TimerKind) -> Vec<Effect> {
        if kind != TimerKind::Reveal || self.phase != BridgePhase::Revealing {
            return Vec::new();
        }
        self.phase = BridgePhase::Choosing;
        let Some((player, side)) = self.pending.take() else {
            return Vec::new();
        };
        // the chooser was removed while the glass was deciding
        let Some(index) = self.order.iter().position(|p| *p == player) else {
            self.pass_away_turns();
            return Vec::new();
        };

        let safe = self.layout[self.step];
        self.revealed[self.step] = Some(safe);
        if side == safe {
            self.step += 1;
            if self.step >= self.layout.len() {
                self.phase = BridgePhase::Finished;
                let mut effects: Vec<Effect> =
                    self.order.iter().cloned().map(Effect::Survived).collect();
                effects.push(Effect::Finished);
                return effects;
            }
            self.pass_away_turns();
            return Vec::new();
        }

        tracing::debug!(%player, step = self.step, "glass shattered");
        self.order.remove(index);
        let mut effects = vec![Effect::Eliminated(player)];
        if self.order.is_empty() {
            self.phase = BridgePhase::Finished;
            effects.push(Effect::Finished);
        } else {
            if self.turn >= self.order.len() {
                self.turn = 0;
            }
            self.pass_away_turns();
        }
        effects
    }

    /// Takes an admin-eliminated player out of the order.
    pub fn remove_player(&mut self, player: &str) -> Vec<Effect> {
        let Some(index) = self.order.iter().position(|p| p == player) else {
            return Vec::new();
        };
        self.order.remove(index);
        self.away.remove(player);
        if index < self.turn {
            self.turn -= 1;
        }
        if self.turn >= self.order.len() {
            self.turn = 0;
        }
        if self.order.is_empty() && self.phase != BridgePhase::Waiting {
            self.phase = BridgePhase::Finished;
            return vec![Effect::Finished];
        }
        self.pass_away_turns();
        Vec::new()
    }

    pub fn player_left(&mut self, player: &str) {
        self.away.insert(player.to_string());
        self.pass_away_turns();
    }

    pub fn player_returned(&mut self, player: &str) {
        self.away.remove(player);
        self.pass_away_turns();
    }

    /// Moves absent players holding the turn to the back of the order, as
    /// long as someone present can take it. Only while a panel is awaited.
    fn pass_away_turns(&mut self) {
        if self.phase != BridgePhase::Choosing {
            return;
        }
        if self.order.iter().all(|p| self.away.contains(p)) {
            return;
        }
        for _ in 0..self.order.len() {
            let Some(current) = self.order.get(self.turn) else {
                self.turn = 0;
                continue;
            };
            if !self.away.contains(current) {
                return;
            }
            let deferred = self.order.remove(self.turn);
            tracing::debug!(player = %deferred, "absent player moved to the back");
            self.order.push(deferred);
            if self.turn >= self.order.len() - 1 {
                self.turn = 0;
            }
        }
    }

    pub fn status(&self) -> serde_json::Value {
        serde_json::json!({
            "mode": "turns",
            "phase": self.phase,
            "step": self.step,
            "steps": self.settings.steps,
            "revealed": self.revealed,
            "order": self.order,
            "currentPlayer": self.current_player(),
            "pending": self.pending.as_ref().map(|(_, side)| side),
        })
    }
}

/// A private bridge per player, no turn taking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoloBridge {
    pub player: PlayerId,
    pub phase: BridgePhase,
    layout: Vec<Side>,
    pub step: usize,
    pub revealed: Vec<Option<Side>>,
    pending: Option<Side>,
    pub crossed: Option<bool>,
    settings: SteppingStoneSettings,
}

impl SoloRound for SoloBridge {
    type Settings = SteppingStoneSettings;

    const KIND: RoundKind = RoundKind::SteppingStone;

    fn start<R: Rng + ?Sized>(
        player: &str,
        settings: &SteppingStoneSettings,
        rng: &mut R,
    ) -> (Self, Vec<Effect>) {
        let game = Self {
            player: player.to_string(),
            phase: BridgePhase::Choosing,
            layout: random_layout(settings.steps, rng),
            step: 0,
            revealed: vec![None; settings.steps],
            pending: None,
            crossed: None,
            settings: settings.clone(),
        };
        (game, Vec::new())
    }

    fn act<R: Rng + ?Sized>(
        &mut self,
        action: &PlayerAction,
        _rng: &mut R,
    ) -> Result<Vec<Effect>, RoundError> {
        let side = chosen_panel(action)?;
        if self.phase == BridgePhase::Revealing {
            return Err(RoundError::MovePending);
        }
        self.pending = Some(side);
        self.phase = BridgePhase::Revealing;
        Ok(vec![Effect::after_ms(
            Timer::for_player(TimerKind::Reveal, &self.player),
            self.settings.reveal_ms,
        )])
    }

    fn on_timer<R: Rng + ?Sized>(&mut self, kind: TimerKind, _rng: &mut R) -> Vec<Effect> {
        if kind != TimerKind::Reveal || self.phase != BridgePhase::Revealing {
            return Vec::new();
        }
        let Some(side) = self.pending.take() else {
            return Vec::new();
        };
        let safe = self.layout[self.step];
        self.revealed[self.step] = Some(safe);
        if side != safe {
            self.phase = BridgePhase::Finished;
            self.crossed = Some(false);
            return vec![Effect::Eliminated(self.player.clone())];
        }
        self.step += 1;
        if self.step >= self.layout.len() {
            self.phase = BridgePhase::Finished;
            self.crossed = Some(true);
            return vec![Effect::Survived(self.player.clone())];
        }
        self.phase = BridgePhase::Choosing;
        Vec::new()
    }

    fn status(&self) -> serde_json::Value {
        serde_json::json!({
            "mode": "solo",
            "phase": self.phase,
            "step": self.step,
            "steps": self.settings.steps,
            "revealed": self.revealed,
            "pending": self.pending,
            "crossed": self.crossed,
        })
    }

    fn is_finished(&self) -> bool {
        self.phase == BridgePhase::Finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn ids(n: usize) -> Vec<PlayerId> {
        (0..n).map(|i| format!("p{i}")).collect()
    }

    fn choose(side: Side) -> PlayerAction {
        PlayerAction::ChoosePanel { side }
    }

    fn other(side: Side) -> Side {
        match side {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }

    fn started(n: usize, seed: u64) -> TurnBridge {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut bridge = TurnBridge::new(SteppingStoneSettings::default());
        bridge.start(&ids(n), &mut rng).unwrap();
        bridge
    }

    #[test]
    fn only_the_current_player_may_choose() {
        let mut bridge = started(3, 1);
        let current = bridge.order[0].clone();
        let waiting = bridge.order[1].clone();
        assert_eq!(
            bridge.act(&waiting, &choose(Side::Left)),
            Err(RoundError::NotYourTurn)
        );
        assert_eq!(
            bridge.act("stranger", &choose(Side::Left)),
            Err(RoundError::NotParticipant)
        );
        bridge.act(&current, &choose(Side::Left)).unwrap();
        assert_eq!(
            bridge.act(&current, &choose(Side::Right)),
            Err(RoundError::MovePending)
        );
    }

    #[test]
    fn wrong_choice_eliminates_and_passes_the_turn() {
        let mut bridge = started(2, 2);
        let first = bridge.order[0].clone();
        let second = bridge.order[1].clone();
        let wrong = other(bridge.layout[0]);

        bridge.act(&first, &choose(wrong)).unwrap();
        let effects = bridge.on_timer(TimerKind::Reveal);
        assert_eq!(effects, vec![Effect::Eliminated(first)]);
        assert_eq!(bridge.step, 0);
        assert_eq!(bridge.revealed[0], Some(bridge.layout[0]));
        assert_eq!(bridge.current_player(), Some(&second));
    }

    #[test]
    fn crossing_the_last_step_saves_everyone_left() {
        let mut bridge = started(3, 3);
        let first = bridge.order[0].clone();
        bridge.act(&first, &choose(other(bridge.layout[0]))).unwrap();
        bridge.on_timer(TimerKind::Reveal);

        let mut last = Vec::new();
        while bridge.phase != BridgePhase::Finished {
            let player = bridge.current_player().cloned().unwrap();
            bridge.act(&player, &choose(bridge.layout[bridge.step])).unwrap();
            last = bridge.on_timer(TimerKind::Reveal);
        }
        assert_eq!(last.len(), 3);
        assert!(last.contains(&Effect::Finished));
        for player in &bridge.order {
            assert!(last.contains(&Effect::Survived(player.clone())));
        }
    }

    #[test]
    fn exhausted_order_finishes_without_survivors() {
        let mut bridge = started(1, 4);
        let only = bridge.order[0].clone();
        bridge.act(&only, &choose(other(bridge.layout[0]))).unwrap();
        let effects = bridge.on_timer(TimerKind::Reveal);
        assert_eq!(effects, vec![Effect::Eliminated(only), Effect::Finished]);
        assert_eq!(bridge.phase, BridgePhase::Finished);
    }

    #[test]
    fn removed_chooser_resolves_to_nothing() {
        let mut bridge = started(2, 5);
        let first = bridge.order[0].clone();
        bridge.act(&first, &choose(bridge.layout[0])).unwrap();
        assert!(bridge.remove_player(&first).is_empty());
        assert!(bridge.on_timer(TimerKind::Reveal).is_empty());
        assert_eq!(bridge.step, 0);
        assert_eq!(bridge.order.len(), 1);
        assert_eq!(bridge.phase, BridgePhase::Choosing);
    }

    #[test]
    fn disconnected_player_moves_to_the_back() {
        let mut bridge = started(3, 6);
        let order = bridge.order.clone();
        bridge.player_left(&order[0]);
        assert_eq!(bridge.order, vec![order[1].clone(), order[2].clone(), order[0].clone()]);
        assert_eq!(bridge.current_player(), Some(&order[1]));

        bridge.player_left(&order[2]);
        assert_eq!(bridge.current_player(), Some(&order[1]));
    }

    #[test]
    fn dropping_during_a_reveal_passes_the_turn_once_it_resolves() {
        let mut bridge = started(3, 9);
        let chooser = bridge.order[0].clone();
        bridge.act(&chooser, &choose(bridge.layout[0])).unwrap();
        bridge.player_left(&chooser);
        assert_eq!(bridge.current_player(), Some(&chooser));

        assert!(bridge.on_timer(TimerKind::Reveal).is_empty());
        assert_eq!(bridge.step, 1);
        assert_ne!(bridge.current_player(), Some(&chooser));
        assert_eq!(bridge.order.last(), Some(&chooser));
    }

    #[test]
    fn turn_reaching_an_absent_player_skips_them() {
        let mut bridge = started(3, 10);
        let order = bridge.order.clone();
        // the second player left while it was not their turn
        bridge.player_left(&order[1]);
        assert_eq!(bridge.current_player(), Some(&order[0]));

        bridge.act(&order[0], &choose(other(bridge.layout[0]))).unwrap();
        let effects = bridge.on_timer(TimerKind::Reveal);
        assert_eq!(effects, vec![Effect::Eliminated(order[0].clone())]);
        assert_eq!(bridge.current_player(), Some(&order[2]));
        assert_eq!(bridge.order, vec![order[2].clone(), order[1].clone()]);
    }

    #[test]
    fn everyone_away_keeps_the_turn_until_someone_returns() {
        let mut bridge = started(2, 11);
        let order = bridge.order.clone();
        bridge.player_left(&order[1]);
        bridge.player_left(&order[0]);
        assert_eq!(bridge.order.len(), 2);
        let holder = bridge.current_player().cloned().unwrap();

        let other_player = if holder == order[0] { &order[1] } else { &order[0] };
        bridge.player_returned(other_player);
        assert_eq!(bridge.current_player(), Some(other_player));
    }

    #[test]
    fn status_never_leaks_the_layout() {
        let bridge = started(2, 7);
        let status = bridge.status();
        assert!(status.get("layout").is_none());
        assert_eq!(status["revealed"], serde_json::json!([null, null, null, null, null]));
    }

    #[test]
    fn solo_bridge_eliminates_on_first_wrong_panel() {
        let mut rng = StdRng::seed_from_u64(8);
        let (mut game, _) = SoloBridge::start("p", &SteppingStoneSettings::default(), &mut rng);
        game.act(&choose(game.layout[0]), &mut rng).unwrap();
        assert!(game.on_timer(TimerKind::Reveal, &mut rng).is_empty());
        game.act(&choose(other(game.layout[1])), &mut rng).unwrap();
        let effects = game.on_timer(TimerKind::Reveal, &mut rng);
        assert_eq!(effects, vec![Effect::Eliminated("p".to_string())]);
        assert_eq!(game.crossed, Some(false));
    }

    #[test]
    fn random_walkers_reach_step_n_about_half_as_often_each_step() {
        let trials = 6000u64;
        let mut reached = [0u32; 4];
        for seed in 0..trials {
            let mut rng = StdRng::seed_from_u64(seed);
            let (mut game, _) =
                SoloBridge::start("p", &SteppingStoneSettings::default(), &mut rng);
            while !game.is_finished() {
                let side = if rng.random_bool(0.5) { Side::Left } else { Side::Right };
                game.act(&choose(side), &mut rng).unwrap();
                game.on_timer(TimerKind::Reveal, &mut rng);
            }
            for (n, count) in reached.iter_mut().enumerate() {
                if game.step > n {
                    *count += 1;
                }
            }
        }
        for (n, count) in reached.iter().enumerate() {
            let rate = f64::from(*count) / trials as f64;
            let expected = 0.5f64.powi(n as i32 + 1);
            assert!((rate - expected).abs() < 0.03, "step {n}: {rate} vs {expected}");
        }
    }
}
