//! Honeycomb: trace the stamped shape before the timer runs out.

use std::f64::consts::PI;

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{Effect, SoloRound, Timer, TimerKind};
use crate::config::TracingSettings;
use crate::error::RoundError;
use crate::types::{PlayerAction, PlayerId, Point, RoundKind};

/// Canvas geometry the client draws the shape on.
pub const CANVAS_SIZE: f64 = 300.0;
const SHAPE_SIZE: f64 = 60.0;
const STROKE_WIDTH: f64 = 3.0;
const ARC_SEGMENTS: usize = 48;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Shape {
    Circle,
    Triangle,
    Star,
    Umbrella,
}

impl Shape {
    pub const ALL: [Shape; 4] = [Self::Circle, Self::Triangle, Self::Star, Self::Umbrella];

    /// The outline as a set of polylines in canvas coordinates.
    pub fn outline(self) -> Vec<Vec<Point>> {
        let (cx, cy, size) = (CANVAS_SIZE / 2.0, CANVAS_SIZE / 2.0, SHAPE_SIZE);
        match self {
            Self::Circle => vec![arc(cx, cy, size, 0.0, 2.0 * PI)],
            Self::Triangle => {
                let half = size * 3f64.sqrt() / 2.0;
                let top = Point { x: cx, y: cy - size };
                vec![vec![
                    top,
                    Point { x: cx + half, y: cy + size / 2.0 },
                    Point { x: cx - half, y: cy + size / 2.0 },
                    top,
                ]]
            }
            Self::Star => {
                let inner = size / 2.5;
                let mut points: Vec<Point> = (0..10)
                    .map(|i| {
                        let radius = if i % 2 == 0 { size } else { inner };
                        let angle = PI / 5.0 * f64::from(i) - PI / 2.0;
                        Point {
                            x: cx + radius * angle.cos(),
                            y: cy + radius * angle.sin(),
                        }
                    })
                    .collect();
                points.push(points[0]);
                vec![points]
            }
            Self::Umbrella => {
                let canopy = arc(cx, cy - size / 4.0, size, 0.0, PI);
                let handle = vec![
                    Point { x: cx, y: cy - size / 4.0 },
                    Point { x: cx, y: cy + size },
                ];
                let hook = arc(cx + size / 4.0, cy + size, size / 4.0, PI, 2.0 * PI);
                vec![canopy, handle, hook]
            }
        }
    }
}

impl std::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Circle => write!(f, "circle"),
            Self::Triangle => write!(f, "triangle"),
            Self::Star => write!(f, "star"),
            Self::Umbrella => write!(f, "umbrella"),
        }
    }
}

fn arc(cx: f64, cy: f64, radius: f64, from: f64, to: f64) -> Vec<Point> {
    (0..=ARC_SEGMENTS)
        .map(|i| {
            let t = from + (to - from) * i as f64 / ARC_SEGMENTS as f64;
            Point {
                x: cx + radius * t.cos(),
                y: cy + radius * t.sin(),
            }
        })
        .collect()
}

fn distance_to_segment(p: Point, a: Point, b: Point) -> f64 {
    let (dx, dy) = (b.x - a.x, b.y - a.y);
    let len_sq = dx * dx + dy * dy;
    let t = if len_sq == 0.0 {
        0.0
    } else {
        (((p.x - a.x) * dx + (p.y - a.y) * dy) / len_sq).clamp(0.0, 1.0)
    };
    let (px, py) = (a.x + t * dx, a.y + t * dy);
    ((p.x - px).powi(2) + (p.y - py).powi(2)).sqrt()
}

pub fn distance_to_outline(p: Point, outline: &[Vec<Point>]) -> f64 {
    outline
        .iter()
        .flat_map(|line| line.windows(2))
        .map(|seg| distance_to_segment(p, seg[0], seg[1]))
        .fold(f64::INFINITY, f64::min)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TracePhase {
    Playing,
    Passed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    pub player: PlayerId,
    pub shape: Shape,
    pub phase: TracePhase,
    pub remaining_secs: u32,
    /// Points of the latest stroke only.
    pub path: Vec<Point>,
    pub drawing: bool,
    settings: TracingSettings,
}

impl Trace {
    /// Share of the path lying on the outline.
    pub fn accuracy(&self) -> f64 {
        if self.path.is_empty() {
            return 0.0;
        }
        let outline = self.shape.outline();
        let reach = self.settings.tolerance + STROKE_WIDTH / 2.0;
        let near = self
            .path
            .iter()
            .filter(|p| distance_to_outline(**p, &outline) <= reach)
            .count();
        near as f64 / self.path.len() as f64
    }

    pub fn passes(&self) -> bool {
        self.path.len() >= self.settings.min_points && self.accuracy() > self.settings.pass_ratio
    }
}

impl SoloRound for Trace {
    type Settings = TracingSettings;

    const KIND: RoundKind = RoundKind::Tracing;

    fn start<R: Rng + ?Sized>(
        player: &str,
        settings: &TracingSettings,
        rng: &mut R,
    ) -> (Self, Vec<Effect>) {
        let shape = Shape::ALL[rng.random_range(0..Shape::ALL.len())];
        let game = Self {
            player: player.to_string(),
            shape,
            phase: TracePhase::Playing,
            remaining_secs: settings.duration_secs,
            path: Vec::new(),
            drawing: false,
            settings: settings.clone(),
        };
        let effects = vec![Effect::after_secs(
            Timer::for_player(TimerKind::Countdown, player),
            1,
        )];
        (game, effects)
    }

    fn act<R: Rng + ?Sized>(
        &mut self,
        action: &PlayerAction,
        _rng: &mut R,
    ) -> Result<Vec<Effect>, RoundError> {
        match *action {
            PlayerAction::BeginStroke { x, y } => {
                self.path.clear();
                self.path.push(Point { x, y });
                self.drawing = true;
            }
            PlayerAction::ExtendStroke { x, y } => {
                if self.drawing && self.path.len() < self.settings.max_points {
                    self.path.push(Point { x, y });
                }
            }
            PlayerAction::EndStroke => self.drawing = false,
            _ => return Err(RoundError::WrongAction(Self::KIND)),
        }
        Ok(Vec::new())
    }

    fn on_timer<R: Rng + ?Sized>(&mut self, kind: TimerKind, _rng: &mut R) -> Vec<Effect> {
        if kind != TimerKind::Countdown {
            return Vec::new();
        }
        self.remaining_secs = self.remaining_secs.saturating_sub(1);
        if self.remaining_secs > 0 {
            return vec![Effect::after_secs(
                Timer::for_player(TimerKind::Countdown, &self.player),
                1,
            )];
        }

        self.drawing = false;
        if self.passes() {
            self.phase = TracePhase::Passed;
            vec![Effect::Survived(self.player.clone())]
        } else {
            self.phase = TracePhase::Failed;
            vec![Effect::Eliminated(self.player.clone())]
        }
    }

    fn status(&self) -> serde_json::Value {
        serde_json::json!({
            "phase": self.phase,
            "shape": self.shape,
            "outline": self.shape.outline(),
            "remaining": self.remaining_secs,
            "points": self.path.len(),
            "canvas": CANVAS_SIZE,
        })
    }

    fn is_finished(&self) -> bool {
        self.phase != TracePhase::Playing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn game_with(shape: Shape) -> Trace {
        let mut rng = StdRng::seed_from_u64(0);
        let (mut game, _) = Trace::start("p", &TracingSettings::default(), &mut rng);
        game.shape = shape;
        game
    }

    fn trace_outline(game: &mut Trace, rng: &mut StdRng) {
        let outline = game.shape.outline();
        let mut first = true;
        for seg in outline.iter().flat_map(|line| line.windows(2)) {
            for i in 0..10 {
                let t = f64::from(i) / 10.0;
                let x = seg[0].x + (seg[1].x - seg[0].x) * t + 2.0;
                let y = seg[0].y + (seg[1].y - seg[0].y) * t - 2.0;
                let action = if first {
                    first = false;
                    PlayerAction::BeginStroke { x, y }
                } else {
                    PlayerAction::ExtendStroke { x, y }
                };
                game.act(&action, rng).unwrap();
            }
        }
        game.act(&PlayerAction::EndStroke, rng).unwrap();
    }

    fn expire(game: &mut Trace, rng: &mut StdRng) -> Vec<Effect> {
        game.remaining_secs = 1;
        game.on_timer(TimerKind::Countdown, rng)
    }

    #[test]
    fn outline_points_lie_on_the_outline() {
        for shape in Shape::ALL {
            let outline = shape.outline();
            for p in outline.iter().flatten() {
                assert!(distance_to_outline(*p, &outline) < 1e-9, "{shape}");
            }
        }
    }

    #[test]
    fn close_trace_passes_for_every_shape() {
        let mut rng = StdRng::seed_from_u64(1);
        for shape in Shape::ALL {
            let mut game = game_with(shape);
            trace_outline(&mut game, &mut rng);
            let effects = expire(&mut game, &mut rng);
            assert_eq!(effects, vec![Effect::Survived("p".to_string())], "{shape}");
            assert_eq!(game.phase, TracePhase::Passed);
        }
    }

    #[test]
    fn scribble_far_from_shape_fails() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut game = game_with(Shape::Circle);
        game.act(&PlayerAction::BeginStroke { x: 150.0, y: 150.0 }, &mut rng)
            .unwrap();
        for i in 0..20 {
            let x = 150.0 + f64::from(i);
            game.act(&PlayerAction::ExtendStroke { x, y: 150.0 }, &mut rng)
                .unwrap();
        }
        assert!(game.accuracy() < 0.6);
        let effects = expire(&mut game, &mut rng);
        assert_eq!(effects, vec![Effect::Eliminated("p".to_string())]);
    }

    #[test]
    fn too_few_points_fail_even_when_accurate() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut game = game_with(Shape::Circle);
        game.act(&PlayerAction::BeginStroke { x: 210.0, y: 150.0 }, &mut rng)
            .unwrap();
        game.act(&PlayerAction::ExtendStroke { x: 209.0, y: 152.0 }, &mut rng)
            .unwrap();
        assert!(game.accuracy() > 0.99);
        assert!(!game.passes());
    }

    #[test]
    fn new_stroke_discards_the_previous_one() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut game = game_with(Shape::Star);
        trace_outline(&mut game, &mut rng);
        game.act(&PlayerAction::BeginStroke { x: 0.0, y: 0.0 }, &mut rng)
            .unwrap();
        assert_eq!(game.path.len(), 1);
    }

    #[test]
    fn extend_without_begin_is_ignored() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut game = game_with(Shape::Triangle);
        game.act(&PlayerAction::ExtendStroke { x: 1.0, y: 1.0 }, &mut rng)
            .unwrap();
        assert!(game.path.is_empty());
        assert_eq!(
            game.act(&PlayerAction::Pull, &mut rng),
            Err(RoundError::WrongAction(RoundKind::Tracing))
        );
    }

    #[test]
    fn stroke_stops_growing_at_the_point_cap() {
        let mut rng = StdRng::seed_from_u64(7);
        let settings = TracingSettings {
            max_points: 50,
            ..TracingSettings::default()
        };
        let (mut game, _) = Trace::start("p", &settings, &mut rng);
        game.act(&PlayerAction::BeginStroke { x: 0.0, y: 0.0 }, &mut rng)
            .unwrap();
        for i in 0..500 {
            let x = f64::from(i);
            game.act(&PlayerAction::ExtendStroke { x, y: 0.0 }, &mut rng)
                .unwrap();
        }
        assert_eq!(game.path.len(), 50);

        // a fresh stroke starts over
        game.act(&PlayerAction::BeginStroke { x: 1.0, y: 1.0 }, &mut rng)
            .unwrap();
        assert_eq!(game.path.len(), 1);
    }

    #[test]
    fn status_carries_the_outline_to_trace() {
        let game = game_with(Shape::Triangle);
        let status = game.status();
        let outline = status["outline"].as_array().unwrap();
        assert_eq!(outline.len(), Shape::Triangle.outline().len());
        assert!(outline[0][0].get("x").is_some());
    }

    #[test]
    fn countdown_keeps_ticking_until_expiry() {
        let mut rng = StdRng::seed_from_u64(6);
        let mut game = game_with(Shape::Umbrella);
        let effects = game.on_timer(TimerKind::Countdown, &mut rng);
        assert_eq!(game.remaining_secs, 59);
        assert!(matches!(effects.as_slice(), [Effect::Schedule(..)]));
        assert!(!game.is_finished());
    }
}
