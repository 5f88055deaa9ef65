use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::RoundKind;

/// Resolves a path relative to the config directory.
fn config_path(sub: &str) -> PathBuf {
    let base = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config".to_string());
    Path::new(&base).join(sub)
}

/// Server configuration loaded from `game.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GameConfig {
    pub admin_username: String,
    pub admin_password: String,
    /// Advance the session when a cooperative round resolves on its own.
    pub auto_advance: bool,
    /// How long a lobby survives its admin disconnecting.
    pub admin_grace_secs: u64,
    pub rounds: RoundsConfig,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            admin_username: "admin".to_string(),
            admin_password: "password".to_string(),
            auto_advance: true,
            admin_grace_secs: 10,
            rounds: RoundsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RoundsConfig {
    pub reaction: ReactionSettings,
    pub tracing: TracingSettings,
    pub tug_of_war: TugOfWarSettings,
    pub parity: ParitySettings,
    pub stepping_stone: SteppingStoneSettings,
    pub combat: CombatSettings,
}

impl RoundsConfig {
    /// Coins credited for surviving `kind`.
    pub fn reward(&self, kind: RoundKind) -> u32 {
        match kind {
            RoundKind::Reaction => self.reaction.reward,
            RoundKind::Tracing => self.tracing.reward,
            RoundKind::TugOfWar => self.tug_of_war.reward,
            RoundKind::Parity => self.parity.reward,
            RoundKind::SteppingStone => self.stepping_stone.reward,
            RoundKind::Combat => self.combat.reward,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReactionSettings {
    pub duration_secs: u32,
    pub go_probability: f64,
    pub signal_min_secs: u32,
    pub signal_max_secs: u32,
    pub move_tick_ms: u64,
    pub move_step: u8,
    pub reward: u32,
}

impl Default for ReactionSettings {
    fn default() -> Self {
        Self {
            duration_secs: 30,
            go_probability: 0.6,
            signal_min_secs: 2,
            signal_max_secs: 5,
            move_tick_ms: 100,
            move_step: 2,
            reward: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TracingSettings {
    pub duration_secs: u32,
    /// Max distance in canvas pixels from the outline.
    pub tolerance: f64,
    pub pass_ratio: f64,
    pub min_points: usize,
    /// Points kept per stroke; later ones are dropped.
    pub max_points: usize,
    pub reward: u32,
}

impl Default for TracingSettings {
    fn default() -> Self {
        Self {
            duration_secs: 60,
            tolerance: 15.0,
            pass_ratio: 0.6,
            min_points: 10,
            max_points: 2000,
            reward: 150,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TugMode {
    Teams,
    Solo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TugOfWarSettings {
    pub mode: TugMode,
    pub duration_secs: u32,
    pub pull_strength: u8,
    pub opponent_tick_ms: u64,
    pub opponent_strength: u8,
    pub reward: u32,
}

impl Default for TugOfWarSettings {
    fn default() -> Self {
        Self {
            mode: TugMode::Teams,
            duration_secs: 30,
            pull_strength: 3,
            opponent_tick_ms: 200,
            opponent_strength: 1,
            reward: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ParitySettings {
    pub max_count: u32,
    pub reveal_ms: u64,
    pub reward: u32,
}

impl Default for ParitySettings {
    fn default() -> Self {
        Self {
            max_count: 20,
            reveal_ms: 3000,
            reward: 250,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeMode {
    Turns,
    Solo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SteppingStoneSettings {
    pub mode: BridgeMode,
    pub steps: usize,
    pub reveal_ms: u64,
    pub reward: u32,
}

impl Default for SteppingStoneSettings {
    fn default() -> Self {
        Self {
            mode: BridgeMode::Turns,
            steps: 5,
            reveal_ms: 2000,
            reward: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CombatSettings {
    pub starting_health: u32,
    pub min_damage: u32,
    pub max_damage: u32,
    /// Damage taken while defending is divided by this.
    pub defend_divisor: u32,
    pub resolve_ms: u64,
    pub reward: u32,
}

impl Default for CombatSettings {
    fn default() -> Self {
        Self {
            starting_health: 100,
            min_damage: 10,
            max_damage: 29,
            defend_divisor: 3,
            resolve_ms: 1500,
            reward: 1000,
        }
    }
}

impl GameConfig {
    /// Repairs values the round machines cannot run with.
    pub fn validate(&mut self) {
        let reaction = &mut self.rounds.reaction;
        if reaction.signal_min_secs == 0 {
            tracing::warn!("reaction.signalMinSecs must be positive, using 1");
            reaction.signal_min_secs = 1;
        }
        if reaction.signal_max_secs < reaction.signal_min_secs {
            tracing::warn!("reaction.signalMaxSecs below signalMinSecs, clamping");
            reaction.signal_max_secs = reaction.signal_min_secs;
        }
        if !(0.0..=1.0).contains(&reaction.go_probability) {
            tracing::warn!("reaction.goProbability out of range, using 0.6");
            reaction.go_probability = 0.6;
        }
        if reaction.move_tick_ms == 0 {
            reaction.move_tick_ms = 100;
        }
        if self.rounds.tug_of_war.opponent_tick_ms == 0 {
            self.rounds.tug_of_war.opponent_tick_ms = 200;
        }
        let trace = &mut self.rounds.tracing;
        if trace.max_points < trace.min_points {
            tracing::warn!("tracing.maxPoints below minPoints, clamping");
            trace.max_points = trace.min_points;
        }
        if self.rounds.parity.max_count == 0 {
            tracing::warn!("parity.maxCount must be positive, using 20");
            self.rounds.parity.max_count = 20;
        }
        if self.rounds.stepping_stone.steps == 0 {
            tracing::warn!("steppingStone.steps must be positive, using 5");
            self.rounds.stepping_stone.steps = 5;
        }
        let combat = &mut self.rounds.combat;
        if combat.max_damage < combat.min_damage {
            tracing::warn!("combat.maxDamage below minDamage, clamping");
            combat.max_damage = combat.min_damage;
        }
        if combat.defend_divisor == 0 {
            combat.defend_divisor = 1;
        }
    }
}

/// Initialize the config directory with defaults if missing.
pub fn init() -> Result<(), ConfigError> {
    let base = config_path("");
    if !base.exists() {
        fs::create_dir_all(&base).map_err(|source| ConfigError::Io {
            path: base.display().to_string(),
            source,
        })?;
    }

    let game_path = config_path("game.json");
    if !game_path.exists() {
        let data = serde_json::to_string_pretty(&GameConfig::default()).map_err(|source| {
            ConfigError::Parse {
                path: game_path.display().to_string(),
                source,
            }
        })?;
        fs::write(&game_path, data).map_err(|source| ConfigError::Io {
            path: game_path.display().to_string(),
            source,
        })?;
        tracing::info!("Wrote default config to {}", game_path.display());
    }

    Ok(())
}

/// Load the game configuration.
pub fn load_game_config() -> Result<GameConfig, ConfigError> {
    let path = config_path("game.json");
    let data = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let mut config = parse_game_config(&data).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })?;
    config.validate();
    Ok(config)
}

pub fn parse_game_config(data: &str) -> Result<GameConfig, serde_json::Error> {
    serde_json::from_str(data)
}
