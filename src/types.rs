use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub type PlayerId = String;

/// Number of mini-games in a session. Round `FINAL_ROUND + 1` is the
/// "all games completed" screen.
pub const FINAL_ROUND: u32 = 6;

/// A player in a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub number: u32,
    pub is_eliminated: bool,
    pub coins: u32,
    pub connected: bool,
}

/// Lifecycle phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Lobby,
    Playing,
}

/// Full session tree as published to subscribers on every write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub code: String,
    pub status: SessionPhase,
    pub current_round: u32,
    pub players: BTreeMap<PlayerId, Player>,
}

/// The six mini-games, in play order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundKind {
    Reaction,
    Tracing,
    TugOfWar,
    Parity,
    SteppingStone,
    Combat,
}

impl RoundKind {
    pub const ALL: [RoundKind; 6] = [
        Self::Reaction,
        Self::Tracing,
        Self::TugOfWar,
        Self::Parity,
        Self::SteppingStone,
        Self::Combat,
    ];

    /// Maps a session round number (1-based) to its game.
    pub fn from_round(round: u32) -> Option<Self> {
        match round {
            1..=FINAL_ROUND => Some(Self::ALL[(round - 1) as usize]),
            _ => None,
        }
    }
}

impl std::fmt::Display for RoundKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reaction => write!(f, "Red Light, Green Light"),
            Self::Tracing => write!(f, "Honeycomb"),
            Self::TugOfWar => write!(f, "Tug of War"),
            Self::Parity => write!(f, "Marbles"),
            Self::SteppingStone => write!(f, "Glass Bridge"),
            Self::Combat => write!(f, "Squid Game"),
        }
    }
}

/// Why a player landed on the terminal screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameOverReason {
    Eliminated,
    SessionEnded,
    AllCompleted,
}

impl GameOverReason {
    pub fn message(self) -> &'static str {
        match self {
            Self::Eliminated => "You have been eliminated!",
            Self::SessionEnded => "The game session has ended or was deleted.",
            Self::AllCompleted => {
                "All games completed! Congratulations! You are the last survivor."
            }
        }
    }
}

/// Screen a player should be looking at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum View {
    Lobby,
    Round { kind: RoundKind },
    GameOver { reason: GameOverReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    Odd,
    Even,
}

impl Parity {
    pub fn of(n: u32) -> Self {
        if n % 2 == 0 { Self::Even } else { Self::Odd }
    }
}

/// A glass panel on the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CombatMove {
    Attack,
    Defend,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// In-round input from a player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PlayerAction {
    MoveStart,
    MoveStop,
    BeginStroke { x: f64, y: f64 },
    ExtendStroke { x: f64, y: f64 },
    EndStroke,
    Pull,
    Guess { parity: Parity },
    ChoosePanel { side: Side },
    Combat { choice: CombatMove },
}

/// Messages sent from server to clients via WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMsg {
    AdminAuthenticated,
    SessionCreated {
        code: String,
        client_id: String,
    },
    Joined {
        code: String,
        player: Player,
    },
    Session {
        session: SessionSnapshot,
    },
    RoundStatus {
        kind: RoundKind,
        data: serde_json::Value,
    },
    RoundResult {
        kind: RoundKind,
        survived: bool,
        reward: u32,
        message: String,
    },
    View {
        view: View,
    },
    ErrorMessage {
        message: String,
    },
    SessionEnded {
        message: String,
    },
}

/// Messages sent from clients to server via WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMsg {
    // Admin
    AdminAuth { username: String, password: String },
    CreateSession,
    AdminReconnect { code: String, client_id: String },
    AdvanceRound { code: String },
    EliminatePlayer { code: String, player_id: String },
    EndSession { code: String },

    // Player
    JoinSession { code: String, name: String },
    PlayerReconnect { code: String, player_id: String },
    StartRound { code: String },
    Action { code: String, action: PlayerAction },
}
