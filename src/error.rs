use crate::types::RoundKind;

/// Errors from session-level operations. The message is what the offending
/// socket sees.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Please enter a game code and your player name.")]
    MissingJoinFields,

    #[error("Game code does not exist.")]
    UnknownCode,

    #[error("Only the session admin can do that")]
    NotAdmin,

    #[error("Player not found")]
    UnknownPlayer,

    #[error("Player already connected")]
    AlreadyConnected,

    #[error("This connection is already in another game")]
    OtherSession,

    #[error("You have been eliminated")]
    Eliminated,

    #[error("All games have already been played")]
    NoMoreRounds,

    #[error("No game is being played right now")]
    NoActiveRound,

    #[error("You already survived this round")]
    AlreadySurvived,

    #[error(transparent)]
    Round(#[from] RoundError),
}

/// Errors from an in-round action.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoundError {
    #[error("The round has not started")]
    NotStarted,

    #[error("The round is already running")]
    AlreadyStarted,

    #[error("The round is over")]
    Finished,

    #[error("You are not taking part in this round")]
    NotParticipant,

    #[error("You are out of this round")]
    OutOfRound,

    #[error("It is not your turn")]
    NotYourTurn,

    #[error("Wait for the current move to resolve")]
    MovePending,

    #[error("That action does not belong to {0}")]
    WrongAction(RoundKind),
}

/// Errors while loading or initializing the config directory.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}
