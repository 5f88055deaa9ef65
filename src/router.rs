//! Decides which screen a player should be on.

use crate::types::{FINAL_ROUND, GameOverReason, RoundKind, SessionPhase, SessionSnapshot, View};

/// Routes `player` given the latest snapshot.
///
/// `session` is `None` once the session was ended or never existed.
/// `survived` is whether the player already cleared the current round, in
/// which case they wait in the lobby for the next one.
pub fn route(
    session: Option<&SessionSnapshot>,
    player: Option<&str>,
    survived: bool,
    current: Option<View>,
) -> View {
    let Some(session) = session else {
        return View::GameOver {
            reason: GameOverReason::SessionEnded,
        };
    };

    let eliminated = player
        .and_then(|id| session.players.get(id))
        .is_some_and(|p| p.is_eliminated);
    if eliminated {
        if let Some(view @ View::GameOver { .. }) = current {
            return view;
        }
        return View::GameOver {
            reason: GameOverReason::Eliminated,
        };
    }

    if session.status == SessionPhase::Lobby || session.current_round == 0 {
        return View::Lobby;
    }
    if session.current_round > FINAL_ROUND {
        return View::GameOver {
            reason: GameOverReason::AllCompleted,
        };
    }
    match RoundKind::from_round(session.current_round) {
        Some(_) if survived => View::Lobby,
        Some(kind) => View::Round { kind },
        None => View::Lobby,
    }
}
