use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{broadcast, mpsc, oneshot};
use uuid::Uuid;

use crate::config::GameConfig;
use crate::error::{RoundError, SessionError};
use crate::rounds::{ActiveRound, Effect, Timer};
use crate::router;
use crate::timers::Timers;
use crate::types::*;

const CODE_LEN: usize = 6;
const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Commands the WebSocket handler (and the session's own timers) send to a
/// session task.
#[derive(Debug)]
pub enum SessionCommand {
    Join {
        socket_id: String,
        name: String,
    },
    AdvanceRound {
        socket_id: String,
    },
    EliminatePlayer {
        socket_id: String,
        player_id: String,
    },
    EndSession {
        socket_id: String,
    },
    StartRound {
        socket_id: String,
    },
    Action {
        socket_id: String,
        action: PlayerAction,
    },
    PlayerReconnect {
        socket_id: String,
        player_id: String,
    },
    AdminReconnect {
        socket_id: String,
        client_id: String,
    },
    Disconnect {
        socket_id: String,
    },
    AdminDisconnectCheck,
    Timer {
        epoch: u64,
        timer: Timer,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
}

/// Events broadcast from the session to WebSocket connections.
#[derive(Debug, Clone)]
pub enum GameEvent {
    /// Send a message to a specific socket.
    SendTo { socket_id: String, msg: ServerMsg },
    /// Send a message to every socket attached to the session.
    Broadcast { msg: ServerMsg },
    /// The session is gone; sockets detach after forwarding the message.
    Ended { msg: ServerMsg },
}

/// Registry of all live sessions.
pub struct Registry {
    /// code -> session handle
    pub sessions: dashmap::DashMap<String, SessionHandle>,
    /// socket_id -> code (for player sockets)
    pub player_sockets: dashmap::DashMap<String, String>,
    /// socket_id -> code (for admin sockets)
    pub admin_sockets: dashmap::DashMap<String, String>,
}

#[derive(Clone)]
pub struct SessionHandle {
    pub code: String,
    pub cmd_tx: mpsc::Sender<SessionCommand>,
    pub event_tx: broadcast::Sender<GameEvent>,
}

impl SessionHandle {
    /// Current session tree, or `None` once the session has ended.
    pub async fn snapshot(&self) -> Option<SessionSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx.send(SessionCommand::Snapshot { reply }).await.ok()?;
        rx.await.ok()
    }
}

impl Registry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sessions: dashmap::DashMap::new(),
            player_sockets: dashmap::DashMap::new(),
            admin_sockets: dashmap::DashMap::new(),
        })
    }

    /// Looks a session up by a code as typed by a user.
    pub fn find(&self, code: &str) -> Option<SessionHandle> {
        self.sessions
            .get(&normalize_code(code))
            .map(|handle| handle.clone())
    }

    pub fn remove_session(&self, code: &str) {
        self.sessions.remove(code);
        self.player_sockets.retain(|_, c| c != code);
        self.admin_sockets.retain(|_, c| c != code);
    }
}

/// Codes are matched case-insensitively.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

fn generate_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..CODE_LEN)
        .map(|_| char::from(CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())]))
        .collect()
}

/// Sub-state of the round being played.
struct RoundSlot {
    machine: ActiveRound,
    survived: BTreeSet<PlayerId>,
    timers: Timers,
}

/// The internal state of a running session.
struct SessionState {
    code: String,
    admin_socket_id: Option<String>,
    admin_client_id: String,

    status: SessionPhase,
    current_round: u32,
    players: BTreeMap<PlayerId, Player>,
    next_number: u32,

    /// socket_id -> player id
    sockets: HashMap<String, PlayerId>,
    /// Last view pushed to each player.
    views: HashMap<PlayerId, View>,

    round: Option<RoundSlot>,
    epoch: u64,

    config: Arc<GameConfig>,
    rng: StdRng,
    cmd_tx: mpsc::WeakSender<SessionCommand>,
}

impl SessionState {
    fn broadcast(&self, tx: &broadcast::Sender<GameEvent>, msg: ServerMsg) {
        let _ = tx.send(GameEvent::Broadcast { msg });
    }

    fn send_to(&self, tx: &broadcast::Sender<GameEvent>, socket_id: &str, msg: ServerMsg) {
        let _ = tx.send(GameEvent::SendTo {
            socket_id: socket_id.to_string(),
            msg,
        });
    }

    fn socket_of(&self, player_id: &str) -> Option<&String> {
        self.sockets
            .iter()
            .find_map(|(socket, id)| (id == player_id).then_some(socket))
    }

    fn send_to_player(&self, tx: &broadcast::Sender<GameEvent>, player_id: &str, msg: ServerMsg) {
        if let Some(socket) = self.socket_of(player_id) {
            self.send_to(tx, socket, msg);
        }
    }

    fn is_admin(&self, socket_id: &str) -> bool {
        self.admin_socket_id.as_deref() == Some(socket_id)
    }

    fn player_for(&self, socket_id: &str) -> Result<PlayerId, SessionError> {
        self.sockets
            .get(socket_id)
            .cloned()
            .ok_or(SessionError::UnknownPlayer)
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            code: self.code.clone(),
            status: self.status,
            current_round: self.current_round,
            players: self.players.clone(),
        }
    }

    /// Non-eliminated players in join order.
    fn alive(&self) -> Vec<PlayerId> {
        let mut alive: Vec<&Player> = self.players.values().filter(|p| !p.is_eliminated).collect();
        alive.sort_by_key(|p| p.number);
        alive.into_iter().map(|p| p.id.clone()).collect()
    }

    fn has_survived(&self, player_id: &str) -> bool {
        self.round
            .as_ref()
            .is_some_and(|slot| slot.survived.contains(player_id))
    }

    /// Publishes the snapshot and pushes any view that changed.
    fn publish(&mut self, tx: &broadcast::Sender<GameEvent>) {
        let snapshot = self.snapshot();
        self.broadcast(tx, ServerMsg::Session {
            session: snapshot.clone(),
        });

        let mut changed = Vec::new();
        for (socket, player_id) in &self.sockets {
            let current = self.views.get(player_id).copied();
            let view = router::route(
                Some(&snapshot),
                Some(player_id.as_str()),
                self.has_survived(player_id),
                current,
            );
            if current != Some(view) {
                changed.push((socket.clone(), player_id.clone(), view));
            }
        }
        for (socket, player_id, view) in changed {
            self.views.insert(player_id, view);
            self.send_to(tx, &socket, ServerMsg::View { view });
        }
    }

    /// Sends the round state: once to everyone for a shared round, otherwise
    /// each player (or just `only`) gets their own instance.
    fn publish_round(&self, tx: &broadcast::Sender<GameEvent>, only: Option<&str>) {
        let Some(slot) = &self.round else {
            return;
        };
        let kind = slot.machine.kind();
        if slot.machine.is_shared()
            && let Some(data) = slot.machine.shared_status()
        {
            self.broadcast(tx, ServerMsg::RoundStatus { kind, data });
            return;
        }
        for (socket, player_id) in &self.sockets {
            if only.is_some_and(|target| target != player_id.as_str()) {
                continue;
            }
            let data = slot.machine.status_for(player_id);
            self.send_to(tx, socket, ServerMsg::RoundStatus { kind, data });
        }
    }
}

/// Create a new session and spawn its task.
pub fn create_session(
    registry: Arc<Registry>,
    config: Arc<GameConfig>,
    admin_socket_id: String,
    admin_client_id: String,
    mut rng: StdRng,
) -> SessionHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(256);
    let (event_tx, _) = broadcast::channel(256);

    // retry until the code is free
    let handle = loop {
        let code = generate_code(&mut rng);
        if let Entry::Vacant(entry) = registry.sessions.entry(code.clone()) {
            let handle = SessionHandle {
                code,
                cmd_tx: cmd_tx.clone(),
                event_tx: event_tx.clone(),
            };
            entry.insert(handle.clone());
            break handle;
        }
    };
    registry
        .admin_sockets
        .insert(admin_socket_id.clone(), handle.code.clone());

    let state = SessionState {
        code: handle.code.clone(),
        admin_socket_id: Some(admin_socket_id),
        admin_client_id,
        status: SessionPhase::Lobby,
        current_round: 0,
        players: BTreeMap::new(),
        next_number: 1,
        sockets: HashMap::new(),
        views: HashMap::new(),
        round: None,
        epoch: 0,
        config,
        rng,
        cmd_tx: cmd_tx.downgrade(),
    };

    tokio::spawn(session_task(state, cmd_rx, event_tx, registry));

    tracing::info!(code = %handle.code, "session created");

    handle
}

/// Seeds a session RNG from the OS.
pub fn os_rng() -> StdRng {
    StdRng::from_os_rng()
}

async fn session_task(
    mut state: SessionState,
    mut cmd_rx: mpsc::Receiver<SessionCommand>,
    event_tx: broadcast::Sender<GameEvent>,
    registry: Arc<Registry>,
) {
    while let Some(cmd) = cmd_rx.recv().await {
        // the socket to report a failure to, if any
        let (origin, result) = match cmd {
            SessionCommand::Join { socket_id, name } => {
                let r = handle_join(&mut state, &event_tx, &registry, &socket_id, name);
                (Some(socket_id), r)
            }
            SessionCommand::AdvanceRound { socket_id } => {
                let r = handle_advance_round(&mut state, &event_tx, &socket_id);
                (Some(socket_id), r)
            }
            SessionCommand::EliminatePlayer { socket_id, player_id } => {
                let r = handle_eliminate_player(&mut state, &event_tx, &socket_id, &player_id);
                (Some(socket_id), r)
            }
            SessionCommand::EndSession { socket_id } => {
                if state.is_admin(&socket_id) {
                    end_session(&state, &event_tx, &registry, GameOverReason::SessionEnded);
                    break;
                }
                (Some(socket_id), Err(SessionError::NotAdmin))
            }
            SessionCommand::StartRound { socket_id } => {
                let r = handle_start_round(&mut state, &event_tx, &socket_id);
                (Some(socket_id), r)
            }
            SessionCommand::Action { socket_id, action } => {
                let r = handle_action(&mut state, &event_tx, &socket_id, &action);
                (Some(socket_id), r)
            }
            SessionCommand::PlayerReconnect { socket_id, player_id } => {
                let r = handle_player_reconnect(
                    &mut state, &event_tx, &registry, &socket_id, &player_id,
                );
                (Some(socket_id), r)
            }
            SessionCommand::AdminReconnect { socket_id, client_id } => {
                let r = handle_admin_reconnect(
                    &mut state, &event_tx, &registry, &socket_id, &client_id,
                );
                (Some(socket_id), r)
            }
            SessionCommand::Disconnect { socket_id } => {
                handle_disconnect(&mut state, &event_tx, &registry, &socket_id);
                (None, Ok(()))
            }
            SessionCommand::AdminDisconnectCheck => {
                if state.admin_socket_id.is_none() && state.status == SessionPhase::Lobby {
                    tracing::info!(code = %state.code, "admin did not come back, closing session");
                    end_session(&state, &event_tx, &registry, GameOverReason::SessionEnded);
                    break;
                }
                (None, Ok(()))
            }
            SessionCommand::Timer { epoch, timer } => {
                handle_timer(&mut state, &event_tx, epoch, timer);
                (None, Ok(()))
            }
            SessionCommand::Snapshot { reply } => {
                let _ = reply.send(state.snapshot());
                (None, Ok(()))
            }
        };

        if let (Some(socket_id), Err(err)) = (origin, result) {
            tracing::debug!(code = %state.code, %socket_id, "rejected: {}", err);
            state.send_to(&event_tx, &socket_id, ServerMsg::ErrorMessage {
                message: err.to_string(),
            });
        }
    }

    registry.remove_session(&state.code);
    tracing::info!(code = %state.code, "session task ended");
}

fn end_session(
    state: &SessionState,
    tx: &broadcast::Sender<GameEvent>,
    registry: &Arc<Registry>,
    reason: GameOverReason,
) {
    let _ = tx.send(GameEvent::Ended {
        msg: ServerMsg::SessionEnded {
            message: reason.message().to_string(),
        },
    });
    registry.remove_session(&state.code);
    tracing::info!(code = %state.code, "session ended");
}

fn handle_join(
    state: &mut SessionState,
    tx: &broadcast::Sender<GameEvent>,
    registry: &Arc<Registry>,
    socket_id: &str,
    name: String,
) -> Result<(), SessionError> {
    let name = name.trim().to_string();
    if name.is_empty() {
        return Err(SessionError::MissingJoinFields);
    }
    if state.sockets.contains_key(socket_id) {
        return Err(SessionError::AlreadyConnected);
    }

    let player = Player {
        id: Uuid::new_v4().to_string(),
        name,
        number: state.next_number,
        is_eliminated: false,
        coins: 0,
        connected: true,
    };
    state.next_number += 1;
    state.players.insert(player.id.clone(), player.clone());
    state.sockets.insert(socket_id.to_string(), player.id.clone());
    registry
        .player_sockets
        .insert(socket_id.to_string(), state.code.clone());

    tracing::info!(code = %state.code, number = player.number, "player joined");
    state.send_to(tx, socket_id, ServerMsg::Joined {
        code: state.code.clone(),
        player,
    });
    state.publish(tx);
    state.publish_round(tx, None);
    Ok(())
}

fn handle_advance_round(
    state: &mut SessionState,
    tx: &broadcast::Sender<GameEvent>,
    socket_id: &str,
) -> Result<(), SessionError> {
    if !state.is_admin(socket_id) {
        return Err(SessionError::NotAdmin);
    }
    advance_round(state, tx)
}

/// Moves to the next round, dropping the previous round's state and timers.
fn advance_round(
    state: &mut SessionState,
    tx: &broadcast::Sender<GameEvent>,
) -> Result<(), SessionError> {
    if state.current_round > FINAL_ROUND {
        return Err(SessionError::NoMoreRounds);
    }
    state.current_round += 1;
    state.status = SessionPhase::Playing;
    state.epoch += 1;
    state.round = RoundKind::from_round(state.current_round).map(|kind| RoundSlot {
        machine: ActiveRound::new(kind, &state.config.rounds),
        survived: BTreeSet::new(),
        timers: Timers::new(state.epoch, state.cmd_tx.clone()),
    });
    if let Some(slot) = state.round.as_mut() {
        for player in state.players.values().filter(|p| !p.connected) {
            slot.machine.player_disconnected(&player.id);
        }
    }

    tracing::info!(code = %state.code, round = state.current_round, "round advanced");
    state.publish(tx);
    state.publish_round(tx, None);
    Ok(())
}

fn handle_eliminate_player(
    state: &mut SessionState,
    tx: &broadcast::Sender<GameEvent>,
    socket_id: &str,
    player_id: &str,
) -> Result<(), SessionError> {
    if !state.is_admin(socket_id) {
        return Err(SessionError::NotAdmin);
    }
    let player = state
        .players
        .get_mut(player_id)
        .ok_or(SessionError::UnknownPlayer)?;
    player.is_eliminated = true;
    tracing::info!(code = %state.code, number = player.number, "player eliminated by admin");

    let effects = match state.round.as_mut() {
        Some(slot) => slot.machine.remove_player(player_id),
        None => Vec::new(),
    };
    apply_effects(state, tx, effects);
    state.publish(tx);
    state.publish_round(tx, None);
    Ok(())
}

fn handle_start_round(
    state: &mut SessionState,
    tx: &broadcast::Sender<GameEvent>,
    socket_id: &str,
) -> Result<(), SessionError> {
    let player = if state.is_admin(socket_id) {
        None
    } else {
        let player_id = state.player_for(socket_id)?;
        if state.players.get(&player_id).is_some_and(|p| p.is_eliminated) {
            return Err(SessionError::Eliminated);
        }
        if state.has_survived(&player_id) {
            return Err(SessionError::AlreadySurvived);
        }
        Some(player_id)
    };

    let alive = state.alive();
    let Some(slot) = state.round.as_mut() else {
        return Err(SessionError::NoActiveRound);
    };
    let shared = slot.machine.is_shared();
    let effects = match slot.machine.start(player.as_deref(), &alive, &mut state.rng) {
        Ok(effects) => effects,
        // someone else already opened a shared round
        Err(RoundError::AlreadyStarted) if shared => {
            state.publish_round(tx, player.as_deref());
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };
    tracing::debug!(code = %state.code, kind = %slot.machine.kind(), "round started");

    apply_effects(state, tx, effects);
    state.publish_round(tx, if shared { None } else { player.as_deref() });
    Ok(())
}

fn handle_action(
    state: &mut SessionState,
    tx: &broadcast::Sender<GameEvent>,
    socket_id: &str,
    action: &PlayerAction,
) -> Result<(), SessionError> {
    let player_id = state.player_for(socket_id)?;
    if state.players.get(&player_id).is_some_and(|p| p.is_eliminated) {
        return Err(SessionError::Eliminated);
    }
    if state.has_survived(&player_id) {
        return Err(SessionError::AlreadySurvived);
    }
    let Some(slot) = state.round.as_mut() else {
        return Err(SessionError::NoActiveRound);
    };

    let effects = slot.machine.act(&player_id, action, &mut state.rng)?;
    let shared = slot.machine.is_shared();
    apply_effects(state, tx, effects);
    state.publish_round(tx, if shared { None } else { Some(player_id.as_str()) });
    Ok(())
}

fn handle_timer(
    state: &mut SessionState,
    tx: &broadcast::Sender<GameEvent>,
    epoch: u64,
    timer: Timer,
) {
    let Some(slot) = state.round.as_mut() else {
        return;
    };
    if slot.timers.epoch() != epoch {
        tracing::trace!(epoch, current = slot.timers.epoch(), "stale timer ignored");
        return;
    }
    let effects = slot.machine.on_timer(&timer, &mut state.rng);
    let shared = slot.machine.is_shared();
    apply_effects(state, tx, effects);
    state.publish_round(tx, if shared { None } else { timer.player.as_deref() });
}

/// Applies what a round transition asked for, then auto-advances a finished
/// cooperative round.
fn apply_effects(state: &mut SessionState, tx: &broadcast::Sender<GameEvent>, effects: Vec<Effect>) {
    if effects.is_empty() {
        return;
    }
    let Some(slot) = state.round.as_mut() else {
        return;
    };
    let kind = slot.machine.kind();
    let reward = state.config.rounds.reward(kind);

    let mut roster_changed = false;
    let mut finished = false;
    let mut results = Vec::new();
    for effect in effects {
        match effect {
            Effect::Schedule(timer, delay) => slot.timers.schedule(timer, delay),
            Effect::Survived(player_id) => {
                let Some(player) = state.players.get_mut(&player_id) else {
                    continue;
                };
                if player.is_eliminated || !slot.survived.insert(player_id.clone()) {
                    continue;
                }
                player.coins += reward;
                roster_changed = true;
                results.push((player_id, ServerMsg::RoundResult {
                    kind,
                    survived: true,
                    reward,
                    message: format!("You survived {kind}!"),
                }));
            }
            Effect::Eliminated(player_id) => {
                let Some(player) = state.players.get_mut(&player_id) else {
                    continue;
                };
                if player.is_eliminated {
                    continue;
                }
                player.is_eliminated = true;
                roster_changed = true;
                tracing::debug!(code = %state.code, number = player.number, %kind, "player eliminated");
                results.push((player_id, ServerMsg::RoundResult {
                    kind,
                    survived: false,
                    reward: 0,
                    message: format!("You were eliminated in {kind}."),
                }));
            }
            Effect::Finished => finished = true,
        }
    }

    let cooperative = slot.machine.is_cooperative();
    for (player_id, msg) in results {
        state.send_to_player(tx, &player_id, msg);
    }
    if roster_changed {
        state.publish(tx);
    }

    if finished {
        tracing::info!(code = %state.code, %kind, "round finished");
        if cooperative && state.config.auto_advance {
            // the round publishes its final state before it is dropped
            state.publish_round(tx, None);
            if let Err(err) = advance_round(state, tx) {
                tracing::warn!(code = %state.code, "auto-advance failed: {}", err);
            }
        }
    }
}

fn handle_player_reconnect(
    state: &mut SessionState,
    tx: &broadcast::Sender<GameEvent>,
    registry: &Arc<Registry>,
    socket_id: &str,
    player_id: &str,
) -> Result<(), SessionError> {
    let player = state
        .players
        .get_mut(player_id)
        .ok_or(SessionError::UnknownPlayer)?;
    if player.connected {
        return Err(SessionError::AlreadyConnected);
    }
    player.connected = true;
    let player = player.clone();

    state
        .sockets
        .insert(socket_id.to_string(), player_id.to_string());
    registry
        .player_sockets
        .insert(socket_id.to_string(), state.code.clone());
    // force the view to be pushed again
    state.views.remove(player_id);
    if let Some(slot) = state.round.as_mut() {
        slot.machine.player_reconnected(player_id);
    }

    state.send_to(tx, socket_id, ServerMsg::Joined {
        code: state.code.clone(),
        player,
    });
    state.publish(tx);
    state.publish_round(tx, Some(player_id));

    tracing::info!(code = %state.code, "player reconnected");
    Ok(())
}

fn handle_admin_reconnect(
    state: &mut SessionState,
    tx: &broadcast::Sender<GameEvent>,
    registry: &Arc<Registry>,
    socket_id: &str,
    client_id: &str,
) -> Result<(), SessionError> {
    if state.admin_client_id != client_id {
        return Err(SessionError::NotAdmin);
    }
    // a newer page of the same admin takes over the old socket
    if let Some(old) = state.admin_socket_id.replace(socket_id.to_string()) {
        registry.admin_sockets.remove(&old);
    }
    registry
        .admin_sockets
        .insert(socket_id.to_string(), state.code.clone());

    state.send_to(tx, socket_id, ServerMsg::SessionCreated {
        code: state.code.clone(),
        client_id: client_id.to_string(),
    });
    state.send_to(tx, socket_id, ServerMsg::Session {
        session: state.snapshot(),
    });
    if let Some(slot) = &state.round
        && let Some(data) = slot.machine.shared_status()
    {
        state.send_to(tx, socket_id, ServerMsg::RoundStatus {
            kind: slot.machine.kind(),
            data,
        });
    }

    tracing::info!(code = %state.code, "admin reconnected");
    Ok(())
}

fn handle_disconnect(
    state: &mut SessionState,
    tx: &broadcast::Sender<GameEvent>,
    registry: &Arc<Registry>,
    socket_id: &str,
) {
    if state.is_admin(socket_id) {
        state.admin_socket_id = None;
        registry.admin_sockets.remove(socket_id);
        if state.status != SessionPhase::Lobby {
            return;
        }

        // give the admin time to come back (page navigation)
        let grace = Duration::from_secs(state.config.admin_grace_secs);
        let cmd_tx = state.cmd_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if let Some(tx) = cmd_tx.upgrade() {
                let _ = tx.send(SessionCommand::AdminDisconnectCheck).await;
            }
        });
        return;
    }

    registry.player_sockets.remove(socket_id);
    let Some(player_id) = state.sockets.remove(socket_id) else {
        return;
    };
    if let Some(player) = state.players.get_mut(&player_id) {
        player.connected = false;
    }
    if let Some(slot) = state.round.as_mut() {
        slot.machine.player_disconnected(&player_id);
    }
    state.publish(tx);
    state.publish_round(tx, None);
}
