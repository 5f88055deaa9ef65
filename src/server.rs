use std::sync::Arc;

use askama::Template;
use axum::Router;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, broadcast, mpsc};
use tower_http::services::ServeDir;

use crate::config::GameConfig;
use crate::error::SessionError;
use crate::session::{self, GameEvent, Registry, SessionCommand, SessionHandle};
use crate::types::*;

type WsSender = Arc<Mutex<SplitSink<WebSocket, Message>>>;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub config: Arc<GameConfig>,
}

// ─── Templates ────────────────────────────────────────────────────

#[derive(Template)]
#[template(path = "index.html")]
struct IndexTemplate;

#[derive(Template)]
#[template(path = "admin.html")]
struct AdminTemplate;

#[derive(Template)]
#[template(path = "game.html")]
struct GameTemplate {
    code: String,
    role: String,
}

#[derive(Deserialize)]
struct GameQuery {
    role: Option<String>,
}

// ─── Routes ───────────────────────────────────────────────────────

/// Builds the router and its shared state.
pub fn build_app(config: GameConfig) -> (Router, AppState) {
    let state = AppState {
        registry: Registry::new(),
        config: Arc::new(config),
    };

    let app = Router::new()
        .route("/", get(index_page))
        .route("/admin", get(admin_page))
        .route("/game/{code}", get(game_page))
        .route("/ws", get(ws_handler))
        .nest_service("/static", ServeDir::new("static"))
        .with_state(state.clone());

    (app, state)
}

async fn index_page() -> impl IntoResponse {
    Html(IndexTemplate.to_string())
}

async fn admin_page() -> impl IntoResponse {
    Html(AdminTemplate.to_string())
}

async fn game_page(Path(code): Path<String>, Query(query): Query<GameQuery>) -> impl IntoResponse {
    let role = match query.role.as_deref() {
        Some("admin") => "admin",
        _ => "player",
    };
    Html(
        GameTemplate {
            code: session::normalize_code(&code),
            role: role.to_string(),
        }
        .to_string(),
    )
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

// ─── Socket ───────────────────────────────────────────────────────

/// Per-connection state kept by the socket loop.
struct Connection {
    socket_id: String,
    sender: WsSender,
    attach_tx: mpsc::Sender<broadcast::Receiver<GameEvent>>,
    admin: bool,
    /// Session this socket follows. One live session per socket.
    attached: Option<SessionHandle>,
}

impl Connection {
    /// Subscribes before any command is sent so no reply is missed.
    async fn attach(&mut self, handle: &SessionHandle) -> Result<(), SessionError> {
        if let Some(current) = &self.attached {
            if current.cmd_tx.same_channel(&handle.cmd_tx) {
                return Ok(());
            }
            if !current.cmd_tx.is_closed() {
                return Err(SessionError::OtherSession);
            }
        }
        let _ = self.attach_tx.send(handle.event_tx.subscribe()).await;
        self.attached = Some(handle.clone());
        Ok(())
    }

    async fn error(&self, err: SessionError) {
        send_msg(&self.sender, &ServerMsg::ErrorMessage {
            message: err.to_string(),
        })
        .await;
    }

    async fn session_gone(&self) {
        send_msg(&self.sender, &ServerMsg::SessionEnded {
            message: GameOverReason::SessionEnded.message().to_string(),
        })
        .await;
    }
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (sender, mut receiver) = socket.split();
    let sender = Arc::new(Mutex::new(sender));

    let socket_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(%socket_id, "websocket connected");

    let (attach_tx, attach_rx) = mpsc::channel(4);
    let event_task = tokio::spawn(forward_events(sender.clone(), socket_id.clone(), attach_rx));

    let mut conn = Connection {
        socket_id: socket_id.clone(),
        sender,
        attach_tx,
        admin: false,
        attached: None,
    };

    while let Some(Ok(msg)) = receiver.next().await {
        let Message::Text(text) = msg else { continue };

        let client_msg: ClientMsg = match serde_json::from_str(&text) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("Invalid message: {}", e);
                continue;
            }
        };
        handle_client_msg(&state, &mut conn, client_msg).await;
    }

    tracing::info!(%socket_id, "websocket disconnected");
    event_task.abort();

    let code = state
        .registry
        .admin_sockets
        .get(&socket_id)
        .or_else(|| state.registry.player_sockets.get(&socket_id))
        .map(|code| code.value().clone());
    if let Some(handle) = code.and_then(|code| state.registry.find(&code)) {
        let _ = handle
            .cmd_tx
            .send(SessionCommand::Disconnect { socket_id })
            .await;
    }
}

async fn handle_client_msg(state: &AppState, conn: &mut Connection, msg: ClientMsg) {
    let socket_id = conn.socket_id.clone();
    let command = match msg {
        ClientMsg::AdminAuth { username, password } => {
            if username == state.config.admin_username && password == state.config.admin_password {
                conn.admin = true;
                send_msg(&conn.sender, &ServerMsg::AdminAuthenticated).await;
            } else {
                send_msg(&conn.sender, &ServerMsg::ErrorMessage {
                    message: "Invalid username or password".to_string(),
                })
                .await;
            }
            return;
        }

        ClientMsg::CreateSession => {
            if !conn.admin {
                conn.error(SessionError::NotAdmin).await;
                return;
            }
            if conn.attached.as_ref().is_some_and(|h| !h.cmd_tx.is_closed()) {
                conn.error(SessionError::OtherSession).await;
                return;
            }
            let client_id = uuid::Uuid::new_v4().to_string();
            let handle = session::create_session(
                state.registry.clone(),
                state.config.clone(),
                socket_id,
                client_id.clone(),
                session::os_rng(),
            );
            if let Err(err) = conn.attach(&handle).await {
                conn.error(err).await;
                return;
            }
            send_msg(&conn.sender, &ServerMsg::SessionCreated {
                code: handle.code.clone(),
                client_id,
            })
            .await;
            if let Some(session) = handle.snapshot().await {
                send_msg(&conn.sender, &ServerMsg::Session { session }).await;
            }
            return;
        }

        ClientMsg::JoinSession { code, name } => {
            if code.trim().is_empty() || name.trim().is_empty() {
                conn.error(SessionError::MissingJoinFields).await;
                return;
            }
            let Some(handle) = state.registry.find(&code) else {
                conn.error(SessionError::UnknownCode).await;
                return;
            };
            if let Err(err) = conn.attach(&handle).await {
                conn.error(err).await;
                return;
            }
            (handle, SessionCommand::Join { socket_id, name })
        }

        ClientMsg::PlayerReconnect { code, player_id } => {
            let Some(handle) = state.registry.find(&code) else {
                conn.session_gone().await;
                return;
            };
            if let Err(err) = conn.attach(&handle).await {
                conn.error(err).await;
                return;
            }
            (handle, SessionCommand::PlayerReconnect { socket_id, player_id })
        }

        ClientMsg::AdminReconnect { code, client_id } => {
            let Some(handle) = state.registry.find(&code) else {
                conn.session_gone().await;
                return;
            };
            if let Err(err) = conn.attach(&handle).await {
                conn.error(err).await;
                return;
            }
            (handle, SessionCommand::AdminReconnect { socket_id, client_id })
        }

        ClientMsg::AdvanceRound { code } => match state.registry.find(&code) {
            Some(handle) => (handle, SessionCommand::AdvanceRound { socket_id }),
            None => return conn.session_gone().await,
        },

        ClientMsg::EliminatePlayer { code, player_id } => match state.registry.find(&code) {
            Some(handle) => (handle, SessionCommand::EliminatePlayer { socket_id, player_id }),
            None => return conn.session_gone().await,
        },

        ClientMsg::EndSession { code } => match state.registry.find(&code) {
            Some(handle) => (handle, SessionCommand::EndSession { socket_id }),
            None => return conn.session_gone().await,
        },

        ClientMsg::StartRound { code } => match state.registry.find(&code) {
            Some(handle) => (handle, SessionCommand::StartRound { socket_id }),
            None => return conn.session_gone().await,
        },

        ClientMsg::Action { code, action } => match state.registry.find(&code) {
            Some(handle) => (handle, SessionCommand::Action { socket_id, action }),
            None => return conn.session_gone().await,
        },
    };

    let (handle, command) = command;
    if handle.cmd_tx.send(command).await.is_err() {
        conn.session_gone().await;
    }
}

enum Next {
    Attach(Option<broadcast::Receiver<GameEvent>>),
    Event(Result<GameEvent, RecvError>),
}

/// Forwards session events addressed to this socket. A new receiver arriving
/// on `attach_rx` replaces the current subscription.
async fn forward_events(
    sender: WsSender,
    socket_id: String,
    mut attach_rx: mpsc::Receiver<broadcast::Receiver<GameEvent>>,
) {
    let mut events: Option<broadcast::Receiver<GameEvent>> = None;
    loop {
        let next = match events.as_mut() {
            Some(rx) => tokio::select! {
                attached = attach_rx.recv() => Next::Attach(attached),
                event = rx.recv() => Next::Event(event),
            },
            None => Next::Attach(attach_rx.recv().await),
        };

        let event = match next {
            Next::Attach(Some(rx)) => {
                events = Some(rx);
                continue;
            }
            Next::Attach(None) => return,
            Next::Event(Ok(event)) => event,
            Next::Event(Err(RecvError::Lagged(skipped))) => {
                tracing::warn!(%socket_id, skipped, "socket fell behind its session");
                continue;
            }
            Next::Event(Err(RecvError::Closed)) => {
                events = None;
                continue;
            }
        };

        let msg = match event {
            GameEvent::SendTo { socket_id: target, msg } if target == socket_id => msg,
            GameEvent::SendTo { .. } => continue,
            GameEvent::Broadcast { msg } => msg,
            GameEvent::Ended { msg } => {
                events = None;
                msg
            }
        };

        if let Ok(json) = serde_json::to_string(&msg) {
            let mut s = sender.lock().await;
            if s.send(Message::Text(json.into())).await.is_err() {
                return;
            }
        }
    }
}

async fn send_msg(sender: &WsSender, msg: &ServerMsg) {
    if let Ok(json) = serde_json::to_string(msg) {
        let mut s = sender.lock().await;
        let _ = s.send(Message::Text(json.into())).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn templates_render() {
        assert!(IndexTemplate.to_string().contains("join-form"));
        assert!(AdminTemplate.to_string().contains("admin-login"));
        let page = GameTemplate {
            code: "AB12CD".to_string(),
            role: "player".to_string(),
        }
        .to_string();
        assert!(page.contains("AB12CD"));
    }
}
