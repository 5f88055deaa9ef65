use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use squidparty::build_app;
use squidparty::config::GameConfig;
use squidparty::types::{ClientMsg, ServerMsg};

pub type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    _shutdown: tokio::task::JoinHandle<()>,
}

impl TestServer {
    pub async fn new() -> Self {
        Self::from_config(GameConfig::default()).await
    }

    pub async fn from_config(config: GameConfig) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (app, _state) = build_app(config);
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Give the server a moment to start accepting
        tokio::time::sleep(Duration::from_millis(20)).await;

        Self {
            addr,
            _shutdown: handle,
        }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub async fn connect(&self) -> Ws {
        let (stream, _) = tokio_tungstenite::connect_async(self.ws_url()).await.unwrap();
        stream
    }
}

pub async fn send(ws: &mut Ws, msg: ClientMsg) {
    let json = serde_json::to_string(&msg).unwrap();
    ws.send(Message::Text(json.into())).await.unwrap();
}

/// Reads messages until one matches, failing after a few seconds.
pub async fn recv_until<F>(ws: &mut Ws, mut pred: F) -> ServerMsg
where
    F: FnMut(&ServerMsg) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let frame = tokio::time::timeout_at(deadline, ws.next())
            .await
            .expect("timed out waiting for server message")
            .expect("socket closed")
            .unwrap();
        let Message::Text(text) = frame else { continue };
        let msg: ServerMsg = serde_json::from_str(&text).unwrap();
        if pred(&msg) {
            return msg;
        }
    }
}

/// Logs in as admin and creates a session. Returns the code.
pub async fn admin_session(ws: &mut Ws) -> String {
    send(ws, ClientMsg::AdminAuth {
        username: "admin".to_string(),
        password: "password".to_string(),
    })
    .await;
    recv_until(ws, |m| matches!(m, ServerMsg::AdminAuthenticated)).await;
    send(ws, ClientMsg::CreateSession).await;
    match recv_until(ws, |m| matches!(m, ServerMsg::SessionCreated { .. })).await {
        ServerMsg::SessionCreated { code, .. } => code,
        _ => unreachable!(),
    }
}
