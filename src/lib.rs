//! Multiplayer elimination party game: six mini-games played in rounds,
//! coordinated over WebSockets by one actor task per session.

pub mod config;
pub mod error;
pub mod rounds;
pub mod router;
pub mod server;
pub mod session;
pub mod timers;
pub mod types;

pub use server::{AppState, build_app};
