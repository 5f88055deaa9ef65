use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

use squidparty::{build_app, config};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{err}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    config::init()?;
    let game_config = config::load_game_config()?;

    let port: u16 = std::env::var("PORT")
        .unwrap_or_else(|_| "3000".to_string())
        .parse()
        .map_err(|e| format!("Invalid PORT: {e}"))?;

    let (app, _state) = build_app(game_config);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .map_err(|e| format!("Failed to bind port {port}: {e}"))?;

    tracing::info!("Squid party server running on port {}", port);

    axum::serve(listener, app).await?;
    Ok(())
}
