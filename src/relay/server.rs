use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::info;

use super::routes::create_router;
use super::state::RelayState;

/// Periodically remove rooms that have been idle longer than the TTL
pub fn spawn_room_gc(state: RelayState, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.tick().await;
        loop {
            interval.tick().await;
            state
                .sweep_idle_rooms(chrono::Utc::now().timestamp_millis())
                .await;
        }
    })
}

/// Serve the relay on an already bound listener until the task is dropped
pub async fn serve_on(listener: TcpListener, state: RelayState, gc_every: Duration) -> Result<()> {
    let addr = listener.local_addr()?;
    let gc = spawn_room_gc(state.clone(), gc_every);

    info!("Relay listening on {}", addr);
    let result = axum::serve(listener, create_router(state))
        .await
        .context("Relay server failed");

    gc.abort();
    result
}

/// Bind `addr` and serve the relay
pub async fn serve(addr: SocketAddr, state: RelayState, gc_every: Duration) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind relay to {}", addr))?;
    serve_on(listener, state, gc_every).await
}
