use anyhow::{Context, Result};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use talestolen::relay::{self, CreateRoomResponse, HealthResponse, RelayState, ROOM_ID_LEN};
use talestolen::session::{SessionState, SessionStore, SlotKind};
use talestolen::sync::{spawn_inbound, Inbound, RelayTransport, SyncMessage, Transport};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower::ServiceExt;

async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> Result<T> {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn post_room(body: &str) -> Result<Request<Body>> {
    Ok(Request::builder()
        .method("POST")
        .uri("/api/room")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))?)
}

#[tokio::test]
async fn test_create_room_and_health() -> Result<()> {
    let state = RelayState::new(Duration::from_secs(60));
    let app = relay::create_router(state.clone());

    let response = app.clone().oneshot(post_room(r#"{"roomId":" hall-a "}"#)?).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    assert_eq!(&body[..], br#"{"roomId":"hall-a"}"#);

    let response = app.clone().oneshot(post_room("{}")?).await?;
    let created: CreateRoomResponse = body_json(response).await?;
    assert_eq!(created.room_id.len(), ROOM_ID_LEN);

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let health: HealthResponse = body_json(response).await?;
    assert!(health.ok);
    assert!(health.ts > 0);
    assert_eq!(health.rooms, 2);
    Ok(())
}

async fn start_relay() -> Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let state = RelayState::new(Duration::from_secs(600));
    tokio::spawn(relay::serve_on(listener, state, Duration::from_secs(600)));
    Ok(format!("http://{}", addr))
}

async fn next_state(rx: &mut mpsc::Receiver<Inbound>) -> Result<SessionState> {
    let inbound = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .context("Timed out waiting for relay")?
        .context("Relay transport stopped")?;
    assert_eq!(inbound.origin, "relay");
    match inbound.message {
        SyncMessage::State(state) => Ok(state),
        other => anyhow::bail!("Unexpected message: {:?}", other),
    }
}

#[tokio::test]
async fn test_snapshots_fan_out_through_a_room() -> Result<()> {
    let url = start_relay().await?;

    let (admin_tx, mut admin_rx) = mpsc::channel(8);
    let (display_tx, mut display_rx) = mpsc::channel(8);
    let admin = RelayTransport::connect(&url, "room1", admin_tx).await?;
    let display = RelayTransport::connect(&url, "room1", display_tx).await?;
    assert!(admin.is_open());

    let mut state = SessionState::default()
        .enqueue_direct("Kari", "Oslo", SlotKind::Opening, 0)
        .context("enqueue")?;
    state.version = 1;
    admin.publish(&state).await?;

    let received = next_state(&mut display_rx).await?;
    assert_eq!(received, state);

    // The sender does not get its own push back
    let echoed = tokio::time::timeout(Duration::from_millis(300), admin_rx.recv()).await;
    assert!(echoed.is_err());

    // A late joiner gets the last snapshot straight away
    let (late_tx, mut late_rx) = mpsc::channel(8);
    let _late = RelayTransport::connect(&url, "room1", late_tx).await?;
    assert_eq!(next_state(&mut late_rx).await?.version, 1);

    // Other rooms are unaffected
    let (other_tx, mut other_rx) = mpsc::channel(8);
    let _other = RelayTransport::connect(&url, "room2", other_tx).await?;
    let quiet = tokio::time::timeout(Duration::from_millis(300), other_rx.recv()).await;
    assert!(quiet.is_err());

    drop(display);
    Ok(())
}

async fn relay_surface(url: &str, room: &str) -> Result<Arc<SessionStore>> {
    let store = Arc::new(SessionStore::with_system_clock(SessionState::default()));
    let (tx, rx) = mpsc::channel(8);
    spawn_inbound(Arc::clone(&store), rx);
    let transport = RelayTransport::connect(url, room, tx).await?;
    store.attach_and_publish(transport).await;
    Ok(store)
}

#[tokio::test]
async fn test_state_from_before_connect_reaches_the_room() -> Result<()> {
    let url = start_relay().await?;

    // The admin queues and starts a speaker while still offline
    let admin = Arc::new(SessionStore::with_system_clock(SessionState::default()));
    admin.enqueue_direct("Kari", "Oslo", SlotKind::Opening).await;
    admin.start_next().await;
    let (admin_tx, admin_rx) = mpsc::channel(8);
    spawn_inbound(Arc::clone(&admin), admin_rx);
    let transport = RelayTransport::connect(&url, "hall", admin_tx).await?;
    admin.attach_and_publish(transport).await;

    let display = relay_surface(&url, "hall").await?;
    let mut updates = display.subscribe();
    let seen = tokio::time::timeout(Duration::from_secs(5), updates.wait_for(|s| s.version >= 2))
        .await
        .context("Timed out waiting for catch-up")??
        .clone();
    assert_eq!(seen, admin.snapshot().await);

    // The display's empty snapshot changes neither the admin nor the room
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(admin.snapshot().await.version, 2);
    assert!(admin.snapshot().await.current_speaker.is_some());

    let (late_tx, mut late_rx) = mpsc::channel(8);
    let _late = RelayTransport::connect(&url, "hall", late_tx).await?;
    assert_eq!(next_state(&mut late_rx).await?.version, 2);
    Ok(())
}
