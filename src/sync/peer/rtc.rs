// WebRTC data channel connector
//
// Signaling is manual, so the local description is only handed out after
// ICE gathering has finished (or timed out): trickle candidates would never
// reach the other side.

use anyhow::{Context, Result};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use super::{await_gathering, LinkEvent, PeerConnector, PeerConnectorFactory};

const CHANNEL_LABEL: &str = "talestolen";

type ChannelSlot = Arc<Mutex<Option<Arc<RTCDataChannel>>>>;

/// Builds WebRTC peer connections
pub struct WebRtcFactory {
    ice_servers: Vec<String>,
    gather_timeout: Duration,
}

impl WebRtcFactory {
    pub fn new(ice_servers: Vec<String>, gather_timeout: Duration) -> Self {
        Self {
            ice_servers,
            gather_timeout,
        }
    }
}

#[async_trait::async_trait]
impl PeerConnectorFactory for WebRtcFactory {
    async fn connect(&self, events: mpsc::UnboundedSender<LinkEvent>) -> Result<Arc<dyn PeerConnector>> {
        let mut media = MediaEngine::default();
        media.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media)?;

        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = if self.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }]
        };

        let pc = Arc::new(
            api.new_peer_connection(RTCConfiguration {
                ice_servers,
                ..Default::default()
            })
            .await
            .context("Failed to create peer connection")?,
        );

        let channel: ChannelSlot = Arc::new(Mutex::new(None));

        {
            let events = events.clone();
            pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
                debug!("Peer connection state: {}", state);
                if matches!(
                    state,
                    RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed
                ) {
                    let _ = events.send(LinkEvent::Closed);
                }
                Box::pin(async {})
            }));
        }

        // The joining side receives the channel created by the host
        {
            let channel = Arc::clone(&channel);
            let events = events.clone();
            pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                info!("Remote data channel announced: {}", dc.label());
                bind_channel(dc, &channel, &events);
                Box::pin(async {})
            }));
        }

        Ok(Arc::new(WebRtcConnector {
            pc,
            channel,
            events,
            gather_timeout: self.gather_timeout,
        }))
    }
}

fn bind_channel(dc: Arc<RTCDataChannel>, slot: &ChannelSlot, events: &mpsc::UnboundedSender<LinkEvent>) {
    {
        let events = events.clone();
        dc.on_open(Box::new(move || {
            let _ = events.send(LinkEvent::Open);
            Box::pin(async {})
        }));
    }
    {
        let events = events.clone();
        dc.on_close(Box::new(move || {
            let _ = events.send(LinkEvent::Closed);
            Box::pin(async {})
        }));
    }
    {
        let events = events.clone();
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            match String::from_utf8(msg.data.to_vec()) {
                Ok(text) => {
                    let _ = events.send(LinkEvent::Message(text));
                }
                Err(_) => warn!("Dropping non-text data channel message"),
            }
            Box::pin(async {})
        }));
    }

    if dc.ready_state() == RTCDataChannelState::Open {
        let _ = events.send(LinkEvent::Open);
    }

    if let Ok(mut current) = slot.lock() {
        *current = Some(dc);
    }
}

/// One WebRTC peer connection with a single text data channel
pub struct WebRtcConnector {
    pc: Arc<RTCPeerConnection>,
    channel: ChannelSlot,
    events: mpsc::UnboundedSender<LinkEvent>,
    gather_timeout: Duration,
}

impl WebRtcConnector {
    fn channel(&self) -> Option<Arc<RTCDataChannel>> {
        self.channel.lock().ok().and_then(|c| c.clone())
    }

    /// Set the local description and return it once candidates are collected
    async fn finish_local(&self, description: RTCSessionDescription) -> Result<String> {
        let mut gathered = self.pc.gathering_complete_promise().await;
        self.pc
            .set_local_description(description)
            .await
            .context("Failed to set local description")?;

        await_gathering(
            async move {
                let _ = gathered.recv().await;
            },
            self.gather_timeout,
        )
        .await;

        let local = self
            .pc
            .local_description()
            .await
            .context("Local description missing after gathering")?;
        Ok(serde_json::to_string(&local)?)
    }
}

#[async_trait::async_trait]
impl PeerConnector for WebRtcConnector {
    async fn create_offer(&self) -> Result<String> {
        let dc = self
            .pc
            .create_data_channel(CHANNEL_LABEL, None)
            .await
            .context("Failed to create data channel")?;
        bind_channel(dc, &self.channel, &self.events);

        let offer = self.pc.create_offer(None).await.context("Failed to create offer")?;
        self.finish_local(offer).await
    }

    async fn accept_answer(&self, answer: &str) -> Result<()> {
        let answer: RTCSessionDescription =
            serde_json::from_str(answer).context("Answer is not a session description")?;
        self.pc
            .set_remote_description(answer)
            .await
            .context("Failed to apply answer")?;
        Ok(())
    }

    async fn receive_offer(&self, offer: &str) -> Result<String> {
        let offer: RTCSessionDescription =
            serde_json::from_str(offer).context("Offer is not a session description")?;
        self.pc
            .set_remote_description(offer)
            .await
            .context("Failed to apply offer")?;

        let answer = self.pc.create_answer(None).await.context("Failed to create answer")?;
        self.finish_local(answer).await
    }

    async fn send(&self, text: String) -> Result<()> {
        let dc = self.channel().context("No data channel")?;
        dc.send_text(text).await.context("Failed to send on data channel")?;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.channel()
            .map(|dc| dc.ready_state() == RTCDataChannelState::Open)
            .unwrap_or(false)
    }

    async fn close(&self) -> Result<()> {
        if let Some(dc) = self.channel() {
            dc.close().await.context("Failed to close data channel")?;
        }
        self.pc.close().await.context("Failed to close peer connection")?;
        Ok(())
    }
}
