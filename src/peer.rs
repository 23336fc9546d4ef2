//! WebRTC sessions: one `RTCPeerConnection` per viewer, all bound to the
//! relay's shared tracks.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{API, APIBuilder};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::relay::MediaRelay;

const GATHER_TIMEOUT: Duration = Duration::from_secs(10);

/// SDP as exchanged with the browser: `{"sdp": "...", "type": "offer"}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionDescription {
    pub sdp: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("malformed offer: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unsupported description type '{0}', expected 'offer'")]
    NotAnOffer(String),
    #[error("invalid SDP: {0}")]
    InvalidSdp(webrtc::Error),
    #[error("webrtc: {0}")]
    WebRtc(#[from] webrtc::Error),
    #[error("no local description after negotiation")]
    NoLocalDescription,
}

type PeerMap = Arc<Mutex<HashMap<Uuid, Arc<RTCPeerConnection>>>>;

pub(crate) fn build_api() -> Result<API, webrtc::Error> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs()?;
    let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;
    Ok(APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build())
}

pub struct PeerRegistry {
    api: API,
    rtc_config: RTCConfiguration,
    relay: Arc<MediaRelay>,
    peers: PeerMap,
}

impl PeerRegistry {
    pub fn new(relay: Arc<MediaRelay>, stun_urls: &[String]) -> Result<Self, webrtc::Error> {
        let mut rtc_config = RTCConfiguration::default();
        if !stun_urls.is_empty() {
            rtc_config.ice_servers = vec![RTCIceServer {
                urls: stun_urls.to_vec(),
                ..Default::default()
            }];
        }
        Ok(Self {
            api: build_api()?,
            rtc_config,
            relay,
            peers: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub async fn len(&self) -> usize {
        self.peers.lock().await.len()
    }

    /// Answer a browser offer. Tracks are attached before the answer is
    /// created so they appear in it.
    pub async fn answer(
        &self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, SignalingError> {
        if offer.kind != "offer" {
            return Err(SignalingError::NotAnOffer(offer.kind));
        }
        let remote = RTCSessionDescription::offer(offer.sdp).map_err(SignalingError::InvalidSdp)?;

        let pc = Arc::new(self.api.new_peer_connection(self.rtc_config.clone()).await?);
        let id = Uuid::new_v4();
        let active = {
            let mut peers = self.peers.lock().await;
            peers.insert(id, pc.clone());
            peers.len()
        };
        log::info!("Peer {} created ({} active)", id, active);

        self.watch_state(id, &pc);

        match self.negotiate(&pc, remote).await {
            Ok(answer) => Ok(answer),
            Err(e) => {
                log::warn!("Peer {} negotiation failed: {}", id, e);
                self.peers.lock().await.remove(&id);
                if let Err(close_err) = pc.close().await {
                    log::warn!("Peer {} close failed: {}", id, close_err);
                }
                Err(e)
            }
        }
    }

    fn watch_state(&self, id: Uuid, pc: &Arc<RTCPeerConnection>) {
        let peers = self.peers.clone();
        let weak_pc = Arc::downgrade(pc);

        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            log::info!("Connection state: {} (peer {})", state, id);
            let peers = peers.clone();
            let weak_pc = weak_pc.clone();
            Box::pin(async move {
                if !matches!(
                    state,
                    RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed
                ) {
                    return;
                }
                peers.lock().await.remove(&id);
                if state == RTCPeerConnectionState::Failed {
                    if let Some(pc) = weak_pc.upgrade() {
                        // 不在回调里直接 close
                        tokio::spawn(async move {
                            if let Err(e) = pc.close().await {
                                log::warn!("Peer {} close failed: {}", id, e);
                            }
                        });
                    }
                }
            })
        }));
    }

    async fn negotiate(
        &self,
        pc: &Arc<RTCPeerConnection>,
        remote: RTCSessionDescription,
    ) -> Result<SessionDescription, SignalingError> {
        match self.relay.video() {
            Some(track) => attach(pc, track).await?,
            None => log::warn!("No video track available yet"),
        }
        match self.relay.audio() {
            Some(track) => attach(pc, track).await?,
            None => log::warn!("No audio track available"),
        }

        pc.set_remote_description(remote).await?;
        let answer = pc.create_answer(None).await?;
        let mut gather_complete = pc.gathering_complete_promise().await;
        pc.set_local_description(answer).await?;

        // 非 trickle 模式，等候选地址收集完再返回
        if tokio::time::timeout(GATHER_TIMEOUT, gather_complete.recv())
            .await
            .is_err()
        {
            log::warn!("ICE gathering timed out, answering with partial candidates");
        }

        let local = pc
            .local_description()
            .await
            .ok_or(SignalingError::NoLocalDescription)?;
        Ok(SessionDescription {
            sdp: local.sdp,
            kind: local.sdp_type.to_string(),
        })
    }

    /// Close every peer connection concurrently.
    pub async fn close_all(&self) {
        let peers: Vec<(Uuid, Arc<RTCPeerConnection>)> =
            self.peers.lock().await.drain().collect();

        let results =
            futures_util::future::join_all(peers.iter().map(|(_, pc)| pc.close())).await;
        for ((id, _), result) in peers.iter().zip(results) {
            if let Err(e) = result {
                log::warn!("Peer {} close failed: {}", id, e);
            }
        }
        log::info!("All peer connections closed");
    }
}

async fn attach(
    pc: &RTCPeerConnection,
    track: Arc<TrackLocalStaticSample>,
) -> Result<(), webrtc::Error> {
    let sender = pc
        .add_track(track as Arc<dyn TrackLocal + Send + Sync>)
        .await?;
    drain_rtcp(sender);
    Ok(())
}

// 读取 RTCP 以驱动拦截器（NACK 等），内容本身不使用
fn drain_rtcp(sender: Arc<RTCRtpSender>) {
    tokio::spawn(async move {
        let mut buf = vec![0u8; 1500];
        while sender.read(&mut buf).await.is_ok() {}
    });
}
