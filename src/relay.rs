//! Shared local tracks. Every peer connection binds the same track objects,
//! so each frame is written once and fanned out by webrtc-rs to all peers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use webrtc::api::media_engine::{MIME_TYPE_H264, MIME_TYPE_OPUS};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

pub const STREAM_ID: &str = "video-streamer";
pub const H264_FMTP: &str =
    "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f";

/// Destination for timed media samples.
#[async_trait]
pub trait SampleSink: Send + Sync {
    async fn push(&self, data: Bytes, duration: Duration) -> anyhow::Result<()>;
}

#[async_trait]
impl SampleSink for TrackLocalStaticSample {
    async fn push(&self, data: Bytes, duration: Duration) -> anyhow::Result<()> {
        let sample = Sample {
            data,
            duration,
            ..Default::default()
        };
        self.write_sample(&sample).await?;
        Ok(())
    }
}

pub struct MediaRelay {
    video: Option<Arc<TrackLocalStaticSample>>,
    audio: Option<Arc<TrackLocalStaticSample>>,
}

impl MediaRelay {
    pub fn new(with_video: bool, with_audio: bool) -> Self {
        let video = with_video.then(|| {
            Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_H264.to_owned(),
                    clock_rate: 90000,
                    channels: 0,
                    sdp_fmtp_line: H264_FMTP.to_owned(),
                    rtcp_feedback: vec![],
                },
                "video".to_owned(),
                STREAM_ID.to_owned(),
            ))
        });

        // Opus 在 SDP 中固定声明 48kHz/2ch，实际编码为单声道
        let audio = with_audio.then(|| {
            Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_OPUS.to_owned(),
                    clock_rate: 48000,
                    channels: 2,
                    sdp_fmtp_line: "minptime=10;useinbandfec=1".to_owned(),
                    rtcp_feedback: vec![],
                },
                "audio".to_owned(),
                STREAM_ID.to_owned(),
            ))
        });

        Self { video, audio }
    }

    pub fn video(&self) -> Option<Arc<TrackLocalStaticSample>> {
        self.video.clone()
    }

    pub fn audio(&self) -> Option<Arc<TrackLocalStaticSample>> {
        self.audio.clone()
    }
}
