use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::watch;

use crate::relay::SampleSink;
use crate::ts::{AccessUnit, TsDemuxer};

const PTS_CLOCK_HZ: u64 = 90_000;
const PTS_MASK: u64 = (1 << 33) - 1;
// v4l2 输入固定 10fps
const DEFAULT_FRAME_DURATION: Duration = Duration::from_millis(100);
const MAX_FRAME_DURATION: Duration = Duration::from_secs(1);
// 关键帧突发时避免内核丢包（ffmpeg udp 的 fifo_size=5000000）
pub const RECV_BUFFER_SIZE: usize = 5_000_000;

/// Derives sample durations from consecutive PTS values.
#[derive(Debug, Default)]
pub struct FrameClock {
    last_pts: Option<u64>,
}

impl FrameClock {
    pub fn duration_for(&mut self, pts: Option<u64>) -> Duration {
        let Some(pts) = pts else {
            return DEFAULT_FRAME_DURATION;
        };
        let previous = self.last_pts.replace(pts);
        let Some(previous) = previous else {
            return DEFAULT_FRAME_DURATION;
        };

        // 33 位 PTS 回绕
        let delta = pts.wrapping_sub(previous) & PTS_MASK;
        if delta == 0 {
            return DEFAULT_FRAME_DURATION;
        }
        let duration = Duration::from_micros(delta * 1_000_000 / PTS_CLOCK_HZ);
        if duration > MAX_FRAME_DURATION {
            DEFAULT_FRAME_DURATION
        } else {
            duration
        }
    }
}

/// Receives the MPEG-TS leg of the ffmpeg tee and feeds H.264 access units
/// to the relay's video track.
pub struct TsIngest {
    socket: UdpSocket,
}

impl TsIngest {
    pub async fn bind(port: u16) -> anyhow::Result<Self> {
        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .context("Failed to create UDP socket")?;
        // 内核可能按 rmem_max 截断，失败也不影响收流
        if let Err(e) = socket.set_recv_buffer_size(RECV_BUFFER_SIZE) {
            log::warn!("Failed to raise UDP receive buffer: {}", e);
        }
        socket
            .bind(&addr.into())
            .with_context(|| format!("Failed to bind UDP {}", addr))?;
        socket.set_nonblocking(true)?;
        let socket = UdpSocket::from_std(socket.into())?;
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Returns the number of access units written. Each unit is held until
    /// the next one arrives, so its duration is the gap to the next PTS and
    /// the RTP timestamps line up with the PTS values.
    pub async fn run(
        self,
        sink: Arc<dyn SampleSink>,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<u64> {
        let mut buf = vec![0u8; 64 * 1024];
        let mut demux = TsDemuxer::new();
        let mut clock = FrameClock::default();
        let mut written = 0u64;
        let mut first_frame = true;
        let mut pending: Option<AccessUnit> = None;

        log::info!("MPEG-TS ingest listening on udp://{}", self.local_addr()?);

        loop {
            let len = tokio::select! {
                res = self.socket.recv_from(&mut buf) => res?.0,
                _ = shutdown.changed() => break,
            };

            for unit in demux.push(&buf[..len]) {
                if first_frame {
                    log::info!(
                        "First video frame received ({} bytes, PID {:?}, keyframe: {})",
                        unit.data.len(),
                        demux.video_pid(),
                        unit.random_access
                    );
                    first_frame = false;
                }
                let duration = clock.duration_for(unit.pts);
                let Some(previous) = pending.replace(unit) else {
                    continue;
                };
                if let Err(e) = sink.push(previous.data, duration).await {
                    log::warn!("Failed to write video sample: {}", e);
                    continue;
                }
                written += 1;
            }
        }

        log::info!(
            "MPEG-TS ingest stopped after {} frames ({} bytes skipped resyncing)",
            written,
            demux.skipped_bytes()
        );
        Ok(written)
    }
}
