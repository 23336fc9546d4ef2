use bytes::{Bytes, BytesMut};

use super::packet::{PID_PAT, SYNC_BYTE, TS_PACKET_SIZE, TsPacket};
use super::pes::PesHeader;
use super::psi::{Pat, Pmt, STREAM_TYPE_H264};

/// One reassembled video PES payload (Annex-B H.264 for ffmpeg output).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessUnit {
    /// 90 kHz presentation timestamp
    pub pts: Option<u64>,
    pub random_access: bool,
    pub data: Bytes,
}

struct PesAssembly {
    pts: Option<u64>,
    random_access: bool,
    expected_len: Option<usize>,
    data: BytesMut,
}

impl PesAssembly {
    fn finish(self) -> Option<AccessUnit> {
        if self.data.is_empty() {
            return None;
        }
        Some(AccessUnit {
            pts: self.pts,
            random_access: self.random_access,
            data: self.data.freeze(),
        })
    }

    fn complete(&self) -> bool {
        self.expected_len.is_some_and(|len| self.data.len() >= len)
    }
}

/// Streaming demuxer. Accepts arbitrary chunks (UDP datagrams, partial
/// packets) and yields H.264 access units in arrival order.
#[derive(Default)]
pub struct TsDemuxer {
    buf: BytesMut,
    pmt_pid: Option<u16>,
    pat_version: Option<u8>,
    pmt_version: Option<u8>,
    video_pid: Option<u16>,
    last_cc: Option<u8>,
    last_payload: Option<Bytes>,
    pes: Option<PesAssembly>,
    skipped_bytes: u64,
}

impl TsDemuxer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn video_pid(&self) -> Option<u16> {
        self.video_pid
    }

    /// Bytes discarded while hunting for the sync byte.
    pub fn skipped_bytes(&self) -> u64 {
        self.skipped_bytes
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<AccessUnit> {
        self.buf.extend_from_slice(chunk);
        let mut units = Vec::new();

        while self.buf.len() >= TS_PACKET_SIZE {
            if self.buf[0] != SYNC_BYTE {
                // 重新对齐到下一个 0x47
                let skip = self.buf[1..]
                    .iter()
                    .position(|b| *b == SYNC_BYTE)
                    .map(|p| p + 1)
                    .unwrap_or(self.buf.len());
                let _ = self.buf.split_to(skip);
                self.skipped_bytes += skip as u64;
                continue;
            }

            let raw = self.buf.split_to(TS_PACKET_SIZE).freeze();
            match TsPacket::parse(raw) {
                Ok(packet) => {
                    if let Some(unit) = self.handle_packet(packet) {
                        units.push(unit);
                    }
                }
                Err(e) => log::debug!("Dropping TS packet: {}", e),
            }
        }

        units
    }

    /// Forget continuity state and drop the partial PES.
    fn reset_video_state(&mut self) {
        self.last_cc = None;
        self.last_payload = None;
        self.pes = None;
    }

    /// Emit whatever is pending for the video PID.
    pub fn flush(&mut self) -> Option<AccessUnit> {
        self.pes.take().and_then(PesAssembly::finish)
    }

    fn handle_packet(&mut self, packet: TsPacket) -> Option<AccessUnit> {
        if packet.transport_error {
            return None;
        }

        if packet.pid == PID_PAT {
            self.handle_pat(&packet);
            return None;
        }
        if Some(packet.pid) == self.pmt_pid {
            self.handle_pmt(&packet);
            return None;
        }
        if Some(packet.pid) == self.video_pid {
            return self.handle_video(packet);
        }
        None
    }

    fn handle_pat(&mut self, packet: &TsPacket) {
        let Some(section) = packet.psi_section() else {
            return;
        };
        match Pat::parse(&section) {
            Ok(pat) => {
                if self.pat_version.is_some_and(|v| v != pat.version) {
                    log::debug!("PAT version changed to {}", pat.version);
                    self.reset_video_state();
                }
                self.pat_version = Some(pat.version);
                let pmt_pid = pat.first_pmt_pid();
                if pmt_pid != self.pmt_pid {
                    log::debug!("PAT: PMT PID {:?}", pmt_pid);
                    self.pmt_pid = pmt_pid;
                }
            }
            Err(e) => log::debug!("Bad PAT: {}", e),
        }
    }

    fn handle_pmt(&mut self, packet: &TsPacket) {
        let Some(section) = packet.psi_section() else {
            return;
        };
        match Pmt::parse(&section) {
            Ok(pmt) => {
                if self.pmt_version.is_some_and(|v| v != pmt.version) {
                    log::debug!("PMT version changed to {}", pmt.version);
                    self.reset_video_state();
                }
                self.pmt_version = Some(pmt.version);

                let video_pid = pmt.first_of_type(STREAM_TYPE_H264);
                if video_pid != self.video_pid {
                    log::info!(
                        "MPEG-TS video PID: {:?} (PCR PID {})",
                        video_pid,
                        pmt.pcr_pid
                    );
                    self.video_pid = video_pid;
                    self.reset_video_state();
                }
            }
            Err(e) => log::debug!("Bad PMT: {}", e),
        }
    }

    fn handle_video(&mut self, packet: TsPacket) -> Option<AccessUnit> {
        let payload = packet.payload.clone()?;

        if packet.discontinuity() {
            self.last_cc = None;
            self.last_payload = None;
        }

        // 连续计数器：只有 CC 和负载都相同才算重复包；其余跳号（包括 ffmpeg
        // 重启后 CC 从 0 开始）都丢弃当前不完整的 PES
        if let Some(last) = self.last_cc {
            if packet.continuity_counter == last && self.last_payload.as_ref() == Some(&payload) {
                return None;
            }
            if packet.continuity_counter != (last + 1) & 0x0F {
                log::debug!(
                    "TS discontinuity on PID {}: expected {}, got {}",
                    packet.pid,
                    (last + 1) & 0x0F,
                    packet.continuity_counter
                );
                self.pes = None;
            }
        }
        self.last_cc = Some(packet.continuity_counter);
        self.last_payload = Some(payload.clone());

        let mut finished = None;
        if packet.payload_unit_start {
            finished = self.flush();
            match PesHeader::parse(&payload) {
                Ok(header) => {
                    let mut data = BytesMut::with_capacity(64 * 1024);
                    data.extend_from_slice(&payload[header.payload_offset..]);
                    self.pes = Some(PesAssembly {
                        pts: header.pts,
                        random_access: packet.random_access(),
                        expected_len: header.expected_payload_len(),
                        data,
                    });
                }
                Err(e) => log::debug!("Bad PES header: {}", e),
            }
        } else if let Some(pes) = self.pes.as_mut() {
            pes.data.extend_from_slice(&payload);
        }

        if finished.is_none() && self.pes.as_ref().is_some_and(PesAssembly::complete) {
            finished = self.flush();
        }
        finished
    }
}
