use bytes::Bytes;

use super::{Result, TsError};

pub const TS_PACKET_SIZE: usize = 188;
pub const SYNC_BYTE: u8 = 0x47;
pub const PID_PAT: u16 = 0x0000;

/// One 188-byte transport packet. Payload and adaptation field are slices
/// of the original buffer.
#[derive(Debug, Clone)]
pub struct TsPacket {
    pub transport_error: bool,
    pub payload_unit_start: bool,
    pub pid: u16,
    pub continuity_counter: u8,
    pub adaptation_field: Option<Bytes>,
    pub payload: Option<Bytes>,
}

impl TsPacket {
    pub fn parse(data: Bytes) -> Result<Self> {
        if data.len() != TS_PACKET_SIZE {
            return Err(TsError::InvalidPacketSize(data.len()));
        }
        if data[0] != SYNC_BYTE {
            return Err(TsError::InvalidSyncByte(data[0]));
        }

        let transport_error = data[1] & 0x80 != 0;
        let payload_unit_start = data[1] & 0x40 != 0;
        let pid = ((data[1] as u16 & 0x1F) << 8) | data[2] as u16;
        let adaptation_field_control = (data[3] >> 4) & 0x03;
        let continuity_counter = data[3] & 0x0F;

        let mut offset = 4;
        let mut adaptation_field = None;
        if adaptation_field_control & 0x02 != 0 {
            let len = data[offset] as usize;
            offset += 1;
            if offset + len > data.len() {
                return Err(TsError::InsufficientData {
                    expected: offset + len,
                    actual: data.len(),
                });
            }
            if len > 0 {
                adaptation_field = Some(data.slice(offset..offset + len));
            }
            offset += len;
        }

        let payload = if adaptation_field_control & 0x01 != 0 && offset < data.len() {
            Some(data.slice(offset..))
        } else {
            None
        };

        Ok(Self {
            transport_error,
            payload_unit_start,
            pid,
            continuity_counter,
            adaptation_field,
            payload,
        })
    }

    /// Random access indicator from the adaptation field (keyframe marker).
    pub fn random_access(&self) -> bool {
        self.adaptation_field
            .as_ref()
            .is_some_and(|af| af[0] & 0x40 != 0)
    }

    /// Discontinuity indicator: the continuity counter restarts here.
    pub fn discontinuity(&self) -> bool {
        self.adaptation_field
            .as_ref()
            .is_some_and(|af| af[0] & 0x80 != 0)
    }

    /// PSI section bytes with the pointer field skipped. Only valid on PUSI packets.
    pub fn psi_section(&self) -> Option<Bytes> {
        let payload = self.payload.as_ref()?;
        if !self.payload_unit_start || payload.is_empty() {
            return None;
        }
        let start = 1 + payload[0] as usize;
        (start < payload.len()).then(|| payload.slice(start..))
    }
}
