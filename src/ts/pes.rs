use super::{Result, TsError};

/// Parse a 33-bit PTS or DTS timestamp from 5 bytes.
fn parse_timestamp(data: &[u8]) -> u64 {
    (((data[0] as u64 >> 1) & 0x07) << 30)
        | ((data[1] as u64) << 22)
        | (((data[2] as u64 >> 1) & 0x7F) << 15)
        | ((data[3] as u64) << 7)
        | ((data[4] as u64 >> 1) & 0x7F)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PesHeader {
    /// 0 means unbounded (common for video)
    pub packet_length: u16,
    pub pts: Option<u64>,
    /// Offset of the elementary stream data
    pub payload_offset: usize,
}

impl PesHeader {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 9 {
            return Err(TsError::InsufficientData {
                expected: 9,
                actual: data.len(),
            });
        }
        if data[..3] != [0x00, 0x00, 0x01] {
            return Err(TsError::InvalidPesStartCode);
        }

        let packet_length = u16::from_be_bytes([data[4], data[5]]);
        let pts_dts_flags = (data[7] >> 6) & 0x03;
        let header_data_length = data[8] as usize;
        let payload_offset = 9 + header_data_length;
        if data.len() < payload_offset {
            return Err(TsError::InsufficientData {
                expected: payload_offset,
                actual: data.len(),
            });
        }

        // DTS（如有）紧跟在 PTS 之后，这里只用 PTS
        let pts = match pts_dts_flags {
            0b10 if header_data_length >= 5 => Some(parse_timestamp(&data[9..14])),
            0b11 if header_data_length >= 10 => Some(parse_timestamp(&data[9..14])),
            _ => None,
        };

        Ok(Self {
            packet_length,
            pts,
            payload_offset,
        })
    }

    /// Number of ES bytes announced by `packet_length`, if bounded.
    pub fn expected_payload_len(&self) -> Option<usize> {
        if self.packet_length == 0 {
            return None;
        }
        // packet_length counts everything after the length field
        (self.packet_length as usize + 6).checked_sub(self.payload_offset)
    }
}
