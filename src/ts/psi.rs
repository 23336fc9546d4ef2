use super::{Result, TsError};

pub const TABLE_ID_PAT: u8 = 0x00;
pub const TABLE_ID_PMT: u8 = 0x02;
pub const STREAM_TYPE_H264: u8 = 0x1B;

/// CRC-32/MPEG-2 as used by PSI sections (poly 0x04C11DB7, no reflection).
pub fn mpeg2_crc32(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        crc ^= (byte as u32) << 24;
        for _ in 0..8 {
            crc = if crc & 0x8000_0000 != 0 {
                (crc << 1) ^ 0x04C1_1DB7
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// Validates the long-form section header and CRC, returning the 5-bit
/// version number and the section body between the fixed 8-byte header and
/// the CRC.
fn section_body(data: &[u8], table_id: u8) -> Result<(u8, &[u8])> {
    if data.len() < 3 {
        return Err(TsError::InsufficientData {
            expected: 3,
            actual: data.len(),
        });
    }
    if data[0] != table_id {
        return Err(TsError::UnexpectedTableId {
            expected: table_id,
            actual: data[0],
        });
    }
    let section_length = (((data[1] & 0x0F) as usize) << 8) | data[2] as usize;
    let total = 3 + section_length;
    if data.len() < total || section_length < 9 {
        return Err(TsError::InsufficientData {
            expected: total.max(12),
            actual: data.len(),
        });
    }

    let crc_at = total - 4;
    let stored = u32::from_be_bytes([
        data[crc_at],
        data[crc_at + 1],
        data[crc_at + 2],
        data[crc_at + 3],
    ]);
    if mpeg2_crc32(&data[..crc_at]) != stored {
        return Err(TsError::CrcMismatch);
    }

    let version = (data[5] >> 1) & 0x1F;
    Ok((version, &data[8..crc_at]))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pat {
    pub version: u8,
    /// (program_number, pmt_pid), network PID entries excluded
    pub programs: Vec<(u16, u16)>,
}

impl Pat {
    pub fn parse(section: &[u8]) -> Result<Self> {
        let (version, body) = section_body(section, TABLE_ID_PAT)?;
        let programs = body
            .chunks_exact(4)
            .map(|c| {
                (
                    u16::from_be_bytes([c[0], c[1]]),
                    (((c[2] & 0x1F) as u16) << 8) | c[3] as u16,
                )
            })
            .filter(|(program, _)| *program != 0)
            .collect();
        Ok(Self { version, programs })
    }

    pub fn first_pmt_pid(&self) -> Option<u16> {
        self.programs.first().map(|(_, pid)| *pid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PmtStream {
    pub stream_type: u8,
    pub pid: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pmt {
    pub version: u8,
    pub pcr_pid: u16,
    pub streams: Vec<PmtStream>,
}

impl Pmt {
    pub fn parse(section: &[u8]) -> Result<Self> {
        let (version, body) = section_body(section, TABLE_ID_PMT)?;
        if body.len() < 4 {
            return Err(TsError::InsufficientData {
                expected: 4,
                actual: body.len(),
            });
        }
        let pcr_pid = (((body[0] & 0x1F) as u16) << 8) | body[1] as u16;
        let program_info_length = (((body[2] & 0x0F) as usize) << 8) | body[3] as usize;

        let mut offset = 4 + program_info_length;
        let mut streams = Vec::new();
        while offset + 5 <= body.len() {
            let stream_type = body[offset];
            let pid = (((body[offset + 1] & 0x1F) as u16) << 8) | body[offset + 2] as u16;
            let es_info_length =
                (((body[offset + 3] & 0x0F) as usize) << 8) | body[offset + 4] as usize;
            streams.push(PmtStream { stream_type, pid });
            offset += 5 + es_info_length;
        }

        Ok(Self {
            version,
            pcr_pid,
            streams,
        })
    }

    pub fn first_of_type(&self, stream_type: u8) -> Option<u16> {
        self.streams
            .iter()
            .find(|s| s.stream_type == stream_type)
            .map(|s| s.pid)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Builds a long-form section with a valid CRC around `body`.
    pub(crate) fn section(table_id: u8, id_ext: u16, body: &[u8]) -> Vec<u8> {
        versioned_section(table_id, id_ext, 0, body)
    }

    pub(crate) fn versioned_section(table_id: u8, id_ext: u16, version: u8, body: &[u8]) -> Vec<u8> {
        let section_length = 5 + body.len() + 4;
        let mut out = vec![
            table_id,
            0xB0 | ((section_length >> 8) as u8 & 0x0F),
            section_length as u8,
        ];
        out.extend_from_slice(&id_ext.to_be_bytes());
        out.extend_from_slice(&[0xC1 | ((version & 0x1F) << 1), 0x00, 0x00]);
        out.extend_from_slice(body);
        let crc = mpeg2_crc32(&out);
        out.extend_from_slice(&crc.to_be_bytes());
        out
    }

    pub(crate) fn pat_section(pmt_pid: u16) -> Vec<u8> {
        let mut body = vec![0x00, 0x00, 0xE0, 0x10]; // network PID entry
        body.extend_from_slice(&[0x00, 0x01, 0xE0 | (pmt_pid >> 8) as u8, pmt_pid as u8]);
        section(TABLE_ID_PAT, 1, &body)
    }

    pub(crate) fn pmt_section(video_pid: u16) -> Vec<u8> {
        pmt_section_version(video_pid, 0)
    }

    pub(crate) fn pmt_section_version(video_pid: u16, version: u8) -> Vec<u8> {
        let mut body = vec![0xE0 | (video_pid >> 8) as u8, video_pid as u8, 0xF0, 0x00];
        // AAC audio first, then H.264 with a 2-byte descriptor
        body.extend_from_slice(&[0x0F, 0xE1, 0x01, 0xF0, 0x00]);
        body.extend_from_slice(&[
            STREAM_TYPE_H264,
            0xE0 | (video_pid >> 8) as u8,
            video_pid as u8,
            0xF0,
            0x02,
            0x0A,
            0x00,
        ]);
        versioned_section(TABLE_ID_PMT, 1, version, &body)
    }

    #[test]
    fn crc_known_value() {
        // CRC-32/MPEG-2 check value
        assert_eq!(mpeg2_crc32(b"123456789"), 0x0376_E6E7);
    }

    #[test]
    fn pat_skips_network_pid() {
        let pat = Pat::parse(&pat_section(0x1000)).unwrap();
        assert_eq!(pat.programs, vec![(1, 0x1000)]);
        assert_eq!(pat.first_pmt_pid(), Some(0x1000));
    }

    #[test]
    fn pmt_finds_h264_stream() {
        let pmt = Pmt::parse(&pmt_section(0x0100)).unwrap();
        assert_eq!(pmt.version, 0);
        assert_eq!(pmt.pcr_pid, 0x0100);
        assert_eq!(pmt.streams.len(), 2);
        assert_eq!(pmt.first_of_type(STREAM_TYPE_H264), Some(0x0100));
        assert_eq!(pmt.first_of_type(0x24), None);
    }

    #[test]
    fn version_number_is_read() {
        let pmt = Pmt::parse(&pmt_section_version(0x0100, 7)).unwrap();
        assert_eq!(pmt.version, 7);
        assert_eq!(Pat::parse(&pat_section(0x1000)).unwrap().version, 0);
    }

    #[test]
    fn corrupted_section_fails_crc() {
        let mut data = pat_section(0x1000);
        data[10] ^= 0x01;
        assert_eq!(Pat::parse(&data).unwrap_err(), TsError::CrcMismatch);
    }

    #[test]
    fn wrong_table_is_rejected() {
        let data = pmt_section(0x0100);
        assert!(matches!(
            Pat::parse(&data),
            Err(TsError::UnexpectedTableId { expected: 0, actual: 2 })
        ));
    }
}
