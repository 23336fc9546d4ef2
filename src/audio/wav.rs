//! PCM S16LE WAV files for the record/play tools.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use anyhow::{Context, Result, bail, ensure};

const HEADER_LEN: u32 = 44;
const FORMAT_PCM: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavSpec {
    pub sample_rate: u32,
    pub channels: u16,
}

impl WavSpec {
    fn block_align(&self) -> u16 {
        self.channels * 2
    }
}

/// Streams samples to disk. Sizes in the header are patched on `finish`.
pub struct WavWriter<W: Write + Seek> {
    inner: W,
    spec: WavSpec,
    data_len: u32,
}

impl WavWriter<BufWriter<File>> {
    pub fn create(path: &Path, spec: WavSpec) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        Self::new(BufWriter::new(file), spec)
    }
}

impl<W: Write + Seek> WavWriter<W> {
    pub fn new(mut inner: W, spec: WavSpec) -> Result<Self> {
        write_header(&mut inner, spec, 0)?;
        Ok(Self {
            inner,
            spec,
            data_len: 0,
        })
    }

    pub fn write_samples(&mut self, samples: &[i16]) -> Result<()> {
        let mut bytes = Vec::with_capacity(samples.len() * 2);
        for s in samples {
            bytes.extend_from_slice(&s.to_le_bytes());
        }
        self.inner.write_all(&bytes)?;
        self.data_len = self
            .data_len
            .checked_add(bytes.len() as u32)
            .context("WAV data exceeds 4 GiB")?;
        Ok(())
    }

    /// Number of frames written so far.
    pub fn frames(&self) -> u32 {
        self.data_len / self.spec.block_align() as u32
    }

    pub fn finish(mut self) -> Result<W> {
        self.inner.seek(SeekFrom::Start(0))?;
        write_header(&mut self.inner, self.spec, self.data_len)?;
        self.inner.seek(SeekFrom::End(0))?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

fn write_header<W: Write>(w: &mut W, spec: WavSpec, data_len: u32) -> Result<()> {
    let byte_rate = spec.sample_rate * spec.block_align() as u32;
    let mut header = Vec::with_capacity(HEADER_LEN as usize);
    header.extend_from_slice(b"RIFF");
    header.extend_from_slice(&(HEADER_LEN - 8 + data_len).to_le_bytes());
    header.extend_from_slice(b"WAVE");
    header.extend_from_slice(b"fmt ");
    header.extend_from_slice(&16u32.to_le_bytes());
    header.extend_from_slice(&FORMAT_PCM.to_le_bytes());
    header.extend_from_slice(&spec.channels.to_le_bytes());
    header.extend_from_slice(&spec.sample_rate.to_le_bytes());
    header.extend_from_slice(&byte_rate.to_le_bytes());
    header.extend_from_slice(&spec.block_align().to_le_bytes());
    header.extend_from_slice(&16u16.to_le_bytes());
    header.extend_from_slice(b"data");
    header.extend_from_slice(&data_len.to_le_bytes());
    w.write_all(&header)?;
    Ok(())
}

/// Reads a whole PCM S16LE file. Unknown chunks (LIST, fact, ...) are skipped.
pub fn read_wav(path: &Path) -> Result<(WavSpec, Vec<i16>)> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    read_from(BufReader::new(file))
}

pub fn read_from<R: Read>(mut r: R) -> Result<(WavSpec, Vec<i16>)> {
    let mut riff = [0u8; 12];
    r.read_exact(&mut riff).context("File too short for a RIFF header")?;
    ensure!(&riff[0..4] == b"RIFF" && &riff[8..12] == b"WAVE", "Not a RIFF/WAVE file");

    let mut spec = None;
    loop {
        let mut chunk = [0u8; 8];
        r.read_exact(&mut chunk).context("Missing data chunk")?;
        let len = u32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]) as usize;

        match &chunk[0..4] {
            b"fmt " => {
                ensure!(len >= 16, "fmt chunk too short");
                let mut fmt = vec![0u8; len + len % 2];
                r.read_exact(&mut fmt)?;
                let format = u16::from_le_bytes([fmt[0], fmt[1]]);
                let channels = u16::from_le_bytes([fmt[2], fmt[3]]);
                let sample_rate = u32::from_le_bytes([fmt[4], fmt[5], fmt[6], fmt[7]]);
                let bits = u16::from_le_bytes([fmt[14], fmt[15]]);
                if format != FORMAT_PCM || bits != 16 {
                    bail!("Unsupported WAV format {} with {} bits, need PCM S16_LE", format, bits);
                }
                ensure!(channels > 0, "WAV file has zero channels");
                spec = Some(WavSpec {
                    sample_rate,
                    channels,
                });
            }
            b"data" => {
                let spec = spec.context("data chunk before fmt chunk")?;
                // arecord 中断时 data 长度可能没写回，读到文件末尾为止
                let mut data = Vec::with_capacity(len.min(16 << 20));
                (&mut r).take(len as u64).read_to_end(&mut data)?;
                let samples = data
                    .chunks_exact(2)
                    .map(|b| i16::from_le_bytes([b[0], b[1]]))
                    .collect();
                return Ok((spec, samples));
            }
            _ => {
                let mut skip = vec![0u8; len + len % 2];
                r.read_exact(&mut skip)?;
            }
        }
    }
}
