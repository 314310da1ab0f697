//! RIFF/WAVE loader for sound effects
//!
//! Walks the RIFF chunk list by hand, accepts PCM (and IEEE float) `fmt `
//! chunks with at most two channels, and decodes the `data` chunk through
//! the same format converter the streams use. Anything malformed returns a
//! typed error with a logged reason; nothing partially constructed is kept.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use thiserror::Error;

use crate::format;
use crate::types::{Sample, SampleFormat};

#[derive(Debug, Error)]
pub enum WavError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a RIFF/WAVE file")]
    NotRiff,

    #[error("missing required chunk: {0}")]
    MissingChunk(&'static str),

    #[error("unsupported codec tag {0:#06x} (PCM only)")]
    UnsupportedCodec(u16),

    #[error("unsupported bit depth {0}")]
    UnsupportedBitDepth(u16),

    #[error("too many channels: {0} (at most 2)")]
    TooManyChannels(u16),

    #[error("file corrupted: {0}")]
    Corrupted(String),
}

/// Decoded WAV contents, interleaved f32
pub struct WavData {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<Sample>,
}

const WAVE_FORMAT_PCM: u16 = 0x0001;
const WAVE_FORMAT_IEEE_FLOAT: u16 = 0x0003;

pub fn load_wav(path: &Path) -> Result<WavData, WavError> {
    let mut file = File::open(path)?;

    let mut header = [0u8; 12];
    file.read_exact(&mut header).map_err(|_| WavError::NotRiff)?;
    if &header[0..4] != b"RIFF" || &header[8..12] != b"WAVE" {
        log::warn!("wav: {:?} is not a RIFF/WAVE file", path);
        return Err(WavError::NotRiff);
    }
    let riff_size = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as u64;
    let file_size = file.metadata()?.len();
    if riff_size > file_size.saturating_sub(8) {
        log::warn!(
            "wav: {:?} RIFF size {} exceeds file size {}",
            path,
            riff_size,
            file_size
        );
        return Err(WavError::Corrupted(format!(
            "RIFF size {} exceeds file size {}",
            riff_size, file_size
        )));
    }

    let mut fmt: Option<(u16, u16, u32, u16)> = None; // codec, channels, rate, bits
    let mut data: Option<Vec<u8>> = None;

    // Chunk walk: fmt must precede data per the spec, but accept any order
    loop {
        let mut chunk_header = [0u8; 8];
        match file.read_exact(&mut chunk_header) {
            Ok(()) => {}
            Err(_) => break, // clean end of chunk list
        }
        let id = &chunk_header[0..4];
        let size = u32::from_le_bytes([
            chunk_header[4],
            chunk_header[5],
            chunk_header[6],
            chunk_header[7],
        ]) as u64;

        match id {
            b"fmt " => {
                if size < 16 {
                    return Err(WavError::Corrupted("fmt chunk too small".into()));
                }
                let mut body = vec![0u8; size as usize];
                file.read_exact(&mut body)
                    .map_err(|_| WavError::Corrupted("truncated fmt chunk".into()))?;
                let codec = u16::from_le_bytes([body[0], body[1]]);
                let channels = u16::from_le_bytes([body[2], body[3]]);
                let rate = u32::from_le_bytes([body[4], body[5], body[6], body[7]]);
                let bits = u16::from_le_bytes([body[14], body[15]]);
                fmt = Some((codec, channels, rate, bits));
            }
            b"data" => {
                let mut body = vec![0u8; size as usize];
                file.read_exact(&mut body)
                    .map_err(|_| WavError::Corrupted("truncated data chunk".into()))?;
                data = Some(body);
            }
            _ => {
                // Skip unknown chunks, honoring RIFF word alignment
                file.seek(SeekFrom::Current((size + (size & 1)) as i64))?;
                continue;
            }
        }
        if size & 1 == 1 {
            file.seek(SeekFrom::Current(1))?;
        }
    }

    let (codec, channels, rate, bits) = fmt.ok_or(WavError::MissingChunk("fmt "))?;
    let data = data.ok_or(WavError::MissingChunk("data"))?;

    if codec != WAVE_FORMAT_PCM && codec != WAVE_FORMAT_IEEE_FLOAT {
        log::warn!("wav: {:?} has unsupported codec {:#06x}", path, codec);
        return Err(WavError::UnsupportedCodec(codec));
    }
    if channels == 0 || channels > 2 {
        return Err(WavError::TooManyChannels(channels));
    }
    if rate == 0 {
        return Err(WavError::Corrupted("zero sample rate".into()));
    }

    let sample_format = match (codec, bits) {
        (WAVE_FORMAT_PCM, 8) => SampleFormat::U8,
        (WAVE_FORMAT_PCM, 16) => SampleFormat::S16LE,
        (WAVE_FORMAT_PCM, 24) => SampleFormat::S24LE3,
        (WAVE_FORMAT_PCM, 32) => SampleFormat::S32LE,
        (WAVE_FORMAT_IEEE_FLOAT, 32) => SampleFormat::F32,
        (_, bits) => return Err(WavError::UnsupportedBitDepth(bits)),
    };

    let count = data.len() / sample_format.bytes_per_sample();
    // Whole frames only
    let count = count - (count % channels as usize);
    let mut samples = vec![0.0f32; count];
    format::to_float(sample_format, &data, &mut samples);

    log::debug!(
        "wav: loaded {:?}: {} Hz, {} ch, {} bits, {} frames",
        path,
        rate,
        channels,
        bits,
        count / channels as usize
    );

    Ok(WavData {
        sample_rate: rate,
        channels,
        samples,
    })
}
