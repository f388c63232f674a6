//! Waveform decoding for corpus audio: FLAC, NIST SPHERE and RIFF WAV, all
//! downmixed to mono `f32` in `[-1, 1]`.

use std::path::Path;

use claxon::FlacReader;

use crate::error::ProbeError;

const SPHERE_MAGIC: &[u8] = b"NIST_1A";

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub sample_rate_hz: u32,
    pub samples: Vec<f32>,
}

/// Decodes by extension: `.flac` through claxon, anything else as SPHERE or RIFF
/// depending on the header.
pub fn read_audio(path: &Path) -> Result<DecodedAudio, ProbeError> {
    let is_flac = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("flac"));
    if is_flac {
        return read_flac_mono(path);
    }
    let data = std::fs::read(path).map_err(|e| ProbeError::io("read audio file", e))?;
    parse_wav_bytes(&data).map_err(|message| ProbeError::corpus(path, message))
}

fn read_flac_mono(path: &Path) -> Result<DecodedAudio, ProbeError> {
    let mut reader = FlacReader::open(path)
        .map_err(|err| ProbeError::corpus(path, format!("failed to decode FLAC: {err}")))?;
    let info = reader.streaminfo();
    let channels = info.channels as usize;
    if channels == 0 {
        return Err(ProbeError::corpus(path, "FLAC has zero channels"));
    }
    let bits = info.bits_per_sample as i32;
    let scale = if bits > 1 {
        ((1_i64 << (bits - 1)) - 1) as f32
    } else {
        1.0
    };

    let mut interleaved = Vec::new();
    for sample in reader.samples() {
        let sample = sample
            .map_err(|err| ProbeError::corpus(path, format!("failed reading FLAC sample: {err}")))?;
        interleaved.push(sample as f32 / scale);
    }
    Ok(DecodedAudio {
        sample_rate_hz: info.sample_rate,
        samples: downmix(&interleaved, channels),
    })
}

pub(crate) fn parse_wav_bytes(data: &[u8]) -> Result<DecodedAudio, String> {
    if data.starts_with(SPHERE_MAGIC) {
        parse_sphere(data)
    } else if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WAVE" {
        parse_riff(data)
    } else {
        Err("unrecognised audio header (expected NIST_1A or RIFF/WAVE)".to_string())
    }
}

/// TIMIT's native format: an ASCII header of `key -type value` lines, then raw PCM.
fn parse_sphere(data: &[u8]) -> Result<DecodedAudio, String> {
    let header_len = data
        .split(|&b| b == b'\n')
        .nth(1)
        .and_then(|line| std::str::from_utf8(line).ok())
        .and_then(|line| line.trim().parse::<usize>().ok())
        .ok_or("SPHERE header size line is missing")?;
    if header_len > data.len() {
        return Err(format!(
            "SPHERE header claims {header_len} bytes, file has {}",
            data.len()
        ));
    }
    let header = String::from_utf8_lossy(&data[..header_len]);

    let mut sample_rate = None;
    let mut channels = 1usize;
    let mut sample_bytes = 2usize;
    let mut big_endian = false;
    for line in header.lines().skip(2) {
        let mut parts = line.split_whitespace();
        let (Some(key), Some(_kind), Some(value)) = (parts.next(), parts.next(), parts.next())
        else {
            continue;
        };
        match key {
            "sample_rate" => sample_rate = value.parse::<u32>().ok(),
            "channel_count" => channels = value.parse().map_err(|_| "bad channel_count")?,
            "sample_n_bytes" => sample_bytes = value.parse().map_err(|_| "bad sample_n_bytes")?,
            "sample_byte_format" => big_endian = value == "10",
            "sample_coding" if !value.starts_with("pcm") || value.contains("shorten") => {
                return Err(format!("unsupported SPHERE sample coding '{value}'"));
            }
            _ => {}
        }
    }
    let sample_rate_hz = sample_rate.ok_or("SPHERE header has no sample_rate")?;
    if sample_bytes != 2 {
        return Err(format!("unsupported SPHERE sample width {sample_bytes} bytes"));
    }
    if channels == 0 {
        return Err("SPHERE header declares zero channels".to_string());
    }
    Ok(DecodedAudio {
        sample_rate_hz,
        samples: downmix(&pcm16(&data[header_len..], big_endian), channels),
    })
}

fn parse_riff(data: &[u8]) -> Result<DecodedAudio, String> {
    let mut pos = 12;
    let mut format: Option<(u16, u16, u32, u16)> = None;
    while pos + 8 <= data.len() {
        let id = &data[pos..pos + 4];
        let size = u32::from_le_bytes([data[pos + 4], data[pos + 5], data[pos + 6], data[pos + 7]])
            as usize;
        let body_start = pos + 8;
        let body_end = body_start.saturating_add(size).min(data.len());
        let body = &data[body_start..body_end];
        if id == b"fmt " {
            if body.len() < 16 {
                return Err("RIFF fmt chunk truncated".to_string());
            }
            format = Some((
                u16::from_le_bytes([body[0], body[1]]),
                u16::from_le_bytes([body[2], body[3]]),
                u32::from_le_bytes([body[4], body[5], body[6], body[7]]),
                u16::from_le_bytes([body[14], body[15]]),
            ));
        } else if id == b"data" {
            let (audio_format, channels, sample_rate_hz, bits) =
                format.ok_or("RIFF data chunk precedes fmt chunk")?;
            if audio_format != 1 || bits != 16 {
                return Err(format!(
                    "unsupported RIFF format {audio_format} with {bits} bits (16-bit PCM only)"
                ));
            }
            if channels == 0 {
                return Err("RIFF fmt declares zero channels".to_string());
            }
            return Ok(DecodedAudio {
                sample_rate_hz,
                samples: downmix(&pcm16(body, false), channels as usize),
            });
        }
        // Chunks are padded to an even size.
        pos = body_start + size + (size & 1);
    }
    Err("RIFF file has no data chunk".to_string())
}

fn pcm16(bytes: &[u8], big_endian: bool) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| {
            let value = if big_endian {
                i16::from_be_bytes([pair[0], pair[1]])
            } else {
                i16::from_le_bytes([pair[0], pair[1]])
            };
            value as f32 / i16::MAX as f32
        })
        .collect()
}

fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sphere_bytes(samples: &[i16], sample_rate: u32) -> Vec<u8> {
        let mut header = format!(
            "NIST_1A\n   1024\nsample_count -i {}\nsample_rate -i {sample_rate}\nchannel_count -i 1\nsample_n_bytes -i 2\nsample_byte_format -s2 01\nsample_coding -s3 pcm\nend_head\n",
            samples.len()
        )
        .into_bytes();
        header.resize(1024, b' ');
        for s in samples {
            header.extend_from_slice(&s.to_le_bytes());
        }
        header
    }

    pub(crate) fn riff_bytes(samples: &[i16], sample_rate: u32, channels: u16) -> Vec<u8> {
        let data_len = (samples.len() * 2) as u32;
        let mut out = Vec::new();
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&(36 + data_len).to_le_bytes());
        out.extend_from_slice(b"WAVEfmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&channels.to_le_bytes());
        out.extend_from_slice(&sample_rate.to_le_bytes());
        out.extend_from_slice(&(sample_rate * 2 * channels as u32).to_le_bytes());
        out.extend_from_slice(&(2 * channels).to_le_bytes());
        out.extend_from_slice(&16u16.to_le_bytes());
        out.extend_from_slice(b"data");
        out.extend_from_slice(&data_len.to_le_bytes());
        for s in samples {
            out.extend_from_slice(&s.to_le_bytes());
        }
        out
    }

    #[test]
    fn sphere_pcm_is_decoded() {
        let audio = parse_wav_bytes(&sphere_bytes(&[0, i16::MAX, -i16::MAX], 16_000)).unwrap();
        assert_eq!(audio.sample_rate_hz, 16_000);
        assert_eq!(audio.samples, vec![0.0, 1.0, -1.0]);
    }

    #[test]
    fn sphere_shorten_is_rejected() {
        let mut bytes = sphere_bytes(&[0; 4], 16_000);
        let header = String::from_utf8_lossy(&bytes[..1024])
            .replace("-s3 pcm", "-s26 pcm,embedded-shorten-v2.00");
        bytes[..1024].copy_from_slice(&header.as_bytes()[..1024]);
        let err = parse_wav_bytes(&bytes).unwrap_err();
        assert!(err.contains("shorten"));
    }

    #[test]
    fn riff_stereo_is_downmixed() {
        let audio = parse_wav_bytes(&riff_bytes(&[i16::MAX, 0, 0, -i16::MAX], 16_000, 2)).unwrap();
        assert_eq!(audio.samples, vec![0.5, -0.5]);
    }

    #[test]
    fn unknown_header_is_rejected() {
        assert!(parse_wav_bytes(b"OggS\0\0\0\0\0\0\0\0").is_err());
    }

    fn crc8(bytes: &[u8]) -> u8 {
        bytes.iter().fold(0u8, |mut crc, &b| {
            crc ^= b;
            for _ in 0..8 {
                crc = if crc & 0x80 != 0 { (crc << 1) ^ 0x07 } else { crc << 1 };
            }
            crc
        })
    }

    fn crc16(bytes: &[u8]) -> u16 {
        bytes.iter().fold(0u16, |mut crc, &b| {
            crc ^= (b as u16) << 8;
            for _ in 0..8 {
                crc = if crc & 0x8000 != 0 { (crc << 1) ^ 0x8005 } else { crc << 1 };
            }
            crc
        })
    }

    /// Mono 16-bit 16 kHz FLAC holding one frame of exactly 16 verbatim samples.
    fn flac_bytes(samples: &[i16; 16]) -> Vec<u8> {
        let mut out = b"fLaC".to_vec();
        // Last metadata block, STREAMINFO, 34 bytes.
        out.extend_from_slice(&[0x80, 0x00, 0x00, 34]);
        out.extend_from_slice(&16u16.to_be_bytes());
        out.extend_from_slice(&16u16.to_be_bytes());
        out.extend_from_slice(&[0; 6]);
        let packed: u64 = (16_000u64 << 44) | (15u64 << 36) | samples.len() as u64;
        out.extend_from_slice(&packed.to_be_bytes());
        out.extend_from_slice(&[0; 16]);

        // Fixed blocking, 8-bit block size, 16 kHz, mono, 16 bits, frame 0.
        let mut frame = vec![0xFF, 0xF8, 0x65, 0x08, 0x00, 15];
        frame.push(crc8(&frame));
        // Verbatim subframe.
        frame.push(0x02);
        for s in samples {
            frame.extend_from_slice(&s.to_be_bytes());
        }
        let crc = crc16(&frame);
        frame.extend_from_slice(&crc.to_be_bytes());
        out.extend(frame);
        out
    }

    fn temp_audio(name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!(
            "wav2vec2_probe_audio_{}_{name}",
            std::process::id()
        ));
        std::fs::write(&path, bytes).expect("write audio fixture");
        path
    }

    #[test]
    fn flac_is_decoded_through_claxon() {
        let mut samples = [0i16; 16];
        samples[1] = i16::MAX;
        samples[2] = -i16::MAX;
        let path = temp_audio("tone.flac", &flac_bytes(&samples));
        let audio = read_audio(&path).expect("decode flac");
        assert_eq!(audio.sample_rate_hz, 16_000);
        assert_eq!(audio.samples.len(), 16);
        assert_eq!(&audio.samples[..3], &[0.0, 1.0, -1.0]);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn corrupt_flac_is_a_corpus_error() {
        let mut bytes = flac_bytes(&[7; 16]);
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let path = temp_audio("broken.FLAC", &bytes);
        let err = read_audio(&path).unwrap_err();
        assert!(matches!(err, ProbeError::Corpus { .. }));
        let _ = std::fs::remove_file(&path);

        let path = temp_audio("garbage.flac", b"not a flac stream");
        assert!(matches!(read_audio(&path), Err(ProbeError::Corpus { .. })));
        let _ = std::fs::remove_file(&path);
    }
}
