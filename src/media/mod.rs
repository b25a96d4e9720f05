//! Media produced for an alert: audio clips, optional images and their durations.

pub mod generator;
pub mod tts;

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Serialize;
use symphonia::core::{
    errors::Error as DecodeError,
    formats::FormatOptions,
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::Hint,
    units::TimeBase,
};
use thiserror::Error;

pub use generator::MediaGenerator;
pub use tts::{SpeechSynthesizer, TtsError};

/// Longest audio aired for a single alert message.
pub const MAX_AUDIO_DURATION: Duration = Duration::from_secs(120);
/// Artist tag of every alert clip.
pub const ALERT_ARTIST: &str = "Emergency Alert";

/// Size of a canonical WAV header, used to derive a length from the file size.
const WAV_HEADER_LEN: u64 = 44;

/// Errors raised while generating the media of an alert.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unreadable audio {path}: {source}")]
    Probe {
        path: PathBuf,
        #[source]
        source: DecodeError,
    },
    #[error("text-to-speech failed: {0}")]
    Tts(#[from] TtsError),
    #[error("{kind} resource of alert {identifier} is unavailable")]
    ResourceUnavailable {
        identifier: String,
        kind: &'static str,
    },
    #[error("alert {identifier} has nothing to say in {language}")]
    NoContent {
        identifier: String,
        language: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Audio,
    Image,
}

/// One file to air, with the metadata shown while it plays.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaClip {
    pub media_type: MediaType,
    pub path: PathBuf,
    pub duration: Duration,
    pub artist: String,
    pub title: String,
    pub overlay_text: Option<String>,
}

/// The audio of an alert in one language and the image shown alongside it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaBundle {
    pub audio: MediaClip,
    pub visual: Option<MediaClip>,
}

/// Media selected for one play of an alert.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MediaInfo {
    pub primary: Option<MediaBundle>,
    pub secondary: Option<MediaBundle>,
    pub first_nation: Option<MediaBundle>,
}

/// Returns the playing time of an audio file, capped at [`MAX_AUDIO_DURATION`].
///
/// WAV files are measured from their header. Streamed encoders write a
/// placeholder length there, so the shortest of the header length and the
/// length implied by the file size wins. Other formats are demuxed.
pub fn probe_duration(path: &Path) -> Result<Duration, MediaError> {
    let duration = match hound::WavReader::open(path) {
        Ok(reader) => wav_duration(path, reader)?,
        Err(_) => decoded_duration(path)?,
    };
    Ok(duration.min(MAX_AUDIO_DURATION))
}

fn wav_duration<R: std::io::Read>(
    path: &Path,
    reader: hound::WavReader<R>,
) -> Result<Duration, MediaError> {
    let spec = reader.spec();
    let frame_size = u64::from(spec.channels) * u64::from(spec.bits_per_sample).div_ceil(8);
    if spec.sample_rate == 0 || frame_size == 0 {
        return Err(MediaError::Probe {
            path: path.to_owned(),
            source: DecodeError::DecodeError("empty audio format"),
        });
    }

    let file_len = std::fs::metadata(path)
        .map_err(|source| MediaError::Io {
            path: path.to_owned(),
            source,
        })?
        .len();
    let frames = u64::from(reader.duration()).min(file_len.saturating_sub(WAV_HEADER_LEN) / frame_size);

    Ok(Duration::from_secs_f64(frames as f64 / f64::from(spec.sample_rate)))
}

/// Duration of a compressed file, from its stream header when it announces a
/// frame count, otherwise from the sum of its packet durations.
fn decoded_duration(path: &Path) -> Result<Duration, MediaError> {
    let probe_error = |source| MediaError::Probe {
        path: path.to_owned(),
        source,
    };

    let file = std::fs::File::open(path).map_err(|source| MediaError::Io {
        path: path.to_owned(),
        source,
    })?;
    let stream = MediaSourceStream::new(Box::new(file), Default::default());
    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|extension| extension.to_str()) {
        hint.with_extension(extension);
    }

    let mut format = symphonia::default::get_probe()
        .format(
            &hint,
            stream,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(probe_error)?
        .format;
    let track = format
        .default_track()
        .cloned()
        .ok_or_else(|| probe_error(DecodeError::Unsupported("no audio track")))?;
    let params = &track.codec_params;

    let time_base = params
        .time_base
        .or_else(|| params.sample_rate.filter(|rate| *rate > 0).map(|rate| TimeBase::new(1, rate)))
        .ok_or_else(|| probe_error(DecodeError::Unsupported("unknown sample rate")))?;

    let ticks = match params.n_frames {
        Some(frames) if frames > 0 => frames,
        _ => {
            let mut ticks = 0;
            loop {
                match format.next_packet() {
                    Ok(packet) if packet.track_id() == track.id => ticks += packet.dur,
                    Ok(_) => {}
                    Err(DecodeError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                        break;
                    }
                    Err(e) => return Err(probe_error(e)),
                }
            }
            ticks
        }
    };
    if ticks == 0 {
        return Err(probe_error(DecodeError::DecodeError("no audio frames")));
    }

    let time = time_base.calc_time(ticks);
    Ok(Duration::from_secs(time.seconds) + Duration::from_secs_f64(time.frac))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::media::tts::pcm_to_wav;

    /// `frames` silent MPEG-1 layer III frames, 128 kbit/s mono at 48 kHz.
    ///
    /// Each frame lasts 24 ms: 125 frames make three seconds.
    pub(crate) fn silence_mp3(frames: usize) -> Vec<u8> {
        let mut frame = vec![0u8; 384];
        frame[..4].copy_from_slice(&[0xff, 0xfb, 0x94, 0xc4]);
        frame.repeat(frames)
    }

    /// WAV bytes of `seconds` of 16 kHz mono silence.
    pub(crate) fn silence_wav(seconds: u32) -> Vec<u8> {
        pcm_to_wav(&vec![0u8; (seconds * 32_000) as usize]).unwrap()
    }

    #[test]
    fn test_probe_duration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.wav");
        std::fs::write(&path, silence_wav(3)).unwrap();

        assert_eq!(probe_duration(&path).unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn test_probe_duration_is_capped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("long.wav");
        std::fs::write(&path, silence_wav(130)).unwrap();

        assert_eq!(probe_duration(&path).unwrap(), MAX_AUDIO_DURATION);
    }

    #[test]
    fn test_probe_duration_trusts_file_size_over_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("streamed.wav");
        let mut wav = silence_wav(2);
        // placeholder data length, as written by streaming encoders
        let data_len = wav.len() - 4 - 32_000 * 2;
        wav[data_len..data_len + 4].copy_from_slice(&0x7fff_f000u32.to_le_bytes());
        std::fs::write(&path, wav).unwrap();

        assert_eq!(probe_duration(&path).unwrap(), Duration::from_secs(2));
    }

    #[test]
    fn test_probe_duration_of_mp3() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.mp3");
        std::fs::write(&path, silence_mp3(125)).unwrap();

        let duration = probe_duration(&path).unwrap();
        assert!(
            duration.abs_diff(Duration::from_secs(3)) < Duration::from_millis(100),
            "{:?}",
            duration
        );
    }

    #[test]
    fn test_probe_duration_of_mp3_is_capped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("long.mp3");
        std::fs::write(&path, silence_mp3(6_000)).unwrap();

        assert_eq!(probe_duration(&path).unwrap(), MAX_AUDIO_DURATION);
    }

    #[test]
    fn test_probe_rejects_non_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.mp3");
        std::fs::write(&path, b"ID3 not a wav").unwrap();

        assert!(matches!(probe_duration(&path), Err(MediaError::Probe { .. })));
    }
}
