//! Text-to-speech backends.
//!
//! [`EspeakSynthesizer`] runs the local offline engine, [`PollySynthesizer`]
//! calls Amazon Polly and [`SpeechRouter`] picks one of them from the voice
//! name, falling back to the local engine when the cloud is unreachable.

use std::{io::Cursor, process::Stdio};

use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_polly::{
    Client,
    error::DisplayErrorContext,
    types::{OutputFormat, TextType, VoiceId},
};
use log::{debug, error, info};
use mockall::automock;
use thiserror::Error;
use tokio::{io::AsyncWriteExt, process::Command};

/// Prefix of voices synthesized by the cloud backend.
pub const CLOUD_VOICE_PREFIX: &str = "aws-";
/// Voice used when none is configured or the cloud backend fails.
pub const DEFAULT_VOICE: &str = "en";

/// Local engine speaking rate, in words per minute.
const ESPEAK_SPEED: &str = "140";
/// Polly PCM output format: 16 kHz, mono, 16 bits.
const PCM_SAMPLE_RATE: u32 = 16_000;

/// Errors raised by a speech backend.
#[derive(Debug, Error)]
pub enum TtsError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} exited with {status}: {stderr}")]
    Engine {
        program: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
    #[error("{program} produced no audio")]
    Empty { program: String },
    #[error("cloud synthesis failed: {0}")]
    Cloud(String),
    #[error("no cloud text-to-speech backend configured")]
    Unconfigured,
    #[error("failed to encode wav: {0}")]
    Wav(#[from] hound::Error),
}

/// Trait turning text into WAV audio.
#[automock]
pub trait SpeechSynthesizer {
    /// Speaks `text` twice with `voice`, surrounded by pauses.
    async fn synthesize(&self, voice: &str, text: &str) -> Result<Vec<u8>, TtsError>;

    /// Renders speech markup (such as `<audio>` references) with the local
    /// engine's default voice, twice, surrounded by pauses.
    async fn synthesize_markup(&self, markup: &str) -> Result<Vec<u8>, TtsError>;
}

/// Doubles `body` between pauses, as read on air.
///
/// # Examples
///
/// ```
/// # use alertcast::media::tts::repeated_markup;
/// assert_eq!(
///     repeated_markup("hi"),
///     "...<break time=\"2s\" /> hi <break time=\"2s\" /> hi <break time=\"3s\" /> "
/// );
/// ```
pub fn repeated_markup(body: &str) -> String {
    format!(
        "...<break time=\"2s\" /> {0} <break time=\"2s\" /> {0} <break time=\"3s\" /> ",
        body
    )
}

/// Escapes a message for markup and drops the truncation marker.
fn speakable(text: &str) -> String {
    html_escape::encode_text(text.trim_end_matches('*')).into_owned()
}

/// Local offline engine (`espeak -m ... --stdout`).
#[derive(Debug, Clone)]
pub struct EspeakSynthesizer {
    program: String,
}

impl EspeakSynthesizer {
    pub fn new() -> Self {
        Self::with_program("espeak")
    }

    /// Uses `program` instead of `espeak`; it must accept the same arguments.
    pub fn with_program(program: impl Into<String>) -> Self {
        EspeakSynthesizer {
            program: program.into(),
        }
    }

    async fn run(&self, args: &[&str], input: String) -> Result<Vec<u8>, TtsError> {
        debug!("running {} {:?}", self.program, args);

        let spawn_error = |source| TtsError::Spawn {
            program: self.program.clone(),
            source,
        };

        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error)?;

        if let Some(mut stdin) = child.stdin.take() {
            // the exit status below reports an engine that quit early
            if let Err(e) = stdin.write_all(input.as_bytes()).await {
                debug!("error writing to {}: {}", self.program, e);
            }
        }

        let output = child.wait_with_output().await.map_err(spawn_error)?;
        if !output.status.success() {
            return Err(TtsError::Engine {
                program: self.program.clone(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        if output.stdout.is_empty() {
            return Err(TtsError::Empty {
                program: self.program.clone(),
            });
        }

        Ok(output.stdout)
    }
}

impl Default for EspeakSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

impl SpeechSynthesizer for EspeakSynthesizer {
    async fn synthesize(&self, voice: &str, text: &str) -> Result<Vec<u8>, TtsError> {
        let voice = if voice.is_empty() { DEFAULT_VOICE } else { voice };
        self.run(
            &["-m", "-v", voice, "-s", ESPEAK_SPEED, "--stdout"],
            repeated_markup(&speakable(text)),
        )
        .await
    }

    async fn synthesize_markup(&self, markup: &str) -> Result<Vec<u8>, TtsError> {
        self.run(&["-m", "--stdout"], repeated_markup(markup)).await
    }
}

/// Amazon Polly backend. Voices are given without the `aws-` prefix.
#[derive(Debug, Clone)]
pub struct PollySynthesizer {
    client: Client,
}

impl PollySynthesizer {
    /// Creates a client authenticated with static credentials.
    pub async fn new(access_key_id: &str, secret_access_key: &str, region: &str) -> Self {
        let credentials = Credentials::new(
            access_key_id,
            secret_access_key,
            None,
            None,
            "alertcast-config",
        );
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_owned()))
            .credentials_provider(credentials)
            .load()
            .await;

        PollySynthesizer {
            client: Client::new(&config),
        }
    }
}

impl SpeechSynthesizer for PollySynthesizer {
    async fn synthesize(&self, voice: &str, text: &str) -> Result<Vec<u8>, TtsError> {
        let voice = voice.trim_start_matches(CLOUD_VOICE_PREFIX);
        let text = speakable(text);
        let ssml = format!(
            "<speak><break time=\"2s\" /> {0} <break time=\"2s\" /> {0} <break time=\"3s\" /></speak>",
            text
        );

        let response = self
            .client
            .synthesize_speech()
            .voice_id(VoiceId::from(voice))
            .output_format(OutputFormat::Pcm)
            .sample_rate(PCM_SAMPLE_RATE.to_string())
            .text_type(TextType::Ssml)
            .text(ssml)
            .send()
            .await
            .map_err(|e| TtsError::Cloud(DisplayErrorContext(&e).to_string()))?;

        let pcm = response
            .audio_stream
            .collect()
            .await
            .map_err(|e| TtsError::Cloud(e.to_string()))?
            .into_bytes();

        pcm_to_wav(&pcm)
    }

    async fn synthesize_markup(&self, _markup: &str) -> Result<Vec<u8>, TtsError> {
        Err(TtsError::Cloud("markup rendering is local only".to_owned()))
    }
}

/// Wraps raw 16 kHz mono 16-bit little endian PCM into a WAV container.
pub fn pcm_to_wav(pcm: &[u8]) -> Result<Vec<u8>, TtsError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: PCM_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut buffer = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut buffer, spec)?;
        for sample in pcm.chunks_exact(2) {
            writer.write_sample(i16::from_le_bytes([sample[0], sample[1]]))?;
        }
        writer.finalize()?;
    }
    Ok(buffer.into_inner())
}

/// Routes synthesis by voice name.
///
/// Voices starting with `aws-` go to the cloud backend when one is configured;
/// on failure the message is spoken locally with [`DEFAULT_VOICE`]. Every
/// other voice and all markup go to the local engine.
pub struct SpeechRouter<L: SpeechSynthesizer, C: SpeechSynthesizer> {
    local: L,
    cloud: Option<C>,
}

impl<L: SpeechSynthesizer, C: SpeechSynthesizer> SpeechRouter<L, C> {
    pub fn new(local: L, cloud: Option<C>) -> Self {
        SpeechRouter { local, cloud }
    }
}

impl<L: SpeechSynthesizer, C: SpeechSynthesizer> SpeechSynthesizer for SpeechRouter<L, C> {
    async fn synthesize(&self, voice: &str, text: &str) -> Result<Vec<u8>, TtsError> {
        if !voice.starts_with(CLOUD_VOICE_PREFIX) {
            return self.local.synthesize(voice, text).await;
        }

        let result = match &self.cloud {
            Some(cloud) => cloud.synthesize(voice, text).await,
            None => Err(TtsError::Unconfigured),
        };

        match result {
            Ok(audio) => Ok(audio),
            Err(e) => {
                error!(
                    "cloud text-to-speech failed for voice {}, using local engine: {}",
                    voice, e
                );
                info!("speaking with local voice {}", DEFAULT_VOICE);
                self.local.synthesize(DEFAULT_VOICE, text).await
            }
        }
    }

    async fn synthesize_markup(&self, markup: &str) -> Result<Vec<u8>, TtsError> {
        self.local.synthesize_markup(markup).await
    }
}

#[cfg(test)]
mod tests {
    use mockall::predicate::eq;

    use super::*;

    #[test]
    fn test_speakable_escapes_and_drops_marker() {
        assert_eq!(speakable("Fire & smoke <now>***"), "Fire &amp; smoke &lt;now&gt;");
    }

    #[test]
    fn test_pcm_to_wav() {
        let pcm: Vec<u8> = (0..32_000u32).flat_map(|_| 0i16.to_le_bytes()).collect();
        let wav = pcm_to_wav(&pcm).unwrap();

        let reader = hound::WavReader::new(Cursor::new(wav)).unwrap();
        assert_eq!(reader.spec().sample_rate, PCM_SAMPLE_RATE);
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.duration(), 32_000);
    }

    #[tokio::test]
    async fn test_router_sends_local_voices_to_local_engine() {
        let mut local = MockSpeechSynthesizer::new();
        local
            .expect_synthesize()
            .with(eq("fr"), eq("bonjour"))
            .times(1)
            .returning(|_, _| Ok(b"local".to_vec()));
        let mut cloud = MockSpeechSynthesizer::new();
        cloud.expect_synthesize().never();

        let router = SpeechRouter::new(local, Some(cloud));
        assert_eq!(router.synthesize("fr", "bonjour").await.unwrap(), b"local");
    }

    #[tokio::test]
    async fn test_router_sends_cloud_voices_to_cloud() {
        let mut local = MockSpeechSynthesizer::new();
        local.expect_synthesize().never();
        let mut cloud = MockSpeechSynthesizer::new();
        cloud
            .expect_synthesize()
            .with(eq("aws-Joanna"), eq("hello"))
            .times(1)
            .returning(|_, _| Ok(b"cloud".to_vec()));

        let router = SpeechRouter::new(local, Some(cloud));
        assert_eq!(router.synthesize("aws-Joanna", "hello").await.unwrap(), b"cloud");
    }

    #[tokio::test]
    async fn test_router_falls_back_to_default_local_voice() {
        let mut local = MockSpeechSynthesizer::new();
        local
            .expect_synthesize()
            .with(eq(DEFAULT_VOICE), eq("hello"))
            .times(1)
            .returning(|_, _| Ok(b"local".to_vec()));
        let mut cloud = MockSpeechSynthesizer::new();
        cloud
            .expect_synthesize()
            .times(1)
            .returning(|_, _| Err(TtsError::Cloud("network down".to_owned())));

        let router = SpeechRouter::new(local, Some(cloud));
        assert_eq!(router.synthesize("aws-Joanna", "hello").await.unwrap(), b"local");
    }

    #[tokio::test]
    async fn test_router_without_cloud_backend_falls_back() {
        let mut local = MockSpeechSynthesizer::new();
        local
            .expect_synthesize()
            .with(eq(DEFAULT_VOICE), eq("hello"))
            .times(1)
            .returning(|_, _| Ok(b"local".to_vec()));

        let router: SpeechRouter<_, MockSpeechSynthesizer> = SpeechRouter::new(local, None);
        assert!(router.synthesize("aws-Joanna", "hello").await.is_ok());
    }

    #[tokio::test]
    async fn test_router_markup_is_local() {
        let mut local = MockSpeechSynthesizer::new();
        local
            .expect_synthesize_markup()
            .times(1)
            .returning(|_| Ok(b"markup".to_vec()));

        let router: SpeechRouter<_, MockSpeechSynthesizer> = SpeechRouter::new(local, None);
        assert_eq!(router.synthesize_markup("<audio/>").await.unwrap(), b"markup");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_espeak_failure_is_reported() {
        let engine = EspeakSynthesizer::with_program("false");
        let result = engine.synthesize("en", "hello").await;
        assert!(matches!(result, Err(TtsError::Engine { .. })));
    }

    #[tokio::test]
    async fn test_missing_engine_is_reported() {
        let engine = EspeakSynthesizer::with_program("alertcast-no-such-engine");
        let result = engine.synthesize("en", "hello").await;
        assert!(matches!(result, Err(TtsError::Spawn { .. })));
    }
}
