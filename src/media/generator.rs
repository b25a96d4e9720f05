//! Generation of the audio and image files aired for an alert.
//!
//! Every artifact lands in the alerts directory under a name derived from the
//! alert reference and the language, so generating twice rewrites the same
//! file. Results are memoized per alert and language; failures are not, so a
//! failed generation is retried on the next play cycle.

use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};

use crate::{
    cap::{Alert, FIRST_NATION, Info},
    config::Language,
    http::HttpFetcher,
    media::{
        ALERT_ARTIST, MediaBundle, MediaClip, MediaError, MediaInfo, MediaType, probe_duration,
        tts::{DEFAULT_VOICE, SpeechSynthesizer},
    },
};

/// Overlay shown while the first nations rendering plays.
const FIRST_NATION_OVERLAY: &str = "An alert is in effect.";

/// Builds [`MediaBundle`]s for alerts.
pub struct MediaGenerator<S: SpeechSynthesizer> {
    synthesizer: S,
    alerts_dir: PathBuf,
    first_nations_dir: PathBuf,
    truncate: bool,
}

impl<S: SpeechSynthesizer> MediaGenerator<S> {
    /// Create a new [MediaGenerator].
    ///
    /// # Arguments
    ///
    /// * `synthesizer` - Speech backend for alerts without an audio resource
    /// * `alerts_dir` - Directory receiving the generated files
    /// * `first_nations_dir` - Root of the pre-recorded first nations messages
    /// * `truncate` - Cut non-immediate messages at their first paragraph
    pub fn new(
        synthesizer: S,
        alerts_dir: impl Into<PathBuf>,
        first_nations_dir: impl Into<PathBuf>,
        truncate: bool,
    ) -> Self {
        MediaGenerator {
            synthesizer,
            alerts_dir: alerts_dir.into(),
            first_nations_dir: first_nations_dir.into(),
            truncate,
        }
    }

    fn artifact_path(&self, alert: &Alert, language: &str, extension: &str) -> PathBuf {
        self.alerts_dir
            .join(format!("{}-{}.{}", alert.reference(), language, extension))
    }

    /// Generates the media of `alert` in `language`.
    ///
    /// Returns `Ok(None)` when the alert has no info in that language. An audio
    /// resource is aired verbatim, saved under an extension matching its MIME
    /// type. The rendered text is synthesized with `voice` when there is no
    /// resource or its duration cannot be read.
    pub async fn generate_audio<H: HttpFetcher>(
        &self,
        alert: &Alert,
        language: &str,
        voice: &str,
        fetcher: &H,
    ) -> Result<Option<MediaBundle>, MediaError> {
        let Some(info) = alert.get_first_info(language, false) else {
            debug!("alert {} has no info in {}", alert.identifier, language);
            return Ok(None);
        };

        let truncate = self.truncate && !alert.broadcast_immediately();
        let text = info.message_text(alert.profile, truncate);
        create_dir(&self.alerts_dir).await?;

        let mut resource_audio = None;
        if let Some(resource) = info.resources_of_type("audio").next() {
            let data = resource
                .resolve(fetcher)
                .await
                .ok_or_else(|| MediaError::ResourceUnavailable {
                    identifier: alert.identifier.clone(),
                    kind: "audio",
                })?;
            let path = self.artifact_path(alert, language, resource.file_extension());
            write(&path, &data).await?;

            match probe_duration(&path) {
                Ok(duration) => resource_audio = Some((path, duration)),
                Err(e) => warn!(
                    "audio resource of alert {} has no readable duration, speaking the text instead: {}",
                    alert.identifier, e
                ),
            }
        }

        let (audio_path, duration) = match resource_audio {
            Some(found) => found,
            None if !text.trim().is_empty() => {
                info!("synthesizing {} message of alert {}", language, alert.identifier);
                let audio = self.synthesizer.synthesize(voice, &text).await?;
                let path = self.artifact_path(alert, language, "wav");
                write(&path, &audio).await?;
                let duration = probe_duration(&path)?;
                (path, duration)
            }
            None => {
                return Err(MediaError::NoContent {
                    identifier: alert.identifier.clone(),
                    language: language.to_owned(),
                });
            }
        };

        let audio = MediaClip {
            media_type: MediaType::Audio,
            path: audio_path,
            duration,
            artist: ALERT_ARTIST.to_owned(),
            title: alert.identifier.clone(),
            overlay_text: Some(text),
        };

        self.with_visual(alert, info, language, audio, fetcher)
            .await
            .map(Some)
    }

    /// Generates the first nations rendering of `alert`.
    ///
    /// Returns `Ok(None)` when no first nations language applies to its areas.
    pub async fn generate_first_nation<H: HttpFetcher>(
        &self,
        alert: &Alert,
        language: &str,
        fetcher: &H,
    ) -> Result<Option<MediaBundle>, MediaError> {
        let Some(info) = alert.get_first_info(language, true) else {
            return Ok(None);
        };
        let Some(markup) = info.first_nations_text(&self.first_nations_dir) else {
            debug!("no first nations language for alert {}", alert.identifier);
            return Ok(None);
        };

        create_dir(&self.alerts_dir).await?;
        let audio_path = self.artifact_path(alert, FIRST_NATION, "wav");
        let audio = self.synthesizer.synthesize_markup(&markup).await?;
        write(&audio_path, &audio).await?;

        let audio = MediaClip {
            media_type: MediaType::Audio,
            duration: probe_duration(&audio_path)?,
            path: audio_path,
            artist: ALERT_ARTIST.to_owned(),
            title: alert.identifier.clone(),
            overlay_text: Some(FIRST_NATION_OVERLAY.to_owned()),
        };

        self.with_visual(alert, info, FIRST_NATION, audio, fetcher)
            .await
            .map(Some)
    }

    /// Attaches the first image resource of `info`, shown for as long as the
    /// audio plays. The image replaces the audio's text overlay.
    async fn with_visual<H: HttpFetcher>(
        &self,
        alert: &Alert,
        info: &Info,
        language: &str,
        mut audio: MediaClip,
        fetcher: &H,
    ) -> Result<MediaBundle, MediaError> {
        let Some(resource) = info.resources_of_type("image").next() else {
            return Ok(MediaBundle {
                audio,
                visual: None,
            });
        };

        let data = resource
            .resolve(fetcher)
            .await
            .ok_or_else(|| MediaError::ResourceUnavailable {
                identifier: alert.identifier.clone(),
                kind: "image",
            })?;
        let image_path = self.artifact_path(alert, language, resource.file_extension());
        write(&image_path, &data).await?;

        audio.overlay_text = None;
        let visual = MediaClip {
            media_type: MediaType::Image,
            path: image_path,
            duration: audio.duration,
            artist: ALERT_ARTIST.to_owned(),
            title: alert.identifier.clone(),
            overlay_text: None,
        };

        Ok(MediaBundle {
            audio,
            visual: Some(visual),
        })
    }

    /// Returns the media to air for `alert`, generating what is missing.
    ///
    /// When the primary language cannot be rendered the secondary bundle is
    /// promoted to primary. Generation errors are logged and leave the language
    /// uncached so the next cycle tries again.
    pub async fn get_media_info<H: HttpFetcher>(
        &self,
        alert: &Alert,
        languages: &Language,
        first_nation: bool,
        fetcher: &H,
    ) -> MediaInfo {
        let mut cache = alert.media_cache().lock().await;

        let mut wanted = vec![(languages.primary.as_str(), languages.primary_voice.as_str())];
        if let Some(secondary) = &languages.secondary {
            let voice = languages.secondary_voice.as_deref().unwrap_or(DEFAULT_VOICE);
            wanted.push((secondary.as_str(), voice));
        }

        for (language, voice) in wanted {
            if cache.contains_key(language) {
                continue;
            }
            match self.generate_audio(alert, language, voice, fetcher).await {
                Ok(bundle) => {
                    cache.insert(language.to_owned(), bundle);
                }
                Err(e) => error!(
                    "error generating {} media for alert {}: {}",
                    language, alert.identifier, e
                ),
            }
        }

        if first_nation && !cache.contains_key(FIRST_NATION) {
            match self
                .generate_first_nation(alert, &languages.primary, fetcher)
                .await
            {
                Ok(bundle) => {
                    cache.insert(FIRST_NATION.to_owned(), bundle);
                }
                Err(e) => error!(
                    "error generating first nations media for alert {}: {}",
                    alert.identifier, e
                ),
            }
        }

        let cached = |language: &str| cache.get(language).cloned().flatten();
        let primary = cached(&languages.primary);
        let secondary = languages.secondary.as_deref().and_then(cached);

        let (primary, secondary) = match primary {
            Some(primary) => (Some(primary), secondary),
            None => (secondary, None),
        };

        MediaInfo {
            primary,
            secondary,
            first_nation: if first_nation { cached(FIRST_NATION) } else { None },
        }
    }
}

async fn create_dir(path: &Path) -> Result<(), MediaError> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|source| MediaError::Io {
            path: path.to_owned(),
            source,
        })
}

async fn write(path: &Path, data: &[u8]) -> Result<(), MediaError> {
    debug!("writing {} bytes to {}", data.len(), path.display());
    tokio::fs::write(path, data)
        .await
        .map_err(|source| MediaError::Io {
            path: path.to_owned(),
            source,
        })
}
