//! Track language lookups.

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use crate::error::{GxsError, Result};

/// Languages of the first video track and of every audio track, in stream
/// order. Unknown languages are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackLanguages {
    pub video: Option<String>,
    pub audio: Vec<Option<String>>,
}

impl TrackLanguages {
    /// Language of the audio stream at zero-based `index`.
    pub fn audio(&self, index: usize) -> Option<&str> {
        self.audio.get(index).and_then(|lang| lang.as_deref())
    }
}

#[async_trait]
pub trait MetadataProvider: Send + Sync {
    async fn track_languages(&self, path: &Path) -> Result<TrackLanguages>;
}

/// Reads languages with `mediainfo --Output=JSON`.
#[derive(Debug, Clone)]
pub struct MediaInfoCli {
    binary: String,
}

impl MediaInfoCli {
    pub fn new<S: Into<String>>(binary: S) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl MetadataProvider for MediaInfoCli {
    async fn track_languages(&self, path: &Path) -> Result<TrackLanguages> {
        debug!("Reading track languages of {}", path.display());
        let output = Command::new(&self.binary)
            .arg("--Output=JSON")
            .arg(path)
            .output()
            .await
            .map_err(|e| GxsError::Metadata(format!("Failed to run {}: {}", self.binary, e)))?;

        if !output.status.success() {
            return Err(GxsError::Metadata(format!(
                "{} failed: {}",
                self.binary,
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        parse_mediainfo_json(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Provider for runs without a metadata tool; every language is unknown.
#[derive(Debug, Clone, Default)]
pub struct NoMetadata;

#[async_trait]
impl MetadataProvider for NoMetadata {
    async fn track_languages(&self, _path: &Path) -> Result<TrackLanguages> {
        Ok(TrackLanguages::default())
    }
}

#[derive(Debug, Deserialize)]
struct MediaInfoReport {
    media: Option<MediaInfoMedia>,
}

#[derive(Debug, Deserialize)]
struct MediaInfoMedia {
    #[serde(default)]
    track: Vec<MediaInfoTrack>,
}

#[derive(Debug, Deserialize)]
struct MediaInfoTrack {
    #[serde(rename = "@type")]
    kind: String,
    #[serde(rename = "Language")]
    language: Option<String>,
}

pub fn parse_mediainfo_json(text: &str) -> Result<TrackLanguages> {
    let report: MediaInfoReport = serde_json::from_str(text)?;
    let tracks = report.media.map(|media| media.track).unwrap_or_default();

    let language = |track: &MediaInfoTrack| {
        track
            .language
            .as_deref()
            .map(str::trim)
            .filter(|lang| !lang.is_empty())
            .map(str::to_string)
    };

    Ok(TrackLanguages {
        video: tracks
            .iter()
            .find(|track| track.kind == "Video")
            .and_then(language),
        audio: tracks
            .iter()
            .filter(|track| track.kind == "Audio")
            .map(language)
            .collect(),
    })
}
