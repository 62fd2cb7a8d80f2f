use std::io::ErrorKind;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Number;
use tokio::{process::Command, time::timeout};
use tracing::{debug, info};

use crate::{
    config::{ExtractorConfig, FormatTarget},
    error::ResolveError,
    proxy::ProxyCandidate,
};

/// One playable encoding reported by yt-dlp.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FormatEntry {
    #[serde(default)]
    pub format_id: Option<String>,
    #[serde(default)]
    pub ext: Option<String>,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// The subset of yt-dlp's `--dump-single-json` output the response is built from.
/// `formats` is ordered from worst to best quality.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionResult {
    pub id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub thumbnail: Option<String>,
    /// Epoch seconds; some extractors report fractional values.
    pub timestamp: Option<Number>,
    pub uploader_id: Option<String>,
    pub uploader: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub formats: Vec<FormatEntry>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<FormatEntry>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<FormatEntry>>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaResponse {
    pub video_id: Option<String>,
    pub video_url: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub image_uri: Option<String>,
    pub published: Option<Number>,
    pub uploader_id: Option<String>,
    pub uploader_name: Option<String>,
    pub ext: Option<String>,
    pub mime_type: &'static str,
}

impl MediaResponse {
    pub fn new(info: ExtractionResult, format: FormatEntry) -> Self {
        let mime_type = mime_type_for_ext(format.ext.as_deref().unwrap_or_default());
        Self {
            video_id: info.id,
            video_url: format.url,
            title: info.title,
            description: info.description,
            image_uri: info.thumbnail,
            published: info.timestamp,
            uploader_id: info.uploader_id,
            uploader_name: info.uploader,
            ext: format.ext,
            mime_type,
        }
    }
}

impl FormatTarget {
    pub fn matches(&self, format: &FormatEntry) -> bool {
        format.ext.as_deref() == Some(self.ext.as_str())
            && format.protocol.as_deref() == Some(self.protocol.as_str())
    }
}

/// Highest-quality entry matching `target`.
pub fn select_best_format<'a>(
    formats: &'a [FormatEntry],
    target: &FormatTarget,
) -> Option<&'a FormatEntry> {
    formats.iter().rev().find(|format| target.matches(format))
}

pub fn mime_type_for_ext(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "mov" => "video/quicktime",
        "flv" => "video/x-flv",
        "3gp" => "video/3gpp",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "aac" => "audio/aac",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "opus" => "audio/ogg",
        "flac" => "audio/flac",
        _ => "application/octet-stream",
    }
}

/// Resolves a page address into metadata and formats.
#[async_trait]
pub trait MediaExtractor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn extract(
        &self,
        uri: &str,
        proxy: Option<&ProxyCandidate>,
    ) -> Result<ExtractionResult, ResolveError>;
}

/// Extracts, then picks the best format matching `target`.
pub async fn extract_best(
    extractor: &dyn MediaExtractor,
    uri: &str,
    proxy: Option<&ProxyCandidate>,
    target: &FormatTarget,
) -> Result<MediaResponse, ResolveError> {
    let info = extractor.extract(uri, proxy).await?;
    debug!(
        "{} returned {} formats for {uri}",
        extractor.name(),
        info.formats.len()
    );

    let format = select_best_format(&info.formats, target)
        .cloned()
        .ok_or_else(|| ResolveError::NoSuitableFormat {
            ext: target.ext.clone(),
            protocol: target.protocol.clone(),
        })?;
    info!(
        "Selected format {} ({})",
        format.format_id.as_deref().unwrap_or("?"),
        format.ext.as_deref().unwrap_or("?")
    );

    Ok(MediaResponse::new(info, format))
}

/// Runs the yt-dlp binary in metadata-only mode.
pub struct YtDlpExtractor {
    config: ExtractorConfig,
}

impl YtDlpExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self { config }
    }

    fn build_args(&self, uri: &str, proxy: Option<&ProxyCandidate>) -> Vec<String> {
        let mut args = vec![
            "--dump-single-json".to_string(),
            "--format".to_string(),
            self.config.format_spec.clone(),
            "--no-cache-dir".to_string(),
        ];

        if let Some(proxy) = proxy {
            args.push("--proxy".to_string());
            args.push(proxy.to_string());
        }

        if let Some(ffmpeg) = &self.config.ffmpeg_location {
            args.push("--ffmpeg-location".to_string());
            args.push(ffmpeg.to_string_lossy().to_string());
        }

        args.push("--".to_string());
        args.push(uri.to_string());
        args
    }

    async fn run(&self, args: Vec<String>) -> Result<std::process::Output, ResolveError> {
        let program = &self.config.yt_dlp_path;
        let command_future = Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output();

        let output = timeout(self.config.timeout, command_future)
            .await
            .map_err(|_| {
                ResolveError::Extraction(format!(
                    "yt-dlp timed out after {}s",
                    self.config.timeout.as_secs_f32()
                ))
            })?
            .map_err(|error| {
                if error.kind() == ErrorKind::NotFound {
                    ResolveError::Extraction(format!(
                        "yt-dlp is not installed at {}",
                        program.display()
                    ))
                } else {
                    ResolveError::Extraction(format!("could not run yt-dlp: {error}"))
                }
            })?;

        if !output.status.success() {
            return Err(ResolveError::Extraction(run_error_message(&output.stderr)));
        }

        Ok(output)
    }
}

#[async_trait]
impl MediaExtractor for YtDlpExtractor {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn extract(
        &self,
        uri: &str,
        proxy: Option<&ProxyCandidate>,
    ) -> Result<ExtractionResult, ResolveError> {
        let args = self.build_args(uri, proxy);
        debug!(?args, "yt-dlp options");

        let output = self.run(args).await?;
        serde_json::from_slice(&output.stdout)
            .map_err(|error| ResolveError::Extraction(format!("invalid yt-dlp JSON: {error}")))
    }
}

fn run_error_message(stderr: &[u8]) -> String {
    String::from_utf8_lossy(stderr)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .unwrap_or("yt-dlp exited without a result")
        .to_string()
}
