use std::path::PathBuf;

use tokio::time::Duration;
use url::Url;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8787";
const DEFAULT_PROXY_LIST_URL: &str = "https://api.proxyscrape.com/v3/free-proxy-list/get";
const DEFAULT_PROXY_PROBE_URL: &str = "https://httpbun.com/get";
const DEFAULT_PROXY_LIST_TIMEOUT_MS: u64 = 5000;
const DEFAULT_PROXY_LIST_FETCH_TIMEOUT_SECONDS: u64 = 10;
const DEFAULT_PROBE_TIMEOUT_SECONDS: u64 = 5;
const DEFAULT_PROBE_DELAY_MS: u64 = 1000;
const DEFAULT_PROBE_CONCURRENCY: usize = 1;
const DEFAULT_FFMPEG_LOCATION: &str = "/var/task/ffmpeg";
const DEFAULT_FORMAT_SPEC: &str = "bestvideo*+bestaudio/best";
const DEFAULT_YT_DLP_TIMEOUT_SECONDS: u64 = 180;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} is not a valid URL: {source}")]
    InvalidUrl {
        name: &'static str,
        source: url::ParseError,
    },
}

/// Filters sent to the proxy list provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyListQuery {
    pub country: String,
    pub ssl: String,
    pub anonymity: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub enabled: bool,
    pub list_url: Url,
    pub query: ProxyListQuery,
    pub list_fetch_timeout: Duration,
    pub probe_url: Url,
    pub probe_timeout: Duration,
    pub probe_delay: Duration,
    pub probe_concurrency: usize,
}

#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    pub yt_dlp_path: PathBuf,
    pub ffmpeg_location: Option<PathBuf>,
    pub format_spec: String,
    pub timeout: Duration,
}

/// Container and transport the selected format must have.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatTarget {
    pub ext: String,
    pub protocol: String,
}

impl Default for FormatTarget {
    fn default() -> Self {
        Self {
            ext: "mp4".to_string(),
            protocol: "https".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub proxy: ProxyConfig,
    pub extractor: ExtractorConfig,
    pub target: FormatTarget,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from any variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let read_u64 = |name: &str| read(name).and_then(|value| value.parse::<u64>().ok());

        let proxy = ProxyConfig {
            enabled: read("PROXY_ENABLED")
                .and_then(|value| parse_bool(&value))
                .unwrap_or(true),
            list_url: read_url(
                "PROXY_LIST_URL",
                read("PROXY_LIST_URL"),
                DEFAULT_PROXY_LIST_URL,
            )?,
            query: ProxyListQuery {
                country: read("PROXY_COUNTRY").unwrap_or_else(|| "us".to_string()),
                ssl: read("PROXY_SSL").unwrap_or_else(|| "all".to_string()),
                anonymity: read("PROXY_ANONYMITY").unwrap_or_else(|| "all".to_string()),
                timeout_ms: read_u64("PROXY_LIST_TIMEOUT_MS")
                    .unwrap_or(DEFAULT_PROXY_LIST_TIMEOUT_MS),
            },
            list_fetch_timeout: Duration::from_secs(
                read_u64("PROXY_LIST_FETCH_TIMEOUT_SECONDS")
                    .filter(|value| *value > 0)
                    .unwrap_or(DEFAULT_PROXY_LIST_FETCH_TIMEOUT_SECONDS),
            ),
            probe_url: read_url(
                "PROXY_PROBE_URL",
                read("PROXY_PROBE_URL"),
                DEFAULT_PROXY_PROBE_URL,
            )?,
            probe_timeout: Duration::from_secs(
                read_u64("PROXY_PROBE_TIMEOUT_SECONDS")
                    .filter(|value| *value > 0)
                    .unwrap_or(DEFAULT_PROBE_TIMEOUT_SECONDS),
            ),
            probe_delay: Duration::from_millis(
                read_u64("PROXY_PROBE_DELAY_MS").unwrap_or(DEFAULT_PROBE_DELAY_MS),
            ),
            probe_concurrency: read("PROXY_PROBE_CONCURRENCY")
                .and_then(|value| value.parse::<usize>().ok())
                .filter(|value| *value > 0)
                .unwrap_or(DEFAULT_PROBE_CONCURRENCY),
        };

        let extractor = ExtractorConfig {
            yt_dlp_path: read("YT_DLP_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("yt-dlp")),
            ffmpeg_location: Some(
                read("FFMPEG_LOCATION")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_FFMPEG_LOCATION)),
            ),
            format_spec: read("YT_DLP_FORMAT").unwrap_or_else(|| DEFAULT_FORMAT_SPEC.to_string()),
            timeout: Duration::from_secs(
                read_u64("YT_DLP_TIMEOUT_SECONDS")
                    .filter(|value| *value > 0)
                    .unwrap_or(DEFAULT_YT_DLP_TIMEOUT_SECONDS),
            ),
        };

        let defaults = FormatTarget::default();
        let target = FormatTarget {
            ext: read("TARGET_EXT").unwrap_or(defaults.ext),
            protocol: read("TARGET_PROTOCOL").unwrap_or(defaults.protocol),
        };

        Ok(Self {
            bind_addr: resolve_bind_addr(read("APP_ADDR"), read("PORT")),
            proxy,
            extractor,
            target,
        })
    }
}

fn resolve_bind_addr(app_addr: Option<String>, port: Option<String>) -> String {
    if let Some(configured) = app_addr {
        return configured;
    }

    if let Some(port) = port.and_then(|value| value.parse::<u16>().ok()) {
        return format!("0.0.0.0:{port}");
    }

    DEFAULT_BIND_ADDR.to_string()
}

fn read_url(name: &'static str, value: Option<String>, default: &str) -> Result<Url, ConfigError> {
    let raw = value.as_deref().unwrap_or(default);
    Url::parse(raw).map_err(|source| ConfigError::InvalidUrl { name, source })
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
