use std::fmt::Display;

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::metadata::TitleMetadata;
use crate::parser::ParsedTitle;
use crate::request_client::RequestError;

pub mod multistore;
pub mod processor;
pub mod selector;
pub mod webdav;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    Unauthorized,
    Forbidden,
    NotFound,
    BadRequest,
    TooManyRequests,
    InternalServerError,
    NotImplemented,
    ServiceUnavailable,
    NoMatchingFile,
    LockTimeout,
    Unknown,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::BadRequest => "BAD_REQUEST",
            ErrorCode::TooManyRequests => "TOO_MANY_REQUESTS",
            ErrorCode::InternalServerError => "INTERNAL_SERVER_ERROR",
            ErrorCode::NotImplemented => "NOT_IMPLEMENTED",
            ErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorCode::NoMatchingFile => "NO_MATCHING_FILE",
            ErrorCode::LockTimeout => "LOCK_TIMEOUT",
            ErrorCode::Unknown => "UNKNOWN",
        }
    }
}

/// Error surface of every debrid adapter method. Carried as data through the
/// processor; one failing service never aborts its siblings.
#[derive(Debug, Clone, Serialize)]
pub struct DebridError {
    pub status_code: u16,
    pub code: ErrorCode,
    pub message: String,
}

impl DebridError {
    pub fn new(status_code: u16, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status_code,
            code,
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(401, ErrorCode::Unauthorized, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(404, ErrorCode::NotFound, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(400, ErrorCode::BadRequest, message)
    }

    pub fn no_matching_file(message: impl Into<String>) -> Self {
        Self::new(400, ErrorCode::NoMatchingFile, message)
    }

    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::new(501, ErrorCode::NotImplemented, message)
    }

    pub fn lock_timeout(message: impl Into<String>) -> Self {
        Self::new(504, ErrorCode::LockTimeout, message)
    }

    /// Timeouts and terminal download failures surface as UNKNOWN.
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(504, ErrorCode::Unknown, message)
    }
}

impl Display for DebridError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.code.as_str(), self.status_code, self.message)
    }
}

impl std::error::Error for DebridError {}

impl From<RequestError> for DebridError {
    fn from(e: RequestError) -> Self {
        let message = e.to_string();
        match e.status() {
            Some(401) => Self::new(401, ErrorCode::Unauthorized, message),
            Some(403) => Self::new(403, ErrorCode::Forbidden, message),
            Some(404) => Self::new(404, ErrorCode::NotFound, message),
            Some(400) => Self::new(400, ErrorCode::BadRequest, message),
            Some(429) => Self::new(429, ErrorCode::TooManyRequests, message),
            Some(501) => Self::new(501, ErrorCode::NotImplemented, message),
            Some(503) => Self::new(503, ErrorCode::ServiceUnavailable, message),
            Some(status) if status >= 500 => {
                Self::new(status, ErrorCode::InternalServerError, message)
            }
            Some(status) => Self::new(status, ErrorCode::Unknown, message),
            None => Self::new(504, ErrorCode::Unknown, message),
        }
    }
}

impl From<crate::cache::LockError> for DebridError {
    fn from(e: crate::cache::LockError) -> Self {
        Self::lock_timeout(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Cached,
    Downloaded,
    Downloading,
    Queued,
    Uploading,
    Processing,
    Failed,
    Invalid,
    Unknown,
}

impl DownloadStatus {
    /// Immediately playable.
    pub fn is_ready(&self) -> bool {
        matches!(self, DownloadStatus::Cached | DownloadStatus::Downloaded)
    }

    /// Terminal negative: retrying will not help.
    pub fn is_terminal_negative(&self) -> bool {
        matches!(self, DownloadStatus::Failed | DownloadStatus::Invalid)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DebridFile {
    pub index: i32,
    pub name: Option<String>,
    pub size: u64,
    pub path: Option<String>,
    pub link: Option<String>,
    pub mime_type: Option<String>,
}

impl DebridFile {
    pub fn is_video(&self) -> bool {
        is_video_file(self.name.as_deref().unwrap_or_default(), self.mime_type.as_deref())
    }
}

/// One item on a debrid account, torrent or NZB alike.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebridDownload {
    pub id: String,
    pub hash: Option<String>,
    pub name: Option<String>,
    pub status: DownloadStatus,
    pub size: Option<u64>,
    #[serde(default)]
    pub files: Vec<DebridFile>,
    #[serde(default)]
    pub library: bool,
    pub added_at: Option<time::OffsetDateTime>,
}

/// Per-hash answer of an availability check, in request order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityResult {
    pub hash: String,
    pub status: DownloadStatus,
    pub library: bool,
    #[serde(default)]
    pub files: Vec<DebridFile>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub supports_torrents: bool,
    pub supports_usenet: bool,
}

/// Pre-resolution torrent candidate handed to the processor.
#[derive(Debug, Clone, Default)]
pub struct CandidateTorrent {
    /// Canonical lowercase 40-hex info-hash, or a placeholder derived from
    /// the download URL.
    pub hash: String,
    pub placeholder_hash: bool,
    pub title: Option<String>,
    pub size: Option<u64>,
    pub download_url: Option<String>,
    pub tracker_sources: Vec<String>,
    pub private: bool,
    pub library: bool,
    pub indexer: Option<String>,
    pub seeders: Option<u32>,
    pub age_hours: Option<u32>,
    /// Pre-verified by the producing addon: bypasses coarse validators.
    pub confirmed: bool,
    pub parsed: Option<ParsedTitle>,
    pub addon: String,
}

impl CandidateTorrent {
    /// Placeholder identity for torrents whose info-hash is not yet known.
    pub fn placeholder_hash_for(download_url: &str) -> String {
        let mut hasher = Sha1::new();
        hasher.update(download_url.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn from_download_url(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            hash: Self::placeholder_hash_for(&url),
            placeholder_hash: true,
            download_url: Some(url),
            ..Default::default()
        }
    }
}

/// Pre-resolution NZB candidate.
#[derive(Debug, Clone, Default)]
pub struct CandidateNzb {
    /// MD5 of the cleaned NZB URL, or the indexer's item identifier.
    pub hash: String,
    pub nzb_url: Option<String>,
    pub title: Option<String>,
    pub size: Option<u64>,
    pub easynews_url: Option<String>,
    pub library: bool,
    pub indexer: Option<String>,
    pub age_hours: Option<u32>,
    pub confirmed: bool,
    pub addon: String,
}

impl CandidateNzb {
    /// Identity of an NZB URL: query noise stripped, then MD5.
    pub fn hash_for_url(nzb_url: &str) -> String {
        let cleaned = nzb_url
            .split(['?', '#'])
            .next()
            .unwrap_or(nzb_url)
            .trim_end_matches('/');
        let digest = md5::compute(cleaned.as_bytes());
        format!("{digest:x}")
    }
}

/// Item shape accepted by `check_nzbs`.
#[derive(Debug, Clone)]
pub struct NzbCheckItem {
    pub hash: Option<String>,
    pub name: Option<String>,
}

/// Everything `resolve` needs to produce a playable URL and pick the right
/// file inside the container.
#[derive(Debug, Clone, Default)]
pub struct PlaybackRequest {
    pub hash: String,
    pub magnet: Option<String>,
    pub download_url: Option<String>,
    pub nzb_url: Option<String>,
    pub filename: Option<String>,
    pub season: Option<u16>,
    pub episode: Option<u16>,
    pub metadata: Option<TitleMetadata>,
    pub client_ip: Option<String>,
    pub cache_and_play: bool,
    pub auto_remove: bool,
    /// Skip the post-selection episode re-assertion.
    pub skip_season_episode_check: bool,
    pub chosen_index: Option<i32>,
    pub chosen_filename: Option<String>,
}

impl PlaybackRequest {
    /// Resolve-lock identity: coalesces duplicate user-driven polls.
    pub fn lock_key(&self, service_id: &str, token_fingerprint: &str) -> String {
        format!(
            "resolve:{service_id}:{}:{}:{}:{}:{}:{}:{token_fingerprint}",
            self.hash,
            self.season.map(|s| s.to_string()).unwrap_or_default(),
            self.episode.map(|e| e.to_string()).unwrap_or_default(),
            self.metadata
                .as_ref()
                .and_then(|m| m.absolute_episode)
                .map(|e| e.to_string())
                .unwrap_or_default(),
            self.filename.as_deref().unwrap_or_default(),
            self.client_ip.as_deref().unwrap_or_default(),
        )
    }
}

/// One debrid backend. Implementations wrap (a) a generic multi-store REST
/// backend, (b) a SABnzbd-compatible streaming WebDAV backend.
#[async_trait::async_trait]
pub trait DebridService: Send + Sync {
    /// User-declared short code ("tb", "rd", ...).
    fn id(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    /// The user's own qBittorrent is exempt from private-tracker exclusion.
    fn is_qbittorrent(&self) -> bool {
        false
    }

    /// Real info-hash for a download URL this service has already seen.
    fn known_hash_for_url(&self, _download_url: &str) -> Option<String> {
        None
    }

    async fn list_magnets(&self) -> Result<Vec<DebridDownload>, DebridError>;

    async fn list_nzbs(&self) -> Result<Vec<DebridDownload>, DebridError>;

    async fn check_magnets(
        &self,
        hashes: &[String],
        stremio_id: Option<&str>,
        check_owned: bool,
    ) -> Result<Vec<AvailabilityResult>, DebridError>;

    async fn check_nzbs(
        &self,
        items: &[NzbCheckItem],
        check_owned: bool,
    ) -> Result<Vec<AvailabilityResult>, DebridError>;

    async fn add_magnet(&self, magnet: &str) -> Result<DebridDownload, DebridError>;

    async fn add_torrent(&self, download_url: &str) -> Result<DebridDownload, DebridError>;

    async fn add_nzb(&self, url: &str, name: &str) -> Result<DebridDownload, DebridError>;

    /// Produce a playable URL, or `None` when the item is not ready and
    /// `cache_and_play` was off.
    async fn resolve(&self, request: &PlaybackRequest) -> Result<Option<String>, DebridError>;

    async fn remove_magnet(&self, id: &str) -> Result<(), DebridError>;

    async fn remove_nzb(&self, id: &str) -> Result<(), DebridError>;

    async fn refresh_library_cache(&self) -> Result<(), DebridError>;

    async fn get_magnet(&self, id: &str) -> Result<DebridDownload, DebridError>;

    async fn get_nzb(&self, id: &str) -> Result<DebridDownload, DebridError>;
}

/// Build the adapter for one user-declared service from its opaque
/// credential blob. Unknown shapes are skipped with a log line, never an
/// error: one bad service must not take down the request.
pub fn build_service(
    config: &crate::user_data::ServiceConfig,
) -> Option<std::sync::Arc<dyn DebridService>> {
    use crate::user_data::ServiceKind;
    if !config.enabled {
        return None;
    }
    let creds = &config.credentials;
    let field = |name: &str| creds.get(name).and_then(|v| v.as_str()).map(str::to_owned);
    match config.kind {
        ServiceKind::Multistore => {
            let base_url = field("baseUrl")?.parse().ok()?;
            let api_key = field("apiKey")?;
            let store_config =
                multistore::MultiStoreConfig::from_global_config(&config.id, base_url, api_key);
            Some(std::sync::Arc::new(multistore::MultiStore::new(
                store_config,
            )))
        }
        ServiceKind::Webdav => {
            let api_url = field("apiUrl")?.parse().ok()?;
            let webdav_url = field("webdavUrl")?.parse().ok()?;
            let mut webdav_config = webdav::WebdavConfig::new(
                &config.id,
                api_url,
                field("apiKey")?,
                webdav_url,
                field("username")?,
                field("password")?,
            );
            if let Some(prefix) = field("contentPrefix") {
                webdav_config.content_prefix = prefix;
            }
            {
                use crate::config::{self, CONFIG};
                use std::time::Duration;
                webdav_config.library_cache_ttl =
                    Duration::from_secs(CONFIG.get_value::<config::LibraryCacheTtl>().0);
                webdav_config.library_stale_threshold =
                    Duration::from_secs(CONFIG.get_value::<config::LibraryStaleThreshold>().0);
                webdav_config.playback_link_validity =
                    Duration::from_secs(CONFIG.get_value::<config::PlaybackLinkValidity>().0);
            }
            Some(std::sync::Arc::new(webdav::StreamingWebdav::new(
                webdav_config,
            )))
        }
        ServiceKind::Qbittorrent => {
            // own client, not a debrid backend; only its private-tracker
            // exemption matters and that is handled by the processor
            tracing::debug!(service = config.id, "qBittorrent entries carry no adapter");
            None
        }
    }
}

/// Adapters for every enabled service in a user configuration, in declared
/// order.
pub fn build_services(
    configs: &[crate::user_data::ServiceConfig],
) -> Vec<std::sync::Arc<dyn DebridService>> {
    configs.iter().filter_map(build_service).collect()
}

const VIDEO_EXTENSIONS: &[&str] = &[
    ".mkv", ".mp4", ".avi", ".mov", ".wmv", ".flv", ".webm", ".ts", ".m2ts", ".m4v", ".mpg",
    ".mpeg", ".vob", ".3gp", ".ogv",
];

/// Documents, subtitles and archives: never selectable, even with a video
/// mime type.
const NOT_VIDEO_EXTENSIONS: &[&str] = &[
    ".srt", ".sub", ".idx", ".ass", ".ssa", ".vtt", ".nfo", ".txt", ".md", ".pdf", ".jpg",
    ".jpeg", ".png", ".gif", ".zip", ".rar", ".7z", ".tar", ".gz", ".exe", ".iso", ".sfv",
    ".db", ".par2",
];

/// Blacklist first, then video mime prefix or a known extension.
pub fn is_video_file(name: &str, mime_type: Option<&str>) -> bool {
    let lower = name.to_lowercase();
    if NOT_VIDEO_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
        return false;
    }
    if mime_type.is_some_and(|m| m.starts_with("video")) {
        return true;
    }
    VIDEO_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_classification() {
        assert!(is_video_file("Show.S01E01.mkv", None));
        assert!(is_video_file("weird.bin", Some("video/x-matroska")));
        assert!(!is_video_file("Show.S01E01.srt", None));
        // blacklist beats mime
        assert!(!is_video_file("subs.srt", Some("video/x-matroska")));
        assert!(!is_video_file("readme.txt", None));
        assert!(!is_video_file("archive.rar", None));
    }

    #[test]
    fn placeholder_hash_is_stable_hex() {
        let a = CandidateTorrent::placeholder_hash_for("https://indexer/dl/42");
        let b = CandidateTorrent::placeholder_hash_for("https://indexer/dl/42");
        assert_eq!(a, b);
        assert_eq!(a.len(), 40);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn nzb_hash_strips_query_noise() {
        let a = CandidateNzb::hash_for_url("https://indexer/getnzb/abc.nzb?apikey=SECRET");
        let b = CandidateNzb::hash_for_url("https://indexer/getnzb/abc.nzb?apikey=OTHER");
        assert_eq!(a, b);
    }

    #[test]
    fn status_state_machine() {
        assert!(DownloadStatus::Cached.is_ready());
        assert!(DownloadStatus::Downloaded.is_ready());
        assert!(!DownloadStatus::Downloading.is_ready());
        assert!(DownloadStatus::Failed.is_terminal_negative());
        assert!(DownloadStatus::Invalid.is_terminal_negative());
        assert!(!DownloadStatus::Queued.is_terminal_negative());
    }
}
