use std::collections::BTreeSet;
use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::parser::ParsedTitle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamType {
    Debrid,
    P2p,
    Usenet,
    Http,
    Youtube,
    Live,
    External,
    Info,
    Error,
}

impl StreamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamType::Debrid => "debrid",
            StreamType::P2p => "p2p",
            StreamType::Usenet => "usenet",
            StreamType::Http => "http",
            StreamType::Youtube => "youtube",
            StreamType::Live => "live",
            StreamType::External => "external",
            StreamType::Info => "info",
            StreamType::Error => "error",
        }
    }

    /// Pseudo-streams carry diagnostics, not media.
    pub fn is_playable(&self) -> bool {
        !matches!(self, StreamType::Info | StreamType::Error)
    }
}

impl Display for StreamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which debrid service produced a stream, and in what state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub id: String,
    pub cached: bool,
    pub library: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    pub size: Option<u64>,
    /// `-1` when the container exposed no file list.
    pub index: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinDirective {
    Top,
    Bottom,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeadexTag {
    pub is_best: bool,
    pub is_seadex: bool,
}

/// Immutable per-request aggregation of one playable candidate, the unit the
/// filter/score/sort stages operate on.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParsedStream {
    pub id: String,
    /// Addon instance that contributed the candidate.
    pub addon: String,
    #[serde(rename = "type")]
    pub stream_type: Option<StreamType>,
    pub service: Option<ServiceInfo>,
    pub parsed_file: Option<ParsedTitle>,
    pub filename: Option<String>,
    pub folder_name: Option<String>,
    pub size: Option<u64>,
    pub folder_size: Option<u64>,
    /// kbps; backfilled from runtime × size when the indexer did not say.
    pub bitrate_kbps: Option<u64>,
    pub indexer: Option<String>,
    pub age_hours: Option<u32>,
    pub seeders: Option<u32>,
    pub languages: BTreeSet<String>,
    pub file: FileInfo,
    pub url: Option<String>,
    pub external_url: Option<String>,
    pub info_hash: Option<String>,
    pub file_idx: Option<u32>,
    pub sources: Vec<String>,
    /// Names of pipeline stages this stream is exempt from.
    pub passthrough: BTreeSet<String>,
    pub seadex: Option<SeadexTag>,
    pub private: bool,
    /// Free-text shown for info/error pseudo-streams.
    pub message: Option<String>,

    // precomputer bookkeeping
    pub ranked_regexes_matched: Vec<String>,
    pub regex_score: i64,
    pub stream_expression_score: i64,
    pub regex_matched: Option<String>,
    pub keyword_matched: Option<String>,
    pub stream_expression_matched: Option<String>,
    /// Position of the highest-priority preferred item this stream matched;
    /// lower is better.
    pub preferred_rank: Option<usize>,
    pub pinned: Option<PinDirective>,
}

impl ParsedStream {
    pub fn stream_type(&self) -> StreamType {
        self.stream_type.unwrap_or(StreamType::P2p)
    }

    pub fn error(addon: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            addon: addon.into(),
            stream_type: Some(StreamType::Error),
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn info(addon: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            addon: addon.into(),
            stream_type: Some(StreamType::Info),
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn has_passthrough(&self, stage: &str) -> bool {
        self.passthrough.contains(stage)
    }

    /// Effective size: selected file first, torrent total as fallback.
    pub fn effective_size(&self) -> Option<u64> {
        self.file.size.or(self.size).or(self.folder_size)
    }

    /// Backfill `bitrate_kbps` from runtime and size. Season packs divide by
    /// the total episode count across included seasons; when that count is
    /// unknown the estimate is skipped.
    pub fn ensure_bitrate(&mut self, runtime_minutes: Option<u32>, pack_episodes: Option<u32>) {
        if self.bitrate_kbps.is_some() {
            return;
        }
        let Some(runtime) = runtime_minutes.filter(|r| *r > 0) else {
            return;
        };
        let Some(size) = self.effective_size() else {
            return;
        };
        let is_pack = self
            .parsed_file
            .as_ref()
            .is_some_and(|p| p.is_season_pack());
        let size = if is_pack {
            match pack_episodes {
                Some(count) if count > 0 => size / count as u64,
                // unknown episode count: no honest estimate possible
                _ => return,
            }
        } else {
            size
        };
        let seconds = runtime as u64 * 60;
        self.bitrate_kbps = Some(size * 8 / seconds / 1000);
    }

    /// Dedup identity: info-hash when present, else filename+size+service.
    pub fn fingerprint(&self) -> String {
        if let Some(hash) = &self.info_hash {
            return format!("hash:{}", hash.to_lowercase());
        }
        format!(
            "file:{}:{}:{}",
            self.filename.as_deref().unwrap_or_default(),
            self.effective_size().unwrap_or_default(),
            self.service.as_ref().map(|s| s.id.as_str()).unwrap_or(""),
        )
    }

    /// The string attributes regex/keyword filters probe.
    pub fn regex_targets(&self) -> impl Iterator<Item = &str> {
        [
            self.filename.as_deref(),
            self.folder_name.as_deref(),
            self.parsed_file
                .as_ref()
                .and_then(|p| p.release_group.as_deref()),
            self.indexer.as_deref(),
        ]
        .into_iter()
        .flatten()
    }
}

/// Output of the whole pipeline: ranked streams plus per-service errors,
/// both data.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StreamList {
    pub streams: Vec<ParsedStream>,
    pub errors: Vec<ServiceError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceError {
    pub service_id: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;

    #[test]
    fn bitrate_from_runtime_and_size() {
        let mut stream = ParsedStream {
            file: FileInfo {
                name: "x.mkv".into(),
                size: Some(1_500_000_000),
                index: 0,
            },
            ..Default::default()
        };
        stream.ensure_bitrate(Some(50), None);
        // 1.5e9 * 8 / 3000s / 1000
        assert_eq!(stream.bitrate_kbps, Some(4000));
    }

    #[test]
    fn bitrate_skips_packs_with_unknown_count() {
        let mut stream = ParsedStream {
            parsed_file: Some(parser::parse("Show.S01.1080p.WEB-DL")),
            size: Some(30_000_000_000),
            ..Default::default()
        };
        stream.ensure_bitrate(Some(45), None);
        assert_eq!(stream.bitrate_kbps, None);

        stream.ensure_bitrate(Some(45), Some(10));
        assert_eq!(stream.bitrate_kbps, Some(3_000_000_000u64 * 8 / (45 * 60) / 1000));
    }

    #[test]
    fn fingerprint_prefers_hash() {
        let stream = ParsedStream {
            info_hash: Some("AABB".into()),
            filename: Some("x".into()),
            ..Default::default()
        };
        assert_eq!(stream.fingerprint(), "hash:aabb");
    }
}
