use std::collections::BTreeMap;
use std::fmt::Display;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::content_id::MediaType;
use crate::pipeline::sel::StreamExpression;
use crate::stream::StreamType;

/// Inclusive numeric range; open ends mean unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NumRange {
    pub min: Option<u64>,
    pub max: Option<u64>,
}

impl NumRange {
    pub fn contains(&self, value: u64) -> bool {
        self.min.is_none_or(|min| value >= min) && self.max.is_none_or(|max| value <= max)
    }

    pub fn is_open(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }
}

/// Exclude/require/include triplet over one enumerated attribute. Absent
/// attribute values fall into the literal `Unknown` bucket.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EnumFilter {
    pub excluded: Vec<String>,
    pub required: Vec<String>,
    pub included: Vec<String>,
}

impl EnumFilter {
    pub fn is_empty(&self) -> bool {
        self.excluded.is_empty() && self.required.is_empty() && self.included.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateCombine {
    #[default]
    Or,
    And,
}

/// Cache / uncache / season-pack gate with addon/service/stream-type
/// scoping.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScopedGate {
    pub enabled: bool,
    pub addons: Vec<String>,
    pub services: Vec<String>,
    pub stream_types: Vec<StreamType>,
    pub combine: GateCombine,
}

impl ScopedGate {
    /// Does this gate apply to the given stream coordinates? Empty scope
    /// lists match everything; enabled scopes combine with AND or OR.
    pub fn in_scope(
        &self,
        addon: &str,
        service: Option<&str>,
        stream_type: StreamType,
    ) -> bool {
        let mut checks = Vec::new();
        if !self.addons.is_empty() {
            checks.push(self.addons.iter().any(|a| a.eq_ignore_ascii_case(addon)));
        }
        if !self.services.is_empty() {
            checks.push(
                service.is_some_and(|s| self.services.iter().any(|x| x.eq_ignore_ascii_case(s))),
            );
        }
        if !self.stream_types.is_empty() {
            checks.push(self.stream_types.contains(&stream_type));
        }
        if checks.is_empty() {
            return true;
        }
        match self.combine {
            GateCombine::Or => checks.into_iter().any(|c| c),
            GateCombine::And => checks.into_iter().all(|c| c),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScopedRange {
    #[serde(flatten)]
    pub range: NumRange,
    /// Which stream categories the range applies to: p2p, cached, uncached.
    pub categories: Vec<String>,
}

/// Size/bitrate ranges with selection precedence: resolution-specific, then
/// per media type, then global.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SizeRanges {
    pub global: Option<NumRange>,
    pub movies: Option<NumRange>,
    pub series: Option<NumRange>,
    pub anime: Option<NumRange>,
    pub per_resolution: BTreeMap<String, NumRange>,
}

impl SizeRanges {
    pub fn select(&self, resolution: Option<&str>, media: MediaType) -> Option<NumRange> {
        if let Some(resolution) = resolution {
            if let Some(range) = self.per_resolution.get(resolution) {
                return Some(*range);
            }
        }
        let per_type = match media {
            MediaType::Movie => self.movies,
            MediaType::Series => self.series,
            MediaType::Anime => self.anime,
        };
        per_type.or(self.global)
    }

    pub fn is_empty(&self) -> bool {
        self.global.is_none()
            && self.movies.is_none()
            && self.series.is_none()
            && self.anime.is_none()
            && self.per_resolution.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortKey {
    Resolution,
    Quality,
    Size,
    Seeders,
    Cached,
    Library,
    Service,
    Addon,
    Age,
    Bitrate,
    Score,
    Language,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SortCriterion {
    pub key: SortKey,
    #[serde(default)]
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitMode {
    #[default]
    Independent,
    Conjunctive,
}

/// Integer caps per category; `0` or absent means disabled.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ResultLimits {
    pub global: Option<u32>,
    pub per_indexer: Option<u32>,
    pub per_release_group: Option<u32>,
    pub per_resolution: Option<u32>,
    pub per_quality: Option<u32>,
    pub per_addon: Option<u32>,
    pub per_stream_type: Option<u32>,
    pub per_service: Option<u32>,
    pub mode: LimitMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    /// Generic multi-store REST backend (torrents and usenet).
    Multistore,
    /// SABnzbd-compatible streaming WebDAV backend.
    Webdav,
    /// User's own qBittorrent; exempt from private-tracker exclusion.
    Qbittorrent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    /// Short code shown to the user, e.g. "tb", "rd", "en".
    pub id: String,
    pub kind: ServiceKind,
    /// Opaque credential blob, owned by the adapter.
    pub credentials: serde_json::Value,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyConfig {
    pub url: String,
    #[serde(default)]
    pub credentials: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DigitalReleaseGate {
    pub enabled: bool,
    /// Days of slack around the release window.
    pub tolerance_days: i64,
}

impl Default for DigitalReleaseGate {
    fn default() -> Self {
        Self {
            enabled: false,
            tolerance_days: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedRegex {
    pub name: String,
    pub pattern: String,
    pub score: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedExpression {
    pub expression: String,
    pub score: i64,
}

/// Declarative user configuration, accepted as parsed data by the core.
/// Validation happens once at ingestion; streaming never compiles regexes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UserData {
    pub resolutions: EnumFilter,
    pub qualities: EnumFilter,
    pub encodes: EnumFilter,
    pub visual_tags: EnumFilter,
    pub audio_tags: EnumFilter,
    pub audio_channels: EnumFilter,
    pub languages: EnumFilter,
    pub stream_types: EnumFilter,
    pub release_groups: EnumFilter,

    pub excluded_keywords: Vec<String>,
    pub required_keywords: Vec<String>,
    pub included_keywords: Vec<String>,
    pub preferred_keywords: Vec<String>,

    pub excluded_regexes: Vec<String>,
    pub required_regexes: Vec<String>,
    pub included_regexes: Vec<String>,
    pub ranked_regexes: Vec<RankedRegex>,
    pub preferred_regexes: Vec<String>,

    pub excluded_expressions: Vec<String>,
    pub required_expressions: Vec<String>,
    pub included_expressions: Vec<String>,
    pub ranked_expressions: Vec<RankedExpression>,
    pub preferred_expressions: Vec<String>,

    pub size_ranges: SizeRanges,
    pub bitrate_ranges: SizeRanges,
    pub seeder_range: Option<ScopedRange>,
    pub age_range: Option<ScopedRange>,
    /// Accelerator ranges: a stream inside one keeps unconditionally.
    pub included_size_range: Option<NumRange>,
    pub included_seeder_range: Option<NumRange>,

    pub excluded_uncached: ScopedGate,
    pub excluded_cached: ScopedGate,
    pub excluded_season_packs: ScopedGate,

    pub digital_release_gate: DigitalReleaseGate,
    /// Strict year mode: movies without a detectable year fail the year
    /// check; series keep.
    pub strict_year_matching: bool,
    pub apply_title_match: bool,
    /// Addons the title/season/episode checks apply to; empty = all.
    pub title_match_addons: Vec<String>,

    pub sort_criteria: Vec<SortCriterion>,
    pub limits: ResultLimits,
    pub services: Vec<ServiceConfig>,
    pub proxy: Option<ProxyConfig>,

    /// Use metadata runtime to backfill bitrate.
    pub metadata_bitrate: bool,
    /// Fetch SeaDex tags for anime requests.
    pub best_release_tags: bool,
    /// Emit per-stage removal statistics as info pseudo-streams.
    pub statistics: bool,
    /// Emit per-service errors as error pseudo-streams.
    pub show_errors: bool,
    /// This configuration comes from a trusted operator (regex access).
    pub trusted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegexAccess {
    All,
    Trusted,
    None,
}

serde_plain::derive_fromstr_from_deserialize!(RegexAccess);
serde_plain::derive_display_from_serialize!(RegexAccess);

/// Operator-level caps applied during validation.
#[derive(Debug, Clone, Copy)]
pub struct ValidationLimits {
    pub max_stream_expressions: usize,
    pub max_stream_expressions_total_characters: usize,
    pub max_keyword_filters: usize,
    pub regex_access: RegexAccess,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            max_stream_expressions: 50,
            max_stream_expressions_total_characters: 10_000,
            max_keyword_filters: 200,
            regex_access: RegexAccess::All,
        }
    }
}

#[derive(Debug)]
pub struct ConfigError {
    pub field: &'static str,
    pub message: String,
}

impl ConfigError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid user configuration ({}): {}", self.field, self.message)
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone)]
pub struct NamedRegex {
    pub name: String,
    pub regex: Regex,
}

#[derive(Debug, Clone)]
pub struct CompiledRanked {
    pub name: String,
    pub regex: Regex,
    pub score: i64,
}

/// Regexes and SEL expressions compiled once per configuration.
#[derive(Debug, Clone, Default)]
pub struct CompiledFilters {
    pub excluded_regexes: Vec<NamedRegex>,
    pub required_regexes: Vec<NamedRegex>,
    pub included_regexes: Vec<NamedRegex>,
    pub ranked_regexes: Vec<CompiledRanked>,
    pub preferred_regexes: Vec<NamedRegex>,

    pub excluded_expressions: Vec<StreamExpression>,
    pub required_expressions: Vec<StreamExpression>,
    pub included_expressions: Vec<StreamExpression>,
    pub ranked_expressions: Vec<(StreamExpression, i64)>,
    pub preferred_expressions: Vec<StreamExpression>,
}

/// A [`UserData`] that passed validation, with every pattern precompiled.
#[derive(Debug, Clone)]
pub struct ValidatedUserData {
    pub data: UserData,
    pub filters: CompiledFilters,
}

impl UserData {
    pub fn validate(self, limits: &ValidationLimits) -> Result<ValidatedUserData, ConfigError> {
        let keyword_count = self.excluded_keywords.len()
            + self.required_keywords.len()
            + self.included_keywords.len()
            + self.preferred_keywords.len();
        if keyword_count > limits.max_keyword_filters {
            return Err(ConfigError::new(
                "keywords",
                format!(
                    "{keyword_count} keyword filters exceed the cap of {}",
                    limits.max_keyword_filters
                ),
            ));
        }

        let regex_allowed = match limits.regex_access {
            RegexAccess::All => true,
            RegexAccess::Trusted => self.trusted,
            RegexAccess::None => false,
        };
        let has_regexes = !self.excluded_regexes.is_empty()
            || !self.required_regexes.is_empty()
            || !self.included_regexes.is_empty()
            || !self.ranked_regexes.is_empty()
            || !self.preferred_regexes.is_empty();
        if has_regexes && !regex_allowed {
            return Err(ConfigError::new(
                "regexes",
                "regex filters are not enabled for this configuration",
            ));
        }

        let expression_count = self.excluded_expressions.len()
            + self.required_expressions.len()
            + self.included_expressions.len()
            + self.ranked_expressions.len()
            + self.preferred_expressions.len();
        if expression_count > limits.max_stream_expressions {
            return Err(ConfigError::new(
                "streamExpressions",
                format!(
                    "{expression_count} expressions exceed the cap of {}",
                    limits.max_stream_expressions
                ),
            ));
        }
        let expression_chars: usize = self
            .excluded_expressions
            .iter()
            .chain(&self.required_expressions)
            .chain(&self.included_expressions)
            .chain(&self.preferred_expressions)
            .map(String::len)
            .chain(self.ranked_expressions.iter().map(|e| e.expression.len()))
            .sum();
        if expression_chars > limits.max_stream_expressions_total_characters {
            return Err(ConfigError::new(
                "streamExpressions",
                format!(
                    "{expression_chars} expression characters exceed the cap of {}",
                    limits.max_stream_expressions_total_characters
                ),
            ));
        }

        let mut service_ids: Vec<&str> = self.services.iter().map(|s| s.id.as_str()).collect();
        service_ids.sort_unstable();
        service_ids.dedup();
        if service_ids.len() != self.services.len() {
            return Err(ConfigError::new("services", "duplicate service ids"));
        }

        if let Some(proxy) = &self.proxy {
            if reqwest::Url::parse(&proxy.url).is_err() {
                return Err(ConfigError::new("proxy", "proxy url does not parse"));
            }
        }

        let filters = CompiledFilters {
            excluded_regexes: compile_all("excludedRegexes", &self.excluded_regexes)?,
            required_regexes: compile_all("requiredRegexes", &self.required_regexes)?,
            included_regexes: compile_all("includedRegexes", &self.included_regexes)?,
            ranked_regexes: self
                .ranked_regexes
                .iter()
                .map(|r| {
                    compile("rankedRegexes", &r.pattern).map(|regex| CompiledRanked {
                        name: r.name.clone(),
                        regex,
                        score: r.score,
                    })
                })
                .collect::<Result<_, _>>()?,
            preferred_regexes: compile_all("preferredRegexes", &self.preferred_regexes)?,
            excluded_expressions: parse_all("excludedExpressions", &self.excluded_expressions)?,
            required_expressions: parse_all("requiredExpressions", &self.required_expressions)?,
            included_expressions: parse_all("includedExpressions", &self.included_expressions)?,
            ranked_expressions: self
                .ranked_expressions
                .iter()
                .map(|r| {
                    StreamExpression::parse(&r.expression)
                        .map(|e| (e, r.score))
                        .map_err(|e| ConfigError::new("rankedExpressions", e.to_string()))
                })
                .collect::<Result<_, _>>()?,
            preferred_expressions: parse_all("preferredExpressions", &self.preferred_expressions)?,
        };

        Ok(ValidatedUserData {
            data: self,
            filters,
        })
    }
}

fn compile(field: &'static str, pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(pattern)
        .map_err(|e| ConfigError::new(field, format!("pattern {pattern:?} does not compile: {e}")))
}

fn compile_all(field: &'static str, patterns: &[String]) -> Result<Vec<NamedRegex>, ConfigError> {
    patterns
        .iter()
        .map(|p| {
            compile(field, p).map(|regex| NamedRegex {
                name: p.clone(),
                regex,
            })
        })
        .collect()
}

fn parse_all(
    field: &'static str,
    expressions: &[String],
) -> Result<Vec<StreamExpression>, ConfigError> {
    expressions
        .iter()
        .map(|e| {
            StreamExpression::parse(e).map_err(|err| ConfigError::new(field, err.to_string()))
        })
        .collect()
}

impl ValidatedUserData {
    /// Addons the title/season/episode match stage applies to.
    pub fn title_match_applies_to(&self, addon: &str) -> bool {
        self.data.title_match_addons.is_empty()
            || self
                .data
                .title_match_addons
                .iter()
                .any(|a| a.eq_ignore_ascii_case(addon))
    }
}
