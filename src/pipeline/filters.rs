use regex::Regex;

use crate::content_id::MediaType;
use crate::matcher;
use crate::metadata::TitleMetadata;
use crate::stream::ParsedStream;
use crate::user_data::{CompiledFilters, EnumFilter, NumRange, UserData, ValidatedUserData};

pub const UNKNOWN: &str = "Unknown";

/// Case-insensitive whole-word union over a keyword list.
fn keyword_union(words: &[String]) -> Option<Regex> {
    if words.is_empty() {
        return None;
    }
    let escaped: Vec<String> = words.iter().map(|w| regex::escape(w)).collect();
    let pattern = format!(r"(?i)\b(?:{})\b", escaped.join("|"));
    // escaped alternation of plain words always compiles
    Some(Regex::new(&pattern).expect("keyword union to compile"))
}

#[derive(Debug, Default)]
pub struct KeywordSets {
    pub excluded: Option<Regex>,
    pub required: Option<Regex>,
    pub included: Option<Regex>,
    pub preferred: Vec<(String, Regex)>,
}

impl KeywordSets {
    pub fn build(user: &UserData) -> Self {
        Self {
            excluded: keyword_union(&user.excluded_keywords),
            required: keyword_union(&user.required_keywords),
            included: keyword_union(&user.included_keywords),
            preferred: user
                .preferred_keywords
                .iter()
                .filter_map(|w| {
                    keyword_union(std::slice::from_ref(w)).map(|r| (w.clone(), r))
                })
                .collect(),
        }
    }
}

fn single(value: Option<&str>) -> Vec<String> {
    vec![value.unwrap_or(UNKNOWN).to_owned()]
}

fn many(values: &[String]) -> Vec<String> {
    if values.is_empty() {
        vec![UNKNOWN.to_owned()]
    } else {
        values.to_vec()
    }
}

/// Enumerable attributes of one stream, absent fields bucketed as `Unknown`.
fn enumerated_attributes(stream: &ParsedStream) -> Vec<(&'static str, Vec<String>)> {
    let parsed = stream.parsed_file.as_ref();
    let languages: Vec<String> = stream.languages.iter().cloned().collect();
    vec![
        (
            "resolution",
            single(parsed.and_then(|p| p.resolution.as_deref())),
        ),
        ("quality", single(parsed.and_then(|p| p.quality.as_deref()))),
        ("encode", single(parsed.and_then(|p| p.encode.as_deref()))),
        (
            "visual tag",
            many(parsed.map(|p| p.visual_tags.as_slice()).unwrap_or_default()),
        ),
        (
            "audio tag",
            many(parsed.map(|p| p.audio_tags.as_slice()).unwrap_or_default()),
        ),
        (
            "audio channels",
            many(parsed.map(|p| p.audio_channels.as_slice()).unwrap_or_default()),
        ),
        ("language", many(&languages)),
        ("stream type", vec![stream.stream_type().as_str().to_owned()]),
        (
            "release group",
            single(parsed.and_then(|p| p.release_group.as_deref())),
        ),
    ]
}

fn filter_for<'a>(user: &'a UserData, attr: &str) -> &'a EnumFilter {
    match attr {
        "resolution" => &user.resolutions,
        "quality" => &user.qualities,
        "encode" => &user.encodes,
        "visual tag" => &user.visual_tags,
        "audio tag" => &user.audio_tags,
        "audio channels" => &user.audio_channels,
        "language" => &user.languages,
        "stream type" => &user.stream_types,
        _ => &user.release_groups,
    }
}

fn contains_ci(list: &[String], value: &str) -> bool {
    list.iter().any(|v| v.eq_ignore_ascii_case(value))
}

/// Stage 2 accelerator: any included enumeration value keeps the stream
/// unconditionally.
pub fn enumeration_included(stream: &ParsedStream, user: &UserData) -> bool {
    enumerated_attributes(stream).iter().any(|(attr, values)| {
        let filter = filter_for(user, attr);
        values.iter().any(|v| contains_ci(&filter.included, v))
    })
}

/// Stage 3: excluded / required enumerations.
pub fn enumeration_removal(stream: &ParsedStream, user: &UserData) -> Option<String> {
    for (attr, values) in enumerated_attributes(stream) {
        let filter = filter_for(user, attr);
        if let Some(hit) = values.iter().find(|v| contains_ci(&filter.excluded, v)) {
            return Some(format!("excluded {attr}: {hit}"));
        }
        if !filter.required.is_empty() && !values.iter().any(|v| contains_ci(&filter.required, v))
        {
            return Some(format!("required {attr} missing"));
        }
    }
    None
}

/// Stage 4: excluded / required regexes over filename, folder, release
/// group and indexer.
pub fn regex_removal(stream: &ParsedStream, filters: &CompiledFilters) -> Option<String> {
    for named in &filters.excluded_regexes {
        if stream.regex_targets().any(|t| named.regex.is_match(t)) {
            return Some(format!("excluded regex: {}", named.name));
        }
    }
    if !filters.required_regexes.is_empty()
        && !filters
            .required_regexes
            .iter()
            .any(|named| stream.regex_targets().any(|t| named.regex.is_match(t)))
    {
        return Some("required regex missing".to_owned());
    }
    None
}

/// Included-regex accelerator; reports the matching pattern name.
pub fn regex_included(stream: &ParsedStream, filters: &CompiledFilters) -> Option<String> {
    filters
        .included_regexes
        .iter()
        .find(|named| stream.regex_targets().any(|t| named.regex.is_match(t)))
        .map(|named| named.name.clone())
}

/// Stage 5: keyword filters, same semantics as regexes.
pub fn keyword_removal(stream: &ParsedStream, sets: &KeywordSets) -> Option<String> {
    if let Some(excluded) = &sets.excluded {
        if stream.regex_targets().any(|t| excluded.is_match(t)) {
            return Some("excluded keyword".to_owned());
        }
    }
    if let Some(required) = &sets.required {
        if !stream.regex_targets().any(|t| required.is_match(t)) {
            return Some("required keyword missing".to_owned());
        }
    }
    None
}

pub fn keyword_included(stream: &ParsedStream, sets: &KeywordSets) -> bool {
    sets.included
        .as_ref()
        .is_some_and(|included| stream.regex_targets().any(|t| included.is_match(t)))
}

/// Stage 6: cache / uncache / season-pack gates.
pub fn gate_removal(stream: &ParsedStream, user: &UserData) -> Option<String> {
    let service_id = stream.service.as_ref().map(|s| s.id.as_str());
    let in_scope = |gate: &crate::user_data::ScopedGate| {
        gate.enabled && gate.in_scope(&stream.addon, service_id, stream.stream_type())
    };

    let cached = stream.service.as_ref().is_some_and(|s| s.cached);
    if in_scope(&user.excluded_uncached) && stream.service.is_some() && !cached {
        return Some("uncached".to_owned());
    }
    if in_scope(&user.excluded_cached) && cached {
        return Some("cached".to_owned());
    }
    if in_scope(&user.excluded_season_packs)
        && stream
            .parsed_file
            .as_ref()
            .is_some_and(|p| p.is_season_pack())
    {
        return Some("season pack".to_owned());
    }
    None
}

fn stream_category(stream: &ParsedStream) -> &'static str {
    match &stream.service {
        None => "p2p",
        Some(s) if s.cached => "cached",
        Some(_) => "uncached",
    }
}

/// Stage 7: seeder and age ranges, applied only to in-scope categories.
pub fn range_removal(stream: &ParsedStream, user: &UserData) -> Option<String> {
    let category = stream_category(stream);
    let in_scope = |categories: &[String]| {
        categories.is_empty()
            || categories.iter().any(|c| {
                c.eq_ignore_ascii_case(category)
                    || c.eq_ignore_ascii_case(stream.stream_type().as_str())
            })
    };

    if let Some(scoped) = &user.seeder_range {
        if !scoped.range.is_open() && in_scope(&scoped.categories) {
            if let Some(seeders) = stream.seeders {
                if !scoped.range.contains(seeders as u64) {
                    return Some(format!("seeders out of range ({seeders})"));
                }
            }
        }
    }
    if let Some(scoped) = &user.age_range {
        if !scoped.range.is_open() && in_scope(&scoped.categories) {
            if let Some(age) = stream.age_hours {
                if !scoped.range.contains(age as u64) {
                    return Some(format!("age out of range ({age}h)"));
                }
            }
        }
    }
    None
}

/// Range accelerators: a stream inside one of the dedicated included ranges
/// keeps unconditionally.
pub fn range_included(stream: &ParsedStream, user: &UserData) -> bool {
    let by_seeders = user
        .included_seeder_range
        .filter(|r| !r.is_open())
        .is_some_and(|range| {
            stream
                .seeders
                .is_some_and(|s| range.contains(s as u64))
        });
    let by_size = user
        .included_size_range
        .filter(|r| !r.is_open())
        .is_some_and(|range| {
            stream
                .effective_size()
                .is_some_and(|s| range.contains(s))
        });
    by_seeders || by_size
}

/// Stage 8: year, season-episode and title match.
pub fn match_removal(
    stream: &ParsedStream,
    user: &ValidatedUserData,
    media: MediaType,
    metadata: Option<&TitleMetadata>,
    season: Option<u16>,
    episode: Option<u16>,
) -> Option<String> {
    let Some(meta) = metadata else {
        return None;
    };
    if !user.title_match_applies_to(&stream.addon) {
        return None;
    }
    let Some(parsed) = stream.parsed_file.as_ref() else {
        return None;
    };

    if let Some(meta_year) = meta.year {
        match parsed.year {
            Some(year) => {
                let end = meta.year_end.unwrap_or(meta_year);
                if year + 1 < meta_year || year > end + 1 {
                    return Some(format!("wrong year ({year})"));
                }
            }
            None => {
                if user.data.strict_year_matching && media == MediaType::Movie {
                    return Some("year missing in strict mode".to_owned());
                }
            }
        }
    }

    if matcher::is_season_wrong(parsed, season, meta) {
        return Some("wrong season".to_owned());
    }
    if matcher::is_episode_wrong(parsed, episode, meta) {
        return Some("wrong episode".to_owned());
    }
    if user.data.apply_title_match {
        let filename = stream.filename.as_deref().unwrap_or_default();
        if matcher::is_title_wrong(parsed, filename, meta) {
            return Some("wrong title".to_owned());
        }
    }
    None
}

/// Stage 9: size and bitrate ranges with resolution-then-type-then-global
/// precedence.
pub fn size_removal(stream: &ParsedStream, user: &UserData, media: MediaType) -> Option<String> {
    let resolution = stream
        .parsed_file
        .as_ref()
        .and_then(|p| p.resolution.as_deref());

    let check = |ranges: &crate::user_data::SizeRanges,
                 value: Option<u64>,
                 what: &str|
     -> Option<String> {
        let range: NumRange = ranges.select(resolution, media)?;
        if range.is_open() {
            return None;
        }
        let value = value?;
        if !range.contains(value) {
            return Some(format!("{what} out of range ({value})"));
        }
        None
    };

    if let Some(reason) = check(&user.size_ranges, stream.effective_size(), "size") {
        return Some(reason);
    }
    if let Some(reason) = check(&user.bitrate_ranges, stream.bitrate_kbps, "bitrate") {
        return Some(reason);
    }
    None
}

/// Stage 10: SEL excluded / required. Included expressions accelerate.
pub fn expression_removal(stream: &ParsedStream, filters: &CompiledFilters) -> Option<String> {
    for expression in &filters.excluded_expressions {
        if expression.matches(stream) {
            return Some(format!("excluded expression: {}", expression.source));
        }
    }
    if !filters.required_expressions.is_empty()
        && !filters
            .required_expressions
            .iter()
            .any(|e| e.matches(stream))
    {
        return Some("required expression missing".to_owned());
    }
    None
}

pub fn expression_included(stream: &ParsedStream, filters: &CompiledFilters) -> Option<String> {
    filters
        .included_expressions
        .iter()
        .find(|e| e.matches(stream))
        .map(|e| e.source.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;
    use crate::stream::{ServiceInfo, StreamType};

    fn stream(name: &str) -> ParsedStream {
        let parsed = parser::parse(name);
        ParsedStream {
            addon: "indexarr".into(),
            stream_type: Some(StreamType::Debrid),
            filename: Some(name.to_owned()),
            languages: parsed.languages.iter().cloned().collect(),
            parsed_file: Some(parsed),
            service: Some(ServiceInfo {
                id: "rd".into(),
                cached: true,
                library: false,
            }),
            ..Default::default()
        }
    }

    #[test]
    fn excluded_resolution_removes() {
        let user = UserData {
            resolutions: EnumFilter {
                excluded: vec!["480p".into()],
                ..Default::default()
            },
            ..Default::default()
        };
        let reason = enumeration_removal(&stream("Show.S01E01.480p.WEB"), &user);
        assert!(reason.unwrap().contains("excluded resolution"));
        assert!(enumeration_removal(&stream("Show.S01E01.1080p.WEB"), &user).is_none());
    }

    #[test]
    fn unknown_bucket() {
        let user = UserData {
            resolutions: EnumFilter {
                excluded: vec![UNKNOWN.into()],
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(enumeration_removal(&stream("Show.S01E01"), &user).is_some());
    }

    #[test]
    fn required_language_removes_mismatch() {
        let user = UserData {
            languages: EnumFilter {
                required: vec!["English".into()],
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(enumeration_removal(&stream("Show.S01E01.VOSTFR.1080p"), &user).is_some());
        assert!(enumeration_removal(&stream("Show.S01E01.ENG.1080p"), &user).is_none());
    }

    #[test]
    fn keyword_whole_word() {
        let sets = KeywordSets::build(&UserData {
            excluded_keywords: vec!["cam".into()],
            ..Default::default()
        });
        assert!(keyword_removal(&stream("Movie.2024.CAM.x264"), &sets).is_some());
        // "cam" must not match inside "camera"
        assert!(keyword_removal(&stream("Camera.Obscura.2024.1080p"), &sets).is_none());
    }

    #[test]
    fn included_keyword_accelerates() {
        let sets = KeywordSets::build(&UserData {
            included_keywords: vec!["remux".into()],
            ..Default::default()
        });
        assert!(keyword_included(&stream("Movie.2024.480p.REMUX"), &sets));
        assert!(!keyword_included(&stream("Movie.2024.480p"), &sets));
    }

    #[test]
    fn uncached_gate_scoping() {
        let user = UserData {
            excluded_uncached: crate::user_data::ScopedGate {
                enabled: true,
                services: vec!["rd".into()],
                ..Default::default()
            },
            ..Default::default()
        };
        let mut s = stream("Show.S01E01.1080p");
        assert!(gate_removal(&s, &user).is_none());
        s.service.as_mut().unwrap().cached = false;
        assert!(gate_removal(&s, &user).is_some());
        // out of scope service keeps
        s.service.as_mut().unwrap().id = "tb".into();
        assert!(gate_removal(&s, &user).is_none());
    }

    #[test]
    fn seeder_range_only_in_scope() {
        let user = UserData {
            seeder_range: Some(crate::user_data::ScopedRange {
                range: NumRange {
                    min: Some(5),
                    max: None,
                },
                categories: vec!["p2p".into()],
            }),
            ..Default::default()
        };
        let mut s = stream("Show.S01E01.1080p");
        s.seeders = Some(1);
        // cached debrid stream: p2p-scoped range does not apply
        assert!(range_removal(&s, &user).is_none());
        s.service = None;
        assert!(range_removal(&s, &user).is_some());
    }

    #[test]
    fn size_precedence_picks_resolution_range() {
        let user = UserData {
            size_ranges: crate::user_data::SizeRanges {
                global: Some(NumRange {
                    min: None,
                    max: Some(10),
                }),
                per_resolution: [(
                    "1080p".to_owned(),
                    NumRange {
                        min: None,
                        max: Some(100),
                    },
                )]
                .into_iter()
                .collect(),
                ..Default::default()
            },
            ..Default::default()
        };
        let mut s = stream("Show.S01E01.1080p");
        s.size = Some(50);
        assert!(size_removal(&s, &user, MediaType::Series).is_none());
        let mut s = stream("Show.S01E01.720p");
        s.size = Some(50);
        assert!(size_removal(&s, &user, MediaType::Series).is_some());
    }
}
