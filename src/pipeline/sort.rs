use std::cmp::Ordering;

use crate::stream::{ParsedStream, PinDirective};
use crate::user_data::{CompiledFilters, SortCriterion, SortDirection, SortKey};

use super::filters::KeywordSets;

/// Apply ranked regexes/SEL and preferred tagging so the sorter has scores
/// to work with. Reordering only happens in [`sort_streams`].
pub fn precompute(streams: &mut [ParsedStream], filters: &CompiledFilters, keywords: &KeywordSets) {
    for stream in streams.iter_mut() {
        for ranked in &filters.ranked_regexes {
            if stream.regex_targets().any(|t| ranked.regex.is_match(t)) {
                stream.regex_score += ranked.score;
                stream.ranked_regexes_matched.push(ranked.name.clone());
            }
        }
        for (expression, score) in &filters.ranked_expressions {
            if expression.matches(stream) {
                stream.stream_expression_score += *score;
                if let Some(pin) = expression.pin {
                    stream.pinned = Some(pin);
                }
            }
        }

        // preferred lists are priority-ordered: the first match is the tag,
        // later matches are irrelevant
        let mut rank = 0usize;
        let mut tag_rank: Option<usize> = None;
        for named in &filters.preferred_regexes {
            if tag_rank.is_none() && stream.regex_targets().any(|t| named.regex.is_match(t)) {
                stream.regex_matched = Some(named.name.clone());
                tag_rank = Some(rank);
            }
            rank += 1;
        }
        for (word, regex) in &keywords.preferred {
            if tag_rank.is_none() && stream.regex_targets().any(|t| regex.is_match(t)) {
                stream.keyword_matched = Some(word.clone());
                tag_rank = Some(rank);
            }
            rank += 1;
        }
        for expression in &filters.preferred_expressions {
            if tag_rank.is_none() && expression.matches(stream) {
                stream.stream_expression_matched = Some(expression.source.clone());
                tag_rank = Some(rank);
                if let Some(pin) = expression.pin {
                    stream.pinned = Some(pin);
                }
            }
            rank += 1;
        }
        stream.preferred_rank = tag_rank;
    }
}

const RESOLUTION_ORDER: &[&str] = &["2160p", "1440p", "1080p", "720p", "576p", "480p"];
const QUALITY_ORDER: &[&str] = &[
    "BluRay REMUX",
    "BluRay",
    "WEB-DL",
    "WEBRip",
    "BRRip",
    "HDRip",
    "HDTV",
    "DVDRip",
    "SCR",
    "TeleSync",
    "CAM",
];

fn rank_in(order: &[&str], value: Option<&str>) -> usize {
    value
        .and_then(|v| order.iter().position(|o| o.eq_ignore_ascii_case(v)))
        .unwrap_or(order.len())
}

fn total_score(stream: &ParsedStream) -> i64 {
    stream.regex_score + stream.stream_expression_score
}

fn compare_by(a: &ParsedStream, b: &ParsedStream, key: SortKey) -> Ordering {
    let parsed = |s: &ParsedStream| s.parsed_file.clone().unwrap_or_default();
    // base ordering: Greater when `a` carries the bigger/better value, so
    // the Desc direction puts the better stream first
    match key {
        SortKey::Resolution => rank_in(RESOLUTION_ORDER, parsed(b).resolution.as_deref())
            .cmp(&rank_in(RESOLUTION_ORDER, parsed(a).resolution.as_deref())),
        SortKey::Quality => rank_in(QUALITY_ORDER, parsed(b).quality.as_deref())
            .cmp(&rank_in(QUALITY_ORDER, parsed(a).quality.as_deref())),
        SortKey::Size => a
            .effective_size()
            .unwrap_or(0)
            .cmp(&b.effective_size().unwrap_or(0)),
        SortKey::Seeders => a.seeders.unwrap_or(0).cmp(&b.seeders.unwrap_or(0)),
        SortKey::Cached => {
            let cached = |s: &ParsedStream| s.service.as_ref().is_some_and(|x| x.cached);
            cached(a).cmp(&cached(b))
        }
        SortKey::Library => {
            let library = |s: &ParsedStream| s.service.as_ref().is_some_and(|x| x.library);
            library(a).cmp(&library(b))
        }
        SortKey::Service => {
            let id = |s: &ParsedStream| {
                s.service
                    .as_ref()
                    .map(|x| x.id.clone())
                    .unwrap_or_default()
            };
            id(a).cmp(&id(b))
        }
        SortKey::Addon => a.addon.cmp(&b.addon),
        SortKey::Age => b.age_hours.unwrap_or(u32::MAX).cmp(&a.age_hours.unwrap_or(u32::MAX)),
        SortKey::Bitrate => a.bitrate_kbps.unwrap_or(0).cmp(&b.bitrate_kbps.unwrap_or(0)),
        SortKey::Score => total_score(a).cmp(&total_score(b)),
        SortKey::Language => {
            let rank = |s: &ParsedStream| s.preferred_rank.unwrap_or(usize::MAX);
            rank(b).cmp(&rank(a))
        }
    }
}

/// Stable sort by the user's criteria tuple, ties broken by score. Pinned
/// streams are partitioned afterwards: stable, so equal-keyed streams keep
/// their pre-sort relative order.
pub fn sort_streams(streams: &mut Vec<ParsedStream>, criteria: &[SortCriterion]) {
    streams.sort_by(|a, b| {
        for criterion in criteria {
            let ordering = compare_by(a, b, criterion.key);
            let ordering = match criterion.direction {
                // descending wants the larger value first
                SortDirection::Desc => ordering.reverse(),
                SortDirection::Asc => ordering,
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        total_score(b).cmp(&total_score(a))
    });

    // pinned partitions; inner order untouched
    let mut top = Vec::new();
    let mut middle = Vec::new();
    let mut bottom = Vec::new();
    for stream in streams.drain(..) {
        match stream.pinned {
            Some(PinDirective::Top) => top.push(stream),
            Some(PinDirective::Bottom) => bottom.push(stream),
            None => middle.push(stream),
        }
    }
    streams.extend(top);
    streams.extend(middle);
    streams.extend(bottom);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;
    use crate::pipeline::sel::StreamExpression;
    use crate::stream::ServiceInfo;
    use crate::user_data::{RankedRegex, UserData, ValidationLimits};

    fn stream(name: &str, size: u64, cached: bool) -> ParsedStream {
        ParsedStream {
            filename: Some(name.to_owned()),
            parsed_file: Some(parser::parse(name)),
            size: Some(size),
            service: Some(ServiceInfo {
                id: "rd".into(),
                cached,
                library: false,
            }),
            ..Default::default()
        }
    }

    fn criteria(pairs: &[(SortKey, SortDirection)]) -> Vec<SortCriterion> {
        pairs
            .iter()
            .map(|&(key, direction)| SortCriterion { key, direction })
            .collect()
    }

    #[test]
    fn resolution_then_size() {
        let mut streams = vec![
            stream("A.720p.mkv", 4_000, true),
            stream("B.2160p.mkv", 1_000, true),
            stream("C.1080p.mkv", 3_000, true),
            stream("D.1080p.mkv", 9_000, true),
        ];
        sort_streams(
            &mut streams,
            &criteria(&[
                (SortKey::Resolution, SortDirection::Desc),
                (SortKey::Size, SortDirection::Desc),
            ]),
        );
        let names: Vec<&str> = streams.iter().map(|s| s.filename.as_deref().unwrap()).collect();
        assert_eq!(names, vec!["B.2160p.mkv", "D.1080p.mkv", "C.1080p.mkv", "A.720p.mkv"]);
    }

    #[test]
    fn cached_first_then_resolution() {
        let mut streams = vec![
            stream("A.2160p.mkv", 1, false),
            stream("B.1080p.mkv", 1, true),
        ];
        sort_streams(
            &mut streams,
            &criteria(&[
                (SortKey::Cached, SortDirection::Desc),
                (SortKey::Resolution, SortDirection::Desc),
            ]),
        );
        assert_eq!(streams[0].filename.as_deref(), Some("B.1080p.mkv"));
    }

    #[test]
    fn stable_for_equal_keys() {
        let mut streams = vec![
            stream("first.1080p.mkv", 5, true),
            stream("second.1080p.mkv", 5, true),
        ];
        sort_streams(&mut streams, &criteria(&[(SortKey::Resolution, SortDirection::Desc)]));
        assert_eq!(streams[0].filename.as_deref(), Some("first.1080p.mkv"));
    }

    #[test]
    fn ranked_regex_scores_accumulate() {
        let user = UserData {
            ranked_regexes: vec![
                RankedRegex {
                    name: "remux".into(),
                    pattern: r"(?i)\bremux\b".into(),
                    score: 100,
                },
                RankedRegex {
                    name: "grp".into(),
                    pattern: "GRP".into(),
                    score: 10,
                },
            ],
            ..Default::default()
        };
        let validated = user.validate(&ValidationLimits::default()).unwrap();
        let keywords = KeywordSets::build(&validated.data);
        let mut streams = vec![stream("Movie.2024.REMUX.x264-GRP.mkv", 1, true)];
        precompute(&mut streams, &validated.filters, &keywords);
        assert_eq!(streams[0].regex_score, 110);
        assert_eq!(streams[0].ranked_regexes_matched, vec!["remux", "grp"]);
    }

    #[test]
    fn preferred_takes_highest_priority_only() {
        let user = UserData {
            preferred_regexes: vec!["FLUX".into(), "GRP".into()],
            ..Default::default()
        };
        let validated = user.validate(&ValidationLimits::default()).unwrap();
        let keywords = KeywordSets::build(&validated.data);
        // matches both; only the first (highest priority) tags
        let mut streams = vec![stream("Movie.FLUX.GRP.mkv", 1, true)];
        precompute(&mut streams, &validated.filters, &keywords);
        assert_eq!(streams[0].regex_matched.as_deref(), Some("FLUX"));
        assert_eq!(streams[0].preferred_rank, Some(0));
    }

    #[test]
    fn pins_partition_after_sort() {
        let mut streams = vec![
            stream("A.2160p.mkv", 1, true),
            stream("B.1080p.mkv", 1, true),
            stream("C.720p.mkv", 1, true),
        ];
        streams[2].pinned = Some(PinDirective::Top);
        streams[0].pinned = Some(PinDirective::Bottom);
        sort_streams(&mut streams, &criteria(&[(SortKey::Resolution, SortDirection::Desc)]));
        let names: Vec<&str> = streams.iter().map(|s| s.filename.as_deref().unwrap()).collect();
        assert_eq!(names, vec!["C.720p.mkv", "B.1080p.mkv", "A.2160p.mkv"]);
    }

    #[test]
    fn ranked_expression_pin_flows_to_stream() {
        let expression = StreamExpression::parse("cached() => pin(top)").unwrap();
        let filters = CompiledFilters {
            ranked_expressions: vec![(expression, 5)],
            ..Default::default()
        };
        let keywords = KeywordSets::default();
        let mut streams = vec![stream("A.1080p.mkv", 1, true)];
        precompute(&mut streams, &filters, &keywords);
        assert_eq!(streams[0].pinned, Some(PinDirective::Top));
        assert_eq!(streams[0].stream_expression_score, 5);
    }
}
