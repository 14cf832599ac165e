use std::collections::{HashMap, HashSet};

use crate::stream::ParsedStream;
use crate::user_data::{LimitMode, ResultLimits};

use super::stage;

/// Drop duplicate streams: same info-hash, or same filename+size+service
/// when the hash is absent. The first occurrence wins, which after sorting
/// is the best-ranked one and before sorting is the first service in
/// user-declared order.
pub fn deduplicate(streams: Vec<ParsedStream>) -> (Vec<ParsedStream>, usize) {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(streams.len());
    let mut removed = 0usize;
    for stream in streams {
        if !stream.stream_type().is_playable() {
            out.push(stream);
            continue;
        }
        if seen.insert(stream.fingerprint()) {
            out.push(stream);
        } else {
            removed += 1;
        }
    }
    (out, removed)
}

fn cap(value: Option<u32>) -> Option<u32> {
    // zero caps count as disabled
    value.filter(|v| *v > 0)
}

fn category_values(stream: &ParsedStream) -> [String; 8] {
    let parsed = stream.parsed_file.as_ref();
    [
        "global".to_owned(),
        stream.indexer.clone().unwrap_or_default(),
        parsed
            .and_then(|p| p.release_group.clone())
            .unwrap_or_default(),
        parsed
            .and_then(|p| p.resolution.clone())
            .unwrap_or_default(),
        parsed.and_then(|p| p.quality.clone()).unwrap_or_default(),
        stream.addon.clone(),
        stream.stream_type().as_str().to_owned(),
        stream
            .service
            .as_ref()
            .map(|s| s.id.clone())
            .unwrap_or_default(),
    ]
}

fn enabled_caps(limits: &ResultLimits) -> [Option<u32>; 8] {
    [
        cap(limits.global),
        cap(limits.per_indexer),
        cap(limits.per_release_group),
        cap(limits.per_resolution),
        cap(limits.per_quality),
        cap(limits.per_addon),
        cap(limits.per_stream_type),
        cap(limits.per_service),
    ]
}

/// Cardinality caps per category. Streams tagged with the "limit"
/// passthrough are neither counted nor dropped.
pub fn apply_limits(streams: Vec<ParsedStream>, limits: &ResultLimits) -> (Vec<ParsedStream>, usize) {
    let caps = enabled_caps(limits);
    if caps.iter().all(Option::is_none) {
        return (streams, 0);
    }

    let mut out = Vec::with_capacity(streams.len());
    let mut removed = 0usize;

    match limits.mode {
        LimitMode::Independent => {
            // one counter map per category; any cap hit drops the stream
            let mut counters: [HashMap<String, u32>; 8] = Default::default();
            for stream in streams {
                if stream.has_passthrough(stage::LIMIT) || !stream.stream_type().is_playable() {
                    out.push(stream);
                    continue;
                }
                let values = category_values(&stream);
                let over =
                    caps.iter()
                        .zip(&values)
                        .zip(&counters)
                        .any(|((cap, value), counter)| {
                            cap.is_some_and(|cap| {
                                counter.get(value).copied().unwrap_or(0) >= cap
                            })
                        });
                if over {
                    removed += 1;
                    continue;
                }
                for (i, value) in values.iter().enumerate() {
                    if caps[i].is_some() {
                        *counters[i].entry(value.clone()).or_insert(0) += 1;
                    }
                }
                out.push(stream);
            }
        }
        LimitMode::Conjunctive => {
            // one counter keyed by the tuple of enabled category values,
            // capped at the min of enabled caps
            let min_cap = caps.iter().flatten().min().copied().unwrap_or(u32::MAX);
            let mut counter: HashMap<String, u32> = HashMap::new();
            for stream in streams {
                if stream.has_passthrough(stage::LIMIT) || !stream.stream_type().is_playable() {
                    out.push(stream);
                    continue;
                }
                let values = category_values(&stream);
                let key = caps
                    .iter()
                    .zip(&values)
                    .filter(|(cap, _)| cap.is_some())
                    .map(|(_, value)| value.as_str())
                    .collect::<Vec<_>>()
                    .join("|");
                let count = counter.entry(key).or_insert(0);
                if *count >= min_cap {
                    removed += 1;
                    continue;
                }
                *count += 1;
                out.push(stream);
            }
        }
    }
    (out, removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;
    use crate::stream::{ServiceInfo, StreamType};

    fn stream(name: &str, hash: Option<&str>, service: &str) -> ParsedStream {
        ParsedStream {
            stream_type: Some(StreamType::Debrid),
            filename: Some(name.to_owned()),
            parsed_file: Some(parser::parse(name)),
            info_hash: hash.map(str::to_owned),
            size: Some(1000),
            service: Some(ServiceInfo {
                id: service.to_owned(),
                cached: true,
                library: false,
            }),
            ..Default::default()
        }
    }

    #[test]
    fn dedup_by_hash_keeps_first() {
        let streams = vec![
            stream("a.mkv", Some("H1"), "rd"),
            stream("b.mkv", Some("h1"), "tb"),
            stream("c.mkv", Some("h2"), "rd"),
        ];
        let (kept, removed) = deduplicate(streams);
        assert_eq!(removed, 1);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].service.as_ref().unwrap().id, "rd");
    }

    #[test]
    fn dedup_fingerprint_includes_service_without_hash() {
        let streams = vec![
            stream("same.mkv", None, "rd"),
            stream("same.mkv", None, "tb"),
            stream("same.mkv", None, "rd"),
        ];
        let (kept, removed) = deduplicate(streams);
        // different services survive, the true duplicate does not
        assert_eq!(kept.len(), 2);
        assert_eq!(removed, 1);
    }

    #[test]
    fn independent_caps() {
        let limits = ResultLimits {
            per_resolution: Some(1),
            ..Default::default()
        };
        let streams = vec![
            stream("a.1080p.mkv", Some("h1"), "rd"),
            stream("b.1080p.mkv", Some("h2"), "rd"),
            stream("c.720p.mkv", Some("h3"), "rd"),
        ];
        let (kept, removed) = apply_limits(streams, &limits);
        assert_eq!(removed, 1);
        let names: Vec<&str> = kept.iter().map(|s| s.filename.as_deref().unwrap()).collect();
        assert_eq!(names, vec!["a.1080p.mkv", "c.720p.mkv"]);
    }

    #[test]
    fn zero_cap_is_disabled() {
        let limits = ResultLimits {
            global: Some(0),
            per_resolution: Some(0),
            ..Default::default()
        };
        let streams = vec![
            stream("a.1080p.mkv", Some("h1"), "rd"),
            stream("b.1080p.mkv", Some("h2"), "rd"),
        ];
        let (kept, removed) = apply_limits(streams, &limits);
        assert_eq!(removed, 0);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn conjunctive_mode_uses_min_cap_and_tuple_key() {
        let limits = ResultLimits {
            per_resolution: Some(2),
            per_service: Some(1),
            mode: LimitMode::Conjunctive,
            ..Default::default()
        };
        let streams = vec![
            stream("a.1080p.mkv", Some("h1"), "rd"),
            stream("b.1080p.mkv", Some("h2"), "rd"),
            stream("c.1080p.mkv", Some("h3"), "tb"),
        ];
        let (kept, removed) = apply_limits(streams, &limits);
        // min(2, 1) = 1 per (resolution, service) tuple
        assert_eq!(removed, 1);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn limit_passthrough_not_counted_not_dropped() {
        let limits = ResultLimits {
            global: Some(1),
            ..Default::default()
        };
        let mut exempt = stream("exempt.1080p.mkv", Some("h1"), "rd");
        exempt.passthrough.insert(stage::LIMIT.to_owned());
        let streams = vec![
            exempt,
            stream("a.1080p.mkv", Some("h2"), "rd"),
            stream("b.1080p.mkv", Some("h3"), "rd"),
        ];
        let (kept, removed) = apply_limits(streams, &limits);
        assert_eq!(removed, 1);
        let names: Vec<&str> = kept.iter().map(|s| s.filename.as_deref().unwrap()).collect();
        assert_eq!(names, vec!["exempt.1080p.mkv", "a.1080p.mkv"]);
    }
}
