use std::collections::BTreeMap;

use time::Date;

use crate::content_id::MediaType;
use crate::metadata::TitleMetadata;
use crate::stream::ParsedStream;
use crate::user_data::ValidatedUserData;

pub mod dedup;
pub mod digital_release;
pub mod filters;
pub mod sel;
pub mod sort;

/// Stage names; a stream carrying one as a passthrough tag bypasses that
/// stage only.
pub mod stage {
    pub const DIGITAL_RELEASE: &str = "digitalRelease";
    pub const ENUMERATIONS: &str = "enumerations";
    pub const REGEX: &str = "regex";
    pub const KEYWORD: &str = "keyword";
    pub const GATES: &str = "gates";
    pub const RANGES: &str = "ranges";
    pub const MATCH: &str = "match";
    pub const SIZE: &str = "size";
    pub const EXPRESSIONS: &str = "expressions";
    pub const LIMIT: &str = "limit";
}

#[derive(Debug, Clone)]
pub struct PipelineContext<'a> {
    pub user: &'a ValidatedUserData,
    pub media: MediaType,
    pub metadata: Option<&'a TitleMetadata>,
    pub season: Option<u16>,
    pub episode: Option<u16>,
    pub release_facts: Option<digital_release::ReleaseFacts>,
    pub today: Date,
}

/// Per-stage removal and inclusion counters, keyed by human reason.
#[derive(Debug, Default, Clone)]
pub struct RemovalStats {
    pub removed: BTreeMap<String, usize>,
    pub included: usize,
    pub input: usize,
    pub output: usize,
}

impl RemovalStats {
    fn note(&mut self, reason: impl Into<String>) {
        *self.removed.entry(reason.into()).or_insert(0) += 1;
    }

    /// Compact per-reason summary lines for the diagnostics pseudo-streams.
    pub fn summary_lines(&self) -> Vec<String> {
        self.removed
            .iter()
            .map(|(reason, count)| format!("removed {count} streams: {reason}"))
            .collect()
    }
}

/// Run filter stages 1-10 over the stream set.
///
/// Monotone: the stream count never grows. Streams matching any explicit
/// "included" filter short-circuit to keep; per-stream passthrough tags
/// bypass single stages.
pub fn run_filters(
    streams: Vec<ParsedStream>,
    ctx: &PipelineContext<'_>,
) -> (Vec<ParsedStream>, RemovalStats) {
    let mut stats = RemovalStats {
        input: streams.len(),
        ..Default::default()
    };
    let user = &ctx.user.data;
    let filters = &ctx.user.filters;
    let keywords = filters::KeywordSets::build(user);

    // the gate decision is request-level, shared by every stream
    let gate_decision = if user.digital_release_gate.enabled {
        ctx.release_facts.as_ref().map(|facts| {
            digital_release::evaluate(
                ctx.media,
                ctx.today,
                user.digital_release_gate.tolerance_days,
                facts,
            )
        })
    } else {
        None
    };

    type StageCheck<'x> = (
        &'static str,
        Box<dyn Fn(&ParsedStream) -> Option<String> + 'x>,
    );
    let checks: Vec<StageCheck<'_>> = vec![
        (
            stage::ENUMERATIONS,
            Box::new(|s: &ParsedStream| filters::enumeration_removal(s, user)),
        ),
        (
            stage::REGEX,
            Box::new(|s: &ParsedStream| filters::regex_removal(s, filters)),
        ),
        (
            stage::KEYWORD,
            Box::new(|s: &ParsedStream| filters::keyword_removal(s, &keywords)),
        ),
        (
            stage::GATES,
            Box::new(|s: &ParsedStream| filters::gate_removal(s, user)),
        ),
        (
            stage::RANGES,
            Box::new(|s: &ParsedStream| filters::range_removal(s, user)),
        ),
        (
            stage::MATCH,
            Box::new(|s: &ParsedStream| {
                filters::match_removal(s, ctx.user, ctx.media, ctx.metadata, ctx.season, ctx.episode)
            }),
        ),
        (
            stage::SIZE,
            Box::new(|s: &ParsedStream| filters::size_removal(s, user, ctx.media)),
        ),
        (
            stage::EXPRESSIONS,
            Box::new(|s: &ParsedStream| filters::expression_removal(s, filters)),
        ),
    ];

    let mut kept = Vec::with_capacity(streams.len());
    'streams: for mut stream in streams {
        if !stream.stream_type().is_playable() {
            kept.push(stream);
            continue;
        }

        // 1. digital-release gate
        if let Some(decision) = &gate_decision {
            if !decision.allow && !stream.has_passthrough(stage::DIGITAL_RELEASE) {
                stats.note(format!("digital release: {}", decision.reason));
                continue;
            }
        }

        // 2. explicit "included" accelerators win over every deny rule
        let mut included = false;
        if filters::enumeration_included(&stream, user) {
            included = true;
        }
        if !included {
            if filters::keyword_included(&stream, &keywords) {
                stream.keyword_matched = Some("included".to_owned());
                included = true;
            }
        }
        if !included {
            if let Some(name) = filters::regex_included(&stream, filters) {
                stream.regex_matched = Some(name);
                included = true;
            }
        }
        if !included {
            if let Some(source) = filters::expression_included(&stream, filters) {
                stream.stream_expression_matched = Some(source);
                included = true;
            }
        }
        if !included && filters::range_included(&stream, user) {
            included = true;
        }
        if included {
            stats.included += 1;
            kept.push(stream);
            continue;
        }

        // 3-10. deny stages in order
        for (name, check) in &checks {
            if stream.has_passthrough(name) {
                continue;
            }
            if let Some(reason) = check(&stream) {
                stats.note(reason);
                continue 'streams;
            }
        }
        kept.push(stream);
    }

    stats.output = kept.len();
    (kept, stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;
    use crate::stream::{ServiceInfo, StreamType};
    use crate::user_data::{EnumFilter, UserData, ValidationLimits};
    use time::macros::date;

    fn stream(name: &str) -> ParsedStream {
        let parsed = parser::parse(name);
        ParsedStream {
            addon: "indexarr".into(),
            stream_type: Some(StreamType::Debrid),
            filename: Some(name.to_owned()),
            languages: parsed.languages.iter().cloned().collect(),
            parsed_file: Some(parsed),
            size: Some(2_000_000_000),
            service: Some(ServiceInfo {
                id: "rd".into(),
                cached: true,
                library: false,
            }),
            ..Default::default()
        }
    }

    fn ctx(user: &ValidatedUserData) -> PipelineContext<'_> {
        PipelineContext {
            user,
            media: MediaType::Movie,
            metadata: None,
            season: None,
            episode: None,
            release_facts: None,
            today: date!(2024 - 06 - 15),
        }
    }

    fn validated(user: UserData) -> ValidatedUserData {
        user.validate(&ValidationLimits::default()).unwrap()
    }

    #[test]
    fn included_accelerator_beats_excluded_enumeration() {
        // excludedResolutions=[480p], requiredLanguages=[English],
        // includedKeywords=[REMUX]: a 480p remux without language tags keeps
        let user = validated(UserData {
            resolutions: EnumFilter {
                excluded: vec!["480p".into()],
                ..Default::default()
            },
            languages: EnumFilter {
                required: vec!["English".into()],
                ..Default::default()
            },
            included_keywords: vec!["REMUX".into()],
            ..Default::default()
        });
        let streams = vec![
            stream("Movie.2024.480p.remux.x264"),
            stream("Movie.2024.480p.x264"),
        ];
        let (kept, stats) = run_filters(streams, &ctx(&user));
        assert_eq!(kept.len(), 1);
        assert_eq!(
            kept[0].filename.as_deref(),
            Some("Movie.2024.480p.remux.x264")
        );
        assert_eq!(stats.included, 1);
    }

    #[test]
    fn monotone_and_counted() {
        let user = validated(UserData {
            resolutions: EnumFilter {
                excluded: vec!["720p".into()],
                ..Default::default()
            },
            ..Default::default()
        });
        let streams = vec![
            stream("A.2024.720p.WEB"),
            stream("B.2024.1080p.WEB"),
            stream("C.2024.720p.WEB"),
        ];
        let (kept, stats) = run_filters(streams, &ctx(&user));
        assert!(kept.len() <= stats.input);
        assert_eq!(kept.len(), 1);
        assert_eq!(stats.output, 1);
        let removed: usize = stats.removed.values().sum();
        assert_eq!(removed, 2);
    }

    #[test]
    fn passthrough_bypasses_single_stage() {
        let user = validated(UserData {
            resolutions: EnumFilter {
                excluded: vec!["720p".into()],
                ..Default::default()
            },
            ..Default::default()
        });
        let mut exempt = stream("A.2024.720p.WEB");
        exempt.passthrough.insert(stage::ENUMERATIONS.to_owned());
        let (kept, _) = run_filters(vec![exempt], &ctx(&user));
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn digital_release_gate_blocks_all_but_passthrough() {
        let user = validated(UserData {
            digital_release_gate: crate::user_data::DigitalReleaseGate {
                enabled: true,
                tolerance_days: 0,
            },
            ..Default::default()
        });
        let mut context = ctx(&user);
        context.release_facts = Some(digital_release::ReleaseFacts {
            release: Some(date!(2024 - 08 - 01)),
            ..Default::default()
        });
        let mut exempt = stream("B.2024.1080p.WEB");
        exempt.passthrough.insert(stage::DIGITAL_RELEASE.to_owned());
        let streams = vec![stream("A.2024.1080p.WEB"), exempt];
        let (kept, stats) = run_filters(streams, &context);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].filename.as_deref(), Some("B.2024.1080p.WEB"));
        assert_eq!(stats.removed.len(), 1);
    }

    #[test]
    fn error_pseudo_streams_flow_through() {
        let user = validated(UserData {
            resolutions: EnumFilter {
                excluded: vec!["Unknown".into()],
                ..Default::default()
            },
            ..Default::default()
        });
        let pseudo = ParsedStream::error("indexarr", "service down");
        let (kept, _) = run_filters(vec![pseudo], &ctx(&user));
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn sel_excluded_removes() {
        let user = validated(UserData {
            excluded_expressions: vec!["resolution(720p)".into()],
            ..Default::default()
        });
        let streams = vec![stream("A.2024.720p.WEB"), stream("B.2024.1080p.WEB")];
        let (kept, _) = run_filters(streams, &ctx(&user));
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].filename.as_deref(), Some("B.2024.1080p.WEB"));
    }
}
