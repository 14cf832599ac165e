use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Structured descriptor of a release/file name.
///
/// Produced by [`parse`], which is pure and deterministic: the same input
/// always yields the same descriptor and no I/O happens on the way.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedTitle {
    pub title: String,
    pub seasons: Vec<u16>,
    pub episodes: Vec<u16>,
    pub year: Option<u16>,
    pub resolution: Option<String>,
    pub quality: Option<String>,
    pub encode: Option<String>,
    pub visual_tags: Vec<String>,
    pub audio_tags: Vec<String>,
    pub audio_channels: Vec<String>,
    pub languages: Vec<String>,
    pub release_group: Option<String>,
}

impl ParsedTitle {
    /// Season pack: seasons present without explicit episodes.
    pub fn is_season_pack(&self) -> bool {
        !self.seasons.is_empty() && self.episodes.is_empty()
    }
}

struct Patterns {
    resolution: Regex,
    quality: Regex,
    encode: Regex,
    visual: Regex,
    audio: Regex,
    channels: Regex,
    language: Regex,
    season_episode: Regex,
    season_range: Regex,
    season: Regex,
    episode_tag: Regex,
    absolute_episode: Regex,
    year: Regex,
    bracket_group: Regex,
    dash_group: Regex,
    extension: Regex,
}

static PATTERNS: LazyLock<Patterns> = LazyLock::new(|| Patterns {
    resolution: Regex::new(r"(?i)\b(2160p|1440p|1080p|720p|576p|480p|4k|uhd)\b").unwrap(),
    quality: Regex::new(
        r"(?i)\b(blu-?ray\s*remux|bd-?remux|remux|blu-?ray|bdrip|brrip|web-?dl|webrip|web|hdtv|dvdrip|dvd|hdrip|cam|telesync|ts|tc|scr|screener)\b",
    )
    .unwrap(),
    encode: Regex::new(r"(?i)\b(x\.?264|x\.?265|h\.?264|h\.?265|hevc|av1|avc|xvid|divx|vp9)\b")
        .unwrap(),
    visual: Regex::new(r"(?i)\b(hdr10\+?|hdr|dolby\s?vision|dv|imax|3d|sdr|10bit|10-bit)\b")
        .unwrap(),
    audio: Regex::new(
        r"(?i)\b(atmos|truehd|true-?hd|dts-?hd(?:\s?ma)?|dts-?x|dts|ddp?5?\.?1?|dd\+|eac-?3|e-?ac3|ac-?3|aac|flac|opus|mp3)\b",
    )
    .unwrap(),
    channels: Regex::new(r"(?i)([2578])\.([01])\b").unwrap(),
    language: Regex::new(
        r"(?i)\b(multi|dual[\s.-]?audio|english|eng|french|vff|german|ger|spanish|esp|latino|italian|ita|russian|rus|japanese|jpn|korean|kor|hindi|mandarin|portuguese|vostfr|dubbed|dub|sub(?:bed)?)\b",
    )
    .unwrap(),
    season_episode: Regex::new(r"(?i)\bS(\d{1,4})[\s.]?[EX](\d{1,4})(?:[-~]?E?(\d{1,4}))?\b")
        .unwrap(),
    season_range: Regex::new(r"(?i)\bS(\d{1,2})[\s.]?[-~][\s.]?S?(\d{1,2})\b").unwrap(),
    season: Regex::new(r"(?i)\b(?:S(\d{1,2})|Season[\s._]?(\d{1,4}))\b").unwrap(),
    episode_tag: Regex::new(r"(?i)(?:\b|_)(?:E|EP|Episode[\s._]?)(\d{1,4})(?:v\d)?\b").unwrap(),
    // ` - 37`, `[37]` and similar anime-style bare numbers after the title
    absolute_episode: Regex::new(r"(?:\s-\s|\s|\[|_)(\d{2,4})(?:v\d)?(?:\s|\]|_|$|\.\w{2,4}$)")
        .unwrap(),
    year: Regex::new(r"[\[\(\s._]((?:19|20)\d{2})[\]\)\s._]?").unwrap(),
    bracket_group: Regex::new(r"^\[([^\]]+)\]").unwrap(),
    dash_group: Regex::new(r"-([A-Za-z0-9]+)(?:\[[^\]]*\])?(?:\.\w{2,4})?$").unwrap(),
    extension: Regex::new(r"\.(mkv|mp4|avi|mov|wmv|flv|webm|ts|m2ts|m4v|mpg|mpeg)$").unwrap(),
});

fn canon_resolution(raw: &str) -> String {
    match raw.to_ascii_lowercase().as_str() {
        "4k" | "uhd" | "2160p" => "2160p".to_owned(),
        rest => rest.to_owned(),
    }
}

fn canon_quality(raw: &str) -> String {
    let lower = raw.to_ascii_lowercase().replace([' ', '-', '.'], "");
    match lower.as_str() {
        "blurayremux" | "bdremux" | "remux" => "BluRay REMUX",
        "bluray" => "BluRay",
        "bdrip" | "brrip" => "BRRip",
        "webdl" | "web" => "WEB-DL",
        "webrip" => "WEBRip",
        "hdtv" => "HDTV",
        "dvdrip" | "dvd" => "DVDRip",
        "hdrip" => "HDRip",
        "cam" => "CAM",
        "telesync" | "ts" | "tc" => "TeleSync",
        "scr" | "screener" => "SCR",
        _ => "Unknown",
    }
    .to_owned()
}

fn canon_encode(raw: &str) -> String {
    let lower = raw.to_ascii_lowercase().replace('.', "");
    match lower.as_str() {
        "x264" | "h264" | "avc" => "AVC",
        "x265" | "h265" | "hevc" => "HEVC",
        "av1" => "AV1",
        "xvid" | "divx" => "XviD",
        "vp9" => "VP9",
        _ => "Unknown",
    }
    .to_owned()
}

fn canon_language(raw: &str) -> Option<String> {
    let lower = raw.to_ascii_lowercase();
    let lang = match lower.as_str() {
        "multi" => "Multi",
        "dual audio" | "dual-audio" | "dual.audio" | "dualaudio" => "Dual Audio",
        "english" | "eng" => "English",
        "french" | "vff" | "vostfr" => "French",
        "german" | "ger" => "German",
        "spanish" | "esp" | "latino" => "Spanish",
        "italian" | "ita" => "Italian",
        "russian" | "rus" => "Russian",
        "japanese" | "jpn" => "Japanese",
        "korean" | "kor" => "Korean",
        "hindi" => "Hindi",
        "mandarin" => "Mandarin",
        "portuguese" => "Portuguese",
        // dub/sub markers are not languages
        _ => return None,
    };
    Some(lang.to_owned())
}

fn push_unique(list: &mut Vec<String>, value: String) {
    if !list.iter().any(|v| v.eq_ignore_ascii_case(&value)) {
        list.push(value);
    }
}

/// Parse a file or folder name into a [`ParsedTitle`].
pub fn parse(name: &str) -> ParsedTitle {
    let p = &*PATTERNS;
    let mut out = ParsedTitle::default();
    let name = name.trim();
    let stem = p.extension.replace(name, "");

    // The title ends where structured metadata begins. Track the earliest
    // metadata token so everything before it becomes the title.
    let mut title_end = stem.len();
    let mut clamp = |start: usize| {
        if start < title_end {
            title_end = start;
        }
    };

    if let Some(c) = p.season_episode.captures(&stem) {
        let m = c.get(0).unwrap();
        clamp(m.start());
        let season: u16 = c[1].parse().unwrap_or(0);
        out.seasons.push(season);
        let first: u16 = c[2].parse().unwrap_or(0);
        let last = c
            .get(3)
            .and_then(|r| r.as_str().parse::<u16>().ok())
            .unwrap_or(first);
        for ep in first..=last.max(first) {
            out.episodes.push(ep);
        }
    } else if let Some(c) = p.season_range.captures(&stem) {
        let m = c.get(0).unwrap();
        clamp(m.start());
        let lo: u16 = c[1].parse().unwrap_or(0);
        let hi: u16 = c[2].parse().unwrap_or(lo);
        for s in lo..=hi.max(lo) {
            out.seasons.push(s);
        }
    } else {
        if let Some(c) = p.season.captures(&stem) {
            let m = c.get(0).unwrap();
            clamp(m.start());
            let season = c
                .get(1)
                .or_else(|| c.get(2))
                .and_then(|v| v.as_str().parse::<u16>().ok());
            if let Some(season) = season {
                out.seasons.push(season);
            }
        }
        if let Some(c) = p.episode_tag.captures(&stem) {
            let m = c.get(0).unwrap();
            clamp(m.start());
            if let Ok(ep) = c[1].parse::<u16>() {
                out.episodes.push(ep);
            }
        }
    }

    if let Some(c) = p.year.captures(&stem) {
        let m = c.get(0).unwrap();
        // a leading year ("1917.2019.mkv") belongs to the title
        if m.start() > 0 {
            clamp(m.start());
        }
        out.year = c[1].parse().ok();
    }

    for (field, regex) in [
        (&mut out.resolution, &p.resolution),
        (&mut out.quality, &p.quality),
        (&mut out.encode, &p.encode),
    ] {
        if let Some(c) = regex.captures(&stem) {
            let m = c.get(0).unwrap();
            clamp(m.start());
            *field = Some(c[1].to_owned());
        }
    }
    out.resolution = out.resolution.take().map(|r| canon_resolution(&r));
    out.quality = out.quality.take().map(|q| canon_quality(&q));
    out.encode = out.encode.take().map(|e| canon_encode(&e));

    for c in p.visual.captures_iter(&stem) {
        clamp(c.get(0).unwrap().start());
        let tag = match c[1].to_ascii_lowercase().as_str() {
            "hdr10+" => "HDR10+".to_owned(),
            "hdr10" | "hdr" => "HDR".to_owned(),
            "dolby vision" | "dolbyvision" | "dv" => "DV".to_owned(),
            "10bit" | "10-bit" => "10bit".to_owned(),
            rest => rest.to_uppercase(),
        };
        push_unique(&mut out.visual_tags, tag);
    }
    for c in p.audio.captures_iter(&stem) {
        clamp(c.get(0).unwrap().start());
        let tag = match c[1].to_ascii_lowercase().replace(['-', ' '], "").as_str() {
            "atmos" => "Atmos".to_owned(),
            "truehd" => "TrueHD".to_owned(),
            "dtshd" | "dtshdma" => "DTS-HD".to_owned(),
            "dtsx" => "DTS-X".to_owned(),
            "dts" => "DTS".to_owned(),
            "flac" => "FLAC".to_owned(),
            "aac" => "AAC".to_owned(),
            "opus" => "Opus".to_owned(),
            "mp3" => "MP3".to_owned(),
            _ => "DD+".to_owned(),
        };
        push_unique(&mut out.audio_tags, tag);
    }
    for c in p.channels.captures_iter(&stem) {
        clamp(c.get(0).unwrap().start());
        push_unique(&mut out.audio_channels, format!("{}.{}", &c[1], &c[2]));
    }
    for c in p.language.captures_iter(&stem) {
        clamp(c.get(0).unwrap().start());
        if let Some(lang) = canon_language(&c[1]) {
            push_unique(&mut out.languages, lang);
        }
    }

    // Release group: `[Group] Title ...` (anime) wins over a trailing `-GRP`.
    let mut title_start = 0;
    if let Some(c) = p.bracket_group.captures(&stem) {
        out.release_group = Some(c[1].to_owned());
        title_start = c.get(0).unwrap().end();
    } else if let Some(c) = p.dash_group.captures(&stem) {
        let g = &c[1];
        // trailing token must not be a metadata word we already consumed
        if !p.encode.is_match(g) && !p.quality.is_match(g) && g.parse::<u32>().is_err() {
            out.release_group = Some(g.to_owned());
        }
    }

    // Anime-style absolute episode, only once the SxxEyy forms failed.
    if out.episodes.is_empty() {
        let search = &stem[title_start.min(stem.len())..];
        if let Some(c) = p.absolute_episode.captures(search) {
            if let Ok(ep) = c[1].parse::<u16>() {
                // years are not episodes
                if out.year != Some(ep) {
                    out.episodes.push(ep);
                    clamp(title_start + c.get(0).unwrap().start());
                }
            }
        }
    }

    let raw_title = stem
        .get(title_start..title_end)
        .unwrap_or("")
        .trim_matches(|c: char| c.is_whitespace() || "-_.([".contains(c));
    out.title = raw_title.replace(['.', '_'], " ").trim().to_owned();
    // collapse runs of spaces left behind by separator replacement
    while out.title.contains("  ") {
        out.title = out.title.replace("  ", " ");
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check<'a>(tests: impl IntoIterator<Item = (&'a str, ParsedTitle)>) {
        for (input, expected) in tests {
            assert_eq!(parse(input), expected, "input: {input}");
        }
    }

    #[test]
    fn season_episode_forms() {
        let tests = [
            (
                "Show.S02E03.1080p.WEB-DL.x264-GRP.mkv",
                ParsedTitle {
                    title: "Show".into(),
                    seasons: vec![2],
                    episodes: vec![3],
                    resolution: Some("1080p".into()),
                    quality: Some("WEB-DL".into()),
                    encode: Some("AVC".into()),
                    release_group: Some("GRP".into()),
                    ..Default::default()
                },
            ),
            (
                "The.Wire.S01.COMPLETE.720p.BluRay.x264",
                ParsedTitle {
                    title: "The Wire".into(),
                    seasons: vec![1],
                    resolution: Some("720p".into()),
                    quality: Some("BluRay".into()),
                    encode: Some("AVC".into()),
                    ..Default::default()
                },
            ),
        ];
        check(tests);
    }

    #[test]
    fn multi_episode_and_season_ranges() {
        let parsed = parse("Show.S01E01-E03.1080p.WEBRip");
        assert_eq!(parsed.seasons, vec![1]);
        assert_eq!(parsed.episodes, vec![1, 2, 3]);

        let parsed = parse("Breaking.Bad.S01-S05.1080p.BluRay.x265");
        assert_eq!(parsed.seasons, vec![1, 2, 3, 4, 5]);
        assert!(parsed.is_season_pack());
    }

    #[test]
    fn anime_absolute_numbering() {
        let parsed = parse("[SubsPlease] Sousou no Frieren - 17 (1080p) [ABCD1234].mkv");
        assert_eq!(parsed.title, "Sousou no Frieren");
        assert_eq!(parsed.release_group.as_deref(), Some("SubsPlease"));
        assert!(parsed.seasons.is_empty());
        assert_eq!(parsed.episodes, vec![17]);
        assert_eq!(parsed.resolution.as_deref(), Some("1080p"));
    }

    #[test]
    fn year_and_tags() {
        let parsed = parse("Dune.Part.Two.2024.2160p.WEB-DL.DDP5.1.Atmos.DV.HDR.H.265-FLUX.mkv");
        assert_eq!(parsed.title, "Dune Part Two");
        assert_eq!(parsed.year, Some(2024));
        assert_eq!(parsed.resolution.as_deref(), Some("2160p"));
        assert!(parsed.visual_tags.contains(&"DV".to_owned()));
        assert!(parsed.visual_tags.contains(&"HDR".to_owned()));
        assert!(parsed.audio_tags.contains(&"Atmos".to_owned()));
        assert!(parsed.audio_channels.contains(&"5.1".to_owned()));
        assert_eq!(parsed.encode.as_deref(), Some("HEVC"));
        assert_eq!(parsed.release_group.as_deref(), Some("FLUX"));
    }

    #[test]
    fn languages() {
        let parsed = parse("Movie.2020.MULTI.1080p.WEB-DL.x264");
        assert_eq!(parsed.languages, vec!["Multi".to_owned()]);

        let parsed = parse("Show.S01E01.VOSTFR.720p");
        assert_eq!(parsed.languages, vec!["French".to_owned()]);
    }

    #[test]
    fn deterministic() {
        let a = parse("Show.S02E03.1080p.WEB-DL.x264-GRP.mkv");
        let b = parse("Show.S02E03.1080p.WEB-DL.x264-GRP.mkv");
        assert_eq!(a, b);
    }

    #[test]
    fn bare_name_is_all_title() {
        let parsed = parse("Oppenheimer");
        assert_eq!(parsed.title, "Oppenheimer");
        assert!(parsed.seasons.is_empty());
        assert!(parsed.episodes.is_empty());
        assert_eq!(parsed.resolution, None);
    }
}
