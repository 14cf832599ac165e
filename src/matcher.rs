use unidecode::unidecode;

use crate::metadata::{TitleAlias, TitleMetadata};
use crate::parser::ParsedTitle;

/// How candidate titles are compared against request aliases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scorer {
    /// Whole-string similarity.
    Exact,
    /// Best window of the longer string against the shorter one. Tolerant of
    /// extra words ("Title — The Complete Collection").
    Partial,
}

#[derive(Debug, Clone, Copy)]
pub struct MatchOptions {
    pub threshold: f32,
    pub scorer: Scorer,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            threshold: 0.8,
            scorer: Scorer::Partial,
        }
    }
}

/// Normalise a title for comparison: transliterate (umlauts, diacritics),
/// `&` to "and", drop everything that is not a letter, digit, space or
/// apostrophe, lowercase.
pub fn normalise(s: &str) -> String {
    let transliterated = unidecode(&s.replace('&', " and "));
    let mut out = String::with_capacity(transliterated.len());
    let mut last_space = true;
    for c in transliterated.chars() {
        if c.is_alphanumeric() || c == '\'' {
            out.extend(c.to_lowercase());
            last_space = false;
        } else if !last_space {
            out.push(' ');
            last_space = true;
        }
    }
    out.trim_end().to_owned()
}

fn fuzzy_score(query: &str, target: &str) -> f32 {
    if query.is_empty() || target.is_empty() {
        return 0.0;
    }
    if query == target {
        return 1.0;
    }
    let reference = match sublime_fuzzy::best_match(query, query) {
        Some(m) => m.score() as f32,
        None => return 0.0,
    };
    match sublime_fuzzy::best_match(query, target) {
        Some(m) => (m.score() as f32 / reference).clamp(0.0, 1.0),
        None => 0.0,
    }
}

fn similarity(a: &str, b: &str, scorer: Scorer) -> f32 {
    match scorer {
        Scorer::Exact => fuzzy_score(a, b).min(fuzzy_score(b, a)),
        Scorer::Partial => {
            let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
            fuzzy_score(short, long)
        }
    }
}

/// True when any alias clears the threshold against the candidate title.
pub fn title_match(candidate: &str, aliases: &[TitleAlias], opts: MatchOptions) -> bool {
    title_match_with_lang(candidate, aliases, opts).is_some()
}

/// Like [`title_match`] but reports the language tag of the best-scoring
/// alias.
pub fn title_match_with_lang(
    candidate: &str,
    aliases: &[TitleAlias],
    opts: MatchOptions,
) -> Option<Option<String>> {
    let candidate = normalise(candidate);
    if candidate.is_empty() {
        return None;
    }
    let mut best: Option<(f32, Option<String>)> = None;
    for alias in aliases {
        let score = similarity(&candidate, &normalise(&alias.title), opts.scorer);
        if score >= opts.threshold && best.as_ref().is_none_or(|(b, _)| score > *b) {
            best = Some((score, alias.language.clone()));
        }
    }
    best.map(|(_, lang)| lang)
}

fn alias_share_with_separator(aliases: &[TitleAlias], separator: &str) -> f32 {
    if aliases.is_empty() {
        return 0.0;
    }
    let hits = aliases
        .iter()
        .filter(|a| a.title.to_lowercase().contains(separator))
        .count();
    hits as f32 / aliases.len() as f32
}

/// Expand a parsed title into the candidate strings worth matching.
///
/// Release names bundle alternates: "Title A / Title B", "X aka Y", and a
/// trailing parenthesised alternate. Each split is suppressed when at least
/// 20% of the request aliases legitimately contain that separator (then it is
/// part of the real title, not an alternate marker). When the aliases and the
/// file name talk about a "Saga" but the parsed title dropped the word, a
/// "<title> Saga" variant is appended.
pub fn preprocess_title(
    parsed: &ParsedTitle,
    filename: &str,
    aliases: &[TitleAlias],
) -> Vec<String> {
    let mut candidates = vec![parsed.title.clone()];

    for separator in [" / ", " aka "] {
        if alias_share_with_separator(aliases, separator.trim()) >= 0.2 {
            continue;
        }
        let mut expanded = Vec::new();
        for candidate in &candidates {
            for part in candidate.split(separator) {
                let part = part.trim();
                if !part.is_empty() {
                    expanded.push(part.to_owned());
                }
            }
        }
        candidates = expanded;
    }

    // trailing "(...)" alternate: "Some Show (Alternate Name)"
    if alias_share_with_separator(aliases, "(") < 0.2 {
        let mut extra = Vec::new();
        for candidate in &candidates {
            if let Some(open) = candidate.rfind('(') {
                if candidate.ends_with(')') {
                    let outer = candidate[..open].trim();
                    let inner = candidate[open + 1..candidate.len() - 1].trim();
                    if !outer.is_empty() {
                        extra.push(outer.to_owned());
                    }
                    if !inner.is_empty() && inner.parse::<u16>().is_err() {
                        extra.push(inner.to_owned());
                    }
                }
            }
        }
        candidates.extend(extra);
    }

    let lower_file = filename.to_lowercase();
    let title_has_saga = parsed.title.to_lowercase().contains("saga");
    let aliases_have_saga = aliases
        .iter()
        .any(|a| a.title.to_lowercase().contains("saga"));
    if aliases_have_saga && lower_file.contains("saga") && !title_has_saga {
        candidates.push(format!("{} Saga", parsed.title));
    }

    candidates.dedup();
    candidates
}

/// Coarse title validator: wrong when no preprocessed candidate matches any
/// alias. An empty alias list means no authority to reject.
pub fn is_title_wrong(parsed: &ParsedTitle, filename: &str, meta: &TitleMetadata) -> bool {
    if parsed.title.is_empty() || meta.aliases.is_empty() {
        return false;
    }
    let opts = MatchOptions::default();
    !preprocess_title(parsed, filename, &meta.aliases)
        .iter()
        .any(|candidate| title_match(candidate, &meta.aliases, opts))
}

fn matches_absolute(parsed: &ParsedTitle, meta: &TitleMetadata) -> bool {
    let absolute = meta.absolute_episode;
    let relative = meta.relative_absolute_episode;
    parsed.episodes.iter().any(|&e| {
        absolute.is_some_and(|a| a == e) || relative.is_some_and(|r| r == e)
    })
}

/// Coarse season validator.
///
/// Not wrong when the file has no season info, when the requested season is
/// listed, or when the file uses absolute anime numbering that lands on the
/// requested episode.
pub fn is_season_wrong(parsed: &ParsedTitle, season: Option<u16>, meta: &TitleMetadata) -> bool {
    let Some(season) = season else {
        return false;
    };
    if parsed.seasons.is_empty() {
        return false;
    }
    if parsed.seasons.contains(&season) {
        return false;
    }
    // absolute numbering ignores the season grid entirely
    !(parsed.seasons.is_empty() || matches_absolute(parsed, meta))
}

/// Coarse episode validator. Season packs (no explicit episodes) pass; an
/// explicit episode list must contain the requested, absolute, or relative
/// absolute episode number.
pub fn is_episode_wrong(
    parsed: &ParsedTitle,
    episode: Option<u16>,
    meta: &TitleMetadata,
) -> bool {
    let Some(episode) = episode else {
        return false;
    };
    if parsed.episodes.is_empty() {
        return false;
    }
    if parsed.episodes.contains(&episode) {
        return false;
    }
    !matches_absolute(parsed, meta)
}
