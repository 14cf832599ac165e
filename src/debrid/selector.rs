use std::sync::LazyLock;

use regex::Regex;

use crate::matcher;
use crate::metadata::TitleMetadata;
use crate::parser::{self, ParsedTitle};

use super::DebridFile;

static SAMPLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(sample|trailer|preview)\b").unwrap());

/// Anime opening/ending extras: creditless OPs/EDs and numbered variants.
static EXTRAS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(NCOP\d*|NCED\d*|OP\d*|ED\d*|Opening\d*|Ending\d*)\b").unwrap()
});

#[derive(Debug, Clone, Default)]
pub struct SelectionContext<'a> {
    pub metadata: Option<&'a TitleMetadata>,
    pub season: Option<u16>,
    pub episode: Option<u16>,
    /// Year the anime season aired; distinct from the series year.
    pub season_year: Option<u16>,
    pub chosen_index: Option<i32>,
    pub chosen_filename: Option<String>,
    pub skip_season_episode_check: bool,
}

#[derive(Debug, Clone)]
pub enum SelectionOutcome {
    Selected {
        file: DebridFile,
        parsed: ParsedTitle,
        score: i64,
    },
    NoneSelected {
        reason: String,
    },
}

impl SelectionOutcome {
    pub fn selected(self) -> Option<(DebridFile, ParsedTitle)> {
        match self {
            SelectionOutcome::Selected { file, parsed, .. } => Some((file, parsed)),
            SelectionOutcome::NoneSelected { .. } => None,
        }
    }
}

/// Episode-match table. Rows: file with/without season info; columns: match
/// kind × exact (single-episode file) vs batch.
fn episode_match_score(
    parsed: &ParsedTitle,
    episode: u16,
    meta: Option<&TitleMetadata>,
) -> Option<i64> {
    if parsed.episodes.is_empty() {
        return None;
    }
    let has_season = !parsed.seasons.is_empty();
    let exact = parsed.episodes.len() == 1;

    let regular = parsed.episodes.contains(&episode);
    let absolute = meta
        .and_then(|m| m.absolute_episode)
        .is_some_and(|a| parsed.episodes.contains(&a));
    let relative = meta
        .and_then(|m| m.relative_absolute_episode)
        .is_some_and(|r| parsed.episodes.contains(&r));

    let mut best: Option<i64> = None;
    let mut consider = |matched: bool, no_season: i64, with_season: i64| {
        if matched {
            let score = if has_season { with_season } else { no_season };
            best = Some(best.map_or(score, |b| b.max(score)));
        }
    };
    if exact {
        consider(regular, 300, 750);
        consider(absolute, 2000, 200);
        consider(relative, 1000, 150);
    } else {
        consider(regular, 100, 250);
        consider(absolute, 500, 100);
        consider(relative, 300, 50);
    }
    best
}

fn score_file(
    file: &DebridFile,
    parsed: &ParsedTitle,
    max_size: u64,
    ctx: &SelectionContext<'_>,
) -> i64 {
    let name = file.name.as_deref().unwrap_or_default();
    let mut score: i64 = 1000;

    if SAMPLE_RE.is_match(name) {
        score -= 500;
    }
    if EXTRAS_RE.is_match(name) {
        score -= 500;
    }

    if let (Some(meta), Some(year)) = (ctx.metadata, parsed.year) {
        if meta.year == Some(year) {
            score += 500;
        }
    }
    if ctx.season_year.is_some() && parsed.year == ctx.season_year {
        score += 750;
    }

    let mut positional_scored = false;
    if let Some(season) = ctx.season {
        if parsed.seasons.contains(&season) {
            score += 500;
            positional_scored = true;
        } else if !parsed.seasons.is_empty() {
            let wrong = ctx
                .metadata
                .map(|m| matcher::is_season_wrong(parsed, Some(season), m))
                .unwrap_or(true);
            if wrong {
                score -= 2000;
                positional_scored = true;
            }
        }
    }
    if let Some(episode) = ctx.episode {
        if let Some(episode_score) = episode_match_score(parsed, episode, ctx.metadata) {
            score += episode_score;
            positional_scored = true;
        }
    }
    if !positional_scored && (ctx.season.is_some() || ctx.episode.is_some()) {
        score -= 500;
    }

    if let Some(meta) = ctx.metadata {
        let candidates = matcher::preprocess_title(parsed, name, &meta.aliases);
        if candidates
            .iter()
            .any(|c| matcher::title_match(c, &meta.aliases, matcher::MatchOptions::default()))
        {
            score += 100;
        }
    }

    if max_size > 0 {
        score += (file.size as i64 * 50) / max_size as i64;
    }

    if ctx.chosen_index == Some(file.index) {
        score += 25;
    }
    if let Some(chosen) = &ctx.chosen_filename {
        if !chosen.is_empty() && name.to_lowercase().contains(&chosen.to_lowercase()) {
            score += 25;
        }
    }

    score
}

/// Pick the best video file of a download. Scores every candidate against
/// the requested metadata; yields to the runtime every 10 files so one large
/// season pack cannot monopolise a worker.
pub async fn select_file(
    files: &[DebridFile],
    ctx: &SelectionContext<'_>,
) -> SelectionOutcome {
    let candidates: Vec<&DebridFile> = files.iter().filter(|f| f.is_video()).collect();
    if candidates.is_empty() {
        return SelectionOutcome::NoneSelected {
            reason: "no video files in download".to_owned(),
        };
    }
    let max_size = candidates.iter().map(|f| f.size).max().unwrap_or(0);

    let mut best: Option<(i64, &DebridFile, ParsedTitle)> = None;
    for (i, file) in candidates.iter().enumerate() {
        if i > 0 && i % 10 == 0 {
            tokio::task::yield_now().await;
        }
        let parsed = parser::parse(file.name.as_deref().unwrap_or_default());
        let score = score_file(file, &parsed, max_size, ctx);
        tracing::trace!(file = file.name.as_deref(), score, "Scored file");
        // stable: strictly-greater keeps the first of equals
        if best.as_ref().is_none_or(|(b, _, _)| score > *b) {
            best = Some((score, file, parsed));
        }
    }
    let Some((score, file, parsed)) = best else {
        return SelectionOutcome::NoneSelected {
            reason: "no candidate survived scoring".to_owned(),
        };
    };

    if !ctx.skip_season_episode_check {
        if let Some(meta) = ctx.metadata {
            if matcher::is_episode_wrong(&parsed, ctx.episode, meta)
                || matcher::is_season_wrong(&parsed, ctx.season, meta)
            {
                return SelectionOutcome::NoneSelected {
                    reason: format!(
                        "selected file {:?} does not match the requested episode",
                        file.name
                    ),
                };
            }
        }
    }

    SelectionOutcome::Selected {
        file: (*file).clone(),
        parsed,
        score,
    }
}
