use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Provider-agnostic identifier of the requested content.
///
/// Parsed from the id segment of a stream request, e.g. `tt0944947:2:3`,
/// `tmdb:1399`, `kitsu:1376:5`. The prefix selects the id space; an optional
/// `:season:episode` suffix narrows series requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdKind {
    Imdb,
    Tmdb,
    Tvdb,
    Kitsu,
    Mal,
    Anilist,
}

impl IdKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdKind::Imdb => "imdb",
            IdKind::Tmdb => "tmdb",
            IdKind::Tvdb => "tvdb",
            IdKind::Kitsu => "kitsu",
            IdKind::Mal => "mal",
            IdKind::Anilist => "anilist",
        }
    }

    /// Id spaces that only ever identify anime entries.
    pub fn is_anime_native(&self) -> bool {
        matches!(self, IdKind::Kitsu | IdKind::Mal | IdKind::Anilist)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Movie,
    Series,
    Anime,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Movie => "movie",
            MediaType::Series => "series",
            MediaType::Anime => "anime",
        }
    }
}

impl FromStr for MediaType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "movie" => Ok(Self::Movie),
            "series" | "tv" => Ok(Self::Series),
            "anime" => Ok(Self::Anime),
            rest => Err(anyhow::anyhow!("{rest} is not recognized as media type")),
        }
    }
}

impl Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentId {
    pub kind: IdKind,
    pub value: String,
    pub season: Option<u16>,
    pub episode: Option<u16>,
}

impl ContentId {
    pub fn new(kind: IdKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
            season: None,
            episode: None,
        }
    }

    pub fn with_episode(mut self, season: u16, episode: u16) -> Self {
        self.season = Some(season);
        self.episode = Some(episode);
        self
    }

    /// Cache key segment: stable across request shapes.
    pub fn cache_key(&self) -> String {
        match (self.season, self.episode) {
            (Some(s), Some(e)) => format!("{}:{}:{}:{}", self.kind.as_str(), self.value, s, e),
            _ => format!("{}:{}", self.kind.as_str(), self.value),
        }
    }

    pub fn is_episode_request(&self) -> bool {
        self.season.is_some() || self.episode.is_some()
    }
}

impl FromStr for ContentId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');
        let head = parts.next().filter(|h| !h.is_empty()).ok_or_else(|| {
            anyhow::anyhow!("empty content id")
        })?;

        let (kind, value) = if head.starts_with("tt") {
            (IdKind::Imdb, head.to_owned())
        } else {
            let value = parts
                .next()
                .filter(|v| !v.is_empty())
                .ok_or_else(|| anyhow::anyhow!("{head} id is missing a value"))?;
            let kind = match head {
                "tmdb" => IdKind::Tmdb,
                "tvdb" => IdKind::Tvdb,
                "kitsu" => IdKind::Kitsu,
                "mal" => IdKind::Mal,
                "anilist" => IdKind::Anilist,
                rest => return Err(anyhow::anyhow!("unknown id prefix: {rest}")),
            };
            (kind, value.to_owned())
        };

        let mut id = ContentId::new(kind, value);
        let rest: Vec<&str> = parts.collect();
        match rest.as_slice() {
            [] => {}
            // kitsu ids carry a bare episode: `kitsu:1376:5`
            [episode] if id.kind.is_anime_native() => {
                id.season = Some(1);
                id.episode = Some(episode.parse()?);
            }
            [season, episode] => {
                id.season = Some(season.parse()?);
                id.episode = Some(episode.parse()?);
            }
            _ => return Err(anyhow::anyhow!("too many segments in content id: {s}")),
        }
        Ok(id)
    }
}

impl Display for ContentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            IdKind::Imdb => write!(f, "{}", self.value)?,
            _ => write!(f, "{}:{}", self.kind.as_str(), self.value)?,
        }
        if let (Some(s), Some(e)) = (self.season, self.episode) {
            write!(f, ":{}:{}", s, e)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn imdb_ids() {
        let id: ContentId = "tt0944947".parse().unwrap();
        assert_eq!(id.kind, IdKind::Imdb);
        assert_eq!(id.value, "tt0944947");
        assert_eq!(id.season, None);

        let id: ContentId = "tt0944947:2:3".parse().unwrap();
        assert_eq!(id.season, Some(2));
        assert_eq!(id.episode, Some(3));
        assert_eq!(id.to_string(), "tt0944947:2:3");
    }

    #[test]
    fn prefixed_ids() {
        let id: ContentId = "tmdb:1399".parse().unwrap();
        assert_eq!(id.kind, IdKind::Tmdb);
        assert_eq!(id.value, "1399");

        let id: ContentId = "kitsu:1376:5".parse().unwrap();
        assert_eq!(id.kind, IdKind::Kitsu);
        assert_eq!(id.season, Some(1));
        assert_eq!(id.episode, Some(5));

        let id: ContentId = "anilist:21:1000".parse().unwrap();
        assert_eq!(id.kind, IdKind::Anilist);
        assert_eq!(id.episode, Some(1000));
    }

    #[test]
    fn rejects_garbage() {
        assert!("".parse::<ContentId>().is_err());
        assert!("tmdb:".parse::<ContentId>().is_err());
        assert!("imdb:tt1:1:2:3".parse::<ContentId>().is_err());
        assert!("steam:440".parse::<ContentId>().is_err());
    }
}
