use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::{Client, Method, Request, Url};
use serde::Deserialize;

use crate::content_id::{ContentId, IdKind, MediaType};
use crate::request_client::LimitedRequestClient;

use super::tmdb::parse_date;
use super::{ProviderTitle, SeasonInfo, TitleAlias, TitleMetadataProvider};

/// IMDB-backed metadata via the cinemeta catalog plus the public suggestion
/// endpoint. Only answers `tt` ids.
#[derive(Debug)]
pub struct ImdbApi {
    cinemeta_url: Url,
    suggestion_url: Url,
    client: LimitedRequestClient,
}

impl Default for ImdbApi {
    fn default() -> Self {
        Self::new()
    }
}

impl ImdbApi {
    const CINEMETA_URL: &'static str = "https://v3-cinemeta.strem.io";
    const SUGGESTION_URL: &'static str = "https://v2.sg.media-imdb.com";

    pub fn new() -> Self {
        let client = Client::new();
        let limited_client = LimitedRequestClient::new(client, 20, Duration::from_secs(1));
        Self {
            cinemeta_url: Url::parse(Self::CINEMETA_URL).expect("url to parse"),
            suggestion_url: Url::parse(Self::SUGGESTION_URL).expect("url to parse"),
            client: limited_client,
        }
    }

    pub async fn cinemeta_meta(
        &self,
        media: MediaType,
        imdb_id: &str,
    ) -> anyhow::Result<CinemetaMeta> {
        let kind = match media {
            MediaType::Movie => "movie",
            MediaType::Series | MediaType::Anime => "series",
        };
        let mut url = self.cinemeta_url.clone();
        url.path_segments_mut()
            .expect("base url is not cannot-be-a-base")
            .extend(["meta", kind, &format!("{imdb_id}.json")]);
        let req = Request::new(Method::GET, url);
        let response: CinemetaResponse = self.client.request(req).await?;
        Ok(response.meta)
    }

    pub async fn suggestion(&self, imdb_id: &str) -> anyhow::Result<Option<ImdbSuggestion>> {
        let first = imdb_id
            .chars()
            .next()
            .map(|c| c.to_ascii_lowercase().to_string())
            .unwrap_or_else(|| "t".to_owned());
        let mut url = self.suggestion_url.clone();
        url.path_segments_mut()
            .expect("base url is not cannot-be-a-base")
            .extend(["suggestion", &first, &format!("{imdb_id}.json")]);
        let req = Request::new(Method::GET, url);
        let response: SuggestionResponse = self.client.request(req).await?;
        Ok(response
            .d
            .into_iter()
            .find(|s| s.id.as_deref() == Some(imdb_id)))
    }
}

#[async_trait::async_trait]
impl TitleMetadataProvider for ImdbApi {
    async fn title_metadata(
        &self,
        id: &ContentId,
        media: MediaType,
    ) -> anyhow::Result<ProviderTitle> {
        if id.kind != IdKind::Imdb {
            anyhow::bail!("imdb provider only answers tt ids");
        }

        // the two endpoints fail independently; either alone is useful
        let (meta, suggestion) = tokio::join!(
            self.cinemeta_meta(media, &id.value),
            self.suggestion(&id.value)
        );

        let mut out = ProviderTitle::default();
        match meta {
            Ok(meta) => {
                let (year, year_end) = parse_release_info(meta.release_info.as_deref());
                out.primary = Some(meta.name.clone());
                out.year = year;
                out.year_end = year_end;
                out.seasons = seasons_from_videos(&meta.videos);
                out.genres = meta.genres;
                out.first_aired = meta.released.as_deref().and_then(parse_date);
            }
            Err(e) => tracing::debug!("Cinemeta lookup failed for {id}: {e:#}"),
        }
        match suggestion {
            Ok(Some(suggestion)) => {
                if out.primary.is_none() {
                    out.primary = Some(suggestion.l.clone());
                } else if suggestion.l != out.primary.clone().unwrap_or_default() {
                    out.aliases.push(TitleAlias {
                        title: suggestion.l,
                        language: None,
                    });
                }
                if out.year.is_none() {
                    out.year = suggestion.y;
                }
                if out.year_end.is_none() {
                    out.year_end = parse_release_info(suggestion.yr.as_deref()).1;
                }
            }
            Ok(None) => {}
            Err(e) => tracing::debug!("IMDB suggestion lookup failed for {id}: {e:#}"),
        }

        if out.primary.is_none() {
            anyhow::bail!("neither cinemeta nor suggestion knew {id}");
        }
        Ok(out)
    }

    fn provider_identifier(&self) -> &'static str {
        "imdb"
    }
}

/// `"2011-2019"` / `"2011–"` / `"2011"` → (start, end)
fn parse_release_info(raw: Option<&str>) -> (Option<u16>, Option<u16>) {
    let Some(raw) = raw else {
        return (None, None);
    };
    let mut parts = raw.splitn(2, ['-', '–']);
    let start = parts.next().and_then(|y| y.trim().parse().ok());
    let end = parts.next().and_then(|y| y.trim().parse().ok());
    (start, end)
}

fn seasons_from_videos(videos: &[CinemetaVideo]) -> Vec<SeasonInfo> {
    let mut counts: BTreeMap<u16, u16> = BTreeMap::new();
    for video in videos {
        if let (Some(season), Some(_)) = (video.season, video.episode) {
            *counts.entry(season).or_default() += 1;
        }
    }
    counts
        .into_iter()
        .map(|(number, episode_count)| SeasonInfo {
            number,
            episode_count,
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct CinemetaResponse {
    meta: CinemetaMeta,
}

#[derive(Debug, Deserialize)]
pub struct CinemetaMeta {
    pub name: String,
    #[serde(rename = "releaseInfo")]
    pub release_info: Option<String>,
    pub released: Option<String>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub videos: Vec<CinemetaVideo>,
}

#[derive(Debug, Deserialize)]
pub struct CinemetaVideo {
    pub season: Option<u16>,
    pub episode: Option<u16>,
    pub released: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SuggestionResponse {
    #[serde(default)]
    d: Vec<ImdbSuggestion>,
}

#[derive(Debug, Deserialize)]
pub struct ImdbSuggestion {
    pub id: Option<String>,
    /// Title
    pub l: String,
    /// Year
    pub y: Option<u16>,
    /// Year range for series, `"2011-2019"`
    pub yr: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_info_spans() {
        assert_eq!(parse_release_info(Some("2011-2019")), (Some(2011), Some(2019)));
        assert_eq!(parse_release_info(Some("2011–2019")), (Some(2011), Some(2019)));
        assert_eq!(parse_release_info(Some("2011-")), (Some(2011), None));
        assert_eq!(parse_release_info(Some("2011")), (Some(2011), None));
        assert_eq!(parse_release_info(None), (None, None));
    }

    #[test]
    fn seasons_derived_from_episode_list() {
        let videos = vec![
            CinemetaVideo { season: Some(1), episode: Some(1), released: None },
            CinemetaVideo { season: Some(1), episode: Some(2), released: None },
            CinemetaVideo { season: Some(2), episode: Some(1), released: None },
            CinemetaVideo { season: Some(0), episode: Some(1), released: None },
            CinemetaVideo { season: None, episode: None, released: None },
        ];
        let seasons = seasons_from_videos(&videos);
        assert_eq!(
            seasons,
            vec![
                SeasonInfo { number: 0, episode_count: 1 },
                SeasonInfo { number: 1, episode_count: 2 },
                SeasonInfo { number: 2, episode_count: 1 },
            ]
        );
    }
}
