use std::time::Duration;

use reqwest::{Client, Method, Request, Url};
use serde::Deserialize;
use time::macros::format_description;
use time::Date;

use crate::content_id::{ContentId, IdKind, MediaType};
use crate::request_client::LimitedRequestClient;

use super::{ProviderTitle, SeasonInfo, TitleAlias, TitleMetadataProvider};

pub fn parse_date(raw: &str) -> Option<Date> {
    let format = format_description!("[year]-[month]-[day]");
    Date::parse(raw.get(..10)?, &format).ok()
}

#[derive(Debug)]
pub struct TmdbApi {
    base_url: Url,
    client: LimitedRequestClient,
}

impl TmdbApi {
    const API_URL: &'static str = "https://api.themoviedb.org/3";
    const RATE_LIMIT: usize = 40;

    pub fn new(api_key: String) -> Self {
        let client = Client::new();
        let limited_client =
            LimitedRequestClient::new(client, Self::RATE_LIMIT, Duration::from_secs(1));
        let params = [("api_key", api_key)];
        let base_url = Url::parse_with_params(Self::API_URL, params).expect("url to parse");
        Self {
            base_url,
            client: limited_client,
        }
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .expect("base url is not cannot-be-a-base")
            .extend(segments);
        url
    }

    pub async fn find_by_external_id(
        &self,
        source: &str,
        value: &str,
    ) -> anyhow::Result<TmdbFindResponse> {
        let mut url = self.url(&["find", value]);
        url.query_pairs_mut().append_pair("external_source", source);
        let req = Request::new(Method::GET, url);
        Ok(self.client.request(req).await?)
    }

    pub async fn movie_details(&self, tmdb_id: &str) -> anyhow::Result<TmdbMovieDetails> {
        let mut url = self.url(&["movie", tmdb_id]);
        url.query_pairs_mut()
            .append_pair("append_to_response", "alternative_titles");
        let req = Request::new(Method::GET, url);
        Ok(self.client.request(req).await?)
    }

    pub async fn tv_details(&self, tmdb_id: &str) -> anyhow::Result<TmdbTvDetails> {
        let mut url = self.url(&["tv", tmdb_id]);
        url.query_pairs_mut()
            .append_pair("append_to_response", "alternative_titles");
        let req = Request::new(Method::GET, url);
        Ok(self.client.request(req).await?)
    }

    pub async fn movie_release_dates(&self, tmdb_id: &str) -> anyhow::Result<MovieReleaseDates> {
        let url = self.url(&["movie", tmdb_id, "release_dates"]);
        let req = Request::new(Method::GET, url);
        let response: TmdbReleaseDatesResponse = self.client.request(req).await?;
        Ok(response.into())
    }

    pub async fn tv_episode(
        &self,
        tmdb_id: &str,
        season: u16,
        episode: u16,
    ) -> anyhow::Result<TmdbEpisode> {
        let url = self.url(&[
            "tv",
            tmdb_id,
            "season",
            &season.to_string(),
            "episode",
            &episode.to_string(),
        ]);
        let req = Request::new(Method::GET, url);
        Ok(self.client.request(req).await?)
    }

    /// Resolve the request id to a TMDB id, via `/find` for foreign id
    /// spaces.
    pub async fn resolve_id(&self, id: &ContentId, media: MediaType) -> anyhow::Result<String> {
        match id.kind {
            IdKind::Tmdb => Ok(id.value.clone()),
            IdKind::Imdb | IdKind::Tvdb => {
                let source = match id.kind {
                    IdKind::Imdb => "imdb_id",
                    _ => "tvdb_id",
                };
                let found = self.find_by_external_id(source, &id.value).await?;
                let tmdb_id = match media {
                    MediaType::Movie => found.movie_results.first().map(|r| r.id),
                    _ => found.tv_results.first().map(|r| r.id),
                };
                tmdb_id
                    .map(|i| i.to_string())
                    .ok_or_else(|| anyhow::anyhow!("tmdb find returned nothing for {id}"))
            }
            _ => anyhow::bail!("tmdb cannot resolve {} ids", id.kind.as_str()),
        }
    }
}

#[async_trait::async_trait]
impl TitleMetadataProvider for TmdbApi {
    async fn title_metadata(
        &self,
        id: &ContentId,
        media: MediaType,
    ) -> anyhow::Result<ProviderTitle> {
        let tmdb_id = self.resolve_id(id, media).await?;
        match media {
            MediaType::Movie => {
                let details = self.movie_details(&tmdb_id).await?;
                Ok(details.into())
            }
            MediaType::Series | MediaType::Anime => {
                let details = self.tv_details(&tmdb_id).await?;
                Ok(details.into())
            }
        }
    }

    fn provider_identifier(&self) -> &'static str {
        "tmdb"
    }
}

#[derive(Debug, Deserialize)]
pub struct TmdbFindResponse {
    #[serde(default)]
    pub movie_results: Vec<TmdbFindResult>,
    #[serde(default)]
    pub tv_results: Vec<TmdbFindResult>,
}

#[derive(Debug, Deserialize)]
pub struct TmdbFindResult {
    pub id: u64,
}

#[derive(Debug, Default, Deserialize)]
pub struct TmdbAlternativeTitles {
    #[serde(default, alias = "results")]
    pub titles: Vec<TmdbAlternativeTitle>,
}

#[derive(Debug, Deserialize)]
pub struct TmdbAlternativeTitle {
    pub title: String,
    pub iso_3166_1: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TmdbMovieDetails {
    pub title: String,
    pub original_title: Option<String>,
    pub original_language: Option<String>,
    pub release_date: Option<String>,
    pub runtime: Option<u32>,
    #[serde(default)]
    pub genres: Vec<TmdbGenre>,
    #[serde(default)]
    pub alternative_titles: TmdbAlternativeTitles,
}

#[derive(Debug, Deserialize)]
pub struct TmdbTvDetails {
    pub name: String,
    pub original_name: Option<String>,
    pub original_language: Option<String>,
    pub first_air_date: Option<String>,
    pub last_air_date: Option<String>,
    pub next_episode_to_air: Option<TmdbNextEpisode>,
    #[serde(default)]
    pub episode_run_time: Vec<u32>,
    #[serde(default)]
    pub seasons: Vec<TmdbSeason>,
    #[serde(default)]
    pub genres: Vec<TmdbGenre>,
    #[serde(default)]
    pub alternative_titles: TmdbAlternativeTitles,
}

#[derive(Debug, Deserialize)]
pub struct TmdbNextEpisode {
    pub air_date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TmdbSeason {
    pub season_number: u16,
    #[serde(default)]
    pub episode_count: u16,
}

#[derive(Debug, Deserialize)]
pub struct TmdbGenre {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct TmdbEpisode {
    pub air_date: Option<String>,
    pub runtime: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct TmdbReleaseDatesResponse {
    #[serde(default)]
    results: Vec<TmdbCountryReleases>,
}

#[derive(Debug, Deserialize)]
struct TmdbCountryReleases {
    #[serde(default)]
    release_dates: Vec<TmdbReleaseDate>,
}

#[derive(Debug, Deserialize)]
struct TmdbReleaseDate {
    /// 3 = theatrical, 4 = digital, 5 = physical, 6 = TV
    #[serde(rename = "type")]
    kind: u8,
    release_date: String,
}

/// Movie release windows, flattened across countries.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MovieReleaseDates {
    pub theatrical: Option<Date>,
    pub digital: Vec<Date>,
    pub physical: Vec<Date>,
    pub tv: Vec<Date>,
}

impl MovieReleaseDates {
    pub fn is_empty(&self) -> bool {
        self.theatrical.is_none()
            && self.digital.is_empty()
            && self.physical.is_empty()
            && self.tv.is_empty()
    }

    /// Earliest of digital/physical/TV windows.
    pub fn earliest_home_release(&self) -> Option<Date> {
        self.digital
            .iter()
            .chain(&self.physical)
            .chain(&self.tv)
            .min()
            .copied()
    }
}

impl From<TmdbReleaseDatesResponse> for MovieReleaseDates {
    fn from(response: TmdbReleaseDatesResponse) -> Self {
        let mut out = MovieReleaseDates::default();
        for country in response.results {
            for release in country.release_dates {
                let Some(date) = parse_date(&release.release_date) else {
                    continue;
                };
                match release.kind {
                    3 => {
                        out.theatrical = match out.theatrical {
                            Some(existing) => Some(existing.min(date)),
                            None => Some(date),
                        }
                    }
                    4 => out.digital.push(date),
                    5 => out.physical.push(date),
                    6 => out.tv.push(date),
                    _ => {}
                }
            }
        }
        out.digital.sort();
        out.physical.sort();
        out.tv.sort();
        out
    }
}

fn year_of(raw: &Option<String>) -> Option<u16> {
    raw.as_deref()
        .and_then(parse_date)
        .map(|d| d.year() as u16)
}

impl From<TmdbMovieDetails> for ProviderTitle {
    fn from(details: TmdbMovieDetails) -> Self {
        let mut aliases: Vec<TitleAlias> = Vec::new();
        if let Some(original) = &details.original_title {
            aliases.push(TitleAlias {
                title: original.clone(),
                language: details.original_language.clone(),
            });
        }
        aliases.extend(details.alternative_titles.titles.iter().map(|t| TitleAlias {
            title: t.title.clone(),
            language: t.iso_3166_1.as_ref().map(|c| c.to_lowercase()),
        }));
        ProviderTitle {
            primary: Some(details.title),
            aliases,
            year: year_of(&details.release_date),
            original_language: details.original_language,
            runtime_minutes: details.runtime,
            genres: details.genres.into_iter().map(|g| g.name).collect(),
            first_aired: details.release_date.as_deref().and_then(parse_date),
            ..Default::default()
        }
    }
}

impl From<TmdbTvDetails> for ProviderTitle {
    fn from(details: TmdbTvDetails) -> Self {
        let mut aliases: Vec<TitleAlias> = Vec::new();
        if let Some(original) = &details.original_name {
            aliases.push(TitleAlias {
                title: original.clone(),
                language: details.original_language.clone(),
            });
        }
        aliases.extend(details.alternative_titles.titles.iter().map(|t| TitleAlias {
            title: t.title.clone(),
            language: t.iso_3166_1.as_ref().map(|c| c.to_lowercase()),
        }));
        let seasons = details
            .seasons
            .iter()
            .map(|s| SeasonInfo {
                number: s.season_number,
                episode_count: s.episode_count,
            })
            .collect();
        ProviderTitle {
            primary: Some(details.name),
            aliases,
            year: year_of(&details.first_air_date),
            year_end: year_of(&details.last_air_date),
            original_language: details.original_language,
            seasons,
            runtime_minutes: details.episode_run_time.first().copied(),
            genres: details.genres.into_iter().map(|g| g.name).collect(),
            first_aired: details.first_air_date.as_deref().and_then(parse_date),
            last_aired: details.last_air_date.as_deref().and_then(parse_date),
            next_air: details
                .next_episode_to_air
                .and_then(|e| e.air_date.as_deref().and_then(parse_date)),
        }
    }
}
