use std::time::Duration;

use reqwest::{Client, Method, Request, Url};
use serde::Deserialize;
use tokio::sync::OnceCell;

use crate::content_id::{ContentId, IdKind, MediaType};
use crate::request_client::LimitedRequestClient;

use super::tmdb::parse_date;
use super::{ProviderTitle, TitleAlias, TitleMetadataProvider};

#[derive(Debug)]
pub struct TvdbApi {
    api_key: String,
    base_url: Url,
    client: LimitedRequestClient,
    token: OnceCell<String>,
}

impl TvdbApi {
    const API_URL: &'static str = "https://api4.thetvdb.com/v4";

    pub fn new(api_key: String) -> Self {
        let client = Client::new();
        let limited_client = LimitedRequestClient::new(client, 10, Duration::from_secs(1));
        Self {
            api_key,
            base_url: Url::parse(Self::API_URL).expect("url to parse"),
            client: limited_client,
            token: OnceCell::new(),
        }
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .expect("base url is not cannot-be-a-base")
            .extend(segments);
        url
    }

    async fn token(&self) -> anyhow::Result<&str> {
        self.token
            .get_or_try_init(|| async {
                let url = self.url(&["login"]);
                let body = serde_json::json!({ "apikey": self.api_key });
                let mut req = Request::new(Method::POST, url);
                req.headers_mut().insert(
                    reqwest::header::CONTENT_TYPE,
                    reqwest::header::HeaderValue::from_static("application/json"),
                );
                *req.body_mut() = Some(serde_json::to_vec(&body)?.into());
                let response: TvdbResponse<TvdbLogin> = self.client.request(req).await?;
                Ok::<_, anyhow::Error>(response.data.token)
            })
            .await
            .map(String::as_str)
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, url: Url) -> anyhow::Result<T> {
        let token = self.token().await?;
        let mut req = Request::new(Method::GET, url);
        req.headers_mut().insert(
            reqwest::header::AUTHORIZATION,
            reqwest::header::HeaderValue::from_str(&format!("Bearer {token}"))?,
        );
        Ok(self.client.request(req).await?)
    }

    async fn resolve_id(&self, id: &ContentId) -> anyhow::Result<u64> {
        match id.kind {
            IdKind::Tvdb => Ok(id.value.parse()?),
            IdKind::Imdb => {
                let url = self.url(&["search", "remoteid", &id.value]);
                let response: TvdbResponse<Vec<TvdbRemoteSearchResult>> = self.get(url).await?;
                response
                    .data
                    .into_iter()
                    .find_map(|r| r.series.map(|s| s.id).or(r.movie.map(|m| m.id)))
                    .ok_or_else(|| anyhow::anyhow!("tvdb remoteid search found nothing for {id}"))
            }
            _ => anyhow::bail!("tvdb cannot resolve {} ids", id.kind.as_str()),
        }
    }

    pub async fn series_extended(&self, tvdb_id: u64) -> anyhow::Result<TvdbSeriesExtended> {
        let url = self.url(&["series", &tvdb_id.to_string(), "extended"]);
        let response: TvdbResponse<TvdbSeriesExtended> = self.get(url).await?;
        Ok(response.data)
    }

    pub async fn movie_extended(&self, tvdb_id: u64) -> anyhow::Result<TvdbMovieExtended> {
        let url = self.url(&["movies", &tvdb_id.to_string(), "extended"]);
        let response: TvdbResponse<TvdbMovieExtended> = self.get(url).await?;
        Ok(response.data)
    }
}

#[async_trait::async_trait]
impl TitleMetadataProvider for TvdbApi {
    async fn title_metadata(
        &self,
        id: &ContentId,
        media: MediaType,
    ) -> anyhow::Result<ProviderTitle> {
        let tvdb_id = self.resolve_id(id).await?;
        match media {
            MediaType::Movie => {
                let movie = self.movie_extended(tvdb_id).await?;
                Ok(movie.into())
            }
            MediaType::Series | MediaType::Anime => {
                let series = self.series_extended(tvdb_id).await?;
                Ok(series.into())
            }
        }
    }

    fn provider_identifier(&self) -> &'static str {
        "tvdb"
    }
}

#[derive(Debug, Deserialize)]
struct TvdbResponse<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct TvdbLogin {
    token: String,
}

#[derive(Debug, Deserialize)]
struct TvdbRemoteSearchResult {
    series: Option<TvdbIdOnly>,
    movie: Option<TvdbIdOnly>,
}

#[derive(Debug, Deserialize)]
struct TvdbIdOnly {
    id: u64,
}

#[derive(Debug, Deserialize)]
pub struct TvdbAlias {
    pub name: String,
    pub language: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TvdbSeriesExtended {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<TvdbAlias>,
    pub first_aired: Option<String>,
    pub last_aired: Option<String>,
    pub next_aired: Option<String>,
    pub average_runtime: Option<u32>,
    #[serde(default)]
    pub genres: Vec<TvdbGenre>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TvdbMovieExtended {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<TvdbAlias>,
    pub year: Option<String>,
    pub runtime: Option<u32>,
    #[serde(default)]
    pub genres: Vec<TvdbGenre>,
}

#[derive(Debug, Deserialize)]
pub struct TvdbGenre {
    pub name: String,
}

fn aliases_of(aliases: &[TvdbAlias]) -> Vec<TitleAlias> {
    aliases
        .iter()
        .map(|a| TitleAlias {
            title: a.name.clone(),
            language: a.language.clone(),
        })
        .collect()
}

impl From<TvdbSeriesExtended> for ProviderTitle {
    fn from(series: TvdbSeriesExtended) -> Self {
        let first_aired = series.first_aired.as_deref().and_then(parse_date);
        let last_aired = series.last_aired.as_deref().and_then(parse_date);
        // an ended series gets its year span closed by the last air date
        let year_end = match series.next_aired.as_deref() {
            None | Some("") => last_aired.map(|d| d.year() as u16),
            Some(_) => None,
        };
        ProviderTitle {
            primary: Some(series.name.clone()),
            aliases: aliases_of(&series.aliases),
            year: first_aired.map(|d| d.year() as u16),
            year_end,
            runtime_minutes: series.average_runtime,
            genres: series.genres.into_iter().map(|g| g.name).collect(),
            first_aired,
            last_aired,
            next_air: series.next_aired.as_deref().and_then(parse_date),
            ..Default::default()
        }
    }
}

impl From<TvdbMovieExtended> for ProviderTitle {
    fn from(movie: TvdbMovieExtended) -> Self {
        ProviderTitle {
            primary: Some(movie.name.clone()),
            aliases: aliases_of(&movie.aliases),
            year: movie.year.as_deref().and_then(|y| y.parse().ok()),
            runtime_minutes: movie.runtime,
            genres: movie.genres.into_iter().map(|g| g.name).collect(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ended_series_closes_year_span() {
        let series = TvdbSeriesExtended {
            name: "Dark".into(),
            aliases: vec![],
            first_aired: Some("2017-12-01".into()),
            last_aired: Some("2020-06-27".into()),
            next_aired: Some("".into()),
            average_runtime: Some(53),
            genres: vec![],
        };
        let title: ProviderTitle = series.into();
        assert_eq!(title.year, Some(2017));
        assert_eq!(title.year_end, Some(2020));
    }

    #[test]
    fn running_series_leaves_year_open() {
        let series = TvdbSeriesExtended {
            name: "Show".into(),
            aliases: vec![],
            first_aired: Some("2022-01-01".into()),
            last_aired: Some("2024-05-01".into()),
            next_aired: Some("2025-01-01".into()),
            average_runtime: None,
            genres: vec![],
        };
        let title: ProviderTitle = series.into();
        assert_eq!(title.year_end, None);
        assert!(title.next_air.is_some());
    }
}
