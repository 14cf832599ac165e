use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, Method, Request, Url};
use serde::Deserialize;

use crate::content_id::{ContentId, IdKind, MediaType};
use crate::request_client::LimitedRequestClient;

use super::{ProviderTitle, TitleAlias, TitleMetadataProvider};

/// Trakt contributes multilingual aliases only.
#[derive(Debug)]
pub struct TraktApi {
    base_url: Url,
    client: LimitedRequestClient,
}

impl TraktApi {
    const API_URL: &'static str = "https://api.trakt.tv";

    pub fn new(client_id: String) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert("trakt-api-version", HeaderValue::from_static("2"));
        if let Ok(value) = HeaderValue::from_str(&client_id) {
            headers.insert("trakt-api-key", value);
        }
        let client = Client::builder()
            .default_headers(headers)
            .build()
            .expect("client to build");
        let limited_client = LimitedRequestClient::new(client, 10, Duration::from_secs(1));
        Self {
            base_url: Url::parse(Self::API_URL).expect("url to parse"),
            client: limited_client,
        }
    }

    pub async fn aliases(
        &self,
        media: MediaType,
        imdb_id: &str,
    ) -> anyhow::Result<Vec<TraktAlias>> {
        let kind = match media {
            MediaType::Movie => "movies",
            MediaType::Series | MediaType::Anime => "shows",
        };
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .expect("base url is not cannot-be-a-base")
            .extend([kind, imdb_id, "aliases"]);
        let req = Request::new(Method::GET, url);
        Ok(self.client.request(req).await?)
    }
}

#[async_trait::async_trait]
impl TitleMetadataProvider for TraktApi {
    async fn title_metadata(
        &self,
        id: &ContentId,
        media: MediaType,
    ) -> anyhow::Result<ProviderTitle> {
        if id.kind != IdKind::Imdb {
            anyhow::bail!("trakt alias lookup needs a tt id");
        }
        let aliases = self.aliases(media, &id.value).await?;
        Ok(ProviderTitle {
            aliases: aliases
                .into_iter()
                .map(|a| TitleAlias {
                    title: a.title,
                    language: a.country,
                })
                .collect(),
            ..Default::default()
        })
    }

    fn provider_identifier(&self) -> &'static str {
        "trakt"
    }
}

#[derive(Debug, Deserialize)]
pub struct TraktAlias {
    pub title: String,
    pub country: Option<String>,
}
