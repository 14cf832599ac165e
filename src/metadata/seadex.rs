use std::collections::HashSet;
use std::time::Duration;

use reqwest::{Client, Method, Request, Url};
use serde::{Deserialize, Serialize};

use crate::request_client::LimitedRequestClient;

/// Community-curated "best release" tags for an anime entry, keyed by its
/// AniList id. Feeds the `seadex()` selector and the file selector bonus.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BestReleases {
    pub best_hashes: HashSet<String>,
    pub all_hashes: HashSet<String>,
    pub best_groups: HashSet<String>,
    pub all_groups: HashSet<String>,
}

impl BestReleases {
    pub fn is_best_hash(&self, hash: &str) -> bool {
        self.best_hashes.contains(hash)
    }

    pub fn is_listed_hash(&self, hash: &str) -> bool {
        self.all_hashes.contains(hash)
    }

    pub fn is_empty(&self) -> bool {
        self.all_hashes.is_empty() && self.all_groups.is_empty()
    }
}

#[derive(Debug)]
pub struct SeadexApi {
    base_url: Url,
    client: LimitedRequestClient,
}

impl Default for SeadexApi {
    fn default() -> Self {
        Self::new()
    }
}

impl SeadexApi {
    const API_URL: &'static str = "https://releases.moe/api/collections/entries/records";

    pub fn new() -> Self {
        let client = Client::new();
        let limited_client = LimitedRequestClient::new(client, 5, Duration::from_secs(1));
        Self {
            base_url: Url::parse(Self::API_URL).expect("url to parse"),
            client: limited_client,
        }
    }

    pub async fn best_releases(&self, anilist_id: &str) -> anyhow::Result<BestReleases> {
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair("filter", &format!("alID={anilist_id}"))
            .append_pair("expand", "trs");
        let req = Request::new(Method::GET, url);
        let response: SeadexRecords = self.client.request(req).await?;
        Ok(collect_releases(response))
    }
}

fn collect_releases(records: SeadexRecords) -> BestReleases {
    let mut out = BestReleases::default();
    for item in records.items {
        for torrent in item.expand.trs {
            let hash = torrent.info_hash.to_lowercase();
            // entries without a public hash still contribute their group
            let has_hash = !hash.is_empty() && hash != "<redacted>";
            if has_hash {
                out.all_hashes.insert(hash.clone());
            }
            if !torrent.release_group.is_empty() {
                out.all_groups.insert(torrent.release_group.clone());
            }
            if torrent.is_best {
                if has_hash {
                    out.best_hashes.insert(hash);
                }
                if !torrent.release_group.is_empty() {
                    out.best_groups.insert(torrent.release_group);
                }
            }
        }
    }
    out
}

#[derive(Debug, Deserialize)]
struct SeadexRecords {
    #[serde(default)]
    items: Vec<SeadexEntry>,
}

#[derive(Debug, Deserialize)]
struct SeadexEntry {
    #[serde(default)]
    expand: SeadexExpand,
}

#[derive(Debug, Default, Deserialize)]
struct SeadexExpand {
    #[serde(default)]
    trs: Vec<SeadexTorrent>,
}

#[derive(Debug, Deserialize)]
struct SeadexTorrent {
    #[serde(rename = "infoHash", default)]
    info_hash: String,
    #[serde(rename = "releaseGroup", default)]
    release_group: String,
    #[serde(rename = "isBest", default)]
    is_best: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn best_and_all_sets_are_separate() {
        let records = SeadexRecords {
            items: vec![SeadexEntry {
                expand: SeadexExpand {
                    trs: vec![
                        SeadexTorrent {
                            info_hash: "AA11".into(),
                            release_group: "GroupA".into(),
                            is_best: true,
                        },
                        SeadexTorrent {
                            info_hash: "BB22".into(),
                            release_group: "GroupB".into(),
                            is_best: false,
                        },
                        SeadexTorrent {
                            info_hash: "<redacted>".into(),
                            release_group: "GroupC".into(),
                            is_best: true,
                        },
                    ],
                },
            }],
        };
        let releases = collect_releases(records);
        assert!(releases.is_best_hash("aa11"));
        assert!(!releases.is_best_hash("bb22"));
        assert!(releases.is_listed_hash("bb22"));
        assert!(releases.best_groups.contains("GroupC"));
        assert!(!releases.all_hashes.contains("<redacted>"));
    }
}
