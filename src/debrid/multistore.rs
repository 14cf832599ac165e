use std::time::Duration;

use dashmap::DashMap;
use reqwest::{Client, Method, Request, Url};
use serde::Deserialize;

use crate::cache::{LockOptions, CACHES, LOCKS};
use crate::request_client::LimitedRequestClient;

use super::selector::{self, SelectionContext};
use super::{
    AvailabilityResult, Capabilities, DebridDownload, DebridError, DebridFile, DebridService,
    DownloadStatus, NzbCheckItem, PlaybackRequest,
};

const CHECK_BATCH_SIZE: usize = 500;

#[derive(Debug, Clone)]
pub struct MultiStoreConfig {
    /// User-declared short code for this service instance.
    pub id: String,
    pub base_url: Url,
    pub api_key: String,
    pub library_cache_ttl: Duration,
    pub library_stale_threshold: Duration,
    pub availability_cache_ttl: Duration,
    pub resolve_error_cache_ttl: Duration,
    pub playback_link_validity: Duration,
    /// Clamped into [100, 500] per the backend contract.
    pub page_size: usize,
    pub page_limit: usize,
    pub max_wait: Duration,
    pub polling_interval: Duration,
}

impl MultiStoreConfig {
    /// Config with every TTL taken from the process-wide knobs.
    pub fn from_global_config(
        id: impl Into<String>,
        base_url: Url,
        api_key: impl Into<String>,
    ) -> Self {
        use crate::config::{self, CONFIG};
        Self {
            library_cache_ttl: Duration::from_secs(CONFIG.get_value::<config::LibraryCacheTtl>().0),
            library_stale_threshold: Duration::from_secs(
                CONFIG.get_value::<config::LibraryStaleThreshold>().0,
            ),
            availability_cache_ttl: Duration::from_secs(
                CONFIG.get_value::<config::AvailabilityCacheTtl>().0,
            ),
            resolve_error_cache_ttl: Duration::from_secs(
                CONFIG.get_value::<config::ResolveErrorCacheTtl>().0,
            ),
            playback_link_validity: Duration::from_secs(
                CONFIG.get_value::<config::PlaybackLinkValidity>().0,
            ),
            page_size: CONFIG.get_value::<config::LibraryPageSize>().0,
            page_limit: CONFIG.get_value::<config::LibraryPageLimit>().0,
            ..Self::new(id, base_url, api_key)
        }
    }

    pub fn new(id: impl Into<String>, base_url: Url, api_key: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            base_url,
            api_key: api_key.into(),
            library_cache_ttl: Duration::from_secs(300),
            library_stale_threshold: Duration::from_secs(60),
            availability_cache_ttl: Duration::from_secs(120),
            resolve_error_cache_ttl: Duration::from_secs(30),
            playback_link_validity: Duration::from_secs(600),
            page_size: 500,
            page_limit: 20,
            max_wait: Duration::from_secs(120),
            polling_interval: Duration::from_secs(3),
        }
    }
}

/// Adapter for the generic multi-store REST backend: magnets and newz behind
/// one credentialed API.
pub struct MultiStore {
    config: MultiStoreConfig,
    client: LimitedRequestClient,
    token_fingerprint: String,
    /// download URL → real info-hash, learned from add responses.
    known_hashes: DashMap<String, String>,
}

impl std::fmt::Debug for MultiStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiStore")
            .field("id", &self.config.id)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StoreRealm {
    Magnets,
    Newz,
}

impl StoreRealm {
    fn list_op(&self) -> &'static str {
        match self {
            StoreRealm::Magnets => "listMagnets",
            StoreRealm::Newz => "listNewz",
        }
    }

    fn get_op(&self) -> &'static str {
        match self {
            StoreRealm::Magnets => "getMagnet",
            StoreRealm::Newz => "getNewz",
        }
    }

    fn check_op(&self) -> &'static str {
        match self {
            StoreRealm::Magnets => "checkMagnet",
            StoreRealm::Newz => "checkNewz",
        }
    }

    fn add_op(&self) -> &'static str {
        match self {
            StoreRealm::Magnets => "addMagnet",
            StoreRealm::Newz => "addNewz",
        }
    }

    fn remove_op(&self) -> &'static str {
        match self {
            StoreRealm::Magnets => "removeMagnet",
            StoreRealm::Newz => "removeNewz",
        }
    }

    fn link_op(&self) -> &'static str {
        match self {
            StoreRealm::Magnets => "generateLink",
            StoreRealm::Newz => "generateNewzLink",
        }
    }

    fn cache_tag(&self) -> &'static str {
        match self {
            StoreRealm::Magnets => "magnets",
            StoreRealm::Newz => "newz",
        }
    }
}

impl MultiStore {
    const RATE_LIMIT: usize = 10;

    pub fn new(config: MultiStoreConfig) -> Self {
        let client = Client::new();
        let limited_client =
            LimitedRequestClient::new(client, Self::RATE_LIMIT, Duration::from_secs(1));
        let token_fingerprint = format!("{:x}", md5::compute(config.api_key.as_bytes()));
        Self {
            config,
            client: limited_client,
            token_fingerprint,
            known_hashes: DashMap::new(),
        }
    }

    fn url(&self, op: &str) -> Url {
        let mut url = self.config.base_url.clone();
        url.path_segments_mut()
            .expect("base url is not cannot-be-a-base")
            .push(op);
        url
    }

    fn authed(&self, mut req: Request) -> Request {
        if let Ok(value) = reqwest::header::HeaderValue::from_str(&self.config.api_key) {
            req.headers_mut().insert("x-api-key", value);
        }
        req
    }

    async fn api_get<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T, DebridError> {
        let req = self.authed(Request::new(Method::GET, url));
        let envelope: ApiEnvelope<T> = self.client.request(req).await?;
        envelope.into_result()
    }

    async fn api_post<T: serde::de::DeserializeOwned>(
        &self,
        url: Url,
        body: serde_json::Value,
    ) -> Result<T, DebridError> {
        let mut req = self.authed(Request::new(Method::POST, url));
        req.headers_mut().insert(
            reqwest::header::CONTENT_TYPE,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        *req.body_mut() = Some(
            serde_json::to_vec(&body)
                .map_err(|e| DebridError::bad_request(e.to_string()))?
                .into(),
        );
        let envelope: ApiEnvelope<T> = self.client.request(req).await?;
        envelope.into_result()
    }

    fn library_cache_key(&self, realm: StoreRealm) -> String {
        format!(
            "library:{}:{}:{}",
            realm.cache_tag(),
            self.config.id,
            self.token_fingerprint
        )
    }

    /// Paginated listing; the loop stops when the server returns fewer rows
    /// than asked or the page cap is reached.
    async fn fetch_library(&self, realm: StoreRealm) -> Result<Vec<DebridDownload>, DebridError> {
        let limit = self.config.page_size.clamp(100, 500);
        let mut offset = 0usize;
        let mut out = Vec::new();
        for _page in 0..self.config.page_limit.max(1) {
            let mut url = self.url(realm.list_op());
            url.query_pairs_mut()
                .append_pair("limit", &limit.to_string())
                .append_pair("offset", &offset.to_string());
            let page: StoreListPage = self.api_get(url).await?;
            let row_count = page.items.len();
            out.extend(page.items.into_iter().map(StoreItem::into_download));
            if row_count < limit || page.total_items.is_some_and(|t| out.len() >= t) {
                break;
            }
            offset += row_count;
        }
        Ok(out)
    }

    /// Stale-while-revalidate library read. A stale hit is served as-is and a
    /// background refresh is kicked under a separate lock key so readers never
    /// queue behind the refresh.
    async fn library(&self, realm: StoreRealm) -> Result<Vec<DebridDownload>, DebridError> {
        let key = self.library_cache_key(realm);
        if let Some(items) = CACHES.library.get::<Vec<DebridDownload>>(&key) {
            if CACHES
                .library
                .is_stale(&key, self.config.library_stale_threshold)
            {
                self.spawn_library_refresh(realm);
            }
            return Ok(items);
        }

        let items = self.fetch_library(realm).await?;
        CACHES.library.set_with_stale(
            key,
            &items,
            self.config.library_cache_ttl,
            self.config.library_stale_threshold,
        );
        Ok(items)
    }

    fn spawn_library_refresh(&self, realm: StoreRealm) {
        let this = self.clone_for_task();
        tokio::spawn(async move {
            let refresh_lock = format!("{}:refresh", this.library_cache_key(realm));
            let opts = LockOptions {
                timeout: Duration::from_millis(1),
                ttl: Duration::from_secs(60),
                retry_interval: Duration::from_millis(50),
            };
            // timeout ~0: somebody else refreshing means we simply skip
            let outcome = LOCKS
                .with_lock(&refresh_lock, opts, || async {
                    match this.fetch_library(realm).await {
                        Ok(items) => {
                            CACHES.library.set_with_stale(
                                this.library_cache_key(realm),
                                &items,
                                this.config.library_cache_ttl,
                                this.config.library_stale_threshold,
                            );
                        }
                        Err(e) => {
                            tracing::warn!(service = this.config.id, "Library refresh failed: {e}")
                        }
                    }
                })
                .await;
            if outcome.is_err() {
                tracing::trace!(service = this.config.id, "Library refresh already running");
            }
        });
    }

    fn clone_for_task(&self) -> Self {
        Self {
            config: self.config.clone(),
            client: self.client.clone(),
            token_fingerprint: self.token_fingerprint.clone(),
            known_hashes: DashMap::new(),
        }
    }

    async fn check(
        &self,
        realm: StoreRealm,
        hashes: &[String],
        check_owned: bool,
    ) -> Result<Vec<AvailabilityResult>, DebridError> {
        let library = if check_owned {
            self.library(realm).await.unwrap_or_else(|e| {
                tracing::warn!(service = self.config.id, "Library listing failed: {e}");
                Vec::new()
            })
        } else {
            Vec::new()
        };

        let mut results = Vec::with_capacity(hashes.len());
        for batch in hashes.chunks(CHECK_BATCH_SIZE) {
            let cache_prefix = format!("check:{}:{}", realm.cache_tag(), self.config.id);
            let mut misses = Vec::new();
            let mut batch_results: Vec<Option<AvailabilityResult>> = Vec::new();
            for hash in batch {
                let key = format!("{cache_prefix}:{hash}");
                match CACHES.availability.get::<AvailabilityResult>(&key) {
                    Some(hit) => batch_results.push(Some(hit)),
                    None => {
                        misses.push(hash.clone());
                        batch_results.push(None);
                    }
                }
            }

            if !misses.is_empty() {
                let mut url = self.url(realm.check_op());
                url.query_pairs_mut()
                    .append_pair("hashes", &misses.join(","));
                let response: StoreCheckResponse = self.api_get(url).await?;
                let mut fetched: std::collections::HashMap<String, AvailabilityResult> = response
                    .items
                    .into_iter()
                    .map(|item| {
                        let hash = item.hash.to_lowercase();
                        (
                            hash.clone(),
                            AvailabilityResult {
                                hash,
                                status: item.status_enum(),
                                library: false,
                                files: item
                                    .files
                                    .into_iter()
                                    .map(StoreFile::into_file)
                                    .collect(),
                            },
                        )
                    })
                    .collect();
                for (slot, hash) in batch_results.iter_mut().zip(batch).filter(|(s, _)| s.is_none())
                {
                    let result = fetched.remove(&hash.to_lowercase()).unwrap_or_else(|| {
                        AvailabilityResult {
                            hash: hash.to_lowercase(),
                            status: DownloadStatus::Unknown,
                            library: false,
                            files: Vec::new(),
                        }
                    });
                    let key = format!("{cache_prefix}:{}", result.hash);
                    CACHES
                        .availability
                        .set(key, &result, self.config.availability_cache_ttl);
                    *slot = Some(result);
                }
            }

            results.extend(batch_results.into_iter().flatten());
        }

        if check_owned {
            for result in &mut results {
                let owned = library
                    .iter()
                    .find(|item| item.hash.as_deref() == Some(result.hash.as_str()));
                if let Some(item) = owned {
                    // library wins for the flag; a known-failed item downgrades
                    result.library = true;
                    if item.status.is_terminal_negative() {
                        result.status = DownloadStatus::Failed;
                    } else if !result.status.is_ready() {
                        result.status = item.status;
                    }
                    if result.files.is_empty() {
                        result.files = item.files.clone();
                    }
                }
            }
        }
        Ok(results)
    }

    async fn generate_link(
        &self,
        realm: StoreRealm,
        link: &str,
        client_ip: Option<&str>,
    ) -> Result<String, DebridError> {
        let url = self.url(realm.link_op());
        let mut body = serde_json::json!({ "link": link });
        if let Some(ip) = client_ip {
            body["clientIp"] = serde_json::Value::String(ip.to_owned());
        }
        let response: StoreLink = self.api_post(url, body).await?;
        Ok(response.url)
    }

    async fn add(&self, realm: StoreRealm, body: serde_json::Value) -> Result<DebridDownload, DebridError> {
        let url = self.url(realm.add_op());
        let item: StoreItem = self.api_post(url, body).await?;
        Ok(item.into_download())
    }

    /// Find the download for this request: an owned library item first, then
    /// registration (idempotent when the backend already caches the hash).
    async fn obtain(
        &self,
        realm: StoreRealm,
        request: &PlaybackRequest,
    ) -> Result<DebridDownload, DebridError> {
        let library = self.library(realm).await.unwrap_or_default();
        if let Some(item) = library
            .iter()
            .find(|item| item.hash.as_deref() == Some(request.hash.as_str()))
        {
            return self.get(realm, &item.id).await;
        }
        match realm {
            StoreRealm::Magnets => {
                if let Some(magnet) = &request.magnet {
                    self.add(realm, serde_json::json!({ "magnet": magnet })).await
                } else if let Some(url) = &request.download_url {
                    let download = self
                        .add(realm, serde_json::json!({ "torrent": url }))
                        .await?;
                    if let Some(hash) = &download.hash {
                        self.known_hashes.insert(url.clone(), hash.clone());
                    }
                    Ok(download)
                } else {
                    let magnet = format!("magnet:?xt=urn:btih:{}", request.hash);
                    self.add(realm, serde_json::json!({ "magnet": magnet })).await
                }
            }
            StoreRealm::Newz => {
                let link = request
                    .nzb_url
                    .as_deref()
                    .ok_or_else(|| DebridError::bad_request("nzb url missing"))?;
                self.add(realm, serde_json::json!({ "link": link })).await
            }
        }
    }

    async fn get(&self, realm: StoreRealm, id: &str) -> Result<DebridDownload, DebridError> {
        let mut url = self.url(realm.get_op());
        url.query_pairs_mut().append_pair("id", id);
        let item: StoreItem = self.api_get(url).await?;
        Ok(item.into_download())
    }

    async fn remove(&self, realm: StoreRealm, id: &str) -> Result<(), DebridError> {
        let mut url = self.url(realm.remove_op());
        url.query_pairs_mut().append_pair("id", id);
        let _: serde_json::Value = self.api_get(url).await?;
        Ok(())
    }

    async fn resolve_realm(
        &self,
        realm: StoreRealm,
        request: &PlaybackRequest,
    ) -> Result<Option<String>, DebridError> {
        let lock_key = request.lock_key(&self.config.id, &self.token_fingerprint);
        let negative_key = format!("negative:{lock_key}");

        if let Some(url) = CACHES.get_playback_link(&lock_key, self.config.playback_link_validity)
        {
            return Ok(Some(url));
        }
        if CACHES.resolve.get::<bool>(&negative_key).is_some() {
            return Ok(None);
        }

        let opts = LockOptions {
            timeout: if request.cache_and_play {
                self.config.max_wait
            } else {
                Duration::from_secs(30)
            },
            ttl: self.config.max_wait + Duration::from_secs(30),
            retry_interval: Duration::from_millis(250),
        };
        let resolved: Result<Result<Option<String>, DebridError>, _> = LOCKS
            .with_lock(&lock_key, opts, || async {
                // the first caller may have produced the link already
                if let Some(url) =
                    CACHES.get_playback_link(&lock_key, self.config.playback_link_validity)
                {
                    return Ok(Some(url));
                }

                let mut download = self.obtain(realm, request).await?;

                if !download.status.is_ready() {
                    if download.status.is_terminal_negative() {
                        return Err(DebridError::unknown(format!(
                            "download is in terminal state {:?}",
                            download.status
                        )));
                    }
                    if !request.cache_and_play {
                        CACHES.resolve.set(
                            negative_key.clone(),
                            &true,
                            self.config.resolve_error_cache_ttl,
                        );
                        return Ok(None);
                    }
                    download = self.wait_until_ready(realm, download).await?;
                }

                let ctx = SelectionContext {
                    metadata: request.metadata.as_ref(),
                    season: request.season,
                    episode: request.episode,
                    season_year: None,
                    chosen_index: request.chosen_index,
                    chosen_filename: request.chosen_filename.clone(),
                    skip_season_episode_check: request.skip_season_episode_check,
                };
                let Some((file, _)) = selector::select_file(&download.files, &ctx)
                    .await
                    .selected()
                else {
                    tracing::debug!(
                        service = self.config.id,
                        hash = request.hash,
                        "No matching file inside download"
                    );
                    return Ok(None);
                };
                let link = file
                    .link
                    .as_deref()
                    .ok_or_else(|| DebridError::no_matching_file("selected file has no link"))?;
                let url = self
                    .generate_link(realm, link, request.client_ip.as_deref())
                    .await?;
                CACHES.put_playback_link(lock_key.clone(), url.clone());

                if request.auto_remove {
                    if let Err(e) = self.remove(realm, &download.id).await {
                        tracing::warn!(service = self.config.id, "Auto-remove failed: {e}");
                    }
                }
                Ok(Some(url))
            })
            .await;
        match resolved {
            Ok(inner) => inner,
            Err(lock_err) => Err(DebridError::from(lock_err)),
        }
    }

    async fn wait_until_ready(
        &self,
        realm: StoreRealm,
        mut download: DebridDownload,
    ) -> Result<DebridDownload, DebridError> {
        let deadline = tokio::time::Instant::now() + self.config.max_wait;
        loop {
            if download.status.is_ready() {
                return Ok(download);
            }
            if download.status.is_terminal_negative() {
                return Err(DebridError::unknown(format!(
                    "download is in terminal state {:?}",
                    download.status
                )));
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(DebridError::unknown("timed out waiting for download"));
            }
            tokio::time::sleep(self.config.polling_interval).await;
            download = self.get(realm, &download.id).await?;
        }
    }
}

#[async_trait::async_trait]
impl DebridService for MultiStore {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_torrents: true,
            supports_usenet: true,
        }
    }

    fn known_hash_for_url(&self, download_url: &str) -> Option<String> {
        self.known_hashes.get(download_url).map(|h| h.clone())
    }

    async fn list_magnets(&self) -> Result<Vec<DebridDownload>, DebridError> {
        self.library(StoreRealm::Magnets).await
    }

    async fn list_nzbs(&self) -> Result<Vec<DebridDownload>, DebridError> {
        self.library(StoreRealm::Newz).await
    }

    async fn check_magnets(
        &self,
        hashes: &[String],
        _stremio_id: Option<&str>,
        check_owned: bool,
    ) -> Result<Vec<AvailabilityResult>, DebridError> {
        self.check(StoreRealm::Magnets, hashes, check_owned).await
    }

    async fn check_nzbs(
        &self,
        items: &[NzbCheckItem],
        check_owned: bool,
    ) -> Result<Vec<AvailabilityResult>, DebridError> {
        let hashes: Vec<String> = items.iter().filter_map(|i| i.hash.clone()).collect();
        let mut results = self.check(StoreRealm::Newz, &hashes, check_owned).await?;

        // the backend may not know the hash yet; an owned item with the same
        // name still counts as library-cached
        if check_owned && results.iter().any(|r| !r.status.is_ready()) {
            let library = self.library(StoreRealm::Newz).await.unwrap_or_default();
            for result in results.iter_mut().filter(|r| !r.status.is_ready()) {
                let name = items
                    .iter()
                    .find(|i| i.hash.as_deref() == Some(result.hash.as_str()))
                    .and_then(|i| i.name.as_deref());
                let Some(name) = name else { continue };
                if let Some(owned) = library.iter().find(|d| d.name.as_deref() == Some(name)) {
                    result.library = true;
                    result.status = if owned.status.is_terminal_negative() {
                        DownloadStatus::Failed
                    } else {
                        DownloadStatus::Cached
                    };
                    if result.files.is_empty() {
                        result.files = owned.files.clone();
                    }
                }
            }
        }
        Ok(results)
    }

    async fn add_magnet(&self, magnet: &str) -> Result<DebridDownload, DebridError> {
        self.add(StoreRealm::Magnets, serde_json::json!({ "magnet": magnet }))
            .await
    }

    async fn add_torrent(&self, download_url: &str) -> Result<DebridDownload, DebridError> {
        let download = self
            .add(
                StoreRealm::Magnets,
                serde_json::json!({ "torrent": download_url }),
            )
            .await?;
        if let Some(hash) = &download.hash {
            self.known_hashes
                .insert(download_url.to_owned(), hash.clone());
        }
        Ok(download)
    }

    async fn add_nzb(&self, url: &str, _name: &str) -> Result<DebridDownload, DebridError> {
        self.add(StoreRealm::Newz, serde_json::json!({ "link": url }))
            .await
    }

    async fn resolve(&self, request: &PlaybackRequest) -> Result<Option<String>, DebridError> {
        let realm = if request.nzb_url.is_some() {
            StoreRealm::Newz
        } else {
            StoreRealm::Magnets
        };
        self.resolve_realm(realm, request).await
    }

    async fn remove_magnet(&self, id: &str) -> Result<(), DebridError> {
        self.remove(StoreRealm::Magnets, id).await
    }

    async fn remove_nzb(&self, id: &str) -> Result<(), DebridError> {
        self.remove(StoreRealm::Newz, id).await
    }

    async fn refresh_library_cache(&self) -> Result<(), DebridError> {
        for realm in [StoreRealm::Magnets, StoreRealm::Newz] {
            let items = self.fetch_library(realm).await?;
            CACHES.library.set_with_stale(
                self.library_cache_key(realm),
                &items,
                self.config.library_cache_ttl,
                self.config.library_stale_threshold,
            );
        }
        Ok(())
    }

    async fn get_magnet(&self, id: &str) -> Result<DebridDownload, DebridError> {
        self.get(StoreRealm::Magnets, id).await
    }

    async fn get_nzb(&self, id: &str) -> Result<DebridDownload, DebridError> {
        self.get(StoreRealm::Newz, id).await
    }
}

// --- wire types ---

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    #[serde(default)]
    success: Option<bool>,
    data: Option<T>,
    error: Option<String>,
}

impl<T> ApiEnvelope<T> {
    fn into_result(self) -> Result<T, DebridError> {
        if self.success == Some(false) {
            return Err(DebridError::bad_request(
                self.error.unwrap_or_else(|| "backend reported failure".into()),
            ));
        }
        self.data
            .ok_or_else(|| DebridError::bad_request("backend response had no data"))
    }
}

#[derive(Debug, Deserialize)]
struct StoreListPage {
    #[serde(default)]
    items: Vec<StoreItem>,
    total_items: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct StoreItem {
    id: serde_json::Value,
    hash: Option<String>,
    name: Option<String>,
    status: Option<String>,
    size: Option<u64>,
    #[serde(default)]
    files: Vec<StoreFile>,
}

impl StoreItem {
    fn into_download(self) -> DebridDownload {
        let id = match &self.id {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        DebridDownload {
            id,
            hash: self.hash.map(|h| h.to_lowercase()),
            name: self.name,
            status: parse_status(self.status.as_deref()),
            size: self.size,
            files: self.files.into_iter().map(StoreFile::into_file).collect(),
            library: true,
            added_at: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct StoreFile {
    #[serde(default)]
    index: i32,
    name: Option<String>,
    #[serde(default)]
    size: u64,
    path: Option<String>,
    link: Option<String>,
    mimetype: Option<String>,
}

impl StoreFile {
    fn into_file(self) -> DebridFile {
        DebridFile {
            index: self.index,
            name: self.name,
            size: self.size,
            path: self.path,
            link: self.link,
            mime_type: self.mimetype,
        }
    }
}

#[derive(Debug, Deserialize)]
struct StoreCheckResponse {
    #[serde(default)]
    items: Vec<StoreCheckItem>,
}

#[derive(Debug, Deserialize)]
struct StoreCheckItem {
    hash: String,
    status: Option<String>,
    #[serde(default)]
    files: Vec<StoreFile>,
}

impl StoreCheckItem {
    fn status_enum(&self) -> DownloadStatus {
        parse_status(self.status.as_deref())
    }
}

#[derive(Debug, Deserialize)]
struct StoreLink {
    url: String,
}

fn parse_status(raw: Option<&str>) -> DownloadStatus {
    match raw.map(str::to_ascii_lowercase).as_deref() {
        Some("cached") => DownloadStatus::Cached,
        Some("downloaded") | Some("completed") | Some("ready") => DownloadStatus::Downloaded,
        Some("downloading") | Some("active") => DownloadStatus::Downloading,
        Some("queued") | Some("waiting") => DownloadStatus::Queued,
        Some("uploading") => DownloadStatus::Uploading,
        Some("processing") | Some("compressing") => DownloadStatus::Processing,
        Some("failed") | Some("error") => DownloadStatus::Failed,
        Some("invalid") | Some("dead") => DownloadStatus::Invalid,
        _ => DownloadStatus::Unknown,
    }
}
