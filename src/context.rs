use std::sync::{Arc, Mutex};

use time::Date;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::content_id::{ContentId, IdKind, MediaType};
use crate::metadata::seadex::{BestReleases, SeadexApi};
use crate::metadata::tmdb::{MovieReleaseDates, TmdbApi};
use crate::metadata::{MetadataService, TitleMetadata};

/// Air date and runtime of the requested episode.
#[derive(Debug, Clone, Copy, Default)]
pub struct EpisodeFacts {
    pub air_date: Option<Date>,
    pub runtime: Option<u32>,
}

/// One expensive fact, fetched at most once. `start` spawns the fetch
/// without blocking; `get` joins it, memoised for every later caller.
struct LazyFetch<T> {
    handle: Mutex<Option<JoinHandle<Option<T>>>>,
    value: OnceCell<Option<T>>,
}

impl<T: Clone + Send + 'static> LazyFetch<T> {
    fn new() -> Self {
        Self {
            handle: Mutex::new(None),
            value: OnceCell::new(),
        }
    }

    fn start<F>(&self, cancel: &CancellationToken, fut: F)
    where
        F: std::future::Future<Output = Option<T>> + Send + 'static,
    {
        let mut handle = self.handle.lock().unwrap();
        if handle.is_some() || self.value.initialized() {
            return;
        }
        let cancel = cancel.clone();
        *handle = Some(tokio::spawn(async move {
            tokio::select! {
                value = fut => value,
                _ = cancel.cancelled() => None,
            }
        }));
    }

    async fn get<F>(&self, cancel: &CancellationToken, fut: F) -> Option<T>
    where
        F: std::future::Future<Output = Option<T>> + Send + 'static,
    {
        self.start(cancel, fut);
        self.value
            .get_or_init(|| async {
                let handle = self.handle.lock().unwrap().take();
                match handle {
                    Some(handle) => handle.await.ok().flatten(),
                    None => None,
                }
            })
            .await
            .clone()
    }

    /// Whatever has completed so far, without waiting.
    fn peek(&self) -> Option<T> {
        self.value.get().cloned().flatten()
    }
}

/// Which lazy fetches this request is interested in; derived from the user
/// configuration before the context is built.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextOptions {
    pub digital_release_filter: bool,
    pub metadata_bitrate: bool,
    pub best_release_tags: bool,
}

/// Metadata-aware request context: lazily and concurrently gathers titles,
/// release dates, per-episode details and best-release tags for one request.
/// Constructed synchronously; all fetches run in parallel with candidate
/// fetching.
pub struct RequestContext {
    pub content_id: ContentId,
    pub media: MediaType,
    options: ContextOptions,
    cancel: CancellationToken,

    metadata_service: Arc<MetadataService>,
    tmdb: Option<Arc<TmdbApi>>,
    seadex: Option<Arc<SeadexApi>>,

    metadata: LazyFetch<Result<TitleMetadata, String>>,
    release_dates: LazyFetch<MovieReleaseDates>,
    episode_details: LazyFetch<EpisodeFacts>,
    best_release: LazyFetch<BestReleases>,
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("content_id", &self.content_id)
            .field("media", &self.media)
            .finish()
    }
}

impl RequestContext {
    pub fn new(
        content_id: ContentId,
        media: MediaType,
        options: ContextOptions,
        metadata_service: Arc<MetadataService>,
        tmdb: Option<Arc<TmdbApi>>,
        seadex: Option<Arc<SeadexApi>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            content_id,
            media,
            options,
            cancel,
            metadata_service,
            tmdb,
            seadex,
            metadata: LazyFetch::new(),
            release_dates: LazyFetch::new(),
            episode_details: LazyFetch::new(),
            best_release: LazyFetch::new(),
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    fn metadata_future(
        &self,
    ) -> impl std::future::Future<Output = Option<Result<TitleMetadata, String>>> + Send + 'static
    {
        let service = self.metadata_service.clone();
        let id = self.content_id.clone();
        let media = self.media;
        async move {
            match service.get_metadata(&id, media).await {
                Ok(metadata) => Some(Ok(metadata)),
                Err(e) => Some(Err(e.to_string())),
            }
        }
    }

    pub fn start_metadata_fetch(&self) {
        self.metadata.start(&self.cancel, self.metadata_future());
    }

    pub async fn get_metadata(&self) -> Option<TitleMetadata> {
        match self.metadata.get(&self.cancel, self.metadata_future()).await {
            Some(Ok(metadata)) => Some(metadata),
            Some(Err(e)) => {
                tracing::debug!(id = %self.content_id, "Metadata unavailable: {e}");
                None
            }
            None => None,
        }
    }

    /// Metadata error message, when the fetch completed with one.
    pub fn metadata_error(&self) -> Option<String> {
        match self.metadata.peek() {
            Some(Err(e)) => Some(e),
            _ => None,
        }
    }

    fn release_dates_future(
        &self,
    ) -> impl std::future::Future<Output = Option<MovieReleaseDates>> + Send + 'static {
        let tmdb = self.tmdb.clone();
        let id = self.content_id.clone();
        let media = self.media;
        async move {
            let tmdb = tmdb?;
            let tmdb_id = tmdb.resolve_id(&id, media).await.ok()?;
            match tmdb.movie_release_dates(&tmdb_id).await {
                Ok(dates) => Some(dates),
                Err(e) => {
                    tracing::debug!("Release date lookup failed: {e:#}");
                    None
                }
            }
        }
    }

    /// Release dates matter only for movies with the digital-release filter
    /// on.
    pub fn start_release_dates_fetch(&self) {
        if self.media != MediaType::Movie || !self.options.digital_release_filter {
            return;
        }
        self.release_dates
            .start(&self.cancel, self.release_dates_future());
    }

    pub async fn get_release_dates(&self) -> Option<MovieReleaseDates> {
        if self.media != MediaType::Movie || !self.options.digital_release_filter {
            return None;
        }
        self.release_dates
            .get(&self.cancel, self.release_dates_future())
            .await
    }

    fn episode_details_future(
        &self,
    ) -> impl std::future::Future<Output = Option<EpisodeFacts>> + Send + 'static {
        let tmdb = self.tmdb.clone();
        let id = self.content_id.clone();
        let media = self.media;
        async move {
            let tmdb = tmdb?;
            let (season, episode) = (id.season?, id.episode?);
            let tmdb_id = tmdb.resolve_id(&id, media).await.ok()?;
            match tmdb.tv_episode(&tmdb_id, season, episode).await {
                Ok(details) => Some(EpisodeFacts {
                    air_date: details
                        .air_date
                        .as_deref()
                        .and_then(crate::metadata::tmdb::parse_date),
                    runtime: details.runtime,
                }),
                Err(e) => {
                    tracing::debug!("Episode detail lookup failed: {e:#}");
                    None
                }
            }
        }
    }

    fn wants_episode_details(&self) -> bool {
        matches!(self.media, MediaType::Series | MediaType::Anime)
            && (self.options.digital_release_filter || self.options.metadata_bitrate)
    }

    pub fn start_episode_details_fetch(&self) {
        if !self.wants_episode_details() {
            return;
        }
        self.episode_details
            .start(&self.cancel, self.episode_details_future());
    }

    pub async fn get_episode_details(&self) -> Option<EpisodeFacts> {
        if !self.wants_episode_details() {
            return None;
        }
        self.episode_details
            .get(&self.cancel, self.episode_details_future())
            .await
    }

    fn anilist_id(&self) -> Option<String> {
        if self.content_id.kind == IdKind::Anilist {
            return Some(self.content_id.value.clone());
        }
        self.metadata_service
            .anime_db()
            .lookup(&self.content_id)
            .and_then(|m| m.mappings.anilist.clone())
    }

    fn best_release_future(
        &self,
    ) -> Option<impl std::future::Future<Output = Option<BestReleases>> + Send + 'static> {
        let seadex = self.seadex.clone()?;
        let anilist_id = self.anilist_id()?;
        Some(async move {
            match seadex.best_releases(&anilist_id).await {
                Ok(releases) => Some(releases),
                Err(e) => {
                    tracing::debug!("Best release lookup failed: {e:#}");
                    None
                }
            }
        })
    }

    /// Best-release tags apply to anime with a known AniList id only.
    pub fn start_best_release_fetch(&self) {
        if !self.options.best_release_tags {
            return;
        }
        if let Some(fut) = self.best_release_future() {
            self.best_release.start(&self.cancel, fut);
        }
    }

    pub async fn get_best_releases(&self) -> Option<BestReleases> {
        if !self.options.best_release_tags {
            return None;
        }
        let fut = self.best_release_future()?;
        self.best_release.get(&self.cancel, fut).await
    }

    /// Kick every fetch this request shape needs.
    pub fn start_all_fetches(&self) {
        self.start_metadata_fetch();
        self.start_release_dates_fetch();
        self.start_episode_details_fetch();
        self.start_best_release_fetch();
    }

    /// Season year from the anime mapping, for the file selector.
    pub fn season_year(&self) -> Option<u16> {
        self.metadata_service
            .anime_db()
            .lookup(&self.content_id)
            .and_then(|m| m.season_year)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::anime::AnimeDb;
    use std::str::FromStr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn service() -> Arc<MetadataService> {
        Arc::new(MetadataService::new(
            Vec::new(),
            AnimeDb::empty(),
            std::time::Duration::from_secs(60),
            "t".into(),
        ))
    }

    fn context(id: &str, media: MediaType, options: ContextOptions) -> RequestContext {
        RequestContext::new(
            ContentId::from_str(id).unwrap(),
            media,
            options,
            service(),
            None,
            None,
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn lazy_fetch_runs_once() {
        let fetch: LazyFetch<u32> = LazyFetch::new();
        let cancel = CancellationToken::new();
        static CALLS: AtomicUsize = AtomicUsize::new(0);

        let make = || async {
            CALLS.fetch_add(1, Ordering::SeqCst);
            Some(7u32)
        };
        fetch.start(&cancel, make());
        assert_eq!(fetch.get(&cancel, make()).await, Some(7));
        assert_eq!(fetch.get(&cancel, make()).await, Some(7));
        // started futures that lost the race are dropped unpolled
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_yields_partial_context() {
        let fetch: LazyFetch<u32> = LazyFetch::new();
        let cancel = CancellationToken::new();
        let never = || async {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            Some(1u32)
        };
        fetch.start(&cancel, never());
        cancel.cancel();
        assert_eq!(fetch.get(&cancel, never()).await, None);
    }

    #[tokio::test]
    async fn release_dates_scoped_to_movies_with_filter() {
        let ctx = context("tt0000001", MediaType::Series, ContextOptions::default());
        assert!(ctx.get_release_dates().await.is_none());

        // movie without the filter enabled also skips the fetch
        let ctx = context("tt0000001", MediaType::Movie, ContextOptions::default());
        assert!(ctx.get_release_dates().await.is_none());
    }

    #[tokio::test]
    async fn episode_details_need_series_and_a_reason() {
        let options = ContextOptions {
            metadata_bitrate: true,
            ..Default::default()
        };
        let ctx = context("tt0000001:1:2", MediaType::Movie, options);
        assert!(!ctx.wants_episode_details());
        let ctx = context("tt0000001:1:2", MediaType::Series, options);
        assert!(ctx.wants_episode_details());
        let ctx = context("tt0000001:1:2", MediaType::Series, ContextOptions::default());
        assert!(!ctx.wants_episode_details());
    }
}
