use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::Date;

use crate::cache::{LockError, LockOptions, CACHES, LOCKS};
use crate::content_id::{ContentId, MediaType};

pub mod anime;
pub mod imdb;
pub mod seadex;
pub mod tmdb;
pub mod trakt;
pub mod tvdb;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleAlias {
    pub title: String,
    pub language: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeasonInfo {
    pub number: u16,
    pub episode_count: u16,
}

/// Authoritative title facts for one request, merged across providers.
/// Exclusively owned by the request context; read-only downstream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TitleMetadata {
    pub primary: String,
    pub aliases: Vec<TitleAlias>,
    pub year: Option<u16>,
    pub year_end: Option<u16>,
    pub original_language: Option<String>,
    pub seasons: Vec<SeasonInfo>,
    pub absolute_episode: Option<u16>,
    pub relative_absolute_episode: Option<u16>,
    pub genres: Vec<String>,
    pub runtime_minutes: Option<u32>,
    pub first_aired: Option<Date>,
    pub last_aired: Option<Date>,
    pub next_air: Option<Date>,
}

impl TitleMetadata {
    /// Case-insensitive alias dedup; a language tag survives only when every
    /// source that contributed the title agrees on it.
    pub fn push_alias(&mut self, title: impl Into<String>, language: Option<String>) {
        let title = title.into();
        if title.is_empty() {
            return;
        }
        let lower = title.to_lowercase();
        if let Some(existing) = self
            .aliases
            .iter_mut()
            .find(|a| a.title.to_lowercase() == lower)
        {
            if existing.language != language {
                existing.language = None;
            }
            return;
        }
        self.aliases.push(TitleAlias { title, language });
    }

    /// Total episode count across the given seasons; `None` when any of them
    /// has an unknown count.
    pub fn episode_count_for(&self, seasons: &[u16]) -> Option<u32> {
        let mut total: u32 = 0;
        for number in seasons {
            let season = self.seasons.iter().find(|s| s.number == *number)?;
            if season.episode_count == 0 {
                return None;
            }
            total += season.episode_count as u32;
        }
        (total > 0).then_some(total)
    }
}

/// One provider's partial contribution, merged in declared provider order.
#[derive(Debug, Clone, Default)]
pub struct ProviderTitle {
    pub primary: Option<String>,
    pub aliases: Vec<TitleAlias>,
    pub year: Option<u16>,
    pub year_end: Option<u16>,
    pub original_language: Option<String>,
    pub seasons: Vec<SeasonInfo>,
    pub genres: Vec<String>,
    pub runtime_minutes: Option<u32>,
    pub first_aired: Option<Date>,
    pub last_aired: Option<Date>,
    pub next_air: Option<Date>,
}

#[async_trait::async_trait]
pub trait TitleMetadataProvider {
    async fn title_metadata(
        &self,
        id: &ContentId,
        media: MediaType,
    ) -> anyhow::Result<ProviderTitle>;

    /// Provider identifier
    fn provider_identifier(&self) -> &'static str;
}

#[derive(Debug)]
pub enum MetadataError {
    /// No source produced a usable title.
    NotFound,
    Upstream(anyhow::Error),
}

impl Display for MetadataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataError::NotFound => write!(f, "METADATA_NOT_FOUND"),
            MetadataError::Upstream(e) => write!(f, "metadata upstream failed: {e}"),
        }
    }
}

impl std::error::Error for MetadataError {}

impl From<anyhow::Error> for MetadataError {
    fn from(e: anyhow::Error) -> Self {
        MetadataError::Upstream(e)
    }
}

/// Unifies titles, years, runtime and seasons from the configured upstream
/// providers. Single-flighted per id; results live in the process-wide
/// metadata cache.
pub struct MetadataService {
    providers: Vec<Arc<dyn TitleMetadataProvider + Send + Sync>>,
    anime_db: Arc<anime::AnimeDb>,
    cache_ttl: Duration,
    auth_fingerprint: String,
}

impl std::fmt::Debug for MetadataService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let providers: Vec<_> = self
            .providers
            .iter()
            .map(|p| p.provider_identifier())
            .collect();
        f.debug_struct("MetadataService")
            .field("providers", &providers)
            .finish()
    }
}

impl MetadataService {
    pub fn new(
        providers: Vec<Arc<dyn TitleMetadataProvider + Send + Sync>>,
        anime_db: Arc<anime::AnimeDb>,
        cache_ttl: Duration,
        auth_fingerprint: String,
    ) -> Self {
        Self {
            providers,
            anime_db,
            cache_ttl,
            auth_fingerprint,
        }
    }

    pub fn anime_db(&self) -> &Arc<anime::AnimeDb> {
        &self.anime_db
    }

    pub async fn get_metadata(
        &self,
        id: &ContentId,
        media: MediaType,
    ) -> Result<TitleMetadata, MetadataError> {
        let cache_key = format!(
            "metadata:{}:{}:{}",
            media.as_str(),
            id.cache_key(),
            self.auth_fingerprint
        );
        if let Some(hit) = CACHES.metadata.get::<TitleMetadata>(&cache_key) {
            return Ok(hit);
        }

        let lock_opts = LockOptions {
            timeout: Duration::from_secs(20),
            ttl: Duration::from_secs(30),
            retry_interval: Duration::from_millis(150),
        };
        let result = LOCKS
            .with_lock(&cache_key, lock_opts, || async {
                // a follower finds the leader's write here
                if let Some(hit) = CACHES.metadata.get::<TitleMetadata>(&cache_key) {
                    return Ok(hit);
                }
                let metadata = self.fetch_and_merge(id, media).await?;
                CACHES
                    .metadata
                    .set(cache_key.clone(), &metadata, self.cache_ttl);
                Ok(metadata)
            })
            .await;
        match result {
            Ok(inner) => inner,
            Err(LockError::Timeout) => Err(MetadataError::Upstream(anyhow::anyhow!(
                "metadata lock wait timed out for {id}"
            ))),
            Err(LockError::TtlExceeded) => Err(MetadataError::Upstream(anyhow::anyhow!(
                "metadata fetch exceeded lock ttl for {id}"
            ))),
        }
    }

    /// Anime-native id spaces (kitsu/mal/anilist) are opaque to the general
    /// providers; translate through the mapping db when possible.
    fn translate_id(&self, id: &ContentId) -> ContentId {
        if !id.kind.is_anime_native() {
            return id.clone();
        }
        let Some(mapping) = self.anime_db.lookup(id) else {
            return id.clone();
        };
        let translated = if let Some(imdb) = &mapping.mappings.imdb {
            ContentId::new(crate::content_id::IdKind::Imdb, imdb.clone())
        } else if let Some(tmdb) = &mapping.mappings.tmdb {
            ContentId::new(crate::content_id::IdKind::Tmdb, tmdb.clone())
        } else if let Some(tvdb) = &mapping.mappings.tvdb {
            ContentId::new(crate::content_id::IdKind::Tvdb, tvdb.clone())
        } else {
            return id.clone();
        };
        ContentId {
            season: id.season.or(mapping.starting_season),
            episode: id.episode,
            ..translated
        }
    }

    async fn fetch_and_merge(
        &self,
        id: &ContentId,
        media: MediaType,
    ) -> Result<TitleMetadata, MetadataError> {
        let provider_id = self.translate_id(id);
        let handles: Vec<_> = self
            .providers
            .iter()
            .map(|p| {
                let provider = p.clone();
                let id = provider_id.clone();
                tokio::spawn(async move {
                    let mut last_err = None;
                    // one bounded retry on top of the per-client rate limiter
                    for _ in 0..2 {
                        match provider.title_metadata(&id, media).await {
                            Ok(v) => return Ok(v),
                            Err(e) => last_err = Some(e),
                        }
                    }
                    Err((provider.provider_identifier(), last_err.unwrap()))
                })
            })
            .collect();

        let mut partials = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(Ok(partial)) => partials.push(partial),
                Ok(Err((provider, e))) => {
                    tracing::warn!(provider, "Metadata provider failed: {e:#}");
                }
                Err(e) => {
                    tracing::error!("Metadata provider task panicked: {e}");
                }
            }
        }

        let mut merged = merge_partials(&partials);

        let mapping = self.anime_db.lookup(id);
        let is_anime =
            media == MediaType::Anime || id.kind.is_anime_native() || mapping.is_some();
        if is_anime {
            // the translated id carries the season in the parent series grid
            if let (Some(season), Some(episode)) = (provider_id.season, provider_id.episode) {
                apply_absolute_numbering(&mut merged, mapping, season, episode);
            }
        }

        if merged.primary.is_empty() {
            if media == MediaType::Movie && merged.year.is_none() {
                return Err(MetadataError::NotFound);
            }
            tracing::debug!(%id, "No provider returned a primary title");
        }
        Ok(merged)
    }
}

fn merge_partials(partials: &[ProviderTitle]) -> TitleMetadata {
    let mut merged = TitleMetadata::default();
    for partial in partials {
        if merged.primary.is_empty() {
            if let Some(primary) = &partial.primary {
                merged.primary = primary.clone();
            }
        }
        if let Some(primary) = &partial.primary {
            merged.push_alias(primary.clone(), None);
        }
        for alias in &partial.aliases {
            merged.push_alias(alias.title.clone(), alias.language.clone());
        }
        merged.year = merged.year.or(partial.year);
        merged.year_end = merged.year_end.or(partial.year_end);
        merged.original_language = merged
            .original_language
            .take()
            .or_else(|| partial.original_language.clone());
        if merged.seasons.is_empty() && !partial.seasons.is_empty() {
            merged.seasons = partial.seasons.clone();
        }
        merged.runtime_minutes = merged.runtime_minutes.or(partial.runtime_minutes);
        merged.first_aired = merged.first_aired.or(partial.first_aired);
        merged.last_aired = merged.last_aired.or(partial.last_aired);
        merged.next_air = merged.next_air.or(partial.next_air);
        for genre in &partial.genres {
            if !merged.genres.iter().any(|g| g.eq_ignore_ascii_case(genre)) {
                merged.genres.push(genre.clone());
            }
        }
    }
    // keep the primary first in the alias list
    if !merged.primary.is_empty() {
        let lower = merged.primary.to_lowercase();
        if let Some(pos) = merged
            .aliases
            .iter()
            .position(|a| a.title.to_lowercase() == lower)
        {
            let alias = merged.aliases.remove(pos);
            merged.aliases.insert(0, alias);
        }
    }
    merged
}

fn apply_absolute_numbering(
    merged: &mut TitleMetadata,
    mapping: Option<&anime::AnimeMapping>,
    season: u16,
    episode: u16,
) {
    let prior: u32 = merged
        .seasons
        .iter()
        .filter(|s| s.number != 0 && s.number < season)
        .map(|s| s.episode_count as u32)
        .sum();
    let mut absolute = prior + episode as u32;

    if let Some(mapping) = mapping {
        let preceding_non_imdb = mapping
            .non_imdb_episodes
            .iter()
            .filter(|&&e| (e as u32) < absolute)
            .count() as u32;
        absolute += preceding_non_imdb;

        if let Some(start) = mapping.starting_season {
            if start != season && start <= season {
                let relative: u32 = merged
                    .seasons
                    .iter()
                    .filter(|s| s.number >= start && s.number < season)
                    .map(|s| s.episode_count as u32)
                    .sum::<u32>()
                    + episode as u32;
                if relative != episode as u32 {
                    merged.relative_absolute_episode = u16::try_from(relative).ok();
                }
            }
        }
    }

    merged.absolute_episode = u16::try_from(absolute).ok();
}
