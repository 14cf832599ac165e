use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::content_id::{ContentId, MediaType};
use crate::context::{ContextOptions, RequestContext};
use crate::debrid::processor::{self, ProcessorOptions};
use crate::debrid::{CandidateNzb, CandidateTorrent, DebridService};
use crate::metadata::seadex::SeadexApi;
use crate::metadata::tmdb::TmdbApi;
use crate::metadata::MetadataService;
use crate::pipeline::{self, digital_release::ReleaseFacts, PipelineContext};
use crate::stream::{ParsedStream, SeadexTag, ServiceError, StreamList};
use crate::user_data::ValidatedUserData;

/// Candidates gathered by upstream search addons, handed in per request.
#[derive(Debug, Clone, Default)]
pub struct CandidateSet {
    pub torrents: Vec<CandidateTorrent>,
    pub nzbs: Vec<CandidateNzb>,
    /// Already-shaped streams from P2P fallback addons, merged as-is.
    pub p2p: Vec<ParsedStream>,
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub exclude_private_trackers: bool,
    pub adapter_timeout: Duration,
    pub global_deadline: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            exclude_private_trackers: false,
            adapter_timeout: Duration::from_secs(30),
            global_deadline: Duration::from_secs(60),
        }
    }
}

/// Ties the whole stream resolution pipeline into one request: context
/// construction, concurrent availability checks, filtering, scoring,
/// ordering and emission.
pub struct Orchestrator {
    services: Vec<Arc<dyn DebridService>>,
    metadata_service: Arc<MetadataService>,
    tmdb: Option<Arc<TmdbApi>>,
    seadex: Option<Arc<SeadexApi>>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        services: Vec<Arc<dyn DebridService>>,
        metadata_service: Arc<MetadataService>,
        tmdb: Option<Arc<TmdbApi>>,
        seadex: Option<Arc<SeadexApi>>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            services,
            metadata_service,
            tmdb,
            seadex,
            settings,
        }
    }

    /// Same shared clients, different adapter set; used when a request
    /// carries its own service credentials.
    pub fn with_services(&self, services: Vec<Arc<dyn DebridService>>) -> Self {
        Self {
            services,
            metadata_service: self.metadata_service.clone(),
            tmdb: self.tmdb.clone(),
            seadex: self.seadex.clone(),
            settings: self.settings.clone(),
        }
    }

    pub fn context(
        &self,
        content_id: ContentId,
        media: MediaType,
        user: &ValidatedUserData,
        cancel: CancellationToken,
    ) -> RequestContext {
        let options = ContextOptions {
            digital_release_filter: user.data.digital_release_gate.enabled,
            metadata_bitrate: user.data.metadata_bitrate,
            best_release_tags: user.data.best_release_tags,
        };
        RequestContext::new(
            content_id,
            media,
            options,
            self.metadata_service.clone(),
            self.tmdb.clone(),
            self.seadex.clone(),
            cancel,
        )
    }

    pub async fn resolve_streams(
        &self,
        content_id: ContentId,
        media: MediaType,
        candidates: CandidateSet,
        user: &ValidatedUserData,
        client_ip: Option<String>,
        cancel: CancellationToken,
    ) -> StreamList {
        let context = self.context(content_id.clone(), media, user, cancel);
        context.start_all_fetches();

        let gather = self.gather(&context, &candidates, user, client_ip.as_deref());
        let (mut streams, errors) =
            match tokio::time::timeout(self.settings.global_deadline, gather).await {
                Ok(output) => output,
                Err(_) => {
                    tracing::warn!(id = %content_id, "Global request deadline exceeded");
                    context.cancel_token().cancel();
                    (
                        Vec::new(),
                        vec![(
                            "all".to_owned(),
                            crate::debrid::DebridError::unknown("request deadline exceeded"),
                        )],
                    )
                }
            };

        streams.extend(candidates.p2p.iter().cloned());

        let metadata = context.get_metadata().await;
        let episode_details = context.get_episode_details().await;
        let release_dates = context.get_release_dates().await;

        // SeaDex tags land before filtering so seadex() is available in SEL
        if let Some(best) = context.get_best_releases().await {
            for stream in &mut streams {
                let by_hash = stream
                    .info_hash
                    .as_deref()
                    .map(|h| h.to_lowercase())
                    .filter(|h| best.is_listed_hash(h));
                let group = stream
                    .parsed_file
                    .as_ref()
                    .and_then(|p| p.release_group.as_deref());
                let by_group = group.is_some_and(|g| best.all_groups.contains(g));
                if by_hash.is_some() || by_group {
                    let is_best = by_hash
                        .as_deref()
                        .map(|h| best.is_best_hash(h))
                        .unwrap_or_else(|| {
                            group.is_some_and(|g| best.best_groups.contains(g))
                        });
                    stream.seadex = Some(SeadexTag {
                        is_best,
                        is_seadex: true,
                    });
                }
            }
        }

        // bitrate backfill from runtime × size
        if user.data.metadata_bitrate {
            let runtime = episode_details
                .and_then(|d| d.runtime)
                .or_else(|| metadata.as_ref().and_then(|m| m.runtime_minutes));
            for stream in &mut streams {
                let pack_episodes = metadata.as_ref().and_then(|m| {
                    let seasons = stream.parsed_file.as_ref()?.seasons.clone();
                    m.episode_count_for(&seasons)
                });
                stream.ensure_bitrate(runtime, pack_episodes);
            }
        }

        let release_facts = ReleaseFacts {
            release: metadata.as_ref().and_then(|m| m.first_aired),
            episode_air: episode_details.and_then(|d| d.air_date),
            theatrical: release_dates.as_ref().and_then(|d| d.theatrical),
            home_releases: release_dates,
        };

        let pipeline_ctx = PipelineContext {
            user,
            media,
            metadata: metadata.as_ref(),
            season: content_id.season,
            episode: content_id.episode,
            release_facts: Some(release_facts),
            today: time::OffsetDateTime::now_utc().date(),
        };

        let (mut streams, stats) = pipeline::run_filters(streams, &pipeline_ctx);

        let keywords = pipeline::filters::KeywordSets::build(&user.data);
        pipeline::sort::precompute(&mut streams, &user.filters, &keywords);
        pipeline::sort::sort_streams(&mut streams, &user.data.sort_criteria);

        let (streams, duplicates) = pipeline::dedup::deduplicate(streams);
        let (mut streams, limited) = pipeline::dedup::apply_limits(streams, &user.data.limits);

        let errors: Vec<ServiceError> = errors
            .into_iter()
            .map(|(service_id, e)| ServiceError {
                service_id,
                message: e.to_string(),
            })
            .collect();

        if user.data.show_errors {
            for error in &errors {
                streams.push(ParsedStream::error(
                    error.service_id.clone(),
                    format!("[{}] {}", error.service_id, error.message),
                ));
            }
            if let Some(message) = context.metadata_error() {
                streams.push(ParsedStream::info("metadata", message));
            }
        }
        if user.data.statistics {
            for line in stats.summary_lines() {
                streams.push(ParsedStream::info("statistics", line));
            }
            streams.push(ParsedStream::info(
                "statistics",
                format!(
                    "kept {} of {} streams ({} included, {duplicates} duplicates, {limited} over limits)",
                    streams.iter().filter(|s| s.stream_type().is_playable()).count(),
                    stats.input,
                    stats.included,
                ),
            ));
        }

        StreamList { streams, errors }
    }

    /// Availability checks for torrents and NZBs, fanned out concurrently.
    async fn gather(
        &self,
        context: &RequestContext,
        candidates: &CandidateSet,
        user: &ValidatedUserData,
        client_ip: Option<&str>,
    ) -> (Vec<ParsedStream>, Vec<(String, crate::debrid::DebridError)>) {
        // validators inside the processors want the metadata; it has been
        // fetching since start_all_fetches
        let metadata = context.get_metadata().await;

        let options = ProcessorOptions {
            client_ip: client_ip.map(str::to_owned),
            check_owned: true,
            exclude_private_trackers: self.settings.exclude_private_trackers,
            season_year: context.season_year(),
            adapter_timeout: Some(self.settings.adapter_timeout),
        };

        let (torrents, nzbs) = tokio::join!(
            processor::process_torrents(
                &candidates.torrents,
                &self.services,
                &context.content_id,
                metadata.as_ref(),
                &options,
            ),
            processor::process_nzbs(
                &candidates.nzbs,
                &self.services,
                &context.content_id,
                metadata.as_ref(),
                &options,
            ),
        );

        let mut streams = torrents.streams;
        streams.extend(nzbs.streams);
        let mut errors = torrents.errors;
        errors.extend(nzbs.errors);
        (streams, errors)
    }

    pub fn services(&self) -> &[Arc<dyn DebridService>] {
        &self.services
    }

    /// Library reconciler: cross-reference already-owned items on each
    /// service with the current request and shape the matches as candidates.
    pub async fn library_candidates(
        &self,
        metadata: Option<&crate::metadata::TitleMetadata>,
    ) -> CandidateSet {
        let handles: Vec<_> = self
            .services
            .iter()
            .map(|service| {
                let service = service.clone();
                tokio::spawn(async move {
                    let capabilities = service.capabilities();
                    let magnets = if capabilities.supports_torrents {
                        service.list_magnets().await.unwrap_or_else(|e| {
                            tracing::debug!(service = service.id(), "Library listing failed: {e}");
                            Vec::new()
                        })
                    } else {
                        Vec::new()
                    };
                    let nzbs = if capabilities.supports_usenet {
                        service.list_nzbs().await.unwrap_or_default()
                    } else {
                        Vec::new()
                    };
                    (magnets, nzbs)
                })
            })
            .collect();

        let matches_request = |name: &str| -> bool {
            let Some(meta) = metadata else {
                return true;
            };
            let parsed = crate::parser::parse(name);
            !crate::matcher::is_title_wrong(&parsed, name, meta)
        };

        let mut set = CandidateSet::default();
        for handle in handles {
            let Ok((magnets, nzbs)) = handle.await else {
                continue;
            };
            for item in magnets {
                let Some(hash) = item.hash.clone() else {
                    continue;
                };
                let name = item.name.clone().unwrap_or_default();
                if !matches_request(&name) {
                    continue;
                }
                set.torrents.push(CandidateTorrent {
                    hash,
                    title: item.name,
                    size: item.size,
                    library: true,
                    addon: "library".to_owned(),
                    ..Default::default()
                });
            }
            for item in nzbs {
                let name = item.name.clone().unwrap_or_default();
                if name.is_empty() || !matches_request(&name) {
                    continue;
                }
                set.nzbs.push(CandidateNzb {
                    hash: item
                        .hash
                        .clone()
                        .unwrap_or_else(|| CandidateNzb::hash_for_url(&name)),
                    title: item.name,
                    size: item.size,
                    library: true,
                    addon: "library".to_owned(),
                    ..Default::default()
                });
            }
        }
        set
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let services: Vec<&str> = self.services.iter().map(|s| s.id()).collect();
        f.debug_struct("Orchestrator")
            .field("services", &services)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debrid::{
        AvailabilityResult, Capabilities, DebridDownload, DebridError, DebridFile,
        DownloadStatus, NzbCheckItem, PlaybackRequest,
    };
    use crate::metadata::anime::AnimeDb;
    use crate::stream::StreamType;
    use crate::user_data::{UserData, ValidationLimits};
    use std::str::FromStr;

    struct FixedService {
        id: String,
        files: Vec<DebridFile>,
    }

    #[async_trait::async_trait]
    impl DebridService for FixedService {
        fn id(&self) -> &str {
            &self.id
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities {
                supports_torrents: true,
                supports_usenet: false,
            }
        }

        async fn list_magnets(&self) -> Result<Vec<DebridDownload>, DebridError> {
            Ok(Vec::new())
        }

        async fn list_nzbs(&self) -> Result<Vec<DebridDownload>, DebridError> {
            Ok(Vec::new())
        }

        async fn check_magnets(
            &self,
            hashes: &[String],
            _stremio_id: Option<&str>,
            _check_owned: bool,
        ) -> Result<Vec<AvailabilityResult>, DebridError> {
            Ok(hashes
                .iter()
                .map(|h| AvailabilityResult {
                    hash: h.clone(),
                    status: DownloadStatus::Cached,
                    library: false,
                    files: self.files.clone(),
                })
                .collect())
        }

        async fn check_nzbs(
            &self,
            _items: &[NzbCheckItem],
            _check_owned: bool,
        ) -> Result<Vec<AvailabilityResult>, DebridError> {
            Ok(Vec::new())
        }

        async fn add_magnet(&self, _magnet: &str) -> Result<DebridDownload, DebridError> {
            unimplemented!()
        }

        async fn add_torrent(&self, _url: &str) -> Result<DebridDownload, DebridError> {
            unimplemented!()
        }

        async fn add_nzb(&self, _url: &str, _name: &str) -> Result<DebridDownload, DebridError> {
            unimplemented!()
        }

        async fn resolve(&self, _r: &PlaybackRequest) -> Result<Option<String>, DebridError> {
            Ok(None)
        }

        async fn remove_magnet(&self, _id: &str) -> Result<(), DebridError> {
            Ok(())
        }

        async fn remove_nzb(&self, _id: &str) -> Result<(), DebridError> {
            Ok(())
        }

        async fn refresh_library_cache(&self) -> Result<(), DebridError> {
            Ok(())
        }

        async fn get_magnet(&self, _id: &str) -> Result<DebridDownload, DebridError> {
            unimplemented!()
        }

        async fn get_nzb(&self, _id: &str) -> Result<DebridDownload, DebridError> {
            unimplemented!()
        }
    }

    fn orchestrator(files: Vec<DebridFile>) -> Orchestrator {
        let metadata_service = Arc::new(MetadataService::new(
            Vec::new(),
            AnimeDb::empty(),
            Duration::from_secs(60),
            "t".into(),
        ));
        Orchestrator::new(
            vec![Arc::new(FixedService {
                id: "A".into(),
                files,
            })],
            metadata_service,
            None,
            None,
            OrchestratorSettings::default(),
        )
    }

    fn user() -> ValidatedUserData {
        UserData::default()
            .validate(&ValidationLimits::default())
            .unwrap()
    }

    fn candidate(title: &str, hash: &str) -> CandidateTorrent {
        CandidateTorrent {
            hash: hash.into(),
            title: Some(title.to_owned()),
            size: Some(1_500_000_000),
            addon: "indexarr".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn deterministic_output_for_fixed_adapters() {
        let files = vec![DebridFile {
            index: 0,
            name: Some("Show.S01E01.1080p.mkv".into()),
            size: 1_500_000_000,
            ..Default::default()
        }];
        let id = ContentId::from_str("tt0000001:1:1").unwrap();
        let candidates = CandidateSet {
            torrents: vec![
                candidate("Show.S01E01.1080p.WEB", "a".repeat(40).as_str()),
                candidate("Show.S01E01.720p.WEB", "b".repeat(40).as_str()),
            ],
            ..Default::default()
        };

        let orchestrator = orchestrator(files);
        let user = user();
        let first = orchestrator
            .resolve_streams(
                id.clone(),
                MediaType::Series,
                candidates.clone(),
                &user,
                None,
                CancellationToken::new(),
            )
            .await;
        let second = orchestrator
            .resolve_streams(
                id,
                MediaType::Series,
                candidates,
                &user,
                None,
                CancellationToken::new(),
            )
            .await;
        let ids = |list: &StreamList| -> Vec<String> {
            list.streams.iter().map(|s| s.id.clone()).collect()
        };
        assert_eq!(ids(&first), ids(&second));
        assert_eq!(first.streams.len(), 2);
        assert!(first.errors.is_empty());
    }

    #[tokio::test]
    async fn p2p_fallback_merged_after_debrid() {
        let id = ContentId::from_str("tt0000001").unwrap();
        let p2p = ParsedStream {
            id: "p2p:1".into(),
            addon: "p2p-addon".into(),
            stream_type: Some(StreamType::P2p),
            filename: Some("Movie.2020.1080p.mkv".into()),
            parsed_file: Some(crate::parser::parse("Movie.2020.1080p.mkv")),
            ..Default::default()
        };
        let candidates = CandidateSet {
            p2p: vec![p2p],
            ..Default::default()
        };
        let orchestrator = orchestrator(Vec::new());
        let list = orchestrator
            .resolve_streams(
                id,
                MediaType::Movie,
                candidates,
                &user(),
                None,
                CancellationToken::new(),
            )
            .await;
        assert_eq!(list.streams.len(), 1);
        assert_eq!(list.streams[0].id, "p2p:1");
    }
}
