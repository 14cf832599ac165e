use std::collections::BTreeSet;
use std::sync::Arc;

use crate::content_id::ContentId;
use crate::matcher;
use crate::metadata::TitleMetadata;
use crate::parser;
use crate::stream::{FileInfo, ParsedStream, ServiceInfo, StreamType};

use super::selector::{self, SelectionContext};
use super::{
    AvailabilityResult, CandidateNzb, CandidateTorrent, DebridError, DebridService, NzbCheckItem,
};

/// Options threaded through one processor run.
#[derive(Debug, Clone, Default)]
pub struct ProcessorOptions {
    pub client_ip: Option<String>,
    pub check_owned: bool,
    /// Drop `private == true` candidates for every service that is not the
    /// user's own qBittorrent.
    pub exclude_private_trackers: bool,
    /// Year the anime season aired, for the file selector bonus.
    pub season_year: Option<u16>,
    /// Per-adapter soft deadline; a service overrunning it reports a 504 and
    /// the others continue.
    pub adapter_timeout: Option<std::time::Duration>,
}

#[derive(Debug, Default)]
pub struct ProcessorOutput {
    pub streams: Vec<ParsedStream>,
    pub errors: Vec<(String, DebridError)>,
}

/// Fan a torrent candidate batch across the capable services, gather
/// per-candidate results plus per-service errors.
///
/// Parallel across services; per service, candidate order is preserved, and
/// results are concatenated in declared-service order regardless of
/// completion order.
pub async fn process_torrents(
    candidates: &[CandidateTorrent],
    services: &[Arc<dyn DebridService>],
    content_id: &ContentId,
    metadata: Option<&TitleMetadata>,
    options: &ProcessorOptions,
) -> ProcessorOutput {
    let capable: Vec<Arc<dyn DebridService>> = services
        .iter()
        .filter(|s| s.capabilities().supports_torrents)
        .cloned()
        .collect();

    let handles: Vec<_> = capable
        .iter()
        .map(|service| {
            let service = service.clone();
            let mut candidates: Vec<CandidateTorrent> = candidates.to_vec();
            if options.exclude_private_trackers && !service.is_qbittorrent() {
                candidates.retain(|c| !c.private);
            }
            // a service that already saw the download URL knows the real hash
            for candidate in &mut candidates {
                if candidate.placeholder_hash {
                    if let Some(real) = candidate
                        .download_url
                        .as_deref()
                        .and_then(|u| service.known_hash_for_url(u))
                    {
                        candidate.hash = real;
                        candidate.placeholder_hash = false;
                    }
                }
            }
            let content_id = content_id.clone();
            let metadata = metadata.cloned();
            let options = options.clone();
            tokio::spawn(async move {
                let hashes: Vec<String> = candidates.iter().map(|c| c.hash.clone()).collect();
                let content_id_str = content_id.to_string();
                let check = service.check_magnets(
                    &hashes,
                    Some(&content_id_str),
                    options.check_owned,
                );
                let checked = match options.adapter_timeout {
                    Some(deadline) => match tokio::time::timeout(deadline, check).await {
                        Ok(checked) => checked,
                        Err(_) => Err(DebridError::unknown("availability check timed out")),
                    },
                    None => check.await,
                };
                let results = match checked {
                    Ok(results) => results,
                    Err(e) => return Err((service.id().to_owned(), e)),
                };
                let mut streams = Vec::new();
                for candidate in &candidates {
                    let availability = results.iter().find(|r| r.hash == candidate.hash);
                    if let Some(stream) = torrent_stream(
                        candidate,
                        availability,
                        service.id(),
                        metadata.as_ref(),
                        &content_id,
                        &options,
                    )
                    .await
                    {
                        streams.push(stream);
                    }
                }
                Ok(streams)
            })
        })
        .collect();

    let mut output = ProcessorOutput::default();
    for handle in handles {
        match handle.await {
            Ok(Ok(streams)) => output.streams.extend(streams),
            Ok(Err((service_id, e))) => {
                tracing::warn!(service = service_id, "Availability check failed: {e}");
                output.errors.push((service_id, e));
            }
            Err(e) => {
                tracing::error!("Processor task panicked: {e}");
            }
        }
    }
    output
}

async fn torrent_stream(
    candidate: &CandidateTorrent,
    availability: Option<&AvailabilityResult>,
    service_id: &str,
    metadata: Option<&TitleMetadata>,
    content_id: &ContentId,
    options: &ProcessorOptions,
) -> Option<ParsedStream> {
    let title = candidate.title.clone().unwrap_or_default();
    let parsed = candidate
        .parsed
        .clone()
        .unwrap_or_else(|| parser::parse(&title));

    if !candidate.confirmed {
        if let Some(meta) = metadata {
            let wrong = matcher::is_title_wrong(&parsed, &title, meta)
                || matcher::is_season_wrong(&parsed, content_id.season, meta)
                || matcher::is_episode_wrong(&parsed, content_id.episode, meta);
            if wrong {
                tracing::trace!(title, "Candidate dropped by coarse validators");
                return None;
            }
        }
    }

    let cached = availability.is_some_and(|a| a.status.is_ready());
    let library = candidate.library || availability.is_some_and(|a| a.library);

    let mut file = FileInfo {
        name: title.clone(),
        size: candidate.size,
        index: -1,
    };
    let mut parsed_file = parsed.clone();
    if let Some(availability) = availability.filter(|a| !a.files.is_empty()) {
        let ctx = SelectionContext {
            metadata,
            season: content_id.season,
            episode: content_id.episode,
            season_year: options.season_year,
            ..Default::default()
        };
        if let Some((selected, selected_parsed)) =
            selector::select_file(&availability.files, &ctx).await.selected()
        {
            file = FileInfo {
                name: selected.name.clone().unwrap_or_default(),
                size: Some(selected.size),
                index: selected.index,
            };
            parsed_file = selected_parsed;
        }
    }

    let languages: BTreeSet<String> = parsed_file.languages.iter().cloned().collect();
    Some(ParsedStream {
        id: format!("{service_id}:{}", candidate.hash),
        addon: candidate.addon.clone(),
        stream_type: Some(StreamType::Debrid),
        service: Some(ServiceInfo {
            id: service_id.to_owned(),
            cached,
            library,
        }),
        filename: Some(file.name.clone()).filter(|n| !n.is_empty()),
        folder_name: Some(title).filter(|t| !t.is_empty()),
        size: file.size.or(candidate.size),
        folder_size: candidate.size,
        indexer: candidate.indexer.clone(),
        age_hours: candidate.age_hours,
        seeders: candidate.seeders,
        languages,
        file,
        info_hash: Some(candidate.hash.clone()),
        sources: candidate.tracker_sources.clone(),
        private: candidate.private,
        parsed_file: Some(parsed_file),
        ..Default::default()
    })
}

/// NZB counterpart of [`process_torrents`].
pub async fn process_nzbs(
    candidates: &[CandidateNzb],
    services: &[Arc<dyn DebridService>],
    content_id: &ContentId,
    metadata: Option<&TitleMetadata>,
    options: &ProcessorOptions,
) -> ProcessorOutput {
    let capable: Vec<Arc<dyn DebridService>> = services
        .iter()
        .filter(|s| s.capabilities().supports_usenet)
        .cloned()
        .collect();

    let handles: Vec<_> = capable
        .iter()
        .map(|service| {
            let service = service.clone();
            let candidates: Vec<CandidateNzb> = candidates.to_vec();
            let content_id = content_id.clone();
            let metadata = metadata.cloned();
            let options = options.clone();
            tokio::spawn(async move {
                let items: Vec<NzbCheckItem> = candidates
                    .iter()
                    .map(|c| NzbCheckItem {
                        hash: Some(c.hash.clone()),
                        name: c.title.clone(),
                    })
                    .collect();
                let check = service.check_nzbs(&items, options.check_owned);
                let checked = match options.adapter_timeout {
                    Some(deadline) => match tokio::time::timeout(deadline, check).await {
                        Ok(checked) => checked,
                        Err(_) => Err(DebridError::unknown("availability check timed out")),
                    },
                    None => check.await,
                };
                let results = match checked {
                    Ok(results) => results,
                    Err(e) => return Err((service.id().to_owned(), e)),
                };
                let mut streams = Vec::new();
                for candidate in &candidates {
                    let availability = results.iter().find(|r| r.hash == candidate.hash);
                    if let Some(stream) =
                        nzb_stream(candidate, availability, service.id(), metadata.as_ref(), &content_id)
                    {
                        streams.push(stream);
                    }
                }
                Ok(streams)
            })
        })
        .collect();

    let mut output = ProcessorOutput::default();
    for handle in handles {
        match handle.await {
            Ok(Ok(streams)) => output.streams.extend(streams),
            Ok(Err((service_id, e))) => {
                tracing::warn!(service = service_id, "NZB check failed: {e}");
                output.errors.push((service_id, e));
            }
            Err(e) => {
                tracing::error!("Processor task panicked: {e}");
            }
        }
    }
    output
}

fn nzb_stream(
    candidate: &CandidateNzb,
    availability: Option<&AvailabilityResult>,
    service_id: &str,
    metadata: Option<&TitleMetadata>,
    content_id: &ContentId,
) -> Option<ParsedStream> {
    let title = candidate.title.clone().unwrap_or_default();
    let parsed = parser::parse(&title);

    if !candidate.confirmed {
        if let Some(meta) = metadata {
            let wrong = matcher::is_title_wrong(&parsed, &title, meta)
                || matcher::is_season_wrong(&parsed, content_id.season, meta)
                || matcher::is_episode_wrong(&parsed, content_id.episode, meta);
            if wrong {
                return None;
            }
        }
    }

    let cached = availability.is_some_and(|a| a.status.is_ready());
    let library = candidate.library || availability.is_some_and(|a| a.library);
    let languages: BTreeSet<String> = parsed.languages.iter().cloned().collect();

    Some(ParsedStream {
        id: format!("{service_id}:{}", candidate.hash),
        addon: candidate.addon.clone(),
        stream_type: Some(StreamType::Usenet),
        service: Some(ServiceInfo {
            id: service_id.to_owned(),
            cached,
            library,
        }),
        filename: Some(title.clone()).filter(|t| !t.is_empty()),
        size: candidate.size,
        indexer: candidate.indexer.clone(),
        age_hours: candidate.age_hours,
        languages,
        file: FileInfo {
            name: title,
            size: candidate.size,
            index: -1,
        },
        external_url: candidate.easynews_url.clone(),
        url: candidate.nzb_url.clone(),
        parsed_file: Some(parsed),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debrid::{
        Capabilities, DebridDownload, DebridFile, DownloadStatus, PlaybackRequest,
    };
    use std::str::FromStr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fixed-response fake: reports every known hash as cached with the
    /// given files.
    struct FakeService {
        id: String,
        cached: Vec<(String, Vec<DebridFile>)>,
        library_hashes: Vec<String>,
        fail: bool,
        supports_torrents: bool,
        check_calls: AtomicUsize,
    }

    impl FakeService {
        fn new(id: &str) -> Self {
            Self {
                id: id.to_owned(),
                cached: Vec::new(),
                library_hashes: Vec::new(),
                fail: false,
                supports_torrents: true,
                check_calls: AtomicUsize::new(0),
            }
        }

        fn with_cached(mut self, hash: &str, files: Vec<DebridFile>) -> Self {
            self.cached.push((hash.to_owned(), files));
            self
        }
    }

    #[async_trait::async_trait]
    impl DebridService for FakeService {
        fn id(&self) -> &str {
            &self.id
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities {
                supports_torrents: self.supports_torrents,
                supports_usenet: true,
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
            self.check_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(DebridError::unauthorized("bad token"));
            }
            Ok(hashes
                .iter()
                .map(|h| {
                    let cached = self.cached.iter().find(|(hash, _)| hash == h);
                    AvailabilityResult {
                        hash: h.clone(),
                        status: if cached.is_some() {
                            DownloadStatus::Cached
                        } else {
                            DownloadStatus::Unknown
                        },
                        library: self.library_hashes.contains(h),
                        files: cached.map(|(_, f)| f.clone()).unwrap_or_default(),
                    }
                })
                .collect())
        }

        async fn check_nzbs(
            &self,
            items: &[NzbCheckItem],
            _check_owned: bool,
        ) -> Result<Vec<AvailabilityResult>, DebridError> {
            Ok(items
                .iter()
                .map(|i| AvailabilityResult {
                    hash: i.hash.clone().unwrap_or_default(),
                    status: DownloadStatus::Cached,
                    library: self
                        .library_hashes
                        .contains(&i.hash.clone().unwrap_or_default()),
                    files: Vec::new(),
                })
                .collect())
        }

        async fn add_magnet(&self, _magnet: &str) -> Result<DebridDownload, DebridError> {
            unimplemented!()
        }

        async fn add_torrent(&self, _download_url: &str) -> Result<DebridDownload, DebridError> {
            unimplemented!()
        }

        async fn add_nzb(&self, _url: &str, _name: &str) -> Result<DebridDownload, DebridError> {
            unimplemented!()
        }

        async fn resolve(
            &self,
            _request: &PlaybackRequest,
        ) -> Result<Option<String>, DebridError> {
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

    fn video(index: i32, name: &str, size: u64) -> DebridFile {
        DebridFile {
            index,
            name: Some(name.to_owned()),
            size,
            ..Default::default()
        }
    }

    fn show_meta() -> TitleMetadata {
        let mut meta = TitleMetadata::default();
        meta.primary = "Show".into();
        meta.push_alias("Show", None);
        meta.seasons = vec![
            crate::metadata::SeasonInfo { number: 1, episode_count: 10 },
            crate::metadata::SeasonInfo { number: 2, episode_count: 10 },
        ];
        meta
    }

    const HASH: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    fn candidate(title: &str) -> CandidateTorrent {
        CandidateTorrent {
            hash: HASH.into(),
            title: Some(title.to_owned()),
            size: Some(1_500_000_000),
            addon: "indexarr".into(),
            ..Default::default()
        }
    }

    #[test_log::test(tokio::test)]
    async fn cached_exact_match_selects_file() {
        let service: Arc<dyn DebridService> = Arc::new(FakeService::new("A").with_cached(
            HASH,
            vec![
                video(0, "Show.S02E03.1080p.x264-GRP.mkv", 1_500_000_000),
                video(1, "Show.S02E03.sample.mkv", 50_000_000),
            ],
        ));
        let id = ContentId::from_str("tt0000001:2:3").unwrap();
        let meta = show_meta();
        let output = process_torrents(
            &[candidate("Show.S02E03.1080p.x264-GRP")],
            &[service],
            &id,
            Some(&meta),
            &ProcessorOptions::default(),
        )
        .await;
        assert!(output.errors.is_empty());
        assert_eq!(output.streams.len(), 1);
        let stream = &output.streams[0];
        let service = stream.service.as_ref().unwrap();
        assert!(service.cached);
        assert!(!service.library);
        assert_eq!(service.id, "A");
        assert_eq!(stream.file.index, 0);
        assert_eq!(stream.file.name, "Show.S02E03.1080p.x264-GRP.mkv");
    }

    #[tokio::test]
    async fn service_error_does_not_abort_others() {
        let bad = FakeService {
            fail: true,
            ..FakeService::new("bad")
        };
        let good = FakeService::new("good").with_cached(HASH, vec![video(0, "Show.S01E01.mkv", 1)]);
        let services: Vec<Arc<dyn DebridService>> = vec![Arc::new(bad), Arc::new(good)];
        let id = ContentId::from_str("tt0000001:1:1").unwrap();
        let output = process_torrents(
            &[candidate("Show.S01E01.1080p")],
            &services,
            &id,
            None,
            &ProcessorOptions::default(),
        )
        .await;
        assert_eq!(output.errors.len(), 1);
        assert_eq!(output.errors[0].0, "bad");
        assert_eq!(output.streams.len(), 1);
        assert_eq!(output.streams[0].service.as_ref().unwrap().id, "good");
    }

    #[tokio::test]
    async fn wrong_title_dropped_unless_confirmed() {
        let service: Arc<dyn DebridService> =
            Arc::new(FakeService::new("A").with_cached(HASH, vec![]));
        let id = ContentId::from_str("tt0000001:1:1").unwrap();
        let meta = show_meta();

        let output = process_torrents(
            &[candidate("Completely.Different.Title.S01E01.1080p")],
            std::slice::from_ref(&service),
            &id,
            Some(&meta),
            &ProcessorOptions::default(),
        )
        .await;
        assert!(output.streams.is_empty());

        let confirmed = CandidateTorrent {
            confirmed: true,
            ..candidate("Completely.Different.Title.S01E01.1080p")
        };
        let output = process_torrents(
            &[confirmed],
            &[service],
            &id,
            Some(&meta),
            &ProcessorOptions::default(),
        )
        .await;
        assert_eq!(output.streams.len(), 1);
    }

    #[tokio::test]
    async fn private_candidates_dropped_when_flag_set() {
        let service: Arc<dyn DebridService> =
            Arc::new(FakeService::new("A").with_cached(HASH, vec![]));
        let id = ContentId::from_str("tt0000001").unwrap();
        let private = CandidateTorrent {
            private: true,
            ..candidate("Show.2020.1080p")
        };
        let options = ProcessorOptions {
            exclude_private_trackers: true,
            ..Default::default()
        };
        let output = process_torrents(&[private], &[service], &id, None, &options).await;
        assert!(output.streams.is_empty());
    }

    #[tokio::test]
    async fn empty_file_list_yields_stub_stream() {
        let service: Arc<dyn DebridService> =
            Arc::new(FakeService::new("A").with_cached(HASH, vec![]));
        let id = ContentId::from_str("tt0000001").unwrap();
        let output = process_torrents(
            &[candidate("Show.2020.1080p.x264")],
            &[service],
            &id,
            None,
            &ProcessorOptions::default(),
        )
        .await;
        assert_eq!(output.streams.len(), 1);
        let stream = &output.streams[0];
        assert_eq!(stream.file.index, -1);
        assert_eq!(stream.file.name, "Show.2020.1080p.x264");
        assert_eq!(stream.file.size, Some(1_500_000_000));
    }

    #[tokio::test]
    async fn library_overrides_check_result() {
        let mut fake = FakeService::new("A").with_cached(HASH, vec![]);
        fake.library_hashes.push(HASH.into());
        let service: Arc<dyn DebridService> = Arc::new(fake);
        let id = ContentId::from_str("tt0000001").unwrap();
        let output = process_torrents(
            &[candidate("Show.2020.1080p")],
            &[service],
            &id,
            None,
            &ProcessorOptions::default(),
        )
        .await;
        let service = output.streams[0].service.as_ref().unwrap();
        assert!(service.library);
        assert!(service.cached);
    }

    #[tokio::test]
    async fn results_concatenated_in_service_order() {
        let slow = FakeService::new("slow").with_cached(HASH, vec![]);
        let fast = FakeService::new("fast").with_cached(HASH, vec![]);
        let services: Vec<Arc<dyn DebridService>> = vec![Arc::new(slow), Arc::new(fast)];
        let id = ContentId::from_str("tt0000001").unwrap();
        let output = process_torrents(
            &[candidate("Show.2020.1080p")],
            &services,
            &id,
            None,
            &ProcessorOptions::default(),
        )
        .await;
        let order: Vec<&str> = output
            .streams
            .iter()
            .map(|s| s.service.as_ref().unwrap().id.as_str())
            .collect();
        assert_eq!(order, vec!["slow", "fast"]);
    }

    #[tokio::test]
    async fn placeholder_hash_kept_until_resolved() {
        let service: Arc<dyn DebridService> = Arc::new(FakeService::new("A"));
        let id = ContentId::from_str("tt0000001").unwrap();
        let placeholder = CandidateTorrent {
            title: Some("Show.2020.1080p".into()),
            addon: "indexarr".into(),
            ..CandidateTorrent::from_download_url("https://indexer/dl/1")
        };
        let expected_hash = placeholder.hash.clone();
        let output = process_torrents(
            &[placeholder],
            &[service],
            &id,
            None,
            &ProcessorOptions::default(),
        )
        .await;
        assert_eq!(output.streams[0].info_hash.as_deref(), Some(expected_hash.as_str()));
    }
}
