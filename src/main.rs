use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use streamgate::app_state::AppState;
use streamgate::cache::CACHES;
use streamgate::config::{self, CONFIG};
use streamgate::metadata::anime::AnimeDb;
use streamgate::metadata::imdb::ImdbApi;
use streamgate::metadata::seadex::SeadexApi;
use streamgate::metadata::tmdb::TmdbApi;
use streamgate::metadata::trakt::TraktApi;
use streamgate::metadata::tvdb::TvdbApi;
use streamgate::metadata::{MetadataService, TitleMetadataProvider};
use streamgate::orchestrator::{Orchestrator, OrchestratorSettings};
use streamgate::server;

#[derive(Parser, Debug)]
#[command(name = "streamgate", about = "Debrid-aware stream aggregation server")]
struct Args {
    /// Path to the toml config file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Listen port, overrides config and env
    #[arg(short, long)]
    port: Option<u16>,
    /// Anime id mapping dataset; bundled data is used when omitted
    #[arg(long)]
    anime_mappings: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    streamgate::tracing::init_tracer();

    let args = Args::parse();
    CONFIG.load_config_file(args.config.clone()).await?;
    if let Some(port) = args.port {
        CONFIG.set_cli_value(config::Port(port));
    }

    let anime_db = match &args.anime_mappings {
        Some(path) => AnimeDb::from_file(path).await?,
        None => AnimeDb::bundled(),
    };
    tracing::info!(entries = anime_db.len(), "Anime mapping database loaded");

    // provider order doubles as merge preference
    let tmdb_key = CONFIG.get_value::<config::TmdbKey>().0;
    let tvdb_key = CONFIG.get_value::<config::TvdbKey>().0;
    let trakt_key = CONFIG.get_value::<config::TraktKey>().0;
    let mut providers: Vec<Arc<dyn TitleMetadataProvider + Send + Sync>> = Vec::new();
    let mut tmdb = None;
    if !tmdb_key.is_empty() {
        let api = Arc::new(TmdbApi::new(tmdb_key.clone()));
        tmdb = Some(api.clone());
        providers.push(api);
    }
    if !tvdb_key.is_empty() {
        providers.push(Arc::new(TvdbApi::new(tvdb_key.clone())));
    }
    if !trakt_key.is_empty() {
        providers.push(Arc::new(TraktApi::new(trakt_key.clone())));
    }
    providers.push(Arc::new(ImdbApi::new()));
    let auth_fingerprint = format!(
        "t{}v{}k{}",
        u8::from(!tmdb_key.is_empty()),
        u8::from(!tvdb_key.is_empty()),
        u8::from(!trakt_key.is_empty()),
    );

    let metadata_service: &'static Arc<MetadataService> =
        Box::leak(Box::new(Arc::new(MetadataService::new(
            providers,
            anime_db,
            std::time::Duration::from_secs(CONFIG.get_value::<config::MetadataCacheTtl>().0),
            auth_fingerprint,
        ))));

    let settings = OrchestratorSettings {
        exclude_private_trackers: CONFIG
            .get_value::<config::DebridExcludePrivateTrackers>()
            .0,
        ..Default::default()
    };
    let orchestrator: &'static Orchestrator = Box::leak(Box::new(Orchestrator::new(
        Vec::new(),
        metadata_service.clone(),
        tmdb,
        Some(Arc::new(SeadexApi::new())),
        settings,
    )));

    let cancellation_token = CancellationToken::new();
    let state = AppState {
        orchestrator,
        metadata_service,
        cancellation_token: cancellation_token.clone(),
    };

    let shutdown_token = cancellation_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutting down");
            shutdown_token.cancel();
        }
    });

    let result = server::serve(state).await;
    CACHES.teardown();
    result
}
