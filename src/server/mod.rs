use axum::extract::{ConnectInfo, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect};
use axum::routing::get;
use axum::{Json, Router};
use base64::Engine;
use serde::Serialize;
use tower_http::cors::CorsLayer;

use crate::app_state::{AppError, AppState};
use crate::config::{self, CONFIG};
use crate::content_id::{ContentId, MediaType};
use crate::debrid::PlaybackRequest;
use crate::stream::{ParsedStream, StreamList, StreamType};
use crate::user_data::{UserData, ValidatedUserData};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/manifest.json", get(manifest))
        .route("/stream/{type}/{id}", get(streams))
        .route("/{config}/manifest.json", get(manifest))
        .route("/{config}/stream/{type}/{id}", get(streams_with_config))
        .route(
            "/api/v1/debrid/playback/{auth}/{file}/{meta}/{filename}",
            get(playback),
        )
        .route("/api/v1/library/refresh", get(refresh_library))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct Manifest {
    id: &'static str,
    version: &'static str,
    name: &'static str,
    description: &'static str,
    resources: Vec<&'static str>,
    types: Vec<&'static str>,
    #[serde(rename = "idPrefixes")]
    id_prefixes: Vec<&'static str>,
}

async fn manifest() -> Json<Manifest> {
    Json(Manifest {
        id: "dev.streamgate",
        version: env!("CARGO_PKG_VERSION"),
        name: "Streamgate",
        description: "Debrid-aware stream aggregation",
        resources: vec!["stream"],
        types: vec!["movie", "series", "anime"],
        id_prefixes: vec!["tt", "tmdb", "tvdb", "kitsu", "mal", "anilist"],
    })
}

fn decode_user_data(config: &str) -> Result<ValidatedUserData, AppError> {
    let raw = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(config)
        .map_err(|_| AppError::bad_request("config blob is not base64"))?;
    let data: UserData = serde_json::from_slice(&raw)
        .map_err(|e| AppError::bad_request(format!("config blob does not parse: {e}")))?;
    Ok(data.validate(&CONFIG.validation_limits())?)
}

/// Wire shape of one stream entry, per the manifest contract of the
/// transport layer.
#[derive(Debug, Serialize)]
struct WireStream {
    name: String,
    description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "externalUrl")]
    external_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "infoHash")]
    info_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "fileIdx")]
    file_idx: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    sources: Vec<String>,
}

/// The auth segment is the service's credential blob when the request
/// brought its own services, the bare service id otherwise.
fn playback_url(
    stream: &ParsedStream,
    content_id: &ContentId,
    services: &[crate::user_data::ServiceConfig],
) -> Option<String> {
    let service = stream.service.as_ref()?;
    let hash = stream.info_hash.as_deref()?;
    let engine = &base64::engine::general_purpose::URL_SAFE_NO_PAD;
    let auth = match services.iter().find(|s| s.id == service.id) {
        Some(config) => engine.encode(serde_json::to_vec(config).ok()?),
        None => engine.encode(service.id.as_bytes()),
    };
    let filename = urlencoding::encode(&stream.file.name).into_owned();
    Some(format!(
        "/api/v1/debrid/playback/{auth}/{hash}/{content_id}/{filename}"
    ))
}

fn to_wire(
    list: StreamList,
    content_id: &ContentId,
    services: &[crate::user_data::ServiceConfig],
) -> Vec<WireStream> {
    list.streams
        .into_iter()
        .map(|stream| {
            let parsed = stream.parsed_file.clone().unwrap_or_default();
            let resolution = parsed.resolution.as_deref().unwrap_or("?");
            let name = match (&stream.service, stream.stream_type()) {
                (Some(service), _) => {
                    let marker = if service.library {
                        "⚡ lib"
                    } else if service.cached {
                        "⚡"
                    } else {
                        "⬇"
                    };
                    format!("[{} {marker}] {resolution}", service.id.to_uppercase())
                }
                (None, StreamType::Error) => format!("[{} error]", stream.addon),
                (None, StreamType::Info) => "[info]".to_owned(),
                (None, _) => format!("[{}] {resolution}", stream.addon),
            };
            let mut description = stream
                .filename
                .clone()
                .or_else(|| stream.message.clone())
                .unwrap_or_default();
            if let Some(size) = stream.effective_size() {
                description.push_str(&format!("\n{:.2} GiB", size as f64 / (1 << 30) as f64));
            }
            let url = stream
                .url
                .clone()
                .or_else(|| playback_url(&stream, content_id, services));
            WireStream {
                name,
                description,
                url,
                external_url: stream.external_url.clone(),
                info_hash: stream.info_hash.clone(),
                file_idx: (stream.file.index >= 0).then_some(stream.file.index as u32),
                sources: stream.sources.clone(),
            }
        })
        .collect()
}

#[derive(Debug, Serialize)]
struct StreamsResponse {
    streams: Vec<WireStream>,
}

struct OptionalConnectInfo(Option<ConnectInfo<std::net::SocketAddr>>);

impl<S> axum::extract::FromRequestParts<S> for OptionalConnectInfo
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        Ok(Self(
            parts
                .extensions
                .get::<ConnectInfo<std::net::SocketAddr>>()
                .copied(),
        ))
    }
}

async fn streams(
    State(state): State<AppState>,
    OptionalConnectInfo(connect_info): OptionalConnectInfo,
    Path((media_type, id)): Path<(String, String)>,
) -> Result<Json<StreamsResponse>, AppError> {
    serve_streams(state, connect_info, None, media_type, id).await
}

async fn streams_with_config(
    State(state): State<AppState>,
    OptionalConnectInfo(connect_info): OptionalConnectInfo,
    Path((config, media_type, id)): Path<(String, String, String)>,
) -> Result<Json<StreamsResponse>, AppError> {
    serve_streams(state, connect_info, Some(config), media_type, id).await
}

async fn serve_streams(
    state: AppState,
    connect_info: Option<ConnectInfo<std::net::SocketAddr>>,
    config: Option<String>,
    media_type: String,
    id: String,
) -> Result<Json<StreamsResponse>, AppError> {
    let media: MediaType = media_type
        .parse()
        .map_err(|_| AppError::bad_request(format!("unknown media type {media_type}")))?;
    let content_id: ContentId = id
        .trim_end_matches(".json")
        .parse()
        .map_err(|e| AppError::bad_request(format!("bad content id: {e}")))?;
    let user = match config {
        Some(config) => decode_user_data(&config)?,
        None => UserData::default().validate(&CONFIG.validation_limits())?,
    };
    let client_ip = connect_info.map(|ConnectInfo(addr)| addr.ip().to_string());

    tracing::info!(id = %content_id, media = %media, "Stream request");

    // requests carrying their own service credentials get their own adapters
    let user_services = crate::debrid::build_services(&user.data.services);
    let orchestrator = if user_services.is_empty() {
        None
    } else {
        Some(state.orchestrator.with_services(user_services))
    };
    let orchestrator = orchestrator.as_ref().unwrap_or(state.orchestrator);

    let metadata = state
        .metadata_service
        .get_metadata(&content_id, media)
        .await
        .ok();
    let candidates = orchestrator.library_candidates(metadata.as_ref()).await;
    let cancel = state.cancellation_token.child_token();
    let list = orchestrator
        .resolve_streams(content_id.clone(), media, candidates, &user, client_ip, cancel)
        .await;

    Ok(Json(StreamsResponse {
        streams: to_wire(list, &content_id, &user.data.services),
    }))
}

async fn playback(
    State(state): State<AppState>,
    Path((auth, file, meta, filename)): Path<(String, String, String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let raw = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(&auth)
        .ok()
        .and_then(|raw| String::from_utf8(raw).ok())
        .ok_or_else(|| AppError::bad_request("bad auth blob"))?;
    // a full credential blob rebuilds the adapter; a bare id selects a
    // server-configured one
    let service = match serde_json::from_str::<crate::user_data::ServiceConfig>(&raw) {
        Ok(config) => crate::debrid::build_service(&config)
            .ok_or_else(|| AppError::bad_request("service blob does not build"))?,
        Err(_) => state
            .service(&raw)
            .cloned()
            .ok_or_else(|| AppError::not_found(format!("unknown service {raw}")))?,
    };

    let content_id: ContentId = meta
        .parse()
        .map_err(|e| AppError::bad_request(format!("bad metadata id: {e}")))?;
    let filename = urlencoding::decode(&filename)
        .map(|f| f.into_owned())
        .unwrap_or(filename);

    let media = if content_id.is_episode_request() {
        MediaType::Series
    } else {
        MediaType::Movie
    };
    let metadata = state
        .metadata_service
        .get_metadata(&content_id, media)
        .await
        .ok();
    let request = PlaybackRequest {
        hash: file,
        filename: Some(filename),
        season: content_id.season,
        episode: content_id.episode,
        metadata,
        cache_and_play: true,
        ..Default::default()
    };
    let url = service.resolve(&request).await?;
    match url {
        Some(url) => Ok(Redirect::temporary(&url).into_response()),
        None => Ok((
            StatusCode::NOT_FOUND,
            "no playable file for this request",
        )
            .into_response()),
    }
}

async fn refresh_library(State(state): State<AppState>) -> Result<StatusCode, AppError> {
    for service in state.orchestrator.services() {
        if let Err(e) = service.refresh_library_cache().await {
            tracing::warn!(service = service.id(), "Library refresh failed: {e}");
        }
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn serve(state: AppState) -> anyhow::Result<()> {
    let port = CONFIG.get_value::<config::Port>().0;
    let app = router(state.clone());
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "Listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(async move { state.cancellation_token.cancelled().await })
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{FileInfo, ServiceInfo};
    use std::str::FromStr;

    #[test]
    fn playback_url_shape() {
        let stream = ParsedStream {
            info_hash: Some("aabb".into()),
            service: Some(ServiceInfo {
                id: "rd".into(),
                cached: true,
                library: false,
            }),
            file: FileInfo {
                name: "Some File.mkv".into(),
                size: None,
                index: 0,
            },
            ..Default::default()
        };
        let id = ContentId::from_str("tt0000001:1:2").unwrap();
        let url = playback_url(&stream, &id, &[]).unwrap();
        assert!(url.starts_with("/api/v1/debrid/playback/"));
        assert!(url.contains("/aabb/tt0000001:1:2/"));
        assert!(url.ends_with("Some%20File.mkv"));
    }

    #[test]
    fn user_data_decoding_rejects_garbage() {
        assert!(decode_user_data("???").is_err());
        let blob = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode("{}");
        assert!(decode_user_data(&blob).is_ok());
    }
}
