//! HTTP binary server and per-host iPXE script endpoint (spec.md §4.D
//! surfaces 2/3, §6). `GET /ipxe/<name>` supports `HEAD` and ranged
//! `GET` for HTTPBoot clients; `GET /script/<mac>` renders the iPXE
//! script via [`crate::script`].

use std::sync::Arc;

use anvil_backend::HardwareBackend;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use mac_address::MacAddress;
use tracing::warn;

use crate::assets::AssetStore;
use crate::kernel_args::{BootAction, KernelArgConfig, TraceContext};
use crate::script;

#[derive(Clone)]
pub struct AssetServerState {
    pub assets: Arc<AssetStore>,
    pub backend: Arc<dyn HardwareBackend>,
    pub kernel_args: KernelArgConfig,
}

pub fn router(state: AssetServerState) -> Router {
    Router::new()
        .route("/ipxe/{name}", get(serve_binary).head(serve_binary))
        .route("/script/{mac}", get(serve_script))
        .with_state(state)
}

async fn serve_binary(
    State(state): State<AssetServerState>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Response {
    let Some(data) = state.assets.get(&name) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let mut response_headers = HeaderMap::new();
    response_headers.insert(header::ACCEPT_RANGES, "bytes".parse().unwrap());
    response_headers.insert(header::CONTENT_TYPE, "application/octet-stream".parse().unwrap());

    if let Some(range) = headers.get(header::RANGE).and_then(|v| v.to_str().ok()) {
        if let Some((start, end)) = parse_byte_range(range, data.len()) {
            let chunk = data.slice(start..=end);
            response_headers.insert(
                header::CONTENT_RANGE,
                format!("bytes {start}-{end}/{}", data.len()).parse().unwrap(),
            );
            response_headers.insert(header::CONTENT_LENGTH, chunk.len().to_string().parse().unwrap());
            return (StatusCode::PARTIAL_CONTENT, response_headers, Body::from(chunk)).into_response();
        }
        return (
            StatusCode::RANGE_NOT_SATISFIABLE,
            [(header::CONTENT_RANGE, format!("bytes */{}", data.len()))],
        )
            .into_response();
    }

    response_headers.insert(header::CONTENT_LENGTH, data.len().to_string().parse().unwrap());
    (StatusCode::OK, response_headers, Body::from(data)).into_response()
}

/// Parses a single-range `bytes=start-end` header per RFC 7233 §2.1. No
/// multi-range support; HTTPBoot clients only ever send a single range.
fn parse_byte_range(header: &str, len: usize) -> Option<(usize, usize)> {
    let spec = header.strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    let len = len.checked_sub(1)?;
    match (start.parse::<usize>(), end.parse::<usize>()) {
        (Ok(s), Ok(e)) => Some((s, e.min(len))),
        (Ok(s), Err(_)) if end.is_empty() => Some((s, len)),
        (Err(_), Ok(suffix)) if start.is_empty() => Some((len.saturating_sub(suffix.saturating_sub(1)), len)),
        _ => None,
    }
}

async fn serve_script(
    State(state): State<AssetServerState>,
    Path(mac): Path<String>,
) -> Response {
    let mac: MacAddress = match mac.parse() {
        Ok(mac) => mac,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };

    let record = match state.backend.get_by_mac(mac).await {
        Ok(record) => record,
        Err(e) if e.is_not_found() => return StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            warn!(error = %e, %mac, "hardware backend error serving ipxe script");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let action = if record.netboot.allow_workflow { BootAction::Workflow } else { BootAction::Install };
    let trace: Option<TraceContext> = None;

    match script::render(&record, &state.kernel_args, action, "active", trace.as_ref()) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain")],
            body,
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, %mac, "failed to render ipxe script");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_open_ended_range() {
        assert_eq!(parse_byte_range("bytes=100-", 1000), Some((100, 999)));
    }

    #[test]
    fn parses_bounded_range() {
        assert_eq!(parse_byte_range("bytes=100-199", 1000), Some((100, 199)));
    }

    #[test]
    fn parses_suffix_range() {
        assert_eq!(parse_byte_range("bytes=-100", 1000), Some((900, 999)));
    }

    #[test]
    fn rejects_malformed_range() {
        assert_eq!(parse_byte_range("nonsense", 1000), None);
    }
}
