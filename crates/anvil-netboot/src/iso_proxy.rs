//! ISO-patching reverse proxy (spec.md §4.D "ISO patching proxy").
//! Grounded on `smee/internal/iso/iso.go`'s `Handler.RoundTrip`:
//! forward everything except a `206 Partial Content` body, in which
//! case search for the magic string and overwrite it in place with
//! `constructPatch`, left-padded with spaces to the exact magic-string
//! length.

use std::sync::Arc;

use anvil_backend::HardwareBackend;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use mac_address::MacAddress;
use reqwest::Client;
use tracing::{info, warn};

const DEFAULT_CONSOLES: &str =
    "console=ttyS1 console=ttyS1 console=ttyS0 console=ttyAMA0 console=ttyS1 console=tty0";

/// Operator-configured parameters for `constructPatch` (spec.md §4.D
/// "The patch contents are: operator-extra kernel args, a computed
/// console= list..., syslog_host, grpc_authority, tinkerbell_tls,
/// worker_id=<mac>").
#[derive(Debug, Clone)]
pub struct IsoPatchConfig {
    pub source_iso_url: String,
    pub magic_string: String,
    pub extra_kernel_args: Vec<String>,
    pub syslog_host: String,
    pub grpc_authority: String,
    pub tink_server_tls: bool,
}

#[derive(Clone)]
pub struct IsoProxyState {
    pub backend: Arc<dyn HardwareBackend>,
    pub config: Arc<IsoPatchConfig>,
    pub client: Client,
}

/// Handles one request to `.../<mac>/.../<name>.iso` (spec.md §4.D).
pub async fn handle(State(state): State<IsoProxyState>, req: Request) -> Response {
    if req.method() != Method::GET && req.method() != Method::HEAD {
        return StatusCode::NOT_IMPLEMENTED.into_response();
    }

    let path = req.uri().path().to_string();
    if !path.ends_with(".iso") {
        return StatusCode::NOT_FOUND.into_response();
    }

    let Some(mac) = second_to_last_segment(&path) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let Ok(mac) = mac.parse::<MacAddress>() else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    let facility = match state.backend.get_by_mac(mac).await {
        Ok(record) => record.facility.unwrap_or_default(),
        Err(e) if e.is_not_found() => return StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            warn!(error = %e, %mac, "hardware backend error serving iso proxy");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let upstream_url = format!("{}{}", state.config.source_iso_url, upstream_suffix(&path, &mac.to_string()));
    let method = if req.method() == Method::HEAD { reqwest::Method::HEAD } else { reqwest::Method::GET };

    let mut upstream_req = state.client.request(method, &upstream_url);
    if let Some(range) = req.headers().get(header::RANGE) {
        upstream_req = upstream_req.header(header::RANGE, range.clone());
    }

    let upstream_resp = match upstream_req.send().await {
        Ok(resp) => resp,
        Err(e) => {
            warn!(error = %e, upstream_url, "upstream iso fetch failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let status = upstream_resp.status();
    let mut headers = upstream_resp.headers().clone();

    if req.method() == Method::HEAD || status != reqwest::StatusCode::PARTIAL_CONTENT {
        let body = if req.method() == Method::HEAD {
            Body::empty()
        } else {
            Body::from_stream(upstream_resp.bytes_stream())
        };
        return build_response(status, &headers, body);
    }

    let body_bytes = match upstream_resp.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "failed reading partial-content body");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let patched = patch_body(body_bytes.to_vec(), &facility, &mac.to_string(), &state.config);
    headers.remove(header::CONTENT_LENGTH);
    let mut response = build_response(status, &headers, Body::from(patched.clone()));
    response
        .headers_mut()
        .insert(header::CONTENT_LENGTH, patched.len().to_string().parse().unwrap());
    response
}

fn build_response(status: reqwest::StatusCode, headers: &reqwest::header::HeaderMap, body: Body) -> Response {
    let mut builder = Response::builder().status(status.as_u16());
    for (name, value) in headers.iter() {
        if name == reqwest::header::TRANSFER_ENCODING {
            continue;
        }
        builder = builder.header(name.as_str(), value.as_bytes());
    }
    builder.body(body).unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Extracts the second-to-last path segment, expected to be a MAC
/// address (spec.md §4.D "The second-to-last path segment must parse as
/// a MAC address").
fn second_to_last_segment(path: &str) -> Option<&str> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.len() < 2 {
        return None;
    }
    Some(segments[segments.len() - 2])
}

/// Rebuilds the upstream path with the MAC segment stripped (spec.md
/// §4.D "Strip the MAC segment, reverse-proxy the upstream ISO URL").
fn upstream_suffix(path: &str, mac: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| s != &mac && !s.is_empty()).collect();
    format!("/{}", segments.join("/"))
}

/// Computes the `console=` block per spec.md §4.D: facility verbatim if
/// it already contains `console=`, else `facility=<f> <defaults>`, else
/// the bare defaults.
fn console_block(facility: &str) -> String {
    if facility.contains("console=") {
        facility.to_string()
    } else if !facility.is_empty() {
        format!("facility={facility} {DEFAULT_CONSOLES}")
    } else {
        DEFAULT_CONSOLES.to_string()
    }
}

fn construct_patch(facility: &str, mac: &str, config: &IsoPatchConfig) -> String {
    let parts = [
        config.extra_kernel_args.join(" "),
        console_block(facility),
        format!("syslog_host={}", config.syslog_host),
        format!("grpc_authority={}", config.grpc_authority),
        format!("tinkerbell_tls={}", config.tink_server_tls),
        format!("worker_id={mac}"),
    ];
    parts.join(" ")
}

/// Finds the magic string in `body` and overwrites it in place,
/// left-padded with spaces to the magic string's exact length (spec.md
/// §4.D, §8 "ISO patching is length-preserving"). A magic string
/// straddling a chunk boundary is not patched, by design (spec.md §4.D
/// known limitation, §9).
fn patch_body(mut body: Vec<u8>, facility: &str, mac: &str, config: &IsoPatchConfig) -> Vec<u8> {
    let magic = config.magic_string.as_bytes();
    if magic.is_empty() {
        return body;
    }
    let Some(idx) = find_subslice(&body, magic) else {
        return body;
    };

    let patch = construct_patch(facility, mac, config);
    let mut replacement = vec![b' '; magic.len()];
    let patch_bytes = patch.as_bytes();
    let copy_len = patch_bytes.len().min(magic.len());
    replacement[..copy_len].copy_from_slice(&patch_bytes[..copy_len]);

    info!(mac, "magic string found, patching the iso chunk");
    body[idx..idx + magic.len()].copy_from_slice(&replacement);
    body
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> IsoPatchConfig {
        IsoPatchConfig {
            source_iso_url: "http://upstream.example/hook.iso".to_string(),
            magic_string: "!!!TINKERBELL_KERNEL_PARAMS!!!!!!!".to_string(),
            extra_kernel_args: vec!["foo=bar".to_string()],
            syslog_host: "syslog.example".to_string(),
            grpc_authority: "tink.example:42113".to_string(),
            tink_server_tls: true,
        }
    }

    #[test]
    fn patch_is_length_preserving() {
        let magic = "!!!TINKERBELL_KERNEL_PARAMS!!!!!!!";
        let mut body = vec![0xAA; 64];
        body[10..10 + magic.len()].copy_from_slice(magic.as_bytes());
        let original_len = body.len();

        let patched = patch_body(body, "ewr1", "00:11:22:33:44:55", &config());
        assert_eq!(patched.len(), original_len);
    }

    #[test]
    fn missing_magic_string_is_a_noop() {
        let body = vec![0xAA; 64];
        let patched = patch_body(body.clone(), "ewr1", "00:11:22:33:44:55", &config());
        assert_eq!(patched, body);
    }

    #[test]
    fn console_block_prefers_facility_verbatim_when_it_has_console() {
        assert_eq!(console_block("console=ttyS0"), "console=ttyS0");
        assert_eq!(console_block(""), DEFAULT_CONSOLES);
        assert!(console_block("ewr1").starts_with("facility=ewr1 "));
    }

    #[test]
    fn second_to_last_segment_extracts_mac() {
        assert_eq!(
            second_to_last_segment("/foo/00:11:22:33:44:55/hook.iso"),
            Some("00:11:22:33:44:55")
        );
        assert_eq!(second_to_last_segment("/hook.iso"), None);
    }

    #[test]
    fn upstream_suffix_strips_mac_segment() {
        assert_eq!(
            upstream_suffix("/foo/00:11:22:33:44:55/hook.iso", "00:11:22:33:44:55"),
            "/foo/hook.iso"
        );
    }
}
