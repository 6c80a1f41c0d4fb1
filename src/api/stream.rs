//! SSE streaming endpoint for real-time job updates

use axum::{
    Json,
    extract::{ConnectInfo, Query, State as AxumState},
    http::{Extensions, HeaderMap, HeaderValue, StatusCode, header},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use base64::{Engine, engine::general_purpose::STANDARD};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use tokio_stream::StreamExt;
use tracing::{debug, warn};

use crate::signature::tokens_match;
use crate::{SharedState, StreamConfig};

const AUTH_KEY_HEADER: &str = "x-auth-key";

#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    /// Auth key, for clients such as `EventSource` that cannot set headers
    pub key: Option<String>,
}

/// Why a subscriber was turned away
#[derive(Debug, PartialEq, Eq)]
enum Denied {
    Disabled,
    TlsRequired,
    NotWhitelisted(Option<IpAddr>),
    BadAuthKey,
    Unauthenticated,
}

impl IntoResponse for Denied {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Denied::Disabled => (StatusCode::NOT_FOUND, "Job stream disabled"),
            Denied::TlsRequired => (StatusCode::FORBIDDEN, "TLS required"),
            Denied::NotWhitelisted(_) => (StatusCode::FORBIDDEN, "Address not allowed"),
            Denied::BadAuthKey => (StatusCode::FORBIDDEN, "Bad auth key"),
            Denied::Unauthenticated => {
                let mut response = (
                    StatusCode::UNAUTHORIZED,
                    Json(json!({"error": "Not authenticated"})),
                )
                    .into_response();
                response.headers_mut().insert(
                    header::WWW_AUTHENTICATE,
                    HeaderValue::from_static("Basic realm=\"hookdeploy\""),
                );
                return response;
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Checks a subscriber against `[server.stream]`: TLS, address whitelist,
/// auth key, then basic auth.
fn check_access(
    config: &StreamConfig,
    headers: &HeaderMap,
    peer: Option<IpAddr>,
    key: Option<&str>,
) -> Result<(), Denied> {
    if !config.enabled {
        return Err(Denied::Disabled);
    }
    if config.require_tls && !forwarded_over_tls(headers) {
        return Err(Denied::TlsRequired);
    }

    if !config.whitelist.is_empty() {
        let allowed = peer.is_some_and(|ip| {
            config
                .whitelist
                .iter()
                .any(|entry| entry.to_canonical() == ip.to_canonical())
        });
        if !allowed {
            return Err(Denied::NotWhitelisted(peer));
        }
    }

    if let Some(expected) = &config.auth_key {
        let presented = key.or_else(|| headers.get(AUTH_KEY_HEADER).and_then(|v| v.to_str().ok()));
        if !presented.is_some_and(|k| tokens_match(expected, k)) {
            return Err(Denied::BadAuthKey);
        }
    }

    if let Some(auth) = &config.basic_auth {
        let expected = format!(
            "Basic {}",
            STANDARD.encode(format!("{}:{}", auth.username, auth.password))
        );
        let presented = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        if !presented.is_some_and(|p| tokens_match(&expected, p)) {
            return Err(Denied::Unauthenticated);
        }
    }

    Ok(())
}

/// GET /api/stream/jobs - SSE stream of job status changes
pub async fn stream_jobs(
    AxumState(state): AxumState<SharedState>,
    Query(query): Query<StreamQuery>,
    extensions: Extensions,
    headers: HeaderMap,
) -> Response {
    let peer = extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    if let Err(denied) = check_access(&state.config.server.stream, &headers, peer, query.key.as_deref())
    {
        if denied != Denied::Disabled {
            warn!("Refusing job stream subscriber: {:?}", denied);
        }
        return denied.into_response();
    }

    let subscription = state.publisher.subscribe();
    debug!(
        "New job stream subscriber ({} replayed events)",
        subscription.replay.len()
    );

    let event_stream = subscription.into_stream().map(|event| {
        let data = serde_json::to_string(&event).unwrap_or_default();
        Ok::<_, Infallible>(Event::default().event(event.state.as_str()).data(data))
    });

    Sse::new(event_stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

/// True if a TLS-terminating proxy marked the request as HTTPS
fn forwarded_over_tls(headers: &HeaderMap) -> bool {
    headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .is_some_and(|proto| proto.trim().eq_ignore_ascii_case("https"))
}
