//! Request metadata extractors for handlers that can run without a real
//! socket in tests.

use crate::identity::ConnectionMeta;
use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::header::{HeaderMap, HeaderName, ACCEPT_LANGUAGE, USER_AGENT};
use axum::http::request::Parts;
use std::convert::Infallible;
use std::net::SocketAddr;

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Everything the identity resolver may fingerprint. The peer address is
/// `None` when connect info isn't available.
#[derive(Debug, Clone)]
pub struct ClientMeta(pub ConnectionMeta);

impl<S> FromRequestParts<S> for ClientMeta
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        let meta = ConnectionMeta {
            remote_addr: peer_addr(parts),
            user_agent: header_str(&parts.headers, &USER_AGENT),
            accept_language: header_str(&parts.headers, &ACCEPT_LANGUAGE),
            forwarded_for: header_str(&parts.headers, &X_FORWARDED_FOR),
        };
        async move { Ok(ClientMeta(meta)) }
    }
}

fn peer_addr(parts: &Parts) -> Option<SocketAddr> {
    parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0)
}

fn header_str(headers: &HeaderMap, name: &HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
