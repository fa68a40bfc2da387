//! Request metadata extraction.
//!
//! The request id is set by `SetRequestIdLayer` before any handler runs, so
//! every decision and audit entry can be correlated with the access log.

use axum::extract::ConnectInfo;
use axum::http::{HeaderMap, Request};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

pub const X_REQUEST_ID: &str = "x-request-id";
pub const X_RESOURCE_ID: &str = "x-resource-id";
pub const X_SUBJECT_ID: &str = "x-subject-id";

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub fn request_id(headers: &HeaderMap) -> Option<String> {
    header(headers, X_REQUEST_ID)
}

pub fn resource_id(headers: &HeaderMap) -> Option<String> {
    header(headers, X_RESOURCE_ID)
}

pub fn subject_id(headers: &HeaderMap) -> Option<String> {
    header(headers, X_SUBJECT_ID)
}

pub fn user_agent(headers: &HeaderMap) -> String {
    header(headers, axum::http::header::USER_AGENT.as_str()).unwrap_or_default()
}

/// Peer address of the connection; unspecified when served without
/// connect info (in-process tests).
pub fn client_ip<B>(request: &Request<B>) -> IpAddr {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_header_helpers() {
        let mut headers = HeaderMap::new();
        headers.insert(X_REQUEST_ID, HeaderValue::from_static("req-1"));
        headers.insert(X_SUBJECT_ID, HeaderValue::from_static(""));
        assert_eq!(request_id(&headers).as_deref(), Some("req-1"));
        assert_eq!(subject_id(&headers), None);
        assert_eq!(user_agent(&headers), "");
    }

    #[test]
    fn test_client_ip_defaults_to_unspecified() {
        let request = Request::new(());
        assert_eq!(client_ip(&request), IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    }
}
