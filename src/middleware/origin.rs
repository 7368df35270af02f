//! Cross-origin allow-list shared by the WebSocket upgrade and CORS.

use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};

const HEADER_APP_KEY: &str = "x-app-key";

/// One allow-list entry. A scheme given in the configured entry must match
/// too; bare hosts accept either scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
struct AllowedOrigin {
    scheme: Option<&'static str>,
    host: String,
}

/// Allowed origins, parsed once from the configured frontend URLs.
#[derive(Debug, Clone)]
pub struct OriginPolicy {
    entries: Arc<Vec<AllowedOrigin>>,
}

impl OriginPolicy {
    /// Entries may be full origins (`https://chat.example.com`) or bare hosts,
    /// including `*.example.com` wildcards.
    pub fn new(origins: &[String]) -> Self {
        let entries = origins
            .iter()
            .map(|o| match parse_origin(o) {
                Some((scheme, host)) => AllowedOrigin {
                    scheme: Some(scheme),
                    host,
                },
                None => AllowedOrigin {
                    scheme: None,
                    host: o.trim().to_lowercase(),
                },
            })
            .collect();
        Self {
            entries: Arc::new(entries),
        }
    }

    /// Whether a browser `Origin` header value is on the list.
    pub fn allows(&self, origin: &str) -> bool {
        let Some((scheme, host)) = parse_origin(origin) else {
            return false;
        };
        self.entries.iter().any(|allowed| {
            allowed.scheme.map_or(true, |s| s == scheme) && domain_matches(&allowed.host, &host)
        })
    }

    /// Check a request's `Origin`. Requests without one come from
    /// non-browser clients and pass.
    pub fn check(&self, headers: &HeaderMap) -> bool {
        match headers.get(header::ORIGIN) {
            Some(v) => v.to_str().map(|o| self.allows(o)).unwrap_or(false),
            None => true,
        }
    }

    /// CORS layer for the HTTP routes, with credentials like the chat client sends.
    pub fn cors_layer(&self) -> CorsLayer {
        let policy = self.clone();
        CorsLayer::new()
            .allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _| {
                origin.to_str().map(|o| policy.allows(o)).unwrap_or(false)
            }))
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([
                header::CONTENT_TYPE,
                header::AUTHORIZATION,
                HeaderName::from_static(HEADER_APP_KEY),
            ])
            .allow_credentials(true)
    }
}

/// Split an origin into scheme and host
/// (e.g. "https://app.example.com" -> ("https", "app.example.com")).
pub(crate) fn parse_origin(origin: &str) -> Option<(&'static str, String)> {
    let origin = origin.trim().to_lowercase();
    let (scheme, rest) = if let Some(rest) = origin.strip_prefix("https://") {
        ("https", rest)
    } else if let Some(rest) = origin.strip_prefix("http://") {
        ("http", rest)
    } else {
        return None;
    };
    let host = rest.split('/').next()?;
    if host.is_empty() {
        return None;
    }
    Some((scheme, host.to_string()))
}

/// Check if origin host matches allowed domain (exact or *.example.com suffix).
pub(crate) fn domain_matches(allowed: &str, origin_host: &str) -> bool {
    let allowed = allowed.trim().to_lowercase();
    if allowed.starts_with('*') {
        let suffix = allowed.trim_start_matches('*').trim_start_matches('.');
        origin_host == suffix || origin_host.ends_with(&format!(".{}", suffix))
    } else {
        allowed == origin_host
    }
}
