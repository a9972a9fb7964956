//! CORS policy for the dashboard frontend
//!
//! The HTTP surface is consumed by a browser dashboard. During development
//! the dashboard runs on a local dev server, so the default policy admits
//! only localhost origins on any port; everything else, including other
//! private IP ranges, is rejected. Deployments that serve the dashboard
//! from a real domain front this service with a gateway that owns the
//! cross-origin story.

use http::{header::HeaderValue, Method};
use std::time::Duration;
use tower_http::cors::{AllowOrigin, CorsLayer};

/// Headers the dashboard is allowed to send
pub const ALLOWED_HEADERS: [http::header::HeaderName; 2] =
    [http::header::CONTENT_TYPE, http::header::AUTHORIZATION];

/// Methods the dashboard uses against this API
pub const ALLOWED_METHODS: [Method; 5] = [
    Method::GET,
    Method::POST,
    Method::PATCH,
    Method::DELETE,
    Method::OPTIONS,
];

/// Preflight cache lifetime
pub const DEFAULT_MAX_AGE_SECS: u64 = 3600;

/// The default CORS layer: localhost origins only.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(|origin, _| {
            is_localhost_origin(origin)
        }))
        .allow_methods(ALLOWED_METHODS)
        .allow_headers(ALLOWED_HEADERS)
        .max_age(Duration::from_secs(DEFAULT_MAX_AGE_SECS))
}

/// Whether `origin` is `http(s)://localhost`, `http(s)://127.0.0.1` or
/// `http(s)://[::1]`, with an optional port and path.
///
/// Prefix tricks like `http://localhost.evil.com` do not match: the host
/// must be followed by nothing, a `:port`, or a `/`.
pub fn is_localhost_origin(origin: &HeaderValue) -> bool {
    let Ok(origin) = origin.to_str() else {
        return false;
    };
    let origin = origin.to_lowercase();

    let Some(rest) = origin
        .strip_prefix("http://")
        .or_else(|| origin.strip_prefix("https://"))
    else {
        return false;
    };

    for host in ["localhost", "127.0.0.1", "[::1]"] {
        if let Some(after) = rest.strip_prefix(host) {
            return valid_host_suffix(after);
        }
    }
    false
}

/// What may legally follow the host in an Origin value.
fn valid_host_suffix(after: &str) -> bool {
    if after.is_empty() || after.starts_with('/') {
        return true;
    }
    let Some(port) = after.strip_prefix(':') else {
        return false;
    };
    let port = &port[..port.find('/').unwrap_or(port.len())];
    matches!(port.parse::<u16>(), Ok(n) if n > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allowed(origin: &'static str) -> bool {
        is_localhost_origin(&HeaderValue::from_static(origin))
    }

    #[test]
    fn test_localhost_variants_allowed() {
        assert!(allowed("http://localhost"));
        assert!(allowed("https://localhost:3000"));
        assert!(allowed("http://127.0.0.1:5173"));
        assert!(allowed("http://[::1]:8080"));
        assert!(allowed("http://localhost:3000/dashboard"));
        assert!(allowed("HTTP://LOCALHOST:3000"));
    }

    #[test]
    fn test_external_origins_blocked() {
        assert!(!allowed("http://example.com"));
        assert!(!allowed("https://marketplace.example.com"));
        assert!(!allowed("http://192.168.1.10:3000"));
        assert!(!allowed("http://10.0.0.5"));
    }

    #[test]
    fn test_prefix_tricks_blocked() {
        assert!(!allowed("http://localhost.evil.com"));
        assert!(!allowed("http://localhostevil.com"));
        assert!(!allowed("http://127.0.0.1.evil.com"));
    }

    #[test]
    fn test_malformed_origins_blocked() {
        assert!(!allowed("localhost:3000"));
        assert!(!allowed("ftp://localhost"));
        assert!(!allowed("http://localhost:notaport"));
        assert!(!allowed("http://localhost:0"));
        assert!(!allowed(""));
    }

    #[test]
    fn test_layer_builds() {
        let _ = cors_layer();
    }
}
