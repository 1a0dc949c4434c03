//
// Web headers, response caching, misc helpers
//
use std::io::Cursor;

use rocket::{
    fairing::{Fairing, Info, Kind},
    http::{ContentType, Header, HeaderMap, Method, Status},
    response::{self, Responder},
    Data, Request, Response,
};

/// Security headers applied to every response. Grounded on `AppHeaders` in
/// the teacher's `util.rs`, trimmed of the password-manager-specific
/// `Permissions-Policy`/CSP allowances (no browser extension surface here).
pub struct AppHeaders();

#[rocket::async_trait]
impl Fairing for AppHeaders {
    fn info(&self) -> Info {
        Info { name: "Application Headers", kind: Kind::Response }
    }

    async fn on_response<'r>(&self, _req: &'r Request<'_>, res: &mut Response<'r>) {
        res.set_raw_header("Referrer-Policy", "same-origin");
        res.set_raw_header("X-Frame-Options", "DENY");
        res.set_raw_header("X-Content-Type-Options", "nosniff");
        res.set_raw_header("Content-Security-Policy", "frame-ancestors 'none'");
        if !res.headers().contains("cache-control") {
            res.set_raw_header("Cache-Control", "no-cache, no-store, max-age=0");
        }
    }
}

/// Minimal CORS fairing: relying parties calling `/token`/`/userinfo` from a
/// browser SPA need permissive CORS on cross-origin XHR; credentials are
/// never implied since auth is bearer-token-based, not cookie-based.
pub struct Cors();

#[rocket::async_trait]
impl Fairing for Cors {
    fn info(&self) -> Info {
        Info { name: "Cors", kind: Kind::Response }
    }

    async fn on_response<'r>(&self, request: &'r Request<'_>, response: &mut Response<'r>) {
        let req_headers = request.headers();
        if let Some(origin) = get_header(req_headers, "Origin") {
            response.set_header(Header::new("Access-Control-Allow-Origin", origin));
        }

        if request.method() == Method::Options {
            let req_allow_headers = get_header(req_headers, "Access-Control-Request-Headers").unwrap_or_default();
            let req_allow_method = get_header(req_headers, "Access-Control-Request-Method").unwrap_or_default();

            response.set_header(Header::new("Access-Control-Allow-Methods", req_allow_method));
            response.set_header(Header::new("Access-Control-Allow-Headers", req_allow_headers));
            response.set_status(Status::Ok);
            response.set_header(ContentType::Plain);
            response.set_sized_body(0, Cursor::new(""));
        }
    }
}

fn get_header(headers: &HeaderMap<'_>, name: &str) -> Option<String> {
    headers.get_one(name).map(str::to_string)
}

/// Source IP for rate limiting (spec §5 "shared resource policy" / ambient
/// component N). Grounded on the teacher's `ClientIp` request guard in
/// `auth.rs`, ported from rocket 0.4's `FromRequest<'a, 'r>` to 0.5's async
/// `FromRequest<'r>`; the `X-Forwarded-For`-style header override is dropped
/// since this crate has no admin-configurable `ip_header` setting.
pub struct ClientIp(pub std::net::IpAddr);

#[rocket::async_trait]
impl<'r> rocket::request::FromRequest<'r> for ClientIp {
    type Error = std::convert::Infallible;

    async fn from_request(req: &'r Request<'_>) -> rocket::request::Outcome<Self, Self::Error> {
        let ip = req.client_ip().unwrap_or_else(|| std::net::IpAddr::from([0, 0, 0, 0]));
        rocket::request::Outcome::Success(ClientIp(ip))
    }
}

/// Wraps a `Responder` to set `Cache-Control: public, max-age=<ttl>`, used by
/// the discovery document and JWKS endpoints (spec §6). Grounded on
/// `Cached<R>` in the teacher's `util.rs`.
pub struct Cached<R> {
    response: R,
    ttl: u64,
}

impl<R> Cached<R> {
    pub fn ttl(response: R, ttl: u64) -> Self {
        Self { response, ttl }
    }
}

impl<'r, 'o: 'r, R: Responder<'r, 'o>> Responder<'r, 'o> for Cached<R> {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        let cache_control = format!("public, max-age={}", self.ttl);
        let mut res = self.response.respond_to(req)?;
        res.set_raw_header("Cache-Control", cache_control);
        Ok(res)
    }
}

//
// SSRF guard helper
//

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// True if `ip` is routable on the public internet. Used by the HTTP client
/// factory's redirect/DNS-resolution policy to keep connector callouts off
/// loopback, link-local and private ranges. Hand-rolled rather than the
/// nightly-only `IpAddr::is_global` since this crate targets stable.
pub fn is_global(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_global_v4(v4),
        IpAddr::V6(v6) => is_global_v6(v6),
    }
}

fn is_global_v4(ip: Ipv4Addr) -> bool {
    !(ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_broadcast()
        || ip.is_documentation()
        || ip.is_unspecified()
        || ip.octets()[0] == 100 && (64..=127).contains(&ip.octets()[1]) // 100.64.0.0/10 CGNAT
        || ip.octets()[0] == 198 && (ip.octets()[1] == 18 || ip.octets()[1] == 19)) // benchmarking
}

fn is_global_v6(ip: Ipv6Addr) -> bool {
    if ip.is_loopback() || ip.is_unspecified() {
        return false;
    }
    let segments = ip.segments();
    // fc00::/7 unique local, fe80::/10 link-local
    if (segments[0] & 0xfe00) == 0xfc00 || (segments[0] & 0xffc0) == 0xfe80 {
        return false;
    }
    true
}

//
// Time methods
//

/// Seconds since the epoch. The one place production code reads the wall
/// clock directly; every policy function below this layer takes `now: i64`
/// so tests can inject it instead of sleeping.
pub fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}
